use chrono::NaiveDate;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;

use super::environment::{BacktestEnvironment, BacktestMetrics};

#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    // Period
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub steps: usize,

    // Performance
    pub initial_capital: f64,
    pub final_value: f64,
    pub total_pnl: f64,
    pub metrics: BacktestMetrics,

    // Days
    pub best_day: f64,
    pub worst_day: f64,
    pub positive_days: usize,
    pub negative_days: usize,

    // Equity curve
    pub equity_curve: Vec<(NaiveDate, f64)>,
}

impl BacktestReport {
    /// `None` when the environment has not been stepped.
    pub fn from_environment(env: &BacktestEnvironment) -> Option<Self> {
        let metrics = env.get_metrics()?;
        let portfolio = env.portfolio();
        let returns = &portfolio.return_history;
        let equity_curve = portfolio.value_history.clone();

        let start = equity_curve.first().map(|(d, _)| *d).unwrap_or(env.config.start);
        let end = equity_curve.last().map(|(d, _)| *d).unwrap_or(env.config.start);

        Some(BacktestReport {
            start,
            end,
            steps: returns.len(),
            initial_capital: env.config.initial_capital,
            final_value: metrics.final_portfolio_value,
            total_pnl: metrics.final_portfolio_value - env.config.initial_capital,
            metrics,
            best_day: returns.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            worst_day: returns.iter().copied().fold(f64::INFINITY, f64::min),
            positive_days: returns.iter().filter(|r| **r > 0.0).count(),
            negative_days: returns.iter().filter(|r| **r < 0.0).count(),
            equity_curve,
        })
    }

    pub fn render(&self) -> String {
        let m = &self.metrics;
        let mut out = String::new();
        let rule = "=".repeat(70);
        let thin = "  ───────────────────────────────────";

        let _ = writeln!(out, "\n{}", rule);
        let _ = writeln!(out, "  BACKTEST REPORT");
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(
            out,
            "  Period:      {} to {} ({} steps)",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d"),
            self.steps
        );
        let _ = writeln!(out);
        let _ = writeln!(out, "  PERFORMANCE");
        let _ = writeln!(out, "{}", thin);
        let _ = writeln!(out, "  Initial:     R$ {:.2}", self.initial_capital);
        let _ = writeln!(out, "  Final:       R$ {:.2}", self.final_value);
        let _ = writeln!(out, "  PnL:         R$ {:+.2}", self.total_pnl);
        let _ = writeln!(out, "  Return:      {:+.2}%", m.cumulative_return * 100.0);
        let _ = writeln!(out, "  Annualized:  {:+.2}%", m.annual_return * 100.0);
        let _ = writeln!(out);
        let _ = writeln!(out, "  TRADING");
        let _ = writeln!(out, "{}", thin);
        let _ = writeln!(out, "  Trades:      {}", m.total_trades);
        let _ = writeln!(out, "  Costs:       R$ {:.2}", m.transaction_costs);
        let _ = writeln!(out, "  Up/Down:     {} / {}", self.positive_days, self.negative_days);
        let _ = writeln!(out, "  Best day:    {:+.3}%", self.best_day * 100.0);
        let _ = writeln!(out, "  Worst day:   {:+.3}%", self.worst_day * 100.0);
        let _ = writeln!(out);
        let _ = writeln!(out, "  RISK");
        let _ = writeln!(out, "{}", thin);
        let _ = writeln!(out, "  Volatility:  {:.2}%", m.annual_volatility * 100.0);
        let _ = writeln!(out, "  Max DD:      {:.2}%", m.max_drawdown * 100.0);
        let _ = writeln!(out, "  Sharpe:      {:.2}", m.sharpe_ratio);
        let _ = writeln!(out, "{}", rule);
        out
    }

    pub fn print_summary(&self) {
        print!("{}", self.render());
    }

    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.render())
    }
}
