use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, info_span, Span};

use crate::core::indicators::{mean, population_std, sample_std};
use crate::core::risk::max_drawdown;
use crate::models::{MacroSnapshot, PriceTable};

const ALLOCATION_TOLERANCE: f64 = 0.01;
const EPSILON: f64 = 1e-12;

/// Target weight per instrument symbol.
pub type Allocation = BTreeMap<String, f64>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvConfig {
    pub initial_capital: f64,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub transaction_cost: f64,
    /// Daily rate subtracted in the per-step reward.
    pub step_risk_free_rate: f64,
    /// Annual rate subtracted in `get_metrics`.
    pub annual_risk_free_rate: f64,
    pub trading_days: f64,
}

impl EnvConfig {
    pub fn new(initial_capital: f64, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            initial_capital,
            start,
            end,
            transaction_cost: 0.001,
            step_risk_free_rate: 0.0001,
            annual_risk_free_rate: 0.05,
            trading_days: 252.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvStatus {
    Initialized,
    Stepping,
    Done,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortfolioState {
    pub cash: f64,
    /// Instrument -> quantity.
    pub positions: BTreeMap<String, f64>,
    pub value_history: Vec<(NaiveDate, f64)>,
    pub return_history: Vec<f64>,
    pub transaction_costs: f64,
    pub trade_count: usize,
}

impl PortfolioState {
    fn fresh(capital: f64, start: NaiveDate) -> Self {
        Self {
            cash: capital,
            value_history: vec![(start, capital)],
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepInfo {
    pub date: NaiveDate,
    pub portfolio_value: f64,
    pub daily_return: f64,
    pub cumulative_return: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub state: Vec<f64>,
    pub reward: f64,
    pub done: bool,
    pub info: Option<StepInfo>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub cumulative_return: f64,
    pub annual_return: f64,
    pub annual_volatility: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub total_trades: usize,
    pub transaction_costs: f64,
    pub final_portfolio_value: f64,
}

/// Day-stepped portfolio simulator.
///
/// Each step liquidates every holding, reopens positions per the supplied
/// allocation and advances one calendar day. Instruments are marked at their
/// latest price on or before the date, so weekends and holidays carry the
/// last close and contribute zero return.
pub struct BacktestEnvironment {
    pub config: EnvConfig,
    prices: PriceTable,
    macro_series: BTreeMap<NaiveDate, MacroSnapshot>,
    dates: Vec<NaiveDate>,
    index: usize,
    status: EnvStatus,
    portfolio: PortfolioState,
    span: Span,
}

impl BacktestEnvironment {
    pub fn new(config: EnvConfig, prices: PriceTable) -> Self {
        let mut dates = Vec::new();
        let mut day = config.start;
        while day <= config.end {
            dates.push(day);
            day += Duration::days(1);
        }
        if dates.is_empty() {
            dates.push(config.start);
        }
        let portfolio = PortfolioState::fresh(config.initial_capital, config.start);

        Self {
            config,
            prices,
            macro_series: BTreeMap::new(),
            dates,
            index: 0,
            status: EnvStatus::Initialized,
            portfolio,
            span: info_span!("backtest_env"),
        }
    }

    /// Macro snapshots keyed by date; the latest one on or before the
    /// current date is appended to the state vector.
    pub fn with_macro(mut self, series: BTreeMap<NaiveDate, MacroSnapshot>) -> Self {
        self.macro_series = series;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn instruments(&self) -> Vec<String> {
        self.prices.instruments()
    }

    pub fn status(&self) -> EnvStatus {
        self.status
    }

    pub fn current_date(&self) -> NaiveDate {
        self.dates[self.index]
    }

    pub fn portfolio(&self) -> &PortfolioState {
        &self.portfolio
    }

    pub fn portfolio_value(&self) -> f64 {
        self.portfolio
            .value_history
            .last()
            .map(|(_, v)| *v)
            .unwrap_or(self.config.initial_capital)
    }

    pub fn trade_count(&self) -> usize {
        self.portfolio.trade_count
    }

    fn is_last_date(&self) -> bool {
        self.index + 1 >= self.dates.len()
    }

    pub fn reset(&mut self) -> Vec<f64> {
        self.index = 0;
        self.status = if self.is_last_date() {
            EnvStatus::Done
        } else {
            EnvStatus::Initialized
        };
        self.portfolio = PortfolioState::fresh(self.config.initial_capital, self.config.start);
        self.state()
    }

    /// `[cash / initial, value / initial, open positions]`, followed by
    /// `policy_rate / 100` and `inflation / 100` when a macro snapshot is
    /// known for the current date.
    pub fn state(&self) -> Vec<f64> {
        let init = self.config.initial_capital;
        let (cash, value) = if init.abs() > EPSILON {
            (self.portfolio.cash / init, self.portfolio_value() / init)
        } else {
            (0.0, 0.0)
        };
        let mut state = vec![cash, value, self.portfolio.positions.len() as f64];

        if let Some((_, snap)) = self.macro_series.range(..=self.current_date()).next_back() {
            state.push(snap.policy_rate().unwrap_or(0.0) / 100.0);
            state.push(snap.inflation().unwrap_or(0.0) / 100.0);
        }
        state
    }

    pub fn step(&mut self, allocation: &Allocation) -> StepOutcome {
        let span = self.span.clone();
        let _guard = span.enter();

        if self.is_last_date() {
            self.status = EnvStatus::Done;
            return StepOutcome {
                state: self.state(),
                reward: 0.0,
                done: true,
                info: None,
                error: Some("backtest finished".to_string()),
            };
        }

        let allocation = normalize_allocation(allocation);
        let today = self.dates[self.index];
        let tomorrow = self.dates[self.index + 1];

        let value_before = self.value_at(today);
        self.rebalance(&allocation, today, value_before);

        self.index += 1;
        let value_after = self.value_at(tomorrow);
        let daily_return = if value_before.abs() > EPSILON {
            (value_after - value_before) / value_before
        } else {
            0.0
        };

        self.portfolio.return_history.push(daily_return);
        self.portfolio.value_history.push((tomorrow, value_after));
        let reward = self.reward(daily_return);

        let done = self.is_last_date();
        self.status = if done {
            EnvStatus::Done
        } else {
            EnvStatus::Stepping
        };

        let cumulative_return = if self.config.initial_capital.abs() > EPSILON {
            value_after / self.config.initial_capital - 1.0
        } else {
            0.0
        };

        debug!(
            date = %tomorrow,
            value = value_after,
            daily_return,
            reward,
            "Step"
        );
        if done {
            info!(
                final_value = value_after,
                trades = self.portfolio.trade_count,
                "Backtest reached end date"
            );
        }

        StepOutcome {
            state: self.state(),
            reward,
            done,
            info: Some(StepInfo {
                date: tomorrow,
                portfolio_value: value_after,
                daily_return,
                cumulative_return,
            }),
            error: None,
        }
    }

    fn value_at(&self, date: NaiveDate) -> f64 {
        let holdings: f64 = self
            .portfolio
            .positions
            .iter()
            .filter_map(|(symbol, qty)| self.prices.mark_at(symbol, date).map(|p| p * qty))
            .sum();
        self.portfolio.cash + holdings
    }

    /// Liquidate everything, then buy `weight * available / price` of each
    /// weighted instrument. The fee on each notional comes out of cash, so a
    /// fully invested book ends with cash equal to minus the fees.
    fn rebalance(&mut self, allocation: &Allocation, date: NaiveDate, available: f64) {
        let cost_rate = self.config.transaction_cost;
        let mut cash = available;
        let mut positions = BTreeMap::new();

        for (symbol, &weight) in allocation {
            if weight <= 0.0 {
                continue;
            }
            let Some(price) = self.prices.mark_at(symbol, date) else {
                continue;
            };
            if price <= 0.0 {
                continue;
            }
            let notional = available * weight;
            let fee = notional * cost_rate;

            positions.insert(symbol.clone(), notional / price);
            cash -= notional + fee;
            self.portfolio.transaction_costs += fee;
            self.portfolio.trade_count += 1;
        }

        self.portfolio.positions = positions;
        self.portfolio.cash = cash;
    }

    /// Running Sharpe of the return history against the daily risk-free
    /// rate. Raw return until two observations exist; 0 with no dispersion.
    fn reward(&self, daily_return: f64) -> f64 {
        let history = &self.portfolio.return_history;
        if history.len() < 2 {
            return daily_return;
        }
        let std = sample_std(history);
        if std < EPSILON {
            return 0.0;
        }
        (mean(history) - self.config.step_risk_free_rate) / std
    }

    /// `None` before the first step.
    pub fn get_metrics(&self) -> Option<BacktestMetrics> {
        let returns = &self.portfolio.return_history;
        if returns.is_empty() {
            return None;
        }
        let init = self.config.initial_capital;
        let value = self.portfolio_value();
        let growth = if init.abs() > EPSILON { value / init } else { 1.0 };
        let days = self.config.trading_days;

        let annual_return = growth.powf(days / returns.len() as f64) - 1.0;
        let annual_volatility = population_std(returns) * days.sqrt();
        let sharpe_ratio = if annual_volatility > EPSILON {
            (annual_return - self.config.annual_risk_free_rate) / annual_volatility
        } else {
            0.0
        };

        Some(BacktestMetrics {
            cumulative_return: growth - 1.0,
            annual_return,
            annual_volatility,
            sharpe_ratio,
            max_drawdown: max_drawdown(returns),
            total_trades: self.portfolio.trade_count,
            transaction_costs: self.portfolio.transaction_costs,
            final_portfolio_value: value,
        })
    }
}

/// Rescale to sum 1 when more than 1% off; a non-positive sum means all cash.
pub fn normalize_allocation(allocation: &Allocation) -> Allocation {
    let total: f64 = allocation.values().sum();
    if !total.is_finite() || total <= 0.0 {
        return Allocation::new();
    }
    if (total - 1.0).abs() > ALLOCATION_TOLERANCE {
        allocation
            .iter()
            .map(|(k, v)| (k.clone(), v / total))
            .collect()
    } else {
        allocation.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{day, equal_allocation, three_asset_table};

    fn env(days: i64) -> BacktestEnvironment {
        let table = three_asset_table(days + 5);
        BacktestEnvironment::new(EnvConfig::new(100_000.0, day(0), day(days)), table)
    }

    #[test]
    fn ten_steps_three_assets() {
        let mut env = env(10);
        env.reset();
        let alloc = equal_allocation(&env.instruments());
        let mut last = None;
        for _ in 0..10 {
            last = Some(env.step(&alloc));
        }
        let last = last.unwrap();
        assert!(last.done);
        assert_eq!(env.status(), EnvStatus::Done);
        let m = env.get_metrics().unwrap();
        assert_eq!(m.total_trades, 30);
        assert!(m.transaction_costs > 0.0);
    }

    #[test]
    fn stepping_past_done_is_flagged() {
        let mut env = env(2);
        let alloc = equal_allocation(&env.instruments());
        assert!(!env.step(&alloc).done);
        assert!(env.step(&alloc).done);
        let out = env.step(&alloc);
        assert!(out.done);
        assert_eq!(out.reward, 0.0);
        assert!(out.error.is_some());
        assert!(out.info.is_none());
        assert_eq!(env.trade_count(), 6);
    }

    #[test]
    fn reset_restores_capital() {
        let mut env = env(10);
        let alloc = equal_allocation(&env.instruments());
        for _ in 0..5 {
            env.step(&alloc);
        }
        assert!(env.trade_count() > 0);
        let state = env.reset();
        assert_eq!(env.portfolio_value(), 100_000.0);
        assert_eq!(env.trade_count(), 0);
        assert_eq!(env.status(), EnvStatus::Initialized);
        assert_eq!(state, vec![1.0, 1.0, 0.0]);
        assert!(env.get_metrics().is_none());
    }

    #[test]
    fn over_allocation_is_renormalized() {
        let mut a = env(5);
        let mut b = env(5);
        let syms = a.instruments();
        let scaled: Allocation = syms.iter().map(|s| (s.clone(), 1.03 / 3.0)).collect();
        let exact: Allocation = syms.iter().map(|s| (s.clone(), 1.0 / 3.0)).collect();
        let ra = a.step(&scaled);
        let rb = b.step(&exact);
        let (ia, ib) = (ra.info.unwrap(), rb.info.unwrap());
        assert!((ia.portfolio_value - ib.portfolio_value).abs() < 1e-6);
        assert!((ra.reward - rb.reward).abs() < 1e-12);
    }

    #[test]
    fn non_positive_allocation_is_cash() {
        let mut env = env(3);
        let mut alloc = Allocation::new();
        alloc.insert("AAA".to_string(), 0.0);
        let out = env.step(&alloc);
        assert_eq!(env.trade_count(), 0);
        assert_eq!(out.info.unwrap().daily_return, 0.0);
        assert_eq!(out.reward, 0.0);
    }

    #[test]
    fn gaps_carry_last_price() {
        let mut table = PriceTable::new();
        table.insert("AAA", day(0), 100.0);
        table.insert("AAA", day(3), 110.0);
        let mut env = BacktestEnvironment::new(EnvConfig::new(1_000.0, day(0), day(4)), table);
        let mut alloc = Allocation::new();
        alloc.insert("AAA".to_string(), 1.0);

        let first = env.step(&alloc).info.unwrap();
        assert!(first.daily_return.abs() < 1e-12 || first.daily_return < 0.0);
        env.step(&alloc);
        let third = env.step(&alloc).info.unwrap();
        assert!(third.daily_return > 0.09);
        assert_eq!(env.trade_count(), 3);
    }

    #[test]
    fn unquoted_instruments_stay_cash() {
        let mut table = PriceTable::new();
        table.insert("AAA", day(0), 100.0);
        table.insert("BBB", day(2), 50.0);
        let mut env = BacktestEnvironment::new(EnvConfig::new(1_000.0, day(0), day(4)), table);
        let mut alloc = Allocation::new();
        alloc.insert("AAA".to_string(), 0.5);
        alloc.insert("BBB".to_string(), 0.5);
        env.step(&alloc);
        assert_eq!(env.trade_count(), 1);
        assert_eq!(env.portfolio().positions.len(), 1);
        assert!((env.portfolio().cash - 499.5).abs() < 1e-9);
    }

    #[test]
    fn rebalance_sizes_by_weight_and_charges_fee() {
        let mut table = PriceTable::new();
        for i in 0..=3 {
            table.insert("AAA", day(i), 100.0);
        }
        let mut env = BacktestEnvironment::new(EnvConfig::new(1_000.0, day(0), day(3)), table);
        let alloc = Allocation::from([("AAA".to_string(), 1.0)]);
        let out = env.step(&alloc);

        assert!((env.portfolio().positions["AAA"] - 10.0).abs() < 1e-12);
        assert!((env.portfolio().transaction_costs - 1.0).abs() < 1e-12);
        assert!((env.portfolio().cash + 1.0).abs() < 1e-12);
        assert!((out.info.unwrap().portfolio_value - 999.0).abs() < 1e-9);

        let mut split = Allocation::new();
        split.insert("AAA".to_string(), 0.25);
        split.insert("CASH".to_string(), 0.75);
        env.reset();
        env.step(&split);
        assert!((env.portfolio().positions["AAA"] - 2.5).abs() < 1e-12);
        assert!((env.portfolio().transaction_costs - 0.25).abs() < 1e-12);
        assert!((env.portfolio().cash - 749.75).abs() < 1e-9);
    }

    #[test]
    fn macro_extends_state() {
        let mut series = BTreeMap::new();
        series.insert(
            day(0),
            MacroSnapshot::new(day(0)).with("policy_rate", 11.25).with("inflation", 4.5),
        );
        let mut env = env(3).with_macro(series);
        let state = env.reset();
        assert_eq!(state.len(), 5);
        assert!((state[3] - 0.1125).abs() < 1e-12);
        assert!((state[4] - 0.045).abs() < 1e-12);
    }

    #[test]
    fn first_reward_is_raw_return() {
        let mut env = env(5);
        let alloc = equal_allocation(&env.instruments());
        let out = env.step(&alloc);
        assert_eq!(out.reward, out.info.unwrap().daily_return);
    }

    #[test]
    fn metrics_sharpe_uses_annual_rate() {
        let mut env = env(20);
        let alloc = equal_allocation(&env.instruments());
        while !env.step(&alloc).done {}
        let m = env.get_metrics().unwrap();
        if m.annual_volatility > 0.0 {
            let expected = (m.annual_return - 0.05) / m.annual_volatility;
            assert!((m.sharpe_ratio - expected).abs() < 1e-9);
        }
        assert!(m.max_drawdown <= 0.0);
        assert!((m.final_portfolio_value - env.portfolio_value()).abs() < 1e-9);
    }
}
