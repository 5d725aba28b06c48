use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use quant_invest_algo::config::Config;
use quant_invest_algo::data::{BcbClient, HistoricalMarket, MacroData, MarketData};
use quant_invest_algo::models::{AllocationDecision, MacroSnapshot, PriceTable};
use quant_invest_algo::orchestrator::{AutonomousOptions, MarketSnapshot, Orchestrator, DEFAULT_LOOKBACK};

#[derive(Parser)]
#[command(
    name = "quant-invest-algo",
    about = "Regime-aware allocation advisor for periodic contributions"
)]
struct Cli {
    /// conservative, intermediate (moderate) or aggressive.
    #[arg(long)]
    profile: Option<String>,

    /// Contribution to allocate.
    #[arg(long)]
    aporte: Option<f64>,

    /// Wide CSV of prices: date column plus one column per instrument.
    #[arg(long)]
    prices: Option<PathBuf>,

    /// Keep deciding on a fixed interval until Ctrl+C.
    #[arg(long, default_value_t = false)]
    auto: bool,

    #[arg(long)]
    interval_secs: Option<u64>,

    #[arg(long)]
    max_iterations: Option<usize>,

    /// Also export the decision log as CSV.
    #[arg(long)]
    csv: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut cfg = Config::from_env();
    if let Some(profile) = cli.profile {
        cfg.profile = profile;
    }
    if let Some(aporte) = cli.aporte {
        cfg.aporte = aporte;
    }
    if let Some(prices) = cli.prices {
        cfg.prices_csv = prices;
    }
    if let Some(secs) = cli.interval_secs {
        cfg.agent_interval_secs = secs;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    let mut orchestrator = Orchestrator::from_config(&cfg)?;
    let table = PriceTable::from_csv_path(&cfg.prices_csv)
        .with_context(|| format!("loading prices from {}", cfg.prices_csv.display()))?;
    let mut market = HistoricalMarket::new(table, &cfg.benchmark)?;
    let mut bcb = BcbClient::new(&cfg.bcb_base_url).with_window_days(cfg.bcb_window_days);

    info!("{}", "=".repeat(70));
    info!("Allocation advisor starting up");
    info!(
        "Profile: {} | Contribution: R$ {:.2} | Benchmark: {}",
        orchestrator.profile().name,
        cfg.aporte,
        cfg.benchmark
    );
    info!("{}", "=".repeat(70));

    if cli.auto {
        let token = CancellationToken::new();
        let ctrl_c = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
                ctrl_c.cancel();
            }
        });

        let mut options = AutonomousOptions::from_config(&cfg);
        options.max_iterations = cli.max_iterations;
        info!(
            "Autonomous mode every {:?}, persisting to {}. Press Ctrl+C to stop.",
            Duration::from_secs(cfg.agent_interval_secs),
            options.log_path.display()
        );
        orchestrator
            .run_autonomous(&mut market, &mut bcb, &options, &token)
            .await;
    } else {
        let history = market.fetch_history(DEFAULT_LOOKBACK).await?;
        let date = history
            .benchmark
            .last()
            .map(|p| p.date)
            .context("benchmark history is empty")?;
        let macro_data = match bcb.fetch_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Macro data unavailable, continuing without it: {:#}", e);
                MacroSnapshot::default()
            }
        };
        let decision = orchestrator.decide(date, cfg.aporte, &MarketSnapshot::from_history(history, macro_data));
        print_decision(&decision);
        orchestrator.save_json(&cfg.decisions_path())?;
        println!("\nDecision log saved to: {}", cfg.decisions_path().display());
    }

    if let Some(path) = cli.csv {
        orchestrator.export_csv(&path)?;
        println!("Decision log exported to: {}", path.display());
    }

    Ok(())
}

fn print_decision(d: &AllocationDecision) {
    let a = &d.asset_class_amounts;
    println!("\n{}", "=".repeat(70));
    println!("  ALLOCATION DECISION #{} ({})", d.id, d.date);
    println!("{}", "=".repeat(70));
    println!("  Profile:     {}", d.profile);
    println!("  Amount:      R$ {:.2}", d.amount);
    println!(
        "  Regime:      {} ({:.0}%)",
        d.regime.regime.as_str().to_uppercase(),
        d.regime.strength * 100.0
    );
    println!("\n  ─── Asset classes ───");
    println!("  Fixed income:        R$ {:>12.2}", a.fixed_income);
    println!("  Real-estate funds:   R$ {:>12.2}", a.real_estate_funds);
    println!("  Domestic equities:   R$ {:>12.2}", a.domestic_equities);
    println!("  Foreign equities:    R$ {:>12.2}", a.foreign_equities);
    println!("\n  ─── Domestic sectors ───");
    for (sector, amount) in &d.sector_amounts {
        let weight = d.sector_weights.get(sector).copied().unwrap_or(0.0);
        println!("  {:<20} R$ {:>12.2}  ({:.1}%)", sector.as_str(), amount, weight * 100.0);
    }
    println!("\n  {}", d.justification);
    println!("{}", "=".repeat(70));
}
