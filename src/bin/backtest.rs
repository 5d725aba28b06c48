use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use quant_invest_algo::agent::{AgentConfig, RLAgent, TrainOptions};
use quant_invest_algo::backtesting::{Allocation, BacktestEnvironment, BacktestReport, EnvConfig};
use quant_invest_algo::config::Config;
use quant_invest_algo::models::{PriceTable, Sector};
use quant_invest_algo::orchestrator::{sector_allocation, MarketSnapshot, Orchestrator, DEFAULT_LOOKBACK};

#[derive(Parser)]
#[command(name = "backtest", about = "Simulate profile-driven allocations or train the RL agent")]
struct Cli {
    #[arg(long)]
    prices: Option<PathBuf>,

    #[arg(long)]
    profile: Option<String>,

    /// Train the agent instead of replaying the profile, optionally for N
    /// episodes (default `RL_EPISODES`).
    #[arg(long)]
    train: Option<Option<usize>>,

    #[arg(long, default_value = "data/q_table.json")]
    q_table: PathBuf,

    #[arg(long, default_value = "data")]
    report_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut cfg = Config::from_env();
    if let Some(prices) = cli.prices {
        cfg.prices_csv = prices;
    }
    if let Some(profile) = cli.profile {
        cfg.profile = profile;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    let table = PriceTable::from_csv_path(&cfg.prices_csv)
        .with_context(|| format!("loading prices from {}", cfg.prices_csv.display()))?;
    let start = table.earliest_date().context("price table is empty")?;
    let end = table.latest_date().context("price table is empty")?;
    if start >= end {
        anyhow::bail!("need at least two dates to backtest");
    }

    let mut env_config = EnvConfig::new(cfg.initial_capital, start, end);
    env_config.transaction_cost = cfg.transaction_cost;

    println!("{}", "=".repeat(70));
    println!("  ALLOCATION BACKTESTER");
    println!("{}", "=".repeat(70));
    println!("  Prices:      {}", cfg.prices_csv.display());
    println!("  Period:      {} to {}", start, end);
    println!("  Capital:     R$ {:.2}", cfg.initial_capital);
    println!("  Instruments: {}", table.instruments().join(", "));
    println!();

    let env = BacktestEnvironment::new(env_config, table.clone());

    match cli.train {
        Some(episodes) => {
            let episodes = episodes.unwrap_or(cfg.rl_episodes);
            train(env, &cfg, episodes, &cli.q_table).await
        }
        None => replay_profile(env, &table, &cfg, &cli.report_dir),
    }
}

async fn train(mut env: BacktestEnvironment, cfg: &Config, episodes: usize, q_table: &Path) -> Result<()> {
    let token = CancellationToken::new();
    let ctrl_c = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Stopping after the current episode");
            ctrl_c.cancel();
        }
    });

    let mut agent = RLAgent::new(AgentConfig {
        seed: cfg.rl_seed,
        ..AgentConfig::default()
    });
    if q_table.exists() {
        match agent.load(q_table) {
            Ok(()) => info!("Resuming from {}", q_table.display()),
            Err(e) => warn!("Ignoring saved Q-table: {:#}", e),
        }
    }

    let options = TrainOptions {
        episodes,
        max_steps: cfg.rl_max_steps,
        batch_size: cfg.rl_batch_size,
        ..TrainOptions::default()
    };
    let (agent, env) = tokio::task::spawn_blocking(move || {
        agent.train(&mut env, options, Some(&token));
        (agent, env)
    })
    .await?;

    if let Some(stats) = agent.stats() {
        println!("\n  ─── Training ───");
        println!("  Episodes:    {}", stats.total_episodes);
        println!("  Mean reward: {:.4} (std {:.4})", stats.mean_reward, stats.std_reward);
        println!("  Best/worst:  {:.4} / {:.4}", stats.max_reward, stats.min_reward);
        println!("  Epsilon:     {:.4}", stats.epsilon);
    }
    if let Some(report) = BacktestReport::from_environment(&env) {
        println!("\n  Last episode:");
        report.print_summary();
    }

    agent.save(q_table)?;
    println!("\nQ-table saved to: {}", q_table.display());
    Ok(())
}

/// Steps the environment once per day with the orchestrator's sector
/// weights, mapped onto the table's sector columns.
fn replay_profile(
    mut env: BacktestEnvironment,
    table: &PriceTable,
    cfg: &Config,
    report_dir: &Path,
) -> Result<()> {
    let mut orchestrator = Orchestrator::from_config(cfg)?;
    let benchmark = table
        .series(&cfg.benchmark)
        .with_context(|| format!("benchmark {} not in price table", cfg.benchmark))?;
    let sector_columns: Vec<Sector> = Sector::ALL
        .into_iter()
        .filter(|s| table.contains(s.as_str()))
        .collect();
    if sector_columns.is_empty() {
        warn!("No sector columns in the price table, holding the benchmark only");
    }

    env.reset();
    loop {
        let date = env.current_date();
        let mut snapshot = MarketSnapshot::new(benchmark.until(date).tail(DEFAULT_LOOKBACK));
        for sector in &sector_columns {
            if let Some(series) = table.series(sector.as_str()) {
                snapshot.sectors.insert(*sector, series.until(date).tail(DEFAULT_LOOKBACK));
            }
        }
        let decision = orchestrator.decide(date, cfg.aporte, &snapshot);

        let allocation: Allocation = if sector_columns.is_empty() {
            Allocation::from([(cfg.benchmark.clone(), 1.0)])
        } else {
            sector_allocation(&decision)
                .into_iter()
                .filter(|(name, _)| table.contains(name))
                .collect()
        };
        if env.step(&allocation).done {
            break;
        }
    }

    let report = BacktestReport::from_environment(&env).context("backtest produced no steps")?;
    report.print_summary();

    let path = report_dir.join(format!(
        "backtest_{}_{}.txt",
        report.start.format("%Y%m%d"),
        report.end.format("%Y%m%d")
    ));
    report.write_to(&path)?;
    println!("\nReport saved to: {}", path.display());

    let log = report_dir.join("backtest_decisions.csv");
    orchestrator.export_csv(&log)?;
    println!("Decisions exported to: {}", log.display());
    Ok(())
}
