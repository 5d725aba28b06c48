use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Investor
    pub profile: String,
    pub profiles_file: Option<PathBuf>,
    pub aporte: f64,

    // Autonomous loop
    pub agent_interval_secs: u64,

    // Backtest
    pub initial_capital: f64,
    pub transaction_cost: f64, // fraction of traded notional, 0.001 = 0.1%

    // Risk
    pub risk_free_rate: f64, // annual
    pub confidence_level: f64,

    // Market data
    pub benchmark: String,
    pub prices_csv: PathBuf,
    pub bcb_base_url: String,
    pub bcb_window_days: i64,

    // RL training
    pub rl_episodes: usize,
    pub rl_max_steps: usize,
    pub rl_batch_size: usize,
    pub rl_seed: Option<u64>,

    // Logging
    pub log_dir: String,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let env = |key: &str, default: &str| -> String {
            std::env::var(key).unwrap_or_else(|_| default.to_string())
        };
        let optional = |key: &str| -> Option<String> {
            std::env::var(key).ok().filter(|v| !v.trim().is_empty())
        };

        Config {
            profile: env("PROFILE", "intermediate"),
            profiles_file: optional("PROFILES_FILE").map(PathBuf::from),
            aporte: env("APORTE", "5000").parse().unwrap_or(5000.0),
            agent_interval_secs: env("AGENT_INTERVAL_SECS", "86400")
                .parse()
                .unwrap_or(86_400),
            initial_capital: env("INITIAL_CAPITAL", "1000000")
                .parse()
                .unwrap_or(1_000_000.0),
            transaction_cost: env("TRANSACTION_COST", "0.001").parse().unwrap_or(0.001),
            risk_free_rate: env("RISK_FREE_RATE", "0.05").parse().unwrap_or(0.05),
            confidence_level: env("CONFIDENCE_LEVEL", "0.95").parse().unwrap_or(0.95),
            benchmark: env("BENCHMARK", "^BVSP"),
            prices_csv: PathBuf::from(env("PRICES_CSV", "data/prices.csv")),
            bcb_base_url: env("BCB_BASE_URL", crate::data::bcb::DEFAULT_BASE_URL),
            bcb_window_days: env("BCB_WINDOW_DAYS", "365").parse().unwrap_or(365),
            rl_episodes: env("RL_EPISODES", "100").parse().unwrap_or(100),
            rl_max_steps: env("RL_MAX_STEPS", "1000").parse().unwrap_or(1000),
            rl_batch_size: env("RL_BATCH_SIZE", "32").parse().unwrap_or(32),
            rl_seed: optional("RL_SEED").and_then(|s| s.parse().ok()),
            log_dir: env("LOG_DIR", "logs"),
            log_level: env("LOG_LEVEL", "info"),
        }
    }

    /// Where the autonomous loop persists its decisions.
    pub fn decisions_path(&self) -> PathBuf {
        PathBuf::from(&self.log_dir).join("allocation_decisions.json")
    }
}
