pub mod bcb;
pub mod historical;
pub mod sinks;

pub use bcb::BcbClient;
pub use historical::{HistoricalMarket, StaticMacro};
pub use sinks::{CsvFileSink, DecisionSink, JsonFileSink};

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::models::{MacroSnapshot, PriceSeries, Sector};

/// Benchmark and per-sector price history as of the provider's clock.
#[derive(Debug, Clone, Default)]
pub struct MarketHistory {
    pub benchmark: PriceSeries,
    pub sectors: BTreeMap<Sector, PriceSeries>,
}

#[async_trait]
pub trait MarketData: Send + Sync {
    /// At most `lookback` observations per series, oldest first.
    async fn fetch_history(&mut self, lookback: usize) -> Result<MarketHistory>;
}

#[async_trait]
pub trait MacroData: Send + Sync {
    async fn fetch_snapshot(&mut self) -> Result<MacroSnapshot>;
}
