use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use std::collections::BTreeMap;

use super::{MacroData, MarketData, MarketHistory};
use crate::models::{MacroSnapshot, PriceSeries, PriceTable, Sector};

/// Replays a pre-loaded price table. A cursor (`now`) controls which
/// observations are visible: only dates on or before it are returned.
pub struct HistoricalMarket {
    table: PriceTable,
    benchmark: String,
    sector_symbols: BTreeMap<Sector, String>,
    now: NaiveDate,
    advance_per_fetch: Option<Duration>,
}

impl HistoricalMarket {
    /// Sector columns default to the sector names (`energy`, `real_estate`,
    /// ...) where the table has them. The cursor starts at the last date.
    pub fn new(table: PriceTable, benchmark: &str) -> Result<Self> {
        let now = table.latest_date().context("price table is empty")?;
        if !table.contains(benchmark) {
            anyhow::bail!("benchmark {} not found in price table", benchmark);
        }
        let sector_symbols = Sector::ALL
            .iter()
            .filter(|s| table.contains(s.as_str()))
            .map(|s| (*s, s.as_str().to_string()))
            .collect();

        Ok(Self {
            table,
            benchmark: benchmark.to_string(),
            sector_symbols,
            now,
            advance_per_fetch: None,
        })
    }

    pub fn with_sector_symbol(mut self, sector: Sector, symbol: &str) -> Self {
        self.sector_symbols.insert(sector, symbol.to_string());
        self
    }

    /// Move the cursor forward after every fetch, walking through history.
    pub fn advancing(mut self, days: i64) -> Self {
        self.advance_per_fetch = Some(Duration::days(days));
        self
    }

    pub fn set_date(&mut self, date: NaiveDate) {
        self.now = date;
    }

    pub fn current_date(&self) -> NaiveDate {
        self.now
    }

    pub fn earliest_date(&self) -> Option<NaiveDate> {
        self.table.earliest_date()
    }

    pub fn latest_date(&self) -> Option<NaiveDate> {
        self.table.latest_date()
    }

    pub fn table(&self) -> &PriceTable {
        &self.table
    }

    fn visible(&self, symbol: &str, lookback: usize) -> PriceSeries {
        self.table
            .series(symbol)
            .map(|s| s.until(self.now).tail(lookback))
            .unwrap_or_default()
    }
}

#[async_trait]
impl MarketData for HistoricalMarket {
    async fn fetch_history(&mut self, lookback: usize) -> Result<MarketHistory> {
        let benchmark = self.visible(&self.benchmark, lookback);
        if benchmark.is_empty() {
            anyhow::bail!("no {} prices on or before {}", self.benchmark, self.now);
        }
        let sectors = self
            .sector_symbols
            .iter()
            .map(|(sector, symbol)| (*sector, self.visible(symbol, lookback)))
            .filter(|(_, series)| !series.is_empty())
            .collect();

        if let Some(step) = self.advance_per_fetch {
            self.now += step;
        }
        Ok(MarketHistory { benchmark, sectors })
    }
}

/// Always returns the same snapshot.
#[derive(Debug, Clone, Default)]
pub struct StaticMacro {
    pub snapshot: MacroSnapshot,
}

impl StaticMacro {
    pub fn new(snapshot: MacroSnapshot) -> Self {
        Self { snapshot }
    }
}

#[async_trait]
impl MacroData for StaticMacro {
    async fn fetch_snapshot(&mut self) -> Result<MacroSnapshot> {
        Ok(self.snapshot.clone())
    }
}
