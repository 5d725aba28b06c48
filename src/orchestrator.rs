use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::backtesting::Allocation;
use crate::config::Config;
use crate::core::{RegimeConfig, RegimeDetector, RiskConfig, RiskManager, SectorAllocator};
use crate::data::{CsvFileSink, DecisionSink, JsonFileSink, MacroData, MarketData, MarketHistory};
use crate::error::ConfigError;
use crate::models::macro_data::RATE_SPREAD;
use crate::models::{
    AllocationDecision, AssetClassSplit, MacroSnapshot, PriceSeries, RegimeResult, Sector, SectorWeights,
};
use crate::profiles::{ProfileRegistry, RiskProfile};

/// Below this many benchmark observations the regime is not detected at all.
pub const MIN_OBSERVATIONS: usize = 50;
pub const DEFAULT_LOOKBACK: usize = 300;

/// Everything one decision is computed from.
#[derive(Debug, Clone, Default)]
pub struct MarketSnapshot {
    pub benchmark: PriceSeries,
    pub sectors: BTreeMap<Sector, PriceSeries>,
    pub macro_data: MacroSnapshot,
}

impl MarketSnapshot {
    pub fn new(benchmark: PriceSeries) -> Self {
        Self {
            benchmark,
            ..Self::default()
        }
    }

    pub fn from_history(history: MarketHistory, macro_data: MacroSnapshot) -> Self {
        Self {
            benchmark: history.benchmark,
            sectors: history.sectors,
            macro_data,
        }
    }

    pub fn with_sector(mut self, sector: Sector, prices: PriceSeries) -> Self {
        self.sectors.insert(sector, prices);
        self
    }

    pub fn with_macro(mut self, macro_data: MacroSnapshot) -> Self {
        self.macro_data = macro_data;
        self
    }
}

#[derive(Debug, Clone)]
pub struct AutonomousOptions {
    pub amount: f64,
    pub interval: Duration,
    pub log_path: PathBuf,
    /// `None` runs until cancelled.
    pub max_iterations: Option<usize>,
    pub lookback: usize,
}

impl AutonomousOptions {
    pub fn new(amount: f64, interval: Duration, log_path: impl Into<PathBuf>) -> Self {
        Self {
            amount,
            interval,
            log_path: log_path.into(),
            max_iterations: None,
            lookback: DEFAULT_LOOKBACK,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            cfg.aporte,
            Duration::from_secs(cfg.agent_interval_secs),
            cfg.decisions_path(),
        )
    }
}

/// Sequences regime detection, allocation and risk constraints into one
/// decision per call and keeps an append-only log of them.
pub struct Orchestrator {
    profile: RiskProfile,
    detector: RegimeDetector,
    allocator: SectorAllocator,
    risk: RiskManager,
    decisions: Vec<AllocationDecision>,
    next_id: u64,
    span: Span,
}

impl Orchestrator {
    pub fn new(profile: RiskProfile, risk_config: RiskConfig) -> Self {
        let span = info_span!("orchestrator", profile = %profile.name);
        Self::assemble(profile, risk_config, span)
    }

    /// Resolves the configured profile (built-ins plus `PROFILES_FILE`).
    pub fn from_config(cfg: &Config) -> Result<Self, ConfigError> {
        let registry = match &cfg.profiles_file {
            Some(path) => ProfileRegistry::with_file(path)?,
            None => ProfileRegistry::builtin()?,
        };
        let profile = registry.get(&cfg.profile)?.clone();
        let risk_config = RiskConfig {
            risk_free_rate: cfg.risk_free_rate,
            confidence_level: cfg.confidence_level,
            ..RiskConfig::default()
        };
        Ok(Self::new(profile, risk_config))
    }

    /// Re-parents every component's span under `span`. The decision log is kept.
    pub fn with_span(self, span: Span) -> Self {
        let mut rebuilt = Self::assemble(self.profile, self.risk.config, span);
        rebuilt.decisions = self.decisions;
        rebuilt.next_id = self.next_id;
        rebuilt
    }

    fn assemble(profile: RiskProfile, risk_config: RiskConfig, span: Span) -> Self {
        let detector =
            RegimeDetector::new(RegimeConfig::default()).with_span(info_span!(parent: &span, "regime_detector"));
        let allocator = SectorAllocator::from_risk_profile(&profile)
            .with_span(info_span!(parent: &span, "sector_allocator"));
        let risk = RiskManager::for_profile(risk_config, &profile).with_span(info_span!(parent: &span, "risk_manager"));
        Self {
            profile,
            detector,
            allocator,
            risk,
            decisions: Vec::new(),
            next_id: 1,
            span,
        }
    }

    pub fn profile(&self) -> &RiskProfile {
        &self.profile
    }

    pub fn decide(&mut self, date: NaiveDate, amount: f64, market: &MarketSnapshot) -> AllocationDecision {
        let span = self.span.clone();
        let _guard = span.enter();

        let macro_data = (!market.macro_data.is_empty()).then_some(&market.macro_data);
        let regime = if market.benchmark.len() < MIN_OBSERVATIONS {
            debug!(
                observations = market.benchmark.len(),
                "Too little history, using fallback regime"
            );
            RegimeResult {
                macro_data: macro_data.cloned(),
                ..RegimeResult::fallback()
            }
        } else {
            self.detector.detect(&market.benchmark, macro_data)
        };

        let mega = self.allocator.allocate_mega_layer(regime.regime, regime.strength);
        let domestic_share = self.profile.mega.domestic_equity_share();
        let mega_weights = AssetClassSplit {
            fixed_income: mega.fixed_income,
            real_estate_funds: mega.real_estate_funds,
            domestic_equities: mega.equities * domestic_share,
            foreign_equities: mega.equities * (1.0 - domestic_share),
        };
        let asset_class_amounts = mega_weights.scaled(amount);

        let tilted = self.allocator.allocate_by_regime(regime.regime, regime.strength);
        let sector_weights = self.constrain_sectors(&tilted, &market.sectors);
        let sector_amounts = sector_weights
            .iter()
            .map(|(s, w)| (s, w * asset_class_amounts.domestic_equities))
            .collect();

        let justification = self.justify(date, amount, &regime, &market.macro_data, &asset_class_amounts);

        let decision = AllocationDecision {
            id: self.next_id,
            date,
            profile: self.profile.name.clone(),
            amount,
            regime,
            mega_weights,
            asset_class_amounts,
            sector_weights: sector_weights.to_map(),
            sector_amounts,
            justification,
            created_at: Utc::now(),
        };
        self.next_id += 1;

        info!(
            id = decision.id,
            regime = %decision.regime.regime,
            strength = decision.regime.strength,
            amount,
            "Allocation decision recorded"
        );
        self.decisions.push(decision.clone());
        decision
    }

    /// VaR floor and volatility ceiling per sector. Sectors with fewer than
    /// two returns pass through unchanged.
    fn constrain_sectors(&self, weights: &SectorWeights, prices: &BTreeMap<Sector, PriceSeries>) -> SectorWeights {
        let mut vars = [0.0; 5];
        let mut vols = [0.0; 5];
        for sector in Sector::ALL {
            let returns = prices.get(&sector).map(|p| p.returns()).unwrap_or_default();
            if returns.len() >= 2 {
                let m = self.risk.calculate_metrics(&returns);
                vars[sector.index()] = m.var;
                vols[sector.index()] = m.volatility;
            }
        }
        let constrained = self.risk.apply_risk_constraints(&weights.as_array(), &vars, &vols);
        let mut out = [0.0; 5];
        for (slot, w) in out.iter_mut().zip(constrained) {
            *slot = w;
        }
        SectorWeights::new(out)
    }

    fn justify(
        &self,
        date: NaiveDate,
        amount: f64,
        regime: &RegimeResult,
        macro_data: &MacroSnapshot,
        amounts: &AssetClassSplit,
    ) -> String {
        let mut parts = vec![
            format!(
                "{}: allocating R$ {:.2} for the {} profile.",
                date, amount, self.profile.name
            ),
            format!(
                "Market regime {} with {:.0}% confidence.",
                regime.regime.as_str().to_uppercase(),
                regime.strength * 100.0
            ),
            format!(
                "RSI {:.1}, volatility {:.2}%, momentum {:+.2}%.",
                regime.rsi,
                regime.volatility,
                regime.momentum * 100.0
            ),
        ];

        if macro_data.is_empty() {
            parts.push("Macro data unavailable.".to_string());
        } else {
            let mut indicators: Vec<String> = macro_data
                .iter()
                .map(|(name, value)| format!("{} {:.2}", name, value))
                .collect();
            if macro_data.get(RATE_SPREAD).is_none() {
                if let Some(spread) = macro_data.rate_spread() {
                    indicators.push(format!("{} {:.2}", RATE_SPREAD, spread));
                }
            }
            parts.push(format!("Macro: {}.", indicators.join(", ")));
        }

        parts.push(format!(
            "Fixed income R$ {:.2}, real-estate funds R$ {:.2}, domestic equities R$ {:.2}, foreign equities R$ {:.2}.",
            amounts.fixed_income, amounts.real_estate_funds, amounts.domestic_equities, amounts.foreign_equities
        ));
        parts.push(format!(
            "Limits: drawdown {:.0}%, single position {:.0}%, rebalance at {:.0}% drift.",
            self.profile.max_drawdown_tolerance * 100.0,
            self.profile.max_single_position * 100.0,
            self.profile.rebalance_threshold * 100.0
        ));
        parts.join(" ")
    }

    pub fn decisions(&self) -> &[AllocationDecision] {
        &self.decisions
    }

    pub fn latest(&self) -> Option<&AllocationDecision> {
        self.decisions.last()
    }

    /// Decisions created within the last `days` days.
    pub fn recent(&self, days: i64) -> Vec<&AllocationDecision> {
        let cutoff = Utc::now() - ChronoDuration::days(days);
        self.decisions.iter().filter(|d| d.created_at >= cutoff).collect()
    }

    pub fn current_regime(&self) -> Option<&RegimeResult> {
        self.latest().map(|d| &d.regime)
    }

    pub fn export_csv(&self, path: &Path) -> Result<()> {
        CsvFileSink::new(path).persist(&self.decisions)
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        JsonFileSink::new(path).persist(&self.decisions)
    }

    async fn iterate(
        &mut self,
        market: &mut dyn MarketData,
        macro_source: &mut dyn MacroData,
        options: &AutonomousOptions,
    ) -> Result<AllocationDecision> {
        let history = market
            .fetch_history(options.lookback)
            .await
            .context("fetching market history")?;
        let date = history
            .benchmark
            .last()
            .map(|p| p.date)
            .context("benchmark history is empty")?;
        let macro_data = match macro_source.fetch_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Macro data unavailable: {:#}", e);
                MacroSnapshot::default()
            }
        };
        let snapshot = MarketSnapshot::from_history(history, macro_data);
        Ok(self.decide(date, options.amount, &snapshot))
    }

    /// Autonomous mode persisting to a JSON file at `options.log_path`.
    pub async fn run_autonomous(
        &mut self,
        market: &mut dyn MarketData,
        macro_source: &mut dyn MacroData,
        options: &AutonomousOptions,
        token: &CancellationToken,
    ) -> usize {
        let mut sink = JsonFileSink::new(&options.log_path);
        self.run_with_sink(market, macro_source, &mut sink, options, token)
            .await
    }

    /// Decides, persists and sleeps until cancelled or `max_iterations` is
    /// reached. Per-iteration failures are logged and the loop carries on.
    /// Returns the number of iterations run.
    pub async fn run_with_sink(
        &mut self,
        market: &mut dyn MarketData,
        macro_source: &mut dyn MacroData,
        sink: &mut dyn DecisionSink,
        options: &AutonomousOptions,
        token: &CancellationToken,
    ) -> usize {
        info!(
            amount = options.amount,
            interval_secs = options.interval.as_secs_f64(),
            "Autonomous mode started"
        );

        let mut iterations = 0;
        while !token.is_cancelled() {
            iterations += 1;
            let span = self.span.clone();
            match self.iterate(market, macro_source, options).instrument(span).await {
                Ok(decision) => info!(
                    iteration = iterations,
                    id = decision.id,
                    "Iteration complete: {}",
                    decision.regime.regime
                ),
                Err(e) => error!(iteration = iterations, "Iteration failed: {:#}", e),
            }
            if let Err(e) = sink.persist(&self.decisions) {
                error!("Failed to persist decisions: {:#}", e);
            }

            if options.max_iterations.is_some_and(|max| iterations >= max) {
                break;
            }
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(options.interval) => {}
            }
        }

        info!(iterations, decisions = self.decisions.len(), "Autonomous mode stopped");
        iterations
    }
}

/// Sector weights of a decision keyed by sector name, for stepping a
/// backtest whose instruments are the sector columns.
pub fn sector_allocation(decision: &AllocationDecision) -> Allocation {
    decision
        .sector_weights
        .iter()
        .map(|(s, w)| (s.as_str().to_string(), *w))
        .collect()
}
