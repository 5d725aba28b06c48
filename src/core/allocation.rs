use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info_span, Span};

use crate::models::{PriceSeries, Regime, Sector, SectorWeights};
use crate::profiles::{InvestorProfile, RiskProfile};

const MOMENTUM_LOOKBACK: usize = 10;
const MOMENTUM_THRESHOLD: f64 = 0.02;
const MOMENTUM_BOOST: f64 = 1.1;
const MOMENTUM_CUT: f64 = 0.9;

/// Multiplier `base + per_strength * strength` applied to one sector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tilt {
    pub base: f64,
    pub per_strength: f64,
}

impl Tilt {
    pub const NEUTRAL: Tilt = Tilt::fixed(1.0);

    pub const fn scaled(per_strength: f64) -> Self {
        Self {
            base: 1.0,
            per_strength,
        }
    }

    pub const fn fixed(base: f64) -> Self {
        Self {
            base,
            per_strength: 0.0,
        }
    }

    pub fn factor(&self, strength: f64) -> f64 {
        self.base + self.per_strength * strength
    }
}

/// Regime-driven sector multipliers, one `Tilt` per sector in
/// `Sector::ALL` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeTilts {
    pub table: BTreeMap<Regime, [Tilt; 5]>,
}

impl RegimeTilts {
    pub fn factors(&self, regime: Regime, strength: f64) -> [f64; 5] {
        let tilts = self.table.get(&regime).copied().unwrap_or([Tilt::NEUTRAL; 5]);
        tilts.map(|t| t.factor(strength))
    }
}

impl Default for RegimeTilts {
    fn default() -> Self {
        let n = Tilt::NEUTRAL;
        let mut table = BTreeMap::new();
        // energy, real estate, technology, ai, agriculture
        table.insert(
            Regime::Bull,
            [Tilt::scaled(-0.1), Tilt::scaled(-0.1), Tilt::scaled(0.3), Tilt::scaled(0.4), n],
        );
        table.insert(
            Regime::Bear,
            [
                Tilt::scaled(0.2),
                Tilt::scaled(0.2),
                Tilt::scaled(-0.2),
                Tilt::scaled(-0.3),
                Tilt::scaled(0.1),
            ],
        );
        table.insert(Regime::Sideways, [n; 5]);
        table.insert(
            Regime::Transition,
            [Tilt::fixed(1.1), Tilt::fixed(1.1), Tilt::fixed(0.9), Tilt::fixed(0.85), n],
        );
        Self { table }
    }
}

/// Top-level split before equities are divided domestic/foreign.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MegaWeights {
    pub fixed_income: f64,
    pub real_estate_funds: f64,
    pub equities: f64,
}

/// Regime presets for the mega layer. Strength does not interpolate between
/// presets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MegaLayerTable {
    pub table: BTreeMap<Regime, MegaWeights>,
}

impl MegaLayerTable {
    pub fn get(&self, regime: Regime) -> MegaWeights {
        self.table.get(&regime).copied().unwrap_or(MegaWeights {
            fixed_income: 0.40,
            real_estate_funds: 0.25,
            equities: 0.35,
        })
    }
}

impl Default for MegaLayerTable {
    fn default() -> Self {
        let preset = |fixed_income, real_estate_funds, equities| MegaWeights {
            fixed_income,
            real_estate_funds,
            equities,
        };
        let mut table = BTreeMap::new();
        table.insert(Regime::Bull, preset(0.15, 0.20, 0.65));
        table.insert(Regime::Bear, preset(0.50, 0.25, 0.25));
        table.insert(Regime::Sideways, preset(0.30, 0.30, 0.40));
        table.insert(Regime::Transition, preset(0.40, 0.25, 0.35));
        Self { table }
    }
}

/// Source of instrument-level sub-weights for a sector.
pub trait InstrumentMap: Send + Sync {
    /// Instruments with their within-sector weights.
    fn instruments(&self, sector: Sector) -> Vec<(String, f64)>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticInstrumentMap {
    pub table: BTreeMap<Sector, Vec<(String, f64)>>,
}

impl InstrumentMap for StaticInstrumentMap {
    fn instruments(&self, sector: Sector) -> Vec<(String, f64)> {
        self.table.get(&sector).cloned().unwrap_or_default()
    }
}

impl Default for StaticInstrumentMap {
    fn default() -> Self {
        let list = |items: &[(&str, f64)]| -> Vec<(String, f64)> {
            items.iter().map(|(s, w)| (s.to_string(), *w)).collect()
        };
        let mut table = BTreeMap::new();
        table.insert(
            Sector::Energy,
            list(&[("PETR3", 0.5), ("GGBR4", 0.3), ("ENGI11", 0.2)]),
        );
        table.insert(
            Sector::RealEstate,
            list(&[("KNRI11", 0.25), ("RBRR11", 0.25), ("MXRF11", 0.25), ("VGHF11", 0.25)]),
        );
        table.insert(
            Sector::Technology,
            list(&[("WEGE3", 0.4), ("ALPA4", 0.3), ("FLRY3", 0.3)]),
        );
        table.insert(Sector::Ai, list(&[("TTMKX", 0.5), ("IRBR3", 0.5)]));
        table.insert(
            Sector::Agriculture,
            list(&[("AGRO3", 0.4), ("RAIL3", 0.3), ("CCIM3", 0.3)]),
        );
        Self { table }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentWeight {
    pub symbol: String,
    pub sector_weight: f64,
    pub portfolio_weight: f64,
}

pub type MicroAllocation = BTreeMap<Sector, Vec<InstrumentWeight>>;

/// Turns a regime and an investor profile into layered target weights.
pub struct SectorAllocator {
    pub profile: InvestorProfile,
    base: SectorWeights,
    tilts: RegimeTilts,
    mega: MegaLayerTable,
    instruments: Box<dyn InstrumentMap>,
    span: Span,
}

impl SectorAllocator {
    pub fn new(profile: InvestorProfile) -> Self {
        Self::with_base(profile, base_weights(profile))
    }

    /// Base weights taken from the profile's sector targets.
    pub fn from_risk_profile(profile: &RiskProfile) -> Self {
        Self::with_base(profile.investor, profile.base_sector_weights())
    }

    fn with_base(profile: InvestorProfile, base: SectorWeights) -> Self {
        Self {
            profile,
            base,
            tilts: RegimeTilts::default(),
            mega: MegaLayerTable::default(),
            instruments: Box::new(StaticInstrumentMap::default()),
            span: info_span!("sector_allocator", profile = %profile),
        }
    }

    pub fn with_tilts(mut self, tilts: RegimeTilts) -> Self {
        self.tilts = tilts;
        self
    }

    pub fn with_mega_table(mut self, mega: MegaLayerTable) -> Self {
        self.mega = mega;
        self
    }

    pub fn with_instrument_map(mut self, map: Box<dyn InstrumentMap>) -> Self {
        self.instruments = map;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn base_weights(&self) -> SectorWeights {
        self.base
    }

    /// Base weights tilted by the regime table, renormalized.
    pub fn allocate_by_regime(&self, regime: Regime, strength: f64) -> SectorWeights {
        let _guard = self.span.enter();
        let mut weights = self.base;
        weights.scale_all(self.tilts.factors(regime, strength));
        debug!(%regime, strength, ?weights, "Sector weights by regime");
        weights
    }

    pub fn allocate_mega_layer(&self, regime: Regime, _strength: f64) -> MegaWeights {
        self.mega.get(regime)
    }

    pub fn allocate_meso_layer(&self, regime: Regime, strength: f64) -> SectorWeights {
        self.allocate_by_regime(regime, strength)
    }

    /// Instrument sub-weights for every sector with positive weight.
    pub fn allocate_micro_layer(&self, meso: &SectorWeights) -> MicroAllocation {
        let mut out = MicroAllocation::new();
        for (sector, weight) in meso.iter() {
            if weight <= 0.0 {
                continue;
            }
            let entries = self
                .instruments
                .instruments(sector)
                .into_iter()
                .map(|(symbol, w)| InstrumentWeight {
                    symbol,
                    sector_weight: w,
                    portfolio_weight: w * weight,
                })
                .collect::<Vec<_>>();
            if !entries.is_empty() {
                out.insert(sector, entries);
            }
        }
        out
    }

    /// Ten-period change per sector. Sectors without enough history (more
    /// than ten observations) or a zero base read 0.
    pub fn get_sector_momentum(&self, prices: &BTreeMap<Sector, PriceSeries>) -> BTreeMap<Sector, f64> {
        Sector::ALL
            .iter()
            .map(|&sector| {
                let mom = prices
                    .get(&sector)
                    .map(|series| sector_momentum(&series.closes()))
                    .unwrap_or(0.0);
                (sector, mom)
            })
            .collect()
    }

    /// Nudge each sector +/-10% where momentum passes +/-2%, renormalized.
    pub fn apply_momentum_adjustment(
        &self,
        weights: &SectorWeights,
        momentum: &BTreeMap<Sector, f64>,
    ) -> SectorWeights {
        let _guard = self.span.enter();
        let mut factors = [1.0; 5];
        for (sector, &mom) in momentum {
            if mom > MOMENTUM_THRESHOLD {
                factors[sector.index()] = MOMENTUM_BOOST;
            } else if mom < -MOMENTUM_THRESHOLD {
                factors[sector.index()] = MOMENTUM_CUT;
            }
        }
        let mut adjusted = *weights;
        adjusted.scale_all(factors);
        debug!(?momentum, "Applied momentum adjustment");
        adjusted
    }
}

fn sector_momentum(closes: &[f64]) -> f64 {
    let n = closes.len();
    if n <= MOMENTUM_LOOKBACK {
        return 0.0;
    }
    let base = closes[n - MOMENTUM_LOOKBACK];
    if base.abs() < 1e-12 {
        return 0.0;
    }
    (closes[n - 1] - base) / base
}

/// Per-profile starting sector weights.
pub fn base_weights(profile: InvestorProfile) -> SectorWeights {
    match profile {
        InvestorProfile::Conservative => SectorWeights::new([0.30, 0.35, 0.15, 0.10, 0.10]),
        InvestorProfile::Intermediate => SectorWeights::new([0.25, 0.25, 0.25, 0.15, 0.10]),
        InvestorProfile::Aggressive => SectorWeights::new([0.15, 0.15, 0.35, 0.25, 0.10]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{day, rising_closes};

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn base_weights_match_profile_targets() {
        for profile in [
            InvestorProfile::Conservative,
            InvestorProfile::Intermediate,
            InvestorProfile::Aggressive,
        ] {
            let from_profile = SectorAllocator::from_risk_profile(&RiskProfile::builtin(profile));
            let direct = SectorAllocator::new(profile);
            for s in Sector::ALL {
                assert!(approx(
                    from_profile.base_weights().get(s),
                    direct.base_weights().get(s)
                ));
            }
        }
    }

    #[test]
    fn bull_tilts_toward_growth() {
        let alloc = SectorAllocator::new(InvestorProfile::Intermediate);
        let w = alloc.allocate_by_regime(Regime::Bull, 0.8);
        assert!(approx(w.sum(), 1.0));

        let raw = [0.25 * 0.92, 0.25 * 0.92, 0.25 * 1.24, 0.15 * 1.32, 0.10];
        let total: f64 = raw.iter().sum();
        for (s, r) in Sector::ALL.iter().zip(raw) {
            assert!(approx(w.get(*s), r / total));
        }
        assert!(w.get(Sector::Technology) > 0.25);
    }

    #[test]
    fn bear_tilts_toward_defensives() {
        let alloc = SectorAllocator::new(InvestorProfile::Aggressive);
        let w = alloc.allocate_by_regime(Regime::Bear, 1.0);
        assert!(w.get(Sector::Energy) > 0.15);
        assert!(w.get(Sector::Ai) < 0.25);
    }

    #[test]
    fn sideways_keeps_base() {
        let alloc = SectorAllocator::new(InvestorProfile::Conservative);
        let w = alloc.allocate_by_regime(Regime::Sideways, 0.9);
        for s in Sector::ALL {
            assert!(approx(w.get(s), alloc.base_weights().get(s)));
        }
    }

    #[test]
    fn transition_ignores_strength() {
        let alloc = SectorAllocator::new(InvestorProfile::Intermediate);
        let a = alloc.allocate_by_regime(Regime::Transition, 0.1);
        let b = alloc.allocate_by_regime(Regime::Transition, 0.9);
        assert_eq!(a, b);
        assert!(a.get(Sector::Energy) > 0.25);
    }

    #[test]
    fn mega_presets_ignore_strength() {
        let alloc = SectorAllocator::new(InvestorProfile::Intermediate);
        let weak = alloc.allocate_mega_layer(Regime::Bull, 0.1);
        let strong = alloc.allocate_mega_layer(Regime::Bull, 1.0);
        assert_eq!(weak, strong);
        assert_eq!(weak.equities, 0.65);
        for r in Regime::ALL {
            let m = alloc.allocate_mega_layer(r, 0.5);
            assert!(approx(m.fixed_income + m.real_estate_funds + m.equities, 1.0));
        }
    }

    #[test]
    fn custom_tilt_table_is_used() {
        let mut tilts = RegimeTilts::default();
        let mut sideways = [Tilt::NEUTRAL; 5];
        sideways[Sector::Energy.index()] = Tilt::fixed(0.0);
        tilts.table.insert(Regime::Sideways, sideways);
        let alloc = SectorAllocator::new(InvestorProfile::Intermediate).with_tilts(tilts);
        let w = alloc.allocate_by_regime(Regime::Sideways, 0.5);
        assert_eq!(w.get(Sector::Energy), 0.0);
        assert!(approx(w.sum(), 1.0));
    }

    #[test]
    fn micro_layer_scales_by_sector_weight() {
        let alloc = SectorAllocator::new(InvestorProfile::Intermediate);
        let meso = SectorWeights::new([1.0, 0.0, 0.0, 0.0, 0.0]);
        let micro = alloc.allocate_micro_layer(&meso);
        assert_eq!(micro.len(), 1);
        let energy = &micro[&Sector::Energy];
        assert_eq!(energy[0].symbol, "PETR3");
        assert!(approx(energy.iter().map(|i| i.portfolio_weight).sum(), 1.0));
    }

    #[test]
    fn momentum_needs_more_than_ten_points() {
        let alloc = SectorAllocator::new(InvestorProfile::Intermediate);
        let mut prices = BTreeMap::new();
        prices.insert(Sector::Technology, PriceSeries::from_closes(day(0), &rising_closes(30)));
        prices.insert(Sector::Energy, PriceSeries::from_closes(day(0), &rising_closes(10)));
        let mom = alloc.get_sector_momentum(&prices);
        assert_eq!(mom.len(), 5);
        assert!(approx(mom[&Sector::Technology], (129.0 - 120.0) / 120.0));
        assert_eq!(mom[&Sector::Energy], 0.0);
        assert_eq!(mom[&Sector::Ai], 0.0);
    }

    #[test]
    fn momentum_adjustment_nudges_and_renormalizes() {
        let alloc = SectorAllocator::new(InvestorProfile::Intermediate);
        let base = alloc.base_weights();
        let mut mom = BTreeMap::new();
        mom.insert(Sector::Technology, 0.05);
        mom.insert(Sector::Energy, -0.05);
        mom.insert(Sector::Ai, 0.015);
        let adj = alloc.apply_momentum_adjustment(&base, &mom);
        assert!(approx(adj.sum(), 1.0));
        let total = 0.25 * 0.9 + 0.25 + 0.25 * 1.1 + 0.15 + 0.10;
        assert!(approx(adj.get(Sector::Technology), 0.275 / total));
        assert!(approx(adj.get(Sector::Energy), 0.225 / total));
    }
}
