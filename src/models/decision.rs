use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{RegimeResult, Sector};

/// Asset-class split. Used both for percentages and for currency amounts.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AssetClassSplit {
    pub fixed_income: f64,
    pub real_estate_funds: f64,
    pub domestic_equities: f64,
    pub foreign_equities: f64,
}

impl AssetClassSplit {
    pub fn total(&self) -> f64 {
        self.fixed_income + self.real_estate_funds + self.domestic_equities + self.foreign_equities
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            fixed_income: self.fixed_income * factor,
            real_estate_funds: self.real_estate_funds * factor,
            domestic_equities: self.domestic_equities * factor,
            foreign_equities: self.foreign_equities * factor,
        }
    }
}

/// One orchestration result. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationDecision {
    pub id: u64,
    pub date: NaiveDate,
    pub profile: String,
    pub amount: f64,
    pub regime: RegimeResult,
    pub mega_weights: AssetClassSplit,
    pub asset_class_amounts: AssetClassSplit,
    pub sector_weights: BTreeMap<Sector, f64>,
    pub sector_amounts: BTreeMap<Sector, f64>,
    pub justification: String,
    pub created_at: DateTime<Utc>,
}

/// Flat row for tabular export.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionRow {
    pub id: u64,
    pub date: String,
    pub profile: String,
    pub amount: f64,
    pub regime: String,
    pub strength: f64,
    pub fixed_income: f64,
    pub real_estate_funds: f64,
    pub domestic_equities: f64,
    pub foreign_equities: f64,
    pub energy: f64,
    pub real_estate: f64,
    pub technology: f64,
    pub ai: f64,
    pub agriculture: f64,
    pub justification: String,
    pub created_at: String,
}

impl From<&AllocationDecision> for DecisionRow {
    fn from(d: &AllocationDecision) -> Self {
        let sector = |s: Sector| d.sector_amounts.get(&s).copied().unwrap_or(0.0);
        Self {
            id: d.id,
            date: d.date.format("%Y-%m-%d").to_string(),
            profile: d.profile.clone(),
            amount: d.amount,
            regime: d.regime.regime.to_string(),
            strength: d.regime.strength,
            fixed_income: d.asset_class_amounts.fixed_income,
            real_estate_funds: d.asset_class_amounts.real_estate_funds,
            domestic_equities: d.asset_class_amounts.domestic_equities,
            foreign_equities: d.asset_class_amounts.foreign_equities,
            energy: sector(Sector::Energy),
            real_estate: sector(Sector::RealEstate),
            technology: sector(Sector::Technology),
            ai: sector(Sector::Ai),
            agriculture: sector(Sector::Agriculture),
            justification: d.justification.clone(),
            created_at: d.created_at.to_rfc3339(),
        }
    }
}
