use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::models::{Sector, SectorWeights};

const SUM_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvestorProfile {
    Conservative,
    #[serde(alias = "moderate")]
    Intermediate,
    Aggressive,
}

impl InvestorProfile {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "conservative" => Some(Self::Conservative),
            "intermediate" | "moderate" => Some(Self::Intermediate),
            "aggressive" => Some(Self::Aggressive),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conservative => "conservative",
            Self::Intermediate => "intermediate",
            Self::Aggressive => "aggressive",
        }
    }
}

impl fmt::Display for InvestorProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RewardMetric {
    Sharpe,
    Sortino,
    Calmar,
}

/// Target weight with its allowed range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub target: f64,
    pub min: f64,
    pub max: f64,
}

const fn band(target: f64, min: f64, max: f64) -> Band {
    Band { target, min, max }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MegaBands {
    pub fixed_income: Band,
    pub real_estate_funds: Band,
    pub domestic_equities: Band,
    pub foreign_equities: Band,
}

impl MegaBands {
    fn named(&self) -> [(&'static str, Band); 4] {
        [
            ("fixed_income", self.fixed_income),
            ("real_estate_funds", self.real_estate_funds),
            ("domestic_equities", self.domestic_equities),
            ("foreign_equities", self.foreign_equities),
        ]
    }

    /// Share of equities held domestically, from the targets.
    pub fn domestic_equity_share(&self) -> f64 {
        let total = self.domestic_equities.target + self.foreign_equities.target;
        if total > 0.0 {
            self.domestic_equities.target / total
        } else {
            1.0
        }
    }
}

/// Risk limits consumed by the risk manager's per-asset constraints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Annualized volatility ceiling.
    pub max_volatility: Option<f64>,
    /// VaR floor (negative return).
    pub max_var: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskProfile {
    pub name: String,
    pub investor: InvestorProfile,
    pub risk_level: u8,
    pub mega: MegaBands,
    pub sectors: BTreeMap<Sector, Band>,
    pub max_drawdown_tolerance: f64,
    pub max_single_position: f64,
    pub rebalance_threshold: f64,
    pub reward_metric: RewardMetric,
    pub risk_penalty_factor: f64,
    pub limits: RiskLimits,
}

impl RiskProfile {
    pub fn conservative() -> Self {
        Self {
            name: "Conservative".to_string(),
            investor: InvestorProfile::Conservative,
            risk_level: 1,
            mega: MegaBands {
                fixed_income: band(0.50, 0.40, 0.60),
                real_estate_funds: band(0.20, 0.10, 0.30),
                domestic_equities: band(0.20, 0.10, 0.30),
                foreign_equities: band(0.10, 0.05, 0.20),
            },
            sectors: sector_bands([
                band(0.30, 0.20, 0.40),
                band(0.35, 0.25, 0.45),
                band(0.15, 0.05, 0.25),
                band(0.10, 0.02, 0.15),
                band(0.10, 0.05, 0.20),
            ]),
            max_drawdown_tolerance: 0.15,
            max_single_position: 0.10,
            rebalance_threshold: 0.05,
            reward_metric: RewardMetric::Sortino,
            risk_penalty_factor: 0.8,
            limits: RiskLimits {
                max_volatility: Some(0.10),
                max_var: Some(-0.05),
            },
        }
    }

    pub fn intermediate() -> Self {
        Self {
            name: "Intermediate".to_string(),
            investor: InvestorProfile::Intermediate,
            risk_level: 2,
            mega: MegaBands {
                fixed_income: band(0.35, 0.25, 0.45),
                real_estate_funds: band(0.20, 0.15, 0.30),
                domestic_equities: band(0.30, 0.20, 0.40),
                foreign_equities: band(0.15, 0.08, 0.25),
            },
            sectors: sector_bands([
                band(0.25, 0.15, 0.35),
                band(0.25, 0.15, 0.35),
                band(0.25, 0.15, 0.35),
                band(0.15, 0.05, 0.25),
                band(0.10, 0.05, 0.20),
            ]),
            max_drawdown_tolerance: 0.25,
            max_single_position: 0.12,
            rebalance_threshold: 0.07,
            reward_metric: RewardMetric::Sharpe,
            risk_penalty_factor: 0.5,
            limits: RiskLimits {
                max_volatility: Some(0.18),
                max_var: Some(-0.15),
            },
        }
    }

    pub fn aggressive() -> Self {
        Self {
            name: "Aggressive".to_string(),
            investor: InvestorProfile::Aggressive,
            risk_level: 3,
            mega: MegaBands {
                fixed_income: band(0.15, 0.08, 0.25),
                real_estate_funds: band(0.15, 0.08, 0.25),
                domestic_equities: band(0.40, 0.30, 0.50),
                foreign_equities: band(0.30, 0.20, 0.45),
            },
            sectors: sector_bands([
                band(0.15, 0.05, 0.25),
                band(0.15, 0.05, 0.25),
                band(0.35, 0.25, 0.50),
                band(0.25, 0.15, 0.40),
                band(0.10, 0.03, 0.15),
            ]),
            max_drawdown_tolerance: 0.40,
            max_single_position: 0.15,
            rebalance_threshold: 0.10,
            reward_metric: RewardMetric::Calmar,
            risk_penalty_factor: 0.2,
            limits: RiskLimits {
                max_volatility: Some(0.30),
                max_var: Some(-0.30),
            },
        }
    }

    pub fn builtin(investor: InvestorProfile) -> Self {
        match investor {
            InvestorProfile::Conservative => Self::conservative(),
            InvestorProfile::Intermediate => Self::intermediate(),
            InvestorProfile::Aggressive => Self::aggressive(),
        }
    }

    /// Mega targets and sector targets must each sum to 1.0 +/- 1%, and every
    /// target must sit inside its own band.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mega_total: f64 = self.mega.named().iter().map(|(_, b)| b.target).sum();
        if (mega_total - 1.0).abs() > SUM_TOLERANCE {
            return Err(ConfigError::MegaLayerSum {
                profile: self.name.clone(),
                total: mega_total,
            });
        }

        let sector_total: f64 = self.sectors.values().map(|b| b.target).sum();
        if (sector_total - 1.0).abs() > SUM_TOLERANCE {
            return Err(ConfigError::SectorSum {
                profile: self.name.clone(),
                total: sector_total,
            });
        }

        let mega = self.mega.named();
        let sectors = self.sectors.iter().map(|(s, b)| (s.as_str(), *b));
        for (field, b) in mega.into_iter().chain(sectors) {
            if b.target < b.min || b.target > b.max {
                return Err(ConfigError::BandViolation {
                    profile: self.name.clone(),
                    field: field.to_string(),
                    target: b.target,
                    min: b.min,
                    max: b.max,
                });
            }
        }
        Ok(())
    }

    /// Sector targets as a normalized weight vector. Missing sectors weigh 0.
    pub fn base_sector_weights(&self) -> SectorWeights {
        let mut w = [0.0; 5];
        for (sector, b) in &self.sectors {
            w[sector.index()] = b.target;
        }
        SectorWeights::new(w)
    }
}

fn sector_bands(bands: [Band; 5]) -> BTreeMap<Sector, Band> {
    Sector::ALL.iter().copied().zip(bands).collect()
}

/// Validated, read-only profile store.
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, RiskProfile>,
}

impl ProfileRegistry {
    pub fn builtin() -> Result<Self, ConfigError> {
        let mut registry = Self {
            profiles: BTreeMap::new(),
        };
        for p in [
            RiskProfile::conservative(),
            RiskProfile::intermediate(),
            RiskProfile::aggressive(),
        ] {
            registry.insert(p)?;
        }
        Ok(registry)
    }

    /// Built-ins plus every profile in a JSON array file. Any invalid entry
    /// aborts the whole load.
    pub fn with_file(path: &Path) -> Result<Self, ConfigError> {
        let mut registry = Self::builtin()?;
        let path_str = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path_str.clone(),
            source,
        })?;
        let extra: Vec<RiskProfile> =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path_str.clone(),
                source,
            })?;
        for p in extra {
            info!("Loaded profile {} from {}", p.name, path_str);
            registry.insert(p)?;
        }
        Ok(registry)
    }

    /// Validates and stores a profile. A profile whose name is already
    /// registered replaces the existing one.
    pub fn insert(&mut self, profile: RiskProfile) -> Result<(), ConfigError> {
        profile.validate()?;
        if let Some(previous) = self.profiles.insert(profile.name.to_lowercase(), profile) {
            warn!("Profile {} replaced by a later definition", previous.name);
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&RiskProfile, ConfigError> {
        let key = name.trim().to_lowercase();
        let key = if key == "moderate" {
            "intermediate".to_string()
        } else {
            key
        };
        self.profiles
            .get(&key)
            .ok_or_else(|| ConfigError::UnknownProfile {
                name: name.to_string(),
                available: self.names().join(", "),
            })
    }

    pub fn names(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }
}

/// Look up a built-in profile by name (case-insensitive).
pub fn get_profile(name: &str) -> Result<RiskProfile, ConfigError> {
    ProfileRegistry::builtin()?.get(name).cloned()
}
