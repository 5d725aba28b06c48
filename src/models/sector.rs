use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sector {
    Energy,
    RealEstate,
    Technology,
    Ai,
    Agriculture,
}

impl Sector {
    pub const ALL: [Sector; 5] = [
        Sector::Energy,
        Sector::RealEstate,
        Sector::Technology,
        Sector::Ai,
        Sector::Agriculture,
    ];

    pub fn index(self) -> usize {
        match self {
            Sector::Energy => 0,
            Sector::RealEstate => 1,
            Sector::Technology => 2,
            Sector::Ai => 3,
            Sector::Agriculture => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Sector::Energy => "energy",
            Sector::RealEstate => "real_estate",
            Sector::Technology => "technology",
            Sector::Ai => "ai",
            Sector::Agriculture => "agriculture",
        }
    }
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Non-negative five-sector weights, renormalized to sum 1.0 after every
/// mutation. An all-zero vector renormalizes to equal weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SectorWeights {
    weights: [f64; 5],
}

impl SectorWeights {
    /// Order: energy, real estate, technology, AI, agriculture.
    pub fn new(weights: [f64; 5]) -> Self {
        let mut sw = Self { weights };
        sw.normalize();
        sw
    }

    pub fn equal() -> Self {
        Self {
            weights: [0.2; 5],
        }
    }

    pub fn get(&self, sector: Sector) -> f64 {
        self.weights[sector.index()]
    }

    /// Multiply one sector's weight by `factor`, then renormalize.
    pub fn scale(&mut self, sector: Sector, factor: f64) {
        self.weights[sector.index()] *= factor;
        self.normalize();
    }

    /// Apply one factor per sector in a single mutation.
    pub fn scale_all(&mut self, factors: [f64; 5]) {
        for (w, f) in self.weights.iter_mut().zip(factors) {
            *w *= f;
        }
        self.normalize();
    }

    pub fn set(&mut self, sector: Sector, weight: f64) {
        self.weights[sector.index()] = weight;
        self.normalize();
    }

    pub fn as_array(&self) -> [f64; 5] {
        self.weights
    }

    pub fn sum(&self) -> f64 {
        self.weights.iter().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Sector, f64)> + '_ {
        Sector::ALL.iter().map(move |&s| (s, self.get(s)))
    }

    pub fn to_map(&self) -> BTreeMap<Sector, f64> {
        self.iter().collect()
    }

    fn normalize(&mut self) {
        for w in self.weights.iter_mut() {
            if !w.is_finite() || *w < 0.0 {
                *w = 0.0;
            }
        }
        let total: f64 = self.weights.iter().sum();
        if total > 0.0 {
            for w in self.weights.iter_mut() {
                *w /= total;
            }
        } else {
            self.weights = [0.2; 5];
        }
    }
}

impl Default for SectorWeights {
    fn default() -> Self {
        Self::equal()
    }
}
