use serde::{Deserialize, Serialize};
use std::fmt;

use super::MacroSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Regime {
    Bull,
    Bear,
    Sideways,
    Transition,
}

impl Regime {
    pub const ALL: [Regime; 4] = [
        Regime::Bull,
        Regime::Bear,
        Regime::Sideways,
        Regime::Transition,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::Bull => "bull",
            Regime::Bear => "bear",
            Regime::Sideways => "sideways",
            Regime::Transition => "transition",
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MovingAverages {
    pub short: f64,
    pub medium: f64,
    pub long: f64,
}

/// Outcome of one detection call. Built fresh each time, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeResult {
    pub regime: Regime,
    /// In [0, 1].
    pub strength: f64,
    /// In [-1, 1].
    pub trend: f64,
    pub rsi: f64,
    pub volatility: f64,
    pub momentum: f64,
    #[serde(default)]
    pub moving_averages: MovingAverages,
    #[serde(default)]
    pub macro_data: Option<MacroSnapshot>,
}

impl RegimeResult {
    /// History shorter than the long moving-average window.
    pub fn insufficient() -> Self {
        Self::neutral(0.0)
    }

    /// Orchestrator default when fewer than 50 observations are available.
    pub fn fallback() -> Self {
        Self::neutral(0.5)
    }

    fn neutral(strength: f64) -> Self {
        Self {
            regime: Regime::Transition,
            strength,
            trend: 0.0,
            rsi: 0.0,
            volatility: 0.0,
            momentum: 0.0,
            moving_averages: MovingAverages::default(),
            macro_data: None,
        }
    }
}
