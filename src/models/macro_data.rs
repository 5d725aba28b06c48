use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const POLICY_RATE: &str = "policy_rate";
pub const INFLATION: &str = "inflation";
pub const FOREIGN_POLICY_RATE: &str = "foreign_policy_rate";
pub const FOREIGN_INFLATION: &str = "foreign_inflation";
pub const RATE_SPREAD: &str = "rate_spread";

/// Named macro indicators as of a date. Owned by the caller.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MacroSnapshot {
    pub as_of: Option<NaiveDate>,
    pub values: BTreeMap<String, f64>,
}

impl MacroSnapshot {
    pub fn new(as_of: NaiveDate) -> Self {
        Self {
            as_of: Some(as_of),
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.values.insert(name.to_string(), value);
        self
    }

    pub fn set(&mut self, name: &str, value: f64) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn policy_rate(&self) -> Option<f64> {
        self.get(POLICY_RATE)
    }

    pub fn inflation(&self) -> Option<f64> {
        self.get(INFLATION)
    }

    /// Domestic minus foreign policy rate, when both are known and no
    /// explicit spread was supplied.
    pub fn rate_spread(&self) -> Option<f64> {
        self.get(RATE_SPREAD).or_else(|| {
            Some(self.get(POLICY_RATE)? - self.get(FOREIGN_POLICY_RATE)?)
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, &v)| (k.as_str(), v))
    }
}
