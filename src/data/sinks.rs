use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::models::{AllocationDecision, DecisionRow};

/// Durable destination for the decision log. Receives the whole log each
/// time and replaces what it stored before.
pub trait DecisionSink: Send {
    fn persist(&mut self, decisions: &[AllocationDecision]) -> Result<()>;
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    Ok(())
}

/// Pretty JSON array of decisions, written atomically via a temp file.
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(path: &Path) -> Result<Vec<AllocationDecision>> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }
}

impl DecisionSink for JsonFileSink {
    fn persist(&mut self, decisions: &[AllocationDecision]) -> Result<()> {
        ensure_parent(&self.path)?;
        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(decisions)?;
        std::fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

/// One flat row per decision.
pub struct CsvFileSink {
    path: PathBuf,
}

impl CsvFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DecisionSink for CsvFileSink {
    fn persist(&mut self, decisions: &[AllocationDecision]) -> Result<()> {
        ensure_parent(&self.path)?;
        let mut writer = csv::Writer::from_path(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        for d in decisions {
            writer.serialize(DecisionRow::from(d))?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RiskConfig;
    use crate::orchestrator::{MarketSnapshot, Orchestrator};
    use crate::profiles::RiskProfile;
    use crate::test_helpers::{day, flat_closes, series};

    fn decisions(n: usize) -> Vec<AllocationDecision> {
        let mut orch = Orchestrator::new(RiskProfile::aggressive(), RiskConfig::default());
        let market = MarketSnapshot::new(series(&flat_closes(20)));
        (0..n).map(|i| orch.decide(day(i as i64), 1_000.0, &market)).collect()
    }

    #[test]
    fn json_sink_replaces_previous_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("log.json");
        let mut sink = JsonFileSink::new(&path);

        sink.persist(&decisions(3)).unwrap();
        sink.persist(&decisions(1)).unwrap();
        let loaded = JsonFileSink::load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].profile, "Aggressive");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn csv_sink_writes_one_row_per_decision() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        CsvFileSink::new(&path).persist(&decisions(2)).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert!(headers.iter().any(|h| h == "technology"));
        assert_eq!(reader.records().count(), 2);
    }
}
