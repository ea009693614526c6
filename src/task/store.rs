use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Output;
use crate::dispatch::BatchReport;

/// A finished batch as written to the run directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRecord {
    pub blueprint: String,
    pub summary: Option<Output>,
    pub report: BatchReport,
    pub saved_at: DateTime<Utc>,
}

impl BatchRecord {
    pub fn new(blueprint: impl Into<String>, report: BatchReport, summary: Option<Output>) -> Self {
        Self {
            blueprint: blueprint.into(),
            summary,
            report,
            saved_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.report.id
    }
}

/// Persists batch records as `<run_dir>/<batch-id>.json`
pub struct ReportStore {
    run_dir: PathBuf,
}

impl ReportStore {
    /// Open the store, creating `run_dir` if needed
    pub fn new(run_dir: impl Into<PathBuf>) -> Result<Self> {
        let run_dir = run_dir.into();
        if !run_dir.exists() {
            fs::create_dir_all(&run_dir)
                .with_context(|| format!("Failed to create run dir {}", run_dir.display()))?;
        }
        Ok(Self { run_dir })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    fn record_path(&self, batch_id: &str) -> PathBuf {
        self.run_dir.join(format!("{}.json", batch_id))
    }

    /// Write `record`, replacing any earlier record of the same batch
    pub fn save(&self, record: &BatchRecord) -> Result<PathBuf> {
        let path = self.record_path(record.id());
        let content = serde_json::to_string_pretty(record).context("Failed to serialize batch record")?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    /// `None` when no record of `batch_id` exists
    pub fn load(&self, batch_id: &str) -> Result<Option<BatchRecord>> {
        let path = self.record_path(batch_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let record = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(record))
    }

    /// Every record in the run dir, oldest batch first
    pub fn list(&self) -> Result<Vec<BatchRecord>> {
        let mut records = Vec::new();
        let entries = fs::read_dir(&self.run_dir).context("Failed to read run dir")?;
        for entry in entries {
            let path = entry.context("Failed to read run dir entry")?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let record: BatchRecord = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            records.push(record);
        }
        records.sort_by_key(|r| r.report.started_at);
        Ok(records)
    }
}
