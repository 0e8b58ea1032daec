//! Run-log persistence: one JSON file per campaign run, named by the run's
//! start timestamp.

use crate::model::RunRecord;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Default directory for per-run logs.
pub fn default_runs_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("campaign-dispatch").join("runs"))
        .unwrap_or_else(|| PathBuf::from("runs"))
}

/// File name for a record: `run-<start timestamp>.json`, with `:` and `.`
/// replaced so the RFC3339 stamp is filesystem-safe. Lexicographic order of
/// these names matches chronological order.
fn run_file_name(record: &RunRecord) -> String {
    let stamp: String = record
        .started_at_utc
        .chars()
        .map(|c| if c == ':' || c == '.' { '-' } else { c })
        .collect();
    format!("run-{stamp}.json")
}

/// Persist one run record, creating the directory if needed.
pub fn save_run(dir: &Path, record: &RunRecord) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("create runs directory {}", dir.display()))?;
    let path = dir.join(run_file_name(record));
    let json = serde_json::to_string_pretty(record).context("serialize run record")?;
    fs::write(&path, json).with_context(|| format!("write run log {}", path.display()))?;
    Ok(path)
}

/// Export a run record to an explicit path.
pub fn export_json(path: &Path, record: &RunRecord) -> Result<()> {
    let json = serde_json::to_string_pretty(record).context("serialize run record")?;
    fs::write(path, json).with_context(|| format!("export run record to {}", path.display()))?;
    Ok(())
}

/// Load up to `limit` recent run records, newest first. Unreadable or
/// non-record files are skipped.
pub fn load_recent(dir: &Path, limit: usize) -> Result<Vec<RunRecord>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut named: Vec<(String, RunRecord)> = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read runs directory {}", dir.display()))?
    {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with("run-") || !name.ends_with(".json") {
            continue;
        }
        let Ok(contents) = fs::read_to_string(entry.path()) else {
            continue;
        };
        if let Ok(record) = serde_json::from_str::<RunRecord>(&contents) {
            named.push((name, record));
        }
    }
    named.sort_by(|a, b| b.0.cmp(&a.0));
    named.truncate(limit);
    Ok(named.into_iter().map(|(_, record)| record).collect())
}
