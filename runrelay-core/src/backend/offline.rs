//! Offline backend. Journals every run call to disk.
//!
//! Layout of one offline run:
//!
//! ```text
//! <root>/offline-run-20260301_142233-1f3a9c2e/
//!     events.jsonl          one JournalEntry per line
//!     artifacts/model-<digest>.zip
//! ```
//!
//! `runrelay sync` replays the journal against the tracking service.

use super::{RunEvent, TrackingBackend, TrackingRun};
use crate::artifact::Artifact;
use crate::config::RunConfig;
use crate::error::{BackendError, Result, SyncError};
use crate::metrics::MetricsSnapshot;
use crate::trainer::{ModelSummary, WatchLog};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Journal file inside an offline run directory.
pub const JOURNAL_FILE: &str = "events.jsonl";

/// Prefix of every offline run directory.
pub const RUN_DIR_PREFIX: &str = "offline-run-";

/// One journal line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: RunEvent,
}

/// Writes runs under a local root directory.
#[derive(Debug, Clone)]
pub struct OfflineBackend {
    root: PathBuf,
}

impl OfflineBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl TrackingBackend for OfflineBackend {
    fn open_run(
        &self,
        settings: &RunConfig,
        config: &serde_json::Value,
    ) -> Result<Box<dyn TrackingRun>> {
        let run_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        let dir = self.root.join(format!(
            "{RUN_DIR_PREFIX}{}-{run_id}",
            Utc::now().format("%Y%m%d_%H%M%S")
        ));
        std::fs::create_dir_all(&dir).map_err(BackendError::Journal)?;

        let journal = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(JOURNAL_FILE))
            .map_err(BackendError::Journal)?;

        let mut run = OfflineRun {
            id: run_id.clone(),
            dir,
            journal,
            finished: false,
        };
        run.append(RunEvent::Init {
            run_id,
            settings: settings.clone(),
            config: config.clone(),
        })?;

        tracing::info!(
            run_id = %run.id,
            dir = %run.dir.display(),
            "Tracking offline; sync later with `runrelay sync`"
        );
        Ok(Box::new(run))
    }
}

struct OfflineRun {
    id: String,
    dir: PathBuf,
    journal: std::fs::File,
    finished: bool,
}

impl OfflineRun {
    fn append(&mut self, event: RunEvent) -> Result<()> {
        if self.finished {
            return Err(BackendError::RunFinished {
                run_id: self.id.clone(),
            }
            .into());
        }
        let entry = JournalEntry {
            timestamp: Utc::now(),
            event,
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        self.journal
            .write_all(line.as_bytes())
            .and_then(|()| self.journal.flush())
            .map_err(BackendError::Journal)?;
        Ok(())
    }
}

impl TrackingRun for OfflineRun {
    fn id(&self) -> &str {
        &self.id
    }

    fn watch(&mut self, model: &ModelSummary, log: WatchLog) -> Result<()> {
        self.append(RunEvent::Watch {
            model: model.clone(),
            log,
        })
    }

    fn log(&mut self, metrics: &MetricsSnapshot, step: u64) -> Result<()> {
        self.append(RunEvent::Log {
            step,
            metrics: metrics.clone(),
        })
    }

    fn update_summary(&mut self, values: &MetricsSnapshot) -> Result<()> {
        self.append(RunEvent::Summary {
            values: values.clone(),
        })
    }

    fn log_artifact(&mut self, artifact: &Artifact) -> Result<()> {
        let short = &artifact.digest[..artifact.digest.len().min(12)];
        let relative = format!("artifacts/{}-{short}.zip", artifact.name);
        artifact.package(&self.dir.join(&relative))?;
        self.append(RunEvent::Artifact {
            artifact: artifact.clone(),
            archive: Some(relative),
        })
    }

    fn finish(&mut self) -> Result<()> {
        self.append(RunEvent::Finish)?;
        self.finished = true;
        Ok(())
    }
}

/// Read every entry of an offline journal.
pub fn read_journal(path: &Path) -> std::result::Result<Vec<JournalEntry>, SyncError> {
    let content = std::fs::read_to_string(path).map_err(|_| SyncError::NotARunDir {
        path: path.parent().unwrap_or(path).to_path_buf(),
    })?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).map_err(|e| SyncError::MalformedEvent {
                path: path.to_path_buf(),
                line: idx + 1,
                message: e.to_string(),
            })
        })
        .collect()
}

/// Offline run directories directly below `root`, oldest first.
pub fn list_offline_runs(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }
    let mut runs: Vec<PathBuf> = std::fs::read_dir(root)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_dir()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(RUN_DIR_PREFIX))
                && path.join(JOURNAL_FILE).is_file()
        })
        .collect();
    runs.sort();
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_offline_run_writes_journal() {
        let root = TempDir::new().unwrap();
        let backend = OfflineBackend::new(root.path());
        let mut run = backend
            .open_run(&RunConfig::default(), &serde_json::json!({"lr": 0.1}))
            .unwrap();
        let mut metrics = MetricsSnapshot::new();
        metrics.insert("loss".into(), serde_json::json!(1.5));
        run.log(&metrics, 0).unwrap();
        run.finish().unwrap();

        let runs = list_offline_runs(root.path()).unwrap();
        assert_eq!(runs.len(), 1);
        let entries = read_journal(&runs[0].join(JOURNAL_FILE)).unwrap();
        let kinds: Vec<_> = entries.iter().map(|e| e.event.kind()).collect();
        assert_eq!(kinds, vec!["init", "log", "finish"]);
        match &entries[0].event {
            RunEvent::Init { run_id, config, .. } => {
                assert_eq!(run_id, run.id());
                assert_eq!(config["lr"], serde_json::json!(0.1));
            }
            other => panic!("expected init, got {other:?}"),
        }
    }

    #[test]
    fn test_artifact_archive_is_stored_in_run_dir() {
        let root = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        std::fs::write(source.path().join("weights.th"), b"abc").unwrap();
        let artifact = Artifact::from_dir("model", "model", source.path()).unwrap();

        let backend = OfflineBackend::new(root.path());
        let mut run = backend
            .open_run(&RunConfig::default(), &serde_json::json!({}))
            .unwrap();
        run.log_artifact(&artifact).unwrap();

        let run_dir = &list_offline_runs(root.path()).unwrap()[0];
        let entries = read_journal(&run_dir.join(JOURNAL_FILE)).unwrap();
        match &entries[1].event {
            RunEvent::Artifact {
                archive: Some(archive),
                ..
            } => assert!(run_dir.join(archive).is_file()),
            other => panic!("expected artifact, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_line_reports_line_number() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(JOURNAL_FILE);
        std::fs::write(&path, "{\"timestamp\":\"2026-01-01T00:00:00Z\",\"event\":\"finish\"}\nnot json\n")
            .unwrap();
        match read_journal(&path) {
            Err(SyncError::MalformedEvent { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected malformed event, got {other:?}"),
        }
    }

    #[test]
    fn test_list_ignores_other_dirs() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir(root.path().join("logs")).unwrap();
        std::fs::create_dir(root.path().join("offline-run-empty")).unwrap();
        assert!(list_offline_runs(root.path()).unwrap().is_empty());
    }
}
