//! An open tracking session and its once-only finalization.
//!
//! A [`RunSession`] owns the run handle for the reporter's lifetime. Cloning
//! it shares the same run, step counter, and finalized flag, which lets the
//! signal watcher thread and `Drop` race safely: whoever gets in first
//! finalizes. Every later caller blocks until that pass has returned and then
//! gets [`FinalizeOutcome::AlreadyFinalized`].

use crate::artifact::Artifact;
use crate::backend::TrackingRun;
use crate::config::FinalizeConfig;
use crate::error::Result;
use crate::locks::remove_stale_locks;
use crate::metrics::{MetricsSnapshot, read_final_metrics};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Where the run summary comes from at finalization.
#[derive(Debug, Clone)]
pub enum SummarySource {
    /// Re-read `metrics.json` from the serialization directory.
    MetricsFile,
    /// Use metrics already in memory (the end-of-training snapshot).
    InMemory(MetricsSnapshot),
}

/// What a finalization pass did.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizeReport {
    pub run_id: String,
    pub removed_locks: Vec<PathBuf>,
    pub artifact_files: usize,
    pub artifact_digest: String,
    pub summary: MetricsSnapshot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FinalizeOutcome {
    Finalized(FinalizeReport),
    AlreadyFinalized,
}

struct SessionInner {
    run: Mutex<Box<dyn TrackingRun>>,
    run_id: String,
    serialization_dir: PathBuf,
    artifact_name: String,
    artifact_type: String,
    next_step: AtomicU64,
    /// Held for the whole finalization pass.
    finalizing: Mutex<()>,
    finalized: AtomicBool,
}

/// Shared handle to one open run.
#[derive(Clone)]
pub struct RunSession {
    inner: Arc<SessionInner>,
}

impl RunSession {
    pub fn new(
        run: Box<dyn TrackingRun>,
        serialization_dir: &Path,
        finalize: &FinalizeConfig,
    ) -> Self {
        let run_id = run.id().to_string();
        Self {
            inner: Arc::new(SessionInner {
                run: Mutex::new(run),
                run_id,
                serialization_dir: serialization_dir.to_path_buf(),
                artifact_name: finalize.artifact_name.clone(),
                artifact_type: finalize.artifact_type.clone(),
                next_step: AtomicU64::new(0),
                finalizing: Mutex::new(()),
                finalized: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.run_id
    }

    pub fn serialization_dir(&self) -> &Path {
        &self.inner.serialization_dir
    }

    pub fn is_finalized(&self) -> bool {
        self.inner.finalized.load(Ordering::SeqCst)
    }

    /// Step the next `log` call will use.
    pub fn next_step(&self) -> u64 {
        self.inner.next_step.load(Ordering::SeqCst)
    }

    // A hook that panicked mid-call must not block exit-time finalization.
    fn run(&self) -> MutexGuard<'_, Box<dyn TrackingRun>> {
        self.inner.run.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Forward one metrics snapshot at the next step. Returns the step used.
    pub fn log(&self, metrics: &MetricsSnapshot) -> Result<u64> {
        let mut run = self.run();
        let step = self.inner.next_step.load(Ordering::SeqCst);
        run.log(metrics, step)?;
        self.inner.next_step.store(step + 1, Ordering::SeqCst);
        tracing::trace!(run_id = %self.inner.run_id, step, "Logged metrics");
        Ok(step)
    }

    /// Clean up, upload the output directory, record the summary, close the run.
    ///
    /// Only the first call does anything. A concurrent caller waits for that
    /// pass to return, so `AlreadyFinalized` always means the run is closed or
    /// its one attempt has failed. The flag is set before any work so a failed
    /// pass is not retried from `Drop`.
    pub fn finalize(&self, summary: SummarySource) -> Result<FinalizeOutcome> {
        let _pass = self
            .inner
            .finalizing
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if self.inner.finalized.swap(true, Ordering::SeqCst) {
            return Ok(FinalizeOutcome::AlreadyFinalized);
        }
        let dir = &self.inner.serialization_dir;
        tracing::info!(run_id = %self.inner.run_id, dir = %dir.display(), "Finalizing tracking run");

        let removed_locks = remove_stale_locks(dir)?;
        if !removed_locks.is_empty() {
            tracing::debug!(count = removed_locks.len(), "Removed stale lock files");
        }

        let artifact = Artifact::from_dir(&self.inner.artifact_name, &self.inner.artifact_type, dir)?;

        let mut run = self.run();
        run.log_artifact(&artifact)?;

        let summary = match summary {
            SummarySource::MetricsFile => read_final_metrics(dir)?,
            SummarySource::InMemory(metrics) => metrics,
        };
        tracing::info!(
            run_id = %self.inner.run_id,
            summary = %serde_json::Value::Object(summary.clone()),
            "Final metrics"
        );
        run.update_summary(&summary)?;
        run.finish()?;

        Ok(FinalizeOutcome::Finalized(FinalizeReport {
            run_id: self.inner.run_id.clone(),
            removed_locks,
            artifact_files: artifact.files.len(),
            artifact_digest: artifact.digest,
            summary,
        }))
    }

    /// Finalize on SIGINT/SIGTERM, then exit with `128 + signal`.
    ///
    /// If another thread is already finalizing, the watcher waits for it
    /// before exiting.
    ///
    /// Installing a handler replaces the default "terminate" action, so the
    /// watcher keeps exiting the process on a signal even after the run was
    /// finalized through another path.
    pub fn watch_signals(&self) -> std::io::Result<()> {
        let session = self.clone();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        std::thread::Builder::new()
            .name("runrelay-signals".into())
            .spawn(move || {
                let code = runtime.block_on(wait_for_termination());
                tracing::warn!(exit_code = code, "Termination signal received");
                if let Err(e) = session.finalize(SummarySource::MetricsFile) {
                    tracing::error!(run_id = %session.id(), error = %e, "Finalization on signal failed");
                }
                std::process::exit(code);
            })?;
        Ok(())
    }
}

#[cfg(unix)]
async fn wait_for_termination() -> i32 {
    use tokio::signal::unix::{SignalKind, signal};
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "Cannot listen for SIGTERM; watching Ctrl-C only");
            let _ = tokio::signal::ctrl_c().await;
            return 130;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => 130,
        _ = terminate.recv() => 143,
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() -> i32 {
    let _ = tokio::signal::ctrl_c().await;
    130
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{RecordingBackend, RunEvent, TrackingBackend};
    use crate::config::RunConfig;
    use crate::trainer::{ModelSummary, WatchLog};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Run whose artifact upload takes a while.
    struct SlowUploadRun {
        upload_time: Duration,
        upload_started: Option<std::sync::mpsc::Sender<()>>,
        finished: Arc<AtomicBool>,
    }

    impl TrackingRun for SlowUploadRun {
        fn id(&self) -> &str {
            "slow"
        }

        fn watch(&mut self, _model: &ModelSummary, _log: WatchLog) -> Result<()> {
            Ok(())
        }

        fn log(&mut self, _metrics: &MetricsSnapshot, _step: u64) -> Result<()> {
            Ok(())
        }

        fn update_summary(&mut self, _values: &MetricsSnapshot) -> Result<()> {
            Ok(())
        }

        fn log_artifact(&mut self, _artifact: &Artifact) -> Result<()> {
            if let Some(tx) = self.upload_started.take() {
                let _ = tx.send(());
            }
            std::thread::sleep(self.upload_time);
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            self.finished.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn open(backend: &RecordingBackend, dir: &Path) -> RunSession {
        let run = backend
            .open_run(&RunConfig::default(), &serde_json::json!({}))
            .unwrap();
        RunSession::new(run, dir, &FinalizeConfig::default())
    }

    fn output_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.json"), r#"{"lr":0.1}"#).unwrap();
        std::fs::write(dir.path().join("metrics.json"), r#"{"accuracy":0.9}"#).unwrap();
        std::fs::create_dir(dir.path().join("vocabulary")).unwrap();
        std::fs::write(dir.path().join("vocabulary/.lock"), "").unwrap();
        dir
    }

    #[test]
    fn test_log_advances_step() {
        let dir = output_dir();
        let backend = RecordingBackend::new();
        let session = open(&backend, dir.path());
        assert_eq!(session.log(&MetricsSnapshot::new()).unwrap(), 0);
        assert_eq!(session.log(&MetricsSnapshot::new()).unwrap(), 1);
        assert_eq!(session.next_step(), 2);
    }

    #[test]
    fn test_failed_log_does_not_advance_step() {
        let dir = output_dir();
        let backend = RecordingBackend::failing_on("log");
        let session = open(&backend, dir.path());
        assert!(session.log(&MetricsSnapshot::new()).is_err());
        assert_eq!(session.next_step(), 0);
    }

    #[test]
    fn test_finalize_runs_once() {
        let dir = output_dir();
        let backend = RecordingBackend::new();
        let session = open(&backend, dir.path());

        let first = session.finalize(SummarySource::MetricsFile).unwrap();
        let report = match first {
            FinalizeOutcome::Finalized(r) => r,
            other => panic!("expected finalized, got {other:?}"),
        };
        assert_eq!(report.removed_locks, vec![dir.path().join("vocabulary/.lock")]);
        assert_eq!(report.artifact_files, 2);
        assert_eq!(report.summary["accuracy"], serde_json::json!(0.9));

        // A lock created after the first pass must survive the second.
        std::fs::write(dir.path().join(".lock"), "").unwrap();
        let second = session.finalize(SummarySource::MetricsFile).unwrap();
        assert_eq!(second, FinalizeOutcome::AlreadyFinalized);
        assert!(dir.path().join(".lock").exists());
        assert_eq!(backend.count("finish"), 1);
        assert_eq!(backend.count("artifact"), 1);
    }

    #[test]
    fn test_finalize_with_in_memory_summary_skips_metrics_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.json"), "{}").unwrap();
        let backend = RecordingBackend::new();
        let session = open(&backend, dir.path());

        let mut end = MetricsSnapshot::new();
        end.insert("loss".into(), serde_json::json!(0.05));
        session.finalize(SummarySource::InMemory(end.clone())).unwrap();

        let summaries: Vec<_> = backend
            .events()
            .into_iter()
            .filter_map(|e| match e {
                RunEvent::Summary { values } => Some(values),
                _ => None,
            })
            .collect();
        assert_eq!(summaries, vec![end]);
    }

    #[test]
    fn test_missing_metrics_file_propagates() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.json"), "{}").unwrap();
        let backend = RecordingBackend::new();
        let session = open(&backend, dir.path());

        assert!(session.finalize(SummarySource::MetricsFile).is_err());
        assert_eq!(backend.count("finish"), 0);
        // The failed pass still counts as the one finalization.
        assert!(session.is_finalized());
    }

    #[test]
    fn test_clones_share_finalized_flag() {
        let dir = output_dir();
        let backend = RecordingBackend::new();
        let session = open(&backend, dir.path());
        let other = session.clone();
        session.finalize(SummarySource::MetricsFile).unwrap();
        assert_eq!(
            other.finalize(SummarySource::MetricsFile).unwrap(),
            FinalizeOutcome::AlreadyFinalized
        );
    }

    #[test]
    fn test_concurrent_finalize_waits_for_the_running_pass() {
        let dir = output_dir();
        let finished = Arc::new(AtomicBool::new(false));
        let (tx, rx) = std::sync::mpsc::channel();
        let run = SlowUploadRun {
            upload_time: Duration::from_millis(400),
            upload_started: Some(tx),
            finished: Arc::clone(&finished),
        };
        let session = RunSession::new(Box::new(run), dir.path(), &FinalizeConfig::default());

        let first = {
            let session = session.clone();
            std::thread::spawn(move || session.finalize(SummarySource::MetricsFile))
        };
        rx.recv().unwrap();

        let second = session.finalize(SummarySource::MetricsFile).unwrap();
        assert_eq!(second, FinalizeOutcome::AlreadyFinalized);
        assert!(
            finished.load(Ordering::SeqCst),
            "second caller returned before the run was finished"
        );

        let first = first.join().unwrap().unwrap();
        assert!(matches!(first, FinalizeOutcome::Finalized(_)));
    }
}
