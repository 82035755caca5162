//! In-memory backend that records every call.
//!
//! Used by host integrations to assert what a training loop would have sent.
//! Clones share the same record.

use super::{RunEvent, TrackingBackend, TrackingRun};
use crate::artifact::Artifact;
use crate::config::RunConfig;
use crate::error::{BackendError, Result};
use crate::metrics::MetricsSnapshot;
use crate::trainer::{ModelSummary, WatchLog};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Shared {
    events: Vec<RunEvent>,
    runs_opened: usize,
    fail_on: Option<&'static str>,
}

/// Backend that keeps every [`RunEvent`] in memory.
#[derive(Clone, Default)]
pub struct RecordingBackend {
    shared: Arc<Mutex<Shared>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call of the given kind (`"init"`, `"log"`, ...) fail.
    pub fn failing_on(kind: &'static str) -> Self {
        let backend = Self::new();
        backend.lock().fail_on = Some(kind);
        backend
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// All events across all runs, in call order.
    pub fn events(&self) -> Vec<RunEvent> {
        self.lock().events.clone()
    }

    pub fn runs_opened(&self) -> usize {
        self.lock().runs_opened
    }

    /// Number of recorded events of one kind.
    pub fn count(&self, kind: &str) -> usize {
        self.lock().events.iter().filter(|e| e.kind() == kind).count()
    }

    /// Metrics of every `log` event, in order.
    pub fn logged_metrics(&self) -> Vec<(u64, MetricsSnapshot)> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e {
                RunEvent::Log { step, metrics } => Some((*step, metrics.clone())),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: RunEvent) -> Result<()> {
        let mut shared = self.lock();
        if shared.fail_on == Some(event.kind()) {
            return Err(BackendError::Request {
                endpoint: event.kind().to_string(),
                message: "injected failure".to_string(),
            }
            .into());
        }
        shared.events.push(event);
        Ok(())
    }
}

impl TrackingBackend for RecordingBackend {
    fn open_run(
        &self,
        settings: &RunConfig,
        config: &serde_json::Value,
    ) -> Result<Box<dyn TrackingRun>> {
        let run_id = format!("recorded-{}", self.runs_opened() + 1);
        self.record(RunEvent::Init {
            run_id: run_id.clone(),
            settings: settings.clone(),
            config: config.clone(),
        })?;
        self.lock().runs_opened += 1;
        Ok(Box::new(RecordingRun {
            backend: self.clone(),
            id: run_id,
            finished: false,
        }))
    }
}

struct RecordingRun {
    backend: RecordingBackend,
    id: String,
    finished: bool,
}

impl RecordingRun {
    fn record(&mut self, event: RunEvent) -> Result<()> {
        if self.finished {
            return Err(BackendError::RunFinished {
                run_id: self.id.clone(),
            }
            .into());
        }
        self.backend.record(event)
    }
}

impl TrackingRun for RecordingRun {
    fn id(&self) -> &str {
        &self.id
    }

    fn watch(&mut self, model: &ModelSummary, log: WatchLog) -> Result<()> {
        self.record(RunEvent::Watch {
            model: model.clone(),
            log,
        })
    }

    fn log(&mut self, metrics: &MetricsSnapshot, step: u64) -> Result<()> {
        self.record(RunEvent::Log {
            step,
            metrics: metrics.clone(),
        })
    }

    fn update_summary(&mut self, values: &MetricsSnapshot) -> Result<()> {
        self.record(RunEvent::Summary {
            values: values.clone(),
        })
    }

    fn log_artifact(&mut self, artifact: &Artifact) -> Result<()> {
        self.record(RunEvent::Artifact {
            artifact: artifact.clone(),
            archive: None,
        })
    }

    fn finish(&mut self) -> Result<()> {
        self.record(RunEvent::Finish)?;
        self.finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_in_order() {
        let backend = RecordingBackend::new();
        let mut run = backend
            .open_run(&RunConfig::default(), &serde_json::json!({"lr": 0.1}))
            .unwrap();
        run.log(&MetricsSnapshot::new(), 0).unwrap();
        run.finish().unwrap();

        let kinds: Vec<_> = backend.events().iter().map(RunEvent::kind).collect();
        assert_eq!(kinds, vec!["init", "log", "finish"]);
        assert_eq!(backend.runs_opened(), 1);
    }

    #[test]
    fn test_calls_after_finish_fail() {
        let backend = RecordingBackend::new();
        let mut run = backend
            .open_run(&RunConfig::default(), &serde_json::json!({}))
            .unwrap();
        run.finish().unwrap();
        assert!(run.log(&MetricsSnapshot::new(), 1).is_err());
        assert_eq!(backend.count("log"), 0);
    }

    #[test]
    fn test_injected_failure() {
        let backend = RecordingBackend::failing_on("init");
        assert!(
            backend
                .open_run(&RunConfig::default(), &serde_json::json!({}))
                .is_err()
        );
        assert_eq!(backend.runs_opened(), 0);
    }
}
