//! Backend for `mode = "disabled"`: every call succeeds and does nothing.

use super::{TrackingBackend, TrackingRun};
use crate::artifact::Artifact;
use crate::config::RunConfig;
use crate::error::Result;
use crate::metrics::MetricsSnapshot;
use crate::trainer::{ModelSummary, WatchLog};

#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledBackend;

impl TrackingBackend for DisabledBackend {
    fn open_run(
        &self,
        _settings: &RunConfig,
        _config: &serde_json::Value,
    ) -> Result<Box<dyn TrackingRun>> {
        Ok(Box::new(DisabledRun {
            id: format!("disabled-{}", uuid::Uuid::new_v4().simple()),
        }))
    }
}

struct DisabledRun {
    id: String,
}

impl TrackingRun for DisabledRun {
    fn id(&self) -> &str {
        &self.id
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
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_run_accepts_everything() {
        let mut run = DisabledBackend
            .open_run(&RunConfig::default(), &serde_json::json!({}))
            .unwrap();
        assert!(run.id().starts_with("disabled-"));
        run.watch(&ModelSummary::default(), WatchLog::All).unwrap();
        run.log(&MetricsSnapshot::new(), 0).unwrap();
        run.finish().unwrap();
    }
}
