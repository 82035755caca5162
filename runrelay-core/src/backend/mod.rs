//! Tracking backends.
//!
//! A [`TrackingBackend`] opens runs; a [`TrackingRun`] is the handle every
//! later call goes through. [`ModeBackend`] picks the concrete backend from
//! the run's [`SyncMode`]:
//!
//! | mode       | backend            | effect                              |
//! |------------|--------------------|-------------------------------------|
//! | `run`      | [`HttpBackend`]    | calls the tracking service directly |
//! | `offline`  | [`OfflineBackend`] | journals to disk for `runrelay sync`|
//! | `disabled` | [`DisabledBackend`]| discards everything                 |

pub mod disabled;
pub mod http;
pub mod offline;
pub mod recording;

pub use disabled::DisabledBackend;
pub use http::HttpBackend;
pub use offline::OfflineBackend;
pub use recording::RecordingBackend;

use crate::artifact::Artifact;
use crate::config::{RelayConfig, RunConfig, SyncMode};
use crate::error::Result;
use crate::metrics::MetricsSnapshot;
use crate::trainer::{ModelSummary, WatchLog};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Opens tracking runs.
pub trait TrackingBackend: Send + Sync {
    /// Start a run with the given session options and attached trainer config.
    fn open_run(
        &self,
        settings: &RunConfig,
        config: &serde_json::Value,
    ) -> Result<Box<dyn TrackingRun>>;
}

/// Handle to one open run. Every call after `finish` fails.
pub trait TrackingRun: Send {
    fn id(&self) -> &str;

    /// Ask the service to instrument the model's parameters and gradients.
    fn watch(&mut self, model: &ModelSummary, log: WatchLog) -> Result<()>;

    /// Append one history row at `step`.
    fn log(&mut self, metrics: &MetricsSnapshot, step: u64) -> Result<()>;

    /// Merge values into the run summary.
    fn update_summary(&mut self, values: &MetricsSnapshot) -> Result<()>;

    fn log_artifact(&mut self, artifact: &Artifact) -> Result<()>;

    fn finish(&mut self) -> Result<()>;
}

/// One call made on a run, as journaled offline or recorded in tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    Init {
        run_id: String,
        settings: RunConfig,
        config: serde_json::Value,
    },
    Watch {
        model: ModelSummary,
        log: WatchLog,
    },
    Log {
        step: u64,
        metrics: MetricsSnapshot,
    },
    Summary {
        values: MetricsSnapshot,
    },
    Artifact {
        artifact: Artifact,
        /// Archive path relative to the offline run directory.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        archive: Option<String>,
    },
    Finish,
}

impl RunEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            RunEvent::Init { .. } => "init",
            RunEvent::Watch { .. } => "watch",
            RunEvent::Log { .. } => "log",
            RunEvent::Summary { .. } => "summary",
            RunEvent::Artifact { .. } => "artifact",
            RunEvent::Finish => "finish",
        }
    }
}

/// Dispatches `open_run` on the run's sync mode.
pub struct ModeBackend {
    online: Arc<dyn TrackingBackend>,
    offline: Arc<dyn TrackingBackend>,
    disabled: Arc<dyn TrackingBackend>,
}

impl ModeBackend {
    pub fn new(
        online: Arc<dyn TrackingBackend>,
        offline: Arc<dyn TrackingBackend>,
        disabled: Arc<dyn TrackingBackend>,
    ) -> Self {
        Self {
            online,
            offline,
            disabled,
        }
    }

    /// Build the standard backends from configuration.
    ///
    /// Offline journals go to [`RunConfig::offline_root`] under `workspace`,
    /// the same place `runrelay sync` looks.
    pub fn from_config(config: &RelayConfig, workspace: &Path) -> Result<Self> {
        let offline_root = config.run.offline_root(workspace);
        Ok(Self::new(
            Arc::new(HttpBackend::from_config(&config.server)?),
            Arc::new(OfflineBackend::new(offline_root)),
            Arc::new(DisabledBackend),
        ))
    }

    fn select(&self, mode: SyncMode) -> &Arc<dyn TrackingBackend> {
        match mode {
            SyncMode::Online => &self.online,
            SyncMode::Offline => &self.offline,
            SyncMode::Disabled => &self.disabled,
        }
    }
}

impl TrackingBackend for ModeBackend {
    fn open_run(
        &self,
        settings: &RunConfig,
        config: &serde_json::Value,
    ) -> Result<Box<dyn TrackingRun>> {
        tracing::debug!(mode = %settings.mode, "Selecting tracking backend");
        self.select(settings.mode).open_run(settings, config)
    }
}
