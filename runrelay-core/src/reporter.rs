//! Run reporter: mirrors trainer lifecycle events to a tracking run.
//!
//! Only the primary process talks to the tracking service; every hook on a
//! secondary process returns immediately. The run is opened in `on_start` and
//! finalized exactly once: by [`RunReporter::finish`], by `Drop`, or by the
//! signal watcher, whichever comes first. With [`FinalizePolicy::OnEnd`] the
//! reporter finalizes inside `on_end` instead.

use crate::backend::{ModeBackend, TrackingBackend};
use crate::callback::TrainerCallback;
use crate::config::{FinalizeConfig, FinalizePolicy, RelayConfig, RunConfig, SyncMode};
use crate::error::{RelayError, Result};
use crate::metrics::{MetricsSnapshot, read_run_config};
use crate::probe::{ConnectivityProbe, HttpProbe, resolve_mode};
use crate::session::{FinalizeOutcome, RunSession, SummarySource};
use crate::trainer::{BatchContext, Trainer, WatchLog};
use std::path::Path;
use std::sync::Arc;

pub struct RunReporter {
    settings: RunConfig,
    finalize: FinalizeConfig,
    backend: Arc<dyn TrackingBackend>,
    session: Option<RunSession>,
}

impl RunReporter {
    /// Store the run options and settle the sync mode.
    ///
    /// An online run whose probe fails is downgraded to offline. Nothing is
    /// sent to the tracking service here.
    pub fn new(
        config: RunConfig,
        finalize: FinalizeConfig,
        backend: Arc<dyn TrackingBackend>,
        probe: &dyn ConnectivityProbe,
    ) -> Self {
        let mode = resolve_mode(config.mode, probe);
        let settings = RunConfig { mode, ..config };
        tracing::debug!(
            project = ?settings.project,
            name = ?settings.name,
            mode = %settings.mode,
            "Run reporter initialized"
        );
        Self {
            settings,
            finalize,
            backend,
            session: None,
        }
    }

    /// Build a reporter with the standard backends and an HTTP probe.
    ///
    /// `workspace` anchors a relative offline directory; pass the directory
    /// the config was loaded from.
    pub fn from_config(config: &RelayConfig, workspace: &Path) -> Result<Self> {
        let backend = Arc::new(ModeBackend::from_config(config, workspace)?);
        let probe = HttpProbe::from_config(&config.probe);
        Ok(Self::new(
            config.run.clone(),
            config.finalize.clone(),
            backend,
            &probe,
        ))
    }

    /// The mode in effect after probing.
    pub fn mode(&self) -> SyncMode {
        self.settings.mode
    }

    pub fn settings(&self) -> &RunConfig {
        &self.settings
    }

    pub fn session(&self) -> Option<&RunSession> {
        self.session.as_ref()
    }

    /// Run exit-time cleanup now and return any error to the caller.
    ///
    /// A reporter that never opened a session (secondary process, or
    /// `on_start` not reached) has nothing to finalize.
    pub fn finish(&mut self) -> Result<FinalizeOutcome> {
        match &self.session {
            Some(session) => session.finalize(SummarySource::MetricsFile),
            None => Ok(FinalizeOutcome::AlreadyFinalized),
        }
    }

    fn forward(&self, metrics: &MetricsSnapshot) -> Result<u64> {
        self.session
            .as_ref()
            .ok_or(RelayError::NoSession)?
            .log(metrics)
    }
}

impl TrainerCallback for RunReporter {
    fn on_start(&mut self, trainer: &dyn Trainer, is_primary: bool) -> Result<()> {
        if !is_primary {
            return Ok(());
        }
        if let Some(session) = &self.session {
            return Err(RelayError::SessionAlreadyOpen {
                run_id: session.id().to_string(),
            });
        }

        let dir = trainer.serialization_dir();
        let config = read_run_config(dir)?;
        let mut run = self.backend.open_run(&self.settings, &config)?;
        run.watch(&trainer.model(), WatchLog::All)?;

        let session = RunSession::new(run, dir, &self.finalize);
        if self.finalize.handle_signals {
            if let Err(e) = session.watch_signals() {
                tracing::warn!(error = %e, "Could not install signal handler; relying on drop");
            }
        }
        tracing::info!(run_id = %session.id(), mode = %self.settings.mode, "Tracking run started");
        self.session = Some(session);
        Ok(())
    }

    fn on_batch(
        &mut self,
        _trainer: &dyn Trainer,
        _batch: BatchContext,
        metrics: &MetricsSnapshot,
        is_primary: bool,
    ) -> Result<()> {
        if !is_primary {
            return Ok(());
        }
        self.forward(metrics)?;
        Ok(())
    }

    fn on_epoch(
        &mut self,
        _trainer: &dyn Trainer,
        metrics: &MetricsSnapshot,
        epoch: usize,
        is_primary: bool,
    ) -> Result<()> {
        if !is_primary {
            return Ok(());
        }
        let step = self.forward(metrics)?;
        tracing::debug!(epoch, step, "Logged epoch metrics");
        Ok(())
    }

    fn on_end(
        &mut self,
        _trainer: &dyn Trainer,
        metrics: Option<&MetricsSnapshot>,
        _epoch: Option<usize>,
        is_primary: bool,
    ) -> Result<()> {
        if !is_primary {
            return Ok(());
        }
        if let Some(metrics) = metrics {
            self.forward(metrics)?;
        }

        if self.finalize.policy == FinalizePolicy::OnEnd {
            let session = self.session.as_ref().ok_or(RelayError::NoSession)?;
            let source = match metrics {
                Some(m) => SummarySource::InMemory(m.clone()),
                None => SummarySource::MetricsFile,
            };
            session.finalize(source)?;
        }
        Ok(())
    }
}

impl Drop for RunReporter {
    fn drop(&mut self) {
        let Some(session) = &self.session else {
            return;
        };
        if std::thread::panicking() && !session.is_finalized() {
            tracing::warn!(run_id = %session.id(), "Finalizing tracking run while unwinding");
        }
        // Blocks while the signal watcher is mid-pass.
        if let Err(e) = session.finalize(SummarySource::MetricsFile) {
            tracing::error!(run_id = %session.id(), error = %e, "Exit-time finalization failed");
        }
    }
}
