//! Trainer lifecycle callbacks.

use crate::error::Result;
use crate::metrics::MetricsSnapshot;
use crate::trainer::{BatchContext, Trainer};

/// Hooks a host trainer calls, in order: `on_start`, any number of
/// `on_batch`/`on_epoch`, then `on_end`.
///
/// Every hook receives `is_primary`; in distributed training only one
/// process passes `true`. Hooks run synchronously on the training thread and
/// must return before the next one fires. Errors go back to the trainer.
pub trait TrainerCallback {
    fn on_start(&mut self, _trainer: &dyn Trainer, _is_primary: bool) -> Result<()> {
        Ok(())
    }

    fn on_batch(
        &mut self,
        _trainer: &dyn Trainer,
        _batch: BatchContext,
        _metrics: &MetricsSnapshot,
        _is_primary: bool,
    ) -> Result<()> {
        Ok(())
    }

    fn on_epoch(
        &mut self,
        _trainer: &dyn Trainer,
        _metrics: &MetricsSnapshot,
        _epoch: usize,
        _is_primary: bool,
    ) -> Result<()> {
        Ok(())
    }

    /// `metrics` is `None` when training ended before any epoch completed.
    fn on_end(
        &mut self,
        _trainer: &dyn Trainer,
        _metrics: Option<&MetricsSnapshot>,
        _epoch: Option<usize>,
        _is_primary: bool,
    ) -> Result<()> {
        Ok(())
    }
}

/// Fans every hook out to several callbacks, in registration order.
///
/// Stops at the first error, like the trainer's own dispatch loop.
#[derive(Default)]
pub struct CallbackList {
    callbacks: Vec<Box<dyn TrainerCallback>>,
}

impl CallbackList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, callback: Box<dyn TrainerCallback>) {
        self.callbacks.push(callback);
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl TrainerCallback for CallbackList {
    fn on_start(&mut self, trainer: &dyn Trainer, is_primary: bool) -> Result<()> {
        for cb in &mut self.callbacks {
            cb.on_start(trainer, is_primary)?;
        }
        Ok(())
    }

    fn on_batch(
        &mut self,
        trainer: &dyn Trainer,
        batch: BatchContext,
        metrics: &MetricsSnapshot,
        is_primary: bool,
    ) -> Result<()> {
        for cb in &mut self.callbacks {
            cb.on_batch(trainer, batch, metrics, is_primary)?;
        }
        Ok(())
    }

    fn on_epoch(
        &mut self,
        trainer: &dyn Trainer,
        metrics: &MetricsSnapshot,
        epoch: usize,
        is_primary: bool,
    ) -> Result<()> {
        for cb in &mut self.callbacks {
            cb.on_epoch(trainer, metrics, epoch, is_primary)?;
        }
        Ok(())
    }

    fn on_end(
        &mut self,
        trainer: &dyn Trainer,
        metrics: Option<&MetricsSnapshot>,
        epoch: Option<usize>,
        is_primary: bool,
    ) -> Result<()> {
        for cb in &mut self.callbacks {
            cb.on_end(trainer, metrics, epoch, is_primary)?;
        }
        Ok(())
    }
}
