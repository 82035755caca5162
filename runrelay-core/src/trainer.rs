//! Host trainer interface.
//!
//! The trainer owns the training loop and the output directory; the reporter
//! only borrows a `&dyn Trainer` for the duration of each hook.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// What the reporter needs from the host trainer.
pub trait Trainer {
    /// Directory the trainer writes `config.json`, weights, and `metrics.json` into.
    fn serialization_dir(&self) -> &Path;

    /// Description of the model being trained, sent with the watch request.
    fn model(&self) -> ModelSummary;
}

/// Shape and trainability of one model parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterInfo {
    pub name: String,
    pub shape: Vec<usize>,
    pub trainable: bool,
}

impl ParameterInfo {
    pub fn new(name: impl Into<String>, shape: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            shape,
            trainable: true,
        }
    }

    pub fn frozen(mut self) -> Self {
        self.trainable = false;
        self
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

/// The model as the tracking service sees it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub name: String,
    pub parameters: Vec<ParameterInfo>,
}

impl ModelSummary {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, param: ParameterInfo) -> Self {
        self.parameters.push(param);
        self
    }

    pub fn num_parameters(&self) -> usize {
        self.parameters.iter().map(ParameterInfo::numel).sum()
    }

    pub fn num_trainable(&self) -> usize {
        self.parameters
            .iter()
            .filter(|p| p.trainable)
            .map(ParameterInfo::numel)
            .sum()
    }
}

/// What the tracking service should record about watched parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchLog {
    Gradients,
    Parameters,
    #[default]
    All,
}

/// Position of a batch within training.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchContext {
    pub epoch: usize,
    pub batch_number: usize,
    pub is_training: bool,
}
