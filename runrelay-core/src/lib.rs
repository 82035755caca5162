//! # runrelay-core
//!
//! A trainer callback that mirrors a training run to an experiment-tracking
//! service: the trainer's `config.json` when training starts, metrics on
//! every batch and epoch, and, once the process is done, the whole output
//! directory as a `model` artifact plus the final `metrics.json` as the run
//! summary.
//!
//! ```no_run
//! use runrelay_core::{RunReporter, TrainerCallback, load_config};
//! # fn train(cb: &mut dyn TrainerCallback) -> runrelay_core::error::Result<()> { Ok(()) }
//!
//! let workspace = std::env::current_dir()?;
//! let config = load_config(Some(&workspace), None)?;
//! let mut reporter = RunReporter::from_config(&config, &workspace)?;
//! train(&mut reporter)?;
//! reporter.finish()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! The host trainer and the tracking service are both behind traits
//! ([`Trainer`], [`TrackingBackend`]); nothing here is a global.

pub mod artifact;
pub mod backend;
pub mod callback;
pub mod config;
pub mod error;
pub mod locks;
pub mod metrics;
pub mod probe;
pub mod reporter;
pub mod session;
pub mod sync;
pub mod trainer;

pub use artifact::Artifact;
pub use backend::{ModeBackend, RunEvent, TrackingBackend, TrackingRun};
pub use callback::{CallbackList, TrainerCallback};
pub use config::{FinalizePolicy, RelayConfig, RunConfig, SyncMode, load_config};
pub use error::{RelayError, Result};
pub use metrics::MetricsSnapshot;
pub use probe::{ConnectivityProbe, HttpProbe, StaticProbe};
pub use reporter::RunReporter;
pub use session::{FinalizeOutcome, RunSession};
pub use trainer::{BatchContext, ModelSummary, ParameterInfo, Trainer};
