//! Error types for runrelay.
//!
//! Uses `thiserror` for structured error variants covering the tracking
//! backend, artifact packaging, configuration, and offline sync.

use std::path::PathBuf;

/// Top-level error type for the runrelay core library.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Cannot read {path}: {source}")]
    MissingRunFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON object in {path}: {message}")]
    InvalidRunFile { path: PathBuf, message: String },

    #[error("A tracking session is already open (run {run_id})")]
    SessionAlreadyOpen { run_id: String },

    #[error("No tracking session is open")]
    NoSession,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the tracking service.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Request to {endpoint} failed: {message}")]
    Request { endpoint: String, message: String },

    #[error("Tracking service returned {status} for {endpoint}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Unexpected response from {endpoint}: {message}")]
    ResponseParse { endpoint: String, message: String },

    #[error("Authentication failed: {message}")]
    AuthFailed { message: String },

    #[error("Run {run_id} is already finished")]
    RunFinished { run_id: String },

    #[error("Offline journal write failed: {0}")]
    Journal(#[from] std::io::Error),
}

/// Errors from building or packaging an artifact bundle.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Artifact source {path} does not exist or is not a directory")]
    MissingSource { path: PathBuf },

    #[error("Artifact source {path} contains no files")]
    Empty { path: PathBuf },

    #[error("Failed to walk {path}: {message}")]
    Walk { path: PathBuf, message: String },

    #[error("Failed to write archive {path}: {message}")]
    Archive { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {message}")]
    Load { message: String },

    #[error("Invalid value for '{field}': {message}")]
    Invalid { field: String, message: String },
}

/// Errors from replaying an offline run.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("{path} is not an offline run directory")]
    NotARunDir { path: PathBuf },

    #[error("Offline journal {path} has no init event")]
    MissingInit { path: PathBuf },

    #[error("Malformed journal line {line} in {path}: {message}")]
    MalformedEvent {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Artifact archive {path} referenced by the journal is missing")]
    MissingArchive { path: PathBuf },
}

/// Convenience type alias for runrelay results.
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_display() {
        let err = BackendError::Status {
            endpoint: "runs/abc/history".into(),
            status: 502,
            body: "bad gateway".into(),
        };
        assert_eq!(
            err.to_string(),
            "Tracking service returned 502 for runs/abc/history: bad gateway"
        );
    }

    #[test]
    fn test_relay_error_from_backend() {
        let err: RelayError = BackendError::AuthFailed {
            message: "invalid key".into(),
        }
        .into();
        assert!(matches!(err, RelayError::Backend(_)));
        assert!(err.to_string().contains("invalid key"));
    }

    #[test]
    fn test_missing_run_file_keeps_source() {
        let err = RelayError::MissingRunFile {
            path: PathBuf::from("/out/config.json"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("/out/config.json"));
    }
}
