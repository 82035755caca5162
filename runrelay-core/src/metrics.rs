//! Metrics snapshots and the JSON run files a trainer leaves behind.

use crate::error::{RelayError, Result};
use std::path::Path;

/// Metric name to value, as produced by the trainer for one event.
///
/// Values are usually numbers, but trainers also write strings (durations)
/// and integers (best epoch); everything is forwarded untouched.
pub type MetricsSnapshot = serde_json::Map<String, serde_json::Value>;

/// Hyperparameters the trainer serialized before training started.
pub const CONFIG_FILE: &str = "config.json";

/// Final metrics the trainer writes after training finished.
pub const METRICS_FILE: &str = "metrics.json";

/// Read `config.json` from a serialization directory.
pub fn read_run_config(serialization_dir: &Path) -> Result<serde_json::Value> {
    read_json_object(&serialization_dir.join(CONFIG_FILE)).map(serde_json::Value::Object)
}

/// Read `metrics.json` from a serialization directory.
pub fn read_final_metrics(serialization_dir: &Path) -> Result<MetricsSnapshot> {
    read_json_object(&serialization_dir.join(METRICS_FILE))
}

/// Read a file that must contain a single JSON object.
pub fn read_json_object(path: &Path) -> Result<MetricsSnapshot> {
    let content = std::fs::read_to_string(path).map_err(|source| RelayError::MissingRunFile {
        path: path.to_path_buf(),
        source,
    })?;
    let value: serde_json::Value =
        serde_json::from_str(&content).map_err(|e| RelayError::InvalidRunFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(RelayError::InvalidRunFile {
            path: path.to_path_buf(),
            message: format!("expected an object, found {}", json_kind(&other)),
        }),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_run_config() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), r#"{"lr": 0.1, "model": {"type": "bert"}}"#)
            .unwrap();
        let config = read_run_config(dir.path()).unwrap();
        assert_eq!(config["lr"], serde_json::json!(0.1));
        assert_eq!(config["model"]["type"], "bert");
    }

    #[test]
    fn test_read_final_metrics_keeps_non_numeric_values() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(METRICS_FILE),
            r#"{"best_epoch": 3, "training_duration": "0:14:02", "validation_accuracy": 0.91}"#,
        )
        .unwrap();
        let metrics = read_final_metrics(dir.path()).unwrap();
        assert_eq!(metrics.len(), 3);
        assert_eq!(metrics["training_duration"], "0:14:02");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = read_final_metrics(dir.path()).unwrap_err();
        assert!(matches!(err, RelayError::MissingRunFile { .. }));
    }

    #[test]
    fn test_non_object_is_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[1, 2, 3]").unwrap();
        let err = read_run_config(dir.path()).unwrap_err();
        assert!(err.to_string().contains("an array"));
    }

    #[test]
    fn test_malformed_json_is_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{\"lr\": ").unwrap();
        assert!(matches!(
            read_run_config(dir.path()).unwrap_err(),
            RelayError::InvalidRunFile { .. }
        ));
    }
}
