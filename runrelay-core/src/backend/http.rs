//! Online backend talking to the tracking service over HTTP.
//!
//! Hooks are synchronous, so this uses `reqwest::blocking`. Do not call it
//! from inside a Tokio runtime.

use super::{TrackingBackend, TrackingRun};
use crate::artifact::Artifact;
use crate::config::{RunConfig, ServerConfig};
use crate::error::{BackendError, Result};
use crate::metrics::MetricsSnapshot;
use crate::trainer::{ModelSummary, WatchLog};
use reqwest::Method;
use reqwest::blocking::{Client, RequestBuilder};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Shared HTTP plumbing for the backend and its runs.
struct HttpApi {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpApi {
    fn request(&self, method: Method, endpoint: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), endpoint);
        let builder = self.client.request(method, url);
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    fn send(&self, endpoint: &str, builder: RequestBuilder) -> Result<serde_json::Value> {
        let resp = builder.send().map_err(|e| {
            tracing::warn!(endpoint, error = %e, "Tracking request failed");
            BackendError::Request {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            }
        })?;

        let status = resp.status();
        let body = resp.text().map_err(|e| BackendError::Request {
            endpoint: endpoint.to_string(),
            message: format!("Failed to read response body: {e}"),
        })?;

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(BackendError::AuthFailed { message: body }.into());
        }
        if !status.is_success() {
            tracing::warn!(endpoint, status = %status, body = %body, "Tracking service error");
            return Err(BackendError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            }
            .into());
        }

        if body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| {
            BackendError::ResponseParse {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }

    fn send_json(
        &self,
        method: Method,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        self.send(endpoint, self.request(method, endpoint).json(body))
    }
}

/// Backend for `mode = "run"`.
pub struct HttpBackend {
    api: Arc<HttpApi>,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("runrelay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BackendError::Request {
                endpoint: "client".into(),
                message: e.to_string(),
            })?;
        Ok(Self {
            api: Arc::new(HttpApi {
                client,
                base_url: base_url.into(),
                api_key,
            }),
        })
    }

    pub fn from_config(server: &ServerConfig) -> Result<Self> {
        Self::new(
            server.base_url.clone(),
            server.api_key.clone(),
            Duration::from_secs(server.timeout_secs),
        )
    }
}

impl TrackingBackend for HttpBackend {
    fn open_run(
        &self,
        settings: &RunConfig,
        config: &serde_json::Value,
    ) -> Result<Box<dyn TrackingRun>> {
        let body = open_run_body(settings, config);
        let resp = self.api.send_json(Method::POST, "runs", &body)?;
        let id = resp
            .get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| BackendError::ResponseParse {
                endpoint: "runs".into(),
                message: "Missing 'id' in response".into(),
            })?;

        tracing::info!(run_id = %id, project = ?settings.project, "Opened tracking run");
        Ok(Box::new(HttpRun {
            api: Arc::clone(&self.api),
            id,
            finished: false,
        }))
    }
}

/// Body of `POST runs`: every session parameter plus the trainer config.
fn open_run_body(settings: &RunConfig, config: &serde_json::Value) -> serde_json::Value {
    json!({
        "project": settings.project,
        "entity": settings.entity,
        "name": settings.name,
        "group": settings.group,
        "tags": settings.tags,
        "dir": settings.dir,
        "sync_tensorboard": settings.sync_tensorboard,
        "mode": settings.mode,
        "config": config,
    })
}

struct HttpRun {
    api: Arc<HttpApi>,
    id: String,
    finished: bool,
}

impl HttpRun {
    fn endpoint(&self, suffix: &str) -> Result<String> {
        if self.finished {
            return Err(BackendError::RunFinished {
                run_id: self.id.clone(),
            }
            .into());
        }
        Ok(format!("runs/{}/{suffix}", self.id))
    }
}

impl TrackingRun for HttpRun {
    fn id(&self) -> &str {
        &self.id
    }

    fn watch(&mut self, model: &ModelSummary, log: WatchLog) -> Result<()> {
        let endpoint = self.endpoint("watch")?;
        self.api.send_json(
            Method::POST,
            &endpoint,
            &json!({ "model": model, "log": log }),
        )?;
        Ok(())
    }

    fn log(&mut self, metrics: &MetricsSnapshot, step: u64) -> Result<()> {
        let endpoint = self.endpoint("history")?;
        self.api.send_json(
            Method::POST,
            &endpoint,
            &json!({ "step": step, "metrics": metrics }),
        )?;
        Ok(())
    }

    fn update_summary(&mut self, values: &MetricsSnapshot) -> Result<()> {
        let endpoint = self.endpoint("summary")?;
        self.api
            .send_json(Method::PATCH, &endpoint, &serde_json::Value::Object(values.clone()))?;
        Ok(())
    }

    fn log_artifact(&mut self, artifact: &Artifact) -> Result<()> {
        let endpoint = self.endpoint("artifacts")?;
        let archive = std::env::temp_dir().join(format!(
            "runrelay-{}-{}.zip",
            artifact.name,
            uuid::Uuid::new_v4().simple()
        ));
        artifact.package(&archive)?;

        let upload = || -> Result<serde_json::Value> {
            let form = reqwest::blocking::multipart::Form::new()
                .text("manifest", serde_json::to_string(artifact)?)
                .file("archive", &archive)?;
            self.api
                .send(&endpoint, self.api.request(Method::POST, &endpoint).multipart(form))
        };
        let result = upload();

        if let Err(e) = std::fs::remove_file(&archive) {
            tracing::debug!(path = %archive.display(), error = %e, "Could not remove temp archive");
        }
        result?;

        tracing::info!(
            run_id = %self.id,
            artifact = %artifact.name,
            files = artifact.files.len(),
            bytes = artifact.total_size(),
            "Uploaded artifact"
        );
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let endpoint = self.endpoint("finish")?;
        self.api
            .send_json(Method::POST, &endpoint, &json!({ "exit_code": 0 }))?;
        self.finished = true;
        tracing::info!(run_id = %self.id, "Finished tracking run");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_from_default_config() {
        let backend = HttpBackend::from_config(&ServerConfig::default()).unwrap();
        assert_eq!(backend.api.base_url, "http://127.0.0.1:8787/api");
        assert!(backend.api.api_key.is_none());
    }

    #[test]
    fn test_open_run_body_carries_every_session_parameter() {
        let settings = RunConfig {
            project: Some("ner".into()),
            tags: vec!["bert".into()],
            dir: Some("/scratch/runs".into()),
            mode: crate::config::SyncMode::Online,
            ..Default::default()
        };
        let body = open_run_body(&settings, &json!({"lr": 0.1}));
        assert_eq!(body["project"], json!("ner"));
        assert_eq!(body["tags"], json!(["bert"]));
        assert_eq!(body["dir"], json!("/scratch/runs"));
        assert_eq!(body["mode"], json!("run"));
        assert_eq!(body["sync_tensorboard"], json!(false));
        assert_eq!(body["config"], json!({"lr": 0.1}));
    }

    #[test]
    fn test_finished_run_rejects_calls() {
        let backend = HttpBackend::from_config(&ServerConfig::default()).unwrap();
        let mut run = HttpRun {
            api: Arc::clone(&backend.api),
            id: "abc".into(),
            finished: true,
        };
        let err = run.log(&MetricsSnapshot::new(), 0).unwrap_err();
        assert!(err.to_string().contains("already finished"));
    }

    #[test]
    fn test_unreachable_service_surfaces_request_error() {
        // Port 9 (discard) on localhost is closed in test environments.
        let backend =
            HttpBackend::new("http://127.0.0.1:9", None, Duration::from_secs(2)).unwrap();
        let err = backend
            .open_run(&RunConfig::default(), &json!({}))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            crate::error::RelayError::Backend(BackendError::Request { .. })
        ));
    }
}
