//! Configuration system for runrelay.
//!
//! Uses `figment` for layered configuration: defaults -> user file ->
//! workspace file -> environment -> explicit overrides.

use crate::error::ConfigError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Tracking options passed to the remote session.
    #[serde(default)]
    pub run: RunConfig,
    /// Reachability probe used to pick online or offline mode.
    #[serde(default)]
    pub probe: ProbeConfig,
    /// Tracking service endpoint.
    #[serde(default)]
    pub server: ServerConfig,
    /// Exit-time finalization.
    #[serde(default)]
    pub finalize: FinalizeConfig,
}

impl RelayConfig {
    /// Check values that serde cannot reject on its own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.probe.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "probe.timeout_secs".into(),
                message: "must be greater than zero".into(),
            });
        }
        if self.server.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "server.timeout_secs".into(),
                message: "must be greater than zero".into(),
            });
        }
        if !(self.server.base_url.starts_with("http://")
            || self.server.base_url.starts_with("https://"))
        {
            return Err(ConfigError::Invalid {
                field: "server.base_url".into(),
                message: format!("'{}' is not an http(s) URL", self.server.base_url),
            });
        }
        if self.finalize.artifact_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "finalize.artifact_name".into(),
                message: "must not be empty".into(),
            });
        }
        if self.run.tags.iter().any(|t| t.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                field: "run.tags".into(),
                message: "tags must not be blank".into(),
            });
        }
        Ok(())
    }
}

/// Options for one tracking run. Immutable once handed to a reporter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub entity: Option<String>,
    /// Display name of the run.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Local directory for offline journals. Relative paths resolve against
    /// the workspace; see [`RunConfig::offline_root`].
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub sync_tensorboard: bool,
    #[serde(default)]
    pub mode: SyncMode,
}

/// Offline root used when `run.dir` is unset, relative to the workspace.
pub const DEFAULT_OFFLINE_DIR: &str = "runrelay";

impl RunConfig {
    /// Directory offline runs are journaled into and synced from.
    ///
    /// An absolute `dir` is used as is, a relative one is joined onto
    /// `workspace`, and an unset one becomes `<workspace>/runrelay`.
    pub fn offline_root(&self, workspace: &Path) -> PathBuf {
        match &self.dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => workspace.join(dir),
            None => workspace.join(DEFAULT_OFFLINE_DIR),
        }
    }
}

/// How a run talks to the tracking service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncMode {
    /// Stream everything to the service.
    #[default]
    #[serde(rename = "run", alias = "online")]
    Online,
    /// Journal locally for a later `runrelay sync`.
    #[serde(rename = "offline", alias = "dryrun")]
    Offline,
    /// Drop everything.
    #[serde(rename = "disabled")]
    Disabled,
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Online => write!(f, "run"),
            SyncMode::Offline => write!(f, "offline"),
            SyncMode::Disabled => write!(f, "disabled"),
        }
    }
}

/// Reachability probe configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// URL that receives a single HEAD request.
    #[serde(default = "default_probe_url")]
    pub url: String,
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            url: default_probe_url(),
            timeout_secs: default_probe_timeout(),
        }
    }
}

fn default_probe_url() -> String {
    "https://www.google.com".to_string()
}

fn default_probe_timeout() -> u64 {
    10
}

/// Tracking service endpoint configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer token. Usually supplied through `RUNRELAY_SERVER__API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_server_timeout")]
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            timeout_secs: default_server_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8787/api".to_string()
}

fn default_server_timeout() -> u64 {
    60
}

/// When the run is finalized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizePolicy {
    /// Upload and close at process exit; summary reloaded from `metrics.json`.
    #[default]
    OnExit,
    /// Upload and close inside `on_end`; summary taken from the end metrics.
    OnEnd,
}

/// Exit-time finalization configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizeConfig {
    #[serde(default)]
    pub policy: FinalizePolicy,
    /// Finalize on SIGINT/SIGTERM before the process exits.
    #[serde(default = "default_true")]
    pub handle_signals: bool,
    #[serde(default = "default_artifact_name")]
    pub artifact_name: String,
    #[serde(default = "default_artifact_type")]
    pub artifact_type: String,
}

impl Default for FinalizeConfig {
    fn default() -> Self {
        Self {
            policy: FinalizePolicy::default(),
            handle_signals: true,
            artifact_name: default_artifact_name(),
            artifact_type: default_artifact_type(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_artifact_name() -> String {
    "model".to_string()
}

fn default_artifact_type() -> String {
    "model".to_string()
}

fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "runrelay", "runrelay")
        .map(|d| d.config_dir().join("config.toml"))
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `RUNRELAY_`)
/// 3. Workspace-local config (`.runrelay/config.toml`)
/// 4. User config (`~/.config/runrelay/config.toml`)
/// 5. Built-in defaults
///
/// `overrides` is a partial tree such as `{"run": {"project": "srl"}}`. Only
/// the keys it contains replace lower layers.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&serde_json::Value>,
) -> Result<RelayConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(RelayConfig::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".runrelay").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // RUNRELAY_RUN__PROJECT, RUNRELAY_SERVER__API_KEY, ...
    figment = figment.merge(Env::prefixed("RUNRELAY_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let config: RelayConfig = figment.extract().map_err(|e| ConfigError::Load {
        message: e.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}

/// Check whether a user-level or workspace-level config file exists.
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if user_config_path().is_some_and(|p| p.exists()) {
        return true;
    }
    workspace.is_some_and(|ws| ws.join(".runrelay").join("config.toml").exists())
}
