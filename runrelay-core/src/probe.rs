//! Network reachability probe.
//!
//! Decides once, at reporter construction, whether an online run is possible.

use crate::config::{ProbeConfig, SyncMode};
use std::time::{Duration, Instant};

/// Answers "can we reach the network right now?".
pub trait ConnectivityProbe: Send + Sync {
    fn is_reachable(&self) -> bool;
}

/// Sends a single HEAD request with a bounded timeout.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    url: String,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }

    pub fn from_config(config: &ProbeConfig) -> Self {
        Self::new(config.url.clone(), Duration::from_secs(config.timeout_secs))
    }
}

impl ConnectivityProbe for HttpProbe {
    fn is_reachable(&self) -> bool {
        let start = Instant::now();
        let client = match reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.timeout)
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "Could not build probe client");
                return false;
            }
        };

        // Any HTTP status means the network answered.
        match client.head(&self.url).send() {
            Ok(resp) => {
                tracing::debug!(
                    url = %self.url,
                    status = %resp.status(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Network probe succeeded"
                );
                true
            }
            Err(e) => {
                tracing::debug!(
                    url = %self.url,
                    timeout = e.is_timeout(),
                    error = %e,
                    "Network probe failed"
                );
                false
            }
        }
    }
}

/// Probe with a fixed answer.
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe(pub bool);

impl ConnectivityProbe for StaticProbe {
    fn is_reachable(&self) -> bool {
        self.0
    }
}

/// Pick the mode a run actually uses.
///
/// Only `Online` is probed; it falls back to `Offline` when the network is
/// unreachable. `Offline` and `Disabled` are returned unchanged.
pub fn resolve_mode(configured: SyncMode, probe: &dyn ConnectivityProbe) -> SyncMode {
    if configured != SyncMode::Online {
        return configured;
    }
    if probe.is_reachable() {
        configured
    } else {
        tracing::warn!("Network unreachable; tracking run will be recorded offline");
        SyncMode::Offline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProbe {
        reachable: bool,
        calls: AtomicUsize,
    }

    impl ConnectivityProbe for CountingProbe {
        fn is_reachable(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reachable
        }
    }

    #[test]
    fn test_reachable_keeps_mode() {
        assert_eq!(resolve_mode(SyncMode::Online, &StaticProbe(true)), SyncMode::Online);
    }

    #[test]
    fn test_unreachable_downgrades_to_offline() {
        assert_eq!(
            resolve_mode(SyncMode::Online, &StaticProbe(false)),
            SyncMode::Offline
        );
    }

    #[test]
    fn test_non_online_modes_skip_probe() {
        let probe = CountingProbe {
            reachable: false,
            calls: AtomicUsize::new(0),
        };
        assert_eq!(resolve_mode(SyncMode::Disabled, &probe), SyncMode::Disabled);
        assert_eq!(resolve_mode(SyncMode::Offline, &probe), SyncMode::Offline);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_http_probe_unreachable_host() {
        let probe = HttpProbe::new("http://127.0.0.1:9", Duration::from_secs(2));
        assert!(!probe.is_reachable());
    }
}
