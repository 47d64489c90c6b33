//! Resolved runtime settings handed to the orchestrator

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::runner::DEFAULT_PROGRESS_EVERY;

pub const DEFAULT_PROCESS_TIMEOUT_SECS: u64 = 3600;

/// Web-server readiness and remediation knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebServerSettings {
    /// Probed in order on every readiness attempt
    pub ports: Vec<u16>,
    /// Port switched to when the configured one is already taken
    pub fallback_port: u16,
    pub probe_attempts: u32,
    pub probe_interval_ms: u64,
    pub open_browser: bool,
}

impl Default for WebServerSettings {
    fn default() -> Self {
        Self {
            ports: vec![80, 8080],
            fallback_port: 8080,
            probe_attempts: 5,
            probe_interval_ms: 2000,
            open_browser: true,
        }
    }
}

/// Database-server silent install parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Vendor installers of this class run for tens of minutes
    pub install_timeout_secs: u64,
    pub listener_port: u16,
    pub admin_password: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            install_timeout_secs: 3600,
            listener_port: 1521,
            admin_password: "Oracle123".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstallSettings {
    pub installers_dir: PathBuf,
    pub install_root: PathBuf,
    pub log_dir: PathBuf,
    /// `None` waits forever
    pub process_timeout: Option<Duration>,
    pub progress_every: usize,
    /// Batch logs kept at batch start, 0 keeps everything
    pub log_retention: usize,
    pub web_server: WebServerSettings,
    pub database: DatabaseSettings,
}

impl InstallSettings {
    pub fn new(installers_dir: PathBuf, install_root: PathBuf, log_dir: PathBuf) -> Self {
        Self {
            installers_dir,
            install_root,
            log_dir,
            process_timeout: Some(Duration::from_secs(DEFAULT_PROCESS_TIMEOUT_SECS)),
            progress_every: DEFAULT_PROGRESS_EVERY,
            log_retention: 0,
            web_server: WebServerSettings::default(),
            database: DatabaseSettings::default(),
        }
    }

    /// Descriptor override first, then the global default; 0 means unbounded
    pub fn timeout_for(&self, override_secs: Option<u64>) -> Option<Duration> {
        match override_secs {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => self.process_timeout,
        }
    }
}

/// Seconds from the config file to an optional bound
pub fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
