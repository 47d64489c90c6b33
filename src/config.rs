use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};

use crate::install::settings::{
    DEFAULT_PROCESS_TIMEOUT_SECS, DatabaseSettings, InstallSettings, WebServerSettings, timeout_from_secs,
};
use crate::install::runner::DEFAULT_PROGRESS_EVERY;

pub const CONFIG_FILE_NAME: &str = "setupflow.toml";

/// Top-level application configuration.
///
/// Unset directories fall back to locations under [`AppConfig::data_dir`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Flat folder holding the `.exe` / `.msi` / `.zip` installers
    pub installers_dir: Option<String>,
    /// Base directory for relative install targets; also holds the run lock
    pub install_root: Option<String>,
    pub log_dir: Option<String>,
    pub profiles_dir: Option<String>,
    /// TOML file with `[[software]]` entries
    pub catalog: Option<String>,
    /// Per-process bound, 0 waits forever
    #[serde(default = "default_process_timeout")]
    pub process_timeout_secs: u64,
    #[serde(default = "default_progress_every")]
    pub progress_every_lines: usize,
    /// Newest batch logs kept, 0 keeps all
    #[serde(default)]
    pub log_retention: usize,
    #[serde(default)]
    pub web_server: WebServerSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
}

fn default_process_timeout() -> u64 {
    DEFAULT_PROCESS_TIMEOUT_SECS
}

fn default_progress_every() -> usize {
    DEFAULT_PROGRESS_EVERY
}

impl Default for AppConfig {
    fn default() -> Self {
        let data = Self::data_dir();
        let path = |leaf: &str| Some(data.join(leaf).display().to_string());
        Self {
            installers_dir: path("installers"),
            install_root: path("apps"),
            log_dir: path("logs"),
            profiles_dir: path("profiles"),
            catalog: path("catalog.toml"),
            process_timeout_secs: DEFAULT_PROCESS_TIMEOUT_SECS,
            progress_every_lines: DEFAULT_PROGRESS_EVERY,
            log_retention: 0,
            web_server: WebServerSettings::default(),
            database: DatabaseSettings::default(),
        }
    }
}

impl AppConfig {
    /// Per-user application data directory
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("SetupFlow")
    }

    pub fn default_path() -> PathBuf {
        Self::data_dir().join(CONFIG_FILE_NAME)
    }

    /// Load `path` (or the default location), writing a default file first
    /// when none exists
    pub fn load_or_create(path: Option<&Path>) -> Result<(Self, PathBuf)> {
        let cfg_path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);

        if !cfg_path.exists() {
            info!(
                "Config not found at {}, creating default configuration",
                cfg_path.display()
            );
            if let Some(parent) = cfg_path.parent() {
                fs::create_dir_all(parent).context("Failed to create config directory")?;
            }
            let default_toml =
                toml::to_string_pretty(&Self::default()).context("Failed to serialize default config")?;
            fs::write(&cfg_path, default_toml).context("Failed to write config file")?;
            info!("Created default configuration at {}", cfg_path.display());
        }

        let cfg_str = fs::read_to_string(&cfg_path).context("Failed to read config file")?;
        let cfg: Self = toml::from_str(&cfg_str)
            .with_context(|| format!("Failed to parse config {}", cfg_path.display()))?;
        Ok((cfg, cfg_path))
    }

    fn dir_or(value: &Option<String>, leaf: &str) -> PathBuf {
        value
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| Self::data_dir().join(leaf))
    }

    pub fn installers_dir(&self) -> PathBuf {
        Self::dir_or(&self.installers_dir, "installers")
    }

    pub fn install_root(&self) -> PathBuf {
        Self::dir_or(&self.install_root, "apps")
    }

    pub fn log_dir(&self) -> PathBuf {
        Self::dir_or(&self.log_dir, "logs")
    }

    pub fn profiles_dir(&self) -> PathBuf {
        Self::dir_or(&self.profiles_dir, "profiles")
    }

    pub fn catalog_path(&self) -> PathBuf {
        Self::dir_or(&self.catalog, "catalog.toml")
    }

    pub fn to_install_settings(&self) -> InstallSettings {
        let mut settings = InstallSettings::new(self.installers_dir(), self.install_root(), self.log_dir());
        settings.process_timeout = timeout_from_secs(self.process_timeout_secs);
        settings.progress_every = self.progress_every_lines.max(1);
        settings.log_retention = self.log_retention;
        settings.web_server = self.web_server.clone();
        settings.database = self.database.clone();
        settings
    }
}
