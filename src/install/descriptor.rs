//! Software descriptors, per-package outcomes and the batch they belong to

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::InstallError;

/// Sentinel command template meaning "extract the archive, run nothing"
pub const EXTRACT_ZIP: &str = "EXTRACT_ZIP";

/// Product family used to pick a post-install strategy.
///
/// Set explicitly in the catalog; never derived from the display name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProductKind {
    #[default]
    Generic,
    /// JVM build tool shipped as a zip (Gradle, Maven)
    BuildTool,
    /// Servlet container shipped as a zip (Tomcat)
    ServletContainer,
    /// Web server shipped as a zip (nginx)
    WebServer,
    /// Database server whose zip wraps a vendor installer (Oracle XE)
    DatabaseServer,
    /// Identity/auth server, extraction only (Keycloak)
    IdentityServer,
}

impl ProductKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::BuildTool => "build-tool",
            Self::ServletContainer => "servlet-container",
            Self::WebServer => "web-server",
            Self::DatabaseServer => "database-server",
            Self::IdentityServer => "identity-server",
        }
    }
}

/// Static metadata describing one installable package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftwareDescriptor {
    pub name: String,
    /// Relative to the configured installers directory
    pub installer_file_name: String,
    /// May contain `{path}`, `{installPath}`, or be [`EXTRACT_ZIP`]
    pub command_template: String,
    /// Relative paths are resolved against the configured install root
    pub default_install_target_path: String,
    #[serde(default)]
    pub requires_extraction: bool,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub product: ProductKind,
    /// Overrides the configured process timeout for this package
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// What the orchestrator will do with a descriptor once preflight passes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallMethod {
    Extract,
    ManualExtraction,
    Execute,
}

impl SoftwareDescriptor {
    pub fn installer_path(&self, installers_dir: &Path) -> PathBuf {
        installers_dir.join(&self.installer_file_name)
    }

    pub fn target_path(&self, install_root: &Path) -> PathBuf {
        let target = Path::new(&self.default_install_target_path);
        if target.is_absolute() {
            target.to_path_buf()
        } else {
            install_root.join(target)
        }
    }

    fn is_zip(&self) -> bool {
        self.installer_file_name.to_lowercase().ends_with(".zip")
    }

    pub fn method(&self) -> InstallMethod {
        if self.command_template == EXTRACT_ZIP || (self.requires_extraction && self.is_zip()) {
            InstallMethod::Extract
        } else if self.is_zip() {
            InstallMethod::ManualExtraction
        } else {
            InstallMethod::Execute
        }
    }
}

/// Terminal state of one descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InstallStatus {
    Installed,
    AlreadyPresent,
    RequiresManualAction,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallationOutcome {
    pub name: String,
    pub status: InstallStatus,
    pub exit_code: Option<i32>,
    pub location: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: u64,
}

impl InstallationOutcome {
    pub fn installed(name: &str, location: &Path, exit_code: Option<i32>, duration_ms: u64) -> Self {
        Self {
            name: name.to_string(),
            status: InstallStatus::Installed,
            exit_code,
            location: Some(location.display().to_string()),
            error_message: None,
            duration_ms,
        }
    }

    pub fn already_present(name: &str, location: &Path, duration_ms: u64) -> Self {
        Self {
            name: name.to_string(),
            status: InstallStatus::AlreadyPresent,
            exit_code: None,
            location: Some(location.display().to_string()),
            error_message: None,
            duration_ms,
        }
    }

    pub fn manual_action(name: &str, installer: &Path, duration_ms: u64) -> Self {
        Self {
            name: name.to_string(),
            status: InstallStatus::RequiresManualAction,
            exit_code: None,
            location: Some(installer.display().to_string()),
            error_message: Some("ZIP file requires manual extraction".to_string()),
            duration_ms,
        }
    }

    pub fn failed(name: &str, error: &InstallError, duration_ms: u64) -> Self {
        Self {
            name: name.to_string(),
            status: InstallStatus::Failed,
            exit_code: error.exit_code(),
            location: None,
            error_message: Some(error.to_string()),
            duration_ms,
        }
    }

    /// Installed, or handed over for manual extraction
    pub fn success(&self) -> bool {
        matches!(
            self.status,
            InstallStatus::Installed | InstallStatus::RequiresManualAction
        )
    }

    pub fn already_installed(&self) -> bool {
        self.status == InstallStatus::AlreadyPresent
    }
}

/// One user-initiated request, fully populated before it is handed back
#[derive(Debug, Clone)]
pub struct InstallationBatch {
    pub log_id: Uuid,
    pub log_path: PathBuf,
    pub software: Vec<SoftwareDescriptor>,
    pub results: Vec<InstallationOutcome>,
}

impl InstallationBatch {
    pub fn new(log_id: Uuid, log_path: PathBuf, software: Vec<SoftwareDescriptor>) -> Self {
        let capacity = software.len();
        Self {
            log_id,
            log_path,
            software,
            results: Vec::with_capacity(capacity),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success()).count()
    }

    pub fn already_present(&self) -> usize {
        self.results.iter().filter(|r| r.already_installed()).count()
    }

    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == InstallStatus::Failed)
            .count()
    }
}

/// Top-level response of `install_software`
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum InstallResponse {
    #[serde(rename_all = "camelCase")]
    Completed {
        success: bool,
        results: Vec<InstallationOutcome>,
        log_path: PathBuf,
    },
    Failed {
        success: bool,
        error: String,
    },
}

impl InstallResponse {
    pub fn completed(batch: InstallationBatch) -> Self {
        Self::Completed {
            success: true,
            results: batch.results,
            log_path: batch.log_path,
        }
    }

    pub fn failed(error: impl std::fmt::Display) -> Self {
        Self::Failed {
            success: false,
            error: error.to_string(),
        }
    }
}
