//! Error taxonomy for per-package installation
//!
//! Every variant here is recorded on a single package outcome. None of them
//! ever crosses the batch boundary: the orchestrator converts each one into a
//! `Failed` outcome and moves on to the next package.

use std::path::PathBuf;

use thiserror::Error;

use crate::install::runner::RunError;

#[derive(Debug, Error)]
pub enum InstallError {
    /// Installer file missing from the installers directory (preflight)
    #[error("Installer not found: {}", .0.display())]
    InstallerNotFound(PathBuf),

    /// Host process is not elevated (preflight)
    #[error("Administrator privileges are required to install {0}")]
    InsufficientPrivileges(String),

    /// Installer ran but exited with a failure code
    #[error("Installation failed (exit code: {0})")]
    NonZeroExit(i32),

    /// The OS could not launch the installer at all
    #[error("Failed to launch installer: {0}")]
    Spawn(String),

    #[error("Installer did not finish within {0} seconds and was terminated")]
    TimedOut(u64),

    #[error("Installation cancelled")]
    Cancelled,

    #[error("Extraction failed with exit code {0}")]
    ExtractionFailed(i32),

    /// Archive tool reported success but left the target empty
    #[error("Extraction produced no files in {}", .0.display())]
    EmptyExtraction(PathBuf),

    /// Another batch holds the install root
    #[error("Install root is locked by another run: {}", .0.display())]
    Locked(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    System(String),
}

impl InstallError {
    /// Exit code to record on the outcome, if the failure carries one
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::NonZeroExit(code) | Self::ExtractionFailed(code) => Some(*code),
            _ => None,
        }
    }

    /// Failures caught before any process was spawned
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            Self::InstallerNotFound(_) | Self::InsufficientPrivileges(_)
        )
    }
}

impl From<RunError> for InstallError {
    fn from(err: RunError) -> Self {
        match err {
            RunError::Spawn { command, source } => Self::Spawn(format!("{command}: {source}")),
            RunError::TimedOut(after) => Self::TimedOut(after.as_secs()),
            RunError::Cancelled => Self::Cancelled,
            RunError::Io(e) => Self::Io(e),
            RunError::Archive(msg) => Self::System(msg),
        }
    }
}
