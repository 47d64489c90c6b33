//! Silent batch installation
//!
//! [`Orchestrator::install_software`] is the entry point a host calls with a
//! list of [`SoftwareDescriptor`]s. Every OS interaction goes through
//! [`PlatformServices`], so hosts and tests can swap the implementation.

pub mod async_task;
pub mod command;
pub mod descriptor;
pub mod detection;
pub mod extract;
pub mod lock;
pub mod logger;
pub mod orchestrator;
pub mod platform;
pub mod post_install;
pub mod privilege;
pub mod progress;
pub mod runner;
pub mod settings;

pub use async_task::AsyncTask;
pub use descriptor::{
    EXTRACT_ZIP, InstallMethod, InstallResponse, InstallStatus, InstallationBatch, InstallationOutcome,
    ProductKind, SoftwareDescriptor,
};
pub use detection::{InstallationState, check_already_installed};
pub use lock::InstallRootLock;
pub use logger::BatchLogger;
pub use orchestrator::Orchestrator;
pub use platform::{NativePlatform, PlatformServices};
pub use post_install::{ConfigureContext, PostInstallStrategy, StrategyRegistry};
pub use progress::{InstallEvent, ProgressEvent, ProgressSink, ProgressStatus};
pub use runner::{ProcessOutput, ProcessRunner, RunError, RunRequest};
pub use settings::{DatabaseSettings, InstallSettings, WebServerSettings};
