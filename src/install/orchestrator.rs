//! Batch installation pipeline
//!
//! Descriptors run strictly one after another. Each goes through
//! probe, privilege check, installer lookup, then extraction or execution,
//! then best-effort configuration. A failing descriptor never stops the batch
//! and the result list always matches the input in length and order.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::InstallError;
use crate::logs::LogStore;

use super::command;
use super::descriptor::{
    InstallMethod, InstallResponse, InstallationBatch, InstallationOutcome, SoftwareDescriptor,
};
use super::detection::{self, InstallationState};
use super::extract::ArchiveExtractor;
use super::lock::InstallRootLock;
use super::logger::BatchLogger;
use super::platform::PlatformServices;
use super::post_install::{ConfigureContext, StrategyRegistry};
use super::progress::{ProgressEvent, ProgressSink, ProgressStatus};
use super::runner::RunRequest;
use super::settings::InstallSettings;

/// Where a descriptor currently is in its pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    PendingProbe,
    PendingPrivilegeCheck,
    LocatingInstaller,
    Extracting,
    Executing,
    Configuring,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::PendingProbe => "installation probe",
            Self::PendingPrivilegeCheck => "privilege check",
            Self::LocatingInstaller => "installer lookup",
            Self::Extracting => "extraction",
            Self::Executing => "installer execution",
            Self::Configuring => "configuration",
        };
        f.write_str(label)
    }
}

/// Per-descriptor state shared by the pipeline steps
struct Job<'a> {
    descriptor: &'a SoftwareDescriptor,
    logger: &'a BatchLogger,
    sink: &'a ProgressSink,
    cancel: &'a CancellationToken,
    started: Instant,
    stage: Stage,
}

impl Job<'_> {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn report(&self, status: ProgressStatus, message: &str, percent: u8) {
        self.sink
            .progress(ProgressEvent::new(self.name(), status, message).with_progress(percent));
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

pub struct Orchestrator {
    settings: Arc<InstallSettings>,
    services: Arc<dyn PlatformServices>,
    strategies: StrategyRegistry,
}

impl Orchestrator {
    pub fn new(settings: InstallSettings, services: Arc<dyn PlatformServices>) -> Self {
        Self {
            settings: Arc::new(settings),
            services,
            strategies: StrategyRegistry::with_defaults(),
        }
    }

    pub fn with_strategies(mut self, strategies: StrategyRegistry) -> Self {
        self.strategies = strategies;
        self
    }

    /// Never fails: batch construction errors become the `success: false` shape
    pub async fn install_software(
        &self,
        software: Vec<SoftwareDescriptor>,
        sink: ProgressSink,
        cancel: CancellationToken,
    ) -> InstallResponse {
        match self.run_batch(software, sink, cancel).await {
            Ok(batch) => InstallResponse::completed(batch),
            Err(e) => {
                error!("Installation batch could not start: {e:#}");
                InstallResponse::failed(format!("{e:#}"))
            }
        }
    }

    pub async fn run_batch(
        &self,
        software: Vec<SoftwareDescriptor>,
        sink: ProgressSink,
        cancel: CancellationToken,
    ) -> Result<InstallationBatch> {
        let lock = InstallRootLock::acquire(&self.settings.install_root)?;

        if self.settings.log_retention > 0 {
            let keep = self.settings.log_retention.saturating_sub(1);
            match LogStore::new(self.settings.log_dir.clone()).prune(keep).await {
                Ok(0) => {}
                Ok(removed) => info!("Pruned {removed} old batch log(s)"),
                Err(e) => warn!("Log retention pruning failed: {e:#}"),
            }
        }

        let logger = BatchLogger::create(&self.settings.log_dir, Uuid::new_v4()).await?;
        let mut batch = InstallationBatch::new(logger.log_id(), logger.path().to_path_buf(), software);
        info!(
            "Installing {} package(s), log: {}",
            batch.software.len(),
            batch.log_path.display()
        );
        logger
            .append(format!("=== BATCH START: {} package(s) ===", batch.software.len()))
            .await;
        logger
            .append(format!("Install root lock: {}", lock.path().display()))
            .await;

        for descriptor in &batch.software {
            let outcome = if cancel.is_cancelled() {
                logger
                    .append(format!("Skipped {}: batch cancelled", descriptor.name))
                    .await;
                InstallationOutcome::failed(&descriptor.name, &InstallError::Cancelled, 0)
            } else {
                self.install_one(descriptor, &logger, &sink, &cancel).await
            };
            batch.results.push(outcome);
        }

        let summary = format!(
            "=== BATCH END: {} succeeded, {} already present, {} failed ===",
            batch.succeeded(),
            batch.already_present(),
            batch.failed()
        );
        logger.append(&summary).await;
        info!("{summary}");

        Ok(batch)
    }

    async fn install_one(
        &self,
        descriptor: &SoftwareDescriptor,
        logger: &BatchLogger,
        sink: &ProgressSink,
        cancel: &CancellationToken,
    ) -> InstallationOutcome {
        let mut job = Job {
            descriptor,
            logger,
            sink,
            cancel,
            started: Instant::now(),
            stage: Stage::PendingProbe,
        };

        logger.append("=== INSTALLATION START ===").await;
        logger.append(format!("Software: {}", descriptor.name)).await;
        job.report(ProgressStatus::Starting, "Starting installation...", 0);

        match self.run_pipeline(&mut job).await {
            Ok(outcome) => outcome,
            Err(err) => {
                logger
                    .append(format!("ERROR during {}: {err}", job.stage))
                    .await;
                logger.append("=== INSTALLATION FAILED ===").await;
                warn!("[{}] {} failed: {err}", descriptor.name, job.stage);

                let status = match err {
                    InstallError::Spawn(_) | InstallError::Io(_) | InstallError::System(_) => {
                        ProgressStatus::Error
                    }
                    _ => ProgressStatus::Failed,
                };
                if err.is_preflight() {
                    logger.append("No installer process was started").await;
                }
                job.report(status, &err.to_string(), 0);
                InstallationOutcome::failed(&descriptor.name, &err, job.elapsed_ms())
            }
        }
    }

    async fn run_pipeline(&self, job: &mut Job<'_>) -> Result<InstallationOutcome, InstallError> {
        let descriptor = job.descriptor;
        let logger = job.logger;
        let target = descriptor.target_path(&self.settings.install_root);

        job.stage = Stage::PendingProbe;
        if let InstallationState::Installed { location } =
            detection::check_already_installed(&target).await
        {
            let location = location.display().to_string();
            logger
                .append(format!("{} is already installed at {location}", descriptor.name))
                .await;
            logger.append("=== INSTALLATION SKIPPED ===").await;
            job.sink.already_installed(&descriptor.name, &location);
            job.report(ProgressStatus::Completed, "Already installed", 100);
            return Ok(InstallationOutcome::already_present(
                &descriptor.name,
                &target,
                job.elapsed_ms(),
            ));
        }

        job.stage = Stage::PendingPrivilegeCheck;
        if !self.services.has_elevated_privileges().await {
            return Err(InstallError::InsufficientPrivileges(descriptor.name.clone()));
        }

        job.stage = Stage::LocatingInstaller;
        let installer = descriptor.installer_path(&self.settings.installers_dir);
        let size = match tokio::fs::metadata(&installer).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return Err(InstallError::InstallerNotFound(installer)),
        };
        logger.append(format!("Installer path: {}", installer.display())).await;
        logger
            .append(format!("Installer size: {:.2} MB", size as f64 / (1024.0 * 1024.0)))
            .await;
        logger
            .append(format!("Command template: {}", descriptor.command_template))
            .await;
        logger.append(format!("Target path: {}", target.display())).await;

        let request = RunRequest::new(&descriptor.name, String::new(), logger.clone())
            .timeout(self.settings.timeout_for(descriptor.timeout_secs))
            .cancel(job.cancel.clone())
            .sink(job.sink.clone())
            .progress_every(self.settings.progress_every);

        let exit_code = match descriptor.method() {
            InstallMethod::ManualExtraction => {
                logger
                    .append(format!(
                        "{} is a ZIP archive without an extraction template; extract it manually into {}",
                        installer.display(),
                        target.display()
                    ))
                    .await;
                logger.append("=== MANUAL ACTION REQUIRED ===").await;
                job.report(ProgressStatus::Completed, "ZIP file ready for manual extraction", 100);
                return Ok(InstallationOutcome::manual_action(
                    &descriptor.name,
                    &installer,
                    job.elapsed_ms(),
                ));
            }
            InstallMethod::Extract => {
                job.stage = Stage::Extracting;
                job.report(ProgressStatus::Extracting, "Extracting files...", 20);
                ArchiveExtractor::extract(
                    self.services.as_ref(),
                    &installer,
                    &target,
                    request.log_prefix("EXTRACT "),
                )
                .await?;
                logger.append("=== EXTRACTION SUCCESS ===").await;
                Some(0)
            }
            InstallMethod::Execute => {
                job.stage = Stage::Executing;
                let command_line = command::resolve(&descriptor.command_template, &installer, &target);
                logger.append(format!("Final command: {command_line}")).await;
                job.report(ProgressStatus::Installing, "Running installer...", 50);

                let output = self
                    .services
                    .run_silent_install(RunRequest {
                        command: command_line,
                        ..request
                    })
                    .await?;
                logger
                    .append(format!(
                        "Process exited with code {:?} in {}ms",
                        output.exit_code, output.duration_ms
                    ))
                    .await;
                if !output.success() {
                    return Err(InstallError::NonZeroExit(output.exit_code.unwrap_or(-1)));
                }
                logger.append("=== INSTALLATION SUCCESS ===").await;
                output.exit_code
            }
        };

        job.stage = Stage::Configuring;
        job.report(ProgressStatus::Configuring, "Configuring...", 95);
        self.configure(job, &target).await;

        logger.append("=== INSTALLATION END ===").await;
        job.report(
            ProgressStatus::Completed,
            "Installation completed successfully!",
            100,
        );
        Ok(InstallationOutcome::installed(
            &descriptor.name,
            &target,
            exit_code,
            job.elapsed_ms(),
        ))
    }

    /// Failures are downgraded to warnings in the batch log
    async fn configure(&self, job: &Job<'_>, target: &std::path::Path) {
        let descriptor = job.descriptor;
        let strategy = self.strategies.get(descriptor.product);
        job.logger
            .append(format!(
                "Post-install configuration ({}) for {}",
                descriptor.product.as_str(),
                descriptor.name
            ))
            .await;

        let ctx = ConfigureContext {
            name: descriptor.name.clone(),
            install_path: target.to_path_buf(),
            logger: job.logger.clone(),
            sink: job.sink.clone(),
            services: Arc::clone(&self.services),
            cancel: job.cancel.clone(),
            settings: Arc::clone(&self.settings),
        };

        if let Err(e) = strategy.configure(ctx).await {
            job.logger
                .warn(format!(
                    "Post-install configuration for {} failed: {e:#}",
                    descriptor.name
                ))
                .await;
        }
    }
}
