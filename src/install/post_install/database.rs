//! Database servers whose zip wraps a vendor installer (Oracle XE)
//!
//! Extraction only unpacks the vendor's `setup.exe`. This strategy writes a
//! response file, runs the real installer unattended with the long database
//! timeout, then checks readiness from four angles. The connection reference
//! is logged whatever the readiness result.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use walkdir::WalkDir;

use super::{ConfigureContext, PostInstallStrategy};
use crate::install::async_task::AsyncTask;
use crate::install::progress::ProgressStatus;
use crate::install::runner::RunRequest;
use crate::install::settings::DatabaseSettings;

const RESPONSE_FILE: &str = "XEInstall.rsp";
const VENDOR_LOG: &str = "XEInstall.log";
const SERVICE_NAME: &str = "OracleServiceXE";
const PLUGGABLE_DB: &str = "XEPDB1";
const EM_EXPRESS_PORT: u16 = 5550;
const CHECK_TIMEOUT: Duration = Duration::from_secs(60);
const SETUP_SEARCH_DEPTH: usize = 4;

pub struct DatabaseServerStrategy;

impl PostInstallStrategy for DatabaseServerStrategy {
    fn configure(&self, ctx: ConfigureContext) -> AsyncTask<Result<()>> {
        AsyncTask::from_future(configure(ctx))
    }
}

async fn configure(ctx: ConfigureContext) -> Result<()> {
    let settings = ctx.settings.database.clone();

    let setup = find_setup(&ctx.install_path)
        .await
        .ok_or_else(|| anyhow!("No setup.exe found under {}", ctx.install_path.display()))?;
    let setup_dir = setup
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| ctx.install_path.clone());
    ctx.log(format!("Vendor installer: {}", setup.display())).await;

    let oracle_home = ctx.install_path.join("oraclexe");
    let rsp = setup_dir.join(RESPONSE_FILE);
    tokio::fs::write(&rsp, response_file(&oracle_home, &settings))
        .await
        .with_context(|| format!("Failed to write response file {}", rsp.display()))?;
    ctx.log(format!("Wrote response file {}", rsp.display())).await;

    let command = silent_install_command(&setup, &rsp, &setup_dir.join(VENDOR_LOG));
    ctx.log(format!("Database install command: {command}")).await;
    ctx.report(
        ProgressStatus::Installing,
        "Installing database server (this can take a long time)...",
    );

    let request = RunRequest::new(&ctx.name, command, ctx.logger.clone())
        .timeout(crate::install::settings::timeout_from_secs(settings.install_timeout_secs))
        .cancel(ctx.cancel.clone())
        .sink(ctx.sink.clone())
        .progress_every(ctx.settings.progress_every)
        .working_dir(&setup_dir)
        .log_prefix("DB SETUP ");
    let output = ctx.services.run_silent_install(request).await;
    // the response file holds the admin password in clear text
    match tokio::fs::remove_file(&rsp).await {
        Ok(()) => ctx.log(format!("Removed response file {}", rsp.display())).await,
        Err(e) => {
            ctx.logger
                .warn(format!("Could not remove response file {}: {e}", rsp.display()))
                .await
        }
    }
    let output = output?;
    ctx.log(format!(
        "Database installer finished with exit code {:?} in {}ms",
        output.exit_code, output.duration_ms
    ))
    .await;
    if !output.success() {
        bail!(
            "Database installer failed (exit code {:?}); see {}",
            output.exit_code,
            setup_dir.join(VENDOR_LOG).display()
        );
    }

    ctx.report(ProgressStatus::Testing, "Checking database readiness...");
    let passed = readiness_checks(&ctx, &settings).await;
    ctx.log(format!("Readiness: {passed}/4 checks passed")).await;
    if passed < 4 {
        ctx.logger
            .warn("Database may need a reboot or a manual service start before it accepts connections")
            .await;
    }

    for line in connection_reference(&settings).lines() {
        ctx.log(line).await;
    }
    Ok(())
}

async fn find_setup(root: &Path) -> Option<PathBuf> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || {
        WalkDir::new(&root)
            .max_depth(SETUP_SEARCH_DEPTH)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .find(|e| {
                e.file_type().is_file() && e.file_name().to_string_lossy().eq_ignore_ascii_case("setup.exe")
            })
            .map(|e| e.into_path())
    })
    .await
    .ok()
    .flatten()
}

fn response_file(oracle_home: &Path, settings: &DatabaseSettings) -> String {
    format!(
        "INSTALLDIR={}\\\r\nPASSWORD={}\r\nLISTENER_PORT={}\r\nEMEXPRESS_PORT={}\r\nCHAR_SET=AL32UTF8\r\nDB_DOMAIN=\r\n",
        oracle_home.display(),
        settings.admin_password,
        settings.listener_port,
        EM_EXPRESS_PORT
    )
}

fn silent_install_command(setup: &Path, rsp: &Path, vendor_log: &Path) -> String {
    format!(
        "\"{}\" /s /v\"RSP_FILE={}\" /v\"/L*v {}\" /v\"/qn\"",
        setup.display(),
        rsp.display(),
        vendor_log.display()
    )
}

/// Runs every check, logs each verdict, returns how many passed
async fn readiness_checks(ctx: &ConfigureContext, settings: &DatabaseSettings) -> usize {
    let mut passed = 0;

    let service = run_check(ctx, format!("sc query {SERVICE_NAME}")).await;
    let service_ok = service.as_deref().is_some_and(|out| out.contains("RUNNING"));
    if !service_ok {
        // older hosts only list running services through net start
        let started = run_check(ctx, "net start".to_string()).await;
        if started.as_deref().is_some_and(|out| out.contains(SERVICE_NAME)) {
            passed += 1;
            ctx.log(format!("[ok] {SERVICE_NAME} is running")).await;
        } else {
            ctx.log(format!("[--] {SERVICE_NAME} is not running")).await;
        }
    } else {
        passed += 1;
        ctx.log(format!("[ok] {SERVICE_NAME} is running")).await;
    }

    let netstat = run_check(ctx, "netstat -an".to_string()).await;
    if netstat
        .as_deref()
        .is_some_and(|out| port_listening(out, settings.listener_port))
    {
        passed += 1;
        ctx.log(format!("[ok] Listener on port {}", settings.listener_port)).await;
    } else {
        ctx.log(format!("[--] Nothing listening on port {}", settings.listener_port)).await;
    }

    match which::which("sqlplus") {
        Ok(sqlplus) => {
            let version = run_check(ctx, format!("\"{}\" -v", sqlplus.display())).await;
            match version {
                Some(v) => {
                    passed += 1;
                    ctx.log(format!("[ok] SQL*Plus: {}", v.trim())).await;
                }
                None => ctx.log("[--] SQL*Plus found but did not run").await,
            }
        }
        Err(_) => ctx.log("[--] SQL*Plus not on PATH (open a new shell after install)").await,
    }

    match std::env::var("ORACLE_HOME") {
        Ok(home) if !home.is_empty() => {
            passed += 1;
            ctx.log(format!("[ok] ORACLE_HOME={home}")).await;
        }
        _ => ctx.log("[--] ORACLE_HOME not set in this session").await,
    }

    passed
}

/// Stdout of a successful check command
async fn run_check(ctx: &ConfigureContext, command: String) -> Option<String> {
    let request = RunRequest::new(&ctx.name, command, ctx.logger.clone())
        .timeout(Some(CHECK_TIMEOUT))
        .cancel(ctx.cancel.clone())
        .log_prefix("CHECK ");
    match ctx.services.run_silent_install(request).await {
        Ok(output) if output.success() => Some(output.stdout),
        _ => None,
    }
}

fn port_listening(netstat: &str, port: u16) -> bool {
    let suffix = format!(":{port}");
    netstat.lines().any(|line| {
        let upper = line.to_uppercase();
        (upper.contains("LISTENING") || upper.contains("LISTEN"))
            && line
                .split_whitespace()
                .nth(1)
                .is_some_and(|local| local.ends_with(&suffix))
    })
}

fn connection_reference(settings: &DatabaseSettings) -> String {
    let port = settings.listener_port;
    format!(
        "\
=== DATABASE CONNECTION REFERENCE ===
Administrative accounts: SYS (as SYSDBA), SYSTEM, PDBADMIN
Password: the admin_password from the [database] config section
Container database: XE    Pluggable database: {PLUGGABLE_DB}
SQL*Plus:   sqlplus system@//localhost:{port}/{PLUGGABLE_DB}
            sqlplus sys@//localhost:{port}/XE as sysdba
JDBC:       jdbc:oracle:thin:@//localhost:{port}/{PLUGGABLE_DB}
Python:     oracledb.connect(user=\"system\", password=..., dsn=\"localhost:{port}/{PLUGGABLE_DB}\")
Node.js:    oracledb.getConnection({{ user: \"system\", password: ..., connectString: \"localhost:{port}/{PLUGGABLE_DB}\" }})
.NET:       Data Source=localhost:{port}/{PLUGGABLE_DB};User Id=system;Password=...;
EM Express: https://localhost:{EM_EXPRESS_PORT}/em
Security:   change the default admin password before any network exposure
            and keep port {port} closed in the firewall unless remote clients need it
=== END CONNECTION REFERENCE ==="
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_command_passes_the_response_file() {
        let cmd = silent_install_command(
            Path::new(r"C:\apps\oracle\setup.exe"),
            Path::new(r"C:\apps\oracle\XEInstall.rsp"),
            Path::new(r"C:\apps\oracle\XEInstall.log"),
        );
        assert_eq!(
            cmd,
            r#""C:\apps\oracle\setup.exe" /s /v"RSP_FILE=C:\apps\oracle\XEInstall.rsp" /v"/L*v C:\apps\oracle\XEInstall.log" /v"/qn""#
        );
    }

    #[test]
    fn response_file_carries_configured_values() {
        let settings = DatabaseSettings {
            listener_port: 1522,
            admin_password: "S3cret".into(),
            ..DatabaseSettings::default()
        };
        let rsp = response_file(Path::new(r"C:\apps\oraclexe"), &settings);
        assert!(rsp.starts_with("INSTALLDIR=C:\\apps\\oraclexe\\\r\n"));
        assert!(rsp.contains("PASSWORD=S3cret\r\n"));
        assert!(rsp.contains("LISTENER_PORT=1522\r\n"));
    }

    #[test]
    fn netstat_listener_detection() {
        let out = "\
  Proto  Local Address          Foreign Address        State
  TCP    0.0.0.0:135            0.0.0.0:0              LISTENING
  TCP    0.0.0.0:1521           0.0.0.0:0              LISTENING
  TCP    10.0.0.5:51521         10.0.0.9:443           ESTABLISHED";
        assert!(port_listening(out, 1521));
        assert!(!port_listening(out, 5550));
        assert!(!port_listening(out, 443));
    }

    #[test]
    fn reference_block_never_prints_the_password() {
        let settings = DatabaseSettings::default();
        let block = connection_reference(&settings);
        assert!(block.contains("jdbc:oracle:thin:@//localhost:1521/XEPDB1"));
        assert!(!block.contains(&settings.admin_password));
    }

    mod configure {
        use std::sync::Arc;

        use super::super::*;
        use crate::install::post_install::test_support::{FakeServices, batch_log, context, settings};
        use crate::install::settings::InstallSettings;

        const SECRET: &str = "Xyzzy-Secret-77";

        fn db_settings(root: &Path) -> InstallSettings {
            let mut settings = settings(root);
            settings.database.admin_password = SECRET.to_string();
            settings
        }

        fn vendor_setup(root: &Path) -> PathBuf {
            let disk = root.join("install").join("Disk1");
            std::fs::create_dir_all(&disk).unwrap();
            std::fs::write(disk.join("setup.exe"), "").unwrap();
            disk
        }

        #[tokio::test]
        async fn reference_is_logged_when_readiness_is_partial() {
            let dir = tempfile::tempdir().unwrap();
            let disk = vendor_setup(dir.path());
            // the vendor installer succeeds, every readiness check fails
            let services = Arc::new(
                FakeServices::new().exit_codes(|cmd| if cmd.contains("setup.exe") { 0 } else { 1 }),
            );
            let ctx = context(dir.path(), services.clone(), db_settings(dir.path()));

            DatabaseServerStrategy.configure(ctx.clone()).await.unwrap();

            let log = batch_log(&ctx);
            assert!(log.contains("Database may need a reboot"));
            assert!(log.contains("=== DATABASE CONNECTION REFERENCE ==="));
            assert!(log.contains("jdbc:oracle:thin:@//localhost:1521/XEPDB1"));
            assert!(!log.contains(SECRET));
            assert!(!disk.join(RESPONSE_FILE).exists());
            assert!(services.commands()[0].contains("RSP_FILE="));
        }

        #[tokio::test]
        async fn failed_vendor_install_still_removes_the_response_file() {
            let dir = tempfile::tempdir().unwrap();
            let disk = vendor_setup(dir.path());
            let services = Arc::new(FakeServices::new().exit_codes(|_| 1603));
            let ctx = context(dir.path(), services.clone(), db_settings(dir.path()));

            let err = DatabaseServerStrategy.configure(ctx.clone()).await.unwrap_err();
            assert!(err.to_string().contains("exit code Some(1603)"));
            assert!(!disk.join(RESPONSE_FILE).exists());
            assert_eq!(services.commands().len(), 1);
            assert!(!batch_log(&ctx).contains("CONNECTION REFERENCE"));
        }
    }

    #[tokio::test]
    async fn setup_is_found_in_nested_disk_folder() {
        let dir = tempfile::tempdir().unwrap();
        let disk = dir.path().join("OracleXE213_Win64").join("Disk1");
        std::fs::create_dir_all(&disk).unwrap();
        std::fs::write(disk.join("Setup.EXE"), "").unwrap();
        assert_eq!(find_setup(dir.path()).await.unwrap(), disk.join("Setup.EXE"));
    }
}
