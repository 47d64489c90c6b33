//! OS touchpoints behind one interface
//!
//! The orchestrator and the post-install strategies only talk to
//! [`PlatformServices`]. [`NativePlatform`] is the real implementation;
//! tests substitute their own.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result, anyhow};
use log::{debug, info, warn};

use super::async_task::AsyncTask;
use super::privilege;
use super::runner::{ProcessOutput, ProcessRunner, RunError, RunRequest};

pub trait PlatformServices: Send + Sync {
    /// Fail-closed administrator check
    fn has_elevated_privileges(&self) -> AsyncTask<bool>;

    /// Expand `archive` into `target`, overwriting existing files
    fn extract_archive(
        &self,
        archive: &Path,
        target: &Path,
        request: RunRequest,
    ) -> AsyncTask<Result<ProcessOutput, RunError>>;

    /// Open `url` in the default browser
    fn open_url(&self, url: &str) -> AsyncTask<Result<()>>;

    /// Give everyone full control over `path` and everything below it
    fn grant_full_access(&self, path: &Path) -> AsyncTask<Result<()>>;

    /// Run an installer (or any command line) to completion
    fn run_silent_install(&self, request: RunRequest) -> AsyncTask<Result<ProcessOutput, RunError>>;

    /// Start a long-running program without waiting for it
    fn spawn_detached(&self, program: &Path, args: &[String], cwd: &Path) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NativePlatform;

impl PlatformServices for NativePlatform {
    fn has_elevated_privileges(&self) -> AsyncTask<bool> {
        AsyncTask::from_future(async {
            tokio::task::spawn_blocking(privilege::has_elevated_privileges)
                .await
                .unwrap_or(false)
        })
    }

    fn extract_archive(
        &self,
        archive: &Path,
        target: &Path,
        request: RunRequest,
    ) -> AsyncTask<Result<ProcessOutput, RunError>> {
        let archive = archive.to_path_buf();
        let target = target.to_path_buf();
        AsyncTask::from_future(extract_native(archive, target, request))
    }

    fn open_url(&self, url: &str) -> AsyncTask<Result<()>> {
        let url = url.to_string();
        AsyncTask::from_future(async move {
            tokio::task::spawn_blocking(move || open_url_with_fallbacks(&url))
                .await
                .context("Browser launcher task failed")?
        })
    }

    fn grant_full_access(&self, path: &Path) -> AsyncTask<Result<()>> {
        let path = path.to_path_buf();
        AsyncTask::from_future(async move { grant_full_access_native(&path).await })
    }

    fn run_silent_install(&self, request: RunRequest) -> AsyncTask<Result<ProcessOutput, RunError>> {
        AsyncTask::from_future(ProcessRunner::run(request))
    }

    fn spawn_detached(&self, program: &Path, args: &[String], cwd: &Path) -> Result<()> {
        let mut cmd = std::process::Command::new(program);
        cmd.args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const DETACHED_PROCESS: u32 = 0x0000_0008;
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(DETACHED_PROCESS | CREATE_NO_WINDOW);
        }

        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to start {}", program.display()))?;
        debug!("started {} in background (pid {})", program.display(), child.id());
        Ok(())
    }
}

/// Windows ships Expand-Archive; everywhere else the zip crate does the work
#[cfg(windows)]
async fn extract_native(
    archive: PathBuf,
    target: PathBuf,
    request: RunRequest,
) -> Result<ProcessOutput, RunError> {
    let command = expand_archive_command(&archive, &target);
    request
        .logger
        .append(format!("Extraction command: {command}"))
        .await;
    let request = RunRequest {
        command,
        ..request
    };
    ProcessRunner::run(request).await
}

/// `-LiteralPath` keeps `[` and `]` in archive names from acting as wildcards
#[cfg_attr(not(windows), allow(dead_code))]
fn expand_archive_command(archive: &Path, target: &Path) -> String {
    format!(
        "powershell -NoProfile -NonInteractive -Command \"Expand-Archive -LiteralPath '{}' -DestinationPath '{}' -Force\"",
        powershell_literal(archive),
        powershell_literal(target)
    )
}

#[cfg_attr(not(windows), allow(dead_code))]
fn powershell_literal(path: &Path) -> String {
    path.display().to_string().replace('\'', "''")
}

#[cfg(not(windows))]
async fn extract_native(
    archive: PathBuf,
    target: PathBuf,
    request: RunRequest,
) -> Result<ProcessOutput, RunError> {
    let started = std::time::Instant::now();
    request
        .logger
        .append(format!(
            "Extracting {} to {} with the built-in zip reader",
            archive.display(),
            target.display()
        ))
        .await;

    let extracted = tokio::task::spawn_blocking(move || -> Result<usize, RunError> {
        let file = std::fs::File::open(&archive)?;
        let mut zip = zip::ZipArchive::new(file).map_err(|e| RunError::Archive(e.to_string()))?;
        let entries = zip.len();
        zip.extract(&target)
            .map_err(|e| RunError::Archive(e.to_string()))?;
        Ok(entries)
    })
    .await
    .map_err(|e| RunError::Archive(format!("extraction task failed: {e}")))?;

    match extracted {
        Ok(entries) => Ok(ProcessOutput {
            exit_code: Some(0),
            stdout: format!("{entries} entries"),
            stderr: String::new(),
            duration_ms: started.elapsed().as_millis() as u64,
        }),
        Err(RunError::Archive(msg)) => {
            request
                .logger
                .append(format!("EXTRACT STDERR: {msg}"))
                .await;
            Ok(ProcessOutput {
                exit_code: Some(1),
                stdout: String::new(),
                stderr: msg,
                duration_ms: started.elapsed().as_millis() as u64,
            })
        }
        Err(e) => Err(e),
    }
}

/// One way of opening a URL, tried in order until one works
#[derive(Debug, Clone, PartialEq, Eq)]
enum UrlLauncher {
    ShellIntegration,
    Command { program: String, args: Vec<String> },
    Browser(PathBuf),
}

fn url_launchers(url: &str) -> Vec<UrlLauncher> {
    let mut launchers = vec![UrlLauncher::ShellIntegration];

    #[cfg(windows)]
    {
        launchers.push(UrlLauncher::Command {
            program: "cmd".into(),
            args: vec!["/C".into(), "start".into(), "\"\"".into(), url.to_string()],
        });
        launchers.push(UrlLauncher::Command {
            program: "rundll32".into(),
            args: vec!["url.dll,FileProtocolHandler".into(), url.to_string()],
        });
    }

    #[cfg(target_os = "macos")]
    launchers.push(UrlLauncher::Command {
        program: "open".into(),
        args: vec![url.to_string()],
    });

    #[cfg(all(unix, not(target_os = "macos")))]
    launchers.push(UrlLauncher::Command {
        program: "xdg-open".into(),
        args: vec![url.to_string()],
    });

    launchers.extend(browser_candidates().into_iter().map(UrlLauncher::Browser));
    launchers
}

fn browser_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    #[cfg(windows)]
    {
        for base in ["ProgramFiles", "ProgramFiles(x86)", "LOCALAPPDATA"] {
            if let Ok(root) = std::env::var(base) {
                let root = PathBuf::from(root);
                candidates.push(root.join(r"Microsoft\Edge\Application\msedge.exe"));
                candidates.push(root.join(r"Google\Chrome\Application\chrome.exe"));
                candidates.push(root.join(r"Mozilla Firefox\firefox.exe"));
            }
        }
    }

    for name in ["msedge", "google-chrome", "chrome", "chromium", "firefox"] {
        if let Ok(path) = which::which(name) {
            candidates.push(path);
        }
    }

    candidates.retain(|p| p.exists());
    candidates.dedup();
    candidates
}

fn open_url_with_fallbacks(url: &str) -> Result<()> {
    for launcher in url_launchers(url) {
        let attempt = match &launcher {
            UrlLauncher::ShellIntegration => opener::open(url).map_err(|e| anyhow!(e)),
            UrlLauncher::Command { program, args } => run_launcher(Path::new(program), args),
            UrlLauncher::Browser(path) => run_launcher(path, &[url.to_string()]),
        };

        match attempt {
            Ok(()) => {
                info!("Opened {url} via {launcher:?}");
                return Ok(());
            }
            Err(e) => debug!("Browser launcher {launcher:?} failed: {e}"),
        }
    }

    warn!("Could not open {url} in any browser");
    Err(anyhow!("all browser launch methods failed for {url}"))
}

fn run_launcher(program: &Path, args: &[String]) -> Result<()> {
    let status = std::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .with_context(|| format!("Failed to launch {}", program.display()))?;
    if status.success() {
        Ok(())
    } else {
        Err(anyhow!("{} exited with {status}", program.display()))
    }
}

#[cfg(windows)]
async fn grant_full_access_native(path: &Path) -> Result<()> {
    let output = tokio::process::Command::new("icacls")
        .arg(path)
        .args(["/grant", "Everyone:(OI)(CI)F", "/T", "/C", "/Q"])
        .output()
        .await
        .context("Failed to run icacls")?;
    if !output.status.success() {
        return Err(anyhow!(
            "icacls failed on {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(())
}

#[cfg(unix)]
async fn grant_full_access_native(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let root = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<()> {
        for entry in walkdir::WalkDir::new(&root) {
            let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
            let meta = entry.metadata()?;
            // a+rwX: execute only where it already makes sense
            let mode = if meta.is_dir() || meta.permissions().mode() & 0o111 != 0 {
                0o777
            } else {
                0o666
            };
            std::fs::set_permissions(entry.path(), std::fs::Permissions::from_mode(mode))
                .with_context(|| format!("Failed to set permissions on {}", entry.path().display()))?;
        }
        Ok(())
    })
    .await
    .context("Permission task failed")?
}

#[cfg(not(any(unix, windows)))]
async fn grant_full_access_native(path: &Path) -> Result<()> {
    Err(anyhow!(
        "ACL changes are not supported on this platform: {}",
        path.display()
    ))
}
