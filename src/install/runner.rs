//! Native process execution with streamed output
//!
//! Runs one command line through the platform shell, forwards every stdout
//! and stderr line to the batch log as it arrives, and emits a coarse
//! synthetic percentage every few stdout lines since silent installers report
//! no progress of their own. Single attempt, no retry.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use log::{debug, warn};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use super::logger::BatchLogger;
use super::progress::{ProgressEvent, ProgressSink, ProgressStatus};

/// Synthetic progress starts here and never passes `PROGRESS_CEILING`
const PROGRESS_FLOOR: u32 = 50;
const PROGRESS_CEILING: u32 = 90;
pub const DEFAULT_PROGRESS_EVERY: usize = 5;

#[derive(Debug, Error)]
pub enum RunError {
    /// The executable could not be launched at all
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("process timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
    #[error("process cancelled")]
    Cancelled,
    #[error("I/O error while running process: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive error: {0}")]
    Archive(String),
}

/// Result of a process that ran to completion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// One command line to run, with everything it reports to
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Package name attached to progress events
    pub label: String,
    pub command: String,
    pub working_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
    pub cancel: CancellationToken,
    pub logger: BatchLogger,
    pub sink: ProgressSink,
    pub progress_every: usize,
    /// Prepended to STDOUT/STDERR log lines, e.g. `EXTRACT `
    pub log_prefix: String,
}

impl RunRequest {
    pub fn new(label: &str, command: impl Into<String>, logger: BatchLogger) -> Self {
        Self {
            label: label.to_string(),
            command: command.into(),
            working_dir: None,
            timeout: None,
            cancel: CancellationToken::new(),
            logger,
            sink: ProgressSink::disabled(),
            progress_every: DEFAULT_PROGRESS_EVERY,
            log_prefix: String::new(),
        }
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn sink(mut self, sink: ProgressSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn progress_every(mut self, lines: usize) -> Self {
        self.progress_every = lines.max(1);
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn log_prefix(mut self, prefix: &str) -> Self {
        self.log_prefix = prefix.to_string();
        self
    }
}

/// Coarse percentage after `lines` stdout lines
pub fn synthetic_progress(lines: usize) -> u8 {
    let lines = u32::try_from(lines).unwrap_or(u32::MAX);
    PROGRESS_FLOOR
        .saturating_add(lines.saturating_mul(2))
        .min(PROGRESS_CEILING) as u8
}

/// Arguments handed to `cmd` for one resolved command line.
///
/// With `/S` and the whole line wrapped in one extra pair of quotes, cmd
/// strips exactly that outer pair and runs the rest verbatim, so lines that
/// quote both the installer and a target path survive intact.
#[cfg_attr(not(windows), allow(dead_code))]
fn cmd_arguments(command_line: &str) -> String {
    format!("/D /S /C \"{command_line}\"")
}

/// Wrap a command line for the platform shell
pub fn shell_command(command_line: &str) -> Command {
    #[cfg(windows)]
    {
        let mut cmd = Command::new("cmd");
        // cmd does its own parsing; keep the line exactly as resolved
        cmd.raw_arg(cmd_arguments(command_line));
        cmd
    }

    #[cfg(not(windows))]
    {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command_line);
        cmd
    }
}

pub struct ProcessRunner;

impl ProcessRunner {
    pub async fn run(request: RunRequest) -> Result<ProcessOutput, RunError> {
        let started = Instant::now();

        let mut cmd = shell_command(&request.command);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = request.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| RunError::Spawn {
            command: request.command.clone(),
            source,
        })?;
        debug!("spawned `{}` (pid {:?})", request.command, child.id());

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let timeout = request.timeout;
        let outcome = tokio::select! {
            res = drive(&mut child, stdout, stderr, &request) => Finished::Exited(res),
            _ = sleep_or_forever(timeout) => Finished::TimedOut,
            _ = request.cancel.cancelled() => Finished::Cancelled,
        };

        match outcome {
            Finished::Exited(res) => {
                let (exit_code, stdout, stderr) = res?;
                Ok(ProcessOutput {
                    exit_code,
                    stdout,
                    stderr,
                    duration_ms: elapsed_ms(started),
                })
            }
            Finished::TimedOut => {
                let after = timeout.unwrap_or_default();
                warn!("`{}` exceeded {}s, terminating", request.command, after.as_secs());
                request
                    .logger
                    .append(format!(
                        "{}Process exceeded {}s and was terminated",
                        request.log_prefix,
                        after.as_secs()
                    ))
                    .await;
                kill_tree(&mut child).await;
                Err(RunError::TimedOut(after))
            }
            Finished::Cancelled => {
                request
                    .logger
                    .append(format!("{}Process cancelled", request.log_prefix))
                    .await;
                kill_tree(&mut child).await;
                Err(RunError::Cancelled)
            }
        }
    }
}

enum Finished {
    Exited(Result<(Option<i32>, String, String), RunError>),
    TimedOut,
    Cancelled,
}

async fn drive(
    child: &mut Child,
    stdout: Option<tokio::process::ChildStdout>,
    stderr: Option<tokio::process::ChildStderr>,
    request: &RunRequest,
) -> Result<(Option<i32>, String, String), RunError> {
    let mut out_lines = stdout.map(BufReader::new);
    let mut err_lines = stderr.map(BufReader::new);
    let mut out_done = out_lines.is_none();
    let mut err_done = err_lines.is_none();
    let mut out_buf = Vec::new();
    let mut err_buf = Vec::new();

    let mut captured_out = String::new();
    let mut captured_err = String::new();
    let mut counter = 0usize;

    while !(out_done && err_done) {
        tokio::select! {
            line = next_line(&mut out_lines, &mut out_buf), if !out_done => match line {
                Some(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    push_line(&mut captured_out, line);
                    request
                        .logger
                        .append(format!("{}STDOUT: {line}", request.log_prefix))
                        .await;
                    counter += 1;
                    if counter % request.progress_every == 0 {
                        request.sink.progress(
                            ProgressEvent::new(
                                &request.label,
                                ProgressStatus::Installing,
                                "Installation in progress...",
                            )
                            .with_progress(synthetic_progress(counter)),
                        );
                    }
                }
                None => out_done = true,
            },
            line = next_line(&mut err_lines, &mut err_buf), if !err_done => match line {
                Some(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    push_line(&mut captured_err, line);
                    request
                        .logger
                        .append(format!("{}STDERR: {line}", request.log_prefix))
                        .await;
                }
                None => err_done = true,
            },
        }
    }

    let status = child.wait().await?;
    Ok((status.code(), captured_out, captured_err))
}

/// Next raw line, decoded lossily; `None` once the pipe is drained.
///
/// Console output in an OEM codepage is not UTF-8, so decoding never stops
/// the read loop. `buf` keeps a partial line across `select!` cancellations
/// and is only cleared once a full line has been taken out of it.
async fn next_line<R>(reader: &mut Option<BufReader<R>>, buf: &mut Vec<u8>) -> Option<String>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let reader = reader.as_mut()?;
    match reader.read_until(b'\n', buf).await {
        Ok(0) if buf.is_empty() => None,
        Ok(_) => {
            let line = String::from_utf8_lossy(buf).into_owned();
            buf.clear();
            Some(line)
        }
        Err(e) => {
            debug!("stopped reading process output: {e}");
            None
        }
    }
}

fn push_line(buf: &mut String, line: &str) {
    if !buf.is_empty() {
        buf.push('\n');
    }
    buf.push_str(line);
}

async fn sleep_or_forever(timeout: Option<Duration>) {
    match timeout {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending::<()>().await,
    }
}

/// Terminate the child and, on Windows, everything it started
async fn kill_tree(child: &mut Child) {
    #[cfg(windows)]
    if let Some(pid) = child.id() {
        let _ = Command::new("taskkill")
            .args(["/T", "/F", "/PID", &pid.to_string()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
    }

    if let Err(e) = child.kill().await {
        debug!("kill after termination request: {e}");
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod shell_tests {
    use super::*;

    #[test]
    fn cmd_line_is_wrapped_in_one_outer_quote_pair() {
        let line = r#""C:\installers\Git.exe" /VERYSILENT /DIR="C:\apps\Git""#;
        assert_eq!(
            cmd_arguments(line),
            r#"/D /S /C ""C:\installers\Git.exe" /VERYSILENT /DIR="C:\apps\Git"""#
        );
    }

    #[test]
    fn unquoted_lines_are_wrapped_too() {
        assert_eq!(cmd_arguments("net start"), r#"/D /S /C "net start""#);
    }
}
