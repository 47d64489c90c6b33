//! Append-only batch log
//!
//! One `<log_id>.log` file per batch, each line stamped independently as
//! `[<RFC 3339 timestamp>] message`. Appends are fire-and-forget: a failed
//! write is dropped so it can never mask the outcome being logged.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct BatchLogger {
    log_id: Uuid,
    path: PathBuf,
}

impl BatchLogger {
    /// Create the log file for a new batch. This is the only fallible step:
    /// without a log file the batch is not started.
    pub async fn create(log_dir: &Path, log_id: Uuid) -> Result<Self> {
        tokio::fs::create_dir_all(log_dir)
            .await
            .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;

        let path = log_dir.join(format!("{log_id}.log"));
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to create batch log: {}", path.display()))?;

        Ok(Self { log_id, path })
    }

    /// Logger over an existing path, no file is created up front
    pub fn at(path: PathBuf) -> Self {
        Self {
            log_id: Uuid::nil(),
            path,
        }
    }

    pub fn log_id(&self) -> Uuid {
        self.log_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        log::debug!(target: "setupflow::batch", "{message}");
        let _ = self.write_line(message).await;
    }

    pub async fn warn(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        log::warn!("{message}");
        let _ = self.write_line(&format!("Warning: {message}")).await;
    }

    async fn write_line(&self, message: &str) -> std::io::Result<()> {
        let line = format_line(message);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}

fn format_line(message: &str) -> String {
    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    format!("[{timestamp}] {message}\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_carry_an_iso_timestamp() {
        let line = format_line("hello");
        assert!(line.starts_with('['));
        assert!(line.ends_with("] hello\n"));
        let stamp = &line[1..line.find(']').unwrap()];
        assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok());
    }

    #[tokio::test]
    async fn appends_accumulate_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let logger = BatchLogger::create(dir.path(), Uuid::new_v4()).await.unwrap();
        logger.append("first").await;
        logger.warn("second").await;

        let raw = tokio::fs::read_to_string(logger.path()).await.unwrap();
        let lines: Vec<_> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("] first"));
        assert!(lines[1].ends_with("] Warning: second"));
    }

    #[tokio::test]
    async fn write_failures_are_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let logger = BatchLogger::at(dir.path().join("missing").join("x.log"));
        logger.append("goes nowhere").await;
        assert!(!logger.path().exists());
    }
}
