//! Batch log listing, reading, deletion and retention

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::Serialize;

const LOG_EXTENSION: &str = "log";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: String,
    pub filename: String,
    pub created_at: DateTime<Utc>,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct LogStore {
    dir: PathBuf,
}

impl LogStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Newest first. A missing directory is an empty list.
    pub async fn list(&self) -> Result<Vec<LogEntry>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read log directory {}", self.dir.display()));
            }
        };

        let mut logs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(LOG_EXTENSION) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let created = meta.created().or_else(|_| meta.modified())?;
            logs.push(LogEntry {
                id: id.to_string(),
                filename: entry.file_name().to_string_lossy().into_owned(),
                created_at: DateTime::<Utc>::from(created),
                size: meta.len(),
            });
        }

        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(logs)
    }

    pub async fn read(&self, id: &str) -> Result<String> {
        let path = self.path_for(id)?;
        tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read log {}", path.display()))
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let path = self.path_for(id)?;
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("Failed to delete log {}", path.display()))
    }

    /// Keeps the `keep` newest logs, returns how many were removed
    pub async fn prune(&self, keep: usize) -> Result<usize> {
        let logs = self.list().await?;
        let mut removed = 0;
        for entry in logs.iter().skip(keep) {
            let path = self.dir.join(&entry.filename);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => log::warn!("Failed to prune {}: {e}", path.display()),
            }
        }
        Ok(removed)
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.dir.join(format!("{id}.{LOG_EXTENSION}")))
    }
}

/// Ids are plain file stems; anything that could walk out of the directory is refused
pub(crate) fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        bail!("Invalid id: {id:?}");
    }
    Ok(())
}
