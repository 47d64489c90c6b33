//! Saved package selections
//!
//! One pretty-printed JSON file per profile, named by its id.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::logs::validate_id;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub name: String,
    /// Catalog names, in install order
    pub software: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ProfileStore {
    dir: PathBuf,
}

impl ProfileStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Sorted by name. Unreadable files are skipped with a warning.
    pub async fn list(&self) -> Result<Vec<Profile>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read profiles directory {}", self.dir.display()));
            }
        };

        let mut profiles = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = tokio::fs::read_to_string(&path)
                .await
                .map_err(anyhow::Error::from)
                .and_then(|raw| serde_json::from_str::<Profile>(&raw).map_err(anyhow::Error::from));
            match parsed {
                Ok(profile) => profiles.push(profile),
                Err(e) => log::warn!("Skipping profile {}: {e}", path.display()),
            }
        }

        profiles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(profiles)
    }

    pub async fn get(&self, id: &str) -> Result<Profile> {
        validate_id(id)?;
        let path = self.dir.join(format!("{id}.json"));
        let raw = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Profile not found: {id}"))?;
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse profile {}", path.display()))
    }

    /// Creates a profile, or replaces `id` while keeping its creation time
    pub async fn save(&self, id: Option<&str>, name: &str, software: Vec<String>) -> Result<Profile> {
        let now = Utc::now();
        let (id, created_at) = match id {
            Some(id) => {
                validate_id(id)?;
                let created = self.get(id).await.map(|p| p.created_at).unwrap_or(now);
                (id.to_string(), created)
            }
            None => (Uuid::new_v4().to_string(), now),
        };

        let profile = Profile {
            id,
            name: name.to_string(),
            software,
            created_at,
            updated_at: now,
        };

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create profiles directory {}", self.dir.display()))?;
        let path = self.dir.join(format!("{}.json", profile.id));
        let json = serde_json::to_string_pretty(&profile).context("Failed to serialize profile")?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write profile {}", path.display()))?;

        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_list_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("profiles"));

        let dev = store
            .save(None, "Developer", vec!["Git".into(), "Gradle".into()])
            .await
            .unwrap();
        store.save(None, "Backend", vec!["nginx".into()]).await.unwrap();
        assert!(Uuid::parse_str(&dev.id).is_ok());

        let names: Vec<_> = store.list().await.unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, ["Backend", "Developer"]);
        assert_eq!(store.get(&dev.id).await.unwrap(), dev);
    }

    #[tokio::test]
    async fn resaving_keeps_creation_time() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().to_path_buf());
        let first = store.save(Some("team"), "Team", vec![]).await.unwrap();
        let second = store.save(Some("team"), "Team", vec!["Git".into()]).await.unwrap();

        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn files_use_camel_case_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().to_path_buf());
        let p = store.save(Some("x"), "X", vec![]).await.unwrap();
        let raw = std::fs::read_to_string(dir.path().join(format!("{}.json", p.id))).unwrap();
        assert!(raw.contains("\"createdAt\""));
        assert!(raw.contains("\"updatedAt\""));
    }
}
