//! Software catalog and installers directory listing

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::install::SoftwareDescriptor;

const INSTALLER_EXTENSIONS: &[&str] = &["exe", "msi", "zip"];

/// `[[software]]` entries of a TOML catalog file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub software: Vec<SoftwareDescriptor>,
}

impl Catalog {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Failed to parse catalog {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let catalog: Self = toml::from_str(raw)?;
        for (i, entry) in catalog.software.iter().enumerate() {
            if catalog.software[..i]
                .iter()
                .any(|other| other.name.eq_ignore_ascii_case(&entry.name))
            {
                bail!("Duplicate catalog entry: {}", entry.name);
            }
        }
        Ok(catalog)
    }

    pub fn find(&self, name: &str) -> Option<&SoftwareDescriptor> {
        self.software
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
    }

    /// Entries for `names` in the order given; every entry when `names` is empty
    pub fn select(&self, names: &[String]) -> Result<Vec<SoftwareDescriptor>> {
        if names.is_empty() {
            return Ok(self.software.clone());
        }
        names
            .iter()
            .map(|name| {
                self.find(name)
                    .cloned()
                    .with_context(|| format!("Unknown software: {name}"))
            })
            .collect()
    }
}

/// Installer files in `dir`, sorted. README-like files are skipped.
pub fn list_available_installers(dir: &Path) -> Result<Vec<String>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read installers directory {}", dir.display()));
        }
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_installer(&name) {
            files.push(name);
        }
    }
    files.sort_by_key(|f| f.to_lowercase());
    Ok(files)
}

fn is_installer(file_name: &str) -> bool {
    let lower = file_name.to_lowercase();
    if lower.contains("readme") {
        return false;
    }
    Path::new(&lower)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| INSTALLER_EXTENSIONS.contains(&ext))
}
