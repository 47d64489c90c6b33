//! Single-writer guard over a shared install root
//!
//! Held for the whole batch. The lock file is created with exclusive-create
//! semantics and removed on drop. A crashed run leaves it behind; delete it
//! by hand once no batch is running.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::InstallError;

pub const LOCK_FILE_NAME: &str = ".setupflow.lock";

#[derive(Debug)]
pub struct InstallRootLock {
    path: PathBuf,
}

impl InstallRootLock {
    pub fn acquire(install_root: &Path) -> Result<Self, InstallError> {
        std::fs::create_dir_all(install_root)?;
        let path = install_root.join(LOCK_FILE_NAME);

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(InstallError::Locked(path));
            }
            Err(e) => return Err(e.into()),
        };

        // owner info for whoever finds a stale lock
        let _ = writeln!(
            file,
            "pid={}\nstarted={}",
            std::process::id(),
            chrono::Utc::now().to_rfc3339()
        );
        debug!("acquired install root lock {}", path.display());

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstallRootLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to remove lock file {}: {e}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_holder_is_rejected_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("apps");

        let first = InstallRootLock::acquire(&root).unwrap();
        assert!(first.path().exists());
        let err = InstallRootLock::acquire(&root).unwrap_err();
        assert!(matches!(err, InstallError::Locked(_)));

        drop(first);
        assert!(!root.join(LOCK_FILE_NAME).exists());
        assert!(InstallRootLock::acquire(&root).is_ok());
    }
}
