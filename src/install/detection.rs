//! Installation state detection
//!
//! Only the descriptor's own target directory is inspected, never the
//! registry or any system package database. A package counts as present when
//! that directory holds at least one file with an executable extension.
//! Installed-but-differently-named binaries are accepted false negatives.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Extensions that mark an installed copy
const EXECUTABLE_EXTENSIONS: &[&str] = &["exe", "bat", "cmd", "com"];

/// Zip layouts nest binaries a couple of levels down (`tool-1.2/bin/tool.bat`)
const MAX_SEARCH_DEPTH: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallationState {
    NotInstalled,
    Installed { location: PathBuf },
}

pub async fn check_already_installed(target: &Path) -> InstallationState {
    let target = target.to_path_buf();
    tokio::task::spawn_blocking(move || probe(&target))
        .await
        .unwrap_or(InstallationState::NotInstalled)
}

fn probe(target: &Path) -> InstallationState {
    if !target.is_dir() {
        return InstallationState::NotInstalled;
    }

    let found = WalkDir::new(target)
        .max_depth(MAX_SEARCH_DEPTH)
        .into_iter()
        .filter_map(Result::ok)
        .any(|entry| entry.file_type().is_file() && is_executable(entry.path()));

    if found {
        InstallationState::Installed {
            location: target.to_path_buf(),
        }
    } else {
        InstallationState::NotInstalled
    }
}

fn is_executable(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            EXECUTABLE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}
