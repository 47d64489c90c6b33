//! JVM build tools shipped as zips (Gradle, Maven, Ant)
//!
//! PATH is never modified; the bin directory is logged for the user.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};

use super::{ConfigureContext, PostInstallStrategy, find_versioned_dir};
use crate::install::async_task::AsyncTask;

const DISTRIBUTION_PREFIXES: &[&str] = &["gradle-", "apache-maven-", "apache-ant-"];

pub struct BuildToolStrategy;

impl PostInstallStrategy for BuildToolStrategy {
    fn configure(&self, ctx: ConfigureContext) -> AsyncTask<Result<()>> {
        AsyncTask::from_future(configure(ctx))
    }
}

async fn configure(ctx: ConfigureContext) -> Result<()> {
    ctx.log(format!("Setting up {} environment...", ctx.name)).await;

    let home = locate_home(&ctx.install_path)
        .await
        .ok_or_else(|| anyhow!("Could not find a {} directory in extracted files", ctx.name))?;
    let bin = home.join("bin");

    ctx.log(format!("{} bin directory: {}", ctx.name, bin.display())).await;
    ctx.log(format!("To use {}, add to PATH: {}", ctx.name, bin.display())).await;

    match launcher(&bin).await {
        Some(launcher) => {
            ctx.log(format!("Or use directly: {}", launcher.display())).await;
        }
        None => {
            ctx.logger
                .warn(format!("No launcher script found in {}", bin.display()))
                .await;
        }
    }

    Ok(())
}

async fn locate_home(root: &Path) -> Option<PathBuf> {
    for prefix in DISTRIBUTION_PREFIXES {
        if let Some(dir) = find_versioned_dir(root, prefix).await {
            return Some(dir);
        }
    }
    // already flattened
    tokio::fs::metadata(root.join("bin"))
        .await
        .is_ok_and(|m| m.is_dir())
        .then(|| root.to_path_buf())
}

/// First `.bat`/`.cmd` script in `bin`, alphabetically
async fn launcher(bin: &Path) -> Option<PathBuf> {
    let mut entries = tokio::fs::read_dir(bin).await.ok()?;
    let mut scripts = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let is_script = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("bat") || e.eq_ignore_ascii_case("cmd"));
        if is_script {
            scripts.push(path);
        }
    }
    scripts.sort();
    scripts.into_iter().next()
}
