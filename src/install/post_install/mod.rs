//! Best-effort configuration after a successful primary install step
//!
//! Strategies are looked up by the descriptor's [`ProductKind`]. Any error a
//! strategy returns is logged as a warning by the orchestrator and never
//! changes the package outcome.

mod build_tool;
mod database;
mod generic;
mod identity;
mod servlet;
#[cfg(test)]
pub(crate) mod test_support;
mod web_server;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use super::async_task::AsyncTask;
use super::descriptor::ProductKind;
use super::logger::BatchLogger;
use super::platform::PlatformServices;
use super::progress::{ProgressEvent, ProgressSink, ProgressStatus};
use super::settings::InstallSettings;

pub use build_tool::BuildToolStrategy;
pub use database::DatabaseServerStrategy;
pub use generic::GenericStrategy;
pub use identity::IdentityServerStrategy;
pub use servlet::ServletContainerStrategy;
pub use web_server::WebServerStrategy;

/// Everything a strategy may touch
#[derive(Clone)]
pub struct ConfigureContext {
    pub name: String,
    pub install_path: PathBuf,
    pub logger: BatchLogger,
    pub sink: ProgressSink,
    pub services: Arc<dyn PlatformServices>,
    pub cancel: CancellationToken,
    pub settings: Arc<InstallSettings>,
}

impl ConfigureContext {
    pub async fn log(&self, message: impl AsRef<str>) {
        self.logger.append(message).await;
    }

    pub fn report(&self, status: ProgressStatus, message: impl Into<String>) {
        self.sink.progress(ProgressEvent::new(&self.name, status, message));
    }
}

pub trait PostInstallStrategy: Send + Sync {
    fn configure(&self, ctx: ConfigureContext) -> AsyncTask<Result<()>>;
}

/// Product kind to strategy. Unregistered kinds fall back to the generic one.
#[derive(Clone)]
pub struct StrategyRegistry {
    strategies: HashMap<ProductKind, Arc<dyn PostInstallStrategy>>,
    fallback: Arc<dyn PostInstallStrategy>,
}

impl StrategyRegistry {
    /// Registry with no product-specific behaviour at all
    pub fn empty() -> Self {
        Self {
            strategies: HashMap::new(),
            fallback: Arc::new(GenericStrategy),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(ProductKind::Generic, Arc::new(GenericStrategy));
        registry.register(ProductKind::BuildTool, Arc::new(BuildToolStrategy));
        registry.register(ProductKind::ServletContainer, Arc::new(ServletContainerStrategy));
        registry.register(ProductKind::WebServer, Arc::new(WebServerStrategy));
        registry.register(ProductKind::DatabaseServer, Arc::new(DatabaseServerStrategy));
        registry.register(ProductKind::IdentityServer, Arc::new(IdentityServerStrategy));
        registry
    }

    /// Replaces any strategy already registered for `kind`
    pub fn register(&mut self, kind: ProductKind, strategy: Arc<dyn PostInstallStrategy>) {
        self.strategies.insert(kind, strategy);
    }

    pub fn get(&self, kind: ProductKind) -> Arc<dyn PostInstallStrategy> {
        self.strategies
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Zip distributions usually wrap everything in `<product>-<version>/`.
/// Picks the directory under `root` starting with `prefix` that carries the
/// highest version, comparing numeric segments (`8.10` beats `8.4`).
pub(crate) async fn find_versioned_dir(root: &Path, prefix: &str) -> Option<PathBuf> {
    let mut entries = tokio::fs::read_dir(root).await.ok()?;
    let mut matches = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if is_dir && name.starts_with(prefix) {
            let key = version_key(&name[prefix.len()..]);
            matches.push((key, name, entry.path()));
        }
    }
    matches.into_iter().max().map(|(_, _, path)| path)
}

/// Numeric runs of a version suffix, `"9.0.1-rc2"` -> `[9, 0, 1, 2]`
fn version_key(version: &str) -> Vec<u64> {
    version
        .split(|c: char| !c.is_ascii_digit())
        .filter(|part| !part.is_empty())
        .map(|part| part.parse().unwrap_or(u64::MAX))
        .collect()
}

/// Versioned directory if there is one, else `root` when it already holds `marker`
pub(crate) async fn locate_product_dir(root: &Path, prefix: &str, marker: &str) -> Option<PathBuf> {
    if let Some(dir) = find_versioned_dir(root, prefix).await {
        return Some(dir);
    }
    tokio::fs::try_exists(root.join(marker))
        .await
        .unwrap_or(false)
        .then(|| root.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Marker;

    impl PostInstallStrategy for Marker {
        fn configure(&self, _ctx: ConfigureContext) -> AsyncTask<Result<()>> {
            AsyncTask::ready(Err(anyhow::anyhow!("marker")))
        }
    }

    #[test]
    fn unregistered_kinds_fall_back_to_generic() {
        let mut registry = StrategyRegistry::empty();
        registry.register(ProductKind::WebServer, Arc::new(Marker));

        let web = registry.get(ProductKind::WebServer);
        let generic = registry.get(ProductKind::DatabaseServer);
        assert!(Arc::ptr_eq(&web, &registry.get(ProductKind::WebServer)));
        assert!(!Arc::ptr_eq(&web, &generic));
        assert!(Arc::ptr_eq(&generic, &registry.fallback));
    }

    #[tokio::test]
    async fn versioned_dir_prefers_highest_version() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["gradle-8.4", "gradle-8.10", "gradle-7.6", "other"] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
        }
        std::fs::write(dir.path().join("gradle-9.0.txt"), "").unwrap();

        let found = find_versioned_dir(dir.path(), "gradle-").await.unwrap();
        assert_eq!(found, dir.path().join("gradle-8.10"));
    }

    #[test]
    fn version_keys_compare_numerically() {
        assert_eq!(version_key("9.0.1-rc2"), vec![9, 0, 1, 2]);
        assert!(version_key("10.1.20") > version_key("10.1.9"));
        assert!(version_key("3.9.6") > version_key("3.9"));
        assert!(version_key("").is_empty());
    }

    #[tokio::test]
    async fn flat_layout_uses_the_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("nginx.exe"), "").unwrap();
        let found = locate_product_dir(dir.path(), "nginx-", "nginx.exe").await;
        assert_eq!(found.as_deref(), Some(dir.path()));
        assert!(locate_product_dir(dir.path(), "nginx-", "missing").await.is_none());
    }
}
