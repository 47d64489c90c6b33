use anyhow::Result;

use super::{ConfigureContext, PostInstallStrategy, find_versioned_dir};
use crate::install::async_task::AsyncTask;

const DOCS_URL: &str = "https://www.keycloak.org/getting-started/getting-started-zip";

/// Extraction only; running and securing the server is left to the vendor docs
pub struct IdentityServerStrategy;

impl PostInstallStrategy for IdentityServerStrategy {
    fn configure(&self, ctx: ConfigureContext) -> AsyncTask<Result<()>> {
        AsyncTask::from_future(async move {
            let home = find_versioned_dir(&ctx.install_path, "keycloak-")
                .await
                .unwrap_or_else(|| ctx.install_path.clone());

            ctx.log(format!("{} extracted to {}", ctx.name, home.display())).await;
            ctx.log(format!(
                "Development mode: {} start-dev",
                home.join("bin").join("kc.bat").display()
            ))
            .await;
            ctx.log(format!("See {DOCS_URL} for admin user setup and production configuration"))
                .await;
            Ok(())
        })
    }
}
