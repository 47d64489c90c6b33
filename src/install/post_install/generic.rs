use anyhow::Result;

use super::{ConfigureContext, PostInstallStrategy};
use crate::install::async_task::AsyncTask;

pub struct GenericStrategy;

impl PostInstallStrategy for GenericStrategy {
    fn configure(&self, ctx: ConfigureContext) -> AsyncTask<Result<()>> {
        AsyncTask::from_future(async move {
            ctx.log(format!(
                "No post-installation configuration required for {}",
                ctx.name
            ))
            .await;
            Ok(())
        })
    }
}
