use super::{InstalledLoader, LaunchTarget, LoaderContext};
use crate::error::{Result, SetupError};
use crate::server::installer::core::traits::LoaderInstaller;
use crate::server::installer::types::ProgressReporter;
use futures::future::BoxFuture;
use std::path::PathBuf;
use std::sync::Arc;

pub struct VanillaInstaller;

impl LoaderInstaller for VanillaInstaller {
    fn install<'a>(
        &'a self,
        ctx: &'a LoaderContext,
        reporter: Arc<dyn ProgressReporter>,
    ) -> BoxFuture<'a, Result<InstalledLoader>> {
        Box::pin(async move {
            let server = download_server_jar(ctx, &*reporter).await?;
            Ok(InstalledLoader {
                launch: LaunchTarget::Jar {
                    path: server.clone(),
                },
                artifacts: vec![server],
            })
        })
    }
}

/// Download the vanilla `server.jar` of the plan. Shared with Fabric and Quilt,
/// whose launchers load it from the server root.
pub(crate) async fn download_server_jar(
    ctx: &LoaderContext,
    reporter: &dyn ProgressReporter,
) -> Result<PathBuf> {
    let server = ctx.plan.server.as_ref().ok_or_else(|| {
        SetupError::VersionNotFound(format!(
            "Minecraft {} has no server download",
            ctx.plan.game_version
        ))
    })?;

    log::info!(
        "[vanilla] Downloading Minecraft {} server from {}",
        ctx.plan.game_version,
        server.url
    );
    reporter.set_message(&format!("Downloading Minecraft {} server...", ctx.plan.game_version));
    ctx.downloader
        .download(&server.to_task(ctx.root()), reporter)
        .await?;

    Ok(PathBuf::from(&server.file_name))
}
