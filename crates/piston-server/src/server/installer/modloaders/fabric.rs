use super::vanilla::download_server_jar;
use super::{write_start_scripts, InstalledLoader, LaunchTarget, LoaderContext};
use crate::error::{Result, SetupError};
use crate::server::installer::core::traits::LoaderInstaller;
use crate::server::installer::types::ProgressReporter;
use futures::future::BoxFuture;
use std::path::PathBuf;
use std::sync::Arc;

pub struct FabricInstaller;

impl LoaderInstaller for FabricInstaller {
    fn install<'a>(
        &'a self,
        ctx: &'a LoaderContext,
        reporter: Arc<dyn ProgressReporter>,
    ) -> BoxFuture<'a, Result<InstalledLoader>> {
        Box::pin(install_fabric(ctx, reporter))
    }
}

/// Install Fabric: the vanilla server jar plus the prebuilt server launcher
/// from Fabric meta, which fetches its own libraries on first start.
pub async fn install_fabric(
    ctx: &LoaderContext,
    reporter: Arc<dyn ProgressReporter>,
) -> Result<InstalledLoader> {
    log::info!(
        "[fabric] Installing Fabric {} for Minecraft {}",
        ctx.plan.loader_version.as_deref().unwrap_or("latest"),
        ctx.plan.game_version
    );

    reporter.set_percent(10);
    let server = download_server_jar(ctx, &*reporter).await?;

    let launcher = ctx
        .plan
        .loader_artifact
        .as_ref()
        .ok_or_else(|| SetupError::loader("Fabric plan has no server launcher"))?;

    reporter.set_percent(60);
    reporter.set_message("Downloading Fabric server launcher...");
    ctx.downloader
        .download(&launcher.to_task(ctx.root()), &*reporter)
        .await?;

    let mut artifacts = vec![server, PathBuf::from(&launcher.file_name)];
    artifacts.extend(write_start_scripts(ctx.root(), &launcher.file_name)?);
    reporter.set_percent(100);

    Ok(InstalledLoader {
        launch: LaunchTarget::Jar {
            path: PathBuf::from(&launcher.file_name),
        },
        artifacts,
    })
}
