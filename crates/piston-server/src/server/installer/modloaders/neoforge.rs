use super::forge::{locate_launch, run_installer_jar};
use super::{InstalledLoader, LoaderContext};
use crate::error::{Result, SetupError};
use crate::server::installer::core::traits::LoaderInstaller;
use crate::server::installer::types::ProgressReporter;
use futures::future::BoxFuture;
use std::path::Path;
use std::sync::Arc;

pub struct NeoForgeInstaller;

impl LoaderInstaller for NeoForgeInstaller {
    fn install<'a>(
        &'a self,
        ctx: &'a LoaderContext,
        reporter: Arc<dyn ProgressReporter>,
    ) -> BoxFuture<'a, Result<InstalledLoader>> {
        Box::pin(install_neoforge(ctx, reporter))
    }
}

/// NeoForge uses the same headless installer flow as Forge; only the
/// coordinates differ (`net.neoforged:neoforge:{version}`).
pub async fn install_neoforge(
    ctx: &LoaderContext,
    reporter: Arc<dyn ProgressReporter>,
) -> Result<InstalledLoader> {
    let version = ctx
        .plan
        .loader_version
        .as_deref()
        .ok_or_else(|| SetupError::loader("NeoForge plan has no version"))?;

    log::info!(
        "[neoforge] Installing NeoForge {} for Minecraft {}",
        version,
        ctx.plan.game_version
    );

    run_installer_jar(ctx, &*reporter, "NeoForge").await?;
    locate_launch(
        ctx.root(),
        &Path::new("libraries/net/neoforged/neoforge").join(version),
        &format!("neoforge-{}", version),
    )
}
