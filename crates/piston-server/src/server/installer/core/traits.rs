use crate::error::Result;
use crate::server::installer::modloaders::{InstalledLoader, LoaderContext};
use crate::server::installer::types::ProgressReporter;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Trait for modloader installers.
/// Each loader family (Vanilla, Fabric, Forge, ...) implements its own way of
/// turning a resolved plan into a runnable server directory.
pub trait LoaderInstaller: Send + Sync {
    /// Install the loader described by `ctx` into its target directory.
    fn install<'a>(
        &'a self,
        ctx: &'a LoaderContext,
        reporter: Arc<dyn ProgressReporter>,
    ) -> BoxFuture<'a, Result<InstalledLoader>>;
}
