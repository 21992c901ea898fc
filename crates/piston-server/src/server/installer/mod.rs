pub mod config;
pub mod core;
pub mod java;
pub mod lock;
pub mod modloaders;
pub mod resolver;
pub mod types;

use crate::error::{Result, SetupError};
use crate::server::installation::{validate_target_dir, ServerInstallation};
use crate::server::modpack::{CurseForgeResolver, PackExtractor, PackInstallReport};
use config::SetupConfig;
use core::downloader::{ArtifactDownloader, HttpDownloader};
use lock::DirectoryLocks;
use modloaders::install_loader;
use resolver::{GameVersionSelector, VersionResolver};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use types::{InstallSpec, ModloaderType, ProgressReporter};

/// What to put in a fresh (or existing) server directory.
#[derive(Debug, Clone)]
pub struct ServerRequest {
    pub target_dir: PathBuf,
    pub game: GameVersionSelector,
    pub loader: ModloaderType,
    /// `None` picks the recommended/latest stable loader
    pub loader_version: Option<String>,
    pub java_path: Option<PathBuf>,
}

impl ServerRequest {
    pub fn new(target_dir: impl Into<PathBuf>, game: GameVersionSelector, loader: ModloaderType) -> Self {
        Self {
            target_dir: target_dir.into(),
            game,
            loader,
            loader_version: None,
            java_path: None,
        }
    }

    pub fn with_loader_version(mut self, version: impl Into<String>) -> Self {
        self.loader_version = Some(version.into());
        self
    }

    pub fn with_java(mut self, java: impl Into<PathBuf>) -> Self {
        self.java_path = Some(java.into());
        self
    }
}

/// Entry point for setting up servers: resolves versions, installs loaders
/// and modpacks, and hands back the resulting `ServerInstallation`.
pub struct ServerSetup {
    config: SetupConfig,
    resolver: VersionResolver,
    downloader: Arc<dyn ArtifactDownloader>,
    curseforge: Option<Arc<dyn CurseForgeResolver>>,
}

impl ServerSetup {
    pub fn new(config: SetupConfig) -> Result<Self> {
        let resolver = VersionResolver::from_config(&config)?;
        let downloader: Arc<dyn ArtifactDownloader> = Arc::new(HttpDownloader::from_config(&config)?);
        Ok(Self {
            config,
            resolver,
            downloader,
            curseforge: None,
        })
    }

    /// Swap the downloader, e.g. for a counting fake in tests.
    pub fn with_downloader(mut self, downloader: Arc<dyn ArtifactDownloader>) -> Self {
        self.downloader = downloader;
        self
    }

    pub fn with_curseforge(mut self, resolver: Arc<dyn CurseForgeResolver>) -> Self {
        self.curseforge = Some(resolver);
        self
    }

    pub fn config(&self) -> &SetupConfig {
        &self.config
    }

    pub fn resolver(&self) -> &VersionResolver {
        &self.resolver
    }

    /// Install vanilla or a loader into `request.target_dir`.
    ///
    /// Installs into the same directory are serialized; a rerun with the same
    /// request downloads nothing.
    pub async fn install_server(
        &self,
        request: &ServerRequest,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<ServerInstallation> {
        let target = request.target_dir.as_path();
        let _guard = DirectoryLocks::global().acquire(target).await;
        log::info!(
            "[install_server] {} {} for Minecraft {} into {:?}",
            request.loader,
            request.loader_version.as_deref().unwrap_or("(latest)"),
            request.game,
            target
        );

        let result = async {
            validate_target_dir(target)?;
            if reporter.is_cancelled() {
                return Err(SetupError::Cancelled);
            }

            reporter.start_step("Resolving Minecraft version", None);
            let entry = self.resolver.resolve_game_version(&request.game).await?;

            let mut spec = InstallSpec::new(target.to_path_buf(), entry.id, request.loader);
            spec.loader_version = request.loader_version.clone();
            spec.java_path = request.java_path.clone();

            let marker = install_loader(
                &spec,
                &self.resolver,
                self.downloader.clone(),
                reporter.clone(),
                &self.config,
            )
            .await?;

            let mut installation = ServerInstallation::open(target);
            installation.apply_marker(&marker);
            Ok(installation)
        }
        .await;

        finish(&*reporter, &result, "Server installed");
        result
    }

    /// Install a modpack archive as a server: loader first, then the pack
    /// files, then the overrides.
    pub async fn install_modpack(
        &self,
        archive: &Path,
        target: &Path,
        java_path: Option<PathBuf>,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<(ServerInstallation, PackInstallReport)> {
        let _guard = DirectoryLocks::global().acquire(target).await;
        log::info!("[install_modpack] {:?} into {:?}", archive, target);

        let result = async {
            validate_target_dir(target)?;

            reporter.start_step("Reading modpack", None);
            let manifest = PackExtractor::read_manifest(archive).await?;
            PackExtractor::check_paths(&manifest, target)?;
            if reporter.is_cancelled() {
                return Err(SetupError::Cancelled);
            }

            let mut spec = InstallSpec::new(
                target.to_path_buf(),
                manifest.minecraft_version.clone(),
                manifest.loader,
            );
            spec.loader_version = manifest.loader_version.clone();
            spec.java_path = java_path;

            let marker = install_loader(
                &spec,
                &self.resolver,
                self.downloader.clone(),
                reporter.clone(),
                &self.config,
            )
            .await?;

            let mut extractor = PackExtractor::new(self.downloader.clone(), self.config.concurrency);
            if let Some(cf) = &self.curseforge {
                extractor = extractor.with_curseforge(cf.clone());
            }
            let report = extractor
                .apply(archive, manifest, target, true, reporter.clone())
                .await?;

            let mut installation = ServerInstallation::open(target);
            installation.apply_marker(&marker);
            Ok((installation, report))
        }
        .await;

        finish(&*reporter, &result, "Modpack installed");
        result
    }
}

fn finish<T>(reporter: &dyn ProgressReporter, result: &Result<T>, success: &str) {
    match result {
        Ok(_) => reporter.done(true, Some(success)),
        Err(SetupError::Cancelled) => {
            log::info!("[install] Cancelled");
            reporter.done(false, Some("Cancelled"));
        }
        Err(e) => {
            log::error!("[install] Failed: {}", e);
            reporter.done(false, Some(&e.to_string()));
        }
    }
}
