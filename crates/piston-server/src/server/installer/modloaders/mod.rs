pub mod fabric;
pub mod forge;
pub mod neoforge;
pub mod quilt;
pub mod vanilla;

use crate::error::{Result, SetupError};
use crate::server::installer::config::SetupConfig;
use crate::server::installer::core::downloader::{sha1_file, ArtifactDownloader};
use crate::server::installer::core::traits::LoaderInstaller;
use crate::server::installer::java::ensure_java;
use crate::server::installer::resolver::{LoaderPlan, VersionResolver};
use crate::server::installer::types::{InstallSpec, ModloaderType, ProgressReporter};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Tool-owned state lives under this directory in every server root.
pub const STATE_DIR: &str = ".piston";
pub const MARKER_FILE: &str = "loader.json";

/// Everything a `LoaderInstaller` needs for one run.
pub struct LoaderContext {
    pub spec: InstallSpec,
    pub plan: LoaderPlan,
    pub downloader: Arc<dyn ArtifactDownloader>,
    pub concurrency: usize,
    pub install_timeout: Duration,
    /// Java used to run Forge/NeoForge installers
    pub java: Option<PathBuf>,
}

impl LoaderContext {
    pub fn root(&self) -> &Path {
        &self.spec.target_dir
    }
}

/// How the installed server is started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LaunchTarget {
    /// `java ... -jar <path> nogui`
    Jar { path: PathBuf },
    /// `java @user_jvm_args.txt @<args_dir>/unix_args.txt nogui` (win_args.txt on Windows)
    ArgFiles { args_dir: PathBuf },
}

/// Result of a loader install. Paths are relative to the server root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledLoader {
    pub launch: LaunchTarget,
    pub artifacts: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerArtifact {
    pub path: PathBuf,
    pub sha1: String,
}

/// `.piston/loader.json`: what the last successful loader install produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallMarker {
    pub kind: ModloaderType,
    pub game_version: String,
    pub loader_version: Option<String>,
    pub launch: LaunchTarget,
    pub artifacts: Vec<MarkerArtifact>,
    pub installed_at: DateTime<Utc>,
}

impl InstallMarker {
    pub fn path(root: &Path) -> PathBuf {
        root.join(STATE_DIR).join(MARKER_FILE)
    }

    /// Read the marker. A missing or unreadable marker counts as "nothing installed".
    pub fn load(root: &Path) -> Option<Self> {
        let path = Self::path(root);
        let content = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(marker) => Some(marker),
            Err(e) => {
                log::warn!("[loader] Ignoring unreadable marker {:?}: {}", path, e);
                None
            }
        }
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = Self::path(root);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn remove(root: &Path) -> Result<()> {
        match std::fs::remove_file(Self::path(root)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether this marker already satisfies `spec`. An unspecified loader
    /// version accepts whatever version was installed.
    pub fn matches(&self, spec: &InstallSpec) -> bool {
        self.kind == spec.loader
            && self.game_version == spec.game_version
            && match spec.loader_version.as_deref() {
                Some(wanted) => self.loader_version.as_deref() == Some(wanted),
                None => true,
            }
    }

    /// Re-hash every recorded artifact.
    pub async fn verify(&self, root: &Path) -> Result<bool> {
        for artifact in &self.artifacts {
            let path = root.join(&artifact.path);
            if !path.is_file() {
                log::info!("[loader] Recorded artifact missing: {:?}", path);
                return Ok(false);
            }
            let actual = sha1_file(&path).await?;
            if !actual.eq_ignore_ascii_case(&artifact.sha1) {
                log::info!("[loader] Recorded artifact changed: {:?}", path);
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Remove what this install put in place so a different loader or
    /// version starts from a clean directory.
    pub fn remove_artifacts(&self, root: &Path) -> Result<()> {
        for artifact in &self.artifacts {
            remove_path(&root.join(&artifact.path))?;
        }
        for leftover in LOADER_LEFTOVERS {
            remove_path(&root.join(leftover))?;
        }
        Self::remove(root)
    }
}

/// Loader-owned paths that are not tracked individually.
const LOADER_LEFTOVERS: &[&str] = &[
    "libraries/net/minecraftforge",
    "libraries/net/neoforged",
    "run.sh",
    "run.bat",
    "start.sh",
    "start.bat",
];

fn remove_path(path: &Path) -> Result<()> {
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    match result {
        Ok(()) => {
            log::debug!("[loader] Removed {:?}", path);
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

pub fn get_installer(kind: ModloaderType) -> Box<dyn LoaderInstaller> {
    match kind {
        ModloaderType::Vanilla => Box::new(vanilla::VanillaInstaller),
        ModloaderType::Fabric => Box::new(fabric::FabricInstaller),
        ModloaderType::Quilt => Box::new(quilt::QuiltInstaller),
        ModloaderType::Forge => Box::new(forge::ForgeInstaller),
        ModloaderType::NeoForge => Box::new(neoforge::NeoForgeInstaller),
    }
}

/// Install (or confirm) the loader described by `spec`.
///
/// When `.piston/loader.json` matches the request and every recorded artifact
/// still hashes the same, nothing is resolved or downloaded.
pub async fn install_loader(
    spec: &InstallSpec,
    resolver: &VersionResolver,
    downloader: Arc<dyn ArtifactDownloader>,
    reporter: Arc<dyn ProgressReporter>,
    config: &SetupConfig,
) -> Result<InstallMarker> {
    let root = spec.target_dir.as_path();

    if let Some(existing) = InstallMarker::load(root) {
        if existing.matches(spec) {
            if existing.verify(root).await? {
                log::info!(
                    "[install_loader] {} {} for {} already installed in {:?}",
                    existing.kind,
                    existing.loader_version.as_deref().unwrap_or("-"),
                    existing.game_version,
                    root
                );
                return Ok(existing);
            }
            log::info!("[install_loader] Existing install failed verification, reinstalling");
            InstallMarker::remove(root)?;
        } else {
            log::info!(
                "[install_loader] Replacing {} {} ({}) with {} {} ({})",
                existing.kind,
                existing.loader_version.as_deref().unwrap_or("-"),
                existing.game_version,
                spec.loader,
                spec.loader_version.as_deref().unwrap_or("latest"),
                spec.game_version
            );
            existing.remove_artifacts(root)?;
        }
    }

    if reporter.is_cancelled() {
        return Err(SetupError::Cancelled);
    }

    reporter.start_step(&format!("Installing {}", spec.loader), None);
    reporter.set_message("Resolving versions...");
    let plan = resolver
        .plan(&spec.game_version, spec.loader, spec.loader_version.as_deref())
        .await?;

    let java = if spec.loader.runs_installer() {
        match &spec.java_path {
            Some(java) => Some(java.clone()),
            None => Some(
                ensure_java(
                    resolver.endpoints(),
                    config.runtime_dir.as_deref(),
                    &plan.game_version,
                    &*downloader,
                    &*reporter,
                )
                .await?,
            ),
        }
    } else {
        None
    };

    tokio::fs::create_dir_all(root).await?;
    let ctx = LoaderContext {
        spec: spec.clone(),
        plan,
        downloader,
        concurrency: config.concurrency,
        install_timeout: config.loader_install_timeout,
        java,
    };

    let installer = get_installer(spec.loader);
    let installed = installer.install(&ctx, reporter.clone()).await?;

    if reporter.is_cancelled() {
        return Err(SetupError::Cancelled);
    }

    let mut artifacts = Vec::with_capacity(installed.artifacts.len());
    for path in &installed.artifacts {
        artifacts.push(MarkerArtifact {
            sha1: sha1_file(&root.join(path)).await?,
            path: path.clone(),
        });
    }

    let marker = InstallMarker {
        kind: ctx.plan.loader,
        game_version: ctx.plan.game_version.clone(),
        loader_version: ctx.plan.loader_version.clone(),
        launch: installed.launch,
        artifacts,
        installed_at: Utc::now(),
    };
    marker.save(root)?;

    log::info!(
        "[install_loader] Installed {} {} for Minecraft {} in {:?}",
        marker.kind,
        marker.loader_version.as_deref().unwrap_or("-"),
        marker.game_version,
        root
    );
    Ok(marker)
}

/// Write `start.sh` / `start.bat` that run `jar` with a default heap.
pub(crate) fn write_start_scripts(root: &Path, jar: &str) -> Result<Vec<PathBuf>> {
    let sh = root.join("start.sh");
    std::fs::write(
        &sh,
        format!(
            "#!/usr/bin/env sh\ncd \"$(dirname \"$0\")\"\nexec java -Xms1G -Xmx4G -jar {} nogui \"$@\"\n",
            jar
        ),
    )?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&sh, std::fs::Permissions::from_mode(0o755))?;
    }

    let bat = root.join("start.bat");
    std::fs::write(
        &bat,
        format!(
            "@echo off\r\ncd /d \"%~dp0\"\r\njava -Xms1G -Xmx4G -jar {} nogui %*\r\npause\r\n",
            jar
        ),
    )?;

    Ok(vec![PathBuf::from("start.sh"), PathBuf::from("start.bat")])
}
