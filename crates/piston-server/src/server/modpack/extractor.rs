//! Modpack installation into a server directory.
//!
//! Order matters: every entry path is validated before the first byte is
//! downloaded, and overrides are only applied once all downloads succeeded.

use crate::error::{Result, SetupError};
use crate::server::installer::core::archive::{extract_folder_to_root, read_entry, safe_join};
use crate::server::installer::core::batch::BatchDownloader;
use crate::server::installer::core::downloader::{ArtifactDownloader, DownloadTask, ExpectedHash};
use crate::server::installer::types::ProgressReporter;
use crate::server::modpack::parser;
use crate::server::modpack::types::{
    FileSide, FileSource, ModpackInfo, ModpackManifest, MODPACK_INFO_FILE,
};
use futures::future::BoxFuture;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zip::ZipArchive;

/// A CurseForge file id turned into something downloadable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPackFile {
    pub url: String,
    /// Relative destination, e.g. `mods/jei-1.20.1.jar`
    pub path: String,
    pub sha1: Option<String>,
    pub size: Option<u64>,
}

/// Looks up CurseForge project/file ids. The CurseForge API needs a key, so
/// the crate only defines the seam.
pub trait CurseForgeResolver: Send + Sync {
    fn resolve<'a>(&'a self, project_id: u32, file_id: u32)
        -> BoxFuture<'a, Result<ResolvedPackFile>>;
}

/// What a pack install did.
#[derive(Debug, Clone, PartialEq)]
pub struct PackInstallReport {
    pub manifest: ModpackManifest,
    pub downloaded: usize,
    pub already_present: usize,
    pub skipped_client_only: usize,
    /// Files written from override folders, relative to the target
    pub overrides: Vec<PathBuf>,
}

pub struct PackExtractor {
    downloader: Arc<dyn ArtifactDownloader>,
    concurrency: usize,
    curseforge: Option<Arc<dyn CurseForgeResolver>>,
}

impl PackExtractor {
    pub fn new(downloader: Arc<dyn ArtifactDownloader>, concurrency: usize) -> Self {
        Self {
            downloader,
            concurrency,
            curseforge: None,
        }
    }

    pub fn with_curseforge(mut self, resolver: Arc<dyn CurseForgeResolver>) -> Self {
        self.curseforge = Some(resolver);
        self
    }

    /// Parse the archive's manifest off the async runtime.
    pub async fn read_manifest(archive: &Path) -> Result<ModpackManifest> {
        let archive = archive.to_path_buf();
        tokio::task::spawn_blocking(move || parser::read_manifest(archive)).await?
    }

    /// Turn manifest entries into download tasks.
    ///
    /// Client-only entries are dropped when `server_side` is set. Every path is
    /// checked against `target` here, so a single bad entry fails the whole
    /// pack before anything is fetched.
    pub async fn plan_downloads(
        &self,
        manifest: &ModpackManifest,
        target: &Path,
        server_side: bool,
    ) -> Result<Vec<DownloadTask>> {
        let mut tasks = Vec::new();

        for entry in &manifest.files {
            if server_side && entry.side == FileSide::ClientOnly {
                log::debug!("[plan_downloads] Skipping client-only {:?}", entry.path);
                continue;
            }

            let (urls, path, hash, size) = match &entry.source {
                FileSource::Direct { urls } => {
                    let path = entry.path.clone().ok_or_else(|| {
                        SetupError::Other(anyhow::anyhow!("Pack entry without a path: {:?}", urls))
                    })?;
                    (urls.clone(), path, entry.hash.clone(), entry.size)
                }
                FileSource::CurseForge {
                    project_id,
                    file_id,
                } => match self.resolve_curseforge(*project_id, *file_id).await {
                    Ok(resolved) => (
                        vec![resolved.url],
                        resolved.path,
                        entry
                            .hash
                            .clone()
                            .or(resolved.sha1.map(ExpectedHash::Sha1)),
                        resolved.size,
                    ),
                    Err(e) if !entry.required => {
                        log::warn!(
                            "[plan_downloads] Skipping optional CurseForge file {}/{}: {}",
                            project_id,
                            file_id,
                            e
                        );
                        continue;
                    }
                    Err(e) => return Err(e),
                },
            };

            let destination = safe_join(target, &path)?;
            if urls.is_empty() {
                return Err(SetupError::DownloadFailed {
                    url: String::new(),
                    attempts: 0,
                    cause: format!("No download URLs for {}", path),
                });
            }

            let mut urls = urls.into_iter();
            let primary = urls.next().unwrap_or_default();
            tasks.push(
                DownloadTask::new(primary, destination)
                    .with_mirrors(urls)
                    .with_hash(hash)
                    .with_size(size),
            );
        }

        Ok(tasks)
    }

    /// Reject the pack if any entry with a known path would land outside `target`.
    pub fn check_paths(manifest: &ModpackManifest, target: &Path) -> Result<()> {
        for path in manifest.files.iter().filter_map(|f| f.path.as_deref()) {
            safe_join(target, path)?;
        }
        Ok(())
    }

    async fn resolve_curseforge(&self, project_id: u32, file_id: u32) -> Result<ResolvedPackFile> {
        match &self.curseforge {
            Some(resolver) => resolver.resolve(project_id, file_id).await,
            None => Err(SetupError::DownloadFailed {
                url: format!("curseforge:{}/{}", project_id, file_id),
                attempts: 0,
                cause: "no CurseForge resolver configured".to_string(),
            }),
        }
    }

    /// Read the archive's manifest and install it into `target`.
    pub async fn extract(
        &self,
        archive: &Path,
        target: &Path,
        server_side: bool,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<PackInstallReport> {
        let manifest = Self::read_manifest(archive).await?;
        self.apply(archive, manifest, target, server_side, reporter).await
    }

    /// Download the pack files, then lay the overrides on top and leave the
    /// remnants the detector looks for.
    pub async fn apply(
        &self,
        archive: &Path,
        manifest: ModpackManifest,
        target: &Path,
        server_side: bool,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<PackInstallReport> {
        log::info!(
            "[install_modpack] Installing {} {} into {:?}",
            manifest.name,
            manifest.version,
            target
        );

        let tasks = self.plan_downloads(&manifest, target, server_side).await?;
        let skipped_client_only = if server_side {
            manifest
                .files
                .iter()
                .filter(|f| f.side == FileSide::ClientOnly)
                .count()
        } else {
            0
        };

        if reporter.is_cancelled() {
            return Err(SetupError::Cancelled);
        }

        reporter.start_step("Downloading modpack files", Some(tasks.len() as u32));
        let batch = BatchDownloader::new(self.downloader.clone(), self.concurrency);
        let summary = batch.download_all(tasks, reporter.clone(), 0, 80.0).await?;

        if reporter.is_cancelled() {
            return Err(SetupError::Cancelled);
        }

        reporter.start_step("Applying overrides", None);
        reporter.set_percent(85);
        let folders: Vec<String> = manifest
            .overrides
            .iter()
            .map(|folder| {
                if !server_side && folder.ends_with("server-overrides") {
                    folder.replace("server-overrides", "client-overrides")
                } else {
                    folder.clone()
                }
            })
            .collect();
        let archive_path = archive.to_path_buf();
        let target_dir = target.to_path_buf();
        let overrides = tokio::task::spawn_blocking(move || -> Result<Vec<PathBuf>> {
            let mut zip = ZipArchive::new(File::open(&archive_path)?)?;
            let mut written = Vec::new();
            for folder in &folders {
                let files = extract_folder_to_root(&mut zip, folder, &target_dir)?;
                log::debug!("[install_modpack] {} files from {}", files.len(), folder);
                written.extend(files);
            }
            Ok(written)
        })
        .await??;

        write_remnants(archive, &manifest, target).await?;
        reporter.set_percent(100);

        log::info!(
            "[install_modpack] {}: {} downloaded, {} already present, {} client-only skipped, {} override files",
            manifest.name,
            summary.downloaded,
            summary.already_present,
            skipped_client_only,
            overrides.len()
        );

        Ok(PackInstallReport {
            manifest,
            downloaded: summary.downloaded,
            already_present: summary.already_present,
            skipped_client_only,
            overrides,
        })
    }
}

/// `modpack_info.json` plus a verbatim copy of the pack index.
async fn write_remnants(archive: &Path, manifest: &ModpackManifest, target: &Path) -> Result<()> {
    let info = ModpackInfo {
        name: manifest.name.clone(),
        version: manifest.version.clone(),
        minecraft_version: manifest.minecraft_version.clone(),
        loader: manifest.loader,
        loader_version: manifest.loader_version.clone(),
        source: manifest.format,
    };
    tokio::fs::write(
        target.join(MODPACK_INFO_FILE),
        serde_json::to_vec_pretty(&info)?,
    )
    .await?;

    let entry = manifest.index_entry();
    let archive_path = archive.to_path_buf();
    let lookup = entry.clone();
    let content = tokio::task::spawn_blocking(move || read_entry(&archive_path, &lookup)).await??;
    if let Some(bytes) = content {
        let file_name = entry.rsplit('/').next().unwrap_or(&entry).to_string();
        tokio::fs::write(target.join(file_name), bytes).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::installer::types::ModloaderType;
    use crate::server::modpack::types::{ModpackFormat, PackFileEntry};
    use crate::server::installer::core::downloader::DownloadOutcome;

    struct NoopDownloader;

    impl ArtifactDownloader for NoopDownloader {
        fn download<'a>(
            &'a self,
            _task: &'a DownloadTask,
            _reporter: &'a dyn ProgressReporter,
        ) -> BoxFuture<'a, Result<DownloadOutcome>> {
            Box::pin(async { Ok(DownloadOutcome::AlreadyPresent) })
        }
    }

    struct FixedResolver;

    impl CurseForgeResolver for FixedResolver {
        fn resolve<'a>(
            &'a self,
            project_id: u32,
            file_id: u32,
        ) -> BoxFuture<'a, Result<ResolvedPackFile>> {
            Box::pin(async move {
                Ok(ResolvedPackFile {
                    url: format!("https://cdn.example/{}/{}.jar", project_id, file_id),
                    path: format!("mods/{}.jar", file_id),
                    sha1: Some("abc".into()),
                    size: Some(3),
                })
            })
        }
    }

    fn manifest(files: Vec<PackFileEntry>) -> ModpackManifest {
        ModpackManifest {
            name: "p".into(),
            version: "1".into(),
            author: None,
            format: ModpackFormat::CurseForge,
            minecraft_version: "1.20.1".into(),
            loader: ModloaderType::Forge,
            loader_version: Some("47.2.0".into()),
            files,
            overrides: vec!["overrides".into()],
            root_prefix: None,
            recommended_ram_mb: None,
        }
    }

    fn cf_entry(file_id: u32, required: bool) -> PackFileEntry {
        PackFileEntry {
            path: None,
            source: FileSource::CurseForge {
                project_id: 7,
                file_id,
            },
            hash: None,
            size: None,
            side: FileSide::Universal,
            required,
        }
    }

    #[tokio::test]
    async fn curseforge_entries_need_a_resolver() {
        let extractor = PackExtractor::new(Arc::new(NoopDownloader), 2);
        let err = extractor
            .plan_downloads(&manifest(vec![cf_entry(1, true)]), Path::new("/srv/mc"), true)
            .await
            .unwrap_err();
        assert!(matches!(err, SetupError::DownloadFailed { .. }));

        // Optional entries are skipped instead
        let tasks = extractor
            .plan_downloads(&manifest(vec![cf_entry(1, false)]), Path::new("/srv/mc"), true)
            .await
            .unwrap();
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn curseforge_entries_resolve_to_tasks() {
        let extractor =
            PackExtractor::new(Arc::new(NoopDownloader), 2).with_curseforge(Arc::new(FixedResolver));
        let tasks = extractor
            .plan_downloads(&manifest(vec![cf_entry(42, true)]), Path::new("/srv/mc"), true)
            .await
            .unwrap();

        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].primary_url(), "https://cdn.example/7/42.jar");
        assert_eq!(tasks[0].destination, PathBuf::from("/srv/mc/mods/42.jar"));
        assert_eq!(tasks[0].expected_hash, Some(ExpectedHash::Sha1("abc".into())));
    }
}
