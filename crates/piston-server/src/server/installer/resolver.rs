//! Version resolution against the upstream metadata services.
//!
//! Every loader resolves the game version through the Mojang manifest first,
//! so "latest" selectors and typos are caught before any loader index is hit.

use crate::error::{Result, SetupError};
use crate::server::installer::config::{Endpoints, RetryPolicy, SetupConfig};
use crate::server::installer::core::downloader::{fetch_text, DownloadTask};
use crate::server::installer::types::ModloaderType;
use crate::utils::maven::maven_to_path;
use crate::utils::version::compare_versions;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Which game version the caller wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameVersionSelector {
    LatestRelease,
    LatestSnapshot,
    Exact(String),
}

impl std::str::FromStr for GameVersionSelector {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "latest" | "release" | "latest-release" => GameVersionSelector::LatestRelease,
            "snapshot" | "latest-snapshot" => GameVersionSelector::LatestSnapshot,
            _ => GameVersionSelector::Exact(s.trim().to_string()),
        })
    }
}

impl std::fmt::Display for GameVersionSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GameVersionSelector::LatestRelease => write!(f, "latest release"),
            GameVersionSelector::LatestSnapshot => write!(f, "latest snapshot"),
            GameVersionSelector::Exact(v) => write!(f, "{}", v),
        }
    }
}

/// A concrete file to download, relative to the server directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifact {
    pub url: String,
    /// Path relative to the server root, `/`-separated
    pub file_name: String,
    pub sha1: Option<String>,
    pub size: Option<u64>,
}

impl ResolvedArtifact {
    pub fn to_task(&self, root: &Path) -> DownloadTask {
        DownloadTask::new(self.url.clone(), root.join(&self.file_name))
            .with_sha1(self.sha1.clone())
            .with_size(self.size)
    }
}

/// Everything needed to install one loader for one game version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderPlan {
    pub game_version: String,
    pub loader: ModloaderType,
    pub loader_version: Option<String>,
    /// Vanilla server jar (Vanilla, Fabric, Quilt)
    pub server: Option<ResolvedArtifact>,
    /// Fabric launcher jar, Quilt loader jar, or Forge/NeoForge installer
    pub loader_artifact: Option<ResolvedArtifact>,
    /// Extra maven libraries (Quilt)
    pub libraries: Vec<ResolvedArtifact>,
    pub main_class: Option<String>,
}

impl LoaderPlan {
    /// The artifact that identifies this plan: the loader jar or installer
    /// when there is one, the vanilla server jar otherwise.
    pub fn primary(&self) -> Option<&ResolvedArtifact> {
        self.loader_artifact.as_ref().or(self.server.as_ref())
    }
}

// ============================================================================
// Upstream response types
// ============================================================================

#[derive(Debug, Deserialize)]
struct VersionManifest {
    latest: LatestVersions,
    versions: Vec<ManifestEntry>,
}

#[derive(Debug, Deserialize)]
struct LatestVersions {
    release: String,
    snapshot: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub version_type: String,
    pub url: String,
    #[serde(default)]
    pub sha1: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VersionDetails {
    #[serde(default)]
    downloads: HashMap<String, DownloadInfo>,
}

#[derive(Debug, Deserialize)]
struct DownloadInfo {
    url: String,
    sha1: Option<String>,
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FabricLoaderEntry {
    loader: FabricLoaderVersion,
}

#[derive(Debug, Deserialize)]
struct FabricLoaderVersion {
    version: String,
    #[serde(default)]
    stable: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct FabricInstallerVersion {
    version: String,
    #[serde(default)]
    stable: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerProfile {
    main_class: MainClass,
    #[serde(default)]
    libraries: Vec<ProfileLibrary>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MainClass {
    Plain(String),
    Split { server: String },
}

#[derive(Debug, Deserialize)]
struct ProfileLibrary {
    name: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ForgePromotions {
    promos: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct MavenMetadata {
    versioning: MavenVersioning,
}

#[derive(Debug, Deserialize)]
struct MavenVersioning {
    versions: MavenVersions,
}

#[derive(Debug, Deserialize)]
struct MavenVersions {
    #[serde(rename = "version", default)]
    version: Vec<String>,
}

const QUILT_MAVEN_FALLBACK: &str = "https://maven.quiltmc.org/repository/release/";

/// Resolves version selectors into download descriptors.
/// Metadata documents are cached in memory for the lifetime of the resolver.
pub struct VersionResolver {
    client: Client,
    endpoints: Endpoints,
    retry: RetryPolicy,
    cache: Mutex<HashMap<String, Arc<str>>>,
}

impl VersionResolver {
    pub fn new(client: Client, endpoints: Endpoints, retry: RetryPolicy) -> Self {
        Self {
            client,
            endpoints,
            retry,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &SetupConfig) -> Result<Self> {
        Ok(Self::new(
            config.build_client()?,
            config.endpoints.clone(),
            config.retry,
        ))
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Resolve a selector and loader to the single artifact a user would download.
    pub async fn resolve(
        &self,
        game: &GameVersionSelector,
        loader: ModloaderType,
        loader_version: Option<&str>,
    ) -> Result<ResolvedArtifact> {
        let game_version = self.resolve_game_version(game).await?;
        let plan = self.plan(&game_version.id, loader, loader_version).await?;
        plan.primary().cloned().ok_or_else(|| {
            SetupError::VersionNotFound(format!("{} {} has no artifact", loader, game_version.id))
        })
    }

    /// Find the manifest entry a selector points at.
    pub async fn resolve_game_version(&self, selector: &GameVersionSelector) -> Result<ManifestEntry> {
        let manifest: VersionManifest = self
            .fetch_json(&self.endpoints.vanilla_manifest)
            .await?
            .ok_or_else(|| SetupError::UpstreamUnavailable {
                url: self.endpoints.vanilla_manifest.clone(),
                reason: "version manifest missing".to_string(),
            })?;

        let wanted = match selector {
            GameVersionSelector::LatestRelease => manifest.latest.release.as_str(),
            GameVersionSelector::LatestSnapshot => manifest.latest.snapshot.as_str(),
            GameVersionSelector::Exact(id) => id.as_str(),
        };

        manifest
            .versions
            .into_iter()
            .find(|v| v.id == wanted)
            .ok_or_else(|| SetupError::VersionNotFound(format!("Minecraft {}", selector)))
    }

    /// Build the full installation plan for a concrete game version.
    pub async fn plan(
        &self,
        game_version: &str,
        loader: ModloaderType,
        loader_version: Option<&str>,
    ) -> Result<LoaderPlan> {
        log::info!(
            "[resolver] Planning {} {} for Minecraft {}",
            loader,
            loader_version.unwrap_or("(latest)"),
            game_version
        );

        let entry = self
            .resolve_game_version(&GameVersionSelector::Exact(game_version.to_string()))
            .await?;

        match loader {
            ModloaderType::Vanilla => Ok(LoaderPlan {
                game_version: entry.id.clone(),
                loader,
                loader_version: None,
                server: Some(self.vanilla_server(&entry).await?),
                loader_artifact: None,
                libraries: Vec::new(),
                main_class: None,
            }),
            ModloaderType::Fabric => self.plan_fabric(&entry, loader_version).await,
            ModloaderType::Quilt => self.plan_quilt(&entry, loader_version).await,
            ModloaderType::Forge => self.plan_forge(&entry.id, loader_version).await,
            ModloaderType::NeoForge => self.plan_neoforge(&entry.id, loader_version).await,
        }
    }

    async fn vanilla_server(&self, entry: &ManifestEntry) -> Result<ResolvedArtifact> {
        let details: VersionDetails = self.fetch_json(&entry.url).await?.ok_or_else(|| {
            SetupError::VersionNotFound(format!("Minecraft {} version details", entry.id))
        })?;

        let server = details.downloads.get("server").ok_or_else(|| {
            SetupError::VersionNotFound(format!("Minecraft {} has no server download", entry.id))
        })?;

        Ok(ResolvedArtifact {
            url: server.url.clone(),
            file_name: "server.jar".to_string(),
            sha1: server.sha1.clone(),
            size: server.size,
        })
    }

    async fn plan_fabric(&self, entry: &ManifestEntry, requested: Option<&str>) -> Result<LoaderPlan> {
        let base = &self.endpoints.fabric_meta;
        let loaders: Vec<FabricLoaderEntry> = self
            .fetch_json(&format!("{}/versions/loader/{}", base, entry.id))
            .await?
            .unwrap_or_default();

        let loader_version = pick_loader(
            loaders.iter().map(|l| (l.loader.version.as_str(), l.loader.stable)),
            requested,
        )
        .ok_or_else(|| {
            SetupError::VersionNotFound(format!(
                "Fabric loader {} for Minecraft {}",
                requested.unwrap_or("(any)"),
                entry.id
            ))
        })?;

        let installers: Vec<FabricInstallerVersion> = self
            .fetch_json(&format!("{}/versions/installer", base))
            .await?
            .unwrap_or_default();
        let installer = installers
            .iter()
            .find(|i| i.stable)
            .or_else(|| installers.first())
            .ok_or_else(|| SetupError::VersionNotFound("Fabric installer".to_string()))?;

        Ok(LoaderPlan {
            game_version: entry.id.clone(),
            loader: ModloaderType::Fabric,
            loader_version: Some(loader_version.clone()),
            server: Some(self.vanilla_server(entry).await?),
            loader_artifact: Some(ResolvedArtifact {
                url: format!(
                    "{}/versions/loader/{}/{}/{}/server/jar",
                    base, entry.id, loader_version, installer.version
                ),
                file_name: "fabric-server-launch.jar".to_string(),
                sha1: None,
                size: None,
            }),
            libraries: Vec::new(),
            main_class: None,
        })
    }

    async fn plan_quilt(&self, entry: &ManifestEntry, requested: Option<&str>) -> Result<LoaderPlan> {
        let base = &self.endpoints.quilt_meta;
        let loaders: Vec<FabricLoaderEntry> = self
            .fetch_json(&format!("{}/versions/loader/{}", base, entry.id))
            .await?
            .unwrap_or_default();

        let loader_version = pick_loader(
            loaders.iter().map(|l| (l.loader.version.as_str(), l.loader.stable)),
            requested,
        )
        .ok_or_else(|| {
            SetupError::VersionNotFound(format!(
                "Quilt loader {} for Minecraft {}",
                requested.unwrap_or("(any)"),
                entry.id
            ))
        })?;

        let profile_url = format!(
            "{}/versions/loader/{}/{}/server/json",
            base, entry.id, loader_version
        );
        let profile: ServerProfile = self.fetch_json(&profile_url).await?.ok_or_else(|| {
            SetupError::VersionNotFound(format!("Quilt server profile {}", profile_url))
        })?;

        let mut libraries = Vec::new();
        for lib in &profile.libraries {
            let path = maven_to_path(&lib.name).ok_or_else(|| {
                SetupError::loader(format!("Invalid maven coordinates in Quilt profile: {}", lib.name))
            })?;
            let repo = lib.url.as_deref().unwrap_or(QUILT_MAVEN_FALLBACK);
            libraries.push(ResolvedArtifact {
                url: format!("{}/{}", repo.trim_end_matches('/'), path),
                file_name: format!("libraries/{}", path),
                sha1: None,
                size: None,
            });
        }

        let loader_artifact = libraries
            .iter()
            .find(|l| l.file_name.contains("/quilt-loader/"))
            .cloned();

        let main_class = match profile.main_class {
            MainClass::Plain(s) => s,
            MainClass::Split { server } => server,
        };

        Ok(LoaderPlan {
            game_version: entry.id.clone(),
            loader: ModloaderType::Quilt,
            loader_version: Some(loader_version),
            server: Some(self.vanilla_server(entry).await?),
            loader_artifact,
            libraries,
            main_class: Some(main_class),
        })
    }

    async fn plan_forge(&self, game_version: &str, requested: Option<&str>) -> Result<LoaderPlan> {
        let forge_version = match requested {
            Some(v) => {
                let metadata_url = format!(
                    "{}/net/minecraftforge/forge/maven-metadata.xml",
                    self.endpoints.forge_maven
                );
                let wanted = format!("{}-{}", game_version, v);
                let versions = self.fetch_maven_versions(&metadata_url).await?;
                if !versions.iter().any(|candidate| candidate == &wanted) {
                    return Err(SetupError::VersionNotFound(format!("Forge {}", wanted)));
                }
                v.to_string()
            }
            None => {
                let promotions: ForgePromotions = self
                    .fetch_json(&self.endpoints.forge_promotions)
                    .await?
                    .ok_or_else(|| SetupError::UpstreamUnavailable {
                        url: self.endpoints.forge_promotions.clone(),
                        reason: "promotions index missing".to_string(),
                    })?;
                promotions
                    .promos
                    .get(&format!("{}-recommended", game_version))
                    .or_else(|| promotions.promos.get(&format!("{}-latest", game_version)))
                    .cloned()
                    .ok_or_else(|| {
                        SetupError::VersionNotFound(format!("Forge for Minecraft {}", game_version))
                    })?
            }
        };

        let full = format!("{}-{}", game_version, forge_version);
        let url = format!(
            "{}/net/minecraftforge/forge/{}/forge-{}-installer.jar",
            self.endpoints.forge_maven, full, full
        );
        let sha1 = self.fetch_checksum(&url).await?;

        Ok(LoaderPlan {
            game_version: game_version.to_string(),
            loader: ModloaderType::Forge,
            loader_version: Some(forge_version),
            server: None,
            loader_artifact: Some(ResolvedArtifact {
                url,
                file_name: format!("forge-{}-installer.jar", full),
                sha1,
                size: None,
            }),
            libraries: Vec::new(),
            main_class: None,
        })
    }

    async fn plan_neoforge(&self, game_version: &str, requested: Option<&str>) -> Result<LoaderPlan> {
        let prefix = neoforge_prefix(game_version).ok_or_else(|| {
            SetupError::VersionNotFound(format!("NeoForge for Minecraft {}", game_version))
        })?;

        let metadata_url = format!(
            "{}/net/neoforged/neoforge/maven-metadata.xml",
            self.endpoints.neoforge_maven
        );
        let versions = self.fetch_maven_versions(&metadata_url).await?;
        let matching: Vec<&String> = versions.iter().filter(|v| v.starts_with(&prefix)).collect();

        let version = match requested {
            Some(v) => matching
                .iter()
                .find(|candidate| candidate.as_str() == v)
                .map(|s| s.to_string())
                .ok_or_else(|| SetupError::VersionNotFound(format!("NeoForge {}", v)))?,
            None => {
                let stable = matching
                    .iter()
                    .filter(|v| !v.contains('-'))
                    .max_by(|a, b| compare_versions(a, b));
                stable
                    .or_else(|| matching.iter().max_by(|a, b| compare_versions(a, b)))
                    .map(|s| s.to_string())
                    .ok_or_else(|| {
                        SetupError::VersionNotFound(format!("NeoForge for Minecraft {}", game_version))
                    })?
            }
        };

        let url = format!(
            "{}/net/neoforged/neoforge/{}/neoforge-{}-installer.jar",
            self.endpoints.neoforge_maven, version, version
        );
        let sha1 = self.fetch_checksum(&url).await?;

        Ok(LoaderPlan {
            game_version: game_version.to_string(),
            loader: ModloaderType::NeoForge,
            loader_version: Some(version.clone()),
            server: None,
            loader_artifact: Some(ResolvedArtifact {
                url,
                file_name: format!("neoforge-{}-installer.jar", version),
                sha1,
                size: None,
            }),
            libraries: Vec::new(),
            main_class: None,
        })
    }

    async fn fetch_maven_versions(&self, url: &str) -> Result<Vec<String>> {
        let body = self.fetch_cached(url).await?.ok_or_else(|| SetupError::UpstreamUnavailable {
            url: url.to_string(),
            reason: "maven metadata missing".to_string(),
        })?;
        let metadata: MavenMetadata = serde_xml_rs::from_str(&body).map_err(|e| {
            SetupError::Other(anyhow::anyhow!("Invalid maven metadata at {}: {}", url, e))
        })?;
        Ok(metadata.versioning.versions.version)
    }

    /// Maven publishes `<artifact>.sha1` next to each file; a missing one is not fatal.
    async fn fetch_checksum(&self, artifact_url: &str) -> Result<Option<String>> {
        let body = self.fetch_cached(&format!("{}.sha1", artifact_url)).await?;
        Ok(body
            .and_then(|b| b.split_whitespace().next().map(str::to_string))
            .filter(|s| s.len() == 40 && s.chars().all(|c| c.is_ascii_hexdigit())))
    }

    async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>> {
        match self.fetch_cached(url).await? {
            Some(body) => {
                let parsed = serde_json::from_str(&body).map_err(|e| {
                    SetupError::Other(anyhow::anyhow!("Invalid JSON from {}: {}", url, e))
                })?;
                Ok(Some(parsed))
            }
            None => Ok(None),
        }
    }

    async fn fetch_cached(&self, url: &str) -> Result<Option<Arc<str>>> {
        if let Some(hit) = self.cache_get(url) {
            log::debug!("[resolver] cache hit: {}", url);
            return Ok(Some(hit));
        }

        log::debug!("[resolver] fetching: {}", url);
        match fetch_text(&self.client, url, self.retry).await? {
            Some(body) => {
                let body: Arc<str> = Arc::from(body);
                if let Ok(mut cache) = self.cache.lock() {
                    cache.insert(url.to_string(), body.clone());
                }
                Ok(Some(body))
            }
            None => Ok(None),
        }
    }

    fn cache_get(&self, url: &str) -> Option<Arc<str>> {
        self.cache.lock().ok().and_then(|c| c.get(url).cloned())
    }
}

/// Pick the requested loader version, or the first stable one (indices list newest first).
fn pick_loader<'a>(
    available: impl Iterator<Item = (&'a str, Option<bool>)>,
    requested: Option<&str>,
) -> Option<String> {
    let available: Vec<(&str, Option<bool>)> = available.collect();
    match requested {
        Some(wanted) => available
            .iter()
            .find(|(v, _)| *v == wanted)
            .map(|(v, _)| v.to_string()),
        None => available
            .iter()
            .find(|(v, stable)| stable.unwrap_or(!v.contains('-')))
            .or_else(|| available.first())
            .map(|(v, _)| v.to_string()),
    }
}

/// NeoForge versions encode the game version: MC 1.21.1 -> 21.1.x, MC 1.21 -> 21.0.x.
pub fn neoforge_prefix(game_version: &str) -> Option<String> {
    let rest = game_version.strip_prefix("1.")?;
    let mut parts = rest.split('.');
    let major: u32 = parts.next()?.parse().ok()?;
    let minor: u32 = match parts.next() {
        Some(m) => m.parse().ok()?,
        None => 0,
    };
    // 1.20.1 NeoForge shipped under the old Forge coordinates
    if major < 20 || (major == 20 && minor < 2) {
        return None;
    }
    Some(format!("{}.{}.", major, minor))
}

/// Inverse of `neoforge_prefix`: NeoForge 21.1.77 -> MC 1.21.1, 21.0.x -> 1.21.
pub fn game_version_from_neoforge(neoforge_version: &str) -> Option<String> {
    let mut parts = neoforge_version.split('.');
    let major: u32 = parts.next()?.parse().ok()?;
    let minor: u32 = parts.next()?.parse().ok()?;
    if minor == 0 {
        Some(format!("1.{}", major))
    } else {
        Some(format!("1.{}.{}", major, minor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_parsing() {
        assert_eq!(
            "latest".parse::<GameVersionSelector>().unwrap(),
            GameVersionSelector::LatestRelease
        );
        assert_eq!(
            "Snapshot".parse::<GameVersionSelector>().unwrap(),
            GameVersionSelector::LatestSnapshot
        );
        assert_eq!(
            " 1.20.1 ".parse::<GameVersionSelector>().unwrap(),
            GameVersionSelector::Exact("1.20.1".into())
        );
    }

    #[test]
    fn neoforge_mapping_round_trips() {
        assert_eq!(neoforge_prefix("1.21.1").as_deref(), Some("21.1."));
        assert_eq!(neoforge_prefix("1.21").as_deref(), Some("21.0."));
        assert_eq!(neoforge_prefix("1.20.1"), None);
        assert_eq!(game_version_from_neoforge("21.1.77").as_deref(), Some("1.21.1"));
        assert_eq!(game_version_from_neoforge("21.0.3-beta").as_deref(), Some("1.21"));
    }

    #[test]
    fn pick_loader_prefers_requested_then_stable() {
        let list = vec![("0.16.0-beta.1", Some(false)), ("0.15.11", Some(true))];
        assert_eq!(pick_loader(list.clone().into_iter(), None).as_deref(), Some("0.15.11"));
        assert_eq!(
            pick_loader(list.clone().into_iter(), Some("0.16.0-beta.1")).as_deref(),
            Some("0.16.0-beta.1")
        );
        assert_eq!(pick_loader(list.into_iter(), Some("9.9.9")), None);

        // Quilt has no stable flag; hyphenated versions count as pre-releases
        let quilt = vec![("0.26.0-beta.1", None), ("0.25.0", None)];
        assert_eq!(pick_loader(quilt.into_iter(), None).as_deref(), Some("0.25.0"));
    }

    #[test]
    fn maven_metadata_parses() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata>
  <groupId>net.neoforged</groupId>
  <artifactId>neoforge</artifactId>
  <versioning>
    <latest>21.1.77</latest>
    <versions>
      <version>21.0.167</version>
      <version>21.1.77</version>
    </versions>
  </versioning>
</metadata>"#;
        let parsed: MavenMetadata = serde_xml_rs::from_str(xml).unwrap();
        assert_eq!(parsed.versioning.versions.version, vec!["21.0.167", "21.1.77"]);
    }
}
