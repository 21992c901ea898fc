//! Installer settings.
//! Static defaults plus the `SetupConfig`/`Endpoints` pair handed to the
//! resolver and downloader so both can be pointed at a mirror or a mock.

use crate::error::{Result, SetupError};
use anyhow::Context;
use reqwest::Client;
use std::path::PathBuf;
use std::time::Duration;

pub const REQUEST_TIMEOUT_SECS: u64 = 120;
pub const DOWNLOAD_RETRIES: u32 = 3;
// Linear backoff: delay * attempt
pub const RETRY_BASE_DELAY_MS: u64 = 1000;
pub const PROGRESS_INTERVAL_MS: u64 = 100;
pub const DEFAULT_CONCURRENCY: usize = 8;
pub const LOADER_INSTALL_TIMEOUT_SECS: u64 = 300;

pub const USER_AGENT: &str = concat!("piston-server/", env!("CARGO_PKG_VERSION"));

// URL Constants
pub const VANILLA_MANIFEST_URL: &str =
    "https://piston-meta.mojang.com/mc/game/version_manifest_v2.json";
pub const FABRIC_META_URL: &str = "https://meta.fabricmc.net/v2";
pub const QUILT_META_URL: &str = "https://meta.quiltmc.org/v3";
pub const FORGE_MAVEN_URL: &str = "https://maven.minecraftforge.net";
pub const FORGE_PROMOTIONS_URL: &str =
    "https://files.minecraftforge.net/net/minecraftforge/forge/promotions_slim.json";
pub const NEOFORGE_MAVEN_URL: &str = "https://maven.neoforged.net/releases";
pub const ADOPTIUM_API_URL: &str = "https://api.adoptium.net";

/// Base URLs of every upstream service the installer talks to.
/// Stored without trailing slashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub vanilla_manifest: String,
    pub fabric_meta: String,
    pub quilt_meta: String,
    pub forge_maven: String,
    pub forge_promotions: String,
    pub neoforge_maven: String,
    pub adoptium_api: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            vanilla_manifest: VANILLA_MANIFEST_URL.to_string(),
            fabric_meta: FABRIC_META_URL.to_string(),
            quilt_meta: QUILT_META_URL.to_string(),
            forge_maven: FORGE_MAVEN_URL.to_string(),
            forge_promotions: FORGE_PROMOTIONS_URL.to_string(),
            neoforge_maven: NEOFORGE_MAVEN_URL.to_string(),
            adoptium_api: ADOPTIUM_API_URL.to_string(),
        }
    }
}

impl Endpoints {
    /// Put every service under a single base URL (a local mirror or a test server).
    ///
    /// Layout: `{base}/mojang/version_manifest_v2.json`, `{base}/fabric/v2`,
    /// `{base}/quilt/v3`, `{base}/forge/maven`, `{base}/forge/promotions_slim.json`,
    /// `{base}/neoforge/maven`, `{base}/adoptium`.
    pub fn with_base(base: &str) -> Result<Self> {
        let parsed = url::Url::parse(base)
            .with_context(|| format!("Invalid endpoint base URL: {}", base))?;
        if parsed.cannot_be_a_base() {
            return Err(SetupError::Other(anyhow::anyhow!(
                "Endpoint URL cannot be used as a base: {}",
                base
            )));
        }
        let base = base.trim_end_matches('/');
        Ok(Self {
            vanilla_manifest: format!("{}/mojang/version_manifest_v2.json", base),
            fabric_meta: format!("{}/fabric/v2", base),
            quilt_meta: format!("{}/quilt/v3", base),
            forge_maven: format!("{}/forge/maven", base),
            forge_promotions: format!("{}/forge/promotions_slim.json", base),
            neoforge_maven: format!("{}/neoforge/maven", base),
            adoptium_api: format!("{}/adoptium", base),
        })
    }
}

/// Bounded retry with linear backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DOWNLOAD_RETRIES,
            base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

#[derive(Debug, Clone)]
pub struct SetupConfig {
    pub endpoints: Endpoints,
    /// Parallel file downloads during modpack installation
    pub concurrency: usize,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    /// Minimum interval between byte-progress callbacks
    pub progress_interval: Duration,
    pub loader_install_timeout: Duration,
    /// Directory for managed Java runtimes. When unset, Java is looked up on PATH only.
    pub runtime_dir: Option<PathBuf>,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            concurrency: DEFAULT_CONCURRENCY,
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            progress_interval: Duration::from_millis(PROGRESS_INTERVAL_MS),
            loader_install_timeout: Duration::from_secs(LOADER_INSTALL_TIMEOUT_SECS),
            runtime_dir: None,
        }
    }
}

impl SetupConfig {
    pub fn build_client(&self) -> Result<Client> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(self.request_timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_base_strips_trailing_slash() {
        let endpoints = Endpoints::with_base("http://127.0.0.1:9000/").unwrap();
        assert_eq!(endpoints.fabric_meta, "http://127.0.0.1:9000/fabric/v2");
        assert_eq!(
            endpoints.vanilla_manifest,
            "http://127.0.0.1:9000/mojang/version_manifest_v2.json"
        );
    }

    #[test]
    fn with_base_rejects_garbage() {
        assert!(Endpoints::with_base("not a url").is_err());
    }

    #[test]
    fn backoff_is_linear() {
        let policy = RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(250),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for(3), Duration::from_millis(750));
    }
}
