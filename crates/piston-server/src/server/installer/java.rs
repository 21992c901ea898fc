//! Java runtime discovery and provisioning.
//!
//! Forge and NeoForge installers need a JVM to run, and so does the server
//! itself. A matching runtime is looked up in the managed runtime directory
//! first, then on PATH, and finally downloaded from Adoptium.

use crate::error::{Result, SetupError};
use crate::server::installer::config::Endpoints;
use crate::server::installer::core::archive::{extract_tar_gz, extract_zip};
use crate::server::installer::core::downloader::{ArtifactDownloader, DownloadTask};
use crate::server::installer::types::ProgressReporter;
use crate::utils::process::PistonCommandExt;
use crate::utils::version::release_parts;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tokio::process::Command;

static JAVA_VERSION_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r#"version\s+"(\d+)(?:\.(\d+))?"#).ok());

/// Java major version a given Minecraft version needs on the server.
pub fn required_java_major(game_version: &str) -> u32 {
    match release_parts(game_version.split('-').next().unwrap_or(game_version)) {
        Some((minor, patch)) if minor > 20 || (minor == 20 && patch >= 5) => 21,
        Some((minor, _)) if minor >= 18 => 17,
        Some((17, _)) => 16,
        Some(_) => 8,
        // Weekly snapshots and unknown ids track the newest runtime
        None => 21,
    }
}

/// Parse the major version out of `java -version` output.
/// Handles both `1.8.0_392` and `17.0.9` styles.
pub fn parse_java_major(output: &str) -> Option<u32> {
    let caps = JAVA_VERSION_RE.as_ref()?.captures(output)?;
    let major: u32 = caps.get(1)?.as_str().parse().ok()?;
    if major == 1 {
        return caps.get(2)?.as_str().parse().ok();
    }
    Some(major)
}

/// Run `java -version` and report the major version.
pub async fn java_major_of(java: &Path) -> Option<u32> {
    let output = Command::new(java)
        .arg("-version")
        .suppress_console()
        .output()
        .await
        .ok()?;
    // java -version prints to stderr
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stderr),
        String::from_utf8_lossy(&output.stdout)
    );
    parse_java_major(&text)
}

/// Find the java executable inside an extracted runtime.
/// Archives usually nest one directory deep; macOS bundles add `Contents/Home`.
pub fn find_java_executable(dir: &Path) -> Option<PathBuf> {
    let executable = if cfg!(windows) { "java.exe" } else { "java" };

    let candidates = |base: &Path| {
        [
            base.join("bin").join(executable),
            base.join("Contents/Home/bin").join(executable),
        ]
    };

    if let Some(found) = candidates(dir).into_iter().find(|p| p.is_file()) {
        return Some(found);
    }

    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        if entry.path().is_dir() {
            if let Some(found) = candidates(&entry.path()).into_iter().find(|p| p.is_file()) {
                return Some(found);
            }
        }
    }
    None
}

/// Modern servers run on any newer JVM. Java 8 era servers break on 9+.
pub fn is_java_compatible(installed: u32, required: u32) -> bool {
    if required <= 8 {
        installed == required
    } else {
        installed >= required
    }
}

/// Look for an existing Java that can run a server needing `major`.
pub async fn find_java(runtime_dir: Option<&Path>, major: u32) -> Option<PathBuf> {
    if let Some(dir) = runtime_dir {
        if let Some(java) = find_java_executable(&dir.join(format!("temurin-{}", major))) {
            log::debug!("[java] Found managed runtime {:?}", java);
            return Some(java);
        }
    }

    let on_path = which::which("java").ok()?;
    match java_major_of(&on_path).await {
        Some(found) if is_java_compatible(found, major) => {
            log::debug!("[java] Using Java {} from PATH: {:?}", found, on_path);
            Some(on_path)
        }
        Some(found) => {
            log::info!(
                "[java] Java on PATH is version {}, Minecraft needs {}",
                found,
                major
            );
            None
        }
        None => None,
    }
}

fn adoptium_os() -> &'static str {
    if cfg!(windows) {
        "windows"
    } else if cfg!(target_os = "macos") {
        "mac"
    } else {
        "linux"
    }
}

fn adoptium_arch() -> &'static str {
    match std::env::consts::ARCH {
        "aarch64" => "aarch64",
        "arm" => "arm",
        "x86" => "x86",
        _ => "x64",
    }
}

/// Download and unpack a Temurin JRE into `runtime_dir/temurin-{major}`.
pub async fn install_java(
    endpoints: &Endpoints,
    runtime_dir: &Path,
    major: u32,
    downloader: &dyn ArtifactDownloader,
    reporter: &dyn ProgressReporter,
) -> Result<PathBuf> {
    let ext = if cfg!(windows) { "zip" } else { "tar.gz" };
    let url = format!(
        "{}/v3/binary/latest/{}/ga/{}/{}/jre/hotspot/normal/eclipse",
        endpoints.adoptium_api,
        major,
        adoptium_os(),
        adoptium_arch()
    );

    log::info!("[java] Downloading Temurin {} from {}", major, url);
    reporter.set_message(&format!("Downloading Java {}...", major));

    let archive = runtime_dir.join(format!("temurin-{}.{}", major, ext));
    let install_dir = runtime_dir.join(format!("temurin-{}", major));
    downloader
        .download(&DownloadTask::new(url, &archive), reporter)
        .await?;

    reporter.set_message(&format!("Extracting Java {}...", major));
    let extract_from = archive.clone();
    let extract_to = install_dir.clone();
    tokio::task::spawn_blocking(move || {
        if extract_from.extension().and_then(|e| e.to_str()) == Some("zip") {
            extract_zip(&extract_from, &extract_to)
        } else {
            extract_tar_gz(&extract_from, &extract_to)
        }
    })
    .await??;

    if let Err(e) = tokio::fs::remove_file(&archive).await {
        log::warn!("[java] Could not remove {:?}: {}", archive, e);
    }

    let java = find_java_executable(&install_dir).ok_or_else(|| {
        SetupError::Other(anyhow::anyhow!(
            "No java executable found after extracting Temurin {} to {:?}",
            major,
            install_dir
        ))
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&java)?.permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&java, perms)?;
    }

    log::info!("[java] Installed Java {} at {:?}", major, java);
    Ok(java)
}

/// Return a Java for `game_version`, provisioning one when a runtime directory is configured.
pub async fn ensure_java(
    endpoints: &Endpoints,
    runtime_dir: Option<&Path>,
    game_version: &str,
    downloader: &dyn ArtifactDownloader,
    reporter: &dyn ProgressReporter,
) -> Result<PathBuf> {
    let major = required_java_major(game_version);
    if let Some(found) = find_java(runtime_dir, major).await {
        return Ok(found);
    }

    match runtime_dir {
        Some(dir) => install_java(endpoints, dir, major, downloader, reporter).await,
        None => Err(SetupError::loader(format!(
            "Java {} is required for Minecraft {} but none was found",
            major, game_version
        ))),
    }
}
