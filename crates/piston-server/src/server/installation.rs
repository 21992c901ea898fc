//! A server directory as the tool sees it.

use crate::error::{Result, SetupError};
use crate::server::detect::{self, ServerKind};
use crate::server::installer::lock::canonical_key;
use crate::server::installer::modloaders::{InstallMarker, LaunchTarget, STATE_DIR};
use crate::server::supervisor::files::eula_accepted;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

pub const STATE_FILE: &str = "state.json";

/// Persisted bits that cannot be re-derived from the directory contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationState {
    #[serde(default)]
    pub has_run_before: bool,
    #[serde(default)]
    pub first_ready_at: Option<DateTime<Utc>>,
}

impl InstallationState {
    pub fn path(root: &Path) -> PathBuf {
        root.join(STATE_DIR).join(STATE_FILE)
    }

    pub fn load(root: &Path) -> Self {
        std::fs::read_to_string(Self::path(root))
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = Self::path(root);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInstallation {
    pub root: PathBuf,
    pub kind: ServerKind,
    pub game_version: Option<String>,
    pub loader_version: Option<String>,
    pub has_run_before: bool,
    pub eula_accepted: bool,
    /// How to start the server, when a loader install recorded it
    pub launch: Option<LaunchTarget>,
}

impl ServerInstallation {
    /// Inspect `root` without modifying it.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let detected = detect::detect(&root);
        let state = InstallationState::load(&root);
        let launch = InstallMarker::load(&root).map(|m| m.launch);
        Self {
            eula_accepted: eula_accepted(&root),
            kind: detected.kind,
            game_version: detected.game_version,
            loader_version: detected.loader_version,
            has_run_before: state.has_run_before,
            launch,
            root,
        }
    }

    /// Reflect a completed loader install.
    pub fn apply_marker(&mut self, marker: &InstallMarker) {
        self.kind = marker.kind.into();
        self.game_version = Some(marker.game_version.clone());
        self.loader_version = marker.loader_version.clone();
        self.launch = Some(marker.launch.clone());
    }

    /// Record the first successful boot.
    pub fn mark_has_run(&mut self) -> Result<()> {
        if self.has_run_before {
            return Ok(());
        }
        let mut state = InstallationState::load(&self.root);
        state.has_run_before = true;
        state.first_ready_at.get_or_insert_with(Utc::now);
        state.save(&self.root)?;
        self.has_run_before = true;
        Ok(())
    }
}

/// Folder names that are never a good home for a server.
const DANGEROUS_NAMES: &[(&str, &str)] = &[
    ("downloads", "the Downloads folder"),
    ("descargas", "the Downloads folder"),
    ("desktop", "the Desktop"),
    ("escritorio", "the Desktop"),
    ("documents", "the Documents folder"),
    ("documentos", "the Documents folder"),
    ("my documents", "the Documents folder"),
    ("mis documentos", "the Documents folder"),
    ("program files", "Program Files"),
    ("program files (x86)", "Program Files"),
    ("archivos de programa", "Program Files"),
    ("windows", "a Windows system folder"),
    ("system32", "a Windows system folder"),
    ("users", "the Users folder"),
    ("appdata", "the AppData folder"),
];

/// Anything below these is a system location.
const SYSTEM_PARTS: &[&str] = &["program files", "program files (x86)", "windows", "system32"];

const UNIX_SYSTEM_DIRS: &[&str] = &[
    "/bin", "/boot", "/dev", "/etc", "/home", "/lib", "/lib64", "/opt", "/proc", "/root",
    "/sbin", "/sys", "/tmp", "/usr", "/var",
];

/// Reject filesystem roots and well-known user or system folders.
pub fn validate_target_dir(dir: &Path) -> Result<()> {
    let path = canonical_key(dir);
    let unsafe_dir = |reason: String| SetupError::UnsafeDirectory {
        path: path.clone(),
        reason,
    };

    if path.parent().is_none() || path.components().all(|c| !matches!(c, Component::Normal(_))) {
        return Err(unsafe_dir("it is a filesystem root".to_string()));
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if let Some((_, what)) = DANGEROUS_NAMES.iter().find(|(n, _)| *n == name) {
        return Err(unsafe_dir(format!("it is {}", what)));
    }

    for component in path.components() {
        if let Component::Normal(part) = component {
            let part = part.to_string_lossy().to_lowercase();
            if SYSTEM_PARTS.contains(&part.as_str()) {
                return Err(unsafe_dir(format!("it is inside the system folder '{}'", part)));
            }
        }
    }

    if cfg!(unix) {
        let as_str = path.to_string_lossy();
        if UNIX_SYSTEM_DIRS.contains(&as_str.as_ref()) {
            return Err(unsafe_dir("it is a system directory".to_string()));
        }
    }

    Ok(())
}

/// Whether `dir` already holds a server (vanilla or modded).
pub fn has_server_files(dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    let names: Vec<String> = entries
        .flatten()
        .filter_map(|e| e.file_name().to_str().map(str::to_lowercase))
        .collect();

    let jar_prefixes = ["forge-", "neoforge-", "fabric-server-", "quilt-server-", "minecraft_server"];
    let scripts = [
        "run.sh",
        "run.bat",
        "start.sh",
        "start.bat",
        "startserver.sh",
        "startserver.bat",
        "server.properties",
        "server.jar",
    ];

    names.iter().any(|n| {
        scripts.contains(&n.as_str())
            || (n.ends_with(".jar") && jar_prefixes.iter().any(|p| n.starts_with(p)))
    }) || dir.join("libraries/net/minecraftforge").is_dir()
        || dir.join("libraries/net/neoforged").is_dir()
        || InstallMarker::path(dir).is_file()
}
