//! Server type detection for existing directories.
//!
//! Detection never writes anything. It looks at a sorted snapshot of the
//! directory and runs the matchers in `matchers::MATCHERS` in order; the first
//! hit wins and is then completed from the log and the vanilla jar when it
//! lacks a game version.

pub mod matchers;

use crate::server::installer::core::archive::read_entry;
use crate::server::installer::types::ModloaderType;
use crate::utils::version::compare_versions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Closed set of server kinds the tool understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    Vanilla,
    Forge,
    Fabric,
    NeoForge,
    Quilt,
    Unknown,
}

impl ServerKind {
    pub fn loader(&self) -> Option<ModloaderType> {
        match self {
            ServerKind::Vanilla => Some(ModloaderType::Vanilla),
            ServerKind::Forge => Some(ModloaderType::Forge),
            ServerKind::Fabric => Some(ModloaderType::Fabric),
            ServerKind::NeoForge => Some(ModloaderType::NeoForge),
            ServerKind::Quilt => Some(ModloaderType::Quilt),
            ServerKind::Unknown => None,
        }
    }

    pub fn is_modded(&self) -> bool {
        !matches!(self, ServerKind::Vanilla | ServerKind::Unknown)
    }
}

impl From<ModloaderType> for ServerKind {
    fn from(loader: ModloaderType) -> Self {
        match loader {
            ModloaderType::Vanilla => ServerKind::Vanilla,
            ModloaderType::Fabric => ServerKind::Fabric,
            ModloaderType::Quilt => ServerKind::Quilt,
            ModloaderType::Forge => ServerKind::Forge,
            ModloaderType::NeoForge => ServerKind::NeoForge,
        }
    }
}

impl std::fmt::Display for ServerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServerKind::Vanilla => "Vanilla",
            ServerKind::Forge => "Forge",
            ServerKind::Fabric => "Fabric",
            ServerKind::NeoForge => "NeoForge",
            ServerKind::Quilt => "Quilt",
            ServerKind::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Which piece of evidence decided the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionSource {
    InstallMarker,
    ModpackRemnant,
    LoaderLayout,
    RootJar,
    RunScript,
    LatestLog,
    Nothing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub kind: ServerKind,
    pub game_version: Option<String>,
    pub loader_version: Option<String>,
    pub source: DetectionSource,
}

impl Detection {
    pub fn new(kind: ServerKind, source: DetectionSource) -> Self {
        Self {
            kind,
            game_version: None,
            loader_version: None,
            source,
        }
    }

    pub fn unknown() -> Self {
        Self::new(ServerKind::Unknown, DetectionSource::Nothing)
    }

    pub fn with_game(mut self, version: Option<String>) -> Self {
        self.game_version = version.filter(|v| !v.is_empty());
        self
    }

    pub fn with_loader(mut self, version: Option<String>) -> Self {
        self.loader_version = version.filter(|v| !v.is_empty());
        self
    }
}

/// Sorted, read-only view of a server directory.
pub struct DirSnapshot {
    root: PathBuf,
    files: Vec<String>,
}

impl DirSnapshot {
    pub fn capture(root: &Path) -> Self {
        let files = list_sorted(root, false);
        Self {
            root: root.to_path_buf(),
            files,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Regular files directly in the root, sorted by name.
    pub fn root_files(&self) -> &[String] {
        &self.files
    }

    pub fn has_file(&self, name: &str) -> bool {
        self.files.binary_search_by(|f| f.as_str().cmp(name)).is_ok()
    }

    pub fn is_dir(&self, rel: &str) -> bool {
        self.root.join(rel).is_dir()
    }

    /// Sub-directory names of `rel`, sorted.
    pub fn subdirs(&self, rel: &str) -> Vec<String> {
        list_sorted(&self.root.join(rel), true)
    }

    /// Highest version-named sub-directory of `rel`.
    pub fn newest_subdir(&self, rel: &str) -> Option<String> {
        self.subdirs(rel)
            .into_iter()
            .max_by(|a, b| compare_versions(a, b))
    }

    pub fn read_text(&self, rel: &str) -> Option<String> {
        let bytes = std::fs::read(self.root.join(rel)).ok()?;
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// The first `max` lines of a text file.
    pub fn read_head(&self, rel: &str, max: usize) -> Option<Vec<String>> {
        use std::io::{BufRead, BufReader};
        let file = std::fs::File::open(self.root.join(rel)).ok()?;
        let mut lines = Vec::new();
        let mut reader = BufReader::new(file);
        let mut buf = Vec::new();
        while lines.len() < max {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => lines.push(String::from_utf8_lossy(&buf).trim_end().to_string()),
            }
        }
        Some(lines)
    }
}

fn list_sorted(dir: &Path, dirs: bool) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .flatten()
            .filter(|e| e.file_type().map(|t| t.is_dir() == dirs).unwrap_or(false))
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

/// Classify `root`. Never fails: unreadable or empty directories are `Unknown`.
pub fn detect(root: &Path) -> Detection {
    let snapshot = DirSnapshot::capture(root);

    let Some((name, mut found)) = matchers::MATCHERS
        .iter()
        .find_map(|(name, matcher)| matcher(&snapshot).map(|d| (*name, d)))
    else {
        log::debug!("[detect] Nothing recognisable in {:?}", root);
        return Detection::unknown();
    };

    log::debug!("[detect] {:?} matched by {}: {:?}", root, name, found);

    if found.game_version.is_none() || found.loader_version.is_none() {
        if let Some(from_log) = matchers::latest_log(&snapshot) {
            if found.game_version.is_none() {
                found.game_version = from_log.game_version.clone();
            }
            if found.loader_version.is_none() && from_log.kind == found.kind {
                found.loader_version = from_log.loader_version;
            }
        }
    }

    if found.game_version.is_none() && snapshot.has_file("server.jar") {
        found.game_version = vanilla_jar_version(&root.join("server.jar"));
    }

    found
}

#[derive(Deserialize)]
struct EmbeddedVersion {
    id: Option<String>,
    name: Option<String>,
}

/// Vanilla server jars since 1.14 carry a `version.json`.
pub fn vanilla_jar_version(jar: &Path) -> Option<String> {
    let bytes = read_entry(jar, "version.json").ok()??;
    let parsed: EmbeddedVersion = serde_json::from_slice(&bytes).ok()?;
    parsed.id.or(parsed.name)
}
