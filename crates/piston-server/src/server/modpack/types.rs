use crate::server::installer::core::downloader::ExpectedHash;
use crate::server::installer::types::ModloaderType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Modrinth modpack index (modrinth.index.json)
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ModrinthIndex {
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    #[serde(default = "default_game")]
    pub game: String,
    pub version_id: String,
    pub name: String,
    pub summary: Option<String>,
    pub files: Vec<ModrinthFile>,
    #[serde(default)]
    pub dependencies: HashMap<String, String>,
}

fn default_format_version() -> u32 {
    1
}
fn default_game() -> String {
    "minecraft".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ModrinthFile {
    pub path: String,
    #[serde(default)]
    pub hashes: HashMap<String, String>,
    pub env: Option<ModrinthEnv>,
    #[serde(default)]
    pub downloads: Vec<String>,
    #[serde(default)]
    pub file_size: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "lowercase")]
pub struct ModrinthEnv {
    #[serde(default = "default_required")]
    pub client: String, // "required", "optional", "unsupported"
    #[serde(default = "default_required")]
    pub server: String,
}

fn default_required() -> String {
    "required".to_string()
}

/// CurseForge modpack manifest (manifest.json)
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CurseForgeManifest {
    pub minecraft: CurseForgeMinecraft,
    #[serde(default = "default_modpack")]
    pub manifest_type: String,
    #[serde(default = "default_manifest_version")]
    pub manifest_version: u32,
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub files: Vec<CurseForgeFile>,
    #[serde(default = "default_overrides")]
    pub overrides: String,
}

fn default_manifest_version() -> u32 {
    1
}
fn default_modpack() -> String {
    "minecraftModpack".to_string()
}
fn default_overrides() -> String {
    "overrides".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CurseForgeMinecraft {
    pub version: String,
    #[serde(default)]
    pub mod_loaders: Vec<CurseForgeModLoader>,
    pub recommended_ram: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CurseForgeModLoader {
    pub id: String,
    #[serde(default)]
    pub primary: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CurseForgeFile {
    #[serde(alias = "projectID")]
    pub project_id: u32,
    #[serde(alias = "fileID")]
    pub file_id: u32,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub hashes: Option<Vec<CurseForgeHash>>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CurseForgeHash {
    pub value: String,
    pub algo: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModpackFormat {
    Modrinth,
    CurseForge,
}

/// Which side a pack file is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileSide {
    ClientOnly,
    ServerOnly,
    Universal,
}

impl FileSide {
    /// Modrinth `env`: a file the server does not support is client-only,
    /// one the client does not support is server-only.
    pub fn from_modrinth(env: Option<&ModrinthEnv>) -> Self {
        match env {
            Some(env) if env.server == "unsupported" && env.client != "unsupported" => {
                FileSide::ClientOnly
            }
            Some(env) if env.client == "unsupported" && env.server != "unsupported" => {
                FileSide::ServerOnly
            }
            _ => FileSide::Universal,
        }
    }
}

/// Where a pack file comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    /// Primary URL followed by mirrors
    Direct { urls: Vec<String> },
    /// Needs a `CurseForgeResolver` to become a URL
    CurseForge { project_id: u32, file_id: u32 },
}

/// One file referenced by a pack manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct PackFileEntry {
    /// Relative path inside the server root; CurseForge entries learn theirs from the resolver
    pub path: Option<String>,
    pub source: FileSource,
    pub hash: Option<ExpectedHash>,
    pub size: Option<u64>,
    pub side: FileSide,
    pub required: bool,
}

/// Format-independent view of a modpack archive.
#[derive(Debug, Clone, PartialEq)]
pub struct ModpackManifest {
    pub name: String,
    pub version: String,
    pub author: Option<String>,
    pub format: ModpackFormat,
    pub minecraft_version: String,
    pub loader: ModloaderType,
    pub loader_version: Option<String>,
    pub files: Vec<PackFileEntry>,
    /// Override folders inside the archive, applied in order
    pub overrides: Vec<String>,
    /// Folder prefix when the pack is nested one level deep in the archive (ends with `/`)
    pub root_prefix: Option<String>,
    pub recommended_ram_mb: Option<u32>,
}

impl ModpackManifest {
    /// Entry name of the index/manifest inside the archive.
    pub fn index_entry(&self) -> String {
        let file = match self.format {
            ModpackFormat::Modrinth => "modrinth.index.json",
            ModpackFormat::CurseForge => "manifest.json",
        };
        format!("{}{}", self.root_prefix.as_deref().unwrap_or(""), file)
    }

    pub fn server_files(&self) -> impl Iterator<Item = &PackFileEntry> {
        self.files.iter().filter(|f| f.side != FileSide::ClientOnly)
    }
}

/// `modpack_info.json` left in the server root after a pack install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModpackInfo {
    pub name: String,
    pub version: String,
    pub minecraft_version: String,
    pub loader: ModloaderType,
    pub loader_version: Option<String>,
    pub source: ModpackFormat,
}

pub const MODPACK_INFO_FILE: &str = "modpack_info.json";
