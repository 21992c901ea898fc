use crate::error::{Result, SetupError};
use crate::server::installer::core::downloader::ExpectedHash;
use crate::server::installer::types::ModloaderType;
use crate::server::modpack::types::{
    CurseForgeManifest, FileSide, FileSource, ModpackFormat, ModpackManifest, ModrinthIndex,
    PackFileEntry,
};
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use zip::ZipArchive;

/// Detects the modpack format and returns its manifest from a ZIP file.
/// The index may sit at the archive root or one folder deep.
pub fn read_manifest<P: AsRef<Path>>(path: P) -> Result<ModpackManifest> {
    let path_ref = path.as_ref();
    log::info!("[read_manifest] Opening ZIP: {:?}", path_ref);

    let file = File::open(path_ref)?;
    let mut archive = ZipArchive::new(file)?;
    read_manifest_from(&mut archive)
}

pub fn read_manifest_from<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<ModpackManifest> {
    let mut modrinth_data: Option<(String, ModrinthIndex)> = None;
    let mut curseforge_data: Option<(String, CurseForgeManifest)> = None;
    let mut last_error: Option<String> = None;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().replace('\\', "/");
        if name.matches('/').count() > 1 {
            continue;
        }

        if name == "modrinth.index.json" || name.ends_with("/modrinth.index.json") {
            let mut content = String::new();
            file.read_to_string(&mut content)?;
            match serde_json::from_str::<ModrinthIndex>(&content) {
                Ok(index) => {
                    let prefix = name.trim_end_matches("modrinth.index.json").to_string();
                    log::info!("[read_manifest] Parsed Modrinth index at prefix '{}'", prefix);
                    modrinth_data = Some((prefix, index));
                    break; // Modrinth is primary preference
                }
                Err(e) => {
                    let err_msg = format!("Found {} but failed to parse: {}", name, e);
                    log::warn!("[read_manifest] {}", err_msg);
                    last_error = Some(err_msg);
                }
            }
        } else if name == "manifest.json" || name.ends_with("/manifest.json") {
            let mut content = String::new();
            file.read_to_string(&mut content)?;
            match serde_json::from_str::<CurseForgeManifest>(&content) {
                Ok(manifest) => {
                    let prefix = name.trim_end_matches("manifest.json").to_string();
                    log::info!("[read_manifest] Parsed CurseForge manifest at prefix '{}'", prefix);
                    curseforge_data = Some((prefix, manifest));
                }
                Err(e) => {
                    let err_msg = format!("Found {} but failed to parse: {}", name, e);
                    log::warn!("[read_manifest] {}", err_msg);
                    last_error = Some(err_msg);
                }
            }
        }
    }

    let (prefix, mut manifest) = if let Some((prefix, index)) = modrinth_data {
        (prefix, manifest_from_modrinth(index))
    } else if let Some((prefix, cf)) = curseforge_data {
        (prefix, manifest_from_curseforge(cf))
    } else {
        let base = "No supported modpack metadata (modrinth.index.json or manifest.json) found in archive";
        return Err(SetupError::Other(match last_error {
            Some(e) => anyhow::anyhow!("{}. Last parse error: {}", base, e),
            None => anyhow::anyhow!("{}", base),
        }));
    };

    if !prefix.is_empty() {
        manifest.overrides = manifest
            .overrides
            .iter()
            .map(|o| format!("{}{}", prefix, o))
            .collect();
        manifest.root_prefix = Some(prefix);
    }

    log::info!(
        "[read_manifest] {} {} ({:?}): Minecraft {}, {} {}, {} files",
        manifest.name,
        manifest.version,
        manifest.format,
        manifest.minecraft_version,
        manifest.loader,
        manifest.loader_version.as_deref().unwrap_or("-"),
        manifest.files.len()
    );
    Ok(manifest)
}

fn manifest_from_modrinth(index: ModrinthIndex) -> ModpackManifest {
    let minecraft_version = index
        .dependencies
        .get("minecraft")
        .cloned()
        .unwrap_or_else(|| "unknown".to_string());

    let (loader, loader_version) = [
        ("fabric-loader", ModloaderType::Fabric),
        ("forge", ModloaderType::Forge),
        ("neoforge", ModloaderType::NeoForge),
        ("quilt-loader", ModloaderType::Quilt),
    ]
    .iter()
    .find_map(|(key, kind)| index.dependencies.get(*key).map(|v| (*kind, Some(v.clone()))))
    .unwrap_or((ModloaderType::Vanilla, None));

    let files = index
        .files
        .into_iter()
        .map(|f| {
            let hash = f
                .hashes
                .get("sha1")
                .map(|h| ExpectedHash::Sha1(h.clone()))
                .or_else(|| f.hashes.get("sha512").map(|h| ExpectedHash::Sha512(h.clone())));
            PackFileEntry {
                side: FileSide::from_modrinth(f.env.as_ref()),
                path: Some(f.path),
                source: FileSource::Direct { urls: f.downloads },
                hash,
                size: Some(f.file_size).filter(|s| *s > 0),
                required: true,
            }
        })
        .collect();

    ModpackManifest {
        name: index.name,
        version: index.version_id,
        author: None,
        format: ModpackFormat::Modrinth,
        minecraft_version,
        loader,
        loader_version,
        files,
        overrides: vec!["overrides".to_string(), "server-overrides".to_string()],
        root_prefix: None,
        recommended_ram_mb: None,
    }
}

/// CurseForge loader ids look like `forge-47.2.0`, `neoforge-21.1.77`,
/// `fabric-0.15.11` or `quilt-0.26.0`.
pub fn parse_curseforge_loader(id: &str) -> (ModloaderType, Option<String>) {
    let prefixes = [
        ("neoforge-", ModloaderType::NeoForge),
        ("forge-", ModloaderType::Forge),
        ("fabric-loader-", ModloaderType::Fabric),
        ("fabric-", ModloaderType::Fabric),
        ("quilt-loader-", ModloaderType::Quilt),
        ("quilt-", ModloaderType::Quilt),
    ];
    for (prefix, kind) in prefixes {
        if let Some(version) = id.strip_prefix(prefix) {
            return (kind, Some(version.to_string()));
        }
    }
    (ModloaderType::Vanilla, None)
}

fn manifest_from_curseforge(manifest: CurseForgeManifest) -> ModpackManifest {
    let (loader, loader_version) = manifest
        .minecraft
        .mod_loaders
        .iter()
        .find(|l| l.primary)
        .or_else(|| manifest.minecraft.mod_loaders.first())
        .map(|l| parse_curseforge_loader(&l.id))
        .unwrap_or((ModloaderType::Vanilla, None));

    let files = manifest
        .files
        .iter()
        .map(|f| {
            // algo 1 is SHA-1
            let hash = f.hashes.as_ref().and_then(|hlist| {
                hlist
                    .iter()
                    .find(|h| h.algo == 1)
                    .map(|h| ExpectedHash::Sha1(h.value.clone()))
            });
            PackFileEntry {
                path: None,
                source: FileSource::CurseForge {
                    project_id: f.project_id,
                    file_id: f.file_id,
                },
                hash,
                size: None,
                side: FileSide::Universal,
                required: f.required,
            }
        })
        .collect();

    ModpackManifest {
        name: manifest.name,
        version: manifest.version,
        author: manifest.author,
        format: ModpackFormat::CurseForge,
        minecraft_version: manifest.minecraft.version,
        loader,
        loader_version,
        files,
        overrides: vec![manifest.overrides],
        root_prefix: None,
        recommended_ram_mb: manifest.minecraft.recommended_ram,
    }
}
