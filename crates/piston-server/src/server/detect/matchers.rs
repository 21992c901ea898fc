use super::{Detection, DetectionSource, DirSnapshot, ServerKind};
use crate::server::installer::modloaders::InstallMarker;
use crate::server::installer::resolver::game_version_from_neoforge;
use crate::server::installer::types::ModloaderType;
use crate::utils::version::compare_versions;
use crate::server::modpack::parser::parse_curseforge_loader;
use crate::server::modpack::types::{
    CurseForgeManifest, ModpackInfo, ModrinthIndex, MODPACK_INFO_FILE,
};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

pub type Matcher = fn(&DirSnapshot) -> Option<Detection>;

/// Evidence sources in priority order. Earlier entries win.
pub const MATCHERS: &[(&str, Matcher)] = &[
    ("install_marker", install_marker),
    ("modpack_info", modpack_info),
    ("pack_index", pack_index),
    ("variables_txt", variables_txt),
    ("loader_layout", loader_layout),
    ("root_jar", root_jar),
    ("run_script", run_script),
    ("latest_log", latest_log),
];

/// How far into `logs/latest.log` detection reads.
pub const LOG_HEAD_LINES: usize = 200;

const RUN_SCRIPTS: &[&str] = &[
    "run.sh",
    "run.bat",
    "start.sh",
    "start.bat",
    "startserver.sh",
    "startserver.bat",
];

static FORGE_JAR: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"^forge-(\d+\.\d+(?:\.\d+)?)-([0-9][\w.]*?)(?:-(?:universal|shim|server))?\.jar$").ok()
});
static NEOFORGE_JAR: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^neoforge-(\d+\.\d+\.\d+(?:-beta)?)(?:-(?:universal|shim|server))?\.jar$").ok());
static FABRIC_JAR: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"^fabric-server-mc\.([^-]+(?:-[a-z]+\d*)*)-loader\.([^-]+)-launcher\.[^-]+\.jar$").ok()
});
static QUILT_JAR: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^quilt-server-.*\.jar$").ok());
static VANILLA_JAR: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^minecraft_server\.(.+)\.jar$").ok());

static SCRIPT_NEOFORGE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?:NEOFORGE_VERSION=|net/neoforged/neoforge/)([0-9][\w.\-]*?)(?:[/\s]|$)").ok()
});
static SCRIPT_FORGE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?:net/minecraftforge/forge/|forge-)(\d+\.\d+(?:\.\d+)?)-([0-9][\w.]*?)(?:[/\s]|-|\.jar|$)").ok()
});
static SCRIPT_FABRIC: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"fabric-server-(?:launch|mc\.)").ok());

static LOG_SERVER_VERSION: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"Starting minecraft server version (\S+)").ok());
static LOG_FABRIC: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"Loading Minecraft (\S+) with Fabric Loader (\S+)").ok());
static LOG_QUILT: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"Loading Minecraft (\S+) with Quilt Loader (\S+)").ok());
static LOG_NEOFORGE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"--fml\.neoForgeVersion,? (\S+?),").ok());
static LOG_FORGE_MODERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"--fml\.forgeVersion,? (\S+?),").ok());
static LOG_FML_MC: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"--fml\.mcVersion,? (\S+?),").ok());
static LOG_FORGE_LEGACY: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"Forge Mod Loader version (\S+) for Minecraft (\S+)|MinecraftForge v(\S+) Initialized").ok());

fn captures<'t>(re: &Lazy<Option<Regex>>, text: &'t str) -> Option<Captures<'t>> {
    re.as_ref()?.captures(text)
}

fn is_match(re: &Lazy<Option<Regex>>, text: &str) -> bool {
    re.as_ref().map(|r| r.is_match(text)).unwrap_or(false)
}

fn group(caps: &Captures<'_>, i: usize) -> Option<String> {
    caps.get(i).map(|m| m.as_str().to_string())
}

/// Our own loader marker.
pub fn install_marker(snap: &DirSnapshot) -> Option<Detection> {
    let marker = InstallMarker::load(snap.root())?;
    Some(
        Detection::new(marker.kind.into(), DetectionSource::InstallMarker)
            .with_game(Some(marker.game_version))
            .with_loader(marker.loader_version),
    )
}

/// `modpack_info.json` written after a pack install.
pub fn modpack_info(snap: &DirSnapshot) -> Option<Detection> {
    let info: ModpackInfo = serde_json::from_str(&snap.read_text(MODPACK_INFO_FILE)?).ok()?;
    Some(
        Detection::new(info.loader.into(), DetectionSource::ModpackRemnant)
            .with_game(Some(info.minecraft_version))
            .with_loader(info.loader_version),
    )
}

/// A pack index left in the root by an extracted server pack.
pub fn pack_index(snap: &DirSnapshot) -> Option<Detection> {
    if let Some(index) = snap
        .read_text("modrinth.index.json")
        .and_then(|t| serde_json::from_str::<ModrinthIndex>(&t).ok())
    {
        let (kind, version) = [
            ("fabric-loader", ServerKind::Fabric),
            ("quilt-loader", ServerKind::Quilt),
            ("neoforge", ServerKind::NeoForge),
            ("forge", ServerKind::Forge),
        ]
        .iter()
        .find_map(|(key, kind)| index.dependencies.get(*key).map(|v| (*kind, Some(v.clone()))))
        .unwrap_or((ServerKind::Vanilla, None));
        return Some(
            Detection::new(kind, DetectionSource::ModpackRemnant)
                .with_game(index.dependencies.get("minecraft").cloned())
                .with_loader(version),
        );
    }

    let cf: CurseForgeManifest = serde_json::from_str(&snap.read_text("manifest.json")?).ok()?;
    let (loader, version) = cf
        .minecraft
        .mod_loaders
        .iter()
        .find(|l| l.primary)
        .or_else(|| cf.minecraft.mod_loaders.first())
        .map(|l| parse_curseforge_loader(&l.id))
        .unwrap_or((ModloaderType::Vanilla, None));
    Some(
        Detection::new(loader.into(), DetectionSource::ModpackRemnant)
            .with_game(Some(cf.minecraft.version))
            .with_loader(version),
    )
}

/// `variables.txt` shipped with many server packs.
pub fn variables_txt(snap: &DirSnapshot) -> Option<Detection> {
    let text = snap.read_text("variables.txt")?;
    let mut game = None;
    let mut loader = None;
    let mut loader_version = None;

    for line in text.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').to_string();
        match key.trim() {
            "MINECRAFT_VERSION" => game = Some(value),
            "MODLOADER" => loader = Some(value),
            "MODLOADER_VERSION" => loader_version = Some(value),
            _ => {}
        }
    }

    let kind = match loader?.to_lowercase().as_str() {
        "forge" => ServerKind::Forge,
        "neoforge" => ServerKind::NeoForge,
        "fabric" => ServerKind::Fabric,
        "quilt" => ServerKind::Quilt,
        "vanilla" => ServerKind::Vanilla,
        _ => return None,
    };
    Some(
        Detection::new(kind, DetectionSource::ModpackRemnant)
            .with_game(game)
            .with_loader(loader_version),
    )
}

/// Directories the loaders create under `libraries/` and dot-folders.
pub fn loader_layout(snap: &DirSnapshot) -> Option<Detection> {
    if let Some(v) = snap.newest_subdir("libraries/net/neoforged/neoforge") {
        return Some(
            Detection::new(ServerKind::NeoForge, DetectionSource::LoaderLayout)
                .with_game(game_version_from_neoforge(&v))
                .with_loader(Some(v)),
        );
    }

    if snap.is_dir("libraries/net/minecraftforge/forge") {
        let newest = snap
            .subdirs("libraries/net/minecraftforge/forge")
            .into_iter()
            .filter_map(|d| {
                let (g, l) = d.split_once('-')?;
                Some((g.to_string(), l.to_string()))
            })
            .max_by(|(ga, la), (gb, lb)| {
                compare_versions(ga, gb).then_with(|| compare_versions(la, lb))
            });
        let (game, loader) = match newest {
            Some((g, l)) => (Some(g), Some(l)),
            None => (None, None),
        };
        return Some(
            Detection::new(ServerKind::Forge, DetectionSource::LoaderLayout)
                .with_game(game)
                .with_loader(loader),
        );
    }

    if let Some(v) = snap.newest_subdir("libraries/org/quiltmc/quilt-loader") {
        return Some(
            Detection::new(ServerKind::Quilt, DetectionSource::LoaderLayout).with_loader(Some(v)),
        );
    }
    if snap.is_dir(".quilt") {
        return Some(Detection::new(ServerKind::Quilt, DetectionSource::LoaderLayout));
    }

    if let Some(text) = snap.read_text(".fabric/server/version.json") {
        let value: serde_json::Value = serde_json::from_str(&text).ok()?;
        let loader = value
            .pointer("/loader/version")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let game = value
            .pointer("/game/version")
            .or_else(|| value.get("minecraft"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        return Some(
            Detection::new(ServerKind::Fabric, DetectionSource::LoaderLayout)
                .with_game(game)
                .with_loader(loader),
        );
    }
    if let Some(v) = snap.newest_subdir("libraries/net/fabricmc/fabric-loader") {
        return Some(
            Detection::new(ServerKind::Fabric, DetectionSource::LoaderLayout).with_loader(Some(v)),
        );
    }

    None
}

/// Recognisable jar names in the root. Loader jars beat a plain vanilla jar.
pub fn root_jar(snap: &DirSnapshot) -> Option<Detection> {
    let jars: Vec<&String> = snap
        .root_files()
        .iter()
        .filter(|f| f.ends_with(".jar") && !f.contains("installer"))
        .collect();

    for name in &jars {
        if let Some(c) = captures(&NEOFORGE_JAR, name) {
            let v = group(&c, 1);
            return Some(
                Detection::new(ServerKind::NeoForge, DetectionSource::RootJar)
                    .with_game(v.as_deref().and_then(game_version_from_neoforge))
                    .with_loader(v),
            );
        }
        if let Some(c) = captures(&FORGE_JAR, name) {
            return Some(
                Detection::new(ServerKind::Forge, DetectionSource::RootJar)
                    .with_game(group(&c, 1))
                    .with_loader(group(&c, 2)),
            );
        }
        if let Some(c) = captures(&FABRIC_JAR, name) {
            return Some(
                Detection::new(ServerKind::Fabric, DetectionSource::RootJar)
                    .with_game(group(&c, 1))
                    .with_loader(group(&c, 2)),
            );
        }
        if name.as_str() == "fabric-server-launch.jar" || name.as_str() == "fabric-server-launcher.jar" {
            return Some(Detection::new(ServerKind::Fabric, DetectionSource::RootJar));
        }
        if is_match(&QUILT_JAR, name) {
            return Some(Detection::new(ServerKind::Quilt, DetectionSource::RootJar));
        }
    }

    for name in &jars {
        if let Some(c) = captures(&VANILLA_JAR, name) {
            return Some(
                Detection::new(ServerKind::Vanilla, DetectionSource::RootJar).with_game(group(&c, 1)),
            );
        }
        if name.as_str() == "server.jar" || name.starts_with("minecraft_server") {
            return Some(Detection::new(ServerKind::Vanilla, DetectionSource::RootJar));
        }
    }

    None
}

/// Launch scripts that name the loader jar or library path.
pub fn run_script(snap: &DirSnapshot) -> Option<Detection> {
    for script in RUN_SCRIPTS {
        if !snap.has_file(script) {
            continue;
        }
        let Some(text) = snap.read_text(script) else {
            continue;
        };

        if let Some(c) = captures(&SCRIPT_NEOFORGE, &text) {
            let v = group(&c, 1);
            return Some(
                Detection::new(ServerKind::NeoForge, DetectionSource::RunScript)
                    .with_game(v.as_deref().and_then(game_version_from_neoforge))
                    .with_loader(v),
            );
        }
        if let Some(c) = captures(&SCRIPT_FORGE, &text) {
            return Some(
                Detection::new(ServerKind::Forge, DetectionSource::RunScript)
                    .with_game(group(&c, 1))
                    .with_loader(group(&c, 2)),
            );
        }
        if text.contains("quilt-server") {
            return Some(Detection::new(ServerKind::Quilt, DetectionSource::RunScript));
        }
        if is_match(&SCRIPT_FABRIC, &text) {
            return Some(Detection::new(ServerKind::Fabric, DetectionSource::RunScript));
        }
    }
    None
}

/// Banner lines near the top of `logs/latest.log`.
pub fn latest_log(snap: &DirSnapshot) -> Option<Detection> {
    let lines = snap.read_head("logs/latest.log", LOG_HEAD_LINES)?;

    let mut game: Option<String> = None;
    let mut found: Option<(ServerKind, Option<String>)> = None;

    for line in &lines {
        if game.is_none() {
            if let Some(c) = captures(&LOG_SERVER_VERSION, line) {
                game = group(&c, 1);
            } else if let Some(c) = captures(&LOG_FML_MC, line) {
                game = group(&c, 1);
            }
        }
        if found.is_some() {
            if game.is_some() {
                break;
            }
            continue;
        }

        if let Some(c) = captures(&LOG_FABRIC, line) {
            game = game.or_else(|| group(&c, 1));
            found = Some((ServerKind::Fabric, group(&c, 2)));
        } else if let Some(c) = captures(&LOG_QUILT, line) {
            game = game.or_else(|| group(&c, 1));
            found = Some((ServerKind::Quilt, group(&c, 2)));
        } else if let Some(c) = captures(&LOG_NEOFORGE, line) {
            found = Some((ServerKind::NeoForge, group(&c, 1)));
        } else if let Some(c) = captures(&LOG_FORGE_MODERN, line) {
            found = Some((ServerKind::Forge, group(&c, 1)));
        } else if let Some(c) = captures(&LOG_FORGE_LEGACY, line) {
            game = game.or_else(|| group(&c, 2));
            found = Some((ServerKind::Forge, group(&c, 1).or_else(|| group(&c, 3))));
        }
    }

    match found {
        Some((kind, loader)) => Some(
            Detection::new(kind, DetectionSource::LatestLog)
                .with_game(game)
                .with_loader(loader),
        ),
        None => game.map(|g| {
            Detection::new(ServerKind::Vanilla, DetectionSource::LatestLog).with_game(Some(g))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn snapshot_with(files: &[(&str, &str)]) -> (tempfile::TempDir, DirSnapshot) {
        let tmp = tempdir().unwrap();
        for (path, body) in files {
            let full = tmp.path().join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(full, body).unwrap();
        }
        let snap = DirSnapshot::capture(tmp.path());
        (tmp, snap)
    }

    #[test]
    fn variables_txt_is_read() {
        let (_tmp, snap) = snapshot_with(&[(
            "variables.txt",
            "MINECRAFT_VERSION=1.20.1\nMODLOADER=Forge\nMODLOADER_VERSION=\"47.2.0\"\n",
        )]);
        let found = variables_txt(&snap).unwrap();
        assert_eq!(found.kind, ServerKind::Forge);
        assert_eq!(found.game_version.as_deref(), Some("1.20.1"));
        assert_eq!(found.loader_version.as_deref(), Some("47.2.0"));
    }

    #[test]
    fn layout_matches_forge_and_neoforge() {
        let tmp = tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("libraries/net/minecraftforge/forge/1.20.1-47.2.0"))
            .unwrap();
        let found = loader_layout(&DirSnapshot::capture(tmp.path())).unwrap();
        assert_eq!(found.kind, ServerKind::Forge);
        assert_eq!(found.game_version.as_deref(), Some("1.20.1"));
        assert_eq!(found.loader_version.as_deref(), Some("47.2.0"));

        std::fs::create_dir_all(tmp.path().join("libraries/net/neoforged/neoforge/21.1.77")).unwrap();
        let found = loader_layout(&DirSnapshot::capture(tmp.path())).unwrap();
        assert_eq!(found.kind, ServerKind::NeoForge);
        assert_eq!(found.game_version.as_deref(), Some("1.21.1"));
    }

    #[test]
    fn layout_prefers_the_highest_version() {
        let tmp = tempdir().unwrap();
        for v in ["21.1.9", "21.1.77"] {
            std::fs::create_dir_all(tmp.path().join("libraries/net/neoforged/neoforge").join(v))
                .unwrap();
        }
        let found = loader_layout(&DirSnapshot::capture(tmp.path())).unwrap();
        assert_eq!(found.loader_version.as_deref(), Some("21.1.77"));

        let forge = tempdir().unwrap();
        for v in ["1.20.1-47.2.0", "1.20.1-47.10.1"] {
            std::fs::create_dir_all(forge.path().join("libraries/net/minecraftforge/forge").join(v))
                .unwrap();
        }
        let found = loader_layout(&DirSnapshot::capture(forge.path())).unwrap();
        assert_eq!(found.loader_version.as_deref(), Some("47.10.1"));
    }

    #[test]
    fn jar_names() {
        let (_tmp, snap) = snapshot_with(&[
            ("fabric-server-mc.1.20.1-loader.0.15.11-launcher.1.0.1.jar", ""),
            ("server.jar", ""),
        ]);
        let found = root_jar(&snap).unwrap();
        assert_eq!(found.kind, ServerKind::Fabric);
        assert_eq!(found.game_version.as_deref(), Some("1.20.1"));
        assert_eq!(found.loader_version.as_deref(), Some("0.15.11"));

        let (_tmp, snap) = snapshot_with(&[("forge-1.12.2-14.23.5.2859.jar", "")]);
        let found = root_jar(&snap).unwrap();
        assert_eq!(found.kind, ServerKind::Forge);
        assert_eq!(found.game_version.as_deref(), Some("1.12.2"));
        assert_eq!(found.loader_version.as_deref(), Some("14.23.5.2859"));

        let (_tmp, snap) = snapshot_with(&[("minecraft_server.1.8.9.jar", "")]);
        let found = root_jar(&snap).unwrap();
        assert_eq!(found.kind, ServerKind::Vanilla);
        assert_eq!(found.game_version.as_deref(), Some("1.8.9"));

        let (_tmp, snap) = snapshot_with(&[("forge-1.20.1-47.2.0-installer.jar", "")]);
        assert!(root_jar(&snap).is_none());
    }

    #[test]
    fn run_script_names_loader() {
        let (_tmp, snap) = snapshot_with(&[(
            "run.sh",
            "#!/usr/bin/env sh\njava @user_jvm_args.txt @libraries/net/minecraftforge/forge/1.20.1-47.2.0/unix_args.txt \"$@\"\n",
        )]);
        let found = run_script(&snap).unwrap();
        assert_eq!(found.kind, ServerKind::Forge);
        assert_eq!(found.loader_version.as_deref(), Some("47.2.0"));
    }

    #[test]
    fn log_banners() {
        let (_tmp, snap) = snapshot_with(&[(
            "logs/latest.log",
            "[main/INFO] [cp.mo.mo.Launcher/MODLAUNCHER]: ModLauncher running: args [--launchTarget, forgeserver, --fml.forgeVersion, 47.2.0, --fml.mcVersion, 1.20.1, --fml.forgeGroup, net.minecraftforge]\n",
        )]);
        let found = latest_log(&snap).unwrap();
        assert_eq!(found.kind, ServerKind::Forge);
        assert_eq!(found.loader_version.as_deref(), Some("47.2.0"));
        assert_eq!(found.game_version.as_deref(), Some("1.20.1"));

        let (_tmp, snap) = snapshot_with(&[(
            "logs/latest.log",
            "[Server thread/INFO]: Starting minecraft server version 1.21.1\n",
        )]);
        let found = latest_log(&snap).unwrap();
        assert_eq!(found.kind, ServerKind::Vanilla);
        assert_eq!(found.game_version.as_deref(), Some("1.21.1"));
    }

    #[test]
    fn marker_outranks_jar_names() {
        let (tmp, _) = snapshot_with(&[("server.jar", "")]);
        let marker = InstallMarker {
            kind: ModloaderType::Quilt,
            game_version: "1.20.1".into(),
            loader_version: Some("0.26.0".into()),
            launch: crate::server::installer::modloaders::LaunchTarget::Jar {
                path: "quilt-server-launch.jar".into(),
            },
            artifacts: Vec::new(),
            installed_at: chrono::Utc::now(),
        };
        marker.save(tmp.path()).unwrap();

        let found = crate::server::detect::detect(tmp.path());
        assert_eq!(found.kind, ServerKind::Quilt);
        assert_eq!(found.source, DetectionSource::InstallMarker);
    }
}
