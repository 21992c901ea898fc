use super::SupervisorConfig;
use crate::error::{Result, SetupError};
use crate::server::installation::ServerInstallation;
use crate::server::installer::modloaders::LaunchTarget;
use crate::utils::hardware::recommended_ram_mb;
use crate::utils::version::compare_versions;
use std::path::{Path, PathBuf};

pub const DISABLED_CLIENT_MODS_DIR: &str = "mods_disabled_client";

/// File name fragments of mods that only work on the client and crash a
/// dedicated server on load.
const CLIENT_ONLY_MODS: &[&str] = &[
    "entity_texture_features",
    "entity_model_features",
    "embeddium",
    "rubidium",
    "oculus",
    "iris-",
    "optifine",
    "optifabric",
    "sodium",
    "immediatelyfast",
    "betteranimationscollection",
    "notenoughanimations",
    "visuality",
    "fallingleaves",
    "falling_leaves",
    "skinlayers3d",
    "3dskinlayers",
    "dynamiclights",
    "presence_footsteps",
    "sound_physics",
    "betterf3",
    "betterthirdperson",
    "better_third_person",
    "chat_heads",
    "fancymenu",
    "loadingbackgrounds",
    "xaerosminimap",
    "xaeroworldmap",
    "journeymap-client",
    "zoomify",
    "justzoom",
    "logical_zoom",
    "shoulder_surfing",
    "lazydfu",
    "entityculling",
    "extreme_sound_muffler",
    "screenshot_to_clipboard",
    "borderless_window",
    "replay_mod",
    "minihud",
    "tweakeroo",
    "litematica",
    "item_scroller",
    "cit_resewn",
    "custom_entity_models",
    "exordium",
    "dashloader",
    "cull_less_leaves",
    "enhanced_block_entities",
    "torohealth",
    "mod_menu",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl LaunchCommand {
    /// Shell-style rendering for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(self.args.iter().cloned())
            .map(|a| shlex::try_quote(&a).map(|q| q.into_owned()).unwrap_or(a))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Build the JVM invocation for `install`.
///
/// A jar launch is `java -Xms -Xmx [extra] -jar <jar> nogui`. Forge and
/// NeoForge argument-file launches replace `-jar <jar>` with
/// `@user_jvm_args.txt @<dir>/unix_args.txt` (`win_args.txt` on Windows).
pub fn build_launch_command(
    install: &ServerInstallation,
    config: &SupervisorConfig,
) -> Result<LaunchCommand> {
    let root = install.root.as_path();

    if let Some(custom) = &config.command_override {
        let (program, args) = custom.split_first().ok_or_else(|| {
            SetupError::Other(anyhow::anyhow!("Empty launch command override"))
        })?;
        return Ok(LaunchCommand {
            program: PathBuf::from(program),
            args: args.to_vec(),
            working_dir: root.to_path_buf(),
        });
    }

    let target = match &install.launch {
        Some(target) => target.clone(),
        None => guess_launch_target(root).ok_or_else(|| {
            SetupError::Other(anyhow::anyhow!(
                "No launchable server jar found in {:?}",
                root
            ))
        })?,
    };

    let ram = config
        .ram_mb
        .unwrap_or_else(|| recommended_ram_mb(count_mods(root)));
    let mut args = vec![format!("-Xms{}M", ram), format!("-Xmx{}M", ram)];
    args.extend(config.extra_jvm_args.iter().cloned());

    match target {
        LaunchTarget::Jar { path } => {
            args.push("-jar".to_string());
            args.push(path.to_string_lossy().into_owned());
        }
        LaunchTarget::ArgFiles { args_dir } => {
            if root.join("user_jvm_args.txt").is_file() {
                args.push("@user_jvm_args.txt".to_string());
            }
            let file = if cfg!(windows) { "win_args.txt" } else { "unix_args.txt" };
            let rel = args_dir.join(file);
            args.push(format!("@{}", rel.to_string_lossy().replace('\\', "/")));
        }
    }
    args.push("nogui".to_string());

    Ok(LaunchCommand {
        program: config
            .java_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("java")),
        args,
        working_dir: root.to_path_buf(),
    })
}

/// Launch target for directories that were not set up by this tool.
pub fn guess_launch_target(root: &Path) -> Option<LaunchTarget> {
    for dir in ["libraries/net/neoforged/neoforge", "libraries/net/minecraftforge/forge"] {
        let Ok(entries) = std::fs::read_dir(root.join(dir)) else {
            continue;
        };
        let newest = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.join("unix_args.txt").is_file() || p.join("win_args.txt").is_file())
            .max_by(|a, b| compare_versions(&dir_name(a), &dir_name(b)));
        if let Some(found) = newest {
            let rel = found.strip_prefix(root).ok()?.to_path_buf();
            return Some(LaunchTarget::ArgFiles { args_dir: rel });
        }
    }

    let mut jars: Vec<String> = std::fs::read_dir(root)
        .ok()?
        .flatten()
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .filter(|n| n.ends_with(".jar") && !n.contains("installer"))
        .collect();
    jars.sort();

    let preferred = [
        "quilt-server-launch.jar",
        "fabric-server-launch.jar",
        "fabric-server-launcher.jar",
    ];
    let pick = preferred
        .iter()
        .find(|p| jars.iter().any(|j| j == *p))
        .map(|p| p.to_string())
        .or_else(|| {
            jars.iter()
                .filter(|j| {
                    j.starts_with("fabric-server-mc.")
                        || j.starts_with("forge-")
                        || j.starts_with("neoforge-")
                })
                .min_by_key(|j| j.len())
                .cloned()
        })
        .or_else(|| jars.iter().find(|j| *j == "server.jar").cloned())
        .or_else(|| jars.iter().find(|j| j.starts_with("minecraft_server")).cloned())?;

    Some(LaunchTarget::Jar { path: pick.into() })
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn count_mods(root: &Path) -> usize {
    std::fs::read_dir(root.join("mods"))
        .map(|entries| {
            entries
                .flatten()
                .filter(|e| e.file_name().to_string_lossy().ends_with(".jar"))
                .count()
        })
        .unwrap_or(0)
}

pub fn is_client_only_mod(file_name: &str) -> bool {
    let lower = file_name.to_lowercase();
    CLIENT_ONLY_MODS.iter().any(|fragment| lower.contains(fragment))
}

/// Move known client-only jars out of `mods/` into `mods_disabled_client/`.
/// Returns the moved file names.
pub fn disable_client_only_mods(root: &Path) -> Result<Vec<String>> {
    let mods = root.join("mods");
    let Ok(entries) = std::fs::read_dir(&mods) else {
        return Ok(Vec::new());
    };

    let mut names: Vec<String> = entries
        .flatten()
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .filter(|n| n.ends_with(".jar") && is_client_only_mod(n))
        .collect();
    names.sort();
    if names.is_empty() {
        return Ok(names);
    }

    let disabled = root.join(DISABLED_CLIENT_MODS_DIR);
    std::fs::create_dir_all(&disabled)?;
    for name in &names {
        std::fs::rename(mods.join(name), disabled.join(name))?;
        log::info!("[supervisor] Disabled client-only mod {}", name);
    }
    Ok(names)
}
