mod common;

use common::tree;
use piston_server::server::detect::DetectionSource;
use piston_server::server::installation::ServerInstallation;
use piston_server::{detect, ServerKind};
use tempfile::TempDir;

#[test]
fn bare_fabric_launcher_has_no_versions() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("fabric-server-launch.jar"), b"jar").unwrap();

    let found = detect(tmp.path());
    assert_eq!(found.kind, ServerKind::Fabric);
    assert_eq!(found.loader_version, None);
    assert_eq!(found.game_version, None);
    assert_eq!(found.source, DetectionSource::RootJar);
}

#[test]
fn versioned_jar_names_carry_their_versions() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(
        tmp.path().join("fabric-server-mc.1.20.1-loader.0.15.11-launcher.1.0.1.jar"),
        b"jar",
    )
    .unwrap();
    let found = detect(tmp.path());
    assert_eq!(found.kind, ServerKind::Fabric);
    assert_eq!(found.game_version.as_deref(), Some("1.20.1"));
    assert_eq!(found.loader_version.as_deref(), Some("0.15.11"));

    let forge = TempDir::new().unwrap();
    std::fs::write(forge.path().join("forge-1.12.2-14.23.5.2859.jar"), b"jar").unwrap();
    std::fs::write(forge.path().join("minecraft_server.1.12.2.jar"), b"jar").unwrap();
    let found = detect(forge.path());
    assert_eq!(found.kind, ServerKind::Forge);
    assert_eq!(found.game_version.as_deref(), Some("1.12.2"));
    assert_eq!(found.loader_version.as_deref(), Some("14.23.5.2859"));
}

#[test]
fn detection_is_read_only_and_repeatable() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    std::fs::create_dir_all(root.join("libraries/net/neoforged/neoforge/21.1.77")).unwrap();
    std::fs::write(
        root.join("libraries/net/neoforged/neoforge/21.1.77/unix_args.txt"),
        b"-cp x",
    )
    .unwrap();
    std::fs::create_dir_all(root.join("logs")).unwrap();
    std::fs::write(
        root.join("logs/latest.log"),
        "[main/INFO]: Starting minecraft server version 1.21.1\n",
    )
    .unwrap();
    std::fs::write(root.join("run.sh"), "java @user_jvm_args.txt @libraries/net/neoforged/neoforge/21.1.77/unix_args.txt \"$@\"\n").unwrap();

    let before = tree(root);
    let first = detect(root);
    let second = detect(root);
    let installation = ServerInstallation::open(root);
    let after = tree(root);

    assert_eq!(before, after);
    assert_eq!(first, second);
    assert_eq!(first.kind, ServerKind::NeoForge);
    assert_eq!(first.loader_version.as_deref(), Some("21.1.77"));
    assert_eq!(first.game_version.as_deref(), Some("1.21.1"));
    assert_eq!(installation.kind, ServerKind::NeoForge);
    assert!(!installation.has_run_before);
    assert!(!installation.eula_accepted);
}
