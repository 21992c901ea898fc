mod common;

use common::{init_logging, mount_mojang, test_config, tree, write_zip, CountingDownloader};
use piston_server::server::detect::DetectionSource;
use piston_server::server::modpack::{ModpackInfo, MODPACK_INFO_FILE};
use piston_server::{
    detect, ModloaderType, PackExtractor, ServerKind, ServerSetup, SetupError,
    SilentProgressReporter,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::MockServer;

fn modrinth_index(files: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "formatVersion": 1,
        "game": "minecraft",
        "versionId": "2.0.0",
        "name": "Tiny Pack",
        "files": files,
        "dependencies": { "minecraft": "1.20.1" }
    }))
    .unwrap()
}

fn three_files() -> serde_json::Value {
    json!([
        {
            "path": "mods/lib.jar",
            "hashes": {},
            "downloads": ["https://cdn.example.invalid/lib.jar"],
            "fileSize": 0
        },
        {
            "path": "mods/server-tools.jar",
            "hashes": {},
            "env": { "client": "unsupported", "server": "required" },
            "downloads": ["https://cdn.example.invalid/server-tools.jar"],
            "fileSize": 0
        },
        {
            "path": "mods/minimap.jar",
            "hashes": {},
            "env": { "client": "required", "server": "unsupported" },
            "downloads": ["https://cdn.example.invalid/minimap.jar"],
            "fileSize": 0
        }
    ])
}

fn pack(dir: &Path, files: serde_json::Value) -> PathBuf {
    let archive = dir.join("pack.mrpack");
    let index = modrinth_index(files);
    write_zip(
        &archive,
        &[
            ("modrinth.index.json", index.as_slice()),
            ("overrides/config/tiny.toml", b"enabled = true\n".as_slice()),
            ("server-overrides/server-icon.txt", b"icon".as_slice()),
        ],
    );
    archive
}

#[tokio::test]
async fn client_only_entries_are_not_planned_for_servers() {
    let tmp = TempDir::new().unwrap();
    let archive = pack(tmp.path(), three_files());
    let manifest = PackExtractor::read_manifest(&archive).await.unwrap();
    assert_eq!(manifest.loader, ModloaderType::Vanilla);
    assert_eq!(manifest.files.len(), 3);

    let extractor = PackExtractor::new(Arc::new(CountingDownloader::default()), 4);
    let target = tmp.path().join("srv");
    let server_tasks = extractor.plan_downloads(&manifest, &target, true).await.unwrap();
    let names: Vec<_> = server_tasks
        .iter()
        .map(|t| t.destination.strip_prefix(&target).unwrap().to_path_buf())
        .collect();
    assert_eq!(
        names,
        vec![PathBuf::from("mods/lib.jar"), PathBuf::from("mods/server-tools.jar")]
    );

    let client_tasks = extractor.plan_downloads(&manifest, &target, false).await.unwrap();
    assert_eq!(client_tasks.len(), 3);
}

#[tokio::test]
async fn modpack_installs_loader_files_overrides_and_remnants() {
    init_logging();
    let server = MockServer::start().await;
    mount_mojang(&server, "1.20.1").await;
    let downloader = Arc::new(CountingDownloader::default());
    let setup = ServerSetup::new(test_config(&server.uri()))
        .unwrap()
        .with_downloader(downloader.clone());

    let tmp = TempDir::new().unwrap();
    let archive = pack(tmp.path(), three_files());
    let target = tmp.path().join("srv");

    let (installation, report) = setup
        .install_modpack(&archive, &target, None, Arc::new(SilentProgressReporter))
        .await
        .unwrap();

    // server.jar first, then the two server-side mods
    let urls = downloader.urls();
    assert_eq!(urls.len(), 3);
    assert!(urls[0].ends_with("/mojang/objects/server-1.20.1.jar"));
    assert_eq!(report.downloaded, 2);
    assert_eq!(report.skipped_client_only, 1);

    assert!(target.join("mods/lib.jar").is_file());
    assert!(!target.join("mods/minimap.jar").exists());
    assert_eq!(
        std::fs::read_to_string(target.join("config/tiny.toml")).unwrap(),
        "enabled = true\n"
    );
    assert!(target.join("server-icon.txt").is_file());

    let info: ModpackInfo =
        serde_json::from_slice(&std::fs::read(target.join(MODPACK_INFO_FILE)).unwrap()).unwrap();
    assert_eq!(info.name, "Tiny Pack");
    assert_eq!(info.minecraft_version, "1.20.1");
    assert!(target.join("modrinth.index.json").is_file());

    assert_eq!(installation.kind, ServerKind::Vanilla);
    assert_eq!(installation.game_version.as_deref(), Some("1.20.1"));
    let detection = detect(&target);
    assert_eq!(detection.kind, ServerKind::Vanilla);
    assert_eq!(detection.source, DetectionSource::InstallMarker);
}

#[tokio::test]
async fn traversal_entry_fails_before_anything_is_written() {
    let server = MockServer::start().await;
    mount_mojang(&server, "1.20.1").await;
    let downloader = Arc::new(CountingDownloader::default());
    let setup = ServerSetup::new(test_config(&server.uri()))
        .unwrap()
        .with_downloader(downloader.clone());

    let tmp = TempDir::new().unwrap();
    let archive = pack(
        tmp.path(),
        json!([
            {
                "path": "mods/fine.jar",
                "downloads": ["https://cdn.example.invalid/fine.jar"]
            },
            {
                "path": "../../evil",
                "downloads": ["https://cdn.example.invalid/evil"]
            }
        ]),
    );
    let target = tmp.path().join("srv");
    std::fs::create_dir_all(&target).unwrap();

    let err = setup
        .install_modpack(&archive, &target, None, Arc::new(SilentProgressReporter))
        .await
        .unwrap_err();
    assert!(matches!(err, SetupError::PathTraversal(_)), "{:?}", err);
    assert_eq!(downloader.calls(), 0);
    assert!(tree(&target).is_empty());
    assert!(!tmp.path().join("evil").exists());
}
