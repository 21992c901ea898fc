mod common;

use common::{init_logging, mount_mojang, sha1_hex, test_config, SERVER_JAR};
use piston_server::server::installer::core::downloader::{
    sha1_file, ArtifactDownloader, HttpDownloader,
};
use piston_server::{
    GameVersionSelector, ModloaderType, SetupError, SilentProgressReporter, VersionResolver,
};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn vanilla_release_resolves_and_downloads_verified() {
    init_logging();
    let server = MockServer::start().await;
    mount_mojang(&server, "1.20.1").await;
    let config = test_config(&server.uri());
    let resolver = VersionResolver::from_config(&config).unwrap();

    let artifact = resolver
        .resolve(
            &GameVersionSelector::Exact("1.20.1".into()),
            ModloaderType::Vanilla,
            None,
        )
        .await
        .unwrap();
    assert_eq!(artifact.file_name, "server.jar");
    assert_eq!(artifact.sha1.as_deref(), Some(sha1_hex(SERVER_JAR).as_str()));
    assert_eq!(artifact.size, Some(SERVER_JAR.len() as u64));

    let tmp = TempDir::new().unwrap();
    let downloader = HttpDownloader::from_config(&config).unwrap();
    downloader
        .download(&artifact.to_task(tmp.path()), &SilentProgressReporter)
        .await
        .unwrap();
    let on_disk = sha1_file(&tmp.path().join("server.jar")).await.unwrap();
    assert_eq!(Some(on_disk), artifact.sha1);
}

#[tokio::test]
async fn latest_selectors_follow_the_manifest() {
    let server = MockServer::start().await;
    mount_mojang(&server, "1.21.1").await;
    let resolver = VersionResolver::from_config(&test_config(&server.uri())).unwrap();

    let release = resolver
        .resolve_game_version(&GameVersionSelector::LatestRelease)
        .await
        .unwrap();
    assert_eq!(release.id, "1.21.1");
    assert_eq!(release.version_type, "release");

    let snapshot = resolver
        .resolve_game_version(&"snapshot".parse().unwrap())
        .await
        .unwrap();
    assert_eq!(snapshot.id, "24w14a");
}

#[tokio::test]
async fn unknown_version_is_not_found() {
    let server = MockServer::start().await;
    mount_mojang(&server, "1.20.1").await;
    let resolver = VersionResolver::from_config(&test_config(&server.uri())).unwrap();

    let err = resolver
        .resolve(
            &GameVersionSelector::Exact("1.99.9".into()),
            ModloaderType::Vanilla,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SetupError::VersionNotFound(_)), "{:?}", err);
    assert!(!err.is_transient());
}

#[tokio::test]
async fn broken_upstream_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/mojang/version_manifest_v2.json"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;
    let resolver = VersionResolver::from_config(&test_config(&server.uri())).unwrap();

    let err = resolver
        .resolve_game_version(&GameVersionSelector::LatestRelease)
        .await
        .unwrap_err();
    assert!(matches!(err, SetupError::UpstreamUnavailable { .. }), "{:?}", err);
    assert!(err.is_transient());
}

#[tokio::test]
async fn fabric_picks_first_stable_loader() {
    let server = MockServer::start().await;
    mount_mojang(&server, "1.20.1").await;
    Mock::given(method("GET"))
        .and(path("/fabric/v2/versions/loader/1.20.1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "loader": { "version": "0.16.0-beta.1", "stable": false } },
            { "loader": { "version": "0.15.11", "stable": true } },
            { "loader": { "version": "0.15.10", "stable": true } }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/fabric/v2/versions/installer"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "version": "1.0.2", "stable": false },
            { "version": "1.0.1", "stable": true }
        ])))
        .mount(&server)
        .await;
    let resolver = VersionResolver::from_config(&test_config(&server.uri())).unwrap();

    let plan = resolver.plan("1.20.1", ModloaderType::Fabric, None).await.unwrap();
    assert_eq!(plan.loader_version.as_deref(), Some("0.15.11"));
    let launcher = plan.loader_artifact.unwrap();
    assert!(launcher
        .url
        .ends_with("/fabric/v2/versions/loader/1.20.1/0.15.11/1.0.1/server/jar"));
    assert_eq!(plan.server.unwrap().file_name, "server.jar");

    let err = resolver
        .plan("1.20.1", ModloaderType::Fabric, Some("0.1.0"))
        .await
        .unwrap_err();
    assert!(matches!(err, SetupError::VersionNotFound(_)));
}

#[tokio::test]
async fn forge_requested_version_must_exist_in_maven() {
    let server = MockServer::start().await;
    mount_mojang(&server, "1.20.1").await;
    Mock::given(method("GET"))
        .and(path("/forge/maven/net/minecraftforge/forge/maven-metadata.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<metadata><versioning><versions>\
             <version>1.20.1-47.2.0</version><version>1.20.1-47.3.0</version>\
             </versions></versioning></metadata>",
        ))
        .mount(&server)
        .await;
    let resolver = VersionResolver::from_config(&test_config(&server.uri())).unwrap();

    let plan = resolver
        .plan("1.20.1", ModloaderType::Forge, Some("47.2.0"))
        .await
        .unwrap();
    let installer = plan.loader_artifact.unwrap();
    assert_eq!(installer.file_name, "forge-1.20.1-47.2.0-installer.jar");
    // No .sha1 published next to the installer
    assert_eq!(installer.sha1, None);

    assert!(matches!(
        resolver.plan("1.20.1", ModloaderType::Forge, Some("1.0.0")).await,
        Err(SetupError::VersionNotFound(_))
    ));
}
