#![cfg(unix)]

mod common;

use common::init_logging;
use piston_server::server::supervisor::ExitOutcome;
use piston_server::{
    ProcessSupervisor, ServerInstallation, ServerKind, ServerState, SupervisorConfig,
    SupervisorEvent,
};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn scripted(root: &Path, script: &str) -> (ServerInstallation, SupervisorConfig) {
    std::fs::write(root.join("server.sh"), script).unwrap();
    let installation = ServerInstallation {
        root: root.to_path_buf(),
        kind: ServerKind::Fabric,
        game_version: Some("1.20.1".into()),
        loader_version: Some("0.15.11".into()),
        has_run_before: false,
        eula_accepted: false,
        launch: None,
    };
    let config = SupervisorConfig {
        command_override: Some(vec!["sh".into(), "server.sh".into()]),
        stop_timeout: Duration::from_millis(500),
        kill_grace: Duration::from_secs(2),
        ..Default::default()
    };
    (installation, config)
}

#[tokio::test]
async fn crash_report_written_during_run_is_reported() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    std::fs::create_dir_all(root.join("crash-reports")).unwrap();
    std::fs::write(root.join("crash-reports/crash-old-server.txt"), "Description: old\n").unwrap();
    std::fs::create_dir_all(root.join("mods")).unwrap();
    std::fs::write(root.join("mods/sodium-fabric-0.5.8.jar"), b"jar").unwrap();

    let (installation, config) = scripted(
        root,
        "echo '[Server thread/INFO]: Done (3.2s)! For help, type \"help\"'\n\
         printf '%s\\n' '---- Minecraft Crash Report ----' 'Description: Ticking entity' \
           > crash-reports/crash-2024-01-01_00.00.00-server.txt\n\
         echo '[Server thread/ERROR]: Encountered an unexpected exception' >&2\n\
         exit 1\n",
    );
    let (supervisor, mut events) = ProcessSupervisor::new(installation, config);
    supervisor.start().await.unwrap();

    let outcome = supervisor.wait().await.unwrap();
    let ExitOutcome::Crashed(details) = outcome else {
        panic!("expected a crash, got {:?}", outcome);
    };
    assert_eq!(details.exit_code, Some(1));
    assert!(details.reached_ready);
    assert_eq!(
        details.crash_report.as_deref(),
        Some(root.join("crash-reports/crash-2024-01-01_00.00.00-server.txt").as_path())
    );
    assert_eq!(details.summary.as_deref(), Some("Description: Ticking entity"));
    assert_eq!(supervisor.state(), ServerState::StoppedCrashed);

    // Client-only mods were moved aside before the start
    assert!(root.join("mods_disabled_client/sodium-fabric-0.5.8.jar").exists());
    assert!(!root.join("mods/sodium-fabric-0.5.8.jar").exists());

    let mut states = Vec::new();
    let mut exited = false;
    while let Ok(event) = events.try_recv() {
        match event {
            SupervisorEvent::StateChanged(state) => states.push(state),
            SupervisorEvent::Exited(outcome) => exited = outcome.is_crash(),
            SupervisorEvent::Output(_) => {}
        }
    }
    assert_eq!(
        states,
        vec![ServerState::Starting, ServerState::Running, ServerState::StoppedCrashed]
    );
    assert!(exited);
}

#[tokio::test]
async fn stop_escalates_when_console_is_ignored() {
    let tmp = TempDir::new().unwrap();
    let (installation, config) = scripted(
        tmp.path(),
        "echo 'Done (0.5s)! For help, type \"help\"'\nwhile true; do sleep 0.1; done\n",
    );
    let (supervisor, _events) = ProcessSupervisor::new(installation, config);
    supervisor.start().await.unwrap();

    // Give the banner a moment to arrive
    for _ in 0..50 {
        if supervisor.state() == ServerState::Running {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let outcome = supervisor.stop().await.unwrap();
    assert!(!outcome.is_crash());
    assert_eq!(supervisor.state(), ServerState::StoppedClean);
    assert_eq!(supervisor.pid(), None);
}
