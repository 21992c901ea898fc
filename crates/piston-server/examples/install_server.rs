//! Install a server and optionally boot it once.
//!
//! `cargo run --example install_server -- <dir> [game-version] [loader] [--run]`
//!
//! Installing Forge or NeoForge needs Java; one is downloaded into
//! `<dir>/.runtimes` when none of the right version is on PATH.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;

use piston_server::server::installer::types::ProgressReporter;
use piston_server::{
    GameVersionSelector, ModloaderType, ProcessSupervisor, ServerRequest, ServerSetup,
    SetupConfig, SupervisorConfig, SupervisorEvent,
};

struct ConsoleReporter {
    cancel_rx: watch::Receiver<bool>,
}

impl ConsoleReporter {
    fn new() -> (Self, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { cancel_rx: rx }, tx)
    }
}

impl ProgressReporter for ConsoleReporter {
    fn start_step(&self, name: &str, total_steps: Option<u32>) {
        println!("[STEP START] {} (total: {:?})", name, total_steps);
    }

    fn update_bytes(&self, transferred: u64, total: Option<u64>) {
        if let Some(t) = total {
            println!("[BYTES] {}/{}", transferred, t);
        } else {
            println!("[BYTES] {}", transferred);
        }
    }

    fn set_percent(&self, percent: i32) {
        println!("[PROGRESS] {}%", percent);
    }

    fn set_message(&self, message: &str) {
        println!("[MSG] {}", message);
    }

    fn set_step_count(&self, current: u32, total: Option<u32>) {
        println!("[STEP COUNT] {}/{:?}", current, total);
    }

    fn done(&self, success: bool, message: Option<&str>) {
        println!("[DONE] success={} message={:?}", success, message);
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let run = args.iter().any(|a| a == "--run");
    args.retain(|a| a != "--run");

    let Some(dir) = args.first().cloned() else {
        eprintln!("usage: install_server <dir> [game-version] [loader] [--run]");
        std::process::exit(2);
    };
    let game: GameVersionSelector = args.get(1).map(String::as_str).unwrap_or("latest").parse()?;
    let loader = match args.get(2) {
        Some(name) => name.parse()?,
        None => ModloaderType::Vanilla,
    };

    let target = std::path::PathBuf::from(dir);
    let config = SetupConfig {
        runtime_dir: Some(target.join(".runtimes")),
        ..Default::default()
    };
    let setup = ServerSetup::new(config)?;

    let (reporter, cancel) = ConsoleReporter::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel.send(true);
        }
    });

    let installation = match setup
        .install_server(&ServerRequest::new(&target, game, loader), Arc::new(reporter))
        .await
    {
        Ok(installation) => installation,
        Err(e) => {
            println!("Install failed: {}", e);
            std::process::exit(1);
        }
    };
    println!(
        "Installed {} {} (loader {}) in {}",
        installation.kind,
        installation.game_version.as_deref().unwrap_or("?"),
        installation.loader_version.as_deref().unwrap_or("-"),
        target.display()
    );

    if !run {
        return Ok(());
    }

    let (supervisor, mut events) = ProcessSupervisor::new(installation, SupervisorConfig::default());
    supervisor.start().await?;
    while let Some(event) = events.recv().await {
        match event {
            SupervisorEvent::Output(line) => println!("> {}", line.text),
            SupervisorEvent::StateChanged(state) => {
                println!("[STATE] {:?}", state);
                if state == piston_server::ServerState::Running {
                    let outcome = supervisor.stop().await?;
                    println!("Stopped: {:?}", outcome);
                    break;
                }
            }
            SupervisorEvent::Exited(outcome) => {
                println!("Exited: {:?}", outcome);
                break;
            }
        }
    }

    Ok(())
}
