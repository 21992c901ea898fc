use super::console::{LogBuffer, LogLine, OutputStream};
use super::crash::{classify_exit, is_ready_banner, ExitOutcome, RunBaseline};
use super::files::ensure_first_run_files;
use super::launch::{build_launch_command, disable_client_only_mods};
use super::registry::{OwnerId, ProcessRegistry};
use super::SupervisorConfig;
use crate::error::{Result, SetupError};
use crate::server::installation::ServerInstallation;
use crate::utils::process::PistonCommandExt;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

/// How long to keep draining output after the process exits. Grandchildren
/// can hold the pipes open.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    Idle,
    Starting,
    Running,
    Stopping,
    StoppedClean,
    StoppedCrashed,
}

impl ServerState {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ServerState::Starting | ServerState::Running | ServerState::Stopping
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    StateChanged(ServerState),
    Output(LogLine),
    Exited(ExitOutcome),
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Terminate,
    Kill,
}

struct Status {
    state: ServerState,
    logs: LogBuffer,
    pid: Option<u32>,
    reached_ready: bool,
    stop_requested: bool,
    last_exit: Option<ExitOutcome>,
}

struct Inner {
    installation: Mutex<ServerInstallation>,
    status: Mutex<Status>,
    events: mpsc::UnboundedSender<SupervisorEvent>,
}

impl Inner {
    fn status(&self) -> std::sync::MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn emit(&self, event: SupervisorEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    fn set_state(&self, state: ServerState) {
        let changed = {
            let mut status = self.status();
            let changed = status.state != state;
            status.state = state;
            changed
        };
        if changed {
            log::debug!("[supervisor] State -> {:?}", state);
            self.emit(SupervisorEvent::StateChanged(state));
        }
    }

    fn push_line(&self, line: LogLine) {
        let became_ready = {
            let mut status = self.status();
            status.logs.push(line.clone());
            let ready = !status.reached_ready && is_ready_banner(&line.text);
            if ready {
                status.reached_ready = true;
            }
            ready && status.state == ServerState::Starting
        };
        self.emit(SupervisorEvent::Output(line));

        if became_ready {
            self.set_state(ServerState::Running);
            let mut install = self.installation.lock().unwrap_or_else(|p| p.into_inner());
            if let Err(e) = install.mark_has_run() {
                log::warn!("[supervisor] Could not record first run: {}", e);
            }
        }
    }
}

struct RunHandle {
    stdin: Option<ChildStdin>,
    signals: mpsc::UnboundedSender<Signal>,
    done: watch::Receiver<bool>,
}

/// Runs one server directory as a child process.
///
/// `Idle -> Starting -> Running -> {Stopping -> StoppedClean, StoppedCrashed}`.
/// Only one supervisor per directory can be active at a time, process-wide.
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
    config: SupervisorConfig,
    root: PathBuf,
    owner: OwnerId,
    registry: &'static ProcessRegistry,
    run: AsyncMutex<Option<RunHandle>>,
}

impl ProcessSupervisor {
    pub fn new(
        installation: ServerInstallation,
        config: SupervisorConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SupervisorEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let root = installation.root.clone();
        let inner = Arc::new(Inner {
            installation: Mutex::new(installation),
            status: Mutex::new(Status {
                state: ServerState::Idle,
                logs: LogBuffer::with_capacity(config.log_capacity),
                pid: None,
                reached_ready: false,
                stop_requested: false,
                last_exit: None,
            }),
            events,
        });
        (
            Self {
                inner,
                config,
                root,
                owner: OwnerId::next(),
                registry: ProcessRegistry::global(),
                run: AsyncMutex::new(None),
            },
            rx,
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state(&self) -> ServerState {
        self.inner.status().state
    }

    pub fn pid(&self) -> Option<u32> {
        self.inner.status().pid
    }

    pub fn logs(&self) -> Vec<LogLine> {
        self.inner.status().logs.snapshot()
    }

    pub fn last_exit(&self) -> Option<ExitOutcome> {
        self.inner.status().last_exit.clone()
    }

    pub fn installation(&self) -> ServerInstallation {
        self.inner
            .installation
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Spawn the server. Fails with `AlreadyRunning` if this supervisor or
    /// any other one in the process is running the same directory.
    pub async fn start(&self) -> Result<()> {
        let mut run = self.run.lock().await;
        if self.state().is_active() {
            return Err(SetupError::AlreadyRunning(self.root.clone()));
        }
        self.registry.claim(&self.root, self.owner).await?;

        match self.spawn().await {
            Ok(handle) => {
                *run = Some(handle);
                Ok(())
            }
            Err(e) => {
                log::error!("[supervisor] Failed to start server in {:?}: {}", self.root, e);
                self.registry.release(&self.root, self.owner).await;
                self.inner.status().pid = None;
                self.inner.set_state(ServerState::Idle);
                Err(e)
            }
        }
    }

    async fn spawn(&self) -> Result<RunHandle> {
        {
            let mut status = self.inner.status();
            status.logs.clear();
            status.reached_ready = false;
            status.stop_requested = false;
            status.pid = None;
        }
        self.inner.set_state(ServerState::Starting);

        let install = self.installation();
        ensure_first_run_files(&self.root)?;
        {
            let mut guard = self.inner.installation.lock().unwrap_or_else(|p| p.into_inner());
            guard.eula_accepted = true;
        }
        if self.config.clean_client_mods && install.kind.is_modded() {
            let moved = disable_client_only_mods(&self.root)?;
            if !moved.is_empty() {
                log::info!("[supervisor] Moved {} client-only mod(s) aside", moved.len());
            }
        }

        let launch = build_launch_command(&install, &self.config)?;
        log::info!("[supervisor] Exec command: {}", launch.display());

        let baseline = RunBaseline::capture(&self.root);
        let mut child = Command::new(&launch.program)
            .args(&launch.args)
            .current_dir(&launch.working_dir)
            .piped_console()
            .suppress_console()
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SetupError::Other(anyhow::anyhow!(
                    "Failed to spawn {:?}: {}",
                    launch.program,
                    e
                ))
            })?;

        let pid = child.id();
        self.inner.status().pid = pid;
        if let Some(pid) = pid {
            self.registry.set_pid(&self.root, self.owner, pid).await;
            log::info!("[supervisor] Server process started with PID: {}", pid);
        }

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(pump_output(self.inner.clone(), stdout, OutputStream::Stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(pump_output(self.inner.clone(), stderr, OutputStream::Stderr));
        }
        let stdin = child.stdin.take();

        let (signals, mut signal_rx) = mpsc::unbounded_channel::<Signal>();
        let (done_tx, done) = watch::channel(false);
        let inner = self.inner.clone();
        let root = self.root.clone();
        let owner = self.owner;
        let registry = self.registry;

        tokio::spawn(async move {
            let status = loop {
                tokio::select! {
                    status = child.wait() => break status,
                    Some(signal) = signal_rx.recv() => send_signal(&mut child, signal),
                }
            };

            for reader in readers {
                let abort = reader.abort_handle();
                if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, reader).await.is_err() {
                    abort.abort();
                }
            }

            let exit_code = match &status {
                Ok(status) => status.code(),
                Err(e) => {
                    log::error!("[supervisor] Failed to wait for server process: {}", e);
                    None
                }
            };

            let (stop_requested, reached_ready, recent) = {
                let status = inner.status();
                (status.stop_requested, status.reached_ready, status.logs.snapshot())
            };

            let outcome = if stop_requested {
                ExitOutcome::Clean { exit_code }
            } else {
                classify_exit(&root, exit_code, reached_ready, &baseline, &recent)
            };

            match &outcome {
                ExitOutcome::Clean { .. } => {
                    log::info!("[supervisor] Server in {:?} stopped (code {:?})", root, exit_code)
                }
                ExitOutcome::Crashed(details) => log::error!(
                    "[supervisor] Server in {:?} crashed (code {:?}): {}",
                    root,
                    exit_code,
                    details.summary.as_deref().unwrap_or("no crash signature found")
                ),
            }

            // The claim goes first so a restart reacting to the events below
            // never has its fresh claim removed
            registry.release(&root, owner).await;
            {
                let mut status = inner.status();
                status.pid = None;
                status.last_exit = Some(outcome.clone());
            }
            inner.set_state(if outcome.is_crash() {
                ServerState::StoppedCrashed
            } else {
                ServerState::StoppedClean
            });
            inner.emit(SupervisorEvent::Exited(outcome));
            let _ = done_tx.send(true);
        });

        Ok(RunHandle {
            stdin,
            signals,
            done,
        })
    }

    /// Write one line to the server console.
    pub async fn send_command(&self, text: &str) -> Result<()> {
        if !matches!(self.state(), ServerState::Starting | ServerState::Running) {
            return Err(SetupError::NotRunning);
        }
        let mut run = self.run.lock().await;
        let stdin = run
            .as_mut()
            .and_then(|r| r.stdin.as_mut())
            .ok_or(SetupError::NotRunning)?;
        write_line(stdin, text).await.map_err(|e| {
            log::warn!("[supervisor] Console write failed: {}", e);
            SetupError::NotRunning
        })
    }

    /// Ask the server to stop, escalating to signals when it does not exit
    /// within `stop_timeout`. The final state is `StoppedClean`.
    pub async fn stop(&self) -> Result<ExitOutcome> {
        let (signals, mut done) = {
            let mut run = self.run.lock().await;
            if !matches!(self.state(), ServerState::Starting | ServerState::Running) {
                return Err(SetupError::NotRunning);
            }
            let handle = run.as_mut().ok_or(SetupError::NotRunning)?;

            self.inner.status().stop_requested = true;
            self.inner.set_state(ServerState::Stopping);

            if let Some(stdin) = handle.stdin.as_mut() {
                if let Err(e) = write_line(stdin, "stop").await {
                    log::debug!("[supervisor] Could not send stop command: {}", e);
                }
            }
            (handle.signals.clone(), handle.done.clone())
        };

        if !wait_done(&mut done, self.config.stop_timeout).await {
            log::warn!(
                "[supervisor] Server did not stop within {}s, terminating",
                self.config.stop_timeout.as_secs()
            );
            let _ = signals.send(Signal::Terminate);
            if !wait_done(&mut done, self.config.kill_grace).await {
                log::warn!("[supervisor] Server ignored termination, killing");
                let _ = signals.send(Signal::Kill);
                if !wait_done(&mut done, self.config.kill_grace).await {
                    return Err(SetupError::Other(anyhow::anyhow!(
                        "Server process in {:?} did not exit after kill",
                        self.root
                    )));
                }
            }
        }

        self.run.lock().await.take();
        self.last_exit().ok_or(SetupError::NotRunning)
    }

    /// Wait for the current run to end. Returns immediately when nothing is running.
    pub async fn wait(&self) -> Option<ExitOutcome> {
        let done = self.run.lock().await.as_ref().map(|r| r.done.clone());
        if let Some(mut done) = done {
            let _ = done.wait_for(|finished| *finished).await;
        }
        self.last_exit()
    }
}

fn pump_output<R>(inner: Arc<Inner>, reader: R, stream: OutputStream) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        // Lines are not guaranteed to be UTF-8
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']);
                    inner.push_line(LogLine::new(line, stream));
                }
                Err(e) => {
                    log::warn!("[supervisor] Output reader stopped: {}", e);
                    break;
                }
            }
        }
    })
}

async fn write_line(stdin: &mut ChildStdin, text: &str) -> std::io::Result<()> {
    stdin.write_all(text.trim_end().as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await
}

async fn wait_done(done: &mut watch::Receiver<bool>, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, done.wait_for(|finished| *finished)).await,
        Ok(Ok(_))
    )
}

fn send_signal(child: &mut tokio::process::Child, signal: Signal) {
    #[cfg(unix)]
    if let (Signal::Terminate, Some(pid)) = (signal, child.id()) {
        use nix::sys::signal::{kill, Signal as UnixSignal};
        use nix::unistd::Pid;
        if let Err(e) = kill(Pid::from_raw(pid as i32), UnixSignal::SIGTERM) {
            log::warn!("[supervisor] Failed to send SIGTERM: {}", e);
        }
        return;
    }

    log::debug!("[supervisor] Sending {:?}", signal);
    if let Err(e) = child.start_kill() {
        log::warn!("[supervisor] Failed to kill server process: {}", e);
    }
}
