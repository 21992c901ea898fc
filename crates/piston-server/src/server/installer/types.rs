use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::{mpsc, watch};

/// Receives progress from long-running setup work.
/// Implementations forward updates to whatever display layer is subscribed.
pub trait ProgressReporter: Send + Sync {
    fn start_step(&self, name: &str, total_steps: Option<u32>);

    /// Bytes of the current download so far
    fn update_bytes(&self, transferred: u64, total: Option<u64>);

    /// 0-100, or -1 when the step has no measurable progress
    fn set_percent(&self, percent: i32);

    fn set_message(&self, message: &str);

    /// Position inside the current step, e.g. file 3 of 12
    fn set_step_count(&self, current: u32, total: Option<u32>);

    /// Called exactly once per top-level operation.
    fn done(&self, success: bool, message: Option<&str>);

    /// Polled between files and download chunks.
    fn is_cancelled(&self) -> bool;

    /// Workers wait while this returns true.
    fn is_paused(&self) -> bool {
        false
    }
}

/// Discards everything. For background verification and tests.
pub struct SilentProgressReporter;

impl ProgressReporter for SilentProgressReporter {
    fn start_step(&self, _name: &str, _total_steps: Option<u32>) {}
    fn update_bytes(&self, _transferred: u64, _total: Option<u64>) {}
    fn set_percent(&self, _percent: i32) {}
    fn set_message(&self, _message: &str) {}
    fn set_step_count(&self, _current: u32, _total: Option<u32>) {}
    fn done(&self, _success: bool, _message: Option<&str>) {}
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Read side of a cancellation flag shared with the caller.
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// Create a token together with the sender that trips it.
    pub fn pair() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Progress updates as plain messages, for display layers that subscribe
/// to a channel instead of implementing `ProgressReporter`.
#[derive(Debug, Clone, PartialEq)]
pub enum InstallEvent {
    Step { name: String, total: Option<u32> },
    Bytes { transferred: u64, total: Option<u64> },
    Percent(i32),
    Message(String),
    StepCount { current: u32, total: Option<u32> },
    Done { success: bool, message: Option<String> },
}

/// Reporter that forwards every update as an `InstallEvent`.
/// Send failures are ignored: a display that went away must not abort an install.
pub struct ChannelProgressReporter {
    tx: mpsc::UnboundedSender<InstallEvent>,
    cancel: Option<CancelToken>,
}

impl ChannelProgressReporter {
    pub fn new(cancel: Option<CancelToken>) -> (Self, mpsc::UnboundedReceiver<InstallEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, cancel }, rx)
    }

    fn send(&self, event: InstallEvent) {
        let _ = self.tx.send(event);
    }
}

impl ProgressReporter for ChannelProgressReporter {
    fn start_step(&self, name: &str, total_steps: Option<u32>) {
        self.send(InstallEvent::Step {
            name: name.to_string(),
            total: total_steps,
        });
    }

    fn update_bytes(&self, transferred: u64, total: Option<u64>) {
        self.send(InstallEvent::Bytes { transferred, total });
    }

    fn set_percent(&self, percent: i32) {
        self.send(InstallEvent::Percent(percent));
    }

    fn set_message(&self, message: &str) {
        self.send(InstallEvent::Message(message.to_string()));
    }

    fn set_step_count(&self, current: u32, total: Option<u32>) {
        self.send(InstallEvent::StepCount { current, total });
    }

    fn done(&self, success: bool, message: Option<&str>) {
        self.send(InstallEvent::Done {
            success,
            message: message.map(str::to_string),
        });
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|c| c.is_cancelled()).unwrap_or(false)
    }
}

/// Mod loader families the installer knows how to set up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModloaderType {
    Vanilla,
    Fabric,
    Quilt,
    Forge,
    NeoForge,
}

impl ModloaderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModloaderType::Vanilla => "vanilla",
            ModloaderType::Fabric => "fabric",
            ModloaderType::Quilt => "quilt",
            ModloaderType::Forge => "forge",
            ModloaderType::NeoForge => "neoforge",
        }
    }

    /// Forge and NeoForge ship their own installer jar; the others are dropped in.
    pub fn runs_installer(&self) -> bool {
        matches!(self, ModloaderType::Forge | ModloaderType::NeoForge)
    }
}

impl std::fmt::Display for ModloaderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ModloaderType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "vanilla" => Ok(ModloaderType::Vanilla),
            "fabric" | "fabric-loader" => Ok(ModloaderType::Fabric),
            "quilt" | "quilt-loader" => Ok(ModloaderType::Quilt),
            "forge" => Ok(ModloaderType::Forge),
            "neoforge" | "neo-forge" => Ok(ModloaderType::NeoForge),
            _ => Err(anyhow::anyhow!("Unknown modloader type: {}", s)),
        }
    }
}

/// What to install into a single server directory
#[derive(Debug, Clone)]
pub struct InstallSpec {
    /// Server root directory
    pub target_dir: PathBuf,

    /// Concrete Minecraft version ID (e.g., "1.20.1")
    pub game_version: String,

    /// Modloader type (vanilla, fabric, quilt, forge, neoforge)
    pub loader: ModloaderType,

    /// Modloader version; `None` picks the recommended/latest stable one
    pub loader_version: Option<String>,

    /// Java executable used to run loader installers
    pub java_path: Option<PathBuf>,
}

impl InstallSpec {
    pub fn new(target_dir: PathBuf, game_version: impl Into<String>, loader: ModloaderType) -> Self {
        Self {
            target_dir,
            game_version: game_version.into(),
            loader,
            loader_version: None,
            java_path: None,
        }
    }

    pub fn with_loader_version(mut self, version: impl Into<String>) -> Self {
        self.loader_version = Some(version.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modloader_type_serialization() {
        assert_eq!(ModloaderType::Vanilla.as_str(), "vanilla");
        assert_eq!(ModloaderType::NeoForge.as_str(), "neoforge");
        assert_eq!(
            serde_json::to_string(&ModloaderType::NeoForge).unwrap(),
            "\"neoforge\""
        );
        assert_eq!(
            "Fabric-Loader".parse::<ModloaderType>().unwrap(),
            ModloaderType::Fabric
        );
        assert!("paper".parse::<ModloaderType>().is_err());
    }

    #[test]
    fn channel_reporter_forwards_and_cancels() {
        let (tx, token) = CancelToken::pair();
        let (reporter, mut rx) = ChannelProgressReporter::new(Some(token));

        reporter.start_step("Downloading", Some(3));
        reporter.set_percent(40);
        assert!(!reporter.is_cancelled());
        tx.send(true).unwrap();
        assert!(reporter.is_cancelled());

        assert_eq!(
            rx.try_recv().unwrap(),
            InstallEvent::Step {
                name: "Downloading".into(),
                total: Some(3)
            }
        );
        assert_eq!(rx.try_recv().unwrap(), InstallEvent::Percent(40));
    }
}
