//! Running a prepared server directory as a child process.

pub mod console;
pub mod crash;
pub mod files;
pub mod launch;
pub mod process;
pub mod registry;

pub use console::{LogBuffer, LogLine, OutputStream, Severity};
pub use crash::{CrashDetails, ExitOutcome};
pub use launch::{build_launch_command, LaunchCommand};
pub use process::{ProcessSupervisor, ServerState, SupervisorEvent};
pub use registry::ProcessRegistry;

use crate::error::{Result, SetupError};
use std::path::PathBuf;
use std::time::Duration;

pub const STOP_TIMEOUT_SECS: u64 = 30;
pub const KILL_GRACE_SECS: u64 = 5;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Java executable. Falls back to `java` on PATH.
    pub java_path: Option<PathBuf>,
    /// Heap size in MB. Derived from the mod count when unset.
    pub ram_mb: Option<u64>,
    pub extra_jvm_args: Vec<String>,
    /// How long `stop` waits after sending the `stop` command
    pub stop_timeout: Duration,
    /// How long to wait after each termination signal
    pub kill_grace: Duration,
    /// Replace the computed command line entirely
    pub command_override: Option<Vec<String>>,
    /// Move known client-only mods out of `mods/` before a modded start
    pub clean_client_mods: bool,
    pub log_capacity: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            java_path: None,
            ram_mb: None,
            extra_jvm_args: Vec::new(),
            stop_timeout: Duration::from_secs(STOP_TIMEOUT_SECS),
            kill_grace: Duration::from_secs(KILL_GRACE_SECS),
            command_override: None,
            clean_client_mods: true,
            log_capacity: console::LOG_CAPACITY,
        }
    }
}

impl SupervisorConfig {
    /// Parse a user-supplied JVM argument string with shell quoting rules.
    pub fn with_jvm_args(mut self, args: &str) -> Result<Self> {
        self.extra_jvm_args = shlex::split(args).ok_or_else(|| {
            SetupError::Other(anyhow::anyhow!("Unbalanced quotes in JVM arguments: {}", args))
        })?;
        Ok(self)
    }
}
