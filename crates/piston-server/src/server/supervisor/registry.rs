/// Process-wide registry of supervised server directories
use crate::error::{Result, SetupError};
use crate::server::installer::lock::canonical_key;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::RwLock;

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

/// Identifies one supervisor so only it can update or release its claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(u64);

impl OwnerId {
    pub fn next() -> Self {
        Self(NEXT_OWNER.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningServer {
    pub root: PathBuf,
    /// None while the process is being spawned
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    owner: OwnerId,
}

/// One entry per directory with a live (or starting) server.
pub struct ProcessRegistry {
    servers: Arc<RwLock<HashMap<PathBuf, RunningServer>>>,
    system: Arc<RwLock<System>>,
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: Lazy<ProcessRegistry> = Lazy::new(ProcessRegistry::new);

impl ProcessRegistry {
    pub fn new() -> Self {
        Self {
            servers: Arc::new(RwLock::new(HashMap::new())),
            system: Arc::new(RwLock::new(System::new())),
        }
    }

    pub fn global() -> &'static ProcessRegistry {
        &GLOBAL
    }

    /// Reserve `root` for `owner`. A previous entry whose process no longer
    /// exists is dropped first.
    pub async fn claim(&self, root: &Path, owner: OwnerId) -> Result<()> {
        let key = canonical_key(root);
        let mut servers = self.servers.write().await;

        if let Some(existing) = servers.get(&key) {
            let stale = match existing.pid {
                Some(pid) if existing.owner != owner => !self.is_alive(pid).await,
                _ => existing.owner == owner,
            };
            if !stale {
                return Err(SetupError::AlreadyRunning(key));
            }
            log::info!(
                "[registry] Dropping stale entry for {:?} (PID {:?})",
                key,
                existing.pid
            );
        }

        servers.insert(
            key.clone(),
            RunningServer {
                root: key,
                pid: None,
                started_at: Utc::now(),
                owner,
            },
        );
        Ok(())
    }

    pub async fn set_pid(&self, root: &Path, owner: OwnerId, pid: u32) {
        let key = canonical_key(root);
        if let Some(entry) = self.servers.write().await.get_mut(&key) {
            if entry.owner == owner {
                log::info!("[registry] {:?} running as PID {}", key, pid);
                entry.pid = Some(pid);
            }
        }
    }

    pub async fn release(&self, root: &Path, owner: OwnerId) {
        let key = canonical_key(root);
        let mut servers = self.servers.write().await;
        if servers.get(&key).map(|e| e.owner == owner).unwrap_or(false) {
            servers.remove(&key);
            log::info!("[registry] Released {:?}", key);
        }
    }

    pub async fn get(&self, root: &Path) -> Option<RunningServer> {
        self.servers.read().await.get(&canonical_key(root)).cloned()
    }

    pub async fn is_running(&self, root: &Path) -> bool {
        self.servers.read().await.contains_key(&canonical_key(root))
    }

    pub async fn get_all(&self) -> Vec<RunningServer> {
        self.servers.read().await.values().cloned().collect()
    }

    async fn is_alive(&self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        let mut sys = self.system.write().await;
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        sys.process(pid).is_some()
    }
}
