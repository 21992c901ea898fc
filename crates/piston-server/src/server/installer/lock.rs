use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Serializes installs that target the same directory.
/// Different directories get different locks and proceed in parallel.
#[derive(Default)]
pub struct DirectoryLocks {
    locks: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

static GLOBAL: Lazy<DirectoryLocks> = Lazy::new(DirectoryLocks::default);

impl DirectoryLocks {
    pub fn global() -> &'static DirectoryLocks {
        &GLOBAL
    }

    /// Wait for exclusive access to `dir`.
    pub async fn acquire(&self, dir: &Path) -> OwnedMutexGuard<()> {
        let key = canonical_key(dir);
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            // Drop entries nobody is holding or waiting on
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks.entry(key.clone()).or_default().clone()
        };
        log::debug!("[lock] Waiting for {:?}", key);
        lock.lock_owned().await
    }
}

/// Absolute path with the longest existing prefix canonicalized, so the key
/// stays the same once a missing directory is created.
pub fn canonical_key(dir: &Path) -> PathBuf {
    let absolute = std::path::absolute(dir).unwrap_or_else(|_| dir.to_path_buf());
    let mut missing = Vec::new();
    let mut current = absolute.as_path();
    loop {
        if let Ok(resolved) = dunce::canonicalize(current) {
            return missing
                .iter()
                .rev()
                .fold(resolved, |path: PathBuf, part| path.join(part));
        }
        let (Some(parent), Some(name)) = (current.parent(), current.file_name()) else {
            break;
        };
        missing.push(name.to_os_string());
        current = parent;
    }
    absolute
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_directory_is_serialized() {
        let locks = Arc::new(DirectoryLocks::default());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(Path::new("/srv/same")).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn waiter_wakes_when_guard_drops() {
        let locks = DirectoryLocks::default();
        let held = tokio_test::block_on(locks.acquire(Path::new("/srv/c")));
        let mut waiter = tokio_test::task::spawn(locks.acquire(Path::new("/srv/c")));
        tokio_test::assert_pending!(waiter.poll());

        drop(held);
        assert!(waiter.is_woken());
        tokio_test::assert_ready!(waiter.poll());
    }

    #[test]
    fn missing_directory_keeps_its_key_once_created() {
        let tmp = tempfile::tempdir().unwrap();
        let before = canonical_key(&tmp.path().join("srv"));
        std::fs::create_dir(tmp.path().join("srv")).unwrap();
        assert_eq!(before, canonical_key(&tmp.path().join("srv")));

        let relative = canonical_key(Path::new("not-created-yet/srv"));
        assert!(relative.is_absolute());
        assert!(relative.ends_with("not-created-yet/srv"));
    }

    #[cfg(unix)]
    #[test]
    fn lock_taken_before_creation_still_serializes() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("real")).unwrap();
        std::os::unix::fs::symlink(tmp.path().join("real"), tmp.path().join("link")).unwrap();

        let locks = DirectoryLocks::default();
        let held = tokio_test::block_on(locks.acquire(&tmp.path().join("link/srv")));
        std::fs::create_dir(tmp.path().join("real/srv")).unwrap();

        let real_srv = tmp.path().join("real/srv");
        let mut waiter = tokio_test::task::spawn(locks.acquire(&real_srv));
        tokio_test::assert_pending!(waiter.poll());
        drop(held);
        tokio_test::assert_ready!(waiter.poll());
    }

    #[tokio::test]
    async fn different_directories_do_not_block() {
        let locks = DirectoryLocks::default();
        let _a = locks.acquire(Path::new("/srv/a")).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire(Path::new("/srv/b")))
            .await;
        assert!(b.is_ok());
    }
}
