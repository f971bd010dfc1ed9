//! Exclusive access to a store for one load-mutate-save cycle.
//!
//! The sidecar lock file holds a per-acquisition token. Only the holder whose
//! token is still in the file may remove it. Reclaiming a stale lock requires
//! a second short-lived `.reclaim` lock, and staleness is re-checked while it
//! is held, so two waiters can never both clear the same leftover file.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{Result, StorageError};

const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_millis(200);

/// Guard held for the duration of a load-mutate-save cycle.
///
/// Releases the in-process mutex and removes the sidecar lock file on drop,
/// provided the file still carries this guard's token.
#[derive(Debug)]
pub struct StoreLock {
    _guard: OwnedMutexGuard<()>,
    lock_file: Option<LockFile>,
}

#[derive(Debug)]
struct LockFile {
    path: PathBuf,
    token: String,
}

impl StoreLock {
    /// Lock that only serializes callers within this process.
    pub fn in_process(guard: OwnedMutexGuard<()>) -> Self {
        Self {
            _guard: guard,
            lock_file: None,
        }
    }

    /// Acquire the sidecar lock file at `path` after taking the in-process guard.
    ///
    /// Waits with exponential backoff until `timeout`. A lock file older than
    /// `stale_after` is assumed to belong to a crashed process and is reclaimed.
    pub async fn with_file(
        guard: OwnedMutexGuard<()>,
        path: &Path,
        timeout: Duration,
        stale_after: Duration,
    ) -> Result<Self> {
        let started = tokio::time::Instant::now();
        let mut backoff = INITIAL_BACKOFF;
        let token = new_token();

        loop {
            if try_create(path, &token).await? {
                debug!("Acquired store lock {}", path.display());
                return Ok(Self {
                    _guard: guard,
                    lock_file: Some(LockFile {
                        path: path.to_path_buf(),
                        token,
                    }),
                });
            }

            if is_stale(path, stale_after).await && reclaim(path, stale_after).await? {
                continue;
            }

            let waited = started.elapsed();
            if waited >= timeout {
                return Err(StorageError::LockTimeout {
                    path: path.to_path_buf(),
                    waited,
                });
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    /// Token written into the lock file, if this guard holds one.
    pub fn token(&self) -> Option<&str> {
        self.lock_file.as_ref().map(|f| f.token.as_str())
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let Some(LockFile { path, token }) = self.lock_file.take() else {
            return;
        };
        match std::fs::read_to_string(&path) {
            Ok(current) if current == token => {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!("Failed to release store lock {}: {}", path.display(), e);
                }
            }
            Ok(_) => warn!("Store lock {} was taken over, leaving it in place", path.display()),
            Err(e) => warn!("Failed to release store lock {}: {}", path.display(), e),
        }
    }
}

fn new_token() -> String {
    format!("{}:{}", std::process::id(), Uuid::new_v4())
}

/// Create `path` exclusively and write `token` into it.
///
/// Returns `false` when the file already exists.
async fn try_create(path: &Path, token: &str) -> Result<bool> {
    let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e.into()),
    };

    let written = async {
        file.write_all(token.as_bytes()).await?;
        file.sync_all().await
    }
    .await;
    if let Err(e) = written {
        let _ = fs::remove_file(path).await;
        return Err(e.into());
    }
    Ok(true)
}

/// Remove a stale lock at `path` while holding its `.reclaim` lock.
///
/// Returns whether the lock file is gone, so the caller can retry at once.
async fn reclaim(path: &Path, stale_after: Duration) -> Result<bool> {
    let reclaim_path = reclaim_path(path);
    let token = new_token();

    if !try_create(&reclaim_path, &token).await? {
        // A reclaimer that crashed mid-way leaves this file behind.
        if is_stale(&reclaim_path, stale_after).await {
            warn!("Removing abandoned reclaim lock {}", reclaim_path.display());
            let _ = fs::remove_file(&reclaim_path).await;
        }
        return Ok(false);
    }

    let cleared = if is_stale(path, stale_after).await {
        warn!("Removing stale store lock {}", path.display());
        match fs::remove_file(path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                release(&reclaim_path, &token).await;
                return Err(e.into());
            }
        }
    } else {
        false
    };

    release(&reclaim_path, &token).await;
    Ok(cleared)
}

async fn release(path: &Path, token: &str) {
    if fs::read_to_string(path).await.is_ok_and(|current| current == token) {
        let _ = fs::remove_file(path).await;
    }
}

fn reclaim_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".reclaim");
    PathBuf::from(name)
}

async fn is_stale(path: &Path, stale_after: Duration) -> bool {
    let Ok(metadata) = fs::metadata(path).await else {
        return false;
    };
    metadata
        .modified()
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > stale_after)
}
