//! JSON file storage implementation.
//!
//! Stores the whole strategy set as one pretty-printed JSON document. Writes go
//! to a temporary sibling file that is synced and renamed over the target, so a
//! crash mid-write leaves the previous document intact.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{Result, StorageError, StoreLock, StrategyDocument, StrategyStore, DOCUMENT_VERSION};

/// File-based JSON storage backend.
pub struct JsonStrategyStore {
    path: PathBuf,
    guard: Arc<Mutex<()>>,
    lock_timeout: Duration,
    stale_lock_after: Duration,
}

impl JsonStrategyStore {
    /// Create storage backed by the document at `path`, creating its directory.
    ///
    /// The document itself is created on first save.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        Ok(Self {
            path,
            guard: Arc::new(Mutex::new(())),
            lock_timeout: Duration::from_secs(5),
            stale_lock_after: Duration::from_secs(60),
        })
    }

    /// Set how long `lock` waits for another holder.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Set the age after which a leftover lock file is considered stale.
    pub fn with_stale_lock_after(mut self, age: Duration) -> Self {
        self.stale_lock_after = age;
        self
    }

    /// Path of the backing document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "strategies.json".into());
        name.push(suffix);
        self.path.with_file_name(name)
    }

    fn lock_path(&self) -> PathBuf {
        self.sibling(".lock")
    }

    fn temp_path(&self) -> PathBuf {
        self.sibling(".tmp")
    }

    fn corrupt_path(&self) -> PathBuf {
        self.sibling(".corrupt")
    }

    /// Keep a copy of an unreadable document before it can be overwritten.
    async fn preserve_corrupt(&self) {
        let backup = self.corrupt_path();
        match fs::copy(&self.path, &backup).await {
            Ok(_) => info!("Copied unreadable store to {}", backup.display()),
            Err(e) => warn!("Could not back up unreadable store: {}", e),
        }
    }
}

#[async_trait::async_trait]
impl StrategyStore for JsonStrategyStore {
    async fn load_document(&self) -> Result<StrategyDocument> {
        let json = match fs::read_to_string(&self.path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No store at {}, starting empty", self.path.display());
                return Ok(StrategyDocument::default());
            }
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                warn!("Store {} is not valid UTF-8, starting empty", self.path.display());
                self.preserve_corrupt().await;
                return Ok(StrategyDocument::default());
            }
            Err(e) => return Err(e.into()),
        };

        let document: StrategyDocument = match serde_json::from_str(&json) {
            Ok(document) => document,
            Err(e) => {
                warn!("Store {} is corrupt ({}), starting empty", self.path.display(), e);
                self.preserve_corrupt().await;
                return Ok(StrategyDocument::default());
            }
        };

        if document.version > DOCUMENT_VERSION {
            return Err(StorageError::UnsupportedVersion {
                found: document.version,
                supported: DOCUMENT_VERSION,
            });
        }

        debug!("Loaded {} strategies from {}", document.strategies.len(), self.path.display());
        Ok(document)
    }

    async fn save_document(&self, document: &StrategyDocument) -> Result<()> {
        let json = serde_json::to_string_pretty(document)?;
        let temp = self.temp_path();

        let written = async {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(json.as_bytes()).await?;
            file.write_all(b"\n").await?;
            file.sync_all().await?;
            fs::rename(&temp, &self.path).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }

        debug!("Saved {} strategies to {}", document.strategies.len(), self.path.display());
        Ok(())
    }

    async fn lock(&self) -> Result<StoreLock> {
        let guard = self.guard.clone().lock_owned().await;
        StoreLock::with_file(guard, &self.lock_path(), self.lock_timeout, self.stale_lock_after).await
    }
}
