//! In-memory storage, for tests and embedding without a filesystem.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use super::{Result, StoreLock, StrategyDocument, StrategyStore};

/// Keeps the document in memory; `lock` serializes callers in this process.
#[derive(Default)]
pub struct MemoryStrategyStore {
    document: Mutex<StrategyDocument>,
    guard: Arc<Mutex<()>>,
    fail_writes: AtomicBool,
}

impl MemoryStrategyStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with a document.
    pub fn with_document(document: StrategyDocument) -> Self {
        Self {
            document: Mutex::new(document),
            ..Self::default()
        }
    }

    /// Make every subsequent save fail with a permission error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl StrategyStore for MemoryStrategyStore {
    async fn load_document(&self) -> Result<StrategyDocument> {
        Ok(self.document.lock().await.clone())
    }

    async fn save_document(&self, document: &StrategyDocument) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "writes disabled",
            )
            .into());
        }
        *self.document.lock().await = document.clone();
        Ok(())
    }

    async fn lock(&self) -> Result<StoreLock> {
        Ok(StoreLock::in_process(self.guard.clone().lock_owned().await))
    }
}
