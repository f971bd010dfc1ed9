//! Storage trait abstraction.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use metasched_core::{get_or_insert, GetOrCreate, ParameterSpec, SchedulingStrategy};
use tracing::info;

use crate::{StoreLock, StrategyDocument};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Another holder kept the store lock for too long
    #[error("timed out after {waited:?} waiting for store lock {}", path.display())]
    LockTimeout {
        /// Lock file path
        path: PathBuf,
        /// How long we waited
        waited: Duration,
    },

    /// The document was written by a newer layout
    #[error("store document version {found} is newer than supported version {supported}")]
    UnsupportedVersion {
        /// Version found on disk
        found: u32,
        /// Newest version this build understands
        supported: u32,
    },
}

/// Durable CRUD over scheduling strategies, keyed by name.
///
/// `save_document` overwrites the whole state, so callers that load, mutate
/// and save must hold the guard returned by [`StrategyStore::lock`] for the
/// entire cycle. The provided methods other than `get_or_create` do not lock.
#[async_trait]
pub trait StrategyStore: Send + Sync {
    /// Read the full document. Missing or corrupt storage yields an empty document.
    async fn load_document(&self) -> Result<StrategyDocument>;

    /// Atomically overwrite the full document.
    async fn save_document(&self, document: &StrategyDocument) -> Result<()>;

    /// Acquire exclusive access to the store.
    async fn lock(&self) -> Result<StoreLock>;

    /// All strategies keyed by name.
    async fn load_all(&self) -> Result<BTreeMap<String, SchedulingStrategy>> {
        Ok(self.load_document().await?.strategy_map())
    }

    /// Persist exactly this strategy set, keeping config and unknown fields.
    async fn save_all(&self, strategies: &BTreeMap<String, SchedulingStrategy>) -> Result<()> {
        let mut document = self.load_document().await?;
        document.set_strategies(strategies);
        self.save_document(&document).await
    }

    /// Return the named strategy, seeding and persisting it if missing.
    async fn get_or_create(&self, name: &str, spec: &ParameterSpec) -> Result<GetOrCreate> {
        let _lock = self.lock().await?;
        let mut document = self.load_document().await?;
        let mut strategies = document.strategy_map();

        let (created, strategy) = get_or_insert(&mut strategies, name, spec, chrono::Utc::now());
        let strategy = strategy.clone();

        if created {
            info!("Seeded new strategy `{}` with {} parameters", name, strategy.parameters.len());
            document.replace_strategies(strategies);
            self.save_document(&document).await?;
        }

        Ok(GetOrCreate { created, strategy })
    }
}
