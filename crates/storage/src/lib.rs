//! Storage abstraction and implementations for the schedule optimizer.
//!
//! This crate provides a trait-based store over the single strategy document,
//! with a JSON file reference implementation and an in-memory one.

#![warn(missing_docs)]

pub mod trait_;
pub mod document;
pub mod lock;
pub mod json_storage;
pub mod memory;

pub use trait_::{StrategyStore, StorageError, Result};
pub use document::{StrategyDocument, DOCUMENT_VERSION};
pub use lock::StoreLock;
pub use json_storage::JsonStrategyStore;
pub use memory::MemoryStrategyStore;
