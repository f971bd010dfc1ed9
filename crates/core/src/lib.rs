//! Meta-learning scheduler core data models.
//!
//! This crate defines the strategies, learned parameters and feedback records
//! shared by the store, the learning engines and the CLI.

#![warn(missing_docs)]

// Learned state
mod parameter;
mod strategy;
mod config;

// Inputs and derived views
mod feedback;
mod performance;
mod recommendation;

// Re-exports
pub use parameter::{
    activate, Direction, LearningParameters, LearningStep, ParameterSeed, ParameterSpec,
    ACTIVATION_FLOOR, HISTORY_CAP,
};
pub use strategy::{get_or_insert, relative_error, GetOrCreate, PredictionRecord, SchedulingStrategy};
pub use config::{OptimizerConfig, MAX_MUTATION_RATE};
pub use feedback::{ExecutionFeedback, FeedbackError};
pub use performance::{PerformanceSnapshot, Trend};
pub use recommendation::Recommendation;

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
