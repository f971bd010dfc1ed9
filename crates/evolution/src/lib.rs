//! Evolution layer - adaptive learning and strategy evolution.
//!
//! Feedback flows through the [`AdaptationEngine`], strategy populations are
//! refined by the [`EvolutionEngine`], and recommendations and summaries come
//! from the [`ScheduleGenerator`] and [`ReportGenerator`]. The [`Optimizer`]
//! ties them to a [`metasched_storage::StrategyStore`].

#![warn(missing_docs, unused_crate_dependencies)]

mod metrics;
mod optimizer;
mod evolver;
mod schedule;
mod report;
pub mod engine;

pub use metrics::{PerformanceEvaluator, DEFAULT_TREND_WINDOW, TREND_TOLERANCE};
pub use optimizer::{AdaptationEngine, AdaptationOutcome};
pub use evolver::{EvolutionConfig, EvolutionEngine, EvolutionOutcome, RankedStrategy};
pub use schedule::{ScheduleGenerator, CONFIDENCE_SAMPLES};
pub use report::{OptimizationReport, ReportGenerator, StrategyReport};
pub use engine::{AdaptReceipt, EngineConfig, EngineError, Optimizer, DEFAULT_STRATEGY};
