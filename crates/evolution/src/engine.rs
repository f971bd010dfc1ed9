//! The optimizer service - runs each operation against a strategy store.
//!
//! Every mutating operation holds the store lock across its whole
//! load → mutate → save cycle:
//! ```text
//! Feedback → Adapt → Persist        (record_feedback, adapt)
//! Rank → Mutate → Prune → Persist   (evolve)
//! Load → Optimize / Report          (read-only)
//! ```

use std::collections::BTreeMap;

use metasched_core::{
    get_or_insert, ExecutionFeedback, FeedbackError, OptimizerConfig, Recommendation,
    SchedulingStrategy,
};
use metasched_storage::{StorageError, StrategyStore};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    AdaptationEngine, AdaptationOutcome, EvolutionConfig, EvolutionEngine, EvolutionOutcome,
    OptimizationReport, ReportGenerator, ScheduleGenerator, DEFAULT_TREND_WINDOW,
};

/// Error type for optimizer operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced to callers of the optimizer.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The store could not be read or written
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    /// Feedback failed validation; nothing was applied
    #[error("invalid feedback: {0}")]
    Feedback(#[from] FeedbackError),

    /// A batch record names a different strategy than the one being adapted
    #[error("record {index} targets strategy `{found}`, expected `{expected}`")]
    StrategyMismatch {
        /// Zero-based position in the batch
        index: usize,
        /// Strategy being adapted
        expected: String,
        /// Strategy named by the record
        found: String,
    },

    /// A configuration update was rejected
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Configuration for the optimizer service.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Evolution knobs; `mutation_rate` is taken from the stored config when unset
    pub evolution: EvolutionConfig,
    /// Use the stored mutation rate instead of `evolution.mutation_rate`
    pub stored_mutation_rate: bool,
    /// Window for trend detection in reports
    pub trend_window: usize,
    /// Seed for evolution; random when `None`
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            evolution: EvolutionConfig::default(),
            stored_mutation_rate: true,
            trend_window: DEFAULT_TREND_WINDOW,
            seed: None,
        }
    }
}

/// Result of feeding a batch into one strategy.
#[derive(Debug, Clone, Serialize)]
pub struct AdaptReceipt {
    /// Strategy that was adapted
    pub strategy_name: String,
    /// Whether the strategy was seeded by this call
    pub created: bool,
    /// One outcome per applied record, in order
    pub outcomes: Vec<AdaptationOutcome>,
}

/// The meta-learning schedule optimizer.
pub struct Optimizer<S: StrategyStore> {
    store: S,
    config: EngineConfig,
}

impl<S: StrategyStore> Optimizer<S> {
    /// Create an optimizer over a store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            config: EngineConfig::default(),
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Validate and fold one feedback record into its strategy.
    ///
    /// Unknown strategies are created from the stored default parameter spec.
    pub async fn record_feedback(&self, feedback: ExecutionFeedback) -> Result<AdaptReceipt> {
        let strategy_name = feedback.strategy_name.clone();
        self.adapt(&strategy_name, vec![feedback]).await
    }

    /// Fold a batch of feedback into `strategy_name`, in order.
    ///
    /// Every record is validated first; any invalid or mismatched record
    /// rejects the whole batch before the store is touched.
    pub async fn adapt(&self, strategy_name: &str, batch: Vec<ExecutionFeedback>) -> Result<AdaptReceipt> {
        for (index, feedback) in batch.iter().enumerate() {
            feedback.validate().map_err(|e| FeedbackError::InBatch {
                index,
                source: Box::new(e),
            })?;
            if feedback.strategy_name != strategy_name {
                return Err(EngineError::StrategyMismatch {
                    index,
                    expected: strategy_name.to_string(),
                    found: feedback.strategy_name.clone(),
                });
            }
        }

        let _lock = self.store.lock().await?;
        let mut document = self.store.load_document().await?;
        let engine = AdaptationEngine::new(document.config.clone());
        let mut strategies = document.strategy_map();

        let now = chrono::Utc::now();
        let (created, strategy) =
            get_or_insert(&mut strategies, strategy_name, &document.config.default_parameters, now);
        if created {
            info!("Seeded new strategy `{}` from feedback", strategy_name);
        }

        let outcomes: Vec<AdaptationOutcome> = batch
            .iter()
            .map(|feedback| engine.apply(strategy, feedback, now))
            .collect();

        document.replace_strategies(strategies);
        self.store.save_document(&document).await?;

        info!("Adapted `{}` with {} feedback records", strategy_name, outcomes.len());
        Ok(AdaptReceipt {
            strategy_name: strategy_name.to_string(),
            created,
            outcomes,
        })
    }

    /// Run one evolution cycle with the configured seed.
    pub async fn evolve(&self) -> Result<EvolutionOutcome> {
        let seed = self.config.seed.unwrap_or_else(rand::random);
        debug!("Evolving with seed {}", seed);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        self.evolve_with(&mut rng).await
    }

    /// Run one evolution cycle drawing randomness from `rng`.
    pub async fn evolve_with<R: Rng + Send + ?Sized>(&self, rng: &mut R) -> Result<EvolutionOutcome> {
        let _lock = self.store.lock().await?;
        let mut document = self.store.load_document().await?;

        let mut evolution = self.config.evolution.clone();
        if self.config.stored_mutation_rate {
            evolution = evolution.with_mutation_rate(document.config.mutation_rate);
        }
        evolution.validate().map_err(EngineError::InvalidConfig)?;

        let mut strategies = document.strategy_map();
        let outcome = EvolutionEngine::new(evolution).evolve(&mut strategies, rng, chrono::Utc::now());

        if !outcome.created.is_empty() || !outcome.pruned.is_empty() {
            document.replace_strategies(strategies);
            self.store.save_document(&document).await?;
        }
        Ok(outcome)
    }

    /// Recommend parameters for a task.
    ///
    /// With no strategy name the most accurate strategy is used. A strategy
    /// that does not exist yet behaves like a fresh one: nominal values and
    /// zero confidence. Nothing is persisted.
    pub async fn optimize(
        &self,
        task_name: &str,
        nominal: &BTreeMap<String, f64>,
        strategy_name: Option<&str>,
    ) -> Result<Recommendation> {
        let document = self.store.load_document().await?;
        let strategies = document.strategy_map();

        let strategy = match strategy_name {
            Some(name) => strategies.get(name).cloned().unwrap_or_else(|| {
                debug!("Strategy `{}` not found, using untrained defaults", name);
                fresh(name, &document.config)
            }),
            None => crate::PerformanceEvaluator::new()
                .best(strategies.values())
                .map(|(s, _)| s.clone())
                .unwrap_or_else(|| fresh(DEFAULT_STRATEGY, &document.config)),
        };

        Ok(ScheduleGenerator::new().optimize(task_name, nominal, &strategy))
    }

    /// Summarize every strategy.
    pub async fn report(&self) -> Result<OptimizationReport> {
        let strategies = self.store.load_all().await?;
        Ok(ReportGenerator::new()
            .with_trend_window(self.config.trend_window)
            .generate(&strategies))
    }

    /// Look up one strategy.
    pub async fn strategy(&self, name: &str) -> Result<Option<SchedulingStrategy>> {
        Ok(self.store.load_all().await?.remove(name))
    }

    /// Stored global configuration.
    pub async fn settings(&self) -> Result<OptimizerConfig> {
        Ok(self.store.load_document().await?.config)
    }

    /// Update the stored global configuration.
    pub async fn update_settings(
        &self,
        update: impl FnOnce(&mut OptimizerConfig) + Send,
    ) -> Result<OptimizerConfig> {
        let _lock = self.store.lock().await?;
        let mut document = self.store.load_document().await?;
        update(&mut document.config);
        document.config.validate().map_err(EngineError::InvalidConfig)?;
        self.store.save_document(&document).await?;
        info!("Updated optimizer configuration");
        Ok(document.config)
    }
}

/// Name used when no strategy exists and none was requested.
pub const DEFAULT_STRATEGY: &str = "default";

fn fresh(name: &str, config: &OptimizerConfig) -> SchedulingStrategy {
    SchedulingStrategy::new(name, &config.default_parameters, chrono::Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use metasched_core::Trend;
    use metasched_storage::{JsonStrategyStore, MemoryStrategyStore};
    use std::sync::Arc;

    fn nominal(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[tokio::test]
    async fn test_feedback_creates_strategy_and_grows_history() {
        let optimizer = Optimizer::new(MemoryStrategyStore::new());

        for n in 1..=5 {
            let receipt = optimizer
                .record_feedback(ExecutionFeedback::new("build", "nightly", 100.0, 110.0, true))
                .await
                .unwrap();
            assert_eq!(receipt.created, n == 1);

            let strategy = optimizer.strategy("nightly").await.unwrap().unwrap();
            assert_eq!(strategy.performance_history.len(), n);
        }
    }

    #[tokio::test]
    async fn test_declining_trend_scenario() {
        let optimizer = Optimizer::new(MemoryStrategyStore::new())
            .with_config(EngineConfig { trend_window: 3, ..Default::default() });

        for _ in 0..3 {
            optimizer
                .record_feedback(ExecutionFeedback::new("build", "default", 120.0, 115.0, true))
                .await
                .unwrap();
        }
        for _ in 0..3 {
            optimizer
                .record_feedback(ExecutionFeedback::new("build", "default", 120.0, 300.0, false))
                .await
                .unwrap();
        }

        let report = optimizer.report().await.unwrap();
        assert_eq!(report.strategies[0].trend, Trend::Declining);
    }

    #[tokio::test]
    async fn test_invalid_batch_is_not_partially_applied() {
        let optimizer = Optimizer::new(MemoryStrategyStore::new());
        let batch = vec![
            ExecutionFeedback::new("build", "s", 10.0, 10.0, true),
            ExecutionFeedback::new("build", "s", f64::NAN, 10.0, true),
        ];
        let err = optimizer.adapt("s", batch).await.unwrap_err();
        assert!(matches!(err, EngineError::Feedback(FeedbackError::InBatch { index: 1, .. })));

        let mismatched = vec![ExecutionFeedback::new("build", "other", 10.0, 10.0, true)];
        let err = optimizer.adapt("s", mismatched).await.unwrap_err();
        assert!(matches!(err, EngineError::StrategyMismatch { index: 0, .. }));

        assert!(optimizer.strategy("s").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_failure_propagates() {
        let optimizer = Optimizer::new(MemoryStrategyStore::new());
        optimizer.store().set_fail_writes(true);

        let err = optimizer
            .record_feedback(ExecutionFeedback::new("build", "s", 10.0, 10.0, true))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Storage(StorageError::Io(_))));
    }

    #[tokio::test]
    async fn test_optimize_unknown_strategy_is_neutral() {
        let optimizer = Optimizer::new(MemoryStrategyStore::new());
        let input = nominal(&[("timeout", 45.0)]);

        let rec = optimizer.optimize("build", &input, Some("ghost")).await.unwrap();
        assert_eq!(rec.strategy_name, "ghost");
        assert_eq!(rec.confidence_score, 0.0);
        assert_eq!(rec.optimized_parameters, input);

        let rec = optimizer.optimize("build", &input, None).await.unwrap();
        assert_eq!(rec.strategy_name, DEFAULT_STRATEGY);
        assert!(optimizer.report().await.unwrap().strategies.is_empty());
    }

    #[tokio::test]
    async fn test_optimize_picks_best_strategy() {
        let optimizer = Optimizer::new(MemoryStrategyStore::new());
        optimizer
            .record_feedback(ExecutionFeedback::new("build", "sloppy", 200.0, 100.0, true))
            .await
            .unwrap();
        optimizer
            .record_feedback(ExecutionFeedback::new("build", "sharp", 101.0, 100.0, true))
            .await
            .unwrap();

        let rec = optimizer.optimize("build", &nominal(&[("timeout", 30.0)]), None).await.unwrap();
        assert_eq!(rec.strategy_name, "sharp");
        assert!(rec.confidence_score > 0.0);
    }

    #[tokio::test]
    async fn test_evolve_with_seed_persists_children() {
        let optimizer = Optimizer::new(MemoryStrategyStore::new()).with_config(EngineConfig {
            seed: Some(11),
            evolution: EvolutionConfig::default().with_min_samples(2).with_top_k(1),
            ..Default::default()
        });
        for _ in 0..2 {
            optimizer
                .record_feedback(ExecutionFeedback::new("build", "base", 100.0, 100.0, true))
                .await
                .unwrap();
        }

        let outcome = optimizer.evolve().await.unwrap();
        assert_eq!(outcome.created, vec!["base_evolved_1", "base_evolved_2"]);

        let child = optimizer.strategy("base_evolved_1").await.unwrap().unwrap();
        assert_eq!(child.parent.as_deref(), Some("base"));
        assert!(child.performance_history.is_empty());
    }

    #[tokio::test]
    async fn test_evolve_rejects_out_of_range_mutation_rate() {
        let store = MemoryStrategyStore::new();
        let mut document = store.load_document().await.unwrap();
        document.config.mutation_rate = f64::MAX;
        store.save_document(&document).await.unwrap();

        let optimizer = Optimizer::new(store);
        let err = optimizer.evolve().await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));

        let optimizer = Optimizer::new(MemoryStrategyStore::new()).with_config(EngineConfig {
            evolution: EvolutionConfig::default().with_mutation_rate(1.0e300),
            stored_mutation_rate: false,
            ..Default::default()
        });
        let err = optimizer.evolve().await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
        assert!(optimizer.update_settings(|c| c.mutation_rate = f64::MAX).await.is_err());
    }

    #[tokio::test]
    async fn test_report_twice_is_identical() {
        let optimizer = Optimizer::new(MemoryStrategyStore::new());
        optimizer
            .record_feedback(ExecutionFeedback::new("build", "a", 90.0, 100.0, true))
            .await
            .unwrap();

        let first = optimizer.report().await.unwrap();
        let second = optimizer.report().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_update_settings_validates() {
        let optimizer = Optimizer::new(MemoryStrategyStore::new());
        let config = optimizer.update_settings(|c| c.learning_rate = 0.05).await.unwrap();
        assert_eq!(config.learning_rate, 0.05);

        let err = optimizer.update_settings(|c| c.momentum_factor = 2.0).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
        assert_eq!(optimizer.settings().await.unwrap().momentum_factor, 0.9);
    }

    #[tokio::test]
    async fn test_concurrent_feedback_is_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStrategyStore::new(dir.path().join("strategies.json")).await.unwrap();
        let optimizer = Arc::new(Optimizer::new(store));

        let mut handles = Vec::new();
        for i in 0..8 {
            let optimizer = optimizer.clone();
            handles.push(tokio::spawn(async move {
                optimizer
                    .record_feedback(ExecutionFeedback::new(format!("job-{i}"), "shared", 50.0, 55.0, true))
                    .await
                    .map(|_| ())
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let strategy = optimizer.strategy("shared").await.unwrap().unwrap();
        assert_eq!(strategy.performance_history.len(), 8);
    }
}
