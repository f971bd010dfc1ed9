//! Schedule generation - turns learned parameters into concrete values.

use std::collections::BTreeMap;

use metasched_core::{activate, Recommendation, SchedulingStrategy};

use crate::PerformanceEvaluator;

/// Predictions needed before confidence is no longer discounted.
pub const CONFIDENCE_SAMPLES: usize = 10;

/// Stateless generator of recommendations.
#[derive(Debug, Clone)]
pub struct ScheduleGenerator {
    evaluator: PerformanceEvaluator,
    confidence_samples: usize,
}

impl ScheduleGenerator {
    /// Create a generator with default confidence scaling.
    pub fn new() -> Self {
        Self {
            evaluator: PerformanceEvaluator::new(),
            confidence_samples: CONFIDENCE_SAMPLES,
        }
    }

    /// Set the sample count at which confidence reaches full accuracy.
    pub fn with_confidence_samples(mut self, samples: usize) -> Self {
        self.confidence_samples = samples.max(1);
        self
    }

    /// Recommend values for `task_name` from its nominal parameters.
    ///
    /// Each learned parameter becomes `max(floor, nominal * weight + bias)`.
    /// Until the strategy has evidence, the nominal values are returned as-is
    /// with zero confidence.
    pub fn optimize(
        &self,
        task_name: &str,
        nominal: &BTreeMap<String, f64>,
        strategy: &SchedulingStrategy,
    ) -> Recommendation {
        let snapshot = self.evaluator.evaluate(strategy);

        let optimized_parameters = nominal
            .iter()
            .map(|(name, &value)| {
                let learned = strategy.parameters.get(name).filter(|_| snapshot.has_data());
                let optimized = match learned {
                    Some(params) => params.activate(value),
                    None => passthrough(value),
                };
                (name.clone(), optimized)
            })
            .collect();

        let evidence = (snapshot.total_predictions as f64 / self.confidence_samples as f64).min(1.0);
        let confidence_score = (snapshot.accuracy_score * evidence).clamp(0.0, 100.0);

        Recommendation {
            task_name: task_name.to_string(),
            strategy_name: strategy.name.clone(),
            optimized_parameters,
            confidence_score,
        }
    }
}

impl Default for ScheduleGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Keep a positive nominal value untouched; floor anything else.
fn passthrough(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        activate(value)
    }
}
