//! Scheduling strategy model - a named, independently evolving parameter set.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::parameter::{truncate_front, LearningParameters, ParameterSpec, ACTIVATION_FLOOR, HISTORY_CAP};
use crate::Time;

/// One observed prediction folded into a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    /// Task the prediction was made for
    pub task_name: String,
    /// Predicted value (e.g. duration)
    pub predicted_value: f64,
    /// Observed value
    pub actual_value: f64,
    /// Whether the execution succeeded
    pub success: bool,
    /// When the execution was reported
    pub timestamp: Time,
}

impl PredictionRecord {
    /// Relative error of this prediction.
    pub fn relative_error(&self) -> f64 {
        relative_error(self.predicted_value, self.actual_value)
    }
}

/// `|predicted - actual| / max(actual, floor)`.
pub fn relative_error(predicted: f64, actual: f64) -> f64 {
    (predicted - actual).abs() / actual.max(ACTIVATION_FLOOR)
}

/// A named set of learned scheduling parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulingStrategy {
    /// Unique key within the store
    pub name: String,

    /// Learned parameters by name
    pub parameters: BTreeMap<String, LearningParameters>,

    /// Performance scores in [0, 1], oldest first
    #[serde(default)]
    pub performance_history: Vec<f64>,

    /// Predictions folded into this strategy, oldest first
    #[serde(default)]
    pub predictions: Vec<PredictionRecord>,

    /// Per-strategy learning rate override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning_rate: Option<f64>,

    /// Strategy this one was evolved from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    /// Number of evolution steps from a root strategy
    #[serde(default)]
    pub generation: u32,

    /// When created
    pub created_at: Time,

    /// Last mutation
    pub last_updated: Time,
}

impl SchedulingStrategy {
    /// Create a strategy seeded from a parameter spec.
    pub fn new(name: impl Into<String>, spec: &ParameterSpec, now: Time) -> Self {
        let parameters = spec
            .iter()
            .map(|(name, seed)| (name.clone(), LearningParameters::from_seed(name.clone(), seed)))
            .collect();

        Self {
            name: name.into(),
            parameters,
            performance_history: Vec::new(),
            predictions: Vec::new(),
            learning_rate: None,
            parent: None,
            generation: 0,
            created_at: now,
            last_updated: now,
        }
    }

    /// Set a learning rate override.
    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = Some(learning_rate);
        self
    }

    /// Whether the strategy has never received feedback.
    pub fn is_untrained(&self) -> bool {
        self.predictions.is_empty()
            && self.parameters.values().all(|p| p.learning_history.is_empty())
    }

    /// Append a performance score, clamped to [0, 1] and capped.
    pub fn push_performance(&mut self, score: f64) {
        let score = if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.0 };
        self.performance_history.push(score);
        truncate_front(&mut self.performance_history, HISTORY_CAP);
    }

    /// Append a prediction record, capped.
    pub fn push_prediction(&mut self, record: PredictionRecord) {
        self.predictions.push(record);
        truncate_front(&mut self.predictions, HISTORY_CAP);
    }

    /// Mark the strategy as mutated at `now`.
    pub fn touch(&mut self, now: Time) {
        self.last_updated = now;
    }
}

/// Result of looking up a strategy that may have been created on demand.
#[derive(Debug, Clone, PartialEq)]
pub struct GetOrCreate {
    /// Whether the strategy was seeded just now
    pub created: bool,
    /// The existing or newly seeded strategy
    pub strategy: SchedulingStrategy,
}

/// Fetch `name` from `strategies`, seeding it from `spec` if missing.
///
/// Returns whether a new strategy was inserted.
pub fn get_or_insert<'a>(
    strategies: &'a mut BTreeMap<String, SchedulingStrategy>,
    name: &str,
    spec: &ParameterSpec,
    now: Time,
) -> (bool, &'a mut SchedulingStrategy) {
    let created = !strategies.contains_key(name);
    let strategy = strategies
        .entry(name.to_string())
        .or_insert_with(|| SchedulingStrategy::new(name, spec, now));
    (created, strategy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_new_strategy_has_identity_parameters() {
        let strategy = SchedulingStrategy::new("default", &ParameterSpec::default(), Utc::now());
        assert_eq!(strategy.parameters.len(), 3);
        for params in strategy.parameters.values() {
            assert_eq!(params.weight, 1.0);
            assert_eq!(params.bias, 0.0);
        }
        assert!(strategy.is_untrained());
    }

    #[test]
    fn test_relative_error_uses_floor() {
        assert!((relative_error(120.0, 115.0) - 5.0 / 115.0).abs() < 1e-12);
        assert!((relative_error(1.0, 0.0) - 10.0).abs() < 1e-12);
        assert!((relative_error(1.0, -4.0) - 50.0).abs() < 1e-12);
    }

    #[test]
    fn test_performance_scores_are_clamped() {
        let mut strategy = SchedulingStrategy::new("s", &ParameterSpec::new(), Utc::now());
        strategy.push_performance(1.7);
        strategy.push_performance(-0.2);
        strategy.push_performance(f64::NAN);
        assert_eq!(strategy.performance_history, vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_get_or_insert_reports_creation() {
        let mut map = BTreeMap::new();
        let now = Utc::now();
        let (created, _) = get_or_insert(&mut map, "a", &ParameterSpec::default(), now);
        assert!(created);
        let (created, strategy) = get_or_insert(&mut map, "a", &ParameterSpec::new(), now);
        assert!(!created);
        assert_eq!(strategy.parameters.len(), 3);
    }
}
