//! Adaptation engine - folds one feedback record into a strategy.
//!
//! Each affected parameter takes one gradient-descent step with momentum:
//!
//! ```text
//! error    = target_success_rate - (success ? 1 : 0)
//! gradient = error * direction
//! momentum = momentum_factor * momentum + (1 - momentum_factor) * gradient
//! weight   = weight - learning_rate * momentum
//! ```

use metasched_core::{
    relative_error, ExecutionFeedback, LearningParameters, LearningStep, OptimizerConfig,
    PredictionRecord, SchedulingStrategy, Time,
};
use serde::Serialize;
use tracing::debug;

use crate::PerformanceEvaluator;

/// What a single adaptation step changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdaptationOutcome {
    /// Strategy that was updated
    pub strategy_name: String,
    /// Parameters whose weights moved
    pub updated_parameters: Vec<String>,
    /// Score appended to the performance history
    pub performance_score: f64,
    /// Relative prediction error of the feedback
    pub relative_error: f64,
    /// Strategy accuracy after the update
    pub accuracy_score: f64,
}

/// Applies gradient descent with momentum to strategy parameters.
#[derive(Debug, Clone)]
pub struct AdaptationEngine {
    config: OptimizerConfig,
    evaluator: PerformanceEvaluator,
}

impl AdaptationEngine {
    /// Create an engine using the given global configuration.
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            config,
            evaluator: PerformanceEvaluator::new(),
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Fold `feedback` into `strategy`.
    ///
    /// Every parameter is updated unless the feedback names one, in which case
    /// only that parameter moves. A named parameter the strategy lacks is added,
    /// seeded from the default spec or from the predicted value.
    pub fn apply(
        &self,
        strategy: &mut SchedulingStrategy,
        feedback: &ExecutionFeedback,
        now: Time,
    ) -> AdaptationOutcome {
        let learning_rate = strategy.learning_rate.unwrap_or(self.config.learning_rate);
        let observed = if feedback.success { 1.0 } else { 0.0 };
        let error = self.config.target_success_rate - observed;

        let mut updated_parameters = Vec::new();
        match &feedback.parameter {
            Some(name) => {
                let params = strategy.parameters.entry(name.clone()).or_insert_with(|| {
                    match self.config.default_parameters.get(name) {
                        Some(seed) => LearningParameters::from_seed(name.clone(), seed),
                        None => LearningParameters::new(name.clone(), feedback.predicted_value),
                    }
                });
                self.step(params, error, learning_rate);
                updated_parameters.push(name.clone());
            }
            None => {
                for (name, params) in strategy.parameters.iter_mut() {
                    self.step(params, error, learning_rate);
                    updated_parameters.push(name.clone());
                }
            }
        }

        let relative_error = relative_error(feedback.predicted_value, feedback.actual_value);
        let performance_score = score(feedback.success, relative_error);

        strategy.push_performance(performance_score);
        strategy.push_prediction(PredictionRecord {
            task_name: feedback.task_name.clone(),
            predicted_value: feedback.predicted_value,
            actual_value: feedback.actual_value,
            success: feedback.success,
            timestamp: feedback.timestamp,
        });
        strategy.touch(now);

        let accuracy_score = self.evaluator.evaluate(strategy).accuracy_score;
        debug!(
            "Adapted `{}` from task `{}`: error {:.3}, score {:.3}, accuracy {:.1}",
            strategy.name, feedback.task_name, error, performance_score, accuracy_score
        );

        AdaptationOutcome {
            strategy_name: strategy.name.clone(),
            updated_parameters,
            performance_score: strategy.performance_history.last().copied().unwrap_or(0.0),
            relative_error,
            accuracy_score,
        }
    }

    fn step(&self, params: &mut LearningParameters, error: f64, learning_rate: f64) {
        let factor = self.config.momentum_factor;
        let gradient = error * params.direction.sign();

        params.gradient = gradient;
        params.momentum = factor * params.momentum + (1.0 - factor) * gradient;
        params.weight -= learning_rate * params.momentum;
        params.push_step(LearningStep {
            gradient,
            momentum: params.momentum,
        });
    }
}

impl Default for AdaptationEngine {
    fn default() -> Self {
        Self::new(OptimizerConfig::default())
    }
}

/// Failed runs score zero; successful ones score by prediction accuracy.
fn score(success: bool, relative_error: f64) -> f64 {
    if success {
        (1.0 - relative_error).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use metasched_core::{Direction, ParameterSeed, ParameterSpec, HISTORY_CAP};

    fn strategy() -> SchedulingStrategy {
        SchedulingStrategy::new("default", &ParameterSpec::default(), Utc::now())
    }

    #[test]
    fn test_failure_step_matches_formula() {
        let engine = AdaptationEngine::default();
        let mut strategy = strategy();
        let feedback = ExecutionFeedback::new("build", "default", 120.0, 300.0, false);

        let outcome = engine.apply(&mut strategy, &feedback, Utc::now());
        assert_eq!(outcome.updated_parameters.len(), 3);

        // error = 0.95, gradient = 0.95, momentum = 0.1 * 0.95
        let timeout = &strategy.parameters["timeout"];
        assert!((timeout.gradient - 0.95).abs() < 1e-12);
        assert!((timeout.momentum - 0.095).abs() < 1e-12);
        assert!((timeout.weight - (1.0 - 0.01 * 0.095)).abs() < 1e-12);
        assert_eq!(timeout.learning_history.len(), 1);

        // Decrease-direction parameters move the other way.
        let concurrency = &strategy.parameters["concurrency_limit"];
        assert!((concurrency.gradient + 0.95).abs() < 1e-12);
        assert!(concurrency.weight > 1.0);

        assert_eq!(strategy.performance_history, vec![0.0]);
        assert_eq!(outcome.performance_score, 0.0);
    }

    #[test]
    fn test_momentum_accumulates_across_updates() {
        let engine = AdaptationEngine::default();
        let mut strategy = strategy();
        let feedback = ExecutionFeedback::new("build", "default", 100.0, 100.0, true);

        engine.apply(&mut strategy, &feedback, Utc::now());
        engine.apply(&mut strategy, &feedback, Utc::now());

        // gradient = -0.05 both times
        let m1 = 0.1 * -0.05;
        let m2 = 0.9 * m1 + 0.1 * -0.05;
        let timeout = &strategy.parameters["timeout"];
        assert!((timeout.momentum - m2).abs() < 1e-12);
        assert!((timeout.weight - (1.0 - 0.01 * m1 - 0.01 * m2)).abs() < 1e-12);
        assert_eq!(strategy.performance_history, vec![1.0, 1.0]);
    }

    #[test]
    fn test_strategy_learning_rate_override() {
        let engine = AdaptationEngine::default();
        let mut strategy = strategy().with_learning_rate(0.5);
        let feedback = ExecutionFeedback::new("build", "default", 10.0, 10.0, false);

        engine.apply(&mut strategy, &feedback, Utc::now());
        let timeout = &strategy.parameters["timeout"];
        assert!((timeout.weight - (1.0 - 0.5 * 0.095)).abs() < 1e-12);
    }

    #[test]
    fn test_named_parameter_restricts_update() {
        let engine = AdaptationEngine::default();
        let mut strategy = strategy();
        let feedback = ExecutionFeedback::new("build", "default", 30.0, 31.0, false).for_parameter("timeout");

        let outcome = engine.apply(&mut strategy, &feedback, Utc::now());
        assert_eq!(outcome.updated_parameters, vec!["timeout".to_string()]);
        assert_eq!(strategy.parameters["retry_count"].weight, 1.0);
        assert!(strategy.parameters["retry_count"].learning_history.is_empty());
        assert!(strategy.parameters["timeout"].weight < 1.0);
    }

    #[test]
    fn test_unknown_named_parameter_is_seeded() {
        let config = OptimizerConfig {
            default_parameters: ParameterSpec::new()
                .with("queue_depth", ParameterSeed::new(8.0).with_direction(Direction::Decrease)),
            ..Default::default()
        };
        let engine = AdaptationEngine::new(config);
        let mut strategy = SchedulingStrategy::new("s", &ParameterSpec::new(), Utc::now());

        engine.apply(
            &mut strategy,
            &ExecutionFeedback::new("t", "s", 5.0, 5.0, true).for_parameter("queue_depth"),
            Utc::now(),
        );
        engine.apply(
            &mut strategy,
            &ExecutionFeedback::new("t", "s", 42.0, 40.0, true).for_parameter("warmup"),
            Utc::now(),
        );

        assert_eq!(strategy.parameters["queue_depth"].current_value, 8.0);
        assert_eq!(strategy.parameters["queue_depth"].direction, Direction::Decrease);
        assert_eq!(strategy.parameters["warmup"].current_value, 42.0);
    }

    #[test]
    fn test_success_score_uses_relative_error() {
        let engine = AdaptationEngine::default();
        let mut strategy = strategy();
        let outcome = engine.apply(
            &mut strategy,
            &ExecutionFeedback::new("build", "default", 120.0, 100.0, true),
            Utc::now(),
        );
        assert!((outcome.performance_score - 0.8).abs() < 1e-12);
        assert!((outcome.accuracy_score - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_actual_value_uses_floor() {
        let engine = AdaptationEngine::default();
        let mut strategy = strategy();
        let outcome = engine.apply(
            &mut strategy,
            &ExecutionFeedback::new("build", "default", 1.0, 0.0, true),
            Utc::now(),
        );
        assert!(outcome.relative_error.is_finite());
        assert_eq!(outcome.performance_score, 0.0);
    }

    #[test]
    fn test_histories_grow_monotonically_up_to_cap() {
        let engine = AdaptationEngine::default();
        let mut strategy = strategy();
        let feedback = ExecutionFeedback::new("build", "default", 100.0, 100.0, true);

        for n in 1..=(HISTORY_CAP + 10) {
            engine.apply(&mut strategy, &feedback, Utc::now());
            assert_eq!(strategy.performance_history.len(), n.min(HISTORY_CAP));
        }
        assert_eq!(strategy.predictions.len(), HISTORY_CAP);
        assert_eq!(strategy.parameters["timeout"].learning_history.len(), HISTORY_CAP);
    }
}
