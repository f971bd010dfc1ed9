//! Performance evaluation - accuracy statistics and trend detection.

use metasched_core::{PerformanceSnapshot, PredictionRecord, SchedulingStrategy, Trend};

/// Default number of recent performance entries compared by [`PerformanceEvaluator::detect_trend`].
pub const DEFAULT_TREND_WINDOW: usize = 10;

/// Mean difference below which a trend is reported as stable.
pub const TREND_TOLERANCE: f64 = 0.05;

/// Stateless evaluator over strategy histories.
#[derive(Debug, Clone, Copy)]
pub struct PerformanceEvaluator {
    trend_tolerance: f64,
}

impl PerformanceEvaluator {
    /// Create an evaluator with the default tolerance.
    pub fn new() -> Self {
        Self {
            trend_tolerance: TREND_TOLERANCE,
        }
    }

    /// Set the mean difference that counts as a trend.
    pub fn with_trend_tolerance(mut self, tolerance: f64) -> Self {
        self.trend_tolerance = tolerance.max(0.0);
        self
    }

    /// Bucketed accuracy over a strategy's predictions.
    ///
    /// A strategy that never received feedback yields `total_predictions == 0`.
    pub fn evaluate(&self, strategy: &SchedulingStrategy) -> PerformanceSnapshot {
        snapshot_of(strategy.predictions.iter())
    }

    /// Compare the last `window` performance scores with everything before them.
    ///
    /// Fewer than `2 * window` scores is reported as [`Trend::Stable`].
    pub fn detect_trend(&self, strategy: &SchedulingStrategy, window: usize) -> Trend {
        let history = &strategy.performance_history;
        if window == 0 || history.len() < window * 2 {
            return Trend::Stable;
        }

        let (earlier, recent) = history.split_at(history.len() - window);
        let delta = mean(recent) - mean(earlier);

        if delta > self.trend_tolerance {
            Trend::Improving
        } else if delta < -self.trend_tolerance {
            Trend::Declining
        } else {
            Trend::Stable
        }
    }

    /// Accuracy pooled across every strategy's predictions.
    pub fn overall_accuracy<'a>(
        &self,
        strategies: impl IntoIterator<Item = &'a SchedulingStrategy>,
    ) -> PerformanceSnapshot {
        snapshot_of(strategies.into_iter().flat_map(|s| s.predictions.iter()))
    }

    /// The strategy with the highest accuracy among those with data.
    ///
    /// Ties go to the earliest `last_updated`, then to the smallest name.
    pub fn best<'a>(
        &self,
        strategies: impl IntoIterator<Item = &'a SchedulingStrategy>,
    ) -> Option<(&'a SchedulingStrategy, PerformanceSnapshot)> {
        strategies
            .into_iter()
            .map(|s| (s, self.evaluate(s)))
            .filter(|(_, snapshot)| snapshot.has_data())
            .min_by(|(a, sa), (b, sb)| {
                sb.accuracy_score
                    .total_cmp(&sa.accuracy_score)
                    .then_with(|| a.last_updated.cmp(&b.last_updated))
                    .then_with(|| a.name.cmp(&b.name))
            })
    }
}

impl Default for PerformanceEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

fn snapshot_of<'a>(records: impl Iterator<Item = &'a PredictionRecord>) -> PerformanceSnapshot {
    let mut snapshot = PerformanceSnapshot::insufficient_data();
    let mut error_sum = 0.0;

    for record in records {
        let error = record.relative_error() * 100.0;
        error_sum += error;
        snapshot.total_predictions += 1;

        if error <= 10.0 {
            snapshot.excellent += 1;
        } else if error <= 25.0 {
            snapshot.good += 1;
        } else if error <= 50.0 {
            snapshot.fair += 1;
        } else {
            snapshot.poor += 1;
        }
    }

    if snapshot.total_predictions > 0 {
        snapshot.mean_error = error_sum / snapshot.total_predictions as f64;
        snapshot.accuracy_score = (100.0 - snapshot.mean_error).clamp(0.0, 100.0);
    }
    snapshot
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use metasched_core::ParameterSpec;

    fn strategy_with(name: &str, pairs: &[(f64, f64)]) -> SchedulingStrategy {
        let now = Utc::now();
        let mut strategy = SchedulingStrategy::new(name, &ParameterSpec::default(), now);
        for &(predicted, actual) in pairs {
            strategy.push_prediction(PredictionRecord {
                task_name: "job".to_string(),
                predicted_value: predicted,
                actual_value: actual,
                success: true,
                timestamp: now,
            });
        }
        strategy
    }

    #[test]
    fn test_empty_history_is_insufficient_data() {
        let snapshot = PerformanceEvaluator::new().evaluate(&strategy_with("s", &[]));
        assert_eq!(snapshot.total_predictions, 0);
        assert!(!snapshot.has_data());
    }

    #[test]
    fn test_buckets_and_accuracy() {
        // errors: 5%, 20%, 40%, 100%
        let strategy = strategy_with("s", &[(105.0, 100.0), (120.0, 100.0), (60.0, 100.0), (200.0, 100.0)]);
        let snapshot = PerformanceEvaluator::new().evaluate(&strategy);

        assert_eq!(snapshot.total_predictions, 4);
        assert_eq!((snapshot.excellent, snapshot.good, snapshot.fair, snapshot.poor), (1, 1, 1, 1));
        assert!((snapshot.mean_error - 41.25).abs() < 1e-9);
        assert!((snapshot.accuracy_score - 58.75).abs() < 1e-9);
    }

    #[test]
    fn test_accuracy_is_clamped_at_zero() {
        let strategy = strategy_with("s", &[(500.0, 100.0)]);
        let snapshot = PerformanceEvaluator::new().evaluate(&strategy);
        assert_eq!(snapshot.accuracy_score, 0.0);
        assert_eq!(snapshot.poor, 1);
    }

    #[test]
    fn test_trend_requires_two_windows() {
        let evaluator = PerformanceEvaluator::new();
        let mut strategy = strategy_with("s", &[]);
        for score in [1.0, 1.0, 1.0, 0.0, 0.0] {
            strategy.push_performance(score);
        }
        assert_eq!(evaluator.detect_trend(&strategy, 3), Trend::Stable);

        strategy.push_performance(0.0);
        assert_eq!(evaluator.detect_trend(&strategy, 3), Trend::Declining);
    }

    #[test]
    fn test_trend_improving_and_stable() {
        let evaluator = PerformanceEvaluator::new();
        let mut strategy = strategy_with("s", &[]);
        for score in [0.2, 0.3, 0.9, 0.95] {
            strategy.push_performance(score);
        }
        assert_eq!(evaluator.detect_trend(&strategy, 2), Trend::Improving);

        let mut flat = strategy_with("flat", &[]);
        for score in [0.8, 0.82, 0.81, 0.79] {
            flat.push_performance(score);
        }
        assert_eq!(evaluator.detect_trend(&flat, 2), Trend::Stable);
        assert_eq!(evaluator.detect_trend(&flat, 0), Trend::Stable);
    }

    #[test]
    fn test_overall_pools_all_strategies() {
        let a = strategy_with("a", &[(100.0, 100.0)]);
        let b = strategy_with("b", &[(150.0, 100.0)]);
        let snapshot = PerformanceEvaluator::new().overall_accuracy([&a, &b]);
        assert_eq!(snapshot.total_predictions, 2);
        assert!((snapshot.accuracy_score - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_best_breaks_ties_by_last_updated() {
        let mut older = strategy_with("zeta", &[(100.0, 100.0)]);
        let mut newer = strategy_with("alpha", &[(100.0, 100.0)]);
        let untrained = strategy_with("empty", &[]);
        let now = Utc::now();
        older.last_updated = now - Duration::hours(1);
        newer.last_updated = now;

        let evaluator = PerformanceEvaluator::new();
        let (best, _) = evaluator.best([&newer, &untrained, &older]).unwrap();
        assert_eq!(best.name, "zeta");
        assert!(evaluator.best([&untrained]).is_none());
    }
}
