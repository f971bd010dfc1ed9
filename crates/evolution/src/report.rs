//! Report generation - read-only summary across all strategies.

use std::collections::BTreeMap;
use std::fmt;

use metasched_core::{PerformanceSnapshot, SchedulingStrategy, Trend};
use serde::Serialize;

use crate::{PerformanceEvaluator, DEFAULT_TREND_WINDOW};

/// Per-strategy line of a report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyReport {
    /// Strategy name
    pub strategy_name: String,
    /// Accuracy in [0, 100]
    pub accuracy_score: f64,
    /// Recent performance trend
    pub trend: Trend,
    /// Predictions behind the accuracy
    pub total_predictions: usize,
    /// Evolution generation
    pub generation: u32,
}

/// Aggregate view of every strategy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationReport {
    /// Accuracy pooled across all strategies
    pub overall: PerformanceSnapshot,
    /// One entry per strategy, in name order
    pub strategies: Vec<StrategyReport>,
    /// Highest-accuracy strategy with data
    pub best_strategy: Option<String>,
}

impl OptimizationReport {
    /// Whether there is nothing to report yet.
    pub fn is_empty(&self) -> bool {
        !self.overall.has_data()
    }
}

impl fmt::Display for OptimizationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Schedule Optimizer Report")?;
        if self.strategies.is_empty() {
            return writeln!(f, "  No strategies yet");
        }

        let o = &self.overall;
        writeln!(f, "  Predictions: {}", o.total_predictions)?;
        writeln!(f, "  Accuracy:    {:.1}% (mean error {:.1}%)", o.accuracy_score, o.mean_error)?;
        writeln!(
            f,
            "  Buckets:     excellent {} | good {} | fair {} | poor {}",
            o.excellent, o.good, o.fair, o.poor
        )?;
        writeln!(f, "  Best:        {}", self.best_strategy.as_deref().unwrap_or("-"))?;
        writeln!(f)?;
        writeln!(f, "  {:<32} {:>9} {:>7} {:>4}  TREND", "STRATEGY", "ACCURACY", "SAMPLES", "GEN")?;
        for s in &self.strategies {
            writeln!(
                f,
                "  {:<32} {:>8.1}% {:>7} {:>4}  {}",
                s.strategy_name, s.accuracy_score, s.total_predictions, s.generation, s.trend
            )?;
        }
        Ok(())
    }
}

/// Composes evaluator output into reports.
#[derive(Debug, Clone)]
pub struct ReportGenerator {
    evaluator: PerformanceEvaluator,
    trend_window: usize,
}

impl ReportGenerator {
    /// Create a generator with the default trend window.
    pub fn new() -> Self {
        Self {
            evaluator: PerformanceEvaluator::new(),
            trend_window: DEFAULT_TREND_WINDOW,
        }
    }

    /// Set the trend window.
    pub fn with_trend_window(mut self, window: usize) -> Self {
        self.trend_window = window;
        self
    }

    /// Summarize `strategies`.
    pub fn generate(&self, strategies: &BTreeMap<String, SchedulingStrategy>) -> OptimizationReport {
        let entries = strategies
            .values()
            .map(|s| {
                let snapshot = self.evaluator.evaluate(s);
                StrategyReport {
                    strategy_name: s.name.clone(),
                    accuracy_score: snapshot.accuracy_score,
                    trend: self.evaluator.detect_trend(s, self.trend_window),
                    total_predictions: snapshot.total_predictions,
                    generation: s.generation,
                }
            })
            .collect();

        OptimizationReport {
            overall: self.evaluator.overall_accuracy(strategies.values()),
            strategies: entries,
            best_strategy: self
                .evaluator
                .best(strategies.values())
                .map(|(s, _)| s.name.clone()),
        }
    }
}

impl Default for ReportGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use metasched_core::{ParameterSpec, PredictionRecord};

    fn strategy(name: &str, errors: &[f64]) -> SchedulingStrategy {
        let mut s = SchedulingStrategy::new(name, &ParameterSpec::default(), Utc::now());
        for e in errors {
            s.push_prediction(PredictionRecord {
                task_name: "job".to_string(),
                predicted_value: 100.0 + e * 100.0,
                actual_value: 100.0,
                success: true,
                timestamp: Utc::now(),
            });
            s.push_performance(1.0 - e);
        }
        s
    }

    #[test]
    fn test_empty_store_is_an_empty_report() {
        let report = ReportGenerator::new().generate(&BTreeMap::new());
        assert!(report.is_empty());
        assert!(report.strategies.is_empty());
        assert!(report.best_strategy.is_none());
        assert!(report.to_string().contains("No strategies yet"));
    }

    #[test]
    fn test_report_lists_every_strategy_and_best() {
        let mut all = BTreeMap::new();
        for s in [strategy("good", &[0.05, 0.05]), strategy("bad", &[0.6]), strategy("new", &[])] {
            all.insert(s.name.clone(), s);
        }

        let report = ReportGenerator::new().generate(&all);
        assert_eq!(report.strategies.len(), 3);
        assert_eq!(report.best_strategy.as_deref(), Some("good"));
        assert_eq!(report.overall.total_predictions, 3);
        assert_eq!(report.strategies[0].strategy_name, "bad");
        assert!(report.to_string().contains("good"));
    }

    #[test]
    fn test_report_is_idempotent() {
        let mut all = BTreeMap::new();
        let s = strategy("a", &[0.1, 0.2, 0.3, 0.0]);
        all.insert(s.name.clone(), s);

        let generator = ReportGenerator::new().with_trend_window(2);
        let first = generator.generate(&all);
        let second = generator.generate(&all);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }
}
