//! Derived performance views - never persisted, recomputed on demand.

use serde::{Deserialize, Serialize};

/// Accuracy statistics over a set of predictions.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    /// Number of predictions considered
    pub total_predictions: usize,
    /// Mean relative error, as a percentage
    pub mean_error: f64,
    /// `100 - mean_error`, clamped to [0, 100]
    pub accuracy_score: f64,
    /// Predictions with error <= 10%
    pub excellent: usize,
    /// Predictions with error in (10%, 25%]
    pub good: usize,
    /// Predictions with error in (25%, 50%]
    pub fair: usize,
    /// Predictions with error > 50%
    pub poor: usize,
}

impl PerformanceSnapshot {
    /// Snapshot for a strategy that has never received feedback.
    pub fn insufficient_data() -> Self {
        Self::default()
    }

    /// Whether any predictions back this snapshot.
    pub fn has_data(&self) -> bool {
        self.total_predictions > 0
    }
}

/// Direction of recent performance relative to earlier performance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    /// Recent scores are higher
    Improving,
    /// Recent scores are lower
    Declining,
    /// No significant change, or not enough data
    Stable,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Improving => "improving",
            Self::Declining => "declining",
            Self::Stable => "stable",
        };
        f.write_str(label)
    }
}
