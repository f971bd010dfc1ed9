//! Recommendation model - what the optimizer hands back to a task runner.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Optimized parameter values for one task under one strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Task the recommendation is for
    pub task_name: String,

    /// Strategy that produced it
    pub strategy_name: String,

    /// Recommended value per parameter
    pub optimized_parameters: BTreeMap<String, f64>,

    /// Evidence behind the recommendation, in [0, 100]
    pub confidence_score: f64,
}

impl Recommendation {
    /// Recommended value for a parameter.
    pub fn get(&self, parameter: &str) -> Option<f64> {
        self.optimized_parameters.get(parameter).copied()
    }
}
