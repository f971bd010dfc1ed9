//! Global learning configuration persisted alongside the strategies.

use serde::{Deserialize, Serialize};

use crate::parameter::ParameterSpec;

/// Largest accepted mutation rate; a child weight moves by at most this fraction.
pub const MAX_MUTATION_RATE: f64 = 1.0;

/// Learning-rate, momentum and mutation defaults shared by all strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Step size for weight updates, unless a strategy overrides it
    pub learning_rate: f64,

    /// Weight of the previous momentum in the moving average
    pub momentum_factor: f64,

    /// Half-width of the uniform perturbation used by evolution
    pub mutation_rate: f64,

    /// Reliability ceiling the adaptation loop aims for
    pub target_success_rate: f64,

    /// Seeds for strategies created on demand
    pub default_parameters: ParameterSpec,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            momentum_factor: 0.9,
            mutation_rate: 0.1,
            target_success_rate: 0.95,
            default_parameters: ParameterSpec::default(),
        }
    }
}

impl OptimizerConfig {
    /// Check that every knob is in its usable range.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(format!("learning_rate must be positive, got {}", self.learning_rate));
        }
        if !(0.0..1.0).contains(&self.momentum_factor) {
            return Err(format!("momentum_factor must be in [0, 1), got {}", self.momentum_factor));
        }
        if !(0.0..=MAX_MUTATION_RATE).contains(&self.mutation_rate) {
            return Err(format!(
                "mutation_rate must be in [0, {}], got {}",
                MAX_MUTATION_RATE, self.mutation_rate
            ));
        }
        if !(0.0..=1.0).contains(&self.target_success_rate) {
            return Err(format!(
                "target_success_rate must be in [0, 1], got {}",
                self.target_success_rate
            ));
        }
        Ok(())
    }
}
