//! Learned parameter model - one per tunable numeric field of a task.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Smallest value any activated parameter may take.
pub const ACTIVATION_FLOOR: f64 = 0.1;

/// Maximum number of entries kept in any learning or performance history.
pub const HISTORY_CAP: usize = 200;

/// Sign applied to the reliability error when computing a gradient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Increasing the parameter is expected to improve reliability (+1)
    #[default]
    Increase,
    /// Decreasing the parameter is expected to improve reliability (-1)
    Decrease,
}

impl Direction {
    /// Numeric sign of this direction.
    pub fn sign(self) -> f64 {
        match self {
            Self::Increase => 1.0,
            Self::Decrease => -1.0,
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "increase" | "+" | "+1" | "up" => Ok(Self::Increase),
            "decrease" | "-" | "-1" | "down" => Ok(Self::Decrease),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

/// Seed for one parameter of a newly created strategy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterSeed {
    /// Initial nominal value
    pub initial_value: f64,

    /// Reliability direction
    #[serde(default)]
    pub direction: Direction,
}

impl ParameterSeed {
    /// Seed with the default (`Increase`) direction.
    pub fn new(initial_value: f64) -> Self {
        Self {
            initial_value,
            direction: Direction::Increase,
        }
    }

    /// Set the direction.
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }
}

/// Mapping from parameter name to its seed.
///
/// Ordered so that strategies created from the same spec serialize identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSpec(pub BTreeMap<String, ParameterSeed>);

impl ParameterSpec {
    /// Empty spec.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Add a parameter seed.
    pub fn with(mut self, name: impl Into<String>, seed: ParameterSeed) -> Self {
        self.0.insert(name.into(), seed);
        self
    }

    /// Look up the seed for a parameter.
    pub fn get(&self, name: &str) -> Option<&ParameterSeed> {
        self.0.get(name)
    }

    /// Iterate over seeds in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParameterSeed)> {
        self.0.iter()
    }

    /// Whether the spec has no parameters.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for ParameterSpec {
    /// Timing, retry and concurrency knobs common to recurring jobs.
    fn default() -> Self {
        Self::new()
            .with("concurrency_limit", ParameterSeed::new(4.0).with_direction(Direction::Decrease))
            .with("retry_count", ParameterSeed::new(3.0))
            .with("timeout", ParameterSeed::new(300.0))
    }
}

/// One recorded update step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LearningStep {
    /// Gradient computed for the update
    pub gradient: f64,
    /// Momentum after the update
    pub momentum: f64,
}

/// Learned state for one tunable parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningParameters {
    /// Parameter identifier, unique within a strategy
    pub parameter_name: String,

    /// Last known nominal value
    pub current_value: f64,

    /// Multiplicative learned factor
    pub weight: f64,

    /// Additive learned offset
    pub bias: f64,

    /// Most recent gradient
    pub gradient: f64,

    /// Exponential moving average of gradients
    pub momentum: f64,

    /// Reliability direction used for the gradient sign
    #[serde(default)]
    pub direction: Direction,

    /// Past update steps, oldest first
    #[serde(default)]
    pub learning_history: Vec<LearningStep>,
}

impl LearningParameters {
    /// Fresh parameters with identity weight and zero bias.
    pub fn new(name: impl Into<String>, current_value: f64) -> Self {
        Self {
            parameter_name: name.into(),
            current_value,
            weight: 1.0,
            bias: 0.0,
            gradient: 0.0,
            momentum: 0.0,
            direction: Direction::Increase,
            learning_history: Vec::new(),
        }
    }

    /// Fresh parameters from a seed.
    pub fn from_seed(name: impl Into<String>, seed: &ParameterSeed) -> Self {
        let mut params = Self::new(name, seed.initial_value);
        params.direction = seed.direction;
        params
    }

    /// Apply the learned transform to a nominal value, floored at [`ACTIVATION_FLOOR`].
    pub fn activate(&self, nominal: f64) -> f64 {
        activate(nominal * self.weight + self.bias)
    }

    /// Apply the learned transform to `current_value`.
    pub fn output(&self) -> f64 {
        self.activate(self.current_value)
    }

    /// Record an update step, dropping the oldest entries beyond [`HISTORY_CAP`].
    pub fn push_step(&mut self, step: LearningStep) {
        self.learning_history.push(step);
        truncate_front(&mut self.learning_history, HISTORY_CAP);
    }

    /// Clear all learned dynamics while keeping weight and bias.
    pub fn reset_dynamics(&mut self) {
        self.gradient = 0.0;
        self.momentum = 0.0;
        self.learning_history.clear();
    }
}

/// Floor rule shared by every recommendation path.
///
/// Non-finite inputs collapse to the floor as well.
pub fn activate(raw: f64) -> f64 {
    if raw.is_finite() {
        raw.max(ACTIVATION_FLOOR)
    } else if raw == f64::INFINITY {
        f64::MAX
    } else {
        ACTIVATION_FLOOR
    }
}

/// Keep only the last `cap` entries.
pub(crate) fn truncate_front<T>(items: &mut Vec<T>, cap: usize) {
    if items.len() > cap {
        let excess = items.len() - cap;
        items.drain(..excess);
    }
}
