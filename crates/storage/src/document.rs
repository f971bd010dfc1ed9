//! The single persisted document holding every strategy.

use std::collections::BTreeMap;

use metasched_core::{OptimizerConfig, SchedulingStrategy};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Layout version written by this build.
pub const DOCUMENT_VERSION: u32 = 1;

/// Full persisted state: version, global config and strategies.
///
/// Unrecognized top-level fields are kept in `extra` and written back
/// unchanged so older builds do not strip data added by newer ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyDocument {
    /// Layout version
    pub version: u32,

    /// Global learning defaults
    #[serde(default)]
    pub config: OptimizerConfig,

    /// Strategies, sorted by name on write
    #[serde(default)]
    pub strategies: Vec<SchedulingStrategy>,

    /// Top-level fields this build does not know about
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for StrategyDocument {
    fn default() -> Self {
        Self {
            version: DOCUMENT_VERSION,
            config: OptimizerConfig::default(),
            strategies: Vec::new(),
            extra: Map::new(),
        }
    }
}

impl StrategyDocument {
    /// Strategies keyed by name. Later duplicates replace earlier ones.
    pub fn strategy_map(&self) -> BTreeMap<String, SchedulingStrategy> {
        let mut map = BTreeMap::new();
        for strategy in &self.strategies {
            if map.insert(strategy.name.clone(), strategy.clone()).is_some() {
                warn!("Duplicate strategy `{}` in store; keeping the last record", strategy.name);
            }
        }
        map
    }

    /// Replace the strategy set, ordered by name.
    pub fn set_strategies(&mut self, strategies: &BTreeMap<String, SchedulingStrategy>) {
        self.strategies = strategies.values().cloned().collect();
    }

    /// Consume a strategy map, ordered by name.
    pub fn replace_strategies(&mut self, strategies: BTreeMap<String, SchedulingStrategy>) {
        self.strategies = strategies.into_values().collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_top_level_fields_survive() {
        let input = r#"{
            "version": 1,
            "config": {"learning_rate": 0.02},
            "strategies": [],
            "owner": {"team": "infra"},
            "notes": ["keep"]
        }"#;
        let document: StrategyDocument = serde_json::from_str(input).unwrap();
        assert_eq!(document.config.learning_rate, 0.02);
        assert_eq!(document.extra.len(), 2);

        let written = serde_json::to_value(&document).unwrap();
        assert_eq!(written["owner"]["team"], "infra");
        assert_eq!(written["notes"][0], "keep");
    }

    #[test]
    fn test_missing_sections_default() {
        let document: StrategyDocument = serde_json::from_str(r#"{"version": 1}"#).unwrap();
        assert!(document.strategies.is_empty());
        assert_eq!(document.config, OptimizerConfig::default());
    }
}
