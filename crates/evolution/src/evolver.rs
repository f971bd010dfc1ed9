//! Evolution engine - selection, mutation and pruning over strategies.

use std::collections::BTreeMap;

use metasched_core::{SchedulingStrategy, Time, MAX_MUTATION_RATE};
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info};

use crate::PerformanceEvaluator;

/// Knobs for one evolution cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct EvolutionConfig {
    /// Number of top strategies to mutate
    pub top_k: usize,
    /// Children created per selected strategy
    pub mutations_per_strategy: usize,
    /// Half-width of the uniform perturbation
    pub mutation_rate: f64,
    /// Accuracy fraction in [0, 1] below which mature strategies are pruned
    pub min_performance: f64,
    /// Samples required before a strategy is ranked or pruned
    pub min_samples: usize,
    /// No children are created once the population reaches this size
    pub max_population: usize,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            mutations_per_strategy: 2,
            mutation_rate: 0.1,
            min_performance: 0.3,
            min_samples: 10,
            max_population: 64,
        }
    }
}

impl EvolutionConfig {
    /// Set the number of strategies selected for mutation.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Set the number of children per selected strategy.
    pub fn with_mutations_per_strategy(mut self, count: usize) -> Self {
        self.mutations_per_strategy = count;
        self
    }

    /// Set the mutation rate.
    pub fn with_mutation_rate(mut self, rate: f64) -> Self {
        self.mutation_rate = rate.abs();
        self
    }

    /// Set the pruning threshold.
    pub fn with_min_performance(mut self, min_performance: f64) -> Self {
        self.min_performance = min_performance;
        self
    }

    /// Set the sample threshold.
    pub fn with_min_samples(mut self, min_samples: usize) -> Self {
        self.min_samples = min_samples;
        self
    }

    /// Set the population cap.
    pub fn with_max_population(mut self, max_population: usize) -> Self {
        self.max_population = max_population;
        self
    }

    /// Check that the knobs describe a runnable cycle.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=MAX_MUTATION_RATE).contains(&self.mutation_rate) {
            return Err(format!(
                "mutation_rate must be in [0, {}], got {}",
                MAX_MUTATION_RATE, self.mutation_rate
            ));
        }
        if !(0.0..=1.0).contains(&self.min_performance) {
            return Err(format!("min_performance must be in [0, 1], got {}", self.min_performance));
        }
        Ok(())
    }
}

/// A strategy that qualified for ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedStrategy {
    /// Strategy name
    pub name: String,
    /// Accuracy at ranking time
    pub accuracy_score: f64,
}

/// What an evolution cycle did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvolutionOutcome {
    /// Qualified strategies, best first
    pub ranked: Vec<RankedStrategy>,
    /// Names of strategies created
    pub created: Vec<String>,
    /// Names of strategies removed
    pub pruned: Vec<String>,
}

/// Creates mutated children of top performers and retires weak strategies.
#[derive(Debug, Clone, Default)]
pub struct EvolutionEngine {
    config: EvolutionConfig,
    evaluator: PerformanceEvaluator,
}

impl EvolutionEngine {
    /// Create an engine with the given configuration.
    pub fn new(config: EvolutionConfig) -> Self {
        Self {
            config,
            evaluator: PerformanceEvaluator::new(),
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &EvolutionConfig {
        &self.config
    }

    /// Run one evolution cycle over `strategies` in place.
    ///
    /// All randomness comes from `rng` and all timestamps from `now`, so the
    /// result is reproducible for a seeded generator. A mutation rate outside
    /// `[0, MAX_MUTATION_RATE]` is clamped; use [`EvolutionConfig::validate`]
    /// to reject it instead.
    pub fn evolve<R: Rng + ?Sized>(
        &self,
        strategies: &mut BTreeMap<String, SchedulingStrategy>,
        rng: &mut R,
        now: Time,
    ) -> EvolutionOutcome {
        let mut outcome = EvolutionOutcome {
            ranked: self.rank(strategies),
            ..Default::default()
        };

        let selected: Vec<String> = outcome
            .ranked
            .iter()
            .take(self.config.top_k)
            .map(|r| r.name.clone())
            .collect();

        'parents: for parent_name in &selected {
            let Some(parent) = strategies.get(parent_name).cloned() else {
                continue;
            };
            let mut index = 1;
            for _ in 0..self.config.mutations_per_strategy {
                if strategies.len() >= self.config.max_population {
                    debug!("Population cap {} reached, skipping mutations", self.config.max_population);
                    break 'parents;
                }
                while strategies.contains_key(&child_name(parent_name, index)) {
                    index += 1;
                }
                let child = self.mutate(&parent, child_name(parent_name, index), rng, now);
                debug!("Created `{}` from `{}`", child.name, parent_name);
                outcome.created.push(child.name.clone());
                strategies.insert(child.name.clone(), child);
                index += 1;
            }
        }

        outcome.pruned = self.prune(strategies);

        info!(
            "Evolution cycle: {} ranked, {} created, {} pruned",
            outcome.ranked.len(),
            outcome.created.len(),
            outcome.pruned.len()
        );
        outcome
    }

    /// Strategies with enough samples, best accuracy first, ties by name.
    pub fn rank(&self, strategies: &BTreeMap<String, SchedulingStrategy>) -> Vec<RankedStrategy> {
        let mut ranked: Vec<RankedStrategy> = strategies
            .values()
            .filter_map(|s| {
                let snapshot = self.evaluator.evaluate(s);
                (snapshot.has_data() && snapshot.total_predictions >= self.config.min_samples).then(|| {
                    RankedStrategy {
                        name: s.name.clone(),
                        accuracy_score: snapshot.accuracy_score,
                    }
                })
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.accuracy_score
                .total_cmp(&a.accuracy_score)
                .then_with(|| a.name.cmp(&b.name))
        });
        ranked
    }

    /// Remove mature strategies whose accuracy is below the threshold.
    fn prune(&self, strategies: &mut BTreeMap<String, SchedulingStrategy>) -> Vec<String> {
        let doomed: Vec<String> = strategies
            .values()
            .filter(|s| s.performance_history.len() >= self.config.min_samples)
            .filter(|s| self.evaluator.evaluate(s).accuracy_score / 100.0 < self.config.min_performance)
            .map(|s| s.name.clone())
            .collect();

        for name in &doomed {
            strategies.remove(name);
            info!("Pruned underperforming strategy `{}`", name);
        }
        doomed
    }

    fn mutate<R: Rng + ?Sized>(
        &self,
        parent: &SchedulingStrategy,
        name: String,
        rng: &mut R,
        now: Time,
    ) -> SchedulingStrategy {
        let mut child = parent.clone();
        child.name = name;
        child.parent = Some(parent.name.clone());
        child.generation = parent.generation + 1;
        child.performance_history.clear();
        child.predictions.clear();
        child.created_at = now;
        child.last_updated = now;

        let rate = self.config.mutation_rate;
        for params in child.parameters.values_mut() {
            params.reset_dynamics();
            params.weight *= 1.0 + perturbation(rng, rate);
            params.bias += perturbation(rng, rate);
        }
        child
    }
}

fn child_name(parent: &str, index: usize) -> String {
    format!("{parent}_evolved_{index}")
}

fn perturbation<R: Rng + ?Sized>(rng: &mut R, rate: f64) -> f64 {
    let rate = if rate.is_nan() { 0.0 } else { rate.min(MAX_MUTATION_RATE) };
    if rate > 0.0 {
        rng.gen_range(-rate..=rate)
    } else {
        0.0
    }
}
