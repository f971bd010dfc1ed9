//! metasched CLI - meta-learning schedule optimizer.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use metasched_core::{Direction, ExecutionFeedback, ParameterSeed};
use metasched_evolution::{EngineConfig, EvolutionConfig, Optimizer};
use metasched_storage::JsonStrategyStore;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "metasched")]
#[command(about = "Learns better timing and retry parameters for recurring tasks", long_about = None)]
struct Cli {
    /// Strategy store document
    #[arg(long, env = "METASCHED_STORE", default_value = ".metasched/strategies.json", global = true)]
    store: PathBuf,

    /// How long to wait for another process holding the store
    #[arg(long, default_value = "5000", global = true)]
    lock_timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fold one execution outcome into its strategy
    RecordFeedback(FeedbackArgs),
    /// Fold a batch of outcomes into one strategy
    Adapt {
        /// Strategy to adapt
        strategy: String,
        /// JSON array or JSON lines; `-` reads stdin
        #[arg(long, default_value = "-")]
        file: String,
    },
    /// Run one evolution cycle
    Evolve {
        /// Seed for reproducible mutations
        #[arg(long)]
        seed: Option<u64>,
        /// Strategies selected for mutation
        #[arg(long, default_value = "3")]
        top_k: usize,
        /// Children per selected strategy
        #[arg(long, default_value = "2")]
        mutations: usize,
        /// Override the stored mutation rate
        #[arg(long)]
        mutation_rate: Option<f64>,
        /// Accuracy fraction below which mature strategies are pruned
        #[arg(long, default_value = "0.3")]
        min_performance: f64,
        /// Samples before a strategy is ranked or pruned
        #[arg(long, default_value = "10")]
        min_samples: usize,
    },
    /// Recommend parameters for a task
    Optimize {
        /// Task name
        task: String,
        /// Nominal parameter as name=value (repeatable)
        #[arg(long = "param", value_parser = parse_nominal, required = true)]
        params: Vec<(String, f64)>,
        /// Strategy to use; the most accurate one when omitted
        #[arg(long)]
        strategy: Option<String>,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
    /// Summarize every strategy
    Report {
        /// Print JSON
        #[arg(long)]
        json: bool,
        /// Trend window
        #[arg(long, default_value = "10")]
        window: usize,
    },
    /// Show one strategy as JSON
    Show {
        /// Strategy name
        strategy: String,
    },
    /// Show or update global learning defaults
    Config(ConfigArgs),
}

#[derive(Args)]
struct FeedbackArgs {
    /// Whole record as JSON; other flags are ignored when set
    #[arg(long)]
    json: Option<String>,
    /// Task that ran
    #[arg(long)]
    task: Option<String>,
    /// Strategy whose prediction was used
    #[arg(long)]
    strategy: Option<String>,
    /// Predicted value
    #[arg(long, allow_negative_numbers = true)]
    predicted: Option<f64>,
    /// Observed value
    #[arg(long, allow_negative_numbers = true)]
    actual: Option<f64>,
    /// Whether the run succeeded
    #[arg(long)]
    success: Option<bool>,
    /// ISO-8601 timestamp; now when omitted
    #[arg(long)]
    timestamp: Option<String>,
    /// Restrict the update to one parameter
    #[arg(long)]
    parameter: Option<String>,
}

#[derive(Args)]
struct ConfigArgs {
    /// Global learning rate
    #[arg(long)]
    learning_rate: Option<f64>,
    /// Momentum factor in [0, 1)
    #[arg(long)]
    momentum_factor: Option<f64>,
    /// Mutation rate for evolution
    #[arg(long)]
    mutation_rate: Option<f64>,
    /// Reliability target in [0, 1]
    #[arg(long)]
    target_success_rate: Option<f64>,
    /// Default parameter as name=value[:increase|decrease] (repeatable)
    #[arg(long = "default-param", value_parser = parse_seed)]
    default_params: Vec<(String, ParameterSeed)>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let store = JsonStrategyStore::new(&cli.store)
        .await
        .with_context(|| format!("opening store {}", cli.store.display()))?
        .with_lock_timeout(Duration::from_millis(cli.lock_timeout_ms));

    match cli.command {
        Commands::RecordFeedback(args) => {
            let feedback = match &args.json {
                Some(json) => ExecutionFeedback::from_json(json)?,
                None => ExecutionFeedback::from_value(&args.to_value())?,
            };
            let optimizer = Optimizer::new(store);
            let receipt = optimizer.record_feedback(feedback).await?;
            if receipt.created {
                println!("Created strategy: {}", receipt.strategy_name);
            }
            for outcome in &receipt.outcomes {
                println!(
                    "Recorded feedback for {}: score {:.3}, accuracy {:.1}%",
                    outcome.strategy_name, outcome.performance_score, outcome.accuracy_score
                );
            }
        }
        Commands::Adapt { strategy, file } => {
            let batch = read_batch(&file)?;
            if batch.is_empty() {
                println!("No feedback records to apply");
                return Ok(());
            }
            let optimizer = Optimizer::new(store);
            let receipt = optimizer.adapt(&strategy, batch).await?;
            let last = receipt.outcomes.last().map(|o| o.accuracy_score).unwrap_or(0.0);
            println!(
                "Adapted {} with {} records (accuracy {:.1}%)",
                receipt.strategy_name,
                receipt.outcomes.len(),
                last
            );
        }
        Commands::Evolve { seed, top_k, mutations, mutation_rate, min_performance, min_samples } => {
            let mut evolution = EvolutionConfig::default()
                .with_top_k(top_k)
                .with_mutations_per_strategy(mutations)
                .with_min_performance(min_performance)
                .with_min_samples(min_samples);
            if let Some(rate) = mutation_rate {
                evolution = evolution.with_mutation_rate(rate);
            }
            let optimizer = Optimizer::new(store).with_config(EngineConfig {
                evolution,
                stored_mutation_rate: mutation_rate.is_none(),
                seed,
                ..Default::default()
            });

            let outcome = optimizer.evolve().await?;
            if outcome.ranked.is_empty() {
                println!("No strategies have enough feedback to evolve yet");
            }
            for name in &outcome.created {
                println!("  + {}", name);
            }
            for name in &outcome.pruned {
                println!("  - {}", name);
            }
            info!("Evolution created {} and pruned {}", outcome.created.len(), outcome.pruned.len());
        }
        Commands::Optimize { task, params, strategy, json } => {
            let nominal: BTreeMap<String, f64> = params.into_iter().collect();
            let optimizer = Optimizer::new(store);
            let rec = optimizer.optimize(&task, &nominal, strategy.as_deref()).await?;

            if json {
                print_json(&rec)?;
            } else {
                println!("Recommendation for {} (strategy {})", rec.task_name, rec.strategy_name);
                println!("  Confidence: {:.1}", rec.confidence_score);
                for (name, value) in &rec.optimized_parameters {
                    println!("  {}: {:.3} (nominal {})", name, value, nominal[name]);
                }
            }
        }
        Commands::Report { json, window } => {
            let optimizer = Optimizer::new(store).with_config(EngineConfig {
                trend_window: window,
                ..Default::default()
            });
            let report = optimizer.report().await?;
            if json {
                print_json(&report)?;
            } else {
                print!("{}", report);
            }
        }
        Commands::Show { strategy } => {
            let optimizer = Optimizer::new(store);
            let Some(found) = optimizer.strategy(&strategy).await? else {
                println!("Strategy not found: {}", strategy);
                return Ok(());
            };
            print_json(&found)?;
        }
        Commands::Config(args) => {
            let optimizer = Optimizer::new(store);
            let config = if args.is_empty() {
                optimizer.settings().await?
            } else {
                optimizer.update_settings(|c| args.apply(c)).await?
            };
            print_json(&config)?;
        }
    }

    Ok(())
}

impl FeedbackArgs {
    /// Assemble the flags into the same JSON shape the runner would send.
    fn to_value(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        let mut put = |key: &str, value: Option<serde_json::Value>| {
            if let Some(value) = value {
                obj.insert(key.to_string(), value);
            }
        };
        put("task_name", self.task.clone().map(Into::into));
        put("strategy_name", self.strategy.clone().map(Into::into));
        put("predicted_value", self.predicted.map(Into::into));
        put("actual_value", self.actual.map(Into::into));
        put("success", self.success.map(Into::into));
        put("timestamp", self.timestamp.clone().map(Into::into));
        put("parameter", self.parameter.clone().map(Into::into));
        serde_json::Value::Object(obj)
    }
}

impl ConfigArgs {
    fn is_empty(&self) -> bool {
        self.learning_rate.is_none()
            && self.momentum_factor.is_none()
            && self.mutation_rate.is_none()
            && self.target_success_rate.is_none()
            && self.default_params.is_empty()
    }

    fn apply(&self, config: &mut metasched_core::OptimizerConfig) {
        if let Some(v) = self.learning_rate {
            config.learning_rate = v;
        }
        if let Some(v) = self.momentum_factor {
            config.momentum_factor = v;
        }
        if let Some(v) = self.mutation_rate {
            config.mutation_rate = v;
        }
        if let Some(v) = self.target_success_rate {
            config.target_success_rate = v;
        }
        for (name, seed) in &self.default_params {
            config.default_parameters.0.insert(name.clone(), *seed);
        }
    }
}

fn parse_nominal(s: &str) -> Result<(String, f64), String> {
    let (name, value) = s.split_once('=').ok_or_else(|| format!("expected name=value, got `{s}`"))?;
    let value: f64 = value.trim().parse().map_err(|e| format!("bad value for `{name}`: {e}"))?;
    if name.trim().is_empty() {
        return Err("parameter name must not be empty".to_string());
    }
    Ok((name.trim().to_string(), value))
}

fn parse_seed(s: &str) -> Result<(String, ParameterSeed), String> {
    let (assignment, direction) = match s.rsplit_once(':') {
        Some((a, d)) => (a, d.parse::<Direction>()?),
        None => (s, Direction::Increase),
    };
    let (name, value) = parse_nominal(assignment)?;
    Ok((name, ParameterSeed::new(value).with_direction(direction)))
}

/// Read a feedback batch from `file`, or stdin for `-`.
///
/// Blank input from either source is an empty batch.
fn read_batch(file: &str) -> Result<Vec<ExecutionFeedback>> {
    let input = if file == "-" {
        let mut input = String::new();
        std::io::stdin().read_to_string(&mut input).context("reading stdin")?;
        input
    } else {
        std::fs::read_to_string(file).with_context(|| format!("reading {}", file))?
    };
    Ok(ExecutionFeedback::parse_batch(&input)?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
