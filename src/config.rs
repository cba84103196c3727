//! Training configuration with layered loading
//!
//! Configuration is loaded from multiple sources (lowest to highest priority):
//! 1. Compiled defaults
//! 2. `morphogen.ron` file (if exists), or the file given on the command line
//! 3. Environment variables prefixed with `MORPHOGEN_`
//!
//! Example environment variable: `MORPHOGEN_EVOLUTION__POPULATION_SIZE=50`

use std::path::Path;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use morphogen_creature::EvolutionConfig;
use serde::{Deserialize, Serialize};

/// Everything a headless training run needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSettings {
    /// Generations to evaluate
    pub generations: usize,
    /// Seed of the evolution loop; mutation streams derive from it
    pub seed: u64,
    /// Directory for lineage and snapshot output
    pub output_dir: String,

    #[serde(default)]
    pub evaluation: EvaluationConfig,

    #[serde(default)]
    pub evolution: EvolutionConfig,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            generations: 50,
            seed: 42,
            output_dir: "training_output".to_string(),
            evaluation: EvaluationConfig::default(),
            evolution: EvolutionConfig::default(),
        }
    }
}

/// How long and how finely each member is simulated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Logical ticks per trial
    pub ticks: usize,
    /// Seconds per tick
    pub dt: f64,
    /// Neuron sub-steps per tick
    pub sub_steps: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            ticks: 600,
            dt: 1.0 / 60.0,
            sub_steps: 4,
        }
    }
}

impl TrainingSettings {
    /// Load configuration with layered priority:
    /// 1. Compiled defaults (lowest priority)
    /// 2. `morphogen.ron` file (if exists)
    /// 3. Environment variables prefixed with `MORPHOGEN_` (highest priority)
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Same layering, with an explicit file that must exist in place of the
    /// optional `morphogen.ron`
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let defaults = Self::default();
        let file = match path {
            Some(path) => File::from(path).format(config::FileFormat::Ron).required(true),
            None => File::with_name("morphogen").format(config::FileFormat::Ron).required(false),
        };

        let builder = Config::builder()
            // Layer 1: Compiled defaults
            .set_default("generations", defaults.generations as u64)?
            .set_default("seed", defaults.seed)?
            .set_default("output_dir", defaults.output_dir)?
            .set_default("evaluation.ticks", defaults.evaluation.ticks as u64)?
            .set_default("evaluation.dt", defaults.evaluation.dt)?
            .set_default("evaluation.sub_steps", defaults.evaluation.sub_steps as u64)?
            .set_default("evolution.population_size", defaults.evolution.population_size as u64)?
            .set_default("evolution.mutation_retries", defaults.evolution.mutation_retries as u64)?
            // Layer 2: Config file
            .add_source(file)
            // Layer 3: Environment variables (MORPHOGEN_EVALUATION__TICKS, etc.)
            .add_source(
                Environment::with_prefix("MORPHOGEN")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build().context("Failed to build configuration")?;

        let settings: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the training loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.evolution.population_size == 0 {
            bail!("population size must be at least 1");
        }
        if !(self.evaluation.dt.is_finite() && self.evaluation.dt > 0.0) {
            bail!("evaluation dt must be positive, got {}", self.evaluation.dt);
        }
        let mutation = &self.evolution.mutation;
        if mutation.max_inputs == 0 {
            bail!("mutation max_inputs must be at least 1");
        }
        if !(0.0..=1.0).contains(&mutation.value_coherence) {
            bail!("mutation value_coherence must lie in [0, 1], got {}", mutation.value_coherence);
        }
        Ok(())
    }
}
