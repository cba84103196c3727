//! Training environment for creature evolution
//!
//! Main training loop: every member of a generation is simulated in
//! parallel, scored, and the scores drive the next generation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use morphogen_creature::{instantiate, EngineError, EvolutionAlgorithm, ExplicitNN, Morphology};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{EvaluationConfig, TrainingSettings};

use super::fitness::{DisplacementFitness, FitnessFunction};
use super::report::BestSnapshot;
use super::simple_physics::{SimpleBuilder, Trial};

/// Statistics of one evaluated generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingStats {
    pub generation: usize,
    /// Best fitness this generation
    pub best_fitness: f64,
    /// Average fitness this generation
    pub avg_fitness: f64,
    /// Maximum distance this generation
    pub max_distance: f64,
    /// Average distance this generation
    pub avg_distance: f64,
    /// Children that fell back to an unmutated parent copy, all runs so far
    pub fallbacks: usize,
    /// Wall-clock seconds spent on this generation
    pub elapsed_secs: f64,
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// The cancel flag was raised; results up to the last full generation
    /// are kept
    Cancelled,
}

/// Single member evaluation result
#[derive(Debug, Clone, Copy)]
struct EvalResult {
    fitness: f64,
    trial: Trial,
}

/// Build the member's body, compile its controller and run it for the
/// configured number of ticks
pub fn run_trial(morphology: &Morphology, evaluation: &EvaluationConfig) -> Result<Trial, EngineError> {
    let mut builder = SimpleBuilder;
    let mut joints = instantiate(morphology, &mut builder).joints;
    let mut engine = ExplicitNN::with_sub_steps(morphology, &joints, evaluation.sub_steps)?;

    let mut trial = Trial::default();
    for _ in 0..evaluation.ticks {
        engine.tick(&mut joints, evaluation.dt)?;
        trial.step(&mut joints, evaluation.dt);
    }
    Ok(trial)
}

/// Main training environment
pub struct TrainingEnv {
    pub settings: TrainingSettings,
    algorithm: EvolutionAlgorithm,
    fitness: Box<dyn FitnessFunction>,
    /// Statistics history
    pub stats_history: Vec<TrainingStats>,
    best: Option<BestSnapshot>,
    cancel: Arc<AtomicBool>,
}

impl TrainingEnv {
    pub fn new(settings: TrainingSettings, base: Morphology) -> Self {
        let algorithm = EvolutionAlgorithm::new(settings.evolution.clone(), base, settings.seed);
        Self {
            settings,
            algorithm,
            fitness: Box::new(DisplacementFitness::new()),
            stats_history: Vec::new(),
            best: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_fitness(mut self, fitness: Box<dyn FitnessFunction>) -> Self {
        self.fitness = fitness;
        self
    }

    /// Raising this flag stops the run before the next member is evaluated
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn algorithm(&self) -> &EvolutionAlgorithm {
        &self.algorithm
    }

    /// Fittest member seen over the whole run
    pub fn best(&self) -> Option<&BestSnapshot> {
        self.best.as_ref()
    }

    fn progress_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░")
    }

    /// Run the training loop
    pub fn run(&mut self) -> Result<RunOutcome> {
        let generations = self.settings.generations;
        let total_evals = (generations * self.settings.evolution.population_size) as u64;

        let pb = ProgressBar::new(total_evals);
        pb.set_style(Self::progress_style());
        pb.println(format!(
            "Training {} generations of {} members, fitness: {} ({})",
            generations,
            self.settings.evolution.population_size,
            self.fitness.name(),
            self.fitness.description()
        ));

        self.algorithm
            .initial_population()
            .context("Failed to create generation 0")?;

        for _ in 0..generations {
            let started = Instant::now();
            let generation = self.algorithm.generation();

            let Some(results) = self.evaluate_population(&pb)? else {
                pb.abandon_with_message("cancelled");
                log::warn!("Training cancelled during generation {}", generation);
                return Ok(RunOutcome::Cancelled);
            };

            self.record_best(&results)?;
            let stats = self.summarize(generation, &results, started.elapsed().as_secs_f64());
            pb.println(format!(
                "Gen {:3}: best={:.2} avg={:.2} distance max={:.2} avg={:.2}",
                stats.generation, stats.best_fitness, stats.avg_fitness, stats.max_distance, stats.avg_distance
            ));
            pb.set_message(format!("best {:.2}", stats.best_fitness));
            self.stats_history.push(stats);

            // Always breed, so the lineage also covers the last evaluated
            // generation
            let scores: Vec<f64> = results.iter().map(|r| r.fitness).collect();
            self.algorithm
                .generate_new_population(&scores)
                .with_context(|| format!("Failed to breed generation {}", generation + 1))?;
        }

        pb.finish_with_message("done");
        Ok(RunOutcome::Completed)
    }

    /// Evaluate the current generation in parallel. `None` when the run was
    /// cancelled before every member finished.
    fn evaluate_population(&self, pb: &ProgressBar) -> Result<Option<Vec<EvalResult>>> {
        let evaluation = &self.settings.evaluation;
        let fitness = self.fitness.as_ref();
        let cancel = self.cancel.as_ref();

        let results: Vec<Option<EvalResult>> = self
            .algorithm
            .population()
            .par_iter()
            .map(|member| -> Result<Option<EvalResult>> {
                if cancel.load(Ordering::Relaxed) {
                    return Ok(None);
                }
                let trial = run_trial(member.morphology(), evaluation)
                    .with_context(|| format!("Failed to evaluate member {}", member.id()))?;
                pb.inc(1);
                Ok(Some(EvalResult {
                    fitness: fitness.evaluate(&trial),
                    trial,
                }))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(results.into_iter().collect())
    }

    fn record_best(&mut self, results: &[EvalResult]) -> Result<()> {
        let generation_best = results
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.fitness.total_cmp(&b.fitness));
        let Some((index, result)) = generation_best else {
            return Ok(());
        };
        if self.best.as_ref().is_some_and(|best| best.fitness >= result.fitness) {
            return Ok(());
        }

        let member = &self.algorithm.population()[index];
        self.best = Some(BestSnapshot::capture(member, result.fitness)?);
        log::debug!(
            "new best member {} in generation {} with fitness {:.4}",
            member.id(),
            member.generation(),
            result.fitness
        );
        Ok(())
    }

    fn summarize(&self, generation: usize, results: &[EvalResult], elapsed_secs: f64) -> TrainingStats {
        let count = results.len().max(1) as f64;
        TrainingStats {
            generation,
            best_fitness: results.iter().map(|r| r.fitness).fold(0.0, f64::max),
            avg_fitness: results.iter().map(|r| r.fitness).sum::<f64>() / count,
            max_distance: results.iter().map(|r| r.trial.distance).fold(0.0, f64::max),
            avg_distance: results.iter().map(|r| r.trial.distance).sum::<f64>() / count,
            fallbacks: self.algorithm.diagnostics().fallbacks,
            elapsed_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::scenario::walker;

    fn small_settings() -> TrainingSettings {
        let mut settings = TrainingSettings::default();
        settings.generations = 2;
        settings.seed = 7;
        settings.evaluation.ticks = 60;
        settings.evolution.population_size = 6;
        settings
    }

    #[test]
    fn test_run_trial_is_finite() {
        let trial = run_trial(&walker().unwrap(), &EvaluationConfig::default()).unwrap();
        assert!(trial.distance.is_finite());
        assert!(trial.distance >= 0.0);
        assert!(trial.duration > 0.0);
    }

    #[test]
    fn test_run_records_every_generation() {
        let mut env = TrainingEnv::new(small_settings(), walker().unwrap());
        assert_eq!(env.run().unwrap(), RunOutcome::Completed);

        assert_eq!(env.stats_history.len(), 2);
        assert_eq!(env.stats_history[1].generation, 1);
        // Both evaluated generations appear in the lineage
        assert_eq!(env.algorithm().lineage().len(), 12);
        assert!(env.best().is_some());
        assert!(env.stats_history.iter().all(|s| s.best_fitness + 1e-9 >= s.avg_fitness));
    }

    struct FlatFitness;

    impl FitnessFunction for FlatFitness {
        fn evaluate(&self, _trial: &Trial) -> f64 {
            2.5
        }

        fn name(&self) -> &str {
            "flat"
        }

        fn description(&self) -> &str {
            "Same score for every trial"
        }
    }

    #[test]
    fn test_custom_fitness_drives_scores() {
        let mut env = TrainingEnv::new(small_settings(), walker().unwrap()).with_fitness(Box::new(FlatFitness));
        env.run().unwrap();

        assert!(env.stats_history.iter().all(|s| s.best_fitness == 2.5 && s.avg_fitness == 2.5));
        assert!(env.algorithm().lineage().iter().all(|r| r.fitness == 2.5));
        assert_eq!(env.best().map(|b| b.fitness), Some(2.5));
    }

    #[test]
    fn test_cancelled_run_stops_before_evaluating() {
        let mut env = TrainingEnv::new(small_settings(), walker().unwrap());
        env.cancel_handle().store(true, Ordering::SeqCst);

        assert_eq!(env.run().unwrap(), RunOutcome::Cancelled);
        assert!(env.stats_history.is_empty());
        assert!(env.best().is_none());
    }

    #[test]
    fn test_same_seed_same_scores() {
        let mut first = TrainingEnv::new(small_settings(), walker().unwrap());
        let mut second = TrainingEnv::new(small_settings(), walker().unwrap());
        first.run().unwrap();
        second.run().unwrap();

        let scores = |env: &TrainingEnv| -> Vec<f64> { env.algorithm().lineage().iter().map(|r| r.fitness).collect() };
        assert_eq!(scores(&first), scores(&second));
    }
}
