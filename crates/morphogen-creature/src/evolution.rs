//! Generational loop
//!
//! Fitness is measured elsewhere and handed in once per generation. The loop
//! ranks members by their blended fitness and gives fitter members more
//! children that stay closer to their parent.

use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{EvolutionError, MutationError, StructureError};
use crate::morphology::Morphology;
use crate::mutator::{MutationConfig, MutationReport, Mutator};
use crate::types::MemberId;

/// Highest coherence handed to offspring; the rest is kept for exploration
pub const COHERENCE_CAP: f64 = 0.97;

/// Per-rank shrink factor of the child count
pub const CHILD_DECAY: f64 = 0.8;

/// Weight of the parents' fitness in a member's blended fitness
pub const PARENTAL_WEIGHT: f64 = 0.75;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionConfig {
    pub population_size: usize,
    /// Fresh mutation attempts after an unrepairable pass before the child
    /// falls back to an unmutated copy of its parent
    pub mutation_retries: usize,
    pub mutation: MutationConfig,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            population_size: 30,
            mutation_retries: 3,
            mutation: MutationConfig::default(),
        }
    }
}

/// One individual of a generation
#[derive(Debug)]
pub struct PopulationMember {
    id: MemberId,
    morphology: Morphology,
    parents: Vec<MemberId>,
    generation: usize,
    coherence_to_original: f64,
    /// Mean blended fitness of the parents when this member was born
    parental_fitness: Option<f64>,
    fitness: Option<f64>,
    avg_fitness: Option<f64>,
}

impl PopulationMember {
    pub fn new(
        morphology: Morphology,
        parents: Vec<MemberId>,
        generation: usize,
        coherence_to_original: f64,
        parental_fitness: Option<f64>,
    ) -> Self {
        Self {
            id: MemberId::new(),
            morphology,
            parents,
            generation,
            coherence_to_original,
            parental_fitness,
            fitness: None,
            avg_fitness: None,
        }
    }

    pub fn id(&self) -> MemberId {
        self.id
    }

    pub fn morphology(&self) -> &Morphology {
        &self.morphology
    }

    pub fn parents(&self) -> &[MemberId] {
        &self.parents
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn coherence_to_original(&self) -> f64 {
        self.coherence_to_original
    }

    pub fn parental_fitness(&self) -> Option<f64> {
        self.parental_fitness
    }

    pub fn fitness(&self) -> Option<f64> {
        self.fitness
    }

    pub fn avg_fitness(&self) -> Option<f64> {
        self.avg_fitness
    }

    /// Record measured fitness and blend it with the parents'
    pub fn set_fitness(&mut self, fitness: f64) {
        self.fitness = Some(fitness);
        self.avg_fitness = Some(match self.parental_fitness {
            Some(parental) => PARENTAL_WEIGHT * parental + (1.0 - PARENTAL_WEIGHT) * fitness,
            None => fitness,
        });
    }
}

/// Lineage row written once a member's fitness is known
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageRecord {
    pub generation: usize,
    pub member: MemberId,
    pub parents: Vec<MemberId>,
    pub coherence: f64,
    pub fitness: f64,
    pub avg_fitness: f64,
    pub neurons: usize,
    pub connections: usize,
}

/// Mutation statistics summed over every child produced so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationDiagnostics {
    pub passes: usize,
    /// Passes rejected because repair could not restore input counts
    pub unrepairable: usize,
    /// Children that kept an unmutated copy of their parent
    pub fallbacks: usize,
    pub report: MutationReport,
}

impl std::ops::AddAssign for MutationDiagnostics {
    fn add_assign(&mut self, other: Self) {
        self.passes += other.passes;
        self.unrepairable += other.unrepairable;
        self.fallbacks += other.fallbacks;
        self.report += other.report;
    }
}

/// Children per rank: a tenth of the population for the best member, then
/// shrinking by `CHILD_DECAY`, at least one each, until the population is
/// full or parents run out
pub fn offspring_counts(population_size: usize, parents: usize) -> Vec<usize> {
    let mut counts = Vec::new();
    let mut remaining = population_size;
    let mut children = population_size as f64 / 10.0;
    for _ in 0..parents {
        if remaining == 0 {
            break;
        }
        let count = (children.ceil() as usize).max(1).min(remaining);
        counts.push(count);
        remaining -= count;
        children *= CHILD_DECAY;
    }
    counts
}

/// `COHERENCE_CAP · fitness / max`, clamped to `[0, COHERENCE_CAP]`
pub fn coherence_for(fitness: f64, max_fitness: f64) -> f64 {
    if max_fitness <= 0.0 || !max_fitness.is_finite() {
        return 0.0;
    }
    if fitness >= max_fitness {
        return COHERENCE_CAP;
    }
    (COHERENCE_CAP * fitness / max_fitness).clamp(0.0, COHERENCE_CAP)
}

/// Mutate every birth in parallel; children keep birth order
fn breed(
    mutator: &Mutator,
    retries: usize,
    parents: &[&Morphology],
    births: &[Birth],
) -> Result<(Vec<Morphology>, MutationDiagnostics), StructureError> {
    let results: Vec<Result<(Morphology, MutationDiagnostics), StructureError>> = births
        .par_iter()
        .map(|birth| spawn_child(mutator, parents[birth.parent], birth.coherence, birth.seed, retries))
        .collect();

    let mut children = Vec::with_capacity(results.len());
    let mut total = MutationDiagnostics::default();
    for result in results {
        let (morphology, diagnostics) = result?;
        total += diagnostics;
        children.push(morphology);
    }
    Ok((children, total))
}

struct Birth {
    parent: usize,
    coherence: f64,
    seed: u64,
}

/// Mutate `parent` with its own seeded stream, retrying unrepairable passes
fn spawn_child(
    mutator: &Mutator,
    parent: &Morphology,
    coherence: f64,
    seed: u64,
    retries: usize,
) -> Result<(Morphology, MutationDiagnostics), StructureError> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut diagnostics = MutationDiagnostics::default();
    for _ in 0..=retries {
        diagnostics.passes += 1;
        match mutator.mutate(parent, coherence, &mut rng) {
            Ok(outcome) => {
                diagnostics.report += outcome.report;
                return Ok((outcome.morphology, diagnostics));
            }
            Err(MutationError::Unrepairable { failures, source }) => {
                log::debug!("discarding unrepairable offspring ({} failures): {}", failures, source);
                diagnostics.unrepairable += 1;
                diagnostics.report.repair_failures += failures;
            }
            Err(MutationError::Structure(error)) => return Err(error),
        }
    }
    log::warn!("no valid mutation after {} attempts; keeping a copy of the parent", retries + 1);
    diagnostics.fallbacks += 1;
    Ok((parent.deep_copy()?, diagnostics))
}

pub struct EvolutionAlgorithm {
    config: EvolutionConfig,
    mutator: Mutator,
    base: Morphology,
    rng: Xoshiro256PlusPlus,
    population: Vec<PopulationMember>,
    generation: usize,
    lineage: Vec<LineageRecord>,
    diagnostics: MutationDiagnostics,
}

impl EvolutionAlgorithm {
    pub fn new(config: EvolutionConfig, base: Morphology, seed: u64) -> Self {
        Self {
            mutator: Mutator::new(&config.mutation),
            config,
            base,
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
            population: Vec::new(),
            generation: 0,
            lineage: Vec::new(),
            diagnostics: MutationDiagnostics::default(),
        }
    }

    pub fn config(&self) -> &EvolutionConfig {
        &self.config
    }

    pub fn base(&self) -> &Morphology {
        &self.base
    }

    pub fn population(&self) -> &[PopulationMember] {
        &self.population
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn lineage(&self) -> &[LineageRecord] {
        &self.lineage
    }

    pub fn diagnostics(&self) -> MutationDiagnostics {
        self.diagnostics
    }

    /// Member with the highest measured fitness of the current generation
    pub fn best(&self) -> Option<&PopulationMember> {
        self.population
            .iter()
            .filter(|m| m.fitness.is_some())
            .max_by(|a, b| a.fitness.unwrap_or(f64::MIN).total_cmp(&b.fitness.unwrap_or(f64::MIN)))
    }

    /// Generation 0: independent mutations of the base at coherence 0
    pub fn initial_population(&mut self) -> Result<&[PopulationMember], EvolutionError> {
        let births: Vec<Birth> = (0..self.config.population_size)
            .map(|_| Birth {
                parent: 0,
                coherence: 0.0,
                seed: self.rng.random(),
            })
            .collect();

        let (children, diagnostics) = breed(
            &self.mutator,
            self.config.mutation_retries,
            &[&self.base],
            &births,
        )?;
        self.diagnostics += diagnostics;
        self.generation = 0;
        self.population = children
            .into_iter()
            .map(|morphology| PopulationMember::new(morphology, Vec::new(), 0, 0.0, None))
            .collect();
        log::info!("generation 0: {} members", self.population.len());
        Ok(&self.population)
    }

    /// Score the current generation and replace it with the next one
    pub fn generate_new_population(&mut self, fitness: &[f64]) -> Result<&[PopulationMember], EvolutionError> {
        if self.population.is_empty() {
            return Err(EvolutionError::NoPopulation);
        }
        if fitness.len() != self.population.len() {
            return Err(EvolutionError::FitnessLength {
                expected: self.population.len(),
                actual: fitness.len(),
            });
        }
        if let Some((member, &value)) = fitness.iter().enumerate().find(|(_, f)| !f.is_finite()) {
            return Err(EvolutionError::NonFiniteFitness { member, value });
        }

        for (member, &score) in self.population.iter_mut().zip(fitness) {
            member.set_fitness(score);
            let (neurons, connections) = member
                .morphology
                .networks()
                .fold((0, member.morphology.interconnections().len()), |(n, c), (_, net)| {
                    (n + net.neurons().len(), c + net.connections().len())
                });
            self.lineage.push(LineageRecord {
                generation: self.generation,
                member: member.id,
                parents: member.parents.clone(),
                coherence: member.coherence_to_original,
                fitness: score,
                avg_fitness: member.avg_fitness.unwrap_or(score),
                neurons,
                connections,
            });
        }

        let avg = |m: &PopulationMember| m.avg_fitness.unwrap_or(f64::MIN);
        let mut ranked: Vec<usize> = (0..self.population.len()).collect();
        ranked.sort_by(|&a, &b| avg(&self.population[b]).total_cmp(&avg(&self.population[a])));
        let max_fitness = avg(&self.population[ranked[0]]);

        let counts = offspring_counts(self.config.population_size, ranked.len());
        let mut births = Vec::with_capacity(self.config.population_size);
        for (&parent, &count) in ranked.iter().zip(&counts) {
            let coherence = coherence_for(avg(&self.population[parent]), max_fitness);
            for _ in 0..count {
                births.push(Birth {
                    parent,
                    coherence,
                    seed: self.rng.random(),
                });
            }
        }

        let parents: Vec<&Morphology> = self.population.iter().map(|m| &m.morphology).collect();
        let (children, diagnostics) = breed(&self.mutator, self.config.mutation_retries, &parents, &births)?;
        self.diagnostics += diagnostics;
        let next_generation = self.generation + 1;
        let next: Vec<PopulationMember> = births
            .iter()
            .zip(children)
            .map(|(birth, morphology)| {
                let parent = &self.population[birth.parent];
                PopulationMember::new(
                    morphology,
                    vec![parent.id],
                    next_generation,
                    birth.coherence,
                    parent.avg_fitness,
                )
            })
            .collect();

        let mean = fitness.iter().sum::<f64>() / fitness.len() as f64;
        log::info!(
            "generation {}: best avg fitness {:.4}, mean fitness {:.4}, {} parents bred, {} fallbacks so far",
            self.generation,
            max_fitness,
            mean,
            counts.len(),
            self.diagnostics.fallbacks
        );

        self.population = next;
        self.generation = next_generation;
        Ok(&self.population)
    }
}
