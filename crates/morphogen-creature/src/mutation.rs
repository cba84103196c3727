//! Probabilistic mutation operators
//!
//! Every operator is parameterised by a coherence value in [0, 1]: 1 keeps
//! the parent value or structure, 0 explores at the configured base rate.
//! Randomness always comes from the caller so a seeded generator reproduces
//! the same offspring.

use std::marker::PhantomData;

use rand::distr::weighted::WeightedIndex;
use rand::prelude::*;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};

use crate::morphology::{Face, JointType};
use crate::neural::{FunctionClass, NeuronFunction};

/// Standard normal quantile with 0.5% mass in each tail
const BOUNDARY_Z: f64 = 2.576;

/// Attempts before `NeuronChooser` falls back to its first group
const CHOOSER_RETRIES: usize = 16;

fn probability(p: f64) -> f64 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(0.0, 1.0)
    }
}

/// Bernoulli trial with a coherence-scaled variant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub p: f64,
}

impl Decision {
    pub fn new(p: f64) -> Self {
        Self { p }
    }

    pub fn decide<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
        rng.random_bool(probability(self.p))
    }

    /// Fires with probability `p·(1 − coherence)`; never at coherence 1
    pub fn happens<R: Rng + ?Sized>(&self, coherence: f64, rng: &mut R) -> bool {
        rng.random_bool(probability(self.p * (1.0 - coherence)))
    }
}

/// Perturbation of a bounded real value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DoubleMutation {
    pub decision: Decision,
    /// Share of the narrow gaussian in the blend; the rest is uniform
    pub coherence: f64,
    pub min: f64,
    pub max: f64,
}

impl DoubleMutation {
    pub fn new(p: f64, coherence: f64, min: f64, max: f64) -> Self {
        Self {
            decision: Decision::new(p),
            coherence,
            min: min.min(max),
            max: max.max(min),
        }
    }

    /// Gaussian centred on `old`, sized so the nearer boundary sits at the
    /// 0.5% tail. A value resting on a boundary uses the farther one.
    fn normal<R: Rng + ?Sized>(&self, old: f64, rng: &mut R) -> f64 {
        let centre = old.clamp(self.min, self.max);
        let below = centre - self.min;
        let above = self.max - centre;
        let distance = match below.min(above) {
            d if d > 0.0 => d,
            _ => below.max(above),
        };
        if distance <= 0.0 {
            return centre;
        }
        Normal::new(centre, distance / BOUNDARY_Z)
            .map(|normal| normal.sample(rng))
            .unwrap_or(centre)
            .clamp(self.min, self.max)
    }

    fn uniform<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        if self.max > self.min {
            rng.random_range(self.min..=self.max)
        } else {
            self.min
        }
    }

    /// Blend of a gaussian around `old` and a uniform draw over the range
    pub fn raw_val<R: Rng + ?Sized>(&self, old: f64, rng: &mut R) -> f64 {
        let coherence = probability(self.coherence);
        let blended = coherence * self.normal(old, rng) + (1.0 - coherence) * self.uniform(rng);
        blended.clamp(self.min, self.max)
    }

    /// `c·old + (1 − c)·raw`; returns `old` exactly at coherence 1
    pub fn new_val<R: Rng + ?Sized>(&self, old: f64, coherence: f64, rng: &mut R) -> f64 {
        let coherence = probability(coherence);
        if coherence >= 1.0 {
            return old;
        }
        coherence * old + (1.0 - coherence) * self.raw_val(old, rng)
    }

    /// Gate on `happens(coherence)`, then blend with the same coherence.
    /// Coherence therefore counts twice: once in the trigger rate and once in
    /// the blend.
    pub fn possibly_change_val<R: Rng + ?Sized>(&self, old: f64, coherence: f64, rng: &mut R) -> f64 {
        if self.decision.happens(coherence, rng) {
            self.new_val(old, coherence, rng)
        } else {
            old
        }
    }
}

/// Zero-inflated half-gaussian count in `0..=max`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntegerDecision {
    pub p_zero: f64,
    pub max: usize,
}

impl IntegerDecision {
    pub fn new(p_zero: f64, max: usize) -> Self {
        Self { p_zero, max }
    }

    pub fn decide<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        self.draw(self.p_zero, rng)
    }

    /// Zero becomes more likely as coherence rises: `1 − (1 − p)(1 − c)`
    pub fn decide_with_coherence<R: Rng + ?Sized>(&self, coherence: f64, rng: &mut R) -> usize {
        let coherence = probability(coherence);
        self.draw(1.0 - (1.0 - probability(self.p_zero)) * (1.0 - coherence), rng)
    }

    fn draw<R: Rng + ?Sized>(&self, p_zero: f64, rng: &mut R) -> usize {
        if self.max == 0 || rng.random_bool(probability(p_zero)) {
            return 0;
        }
        let sigma = (self.max - 1) as f64;
        if sigma <= 0.0 {
            return 1;
        }
        let spread = Normal::new(0.0, sigma)
            .map(|normal| normal.sample(rng))
            .unwrap_or(0.0);
        (spread.round().abs() as usize + 1).min(self.max)
    }
}

/// Categorical draw over an open partition. Index `weights.len()` is the
/// implicit "nothing happens" outcome covering the remaining mass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultipleDecision {
    pub weights: Vec<f64>,
}

impl MultipleDecision {
    pub fn new(weights: Vec<f64>) -> Self {
        Self { weights }
    }

    pub fn none(&self) -> usize {
        self.weights.len()
    }

    pub fn decide<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        self.walk(rng.random::<f64>())
    }

    /// The draw shrinks towards 0 as coherence rises, favouring the first
    /// options
    pub fn decide_with_coherence<R: Rng + ?Sized>(&self, coherence: f64, rng: &mut R) -> usize {
        self.walk(rng.random::<f64>() * (1.0 - probability(coherence)))
    }

    fn walk(&self, draw: f64) -> usize {
        let mut cumulative = 0.0;
        for (index, weight) in self.weights.iter().enumerate() {
            cumulative += weight.max(0.0);
            if draw < cumulative {
                return index;
            }
        }
        self.none()
    }
}

/// Enumerations a `NominalMutation` can walk
pub trait Nominal: Copy + PartialEq + 'static {
    fn variants() -> &'static [Self];
}

impl Nominal for Face {
    fn variants() -> &'static [Self] {
        &[Face::PosX, Face::NegX, Face::PosY, Face::NegY, Face::PosZ, Face::NegZ]
    }
}

impl Nominal for JointType {
    fn variants() -> &'static [Self] {
        &[
            JointType::Fixed,
            JointType::Hinge,
            JointType::Piston,
            JointType::Rotational,
        ]
    }
}

impl Nominal for NeuronFunction {
    fn variants() -> &'static [Self] {
        &NeuronFunction::ALL
    }
}

/// Replace an enum value by a different one, uniformly
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NominalMutation<E: Nominal> {
    pub decision: Decision,
    _variant: PhantomData<E>,
}

impl<E: Nominal> NominalMutation<E> {
    pub fn new(p: f64) -> Self {
        Self {
            decision: Decision::new(p),
            _variant: PhantomData,
        }
    }

    pub fn mutate<R: Rng + ?Sized>(&self, current: E, coherence: f64, rng: &mut R) -> E {
        if self.decision.happens(coherence, rng) {
            Self::other_than(current, rng)
        } else {
            current
        }
    }

    /// Uniform pick among every variant except `current`
    pub fn other_than<R: Rng + ?Sized>(current: E, rng: &mut R) -> E {
        let others: Vec<E> = E::variants().iter().copied().filter(|v| *v != current).collect();
        others.choose(rng).copied().unwrap_or(current)
    }
}

/// Named, weighted set of neuron functions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuronGroup {
    pub name: String,
    pub weight: f64,
    pub functions: Vec<NeuronFunction>,
}

impl NeuronGroup {
    pub fn new(name: impl Into<String>, weight: f64, functions: Vec<NeuronFunction>) -> Self {
        Self {
            name: name.into(),
            weight,
            functions,
        }
    }
}

/// Picks the function of a new neuron: a weighted group first, then a
/// uniform member of it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NeuronChooser {
    groups: Vec<NeuronGroup>,
}

impl Default for NeuronChooser {
    fn default() -> Self {
        Self::new(vec![
            NeuronGroup::new("unary", 0.35, NeuronFunction::in_class(FunctionClass::Unary)),
            NeuronGroup::new("oscillator", 0.15, NeuronFunction::in_class(FunctionClass::Oscillator)),
            NeuronGroup::new("history", 0.15, NeuronFunction::in_class(FunctionClass::History)),
            NeuronGroup::new("reduce", 0.2, NeuronFunction::in_class(FunctionClass::Reduce)),
            NeuronGroup::new("binary", 0.05, NeuronFunction::in_class(FunctionClass::Binary)),
            NeuronGroup::new("ternary", 0.1, NeuronFunction::in_class(FunctionClass::Ternary)),
        ])
    }
}

impl NeuronChooser {
    /// Groups without functions or weight are dropped; the first remaining
    /// group is the bootstrap group for empty networks
    pub fn new(groups: Vec<NeuronGroup>) -> Self {
        Self {
            groups: groups
                .into_iter()
                .filter(|g| !g.functions.is_empty() && g.weight > 0.0)
                .collect(),
        }
    }

    pub fn groups(&self) -> &[NeuronGroup] {
        &self.groups
    }

    /// Choose a function whose minimum input count fits in
    /// `available_sources`. `None` only when no group is configured.
    pub fn choose<R: Rng + ?Sized>(&self, available_sources: usize, rng: &mut R) -> Option<NeuronFunction> {
        let bootstrap = self.groups.first()?;
        if available_sources == 0 {
            return bootstrap.functions.choose(rng).copied();
        }

        if let Ok(index) = WeightedIndex::new(self.groups.iter().map(|g| g.weight)) {
            for _ in 0..CHOOSER_RETRIES {
                let group = &self.groups[index.sample(rng)];
                if let Some(&function) = group.functions.choose(rng) {
                    if function.min_inputs() <= available_sources {
                        return Some(function);
                    }
                }
            }
        }

        let fitting: Vec<NeuronFunction> = bootstrap
            .functions
            .iter()
            .copied()
            .filter(|f| f.min_inputs() <= available_sources)
            .collect();
        fitting
            .choose(rng)
            .or_else(|| bootstrap.functions.choose(rng))
            .copied()
    }
}
