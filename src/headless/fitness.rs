//! Fitness functions for evaluating creature trials
//!
//! Scores are kept non-negative so the evolution loop's coherence mapping
//! always has a meaningful maximum.

use super::simple_physics::Trial;

/// Trait for fitness evaluation functions
pub trait FitnessFunction: Send + Sync {
    /// Score one finished trial
    fn evaluate(&self, trial: &Trial) -> f64;

    /// Get the name of this fitness function
    fn name(&self) -> &str;

    /// Get a description of what this fitness measures
    fn description(&self) -> &str;
}

/// Rewards forward distance, with a small charge for torque spent
pub struct DisplacementFitness {
    /// Points per unit of distance
    pub displacement_weight: f64,
    /// Points lost per unit of integrated torque
    pub effort_penalty: f64,
}

impl DisplacementFitness {
    pub fn new() -> Self {
        Self {
            displacement_weight: 10.0,
            effort_penalty: 0.01,
        }
    }
}

impl Default for DisplacementFitness {
    fn default() -> Self {
        Self::new()
    }
}

impl FitnessFunction for DisplacementFitness {
    fn evaluate(&self, trial: &Trial) -> f64 {
        let score = trial.distance * self.displacement_weight - trial.effort * self.effort_penalty;
        if score.is_finite() {
            score.max(0.0)
        } else {
            0.0
        }
    }

    fn name(&self) -> &str {
        "Displacement"
    }

    fn description(&self) -> &str {
        "Forward distance covered, minus a small effort charge"
    }
}
