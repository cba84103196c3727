//! Headless training environment for creature evolution
//!
//! This module provides infrastructure for evolving creatures offline:
//! - A planar stand-in for the physics layer
//! - Fitness functions to evaluate creature trials
//! - Starting body plans
//! - The parallel training loop
//! - Lineage and snapshot reports

mod fitness;
mod report;
mod scenario;
mod simple_physics;
mod training_env;

pub use fitness::{DisplacementFitness, FitnessFunction};
pub use report::{BestSnapshot, ReportGenerator};
pub use scenario::{load_base, walker};
pub use simple_physics::{SimpleBody, SimpleBuilder, SimpleJoint, Trial};
pub use training_env::{run_trial, RunOutcome, TrainingEnv, TrainingStats};
