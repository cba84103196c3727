//! # Morphogen - headless creature evolution
//!
//! Drives the `morphogen-creature` library: loads training settings, builds
//! a base body plan, evaluates every generation against a planar stand-in
//! physics layer and writes lineage reports.

pub mod config;
pub mod headless;

pub use config::{EvaluationConfig, TrainingSettings};
pub use headless::{RunOutcome, TrainingEnv};
