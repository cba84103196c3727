//! Evolvable creatures for morphogen
//!
//! This crate implements:
//! - Body plans: a tree of segments joined by typed joints, each joint with
//!   its own small neural network, plus a shared brain network
//! - Constraint-preserving mutation of body plans and networks
//! - A generational evolution loop driven by externally measured fitness
//! - A tick-stepped engine executing the networks against physical joints

pub mod error;
pub mod evolution;
pub mod explicit_nn;
pub mod morphology;
pub mod mutation;
pub mod mutator;
pub mod network;
pub mod neural;
pub mod traits;
pub mod types;

// Re-export main types for convenience
pub use error::{EngineError, EvolutionError, MutationError, StructureError, StructureResult};
pub use evolution::{EvolutionAlgorithm, EvolutionConfig, LineageRecord, MutationDiagnostics, PopulationMember};
pub use explicit_nn::{Channel, ExplicitNN, ACTUATOR_FORCE_FACTOR, OSCILLATOR_RATE};
pub use morphology::{
    EdgeMorph, Face, JointSpecification, JointType, Morphology, MorphologyBuilder, MorphologyParts, Node,
    ShapeSpecification,
};
pub use mutator::{MutationConfig, MutationOutcome, MutationReport, Mutator};
pub use network::NNSpecification;
pub use neural::{Connection, NeuralKind, NeuralSpec, NeuronFunction};
pub use traits::{instantiate, JointHandle, PhysicsBuilder};
pub use types::{ConnectionId, MemberId, NetworkRef, NeuralId, NodeId};
