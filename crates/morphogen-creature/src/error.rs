//! Error types for creature construction, mutation and execution

use thiserror::Error;

use crate::morphology::JointType;
use crate::neural::NeuronFunction;
use crate::types::{ConnectionId, NetworkRef, NeuralId, NodeId};

/// Result type for structural operations
pub type StructureResult<T> = Result<T, StructureError>;

/// A graph invariant was violated. These indicate a bug in whatever built
/// the structure, never bad user input, and are always raised at
/// construction time.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StructureError {
    #[error("{0} appears in more than one role or more than once")]
    OverlappingRoles(NeuralId),

    #[error("sensor {sensor} is wired directly to actor {actor}")]
    SensorToActor { sensor: NeuralId, actor: NeuralId },

    #[error("{0} starts at an actor")]
    ActorSource(ConnectionId),

    #[error("{0} ends at a sensor")]
    SensorDestination(ConnectionId),

    #[error("{connection} leaves the network it is registered in")]
    ForeignConnection { connection: ConnectionId },

    #[error("weight {0} is outside [0, 1]")]
    InvalidWeight(f64),

    #[error("neuron {neuron} ({function:?}) needs {required} inputs but has {actual}")]
    Underconnected {
        neuron: NeuralId,
        function: NeuronFunction,
        required: usize,
        actual: usize,
    },

    #[error("{0} is not a member of this network")]
    NotMember(NeuralId),

    #[error("no connection {0} in this network")]
    UnknownConnection(ConnectionId),

    #[error("{0} is registered twice")]
    DuplicateConnection(ConnectionId),

    #[error("duplicate edge between {parent} and {child}")]
    DuplicateEdge { parent: NodeId, child: NodeId },

    #[error("{0} is not part of the body tree")]
    DetachedNode(NodeId),

    #[error("{node} has {parents} parent edges")]
    NotATree { node: NodeId, parents: usize },

    #[error("edge refers to unknown {0}")]
    UnknownNode(NodeId),

    #[error("brain network carries {sensors} sensors and {actors} actors")]
    BrainHasIo { sensors: usize, actors: usize },

    #[error("brain neural spec {0} reappears in an edge network")]
    BrainReused(NeuralId),

    #[error("{0} belongs to more than one network")]
    SharedNeuralSpec(NeuralId),

    #[error("{network} uses {count} {what} but its {joint_type:?} joint has {dof} DOF")]
    DofExceeded {
        network: NetworkRef,
        what: &'static str,
        count: usize,
        dof: usize,
        joint_type: JointType,
    },

    #[error("{0} does not resolve to exactly one pair of distinct networks")]
    UnresolvedInterconnection(ConnectionId),

    #[error("joint offset {0} is outside [-1, 1]")]
    InvalidOffset(f64),

    #[error("joint {what} {value} is not finite")]
    NonFiniteJoint { what: &'static str, value: f64 },

    #[error("joint hover {0} is negative")]
    NegativeHover(f64),
}

/// Runtime failures of the neural execution engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("morphology has {expected} edges but {actual} physical joints were supplied")]
    JointCountMismatch { expected: usize, actual: usize },

    #[error("edge {edge} expects a {expected:?} joint but the physical joint is {actual:?}")]
    JointTypeMismatch {
        edge: usize,
        expected: JointType,
        actual: JointType,
    },

    #[error("edge {edge} senses a {joint_type:?} joint; only hinge readings are implemented")]
    UnsupportedSensor { edge: usize, joint_type: JointType },

    #[error(transparent)]
    Structure(#[from] StructureError),
}

/// Failures of a single mutation pass
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MutationError {
    /// The repair stage could not find a legal input for some neuron, so the
    /// offspring cannot satisfy its cardinality invariants
    #[error("{failures} neurons could not be repaired: {source}")]
    Unrepairable {
        failures: usize,
        #[source]
        source: StructureError,
    },

    #[error(transparent)]
    Structure(#[from] StructureError),
}

/// Failures of the generational loop
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvolutionError {
    #[error("expected {expected} fitness values, got {actual}")]
    FitnessLength { expected: usize, actual: usize },

    #[error("no population yet; call initial_population first")]
    NoPopulation,

    #[error("member {member} has non-finite fitness {value}")]
    NonFiniteFitness { member: usize, value: f64 },

    #[error(transparent)]
    Structure(#[from] StructureError),
}
