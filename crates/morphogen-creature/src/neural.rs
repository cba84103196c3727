//! Primitive graph elements of creature neural networks
//!
//! A network is a directed graph of sensors, neurons and actors joined by
//! weighted connections. Vertices are identified by handle, so copying a
//! network always goes through an explicit identity map.

use serde::{Deserialize, Serialize};

use crate::error::{StructureError, StructureResult};
use crate::types::{ConnectionId, NeuralId};

/// Operator computed by a neuron
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NeuronFunction {
    // Unary
    Abs,
    Atan,
    Sin,
    Cos,
    Exp,
    Log,
    Sigmoid,
    Sign,
    // Unary with history
    Differentiate,
    Integrate,
    Memory,
    Smooth,
    // Time driven
    Saw,
    Wave,
    // Commutative reductions
    Min,
    Max,
    Sum,
    Product,
    // Binary
    Division,
    // Ternary
    Gte,
    If,
    Interpolate,
    IfSum,
}

/// Coarse grouping of neuron functions by arity and statefulness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionClass {
    Unary,
    History,
    Oscillator,
    Reduce,
    Binary,
    Ternary,
}

impl NeuronFunction {
    pub const ALL: [NeuronFunction; 23] = [
        NeuronFunction::Abs,
        NeuronFunction::Atan,
        NeuronFunction::Sin,
        NeuronFunction::Cos,
        NeuronFunction::Exp,
        NeuronFunction::Log,
        NeuronFunction::Sigmoid,
        NeuronFunction::Sign,
        NeuronFunction::Differentiate,
        NeuronFunction::Integrate,
        NeuronFunction::Memory,
        NeuronFunction::Smooth,
        NeuronFunction::Saw,
        NeuronFunction::Wave,
        NeuronFunction::Min,
        NeuronFunction::Max,
        NeuronFunction::Sum,
        NeuronFunction::Product,
        NeuronFunction::Division,
        NeuronFunction::Gte,
        NeuronFunction::If,
        NeuronFunction::Interpolate,
        NeuronFunction::IfSum,
    ];

    pub fn class(&self) -> FunctionClass {
        use NeuronFunction::*;
        match self {
            Abs | Atan | Sin | Cos | Exp | Log | Sigmoid | Sign => FunctionClass::Unary,
            Differentiate | Integrate | Memory | Smooth => FunctionClass::History,
            Saw | Wave => FunctionClass::Oscillator,
            Min | Max | Sum | Product => FunctionClass::Reduce,
            Division => FunctionClass::Binary,
            Gte | If | Interpolate | IfSum => FunctionClass::Ternary,
        }
    }

    /// Minimum number of connections that must terminate on a neuron
    /// computing this function
    pub fn min_inputs(&self) -> usize {
        match self.class() {
            FunctionClass::Unary | FunctionClass::History | FunctionClass::Oscillator => 1,
            FunctionClass::Reduce | FunctionClass::Binary => 2,
            FunctionClass::Ternary => 3,
        }
    }

    /// Maximum number of inputs the operator reads, `None` when every input
    /// contributes (weighted sums and reductions)
    pub fn max_inputs(&self) -> Option<usize> {
        match self.class() {
            FunctionClass::Binary => Some(2),
            FunctionClass::Ternary => Some(3),
            _ => None,
        }
    }

    /// Functions belonging to one class, in declaration order
    pub fn in_class(class: FunctionClass) -> Vec<NeuronFunction> {
        Self::ALL
            .iter()
            .copied()
            .filter(|function| function.class() == class)
            .collect()
    }
}

/// Role of a vertex in a network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NeuralKind {
    Sensor,
    Neuron(NeuronFunction),
    Actor,
}

/// A typed network vertex. Equality and hashing go through the handle only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NeuralSpec {
    pub id: NeuralId,
    pub kind: NeuralKind,
}

impl PartialEq for NeuralSpec {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for NeuralSpec {}

impl std::hash::Hash for NeuralSpec {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl NeuralSpec {
    pub fn sensor() -> Self {
        Self {
            id: NeuralId::new(),
            kind: NeuralKind::Sensor,
        }
    }

    pub fn neuron(function: NeuronFunction) -> Self {
        Self {
            id: NeuralId::new(),
            kind: NeuralKind::Neuron(function),
        }
    }

    pub fn actor() -> Self {
        Self {
            id: NeuralId::new(),
            kind: NeuralKind::Actor,
        }
    }

    /// Same kind, fresh identity
    pub fn renewed(&self) -> Self {
        Self {
            id: NeuralId::new(),
            kind: self.kind,
        }
    }

    pub fn is_sensor(&self) -> bool {
        self.kind == NeuralKind::Sensor
    }

    pub fn is_actor(&self) -> bool {
        self.kind == NeuralKind::Actor
    }

    pub fn function(&self) -> Option<NeuronFunction> {
        match self.kind {
            NeuralKind::Neuron(function) => Some(function),
            _ => None,
        }
    }
}

/// Directed weighted edge between two neural specs
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub source: NeuralSpec,
    pub destination: NeuralSpec,
    pub weight: f64,
}

impl Connection {
    /// Create a connection with a fresh identity
    pub fn new(source: NeuralSpec, destination: NeuralSpec, weight: f64) -> StructureResult<Self> {
        let connection = Self {
            id: ConnectionId::new(),
            source,
            destination,
            weight,
        };
        connection.check()?;
        Ok(connection)
    }

    /// Check endpoint roles and weight range
    pub fn check(&self) -> StructureResult<()> {
        if self.source.is_actor() {
            return Err(StructureError::ActorSource(self.id));
        }
        if self.destination.is_sensor() {
            return Err(StructureError::SensorDestination(self.id));
        }
        if !(0.0..=1.0).contains(&self.weight) {
            return Err(StructureError::InvalidWeight(self.weight));
        }
        Ok(())
    }

    /// Re-home the source while keeping the connection's identity
    pub fn with_source(&self, source: NeuralSpec) -> StructureResult<Self> {
        let moved = Self { source, ..*self };
        moved.check()?;
        Ok(moved)
    }

    /// Re-home the destination while keeping the connection's identity
    pub fn with_destination(&self, destination: NeuralSpec) -> StructureResult<Self> {
        let moved = Self {
            destination,
            ..*self
        };
        moved.check()?;
        Ok(moved)
    }

    pub fn connects(&self, source: &NeuralSpec, destination: &NeuralSpec) -> bool {
        self.source == *source && self.destination == *destination
    }
}
