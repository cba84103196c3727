//! Tick-stepped execution of a morphology's neural networks
//!
//! Every neural spec of the brain and of every edge network becomes one
//! slot holding a value and an operator. A tick reads joint sensors, runs a
//! number of synchronous sub-steps over all neurons (each neuron sees the
//! values its inputs held at the start of the sub-step) and finally updates
//! the actors and writes their values to the joints.

use std::f64::consts::TAU;

use ahash::{HashMap, HashMapExt};

use crate::error::{EngineError, StructureError};
use crate::morphology::{JointType, Morphology};
use crate::neural::{FunctionClass, NeuralKind, NeuralSpec, NeuronFunction};
use crate::traits::JointHandle;
use crate::types::{NetworkRef, NeuralId};

/// Scale from actor value to joint force
pub const ACTUATOR_FORCE_FACTOR: f64 = 8.0;

/// Oscillator frequency in cycles per time unit at zero input
pub const OSCILLATOR_RATE: f64 = 1.0;

pub const DEFAULT_SUB_STEPS: usize = 4;

/// Delay of a MEMORY neuron, in sub-steps
pub const MEMORY_LENGTH: usize = 8;

const SMOOTH_KERNEL: [f64; 5] = [1.0 / 16.0, 4.0 / 16.0, 6.0 / 16.0, 4.0 / 16.0, 1.0 / 16.0];
const DIVISION_EPSILON: f64 = 1e-9;
const EXP_INPUT_CAP: f64 = 20.0;
const LOG_FLOOR: f64 = 1e-9;
const INTEGRATE_LIMIT: f64 = 10.0;

/// Step function of one slot, with any history it needs
#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    Sensor,
    Actor,
    Unary(NeuronFunction),
    Differentiate { previous: f64 },
    Integrate { total: f64 },
    Memory { buffer: [f64; MEMORY_LENGTH], head: usize },
    Smooth { window: [f64; 5] },
    Saw { phase: f64 },
    Wave { phase: f64 },
    Reduce(NeuronFunction),
    Division,
    Ternary(NeuronFunction),
}

impl Operator {
    pub fn for_kind(kind: NeuralKind) -> Self {
        match kind {
            NeuralKind::Sensor => Operator::Sensor,
            NeuralKind::Actor => Operator::Actor,
            NeuralKind::Neuron(function) => match function {
                NeuronFunction::Differentiate => Operator::Differentiate { previous: 0.0 },
                NeuronFunction::Integrate => Operator::Integrate { total: 0.0 },
                NeuronFunction::Memory => Operator::Memory {
                    buffer: [0.0; MEMORY_LENGTH],
                    head: 0,
                },
                NeuronFunction::Smooth => Operator::Smooth { window: [0.0; 5] },
                NeuronFunction::Saw => Operator::Saw { phase: 0.0 },
                NeuronFunction::Wave => Operator::Wave { phase: 0.0 },
                NeuronFunction::Division => Operator::Division,
                f => match f.class() {
                    FunctionClass::Reduce => Operator::Reduce(f),
                    FunctionClass::Ternary => Operator::Ternary(f),
                    _ => Operator::Unary(f),
                },
            },
        }
    }

    /// Advance by `dt` given the weighted inputs, returning the new value
    fn step(&mut self, weighted: &[f64], dt: f64) -> f64 {
        let sum: f64 = weighted.iter().sum();
        let arg = |i: usize| weighted.get(i).copied().unwrap_or(0.0);
        let out = match self {
            Operator::Sensor => return 0.0,
            Operator::Actor => sum.clamp(-1.0, 1.0),
            Operator::Unary(function) => unary(*function, sum),
            Operator::Differentiate { previous } => {
                let delta = sum - *previous;
                *previous = sum;
                delta
            }
            Operator::Integrate { total } => {
                *total = (*total + sum * dt).clamp(-INTEGRATE_LIMIT, INTEGRATE_LIMIT);
                *total
            }
            Operator::Memory { buffer, head } => {
                let delayed = buffer[*head];
                buffer[*head] = sum;
                *head = (*head + 1) % MEMORY_LENGTH;
                delayed
            }
            Operator::Smooth { window } => {
                window.rotate_left(1);
                window[4] = sum;
                window.iter().zip(SMOOTH_KERNEL).map(|(v, k)| v * k).sum()
            }
            Operator::Saw { phase } => {
                *phase = advance(*phase, sum, dt);
                2.0 * *phase - 1.0
            }
            Operator::Wave { phase } => {
                *phase = advance(*phase, sum, dt);
                (TAU * *phase).sin()
            }
            Operator::Reduce(function) => reduce(*function, weighted),
            Operator::Division => {
                let divisor = arg(1);
                if divisor.abs() < DIVISION_EPSILON {
                    0.0
                } else {
                    arg(0) / divisor
                }
            }
            Operator::Ternary(function) => {
                let (a, b, c) = (arg(0), arg(1), arg(2));
                match function {
                    NeuronFunction::Gte => {
                        if a >= b {
                            c
                        } else {
                            0.0
                        }
                    }
                    NeuronFunction::If => {
                        if a > 0.0 {
                            b
                        } else {
                            c
                        }
                    }
                    NeuronFunction::Interpolate => a + (b - a) * c.clamp(0.0, 1.0),
                    NeuronFunction::IfSum => {
                        if a > 0.0 {
                            b + c
                        } else {
                            0.0
                        }
                    }
                    _ => 0.0,
                }
            }
        };
        if out.is_finite() {
            out
        } else {
            0.0
        }
    }
}

fn unary(function: NeuronFunction, x: f64) -> f64 {
    match function {
        NeuronFunction::Abs => x.abs(),
        NeuronFunction::Atan => x.atan(),
        NeuronFunction::Sin => x.sin(),
        NeuronFunction::Cos => x.cos(),
        NeuronFunction::Exp => x.min(EXP_INPUT_CAP).exp(),
        NeuronFunction::Log => x.abs().max(LOG_FLOOR).ln(),
        NeuronFunction::Sigmoid => 1.0 / (1.0 + (-x).exp()),
        NeuronFunction::Sign => {
            if x > 0.0 {
                1.0
            } else if x < 0.0 {
                -1.0
            } else {
                0.0
            }
        }
        _ => x,
    }
}

/// MIN and MAX report the weighted value of the winning input
fn reduce(function: NeuronFunction, weighted: &[f64]) -> f64 {
    if weighted.is_empty() {
        return 0.0;
    }
    match function {
        NeuronFunction::Min => weighted.iter().copied().fold(f64::INFINITY, f64::min),
        NeuronFunction::Max => weighted.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        NeuronFunction::Product => weighted.iter().product(),
        _ => weighted.iter().sum(),
    }
}

fn advance(phase: f64, input: f64, dt: f64) -> f64 {
    let rate = (OSCILLATOR_RATE * (1.0 + input)).max(0.0);
    (phase + rate * dt).rem_euclid(1.0)
}

#[derive(Debug, Clone)]
struct Slot {
    spec: NeuralSpec,
    operator: Operator,
    /// (weight, source slot) in `incoming_to` order
    inputs: Vec<(f64, usize)>,
}

/// A joint-facing slot: the edge it belongs to and its degree of freedom
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Channel {
    pub edge: usize,
    pub dof: usize,
    pub value: f64,
}

#[derive(Debug, Clone, Copy)]
struct Port {
    edge: usize,
    dof: usize,
    slot: usize,
}

/// Compiled runtime network of one creature. Not shared between threads:
/// one owner drives the ticks.
#[derive(Debug, Clone)]
pub struct ExplicitNN {
    slots: Vec<Slot>,
    values: Vec<f64>,
    index: HashMap<NeuralId, usize>,
    sensors: Vec<Port>,
    actors: Vec<Port>,
    neurons: Vec<usize>,
    joint_types: Vec<JointType>,
    sub_steps: usize,
    elapsed: f64,
}

impl ExplicitNN {
    pub fn compile<J: JointHandle>(morphology: &Morphology, joints: &[J]) -> Result<Self, EngineError> {
        Self::with_sub_steps(morphology, joints, DEFAULT_SUB_STEPS)
    }

    /// Compile against joints listed in edge order
    pub fn with_sub_steps<J: JointHandle>(
        morphology: &Morphology,
        joints: &[J],
        sub_steps: usize,
    ) -> Result<Self, EngineError> {
        if joints.len() != morphology.edges().len() {
            return Err(EngineError::JointCountMismatch {
                expected: morphology.edges().len(),
                actual: joints.len(),
            });
        }
        let mut joint_types = Vec::with_capacity(joints.len());
        for (edge, (spec, joint)) in morphology.edges().iter().zip(joints).enumerate() {
            let expected = spec.joint.joint_type();
            let actual = joint.joint_type();
            if expected != actual {
                return Err(EngineError::JointTypeMismatch { edge, expected, actual });
            }
            joint_types.push(actual);
        }

        let mut slots = Vec::new();
        let mut index = HashMap::new();
        let mut sensors = Vec::new();
        let mut actors = Vec::new();
        let mut neurons = Vec::new();
        for (network_ref, network) in morphology.networks() {
            for spec in network.specs() {
                let slot = slots.len();
                index.insert(spec.id, slot);
                slots.push(Slot {
                    spec: *spec,
                    operator: Operator::for_kind(spec.kind),
                    inputs: Vec::new(),
                });
                if spec.function().is_some() {
                    neurons.push(slot);
                }
            }
            if let NetworkRef::Edge(edge) = network_ref {
                for (dof, sensor) in network.sensors().iter().enumerate() {
                    sensors.push(Port {
                        edge,
                        dof,
                        slot: index[&sensor.id],
                    });
                }
                for (dof, actor) in network.actors().iter().enumerate() {
                    actors.push(Port {
                        edge,
                        dof,
                        slot: index[&actor.id],
                    });
                }
            }
        }

        for slot in slots.iter_mut() {
            slot.inputs = morphology
                .incoming_to(&slot.spec)
                .iter()
                .map(|c| {
                    index
                        .get(&c.source.id)
                        .map(|&source| (c.weight, source))
                        .ok_or(StructureError::UnresolvedInterconnection(c.id))
                })
                .collect::<Result<_, _>>()?;
        }

        log::debug!(
            "compiled {} slots ({} sensors, {} neurons, {} actors)",
            slots.len(),
            sensors.len(),
            neurons.len(),
            actors.len()
        );
        Ok(Self {
            values: vec![0.0; slots.len()],
            slots,
            index,
            sensors,
            actors,
            neurons,
            joint_types,
            sub_steps,
            elapsed: 0.0,
        })
    }

    pub fn sub_steps(&self) -> usize {
        self.sub_steps
    }

    /// Simulated time since compile or reset
    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    fn weighted(&self, slot: usize, values: &[f64]) -> Vec<f64> {
        self.slots[slot]
            .inputs
            .iter()
            .map(|&(weight, source)| weight * values[source])
            .collect()
    }

    /// One logical tick of length `dt`
    pub fn tick<J: JointHandle>(&mut self, joints: &mut [J], dt: f64) -> Result<(), EngineError> {
        if joints.len() != self.joint_types.len() {
            return Err(EngineError::JointCountMismatch {
                expected: self.joint_types.len(),
                actual: joints.len(),
            });
        }

        for port in &self.sensors {
            let joint_type = joints[port.edge].joint_type();
            if joint_type != JointType::Hinge {
                return Err(EngineError::UnsupportedSensor {
                    edge: port.edge,
                    joint_type,
                });
            }
            self.values[port.slot] = joints[port.edge].angle(port.dof);
        }

        if self.sub_steps > 0 {
            let sub_dt = dt / self.sub_steps as f64;
            for _ in 0..self.sub_steps {
                let snapshot = self.values.clone();
                for i in 0..self.neurons.len() {
                    let slot = self.neurons[i];
                    let weighted = self.weighted(slot, &snapshot);
                    self.values[slot] = self.slots[slot].operator.step(&weighted, sub_dt);
                }
            }
        }

        for i in 0..self.actors.len() {
            let port = self.actors[i];
            let weighted = self.weighted(port.slot, &self.values);
            let value = self.slots[port.slot].operator.step(&weighted, dt);
            self.values[port.slot] = value;
            match self.joint_types[port.edge] {
                JointType::Hinge => joints[port.edge].apply_force(port.dof, value * ACTUATOR_FORCE_FACTOR),
                other => log::trace!("edge {} {:?} actuation not implemented", port.edge, other),
            }
        }

        self.elapsed += dt;
        Ok(())
    }

    /// Actor values in edge order
    pub fn actor_outputs(&self) -> Vec<Channel> {
        self.channels(&self.actors)
    }

    /// Last sensor readings in edge order
    pub fn sensor_values(&self) -> Vec<Channel> {
        self.channels(&self.sensors)
    }

    fn channels(&self, ports: &[Port]) -> Vec<Channel> {
        ports
            .iter()
            .map(|port| Channel {
                edge: port.edge,
                dof: port.dof,
                value: self.values[port.slot],
            })
            .collect()
    }

    /// Current value of any slot
    pub fn value_of(&self, spec: &NeuralSpec) -> Option<f64> {
        self.index.get(&spec.id).map(|&slot| self.values[slot])
    }

    /// Zero every value and all operator history
    pub fn reset(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.operator = Operator::for_kind(slot.spec.kind);
        }
        self.values.iter_mut().for_each(|v| *v = 0.0);
        self.elapsed = 0.0;
    }
}
