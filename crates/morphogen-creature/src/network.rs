//! Validated neural network specification
//!
//! An `NNSpecification` owns three disjoint vertex sets (sensors, neurons,
//! actors) and the connections local to it. Connections bridging two
//! networks are owned by the enclosing `Morphology`, which is also
//! responsible for counting them when checking neuron cardinality.

use ahash::{HashMap, HashMapExt, HashSet, HashSetExt};
use serde::{Deserialize, Serialize};

use crate::error::{StructureError, StructureResult};
use crate::neural::{Connection, NeuralKind, NeuralSpec, NeuronFunction};
use crate::types::{ConnectionId, NeuralId};

/// Role a vertex plays inside one network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sensor,
    Neuron,
    Actor,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NNSpecification {
    sensors: Vec<NeuralSpec>,
    neurons: Vec<NeuralSpec>,
    actors: Vec<NeuralSpec>,
    connections: Vec<Connection>,
}

impl NNSpecification {
    /// Build a self-contained network. Every neuron must be fed by enough
    /// local connections to satisfy its function's arity.
    pub fn new(
        sensors: Vec<NeuralSpec>,
        neurons: Vec<NeuralSpec>,
        actors: Vec<NeuralSpec>,
        connections: Vec<Connection>,
    ) -> StructureResult<Self> {
        let network = Self::open(sensors, neurons, actors, connections)?;
        network.validate_cardinality(&HashMap::new())?;
        Ok(network)
    }

    /// Build a network whose neurons may also be fed from other networks.
    /// Cardinality is left to the owning morphology, which sees every
    /// inter-network connection.
    pub fn open(
        sensors: Vec<NeuralSpec>,
        neurons: Vec<NeuralSpec>,
        actors: Vec<NeuralSpec>,
        connections: Vec<Connection>,
    ) -> StructureResult<Self> {
        let network = Self {
            sensors,
            neurons,
            actors,
            connections,
        };
        network.validate_structure()?;
        Ok(network)
    }

    pub fn empty() -> Self {
        Self {
            sensors: Vec::new(),
            neurons: Vec::new(),
            actors: Vec::new(),
            connections: Vec::new(),
        }
    }

    /// Role disjointness, role-consistent kinds, locality of every
    /// connection and the sensor-to-actor ban
    pub fn validate_structure(&self) -> StructureResult<()> {
        let mut seen: HashSet<NeuralId> = HashSet::new();
        let roles = [
            (&self.sensors, Role::Sensor),
            (&self.neurons, Role::Neuron),
            (&self.actors, Role::Actor),
        ];
        for (specs, role) in roles {
            for spec in specs {
                let consistent = matches!(
                    (role, spec.kind),
                    (Role::Sensor, NeuralKind::Sensor)
                        | (Role::Neuron, NeuralKind::Neuron(_))
                        | (Role::Actor, NeuralKind::Actor)
                );
                if !consistent || !seen.insert(spec.id) {
                    return Err(StructureError::OverlappingRoles(spec.id));
                }
            }
        }

        let mut connection_ids: HashSet<ConnectionId> = HashSet::new();
        for connection in &self.connections {
            connection.check()?;
            if !connection_ids.insert(connection.id) {
                return Err(StructureError::DuplicateConnection(connection.id));
            }
            // A connection foreign to one end is an inter-network edge and
            // must live in the morphology table instead
            if !self.contains(&connection.source) || !self.contains(&connection.destination) {
                return Err(StructureError::ForeignConnection {
                    connection: connection.id,
                });
            }
            if connection.source.is_sensor() && connection.destination.is_actor() {
                return Err(StructureError::SensorToActor {
                    sensor: connection.source.id,
                    actor: connection.destination.id,
                });
            }
        }
        Ok(())
    }

    /// Check that each neuron has at least as many inputs as its function
    /// needs. `external_inputs` counts connections arriving from other
    /// networks, keyed by destination.
    pub fn validate_cardinality(&self, external_inputs: &HashMap<NeuralId, usize>) -> StructureResult<()> {
        let mut counts: HashMap<NeuralId, usize> = HashMap::new();
        for connection in &self.connections {
            *counts.entry(connection.destination.id).or_insert(0) += 1;
        }
        for neuron in &self.neurons {
            let Some(function) = neuron.function() else {
                continue;
            };
            let actual = counts.get(&neuron.id).copied().unwrap_or(0)
                + external_inputs.get(&neuron.id).copied().unwrap_or(0);
            let required = function.min_inputs();
            if actual < required {
                return Err(StructureError::Underconnected {
                    neuron: neuron.id,
                    function,
                    required,
                    actual,
                });
            }
        }
        Ok(())
    }

    pub fn sensors(&self) -> &[NeuralSpec] {
        &self.sensors
    }

    pub fn neurons(&self) -> &[NeuralSpec] {
        &self.neurons
    }

    pub fn actors(&self) -> &[NeuralSpec] {
        &self.actors
    }

    /// Local connections (both endpoints inside this network)
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.iter().find(|c| c.id == id)
    }

    /// All vertices: sensors, then neurons, then actors
    pub fn specs(&self) -> impl Iterator<Item = &NeuralSpec> {
        self.sensors
            .iter()
            .chain(self.neurons.iter())
            .chain(self.actors.iter())
    }

    pub fn len(&self) -> usize {
        self.sensors.len() + self.neurons.len() + self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn role_of(&self, spec: &NeuralSpec) -> Option<Role> {
        if self.sensors.contains(spec) {
            Some(Role::Sensor)
        } else if self.neurons.contains(spec) {
            Some(Role::Neuron)
        } else if self.actors.contains(spec) {
            Some(Role::Actor)
        } else {
            None
        }
    }

    pub fn contains(&self, spec: &NeuralSpec) -> bool {
        self.role_of(spec).is_some()
    }

    fn require_member(&self, spec: &NeuralSpec) -> StructureResult<()> {
        if self.contains(spec) {
            Ok(())
        } else {
            Err(StructureError::NotMember(spec.id))
        }
    }

    /// Local connections terminating on `spec`
    pub fn incoming(&self, spec: &NeuralSpec) -> StructureResult<Vec<Connection>> {
        self.require_member(spec)?;
        Ok(self
            .connections
            .iter()
            .filter(|c| c.destination == *spec)
            .copied()
            .collect())
    }

    /// Local connections leaving `spec`
    pub fn outgoing(&self, spec: &NeuralSpec) -> StructureResult<Vec<Connection>> {
        self.require_member(spec)?;
        Ok(self
            .connections
            .iter()
            .filter(|c| c.source == *spec)
            .copied()
            .collect())
    }

    /// Vertices allowed to start a connection
    pub fn source_candidates(&self) -> Vec<NeuralSpec> {
        self.sensors.iter().chain(self.neurons.iter()).copied().collect()
    }

    /// Vertices allowed to end a connection
    pub fn destination_candidates(&self) -> Vec<NeuralSpec> {
        self.neurons.iter().chain(self.actors.iter()).copied().collect()
    }

    pub fn add_neuron(&mut self, function: NeuronFunction) -> NeuralSpec {
        let neuron = NeuralSpec::neuron(function);
        self.neurons.push(neuron);
        neuron
    }

    pub fn add_local_connection(
        &mut self,
        source: NeuralSpec,
        destination: NeuralSpec,
        weight: f64,
    ) -> StructureResult<ConnectionId> {
        self.require_member(&source)?;
        self.require_member(&destination)?;
        if source.is_sensor() && destination.is_actor() {
            return Err(StructureError::SensorToActor {
                sensor: source.id,
                actor: destination.id,
            });
        }
        let connection = Connection::new(source, destination, weight)?;
        self.connections.push(connection);
        Ok(connection.id)
    }

    pub fn remove_internal_connection(&mut self, id: ConnectionId) -> StructureResult<Connection> {
        let index = self
            .connections
            .iter()
            .position(|c| c.id == id)
            .ok_or(StructureError::UnknownConnection(id))?;
        Ok(self.connections.remove(index))
    }

    pub fn set_weight(&mut self, id: ConnectionId, weight: f64) -> StructureResult<()> {
        if !(0.0..=1.0).contains(&weight) {
            return Err(StructureError::InvalidWeight(weight));
        }
        let connection = self
            .connections
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(StructureError::UnknownConnection(id))?;
        connection.weight = weight;
        Ok(())
    }

    /// Point a local connection at a new source, keeping its identity
    pub fn move_connection_source(&mut self, id: ConnectionId, source: NeuralSpec) -> StructureResult<()> {
        self.require_member(&source)?;
        let slot = self
            .connections
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(StructureError::UnknownConnection(id))?;
        *slot = slot.with_source(source)?;
        Ok(())
    }

    /// Point a local connection at a new destination, keeping its identity
    pub fn move_connection_destination(
        &mut self,
        id: ConnectionId,
        destination: NeuralSpec,
    ) -> StructureResult<()> {
        self.require_member(&destination)?;
        let slot = self
            .connections
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(StructureError::UnknownConnection(id))?;
        *slot = slot.with_destination(destination)?;
        Ok(())
    }

    /// Clone through a shared identity map. Every spec of this network must
    /// already be mapped; connections get fresh identities.
    pub fn copy(&self, identity: &HashMap<NeuralId, NeuralSpec>) -> StructureResult<Self> {
        let remap = |spec: &NeuralSpec| -> StructureResult<NeuralSpec> {
            identity
                .get(&spec.id)
                .copied()
                .ok_or(StructureError::NotMember(spec.id))
        };
        let sensors = self.sensors.iter().map(remap).collect::<StructureResult<Vec<_>>>()?;
        let neurons = self.neurons.iter().map(remap).collect::<StructureResult<Vec<_>>>()?;
        let actors = self.actors.iter().map(remap).collect::<StructureResult<Vec<_>>>()?;
        let connections = self
            .connections
            .iter()
            .map(|c| Connection::new(remap(&c.source)?, remap(&c.destination)?, c.weight))
            .collect::<StructureResult<Vec<_>>>()?;
        Self::open(sensors, neurons, actors, connections)
    }
}
