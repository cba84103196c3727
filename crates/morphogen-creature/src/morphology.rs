//! Creature body plans
//!
//! A morphology is a rooted tree of body segments. Every edge of the tree
//! carries a joint and a small neural network local to that joint; a shared
//! brain network is wired into the edge networks through inter-network
//! connections. Those connections are owned by one table on the morphology
//! so that re-homing an endpoint never has to touch two owners.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::ops::Deref;

use ahash::{HashMap, HashMapExt, HashSet, HashSetExt};
use petgraph::dot::Dot;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::error::{StructureError, StructureResult};
use crate::network::NNSpecification;
use crate::neural::{Connection, NeuralKind, NeuralSpec};
use crate::types::{ConnectionId, NetworkRef, NeuralId, NodeId};

/// Geometry of a body segment. Turning it into a physical body is the
/// physics layer's job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ShapeSpecification {
    Box { x: f64, y: f64, z: f64 },
    Sphere { radius: f64 },
}

impl ShapeSpecification {
    /// Half extents of the axis-aligned bounding box
    pub fn bounds(&self) -> [f64; 3] {
        match *self {
            ShapeSpecification::Box { x, y, z } => [x / 2.0, y / 2.0, z / 2.0],
            ShapeSpecification::Sphere { radius } => [radius; 3],
        }
    }
}

/// Body segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub shape: ShapeSpecification,
    #[serde(default)]
    pub label: Option<String>,
}

impl Node {
    pub fn new(shape: ShapeSpecification) -> Self {
        Self { shape, label: None }
    }

    pub fn labelled(shape: ShapeSpecification, label: impl Into<String>) -> Self {
        Self {
            shape,
            label: Some(label.into()),
        }
    }
}

/// Face of the parent segment a child attaches to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Face {
    PosX,
    NegX,
    PosY,
    NegY,
    PosZ,
    NegZ,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JointType {
    Fixed,
    Hinge,
    Piston,
    Rotational,
}

impl JointType {
    /// Degrees of freedom; bounds the sensor and actor count of the edge's
    /// network
    pub fn dof(&self) -> usize {
        match self {
            JointType::Fixed => 0,
            JointType::Hinge | JointType::Piston => 1,
            JointType::Rotational => 2,
        }
    }
}

/// How a child segment attaches to its parent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointSpecification {
    face: Face,
    offset_u: f64,
    offset_v: f64,
    rotation: f64,
    bending: f64,
    hover: f64,
    joint_type: JointType,
}

impl JointSpecification {
    /// Centered attachment on `face` with no rotation, bending or hover
    pub fn new(joint_type: JointType, face: Face) -> Self {
        Self {
            face,
            offset_u: 0.0,
            offset_v: 0.0,
            rotation: 0.0,
            bending: 0.0,
            hover: 0.0,
            joint_type,
        }
    }

    pub fn face(&self) -> Face {
        self.face
    }

    pub fn offsets(&self) -> (f64, f64) {
        (self.offset_u, self.offset_v)
    }

    pub fn rotation(&self) -> f64 {
        self.rotation
    }

    pub fn bending(&self) -> f64 {
        self.bending
    }

    pub fn hover(&self) -> f64 {
        self.hover
    }

    pub fn joint_type(&self) -> JointType {
        self.joint_type
    }

    pub fn dof(&self) -> usize {
        self.joint_type.dof()
    }

    /// Check the geometry a deserialized joint may carry
    pub fn check(&self) -> StructureResult<()> {
        for offset in [self.offset_u, self.offset_v] {
            if !(-1.0..=1.0).contains(&offset) {
                return Err(StructureError::InvalidOffset(offset));
            }
        }
        for (what, value) in [
            ("rotation", self.rotation),
            ("bending", self.bending),
            ("hover", self.hover),
        ] {
            if !value.is_finite() {
                return Err(StructureError::NonFiniteJoint { what, value });
            }
        }
        if self.hover < 0.0 {
            return Err(StructureError::NegativeHover(self.hover));
        }
        Ok(())
    }

    pub fn with_face(&self, face: Face) -> Self {
        Self { face, ..*self }
    }

    /// Offsets are fractions of the face's half extents
    pub fn with_offsets(&self, offset_u: f64, offset_v: f64) -> StructureResult<Self> {
        for offset in [offset_u, offset_v] {
            if !(-1.0..=1.0).contains(&offset) {
                return Err(StructureError::InvalidOffset(offset));
            }
        }
        Ok(Self {
            offset_u,
            offset_v,
            ..*self
        })
    }

    pub fn with_rotation(&self, rotation: f64) -> Self {
        Self { rotation, ..*self }
    }

    pub fn with_bending(&self, bending: f64) -> Self {
        Self { bending, ..*self }
    }

    pub fn with_hover(&self, hover: f64) -> Self {
        Self {
            hover: hover.max(0.0),
            ..*self
        }
    }
}

/// Parent-to-child attachment together with the joint's local network
#[derive(Debug, Serialize, Deserialize)]
pub struct EdgeMorph {
    pub source: NodeId,
    pub destination: NodeId,
    pub joint: JointSpecification,
    pub network: NNSpecification,
}

/// Unvalidated body plan. This is the serialized form and the scratch form
/// the mutation pass edits; `Morphology` is the validated wrapper.
#[derive(Debug, Serialize, Deserialize)]
pub struct MorphologyParts {
    pub root: NodeId,
    pub nodes: Vec<Node>,
    pub brain: NNSpecification,
    pub edges: Vec<EdgeMorph>,
    pub interconnections: Vec<Connection>,
}

impl MorphologyParts {
    pub fn network(&self, network: NetworkRef) -> Option<&NNSpecification> {
        match network {
            NetworkRef::Brain => Some(&self.brain),
            NetworkRef::Edge(index) => self.edges.get(index).map(|edge| &edge.network),
        }
    }

    pub fn network_mut(&mut self, network: NetworkRef) -> Option<&mut NNSpecification> {
        match network {
            NetworkRef::Brain => Some(&mut self.brain),
            NetworkRef::Edge(index) => self.edges.get_mut(index).map(|edge| &mut edge.network),
        }
    }

    /// Brain first, then edges in order
    pub fn network_refs(&self) -> Vec<NetworkRef> {
        std::iter::once(NetworkRef::Brain)
            .chain((0..self.edges.len()).map(NetworkRef::Edge))
            .collect()
    }

    pub fn networks(&self) -> impl Iterator<Item = (NetworkRef, &NNSpecification)> {
        std::iter::once((NetworkRef::Brain, &self.brain)).chain(
            self.edges
                .iter()
                .enumerate()
                .map(|(index, edge)| (NetworkRef::Edge(index), &edge.network)),
        )
    }

    /// Which network each spec belongs to
    pub fn membership(&self) -> HashMap<NeuralId, NetworkRef> {
        let mut membership = HashMap::new();
        for (network_ref, network) in self.networks() {
            for spec in network.specs() {
                membership.entry(spec.id).or_insert(network_ref);
            }
        }
        membership
    }

    pub fn network_of(&self, spec: &NeuralSpec) -> Option<NetworkRef> {
        self.networks()
            .find(|(_, network)| network.contains(spec))
            .map(|(network_ref, _)| network_ref)
    }

    pub fn interconnections(&self) -> &[Connection] {
        &self.interconnections
    }

    /// Every connection terminating on `spec`, local ones first, then
    /// inter-network ones in table order
    pub fn incoming_to(&self, spec: &NeuralSpec) -> Vec<Connection> {
        let mut incoming: Vec<Connection> = match self.network_of(spec) {
            Some(network_ref) => self
                .network(network_ref)
                .map(|network| {
                    network
                        .connections()
                        .iter()
                        .filter(|c| c.destination == *spec)
                        .copied()
                        .collect()
                })
                .unwrap_or_default(),
            None => Vec::new(),
        };
        incoming.extend(
            self.interconnections
                .iter()
                .filter(|c| c.destination == *spec)
                .copied(),
        );
        incoming
    }

    /// Every connection leaving `spec`, local ones first
    pub fn outgoing_from(&self, spec: &NeuralSpec) -> Vec<Connection> {
        let mut outgoing: Vec<Connection> = match self.network_of(spec) {
            Some(network_ref) => self
                .network(network_ref)
                .map(|network| {
                    network
                        .connections()
                        .iter()
                        .filter(|c| c.source == *spec)
                        .copied()
                        .collect()
                })
                .unwrap_or_default(),
            None => Vec::new(),
        };
        outgoing.extend(
            self.interconnections
                .iter()
                .filter(|c| c.source == *spec)
                .copied(),
        );
        outgoing
    }

    /// Inter-network connections arriving in `network`
    pub fn inter_incoming(&self, network: NetworkRef) -> Vec<Connection> {
        let membership = self.membership();
        self.interconnections
            .iter()
            .filter(|c| membership.get(&c.destination.id) == Some(&network))
            .copied()
            .collect()
    }

    /// Inter-network connections leaving `network`
    pub fn inter_outgoing(&self, network: NetworkRef) -> Vec<Connection> {
        let membership = self.membership();
        self.interconnections
            .iter()
            .filter(|c| membership.get(&c.source.id) == Some(&network))
            .copied()
            .collect()
    }

    /// For every inter-network connection, the (source, destination)
    /// network pair it bridges
    pub fn inter_edge_map(&self) -> StructureResult<Vec<(ConnectionId, NetworkRef, NetworkRef)>> {
        let mut owners: HashMap<NeuralId, Vec<NetworkRef>> = HashMap::new();
        for (network_ref, network) in self.networks() {
            for spec in network.specs() {
                owners.entry(spec.id).or_default().push(network_ref);
            }
        }
        let resolve = |spec: &NeuralSpec| match owners.get(&spec.id).map(Vec::as_slice) {
            Some([only]) => Some(*only),
            _ => None,
        };

        self.interconnections
            .iter()
            .map(|connection| {
                match (resolve(&connection.source), resolve(&connection.destination)) {
                    (Some(from), Some(to)) if from != to => Ok((connection.id, from, to)),
                    _ => Err(StructureError::UnresolvedInterconnection(connection.id)),
                }
            })
            .collect()
    }

    /// Networks reachable from each network through one inter-network
    /// connection in either direction. The brain neighbours everything.
    pub fn neighbor_map(&self) -> BTreeMap<NetworkRef, BTreeSet<NetworkRef>> {
        let mut neighbors: BTreeMap<NetworkRef, BTreeSet<NetworkRef>> = self
            .network_refs()
            .into_iter()
            .map(|network| (network, BTreeSet::new()))
            .collect();

        for index in 0..self.edges.len() {
            let edge = NetworkRef::Edge(index);
            neighbors.entry(NetworkRef::Brain).or_default().insert(edge);
            neighbors.entry(edge).or_default().insert(NetworkRef::Brain);
        }

        let membership = self.membership();
        for connection in &self.interconnections {
            let (Some(&from), Some(&to)) = (
                membership.get(&connection.source.id),
                membership.get(&connection.destination.id),
            ) else {
                continue;
            };
            if from != to {
                neighbors.entry(from).or_default().insert(to);
                neighbors.entry(to).or_default().insert(from);
            }
        }
        neighbors
    }

    /// Add an inter-network connection; the endpoints must live in two
    /// different networks of this morphology
    pub fn add_interconnection(
        &mut self,
        source: NeuralSpec,
        destination: NeuralSpec,
        weight: f64,
    ) -> StructureResult<ConnectionId> {
        let connection = Connection::new(source, destination, weight)?;
        self.check_interconnection(&connection)?;
        self.interconnections.push(connection);
        Ok(connection.id)
    }

    pub fn remove_interconnection(&mut self, id: ConnectionId) -> StructureResult<Connection> {
        let index = self
            .interconnections
            .iter()
            .position(|c| c.id == id)
            .ok_or(StructureError::UnknownConnection(id))?;
        Ok(self.interconnections.remove(index))
    }

    pub fn set_interconnection_weight(&mut self, id: ConnectionId, weight: f64) -> StructureResult<()> {
        if !(0.0..=1.0).contains(&weight) {
            return Err(StructureError::InvalidWeight(weight));
        }
        let slot = self
            .interconnections
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(StructureError::UnknownConnection(id))?;
        slot.weight = weight;
        Ok(())
    }

    /// Re-home the source of an inter-network connection, keeping its identity
    pub fn move_interconnection_source(&mut self, id: ConnectionId, source: NeuralSpec) -> StructureResult<()> {
        let index = self.interconnection_index(id)?;
        let moved = self.interconnections[index].with_source(source)?;
        self.check_interconnection(&moved)?;
        self.interconnections[index] = moved;
        Ok(())
    }

    /// Re-home the destination of an inter-network connection, keeping its identity
    pub fn move_interconnection_destination(
        &mut self,
        id: ConnectionId,
        destination: NeuralSpec,
    ) -> StructureResult<()> {
        let index = self.interconnection_index(id)?;
        let moved = self.interconnections[index].with_destination(destination)?;
        self.check_interconnection(&moved)?;
        self.interconnections[index] = moved;
        Ok(())
    }

    fn interconnection_index(&self, id: ConnectionId) -> StructureResult<usize> {
        self.interconnections
            .iter()
            .position(|c| c.id == id)
            .ok_or(StructureError::UnknownConnection(id))
    }

    fn check_interconnection(&self, connection: &Connection) -> StructureResult<()> {
        connection.check()?;
        let from = self.network_of(&connection.source);
        let to = self.network_of(&connection.destination);
        match (from, to) {
            (Some(from), Some(to)) if from != to => {}
            _ => return Err(StructureError::UnresolvedInterconnection(connection.id)),
        }
        if connection.source.is_sensor() && connection.destination.is_actor() {
            return Err(StructureError::SensorToActor {
                sensor: connection.source.id,
                actor: connection.destination.id,
            });
        }
        Ok(())
    }

    /// Check every invariant of a body plan
    pub fn validate(&self) -> StructureResult<()> {
        for (_, network) in self.networks() {
            network.validate_structure()?;
        }

        let brain_sensors = self.brain.sensors().len();
        let brain_actors = self.brain.actors().len();
        if brain_sensors > 0 || brain_actors > 0 {
            return Err(StructureError::BrainHasIo {
                sensors: brain_sensors,
                actors: brain_actors,
            });
        }

        self.validate_tree()?;

        for (index, edge) in self.edges.iter().enumerate() {
            edge.joint.check()?;
            let dof = edge.joint.dof();
            for (what, count) in [
                ("sensors", edge.network.sensors().len()),
                ("actors", edge.network.actors().len()),
            ] {
                if count > dof {
                    return Err(StructureError::DofExceeded {
                        network: NetworkRef::Edge(index),
                        what,
                        count,
                        dof,
                        joint_type: edge.joint.joint_type(),
                    });
                }
            }
        }

        let mut owner: HashMap<NeuralId, NetworkRef> = HashMap::new();
        for (network_ref, network) in self.networks() {
            for spec in network.specs() {
                if let Some(previous) = owner.insert(spec.id, network_ref) {
                    return Err(if previous == NetworkRef::Brain {
                        StructureError::BrainReused(spec.id)
                    } else {
                        StructureError::SharedNeuralSpec(spec.id)
                    });
                }
            }
        }

        let mut connection_ids: HashSet<ConnectionId> = HashSet::new();
        for (_, network) in self.networks() {
            for connection in network.connections() {
                if !connection_ids.insert(connection.id) {
                    return Err(StructureError::DuplicateConnection(connection.id));
                }
            }
        }
        let mut external_inputs: HashMap<NeuralId, usize> = HashMap::new();
        for connection in &self.interconnections {
            if !connection_ids.insert(connection.id) {
                return Err(StructureError::DuplicateConnection(connection.id));
            }
            connection.check()?;
            match (owner.get(&connection.source.id), owner.get(&connection.destination.id)) {
                (Some(from), Some(to)) if from != to => {}
                _ => return Err(StructureError::UnresolvedInterconnection(connection.id)),
            }
            if connection.source.is_sensor() && connection.destination.is_actor() {
                return Err(StructureError::SensorToActor {
                    sensor: connection.source.id,
                    actor: connection.destination.id,
                });
            }
            *external_inputs.entry(connection.destination.id).or_insert(0) += 1;
        }

        for (_, network) in self.networks() {
            network.validate_cardinality(&external_inputs)?;
        }
        Ok(())
    }

    fn validate_tree(&self) -> StructureResult<()> {
        let node_count = self.nodes.len();
        if self.root.0 >= node_count {
            return Err(StructureError::UnknownNode(self.root));
        }

        let mut pairs: HashSet<(NodeId, NodeId)> = HashSet::new();
        let mut parents = vec![0usize; node_count];
        let mut children: Vec<Vec<NodeId>> = vec![Vec::new(); node_count];
        for edge in &self.edges {
            for node in [edge.source, edge.destination] {
                if node.0 >= node_count {
                    return Err(StructureError::UnknownNode(node));
                }
            }
            if !pairs.insert((edge.source, edge.destination)) {
                return Err(StructureError::DuplicateEdge {
                    parent: edge.source,
                    child: edge.destination,
                });
            }
            parents[edge.destination.0] += 1;
            children[edge.source.0].push(edge.destination);
        }

        // Root has no parent, every other node exactly one
        for (index, &count) in parents.iter().enumerate() {
            let node = NodeId(index);
            if count > usize::from(node != self.root) {
                return Err(StructureError::NotATree { node, parents: count });
            }
        }

        let mut reached = vec![false; node_count];
        let mut queue = VecDeque::from([self.root]);
        reached[self.root.0] = true;
        while let Some(node) = queue.pop_front() {
            for &child in &children[node.0] {
                if !reached[child.0] {
                    reached[child.0] = true;
                    queue.push_back(child);
                }
            }
        }
        if let Some(index) = reached.iter().position(|&r| !r) {
            return Err(StructureError::DetachedNode(NodeId(index)));
        }
        Ok(())
    }

    /// Graph-description snapshot of every network and inter-network
    /// connection, in Graphviz DOT
    pub fn to_dot(&self) -> String {
        let mut graph: DiGraph<String, String> = DiGraph::new();
        let mut indices: HashMap<NeuralId, NodeIndex> = HashMap::new();
        for (network_ref, network) in self.networks() {
            for spec in network.specs() {
                let kind = match spec.kind {
                    NeuralKind::Sensor => "sensor".to_string(),
                    NeuralKind::Actor => "actor".to_string(),
                    NeuralKind::Neuron(function) => format!("{:?}", function),
                };
                let index = graph.add_node(format!("{}:{}#{}", network_ref, kind, spec.id.raw()));
                indices.insert(spec.id, index);
            }
        }
        let local = self.networks().flat_map(|(_, network)| network.connections().iter());
        for connection in local.chain(self.interconnections.iter()) {
            if let (Some(&from), Some(&to)) = (
                indices.get(&connection.source.id),
                indices.get(&connection.destination.id),
            ) {
                graph.add_edge(from, to, format!("{:.3}", connection.weight));
            }
        }
        format!("{}", Dot::new(&graph))
    }
}

/// A validated body plan. Serializes as its parts; deserializing re-runs
/// validation.
#[derive(Debug, Deserialize)]
#[serde(try_from = "MorphologyParts")]
pub struct Morphology {
    parts: MorphologyParts,
}

impl Serialize for Morphology {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.parts.serialize(serializer)
    }
}

impl Morphology {
    pub fn new(
        root: NodeId,
        nodes: Vec<Node>,
        brain: NNSpecification,
        edges: Vec<EdgeMorph>,
        interconnections: Vec<Connection>,
    ) -> StructureResult<Self> {
        Self::from_parts(MorphologyParts {
            root,
            nodes,
            brain,
            edges,
            interconnections,
        })
    }

    pub fn from_parts(parts: MorphologyParts) -> StructureResult<Self> {
        parts.validate()?;
        Ok(Self { parts })
    }

    pub fn into_parts(self) -> MorphologyParts {
        self.parts
    }

    pub fn root(&self) -> NodeId {
        self.parts.root
    }

    pub fn nodes(&self) -> &[Node] {
        &self.parts.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.parts.nodes.get(id.0)
    }

    pub fn brain(&self) -> &NNSpecification {
        &self.parts.brain
    }

    pub fn edges(&self) -> &[EdgeMorph] {
        &self.parts.edges
    }

    /// Clone with fresh identities everywhere. One identity map covering
    /// every network is built before any network is copied, so connections
    /// crossing network boundaries stay wired to the copied endpoints.
    pub fn deep_copy(&self) -> StructureResult<Self> {
        let mut identity: HashMap<NeuralId, NeuralSpec> = HashMap::new();
        for (_, network) in self.parts.networks() {
            for spec in network.specs() {
                identity.insert(spec.id, spec.renewed());
            }
        }

        let brain = self.parts.brain.copy(&identity)?;
        let edges = self
            .parts
            .edges
            .iter()
            .map(|edge| {
                Ok(EdgeMorph {
                    source: edge.source,
                    destination: edge.destination,
                    joint: edge.joint,
                    network: edge.network.copy(&identity)?,
                })
            })
            .collect::<StructureResult<Vec<_>>>()?;

        let interconnections = self
            .parts
            .interconnections
            .iter()
            .map(|c| {
                match (identity.get(&c.source.id), identity.get(&c.destination.id)) {
                    (Some(&source), Some(&destination)) => Connection::new(source, destination, c.weight),
                    _ => Err(StructureError::UnresolvedInterconnection(c.id)),
                }
            })
            .collect::<StructureResult<Vec<_>>>()?;

        Self::new(
            self.parts.root,
            self.parts.nodes.clone(),
            brain,
            edges,
            interconnections,
        )
    }
}

impl Deref for Morphology {
    type Target = MorphologyParts;

    fn deref(&self) -> &MorphologyParts {
        &self.parts
    }
}

impl TryFrom<MorphologyParts> for Morphology {
    type Error = StructureError;

    fn try_from(parts: MorphologyParts) -> StructureResult<Self> {
        Self::from_parts(parts)
    }
}

/// Incremental construction of a morphology; validation happens in `build`
pub struct MorphologyBuilder {
    parts: MorphologyParts,
}

impl MorphologyBuilder {
    pub fn new(root: Node, brain: NNSpecification) -> Self {
        Self {
            parts: MorphologyParts {
                root: NodeId(0),
                nodes: vec![root],
                brain,
                edges: Vec::new(),
                interconnections: Vec::new(),
            },
        }
    }

    pub fn root(&self) -> NodeId {
        self.parts.root
    }

    /// Attach a new segment below `parent`; returns the new segment's id
    pub fn attach(
        &mut self,
        parent: NodeId,
        child: Node,
        joint: JointSpecification,
        network: NNSpecification,
    ) -> NodeId {
        let id = NodeId(self.parts.nodes.len());
        self.parts.nodes.push(child);
        self.parts.edges.push(EdgeMorph {
            source: parent,
            destination: id,
            joint,
            network,
        });
        id
    }

    /// Register an inter-network connection
    pub fn connect(
        &mut self,
        source: NeuralSpec,
        destination: NeuralSpec,
        weight: f64,
    ) -> StructureResult<ConnectionId> {
        let connection = Connection::new(source, destination, weight)?;
        self.parts.interconnections.push(connection);
        Ok(connection.id)
    }

    pub fn build(self) -> StructureResult<Morphology> {
        Morphology::from_parts(self.parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neural::NeuronFunction;

    fn segment() -> Node {
        Node::new(ShapeSpecification::Box {
            x: 1.0,
            y: 0.5,
            z: 0.5,
        })
    }

    fn hinge() -> JointSpecification {
        JointSpecification::new(JointType::Hinge, Face::PosX)
    }

    /// Brain oscillator driving one actor per hinge, one edge sensing its
    /// angle into the brain
    fn two_limb() -> Morphology {
        let wave = NeuralSpec::neuron(NeuronFunction::Wave);
        let brain = NNSpecification::open(vec![], vec![wave], vec![], vec![]).unwrap();

        let sensor = NeuralSpec::sensor();
        let left_actor = NeuralSpec::actor();
        let left = NNSpecification::open(vec![sensor], vec![], vec![left_actor], vec![]).unwrap();
        let right_actor = NeuralSpec::actor();
        let right = NNSpecification::open(vec![], vec![], vec![right_actor], vec![]).unwrap();

        let mut builder = MorphologyBuilder::new(segment(), brain);
        let root = builder.root();
        builder.attach(root, segment(), hinge(), left);
        builder.attach(root, segment(), hinge(), right);
        builder.connect(sensor, wave, 1.0).unwrap();
        builder.connect(wave, left_actor, 0.8).unwrap();
        builder.connect(wave, right_actor, 0.8).unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_dof_by_joint_type() {
        assert_eq!(JointType::Fixed.dof(), 0);
        assert_eq!(JointType::Hinge.dof(), 1);
        assert_eq!(JointType::Piston.dof(), 1);
        assert_eq!(JointType::Rotational.dof(), 2);
    }

    #[test]
    fn test_joint_offsets_are_bounded() {
        let joint = hinge();
        assert!(joint.with_offsets(0.5, -1.0).is_ok());
        assert_eq!(
            joint.with_offsets(1.5, 0.0).unwrap_err(),
            StructureError::InvalidOffset(1.5)
        );
    }

    #[test]
    fn test_out_of_range_offset_refused_on_load() {
        let text = ron::to_string(&two_limb()).unwrap();
        let tampered = text.replacen("offset_u:0.0", "offset_u:5.0", 1);
        assert_ne!(text, tampered);

        let err = ron::from_str::<Morphology>(&tampered).unwrap_err();
        assert!(err.to_string().contains("outside [-1, 1]"));
    }

    #[test]
    fn test_joint_geometry_checked_by_validate() {
        let mut parts = two_limb().into_parts();
        parts.edges[0].joint.rotation = f64::NAN;
        assert!(matches!(
            parts.validate(),
            Err(StructureError::NonFiniteJoint { what: "rotation", .. })
        ));

        let mut parts = two_limb().into_parts();
        parts.edges[1].joint.hover = -0.5;
        assert_eq!(parts.validate().unwrap_err(), StructureError::NegativeHover(-0.5));

        let mut parts = two_limb().into_parts();
        parts.edges[1].joint.offset_v = -1.25;
        assert!(Morphology::try_from(parts).is_err());
    }

    #[test]
    fn test_shape_bounds() {
        assert_eq!(segment().shape.bounds(), [0.5, 0.25, 0.25]);
        assert_eq!(ShapeSpecification::Sphere { radius: 2.0 }.bounds(), [2.0; 3]);
    }

    #[test]
    fn test_valid_morphology() {
        let morphology = two_limb();
        assert_eq!(morphology.edges().len(), 2);
        assert_eq!(morphology.nodes().len(), 3);
        assert_eq!(morphology.interconnections().len(), 3);
    }

    #[test]
    fn test_inter_edge_map_resolves_pairs() {
        let morphology = two_limb();
        let map = morphology.inter_edge_map().unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map[0].1, NetworkRef::Edge(0));
        assert_eq!(map[0].2, NetworkRef::Brain);
        assert_eq!(map[1].1, NetworkRef::Brain);
        assert_eq!(map[2].2, NetworkRef::Edge(1));
    }

    #[test]
    fn test_neighbor_map_includes_brain() {
        let morphology = two_limb();
        let neighbors = morphology.neighbor_map();
        assert!(neighbors[&NetworkRef::Brain].contains(&NetworkRef::Edge(0)));
        assert!(neighbors[&NetworkRef::Brain].contains(&NetworkRef::Edge(1)));
        assert!(neighbors[&NetworkRef::Edge(1)].contains(&NetworkRef::Brain));
        assert!(!neighbors[&NetworkRef::Edge(0)].contains(&NetworkRef::Edge(1)));
    }

    #[test]
    fn test_inter_views() {
        let morphology = two_limb();
        assert_eq!(morphology.inter_incoming(NetworkRef::Brain).len(), 1);
        assert_eq!(morphology.inter_outgoing(NetworkRef::Brain).len(), 2);
        assert_eq!(morphology.inter_incoming(NetworkRef::Edge(1)).len(), 1);
        let wave = morphology.brain().neurons()[0];
        assert_eq!(morphology.incoming_to(&wave).len(), 1);
        assert_eq!(morphology.outgoing_from(&wave).len(), 2);
    }

    #[test]
    fn test_duplicate_edge_rejected() {
        let morphology = two_limb();
        let mut parts = morphology.into_parts();
        parts.edges[1].destination = NodeId(1);
        let result = Morphology::from_parts(parts);
        assert!(matches!(result, Err(StructureError::DuplicateEdge { .. })));
    }

    #[test]
    fn test_detached_node_rejected() {
        let mut parts = two_limb().into_parts();
        parts.nodes.push(segment());
        assert_eq!(
            Morphology::from_parts(parts).unwrap_err(),
            StructureError::DetachedNode(NodeId(3))
        );
    }

    #[test]
    fn test_brain_with_sensor_rejected() {
        let brain = NNSpecification::open(vec![NeuralSpec::sensor()], vec![], vec![], vec![]).unwrap();
        let result = MorphologyBuilder::new(segment(), brain).build();
        assert!(matches!(result, Err(StructureError::BrainHasIo { sensors: 1, .. })));
    }

    #[test]
    fn test_brain_reused_as_edge_network() {
        let wave = NeuralSpec::neuron(NeuronFunction::Sum);
        let brain = NNSpecification::open(vec![], vec![wave], vec![], vec![]).unwrap();
        let alias = NNSpecification::open(vec![], vec![wave], vec![], vec![]).unwrap();
        let mut builder = MorphologyBuilder::new(segment(), brain);
        let root = builder.root();
        builder.attach(root, segment(), hinge(), alias);
        assert_eq!(builder.build().unwrap_err(), StructureError::BrainReused(wave.id));
    }

    #[test]
    fn test_too_many_sensors_for_joint() {
        let network = NNSpecification::open(
            vec![NeuralSpec::sensor(), NeuralSpec::sensor()],
            vec![],
            vec![],
            vec![],
        )
        .unwrap();
        let mut builder = MorphologyBuilder::new(segment(), NNSpecification::empty());
        let root = builder.root();
        builder.attach(root, segment(), hinge(), network);
        assert!(matches!(
            builder.build(),
            Err(StructureError::DofExceeded { count: 2, dof: 1, .. })
        ));
    }

    #[test]
    fn test_cardinality_counts_interconnections() {
        let brain_sum = NeuralSpec::neuron(NeuronFunction::Sum);
        let brain = NNSpecification::open(vec![], vec![brain_sum], vec![], vec![]).unwrap();
        let sensor = NeuralSpec::sensor();
        let network = NNSpecification::open(vec![sensor], vec![], vec![], vec![]).unwrap();

        let mut builder = MorphologyBuilder::new(segment(), brain);
        let root = builder.root();
        builder.attach(root, segment(), hinge(), network);
        builder.connect(sensor, brain_sum, 0.5).unwrap();
        assert!(matches!(
            builder.build(),
            Err(StructureError::Underconnected { required: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn test_interconnection_within_one_network_rejected() {
        let a = NeuralSpec::neuron(NeuronFunction::Abs);
        let b = NeuralSpec::neuron(NeuronFunction::Abs);
        let brain = NNSpecification::open(vec![], vec![a, b], vec![], vec![]).unwrap();
        let mut builder = MorphologyBuilder::new(segment(), brain);
        builder.connect(a, b, 0.5).unwrap();
        builder.connect(b, a, 0.5).unwrap();
        assert!(matches!(
            builder.build(),
            Err(StructureError::UnresolvedInterconnection(_))
        ));
    }

    #[test]
    fn test_deep_copy_shares_no_identity() {
        let original = two_limb();
        let copy = original.deep_copy().unwrap();

        assert_eq!(copy.edges().len(), original.edges().len());
        let original_ids: HashSet<NeuralId> = original
            .networks()
            .flat_map(|(_, n)| n.specs().map(|s| s.id))
            .collect();
        for (_, network) in copy.networks() {
            for spec in network.specs() {
                assert!(!original_ids.contains(&spec.id));
            }
        }
        let original_connections: HashSet<ConnectionId> =
            original.interconnections().iter().map(|c| c.id).collect();
        for connection in copy.interconnections() {
            assert!(!original_connections.contains(&connection.id));
        }

        let original_map = original.inter_edge_map().unwrap();
        let copy_map = copy.inter_edge_map().unwrap();
        let pairs = |map: &[(ConnectionId, NetworkRef, NetworkRef)]| {
            map.iter().map(|(_, a, b)| (*a, *b)).collect::<Vec<_>>()
        };
        assert_eq!(pairs(&original_map), pairs(&copy_map));
    }

    #[test]
    fn test_move_interconnection_keeps_identity() {
        let mut parts = two_limb().into_parts();
        let id = parts.interconnections[1].id;
        let target = parts.edges[0].network.actors()[0];
        let other_target = parts.edges[1].network.actors()[0];
        assert_eq!(parts.interconnections[1].destination, target);

        parts.move_interconnection_destination(id, other_target).unwrap();
        assert_eq!(parts.interconnections[1].id, id);
        assert_eq!(parts.interconnections[1].destination, other_target);

        // Moving into the source's own network would make it local
        let brain_wave = parts.brain.neurons()[0];
        let source_sensor = parts.edges[0].network.sensors()[0];
        let sensor_link = parts.interconnections[0].id;
        assert!(parts.move_interconnection_destination(sensor_link, brain_wave).is_ok());
        assert!(parts.move_interconnection_source(sensor_link, brain_wave).is_err());
        assert_eq!(parts.interconnections[0].source, source_sensor);
    }

    #[test]
    fn test_dot_snapshot_mentions_every_network() {
        let dot = two_limb().to_dot();
        assert!(dot.starts_with("digraph {"));
        assert!(dot.contains("brain:Wave"));
        assert!(dot.contains("edge0:sensor"));
        assert!(dot.contains("edge1:actor"));
        assert!(dot.contains("->"));
    }

    #[test]
    fn test_deserialization_validates() {
        let original = two_limb();
        let text = ron::to_string(&original).unwrap();
        let restored: Morphology = ron::from_str(&text).unwrap();
        assert_eq!(restored.interconnections().len(), 3);

        let mut parts = two_limb().into_parts();
        parts.interconnections.clear();
        let broken = ron::to_string(&parts).unwrap();
        assert!(ron::from_str::<Morphology>(&broken).is_err());
    }
}
