//! Single-genotype mutation pass
//!
//! A pass never touches its input. It deep-copies the parent, edits the
//! copy's parts in a fixed stage order and re-validates the result:
//!
//! 1. per network: maybe add a neuron, perturb and rewire local connections
//! 2. per network: add new local connections
//! 3. per inter-network connection: perturb, re-home or delete
//! 4. add new inter-network connections between neighbouring networks
//! 5. repair neuron input counts
//! 6. drift joint geometry
//!
//! Stages skip elements for which no legal candidate exists and count the
//! skip instead of failing.

use std::f64::consts::{FRAC_PI_2, PI};

use ahash::HashSet;
use rand::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::MutationError;
use crate::morphology::{Face, JointSpecification, Morphology, MorphologyParts};
use crate::mutation::{
    Decision, DoubleMutation, IntegerDecision, MultipleDecision, NeuronChooser, NominalMutation,
};
use crate::neural::{Connection, NeuralSpec};
use crate::types::{ConnectionId, NetworkRef, NeuralId};

/// Probabilities and caps for every mutation stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MutationConfig {
    /// Chance per network of adding one neuron
    pub add_neuron_probability: f64,
    /// Chance per connection of perturbing its weight
    pub weight_probability: f64,
    /// Share of the narrow gaussian when perturbing weights and joints
    pub value_coherence: f64,
    pub rewire_source_probability: f64,
    pub rewire_destination_probability: f64,
    pub delete_connection_probability: f64,
    /// Probability that a network gains no new local connection
    pub new_connection_zero_probability: f64,
    pub max_new_connections: usize,
    /// Chance per inter-network connection of a structural action
    pub inter_action_probability: f64,
    /// Relative weights of: source in place, destination in place, source
    /// to adjacent network, destination to adjacent network, delete
    pub inter_action_weights: [f64; 5],
    pub new_interconnection_zero_probability: f64,
    pub max_new_interconnections: usize,
    /// Input cap for functions that read every input
    pub max_inputs: usize,
    pub joint_probability: f64,
    pub face_probability: f64,
    pub neuron_groups: NeuronChooser,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            add_neuron_probability: 0.15,
            weight_probability: 0.3,
            value_coherence: 0.7,
            rewire_source_probability: 0.05,
            rewire_destination_probability: 0.05,
            delete_connection_probability: 0.03,
            new_connection_zero_probability: 0.7,
            max_new_connections: 3,
            inter_action_probability: 0.15,
            inter_action_weights: [0.3, 0.3, 0.15, 0.15, 0.1],
            new_interconnection_zero_probability: 0.75,
            max_new_interconnections: 2,
            max_inputs: 6,
            joint_probability: 0.1,
            face_probability: 0.02,
            neuron_groups: NeuronChooser::default(),
        }
    }
}

/// What one pass changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationReport {
    pub neurons_added: usize,
    pub weights_changed: usize,
    pub connections_rewired: usize,
    pub connections_deleted: usize,
    pub connections_added: usize,
    pub interconnections_rewired: usize,
    pub interconnections_deleted: usize,
    pub interconnections_added: usize,
    pub repairs_added: usize,
    pub repairs_removed: usize,
    /// Neurons left below their minimum input count
    pub repair_failures: usize,
    pub joints_changed: usize,
    /// Mutations abandoned for lack of a legal candidate
    pub skipped: usize,
}

impl std::ops::AddAssign for MutationReport {
    fn add_assign(&mut self, other: Self) {
        self.neurons_added += other.neurons_added;
        self.weights_changed += other.weights_changed;
        self.connections_rewired += other.connections_rewired;
        self.connections_deleted += other.connections_deleted;
        self.connections_added += other.connections_added;
        self.interconnections_rewired += other.interconnections_rewired;
        self.interconnections_deleted += other.interconnections_deleted;
        self.interconnections_added += other.interconnections_added;
        self.repairs_added += other.repairs_added;
        self.repairs_removed += other.repairs_removed;
        self.repair_failures += other.repair_failures;
        self.joints_changed += other.joints_changed;
        self.skipped += other.skipped;
    }
}

#[derive(Debug)]
pub struct MutationOutcome {
    pub morphology: Morphology,
    pub report: MutationReport,
}

/// Structural actions on an inter-network connection, mildest first so
/// that high coherence favours small changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterAction {
    SourceInPlace,
    DestinationInPlace,
    SourceAdjacent,
    DestinationAdjacent,
    Delete,
}

const INTER_ACTIONS: [InterAction; 5] = [
    InterAction::SourceInPlace,
    InterAction::DestinationInPlace,
    InterAction::SourceAdjacent,
    InterAction::DestinationAdjacent,
    InterAction::Delete,
];

/// Legal new sources inside `network` for a connection ending at
/// `destination`: not already feeding it, not itself, no sensor into an actor
fn source_candidates(parts: &MorphologyParts, network: NetworkRef, destination: &NeuralSpec) -> Vec<NeuralSpec> {
    let Some(net) = parts.network(network) else {
        return Vec::new();
    };
    let connected: HashSet<NeuralId> = parts
        .incoming_to(destination)
        .iter()
        .map(|c| c.source.id)
        .collect();
    net.source_candidates()
        .into_iter()
        .filter(|s| s.id != destination.id && !connected.contains(&s.id))
        .filter(|s| !(s.is_sensor() && destination.is_actor()))
        .collect()
}

/// Legal new destinations inside `network` for a connection starting at
/// `source`
fn destination_candidates(parts: &MorphologyParts, network: NetworkRef, source: &NeuralSpec) -> Vec<NeuralSpec> {
    let Some(net) = parts.network(network) else {
        return Vec::new();
    };
    let connected: HashSet<NeuralId> = parts
        .outgoing_from(source)
        .iter()
        .map(|c| c.destination.id)
        .collect();
    net.destination_candidates()
        .into_iter()
        .filter(|d| d.id != source.id && !connected.contains(&d.id))
        .filter(|d| !(source.is_sensor() && d.is_actor()))
        .collect()
}

/// Runs mutation passes with one configuration
#[derive(Debug, Clone)]
pub struct Mutator {
    config: MutationConfig,
}

impl Mutator {
    pub fn new(config: &MutationConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn config(&self) -> &MutationConfig {
        &self.config
    }

    /// Produce a mutated, validated copy of `parent`
    pub fn mutate<R: Rng + ?Sized>(
        &self,
        parent: &Morphology,
        coherence: f64,
        rng: &mut R,
    ) -> Result<MutationOutcome, MutationError> {
        let coherence = coherence.clamp(0.0, 1.0);
        let mut parts = parent.deep_copy()?.into_parts();
        let mut pass = Pass {
            config: &self.config,
            coherence,
            rng,
            report: MutationReport::default(),
        };

        pass.grow_networks(&mut parts)?;
        pass.add_local_connections(&mut parts)?;
        pass.mutate_interconnections(&mut parts)?;
        pass.add_interconnections(&mut parts)?;
        pass.repair(&mut parts)?;
        pass.drift_joints(&mut parts)?;

        let report = pass.report;
        log::debug!("mutation pass at coherence {:.3}: {:?}", coherence, report);

        match Morphology::from_parts(parts) {
            Ok(morphology) => Ok(MutationOutcome { morphology, report }),
            Err(source) if report.repair_failures > 0 => Err(MutationError::Unrepairable {
                failures: report.repair_failures,
                source,
            }),
            Err(source) => Err(MutationError::Structure(source)),
        }
    }
}

struct Pass<'a, R: Rng + ?Sized> {
    config: &'a MutationConfig,
    coherence: f64,
    rng: &'a mut R,
    report: MutationReport,
}

impl<R: Rng + ?Sized> Pass<'_, R> {
    fn weight(&self) -> DoubleMutation {
        DoubleMutation::new(self.config.weight_probability, self.config.value_coherence, 0.0, 1.0)
    }

    fn perturb(&mut self, weight: f64) -> f64 {
        let changed = self.weight().possibly_change_val(weight, self.coherence, self.rng);
        if changed != weight {
            self.report.weights_changed += 1;
        }
        changed
    }

    /// Stage 1
    fn grow_networks(&mut self, parts: &mut MorphologyParts) -> Result<(), MutationError> {
        let add_neuron = Decision::new(self.config.add_neuron_probability);
        let structural = MultipleDecision::new(
            [
                self.config.rewire_source_probability,
                self.config.rewire_destination_probability,
                self.config.delete_connection_probability,
            ]
            .iter()
            // Fixed rates, damped by coherence like every structural gate
            .map(|p| p * (1.0 - self.coherence))
            .collect(),
        );

        for network in parts.network_refs() {
            if add_neuron.happens(self.coherence, self.rng) {
                self.add_neuron(parts, network)?;
            }

            let ids: Vec<ConnectionId> = parts
                .network(network)
                .map(|n| n.connections().iter().map(|c| c.id).collect())
                .unwrap_or_default();
            for id in ids {
                let Some(connection) = parts.network(network).and_then(|n| n.connection(id)).copied() else {
                    continue;
                };
                let weight = self.perturb(connection.weight);
                let action = structural.decide(self.rng);
                let Some(net) = parts.network_mut(network) else {
                    continue;
                };
                net.set_weight(id, weight)?;

                match action {
                    0 => {
                        let candidates = source_candidates(parts, network, &connection.destination);
                        match candidates.choose(self.rng) {
                            Some(&source) => {
                                if let Some(net) = parts.network_mut(network) {
                                    net.move_connection_source(id, source)?;
                                    self.report.connections_rewired += 1;
                                }
                            }
                            None => self.report.skipped += 1,
                        }
                    }
                    1 => {
                        let candidates = destination_candidates(parts, network, &connection.source);
                        match candidates.choose(self.rng) {
                            Some(&destination) => {
                                if let Some(net) = parts.network_mut(network) {
                                    net.move_connection_destination(id, destination)?;
                                    self.report.connections_rewired += 1;
                                }
                            }
                            None => self.report.skipped += 1,
                        }
                    }
                    2 => {
                        if let Some(net) = parts.network_mut(network) {
                            net.remove_internal_connection(id)?;
                            self.report.connections_deleted += 1;
                        }
                    }
                    _ => {}
                }
            }
        }
        log::debug!(
            "grow: +{} neurons, {} rewired, {} deleted",
            self.report.neurons_added,
            self.report.connections_rewired,
            self.report.connections_deleted
        );
        Ok(())
    }

    /// New neuron fed from distinct local sources, with one outgoing
    /// connection when a destination exists
    fn add_neuron(&mut self, parts: &mut MorphologyParts, network: NetworkRef) -> Result<(), MutationError> {
        let Some(net) = parts.network_mut(network) else {
            return Ok(());
        };
        let sources = net.source_candidates();
        let Some(function) = self.config.neuron_groups.choose(sources.len(), self.rng) else {
            self.report.skipped += 1;
            return Ok(());
        };
        let destinations = net.destination_candidates();

        let neuron = net.add_neuron(function);
        self.report.neurons_added += 1;
        let inputs: Vec<NeuralSpec> = sources
            .choose_multiple(self.rng, function.min_inputs())
            .copied()
            .collect();
        for source in inputs {
            net.add_local_connection(source, neuron, self.rng.random::<f64>())?;
        }
        match destinations.choose(self.rng) {
            Some(&destination) => {
                net.add_local_connection(neuron, destination, self.rng.random::<f64>())?;
            }
            None => self.report.skipped += 1,
        }
        Ok(())
    }

    /// Stage 2
    fn add_local_connections(&mut self, parts: &mut MorphologyParts) -> Result<(), MutationError> {
        let count = IntegerDecision::new(
            self.config.new_connection_zero_probability,
            self.config.max_new_connections,
        );
        for network in parts.network_refs() {
            let wanted = count.decide_with_coherence(self.coherence, self.rng);
            for _ in 0..wanted {
                let sources = parts.network(network).map(|n| n.source_candidates()).unwrap_or_default();
                let Some(&source) = sources.choose(self.rng) else {
                    self.report.skipped += 1;
                    continue;
                };
                let candidates = destination_candidates(parts, network, &source);
                let (Some(&destination), Some(net)) = (candidates.choose(self.rng), parts.network_mut(network))
                else {
                    self.report.skipped += 1;
                    continue;
                };
                net.add_local_connection(source, destination, self.rng.random::<f64>())?;
                self.report.connections_added += 1;
            }
        }
        Ok(())
    }

    /// Stage 3
    fn mutate_interconnections(&mut self, parts: &mut MorphologyParts) -> Result<(), MutationError> {
        let gate = Decision::new(self.config.inter_action_probability);
        let total: f64 = self.config.inter_action_weights.iter().map(|w| w.max(0.0)).sum();
        let actions = MultipleDecision::new(
            self.config
                .inter_action_weights
                .iter()
                .map(|w| if total > 0.0 { w.max(0.0) / total } else { 0.0 })
                .collect(),
        );

        let ids: Vec<ConnectionId> = parts.interconnections().iter().map(|c| c.id).collect();
        for id in ids {
            let Some(connection) = parts.interconnections().iter().find(|c| c.id == id).copied() else {
                continue;
            };
            let weight = self.perturb(connection.weight);
            parts.set_interconnection_weight(id, weight)?;

            if !gate.happens(self.coherence, self.rng) {
                continue;
            }
            let Some(&action) = INTER_ACTIONS.get(actions.decide_with_coherence(self.coherence, self.rng)) else {
                continue;
            };
            self.apply_inter_action(parts, &connection, action)?;
        }
        Ok(())
    }

    fn apply_inter_action(
        &mut self,
        parts: &mut MorphologyParts,
        connection: &Connection,
        action: InterAction,
    ) -> Result<(), MutationError> {
        if action == InterAction::Delete {
            parts.remove_interconnection(connection.id)?;
            self.report.interconnections_deleted += 1;
            return Ok(());
        }

        let (Some(source_net), Some(destination_net)) = (
            parts.network_of(&connection.source),
            parts.network_of(&connection.destination),
        ) else {
            self.report.skipped += 1;
            return Ok(());
        };
        let neighbors = parts.neighbor_map();
        let adjacent = |of: NetworkRef, avoid: NetworkRef| -> Vec<NetworkRef> {
            neighbors
                .get(&of)
                .map(|set| set.iter().copied().filter(|n| *n != avoid).collect())
                .unwrap_or_default()
        };

        let moving_source = matches!(action, InterAction::SourceInPlace | InterAction::SourceAdjacent);
        let target_net = match action {
            InterAction::SourceInPlace => Some(source_net),
            InterAction::DestinationInPlace => Some(destination_net),
            InterAction::SourceAdjacent => adjacent(source_net, destination_net).choose(self.rng).copied(),
            InterAction::DestinationAdjacent => adjacent(destination_net, source_net).choose(self.rng).copied(),
            InterAction::Delete => None,
        };
        let Some(target_net) = target_net else {
            self.report.skipped += 1;
            return Ok(());
        };

        let candidates = if moving_source {
            source_candidates(parts, target_net, &connection.destination)
        } else {
            destination_candidates(parts, target_net, &connection.source)
        };
        let Some(&endpoint) = candidates.choose(self.rng) else {
            self.report.skipped += 1;
            return Ok(());
        };
        if moving_source {
            parts.move_interconnection_source(connection.id, endpoint)?;
        } else {
            parts.move_interconnection_destination(connection.id, endpoint)?;
        }
        self.report.interconnections_rewired += 1;
        Ok(())
    }

    /// Stage 4
    fn add_interconnections(&mut self, parts: &mut MorphologyParts) -> Result<(), MutationError> {
        let count = IntegerDecision::new(
            self.config.new_interconnection_zero_probability,
            self.config.max_new_interconnections,
        );
        let wanted = count.decide_with_coherence(self.coherence, self.rng);
        for _ in 0..wanted {
            let networks = parts.network_refs();
            let Some(&from) = networks.choose(self.rng) else {
                continue;
            };
            let neighbors: Vec<NetworkRef> = parts
                .neighbor_map()
                .get(&from)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default();
            let Some(&to) = neighbors.choose(self.rng) else {
                self.report.skipped += 1;
                continue;
            };
            let sources = parts.network(from).map(|n| n.source_candidates()).unwrap_or_default();
            let Some(&source) = sources.choose(self.rng) else {
                self.report.skipped += 1;
                continue;
            };
            let candidates = destination_candidates(parts, to, &source);
            let Some(&destination) = candidates.choose(self.rng) else {
                self.report.skipped += 1;
                continue;
            };
            parts.add_interconnection(source, destination, self.rng.random::<f64>())?;
            self.report.interconnections_added += 1;
        }
        Ok(())
    }

    /// Stage 5: bring every neuron's system-wide input count into
    /// `[min_inputs, max]`. Local sources are preferred over neighbouring
    /// networks. A neuron with no legal source left is recorded and skipped.
    fn repair(&mut self, parts: &mut MorphologyParts) -> Result<(), MutationError> {
        for network in parts.network_refs() {
            let neurons: Vec<NeuralSpec> = parts.network(network).map(|n| n.neurons().to_vec()).unwrap_or_default();
            for neuron in neurons {
                let Some(function) = neuron.function() else {
                    continue;
                };
                let min = function.min_inputs();
                let max = function.max_inputs().unwrap_or(self.config.max_inputs).max(min);

                while parts.incoming_to(&neuron).len() < min {
                    if !self.add_repair_input(parts, network, &neuron)? {
                        log::warn!(
                            "no legal input left for {} ({:?}) in {}",
                            neuron.id,
                            function,
                            network
                        );
                        self.report.repair_failures += 1;
                        break;
                    }
                }

                loop {
                    let incoming = parts.incoming_to(&neuron);
                    if incoming.len() <= max {
                        break;
                    }
                    let Some(victim) = incoming.choose(self.rng).copied() else {
                        break;
                    };
                    let is_local = parts
                        .network(network)
                        .is_some_and(|n| n.connection(victim.id).is_some());
                    if is_local {
                        if let Some(net) = parts.network_mut(network) {
                            net.remove_internal_connection(victim.id)?;
                        }
                    } else {
                        parts.remove_interconnection(victim.id)?;
                    }
                    self.report.repairs_removed += 1;
                }
            }
        }
        Ok(())
    }

    fn add_repair_input(
        &mut self,
        parts: &mut MorphologyParts,
        network: NetworkRef,
        neuron: &NeuralSpec,
    ) -> Result<bool, MutationError> {
        let local = source_candidates(parts, network, neuron);
        if let Some(&source) = local.choose(self.rng) {
            if let Some(net) = parts.network_mut(network) {
                net.add_local_connection(source, *neuron, self.rng.random::<f64>())?;
                self.report.repairs_added += 1;
                return Ok(true);
            }
        }

        let mut neighbors: Vec<NetworkRef> = parts
            .neighbor_map()
            .get(&network)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        neighbors.shuffle(self.rng);
        for neighbor in neighbors {
            let remote = source_candidates(parts, neighbor, neuron);
            if let Some(&source) = remote.choose(self.rng) {
                parts.add_interconnection(source, *neuron, self.rng.random::<f64>())?;
                self.report.repairs_added += 1;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Stage 6. The joint type is kept so sensor and actor counts stay
    /// within the joint's DOF.
    fn drift_joints(&mut self, parts: &mut MorphologyParts) -> Result<(), MutationError> {
        let p = self.config.joint_probability;
        let c = self.config.value_coherence;
        let offset = DoubleMutation::new(p, c, -1.0, 1.0);
        let rotation = DoubleMutation::new(p, c, -PI, PI);
        let bending = DoubleMutation::new(p, c, -FRAC_PI_2, FRAC_PI_2);
        let hover = DoubleMutation::new(p, c, 0.0, 0.5);
        let face = NominalMutation::<Face>::new(self.config.face_probability);

        for edge in parts.edges.iter_mut() {
            let joint = edge.joint;
            let (u, v) = joint.offsets();
            let drifted: JointSpecification = joint
                .with_offsets(
                    offset.possibly_change_val(u, self.coherence, self.rng),
                    offset.possibly_change_val(v, self.coherence, self.rng),
                )?
                .with_rotation(rotation.possibly_change_val(joint.rotation(), self.coherence, self.rng))
                .with_bending(bending.possibly_change_val(joint.bending(), self.coherence, self.rng))
                .with_hover(hover.possibly_change_val(joint.hover(), self.coherence, self.rng))
                .with_face(face.mutate(joint.face(), self.coherence, self.rng));
            if drifted != joint {
                self.report.joints_changed += 1;
            }
            edge.joint = drifted;
        }
        Ok(())
    }
}
