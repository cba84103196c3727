//! Integration tests across body plans, mutation, evolution and the neural
//! engine

use morphogen_creature::{
    explicit_nn::ExplicitNN,
    morphology::{Face, JointSpecification, JointType, Morphology, MorphologyBuilder, Node, ShapeSpecification},
    mutator::{MutationConfig, Mutator},
    network::NNSpecification,
    neural::{Connection, NeuralSpec, NeuronFunction},
    traits::JointHandle,
    EngineError, EvolutionAlgorithm, EvolutionConfig, EvolutionError, MutationError, StructureError,
    ACTUATOR_FORCE_FACTOR,
};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

struct TestJoint {
    joint_type: JointType,
    angle: f64,
    forces: Vec<(usize, f64)>,
}

impl TestJoint {
    fn new(joint_type: JointType) -> Self {
        Self {
            joint_type,
            angle: 0.0,
            forces: Vec::new(),
        }
    }
}

impl JointHandle for TestJoint {
    fn joint_type(&self) -> JointType {
        self.joint_type
    }

    fn angle(&self, _dof: usize) -> f64 {
        self.angle
    }

    fn apply_force(&mut self, dof: usize, force: f64) {
        self.forces.push((dof, force));
    }
}

fn segment() -> Node {
    Node::new(ShapeSpecification::Box {
        x: 1.0,
        y: 0.4,
        z: 0.4,
    })
}

fn hinge() -> JointSpecification {
    JointSpecification::new(JointType::Hinge, Face::PosX)
}

/// Root with two hinged limbs. The brain oscillates, fed by the first limb's
/// angle sensor, and drives both limbs' actors.
fn walker() -> Morphology {
    let wave = NeuralSpec::neuron(NeuronFunction::Wave);
    let brain = NNSpecification::open(vec![], vec![wave], vec![], vec![]).unwrap();
    let mut builder = MorphologyBuilder::new(segment(), brain);
    let root = builder.root();
    for limb in 0..2 {
        let sensor = NeuralSpec::sensor();
        let actor = NeuralSpec::actor();
        let network = NNSpecification::open(vec![sensor], vec![], vec![actor], vec![]).unwrap();
        builder.attach(root, segment(), hinge().with_face(if limb == 0 { Face::PosX } else { Face::NegX }), network);
        if limb == 0 {
            builder.connect(sensor, wave, 0.5).unwrap();
        }
        builder.connect(wave, actor, 1.0).unwrap();
    }
    builder.build().unwrap()
}

fn connection_counts(morphology: &Morphology) -> Vec<(usize, usize, usize)> {
    morphology
        .network_refs()
        .into_iter()
        .map(|network| {
            let local = morphology.network(network).map(|n| n.connections().len()).unwrap_or(0);
            (
                local,
                morphology.inter_incoming(network).len(),
                morphology.inter_outgoing(network).len(),
            )
        })
        .collect()
}

// ============================================================================
// Construction
// ============================================================================

#[test]
fn test_min_with_single_input_is_rejected() {
    let sensor = NeuralSpec::sensor();
    let min = NeuralSpec::neuron(NeuronFunction::Min);
    let result = NNSpecification::new(
        vec![sensor],
        vec![min],
        vec![],
        vec![Connection::new(sensor, min, 0.5).unwrap()],
    );
    match result {
        Err(StructureError::Underconnected { required, actual, .. }) => {
            assert_eq!(required, 2);
            assert_eq!(actual, 1);
        }
        other => panic!("expected an underconnected MIN neuron, got {:?}", other),
    }
}

// ============================================================================
// Deep copy and mutation
// ============================================================================

#[test]
fn test_deep_copy_preserves_shape_and_drops_identity() {
    let original = walker();
    let copy = original.deep_copy().unwrap();

    assert_eq!(copy.edges().len(), original.edges().len());
    assert_eq!(connection_counts(&copy), connection_counts(&original));

    for (_, network) in original.networks() {
        for spec in network.specs() {
            assert!(copy.network_of(spec).is_none());
        }
    }
    for connection in original.interconnections() {
        assert!(copy.interconnections().iter().all(|c| c.id != connection.id));
    }
}

#[test]
fn test_mutating_a_copy_leaves_original_alone() {
    let original = walker();
    let snapshot = ron::to_string(&original).unwrap();
    let copy = original.deep_copy().unwrap();

    let config = MutationConfig {
        add_neuron_probability: 1.0,
        weight_probability: 1.0,
        inter_action_probability: 1.0,
        new_interconnection_zero_probability: 0.0,
        ..MutationConfig::default()
    };
    let mutator = Mutator::new(&config);
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(99);
    let mut current = copy;
    for _ in 0..20 {
        if let Ok(outcome) = mutator.mutate(&current, 0.0, &mut rng) {
            current = outcome.morphology;
        }
    }
    assert_eq!(ron::to_string(&original).unwrap(), snapshot);
}

#[test]
fn test_invariants_hold_across_mutation_chain() {
    let config = MutationConfig {
        add_neuron_probability: 0.8,
        weight_probability: 0.8,
        rewire_source_probability: 0.2,
        rewire_destination_probability: 0.2,
        delete_connection_probability: 0.1,
        new_connection_zero_probability: 0.2,
        inter_action_probability: 0.5,
        new_interconnection_zero_probability: 0.2,
        ..MutationConfig::default()
    };
    let mutator = Mutator::new(&config);
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(2024);
    let mut current = walker();

    for _ in 0..60 {
        let outcome = match mutator.mutate(&current, 0.1, &mut rng) {
            Ok(outcome) => outcome,
            Err(MutationError::Unrepairable { .. }) => continue,
            Err(other) => panic!("mutation produced malformed state: {}", other),
        };
        let morphology = outcome.morphology;

        for (_, network) in morphology.networks() {
            for neuron in network.neurons() {
                let function = neuron.function().unwrap();
                assert!(morphology.incoming_to(neuron).len() >= function.min_inputs());
            }
        }
        let map = morphology.inter_edge_map().unwrap();
        assert_eq!(map.len(), morphology.interconnections().len());
        assert!(map.iter().all(|(_, from, to)| from != to));

        current = morphology;
    }
}

// ============================================================================
// Evolution
// ============================================================================

#[test]
fn test_fittest_member_breeds_most_with_highest_coherence() {
    let config = EvolutionConfig {
        population_size: 30,
        ..EvolutionConfig::default()
    };
    let mut evolution = EvolutionAlgorithm::new(config, walker(), 7);
    let ids: Vec<_> = evolution.initial_population().unwrap().iter().map(|m| m.id()).collect();
    assert_eq!(ids.len(), 30);

    let fitness: Vec<f64> = (0..30).map(|i| if i == 0 { 10.0 } else { 1.0 + i as f64 * 0.1 }).collect();
    let next = evolution.generate_new_population(&fitness).unwrap();
    assert_eq!(next.len(), 30);

    let children_of = |id| next.iter().filter(|m| m.parents() == [id]).count();
    let first_children: Vec<_> = next.iter().filter(|m| m.parents() == [ids[0]]).collect();
    assert!(!first_children.is_empty());
    assert!(first_children.iter().all(|m| m.coherence_to_original() == 0.97));

    // Rank order by fitness: member 0, then 29, 28, ... 1
    let mut ranked = vec![ids[0]];
    ranked.extend(ids[1..].iter().rev());
    let counts: Vec<usize> = ranked.iter().map(|&id| children_of(id)).collect();
    assert!(counts.windows(2).all(|w| w[0] >= w[1]), "{:?}", counts);
    assert_eq!(counts[0], 3);
}

#[test]
fn test_blended_fitness_tracks_parents() {
    let config = EvolutionConfig {
        population_size: 10,
        ..EvolutionConfig::default()
    };
    let mut evolution = EvolutionAlgorithm::new(config, walker(), 3);
    evolution.initial_population().unwrap();
    evolution.generate_new_population(&[4.0; 10]).unwrap();
    for member in evolution.population() {
        assert_eq!(member.parental_fitness(), Some(4.0));
        assert_eq!(member.generation(), 1);
    }
    evolution.generate_new_population(&[8.0; 10]).unwrap();

    let generation_one: Vec<_> = evolution.lineage().iter().filter(|r| r.generation == 1).collect();
    assert_eq!(generation_one.len(), 10);
    for record in generation_one {
        assert_eq!(record.avg_fitness, 0.75 * 4.0 + 0.25 * 8.0);
        assert_eq!(record.parents.len(), 1);
    }
}

#[test]
fn test_fitness_vector_length_is_checked() {
    let mut evolution = EvolutionAlgorithm::new(EvolutionConfig::default(), walker(), 1);
    assert!(matches!(
        evolution.generate_new_population(&[1.0]),
        Err(EvolutionError::NoPopulation)
    ));
    evolution.initial_population().unwrap();
    assert!(matches!(
        evolution.generate_new_population(&[1.0, 2.0]),
        Err(EvolutionError::FitnessLength { expected: 30, actual: 2 })
    ));
}

#[test]
fn test_non_finite_fitness_is_rejected() {
    let config = EvolutionConfig {
        population_size: 10,
        ..EvolutionConfig::default()
    };
    let mut evolution = EvolutionAlgorithm::new(config, walker(), 9);
    let ids: Vec<_> = evolution.initial_population().unwrap().iter().map(|m| m.id()).collect();

    let mut fitness = vec![1.0; 10];
    fitness[0] = 100.0;
    fitness[9] = f64::NAN;
    assert!(matches!(
        evolution.generate_new_population(&fitness),
        Err(EvolutionError::NonFiniteFitness { member: 9, .. })
    ));
    fitness[9] = f64::INFINITY;
    assert!(evolution.generate_new_population(&fitness).is_err());

    // Nothing was recorded, and a clean vector still ranks member 0 first
    assert!(evolution.lineage().is_empty());
    assert_eq!(evolution.generation(), 0);
    fitness[9] = 1.0;
    let next = evolution.generate_new_population(&fitness).unwrap();
    let best_children: Vec<_> = next.iter().filter(|m| m.parents() == [ids[0]]).collect();
    assert!(!best_children.is_empty());
    assert!(best_children.iter().all(|m| m.coherence_to_original() == 0.97));
}

/// Body without limbs whose brain is one SAW neuron fed by its own output.
/// Once that loop is deleted nothing can legally feed it again.
fn self_fed_saw() -> Morphology {
    let saw = NeuralSpec::neuron(NeuronFunction::Saw);
    let feedback = Connection::new(saw, saw, 0.5).unwrap();
    let brain = NNSpecification::open(vec![], vec![saw], vec![], vec![feedback]).unwrap();
    MorphologyBuilder::new(segment(), brain).build().unwrap()
}

fn always_delete() -> MutationConfig {
    MutationConfig {
        add_neuron_probability: 0.0,
        rewire_source_probability: 0.0,
        rewire_destination_probability: 0.0,
        delete_connection_probability: 1.0,
        ..MutationConfig::default()
    }
}

#[test]
fn test_exhausted_repair_is_unrepairable() {
    let mutator = Mutator::new(&always_delete());
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
    match mutator.mutate(&self_fed_saw(), 0.0, &mut rng) {
        Err(MutationError::Unrepairable { failures, source }) => {
            assert_eq!(failures, 1);
            assert!(matches!(source, StructureError::Underconnected { required: 1, actual: 0, .. }));
        }
        other => panic!("expected an unrepairable pass, got {:?}", other.map(|o| o.report)),
    }
}

#[test]
fn test_unrepairable_children_fall_back_to_parent_copies() {
    let base = self_fed_saw();
    let config = EvolutionConfig {
        population_size: 4,
        mutation_retries: 3,
        mutation: always_delete(),
    };
    let mut evolution = EvolutionAlgorithm::new(config, self_fed_saw(), 5);
    let population = evolution.initial_population().unwrap();
    assert_eq!(population.len(), 4);
    for member in population {
        assert_eq!(member.morphology().brain().connections().len(), 1);
        assert_eq!(connection_counts(member.morphology()), connection_counts(&base));
    }

    let diagnostics = evolution.diagnostics();
    assert_eq!(diagnostics.passes, 16);
    assert_eq!(diagnostics.unrepairable, 16);
    assert_eq!(diagnostics.fallbacks, 4);
}

#[test]
fn test_same_seed_same_offspring() {
    let shapes = |seed| {
        let config = EvolutionConfig {
            population_size: 12,
            ..EvolutionConfig::default()
        };
        let mut evolution = EvolutionAlgorithm::new(config, walker(), seed);
        evolution.initial_population().unwrap();
        let fitness: Vec<f64> = (0..12).map(|i| i as f64).collect();
        evolution.generate_new_population(&fitness).unwrap();
        evolution
            .population()
            .iter()
            .map(|m| {
                let morphology = m.morphology();
                (connection_counts(morphology), m.coherence_to_original())
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(shapes(42), shapes(42));
}

// ============================================================================
// Neural engine
// ============================================================================

/// Two hinged limbs with write-only networks; the brain runs SAW into SIN
/// and SIN drives both actors
fn oscillator() -> (Morphology, NeuralSpec) {
    let saw = NeuralSpec::neuron(NeuronFunction::Saw);
    let sin = NeuralSpec::neuron(NeuronFunction::Sin);
    let brain = NNSpecification::open(
        vec![],
        vec![saw, sin],
        vec![],
        vec![
            Connection::new(saw, sin, 1.0).unwrap(),
            // Zero weight: satisfies SAW's input without changing its rate
            Connection::new(sin, saw, 0.0).unwrap(),
        ],
    )
    .unwrap();
    let mut builder = MorphologyBuilder::new(segment(), brain);
    let root = builder.root();
    for _ in 0..2 {
        let actor = NeuralSpec::actor();
        let network = NNSpecification::open(vec![], vec![], vec![actor], vec![]).unwrap();
        builder.attach(root, segment(), hinge(), network);
        builder.connect(sin, actor, 1.0).unwrap();
    }
    (builder.build().unwrap(), saw)
}

#[test]
fn test_saw_sine_drive_is_bounded_and_periodic() {
    let (morphology, saw) = oscillator();
    let mut joints = vec![TestJoint::new(JointType::Hinge), TestJoint::new(JointType::Hinge)];
    let mut network = ExplicitNN::compile(&morphology, &joints).unwrap();

    let dt = 0.05;
    let mut previous = network.value_of(&saw).unwrap();
    let mut wraps = Vec::new();
    for step in 0..100 {
        network.tick(&mut joints, dt).unwrap();
        for output in network.actor_outputs() {
            assert!((-1.0..=1.0).contains(&output.value));
        }
        let current = network.value_of(&saw).unwrap();
        if previous - current > 1.0 {
            wraps.push(step);
        }
        previous = current;
    }

    assert!(wraps.len() >= 4, "wraps at {:?}", wraps);
    for pair in wraps.windows(2) {
        assert!((19..=21).contains(&(pair[1] - pair[0])), "wraps at {:?}", wraps);
    }

    let outputs = network.actor_outputs();
    for (joint, output) in joints.iter().zip(&outputs) {
        assert_eq!(joint.forces.len(), 100);
        let (dof, force) = *joint.forces.last().unwrap();
        assert_eq!(dof, 0);
        assert!((force - output.value * ACTUATOR_FORCE_FACTOR).abs() < 1e-12);
    }
}

#[test]
fn test_zero_sub_steps_leave_actors_neutral() {
    let morphology = walker();
    let mut joints = vec![TestJoint::new(JointType::Hinge), TestJoint::new(JointType::Hinge)];
    joints[0].angle = 0.7;
    let mut network = ExplicitNN::with_sub_steps(&morphology, &joints, 0).unwrap();
    for _ in 0..10 {
        network.tick(&mut joints, 0.05).unwrap();
    }
    assert!(network.actor_outputs().iter().all(|o| o.value == 0.0));
    assert_eq!(network.sensor_values()[0].value, 0.7);
}

#[test]
fn test_reset_restores_initial_state() {
    let (morphology, saw) = oscillator();
    let mut joints = vec![TestJoint::new(JointType::Hinge), TestJoint::new(JointType::Hinge)];
    let mut network = ExplicitNN::compile(&morphology, &joints).unwrap();
    for _ in 0..7 {
        network.tick(&mut joints, 0.05).unwrap();
    }
    assert!(network.value_of(&saw).unwrap() != 0.0);
    network.reset();
    assert_eq!(network.value_of(&saw), Some(0.0));
    assert_eq!(network.elapsed(), 0.0);
}

#[test]
fn test_non_hinge_sensor_fails_loudly() {
    let sensor = NeuralSpec::sensor();
    let network = NNSpecification::open(vec![sensor], vec![], vec![], vec![]).unwrap();
    let mut builder = MorphologyBuilder::new(segment(), NNSpecification::empty());
    let root = builder.root();
    builder.attach(root, segment(), JointSpecification::new(JointType::Piston, Face::PosY), network);
    let morphology = builder.build().unwrap();

    let mut joints = vec![TestJoint::new(JointType::Piston)];
    let mut engine = ExplicitNN::compile(&morphology, &joints).unwrap();
    assert_eq!(
        engine.tick(&mut joints, 0.05).unwrap_err(),
        EngineError::UnsupportedSensor {
            edge: 0,
            joint_type: JointType::Piston
        }
    );
}

#[test]
fn test_non_hinge_actor_is_not_actuated() {
    let saw = NeuralSpec::neuron(NeuronFunction::Saw);
    let brain = NNSpecification::open(vec![], vec![saw], vec![], vec![Connection::new(saw, saw, 0.0).unwrap()])
        .unwrap();
    let actor = NeuralSpec::actor();
    let network = NNSpecification::open(vec![], vec![], vec![actor], vec![]).unwrap();
    let mut builder = MorphologyBuilder::new(segment(), brain);
    let root = builder.root();
    builder.attach(root, segment(), JointSpecification::new(JointType::Rotational, Face::NegZ), network);
    builder.connect(saw, actor, 1.0).unwrap();
    let morphology = builder.build().unwrap();

    let mut joints = vec![TestJoint::new(JointType::Rotational)];
    let mut engine = ExplicitNN::compile(&morphology, &joints).unwrap();
    for _ in 0..5 {
        engine.tick(&mut joints, 0.05).unwrap();
    }
    assert!(joints[0].forces.is_empty());
    assert!(engine.actor_outputs()[0].value != 0.0);
}

#[test]
fn test_joint_array_must_match_edges() {
    let morphology = walker();
    let one = vec![TestJoint::new(JointType::Hinge)];
    assert!(matches!(
        ExplicitNN::compile(&morphology, &one),
        Err(EngineError::JointCountMismatch { expected: 2, actual: 1 })
    ));
    let wrong = vec![TestJoint::new(JointType::Hinge), TestJoint::new(JointType::Piston)];
    assert!(matches!(
        ExplicitNN::compile(&morphology, &wrong),
        Err(EngineError::JointTypeMismatch { edge: 1, .. })
    ));
}
