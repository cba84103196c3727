//! Starting body plans for training runs
//!
//! Evolution only ever mutates copies of a base morphology, so the base
//! decides which joints and networks exist at generation 0.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use morphogen_creature::{
    Face, JointSpecification, JointType, Morphology, MorphologyBuilder, NNSpecification, NeuralSpec, Node,
    NeuronFunction, ShapeSpecification, StructureResult,
};

/// Torso with four hinged legs. A brain oscillator, kicked by the front
/// left leg's angle sensor, drives the left legs forward and the right legs
/// backward.
pub fn walker() -> StructureResult<Morphology> {
    let torso = Node::labelled(
        ShapeSpecification::Box {
            x: 2.0,
            y: 0.5,
            z: 1.0,
        },
        "torso",
    );
    let wave = NeuralSpec::neuron(NeuronFunction::Wave);
    let brain = NNSpecification::open(vec![], vec![wave], vec![], vec![])?;
    let mut builder = MorphologyBuilder::new(torso, brain);
    let root = builder.root();

    let legs = [
        ("front left", Face::PosZ, 0.6, 1.0),
        ("front right", Face::NegZ, 0.6, -1.0),
        ("back left", Face::PosZ, -0.6, 1.0),
        ("back right", Face::NegZ, -0.6, -1.0),
    ];
    for (index, (label, face, offset, weight)) in legs.into_iter().enumerate() {
        let sensor = NeuralSpec::sensor();
        let actor = NeuralSpec::actor();
        let network = NNSpecification::open(vec![sensor], vec![], vec![actor], vec![])?;
        let leg = Node::labelled(
            ShapeSpecification::Box {
                x: 0.3,
                y: 1.2,
                z: 0.3,
            },
            label,
        );
        let joint = JointSpecification::new(JointType::Hinge, face).with_offsets(offset, 0.0)?;
        builder.attach(root, leg, joint, network);

        if index == 0 {
            builder.connect(sensor, wave, 0.5)?;
        }
        builder.connect(wave, actor, weight)?;
    }

    builder.build()
}

/// Read a base morphology from a RON file; structure is validated while
/// deserializing
pub fn load_base(path: &Path) -> Result<Morphology> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    ron::from_str(&text).with_context(|| format!("Invalid morphology in {}", path.display()))
}
