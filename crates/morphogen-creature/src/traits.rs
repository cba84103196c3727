//! Physics collaborator traits
//!
//! The creature crate never simulates bodies itself. A physics layer
//! implements these traits to turn a morphology into bodies and joints and
//! to exchange joint readings and forces with the neural engine.

use crate::morphology::{JointSpecification, JointType, Morphology, Node};

/// One physical joint, addressed by degree of freedom
pub trait JointHandle {
    /// Type of the physical joint; must match the edge's specification
    fn joint_type(&self) -> JointType;

    /// Current reading of one degree of freedom (radians for hinges)
    fn angle(&self, dof: usize) -> f64;

    /// Drive one degree of freedom
    fn apply_force(&mut self, dof: usize, force: f64);
}

/// Builds physical bodies and joints from a morphology
pub trait PhysicsBuilder {
    type Body;
    type Joint: JointHandle;

    fn spawn_body(&mut self, node: &Node) -> Self::Body;

    fn spawn_joint(&mut self, parent: &Self::Body, child: &Self::Body, joint: &JointSpecification) -> Self::Joint;
}

/// Bodies in node order and joints in edge order
pub struct Instance<B: PhysicsBuilder> {
    pub bodies: Vec<B::Body>,
    pub joints: Vec<B::Joint>,
}

/// Spawn every segment, then one joint per edge in edge order, which is the
/// order the neural engine expects
pub fn instantiate<B: PhysicsBuilder>(morphology: &Morphology, builder: &mut B) -> Instance<B> {
    let bodies: Vec<B::Body> = morphology.nodes().iter().map(|node| builder.spawn_body(node)).collect();
    let joints = morphology
        .edges()
        .iter()
        .map(|edge| {
            builder.spawn_joint(
                &bodies[edge.source.0],
                &bodies[edge.destination.0],
                &edge.joint,
            )
        })
        .collect();
    Instance { bodies, joints }
}
