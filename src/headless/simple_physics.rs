//! Kinematic stand-in for a rigid-body engine
//!
//! Each hinge is a damped rotational spring driven by the forces the neural
//! engine applies. The creature lies in a plane: a limb below horizontal
//! touches the ground, and sweeping it backwards while in contact pushes the
//! body forward. Nothing else is simulated.

use morphogen_creature::{JointHandle, JointSpecification, JointType, Node, PhysicsBuilder};

/// Resistance proportional to angular velocity
pub const DAMPING: f64 = 2.0;

/// Pull back towards the rest angle
pub const STIFFNESS: f64 = 1.5;

/// Hinges stop at this angle either way (radians)
pub const ANGLE_LIMIT: f64 = std::f64::consts::FRAC_PI_3;

/// A segment's reach, taken from its longest half extent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimpleBody {
    pub reach: f64,
}

#[derive(Debug, Clone)]
pub struct SimpleJoint {
    joint_type: JointType,
    /// Reach of the child segment
    lever: f64,
    /// Rest angle; the hover of the joint tilts the limb up
    rest: f64,
    angle: f64,
    velocity: f64,
    torque: f64,
}

impl SimpleJoint {
    pub fn new(joint_type: JointType, lever: f64, rest: f64) -> Self {
        let rest = rest.clamp(-ANGLE_LIMIT, ANGLE_LIMIT);
        Self {
            joint_type,
            lever,
            rest,
            angle: rest,
            velocity: 0.0,
            torque: 0.0,
        }
    }

    pub fn velocity(&self) -> f64 {
        self.velocity
    }

    /// Integrate one step and return the forward stride it produced
    pub fn integrate(&mut self, dt: f64) -> f64 {
        if self.joint_type != JointType::Hinge {
            self.torque = 0.0;
            return 0.0;
        }

        let before = self.angle;
        let acceleration = self.torque - DAMPING * self.velocity - STIFFNESS * (self.angle - self.rest);
        self.velocity += acceleration * dt;
        self.angle += self.velocity * dt;
        if self.angle.abs() > ANGLE_LIMIT {
            self.angle = self.angle.clamp(-ANGLE_LIMIT, ANGLE_LIMIT);
            self.velocity = 0.0;
        }
        self.torque = 0.0;

        // Ground contact only below horizontal; only backward sweeps push
        let swept = before - self.angle;
        if self.angle < 0.0 && swept > 0.0 {
            swept * self.lever
        } else {
            0.0
        }
    }
}

impl JointHandle for SimpleJoint {
    fn joint_type(&self) -> JointType {
        self.joint_type
    }

    fn angle(&self, dof: usize) -> f64 {
        if dof == 0 {
            self.angle
        } else {
            0.0
        }
    }

    fn apply_force(&mut self, dof: usize, force: f64) {
        if dof == 0 && force.is_finite() {
            self.torque += force;
        }
    }
}

/// Spawns bodies and hinges for the planar model
#[derive(Debug, Default)]
pub struct SimpleBuilder;

impl PhysicsBuilder for SimpleBuilder {
    type Body = SimpleBody;
    type Joint = SimpleJoint;

    fn spawn_body(&mut self, node: &Node) -> SimpleBody {
        let bounds = node.shape.bounds();
        let reach = bounds.iter().copied().fold(0.0, f64::max);
        SimpleBody { reach }
    }

    fn spawn_joint(&mut self, _parent: &SimpleBody, child: &SimpleBody, joint: &JointSpecification) -> SimpleJoint {
        SimpleJoint::new(joint.joint_type(), child.reach, joint.hover())
    }
}

/// Distance and effort accumulated over one trial
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Trial {
    /// Forward displacement of the body
    pub distance: f64,
    /// Integral of absolute applied torque
    pub effort: f64,
    /// Simulated seconds
    pub duration: f64,
}

impl Trial {
    /// Advance every joint by `dt` after the controller applied its forces
    pub fn step(&mut self, joints: &mut [SimpleJoint], dt: f64) {
        for joint in joints.iter_mut() {
            self.effort += joint.torque.abs() * dt;
            self.distance += joint.integrate(dt);
        }
        self.duration += dt;
    }
}
