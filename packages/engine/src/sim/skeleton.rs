// packages/engine/src/sim/skeleton.rs
//! Kinematic tree of links connected by single-DoF joints

use crate::utils::errors::{EngineError, Result};
use nalgebra::{Isometry3, Translation3, Unit, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Joint motion type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JointKind {
    Revolute,
    Prismatic,
    Fixed,
}

/// How commands drive a joint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorType {
    /// Command is a force/torque
    Torque,
    /// Command is a target velocity tracked under the effort limit
    Servo,
    /// Command is imposed as the velocity
    Velocity,
    /// Not actuated
    Passive,
    /// Held in place
    Locked,
}

impl ActuatorType {
    /// Whether controllers produce commands for joints of this type
    pub fn is_controllable(&self) -> bool {
        !matches!(self, ActuatorType::Passive | ActuatorType::Locked)
    }
}

/// Rigid body
#[derive(Debug, Clone)]
pub struct Link {
    pub name: String,
    pub mass: f64,

    /// Visual radius used by the renderer
    pub radius: f64,
    pub color: [u8; 3],

    /// Resolved mesh file, if the description referenced one
    pub mesh: Option<std::path::PathBuf>,
}

impl Link {
    pub fn new(name: impl Into<String>, mass: f64) -> Self {
        Self {
            name: name.into(),
            mass,
            radius: 0.05,
            color: [200, 200, 200],
            mesh: None,
        }
    }

    pub fn with_color(mut self, color: [u8; 3]) -> Self {
        self.color = color;
        self
    }

    pub fn with_radius(mut self, radius: f64) -> Self {
        self.radius = radius;
        self
    }
}

/// State and parameters of one degree of freedom
#[derive(Debug, Clone)]
pub struct Dof {
    pub position: f64,
    pub velocity: f64,
    pub acceleration: f64,
    pub force: f64,
    pub command: f64,
    pub lower: f64,
    pub upper: f64,
    pub effort_limit: f64,
    pub damping: f64,
    pub coulomb_friction: f64,
    pub position_enforced: bool,
}

impl Default for Dof {
    fn default() -> Self {
        Self {
            position: 0.0,
            velocity: 0.0,
            acceleration: 0.0,
            force: 0.0,
            command: 0.0,
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
            effort_limit: f64::INFINITY,
            damping: 0.0,
            coulomb_friction: 0.0,
            position_enforced: false,
        }
    }
}

/// Joint between a parent link (or the base) and a child link
#[derive(Debug, Clone)]
pub struct Joint {
    pub name: String,
    pub kind: JointKind,

    /// `None` attaches the child to the skeleton base
    pub parent: Option<usize>,
    pub child: usize,

    /// Offset of the joint frame from the parent frame
    pub origin: Vector3<f64>,
    pub axis: Unit<Vector3<f64>>,
    pub actuator: ActuatorType,

    /// `None` for fixed joints
    pub dof: Option<Dof>,
}

impl Joint {
    pub fn new(
        name: impl Into<String>,
        kind: JointKind,
        parent: Option<usize>,
        child: usize,
        origin: Vector3<f64>,
        axis: Vector3<f64>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            parent,
            child,
            origin,
            axis: Unit::new_normalize(axis),
            actuator: ActuatorType::Torque,
            dof: (kind != JointKind::Fixed).then(Dof::default),
        }
    }

    fn local_transform(&self) -> Isometry3<f64> {
        let q = self.dof.as_ref().map(|d| d.position).unwrap_or(0.0);
        match self.kind {
            JointKind::Revolute => Isometry3::from_parts(
                Translation3::from(self.origin),
                UnitQuaternion::from_axis_angle(&self.axis, q),
            ),
            JointKind::Prismatic => Isometry3::from_parts(
                Translation3::from(self.origin + self.axis.into_inner() * q),
                UnitQuaternion::identity(),
            ),
            JointKind::Fixed => Isometry3::from_parts(
                Translation3::from(self.origin),
                UnitQuaternion::identity(),
            ),
        }
    }
}

const SERVO_GAIN: f64 = 100.0;
const MIN_INERTIA: f64 = 1e-3;

/// Links and joints with a floating or fixed base
///
/// Joints are stored parents-first: a joint's parent link is either the
/// base or the child of an earlier joint.
#[derive(Debug, Clone)]
pub struct Skeleton {
    pub name: String,
    pub links: Vec<Link>,
    pub joints: Vec<Joint>,
    pub base: Isometry3<f64>,
    pub fixed_base: bool,
}

impl Skeleton {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            links: Vec::new(),
            joints: Vec::new(),
            base: Isometry3::identity(),
            fixed_base: false,
        }
    }

    pub fn add_link(&mut self, link: Link) -> usize {
        self.links.push(link);
        self.links.len() - 1
    }

    pub fn add_joint(&mut self, joint: Joint) -> usize {
        self.joints.push(joint);
        self.joints.len() - 1
    }

    /// Serial chain of `dofs` revolute joints alternating z and y axes
    pub fn serial_chain(name: impl Into<String>, dofs: usize, link_length: f64) -> Self {
        let mut skeleton = Skeleton::new(name);
        let mut parent = skeleton.add_link(Link::new("base_link", 2.0).with_radius(0.08));

        for i in 0..dofs {
            let shade = 80 + ((i * 170) / dofs.max(1)) as u8;
            let child = skeleton.add_link(
                Link::new(format!("link_{}", i + 1), 1.0).with_color([shade, 120, 255 - shade]),
            );
            let axis = if i % 2 == 0 { Vector3::z() } else { Vector3::y() };
            let mut joint = Joint::new(
                format!("joint_{}", i + 1),
                JointKind::Revolute,
                Some(parent),
                child,
                Vector3::new(0.0, 0.0, link_length),
                axis,
            );
            if let Some(dof) = joint.dof.as_mut() {
                dof.lower = -std::f64::consts::PI;
                dof.upper = std::f64::consts::PI;
                dof.damping = 0.5;
            }
            skeleton.add_joint(joint);
            parent = child;
        }

        skeleton
    }

    pub fn num_links(&self) -> usize {
        self.links.len()
    }

    pub fn num_joints(&self) -> usize {
        self.joints.len()
    }

    pub fn num_dofs(&self) -> usize {
        self.joints.iter().filter(|j| j.dof.is_some()).count()
    }

    pub fn link_index(&self, name: &str) -> Option<usize> {
        self.links.iter().position(|l| l.name == name)
    }

    pub fn joint_index(&self, name: &str) -> Option<usize> {
        self.joints.iter().position(|j| j.name == name)
    }

    /// DoF names (one per non-fixed joint, named after the joint)
    pub fn dof_names(&self) -> Vec<String> {
        self.joints
            .iter()
            .filter(|j| j.dof.is_some())
            .map(|j| j.name.clone())
            .collect()
    }

    /// Index among DoFs of the named DoF
    pub fn dof_index(&self, name: &str) -> Option<usize> {
        self.joints
            .iter()
            .filter(|j| j.dof.is_some())
            .position(|j| j.name == name)
    }

    pub fn dofs(&self) -> impl Iterator<Item = &Dof> {
        self.joints.iter().filter_map(|j| j.dof.as_ref())
    }

    pub fn dofs_mut(&mut self) -> impl Iterator<Item = &mut Dof> {
        self.joints.iter_mut().filter_map(|j| j.dof.as_mut())
    }

    /// Number of DoFs whose actuator accepts commands
    pub fn num_controllable_dofs(&self) -> usize {
        self.joints
            .iter()
            .filter(|j| j.dof.is_some() && j.actuator.is_controllable())
            .count()
    }

    /// World pose of every link, indexed like `links`
    pub fn body_poses(&self) -> Vec<Isometry3<f64>> {
        let mut poses = vec![self.base; self.links.len()];
        for joint in &self.joints {
            let parent_pose = joint.parent.map(|p| poses[p]).unwrap_or(self.base);
            poses[joint.child] = parent_pose * joint.local_transform();
        }
        poses
    }

    /// Advance joint state by `dt` using each joint's actuator model
    pub fn integrate(&mut self, dt: f64) -> Result<()> {
        for joint in &mut self.joints {
            let inertia = self.links[joint.child].mass.max(MIN_INERTIA);
            let actuator = joint.actuator;
            let Some(dof) = joint.dof.as_mut() else {
                continue;
            };

            match actuator {
                ActuatorType::Locked => {
                    dof.velocity = 0.0;
                    dof.acceleration = 0.0;
                    dof.force = 0.0;
                }
                ActuatorType::Velocity => {
                    dof.acceleration = (dof.command - dof.velocity) / dt;
                    dof.velocity = dof.command;
                    dof.force = 0.0;
                }
                ActuatorType::Torque | ActuatorType::Servo | ActuatorType::Passive => {
                    dof.force = match actuator {
                        ActuatorType::Torque => dof.command,
                        ActuatorType::Servo => SERVO_GAIN * inertia * (dof.command - dof.velocity),
                        _ => 0.0,
                    }
                    .clamp(-dof.effort_limit, dof.effort_limit);

                    let friction = dof.coulomb_friction * dof.velocity.signum();
                    dof.acceleration = (dof.force - dof.damping * dof.velocity - friction) / inertia;
                    dof.velocity += dof.acceleration * dt;
                }
            }

            dof.position += dof.velocity * dt;

            if dof.position_enforced && (dof.position < dof.lower || dof.position > dof.upper) {
                dof.position = dof.position.clamp(dof.lower, dof.upper);
                dof.velocity = 0.0;
            }

            if !dof.position.is_finite() || !dof.velocity.is_finite() {
                return Err(EngineError::SimulationError(format!(
                    "non-finite state in dof '{}' of '{}'",
                    joint.name, self.name
                )));
            }
        }

        Ok(())
    }
}
