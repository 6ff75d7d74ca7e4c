// packages/engine/src/sim/model.rs
//! Robot description loader
//!
//! Descriptions are YAML documents listing links and joints. Mesh
//! references may be relative to the description file or use
//! `package://<name>/<path>`, resolved against the loader's package search
//! paths. Every failure names the offending file.
//!
//! ```yaml
//! name: pendulum
//! fixed_base: true
//! links:
//!   - { name: base, mass: 2.0 }
//!   - { name: bob, mass: 1.0, mesh: "package://pendulum/bob.stl" }
//! joints:
//!   - name: swing
//!     type: revolute
//!     parent: base
//!     child: bob
//!     origin: [0.0, 0.0, -0.5]
//!     axis: [0.0, 1.0, 0.0]
//!     limits: { lower: -1.5, upper: 1.5, effort: 50.0 }
//! ```

use crate::sim::skeleton::{ActuatorType, Joint, JointKind, Link, Skeleton};
use crate::utils::errors::{EngineError, Result};
use nalgebra::Vector3;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

const PACKAGE_SCHEME: &str = "package://";

#[derive(Debug, Deserialize)]
struct RobotDescription {
    name: String,
    #[serde(default)]
    fixed_base: bool,
    links: Vec<LinkDescription>,
    #[serde(default)]
    joints: Vec<JointDescription>,
}

#[derive(Debug, Deserialize)]
struct LinkDescription {
    name: String,
    #[serde(default = "default_mass")]
    mass: f64,
    #[serde(default)]
    radius: Option<f64>,
    #[serde(default)]
    color: Option<[u8; 3]>,
    #[serde(default)]
    mesh: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JointDescription {
    name: String,
    #[serde(rename = "type")]
    kind: JointKind,
    #[serde(default)]
    parent: Option<String>,
    child: String,
    #[serde(default)]
    origin: [f64; 3],
    #[serde(default = "default_axis")]
    axis: [f64; 3],
    #[serde(default)]
    limits: Option<LimitsDescription>,
    #[serde(default)]
    damping: f64,
    #[serde(default)]
    friction: f64,
    #[serde(default = "default_actuator")]
    actuator: ActuatorType,
}

#[derive(Debug, Deserialize)]
struct LimitsDescription {
    lower: f64,
    upper: f64,
    #[serde(default)]
    effort: Option<f64>,
}

fn default_mass() -> f64 {
    1.0
}

fn default_axis() -> [f64; 3] {
    [0.0, 0.0, 1.0]
}

fn default_actuator() -> ActuatorType {
    ActuatorType::Torque
}

/// Loads robot descriptions into skeletons
#[derive(Debug, Clone, Default)]
pub struct ModelLoader {
    packages: Vec<(String, PathBuf)>,
}

impl ModelLoader {
    pub fn new(packages: Vec<(String, PathBuf)>) -> Self {
        Self { packages }
    }

    pub fn with_package(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.packages.push((name.into(), path.into()));
        self
    }

    /// Load a description file
    pub fn load(&self, path: &Path) -> Result<Skeleton> {
        debug!("Loading robot description {}", path.display());

        let text = std::fs::read_to_string(path).map_err(|e| EngineError::ModelLoadFailure {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        self.parse(&text, path, &base_dir)
    }

    /// Load a description held in memory; relative meshes resolve against `base_dir`
    pub fn load_str(&self, text: &str, base_dir: &Path) -> Result<Skeleton> {
        self.parse(text, Path::new("<string>"), base_dir)
    }

    fn parse(&self, text: &str, origin: &Path, base_dir: &Path) -> Result<Skeleton> {
        let fail = |reason: String| EngineError::ModelLoadFailure {
            path: origin.to_path_buf(),
            reason,
        };

        let description: RobotDescription =
            serde_yaml::from_str(text).map_err(|e| fail(e.to_string()))?;

        if description.links.is_empty() {
            return Err(fail("description has no links".to_string()));
        }

        let mut skeleton = Skeleton::new(description.name.clone());
        skeleton.fixed_base = description.fixed_base;

        for link in &description.links {
            if skeleton.link_index(&link.name).is_some() {
                return Err(fail(format!("duplicate link '{}'", link.name)));
            }
            if link.mass <= 0.0 || !link.mass.is_finite() {
                return Err(fail(format!("link '{}' must have positive mass", link.name)));
            }

            let mut built = Link::new(link.name.clone(), link.mass);
            if let Some(radius) = link.radius {
                built = built.with_radius(radius);
            }
            if let Some(color) = link.color {
                built = built.with_color(color);
            }
            if let Some(mesh) = &link.mesh {
                built.mesh = Some(self.resolve_mesh(mesh, base_dir).map_err(fail)?);
            }
            skeleton.add_link(built);
        }

        let mut attached: HashSet<usize> = HashSet::new();
        for joint in &description.joints {
            if skeleton.joint_index(&joint.name).is_some() {
                return Err(fail(format!("duplicate joint '{}'", joint.name)));
            }

            let child = skeleton
                .link_index(&joint.child)
                .ok_or_else(|| fail(format!("joint '{}' references unknown link '{}'", joint.name, joint.child)))?;
            if !attached.insert(child) {
                return Err(fail(format!("link '{}' has more than one parent joint", joint.child)));
            }

            let parent = match &joint.parent {
                Some(name) => {
                    let parent = skeleton
                        .link_index(name)
                        .ok_or_else(|| fail(format!("joint '{}' references unknown link '{}'", joint.name, name)))?;
                    // parents first: the parent is a root or was attached by an earlier joint
                    let parent_is_root = !description.joints.iter().any(|j| j.child == *name);
                    if !parent_is_root && !attached.contains(&parent) {
                        return Err(fail(format!(
                            "joint '{}' attaches to link '{}' before that link is attached",
                            joint.name, name
                        )));
                    }
                    Some(parent)
                }
                None => None,
            };

            let axis = Vector3::from(joint.axis);
            if joint.kind != JointKind::Fixed && axis.norm() < 1e-9 {
                return Err(fail(format!("joint '{}' has a zero axis", joint.name)));
            }

            let mut built = Joint::new(
                joint.name.clone(),
                joint.kind,
                parent,
                child,
                Vector3::from(joint.origin),
                if axis.norm() < 1e-9 { Vector3::z() } else { axis },
            );
            built.actuator = joint.actuator;

            if let Some(dof) = built.dof.as_mut() {
                dof.damping = joint.damping;
                dof.coulomb_friction = joint.friction;
                if let Some(limits) = &joint.limits {
                    if limits.lower > limits.upper {
                        return Err(fail(format!(
                            "joint '{}' has lower limit {} above upper limit {}",
                            joint.name, limits.lower, limits.upper
                        )));
                    }
                    dof.lower = limits.lower;
                    dof.upper = limits.upper;
                    if let Some(effort) = limits.effort {
                        dof.effort_limit = effort.abs();
                    }
                }
            }

            skeleton.add_joint(built);
        }

        debug!(
            "Loaded '{}': {} links, {} joints, {} dofs",
            skeleton.name,
            skeleton.num_links(),
            skeleton.num_joints(),
            skeleton.num_dofs()
        );

        Ok(skeleton)
    }

    fn resolve_mesh(&self, mesh: &str, base_dir: &Path) -> std::result::Result<PathBuf, String> {
        let candidate = match mesh.strip_prefix(PACKAGE_SCHEME) {
            Some(rest) => {
                let (package, relative) = rest
                    .split_once('/')
                    .ok_or_else(|| format!("malformed package URI '{}'", mesh))?;
                let root = self
                    .packages
                    .iter()
                    .find(|(name, _)| name == package)
                    .map(|(_, path)| path)
                    .ok_or_else(|| format!("unknown package '{}' in '{}'", package, mesh))?;
                root.join(relative)
            }
            None => base_dir.join(mesh),
        };

        if candidate.exists() {
            Ok(candidate)
        } else {
            Err(format!("mesh '{}' not found at {}", mesh, candidate.display()))
        }
    }
}
