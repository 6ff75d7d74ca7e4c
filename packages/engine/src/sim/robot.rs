// packages/engine/src/sim/robot.rs
//! Robot: a named skeleton with weighted controllers

use crate::sim::control::RobotControl;
use crate::sim::model::ModelLoader;
use crate::sim::skeleton::{ActuatorType, Dof, Joint, JointKind, Link, Skeleton};
use crate::utils::errors::{EngineError, Result};
use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A robot instance owned by exactly one simulation world
///
/// `Clone` is a deep copy: skeleton state and controllers are duplicated,
/// so a template robot can be cloned into every worker.
#[derive(Debug, Clone)]
pub struct Robot {
    name: String,
    skeleton: Skeleton,
    controllers: Vec<Box<dyn RobotControl>>,
    cast_shadows: bool,
}

impl Robot {
    pub fn new(name: impl Into<String>, skeleton: Skeleton) -> Self {
        Self {
            name: name.into(),
            skeleton,
            controllers: Vec::new(),
            cast_shadows: true,
        }
    }

    /// Load a robot description, resolving meshes against `packages`
    pub fn from_file(path: impl AsRef<Path>, packages: &[(String, PathBuf)]) -> Result<Self> {
        let skeleton = ModelLoader::new(packages.to_vec()).load(path.as_ref())?;
        let name = skeleton.name.clone();
        Ok(Self::new(name, skeleton))
    }

    /// Fixed-base serial arm with `dofs` revolute joints
    pub fn serial_arm(name: impl Into<String>, dofs: usize) -> Self {
        let name = name.into();
        let mut skeleton = Skeleton::serial_chain(name.clone(), dofs, 0.3);
        skeleton.fixed_base = true;
        Self::new(name, skeleton)
    }

    /// Free-floating box body
    pub fn create_box(name: impl Into<String>, size: f64, mass: f64, color: [u8; 3]) -> Self {
        let name = name.into();
        let mut skeleton = Skeleton::new(name.clone());
        skeleton.add_link(
            Link::new(format!("{}_body", name), mass)
                .with_color(color)
                .with_radius(size / 2.0),
        );
        Self::new(name, skeleton)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn skeleton(&self) -> &Skeleton {
        &self.skeleton
    }

    pub fn skeleton_mut(&mut self) -> &mut Skeleton {
        &mut self.skeleton
    }

    pub fn num_dofs(&self) -> usize {
        self.skeleton.num_dofs()
    }

    pub fn dof_names(&self) -> Vec<String> {
        self.skeleton.dof_names()
    }

    pub fn fix_to_world(&mut self) {
        self.skeleton.fixed_base = true;
    }

    /// Release the base and place it at `pose`
    pub fn free_from_world(&mut self, pose: Isometry3<f64>) {
        self.skeleton.fixed_base = false;
        self.skeleton.base = pose;
    }

    pub fn fixed(&self) -> bool {
        self.skeleton.fixed_base
    }

    pub fn base_pose(&self) -> Isometry3<f64> {
        self.skeleton.base
    }

    pub fn set_base_position(&mut self, position: Vector3<f64>) {
        self.skeleton.base =
            Isometry3::from_parts(Translation3::from(position), UnitQuaternion::identity());
    }

    pub fn cast_shadows(&self) -> bool {
        self.cast_shadows
    }

    pub fn set_cast_shadows(&mut self, cast_shadows: bool) {
        self.cast_shadows = cast_shadows;
    }

    /// Indices (among DoFs) selected by `names`, or all DoFs when empty
    fn select(&self, names: &[&str]) -> Result<Vec<usize>> {
        if names.is_empty() {
            return Ok((0..self.num_dofs()).collect());
        }
        names
            .iter()
            .map(|name| {
                self.skeleton.dof_index(name).ok_or_else(|| {
                    EngineError::SimulationError(format!("robot '{}' has no dof '{}'", self.name, name))
                })
            })
            .collect()
    }

    fn read(&self, names: &[&str], field: impl Fn(&Dof) -> f64) -> Result<Vec<f64>> {
        let dofs: Vec<_> = self.skeleton.dofs().collect();
        Ok(self.select(names)?.into_iter().map(|i| field(dofs[i])).collect())
    }

    fn write(&mut self, values: &[f64], names: &[&str], field: impl Fn(&mut Dof, f64)) -> Result<()> {
        let indices = self.select(names)?;
        if indices.len() != values.len() {
            return Err(EngineError::SimulationError(format!(
                "expected {} values for robot '{}', got {}",
                indices.len(),
                self.name,
                values.len()
            )));
        }
        let mut dofs: Vec<_> = self.skeleton.dofs_mut().collect();
        for (i, value) in indices.into_iter().zip(values) {
            field(&mut *dofs[i], *value);
        }
        Ok(())
    }

    pub fn positions(&self, names: &[&str]) -> Result<Vec<f64>> {
        self.read(names, |d| d.position)
    }

    pub fn set_positions(&mut self, values: &[f64], names: &[&str]) -> Result<()> {
        self.write(values, names, |d, v| d.position = v)
    }

    pub fn velocities(&self, names: &[&str]) -> Result<Vec<f64>> {
        self.read(names, |d| d.velocity)
    }

    pub fn set_velocities(&mut self, values: &[f64], names: &[&str]) -> Result<()> {
        self.write(values, names, |d, v| d.velocity = v)
    }

    pub fn accelerations(&self, names: &[&str]) -> Result<Vec<f64>> {
        self.read(names, |d| d.acceleration)
    }

    pub fn forces(&self, names: &[&str]) -> Result<Vec<f64>> {
        self.read(names, |d| d.force)
    }

    pub fn set_forces(&mut self, values: &[f64], names: &[&str]) -> Result<()> {
        self.write(values, names, |d, v| d.force = v)
    }

    pub fn commands(&self, names: &[&str]) -> Result<Vec<f64>> {
        self.read(names, |d| d.command)
    }

    pub fn set_commands(&mut self, values: &[f64], names: &[&str]) -> Result<()> {
        self.write(values, names, |d, v| d.command = v)
    }

    pub fn set_position_enforced(&mut self, enforced: bool) {
        for dof in self.skeleton.dofs_mut() {
            dof.position_enforced = enforced;
        }
    }

    pub fn position_enforced(&self) -> Vec<bool> {
        self.skeleton.dofs().map(|d| d.position_enforced).collect()
    }

    pub fn set_damping_coeffs(&mut self, damping: f64) {
        for dof in self.skeleton.dofs_mut() {
            dof.damping = damping;
        }
    }

    pub fn damping_coeffs(&self) -> Vec<f64> {
        self.skeleton.dofs().map(|d| d.damping).collect()
    }

    pub fn set_coulomb_friction_coeffs(&mut self, friction: f64) {
        for dof in self.skeleton.dofs_mut() {
            dof.coulomb_friction = friction;
        }
    }

    /// Set the actuator type of the named joints, or every joint when empty
    pub fn set_actuator_types(&mut self, actuator: ActuatorType, joint_names: &[&str]) -> Result<()> {
        for joint in self.joints_named(joint_names)? {
            joint.actuator = actuator;
        }
        self.reinit_controllers();
        Ok(())
    }

    pub fn actuator_types(&self) -> Vec<ActuatorType> {
        self.skeleton.joints.iter().map(|j| j.actuator).collect()
    }

    fn joints_named(&mut self, names: &[&str]) -> Result<Vec<&mut Joint>> {
        if let Some(missing) = names.iter().find(|n| self.skeleton.joint_index(n).is_none()) {
            return Err(EngineError::SimulationError(format!(
                "robot '{}' has no joint '{}'",
                self.name, missing
            )));
        }
        Ok(self
            .skeleton
            .joints
            .iter_mut()
            .filter(|j| j.kind != JointKind::Fixed)
            .filter(|j| names.is_empty() || names.contains(&j.name.as_str()))
            .collect())
    }

    pub fn add_controller(&mut self, mut controller: Box<dyn RobotControl>, weight: f64) {
        controller.set_weight(weight);
        controller.init(&self.skeleton);
        debug!(
            "Robot '{}' controller added (active: {}, weight: {})",
            self.name,
            controller.active(),
            weight
        );
        self.controllers.push(controller);
    }

    pub fn remove_controller(&mut self, index: usize) -> Option<Box<dyn RobotControl>> {
        (index < self.controllers.len()).then(|| self.controllers.remove(index))
    }

    pub fn clear_controllers(&mut self) {
        self.controllers.clear();
    }

    pub fn num_controllers(&self) -> usize {
        self.controllers.len()
    }

    pub fn controller(&self, index: usize) -> Option<&dyn RobotControl> {
        self.controllers.get(index).map(|c| c.as_ref())
    }

    pub fn controller_mut(&mut self, index: usize) -> Option<&mut Box<dyn RobotControl>> {
        self.controllers.get_mut(index)
    }

    pub fn active_controllers(&self) -> usize {
        self.controllers.iter().filter(|c| c.active()).count()
    }

    pub fn reinit_controllers(&mut self) {
        for controller in &mut self.controllers {
            controller.init(&self.skeleton);
        }
    }

    /// Blend active controllers' commands by weight into the DoF commands
    pub fn update(&mut self, t: f64) {
        if self.controllers.is_empty() {
            return;
        }

        let mut blended = vec![0.0; self.skeleton.num_controllable_dofs()];
        for controller in self.controllers.iter_mut().filter(|c| c.active()) {
            let weight = controller.weight();
            for (total, command) in blended.iter_mut().zip(controller.commands(&self.skeleton, t)) {
                *total += weight * command;
            }
        }

        let controllable = self
            .skeleton
            .joints
            .iter_mut()
            .filter(|j| j.actuator.is_controllable())
            .filter_map(|j| j.dof.as_mut());
        for (dof, command) in controllable.zip(blended) {
            dof.command = command;
        }
    }
}
