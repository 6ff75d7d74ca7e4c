// packages/engine/src/sim/control.rs
//! Robot controllers
//!
//! A controller turns robot state into one command per controllable DoF.
//! It stays inactive until it has parameters matching the robot's
//! controllable DoF count and has been initialised against that robot.

use crate::sim::skeleton::Skeleton;
use std::fmt;

/// Controller attached to a [`Robot`](crate::sim::Robot)
pub trait RobotControl: Send + Sync + fmt::Debug {
    fn parameters(&self) -> &[f64];

    /// Replace parameters; the controller must be re-initialised
    fn set_parameters(&mut self, parameters: Vec<f64>);

    /// Activate against `skeleton` if the parameters fit it
    fn init(&mut self, skeleton: &Skeleton);

    fn active(&self) -> bool;

    fn weight(&self) -> f64;

    fn set_weight(&mut self, weight: f64);

    /// Commands for the controllable DoFs at simulated time `t`
    fn commands(&mut self, skeleton: &Skeleton, t: f64) -> Vec<f64>;

    fn clone_box(&self) -> Box<dyn RobotControl>;
}

impl Clone for Box<dyn RobotControl> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

#[derive(Debug, Clone)]
struct ControlState {
    parameters: Vec<f64>,
    weight: f64,
    active: bool,
}

impl ControlState {
    fn new(parameters: Vec<f64>) -> Self {
        Self {
            parameters,
            weight: 1.0,
            active: false,
        }
    }

    fn init(&mut self, skeleton: &Skeleton) {
        let dofs = skeleton.num_controllable_dofs();
        self.active = !self.parameters.is_empty() && self.parameters.len() == dofs;
    }
}

fn controllable_positions(skeleton: &Skeleton) -> Vec<(f64, f64)> {
    skeleton
        .joints
        .iter()
        .filter(|j| j.actuator.is_controllable())
        .filter_map(|j| j.dof.as_ref())
        .map(|d| (d.position, d.velocity))
        .collect()
}

/// Proportional-derivative control towards target positions
#[derive(Debug, Clone)]
pub struct PdControl {
    state: ControlState,
    kp: f64,
    kd: f64,
}

impl PdControl {
    /// Inactive controller with no targets
    pub fn new() -> Self {
        Self::with_targets(Vec::new())
    }

    pub fn with_targets(targets: Vec<f64>) -> Self {
        Self {
            state: ControlState::new(targets),
            kp: 10.0,
            kd: 0.1,
        }
    }

    pub fn set_pd(&mut self, kp: f64, kd: f64) {
        self.kp = kp;
        self.kd = kd;
    }

    pub fn pd(&self) -> (f64, f64) {
        (self.kp, self.kd)
    }
}

impl Default for PdControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RobotControl for PdControl {
    fn parameters(&self) -> &[f64] {
        &self.state.parameters
    }

    fn set_parameters(&mut self, parameters: Vec<f64>) {
        self.state.parameters = parameters;
        self.state.active = false;
    }

    fn init(&mut self, skeleton: &Skeleton) {
        self.state.init(skeleton);
    }

    fn active(&self) -> bool {
        self.state.active
    }

    fn weight(&self) -> f64 {
        self.state.weight
    }

    fn set_weight(&mut self, weight: f64) {
        self.state.weight = weight;
    }

    fn commands(&mut self, skeleton: &Skeleton, _t: f64) -> Vec<f64> {
        controllable_positions(skeleton)
            .into_iter()
            .zip(&self.state.parameters)
            .map(|((q, dq), target)| self.kp * (target - q) - self.kd * dq)
            .collect()
    }

    fn clone_box(&self) -> Box<dyn RobotControl> {
        Box::new(self.clone())
    }
}

/// Constant commands
#[derive(Debug, Clone)]
pub struct SimpleControl {
    state: ControlState,
}

impl SimpleControl {
    pub fn new() -> Self {
        Self::with_commands(Vec::new())
    }

    pub fn with_commands(commands: Vec<f64>) -> Self {
        Self {
            state: ControlState::new(commands),
        }
    }
}

impl Default for SimpleControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RobotControl for SimpleControl {
    fn parameters(&self) -> &[f64] {
        &self.state.parameters
    }

    fn set_parameters(&mut self, parameters: Vec<f64>) {
        self.state.parameters = parameters;
        self.state.active = false;
    }

    fn init(&mut self, skeleton: &Skeleton) {
        self.state.init(skeleton);
    }

    fn active(&self) -> bool {
        self.state.active
    }

    fn weight(&self) -> f64 {
        self.state.weight
    }

    fn set_weight(&mut self, weight: f64) {
        self.state.weight = weight;
    }

    fn commands(&mut self, _skeleton: &Skeleton, _t: f64) -> Vec<f64> {
        self.state.parameters.clone()
    }

    fn clone_box(&self) -> Box<dyn RobotControl> {
        Box::new(self.clone())
    }
}
