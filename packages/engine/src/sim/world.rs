// packages/engine/src/sim/world.rs
//! Fixed-timestep simulation world

use crate::sim::robot::Robot;
use crate::utils::errors::{EngineError, Result};
use tracing::trace;

/// A set of robots advanced together with a fixed timestep
///
/// Stepping is deterministic: identical robots and commands produce
/// identical trajectories.
#[derive(Debug, Clone)]
pub struct World {
    dt: f64,
    time: f64,
    steps: u64,
    robots: Vec<Robot>,
}

impl World {
    pub fn new(dt: f64) -> Result<Self> {
        if dt <= 0.0 || !dt.is_finite() {
            return Err(EngineError::InvalidConfig(format!(
                "timestep must be positive, got {}",
                dt
            )));
        }

        Ok(Self {
            dt,
            time: 0.0,
            steps: 0,
            robots: Vec::new(),
        })
    }

    pub fn timestep(&self) -> f64 {
        self.dt
    }

    /// Simulated seconds elapsed
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn add_robot(&mut self, robot: Robot) -> usize {
        self.robots.push(robot);
        self.robots.len() - 1
    }

    pub fn robots(&self) -> &[Robot] {
        &self.robots
    }

    pub fn robot(&self, index: usize) -> Option<&Robot> {
        self.robots.get(index)
    }

    pub fn robot_mut(&mut self, index: usize) -> Option<&mut Robot> {
        self.robots.get_mut(index)
    }

    /// Number of steps covering `duration` simulated seconds (rounded)
    pub fn steps_for(&self, duration: f64) -> u64 {
        (duration / self.dt).round().max(0.0) as u64
    }

    /// Advance every robot by one timestep
    pub fn advance(&mut self) -> Result<()> {
        for robot in &mut self.robots {
            robot.update(self.time);
            robot.skeleton_mut().integrate(self.dt)?;
        }

        self.steps += 1;
        self.time = self.steps as f64 * self.dt;
        trace!("World advanced to t={:.4}s (step {})", self.time, self.steps);
        Ok(())
    }

    /// Advance `n` steps
    pub fn run_steps(&mut self, n: u64) -> Result<()> {
        for _ in 0..n {
            self.advance()?;
        }
        Ok(())
    }

    /// Advance for `duration` simulated seconds
    pub fn run(&mut self, duration: f64) -> Result<()> {
        self.run_steps(self.steps_for(duration))
    }
}
