// packages/engine/src/sim/mod.rs
//! Physics world and robot models
//!
//! A deterministic stand-in for the external physics engine. Each worker
//! owns its own [`World`] and robot clones; nothing in here is shared
//! between threads.
//!
//! - **skeleton**: Links, single-DoF joints, forward kinematics, integration
//! - **robot**: Named robot wrapping a skeleton plus weighted controllers
//! - **control**: PD and constant-command controllers
//! - **world**: Fixed-timestep stepping of every robot
//! - **model**: Robot description loader with package search paths

pub mod control;
pub mod model;
pub mod robot;
pub mod skeleton;
pub mod world;

pub use control::{PdControl, RobotControl, SimpleControl};
pub use model::ModelLoader;
pub use robot::Robot;
pub use skeleton::{ActuatorType, Dof, Joint, JointKind, Link, Skeleton};
pub use world::World;
