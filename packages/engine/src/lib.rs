// packages/engine/src/lib.rs
//! RoboSim Engine Library
//!
//! Runs many independent robot simulations in parallel while sharing a
//! small, hardware-limited set of GPU rendering contexts.
//!
//! # Architecture
//!
//! The engine is structured into several key modules:
//!
//! - **runtime**: context pool, simulation workers, coordinator
//! - **sim**: fixed-timestep world, robots, controllers, model loading
//! - **render**: offscreen rendering bound to a leased context
//! - **recording**: export of captured frames (PNG, frame sequences, raw video)
//! - **observability**: tracing and metrics setup
//! - **utils**: configuration and errors
//!
//! # Example
//!
//! ```no_run
//! use robosim_engine::runtime::{ContextPool, HeadlessBackend, RobotSource, WorkerConfig, WorkerCoordinator};
//! use robosim_engine::sim::Robot;
//! use std::sync::Arc;
//!
//! # fn main() -> robosim_engine::Result<()> {
//! let pool = Arc::new(ContextPool::new(Arc::new(HeadlessBackend::new())));
//! let coordinator = WorkerCoordinator::new(pool);
//! coordinator.configure_pool(4)?;
//!
//! let arm = Arc::new(Robot::serial_arm("arm", 7));
//! let summary = coordinator.run(15, |i| {
//!     WorkerConfig::new(i, RobotSource::Template(Arc::clone(&arm))).with_duration(1.0)
//! })?;
//! assert!(summary.all_succeeded());
//! # Ok(())
//! # }
//! ```

pub mod observability;
pub mod recording;
pub mod render;
pub mod runtime;
pub mod sim;
pub mod utils;

// Re-export commonly used types
pub use runtime::context_pool::{ContextLease, ContextPool, ContextPoolConfig};
pub use runtime::coordinator::{RunSummary, WorkerCoordinator};
pub use runtime::worker::{SimulationWorker, WorkerConfig, WorkerReport};
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, FailureKind, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
