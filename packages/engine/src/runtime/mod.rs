// packages/engine/src/runtime/mod.rs
//! Parallel simulation runtime
//!
//! This module provides the concurrency core:
//!
//! - **Context Pool**: bounded set of GPU rendering contexts cycled between workers
//! - **Acquire Policy**: backoff, timeout and activation-retry limits
//! - **Backend**: the seam to native contexts, plus a headless software backend
//! - **Worker**: one simulate-and-render episode per thread
//! - **Monitor**: live per-phase worker counts
//! - **Coordinator**: fan-out / fan-in of workers
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 Context Pool (M slots)                  │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐              │
//! │  │ Context  │  │ Context  │  │ Context  │  ...         │
//! │  │ slot 0   │  │ slot 1   │  │ slot 2   │              │
//! │  └──────────┘  └──────────┘  └──────────┘              │
//! │         ▲            ▲            ▲                     │
//! │         │  acquire (poll + backoff) / release           │
//! │         └────────────┴────────────┘                     │
//! │                      │                                  │
//! │            N worker threads (N ≥ M)                     │
//! │                      │                                  │
//! │              Worker Coordinator                         │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod acquire_policy;
pub mod backend;
pub mod context_pool;
pub mod coordinator;
pub mod headless;
pub mod monitor;
pub mod worker;

// Re-export commonly used types
pub use acquire_policy::AcquirePolicy;
pub use backend::{ContextBackend, GpuResource, GpuResourceKind, RenderContext};
pub use context_pool::{
    ContextHandle, ContextLease, ContextPool, ContextPoolConfig, LeaseRecord, PoolStats,
};
pub use coordinator::{RunSummary, WorkerCoordinator};
pub use headless::{HeadlessBackend, HeadlessConfig};
pub use monitor::{PhaseMonitor, WorkerPhase};
pub use worker::{
    CameraPlacement, RenderRequest, RobotSource, RunLength, SimulationWorker, WorkerConfig,
    WorkerFailure, WorkerOutcome, WorkerReport,
};
