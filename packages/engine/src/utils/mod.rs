// packages/engine/src/utils/mod.rs
//! Common utilities shared by every engine module
//!
//! - **config**: Layered engine configuration (defaults, file, environment)
//! - **errors**: Crate-wide error type and failure classification

pub mod config;
pub mod errors;

pub use config::EngineConfig;
pub use errors::{EngineError, FailureKind, Result};
