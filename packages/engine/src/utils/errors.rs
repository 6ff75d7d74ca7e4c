// packages/engine/src/utils/errors.rs
//! Engine error types
//!
//! Every fallible operation in the engine returns [`Result`]. Errors are
//! classified into a small set of [`FailureKind`]s so the coordinator can
//! report, per worker, exactly which class of failure ended it.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result alias used across the engine
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors produced by the context pool, workers and their collaborators
#[derive(Debug, Error)]
pub enum EngineError {
    /// No slot became free before the acquire deadline
    #[error("no rendering context became available within {waited:?} (pool capacity {capacity})")]
    ResourceExhaustion { waited: Duration, capacity: usize },

    /// Release of a handle that is not checked out by the caller
    #[error("invalid release of context slot {slot}: {reason}")]
    InvalidRelease { slot: usize, reason: String },

    /// Making a context current on the calling thread kept failing
    #[error("activation of context slot {slot} failed after {attempts} attempts: {reason}")]
    ActivationFailure {
        slot: usize,
        attempts: u32,
        reason: String,
    },

    /// Robot description could not be turned into a skeleton
    #[error("failed to load model {}: {reason}", path.display())]
    ModelLoadFailure { path: PathBuf, reason: String },

    /// Frame capture failed
    #[error("render failure: {0}")]
    RenderFailure(String),

    /// Captured frames could not be persisted
    #[error("export failed: {0}")]
    ExportFailed(String),

    /// A rendering call was issued without the context being current here
    #[error("context slot {slot} is not current on thread {thread}")]
    ContextNotCurrent { slot: usize, thread: String },

    /// A context was handed back while GPU-side objects were still alive
    #[error("context slot {slot} released with {live} live GPU resources")]
    DirtyContext { slot: usize, live: usize },

    /// `configure` was called after the slots were created
    #[error("context pool already populated with {realized} slots; refusing to resize to {requested}")]
    PoolAlreadyPopulated { realized: usize, requested: usize },

    /// The pool's bounded-usage invariant no longer holds
    #[error("context pool invariant violated: {0}")]
    PoolInvariant(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("simulation error: {0}")]
    SimulationError(String),

    #[error("worker {index} panicked: {message}")]
    WorkerPanicked { index: usize, message: String },

    #[error("observability setup failed: {0}")]
    Observability(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Coarse classification of an [`EngineError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ResourceExhaustion,
    InvalidRelease,
    ActivationFailure,
    ModelLoadFailure,
    RenderFailure,
    Simulation,
    Panic,
    Configuration,
    Internal,
}

impl EngineError {
    /// Classify this error for per-worker reporting
    pub fn kind(&self) -> FailureKind {
        match self {
            EngineError::ResourceExhaustion { .. } => FailureKind::ResourceExhaustion,
            EngineError::InvalidRelease { .. }
            | EngineError::DirtyContext { .. }
            | EngineError::PoolInvariant(_) => FailureKind::InvalidRelease,
            EngineError::ActivationFailure { .. } => FailureKind::ActivationFailure,
            EngineError::ModelLoadFailure { .. } => FailureKind::ModelLoadFailure,
            EngineError::RenderFailure(_)
            | EngineError::ExportFailed(_)
            | EngineError::ContextNotCurrent { .. } => FailureKind::RenderFailure,
            EngineError::SimulationError(_) => FailureKind::Simulation,
            EngineError::WorkerPanicked { .. } => FailureKind::Panic,
            EngineError::PoolAlreadyPopulated { .. }
            | EngineError::InvalidConfig(_)
            | EngineError::Config(_) => FailureKind::Configuration,
            EngineError::Observability(_) | EngineError::Io(_) => FailureKind::Internal,
        }
    }

    /// Whether this error means the pool's accounting can no longer be trusted
    pub fn is_pool_invariant_violation(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidRelease { .. } | EngineError::PoolInvariant(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let err = EngineError::ResourceExhaustion {
            waited: Duration::from_millis(5),
            capacity: 2,
        };
        assert_eq!(err.kind(), FailureKind::ResourceExhaustion);

        let err = EngineError::ExportFailed("disk full".into());
        assert_eq!(err.kind(), FailureKind::RenderFailure);

        let err = EngineError::ModelLoadFailure {
            path: PathBuf::from("missing.yaml"),
            reason: "not found".into(),
        };
        assert_eq!(err.kind(), FailureKind::ModelLoadFailure);
        assert!(err.to_string().contains("missing.yaml"));
    }

    #[test]
    fn test_invariant_violations() {
        let err = EngineError::InvalidRelease {
            slot: 1,
            reason: "slot is free".into(),
        };
        assert!(err.is_pool_invariant_violation());
        assert!(!EngineError::RenderFailure("x".into()).is_pool_invariant_violation());
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::ModelLoadFailure).unwrap();
        assert_eq!(json, "\"model_load_failure\"");
    }
}
