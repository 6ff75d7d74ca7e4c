// packages/engine/src/utils/config.rs
//! Engine configuration
//!
//! Settings are layered, last source wins:
//!
//! 1. Built-in defaults
//! 2. Optional `robosim.{toml,yaml,json}` file (or the path in `ROBOSIM_CONFIG`)
//! 3. Environment variables, e.g. `ROBOSIM_POOL__MAX_CONTEXTS=8`

use crate::recording::exporter::ExportFormat;
use crate::runtime::acquire_policy::AcquirePolicy;
use crate::utils::errors::{EngineError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pool: PoolSettings,
    pub simulation: SimulationSettings,
    pub render: RenderSettings,
    pub output: OutputSettings,
    pub workers: WorkerSettings,
    pub logging: LoggingSettings,
    pub model: ModelSettings,
}

/// Rendering-context pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Number of GPU contexts created on first acquire (default: 4)
    pub max_contexts: usize,

    /// Sleep between polls when no slot is free (default: 1ms)
    pub backoff_ms: u64,

    /// Give up acquiring after this long (default: wait forever)
    pub acquire_timeout_ms: Option<u64>,

    /// Maximum activation attempts per acquire (default: unbounded)
    pub activation_attempts: Option<u32>,

    /// Keep a per-slot lease history for auditing
    pub record_history: bool,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_contexts: 4,
            backoff_ms: 1,
            acquire_timeout_ms: None,
            activation_attempts: None,
            record_history: false,
        }
    }
}

impl PoolSettings {
    /// Acquire policy described by these settings
    pub fn acquire_policy(&self) -> AcquirePolicy {
        AcquirePolicy {
            backoff: Duration::from_millis(self.backoff_ms),
            timeout: self.acquire_timeout_ms.map(Duration::from_millis),
            max_activation_attempts: self.activation_attempts,
        }
    }
}

/// Physics stepping settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Fixed physics timestep in seconds (default: 1ms)
    pub timestep: f64,

    /// Simulated seconds per worker (default: 6s)
    pub duration_secs: f64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            timestep: 0.001,
            duration_secs: 6.0,
        }
    }
}

/// Offscreen rendering settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub enabled: bool,
    pub width: u32,
    pub height: u32,

    /// Capture rate in frames per simulated second
    pub fps: u32,

    /// Accumulate colour frames for export
    pub recording: bool,

    /// Accumulate depth frames as well
    pub depth_recording: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            width: 1024,
            height: 768,
            fps: 30,
            recording: true,
            depth_recording: false,
        }
    }
}

/// Artifact output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub directory: PathBuf,

    /// Artifacts are named `{base_name}_{worker_index}`
    pub base_name: String,

    pub format: ExportFormat,

    /// Write `summary_{run_id}.json` next to the artifacts
    pub write_summary: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("output"),
            base_name: "camera".to_string(),
            format: ExportFormat::Png,
            write_summary: true,
        }
    }
}

/// Worker fleet settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub count: usize,
    pub thread_name_prefix: String,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            count: 15,
            thread_name_prefix: "sim-worker".to_string(),
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Robot model settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Robot description file; a built-in arm is used when unset
    pub path: Option<PathBuf>,

    /// Package search paths for `package://` mesh URIs
    pub packages: Vec<PackagePath>,
}

/// One `package://name` search path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackagePath {
    pub name: String,
    pub path: PathBuf,
}

impl EngineConfig {
    /// Load configuration from the default file name and the environment
    pub fn load() -> Result<Self> {
        let name = std::env::var("ROBOSIM_CONFIG").unwrap_or_else(|_| "robosim".to_string());
        Self::load_from(&name)
    }

    /// Load configuration from a specific file (extension optional)
    pub fn load_from(name: &str) -> Result<Self> {
        debug!("Loading configuration from {}", name);

        let settings = Config::builder()
            .add_source(File::with_name(name).required(false))
            .add_source(
                Environment::with_prefix("ROBOSIM")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: EngineConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.pool.max_contexts == 0 {
            return Err(EngineError::InvalidConfig(
                "pool.max_contexts must be at least 1".to_string(),
            ));
        }

        if self.simulation.timestep <= 0.0 || !self.simulation.timestep.is_finite() {
            return Err(EngineError::InvalidConfig(format!(
                "simulation.timestep must be positive, got {}",
                self.simulation.timestep
            )));
        }

        if self.simulation.duration_secs < 0.0 {
            return Err(EngineError::InvalidConfig(
                "simulation.duration_secs cannot be negative".to_string(),
            ));
        }

        if self.render.width == 0 || self.render.height == 0 {
            return Err(EngineError::InvalidConfig(
                "render dimensions must be non-zero".to_string(),
            ));
        }

        if self.render.fps == 0 {
            return Err(EngineError::InvalidConfig("render.fps cannot be 0".to_string()));
        }

        if self.output.base_name.trim().is_empty() {
            return Err(EngineError::InvalidConfig(
                "output.base_name cannot be empty".to_string(),
            ));
        }

        self.pool.acquire_policy().validate()
    }
}
