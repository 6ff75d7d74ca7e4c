// packages/engine/src/runtime/worker.rs
//! One simulate-and-render episode on its own thread
//!
//! Protocol:
//!
//! ```text
//! Acquire ─▶ Build ─▶ Run ─▶ Export ─▶ Teardown ─▶ Release ─▶ Done
//!              │        │       │          ▲
//!              └────────┴───────┴─ error ──┘ (session dropped, then released)
//! ```
//!
//! Whatever happens between Acquire and Release, the context goes back to
//! the pool: failures return early through the session's drop (teardown)
//! and reach the explicit release; a panic unwinds through the lease guard.

use crate::recording::exporter::Exporter;
use crate::render::session::{capture_cadence, RenderOptions, RenderSession};
use crate::runtime::acquire_policy::AcquirePolicy;
use crate::runtime::context_pool::{ContextLease, ContextPool};
use crate::runtime::monitor::{PhaseMonitor, WorkerPhase};
use crate::sim::robot::Robot;
use crate::sim::world::World;
use crate::utils::errors::{EngineError, FailureKind, Result};
use nalgebra::Vector3;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Where a worker gets its robot from
#[derive(Clone)]
pub enum RobotSource {
    /// Deep-copy a shared template
    Template(Arc<Robot>),

    /// Load a description file
    Model {
        path: PathBuf,
        packages: Vec<(String, PathBuf)>,
    },
}

impl fmt::Debug for RobotSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RobotSource::Template(robot) => write!(f, "Template({})", robot.name()),
            RobotSource::Model { path, .. } => write!(f, "Model({})", path.display()),
        }
    }
}

/// How long a worker simulates
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RunLength {
    Steps(u64),

    /// Simulated seconds, rounded to whole steps
    Duration(f64),
}

/// Per-worker robot customisation run during Build
pub type SetupHook = Arc<dyn Fn(&mut Robot) -> Result<()> + Send + Sync>;

/// Camera placement
#[derive(Debug, Clone, PartialEq)]
pub struct CameraPlacement {
    pub eye: Vector3<f64>,
    pub target: Vector3<f64>,
    pub up: Vector3<f64>,
}

impl Default for CameraPlacement {
    fn default() -> Self {
        Self {
            eye: Vector3::new(0.0, 3.5, 2.0),
            target: Vector3::new(0.0, 0.0, 0.25),
            up: Vector3::z(),
        }
    }
}

/// Rendering requested by a worker
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub width: u32,
    pub height: u32,
    pub camera: CameraPlacement,
    pub options: RenderOptions,

    /// Steps between captured frames; derived from `options.fps` when unset
    pub cadence: Option<u64>,
}

impl RenderRequest {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            camera: CameraPlacement::default(),
            options: RenderOptions::default(),
            cadence: None,
        }
    }

    pub fn with_camera(mut self, eye: Vector3<f64>, target: Vector3<f64>) -> Self {
        self.camera.eye = eye;
        self.camera.target = target;
        self
    }

    pub fn with_recording(mut self, enabled: bool, depth_enabled: bool) -> Self {
        self.options.recording = enabled;
        self.options.depth_recording = depth_enabled;
        self
    }

    pub fn with_cadence(mut self, steps: u64) -> Self {
        self.cadence = Some(steps.max(1));
        self
    }

    /// Steps between captured frames; never zero
    pub fn cadence_for(&self, timestep: f64) -> u64 {
        self.cadence
            .map(|steps| steps.max(1))
            .unwrap_or_else(|| capture_cadence(timestep, self.options.fps))
    }
}

/// Artifact destination
#[derive(Debug, Clone)]
pub struct OutputRequest {
    pub exporter: Exporter,
    pub base_name: String,
}

/// Everything one worker needs
#[derive(Clone)]
pub struct WorkerConfig {
    pub index: usize,
    pub robot: RobotSource,
    pub setup: Option<SetupHook>,
    pub timestep: f64,
    pub run_length: RunLength,
    pub render: Option<RenderRequest>,
    pub output: Option<OutputRequest>,

    /// Overrides the pool's policy for this worker
    pub acquire_policy: Option<AcquirePolicy>,
}

impl WorkerConfig {
    pub fn new(index: usize, robot: RobotSource) -> Self {
        Self {
            index,
            robot,
            setup: None,
            timestep: 0.001,
            run_length: RunLength::Duration(6.0),
            render: None,
            output: None,
            acquire_policy: None,
        }
    }

    pub fn with_setup<F>(mut self, setup: F) -> Self
    where
        F: Fn(&mut Robot) -> Result<()> + Send + Sync + 'static,
    {
        self.setup = Some(Arc::new(setup));
        self
    }

    pub fn with_timestep(mut self, timestep: f64) -> Self {
        self.timestep = timestep;
        self
    }

    pub fn with_steps(mut self, steps: u64) -> Self {
        self.run_length = RunLength::Steps(steps);
        self
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.run_length = RunLength::Duration(seconds);
        self
    }

    pub fn with_render(mut self, render: RenderRequest) -> Self {
        self.render = Some(render);
        self
    }

    pub fn with_output(mut self, exporter: Exporter, base_name: impl Into<String>) -> Self {
        self.output = Some(OutputRequest {
            exporter,
            base_name: base_name.into(),
        });
        self
    }

    pub fn with_acquire_policy(mut self, policy: AcquirePolicy) -> Self {
        self.acquire_policy = Some(policy);
        self
    }
}

impl fmt::Debug for WorkerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerConfig")
            .field("index", &self.index)
            .field("robot", &self.robot)
            .field("setup", &self.setup.is_some())
            .field("timestep", &self.timestep)
            .field("run_length", &self.run_length)
            .field("render", &self.render)
            .field("output", &self.output)
            .field("acquire_policy", &self.acquire_policy)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerOutcome {
    Completed,
    Failed,
}

impl WorkerOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerOutcome::Completed => "completed",
            WorkerOutcome::Failed => "failed",
        }
    }
}

/// Why a worker failed
#[derive(Debug, Clone, Serialize)]
pub struct WorkerFailure {
    pub kind: FailureKind,
    pub phase: WorkerPhase,
    pub message: String,

    /// The pool's accounting can no longer be trusted
    pub invariant_violation: bool,
}

/// What one worker did
#[derive(Debug, Clone, Serialize)]
pub struct WorkerReport {
    pub index: usize,
    pub outcome: WorkerOutcome,
    pub failure: Option<WorkerFailure>,

    /// Pool slot the worker held, if it got one
    pub slot: Option<usize>,
    pub steps: u64,

    /// Recorded frames
    pub frames: usize,
    pub artifacts: Vec<PathBuf>,

    /// Time spent acquiring the context
    pub wait: Duration,
    pub elapsed: Duration,
}

impl WorkerReport {
    fn new(index: usize) -> Self {
        Self {
            index,
            outcome: WorkerOutcome::Completed,
            failure: None,
            slot: None,
            steps: 0,
            frames: 0,
            artifacts: Vec::new(),
            wait: Duration::ZERO,
            elapsed: Duration::ZERO,
        }
    }

    /// Report for a worker whose thread panicked
    pub fn panicked(index: usize, message: impl Into<String>) -> Self {
        let mut report = Self::new(index);
        let error = EngineError::WorkerPanicked {
            index,
            message: message.into(),
        };
        report.fail(WorkerPhase::Done, &error);
        report
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == WorkerOutcome::Completed
    }

    fn fail(&mut self, phase: WorkerPhase, error: &EngineError) {
        self.outcome = WorkerOutcome::Failed;
        self.failure = Some(WorkerFailure {
            kind: error.kind(),
            phase,
            message: error.to_string(),
            invariant_violation: error.is_pool_invariant_violation(),
        });
    }
}

/// Runs one worker protocol
pub struct SimulationWorker {
    config: WorkerConfig,
}

/// Filesystem errors while writing artifacts count as capture/export failures
fn export_error(err: EngineError) -> EngineError {
    match err {
        EngineError::Io(io) => EngineError::ExportFailed(io.to_string()),
        other => other,
    }
}

impl SimulationWorker {
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }

    pub fn index(&self) -> usize {
        self.config.index
    }

    /// Run the full protocol on the calling thread
    ///
    /// Never returns with the context still checked out unless the pool
    /// refused the release, which the report flags as an invariant violation.
    pub fn run(self, pool: &ContextPool, monitor: &PhaseMonitor) -> WorkerReport {
        let index = self.config.index;
        let started = Instant::now();
        let mut report = WorkerReport::new(index);

        let acquiring = monitor.enter(WorkerPhase::Acquire);
        let lease = match &self.config.acquire_policy {
            Some(policy) => pool.lease_with(policy),
            None => pool.lease(),
        };
        drop(acquiring);
        report.wait = started.elapsed();

        let lease = match lease {
            Ok(lease) => lease,
            Err(e) => {
                warn!("Worker {} could not acquire a context: {}", index, e);
                report.fail(WorkerPhase::Acquire, &e);
                report.elapsed = started.elapsed();
                monitor.mark_done();
                return report;
            }
        };
        report.slot = Some(lease.slot());
        debug!("Worker {} holds slot {} after {:?}", index, lease.slot(), report.wait);

        if let Err((phase, e)) = self.episode(&lease, monitor, &mut report) {
            warn!("Worker {} failed during {:?}: {}", index, phase, e);
            report.fail(phase, &e);
        }

        let releasing = monitor.enter(WorkerPhase::Release);
        if let Err(e) = lease.release() {
            error!("Worker {} could not release its context: {}", index, e);
            report.fail(WorkerPhase::Release, &e);
        }
        drop(releasing);

        report.elapsed = started.elapsed();
        monitor.mark_done();

        info!(
            "Worker {} {} after {} steps, {} frames in {:?}",
            index,
            report.outcome.as_str(),
            report.steps,
            report.frames,
            report.elapsed
        );
        report
    }

    /// Build, Run, Export and Teardown; errors carry the phase they hit
    fn episode(
        &self,
        lease: &ContextLease<'_>,
        monitor: &PhaseMonitor,
        report: &mut WorkerReport,
    ) -> std::result::Result<(), (WorkerPhase, EngineError)> {
        let config = &self.config;
        let at = |phase: WorkerPhase| move |e: EngineError| (phase, e);

        let building = monitor.enter(WorkerPhase::Build);
        let mut world = World::new(config.timestep).map_err(at(WorkerPhase::Build))?;
        let robot = self.build_robot().map_err(at(WorkerPhase::Build))?;
        world.add_robot(robot);

        let mut session = match &config.render {
            Some(render) => {
                let mut session = RenderSession::bind(
                    lease,
                    &world,
                    render.width,
                    render.height,
                    render.options.clone(),
                )
                .map_err(at(WorkerPhase::Build))?;
                session
                    .look_at(render.camera.eye, render.camera.target, render.camera.up)
                    .map_err(at(WorkerPhase::Build))?;
                Some(session)
            }
            None => None,
        };
        drop(building);

        let running = monitor.enter(WorkerPhase::Run);
        let steps = match config.run_length {
            RunLength::Steps(n) => n,
            RunLength::Duration(seconds) => world.steps_for(seconds),
        };
        let cadence = config
            .render
            .as_ref()
            .map(|r| r.cadence_for(config.timestep))
            .unwrap_or(1);

        for step in 1..=steps {
            world.advance().map_err(at(WorkerPhase::Run))?;
            report.steps = world.steps();
            if let Some(session) = session.as_mut() {
                if step % cadence == 0 {
                    session.render_frame(&world).map_err(at(WorkerPhase::Run))?;
                }
            }
        }

        // a still image needs at least one frame even if the cadence never fired
        if let Some(session) = session.as_mut() {
            if session.rendered_frames() == 0 {
                let (recording, depth) = (session.recording(), session.depth_recording());
                session.set_recording(false, false);
                session.render_frame(&world).map_err(at(WorkerPhase::Run))?;
                session.set_recording(recording, depth);
            }
        }
        drop(running);

        let exporting = monitor.enter(WorkerPhase::Export);
        match session.as_mut() {
            Some(session) => {
                let output = session.take_output();
                report.frames = output.frames.len();
                if let Some(request) = &config.output {
                    report.artifacts = request
                        .exporter
                        .export(&request.base_name, config.index, &output)
                        .map_err(export_error)
                        .map_err(at(WorkerPhase::Export))?;
                }
            }
            None if config.output.is_some() => {
                debug!(
                    worker = config.index,
                    "output requested without rendering; nothing to export"
                );
            }
            None => {}
        }
        drop(exporting);

        let _teardown = monitor.enter(WorkerPhase::Teardown);
        if let Some(mut session) = session {
            session.teardown();
        }

        Ok(())
    }

    fn build_robot(&self) -> Result<Robot> {
        let mut robot = match &self.config.robot {
            RobotSource::Template(template) => Robot::clone(template),
            RobotSource::Model { path, packages } => Robot::from_file(path, packages)?,
        };

        if let Some(setup) = &self.config.setup {
            setup(&mut robot)?;
        }

        Ok(robot)
    }
}
