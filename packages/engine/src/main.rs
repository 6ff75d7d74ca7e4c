// packages/engine/src/main.rs
//! RoboSim Engine
//!
//! Runs a fleet of simulation workers that share a bounded pool of
//! rendering contexts, each worker filming the same robot from its own
//! camera position.

use anyhow::{Context, Result};
use nalgebra::Vector3;
use robosim_engine::observability::{init_metrics, init_tracing};
use robosim_engine::recording::Exporter;
use robosim_engine::runtime::{
    ContextPool, ContextPoolConfig, HeadlessBackend, RenderRequest, RobotSource, WorkerConfig,
    WorkerCoordinator,
};
use robosim_engine::sim::{PdControl, Robot};
use robosim_engine::utils::config::EngineConfig;
use std::f64::consts::PI;
use std::sync::Arc;
use tracing::{info, warn};

fn main() -> Result<()> {
    let config = EngineConfig::load().context("Failed to load configuration")?;

    // Initialize observability (tracing, metrics)
    init_tracing(&config.logging)?;
    let metrics = init_metrics()?;

    info!("Starting RoboSim Engine v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {:?}", config);

    let pool = ContextPool::with_config(
        Arc::new(HeadlessBackend::new()),
        ContextPoolConfig {
            max_contexts: config.pool.max_contexts,
            policy: config.pool.acquire_policy(),
            record_history: config.pool.record_history,
        },
    )?;
    let coordinator = WorkerCoordinator::new(Arc::new(pool))
        .with_thread_name_prefix(config.workers.thread_name_prefix.clone());

    let template = Arc::new(load_robot(&config)?);
    let exporter = Exporter::new(config.output.format, &config.output.directory);

    let summary = coordinator.run(config.workers.count, |index| {
        let mut worker = WorkerConfig::new(index, RobotSource::Template(Arc::clone(&template)))
            .with_timestep(config.simulation.timestep)
            .with_duration(config.simulation.duration_secs);

        if config.render.enabled {
            let mut render = RenderRequest::new(config.render.width, config.render.height)
                .with_camera(
                    Vector3::new(0.4 * index as f64, 3.5, 2.0),
                    Vector3::new(0.0, 0.0, 0.25),
                )
                .with_recording(config.render.recording, config.render.depth_recording);
            render.options.fps = config.render.fps;

            worker = worker
                .with_render(render)
                .with_output(exporter.clone(), config.output.base_name.clone());
        }

        worker
    })?;

    for report in &summary.reports {
        match &report.failure {
            None => info!(
                "worker {:>2}: slot {:?}, {} steps, {} frames, {:?}",
                report.index, report.slot, report.steps, report.frames, report.artifacts
            ),
            Some(failure) => warn!(
                "worker {:>2}: {:?} during {:?}: {}",
                report.index, failure.kind, failure.phase, failure.message
            ),
        }
    }

    if config.output.write_summary {
        let path = summary.write_json(&config.output.directory)?;
        info!("Run summary written to {}", path.display());
    }

    println!(
        "run {}: {}/{} workers completed (peak {} running on {} contexts)",
        summary.run_id,
        summary.completed(),
        summary.reports.len(),
        summary.peak_running,
        summary.pool.capacity
    );
    print!("{}", metrics.render());

    Ok(())
}

/// Robot shared by every worker: the configured model or a 7-DoF arm
fn load_robot(config: &EngineConfig) -> Result<Robot> {
    let mut robot = match &config.model.path {
        Some(path) => {
            let packages: Vec<_> = config
                .model
                .packages
                .iter()
                .map(|p| (p.name.clone(), p.path.clone()))
                .collect();
            Robot::from_file(path, &packages)
                .with_context(|| format!("Failed to load robot model {}", path.display()))?
        }
        None => Robot::serial_arm("arm", 7),
    };

    robot.fix_to_world();
    robot.set_position_enforced(true);

    let mut targets = vec![0.0; robot.num_dofs()];
    for (i, target) in targets.iter_mut().enumerate() {
        *target = match i {
            1 => PI / 3.0,
            3 => -PI / 4.0,
            _ => 0.0,
        };
    }
    let mut controller = PdControl::with_targets(targets);
    controller.set_pd(300.0, 50.0);
    robot.add_controller(Box::new(controller), 1.0);

    Ok(robot)
}
