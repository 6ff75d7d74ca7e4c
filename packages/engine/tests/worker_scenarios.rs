// packages/engine/tests/worker_scenarios.rs
//! End-to-end worker runs through the coordinator

use robosim_engine::recording::{read_raw_video, ExportFormat, Exporter};
use robosim_engine::runtime::{
    ContextPool, ContextPoolConfig, HeadlessBackend, HeadlessConfig, RenderRequest, RobotSource,
    SimulationWorker, WorkerConfig, WorkerCoordinator, WorkerPhase,
};
use robosim_engine::sim::{PdControl, Robot};
use robosim_engine::FailureKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn coordinator(max_contexts: usize, backend: HeadlessBackend) -> WorkerCoordinator {
    let pool = ContextPool::with_config(
        Arc::new(backend),
        ContextPoolConfig {
            max_contexts,
            record_history: true,
            ..Default::default()
        },
    )
    .unwrap();
    WorkerCoordinator::new(Arc::new(pool))
}

fn arm(dofs: usize) -> Arc<Robot> {
    let mut robot = Robot::serial_arm("arm", dofs);
    robot.fix_to_world();
    robot.set_position_enforced(true);
    let mut pd = PdControl::with_targets(vec![0.3; dofs]);
    pd.set_pd(300.0, 50.0);
    robot.add_controller(Box::new(pd), 1.0);
    Arc::new(robot)
}

fn missing_model() -> RobotSource {
    RobotSource::Model {
        path: PathBuf::from("/no/such/dir/robot.yaml"),
        packages: Vec::new(),
    }
}

#[test]
fn scenario_a_two_contexts_five_workers() {
    let coordinator = coordinator(2, HeadlessBackend::new());
    let robot = arm(3);

    let summary = coordinator
        .run(5, |i| {
            WorkerConfig::new(i, RobotSource::Template(Arc::clone(&robot)))
                .with_steps(500)
                .with_setup(|_| {
                    // keep workers in the pool long enough to contend
                    thread::sleep(Duration::from_millis(5));
                    Ok(())
                })
        })
        .unwrap();

    assert_eq!(summary.completed(), 5);
    assert!(summary.peak_running >= 1);
    assert!(summary.peak_running <= 2);
    assert!(summary.pool.peak_in_use <= 2);
    assert_eq!(summary.pool.in_use, 0);
    assert!(summary.reports.iter().all(|r| r.steps == 500));
    assert_eq!(coordinator.monitor().count(WorkerPhase::Done), 5);
    assert_eq!(coordinator.monitor().count(WorkerPhase::Run), 0);
}

#[test]
fn scenario_b_failed_build_releases_for_the_others() {
    let coordinator = coordinator(1, HeadlessBackend::new());
    let robot = arm(2);

    let summary = coordinator
        .run(3, |i| {
            let source = if i == 1 {
                missing_model()
            } else {
                RobotSource::Template(Arc::clone(&robot))
            };
            WorkerConfig::new(i, source).with_steps(100)
        })
        .unwrap();

    assert_eq!(summary.completed(), 2);
    let failed = summary.report(1).unwrap();
    let failure = failed.failure.as_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::ModelLoadFailure);
    assert_eq!(failure.phase, WorkerPhase::Build);
    assert_eq!(failed.slot, Some(0));

    // every lease of the single slot was closed, one after another
    let history = coordinator.pool().history();
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|r| r.slot == 0 && r.released_at.is_some()));
    assert_eq!(summary.pool.releases, 3);
    assert_eq!(summary.pool.in_use, 0);

    // the slot is free the moment the failing worker returns
    let report = SimulationWorker::new(WorkerConfig::new(3, missing_model()).with_steps(100))
        .run(coordinator.pool(), coordinator.monitor());
    assert_eq!(report.failure.map(|f| f.phase), Some(WorkerPhase::Build));
    assert_eq!(coordinator.pool().in_use(), 0);
    assert!(coordinator.pool().history().iter().all(|r| r.released_at.is_some()));
}

#[test]
fn scenario_c_recorded_frames_match_cadence() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator(1, HeadlessBackend::new());
    let robot = arm(3);

    let summary = coordinator
        .run(1, |i| {
            WorkerConfig::new(i, RobotSource::Template(Arc::clone(&robot)))
                .with_steps(500)
                .with_render(
                    RenderRequest::new(32, 24)
                        .with_recording(true, false)
                        .with_cadence(20),
                )
                .with_output(Exporter::new(ExportFormat::RawVideo, dir.path()), "clip")
        })
        .unwrap();

    let report = summary.report(0).unwrap();
    assert!(report.succeeded(), "{:?}", report.failure);
    assert_eq!(report.frames, 25);

    let (header, frames) = read_raw_video(&report.artifacts[0]).unwrap();
    assert_eq!(header.frames, 25);
    assert_eq!(frames.len(), 25);
    assert_eq!((header.width, header.height), (32, 24));
}

#[test]
fn scenario_c_cadence_from_fps_rounds_down() {
    let coordinator = coordinator(1, HeadlessBackend::new());
    let robot = arm(2);

    // 1 ms steps at 30 fps: a frame every 33 steps, 1000 / 33 = 30 frames
    let summary = coordinator
        .run(1, |i| {
            WorkerConfig::new(i, RobotSource::Template(Arc::clone(&robot)))
                .with_timestep(0.001)
                .with_duration(1.0)
                .with_render(RenderRequest::new(16, 16).with_recording(true, false))
        })
        .unwrap();

    let report = summary.report(0).unwrap();
    assert_eq!(report.steps, 1000);
    assert_eq!(report.frames, 30);
}

#[test]
fn no_leak_with_faults_in_every_phase() {
    let dir = tempfile::tempdir().unwrap();
    let blocked = dir.path().join("blocked");
    std::fs::write(&blocked, b"not a directory").unwrap();

    let backend = HeadlessBackend::with_config(HeadlessConfig {
        transient_failures: 2,
        failure_rate: 0.1,
        ..Default::default()
    });
    let coordinator = coordinator(3, backend);
    let robot = arm(3);

    let summary = coordinator
        .run(12, |i| {
            let base = WorkerConfig::new(i, RobotSource::Template(Arc::clone(&robot)))
                .with_steps(50)
                .with_render(RenderRequest::new(16, 12).with_cadence(10));
            match i % 4 {
                0 => WorkerConfig::new(i, missing_model()),
                1 => base.with_setup(|robot| robot.set_positions(&[f64::NAN, 0.0, 0.0], &[])),
                2 => base.with_output(Exporter::new(ExportFormat::Png, &blocked), "camera"),
                _ => base.with_output(Exporter::new(ExportFormat::Png, dir.path()), "camera"),
            }
        })
        .unwrap();

    assert_eq!(summary.pool.in_use, 0);
    assert_eq!(summary.pool.acquires, 12);
    assert_eq!(summary.pool.releases, 12);
    assert_eq!(summary.completed(), 3);

    for report in &summary.reports {
        let phase = report.failure.as_ref().map(|f| f.phase);
        match report.index % 4 {
            0 => assert_eq!(phase, Some(WorkerPhase::Build)),
            1 => assert_eq!(phase, Some(WorkerPhase::Run)),
            2 => {
                let failure = report.failure.as_ref().unwrap();
                assert_eq!(failure.phase, WorkerPhase::Export);
                assert_eq!(failure.kind, FailureKind::RenderFailure);
            }
            _ => {
                assert_eq!(phase, None);
                assert!(dir.path().join(format!("camera_{}.png", report.index)).exists());
            }
        }
    }

    let history = coordinator.pool().history();
    for (i, a) in history.iter().enumerate() {
        for b in &history[i + 1..] {
            assert!(a.slot != b.slot || !a.overlaps(b));
        }
    }
}

#[test]
fn workers_wait_for_a_timeout_instead_of_hanging() {
    use robosim_engine::runtime::AcquirePolicy;

    let coordinator = coordinator(1, HeadlessBackend::new());
    let robot = arm(2);

    let summary = coordinator
        .run(3, |i| {
            WorkerConfig::new(i, RobotSource::Template(Arc::clone(&robot)))
                .with_steps(1)
                .with_setup(|_| {
                    thread::sleep(Duration::from_millis(200));
                    Ok(())
                })
                .with_acquire_policy(AcquirePolicy::bounded(Duration::from_millis(50)))
        })
        .unwrap();

    let exhausted = summary
        .reports
        .iter()
        .filter(|r| {
            r.failure
                .as_ref()
                .is_some_and(|f| f.kind == FailureKind::ResourceExhaustion)
        })
        .count();
    assert!(exhausted >= 1);
    assert_eq!(summary.completed() + exhausted, 3);
    assert_eq!(summary.pool.in_use, 0);
    assert!(summary.pool.timeouts >= 1);
}
