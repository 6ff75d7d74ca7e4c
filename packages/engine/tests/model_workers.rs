// packages/engine/tests/model_workers.rs
//! Workers that load their robot from a description file

use robosim_engine::runtime::{
    ContextPool, HeadlessBackend, RenderRequest, RobotSource, WorkerConfig, WorkerCoordinator,
};
use robosim_engine::sim::{ModelLoader, Robot};
use std::path::PathBuf;
use std::sync::Arc;

fn demos() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../demos")
}

fn packages() -> Vec<(String, PathBuf)> {
    vec![("pendulum".to_string(), demos().join("models"))]
}

#[test]
fn demo_pendulum_loads_with_package_paths() {
    let skeleton = ModelLoader::new(packages())
        .load(&demos().join("models/pendulum.yaml"))
        .unwrap();

    assert_eq!(skeleton.name, "double_pendulum");
    assert_eq!(skeleton.num_dofs(), 2);
    assert!(skeleton.links[1].mesh.as_ref().unwrap().ends_with("meshes/upper.stl"));

    // without the package path the mesh cannot be resolved
    let err = Robot::from_file(demos().join("models/pendulum.yaml"), &[]).unwrap_err();
    assert!(err.to_string().contains("pendulum.yaml"));
}

#[test]
fn each_worker_loads_its_own_copy() {
    let pool = Arc::new(ContextPool::new(Arc::new(HeadlessBackend::new())));
    let coordinator = WorkerCoordinator::new(pool);
    coordinator.configure_pool(2).unwrap();

    let summary = coordinator
        .run(4, |i| {
            WorkerConfig::new(
                i,
                RobotSource::Model {
                    path: demos().join("models/pendulum.yaml"),
                    packages: packages(),
                },
            )
            .with_steps(200)
            .with_setup(move |robot| robot.set_positions(&[0.1 * i as f64, 0.0], &[]))
            .with_render(RenderRequest::new(24, 24))
        })
        .unwrap();

    assert!(summary.all_succeeded(), "{:?}", summary.reports);
    assert_eq!(summary.pool.capacity, 2);
    assert_eq!(summary.pool.in_use, 0);
}
