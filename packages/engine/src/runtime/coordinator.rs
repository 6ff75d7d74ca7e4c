// packages/engine/src/runtime/coordinator.rs
//! Fan-out / fan-in of simulation workers
//!
//! Each worker gets its own named OS thread inside a thread scope, so no
//! worker outlives the call that launched it. Reports come back over a
//! channel; a worker that panics is contained and reported, and its lease
//! is released while unwinding.
//!
//! # Architecture
//!
//! ```text
//!                 run_workers(configs)
//!                        │
//!        ┌───────────────┼───────────────┐
//!        ▼               ▼               ▼
//!   sim-worker-0    sim-worker-1 ...  sim-worker-N      (std::thread::scope)
//!        │               │               │
//!        └──── ContextPool (M slots, M ≤ N) ────┘
//!        │               │               │
//!        └──────── report channel ───────┘
//!                        │
//!              join all ─▶ verify in_use == 0 ─▶ RunSummary
//! ```

use crate::observability::metric_names;
use crate::runtime::context_pool::{ContextPool, PoolStats};
use crate::runtime::monitor::PhaseMonitor;
use crate::runtime::worker::{SimulationWorker, WorkerConfig, WorkerReport};
use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Utc};
use crossbeam_channel::unbounded;
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tracing::{error, info, info_span, warn};
use ulid::Ulid;

/// Outcome of one `run_workers` call
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Ulid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// Reports ordered by worker index
    pub reports: Vec<WorkerReport>,

    /// Most workers simultaneously in the Run phase
    pub peak_running: usize,
    pub pool: PoolStats,
}

impl RunSummary {
    pub fn completed(&self) -> usize {
        self.reports.iter().filter(|r| r.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.reports.len() - self.completed()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }

    pub fn report(&self, index: usize) -> Option<&WorkerReport> {
        self.reports.iter().find(|r| r.index == index)
    }

    /// Write `run_<id>.json` into `directory`
    pub fn write_json(&self, directory: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(directory)?;
        let path = directory.join(format!("run_{}.json", self.run_id));
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| EngineError::ExportFailed(format!("JSON serialization error: {}", e)))?;
        std::fs::write(&path, json)?;
        Ok(path)
    }
}

/// Launches workers against a shared pool and waits for all of them
pub struct WorkerCoordinator {
    pool: Arc<ContextPool>,
    monitor: Arc<PhaseMonitor>,
    thread_name_prefix: String,
}

impl WorkerCoordinator {
    pub fn new(pool: Arc<ContextPool>) -> Self {
        Self {
            pool,
            monitor: Arc::new(PhaseMonitor::new()),
            thread_name_prefix: "sim-worker".to_string(),
        }
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    pub fn pool(&self) -> &Arc<ContextPool> {
        &self.pool
    }

    pub fn monitor(&self) -> &PhaseMonitor {
        &self.monitor
    }

    /// Size the pool; must happen before any worker acquires
    pub fn configure_pool(&self, max_contexts: usize) -> Result<()> {
        self.pool.configure(max_contexts)
    }

    /// Launch `n_workers` workers built by `per_worker(index)` and join them
    pub fn run<F>(&self, n_workers: usize, per_worker: F) -> Result<RunSummary>
    where
        F: FnMut(usize) -> WorkerConfig,
    {
        self.run_workers((0..n_workers).map(per_worker).collect())
    }

    /// Run every config on its own thread; returns once all have finished
    ///
    /// Worker failures are reported per worker. An `Err` means the pool
    /// itself is no longer trustworthy (a context left checked out or a
    /// rejected release) or a thread could not be spawned.
    pub fn run_workers(&self, configs: Vec<WorkerConfig>) -> Result<RunSummary> {
        let run_id = Ulid::new();
        let started_at = Utc::now();
        let n_workers = configs.len();
        self.monitor.reset();

        info!(
            "Run {}: launching {} workers on a pool of {}",
            run_id,
            n_workers,
            self.pool.capacity()
        );

        let (tx, rx) = unbounded::<WorkerReport>();
        let pool: &ContextPool = &self.pool;
        let monitor: &PhaseMonitor = &self.monitor;

        let spawned: Result<()> = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(n_workers);

            for config in configs {
                let index = config.index;
                let tx = tx.clone();
                let handle = thread::Builder::new()
                    .name(format!("{}-{}", self.thread_name_prefix, index))
                    .spawn_scoped(scope, move || {
                        let span = info_span!("worker", index);
                        let _entered = span.enter();

                        let worker = SimulationWorker::new(config);
                        let report = match panic::catch_unwind(AssertUnwindSafe(|| {
                            worker.run(pool, monitor)
                        })) {
                            Ok(report) => report,
                            Err(payload) => {
                                let message = panic_message(payload.as_ref());
                                error!("Worker {} panicked: {}", index, message);
                                monitor.mark_done();
                                WorkerReport::panicked(index, message)
                            }
                        };

                        if tx.send(report).is_err() {
                            warn!("Worker {} finished after the report channel closed", index);
                        }
                    })?;
                handles.push((index, handle));
            }

            for (index, handle) in handles {
                if let Err(payload) = handle.join() {
                    let message = panic_message(payload.as_ref());
                    error!("Worker thread {} died outside its protocol: {}", index, message);
                    if tx.send(WorkerReport::panicked(index, message)).is_err() {
                        warn!("Report channel closed before worker {} was reported", index);
                    }
                }
            }

            Ok(())
        });
        drop(tx);

        let mut reports: Vec<WorkerReport> = rx.try_iter().collect();
        reports.sort_by_key(|r| r.index);

        for report in &reports {
            metrics::counter!(metric_names::WORKERS_COMPLETED, "outcome" => report.outcome.as_str())
                .increment(1);
        }

        let stats = self.pool.stats();
        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            reports,
            peak_running: self.monitor.peak_running(),
            pool: stats.clone(),
        };

        // threads that were spawned have been joined by now either way
        spawned?;

        if stats.in_use != 0 {
            error!("Run {} left contexts checked out: {:?}", run_id, stats);
            return Err(EngineError::PoolInvariant(format!(
                "{} context(s) still in use after all workers joined ({:?})",
                stats.in_use, stats
            )));
        }

        if let Some(bad) = summary
            .reports
            .iter()
            .find(|r| r.failure.as_ref().is_some_and(|f| f.invariant_violation))
        {
            error!("Run {} hit a pool invariant violation: {:?}", run_id, bad);
            return Err(EngineError::PoolInvariant(format!(
                "worker {}: {}",
                bad.index,
                bad.failure
                    .as_ref()
                    .map(|f| f.message.as_str())
                    .unwrap_or_default()
            )));
        }

        info!(
            "Run {} finished: {}/{} workers completed, peak {} running, {} acquires",
            run_id,
            summary.completed(),
            summary.reports.len(),
            summary.peak_running,
            summary.pool.acquires
        );

        Ok(summary)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::context_pool::ContextPoolConfig;
    use crate::runtime::headless::HeadlessBackend;
    use crate::runtime::worker::RobotSource;
    use crate::sim::robot::Robot;
    use crate::utils::errors::FailureKind;

    fn coordinator(max_contexts: usize) -> WorkerCoordinator {
        let pool = ContextPool::with_config(
            Arc::new(HeadlessBackend::new()),
            ContextPoolConfig {
                max_contexts,
                ..Default::default()
            },
        )
        .unwrap();
        WorkerCoordinator::new(Arc::new(pool))
    }

    fn template() -> Arc<Robot> {
        let mut robot = Robot::serial_arm("arm", 2);
        robot.fix_to_world();
        Arc::new(robot)
    }

    #[test]
    fn test_zero_workers() {
        let coordinator = coordinator(2);
        let summary = coordinator.run(0, |i| {
            WorkerConfig::new(i, RobotSource::Template(template()))
        })
        .unwrap();
        assert!(summary.reports.is_empty());
        assert_eq!(summary.pool.in_use, 0);
        assert!(!coordinator.pool().is_populated());
    }

    #[test]
    fn test_reports_are_ordered() {
        let coordinator = coordinator(2);
        let robot = template();
        let summary = coordinator
            .run(6, |i| {
                WorkerConfig::new(i, RobotSource::Template(Arc::clone(&robot))).with_steps(20)
            })
            .unwrap();

        assert!(summary.all_succeeded());
        let indices: Vec<usize> = summary.reports.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(summary.pool.acquires, 6);
        assert_eq!(summary.pool.releases, 6);
        assert!(summary.peak_running <= 2);
    }

    #[test]
    fn test_panicking_worker_is_contained() {
        let coordinator = coordinator(1);
        let robot = template();
        let summary = coordinator
            .run(3, |i| {
                let config = WorkerConfig::new(i, RobotSource::Template(Arc::clone(&robot)))
                    .with_steps(5);
                if i == 1 {
                    config.with_setup(|_| panic!("setup exploded"))
                } else {
                    config
                }
            })
            .unwrap();

        assert_eq!(summary.completed(), 2);
        let failure = summary.report(1).unwrap().failure.as_ref().unwrap();
        assert_eq!(failure.kind, FailureKind::Panic);
        assert!(failure.message.contains("setup exploded"));
        assert_eq!(coordinator.pool().in_use(), 0);
    }

    #[test]
    fn test_configure_then_late_configure() {
        let coordinator = coordinator(4);
        coordinator.configure_pool(2).unwrap();
        let robot = template();
        coordinator
            .run(3, |i| {
                WorkerConfig::new(i, RobotSource::Template(Arc::clone(&robot))).with_steps(1)
            })
            .unwrap();

        assert_eq!(coordinator.pool().capacity(), 2);
        assert!(matches!(
            coordinator.configure_pool(8),
            Err(EngineError::PoolAlreadyPopulated { realized: 2, requested: 8 })
        ));
    }

    #[test]
    fn test_summary_json() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(1);
        let robot = template();
        let summary = coordinator
            .run(1, |i| {
                WorkerConfig::new(i, RobotSource::Template(Arc::clone(&robot))).with_steps(2)
            })
            .unwrap();

        let path = summary.write_json(dir.path()).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(value["run_id"], summary.run_id.to_string());
        assert_eq!(value["reports"][0]["outcome"], "completed");
        assert_eq!(value["pool"]["in_use"], 0);
    }
}
