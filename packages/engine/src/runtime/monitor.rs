// packages/engine/src/runtime/monitor.rs
//! Per-phase worker counts
//!
//! Workers enter each protocol phase through a [`PhaseGuard`]; the guard
//! leaves the phase on drop, so a worker that fails or panics mid-phase is
//! still counted out.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Steps of the worker protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    Acquire,
    Build,
    Run,
    Export,
    Teardown,
    Release,
    Done,
}

impl WorkerPhase {
    pub const ALL: [WorkerPhase; 7] = [
        WorkerPhase::Acquire,
        WorkerPhase::Build,
        WorkerPhase::Run,
        WorkerPhase::Export,
        WorkerPhase::Teardown,
        WorkerPhase::Release,
        WorkerPhase::Done,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// Live phase counts shared by every worker of a run
#[derive(Debug, Default)]
pub struct PhaseMonitor {
    counts: [AtomicUsize; 7],
    peak_running: AtomicUsize,
}

impl PhaseMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count the caller in `phase` until the guard drops
    pub fn enter(&self, phase: WorkerPhase) -> PhaseGuard<'_> {
        let now = self.counts[phase.index()].fetch_add(1, Ordering::SeqCst) + 1;
        if phase == WorkerPhase::Run {
            self.peak_running.fetch_max(now, Ordering::SeqCst);
        }
        PhaseGuard {
            monitor: self,
            phase,
        }
    }

    /// Record a worker that finished, successfully or not
    pub fn mark_done(&self) {
        self.counts[WorkerPhase::Done.index()].fetch_add(1, Ordering::SeqCst);
    }

    pub fn count(&self, phase: WorkerPhase) -> usize {
        self.counts[phase.index()].load(Ordering::SeqCst)
    }

    /// Most workers ever simultaneously in `Run`
    pub fn peak_running(&self) -> usize {
        self.peak_running.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Vec<(WorkerPhase, usize)> {
        WorkerPhase::ALL.iter().map(|&p| (p, self.count(p))).collect()
    }

    /// Zero every count; only meaningful while no worker is running
    pub fn reset(&self) {
        for count in &self.counts {
            count.store(0, Ordering::SeqCst);
        }
        self.peak_running.store(0, Ordering::SeqCst);
    }
}

/// Membership of one worker in one phase
#[must_use = "the phase is left as soon as the guard is dropped"]
pub struct PhaseGuard<'m> {
    monitor: &'m PhaseMonitor,
    phase: WorkerPhase,
}

impl PhaseGuard<'_> {
    pub fn phase(&self) -> WorkerPhase {
        self.phase
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.monitor.counts[self.phase.index()].fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_guard_counts_in_and_out() {
        let monitor = PhaseMonitor::new();
        {
            let _a = monitor.enter(WorkerPhase::Build);
            let _b = monitor.enter(WorkerPhase::Build);
            assert_eq!(monitor.count(WorkerPhase::Build), 2);
        }
        assert_eq!(monitor.count(WorkerPhase::Build), 0);
    }

    #[test]
    fn test_peak_running() {
        let monitor = Arc::new(PhaseMonitor::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let monitor = Arc::clone(&monitor);
                thread::spawn(move || {
                    let _run = monitor.enter(WorkerPhase::Run);
                    thread::sleep(Duration::from_millis(50));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(monitor.count(WorkerPhase::Run), 0);
        assert!(monitor.peak_running() >= 1);
        assert!(monitor.peak_running() <= 4);
    }

    #[test]
    fn test_done_and_reset() {
        let monitor = PhaseMonitor::new();
        monitor.mark_done();
        monitor.mark_done();
        drop(monitor.enter(WorkerPhase::Run));
        assert_eq!(monitor.count(WorkerPhase::Done), 2);
        assert_eq!(monitor.peak_running(), 1);

        monitor.reset();
        assert_eq!(monitor.count(WorkerPhase::Done), 0);
        assert_eq!(monitor.peak_running(), 0);
        assert_eq!(monitor.snapshot().len(), 7);
    }

    #[test]
    fn test_guard_released_on_panic() {
        let monitor = Arc::new(PhaseMonitor::new());
        let inner = Arc::clone(&monitor);
        let result = thread::spawn(move || {
            let _export = inner.enter(WorkerPhase::Export);
            panic!("export blew up");
        })
        .join();

        assert!(result.is_err());
        assert_eq!(monitor.count(WorkerPhase::Export), 0);
    }
}
