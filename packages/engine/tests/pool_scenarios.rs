// packages/engine/tests/pool_scenarios.rs
//! Context pool properties under real threads

use proptest::prelude::*;
use rand::Rng;
use robosim_engine::runtime::{
    ContextPool, ContextPoolConfig, HeadlessBackend, HeadlessConfig,
};
use robosim_engine::EngineError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn pool_with(max_contexts: usize, backend: HeadlessBackend) -> ContextPool {
    ContextPool::with_config(
        Arc::new(backend),
        ContextPoolConfig {
            max_contexts,
            record_history: true,
            ..Default::default()
        },
    )
    .unwrap()
}

#[test]
fn capacity_is_never_exceeded() {
    let pool = pool_with(3, HeadlessBackend::new());
    let active = AtomicUsize::new(0);
    let peak = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..12 {
            s.spawn(|| {
                let hold = Duration::from_millis(rand::thread_rng().gen_range(1..10));
                let lease = pool.lease().unwrap();

                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(hold);
                active.fetch_sub(1, Ordering::SeqCst);

                lease.release().unwrap();
            });
        }
    });

    let stats = pool.stats();
    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert!(stats.peak_in_use <= 3);
    assert_eq!(stats.in_use, 0);
    assert_eq!(stats.acquires, 12);
    assert_eq!(stats.releases, 12);
}

#[test]
fn leases_of_a_slot_never_overlap() {
    let backend = HeadlessBackend::with_config(HeadlessConfig {
        failure_rate: 0.2,
        ..Default::default()
    });
    let pool = pool_with(2, backend);

    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..5 {
                    let lease = pool.lease().unwrap();
                    thread::sleep(Duration::from_micros(rand::thread_rng().gen_range(50..500)));
                    drop(lease);
                }
            });
        }
    });

    let history = pool.history();
    assert_eq!(history.len(), 40);
    assert!(history.iter().all(|r| r.released_at.is_some()));

    for (i, a) in history.iter().enumerate() {
        for b in &history[i + 1..] {
            if a.slot == b.slot {
                assert!(!a.overlaps(b), "overlapping leases on slot {}: {:?} {:?}", a.slot, a, b);
            }
        }
    }
}

#[test]
fn released_handles_cannot_be_reused() {
    let pool = pool_with(1, HeadlessBackend::new());

    let handle = pool.acquire().unwrap();
    pool.release(handle).unwrap();
    assert!(matches!(
        pool.release(handle),
        Err(EngineError::InvalidRelease { slot: 0, .. })
    ));

    // the slot is still usable and the count is intact
    let again = pool.acquire().unwrap();
    assert_eq!(pool.in_use(), 1);
    pool.release(again).unwrap();
    assert_eq!(pool.in_use(), 0);
}

#[test]
fn try_acquire_reports_a_full_pool() {
    let pool = pool_with(1, HeadlessBackend::new());
    let held = pool.lease().unwrap();

    let attempt = thread::scope(|s| s.spawn(|| pool.try_acquire()).join().unwrap());
    assert!(matches!(attempt, Ok(None)));

    drop(held);
    let handle = pool.try_acquire().unwrap().unwrap();
    pool.release(handle).unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn last_configure_before_first_acquire_wins(
        sizes in prop::collection::vec(1usize..8, 1..5),
        late in 1usize..8,
    ) {
        let pool = ContextPool::new(Arc::new(HeadlessBackend::new()));
        for &size in &sizes {
            pool.configure(size).unwrap();
        }
        let expected = *sizes.last().unwrap();

        let handle = pool.acquire().unwrap();
        pool.release(handle).unwrap();
        prop_assert_eq!(pool.capacity(), expected);

        let late_result = pool.configure(late);
        prop_assert!(
            matches!(
                late_result,
                Err(EngineError::PoolAlreadyPopulated { .. })
            ),
            "late configure was accepted"
        );
        prop_assert_eq!(pool.capacity(), expected);
        prop_assert_eq!(pool.stats().capacity, expected);
    }
}
