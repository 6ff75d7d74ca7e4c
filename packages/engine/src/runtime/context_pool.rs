// packages/engine/src/runtime/context_pool.rs
//! Bounded pool of GPU rendering contexts
//!
//! Instead of creating a context per simulation worker, we create a small,
//! fixed number of contexts (the hardware cap, typically 4-8) on first use
//! and cycle them between any number of worker threads.
//!
//! # Architecture
//!
//! ```text
//! ContextPool
//! ├─ Config: max_contexts, acquire policy   (mutable until first acquire)
//! └─ Arena (created lazily, never resized)
//!    ├─ Contexts: [Ctx0, Ctx1, Ctx2, Ctx3]  (owned by the arena)
//!    └─ Slot table: [held, free, held, free] (behind one mutex)
//! ```
//!
//! Acquisition is two-phase:
//!
//! 1. **Reserve** a free slot under the table lock; when none is free,
//!    drop the lock, sleep for the backoff interval and poll again
//! 2. **Activate** the slot's context on the calling thread, outside the
//!    lock, retrying transient failures with the same backoff
//!
//! The table lock only ever guards bookkeeping. It is never held across
//! context creation, activation or rendering.
//!
//! There is no fairness guarantee: under contention a poller can lose
//! every race to other threads.

use crate::observability::metric_names;
use crate::runtime::acquire_policy::AcquirePolicy;
use crate::runtime::backend::{thread_label, ContextBackend, RenderContext};
use crate::utils::errors::{EngineError, Result};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Configuration for the context pool
#[derive(Debug, Clone)]
pub struct ContextPoolConfig {
    /// Number of contexts created on first acquire (default: 4)
    pub max_contexts: usize,

    /// How blocked acquirers poll
    pub policy: AcquirePolicy,

    /// Keep a record of every lease for auditing
    pub record_history: bool,
}

impl Default for ContextPoolConfig {
    fn default() -> Self {
        Self {
            max_contexts: 4,
            policy: AcquirePolicy::default(),
            record_history: false,
        }
    }
}

/// A checked-out slot
///
/// The token distinguishes successive leases of the same slot, so a handle
/// kept after release is detected as stale instead of freeing someone
/// else's lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle {
    slot: usize,
    token: u64,
}

impl ContextHandle {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn token(&self) -> u64 {
        self.token
    }
}

/// One completed or in-flight lease
#[derive(Debug, Clone)]
pub struct LeaseRecord {
    pub slot: usize,
    pub token: u64,
    pub thread: String,
    pub acquired_at: Instant,
    pub released_at: Option<Instant>,
}

impl LeaseRecord {
    /// Whether this lease's interval intersects `other`'s
    pub fn overlaps(&self, other: &LeaseRecord) -> bool {
        let self_end = self.released_at.unwrap_or_else(Instant::now);
        let other_end = other.released_at.unwrap_or_else(Instant::now);
        self.acquired_at < other_end && other.acquired_at < self_end
    }
}

/// Pool statistics
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    /// Realized slot count, or the configured count before first acquire
    pub capacity: usize,
    pub populated: bool,
    pub in_use: usize,
    pub available: usize,
    pub peak_in_use: usize,
    pub acquires: u64,
    pub releases: u64,
    pub activation_retries: u64,
    pub timeouts: u64,
}

#[derive(Debug)]
struct Holder {
    token: u64,
    thread: ThreadId,
    thread_label: String,
    since: Instant,
}

#[derive(Debug, Default)]
struct SlotTable {
    holders: Vec<Option<Holder>>,
    in_use: usize,
    peak_in_use: usize,
    next_token: u64,
    record_history: bool,
    history: Vec<LeaseRecord>,
}

impl SlotTable {
    fn close_record(&mut self, slot: usize, token: u64) {
        if !self.record_history {
            return;
        }
        if let Some(record) = self
            .history
            .iter_mut()
            .rev()
            .find(|r| r.slot == slot && r.token == token)
        {
            record.released_at = Some(Instant::now());
        }
    }

    fn describe(&self) -> String {
        self.holders
            .iter()
            .enumerate()
            .map(|(slot, holder)| match holder {
                Some(h) => format!(
                    "#{}: token {} held by {} for {:?}",
                    slot,
                    h.token,
                    h.thread_label,
                    h.since.elapsed()
                ),
                None => format!("#{}: free", slot),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Fixed-capacity slot arena; owns every native context
struct Arena {
    contexts: Box<[Arc<dyn RenderContext>]>,
    table: Mutex<SlotTable>,
}

#[derive(Debug, Default)]
struct PoolCounters {
    acquires: AtomicU64,
    releases: AtomicU64,
    activation_retries: AtomicU64,
    timeouts: AtomicU64,
}

/// Process-wide pool of rendering contexts
///
/// Build exactly one per process and share it with `Arc`.
pub struct ContextPool {
    backend: Arc<dyn ContextBackend>,
    config: Mutex<ContextPoolConfig>,
    arena: OnceCell<Arena>,
    counters: PoolCounters,
}

impl ContextPool {
    /// Create a pool with the default configuration (4 contexts)
    pub fn new(backend: Arc<dyn ContextBackend>) -> Self {
        Self {
            backend,
            config: Mutex::new(ContextPoolConfig::default()),
            arena: OnceCell::new(),
            counters: PoolCounters::default(),
        }
    }

    /// Create a pool with custom configuration
    pub fn with_config(backend: Arc<dyn ContextBackend>, config: ContextPoolConfig) -> Result<Self> {
        if config.max_contexts == 0 {
            return Err(EngineError::InvalidConfig(
                "max_contexts must be at least 1".to_string(),
            ));
        }
        config.policy.validate()?;

        info!(
            "Context pool configured for {} {} contexts",
            config.max_contexts,
            backend.name()
        );

        Ok(Self {
            backend,
            config: Mutex::new(config),
            arena: OnceCell::new(),
            counters: PoolCounters::default(),
        })
    }

    /// Set the number of contexts to create
    ///
    /// Only effective before the first acquire. Afterwards the pool is
    /// left untouched and `PoolAlreadyPopulated` is returned.
    pub fn configure(&self, max_contexts: usize) -> Result<()> {
        if max_contexts == 0 {
            return Err(EngineError::InvalidConfig(
                "max_contexts must be at least 1".to_string(),
            ));
        }

        let mut config = self.config.lock();
        if let Some(arena) = self.arena.get() {
            warn!(
                "Ignoring request to resize populated pool from {} to {} contexts",
                arena.contexts.len(),
                max_contexts
            );
            return Err(EngineError::PoolAlreadyPopulated {
                realized: arena.contexts.len(),
                requested: max_contexts,
            });
        }

        debug!("Pool size set to {} contexts", max_contexts);
        config.max_contexts = max_contexts;
        Ok(())
    }

    /// Replace the acquire policy (may be changed at any time)
    pub fn set_policy(&self, policy: AcquirePolicy) -> Result<()> {
        policy.validate()?;
        self.config.lock().policy = policy;
        Ok(())
    }

    pub fn policy(&self) -> AcquirePolicy {
        self.config.lock().policy
    }

    /// Whether the contexts have been created
    pub fn is_populated(&self) -> bool {
        self.arena.get().is_some()
    }

    /// Realized slot count, or the configured count before first acquire
    pub fn capacity(&self) -> usize {
        match self.arena.get() {
            Some(arena) => arena.contexts.len(),
            None => self.config.lock().max_contexts,
        }
    }

    /// Number of slots currently checked out
    pub fn in_use(&self) -> usize {
        self.arena
            .get()
            .map(|arena| arena.table.lock().in_use)
            .unwrap_or(0)
    }

    /// Create the contexts on first use
    fn arena(&self) -> Result<&Arena> {
        self.arena.get_or_try_init(|| {
            // Held for the whole creation so a racing `configure` is ordered
            // either entirely before or entirely after population.
            let config = self.config.lock();

            info!(
                "Creating {} {} rendering contexts",
                config.max_contexts,
                self.backend.name()
            );

            let mut contexts = Vec::with_capacity(config.max_contexts);
            for slot in 0..config.max_contexts {
                match self.backend.create_context(slot) {
                    Ok(context) => contexts.push(context),
                    Err(e) => {
                        warn!("Failed to create context for slot {}: {}", slot, e);
                        return Err(e);
                    }
                }
            }

            let table = SlotTable {
                holders: (0..contexts.len()).map(|_| None).collect(),
                record_history: config.record_history,
                ..Default::default()
            };

            info!("Context pool populated with {} slots", contexts.len());

            Ok(Arena {
                contexts: contexts.into_boxed_slice(),
                table: Mutex::new(table),
            })
        })
    }

    /// Phase 1: scan for a free slot and mark it held
    fn try_reserve(&self, arena: &Arena) -> Option<ContextHandle> {
        let mut table = arena.table.lock();
        let slot = table.holders.iter().position(Option::is_none)?;

        table.next_token += 1;
        let token = table.next_token;
        let now = Instant::now();
        let label = thread_label();

        if table.record_history {
            table.history.push(LeaseRecord {
                slot,
                token,
                thread: label.clone(),
                acquired_at: now,
                released_at: None,
            });
        }

        table.holders[slot] = Some(Holder {
            token,
            thread: thread::current().id(),
            thread_label: label,
            since: now,
        });
        table.in_use += 1;
        table.peak_in_use = table.peak_in_use.max(table.in_use);
        metrics::gauge!(metric_names::CONTEXTS_IN_USE).set(table.in_use as f64);

        Some(ContextHandle { slot, token })
    }

    /// Undo a reservation whose activation never succeeded
    fn unreserve(&self, arena: &Arena, handle: ContextHandle) {
        let mut table = arena.table.lock();
        let held = matches!(&table.holders[handle.slot], Some(h) if h.token == handle.token);
        if held {
            table.holders[handle.slot] = None;
            table.in_use -= 1;
            table.close_record(handle.slot, handle.token);
            metrics::gauge!(metric_names::CONTEXTS_IN_USE).set(table.in_use as f64);
        }
    }

    /// Phase 2: make the reserved context current on this thread
    fn activate(
        &self,
        arena: &Arena,
        handle: ContextHandle,
        policy: &AcquirePolicy,
        started: Instant,
        single_attempt: bool,
    ) -> Result<()> {
        let context = &arena.contexts[handle.slot];
        let mut attempts = 0u32;

        loop {
            match context.make_current() {
                Ok(()) => return Ok(()),
                Err(reason) => {
                    attempts += 1;
                    self.counters.activation_retries.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!(metric_names::ACTIVATION_RETRIES).increment(1);

                    if single_attempt
                        || policy.activation_exhausted(attempts)
                        || policy.expired(started)
                    {
                        warn!(
                            "Giving up activating slot {} after {} attempts: {}",
                            handle.slot, attempts, reason
                        );
                        self.unreserve(arena, handle);
                        return Err(EngineError::ActivationFailure {
                            slot: handle.slot,
                            attempts,
                            reason,
                        });
                    }

                    debug!(
                        "Activation of slot {} failed ({}), retrying in {:?}",
                        handle.slot, reason, policy.backoff
                    );
                    thread::sleep(policy.backoff);
                }
            }
        }
    }

    fn record_acquire(&self, handle: ContextHandle, waited: Duration) {
        self.counters.acquires.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(metric_names::CONTEXT_ACQUIRES).increment(1);
        metrics::histogram!(metric_names::CONTEXT_WAIT_SECONDS).record(waited.as_secs_f64());
        debug!(
            "Acquired context slot {} (token {}) after {:?}",
            handle.slot, handle.token, waited
        );
    }

    /// Acquire a context using the pool's policy (blocks while all are busy)
    pub fn acquire(&self) -> Result<ContextHandle> {
        let policy = self.policy();
        self.acquire_with(&policy)
    }

    /// Acquire a context with an explicit policy
    ///
    /// Returns only once a slot is reserved and its context is current on
    /// the calling thread.
    pub fn acquire_with(&self, policy: &AcquirePolicy) -> Result<ContextHandle> {
        policy.validate()?;
        let arena = self.arena()?;
        let started = Instant::now();

        let handle = loop {
            if let Some(handle) = self.try_reserve(arena) {
                break handle;
            }

            if policy.expired(started) {
                self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "No context became free within {:?} ({} slots busy)",
                    started.elapsed(),
                    arena.contexts.len()
                );
                return Err(EngineError::ResourceExhaustion {
                    waited: started.elapsed(),
                    capacity: arena.contexts.len(),
                });
            }

            thread::sleep(policy.backoff);
        };

        self.activate(arena, handle, policy, started, false)?;
        self.record_acquire(handle, started.elapsed());
        Ok(handle)
    }

    /// Single non-blocking attempt
    ///
    /// `Ok(None)` when every slot is busy or activation failed on the only try.
    pub fn try_acquire(&self) -> Result<Option<ContextHandle>> {
        let arena = self.arena()?;
        let started = Instant::now();
        let policy = self.policy();

        let handle = match self.try_reserve(arena) {
            Some(handle) => handle,
            None => return Ok(None),
        };

        match self.activate(arena, handle, &policy, started, true) {
            Ok(()) => {
                self.record_acquire(handle, started.elapsed());
                Ok(Some(handle))
            }
            Err(EngineError::ActivationFailure { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Acquire a context wrapped in a guard that releases it on drop
    pub fn lease(&self) -> Result<ContextLease<'_>> {
        let policy = self.policy();
        self.lease_with(&policy)
    }

    /// [`lease`](Self::lease) with an explicit policy
    pub fn lease_with(&self, policy: &AcquirePolicy) -> Result<ContextLease<'_>> {
        let handle = self.acquire_with(policy)?;
        let context = self.context(&handle)?;
        Ok(ContextLease {
            pool: self,
            handle,
            context,
            released: false,
            _thread_bound: PhantomData,
        })
    }

    /// Native context behind a handle
    pub fn context(&self, handle: &ContextHandle) -> Result<Arc<dyn RenderContext>> {
        self.arena
            .get()
            .and_then(|arena| arena.contexts.get(handle.slot))
            .cloned()
            .ok_or_else(|| EngineError::InvalidRelease {
                slot: handle.slot,
                reason: "no such slot in the pool".to_string(),
            })
    }

    fn invalid_release(&self, table: &SlotTable, handle: ContextHandle, reason: String) -> EngineError {
        error!(
            slot = handle.slot,
            token = handle.token,
            thread = %thread_label(),
            "Invalid context release: {}. Slot table: [{}]",
            reason,
            table.describe()
        );
        EngineError::InvalidRelease {
            slot: handle.slot,
            reason,
        }
    }

    /// Return a context to the pool
    ///
    /// Must be called from the thread that acquired it, after every GPU-side
    /// object created against the context has been destroyed. Releasing a
    /// handle that is not checked out by the caller is rejected and leaves
    /// the pool unchanged.
    pub fn release(&self, handle: ContextHandle) -> Result<()> {
        let arena = self.arena.get().ok_or_else(|| EngineError::InvalidRelease {
            slot: handle.slot,
            reason: "pool has not been populated".to_string(),
        })?;

        let context = match arena.contexts.get(handle.slot) {
            Some(context) => context,
            None => {
                let table = arena.table.lock();
                return Err(self.invalid_release(
                    &table,
                    handle,
                    format!("pool only has {} slots", arena.contexts.len()),
                ));
            }
        };

        {
            let table = arena.table.lock();
            let me = thread::current().id();
            let problem = match &table.holders[handle.slot] {
                None => Some("slot is not checked out (double release?)".to_string()),
                Some(holder) if holder.token != handle.token => Some(format!(
                    "stale handle: token {} but slot is held under token {}",
                    handle.token, holder.token
                )),
                Some(holder) if holder.thread != me => Some(format!(
                    "slot is held by thread {}",
                    holder.thread_label
                )),
                Some(_) => None,
            };
            if let Some(reason) = problem {
                return Err(self.invalid_release(&table, handle, reason));
            }
        }

        let live = context.live_resources();
        if live > 0 {
            error!(
                "Refusing to release slot {}: {} GPU resources still alive",
                handle.slot, live
            );
            return Err(EngineError::DirtyContext {
                slot: handle.slot,
                live,
            });
        }

        context.release_current()?;

        let mut table = arena.table.lock();
        table.holders[handle.slot] = None;
        table.in_use -= 1;
        table.close_record(handle.slot, handle.token);
        metrics::gauge!(metric_names::CONTEXTS_IN_USE).set(table.in_use as f64);
        drop(table);

        self.counters.releases.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(metric_names::CONTEXT_RELEASES).increment(1);
        debug!("Released context slot {} (token {})", handle.slot, handle.token);

        Ok(())
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        let (capacity, populated, in_use, peak_in_use) = match self.arena.get() {
            Some(arena) => {
                let table = arena.table.lock();
                (arena.contexts.len(), true, table.in_use, table.peak_in_use)
            }
            None => (self.config.lock().max_contexts, false, 0, 0),
        };

        PoolStats {
            capacity,
            populated,
            in_use,
            available: capacity - in_use,
            peak_in_use,
            acquires: self.counters.acquires.load(Ordering::Relaxed),
            releases: self.counters.releases.load(Ordering::Relaxed),
            activation_retries: self.counters.activation_retries.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
        }
    }

    /// Lease history (empty unless `record_history` was enabled)
    pub fn history(&self) -> Vec<LeaseRecord> {
        self.arena
            .get()
            .map(|arena| arena.table.lock().history.clone())
            .unwrap_or_default()
    }
}

/// A context checked out by the current thread
///
/// Released on drop, including while unwinding from a panic. The guard is
/// neither `Send` nor `Sync`: the context is only valid on this thread.
pub struct ContextLease<'p> {
    pool: &'p ContextPool,
    handle: ContextHandle,
    context: Arc<dyn RenderContext>,
    released: bool,
    _thread_bound: PhantomData<*const ()>,
}

impl<'p> ContextLease<'p> {
    pub fn handle(&self) -> ContextHandle {
        self.handle
    }

    pub fn slot(&self) -> usize {
        self.handle.slot
    }

    pub fn context(&self) -> &dyn RenderContext {
        self.context.as_ref()
    }

    /// Release explicitly, surfacing any error
    pub fn release(mut self) -> Result<()> {
        let result = self.pool.release(self.handle);
        if result.is_ok() {
            self.released = true;
        }
        result
    }
}

impl Drop for ContextLease<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.pool.release(self.handle) {
            error!("Failed to release context slot {} on drop: {}", self.handle.slot, e);
        }
    }
}
