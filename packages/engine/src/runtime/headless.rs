// packages/engine/src/runtime/headless.rs
//! Headless software contexts
//!
//! Stand-in for a windowless GL/EGL backend. Contexts behave like the real
//! thing where the pool cares:
//! - A context current on one thread refuses activation on another
//! - GPU-side objects can only be created while current
//! - Activation can be made to fail transiently (fault injection)

use crate::runtime::backend::{thread_label, ContextBackend, GpuResource, GpuResourceKind, RenderContext};
use crate::utils::errors::{EngineError, Result};
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{debug, trace};

/// Fault-injection and capacity knobs for headless contexts
#[derive(Debug, Clone, Default)]
pub struct HeadlessConfig {
    /// Each context fails its first N activations
    pub transient_failures: u32,

    /// Probability (0-1) that any activation attempt fails
    pub failure_rate: f64,

    /// GPU memory available per context; `None` is unlimited
    pub memory_budget_bytes: Option<usize>,
}

/// Backend producing [`HeadlessContext`]s
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    config: HeadlessConfig,
    created: AtomicUsize,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: HeadlessConfig) -> Self {
        Self {
            config,
            created: AtomicUsize::new(0),
        }
    }

    /// Number of contexts this backend has created
    pub fn contexts_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl ContextBackend for HeadlessBackend {
    fn name(&self) -> &str {
        "headless"
    }

    fn create_context(&self, slot: usize) -> Result<Arc<dyn RenderContext>> {
        debug!("Creating headless context for slot {}", slot);
        self.created.fetch_add(1, Ordering::SeqCst);

        Ok(Arc::new(HeadlessContext {
            slot,
            current: Mutex::new(None),
            remaining_failures: AtomicU32::new(self.config.transient_failures),
            failure_rate: self.config.failure_rate.clamp(0.0, 1.0),
            memory_budget: self.config.memory_budget_bytes,
            next_resource: AtomicU64::new(1),
            live_count: AtomicUsize::new(0),
            live_bytes: AtomicUsize::new(0),
            activations: AtomicU64::new(0),
        }))
    }
}

/// Software context with thread affinity and resource accounting
#[derive(Debug)]
pub struct HeadlessContext {
    slot: usize,
    current: Mutex<Option<ThreadId>>,
    remaining_failures: AtomicU32,
    failure_rate: f64,
    memory_budget: Option<usize>,
    next_resource: AtomicU64,
    live_count: AtomicUsize,
    live_bytes: AtomicUsize,
    activations: AtomicU64,
}

impl HeadlessContext {
    /// Successful activations so far
    pub fn activations(&self) -> u64 {
        self.activations.load(Ordering::Relaxed)
    }

    fn inject_failure(&self) -> Option<&'static str> {
        let forced = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if forced {
            return Some("driver busy");
        }

        if self.failure_rate > 0.0 && rand::thread_rng().gen_bool(self.failure_rate) {
            return Some("driver busy (random)");
        }

        None
    }
}

impl RenderContext for HeadlessContext {
    fn make_current(&self) -> std::result::Result<(), String> {
        let me = thread::current().id();
        let mut current = self.current.lock();

        match *current {
            Some(owner) if owner == me => return Ok(()),
            Some(_) => {
                return Err(format!(
                    "context slot {} is current on another thread",
                    self.slot
                ))
            }
            None => {}
        }

        if let Some(reason) = self.inject_failure() {
            trace!("Activation of slot {} failed: {}", self.slot, reason);
            return Err(reason.to_string());
        }

        *current = Some(me);
        self.activations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn release_current(&self) -> Result<()> {
        let me = thread::current().id();
        let mut current = self.current.lock();

        match *current {
            Some(owner) if owner != me => Err(EngineError::ContextNotCurrent {
                slot: self.slot,
                thread: thread_label(),
            }),
            _ => {
                *current = None;
                Ok(())
            }
        }
    }

    fn is_current(&self) -> bool {
        *self.current.lock() == Some(thread::current().id())
    }

    fn allocate(&self, kind: GpuResourceKind, bytes: usize) -> Result<GpuResource> {
        if !self.is_current() {
            return Err(EngineError::ContextNotCurrent {
                slot: self.slot,
                thread: thread_label(),
            });
        }

        if let Some(budget) = self.memory_budget {
            let used = self.live_bytes.load(Ordering::SeqCst);
            if used + bytes > budget {
                return Err(EngineError::RenderFailure(format!(
                    "out of GPU memory on slot {}: {} + {} bytes exceeds {}",
                    self.slot, used, bytes, budget
                )));
            }
        }

        let id = self.next_resource.fetch_add(1, Ordering::Relaxed);
        self.live_count.fetch_add(1, Ordering::SeqCst);
        self.live_bytes.fetch_add(bytes, Ordering::SeqCst);
        trace!("Allocated {:?} #{} ({} bytes) on slot {}", kind, id, bytes, self.slot);

        Ok(GpuResource::new(id, kind, bytes))
    }

    fn free(&self, resource: GpuResource) {
        trace!("Freeing {:?} #{} on slot {}", resource.kind(), resource.id(), self.slot);
        self.live_count.fetch_sub(1, Ordering::SeqCst);
        self.live_bytes.fetch_sub(resource.bytes(), Ordering::SeqCst);
    }

    fn live_resources(&self) -> usize {
        self.live_count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_affinity() {
        let backend = HeadlessBackend::new();
        let context = backend.create_context(0).unwrap();

        context.make_current().unwrap();
        assert!(context.is_current());

        let other = Arc::clone(&context);
        let result = thread::spawn(move || (other.make_current(), other.is_current()))
            .join()
            .unwrap();
        assert!(result.0.is_err());
        assert!(!result.1);

        context.release_current().unwrap();
        assert!(!context.is_current());

        let other = Arc::clone(&context);
        let activated = thread::spawn(move || {
            let ok = other.make_current().is_ok();
            other.release_current().unwrap();
            ok
        })
        .join()
        .unwrap();
        assert!(activated);
    }

    #[test]
    fn test_transient_failures() {
        let backend = HeadlessBackend::with_config(HeadlessConfig {
            transient_failures: 2,
            ..Default::default()
        });
        let context = backend.create_context(3).unwrap();

        assert!(context.make_current().is_err());
        assert!(context.make_current().is_err());
        assert!(context.make_current().is_ok());
        assert_eq!(backend.contexts_created(), 1);
    }

    #[test]
    fn test_allocation_requires_current() {
        let backend = HeadlessBackend::new();
        let context = backend.create_context(0).unwrap();

        let err = context.allocate(GpuResourceKind::ColorTarget, 64).unwrap_err();
        assert!(matches!(err, EngineError::ContextNotCurrent { slot: 0, .. }));

        context.make_current().unwrap();
        let color = context.allocate(GpuResourceKind::ColorTarget, 64).unwrap();
        let depth = context.allocate(GpuResourceKind::DepthTarget, 32).unwrap();
        assert_eq!(context.live_resources(), 2);
        assert_ne!(color.id(), depth.id());

        context.free(color);
        context.free(depth);
        assert_eq!(context.live_resources(), 0);
    }

    #[test]
    fn test_memory_budget() {
        let backend = HeadlessBackend::with_config(HeadlessConfig {
            memory_budget_bytes: Some(100),
            ..Default::default()
        });
        let context = backend.create_context(0).unwrap();
        context.make_current().unwrap();

        let first = context.allocate(GpuResourceKind::SceneBuffer, 80).unwrap();
        let err = context.allocate(GpuResourceKind::SceneBuffer, 40).unwrap_err();
        assert!(matches!(err, EngineError::RenderFailure(_)));
        context.free(first);
    }
}
