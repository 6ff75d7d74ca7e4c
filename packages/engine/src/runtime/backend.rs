// packages/engine/src/runtime/backend.rs
//! Native rendering-context seam
//!
//! The pool never talks to a graphics driver directly. A [`ContextBackend`]
//! creates one [`RenderContext`] per pool slot; the context exposes the
//! thread-affinity primitives (make current / release) and accounts for the
//! GPU-side objects a render session creates against it.

use crate::utils::errors::Result;
use std::fmt;
use std::sync::Arc;
use std::thread;

/// Kind of GPU-side object owned by a render session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuResourceKind {
    ColorTarget,
    DepthTarget,
    SceneBuffer,
}

/// A GPU-side object allocated from a context
///
/// Not `Clone`: handing it back to [`RenderContext::free`] consumes it.
#[derive(Debug, PartialEq, Eq)]
pub struct GpuResource {
    id: u64,
    kind: GpuResourceKind,
    bytes: usize,
}

impl GpuResource {
    /// Backends mint resources; sessions only hold and return them
    pub fn new(id: u64, kind: GpuResourceKind, bytes: usize) -> Self {
        Self { id, kind, bytes }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> GpuResourceKind {
        self.kind
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

/// One native rendering context
///
/// A context is current on at most one thread at a time and must be
/// explicitly released from that thread before another thread may activate it.
pub trait RenderContext: Send + Sync + fmt::Debug {
    /// Bind the context to the calling thread
    ///
    /// Failures are transient (driver contention); the caller retries.
    fn make_current(&self) -> std::result::Result<(), String>;

    /// Unbind the context from the calling thread
    fn release_current(&self) -> Result<()>;

    /// Whether the context is current on the calling thread
    fn is_current(&self) -> bool;

    /// Create a GPU-side object; the context must be current on this thread
    fn allocate(&self, kind: GpuResourceKind, bytes: usize) -> Result<GpuResource>;

    /// Destroy a GPU-side object created by [`allocate`](Self::allocate)
    fn free(&self, resource: GpuResource);

    /// Number of GPU-side objects currently alive on this context
    fn live_resources(&self) -> usize;
}

/// Factory for native contexts, one per pool slot
pub trait ContextBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Create the context that will live in `slot` for the pool's lifetime
    fn create_context(&self, slot: usize) -> Result<Arc<dyn RenderContext>>;
}

/// Human-readable identity of the calling thread
pub(crate) fn thread_label() -> String {
    let current = thread::current();
    match current.name() {
        Some(name) => name.to_string(),
        None => format!("{:?}", current.id()),
    }
}
