// packages/engine/src/render/mod.rs
//! Offscreen rendering
//!
//! - **Camera**: look-at pinhole projection
//! - **Image**: colour and depth buffers, captured frames
//! - **Session**: renderer bound to one leased context
//!
//! ```text
//! ContextLease ──bind──▶ RenderSession ──render_frame(&World)──▶ Image
//!      ▲                      │
//!      └──── release ◀── teardown (frees GPU objects)
//! ```

pub mod camera;
pub mod image;
pub mod session;

pub use camera::Camera;
pub use image::{DepthFrame, DepthImage, Frame, Image, RenderOutput};
pub use session::{capture_cadence, RenderOptions, RenderSession};
