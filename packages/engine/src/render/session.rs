// packages/engine/src/render/session.rs
//! Render session bound to one leased context
//!
//! A session creates its GPU-side objects (colour target, depth target,
//! scene buffer) against the context that is current on the calling thread
//! and frees them in [`RenderSession::teardown`], which also runs on drop.
//! The context must come back clean before the pool accepts it, so a session
//! always lives strictly inside its lease.

use crate::observability::metric_names;
use crate::render::camera::Camera;
use crate::render::image::{DepthFrame, DepthImage, Frame, Image, RenderOutput};
use crate::runtime::backend::{thread_label, GpuResource, GpuResourceKind, RenderContext};
use crate::runtime::context_pool::ContextLease;
use crate::sim::world::World;
use crate::utils::errors::{EngineError, Result};
use nalgebra::Vector3;
use tracing::{debug, warn};

const SCENE_BYTES_PER_LINK: usize = 64;
const JOINT_COLOR: [u8; 3] = [90, 90, 90];

/// Steps between captured frames for a camera running at `fps`
///
/// Never less than one step.
pub fn capture_cadence(timestep: f64, fps: u32) -> u64 {
    if fps == 0 || timestep <= 0.0 {
        return 1;
    }
    ((1.0 / (timestep * fps as f64)).floor() as u64).max(1)
}

/// Session options
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Keep every rendered colour frame for export
    pub recording: bool,

    /// Keep every rendered depth frame for export
    pub depth_recording: bool,

    pub background: [u8; 3],
    pub fov_degrees: f64,
    pub draw_joints: bool,

    /// Playback rate written into exported recordings
    pub fps: u32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            recording: false,
            depth_recording: false,
            background: [40, 44, 52],
            fov_degrees: Camera::DEFAULT_FOV_DEGREES,
            draw_joints: true,
            fps: 30,
        }
    }
}

/// Renderer bound to a context and a world
pub struct RenderSession<'c> {
    context: &'c dyn RenderContext,
    slot: usize,
    camera: Camera,
    options: RenderOptions,
    color: Image,
    depth: DepthImage,
    resources: Vec<GpuResource>,
    frames: Vec<Frame>,
    depth_frames: Vec<DepthFrame>,
    rendered: u64,
    torn_down: bool,
}

impl<'c> RenderSession<'c> {
    /// Bind to the context held by `lease`
    pub fn bind(
        lease: &'c ContextLease<'_>,
        world: &World,
        width: u32,
        height: u32,
        options: RenderOptions,
    ) -> Result<Self> {
        Self::bind_context(lease.context(), lease.slot(), world, width, height, options)
    }

    /// Bind to a context that is current on this thread
    pub fn bind_context(
        context: &'c dyn RenderContext,
        slot: usize,
        world: &World,
        width: u32,
        height: u32,
        options: RenderOptions,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(EngineError::RenderFailure(format!(
                "invalid render size {}x{}",
                width, height
            )));
        }

        if !context.is_current() {
            return Err(EngineError::ContextNotCurrent {
                slot,
                thread: thread_label(),
            });
        }

        let pixels = width as usize * height as usize;
        let links: usize = world.robots().iter().map(|r| r.skeleton().num_links()).sum();
        let requests = [
            (GpuResourceKind::ColorTarget, pixels * 3),
            (GpuResourceKind::DepthTarget, pixels * 4),
            (GpuResourceKind::SceneBuffer, links.max(1) * SCENE_BYTES_PER_LINK),
        ];

        let mut resources = Vec::with_capacity(requests.len());
        for (kind, bytes) in requests {
            match context.allocate(kind, bytes) {
                Ok(resource) => resources.push(resource),
                Err(e) => {
                    for resource in resources {
                        context.free(resource);
                    }
                    return Err(e);
                }
            }
        }

        debug!(
            "Bound render session to slot {} ({}x{}, {} links)",
            slot, width, height, links
        );

        Ok(Self {
            context,
            slot,
            camera: Camera::new(width, height).with_fov_degrees(options.fov_degrees),
            color: Image::filled(width, height, options.background),
            depth: DepthImage::new(width, height),
            options,
            resources,
            frames: Vec::new(),
            depth_frames: Vec::new(),
            rendered: 0,
            torn_down: false,
        })
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn look_at(&mut self, eye: Vector3<f64>, target: Vector3<f64>, up: Vector3<f64>) -> Result<()> {
        self.camera.look_at(eye, target, up)
    }

    pub fn set_recording(&mut self, enabled: bool, depth_enabled: bool) {
        self.options.recording = enabled;
        self.options.depth_recording = depth_enabled;
    }

    pub fn recording(&self) -> bool {
        self.options.recording
    }

    pub fn depth_recording(&self) -> bool {
        self.options.depth_recording
    }

    /// Frames rendered so far, recorded or not
    pub fn rendered_frames(&self) -> u64 {
        self.rendered
    }

    pub fn recorded_frames(&self) -> usize {
        self.frames.len()
    }

    /// Render the current state of `world`
    pub fn render_frame(&mut self, world: &World) -> Result<&Image> {
        if self.torn_down {
            return Err(EngineError::RenderFailure(format!(
                "render session on slot {} was torn down",
                self.slot
            )));
        }
        if !self.context.is_current() {
            return Err(EngineError::ContextNotCurrent {
                slot: self.slot,
                thread: thread_label(),
            });
        }

        self.color.fill(self.options.background);
        self.depth.clear();

        for robot in world.robots() {
            let skeleton = robot.skeleton();
            let poses = skeleton.body_poses();

            if self.options.draw_joints {
                for joint in &skeleton.joints {
                    let from = joint
                        .parent
                        .map(|p| poses[p].translation.vector)
                        .unwrap_or(skeleton.base.translation.vector);
                    let to = poses[joint.child].translation.vector;
                    self.draw_segment(&from, &to, JOINT_COLOR);
                }
            }

            for (link, pose) in skeleton.links.iter().zip(&poses) {
                self.draw_disc(&pose.translation.vector, link.radius, link.color);
            }
        }

        self.rendered += 1;

        if self.options.recording {
            self.frames.push(Frame {
                step: world.steps(),
                time: world.time(),
                image: self.color.clone(),
            });
            metrics::counter!(metric_names::FRAMES_CAPTURED).increment(1);
        }
        if self.options.depth_recording {
            self.depth_frames.push(DepthFrame {
                step: world.steps(),
                time: world.time(),
                depth: self.depth.clone(),
            });
        }

        Ok(&self.color)
    }

    /// Last rendered colour image
    pub fn image(&self) -> Option<&Image> {
        (self.rendered > 0).then_some(&self.color)
    }

    /// Depth buffer as a grayscale image for visualisation
    pub fn depth_image(&self) -> Option<Image> {
        if self.rendered == 0 {
            return None;
        }
        let (near, far) = self.depth.range().unwrap_or((0.0, 1.0));
        Some(self.depth.to_grayscale(near, far))
    }

    /// Depth buffer values
    pub fn raw_depth_image(&self) -> Option<&DepthImage> {
        (self.rendered > 0).then_some(&self.depth)
    }

    /// Move recorded frames out of the session
    pub fn take_frames(&mut self) -> Vec<Frame> {
        std::mem::take(&mut self.frames)
    }

    /// Move everything needed for export out of the session
    pub fn take_output(&mut self) -> RenderOutput {
        RenderOutput {
            last_image: self.image().cloned(),
            frames: std::mem::take(&mut self.frames),
            depth_frames: std::mem::take(&mut self.depth_frames),
            fps: self.options.fps,
        }
    }

    /// Free every GPU-side object created by `bind`
    ///
    /// Idempotent. After teardown the bound context holds nothing from
    /// this session and may be returned to the pool.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        let count = self.resources.len();
        for resource in self.resources.drain(..) {
            self.context.free(resource);
        }
        self.torn_down = true;
        debug!("Tore down render session on slot {} ({} GPU objects)", self.slot, count);
    }

    fn draw_segment(&mut self, from: &Vector3<f64>, to: &Vector3<f64>, color: [u8; 3]) {
        let (Some(a), Some(b)) = (self.camera.project(from), self.camera.project(to)) else {
            return;
        };

        let span = (b.x - a.x).abs().max((b.y - a.y).abs()).ceil();
        let limit = (self.color.width() + self.color.height()) as f64 * 2.0;
        if !span.is_finite() || span > limit {
            return;
        }
        let samples = span as usize + 1;

        for i in 0..=samples {
            let t = i as f64 / samples as f64;
            let x = a.x + (b.x - a.x) * t;
            let y = a.y + (b.y - a.y) * t;
            if x < 0.0 || y < 0.0 {
                continue;
            }
            let depth = a.depth + (b.depth - a.depth) * t;
            let (px, py) = (x as u32, y as u32);
            if self.depth.test_and_set(px, py, depth as f32) {
                self.color.put_pixel(px, py, color);
            }
        }
    }

    fn draw_disc(&mut self, center: &Vector3<f64>, radius: f64, color: [u8; 3]) {
        let Some(p) = self.camera.project(center) else {
            return;
        };

        let width = self.color.width() as f64;
        let height = self.color.height() as f64;
        let r = (radius * p.scale).min(width.max(height)).max(0.5);

        let x0 = (p.x - r).floor().max(0.0);
        let x1 = (p.x + r).ceil().min(width - 1.0);
        let y0 = (p.y - r).floor().max(0.0);
        let y1 = (p.y + r).ceil().min(height - 1.0);
        if x0 > x1 || y0 > y1 {
            return;
        }

        for py in y0 as u32..=y1 as u32 {
            for px in x0 as u32..=x1 as u32 {
                let dx = px as f64 + 0.5 - p.x;
                let dy = py as f64 + 0.5 - p.y;
                let d2 = (dx * dx + dy * dy) / (r * r);
                if d2 > 1.0 {
                    continue;
                }

                // sphere bulges towards the camera
                let depth = p.depth - radius * (1.0 - d2).sqrt();
                if self.depth.test_and_set(px, py, depth as f32) {
                    let shade = 1.0 - 0.4 * d2;
                    let shaded = color.map(|c| (c as f64 * shade).round() as u8);
                    self.color.put_pixel(px, py, shaded);
                }
            }
        }
    }
}

impl Drop for RenderSession<'_> {
    fn drop(&mut self) {
        if !self.torn_down && !self.resources.is_empty() {
            warn!("Render session on slot {} dropped without teardown", self.slot);
        }
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::backend::ContextBackend;
    use crate::runtime::headless::HeadlessBackend;
    use crate::sim::robot::Robot;

    fn world_with_arm() -> World {
        let mut world = World::new(0.001).unwrap();
        let mut arm = Robot::serial_arm("arm", 3);
        arm.fix_to_world();
        world.add_robot(arm);
        world
    }

    #[test]
    fn test_capture_cadence() {
        assert_eq!(capture_cadence(0.001, 30), 33);
        assert_eq!(capture_cadence(0.01, 100), 1);
        assert_eq!(capture_cadence(0.1, 30), 1);
        assert_eq!(capture_cadence(0.001, 0), 1);
    }

    #[test]
    fn test_bind_requires_current_context() {
        let backend = HeadlessBackend::new();
        let context = backend.create_context(0).unwrap();
        let world = world_with_arm();

        let result = RenderSession::bind_context(
            context.as_ref(),
            0,
            &world,
            32,
            32,
            RenderOptions::default(),
        );
        assert!(matches!(result, Err(EngineError::ContextNotCurrent { slot: 0, .. })));
        assert_eq!(context.live_resources(), 0);
    }

    #[test]
    fn test_teardown_frees_gpu_objects() {
        let backend = HeadlessBackend::new();
        let context = backend.create_context(0).unwrap();
        context.make_current().unwrap();
        let world = world_with_arm();

        let mut session = RenderSession::bind_context(
            context.as_ref(),
            0,
            &world,
            32,
            32,
            RenderOptions::default(),
        )
        .unwrap();
        assert_eq!(context.live_resources(), 3);

        session.teardown();
        assert_eq!(context.live_resources(), 0);
        assert!(session.render_frame(&world).is_err());

        drop(session);
        assert_eq!(context.live_resources(), 0);
        context.release_current().unwrap();
    }

    #[test]
    fn test_drop_tears_down() {
        let backend = HeadlessBackend::new();
        let context = backend.create_context(0).unwrap();
        context.make_current().unwrap();
        let world = world_with_arm();

        {
            let _session = RenderSession::bind_context(
                context.as_ref(),
                0,
                &world,
                16,
                16,
                RenderOptions::default(),
            )
            .unwrap();
            assert_eq!(context.live_resources(), 3);
        }
        assert_eq!(context.live_resources(), 0);
    }

    #[test]
    fn test_render_draws_robot() {
        let backend = HeadlessBackend::new();
        let context = backend.create_context(0).unwrap();
        context.make_current().unwrap();
        let world = world_with_arm();

        let options = RenderOptions::default();
        let background = options.background;
        let mut session =
            RenderSession::bind_context(context.as_ref(), 0, &world, 64, 48, options).unwrap();
        session
            .look_at(Vector3::new(0.0, 3.0, 0.5), Vector3::new(0.0, 0.0, 0.5), Vector3::z())
            .unwrap();

        assert!(session.image().is_none());
        let image = session.render_frame(&world).unwrap();
        assert_eq!((image.width(), image.height()), (64, 48));

        let drawn = image
            .pixels()
            .chunks_exact(3)
            .filter(|px| *px != background)
            .count();
        assert!(drawn > 0);

        let raw = session.raw_depth_image().unwrap();
        assert!(raw.range().is_some());
        assert!(session.depth_image().is_some());
    }

    #[test]
    fn test_recording_accumulates_frames() {
        let backend = HeadlessBackend::new();
        let context = backend.create_context(0).unwrap();
        context.make_current().unwrap();
        let mut world = world_with_arm();

        let mut session = RenderSession::bind_context(
            context.as_ref(),
            0,
            &world,
            16,
            16,
            RenderOptions::default(),
        )
        .unwrap();

        session.render_frame(&world).unwrap();
        session.set_recording(true, true);
        for _ in 0..3 {
            world.advance().unwrap();
            session.render_frame(&world).unwrap();
        }

        assert_eq!(session.rendered_frames(), 4);
        let output = session.take_output();
        assert_eq!(output.frames.len(), 3);
        assert_eq!(output.depth_frames.len(), 3);
        assert_eq!(output.frames[0].step, 1);
        assert!(output.last_image.is_some());
        assert_eq!(session.recorded_frames(), 0);
    }
}
