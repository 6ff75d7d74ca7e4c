// packages/engine/src/render/camera.rs
//! Look-at pinhole camera

use crate::utils::errors::{EngineError, Result};
use nalgebra::{Isometry3, Point3, Vector3};

/// A point projected onto the image plane
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projected {
    pub x: f64,
    pub y: f64,

    /// Distance along the viewing direction
    pub depth: f64,

    /// Pixels per world unit at this depth
    pub scale: f64,
}

/// Pinhole camera looking from `eye` towards `target`
#[derive(Debug, Clone)]
pub struct Camera {
    eye: Point3<f64>,
    target: Point3<f64>,
    up: Vector3<f64>,
    fov_y: f64,
    near: f64,
    far: f64,
    width: u32,
    height: u32,
    view: Isometry3<f64>,
}

impl Camera {
    pub const DEFAULT_FOV_DEGREES: f64 = 60.0;

    pub fn new(width: u32, height: u32) -> Self {
        let eye = Point3::new(0.0, 3.0, 1.0);
        let target = Point3::new(0.0, 0.0, 0.5);
        let up = Vector3::z();
        Self {
            eye,
            target,
            up,
            fov_y: Self::DEFAULT_FOV_DEGREES.to_radians(),
            near: 0.01,
            far: 100.0,
            width,
            height,
            view: Isometry3::look_at_rh(&eye, &target, &up),
        }
    }

    pub fn with_fov_degrees(mut self, degrees: f64) -> Self {
        self.fov_y = degrees.clamp(1.0, 179.0).to_radians();
        self
    }

    /// Point the camera; rejects degenerate eye/target/up combinations
    pub fn look_at(&mut self, eye: Vector3<f64>, target: Vector3<f64>, up: Vector3<f64>) -> Result<()> {
        let forward = target - eye;
        if forward.norm() < 1e-9 {
            return Err(EngineError::RenderFailure(
                "camera eye and target coincide".to_string(),
            ));
        }
        if up.norm() < 1e-9 || forward.cross(&up).norm() < 1e-9 {
            return Err(EngineError::RenderFailure(
                "camera up vector is parallel to the viewing direction".to_string(),
            ));
        }

        self.eye = Point3::from(eye);
        self.target = Point3::from(target);
        self.up = up;
        self.view = Isometry3::look_at_rh(&self.eye, &self.target, &self.up);
        Ok(())
    }

    pub fn eye(&self) -> Vector3<f64> {
        self.eye.coords
    }

    pub fn target(&self) -> Vector3<f64> {
        self.target.coords
    }

    pub fn near(&self) -> f64 {
        self.near
    }

    pub fn far(&self) -> f64 {
        self.far
    }

    /// Project a world point; `None` when outside the near/far range
    pub fn project(&self, point: &Vector3<f64>) -> Option<Projected> {
        let view_point = self.view.transform_point(&Point3::from(*point));
        let depth = -view_point.z;
        if depth < self.near || depth > self.far {
            return None;
        }

        let focal = (self.height as f64 / 2.0) / (self.fov_y / 2.0).tan();
        let x = self.width as f64 / 2.0 + focal * view_point.x / depth;
        let y = self.height as f64 / 2.0 - focal * view_point.y / depth;

        Some(Projected {
            x,
            y,
            depth,
            scale: focal / depth,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_projects_to_center() {
        let mut camera = Camera::new(640, 480);
        camera
            .look_at(Vector3::new(0.0, 3.0, 2.0), Vector3::new(0.0, 0.0, 0.25), Vector3::z())
            .unwrap();

        let p = camera.project(&Vector3::new(0.0, 0.0, 0.25)).unwrap();
        assert!((p.x - 320.0).abs() < 1e-6);
        assert!((p.y - 240.0).abs() < 1e-6);
        assert!(p.depth > 0.0);
    }

    #[test]
    fn test_points_behind_camera_are_clipped() {
        let camera = Camera::new(64, 64);
        assert!(camera.project(&Vector3::new(0.0, 10.0, 1.0)).is_none());
    }

    #[test]
    fn test_up_is_up() {
        let mut camera = Camera::new(100, 100);
        camera
            .look_at(Vector3::new(0.0, 5.0, 0.0), Vector3::zeros(), Vector3::z())
            .unwrap();
        let above = camera.project(&Vector3::new(0.0, 0.0, 1.0)).unwrap();
        assert!(above.y < 50.0);
    }

    #[test]
    fn test_degenerate_look_at() {
        let mut camera = Camera::new(10, 10);
        assert!(camera
            .look_at(Vector3::zeros(), Vector3::zeros(), Vector3::z())
            .is_err());
        assert!(camera
            .look_at(Vector3::new(0.0, 0.0, 5.0), Vector3::zeros(), Vector3::z())
            .is_err());
    }
}
