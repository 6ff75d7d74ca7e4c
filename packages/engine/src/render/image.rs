// packages/engine/src/render/image.rs
//! CPU-side frame buffers

use serde::{Deserialize, Serialize};

/// RGB8 image, row-major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Image {
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, [0, 0, 0])
    }

    pub fn filled(width: u32, height: u32, color: [u8; 3]) -> Self {
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 3);
        for _ in 0..(width as usize * height as usize) {
            pixels.extend_from_slice(&color);
        }
        Self { width, height, pixels }
    }

    /// Wrap raw RGB bytes; `None` if the length does not match
    pub fn from_raw(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        (pixels.len() == width as usize * height as usize * 3).then_some(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = self.offset(x, y);
        Some([self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]])
    }

    pub fn put_pixel(&mut self, x: u32, y: u32, color: [u8; 3]) {
        if x < self.width && y < self.height {
            let i = self.offset(x, y);
            self.pixels[i..i + 3].copy_from_slice(&color);
        }
    }

    pub fn fill(&mut self, color: [u8; 3]) {
        for chunk in self.pixels.chunks_exact_mut(3) {
            chunk.copy_from_slice(&color);
        }
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 3
    }
}

/// Per-pixel distance from the camera; `f32::INFINITY` where nothing was drawn
#[derive(Debug, Clone, PartialEq)]
pub struct DepthImage {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl DepthImage {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            values: vec![f32::INFINITY; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn get(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.values[y as usize * self.width as usize + x as usize])
    }

    /// Keep the nearer of the stored and offered depth; true if `depth` won
    pub fn test_and_set(&mut self, x: u32, y: u32, depth: f32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        let slot = &mut self.values[y as usize * self.width as usize + x as usize];
        if depth < *slot {
            *slot = depth;
            true
        } else {
            false
        }
    }

    pub fn clear(&mut self) {
        self.values.fill(f32::INFINITY);
    }

    /// Near surfaces bright, far surfaces dark, background black
    pub fn to_grayscale(&self, near: f32, far: f32) -> Image {
        let span = (far - near).max(f32::EPSILON);
        let mut pixels = Vec::with_capacity(self.values.len() * 3);
        for &d in &self.values {
            let v = if d.is_finite() {
                let t = ((d - near) / span).clamp(0.0, 1.0);
                (255.0 * (1.0 - t)).round() as u8
            } else {
                0
            };
            pixels.extend_from_slice(&[v, v, v]);
        }
        Image {
            width: self.width,
            height: self.height,
            pixels,
        }
    }

    /// Nearest and farthest finite depth, if anything was drawn
    pub fn range(&self) -> Option<(f32, f32)> {
        self.values
            .iter()
            .copied()
            .filter(|d| d.is_finite())
            .fold(None, |acc, d| match acc {
                None => Some((d, d)),
                Some((lo, hi)) => Some((lo.min(d), hi.max(d))),
            })
    }
}

/// A captured colour frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub step: u64,
    pub time: f64,
    pub image: Image,
}

/// A captured depth frame
#[derive(Debug, Clone)]
pub struct DepthFrame {
    pub step: u64,
    pub time: f64,
    pub depth: DepthImage,
}

/// Everything a render session produced, ready for export
#[derive(Debug, Clone, Default)]
pub struct RenderOutput {
    /// Last rendered image, if any frame was rendered
    pub last_image: Option<Image>,
    pub frames: Vec<Frame>,
    pub depth_frames: Vec<DepthFrame>,
    pub fps: u32,
}

impl RenderOutput {
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

/// Size summary written into export manifests
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_read_pixel() {
        let mut image = Image::new(4, 3);
        image.put_pixel(3, 2, [1, 2, 3]);
        assert_eq!(image.pixel(3, 2), Some([1, 2, 3]));
        assert_eq!(image.pixel(0, 0), Some([0, 0, 0]));
        assert_eq!(image.pixel(4, 0), None);
        // out of bounds writes are ignored
        image.put_pixel(10, 10, [9, 9, 9]);
        assert_eq!(image.pixels().len(), 4 * 3 * 3);
    }

    #[test]
    fn test_from_raw_checks_length() {
        assert!(Image::from_raw(2, 2, vec![0; 12]).is_some());
        assert!(Image::from_raw(2, 2, vec![0; 11]).is_none());
    }

    #[test]
    fn test_depth_test() {
        let mut depth = DepthImage::new(2, 2);
        assert!(depth.test_and_set(0, 0, 5.0));
        assert!(!depth.test_and_set(0, 0, 6.0));
        assert!(depth.test_and_set(0, 0, 4.0));
        assert_eq!(depth.get(0, 0), Some(4.0));
        assert_eq!(depth.range(), Some((4.0, 4.0)));
    }

    #[test]
    fn test_grayscale_visualisation() {
        let mut depth = DepthImage::new(3, 1);
        depth.test_and_set(0, 0, 1.0);
        depth.test_and_set(1, 0, 3.0);

        let gray = depth.to_grayscale(1.0, 3.0);
        assert_eq!(gray.pixel(0, 0), Some([255, 255, 255]));
        assert_eq!(gray.pixel(1, 0), Some([0, 0, 0]));
        assert_eq!(gray.pixel(2, 0), Some([0, 0, 0]));
    }
}
