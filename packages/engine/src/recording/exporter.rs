// packages/engine/src/recording/exporter.rs
//! Export rendered output to files
//!
//! Supports:
//! - PNG (single image per worker)
//! - Frame sequence (directory of numbered PNGs plus `manifest.json`)
//! - Raw video (`.rsv`: one JSON header line followed by zstd-compressed RGB frames)
//!
//! Artifacts are named `{base}_{index}`; depth output gets a `_depth` suffix.

use crate::recording::compressor::{CompressionLevel, Compressor};
use crate::render::image::{FrameSize, Image, RenderOutput};
use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const RAW_VIDEO_MAGIC: &str = "rsv1";

/// Export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// Last rendered image as `{base}_{index}.png`
    #[default]
    Png,

    /// Recorded frames under `{base}_{index}/`
    FrameSequence,

    /// Recorded frames in `{base}_{index}.rsv`
    RawVideo,
}

/// Metadata written next to a frame sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceManifest {
    pub fps: u32,
    pub frame_count: usize,
    pub depth_frame_count: usize,
    pub size: FrameSize,

    /// Simulation step at which each frame was captured
    pub steps: Vec<u64>,
    pub exported_at: DateTime<Utc>,
}

/// First line of a raw video container
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawVideoHeader {
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub frames: usize,
    pub compression: CompressionLevel,
}

/// Writes render output for one worker at a time
#[derive(Debug, Clone)]
pub struct Exporter {
    format: ExportFormat,
    directory: PathBuf,
    compressor: Compressor,
}

impl Exporter {
    /// Create a new exporter writing under `directory`
    pub fn new(format: ExportFormat, directory: impl Into<PathBuf>) -> Self {
        Self {
            format,
            directory: directory.into(),
            compressor: Compressor::default(),
        }
    }

    pub fn with_compression(mut self, level: CompressionLevel) -> Self {
        self.compressor = Compressor::new(level);
        self
    }

    pub fn format(&self) -> ExportFormat {
        self.format
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the primary artifact for worker `index`
    pub fn artifact_path(&self, base: &str, index: usize) -> PathBuf {
        let stem = format!("{}_{}", base, index);
        match self.format {
            ExportFormat::Png => self.directory.join(format!("{}.png", stem)),
            ExportFormat::FrameSequence => self.directory.join(stem),
            ExportFormat::RawVideo => self.directory.join(format!("{}.rsv", stem)),
        }
    }

    /// Write every artifact for worker `index`, returning their paths
    pub fn export(&self, base: &str, index: usize, output: &RenderOutput) -> Result<Vec<PathBuf>> {
        if base.is_empty() {
            return Err(EngineError::ExportFailed("empty artifact base name".to_string()));
        }

        debug!(
            "Exporting worker {} output ({} frames) as {:?}",
            index,
            output.frames.len(),
            self.format
        );

        fs::create_dir_all(&self.directory)?;

        let artifacts = match self.format {
            ExportFormat::Png => self.export_png(base, index, output)?,
            ExportFormat::FrameSequence => self.export_sequence(base, index, output)?,
            ExportFormat::RawVideo => self.export_raw_video(base, index, output)?,
        };

        info!("Worker {} exported {} artifact(s)", index, artifacts.len());
        Ok(artifacts)
    }

    fn export_png(&self, base: &str, index: usize, output: &RenderOutput) -> Result<Vec<PathBuf>> {
        let image = output
            .last_image
            .as_ref()
            .or_else(|| output.frames.last().map(|f| &f.image))
            .ok_or_else(|| EngineError::ExportFailed(format!("worker {} rendered nothing", index)))?;

        let path = self.artifact_path(base, index);
        write_png(&path, image)?;
        let mut artifacts = vec![path];

        if let Some(depth) = output.depth_frames.last() {
            let path = self.directory.join(format!("{}_{}_depth.png", base, index));
            let (near, far) = depth.depth.range().unwrap_or((0.0, 1.0));
            write_png(&path, &depth.depth.to_grayscale(near, far))?;
            artifacts.push(path);
        }

        Ok(artifacts)
    }

    fn export_sequence(&self, base: &str, index: usize, output: &RenderOutput) -> Result<Vec<PathBuf>> {
        let dir = self.artifact_path(base, index);
        fs::create_dir_all(&dir)?;

        let images: Vec<(u64, &Image)> = if output.frames.is_empty() {
            output.last_image.iter().map(|image| (0, image)).collect()
        } else {
            output.frames.iter().map(|f| (f.step, &f.image)).collect()
        };
        let first = images
            .first()
            .map(|(_, image)| *image)
            .ok_or_else(|| EngineError::ExportFailed(format!("worker {} recorded no frames", index)))?;

        for (n, (_, image)) in images.iter().enumerate() {
            write_png(&dir.join(format!("frame_{:05}.png", n)), image)?;
        }
        for (n, frame) in output.depth_frames.iter().enumerate() {
            let (near, far) = frame.depth.range().unwrap_or((0.0, 1.0));
            write_png(
                &dir.join(format!("depth_{:05}.png", n)),
                &frame.depth.to_grayscale(near, far),
            )?;
        }

        let manifest = SequenceManifest {
            fps: output.fps,
            frame_count: images.len(),
            depth_frame_count: output.depth_frames.len(),
            size: FrameSize {
                width: first.width(),
                height: first.height(),
            },
            steps: images.iter().map(|(step, _)| *step).collect(),
            exported_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&manifest)
            .map_err(|e| EngineError::ExportFailed(format!("JSON serialization error: {}", e)))?;
        fs::write(dir.join("manifest.json"), json)?;

        Ok(vec![dir])
    }

    fn export_raw_video(&self, base: &str, index: usize, output: &RenderOutput) -> Result<Vec<PathBuf>> {
        if output.frames.is_empty() {
            return Err(EngineError::ExportFailed(format!(
                "worker {} recorded no frames",
                index
            )));
        }

        let path = self.artifact_path(base, index);
        self.write_raw_video(&path, output.fps, output.frames.iter().map(|f| &f.image))?;
        let mut artifacts = vec![path];

        if !output.depth_frames.is_empty() {
            let path = self.directory.join(format!("{}_{}_depth.rsv", base, index));
            let gray: Vec<Image> = output
                .depth_frames
                .iter()
                .map(|f| {
                    let (near, far) = f.depth.range().unwrap_or((0.0, 1.0));
                    f.depth.to_grayscale(near, far)
                })
                .collect();
            self.write_raw_video(&path, output.fps, gray.iter())?;
            artifacts.push(path);
        }

        Ok(artifacts)
    }

    fn write_raw_video<'a>(
        &self,
        path: &Path,
        fps: u32,
        frames: impl Iterator<Item = &'a Image> + Clone,
    ) -> Result<()> {
        let mut size = None;
        let mut count = 0;
        for image in frames.clone() {
            let dims = (image.width(), image.height());
            match size {
                None => size = Some(dims),
                Some(expected) if expected != dims => {
                    return Err(EngineError::ExportFailed(format!(
                        "frame size changed from {:?} to {:?}",
                        expected, dims
                    )))
                }
                Some(_) => {}
            }
            count += 1;
        }
        let (width, height) = size.unwrap_or((0, 0));

        let header = RawVideoHeader {
            format: RAW_VIDEO_MAGIC.to_string(),
            width,
            height,
            fps,
            frames: count,
            compression: self.compressor.level(),
        };
        let payload = self.compressor.compress_frames(frames.map(Image::pixels))?;

        let mut file = File::create(path)?;
        let header_line = serde_json::to_string(&header)
            .map_err(|e| EngineError::ExportFailed(format!("JSON serialization error: {}", e)))?;
        file.write_all(header_line.as_bytes())?;
        file.write_all(b"\n")?;
        file.write_all(&payload)?;
        file.flush()?;

        Ok(())
    }
}

/// Read back a raw video container
pub fn read_raw_video(path: &Path) -> Result<(RawVideoHeader, Vec<Image>)> {
    let mut reader = BufReader::new(File::open(path)?);

    let mut line = String::new();
    reader.read_line(&mut line)?;
    let header: RawVideoHeader = serde_json::from_str(line.trim_end())
        .map_err(|e| EngineError::ExportFailed(format!("bad raw video header: {}", e)))?;
    if header.format != RAW_VIDEO_MAGIC {
        return Err(EngineError::ExportFailed(format!(
            "unknown container format '{}'",
            header.format
        )));
    }

    let mut payload = Vec::new();
    reader.read_to_end(&mut payload)?;

    let frame_bytes = header.width as usize * header.height as usize * 3;
    let frames = Compressor::new(header.compression)
        .decompress_frames(&payload, frame_bytes)?
        .into_iter()
        .filter_map(|raw| Image::from_raw(header.width, header.height, raw))
        .collect::<Vec<_>>();

    if frames.len() != header.frames {
        return Err(EngineError::ExportFailed(format!(
            "header announces {} frames, found {}",
            header.frames,
            frames.len()
        )));
    }

    Ok((header, frames))
}

fn write_png(path: &Path, image: &Image) -> Result<()> {
    image::save_buffer(
        path,
        image.pixels(),
        image.width(),
        image.height(),
        image::ColorType::Rgb8,
    )
    .map_err(|e| EngineError::ExportFailed(format!("{}: {}", path.display(), e)))
}
