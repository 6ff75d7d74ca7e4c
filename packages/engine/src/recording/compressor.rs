// packages/engine/src/recording/compressor.rs
//! zstd compression for raw frame data
//!
//! Frames are streamed into a single zstd frame back to back; the reader
//! splits them again using the fixed per-frame size from the container
//! header.

use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use tracing::debug;

/// Compression levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompressionLevel {
    /// Fast compression (level 1)
    Fast,

    /// Balanced (level 3)
    #[default]
    Balanced,

    /// Best compression (level 19)
    Best,
}

impl CompressionLevel {
    pub fn as_i32(&self) -> i32 {
        match self {
            CompressionLevel::Fast => 1,
            CompressionLevel::Balanced => 3,
            CompressionLevel::Best => 19,
        }
    }
}

/// Compressor using zstd
#[derive(Debug, Clone, Copy, Default)]
pub struct Compressor {
    level: CompressionLevel,
}

impl Compressor {
    pub fn new(level: CompressionLevel) -> Self {
        Self { level }
    }

    pub fn level(&self) -> CompressionLevel {
        self.level
    }

    /// Compress a sequence of equally sized frames
    pub fn compress_frames<'a, I>(&self, frames: I) -> Result<Vec<u8>>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut encoder = zstd::stream::Encoder::new(Vec::new(), self.level.as_i32())
            .map_err(|e| EngineError::ExportFailed(format!("Compression error: {}", e)))?;

        let mut raw = 0usize;
        for frame in frames {
            encoder
                .write_all(frame)
                .map_err(|e| EngineError::ExportFailed(format!("Compression error: {}", e)))?;
            raw += frame.len();
        }

        let compressed = encoder
            .finish()
            .map_err(|e| EngineError::ExportFailed(format!("Compression error: {}", e)))?;

        debug!(
            "Compressed {} bytes -> {} bytes (ratio: {:.2}x)",
            raw,
            compressed.len(),
            raw as f64 / compressed.len().max(1) as f64
        );

        Ok(compressed)
    }

    /// Split a compressed stream back into frames of `frame_bytes` each
    pub fn decompress_frames(&self, data: &[u8], frame_bytes: usize) -> Result<Vec<Vec<u8>>> {
        if frame_bytes == 0 {
            return Err(EngineError::ExportFailed("frame size is zero".to_string()));
        }

        let mut decoder = zstd::stream::Decoder::new(data)
            .map_err(|e| EngineError::ExportFailed(format!("Decompression error: {}", e)))?;
        let mut raw = Vec::new();
        decoder
            .read_to_end(&mut raw)
            .map_err(|e| EngineError::ExportFailed(format!("Decompression error: {}", e)))?;

        if raw.len() % frame_bytes != 0 {
            return Err(EngineError::ExportFailed(format!(
                "stream of {} bytes is not a whole number of {}-byte frames",
                raw.len(),
                frame_bytes
            )));
        }

        Ok(raw.chunks_exact(frame_bytes).map(<[u8]>::to_vec).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_levels() {
        assert_eq!(CompressionLevel::Fast.as_i32(), 1);
        assert_eq!(CompressionLevel::Balanced.as_i32(), 3);
        assert_eq!(CompressionLevel::Best.as_i32(), 19);
    }

    #[test]
    fn test_frames_split_back_apart() {
        let compressor = Compressor::default();
        let a = vec![10u8; 48];
        let b = vec![20u8; 48];

        let compressed = compressor
            .compress_frames([a.as_slice(), b.as_slice()])
            .unwrap();
        assert!(compressed.len() < 96);

        let frames = compressor.decompress_frames(&compressed, 48).unwrap();
        assert_eq!(frames, vec![a, b]);
    }

    #[test]
    fn test_rejects_partial_frames() {
        let compressor = Compressor::new(CompressionLevel::Fast);
        let compressed = compressor.compress_frames([[0u8; 10].as_slice()]).unwrap();
        assert!(compressor.decompress_frames(&compressed, 4).is_err());
        assert!(compressor.decompress_frames(&compressed, 0).is_err());
    }
}
