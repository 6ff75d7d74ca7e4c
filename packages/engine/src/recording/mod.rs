// packages/engine/src/recording/mod.rs
//! Frame recording export
//!
//! - **Compressor**: zstd compression of raw frame data
//! - **Exporter**: PNG, frame-sequence and raw-video artifacts
//!
//! # Architecture
//!
//! ```text
//! RenderSession ─take_output()─▶ RenderOutput ─▶ Exporter ─▶ {base}_{index}.png
//!                                                    │      ─▶ {base}_{index}/frame_NNNNN.png + manifest.json
//!                                                    └─ Compressor (zstd) ─▶ {base}_{index}.rsv
//! ```

pub mod compressor;
pub mod exporter;

// Re-export commonly used types
pub use compressor::{CompressionLevel, Compressor};
pub use exporter::{read_raw_video, ExportFormat, Exporter, RawVideoHeader, SequenceManifest};
