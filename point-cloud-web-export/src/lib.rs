//! Point cloud web export.
//!
//! Turns raw lidar frames into compact binary containers for a web viewer:
//! tier downsampling, optional quantisation, a 29-byte header with bounds,
//! per-frame detection files and a sequence manifest. [`validate`] checks a
//! written sequence directory afterwards.

pub mod bounds;
pub mod config;
pub mod container;
pub mod detections;
pub mod downsample;
pub mod error;
pub mod input;
pub mod manifest;
pub mod pipeline;
pub mod point_cloud;
pub mod quantize;
pub mod validate;

pub use bounds::{Aabb, compute_aabb};
pub use config::ExportConfig;
pub use container::{ContainerHeader, WriteSummary, read_frame, read_header, write_points_bin};
pub use downsample::{DownsampleConfig, DownsampleMetadata, Tier, downsample_points};
pub use error::{ExportError, Result};
pub use manifest::SequenceManifest;
pub use pipeline::{ExportSummary, Frame, SequenceExporter};
pub use point_cloud::{PointCloud, PointWidth};
pub use quantize::{
    QuantizationEnvelope, QuantizationMode, QuantizedPoints, dequantize_points, quantize_points,
};
pub use validate::{ValidationReport, run_validators};
