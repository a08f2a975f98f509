//! Sequence export: downsample, quantise and write every frame, then link
//! the results in a manifest.
//!
//! Frames are independent and run in parallel on the rayon pool. The
//! manifest is written last, after every frame file exists.

use crate::config::ExportConfig;
use crate::container::{header_aabb, write_points_bin};
use crate::detections::{Detection, compare_ids, write_detections_json, write_gt_json};
use crate::downsample::{DownsampleMetadata, downsample_points};
use crate::error::{ExportError, Result};
use crate::manifest::{FrameRef, FrameUrls, SequenceManifest, print_manifest_summary, write_manifest};
use crate::point_cloud::PointCloud;
use crate::quantize::{
    QuantizationEnvelope, QuantizationErrorStats, QuantizedPoints, compute_quantization_error,
    dequantize_points, quantize_points,
};
use constants::container::{FRAMES_DIR, HEADER_SIZE, MANIFEST_FILE};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// One frame handed to the exporter, already in the canonical layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub frame_id: String,
    pub points: PointCloud,
    pub timestamp: Option<f64>,
    pub ground_truth: Vec<Detection>,
    /// Branch name to predicted detections.
    pub detections: BTreeMap<String, Vec<Detection>>,
}

impl Frame {
    /// Frame with points only.
    pub fn new(frame_id: impl Into<String>, points: PointCloud) -> Self {
        Self {
            frame_id: frame_id.into(),
            points,
            timestamp: None,
            ground_truth: Vec::new(),
            detections: BTreeMap::new(),
        }
    }
}

/// What happened to one frame on its way to disk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameProvenance {
    pub frame_id: String,
    pub downsample: DownsampleMetadata,
    pub quantization: QuantizationEnvelope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<QuantizationErrorStats>,
    pub bytes_written: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportSummary {
    pub manifest_path: PathBuf,
    pub frame_count: usize,
    pub total_points: u64,
    pub total_bytes: u64,
    pub frames: Vec<FrameProvenance>,
}

/// One frame of a dry run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedFrame {
    pub frame_id: String,
    pub point_count: usize,
    pub points_path: PathBuf,
    pub file_size: u64,
    pub gt_path: Option<PathBuf>,
    pub det_paths: Vec<PathBuf>,
}

/// Files an export would write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportPlan {
    pub manifest_path: PathBuf,
    pub frames: Vec<PlannedFrame>,
}

/// Writes a sequence directory from in-memory frames.
pub struct SequenceExporter {
    output_dir: PathBuf,
    sequence_id: String,
    config: ExportConfig,
}

impl SequenceExporter {
    pub fn new(output_dir: &Path, sequence_id: &str, config: ExportConfig) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            sequence_id: sequence_id.to_string(),
            config,
        }
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Export all frames and write the manifest.
    ///
    /// Frames are ordered by id in the manifest regardless of input order.
    pub fn export(&self, mut frames: Vec<Frame>) -> Result<ExportSummary> {
        self.prepare(&mut frames)?;

        info!(
            "Exporting {} frames of sequence {} (tier {}, quantization {})",
            frames.len(),
            self.sequence_id,
            self.config.tier,
            self.config.quantization
        );

        let pb = frame_progress_bar(frames.len() as u64);
        pb.set_message("Exporting frames");

        let exported: Vec<(FrameRef, FrameProvenance)> = frames
            .into_par_iter()
            .map(|frame| {
                let result = self.export_frame(frame);
                pb.inc(1);
                result
            })
            .collect::<Result<_>>()?;

        pb.finish_with_message("Frames exported");

        let branches: BTreeSet<String> = exported
            .iter()
            .filter_map(|(frame_ref, _)| frame_ref.urls.det.as_ref())
            .flat_map(|det| det.keys().cloned())
            .chain(self.config.branches.iter().cloned())
            .collect();

        let (frame_refs, provenance): (Vec<FrameRef>, Vec<FrameProvenance>) =
            exported.into_iter().unzip();

        let manifest = SequenceManifest {
            version: self.config.version.clone(),
            sequence_id: self.sequence_id.clone(),
            fps: self.config.fps,
            class_map: self.config.class_map.clone(),
            branches: branches.into_iter().collect(),
            frames: frame_refs,
        };
        let manifest_path = self.output_dir.join(MANIFEST_FILE);
        let manifest_size = write_manifest(&manifest, &manifest_path)?;
        print_manifest_summary(&manifest);

        let summary = ExportSummary {
            manifest_path,
            frame_count: manifest.frames.len(),
            total_points: manifest.total_points(),
            total_bytes: manifest_size + provenance.iter().map(|p| p.bytes_written).sum::<u64>(),
            frames: provenance,
        };
        info!(
            "Exported {} frames, {} points, {} bytes",
            summary.frame_count, summary.total_points, summary.total_bytes
        );
        Ok(summary)
    }

    /// Downsample every frame and report the files an export would write,
    /// without touching the output directory.
    pub fn plan(&self, mut frames: Vec<Frame>) -> Result<ExportPlan> {
        self.prepare(&mut frames)?;
        let bytes_per_value = self.config.quantization.bytes_per_value();

        let planned: Vec<PlannedFrame> = frames
            .into_par_iter()
            .map(|frame| {
                let (downsampled, _) = downsample_points(
                    frame.points,
                    self.config.tier,
                    &self.config.downsample_config(),
                );
                let point_count = downsampled.len();
                let bytes_per_point = downsampled.width().len() * bytes_per_value;
                PlannedFrame {
                    points_path: self
                        .output_dir
                        .join(format!("{FRAMES_DIR}/{}.bin", frame.frame_id)),
                    gt_path: (!frame.ground_truth.is_empty())
                        .then(|| self.output_dir.join(format!("{}.gt.json", frame.frame_id))),
                    det_paths: frame
                        .detections
                        .iter()
                        .filter(|(_, dets)| dets.iter().any(|d| self.passes_threshold(d)))
                        .map(|(branch, _)| {
                            self.output_dir
                                .join(format!("{}.det.{branch}.json", frame.frame_id))
                        })
                        .collect(),
                    frame_id: frame.frame_id,
                    point_count,
                    file_size: (HEADER_SIZE + point_count * bytes_per_point) as u64,
                }
            })
            .collect();

        Ok(ExportPlan {
            manifest_path: self.output_dir.join(MANIFEST_FILE),
            frames: planned,
        })
    }

    /// Orders frames by id and rejects names that cannot become file names.
    fn prepare(&self, frames: &mut [Frame]) -> Result<()> {
        if frames.is_empty() {
            return Err(ExportError::InvalidArgument("no frames to export".into()));
        }
        frames.sort_by(|a, b| compare_ids(&a.frame_id, &b.frame_id));
        check_frame_ids(frames)?;
        for branch in frames
            .iter()
            .flat_map(|f| f.detections.keys())
            .chain(&self.config.branches)
        {
            check_file_name("branch name", branch)?;
        }
        Ok(())
    }

    fn export_frame(&self, frame: Frame) -> Result<(FrameRef, FrameProvenance)> {
        let Frame {
            frame_id,
            points,
            timestamp,
            ground_truth,
            detections,
        } = frame;

        let (downsampled, downsample) =
            downsample_points(points, self.config.tier, &self.config.downsample_config());
        let (quantized, envelope) = quantize_points(&downsampled, self.config.quantization)?;

        let error = if self.config.report_quantization_error {
            self.quantization_error(&frame_id, &downsampled, &quantized, &envelope)
        } else {
            None
        };

        let points_url = format!("{FRAMES_DIR}/{frame_id}.bin");
        let written = write_points_bin(&quantized, &self.output_dir.join(&points_url))?;
        let mut bytes_written = written.file_size;

        let gt_url = if ground_truth.is_empty() {
            None
        } else {
            let url = format!("{frame_id}.gt.json");
            bytes_written += write_gt_json(&ground_truth, &self.output_dir.join(&url))?.file_size;
            Some(url)
        };

        let mut det_urls = BTreeMap::new();
        for (branch, branch_detections) in &detections {
            let kept: Vec<Detection> = branch_detections
                .iter()
                .filter(|d| self.passes_threshold(d))
                .cloned()
                .collect();
            if kept.is_empty() {
                continue;
            }
            let url = format!("{frame_id}.det.{branch}.json");
            bytes_written += write_detections_json(&kept, &self.output_dir.join(&url))?.file_size;
            det_urls.insert(branch.clone(), url);
        }

        let frame_ref = FrameRef {
            id: frame_id.clone(),
            point_count: written.point_count as u64,
            ts: timestamp,
            aabb: Some(header_aabb(&quantized)),
            urls: FrameUrls {
                points: points_url,
                gt: gt_url,
                det: (!det_urls.is_empty()).then_some(det_urls),
            },
        };
        let provenance = FrameProvenance {
            frame_id,
            downsample,
            quantization: envelope,
            error,
            bytes_written,
        };
        Ok((frame_ref, provenance))
    }

    fn passes_threshold(&self, detection: &Detection) -> bool {
        match self.config.score_threshold {
            Some(threshold) => detection.confidence.unwrap_or(1.0) >= threshold,
            None => true,
        }
    }

    fn quantization_error(
        &self,
        frame_id: &str,
        original: &PointCloud,
        quantized: &QuantizedPoints,
        envelope: &QuantizationEnvelope,
    ) -> Option<QuantizationErrorStats> {
        let stats = dequantize_points(quantized, envelope)
            .and_then(|reconstructed| compute_quantization_error(original, &reconstructed));
        match stats {
            Ok(stats) => {
                if !stats.within_tolerance_1mm {
                    warn!(
                        "Frame {}: max quantization error {:.3} mm exceeds 1 mm",
                        frame_id, stats.max_error_mm
                    );
                }
                Some(stats)
            }
            Err(e) => {
                warn!("Frame {}: could not measure quantization error: {}", frame_id, e);
                None
            }
        }
    }
}

/// Frame ids and branch names are spliced into file names inside the
/// output directory.
fn check_file_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(ExportError::InvalidArgument(format!("invalid {kind}: {name:?}")));
    }
    Ok(())
}

fn check_frame_ids(frames: &[Frame]) -> Result<()> {
    for frame in frames {
        check_file_name("frame id", &frame.frame_id)?;
    }
    if let Some(pair) = frames.windows(2).find(|w| w[0].frame_id == w[1].frame_id) {
        return Err(ExportError::InvalidArgument(format!(
            "duplicate frame id: {}",
            pair[0].frame_id
        )));
    }
    Ok(())
}

fn frame_progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{bar:40.green/blue}] {pos}/{len} frames ({percent}%) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("▉▊▋▌▍▎▏ "),
    );
    pb
}

/// Print the planned output tree of a dry run.
pub fn print_plan(plan: &ExportPlan) {
    println!("Dry run, nothing written:");
    println!("  Manifest: {}", plan.manifest_path.display());
    for frame in &plan.frames {
        println!(
            "  {} ({} points, {} bytes)",
            frame.points_path.display(),
            frame.point_count,
            frame.file_size
        );
        for path in frame.gt_path.iter().chain(&frame.det_paths) {
            println!("  {}", path.display());
        }
    }
    let total_points: usize = plan.frames.iter().map(|f| f.point_count).sum();
    println!("  Frames: {}, points: {}", plan.frames.len(), total_points);
}

/// Print export statistics for verification and debugging.
pub fn print_summary(summary: &ExportSummary) {
    println!("Export complete:");
    println!("  Manifest: {}", summary.manifest_path.display());
    println!("  Frames: {}", summary.frame_count);
    println!("  Points: {}", summary.total_points);
    println!(
        "  Written: {:.2} MB",
        summary.total_bytes as f64 / (1024.0 * 1024.0)
    );
    let downsampled = summary
        .frames
        .iter()
        .filter(|f| f.downsample.original_count != f.downsample.final_count)
        .count();
    println!("  Downsampled frames: {}", downsampled);
    if let Some(worst) = summary
        .frames
        .iter()
        .filter_map(|f| f.error.map(|e| e.max_error_mm))
        .reduce(f64::max)
    {
        println!("  Worst quantization error: {:.3} mm", worst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::read_header;
    use crate::detections::{Dimensions, read_detections_json};
    use crate::downsample::Tier;
    use crate::manifest::load_manifest;
    use crate::point_cloud::PointWidth;
    use crate::quantize::QuantizationMode;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use tempfile::TempDir;

    fn cloud(n_points: usize, seed: u64) -> PointCloud {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let values: Vec<f32> = (0..n_points)
            .flat_map(|_| {
                [
                    rng.gen_range(-50.0f32..50.0),
                    rng.gen_range(-50.0f32..50.0),
                    rng.gen_range(-2.0f32..5.0),
                    rng.gen_range(0.0f32..1.0),
                ]
            })
            .collect();
        PointCloud::from_flat(PointWidth::XyzIntensity, values).unwrap()
    }

    fn detection(id: &str, confidence: Option<f32>) -> Detection {
        Detection {
            id: id.to_string(),
            class_name: "vehicle".to_string(),
            center: [1.0, 2.0, 0.5],
            dimensions: Dimensions {
                length: 4.5,
                width: 1.8,
                height: 1.6,
            },
            yaw: 0.3,
            confidence,
        }
    }

    #[test]
    fn test_export_writes_sequence_tree() {
        let temp_dir = TempDir::new().unwrap();
        let mut frame0 = Frame::new("000000", cloud(60_000, 1));
        frame0.ground_truth = vec![detection("0", None)];
        frame0.detections.insert(
            "CP_Pillar_032".to_string(),
            vec![detection("0", Some(0.9)), detection("1", Some(0.1))],
        );
        let frame1 = Frame::new("000001", cloud(1_000, 2));

        let config = ExportConfig {
            tier: Tier::Low,
            quantization: QuantizationMode::NormalizedInteger,
            score_threshold: Some(0.5),
            report_quantization_error: true,
            ..ExportConfig::default()
        };
        let exporter = SequenceExporter::new(temp_dir.path(), "seq_a", config);
        // Reverse input order; manifest must still be sorted
        let summary = exporter.export(vec![frame1, frame0]).unwrap();

        assert_eq!(summary.frame_count, 2);
        assert_eq!(summary.total_points, 50_000 + 1_000);
        assert!(summary.frames.iter().all(|f| f.error.is_some()));

        let manifest = load_manifest(&summary.manifest_path).unwrap();
        assert_eq!(manifest.sequence_id, "seq_a");
        assert_eq!(manifest.branches, vec!["CP_Pillar_032"]);
        assert_eq!(manifest.frames[0].id, "000000");
        assert_eq!(manifest.frames[0].urls.gt.as_deref(), Some("000000.gt.json"));
        assert!(manifest.frames[1].urls.gt.is_none());
        assert!(manifest.frames[1].urls.det.is_none());

        let header = read_header(&temp_dir.path().join("frames/000000.bin")).unwrap();
        assert_eq!(header.point_count, 50_000);
        assert_eq!(Some(header.aabb), manifest.frames[0].aabb);

        let dets =
            read_detections_json(&temp_dir.path().join("000000.det.CP_Pillar_032.json")).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].id, "0");
    }

    #[test]
    fn test_export_rejects_empty_and_duplicate_ids() {
        let temp_dir = TempDir::new().unwrap();
        let exporter = SequenceExporter::new(temp_dir.path(), "seq", ExportConfig::default());

        assert!(matches!(
            exporter.export(Vec::new()),
            Err(ExportError::InvalidArgument(_))
        ));
        assert!(matches!(
            exporter.export(vec![Frame::new("1", cloud(10, 1)), Frame::new("1", cloud(10, 2))]),
            Err(ExportError::InvalidArgument(msg)) if msg.contains("duplicate")
        ));
        assert!(matches!(
            exporter.export(vec![Frame::new("../x", cloud(10, 1))]),
            Err(ExportError::InvalidArgument(_))
        ));

        let seq_dir = temp_dir.path().join("seq");
        let exporter = SequenceExporter::new(&seq_dir, "seq", ExportConfig::default());
        for branch in ["/../../escaped", "a/b", "..", ""] {
            let mut frame = Frame::new("0", cloud(10, 1));
            frame
                .detections
                .insert(branch.to_string(), vec![detection("0", Some(0.9))]);
            assert!(matches!(
                exporter.export(vec![frame]),
                Err(ExportError::InvalidArgument(msg)) if msg.contains("branch name")
            ));
        }
        assert!(!seq_dir.exists());
        assert!(!temp_dir.path().join("escaped.json").exists());
        assert!(!temp_dir.path().join(MANIFEST_FILE).exists());
    }

    #[test]
    fn test_declared_branches_reach_manifest() {
        let temp_dir = TempDir::new().unwrap();
        let mut frame = Frame::new("0", cloud(100, 1));
        frame
            .detections
            .insert("b_found".to_string(), vec![detection("0", Some(0.9))]);
        let config = ExportConfig {
            branches: vec!["c_declared".to_string(), "a_declared".to_string()],
            ..ExportConfig::default()
        };

        let summary = SequenceExporter::new(temp_dir.path(), "seq", config)
            .export(vec![frame])
            .unwrap();
        let manifest = load_manifest(&summary.manifest_path).unwrap();
        assert_eq!(manifest.branches, vec!["a_declared", "b_found", "c_declared"]);
    }

    #[test]
    fn test_plan_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("out");
        let mut frame0 = Frame::new("000000", cloud(60_000, 1));
        frame0.ground_truth = vec![detection("0", None)];
        frame0
            .detections
            .insert("kept".to_string(), vec![detection("0", Some(0.9))]);
        frame0
            .detections
            .insert("dropped".to_string(), vec![detection("1", Some(0.1))]);
        let config = ExportConfig {
            tier: Tier::Low,
            quantization: QuantizationMode::NormalizedInteger,
            score_threshold: Some(0.5),
            ..ExportConfig::default()
        };

        let plan = SequenceExporter::new(&out, "seq", config)
            .plan(vec![Frame::new("000001", cloud(10, 2)), frame0])
            .unwrap();

        assert!(!out.exists());
        assert_eq!(plan.manifest_path, out.join(MANIFEST_FILE));
        assert_eq!(plan.frames[0].frame_id, "000000");
        assert_eq!(plan.frames[0].point_count, 50_000);
        assert_eq!(plan.frames[0].file_size, 29 + 50_000 * 8);
        assert_eq!(plan.frames[0].points_path, out.join("frames/000000.bin"));
        assert_eq!(plan.frames[0].gt_path, Some(out.join("000000.gt.json")));
        assert_eq!(plan.frames[0].det_paths, vec![out.join("000000.det.kept.json")]);
        assert_eq!(plan.frames[1].point_count, 10);
        assert!(plan.frames[1].gt_path.is_none());
    }

    #[test]
    fn test_export_is_deterministic() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let config = ExportConfig {
            quantization: QuantizationMode::Half,
            ..ExportConfig::default()
        };
        for dir in [&a, &b] {
            SequenceExporter::new(dir.path(), "seq", config.clone())
                .export(vec![Frame::new("0", cloud(120_000, 9))])
                .unwrap();
        }

        let read = |dir: &TempDir| std::fs::read(dir.path().join("frames/0.bin")).unwrap();
        assert_eq!(read(&a), read(&b));
    }
}
