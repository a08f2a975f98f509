/// Sequence manifest linking frame containers and detection files.
use crate::bounds::Aabb;
use crate::error::{ExportError, Result};
use constants::class::{CLASS_MAP, DEFAULT_FPS, MANIFEST_VERSION};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

/// Top-level manifest written once per sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceManifest {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub sequence_id: String,
    #[serde(default)]
    pub fps: u32,
    /// Class name to label id, as strings for the web client.
    #[serde(default)]
    pub class_map: BTreeMap<String, String>,
    /// Prediction branches available for this sequence.
    #[serde(default)]
    pub branches: Vec<String>,
    #[serde(default)]
    pub frames: Vec<FrameRef>,
}

/// Per-frame entry of the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameRef {
    pub id: String,
    #[serde(default)]
    pub point_count: u64,
    #[serde(default)]
    pub ts: Option<f64>,
    /// Header bounds of the frame container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aabb: Option<Aabb>,
    #[serde(default)]
    pub urls: FrameUrls,
}

/// Paths relative to the sequence directory.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FrameUrls {
    #[serde(default)]
    pub points: String,
    #[serde(default)]
    pub gt: Option<String>,
    /// Branch name to detection file.
    #[serde(default)]
    pub det: Option<BTreeMap<String, String>>,
}

impl SequenceManifest {
    /// Empty manifest carrying the default version, fps and class map.
    pub fn new(sequence_id: &str) -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            sequence_id: sequence_id.to_string(),
            fps: DEFAULT_FPS,
            class_map: default_class_map(),
            branches: Vec::new(),
            frames: Vec::new(),
        }
    }

    pub fn total_points(&self) -> u64 {
        self.frames.iter().map(|f| f.point_count).sum()
    }
}

/// `{"vehicle": "0", "pedestrian": "1", "cyclist": "2"}`
pub fn default_class_map() -> BTreeMap<String, String> {
    CLASS_MAP
        .iter()
        .map(|c| (c.name.to_string(), c.id.to_string()))
        .collect()
}

/// Structural checks applied before a manifest is written.
pub fn validate_manifest(manifest: &SequenceManifest) -> Result<()> {
    if manifest.version.is_empty() {
        return Err(ExportError::InvalidManifest("version is required".into()));
    }
    if manifest.sequence_id.is_empty() {
        return Err(ExportError::InvalidManifest("sequence_id is required".into()));
    }
    if manifest.fps == 0 {
        return Err(ExportError::InvalidManifest("fps must be > 0".into()));
    }
    if manifest.frames.is_empty() {
        return Err(ExportError::InvalidManifest(
            "frames must contain at least one frame".into(),
        ));
    }
    if let Some(frame) = manifest.frames.iter().find(|f| f.urls.points.is_empty()) {
        return Err(ExportError::InvalidManifest(format!(
            "frame {} has no points url",
            frame.id
        )));
    }
    Ok(())
}

/// Validate and write a manifest as 2-space indented JSON; returns the file size.
pub fn write_manifest(manifest: &SequenceManifest, path: &Path) -> Result<u64> {
    validate_manifest(manifest)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let manifest_json = serde_json::to_string_pretty(manifest)?;
    fs::write(path, &manifest_json)?;

    info!("Generated sequence manifest: {}", path.display());
    Ok(manifest_json.len() as u64)
}

pub fn load_manifest(path: &Path) -> Result<SequenceManifest> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Replace `branches` with the sorted detection keys of the first frame.
///
/// Returns true when the manifest changed. Frames without detection urls
/// leave the manifest untouched.
pub fn normalize_branches(manifest: &mut SequenceManifest) -> bool {
    let Some(det_map) = manifest
        .frames
        .first()
        .and_then(|f| f.urls.det.as_ref())
        .filter(|det| !det.is_empty())
    else {
        return false;
    };

    // BTreeMap keys are already sorted
    let actual: Vec<String> = det_map.keys().cloned().collect();
    let mut current = manifest.branches.clone();
    current.sort();
    current.dedup();
    if current == actual {
        return false;
    }

    manifest.branches = actual;
    true
}

/// Prints manifest summary for verification and debugging.
pub fn print_manifest_summary(manifest: &SequenceManifest) {
    println!("Manifest Summary:");
    println!("  Sequence: {}", manifest.sequence_id);
    println!("  Frames: {}", manifest.frames.len());
    println!("  Total points: {}", manifest.total_points());
    if manifest.branches.is_empty() {
        println!("  No prediction branches");
    } else {
        println!("  Branches: {}", manifest.branches.join(", "));
    }
}
