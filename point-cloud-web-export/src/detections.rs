/// Detection records and their per-frame JSON files.
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Box dimensions in distance units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Dimensions {
    pub length: f32,
    pub width: f32,
    pub height: f32,
}

/// One 3D box, ground truth or predicted.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub id: String,
    pub class_name: String,
    pub center: [f32; 3],
    pub dimensions: Dimensions,
    /// Rotation around Z in radians.
    pub yaw: f32,
    /// None for ground truth.
    pub confidence: Option<f32>,
}

/// Box geometry as written to JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxRecord {
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    #[serde(default)]
    pub z: f32,
    #[serde(default)]
    pub length: f32,
    #[serde(default)]
    pub width: f32,
    #[serde(default)]
    pub height: f32,
    pub yaw: f64,
}

/// One entry of a `<id>.gt.json` or `<id>.det.<branch>.json` file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default = "default_score")]
    pub score: f32,
    pub bbox: BoxRecord,
}

fn default_score() -> f32 {
    1.0
}

impl From<&Detection> for DetectionRecord {
    fn from(d: &Detection) -> Self {
        Self {
            id: d.id.clone(),
            label: d.class_name.clone(),
            score: d.confidence.unwrap_or(1.0),
            bbox: BoxRecord {
                x: d.center[0],
                y: d.center[1],
                z: d.center[2],
                length: d.dimensions.length,
                width: d.dimensions.width,
                height: d.dimensions.height,
                yaw: d.yaw as f64,
            },
        }
    }
}

/// Summary of a detection file write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DetectionWriteSummary {
    pub detection_count: usize,
    pub file_size: u64,
}

/// Records sorted by id, numerically when ids are integers, for stable output.
pub fn to_sorted_records(detections: &[Detection]) -> Vec<DetectionRecord> {
    let mut records: Vec<DetectionRecord> = detections.iter().map(DetectionRecord::from).collect();
    records.sort_by(|a, b| compare_ids(&a.id, &b.id));
    records
}

/// Numeric comparison when both ids parse as integers, lexicographic otherwise.
pub fn compare_ids(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

/// Write predicted detections for one branch.
pub fn write_detections_json(detections: &[Detection], path: &Path) -> Result<DetectionWriteSummary> {
    write_records(&to_sorted_records(detections), path)
}

/// Write ground truth; missing confidences are written as score 1.0.
pub fn write_gt_json(ground_truth: &[Detection], path: &Path) -> Result<DetectionWriteSummary> {
    write_records(&to_sorted_records(ground_truth), path)
}

fn write_records(records: &[DetectionRecord], path: &Path) -> Result<DetectionWriteSummary> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string(records)?;
    fs::write(path, &json)?;

    Ok(DetectionWriteSummary {
        detection_count: records.len(),
        file_size: json.len() as u64,
    })
}

/// Read a detection JSON file back.
pub fn read_detections_json(path: &Path) -> Result<Vec<DetectionRecord>> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}
