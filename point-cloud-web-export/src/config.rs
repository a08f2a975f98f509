/// Export settings loaded from an optional JSON file and overridden by CLI flags.
use crate::downsample::{DownsampleConfig, Tier};
use crate::error::Result;
use crate::manifest::default_class_map;
use crate::quantize::QuantizationMode;
use constants::class::{DEFAULT_FPS, MANIFEST_VERSION};
use constants::tier::DEFAULT_SEED;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub tier: Tier,
    pub quantization: QuantizationMode,
    pub seed: u64,
    pub fps: u32,
    pub version: String,
    pub class_map: BTreeMap<String, String>,
    /// Predictions scoring below this are dropped before writing.
    pub score_threshold: Option<f32>,
    /// Dequantise each frame and record the round-trip error.
    pub report_quantization_error: bool,
    /// Branches declared up front; merged with those found in frame detections.
    pub branches: Vec<String>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            tier: Tier::High,
            quantization: QuantizationMode::Off,
            seed: DEFAULT_SEED,
            fps: DEFAULT_FPS,
            version: MANIFEST_VERSION.to_string(),
            class_map: default_class_map(),
            score_threshold: None,
            report_quantization_error: false,
            branches: Vec::new(),
        }
    }
}

impl ExportConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn downsample_config(&self) -> DownsampleConfig {
        DownsampleConfig { seed: self.seed }
    }
}

/// Read a branch list file.
///
/// Accepts either `{"branches": [...]}` or a bare array. Entries are objects
/// named by `branch_id`, then `name`, falling back to their index; plain
/// strings are taken as-is. Any other top-level shape yields no branches.
pub fn load_branches(path: &Path) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&contents)?;

    let entries = match &value {
        Value::Object(map) => map.get("branches").and_then(Value::as_array),
        Value::Array(entries) => Some(entries),
        _ => None,
    };
    let Some(entries) = entries else {
        return Ok(Vec::new());
    };

    Ok(entries
        .iter()
        .enumerate()
        .map(|(index, entry)| match entry {
            Value::String(name) => name.clone(),
            _ => ["branch_id", "name"]
                .into_iter()
                .find_map(|key| entry.get(key).and_then(Value::as_str))
                .map_or_else(|| index.to_string(), str::to_string),
        })
        .collect())
}
