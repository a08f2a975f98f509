//! Point coordinate quantisation.
//!
//! Three interchangeable encodings trade precision for payload size:
//!
//! | mode                 | encoding                        | bytes/value |
//! |----------------------|---------------------------------|-------------|
//! | `off`                | f32                             | 4           |
//! | `half`               | IEEE binary16                   | 2           |
//! | `normalized-integer` | i16 xyz in bbox, u16 intensity  | 2           |
//!
//! Every quantisation returns a [`QuantizationEnvelope`] holding all that
//! [`dequantize_points`] needs to invert it.
//!
//! The binary16 encoding represents magnitudes up to [`HALF_MAX`] (65504).
//! Larger values overflow to infinity; such values are counted in the
//! envelope's `overflow_count` and reported through `precision_warning`.

use crate::bounds::{Aabb, compute_aabb};
use crate::error::{ExportError, Result};
use crate::point_cloud::{PointCloud, PointWidth};
use constants::quantization::{
    HALF_MAX, INT16_SCALE, INTENSITY_SCALE, MODE_TAG_HALF, MODE_TAG_NORMALIZED_INTEGER,
    MODE_TAG_OFF, ONE_MILLIMETRE,
};
use half::f16;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuantizationMode {
    Off,
    Half,
    NormalizedInteger,
}

impl QuantizationMode {
    /// Tag stored in the first byte of a frame container.
    pub fn tag(self) -> u8 {
        match self {
            QuantizationMode::Off => MODE_TAG_OFF,
            QuantizationMode::Half => MODE_TAG_HALF,
            QuantizationMode::NormalizedInteger => MODE_TAG_NORMALIZED_INTEGER,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            MODE_TAG_OFF => Some(QuantizationMode::Off),
            MODE_TAG_HALF => Some(QuantizationMode::Half),
            MODE_TAG_NORMALIZED_INTEGER => Some(QuantizationMode::NormalizedInteger),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            QuantizationMode::Off => "off",
            QuantizationMode::Half => "half",
            QuantizationMode::NormalizedInteger => "normalized-integer",
        }
    }

    /// Bytes used by one encoded coordinate or intensity value.
    pub fn bytes_per_value(self) -> usize {
        match self {
            QuantizationMode::Off => 4,
            QuantizationMode::Half | QuantizationMode::NormalizedInteger => 2,
        }
    }
}

impl FromStr for QuantizationMode {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "off" => Ok(QuantizationMode::Off),
            "half" | "fp16" => Ok(QuantizationMode::Half),
            "normalized-integer" | "int16" => Ok(QuantizationMode::NormalizedInteger),
            other => Err(ExportError::InvalidArgument(format!(
                "Invalid quantization mode: {other}. Choose from off, half, normalized-integer"
            ))),
        }
    }
}

impl fmt::Display for QuantizationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One point in normalised-integer encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantizedPoint {
    pub x: i16,
    pub y: i16,
    pub z: i16,
    pub intensity: Option<u16>,
}

/// Quantised point array in one of the three encodings.
#[derive(Debug, Clone, PartialEq)]
pub enum QuantizedPoints {
    Float32(PointCloud),
    Half {
        width: PointWidth,
        values: Vec<f16>,
    },
    NormalizedInteger {
        points: Vec<QuantizedPoint>,
        has_intensity: bool,
        /// Box the codes are relative to
        frame: Aabb,
    },
}

impl QuantizedPoints {
    pub fn mode(&self) -> QuantizationMode {
        match self {
            QuantizedPoints::Float32(_) => QuantizationMode::Off,
            QuantizedPoints::Half { .. } => QuantizationMode::Half,
            QuantizedPoints::NormalizedInteger { .. } => QuantizationMode::NormalizedInteger,
        }
    }

    pub fn width(&self) -> PointWidth {
        match self {
            QuantizedPoints::Float32(cloud) => cloud.width(),
            QuantizedPoints::Half { width, .. } => *width,
            QuantizedPoints::NormalizedInteger { has_intensity, .. } => {
                if *has_intensity {
                    PointWidth::XyzIntensity
                } else {
                    PointWidth::Xyz
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            QuantizedPoints::Float32(cloud) => cloud.len(),
            QuantizedPoints::Half { width, values } => values.len() / width.len(),
            QuantizedPoints::NormalizedInteger { points, .. } => points.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes_per_point(&self) -> usize {
        self.width().len() * self.mode().bytes_per_value()
    }
}

/// Everything needed to invert a quantisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizationEnvelope {
    pub mode: QuantizationMode,
    pub dtype: String,
    pub bytes_per_point: usize,
    pub compression: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox_min: Option<[f32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox_max: Option<[f32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intensity_scale: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision_mm: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suitable_range: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overflow_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision_warning: Option<String>,
}

impl QuantizationEnvelope {
    fn basic(mode: QuantizationMode, dtype: &str, bytes_per_point: usize, compression: f32) -> Self {
        Self {
            mode,
            dtype: dtype.to_string(),
            bytes_per_point,
            compression,
            bbox_min: None,
            bbox_max: None,
            intensity_scale: None,
            precision_mm: None,
            suitable_range: None,
            overflow_count: None,
            precision_warning: None,
        }
    }
}

/// Quantise a float cloud with the given mode.
pub fn quantize_points(
    points: &PointCloud,
    mode: QuantizationMode,
) -> Result<(QuantizedPoints, QuantizationEnvelope)> {
    match mode {
        QuantizationMode::Off => Ok(quantize_off(points)),
        QuantizationMode::Half => Ok(quantize_half(points)),
        QuantizationMode::NormalizedInteger => Ok(quantize_normalized_integer(points)),
    }
}

fn quantize_off(points: &PointCloud) -> (QuantizedPoints, QuantizationEnvelope) {
    let envelope = QuantizationEnvelope::basic(
        QuantizationMode::Off,
        "float32",
        points.width().len() * 4,
        1.0,
    );
    (QuantizedPoints::Float32(points.clone()), envelope)
}

fn quantize_half(points: &PointCloud) -> (QuantizedPoints, QuantizationEnvelope) {
    let values: Vec<f16> = points.values().iter().map(|&v| f16::from_f32(v)).collect();
    let overflow_count = values.iter().filter(|v| v.is_infinite()).count();

    let mut envelope = QuantizationEnvelope::basic(
        QuantizationMode::Half,
        "float16",
        points.width().len() * 2,
        0.5,
    );
    envelope.suitable_range = Some(format!("[-{HALF_MAX}, {HALF_MAX}]"));
    envelope.overflow_count = Some(overflow_count);

    if overflow_count > 0 {
        let message = format!(
            "{overflow_count} value(s) exceed the float16 range of +/-{HALF_MAX} and overflowed to infinity"
        );
        warn!("{}", message);
        envelope.precision_warning = Some(message);
    }

    (
        QuantizedPoints::Half {
            width: points.width(),
            values,
        },
        envelope,
    )
}

// PointCloud guarantees at least x, y, z, so narrower input never reaches here
fn quantize_normalized_integer(points: &PointCloud) -> (QuantizedPoints, QuantizationEnvelope) {
    let bbox = compute_aabb(points);
    let has_intensity = points.width().has_intensity();

    let quantized: Vec<QuantizedPoint> = points
        .points()
        .map(|p| QuantizedPoint {
            x: encode_axis(&bbox, 0, p[0]),
            y: encode_axis(&bbox, 1, p[1]),
            z: encode_axis(&bbox, 2, p[2]),
            intensity: has_intensity.then(|| encode_intensity(p[3])),
        })
        .collect();

    let max_range = bbox.safe_range().into_iter().fold(0.0f32, f32::max);
    let dtype = if has_intensity {
        "int16 (xyz) + uint16 (intensity)"
    } else {
        "int16"
    };

    let mut envelope = QuantizationEnvelope::basic(
        QuantizationMode::NormalizedInteger,
        dtype,
        points.width().len() * 2,
        0.5,
    );
    envelope.bbox_min = Some(bbox.min);
    envelope.bbox_max = Some(bbox.max);
    envelope.intensity_scale = has_intensity.then_some(INTENSITY_SCALE as u32);
    envelope.precision_mm = Some(max_range / INT16_SCALE * 1000.0);

    (
        QuantizedPoints::NormalizedInteger {
            points: quantized,
            has_intensity,
            frame: bbox,
        },
        envelope,
    )
}

fn encode_axis(bbox: &Aabb, axis: usize, v: f32) -> i16 {
    (bbox.normalize(axis, v) * INT16_SCALE).round() as i16
}

pub(crate) fn decode_axis(bbox: &Aabb, axis: usize, code: i16) -> f32 {
    bbox.denormalize(axis, code as f32 / INT16_SCALE)
}

fn encode_intensity(i: f32) -> u16 {
    (i * INTENSITY_SCALE).round().clamp(0.0, INTENSITY_SCALE) as u16
}

/// Invert a quantisation using only its envelope.
pub fn dequantize_points(
    quantized: &QuantizedPoints,
    envelope: &QuantizationEnvelope,
) -> Result<PointCloud> {
    if envelope.mode != quantized.mode() {
        return Err(ExportError::InvalidMode {
            expected: quantized.mode().name().to_string(),
            found: envelope.mode.name().to_string(),
        });
    }

    match quantized {
        QuantizedPoints::Float32(cloud) => Ok(cloud.clone()),
        QuantizedPoints::Half { width, values } => Ok(PointCloud::from_widened(
            *width,
            values.iter().map(|v| v.to_f32()).collect(),
        )),
        QuantizedPoints::NormalizedInteger {
            points,
            has_intensity,
            ..
        } => {
            let bbox = Aabb {
                min: envelope.bbox_min.ok_or(ExportError::MissingField("bbox_min"))?,
                max: envelope.bbox_max.ok_or(ExportError::MissingField("bbox_max"))?,
            };
            let intensity_scale = envelope
                .intensity_scale
                .map_or(INTENSITY_SCALE, |scale| scale as f32);
            let width = if *has_intensity {
                PointWidth::XyzIntensity
            } else {
                PointWidth::Xyz
            };

            let mut values = Vec::with_capacity(points.len() * width.len());
            for p in points {
                values.push(decode_axis(&bbox, 0, p.x));
                values.push(decode_axis(&bbox, 1, p.y));
                values.push(decode_axis(&bbox, 2, p.z));
                if *has_intensity {
                    values.push(p.intensity.unwrap_or(0) as f32 / intensity_scale);
                }
            }
            PointCloud::from_flat(width, values)
        }
    }
}

/// Reconstruction error statistics, in distance units unless noted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantizationErrorStats {
    pub max_error: f64,
    pub mean_error: f64,
    pub rmse: f64,
    pub within_tolerance_1mm: bool,
    pub max_error_mm: f64,
}

/// Compare a float cloud with its dequantised reconstruction, value by value.
pub fn compute_quantization_error(
    original: &PointCloud,
    reconstructed: &PointCloud,
) -> Result<QuantizationErrorStats> {
    if original.width() != reconstructed.width() || original.len() != reconstructed.len() {
        return Err(ExportError::InvalidArgument(format!(
            "Shape mismatch between original ({}x{}) and dequantized ({}x{})",
            original.len(),
            original.width().len(),
            reconstructed.len(),
            reconstructed.width().len()
        )));
    }

    let count = original.values().len();
    if count == 0 {
        return Ok(QuantizationErrorStats {
            max_error: 0.0,
            mean_error: 0.0,
            rmse: 0.0,
            within_tolerance_1mm: true,
            max_error_mm: 0.0,
        });
    }

    let mut max_error = 0.0f64;
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for (&a, &b) in original.values().iter().zip(reconstructed.values()) {
        let err = (a as f64 - b as f64).abs();
        max_error = max_error.max(err);
        sum += err;
        sum_sq += err * err;
    }

    // Exact values already satisfy mean <= rmse <= max; the clamps only absorb f64 rounding
    let mean_error = (sum / count as f64).min(max_error);
    let rmse = (sum_sq / count as f64).sqrt().max(mean_error).min(max_error);

    Ok(QuantizationErrorStats {
        max_error,
        mean_error,
        rmse,
        within_tolerance_1mm: max_error <= ONE_MILLIMETRE as f64,
        max_error_mm: max_error * 1000.0,
    })
}
