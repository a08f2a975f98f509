/// Binary frame container: 29-byte header followed by the raw point payload.
use crate::bounds::{Aabb, compute_aabb};
use crate::error::{ExportError, Result};
use crate::point_cloud::{PointCloud, PointWidth};
use crate::quantize::{QuantizationMode, QuantizedPoint, QuantizedPoints, decode_axis};
use constants::container::{
    AABB_MAX_OFFSET, AABB_MIN_OFFSET, HEADER_SIZE, MODE_TAG_OFFSET, POINT_COUNT_OFFSET,
};
use half::f16;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Decoded container header.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ContainerHeader {
    pub mode_tag: u8,
    pub aabb: Aabb,
    pub point_count: u32,
}

impl ContainerHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[MODE_TAG_OFFSET] = self.mode_tag;
        for (i, v) in self.aabb.min.iter().chain(&self.aabb.max).enumerate() {
            let offset = AABB_MIN_OFFSET + i * 4;
            bytes[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
        }
        bytes[POINT_COUNT_OFFSET..HEADER_SIZE].copy_from_slice(&self.point_count.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        let read_f32 = |offset: usize| {
            f32::from_le_bytes([
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
            ])
        };
        let min = [0, 1, 2].map(|i| read_f32(AABB_MIN_OFFSET + i * 4));
        let max = [0, 1, 2].map(|i| read_f32(AABB_MAX_OFFSET + i * 4));
        let point_count = u32::from_le_bytes([
            bytes[POINT_COUNT_OFFSET],
            bytes[POINT_COUNT_OFFSET + 1],
            bytes[POINT_COUNT_OFFSET + 2],
            bytes[POINT_COUNT_OFFSET + 3],
        ]);

        Self {
            mode_tag: bytes[MODE_TAG_OFFSET],
            aabb: Aabb { min, max },
            point_count,
        }
    }

    pub fn mode(&self) -> Option<QuantizationMode> {
        QuantizationMode::from_tag(self.mode_tag)
    }
}

/// Bookkeeping returned after a successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WriteSummary {
    pub point_count: usize,
    pub header_size: usize,
    pub file_size: u64,
}

/// Bounds of the values actually serialised, in world units.
///
/// Normalised-integer codes are decoded through their own frame, so the
/// header box matches the box used for normalisation.
pub fn header_aabb(points: &QuantizedPoints) -> Aabb {
    match points {
        QuantizedPoints::Float32(cloud) => compute_aabb(cloud),
        QuantizedPoints::Half { width, values } => compute_aabb(&PointCloud::from_widened(
            *width,
            values.iter().map(|v| v.to_f32()).collect(),
        )),
        QuantizedPoints::NormalizedInteger { points, frame, .. } => {
            if points.is_empty() {
                return Aabb::zero();
            }
            let mut lo = [i16::MAX; 3];
            let mut hi = [i16::MIN; 3];
            for p in points {
                for (axis, code) in [p.x, p.y, p.z].into_iter().enumerate() {
                    lo[axis] = lo[axis].min(code);
                    hi[axis] = hi[axis].max(code);
                }
            }
            Aabb {
                min: [0, 1, 2].map(|axis| decode_axis(frame, axis, lo[axis])),
                max: [0, 1, 2].map(|axis| decode_axis(frame, axis, hi[axis])),
            }
        }
    }
}

/// Flat little-endian payload in the array's own encoding.
pub fn encode_payload(points: &QuantizedPoints) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(points.len() * points.bytes_per_point());
    match points {
        QuantizedPoints::Float32(cloud) => {
            for &float_val in cloud.values() {
                bytes.extend_from_slice(&float_val.to_le_bytes());
            }
        }
        QuantizedPoints::Half { values, .. } => {
            for &half_float in values {
                bytes.extend_from_slice(&half_float.to_bits().to_le_bytes());
            }
        }
        QuantizedPoints::NormalizedInteger { points, .. } => {
            for p in points {
                bytes.extend_from_slice(&p.x.to_le_bytes());
                bytes.extend_from_slice(&p.y.to_le_bytes());
                bytes.extend_from_slice(&p.z.to_le_bytes());
                if let Some(intensity) = p.intensity {
                    bytes.extend_from_slice(&intensity.to_le_bytes());
                }
            }
        }
    }
    bytes
}

/// Write a frame container to `path`, creating parent directories.
///
/// Bytes go to a sibling temporary file that is synced and then renamed
/// over `path`, so a successful return never leaves a truncated file.
pub fn write_points_bin(points: &QuantizedPoints, path: &Path) -> Result<WriteSummary> {
    let point_count = u32::try_from(points.len()).map_err(|_| {
        ExportError::InvalidArgument(format!(
            "{} points exceed the container's u32 point count",
            points.len()
        ))
    })?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let header = ContainerHeader {
        mode_tag: points.mode().tag(),
        aabb: header_aabb(points),
        point_count,
    };
    let payload = encode_payload(points);

    let tmp_path = temporary_path(path);
    let write_result = (|| -> Result<()> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(&header.to_bytes())?;
        file.write_all(&payload)?;
        file.sync_all()?;
        Ok(())
    })();
    if let Err(e) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }
    fs::rename(&tmp_path, path)?;

    let file_size = (HEADER_SIZE + payload.len()) as u64;
    info!(
        "Wrote {} ({} points, mode {}, {} bytes)",
        path.display(),
        point_count,
        points.mode(),
        file_size
    );

    Ok(WriteSummary {
        point_count: points.len(),
        header_size: HEADER_SIZE,
        file_size,
    })
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Read only the fixed header of a container.
pub fn read_header(path: &Path) -> Result<ContainerHeader> {
    let mut file = File::open(path)?;
    let mut bytes = [0u8; HEADER_SIZE];
    file.read_exact(&mut bytes)?;
    Ok(ContainerHeader::from_bytes(&bytes))
}

/// Read a whole container back, inferring point width from the payload length.
pub fn read_frame(path: &Path) -> Result<(ContainerHeader, QuantizedPoints)> {
    let bytes = fs::read(path)?;
    if bytes.len() < HEADER_SIZE {
        return Err(ExportError::Container(format!(
            "{} is {} bytes, shorter than the {HEADER_SIZE}-byte header",
            path.display(),
            bytes.len()
        )));
    }

    let mut header_bytes = [0u8; HEADER_SIZE];
    header_bytes.copy_from_slice(&bytes[..HEADER_SIZE]);
    let header = ContainerHeader::from_bytes(&header_bytes);
    let mode = header.mode().ok_or_else(|| {
        ExportError::Container(format!("unknown mode tag {}", header.mode_tag))
    })?;

    let payload = &bytes[HEADER_SIZE..];
    let count = header.point_count as usize;
    let width = if count == 0 {
        if !payload.is_empty() {
            return Err(ExportError::Container(
                "payload present but point count is zero".into(),
            ));
        }
        PointWidth::XyzIntensity
    } else {
        let per_point = payload.len() / count;
        if per_point * count != payload.len() || per_point % mode.bytes_per_value() != 0 {
            return Err(ExportError::Container(format!(
                "payload of {} bytes does not hold {count} whole points",
                payload.len()
            )));
        }
        PointWidth::from_len(per_point / mode.bytes_per_value())
            .map_err(|e| ExportError::Container(e.to_string()))?
    };

    let points = decode_payload(mode, width, payload, header.aabb)?;
    Ok((header, points))
}

fn decode_payload(
    mode: QuantizationMode,
    width: PointWidth,
    payload: &[u8],
    aabb: Aabb,
) -> Result<QuantizedPoints> {
    let points = match mode {
        QuantizationMode::Off => {
            let values = payload
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            QuantizedPoints::Float32(
                PointCloud::from_flat(width, values)
                    .map_err(|e| ExportError::Container(e.to_string()))?,
            )
        }
        QuantizationMode::Half => QuantizedPoints::Half {
            width,
            values: payload
                .chunks_exact(2)
                .map(|b| f16::from_bits(u16::from_le_bytes([b[0], b[1]])))
                .collect(),
        },
        QuantizationMode::NormalizedInteger => {
            let has_intensity = width.has_intensity();
            let points = payload
                .chunks_exact(width.len() * 2)
                .map(|b| QuantizedPoint {
                    x: i16::from_le_bytes([b[0], b[1]]),
                    y: i16::from_le_bytes([b[2], b[3]]),
                    z: i16::from_le_bytes([b[4], b[5]]),
                    intensity: has_intensity.then(|| u16::from_le_bytes([b[6], b[7]])),
                })
                .collect();
            QuantizedPoints::NormalizedInteger {
                points,
                has_intensity,
                frame: aabb,
            }
        }
    };
    Ok(points)
}
