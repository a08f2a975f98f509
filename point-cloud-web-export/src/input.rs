/// Frame sources: LAS/LAZ scans and raw little-endian float32 records.
use crate::error::{ExportError, Result};
use crate::point_cloud::{PointCloud, PointWidth};
use constants::quantization::INTENSITY_SCALE;
use las::Reader;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::debug;

/// On-disk encoding of a frame file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// `.las` or compressed `.laz`
    Las,
    /// `.bin`, four float32 values per point
    Raw,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "las" | "laz" => Some(SourceFormat::Las),
            "bin" => Some(SourceFormat::Raw),
            _ => None,
        }
    }
}

/// A discovered frame file and the id it will be exported under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSource {
    pub id: String,
    pub path: PathBuf,
    pub format: SourceFormat,
}

impl FrameSource {
    pub fn load(&self) -> Result<PointCloud> {
        match self.format {
            SourceFormat::Las => read_las_frame(&self.path),
            SourceFormat::Raw => read_raw_frame(&self.path),
        }
    }
}

/// Create LAS file reader for point cloud access.
/// Handles both .las and .laz compressed formats.
pub fn create_reader(file_path: &Path) -> Result<Reader> {
    let file = File::open(file_path)?;
    let buf_reader = BufReader::new(file);
    Ok(Reader::new(buf_reader)?)
}

/// Read a LAS/LAZ scan as x, y, z and intensity scaled to [0, 1].
pub fn read_las_frame(path: &Path) -> Result<PointCloud> {
    let mut reader = create_reader(path)?;
    let total_points = reader.header().number_of_points() as usize;

    let mut values = Vec::with_capacity(total_points * PointWidth::XyzIntensity.len());
    for point_result in reader.points() {
        let point = point_result?;
        values.extend_from_slice(&[
            point.x as f32,
            point.y as f32,
            point.z as f32,
            point.intensity as f32 / INTENSITY_SCALE,
        ]);
    }

    debug!("Read {} points from {}", values.len() / 4, path.display());
    PointCloud::from_flat(PointWidth::XyzIntensity, values)
}

/// Read a raw `.bin` frame of little-endian float32 `x, y, z, intensity` records.
pub fn read_raw_frame(path: &Path) -> Result<PointCloud> {
    let bytes = fs::read(path)?;
    let record_size = PointWidth::XyzIntensity.len() * 4;
    if bytes.len() % record_size != 0 {
        return Err(ExportError::InvalidArgument(format!(
            "{}: {} bytes is not a whole number of {record_size}-byte records",
            path.display(),
            bytes.len()
        )));
    }

    let values = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    PointCloud::from_flat(PointWidth::XyzIntensity, values)
}

/// List frame files in `dir` sorted by name, with ids `000000`, `000001`, ...
pub fn discover_frames(dir: &Path) -> Result<Vec<FrameSource>> {
    let mut files: Vec<(PathBuf, SourceFormat)> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter_map(|path| SourceFormat::from_path(&path).map(|format| (path, format)))
        .collect();
    files.sort_by(|a, b| a.0.file_name().cmp(&b.0.file_name()));

    Ok(files
        .into_iter()
        .enumerate()
        .map(|(index, (path, format))| FrameSource {
            id: format!("{index:06}"),
            path,
            format,
        })
        .collect())
}
