/// Flat f32 point storage shared by every transform stage
use crate::error::{ExportError, Result};

/// Number of values per point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointWidth {
    /// x, y, z
    Xyz,
    /// x, y, z, intensity
    XyzIntensity,
}

impl PointWidth {
    pub fn from_len(width: usize) -> Result<Self> {
        match width {
            3 => Ok(PointWidth::Xyz),
            4 => Ok(PointWidth::XyzIntensity),
            other => Err(ExportError::InvalidArgument(format!(
                "points must have 3 or 4 values each, got {other}"
            ))),
        }
    }

    pub fn len(self) -> usize {
        match self {
            PointWidth::Xyz => 3,
            PointWidth::XyzIntensity => 4,
        }
    }

    pub fn has_intensity(self) -> bool {
        self == PointWidth::XyzIntensity
    }
}

/// Ordered point cloud stored row-major as `[x, y, z(, intensity)]` per point.
///
/// Transforms never mutate a cloud in place; they build a new one.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloud {
    width: PointWidth,
    values: Vec<f32>,
}

impl PointCloud {
    /// Wraps flat values, checking the width divides them and that all are finite.
    pub fn from_flat(width: PointWidth, values: Vec<f32>) -> Result<Self> {
        if values.len() % width.len() != 0 {
            return Err(ExportError::InvalidArgument(format!(
                "{} values do not form whole points of width {}",
                values.len(),
                width.len()
            )));
        }

        if let Some(pos) = values.iter().position(|v| !v.is_finite()) {
            return Err(ExportError::InvalidArgument(format!(
                "non-finite value at point {}",
                pos / width.len()
            )));
        }

        Ok(Self { width, values })
    }

    /// Wraps widened float16 values, which may hold infinities from overflow.
    pub(crate) fn from_widened(width: PointWidth, values: Vec<f32>) -> Self {
        debug_assert_eq!(values.len() % width.len(), 0);
        Self { width, values }
    }

    /// Builds a cloud from per-point rows; every row must have the same width.
    pub fn from_rows<R: AsRef<[f32]>>(rows: &[R]) -> Result<Self> {
        let Some(first) = rows.first() else {
            return Err(ExportError::InvalidArgument(
                "cannot infer point width from zero rows, use PointCloud::empty".into(),
            ));
        };
        let width = PointWidth::from_len(first.as_ref().len())?;

        let mut values = Vec::with_capacity(rows.len() * width.len());
        for (idx, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            if row.len() != width.len() {
                return Err(ExportError::InvalidArgument(format!(
                    "point {idx} has {} values, expected {}",
                    row.len(),
                    width.len()
                )));
            }
            values.extend_from_slice(row);
        }

        Self::from_flat(width, values)
    }

    pub fn empty(width: PointWidth) -> Self {
        Self {
            width,
            values: Vec::new(),
        }
    }

    pub fn width(&self) -> PointWidth {
        self.width
    }

    pub fn len(&self) -> usize {
        self.values.len() / self.width.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn point(&self, index: usize) -> &[f32] {
        let w = self.width.len();
        &self.values[index * w..(index + 1) * w]
    }

    pub fn points(&self) -> std::slice::ChunksExact<'_, f32> {
        self.values.chunks_exact(self.width.len())
    }

    /// Copies the points at `indices`, in the given order.
    pub fn select(&self, indices: &[usize]) -> Self {
        let mut values = Vec::with_capacity(indices.len() * self.width.len());
        for &idx in indices {
            values.extend_from_slice(self.point(idx));
        }
        Self {
            width: self.width,
            values,
        }
    }
}
