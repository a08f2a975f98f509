/// Axis-aligned bounds tracking and normalisation
use crate::point_cloud::PointCloud;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Points per parallel chunk when reducing bounds.
const BOUNDS_CHUNK_SIZE: usize = 25_000;

/// Axis-aligned bounding box over x, y, z.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Aabb {
    /// Create new bounds initialised to infinity values
    pub fn new() -> Self {
        Self {
            min: [f32::INFINITY; 3],
            max: [f32::NEG_INFINITY; 3],
        }
    }

    /// Degenerate box used for empty clouds.
    pub fn zero() -> Self {
        Self {
            min: [0.0; 3],
            max: [0.0; 3],
        }
    }

    /// Update bounds with a new point
    pub fn update(&mut self, x: f32, y: f32, z: f32) {
        for (axis, v) in [x, y, z].into_iter().enumerate() {
            self.min[axis] = self.min[axis].min(v);
            self.max[axis] = self.max[axis].max(v);
        }
    }

    /// Combine with bounds computed over another chunk
    pub fn merge(mut self, other: Aabb) -> Self {
        for axis in 0..3 {
            self.min[axis] = self.min[axis].min(other.min[axis]);
            self.max[axis] = self.max[axis].max(other.max[axis]);
        }
        self
    }

    /// Get world space dimensions
    pub fn dimensions(&self) -> [f32; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    /// Per-axis extent with zero-extent axes replaced by 1 so normalisation never divides by zero
    pub fn safe_range(&self) -> [f32; 3] {
        self.dimensions()
            .map(|extent| if extent == 0.0 { 1.0 } else { extent })
    }

    /// Normalise a coordinate on `axis` to the [-1, 1] range
    pub fn normalize(&self, axis: usize, v: f32) -> f32 {
        (v - self.min[axis]) / self.safe_range()[axis] * 2.0 - 1.0
    }

    /// Map a [-1, 1] value on `axis` back into world units
    pub fn denormalize(&self, axis: usize, n: f32) -> f32 {
        (n + 1.0) / 2.0 * self.safe_range()[axis] + self.min[axis]
    }

    /// Axes where min exceeds max, as (axis name, min, max)
    pub fn inverted_axes(&self) -> Vec<(char, f32, f32)> {
        ['x', 'y', 'z']
            .into_iter()
            .enumerate()
            .filter(|&(axis, _)| self.min[axis] > self.max[axis])
            .map(|(axis, name)| (name, self.min[axis], self.max[axis]))
            .collect()
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute bounds over the spatial columns of a cloud.
/// Empty clouds yield the (0,0,0)-(0,0,0) box rather than an error.
pub fn compute_aabb(cloud: &PointCloud) -> Aabb {
    if cloud.is_empty() {
        return Aabb::zero();
    }

    let width = cloud.width().len();
    cloud
        .values()
        .par_chunks(BOUNDS_CHUNK_SIZE * width)
        .map(|chunk| {
            let mut local_bounds = Aabb::new();
            for point in chunk.chunks_exact(width) {
                local_bounds.update(point[0], point[1], point[2]);
            }
            local_bounds
        })
        .reduce_with(Aabb::merge)
        .unwrap_or_else(Aabb::zero)
}
