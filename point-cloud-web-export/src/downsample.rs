//! Tier-based point cloud downsampling.
//!
//! Uniform random sampling without replacement keeps the spatial
//! distribution of the scan. Selected indices are sorted before the points
//! are copied so that kept points stay in scan order.

use crate::error::{ExportError, Result};
use crate::point_cloud::PointCloud;
use constants::tier::{DEFAULT_SEED, HIGH_TIER_POINTS, LOW_TIER_POINTS, TIER_TOLERANCE_PCT};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Named target point count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// 100 000 points
    High,
    /// 50 000 points
    Low,
}

impl Tier {
    pub fn target_count(self) -> usize {
        match self {
            Tier::High => HIGH_TIER_POINTS,
            Tier::Low => LOW_TIER_POINTS,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Tier::High => "high",
            Tier::Low => "low",
        }
    }
}

impl FromStr for Tier {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "high" | "100k" | "full" => Ok(Tier::High),
            "low" | "50k" | "fallback" => Ok(Tier::Low),
            other => Err(ExportError::InvalidArgument(format!(
                "Invalid tier: {other}. Choose from high (100k) or low (50k)"
            ))),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Integer point count for a tier name.
pub fn get_target_count(tier: &str) -> Result<usize> {
    Ok(tier.parse::<Tier>()?.target_count())
}

/// Sampling parameters passed explicitly to every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownsampleConfig {
    pub seed: u64,
}

impl Default for DownsampleConfig {
    fn default() -> Self {
        Self { seed: DEFAULT_SEED }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownsampleMethod {
    /// Input already within the tier, returned unchanged
    None,
    /// Uniform random sampling without replacement
    Random,
}

/// Record of what a downsampling call did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownsampleMetadata {
    pub method: DownsampleMethod,
    pub target_tier: Tier,
    pub target_count: usize,
    pub original_count: usize,
    pub final_count: usize,
    pub reduction_ratio: f64,
    pub within_spec: bool,
    pub tolerance_pct: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Reduce `points` to at most the tier's target count.
///
/// Clouds already at or below the target (including empty clouds) come back
/// unchanged with method `none`.
pub fn downsample_points(
    points: PointCloud,
    tier: Tier,
    config: &DownsampleConfig,
) -> (PointCloud, DownsampleMetadata) {
    let target_count = tier.target_count();
    let original_count = points.len();

    if original_count <= target_count {
        let metadata = DownsampleMetadata {
            method: DownsampleMethod::None,
            target_tier: tier,
            target_count,
            original_count,
            final_count: original_count,
            reduction_ratio: 1.0,
            within_spec: true,
            tolerance_pct: TIER_TOLERANCE_PCT,
            reason: Some("original_count <= target_count".to_string()),
        };
        return (points, metadata);
    }

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut indices = rand::seq::index::sample(&mut rng, original_count, target_count).into_vec();
    indices.sort_unstable();

    let downsampled = points.select(&indices);
    let final_count = downsampled.len();
    let tolerance = TIER_TOLERANCE_PCT / 100.0 * target_count as f64;
    let within_spec = (final_count as f64 - target_count as f64).abs() <= tolerance;

    debug!(
        "Downsampled {} -> {} points (tier {}, seed {})",
        original_count, final_count, tier, config.seed
    );

    let metadata = DownsampleMetadata {
        method: DownsampleMethod::Random,
        target_tier: tier,
        target_count,
        original_count,
        final_count,
        reduction_ratio: final_count as f64 / original_count as f64,
        within_spec,
        tolerance_pct: TIER_TOLERANCE_PCT,
        reason: None,
    };

    (downsampled, metadata)
}
