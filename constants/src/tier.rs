//! Downsampling tiers and per-frame point budgets

/// Target point count for the high tier ("100k")
pub const HIGH_TIER_POINTS: usize = 100_000;

/// Target point count for the low tier ("50k")
pub const LOW_TIER_POINTS: usize = 50_000;

/// Allowed deviation from the target count, in percent
pub const TIER_TOLERANCE_PCT: f64 = 1.0;

/// Seed used when the caller does not supply one
pub const DEFAULT_SEED: u64 = 42;

/// Point-count ceiling enforced by the validator for the "full" budget
pub const FULL_BUDGET_CEILING: u64 = 100_000;

/// Point-count ceiling enforced by the validator for the "fallback" budget
pub const FALLBACK_BUDGET_CEILING: u64 = 50_000;
