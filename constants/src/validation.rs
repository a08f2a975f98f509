/// Yaw values beyond (-pi, pi] by more than this are reported (radians)
pub const YAW_TOLERANCE: f64 = 1e-3;

/// Number of checks run by the validator suite
pub const CHECK_COUNT: usize = 6;
