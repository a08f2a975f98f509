//! Quantisation scales and precision thresholds

/// Scale mapping [-1, 1] onto signed 16-bit codes
pub const INT16_SCALE: f32 = 32767.0;

/// Scale mapping [0, 1] intensity onto unsigned 16-bit codes
pub const INTENSITY_SCALE: f32 = 65535.0;

/// Largest finite binary16 magnitude; anything beyond overflows to infinity
pub const HALF_MAX: f32 = 65504.0;

/// Reconstruction tolerance for the 1 mm precision flag (distance units)
pub const ONE_MILLIMETRE: f32 = 1e-3;

pub const MODE_TAG_OFF: u8 = 0;
pub const MODE_TAG_HALF: u8 = 1;
pub const MODE_TAG_NORMALIZED_INTEGER: u8 = 2;
