//! Binary frame container layout (little-endian)
//!
//! | offset | field            |
//! |--------|------------------|
//! | 0      | mode tag (u8)    |
//! | 1      | AABB min 3 x f32 |
//! | 13     | AABB max 3 x f32 |
//! | 25     | point count u32  |
//! | 29     | payload          |

pub const MODE_TAG_OFFSET: usize = 0;
pub const AABB_MIN_OFFSET: usize = 1;
pub const AABB_MAX_OFFSET: usize = 13;
pub const POINT_COUNT_OFFSET: usize = 25;

/// Fixed header size preceding every payload
pub const HEADER_SIZE: usize = 29;

/// Subdirectory of a sequence holding the frame containers
pub const FRAMES_DIR: &str = "frames";

/// Sequence manifest filename
pub const MANIFEST_FILE: &str = "manifest.json";
