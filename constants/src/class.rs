/// Detection class labels shared by the manifest class map and detection JSON.
pub struct ClassInfo {
    pub id: u8,
    pub name: &'static str,
}

pub const CLASS_MAP: &[ClassInfo] = &[
    ClassInfo {
        id: 0,
        name: "vehicle",
    },
    ClassInfo {
        id: 1,
        name: "pedestrian",
    },
    ClassInfo {
        id: 2,
        name: "cyclist",
    },
];

/// Manifest schema version written into every sequence manifest
pub const MANIFEST_VERSION: &str = "1.0";

/// Default playback rate recorded in the manifest
pub const DEFAULT_FPS: u32 = 10;
