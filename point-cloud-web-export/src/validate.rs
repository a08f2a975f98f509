//! Post-export validation of a sequence directory.
//!
//! Six independent checks run against the manifest and the files it names.
//! A failing check never stops the others; missing files and bad values end
//! up as report entries rather than `Err` values.

use crate::container::read_header;
use crate::detections::{compare_ids, read_detections_json};
use crate::error::{ExportError, Result};
use crate::manifest::{SequenceManifest, load_manifest};
use constants::container::FRAMES_DIR;
use constants::tier::{FALLBACK_BUDGET_CEILING, FULL_BUDGET_CEILING};
use constants::validation::{CHECK_COUNT, YAW_TOLERANCE};
use serde::Serialize;
use std::cmp::Ordering;
use std::f64::consts::PI;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

/// Point budget a sequence is validated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetTier {
    Full,
    Fallback,
}

impl BudgetTier {
    pub fn ceiling(self) -> u64 {
        match self {
            BudgetTier::Full => FULL_BUDGET_CEILING,
            BudgetTier::Fallback => FALLBACK_BUDGET_CEILING,
        }
    }
}

impl FromStr for BudgetTier {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full" => Ok(BudgetTier::Full),
            "fallback" => Ok(BudgetTier::Fallback),
            other => Err(ExportError::InvalidArgument(format!(
                "Unknown tier: {other} (expected full or fallback)"
            ))),
        }
    }
}

impl fmt::Display for BudgetTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BudgetTier::Full => "full",
            BudgetTier::Fallback => "fallback",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub checks: Vec<CheckResult>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub summary: String,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.errors.is_empty() && !self.checks.is_empty() && self.checks.iter().all(|c| c.passed)
    }

    /// Human-readable report for the terminal.
    pub fn print(&self) {
        println!("{}", self.summary);
        for check in &self.checks {
            let mark = if check.passed { "PASS" } else { "FAIL" };
            println!("  [{mark}] {}: {}", check.name, check.detail);
        }
        for warning in &self.warnings {
            println!("  warning: {warning}");
        }
        for error in &self.errors {
            println!("  error: {error}");
        }
    }
}

/// Check 1: manifest lists exactly the expected number of frames.
pub fn validate_frame_count(manifest: &SequenceManifest, expected: usize) -> Vec<String> {
    let actual = manifest.frames.len();
    if actual == expected {
        Vec::new()
    } else {
        vec![format!("Frame count mismatch: expected {expected} got {actual}")]
    }
}

/// Check 2: every frame holds at least one point and no more than the tier allows.
pub fn validate_point_counts(manifest: &SequenceManifest, tier: &str) -> Vec<String> {
    let tier = match tier.parse::<BudgetTier>() {
        Ok(tier) => tier,
        Err(e) => return vec![e.to_string()],
    };
    let ceiling = tier.ceiling();

    let mut errors = Vec::new();
    for frame in &manifest.frames {
        if frame.point_count == 0 {
            errors.push(format!("Frame {}: point count is zero", frame.id));
        } else if frame.point_count > ceiling {
            errors.push(format!(
                "Frame {}: point count {} exceeds {tier} tier limit {ceiling}",
                frame.id, frame.point_count
            ));
        }
    }
    errors
}

/// Check 3: each frame container exists and its header bounds are ordered.
pub fn validate_aabb_ranges(output_dir: &Path, manifest: &SequenceManifest) -> Vec<String> {
    let mut errors = Vec::new();
    for frame in &manifest.frames {
        let path = output_dir.join(FRAMES_DIR).join(format!("{}.bin", frame.id));
        if !path.is_file() {
            errors.push(format!("Frame {}: file not found: {}", frame.id, path.display()));
            continue;
        }
        let header = match read_header(&path) {
            Ok(header) => header,
            Err(e) => {
                errors.push(format!("Frame {}: unreadable header: {e}", frame.id));
                continue;
            }
        };
        for (axis, min, max) in header.aabb.inverted_axes() {
            errors.push(format!(
                "Frame {}: inverted bounds on {axis} (min {min} > max {max})",
                frame.id
            ));
        }
    }
    errors
}

/// Check 4: ground-truth yaw angles lie in (-pi, pi], up to a small tolerance.
///
/// Produces warnings only. Frames without a GT file are skipped.
pub fn validate_yaw_sanity(output_dir: &Path, manifest: &SequenceManifest) -> Vec<String> {
    let mut warnings = Vec::new();
    for frame in &manifest.frames {
        let gt_path = output_dir.join(format!("{}.gt.json", frame.id));
        if !gt_path.is_file() {
            continue;
        }
        let records = match read_detections_json(&gt_path) {
            Ok(records) => records,
            Err(e) => {
                warnings.push(format!(
                    "Frame {}: could not parse {}: {e}",
                    frame.id,
                    gt_path.display()
                ));
                continue;
            }
        };
        for record in records {
            let yaw = record.bbox.yaw;
            if !yaw_in_range(yaw) {
                warnings.push(format!(
                    "Frame {}: detection {} yaw {yaw:.4} outside (-pi, pi]",
                    frame.id, record.id
                ));
            }
        }
    }
    warnings
}

fn yaw_in_range(yaw: f64) -> bool {
    yaw.is_finite() && yaw > -PI - YAW_TOLERANCE && yaw <= PI + YAW_TOLERANCE
}

/// Check 5: frame ids strictly increase.
pub fn validate_frame_ordering(manifest: &SequenceManifest) -> Vec<String> {
    if manifest.frames.is_empty() {
        return vec!["No frames to validate".to_string()];
    }
    manifest
        .frames
        .windows(2)
        .filter(|pair| compare_ids(&pair[0].id, &pair[1].id) != Ordering::Less)
        .map(|pair| {
            format!(
                "Frame ordering violation: {} followed by {}",
                pair[0].id, pair[1].id
            )
        })
        .collect()
}

/// Check 6: the manifest names at least one prediction branch. Warnings only.
pub fn validate_detector_coverage(manifest: &SequenceManifest) -> Vec<String> {
    if manifest.branches.is_empty() {
        vec!["No detector branches listed in manifest".to_string()]
    } else {
        Vec::new()
    }
}

/// Run all checks against `output_dir` and the manifest at `manifest_path`.
pub fn run_validators(
    output_dir: &Path,
    manifest_path: &Path,
    tier: &str,
    expected_frames: usize,
) -> ValidationReport {
    let manifest = match load_manifest(manifest_path) {
        Ok(manifest) => manifest,
        Err(e) => {
            let error = format!("Failed to load manifest: {}: {e}", manifest_path.display());
            warn!("{error}");
            return ValidationReport {
                checks: Vec::new(),
                warnings: Vec::new(),
                errors: vec![error],
                summary: "Validation FAILED: could not load manifest".to_string(),
            };
        }
    };

    let mut checks = Vec::with_capacity(CHECK_COUNT);
    let mut warnings = Vec::new();
    let mut errors = Vec::new();

    let mut record_errors = |name: &str, found: Vec<String>, pass_detail: String| {
        let passed = found.is_empty();
        let detail = if passed { pass_detail } else { found.join("; ") };
        checks.push(CheckResult {
            name: name.to_string(),
            passed,
            detail,
        });
        errors.extend(found);
    };

    let frame_count = manifest.frames.len();
    record_errors(
        "frame_count",
        validate_frame_count(&manifest, expected_frames),
        format!("{frame_count} frames"),
    );
    record_errors(
        "point_counts",
        validate_point_counts(&manifest, tier),
        format!("all frames within {tier} budget"),
    );
    record_errors(
        "aabb_ranges",
        validate_aabb_ranges(output_dir, &manifest),
        "all frame headers readable with ordered bounds".to_string(),
    );
    let yaw_warnings = validate_yaw_sanity(output_dir, &manifest);
    record_errors(
        "frame_ordering",
        validate_frame_ordering(&manifest),
        "frame ids strictly increasing".to_string(),
    );
    let coverage_warnings = validate_detector_coverage(&manifest);

    let yaw_detail = if yaw_warnings.is_empty() {
        "all yaw values in range".to_string()
    } else {
        format!("{} yaw value(s) out of range", yaw_warnings.len())
    };
    let coverage_detail = if coverage_warnings.is_empty() {
        format!("{} branch(es)", manifest.branches.len())
    } else {
        "no branches".to_string()
    };
    // Keep the report in check order: yaw sits between aabb and ordering
    checks.insert(
        3,
        CheckResult {
            name: "yaw_sanity".to_string(),
            passed: true,
            detail: yaw_detail,
        },
    );
    checks.push(CheckResult {
        name: "detector_coverage".to_string(),
        passed: true,
        detail: coverage_detail,
    });
    warnings.extend(yaw_warnings);
    warnings.extend(coverage_warnings);

    for warning in &warnings {
        warn!("{warning}");
    }

    let passed_count = checks.iter().filter(|c| c.passed).count();
    let summary = if errors.is_empty() {
        format!(
            "Validation PASSED: {passed_count}/{CHECK_COUNT} checks passed, {} warning(s)",
            warnings.len()
        )
    } else {
        format!(
            "Validation FAILED: {passed_count}/{CHECK_COUNT} checks passed, {} error(s), {} warning(s)",
            errors.len(),
            warnings.len()
        )
    };
    info!("{summary}");

    ValidationReport {
        checks,
        warnings,
        errors,
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::Aabb;
    use crate::container::ContainerHeader;
    use crate::manifest::{FrameRef, FrameUrls};
    use std::fs;
    use tempfile::TempDir;

    fn frame(id: &str, point_count: u64) -> FrameRef {
        FrameRef {
            id: id.to_string(),
            point_count,
            ts: None,
            aabb: None,
            urls: FrameUrls::default(),
        }
    }

    fn manifest_with(frames: Vec<FrameRef>) -> SequenceManifest {
        let mut manifest = SequenceManifest::new("test");
        manifest.frames = frames;
        manifest
    }

    fn write_header(dir: &Path, id: &str, min: [f32; 3], max: [f32; 3], count: u32) {
        let frames_dir = dir.join(FRAMES_DIR);
        fs::create_dir_all(&frames_dir).unwrap();
        let header = ContainerHeader {
            mode_tag: 0,
            aabb: Aabb { min, max },
            point_count: count,
        };
        fs::write(frames_dir.join(format!("{id}.bin")), header.to_bytes()).unwrap();
    }

    #[test]
    fn test_frame_count() {
        let manifest = manifest_with(vec![frame("0", 1), frame("1", 1), frame("2", 1)]);
        assert!(validate_frame_count(&manifest, 3).is_empty());

        let manifest = manifest_with(vec![frame("0", 1), frame("1", 1)]);
        let errors = validate_frame_count(&manifest, 3);
        assert_eq!(errors, vec!["Frame count mismatch: expected 3 got 2"]);
    }

    #[test]
    fn test_point_counts_within_budget() {
        let manifest = manifest_with(vec![frame("0", 100_000), frame("1", 50_000)]);
        assert!(validate_point_counts(&manifest, "full").is_empty());

        let manifest = manifest_with(vec![frame("0", 50_000), frame("1", 25_000)]);
        assert!(validate_point_counts(&manifest, "fallback").is_empty());
    }

    #[test]
    fn test_point_counts_exceed_budget() {
        let manifest = manifest_with(vec![frame("0", 100_001)]);
        let errors = validate_point_counts(&manifest, "full");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("exceeds"));

        let manifest = manifest_with(vec![frame("0", 50_001)]);
        assert_eq!(validate_point_counts(&manifest, "fallback").len(), 1);
    }

    #[test]
    fn test_point_counts_zero_and_unknown_tier() {
        let manifest = manifest_with(vec![frame("7", 0)]);
        assert_eq!(
            validate_point_counts(&manifest, "full"),
            vec!["Frame 7: point count is zero"]
        );

        let manifest = manifest_with(vec![frame("0", 10), frame("1", 10)]);
        let errors = validate_point_counts(&manifest, "ultra");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("ultra"));
    }

    #[test]
    fn test_aabb_ranges_pass() {
        let temp_dir = TempDir::new().unwrap();
        write_header(temp_dir.path(), "000000", [0.0, 1.0, 2.0], [3.0, 4.0, 5.0], 100);
        let manifest = manifest_with(vec![frame("000000", 100)]);

        assert!(validate_aabb_ranges(temp_dir.path(), &manifest).is_empty());
    }

    #[test]
    fn test_aabb_ranges_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join(FRAMES_DIR)).unwrap();
        let manifest = manifest_with(vec![frame("000000", 100)]);

        let errors = validate_aabb_ranges(temp_dir.path(), &manifest);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("file not found"));
    }

    #[test]
    fn test_aabb_ranges_inverted() {
        let temp_dir = TempDir::new().unwrap();
        write_header(temp_dir.path(), "000000", [5.0, 1.0, 2.0], [0.0, 4.0, 5.0], 100);
        let manifest = manifest_with(vec![frame("000000", 100)]);

        let errors = validate_aabb_ranges(temp_dir.path(), &manifest);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("inverted bounds on x"));
    }

    #[test]
    fn test_aabb_ranges_short_header() {
        let temp_dir = TempDir::new().unwrap();
        let frames_dir = temp_dir.path().join(FRAMES_DIR);
        fs::create_dir_all(&frames_dir).unwrap();
        fs::write(frames_dir.join("000000.bin"), [0u8; 12]).unwrap();
        let manifest = manifest_with(vec![frame("000000", 100)]);

        let errors = validate_aabb_ranges(temp_dir.path(), &manifest);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("unreadable header"));
    }

    #[test]
    fn test_yaw_sanity() {
        let temp_dir = TempDir::new().unwrap();
        let in_range = format!(
            r#"[{{"id": "0", "label": "vehicle", "score": 1.0, "bbox": {{"yaw": 0.0}}}},
                {{"id": "1", "label": "vehicle", "score": 1.0, "bbox": {{"yaw": {}}}}},
                {{"id": "2", "label": "vehicle", "score": 1.0, "bbox": {{"yaw": {}}}}}]"#,
            PI - 0.1,
            -PI + 0.1
        );
        fs::write(temp_dir.path().join("000000.gt.json"), in_range).unwrap();
        let manifest = manifest_with(vec![frame("000000", 1)]);
        assert!(validate_yaw_sanity(temp_dir.path(), &manifest).is_empty());

        let outlier = format!(
            r#"[{{"id": "9", "label": "vehicle", "score": 1.0, "bbox": {{"yaw": {}}}}}]"#,
            PI + 0.1
        );
        fs::write(temp_dir.path().join("000000.gt.json"), outlier).unwrap();
        let warnings = validate_yaw_sanity(temp_dir.path(), &manifest);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("detection 9"));
        assert!(warnings[0].ends_with("outside (-pi, pi]"));
    }

    #[test]
    fn test_yaw_bounds_are_half_open() {
        assert!(yaw_in_range(PI));
        assert!(yaw_in_range(PI + 0.5 * YAW_TOLERANCE));
        assert!(yaw_in_range(-PI));
        assert!(!yaw_in_range(-PI - YAW_TOLERANCE));
        assert!(!yaw_in_range(PI + 2.0 * YAW_TOLERANCE));
    }

    #[test]
    fn test_yaw_sanity_skips_missing_and_warns_on_garbage() {
        let temp_dir = TempDir::new().unwrap();
        let manifest = manifest_with(vec![frame("000000", 1), frame("000001", 1)]);
        fs::write(temp_dir.path().join("000001.gt.json"), "not json").unwrap();

        let warnings = validate_yaw_sanity(temp_dir.path(), &manifest);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("Frame 000001"));
    }

    #[test]
    fn test_frame_ordering() {
        let manifest =
            manifest_with(vec![frame("000000", 1), frame("000001", 1), frame("000002", 1)]);
        assert!(validate_frame_ordering(&manifest).is_empty());

        let manifest =
            manifest_with(vec![frame("000001", 1), frame("000000", 1), frame("000002", 1)]);
        let errors = validate_frame_ordering(&manifest);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("000001") && errors[0].contains("000000"));

        assert_eq!(
            validate_frame_ordering(&manifest_with(Vec::new())),
            vec!["No frames to validate"]
        );
    }

    #[test]
    fn test_frame_ordering_numeric_ids() {
        let manifest = manifest_with(vec![frame("9", 1), frame("10", 1)]);
        assert!(validate_frame_ordering(&manifest).is_empty());

        let manifest = manifest_with(vec![frame("3", 1), frame("3", 1)]);
        assert_eq!(validate_frame_ordering(&manifest).len(), 1);
    }

    #[test]
    fn test_detector_coverage() {
        let mut manifest = manifest_with(vec![frame("0", 1)]);
        manifest.branches = vec!["CP_Pillar_032".into(), "DSVT_Voxel_016".into()];
        assert!(validate_detector_coverage(&manifest).is_empty());

        manifest.branches.clear();
        assert_eq!(validate_detector_coverage(&manifest).len(), 1);
    }

    #[test]
    fn test_run_validators_summary() {
        let temp_dir = TempDir::new().unwrap();
        write_header(temp_dir.path(), "000000", [0.0; 3], [1.0; 3], 100);
        let manifest_path = temp_dir.path().join("manifest.json");
        fs::write(
            &manifest_path,
            r#"{"version": "1.0", "sequenceId": "test", "fps": 10,
                "classMap": {"vehicle": "0"}, "branches": ["b1"],
                "frames": [{"id": "000000", "pointCount": 100, "urls": {}}]}"#,
        )
        .unwrap();

        let report = run_validators(temp_dir.path(), &manifest_path, "full", 1);
        assert_eq!(report.checks.len(), 6);
        assert!(report.passed());
        assert_eq!(report.summary, "Validation PASSED: 6/6 checks passed, 0 warning(s)");
        let names: Vec<&str> = report.checks.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "frame_count",
                "point_counts",
                "aabb_ranges",
                "yaw_sanity",
                "frame_ordering",
                "detector_coverage"
            ]
        );

        let json = serde_json::to_value(&report).unwrap();
        for key in ["checks", "warnings", "errors", "summary"] {
            assert!(json.get(key).is_some());
        }
    }

    #[test]
    fn test_run_validators_collects_every_failure() {
        let temp_dir = TempDir::new().unwrap();
        let manifest_path = temp_dir.path().join("manifest.json");
        fs::write(
            &manifest_path,
            r#"{"frames": [{"id": "000001", "pointCount": 0}, {"id": "000000", "pointCount": 10}]}"#,
        )
        .unwrap();

        let report = run_validators(temp_dir.path(), &manifest_path, "full", 3);
        assert!(!report.passed());
        assert_eq!(report.checks.len(), 6);
        // count, zero points, two missing files, ordering
        assert_eq!(report.errors.len(), 5);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(
            report.summary,
            "Validation FAILED: 2/6 checks passed, 5 error(s), 1 warning(s)"
        );
    }

    #[test]
    fn test_run_validators_missing_manifest() {
        let temp_dir = TempDir::new().unwrap();
        let report = run_validators(
            temp_dir.path(),
            Path::new("/nonexistent/manifest.json"),
            "full",
            1,
        );

        assert!(report.checks.is_empty());
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("Failed to load manifest"));
        assert!(report.summary.to_lowercase().contains("manifest"));
        assert!(!report.passed());
    }
}
