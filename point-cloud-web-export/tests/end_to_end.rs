use point_cloud_web_export::{
    DownsampleConfig, ExportConfig, Frame, PointCloud, PointWidth, QuantizationMode,
    SequenceExporter, Tier, compute_aabb, dequantize_points, downsample_points, quantize_points,
    read_frame, read_header, run_validators, write_points_bin,
};
use point_cloud_web_export::manifest::{FrameRef, FrameUrls, SequenceManifest, write_manifest};
use point_cloud_web_export::quantize::compute_quantization_error;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tempfile::TempDir;

fn random_frame(n_points: usize, seed: u64) -> PointCloud {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let values: Vec<f32> = (0..n_points)
        .flat_map(|_| {
            [
                rng.gen_range(-100.0f32..100.0),
                rng.gen_range(-100.0f32..100.0),
                rng.gen_range(-100.0f32..100.0),
                rng.gen_range(0.0f32..1.0),
            ]
        })
        .collect();
    PointCloud::from_flat(PointWidth::XyzIntensity, values).unwrap()
}

#[test]
fn low_tier_normalized_integer_frame_validates() {
    let temp_dir = TempDir::new().unwrap();
    let out = temp_dir.path();

    let (downsampled, metadata) =
        downsample_points(random_frame(150_000, 42), Tier::Low, &DownsampleConfig::default());
    assert!((49_500..=50_500).contains(&downsampled.len()));
    assert!(metadata.within_spec);

    let (quantized, envelope) =
        quantize_points(&downsampled, QuantizationMode::NormalizedInteger).unwrap();
    let frame_path = out.join("frames").join("000000.bin");
    let written = write_points_bin(&quantized, &frame_path).unwrap();
    assert_eq!(written.file_size, 29 + downsampled.len() as u64 * 8);

    let header = read_header(&frame_path).unwrap();
    assert_eq!(header.point_count as usize, downsampled.len());
    let (bbox_min, bbox_max) = (envelope.bbox_min.unwrap(), envelope.bbox_max.unwrap());
    for axis in 0..3 {
        assert!((header.aabb.min[axis] - bbox_min[axis]).abs() < 1e-3);
        assert!((header.aabb.max[axis] - bbox_max[axis]).abs() < 1e-3);
    }

    let (_, read_back) = read_frame(&frame_path).unwrap();
    let reconstructed = dequantize_points(&read_back, &envelope).unwrap();
    let stats = compute_quantization_error(&downsampled, &reconstructed).unwrap();
    assert!(stats.rmse < 0.01);

    let mut manifest = SequenceManifest::new("synthetic");
    manifest.branches = vec!["CP_Pillar_032".to_string()];
    manifest.frames = vec![FrameRef {
        id: "000000".to_string(),
        point_count: header.point_count as u64,
        ts: None,
        aabb: Some(header.aabb),
        urls: FrameUrls {
            points: "frames/000000.bin".to_string(),
            gt: None,
            det: None,
        },
    }];
    let manifest_path = out.join("manifest.json");
    write_manifest(&manifest, &manifest_path).unwrap();

    let report = run_validators(out, &manifest_path, "fallback", 1);
    let aabb_check = report.checks.iter().find(|c| c.name == "aabb_ranges").unwrap();
    assert!(aabb_check.passed, "{}", aabb_check.detail);
    assert!(report.passed(), "{}", report.summary);
}

#[test]
fn exported_sequence_passes_validation() {
    let temp_dir = TempDir::new().unwrap();
    let out = temp_dir.path();

    let frames: Vec<Frame> = (0..3)
        .map(|i| Frame::new(format!("{i:06}"), random_frame(80_000 + i * 10_000, i as u64)))
        .collect();
    let config = ExportConfig {
        tier: Tier::Low,
        quantization: QuantizationMode::Half,
        ..ExportConfig::default()
    };
    let summary = SequenceExporter::new(out, "v_0001", config).export(frames).unwrap();
    assert_eq!(summary.frame_count, 3);
    assert_eq!(summary.total_points, 150_000);

    let report = run_validators(out, &summary.manifest_path, "fallback", 3);
    assert!(report.passed(), "{:?}", report.errors);
    // No branches were exported, so coverage warns
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(
        report.summary,
        "Validation PASSED: 6/6 checks passed, 1 warning(s)"
    );

    // A wrong expected frame count fails only the count check
    let report = run_validators(out, &summary.manifest_path, "fallback", 4);
    assert!(!report.passed());
    assert!(report.errors[0].contains("mismatch"));
}

#[test]
fn half_precision_header_matches_written_values() {
    let temp_dir = TempDir::new().unwrap();
    let cloud = random_frame(5_000, 3);
    let (quantized, _) = quantize_points(&cloud, QuantizationMode::Half).unwrap();
    let path = temp_dir.path().join("half.bin");
    write_points_bin(&quantized, &path).unwrap();

    let header = read_header(&path).unwrap();
    let widened: Vec<f32> = match &quantized {
        point_cloud_web_export::QuantizedPoints::Half { values, .. } => {
            values.iter().map(|v| v.to_f32()).collect()
        }
        _ => unreachable!(),
    };
    let expected = compute_aabb(&PointCloud::from_flat(PointWidth::XyzIntensity, widened).unwrap());
    assert_eq!(header.aabb, expected);
}
