//! End-to-end integration tests for body-measure.
//!
//! These tests exercise the full pipeline from file load -> band -> slice ->
//! components -> hull -> result on synthetic bodies.

use body_measure::{
    ComponentRule, HipBandId, HipMethod, MeasureConfig, MeasurementKey, SANE_CIRC_MAX_M,
    SANE_CIRC_MIN_M, VertexSet, WarningCode, load_vertices, measure, measure_group,
    measure_circumference_v0_with_metadata,
};
use nalgebra::Point3;
use std::io::Write;
use tempfile::NamedTempFile;

/// Append an elliptic ring.
fn push_ring(verts: &mut VertexSet, cx: f32, y: f32, a: f32, c: f32, n: usize) {
    for k in 0..n {
        let th = k as f32 * std::f32::consts::TAU / n as f32;
        verts.push(Point3::new(cx + a * th.cos(), y, c * th.sin()));
    }
}

/// A crude standing body, 1.7 m tall: legs, torso, arms hanging beside the
/// torso from shoulder to mid-thigh, head.
fn create_test_body(girth: f32) -> VertexSet {
    let mut verts = VertexSet::new();
    for level in 0..=170 {
        let y = level as f32 * 0.01;
        let t = y / 1.7;
        if t < 0.45 {
            push_ring(&mut verts, -0.09, y, 0.07, 0.07, 48);
            push_ring(&mut verts, 0.09, y, 0.07, 0.07, 48);
        } else if t < 0.82 {
            let a = girth * (0.16 + 0.02 * ((t - 0.62) * 12.0).cos());
            push_ring(&mut verts, 0.0, y, a, 0.72 * a, 96);
        } else if t < 0.87 {
            push_ring(&mut verts, 0.0, y, 0.06, 0.06, 32);
        } else {
            push_ring(&mut verts, 0.0, y, 0.09, 0.1, 48);
        }
        if (0.40..0.82).contains(&t) {
            push_ring(&mut verts, -0.30, y, 0.04, 0.04, 24);
            push_ring(&mut verts, 0.30, y, 0.04, 0.04, 24);
        }
    }
    verts
}

#[test]
fn test_load_and_measure_from_file() {
    let body = create_test_body(1.0);
    let mut file = NamedTempFile::new().unwrap();
    let json = serde_json::json!({ "verts": body.to_rows() });
    file.write_all(json.to_string().as_bytes()).unwrap();

    let loaded = load_vertices(file.path()).unwrap();
    assert_eq!(loaded, body);

    for key in MeasurementKey::ALL {
        let result = measure_circumference_v0_with_metadata(&loaded, key);
        let value = result.value().expect("body measurement should be present");
        assert!(value > SANE_CIRC_MIN_M && value < SANE_CIRC_MAX_M);
    }
}

#[test]
fn test_arms_are_excluded_by_component_selection() {
    let body = create_test_body(1.0);
    let result = measure_circumference_v0_with_metadata(&body, MeasurementKey::Waist);
    assert!(result.warnings().contains(&WarningCode::MultipleComponents));
    assert_eq!(result.slice_debug().component_mode, "largest");
    assert_eq!(result.slice_debug().selected_component_rank, 0);

    // Torso alone is far narrower than torso plus arms.
    let width = result.slice_debug().width_m.unwrap();
    assert!(width < 0.45, "width {width} includes the arms");
}

#[test]
fn test_central_rule_matches_largest_on_body() {
    let body = create_test_body(1.0);
    let largest = measure(&body, MeasurementKey::Bust, &MeasureConfig::default());
    let central = measure(
        &body,
        MeasurementKey::Bust,
        &MeasureConfig::default().with_component_rule(ComponentRule::Central),
    );
    assert_eq!(largest.value(), central.value());
    assert_eq!(central.slice_debug().component_mode, "central");
}

#[test]
fn test_girth_scales_measurements() {
    let small = measure_group(&create_test_body(0.9), "small", &MeasureConfig::default());
    let large = measure_group(&create_test_body(1.1), "large", &MeasureConfig::default());
    for key in MeasurementKey::ALL {
        assert!(large[&key].value().unwrap() > small[&key].value().unwrap());
    }
}

#[test]
fn test_all_hip_configs_yield_sane_or_missing() {
    for girth in [0.85f32, 1.0, 1.15] {
        let body = create_test_body(girth);
        for id in HipBandId::ALL {
            let config = MeasureConfig::default().with_hip_band(id);
            let result = measure(&body, MeasurementKey::Hip, &config);
            match result.value() {
                Some(v) => assert!(
                    v.is_finite() && (SANE_CIRC_MIN_M..=SANE_CIRC_MAX_M).contains(&v),
                    "config {id} girth {girth}: {v}"
                ),
                None => assert!(!result.warnings().is_empty()),
            }
        }
    }
}

#[test]
fn test_hip_band_below_crotch_still_measures() {
    // Config E sits at 0.44-0.48 of the height, partly below the crotch.
    // The leg rings touch the torso ring there, so they merge into one cluster.
    let body = create_test_body(1.0);
    let config = MeasureConfig::default().with_hip_band(HipBandId::E);
    let result = measure(&body, MeasurementKey::Hip, &config);
    assert!(result.value().is_some());
    assert!(result.slice_debug().n_points_raw > 0);
}

#[test]
fn test_override_reset_is_byte_identical() {
    let body = create_test_body(1.0);
    let baseline = serde_json::to_string(&measure_group(&body, "c", &MeasureConfig::default()))
        .unwrap();

    let forced = MeasureConfig::default().with_hip_method(HipMethod::PelvisFrameBand);
    let _ = measure_group(&body, "c", &forced);

    let reset = forced.with_hip_method(HipMethod::WorldYBand);
    let after = serde_json::to_string(&measure_group(&body, "c", &reset)).unwrap();
    assert_eq!(baseline, after);
}

#[test]
fn test_repeated_runs_identical() {
    let body = create_test_body(1.05);
    let config = MeasureConfig::default().with_hip_method(HipMethod::PelvisFrameBand);
    let first = measure_group(&body, "repeat", &config);
    let second = measure_group(&body, "repeat", &config);
    assert_eq!(first, second);
}

#[test]
fn test_group_json_has_no_non_finite_literals() {
    let mut body = create_test_body(1.0);
    body.push(Point3::new(f32::NAN, 0.5, 0.0));
    let results = measure_group(&body, "nan", &MeasureConfig::default());
    let text = serde_json::to_string(&results).unwrap();
    assert!(!text.contains("NaN"));
    for result in results.values() {
        assert!(
            result
                .warnings()
                .contains(&WarningCode::NonFiniteVerticesDropped)
        );
    }
    assert!(text.contains("\"BUST_CIRC_M\""));
}
