//! Property-based tests for the measurement pipeline.
//!
//! Run with: cargo test -p body-measure -- proptest

use body_measure::slice::dedup_points;
use body_measure::{
    ComponentRule, EPSILON_DEDUPE, HipBandId, MeasureConfig, MeasurementKey, SlicePoint,
    VertexSet, convex_hull_perimeter, measure, select_component,
};
use nalgebra::{Point2, Point3};
use proptest::prelude::*;

// =============================================================================
// Strategies
// =============================================================================

/// A slice point within a torso-sized square, on a coarse grid so that exact
/// duplicates and near-duplicates both occur.
fn arb_slice_point() -> impl Strategy<Value = SlicePoint> {
    (-400i32..400, -400i32..400, 0i32..4).prop_map(|(x, z, h)| SlicePoint {
        x: x as f64 * 5e-4,
        z: z as f64 * 5e-4,
        h: 0.5 + h as f64 * 0.01,
    })
}

fn arb_slice(max: usize) -> impl Strategy<Value = Vec<SlicePoint>> {
    prop::collection::vec(arb_slice_point(), 0..max)
}

fn arb_point2() -> impl Strategy<Value = Point2<f64>> {
    (-1.0..1.0f64, -1.0..1.0f64).prop_map(|(x, y)| Point2::new(x, y))
}

/// A vertex cloud spanning roughly a body's height.
fn arb_vertex_set() -> impl Strategy<Value = VertexSet> {
    prop::collection::vec(
        (-0.4..0.4f32, 0.0..1.8f32, -0.3..0.3f32).prop_map(|(x, y, z)| Point3::new(x, y, z)),
        0..400,
    )
    .prop_map(VertexSet::from_points)
}

/// Deterministic shuffle driven by a seed.
fn shuffled<T: Clone>(items: &[T], seed: u64) -> Vec<T> {
    let mut out = items.to_vec();
    let mut state = seed | 1;
    for i in (1..out.len()).rev() {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        out.swap(i, (state % (i as u64 + 1)) as usize);
    }
    out
}

// =============================================================================
// Deduplication
// =============================================================================

proptest! {
    /// No two retained points are closer than the dedup epsilon.
    #[test]
    fn proptest_dedup_respects_epsilon(points in arb_slice(300)) {
        let kept = dedup_points(points, EPSILON_DEDUPE);
        for (i, a) in kept.iter().enumerate() {
            for b in &kept[i + 1..] {
                let d = ((a.x - b.x).powi(2) + (a.z - b.z).powi(2)).sqrt();
                prop_assert!(d >= EPSILON_DEDUPE * (1.0 - 1e-9));
            }
        }
    }

    /// Dedup output does not depend on input order.
    #[test]
    fn proptest_dedup_order_independent(points in arb_slice(200), seed in any::<u64>()) {
        let forward = dedup_points(points.clone(), EPSILON_DEDUPE);
        let mixed = dedup_points(shuffled(&points, seed), EPSILON_DEDUPE);
        prop_assert_eq!(forward, mixed);
    }
}

// =============================================================================
// Components and hull
// =============================================================================

proptest! {
    /// Component choice does not depend on input order.
    #[test]
    fn proptest_selection_order_independent(
        points in arb_slice(200),
        seed in any::<u64>(),
        prefer_lower in any::<bool>(),
        central in any::<bool>(),
    ) {
        let rule = if central { ComponentRule::Central } else { ComponentRule::Largest };
        let a = select_component(&points, prefer_lower, rule);
        let b = select_component(&shuffled(&points, seed), prefer_lower, rule);
        prop_assert_eq!(a, b);
    }

    /// Hull perimeter is either absent or finite and positive, and repeatable.
    #[test]
    fn proptest_hull_perimeter_repeatable(points in prop::collection::vec(arb_point2(), 0..60)) {
        let first = convex_hull_perimeter(&points);
        let second = convex_hull_perimeter(&points);
        prop_assert_eq!(&first, &second);
        match first.perimeter {
            Some(p) => {
                prop_assert!(first.hull_ok);
                prop_assert!(p.is_finite() && p > 0.0);
            }
            None => prop_assert!(!first.hull_ok),
        }
    }

    /// Every input point lies inside or on the hull.
    #[test]
    fn proptest_hull_contains_points(points in prop::collection::vec(arb_point2(), 3..60)) {
        let hull = convex_hull_perimeter(&points);
        prop_assume!(hull.hull_ok);
        let v = &hull.vertices;
        for p in &points {
            for i in 0..v.len() {
                let (a, b) = (v[i], v[(i + 1) % v.len()]);
                let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
                prop_assert!(cross >= -1e-9);
            }
        }
    }
}

// =============================================================================
// Facade
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Repeated measurement gives identical value and warnings; values are
    /// never NaN.
    #[test]
    fn proptest_measure_deterministic(verts in arb_vertex_set(), hip in 0usize..6) {
        let config = MeasureConfig::default().with_hip_band(HipBandId::ALL[hip]);
        for key in MeasurementKey::ALL {
            let first = measure(&verts, key, &config);
            let second = measure(&verts, key, &config);
            prop_assert_eq!(first.value(), second.value());
            prop_assert_eq!(first.warnings(), second.warnings());
            if let Some(v) = first.value() {
                prop_assert!(v.is_finite());
            }
            let text = serde_json::to_string(&first).unwrap();
            prop_assert!(!text.contains("NaN"));
        }
    }
}
