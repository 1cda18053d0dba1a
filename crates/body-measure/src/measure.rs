//! Circumference measurement facade and shared-slice group measurer.
//!
//! For one key, measurement is: resolve the band, extract and deduplicate the
//! slice, pick one component, take the convex hull perimeter. Every step
//! fails soft. Missing data becomes [`MeasuredValue::Missing`] plus warning
//! codes, never an error, and every result carries a [`SliceDebugRecord`].
//!
//! # Example
//!
//! ```
//! use body_measure::{MeasurementKey, VertexSet, measure_circumference_v0_with_metadata};
//!
//! let rows: Vec<[f32; 3]> = (0..20)
//!     .map(|k| {
//!         let a = k as f32 * std::f32::consts::TAU / 20.0;
//!         [0.3 * a.cos(), 0.5, 0.3 * a.sin()]
//!     })
//!     .collect();
//! let verts = VertexSet::from_rows(&rows);
//!
//! let result = measure_circumference_v0_with_metadata(&verts, MeasurementKey::Bust);
//! assert!(result.value().unwrap() > 1.8);
//! ```

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info_span};

use crate::band::{self, ResolvedBand};
use crate::components::{ComponentMode, ComponentSelection, select_component};
use crate::config::{ComponentRule, MeasureConfig};
use crate::debug::{METHOD_SLICE_HULL, SliceDebugRecord, make_slice_debug_schema};
use crate::hull::{HullResult, convex_hull_perimeter};
use crate::slice::{self, CrossSection, MIN_SLICE_POINTS};
use crate::tracing_ext::log_measurement;
use crate::types::{
    MeasuredValue, MeasurementKey, MissingReason, PreparedMesh, VertexSet, WarningCode,
    normalize_warnings,
};

/// Smallest plausible torso circumference, in meters.
pub const SANE_CIRC_MIN_M: f64 = 0.4;

/// Largest plausible torso circumference, in meters.
pub const SANE_CIRC_MAX_M: f64 = 2.5;

/// Debug payload of a measurement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebugInfo {
    pub slice_debug: SliceDebugRecord,
}

/// Warnings and diagnostics of a measurement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementMetadata {
    /// Sorted, deduplicated.
    pub warnings: Vec<WarningCode>,
    pub debug_info: DebugInfo,
}

/// Result of measuring one key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementResult {
    pub value_m: MeasuredValue,
    pub metadata: MeasurementMetadata,
}

impl MeasurementResult {
    /// Circumference in meters, if measured.
    #[inline]
    pub fn value(&self) -> Option<f64> {
        self.value_m.value()
    }

    /// Check if no value was produced.
    #[inline]
    pub fn is_missing(&self) -> bool {
        self.value_m.is_missing()
    }

    /// Warning codes.
    #[inline]
    pub fn warnings(&self) -> &[WarningCode] {
        &self.metadata.warnings
    }

    /// Slice debug record.
    #[inline]
    pub fn slice_debug(&self) -> &SliceDebugRecord {
        &self.metadata.debug_info.slice_debug
    }
}

/// Measure one key with the default configuration.
pub fn measure_circumference_v0_with_metadata(
    verts: &VertexSet,
    key: MeasurementKey,
) -> MeasurementResult {
    measure(verts, key, &MeasureConfig::default())
}

/// Measure one key.
pub fn measure(verts: &VertexSet, key: MeasurementKey, config: &MeasureConfig) -> MeasurementResult {
    measure_prepared(&PreparedMesh::new(verts), key, config)
}

/// Measure one key on an already prepared mesh.
pub fn measure_prepared(
    mesh: &PreparedMesh,
    key: MeasurementKey,
    config: &MeasureConfig,
) -> MeasurementResult {
    SliceCache::default().measure(mesh, key, config)
}

/// Measure bust, waist and hip from one preparation pass.
///
/// Keys whose bands coincide share one slice, so they report the same
/// `n_points_raw` and slice warnings and the hull is computed once.
pub fn measure_group(
    verts: &VertexSet,
    case_id: &str,
    config: &MeasureConfig,
) -> BTreeMap<MeasurementKey, MeasurementResult> {
    measure_group_prepared(&PreparedMesh::new(verts), case_id, config)
}

/// Measure bust, waist and hip on an already prepared mesh.
pub fn measure_group_prepared(
    mesh: &PreparedMesh,
    case_id: &str,
    config: &MeasureConfig,
) -> BTreeMap<MeasurementKey, MeasurementResult> {
    let span = info_span!("measure_group", case_id = case_id, vertices = mesh.points().len());
    let _guard = span.enter();

    let mut cache = SliceCache::default();
    let results: BTreeMap<_, _> = MeasurementKey::ALL
        .into_iter()
        .map(|key| (key, cache.measure(mesh, key, config)))
        .collect();

    debug!(
        target: "body_measure::measure",
        case_id,
        slices_computed = cache.sections.len(),
        hulls_computed = cache.outcomes.len(),
        "Group measured"
    );
    results
}

/// Cache key for an absolute band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct BandKey {
    lo: u64,
    hi: u64,
}

impl BandKey {
    fn of(band: &ResolvedBand) -> Self {
        Self {
            lo: band.y_lo.to_bits(),
            hi: band.y_hi.to_bits(),
        }
    }
}

/// Component choice and hull for one slice.
#[derive(Debug, Clone)]
struct SliceOutcome {
    selection: ComponentSelection,
    hull: HullResult,
}

/// Per-mesh memo of slices and hulls.
#[derive(Default)]
struct SliceCache {
    sections: BTreeMap<BandKey, CrossSection>,
    outcomes: BTreeMap<(BandKey, bool, bool), SliceOutcome>,
}

impl SliceCache {
    fn measure(
        &mut self,
        mesh: &PreparedMesh,
        key: MeasurementKey,
        config: &MeasureConfig,
    ) -> MeasurementResult {
        let mut warnings = mesh.warnings();
        let band = band::resolve(key, config, mesh);
        warnings.extend(band.warnings.iter().copied());

        if mesh.is_empty() {
            let record = make_slice_debug_schema(
                METHOD_SLICE_HULL,
                band.config.axis_up.plane(),
                band.config.axis_up.as_str(),
                [band.y_lo, band.y_hi],
                band.width_m(),
                0,
                0,
                false,
                None,
                None,
                None,
                None,
            )
            .with_component(ComponentMode::None.as_str(), 0);
            return finish(key, MeasuredValue::Missing(MissingReason::EmptyMesh), warnings, record);
        }

        let band_key = BandKey::of(&band);
        let section = self
            .sections
            .entry(band_key)
            .or_insert_with(|| slice::extract(mesh, &band))
            .clone();
        warnings.extend(section.warnings.iter().copied());

        let tie = band.config.tie_prefer_lower_y;
        let central = config.component_rule == ComponentRule::Central;
        let outcome = self
            .outcomes
            .entry((band_key, tie, central))
            .or_insert_with(|| {
                let selection = select_component(&section.points, tie, config.component_rule);
                let xz: Vec<_> = selection.points.iter().map(|p| p.xz()).collect();
                let hull = convex_hull_perimeter(&xz);
                SliceOutcome { selection, hull }
            });

        if outcome.selection.component_count > 1 {
            warnings.push(WarningCode::MultipleComponents);
        }

        let value = if section.is_empty() {
            MeasuredValue::Missing(MissingReason::EmptyBand)
        } else if outcome.selection.points.len() < MIN_SLICE_POINTS {
            warnings.push(WarningCode::TooFewPoints);
            MeasuredValue::Missing(MissingReason::TooFewPoints)
        } else {
            match outcome.hull.perimeter {
                Some(p) if p.is_finite() => MeasuredValue::Value(p),
                Some(_) => {
                    warnings.push(WarningCode::HullDegenerate);
                    MeasuredValue::Missing(MissingReason::NonFinite)
                }
                None => {
                    warnings.push(WarningCode::HullDegenerate);
                    MeasuredValue::Missing(MissingReason::DegenerateHull)
                }
            }
        };

        if value
            .value()
            .is_some_and(|v| !(SANE_CIRC_MIN_M..=SANE_CIRC_MAX_M).contains(&v))
        {
            warnings.push(WarningCode::CircOutOfSaneRange);
        }

        let hull = &outcome.hull;
        let record = make_slice_debug_schema(
            METHOD_SLICE_HULL,
            band.config.axis_up.plane(),
            band.config.axis_up.as_str(),
            section.y_range,
            section.y_range[1] - section.y_range[0],
            section.n_points_raw,
            section.n_points_deduped,
            hull.hull_ok,
            hull.perimeter,
            hull.width,
            hull.depth,
            hull.bbox,
        )
        .with_component(outcome.selection.mode.as_str(), outcome.selection.selected_rank);

        finish(key, value, warnings, record)
    }
}

fn finish(
    key: MeasurementKey,
    value_m: MeasuredValue,
    mut warnings: Vec<WarningCode>,
    slice_debug: SliceDebugRecord,
) -> MeasurementResult {
    normalize_warnings(&mut warnings);
    let result = MeasurementResult {
        value_m,
        metadata: MeasurementMetadata {
            warnings,
            debug_info: DebugInfo { slice_debug },
        },
    };
    log_measurement(key, &result);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HipBandId, HipMethod};
    use approx::assert_relative_eq;
    use nalgebra::Point3;

    fn flat_ring(n: usize, r: f32, y: f32) -> VertexSet {
        let mut verts = VertexSet::new();
        for k in 0..n {
            let a = k as f32 * std::f32::consts::TAU / n as f32;
            verts.push(Point3::new(r * a.cos(), y, r * a.sin()));
        }
        verts
    }

    /// Elliptic rings every centimeter from 0 to 1.7 m, girth varying with height.
    fn torso_column() -> VertexSet {
        let mut verts = VertexSet::new();
        for level in 0..=170 {
            let y = level as f32 * 0.01;
            let t = y / 1.7;
            let a = 0.14 + 0.04 * (t * 9.0).sin().abs();
            for k in 0..64 {
                let th = k as f32 * std::f32::consts::TAU / 64.0;
                verts.push(Point3::new(a * th.cos(), y, 0.75 * a * th.sin()));
            }
        }
        verts
    }

    #[test]
    fn test_ring_is_finite_and_deterministic() {
        let verts = flat_ring(20, 0.3, 0.5);
        let first = measure_circumference_v0_with_metadata(&verts, MeasurementKey::Bust);
        let second = measure_circumference_v0_with_metadata(&verts, MeasurementKey::Bust);
        assert_eq!(first, second);

        let value = first.value().unwrap();
        let expected = 2.0 * 20.0 * 0.3 * (std::f64::consts::PI / 20.0).sin();
        assert_relative_eq!(value, expected, epsilon = 1e-5);
        assert_eq!(first.warnings(), &[WarningCode::FlatMesh]);
        assert_eq!(first.slice_debug().n_points_raw, 20);
        assert_eq!(first.slice_debug().component_mode, "single");
    }

    #[test]
    fn test_empty_mesh_is_missing() {
        let result = measure_circumference_v0_with_metadata(&VertexSet::new(), MeasurementKey::Hip);
        assert_eq!(
            result.value_m,
            MeasuredValue::Missing(MissingReason::EmptyMesh)
        );
        assert_eq!(result.warnings(), &[WarningCode::EmptyMesh]);
        assert_eq!(result.slice_debug().component_mode, "none");
        let json = serde_json::to_value(&result).unwrap();
        assert!(json["value_m"].is_null());
    }

    #[test]
    fn test_too_few_points() {
        let verts = VertexSet::from_rows(&[[0.0, 0.5, 0.0], [0.1, 0.5, 0.0]]);
        let result = measure_circumference_v0_with_metadata(&verts, MeasurementKey::Waist);
        assert_eq!(
            result.value_m,
            MeasuredValue::Missing(MissingReason::TooFewPoints)
        );
        assert!(result.warnings().contains(&WarningCode::TooFewPoints));
        assert!(!result.slice_debug().hull_ok);
        assert!(result.slice_debug().perimeter_m.is_none());
    }

    #[test]
    fn test_colinear_slice_is_degenerate() {
        let rows: Vec<[f32; 3]> = (0..10).map(|i| [i as f32 * 0.01, 0.5, 0.0]).collect();
        let verts = VertexSet::from_rows(&rows);
        let result = measure_circumference_v0_with_metadata(&verts, MeasurementKey::Hip);
        assert_eq!(
            result.value_m,
            MeasuredValue::Missing(MissingReason::DegenerateHull)
        );
        assert!(result.warnings().contains(&WarningCode::HullDegenerate));
    }

    #[test]
    fn test_small_ring_flags_out_of_range() {
        let verts = flat_ring(16, 0.02, 1.0);
        let result = measure_circumference_v0_with_metadata(&verts, MeasurementKey::Bust);
        assert!(result.value().unwrap() < SANE_CIRC_MIN_M);
        assert!(result.warnings().contains(&WarningCode::CircOutOfSaneRange));
    }

    #[test]
    fn test_torso_values_are_sane_for_every_hip_config() {
        let verts = torso_column();
        for id in HipBandId::ALL {
            let config = MeasureConfig::default().with_hip_band(id);
            for key in MeasurementKey::ALL {
                let result = measure(&verts, key, &config);
                if let Some(v) = result.value() {
                    assert!(v.is_finite());
                    assert!((SANE_CIRC_MIN_M..=SANE_CIRC_MAX_M).contains(&v), "{key} {id}: {v}");
                }
            }
        }
    }

    #[test]
    fn test_default_config_matches_explicit_default_band() {
        let verts = torso_column();
        let default = measure(&verts, MeasurementKey::Hip, &MeasureConfig::default());
        let reset = measure(
            &verts,
            MeasurementKey::Hip,
            &MeasureConfig::default()
                .with_hip_band(HipBandId::D)
                .with_hip_method(HipMethod::WorldYBand),
        );
        assert_eq!(
            serde_json::to_string(&default).unwrap(),
            serde_json::to_string(&reset).unwrap()
        );
    }

    #[test]
    fn test_group_matches_individual_calls() {
        let verts = torso_column();
        let config = MeasureConfig::default();
        let group = measure_group(&verts, "case-0001", &config);
        assert_eq!(group.len(), 3);
        for key in MeasurementKey::ALL {
            assert_eq!(group[&key], measure(&verts, key, &config));
        }
    }

    #[test]
    fn test_group_shares_slice_on_flat_mesh() {
        let verts = flat_ring(20, 0.3, 0.5);
        let group = measure_group(&verts, "flat", &MeasureConfig::default());
        let raw: Vec<usize> = group.values().map(|r| r.slice_debug().n_points_raw).collect();
        assert_eq!(raw, vec![20, 20, 20]);
        let values: Vec<Option<f64>> = group.values().map(|r| r.value()).collect();
        assert_eq!(values[0], values[1]);
        assert_eq!(values[1], values[2]);
    }

    #[test]
    fn test_pelvis_method_on_torso() {
        let verts = torso_column();
        let config = MeasureConfig::default().with_hip_method(HipMethod::PelvisFrameBand);
        let result = measure(&verts, MeasurementKey::Hip, &config);
        assert!(result.value().is_some());
        assert!(!result.warnings().contains(&WarningCode::HipFrameFallbackToWorldY));
    }

    #[test]
    fn test_serialized_shape() {
        let verts = flat_ring(20, 0.3, 0.5);
        let result = measure_circumference_v0_with_metadata(&verts, MeasurementKey::Hip);
        let json = serde_json::to_value(&result).unwrap();
        assert!(json["value_m"].is_f64());
        assert_eq!(json["metadata"]["warnings"][0], "FLAT_MESH");
        assert_eq!(
            json["metadata"]["debug_info"]["slice_debug"]["method"],
            "slice_hull"
        );
    }
}
