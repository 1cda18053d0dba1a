//! Slice debug records.
//!
//! Every measurement carries one [`SliceDebugRecord`] with a fixed key set.
//! Floats pass through [`finite_or_none`] on the way in, so the record always
//! serializes to strict JSON (no `NaN` or `Infinity` literals).

use serde::{Deserialize, Serialize};

/// Method name for slice-and-hull measurement.
pub const METHOD_SLICE_HULL: &str = "slice_hull";

/// Fixed-key diagnostic record for one slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceDebugRecord {
    pub method: String,
    pub plane: String,
    pub axis_up: String,
    /// Absolute band in meters, after widening.
    pub y_range: [Option<f64>; 2],
    pub band_width_m: Option<f64>,
    pub n_points_raw: usize,
    pub n_points_deduped: usize,
    pub component_mode: String,
    pub selected_component_rank: usize,
    pub hull_ok: bool,
    pub perimeter_m: Option<f64>,
    pub width_m: Option<f64>,
    pub depth_m: Option<f64>,
    /// `[x_min, x_max, z_min, z_max]`, `None` when any bound is not finite.
    pub bbox_xz: Option<[f64; 4]>,
}

/// `Some(v)` for finite `v`, otherwise `None`.
#[inline]
pub fn finite_or_none(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

/// Build a debug record with the component fields defaulted to a single
/// component at rank 0.
#[allow(clippy::too_many_arguments)]
pub fn make_slice_debug_schema(
    method: &str,
    plane: &str,
    axis_up: &str,
    y_range: [f64; 2],
    band_width_m: f64,
    n_points_raw: usize,
    n_points_deduped: usize,
    hull_ok: bool,
    perimeter_m: Option<f64>,
    width_m: Option<f64>,
    depth_m: Option<f64>,
    bbox_xz: Option<[f64; 4]>,
) -> SliceDebugRecord {
    SliceDebugRecord {
        method: method.to_string(),
        plane: plane.to_string(),
        axis_up: axis_up.to_string(),
        y_range: [finite_or_none(y_range[0]), finite_or_none(y_range[1])],
        band_width_m: finite_or_none(band_width_m),
        n_points_raw,
        n_points_deduped,
        component_mode: "single".to_string(),
        selected_component_rank: 0,
        hull_ok,
        perimeter_m: perimeter_m.and_then(finite_or_none),
        width_m: width_m.and_then(finite_or_none),
        depth_m: depth_m.and_then(finite_or_none),
        bbox_xz: bbox_xz.filter(|b| b.iter().all(|v| v.is_finite())),
    }
}

impl SliceDebugRecord {
    /// Set the component fields.
    pub fn with_component(mut self, mode: &str, rank: usize) -> Self {
        self.component_mode = mode.to_string();
        self.selected_component_rank = rank;
        self
    }
}
