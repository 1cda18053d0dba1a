//! Cross-section extraction and deduplication.
//!
//! A slice is the set of mesh vertices whose height falls inside a band,
//! projected onto the x/z plane. Vertices shared between adjacent faces tend
//! to arrive as near-duplicates, so points closer than [`EPSILON_DEDUPE`] are
//! merged. Output order is canonical (sorted by x, z, then height) so that
//! every later stage sees the same sequence regardless of input order.

use hashbrown::HashMap;
use nalgebra::Point2;
use tracing::{debug, trace};

use crate::band::ResolvedBand;
use crate::types::{PreparedMesh, WarningCode};

/// Points closer than this (meters, in-plane) are merged.
pub const EPSILON_DEDUPE: f64 = 1e-4;

/// Fewer raw points than this triggers band widening.
pub const MIN_SLICE_POINTS: usize = 3;

/// Widening applied to each side of the band per step, as a fraction of the extent.
pub const BAND_WIDEN_STEP: f64 = 0.02;

/// Maximum widening steps.
pub const MAX_BAND_WIDEN_STEPS: usize = 4;

/// Slack on band edges so vertices stored at `f32` precision on a band
/// boundary are not lost to rounding.
pub const BAND_EDGE_TOLERANCE: f64 = 1e-6;

/// A point of a cross-section.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlicePoint {
    pub x: f64,
    pub z: f64,
    /// Source vertex height.
    pub h: f64,
}

impl SlicePoint {
    /// In-plane position.
    #[inline]
    pub fn xz(&self) -> Point2<f64> {
        Point2::new(self.x, self.z)
    }

    /// Canonical ordering: x, then z, then height.
    #[inline]
    pub fn canonical_cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.x
            .total_cmp(&other.x)
            .then(self.z.total_cmp(&other.z))
            .then(self.h.total_cmp(&other.h))
    }
}

/// A deduplicated cross-section.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossSection {
    /// Deduplicated points in canonical order.
    pub points: Vec<SlicePoint>,
    /// Vertices inside the (possibly widened) band before deduplication.
    pub n_points_raw: usize,
    /// Points after deduplication.
    pub n_points_deduped: usize,
    /// Absolute band actually sliced, after widening.
    pub y_range: [f64; 2],
    /// Number of widening steps applied.
    pub widen_steps: usize,
    pub warnings: Vec<WarningCode>,
}

impl CrossSection {
    /// Check if the slice holds no points.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Extract the cross-section for a resolved band.
///
/// Widens the band by [`BAND_WIDEN_STEP`] per side when fewer than
/// [`MIN_SLICE_POINTS`] vertices fall inside, up to
/// [`MAX_BAND_WIDEN_STEPS`] times. An empty result is not an error.
pub fn extract(mesh: &PreparedMesh, band: &ResolvedBand) -> CrossSection {
    let mut warnings = Vec::new();
    let step = BAND_WIDEN_STEP * mesh.height();
    let (mut y_lo, mut y_hi) = (band.y_lo, band.y_hi);
    let mut raw = collect_band(mesh, y_lo, y_hi);
    let mut widen_steps = 0;

    while raw.len() < MIN_SLICE_POINTS && widen_steps < MAX_BAND_WIDEN_STEPS && step > 0.0 {
        widen_steps += 1;
        y_lo -= step;
        y_hi += step;
        raw = collect_band(mesh, y_lo, y_hi);
    }
    if widen_steps > 0 {
        warnings.push(WarningCode::BandWidened);
        debug!(
            target: "body_measure::slice",
            key = band.key.as_str(),
            widen_steps,
            n_points_raw = raw.len(),
            "Band widened"
        );
    }

    let n_points_raw = raw.len();
    let points = dedup_points(raw, EPSILON_DEDUPE);
    if points.is_empty() {
        warnings.push(WarningCode::BandEmpty);
    }

    trace!(
        target: "body_measure::slice",
        key = band.key.as_str(),
        n_points_raw,
        n_points_deduped = points.len(),
        "Cross-section extracted"
    );

    CrossSection {
        n_points_deduped: points.len(),
        points,
        n_points_raw,
        y_range: [y_lo, y_hi],
        widen_steps,
        warnings,
    }
}

/// Vertices with height in `[y_lo, y_hi]`, projected to x/z.
pub fn collect_band(mesh: &PreparedMesh, y_lo: f64, y_hi: f64) -> Vec<SlicePoint> {
    let lo = y_lo - BAND_EDGE_TOLERANCE;
    let hi = y_hi + BAND_EDGE_TOLERANCE;
    mesh.points()
        .iter()
        .filter(|p| p.y >= lo && p.y <= hi)
        .map(|p| SlicePoint {
            x: p.x,
            z: p.z,
            h: p.y,
        })
        .collect()
}

/// Merge points closer than `epsilon` in the x/z plane.
///
/// Points are sorted canonically first, then kept greedily: a point is
/// dropped if a previously kept point lies within `epsilon`. Kept points are
/// bucketed on a grid of cell size `epsilon`, so only the 3x3 neighborhood is
/// searched. No two returned points are closer than `epsilon`.
pub fn dedup_points(mut points: Vec<SlicePoint>, epsilon: f64) -> Vec<SlicePoint> {
    points.sort_by(SlicePoint::canonical_cmp);
    if epsilon <= 0.0 {
        return points;
    }

    let cell = |v: f64| (v / epsilon).floor() as i64;
    let eps_sq = epsilon * epsilon;
    let mut grid: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
    let mut kept: Vec<SlicePoint> = Vec::with_capacity(points.len());

    for p in points {
        let (cx, cz) = (cell(p.x), cell(p.z));
        let mut duplicate = false;
        'search: for dx in -1..=1 {
            for dz in -1..=1 {
                let Some(bucket) = grid.get(&(cx.saturating_add(dx), cz.saturating_add(dz)))
                else {
                    continue;
                };
                for &i in bucket {
                    let q = &kept[i];
                    let d_sq = (p.x - q.x).powi(2) + (p.z - q.z).powi(2);
                    if d_sq < eps_sq {
                        duplicate = true;
                        break 'search;
                    }
                }
            }
        }
        if !duplicate {
            grid.entry((cx, cz)).or_default().push(kept.len());
            kept.push(p);
        }
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::band::{BandFrame, resolve};
    use crate::config::{MeasureConfig, WAIST_BAND};
    use crate::types::{MeasurementKey, VertexSet};
    use nalgebra::Point3;

    fn sp(x: f64, z: f64) -> SlicePoint {
        SlicePoint { x, z, h: 0.0 }
    }

    fn band(y_lo: f64, y_hi: f64) -> ResolvedBand {
        ResolvedBand {
            key: MeasurementKey::Waist,
            config: WAIST_BAND,
            y_lo,
            y_hi,
            frame: BandFrame::World,
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_dedup_merges_near_duplicates() {
        let points = vec![
            sp(0.0, 0.0),
            sp(0.00005, 0.0),
            sp(1.0, 1.0),
            sp(1.0, 1.00002),
            sp(0.5, 0.5),
        ];
        let deduped = dedup_points(points, EPSILON_DEDUPE);
        assert_eq!(deduped.len(), 3);
        assert_eq!(deduped[0], sp(0.0, 0.0));
        assert_eq!(deduped[1], sp(0.5, 0.5));
        assert_eq!(deduped[2], sp(1.0, 1.0));
    }

    #[test]
    fn test_dedup_keeps_points_at_epsilon() {
        let deduped = dedup_points(vec![sp(0.0, 0.0), sp(EPSILON_DEDUPE, 0.0)], EPSILON_DEDUPE);
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn test_dedup_across_cell_boundary() {
        // Straddles a grid line at x = 0.
        let deduped = dedup_points(vec![sp(-0.00001, 0.0), sp(0.00001, 0.0)], EPSILON_DEDUPE);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].x, -0.00001);
    }

    #[test]
    fn test_dedup_order_independent() {
        let a = vec![sp(0.3, 0.1), sp(0.0, 0.0), sp(0.30001, 0.1), sp(-0.2, 0.4)];
        let mut b = a.clone();
        b.reverse();
        assert_eq!(dedup_points(a, EPSILON_DEDUPE), dedup_points(b, EPSILON_DEDUPE));
    }

    #[test]
    fn test_extract_counts_raw_and_deduped() {
        let mut verts = VertexSet::new();
        for k in 0..12 {
            let a = k as f32 * std::f32::consts::TAU / 12.0;
            // Each ring vertex twice, as shared edges produce.
            verts.push(Point3::new(0.3 * a.cos(), 0.5, 0.3 * a.sin()));
            verts.push(Point3::new(0.3 * a.cos(), 0.5, 0.3 * a.sin()));
        }
        verts.push(Point3::new(0.0, 0.0, 0.0));
        verts.push(Point3::new(0.0, 1.0, 0.0));
        let mesh = PreparedMesh::new(&verts);

        let section = extract(&mesh, &band(0.49, 0.51));
        assert_eq!(section.n_points_raw, 24);
        assert_eq!(section.n_points_deduped, 12);
        assert_eq!(section.widen_steps, 0);
        assert!(section.warnings.is_empty());
    }

    #[test]
    fn test_extract_widens_sparse_band() {
        let mut verts = VertexSet::new();
        for k in 0..6 {
            let a = k as f32 * std::f32::consts::TAU / 6.0;
            verts.push(Point3::new(0.2 * a.cos(), 0.55, 0.2 * a.sin()));
        }
        verts.push(Point3::new(0.0, 0.0, 0.0));
        verts.push(Point3::new(0.0, 1.0, 0.0));
        let mesh = PreparedMesh::new(&verts);

        // Ring sits 0.03 above the band; one 0.02 step is not enough, two are.
        let section = extract(&mesh, &band(0.50, 0.52));
        assert_eq!(section.widen_steps, 2);
        assert_eq!(section.n_points_raw, 6);
        assert_eq!(section.warnings, vec![WarningCode::BandWidened]);
        assert!((section.y_range[1] - 0.56).abs() < 1e-9);
    }

    #[test]
    fn test_extract_empty_band_is_not_an_error() {
        let verts = VertexSet::from_rows(&[[0.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);
        let mesh = PreparedMesh::new(&verts);
        let section = extract(&mesh, &band(0.40, 0.44));
        assert!(section.is_empty());
        assert_eq!(section.n_points_raw, 0);
        assert_eq!(section.widen_steps, MAX_BAND_WIDEN_STEPS);
        assert!(section.warnings.contains(&WarningCode::BandEmpty));
        assert!(section.warnings.contains(&WarningCode::BandWidened));
    }

    #[test]
    fn test_extract_through_resolved_band() {
        let mut verts = VertexSet::new();
        for level in 0..=100 {
            let y = level as f32 * 0.01;
            for k in 0..16 {
                let a = k as f32 * std::f32::consts::TAU / 16.0;
                verts.push(Point3::new(0.15 * a.cos(), y, 0.1 * a.sin()));
            }
        }
        let mesh = PreparedMesh::new(&verts);
        let resolved = resolve(MeasurementKey::Waist, &MeasureConfig::default(), &mesh);
        let section = extract(&mesh, &resolved);
        // Five rings fall in [0.60, 0.64] and collapse onto the same 16 points.
        assert_eq!(section.n_points_raw, 80);
        assert_eq!(section.n_points_deduped, 16);
    }
}
