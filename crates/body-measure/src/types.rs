//! Core measurement data types.

use std::cell::OnceCell;
use std::fmt;
use std::str::FromStr;

use nalgebra::Point3;
use serde::{Deserialize, Serialize, Serializer};

use crate::band::{PelvisFrame, detect_pelvis_frame};
use crate::error::{MeasureError, MeasureResult};

/// Ordered set of body-mesh vertices in meters, Y up.
///
/// Vertices are stored as `f32` to match the precision of the mesh sources.
/// All geometry downstream is computed in `f64`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VertexSet {
    points: Vec<Point3<f32>>,
}

impl VertexSet {
    /// Create an empty vertex set.
    pub fn new() -> Self {
        Self { points: Vec::new() }
    }

    /// Create a vertex set from points.
    pub fn from_points(points: Vec<Point3<f32>>) -> Self {
        Self { points }
    }

    /// Create a vertex set from `[x, y, z]` rows.
    pub fn from_rows(rows: &[[f32; 3]]) -> Self {
        Self {
            points: rows.iter().map(|r| Point3::new(r[0], r[1], r[2])).collect(),
        }
    }

    /// Number of vertices.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the set has no vertices.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Borrow the raw points.
    #[inline]
    pub fn points(&self) -> &[Point3<f32>] {
        &self.points
    }

    /// Append a vertex.
    pub fn push(&mut self, point: Point3<f32>) {
        self.points.push(point);
    }

    /// Axis-aligned bounds over finite vertices, `None` if there are none.
    pub fn bounds(&self) -> Option<(Point3<f32>, Point3<f32>)> {
        let mut finite = self.points.iter().filter(|p| is_finite_point(p));
        let first = *finite.next()?;
        let (mut min, mut max) = (first, first);
        for p in finite {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            min.z = min.z.min(p.z);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
            max.z = max.z.max(p.z);
        }
        Some((min, max))
    }

    /// Return a copy with every coordinate multiplied by `factor`.
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            points: self.points.iter().map(|p| Point3::from(p.coords * factor)).collect(),
        }
    }

    /// Rows in `[x, y, z]` form.
    pub fn to_rows(&self) -> Vec<[f32; 3]> {
        self.points.iter().map(|p| [p.x, p.y, p.z]).collect()
    }
}

#[inline]
fn is_finite_point(p: &Point3<f32>) -> bool {
    p.x.is_finite() && p.y.is_finite() && p.z.is_finite()
}

/// Circumference measurement keys, in enumeration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MeasurementKey {
    #[serde(rename = "BUST_CIRC_M")]
    Bust,
    #[serde(rename = "WAIST_CIRC_M")]
    Waist,
    #[serde(rename = "HIP_CIRC_M")]
    Hip,
}

impl MeasurementKey {
    /// All keys in enumeration order.
    pub const ALL: [MeasurementKey; 3] =
        [MeasurementKey::Bust, MeasurementKey::Waist, MeasurementKey::Hip];

    /// Wire name of the key.
    pub fn as_str(&self) -> &'static str {
        match self {
            MeasurementKey::Bust => "BUST_CIRC_M",
            MeasurementKey::Waist => "WAIST_CIRC_M",
            MeasurementKey::Hip => "HIP_CIRC_M",
        }
    }

    /// Torso region the key belongs to.
    pub fn region(&self) -> &'static str {
        match self {
            MeasurementKey::Bust => "TORSO_UPPER",
            MeasurementKey::Waist => "TORSO_MID",
            MeasurementKey::Hip => "TORSO_LOWER",
        }
    }
}

impl fmt::Display for MeasurementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MeasurementKey {
    type Err = MeasureError;

    fn from_str(s: &str) -> MeasureResult<Self> {
        MeasurementKey::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| MeasureError::unknown_key(s))
    }
}

/// Warning codes attached to measurement results.
///
/// Warning lists are kept sorted by wire name and deduplicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarningCode {
    EmptyMesh,
    FlatMesh,
    NonFiniteVerticesDropped,
    BandEmpty,
    BandWidened,
    MultipleComponents,
    TooFewPoints,
    HullDegenerate,
    CircOutOfSaneRange,
    HipFrameFallbackToWorldY,
}

impl WarningCode {
    /// Wire name of the warning.
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningCode::EmptyMesh => "EMPTY_MESH",
            WarningCode::FlatMesh => "FLAT_MESH",
            WarningCode::NonFiniteVerticesDropped => "NON_FINITE_VERTICES_DROPPED",
            WarningCode::BandEmpty => "BAND_EMPTY",
            WarningCode::BandWidened => "BAND_WIDENED",
            WarningCode::MultipleComponents => "MULTIPLE_COMPONENTS",
            WarningCode::TooFewPoints => "TOO_FEW_POINTS",
            WarningCode::HullDegenerate => "HULL_DEGENERATE",
            WarningCode::CircOutOfSaneRange => "CIRC_OUT_OF_SANE_RANGE",
            WarningCode::HipFrameFallbackToWorldY => "HIP_FRAME_FALLBACK_TO_WORLD_Y",
        }
    }
}

impl fmt::Display for WarningCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sort warnings by wire name and drop duplicates.
pub fn normalize_warnings(warnings: &mut Vec<WarningCode>) {
    warnings.sort_by_key(|w| w.as_str());
    warnings.dedup();
}

/// Why a measurement produced no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MissingReason {
    /// No finite vertices at all.
    EmptyMesh,
    /// No vertices inside the band, even after widening.
    EmptyBand,
    /// Fewer than three points in the selected component.
    TooFewPoints,
    /// Hull is colinear or has zero area.
    DegenerateHull,
    /// Perimeter came out NaN or infinite.
    NonFinite,
}

/// A circumference value or the reason it is absent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MeasuredValue {
    Value(f64),
    Missing(MissingReason),
}

impl MeasuredValue {
    /// The value in meters, if present.
    #[inline]
    pub fn value(&self) -> Option<f64> {
        match self {
            MeasuredValue::Value(v) => Some(*v),
            MeasuredValue::Missing(_) => None,
        }
    }

    /// Check if no value was produced.
    #[inline]
    pub fn is_missing(&self) -> bool {
        matches!(self, MeasuredValue::Missing(_))
    }

    /// The missing reason, if any.
    pub fn missing_reason(&self) -> Option<MissingReason> {
        match self {
            MeasuredValue::Value(_) => None,
            MeasuredValue::Missing(reason) => Some(*reason),
        }
    }
}

impl Serialize for MeasuredValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value().serialize(serializer)
    }
}

/// A vertex set prepared once for measurement.
///
/// Preparation drops non-finite vertices, widens to `f64`, records the
/// vertical bounds and lazily detects the pelvis frame. Every key measured
/// against the same `PreparedMesh` shares this work.
#[derive(Debug, Clone)]
pub struct PreparedMesh {
    points: Vec<Point3<f64>>,
    y_min: f64,
    y_max: f64,
    dropped: usize,
    pelvis_joint: Option<Point3<f64>>,
    pelvis: OnceCell<Option<PelvisFrame>>,
}

impl PreparedMesh {
    /// Prepare a vertex set.
    pub fn new(verts: &VertexSet) -> Self {
        let points: Vec<Point3<f64>> = verts
            .points()
            .iter()
            .filter(|p| is_finite_point(p))
            .map(|p| Point3::new(p.x as f64, p.y as f64, p.z as f64))
            .collect();
        let dropped = verts.len() - points.len();

        let (y_min, y_max) = points
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
                (lo.min(p.y), hi.max(p.y))
            });
        let (y_min, y_max) = if points.is_empty() {
            (0.0, 0.0)
        } else {
            (y_min, y_max)
        };

        Self {
            points,
            y_min,
            y_max,
            dropped,
            pelvis_joint: None,
            pelvis: OnceCell::new(),
        }
    }

    /// Use an explicit pelvis joint position instead of the vertex landmark.
    pub fn with_pelvis_joint(mut self, joint: Point3<f32>) -> Self {
        if is_finite_point(&joint) {
            self.pelvis_joint = Some(Point3::new(joint.x as f64, joint.y as f64, joint.z as f64));
            self.pelvis = OnceCell::new();
        }
        self
    }

    /// Finite vertices.
    #[inline]
    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    /// Check if no finite vertices remain.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Lowest vertex height.
    #[inline]
    pub fn y_min(&self) -> f64 {
        self.y_min
    }

    /// Highest vertex height.
    #[inline]
    pub fn y_max(&self) -> f64 {
        self.y_max
    }

    /// Vertical extent.
    #[inline]
    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    /// Number of non-finite vertices dropped during preparation.
    #[inline]
    pub fn dropped_count(&self) -> usize {
        self.dropped
    }

    /// Pelvis frame, detected on first use.
    pub fn pelvis_frame(&self) -> Option<&PelvisFrame> {
        self.pelvis
            .get_or_init(|| detect_pelvis_frame(&self.points, self.pelvis_joint))
            .as_ref()
    }

    /// Warnings raised by preparation itself.
    pub fn warnings(&self) -> Vec<WarningCode> {
        let mut warnings = Vec::new();
        if self.dropped > 0 {
            warnings.push(WarningCode::NonFiniteVerticesDropped);
        }
        if self.points.is_empty() {
            warnings.push(WarningCode::EmptyMesh);
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_round_trip_names() {
        for key in MeasurementKey::ALL {
            assert_eq!(key.as_str().parse::<MeasurementKey>().unwrap(), key);
        }
        assert!("NECK_CIRC_M".parse::<MeasurementKey>().is_err());
        assert_eq!(
            serde_json::to_string(&MeasurementKey::Hip).unwrap(),
            "\"HIP_CIRC_M\""
        );
    }

    #[test]
    fn test_warning_serialization_matches_as_str() {
        let all = [
            WarningCode::EmptyMesh,
            WarningCode::FlatMesh,
            WarningCode::NonFiniteVerticesDropped,
            WarningCode::BandEmpty,
            WarningCode::BandWidened,
            WarningCode::MultipleComponents,
            WarningCode::TooFewPoints,
            WarningCode::HullDegenerate,
            WarningCode::CircOutOfSaneRange,
            WarningCode::HipFrameFallbackToWorldY,
        ];
        for w in all {
            let json = serde_json::to_string(&w).unwrap();
            assert_eq!(json, format!("\"{}\"", w.as_str()));
        }
    }

    #[test]
    fn test_normalize_warnings() {
        let mut warnings = vec![
            WarningCode::TooFewPoints,
            WarningCode::BandWidened,
            WarningCode::TooFewPoints,
        ];
        normalize_warnings(&mut warnings);
        assert_eq!(
            warnings,
            vec![WarningCode::BandWidened, WarningCode::TooFewPoints]
        );
    }

    #[test]
    fn test_measured_value_serializes_as_nullable_number() {
        let v = MeasuredValue::Value(0.95);
        assert_eq!(serde_json::to_string(&v).unwrap(), "0.95");
        let m = MeasuredValue::Missing(MissingReason::EmptyBand);
        assert_eq!(serde_json::to_string(&m).unwrap(), "null");
        assert!(m.is_missing());
        assert_eq!(m.missing_reason(), Some(MissingReason::EmptyBand));
    }

    #[test]
    fn test_prepared_mesh_drops_non_finite() {
        let verts = VertexSet::from_rows(&[
            [0.0, 0.0, 0.0],
            [f32::NAN, 1.0, 0.0],
            [0.0, 2.0, f32::INFINITY],
            [1.0, 1.5, 0.0],
        ]);
        let prepared = PreparedMesh::new(&verts);
        assert_eq!(prepared.points().len(), 2);
        assert_eq!(prepared.dropped_count(), 2);
        assert!((prepared.height() - 1.5).abs() < 1e-12);
        assert_eq!(
            prepared.warnings(),
            vec![WarningCode::NonFiniteVerticesDropped]
        );
    }

    #[test]
    fn test_empty_prepared_mesh() {
        let prepared = PreparedMesh::new(&VertexSet::new());
        assert!(prepared.is_empty());
        assert_eq!(prepared.height(), 0.0);
        assert_eq!(prepared.warnings(), vec![WarningCode::EmptyMesh]);
    }

    #[test]
    fn test_vertex_set_bounds_and_scale() {
        let verts = VertexSet::from_rows(&[[-1.0, 0.0, 2.0], [1.0, 3.0, -2.0]]);
        let (min, max) = verts.bounds().unwrap();
        assert_eq!(min, Point3::new(-1.0, 0.0, -2.0));
        assert_eq!(max, Point3::new(1.0, 3.0, 2.0));

        let doubled = verts.scaled(2.0);
        assert_eq!(doubled.points()[1], Point3::new(2.0, 6.0, -4.0));
        assert!(VertexSet::new().bounds().is_none());
    }
}
