//! Band location: which height slab to slice for each key.
//!
//! Bust and waist use fixed fractions of the body's vertical extent. The hip
//! band is either a named world-frame config or is placed relative to the
//! pelvis landmark, which keeps it anatomically anchored when proportions
//! shift between bodies.

use nalgebra::{Point3, Vector3};
use tracing::debug;

use crate::config::{HipBandId, HipStrategy, MeasureConfig, SliceBandConfig};
use crate::types::{MeasurementKey, PreparedMesh, WarningCode};

/// Vertical extent below which a mesh is treated as flat.
pub const FLAT_MESH_EPSILON: f64 = 1e-6;

/// Landmark band used to locate the pelvis, as fractions of the extent.
pub const PELVIS_LANDMARK_BAND: (f64, f64) = (0.45, 0.55);

/// Minimum vertices in the landmark band for a usable pelvis frame.
pub const PELVIS_MIN_LANDMARK_POINTS: usize = 3;

/// Hip band relative to the pelvis origin, as fractions of the extent.
pub const PELVIS_HIP_OFFSETS: (f64, f64) = (0.00, 0.04);

/// Body frame anchored at the pelvis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PelvisFrame {
    pub origin: Point3<f64>,
    pub up_axis: Vector3<f64>,
}

impl PelvisFrame {
    /// Height of a point above the pelvis along the up axis.
    #[inline]
    pub fn height_of(&self, p: &Point3<f64>) -> f64 {
        (p - self.origin).dot(&self.up_axis)
    }
}

/// Detect the pelvis frame.
///
/// An explicit pelvis joint wins. Otherwise the origin is the centroid of
/// the vertices in [`PELVIS_LANDMARK_BAND`]. Returns `None` when the mesh is
/// flat or the landmark band holds fewer than
/// [`PELVIS_MIN_LANDMARK_POINTS`] vertices.
pub fn detect_pelvis_frame(
    points: &[Point3<f64>],
    pelvis_joint: Option<Point3<f64>>,
) -> Option<PelvisFrame> {
    let up_axis = Vector3::y();

    if let Some(origin) = pelvis_joint {
        return Some(PelvisFrame { origin, up_axis });
    }
    if points.is_empty() {
        return None;
    }

    let (y_min, y_max) = points
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
            (lo.min(p.y), hi.max(p.y))
        });
    let range = y_max - y_min;
    if range < FLAT_MESH_EPSILON {
        return None;
    }

    let lo = y_min + PELVIS_LANDMARK_BAND.0 * range;
    let hi = y_min + PELVIS_LANDMARK_BAND.1 * range;
    let mut sum = Vector3::zeros();
    let mut count = 0usize;
    for p in points.iter().filter(|p| p.y >= lo && p.y <= hi) {
        sum += p.coords;
        count += 1;
    }
    if count < PELVIS_MIN_LANDMARK_POINTS {
        return None;
    }

    let origin = Point3::from(sum / count as f64);
    debug!(
        target: "body_measure::band",
        landmark_points = count,
        origin_y = format!("{:.4}", origin.y),
        "Pelvis frame detected"
    );
    Some(PelvisFrame { origin, up_axis })
}

/// Where the band was anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandFrame {
    World,
    Pelvis,
}

/// A band resolved against a concrete mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedBand {
    pub key: MeasurementKey,
    /// Band in fractions of the extent, as actually used.
    pub config: SliceBandConfig,
    /// Absolute lower bound in meters.
    pub y_lo: f64,
    /// Absolute upper bound in meters.
    pub y_hi: f64,
    pub frame: BandFrame,
    pub warnings: Vec<WarningCode>,
}

impl ResolvedBand {
    /// Band width in meters.
    #[inline]
    pub fn width_m(&self) -> f64 {
        self.y_hi - self.y_lo
    }
}

/// Resolve the band for `key` under `config` on a prepared mesh.
pub fn resolve(key: MeasurementKey, config: &MeasureConfig, mesh: &PreparedMesh) -> ResolvedBand {
    let mut warnings = Vec::new();
    let extent = mesh.height();
    let flat = extent < FLAT_MESH_EPSILON;
    if flat && !mesh.is_empty() {
        warnings.push(WarningCode::FlatMesh);
    }

    if key == MeasurementKey::Hip && config.hip == HipStrategy::PelvisFrame {
        match mesh.pelvis_frame() {
            Some(frame) if !flat => {
                let base = frame.origin.y;
                let y_lo = base + PELVIS_HIP_OFFSETS.0 * extent;
                let y_hi = base + PELVIS_HIP_OFFSETS.1 * extent;
                let fallback = HipBandId::default().band();
                let band = SliceBandConfig {
                    y_start: (y_lo - mesh.y_min()) / extent,
                    y_end: (y_hi - mesh.y_min()) / extent,
                    ..fallback
                };
                return ResolvedBand {
                    key,
                    config: band,
                    y_lo,
                    y_hi,
                    frame: BandFrame::Pelvis,
                    warnings,
                };
            }
            _ => {
                debug!(
                    target: "body_measure::band",
                    key = key.as_str(),
                    "Pelvis frame unavailable, using world band"
                );
                warnings.push(WarningCode::HipFrameFallbackToWorldY);
            }
        }
    }

    let band = config.world_band(key);
    let (y_lo, y_hi) = if flat {
        (mesh.y_min(), mesh.y_max())
    } else {
        (
            mesh.y_min() + band.y_start * extent,
            mesh.y_min() + band.y_end * extent,
        )
    };

    ResolvedBand {
        key,
        config: band,
        y_lo,
        y_hi,
        frame: BandFrame::World,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HipMethod;
    use crate::types::VertexSet;

    /// Column of 8-point rings every 0.1 m from y=0 to y=1.
    fn ring_column() -> VertexSet {
        let mut verts = VertexSet::new();
        for level in 0..=10 {
            let y = level as f32 * 0.1;
            for k in 0..8 {
                let a = k as f32 * std::f32::consts::TAU / 8.0;
                verts.push(Point3::new(0.3 * a.cos(), y, 0.3 * a.sin()));
            }
        }
        verts
    }

    #[test]
    fn test_world_band_scales_with_extent() {
        let mesh = PreparedMesh::new(&ring_column().scaled(2.0));
        let band = resolve(MeasurementKey::Bust, &MeasureConfig::default(), &mesh);
        assert_eq!(band.frame, BandFrame::World);
        assert!((band.y_lo - 1.40).abs() < 1e-6);
        assert!((band.y_hi - 1.48).abs() < 1e-6);
        assert!(band.warnings.is_empty());
    }

    #[test]
    fn test_hip_band_follows_config() {
        let mesh = PreparedMesh::new(&ring_column());
        for id in HipBandId::ALL {
            let config = MeasureConfig::default().with_hip_band(id);
            let band = resolve(MeasurementKey::Hip, &config, &mesh);
            assert!((band.y_lo - id.band().y_start).abs() < 1e-6);
            assert_eq!(band.config.tie_prefer_lower_y, id.band().tie_prefer_lower_y);
        }
    }

    #[test]
    fn test_pelvis_frame_from_landmark_band() {
        let mesh = PreparedMesh::new(&ring_column());
        let frame = mesh.pelvis_frame().unwrap();
        // Landmark band [0.45, 0.55] holds only the y=0.5 ring.
        assert!((frame.origin.y - 0.5).abs() < 1e-6);
        assert!(frame.origin.x.abs() < 1e-6);
        assert_eq!(frame.up_axis, Vector3::y());
        assert!((frame.height_of(&Point3::new(0.0, 0.7, 0.0)) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_pelvis_band_placement() {
        let mesh = PreparedMesh::new(&ring_column());
        let config = MeasureConfig::default().with_hip_method(HipMethod::PelvisFrameBand);
        let band = resolve(MeasurementKey::Hip, &config, &mesh);
        assert_eq!(band.frame, BandFrame::Pelvis);
        assert!((band.y_lo - 0.50).abs() < 1e-6);
        assert!((band.y_hi - 0.54).abs() < 1e-6);
        assert!(band.warnings.is_empty());
    }

    #[test]
    fn test_pelvis_joint_overrides_landmark() {
        let mesh = PreparedMesh::new(&ring_column()).with_pelvis_joint(Point3::new(0.0, 0.3, 0.0));
        let frame = mesh.pelvis_frame().unwrap();
        assert!((frame.origin.y - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_pelvis_fallback_on_flat_mesh() {
        let mut verts = VertexSet::new();
        for k in 0..20 {
            let a = k as f32 * std::f32::consts::TAU / 20.0;
            verts.push(Point3::new(0.3 * a.cos(), 0.5, 0.3 * a.sin()));
        }
        let mesh = PreparedMesh::new(&verts);
        let config = MeasureConfig::default().with_hip_method(HipMethod::PelvisFrameBand);
        let band = resolve(MeasurementKey::Hip, &config, &mesh);
        assert_eq!(band.frame, BandFrame::World);
        assert!(band.warnings.contains(&WarningCode::HipFrameFallbackToWorldY));
        assert!(band.warnings.contains(&WarningCode::FlatMesh));
        assert!((band.y_lo - 0.5).abs() < 1e-6);
        assert!((band.y_hi - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_pelvis_fallback_on_sparse_landmark_band() {
        let verts = VertexSet::from_rows(&[[0.0, 0.0, 0.0], [0.1, 0.5, 0.0], [0.0, 1.0, 0.1]]);
        assert!(detect_pelvis_frame(PreparedMesh::new(&verts).points(), None).is_none());
    }
}
