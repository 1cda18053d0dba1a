//! Mesh providers: shape vector in, body vertex set out.
//!
//! The optimizer treats a provider as a black box. Two providers ship with
//! the crate:
//!
//! - [`ScaledTemplateProvider`]: a template vertex set scaled uniformly by
//!   `1 + beta[0]`. Without a template it falls back to a small stacked ring.
//! - [`ParametricTorsoProvider`]: a procedural standing body whose bust, waist
//!   and hip girths are driven by three coefficients, with seeded vertex
//!   jitter.
//!
//! Providers must be deterministic: the same `beta` and `pose_id` always
//! yield the same vertices.

use std::path::Path;
use std::str::FromStr;

use body_measure::{VertexSet, load_vertices};
use nalgebra::Point3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::{FitError, FitResult};

/// Output of a mesh provider.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedMesh {
    /// Body vertices in meters, Y up.
    pub verts: VertexSet,
    /// Pelvis joint position, when the model knows it.
    pub pelvis_joint: Option<Point3<f32>>,
}

impl GeneratedMesh {
    /// A mesh without joint information.
    pub fn from_verts(verts: VertexSet) -> Self {
        Self {
            verts,
            pelvis_joint: None,
        }
    }
}

/// A parametric body model.
pub trait MeshProvider {
    /// Provider name, recorded in batch summaries.
    fn name(&self) -> &str;

    /// Length of the shape vector the optimizer searches over.
    fn num_betas(&self) -> usize;

    /// Build a mesh for a shape vector and pose.
    fn generate_mesh(&self, beta: &[f64], pose_id: &str) -> FitResult<GeneratedMesh>;
}

/// Built-in provider selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProviderKind {
    /// [`ScaledTemplateProvider`].
    #[default]
    Scaled,
    /// [`ParametricTorsoProvider`].
    Torso,
}

impl ProviderKind {
    /// Name as accepted on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Scaled => "scaled",
            ProviderKind::Torso => "torso",
        }
    }

    /// Construct the provider. `base_verts` only applies to `Scaled`.
    pub fn build(&self, seed: u64, base_verts: Option<&Path>) -> FitResult<Box<dyn MeshProvider>> {
        Ok(match self {
            ProviderKind::Scaled => match base_verts {
                Some(path) => Box::new(ScaledTemplateProvider::from_file(path)?),
                None => Box::new(ScaledTemplateProvider::fallback()),
            },
            ProviderKind::Torso => Box::new(ParametricTorsoProvider::new(seed)),
        })
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = FitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scaled" | "dummy" => Ok(ProviderKind::Scaled),
            "torso" => Ok(ProviderKind::Torso),
            other => Err(FitError::UnknownProvider {
                name: other.to_string(),
            }),
        }
    }
}

fn check_beta(provider: &str, beta: &[f64], max_len: usize) -> FitResult<()> {
    if beta.len() > max_len {
        return Err(FitError::invalid_beta(
            provider,
            format!("expected at most {} coefficients, got {}", max_len, beta.len()),
        ));
    }
    if let Some(i) = beta.iter().position(|b| !b.is_finite()) {
        return Err(FitError::invalid_beta(
            provider,
            format!("coefficient {} is not finite", i),
        ));
    }
    Ok(())
}

// =============================================================================
// Scaled template
// =============================================================================

/// Rings in the fallback template.
const FALLBACK_RING_LEVELS: usize = 11;

/// Points per fallback ring.
const FALLBACK_RING_POINTS: usize = 8;

/// Fallback ring radius in meters.
const FALLBACK_RING_RADIUS: f32 = 0.3;

/// Uniformly scaled template mesh with one shape coefficient.
#[derive(Debug, Clone)]
pub struct ScaledTemplateProvider {
    base: VertexSet,
}

impl ScaledTemplateProvider {
    /// Use an explicit template.
    pub fn new(base: VertexSet) -> Self {
        Self { base }
    }

    /// Load the template from a vertex file.
    pub fn from_file(path: impl AsRef<Path>) -> FitResult<Self> {
        Ok(Self::new(load_vertices(path)?))
    }

    /// Eleven rings of eight points, radius 0.3 m, from y = 0 to y = 1 m.
    pub fn fallback() -> Self {
        let mut base = VertexSet::new();
        for level in 0..FALLBACK_RING_LEVELS {
            let y = level as f32 / (FALLBACK_RING_LEVELS - 1) as f32;
            for k in 0..FALLBACK_RING_POINTS {
                let t = k as f32 * std::f32::consts::TAU / FALLBACK_RING_POINTS as f32;
                base.push(Point3::new(
                    FALLBACK_RING_RADIUS * t.cos(),
                    y,
                    FALLBACK_RING_RADIUS * t.sin(),
                ));
            }
        }
        Self::new(base)
    }

    /// The unscaled template.
    pub fn base(&self) -> &VertexSet {
        &self.base
    }
}

impl Default for ScaledTemplateProvider {
    fn default() -> Self {
        Self::fallback()
    }
}

impl MeshProvider for ScaledTemplateProvider {
    fn name(&self) -> &str {
        "scaled"
    }

    fn num_betas(&self) -> usize {
        1
    }

    fn generate_mesh(&self, beta: &[f64], _pose_id: &str) -> FitResult<GeneratedMesh> {
        check_beta(self.name(), beta, self.num_betas())?;
        let scale = 1.0 + beta.first().copied().unwrap_or(0.0);
        Ok(GeneratedMesh::from_verts(self.base.scaled(scale as f32)))
    }
}

// =============================================================================
// Parametric torso
// =============================================================================

/// Standing height in meters.
const BODY_HEIGHT_M: f32 = 1.70;

/// Vertical spacing between rings in meters.
const RING_SPACING_M: f32 = 0.01;

/// Points per torso ring.
const TORSO_RING_POINTS: usize = 72;

/// Largest vertex jitter in meters, per horizontal axis.
const JITTER_M: f32 = 0.0005;

/// Smallest allowed girth scale.
const MIN_GIRTH_SCALE: f64 = 0.05;

/// Torso cross-section semi-axes `(height fraction, half-width, half-depth)`.
const TORSO_PROFILE: [(f32, f32, f32); 6] = [
    (0.45, 0.17, 0.12),
    (0.52, 0.18, 0.13),
    (0.62, 0.14, 0.10),
    (0.72, 0.16, 0.12),
    (0.80, 0.19, 0.11),
    (0.82, 0.20, 0.10),
];

/// Centers of the bust, waist and hip girth controls, as height fractions.
const GIRTH_CENTERS: [f32; 3] = [0.72, 0.62, 0.52];

/// Half-width of each girth control's influence.
const GIRTH_HALF_WIDTH: f32 = 0.10;

/// Height fraction of the pelvis joint.
const PELVIS_HEIGHT_FRACTION: f32 = 0.50;

/// Procedural standing body: legs, torso, arms, neck and head, built from
/// stacked elliptic rings.
///
/// `beta[0..3]` scale bust, waist and hip girth by `1 + beta[k]`, each
/// blending linearly to zero influence `0.10` of the height away from its
/// center. Missing coefficients count as zero.
#[derive(Debug, Clone)]
pub struct ParametricTorsoProvider {
    seed: u64,
}

impl ParametricTorsoProvider {
    /// Create a provider whose jitter stream is derived from `seed`.
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Jitter seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Torso semi-axes at height fraction `t`, before girth scaling.
    fn profile(t: f32) -> (f32, f32) {
        let first = TORSO_PROFILE[0];
        if t <= first.0 {
            return (first.1, first.2);
        }
        for pair in TORSO_PROFILE.windows(2) {
            let (t0, a0, c0) = pair[0];
            let (t1, a1, c1) = pair[1];
            if t <= t1 {
                let w = (t - t0) / (t1 - t0);
                return (a0 + w * (a1 - a0), c0 + w * (c1 - c0));
            }
        }
        let last = TORSO_PROFILE[TORSO_PROFILE.len() - 1];
        (last.1, last.2)
    }

    /// Girth scale at height fraction `t`.
    fn girth_scale(t: f32, scales: &[f64; 3]) -> f32 {
        let mut scale = 1.0f32;
        for (center, s) in GIRTH_CENTERS.iter().zip(scales) {
            let w = (1.0 - (t - center).abs() / GIRTH_HALF_WIDTH).max(0.0);
            scale += w * (*s as f32 - 1.0);
        }
        scale
    }
}

impl MeshProvider for ParametricTorsoProvider {
    fn name(&self) -> &str {
        "torso"
    }

    fn num_betas(&self) -> usize {
        3
    }

    fn generate_mesh(&self, beta: &[f64], pose_id: &str) -> FitResult<GeneratedMesh> {
        check_beta(self.name(), beta, self.num_betas())?;
        let mut scales = [1.0f64; 3];
        for (s, b) in scales.iter_mut().zip(beta) {
            *s = 1.0 + b;
            if *s < MIN_GIRTH_SCALE {
                return Err(FitError::provider(
                    self.name(),
                    format!("girth scale {:.4} is below {}", s, MIN_GIRTH_SCALE),
                ));
            }
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut verts = VertexSet::new();
        let mut ring = |cx: f32, y: f32, a: f32, c: f32, n: usize| {
            for k in 0..n {
                let th = k as f32 * std::f32::consts::TAU / n as f32;
                let jx = rng.gen_range(-JITTER_M..JITTER_M);
                let jz = rng.gen_range(-JITTER_M..JITTER_M);
                verts.push(Point3::new(cx + a * th.cos() + jx, y, c * th.sin() + jz));
            }
        };

        let levels = (BODY_HEIGHT_M / RING_SPACING_M).round() as usize;
        for level in 0..=levels {
            let y = level as f32 * RING_SPACING_M;
            let t = y / BODY_HEIGHT_M;
            if t < 0.45 {
                ring(-0.09, y, 0.07, 0.07, 48);
                ring(0.09, y, 0.07, 0.07, 48);
            } else if t < 0.82 {
                let (a, c) = Self::profile(t);
                let g = Self::girth_scale(t, &scales);
                ring(0.0, y, a * g, c * g, TORSO_RING_POINTS);
            } else if t < 0.87 {
                ring(0.0, y, 0.06, 0.06, 32);
            } else {
                ring(0.0, y, 0.09, 0.10, 48);
            }
            if (0.50..0.80).contains(&t) {
                ring(-0.36, y, 0.04, 0.04, 24);
                ring(0.36, y, 0.04, 0.04, 24);
            }
        }

        tracing::trace!(
            target: "beta_fit::provider",
            provider = self.name(),
            pose_id,
            vertices = verts.len(),
            "Generated mesh"
        );

        Ok(GeneratedMesh {
            verts,
            pelvis_joint: Some(Point3::new(0.0, PELVIS_HEIGHT_FRACTION * BODY_HEIGHT_M, 0.0)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use body_measure::{MeasureConfig, MeasurementKey, measure, measure_group};

    #[test]
    fn test_fallback_template_shape() {
        let provider = ScaledTemplateProvider::fallback();
        assert_eq!(provider.base().len(), 88);
        let (min, max) = provider.base().bounds().unwrap();
        assert!((min.y - 0.0).abs() < 1e-6);
        assert!((max.y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_scaled_provider_scales() {
        let provider = ScaledTemplateProvider::fallback();
        let base = provider.generate_mesh(&[], "PZ1").unwrap();
        let big = provider.generate_mesh(&[0.5], "PZ1").unwrap();
        let key = MeasurementKey::Waist;
        let config = MeasureConfig::default();
        let v0 = measure(&base.verts, key, &config).value().unwrap();
        let v1 = measure(&big.verts, key, &config).value().unwrap();
        assert!((v1 / v0 - 1.5).abs() < 1e-5);
    }

    #[test]
    fn test_scaled_provider_rejects_long_beta() {
        let provider = ScaledTemplateProvider::fallback();
        let err = provider.generate_mesh(&[0.1, 0.2], "PZ1").unwrap_err();
        assert!(matches!(err, FitError::InvalidBeta { .. }));
        assert!(provider.generate_mesh(&[f64::NAN], "PZ1").is_err());
    }

    #[test]
    fn test_torso_provider_is_deterministic() {
        let provider = ParametricTorsoProvider::new(7);
        let a = provider.generate_mesh(&[0.1, -0.05, 0.02], "PZ1").unwrap();
        let b = provider.generate_mesh(&[0.1, -0.05, 0.02], "PZ1").unwrap();
        assert_eq!(a, b);

        let other_seed = ParametricTorsoProvider::new(8)
            .generate_mesh(&[0.1, -0.05, 0.02], "PZ1")
            .unwrap();
        assert_ne!(a.verts, other_seed.verts);
    }

    #[test]
    fn test_torso_measurements_are_plausible() {
        let mesh = ParametricTorsoProvider::new(42)
            .generate_mesh(&[0.0, 0.0, 0.0], "PZ1")
            .unwrap();
        let results = measure_group(&mesh.verts, "torso", &MeasureConfig::default());
        let bust = results[&MeasurementKey::Bust].value().unwrap();
        let waist = results[&MeasurementKey::Waist].value().unwrap();
        let hip = results[&MeasurementKey::Hip].value().unwrap();
        assert!(waist < bust && waist < hip, "{bust} {waist} {hip}");
        assert!((0.6..1.2).contains(&waist));
        assert!((0.7..1.3).contains(&hip));
    }

    #[test]
    fn test_torso_girth_controls_are_local() {
        let provider = ParametricTorsoProvider::new(42);
        let config = MeasureConfig::default();
        let base = provider.generate_mesh(&[0.0, 0.0, 0.0], "PZ1").unwrap();
        let wide_hip = provider.generate_mesh(&[0.0, 0.0, 0.2], "PZ1").unwrap();

        let hip0 = measure(&base.verts, MeasurementKey::Hip, &config).value().unwrap();
        let hip1 = measure(&wide_hip.verts, MeasurementKey::Hip, &config).value().unwrap();
        assert!(hip1 > hip0 * 1.1);

        let bust0 = measure(&base.verts, MeasurementKey::Bust, &config).value().unwrap();
        let bust1 = measure(&wide_hip.verts, MeasurementKey::Bust, &config).value().unwrap();
        assert!((bust1 - bust0).abs() < 1e-3);
    }

    #[test]
    fn test_torso_rejects_collapsed_girth() {
        let err = ParametricTorsoProvider::new(42)
            .generate_mesh(&[0.0, -0.99, 0.0], "PZ1")
            .unwrap_err();
        assert!(matches!(err, FitError::ProviderFailed { .. }));
    }

    #[test]
    fn test_provider_kind_parsing() {
        assert_eq!("scaled".parse::<ProviderKind>().unwrap(), ProviderKind::Scaled);
        assert_eq!("torso".parse::<ProviderKind>().unwrap(), ProviderKind::Torso);
        assert!("smplx".parse::<ProviderKind>().is_err());
        let provider = ProviderKind::Torso.build(1, None).unwrap();
        assert_eq!(provider.num_betas(), 3);
    }
}
