//! Shape-parameter fitting against target circumferences.
//!
//! A fit searches the provider's shape vector with Nelder–Mead, starting at
//! zeros, minimizing `Σ (predicted − target)²` over the fitted keys. A key
//! the measurement pipeline cannot produce costs `target²`; a provider
//! failure costs [`PROVIDER_FAILURE_LOSS`]. Both keep the search moving
//! instead of aborting it.
//!
//! # Example
//!
//! ```
//! use beta_fit::{FitOptions, ScaledTemplateProvider, TargetVector, fit_prototype};
//! use body_measure::MeasurementKey;
//!
//! let targets = TargetVector::from([
//!     (MeasurementKey::Bust, 0.85),
//!     (MeasurementKey::Waist, 0.72),
//!     (MeasurementKey::Hip, 0.92),
//! ]);
//! let provider = ScaledTemplateProvider::fallback();
//! let result = fit_prototype("p0000", &targets, &provider, &FitOptions::default());
//! assert!(result.success);
//! ```

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

use body_measure::{MeasureConfig, MeasurementKey, PreparedMesh, measure_group_prepared};
use serde::{Deserialize, Serialize};
use tracing::{info_span, trace};

use crate::error::{FitError, FitResult};
use crate::nelder_mead::{NelderMeadOptions, NelderMeadOutcome, minimize};
use crate::provider::MeshProvider;
use crate::quality::{
    QUALITY_THRESHOLD, QualityBucket, quality_bucket, quality_score, rank_residuals, round_to,
};
use crate::tracing_ext::log_fit_result;

/// Schema tag of per-prototype results and batch summaries.
pub const SCHEMA_VERSION: &str = "beta_fit_v0";

/// Objective value when the provider cannot build a mesh.
pub const PROVIDER_FAILURE_LOSS: f64 = 1e10;

/// Longest error message kept in a stub result.
pub const ERROR_MESSAGE_MAX_CHARS: usize = 500;

/// Default pose identifier.
pub const DEFAULT_POSE_ID: &str = "PZ1";

/// Target circumferences in meters.
pub type TargetVector = BTreeMap<MeasurementKey, f64>;

/// Predicted circumferences in meters; `None` where measurement failed.
pub type Prediction = BTreeMap<MeasurementKey, Option<f64>>;

/// Options for a single fit.
#[derive(Debug, Clone, PartialEq)]
pub struct FitOptions {
    /// Objective evaluation budget.
    pub max_iter: usize,
    /// Pose passed to the provider.
    pub pose_id: String,
    /// Keys in the objective, in enumeration order.
    pub keys: Vec<MeasurementKey>,
    /// Measurement configuration used for every evaluation.
    pub measure: MeasureConfig,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            max_iter: 200,
            pose_id: DEFAULT_POSE_ID.to_string(),
            keys: MeasurementKey::ALL.to_vec(),
            measure: MeasureConfig::default(),
        }
    }
}

impl FitOptions {
    /// Set the evaluation budget.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Set the pose.
    pub fn with_pose_id(mut self, pose_id: impl Into<String>) -> Self {
        self.pose_id = pose_id.into();
        self
    }

    /// Set the fitted keys. Duplicates are dropped and the order normalized.
    pub fn with_keys(mut self, keys: impl IntoIterator<Item = MeasurementKey>) -> Self {
        let mut keys: Vec<_> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();
        self.keys = keys;
        self
    }

    /// Set the measurement configuration.
    pub fn with_measure_config(mut self, measure: MeasureConfig) -> Self {
        self.measure = measure;
        self
    }
}

/// Informational warning attached to a fit result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FitWarning {
    /// The optimizer stopped before meeting its tolerances.
    OptimizerNotConverged(String),
    /// A fitted key could not be measured on the final mesh.
    MeasurementMissing(MeasurementKey),
    /// Score below [`QUALITY_THRESHOLD`].
    QualityBelowThreshold,
    /// The fit raised an error; the result is a stub.
    FitFailed,
}

impl std::fmt::Display for FitWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FitWarning::OptimizerNotConverged(msg) => write!(f, "OPTIMIZER_NOT_CONVERGED:{}", msg),
            FitWarning::MeasurementMissing(key) => write!(f, "MEASUREMENT_MISSING:{}", key),
            FitWarning::QualityBelowThreshold => {
                write!(f, "QUALITY_BELOW_THRESHOLD_{}", QUALITY_THRESHOLD as u32)
            }
            FitWarning::FitFailed => f.write_str("FIT_FAILED"),
        }
    }
}

/// Raw output of a successful fit.
#[derive(Debug, Clone, PartialEq)]
pub struct FitOutcome {
    /// Best shape vector.
    pub beta: Vec<f64>,
    /// Measurements of the mesh at `beta`.
    pub predicted_m: Prediction,
    /// `predicted − target` per fitted key; zero where no target exists.
    pub residuals_m: BTreeMap<MeasurementKey, f64>,
    pub optimizer: NelderMeadOutcome,
    /// Optimizer and measurement warnings, in that order.
    pub warnings: Vec<FitWarning>,
}

/// Measure the fitted keys on the provider's mesh for `beta`.
pub fn predict(
    provider: &dyn MeshProvider,
    beta: &[f64],
    options: &FitOptions,
    case_id: &str,
) -> FitResult<Prediction> {
    let mesh = provider.generate_mesh(beta, &options.pose_id)?;
    let mut prepared = PreparedMesh::new(&mesh.verts);
    if let Some(joint) = mesh.pelvis_joint {
        prepared = prepared.with_pelvis_joint(joint);
    }
    let results = measure_group_prepared(&prepared, case_id, &options.measure);
    Ok(options
        .keys
        .iter()
        .map(|k| (*k, results.get(k).and_then(|r| r.value())))
        .collect())
}

/// Objective value of a prediction.
pub fn loss(targets: &TargetVector, predicted: &Prediction, keys: &[MeasurementKey]) -> f64 {
    keys.iter()
        .filter_map(|k| {
            let t = targets.get(k)?;
            Some(match predicted.get(k).copied().flatten() {
                Some(p) => (p - t).powi(2),
                None => t * t,
            })
        })
        .sum()
}

fn validate_targets(targets: &TargetVector, keys: &[MeasurementKey]) -> FitResult<()> {
    if keys.is_empty() {
        return Err(FitError::invalid_targets("no keys to fit"));
    }
    let mut any = false;
    for key in keys {
        if let Some(t) = targets.get(key) {
            if !t.is_finite() {
                return Err(FitError::invalid_targets(format!("{} target is {}", key, t)));
            }
            any = true;
        }
    }
    if !any {
        return Err(FitError::invalid_targets("no target for any fitted key"));
    }
    Ok(())
}

/// Fit one target vector.
pub fn fit(
    targets: &TargetVector,
    provider: &dyn MeshProvider,
    options: &FitOptions,
) -> FitResult<FitOutcome> {
    validate_targets(targets, &options.keys)?;

    let x0 = vec![0.0; provider.num_betas()];
    let optimizer = minimize(
        |beta| match predict(provider, beta, options, "objective") {
            Ok(pred) => loss(targets, &pred, &options.keys),
            Err(e) => {
                trace!(target: "beta_fit::fit", error = %e, "Provider failed during search");
                PROVIDER_FAILURE_LOSS
            }
        },
        &x0,
        &NelderMeadOptions::with_max_fev(options.max_iter),
    );

    let predicted_m = predict(provider, &optimizer.x, options, "final")?;
    let residuals_m: BTreeMap<_, _> = options
        .keys
        .iter()
        .map(|k| {
            let r = match targets.get(k) {
                Some(t) => predicted_m.get(k).copied().flatten().unwrap_or(0.0) - t,
                None => 0.0,
            };
            (*k, r)
        })
        .collect();

    let mut warnings = Vec::new();
    if !optimizer.success() {
        warnings.push(FitWarning::OptimizerNotConverged(
            optimizer.message().to_string(),
        ));
    }
    for key in &options.keys {
        if predicted_m.get(key).copied().flatten().is_none() {
            warnings.push(FitWarning::MeasurementMissing(*key));
        }
    }

    Ok(FitOutcome {
        beta: optimizer.x.clone(),
        predicted_m,
        residuals_m,
        optimizer,
        warnings,
    })
}

/// Per-prototype fit result, as written to `fit_result.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetaFitResult {
    pub schema_version: String,
    pub prototype_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub beta: Option<Vec<f64>>,
    pub residuals_m: Option<BTreeMap<MeasurementKey, f64>>,
    pub residuals_cm: Option<BTreeMap<MeasurementKey, f64>>,
    pub quality_score: Option<f64>,
    pub quality_bucket: QualityBucket,
    pub dominant_residual_key: Option<MeasurementKey>,
    pub dominant_region: Option<String>,
    pub residual_ranked_keys: Option<Vec<MeasurementKey>>,
    #[serde(default)]
    pub predicted_m: Option<Prediction>,
    pub warnings: Vec<String>,
}

impl BetaFitResult {
    /// Build the result of a successful fit.
    pub fn from_outcome(prototype_id: &str, outcome: &FitOutcome, keys: &[MeasurementKey]) -> Self {
        let score = quality_score(&outcome.residuals_m, keys);
        let ranked = rank_residuals(&outcome.residuals_m, keys);
        let dominant = ranked.first().copied();

        let mut warnings: Vec<String> = outcome.warnings.iter().map(|w| w.to_string()).collect();
        if score < QUALITY_THRESHOLD {
            warnings.push(FitWarning::QualityBelowThreshold.to_string());
        }

        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            prototype_id: prototype_id.to_string(),
            success: true,
            error_type: None,
            error_message: None,
            beta: Some(outcome.beta.clone()),
            residuals_m: Some(
                outcome
                    .residuals_m
                    .iter()
                    .map(|(k, r)| (*k, round_to(*r, 6)))
                    .collect(),
            ),
            residuals_cm: Some(
                outcome
                    .residuals_m
                    .iter()
                    .map(|(k, r)| (*k, round_to(r * 100.0, 4)))
                    .collect(),
            ),
            quality_score: Some(round_to(score, 2)),
            quality_bucket: quality_bucket(score),
            dominant_residual_key: dominant,
            dominant_region: dominant.map(|k| k.region().to_string()),
            residual_ranked_keys: Some(ranked),
            predicted_m: Some(
                outcome
                    .predicted_m
                    .iter()
                    .map(|(k, p)| (*k, p.map(|v| round_to(v, 6))))
                    .collect(),
            ),
            warnings,
        }
    }

    /// Build the stub recorded for a failed fit.
    pub fn failed(prototype_id: &str, error: &FitError) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            prototype_id: prototype_id.to_string(),
            success: false,
            error_type: Some(error.error_type().to_string()),
            error_message: Some(truncate_message(&error.to_string())),
            beta: None,
            residuals_m: None,
            residuals_cm: None,
            quality_score: None,
            quality_bucket: QualityBucket::Low,
            dominant_residual_key: None,
            dominant_region: None,
            residual_ranked_keys: None,
            predicted_m: None,
            warnings: vec![FitWarning::FitFailed.to_string()],
        }
    }

    /// Target for `key`, recovered as `predicted − residual`.
    pub fn target_m(&self, key: MeasurementKey) -> Option<f64> {
        let predicted = self.predicted_m.as_ref()?.get(&key).copied().flatten().unwrap_or(0.0);
        let residual = self.residuals_m.as_ref()?.get(&key).copied().unwrap_or(0.0);
        Some(predicted - residual)
    }

    /// Residual in centimeters for `key`.
    pub fn residual_cm(&self, key: MeasurementKey) -> Option<f64> {
        self.residuals_cm.as_ref()?.get(&key).copied()
    }
}

pub(crate) fn truncate_message(message: &str) -> String {
    message.chars().take(ERROR_MESSAGE_MAX_CHARS).collect()
}

/// Fit one prototype and never fail: errors become a stub result.
pub fn fit_prototype(
    prototype_id: &str,
    targets: &TargetVector,
    provider: &dyn MeshProvider,
    options: &FitOptions,
) -> BetaFitResult {
    fit_or_error(prototype_id, targets, provider, options).0
}

/// Fit one prototype, returning the stub and its error on failure.
///
/// A provider panic is caught and reported as
/// [`FitError::ProviderPanicked`] for this prototype only.
pub(crate) fn fit_or_error(
    prototype_id: &str,
    targets: &TargetVector,
    provider: &dyn MeshProvider,
    options: &FitOptions,
) -> (BetaFitResult, Option<FitError>) {
    let span = info_span!("fit", prototype_id = prototype_id, provider = provider.name());
    let _guard = span.enter();

    let attempt = panic::catch_unwind(AssertUnwindSafe(|| fit(targets, provider, options)))
        .unwrap_or_else(|payload| {
            Err(FitError::provider_panicked(provider.name(), payload.as_ref()))
        });
    let (result, error) = match attempt {
        Ok(outcome) => (
            BetaFitResult::from_outcome(prototype_id, &outcome, &options.keys),
            None,
        ),
        Err(e) => (BetaFitResult::failed(prototype_id, &e), Some(e)),
    };
    log_fit_result(&result);
    (result, error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{GeneratedMesh, ParametricTorsoProvider, ScaledTemplateProvider};
    use approx::assert_relative_eq;
    use body_measure::VertexSet;

    fn dev_targets() -> TargetVector {
        TargetVector::from([
            (MeasurementKey::Bust, 0.85),
            (MeasurementKey::Waist, 0.72),
            (MeasurementKey::Hip, 0.92),
        ])
    }

    struct FailingProvider;

    impl MeshProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }
        fn num_betas(&self) -> usize {
            1
        }
        fn generate_mesh(&self, _beta: &[f64], _pose_id: &str) -> FitResult<GeneratedMesh> {
            Err(FitError::provider("failing", "model weights unavailable"))
        }
    }

    struct PanickingProvider;

    impl MeshProvider for PanickingProvider {
        fn name(&self) -> &str {
            "panicking"
        }
        fn num_betas(&self) -> usize {
            1
        }
        fn generate_mesh(&self, _beta: &[f64], _pose_id: &str) -> FitResult<GeneratedMesh> {
            panic!("template index out of range");
        }
    }

    struct EmptyProvider;

    impl MeshProvider for EmptyProvider {
        fn name(&self) -> &str {
            "empty"
        }
        fn num_betas(&self) -> usize {
            1
        }
        fn generate_mesh(&self, _beta: &[f64], _pose_id: &str) -> FitResult<GeneratedMesh> {
            Ok(GeneratedMesh::from_verts(VertexSet::new()))
        }
    }

    #[test]
    fn test_provider_panic_becomes_failed_result() {
        let (result, error) = fit_or_error(
            "p0003",
            &dev_targets(),
            &PanickingProvider,
            &FitOptions::default(),
        );
        assert!(!result.success);
        assert_eq!(result.prototype_id, "p0003");
        assert_eq!(result.error_type.as_deref(), Some("ProviderPanic"));
        assert!(
            result
                .error_message
                .as_deref()
                .is_some_and(|m| m.contains("template index out of range"))
        );
        assert!(matches!(error, Some(FitError::ProviderPanicked { .. })));
    }

    #[test]
    fn test_loss() {
        let targets = dev_targets();
        let pred = Prediction::from([
            (MeasurementKey::Bust, Some(0.80)),
            (MeasurementKey::Waist, None),
            (MeasurementKey::Hip, Some(0.92)),
        ]);
        let l = loss(&targets, &pred, &MeasurementKey::ALL);
        assert_relative_eq!(l, 0.05f64.powi(2) + 0.72 * 0.72, epsilon = 1e-12);
    }

    #[test]
    fn test_scaled_fit_improves_on_start() {
        let provider = ScaledTemplateProvider::fallback();
        let options = FitOptions::default();
        let targets = dev_targets();
        let start = predict(&provider, &[0.0], &options, "start").unwrap();
        let outcome = fit(&targets, &provider, &options).unwrap();
        assert!(loss(&targets, &outcome.predicted_m, &options.keys) < loss(&targets, &start, &options.keys));
        assert_eq!(outcome.beta.len(), 1);
        assert!(outcome.beta[0] < 0.0);
    }

    #[test]
    fn test_result_fields() {
        let provider = ScaledTemplateProvider::fallback();
        let result = fit_prototype("p0003", &dev_targets(), &provider, &FitOptions::default());
        assert!(result.success);
        assert_eq!(result.schema_version, "beta_fit_v0");
        let residuals_cm = result.residuals_cm.as_ref().unwrap();
        let residuals_m = result.residuals_m.as_ref().unwrap();
        for key in MeasurementKey::ALL {
            assert_relative_eq!(residuals_cm[&key], residuals_m[&key] * 100.0, epsilon = 1e-3);
        }
        let ranked = result.residual_ranked_keys.as_ref().unwrap();
        assert_eq!(ranked.len(), 3);
        assert_eq!(Some(ranked[0]), result.dominant_residual_key);
        assert_eq!(
            result.dominant_region.as_deref(),
            result.dominant_residual_key.map(|k| k.region())
        );
        let score = result.quality_score.unwrap();
        assert!((0.0..=100.0).contains(&score));
        assert_eq!(result.quality_bucket, quality_bucket(score));
        assert_relative_eq!(result.target_m(MeasurementKey::Hip).unwrap(), 0.92, epsilon = 1e-5);
    }

    #[test]
    fn test_fit_is_deterministic() {
        let provider = ParametricTorsoProvider::new(42);
        let options = FitOptions::default().with_max_iter(40);
        let a = fit_prototype("p0000", &dev_targets(), &provider, &options);
        let b = fit_prototype("p0000", &dev_targets(), &provider, &options);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_torso_fit_reaches_good_quality() {
        let provider = ParametricTorsoProvider::new(42);
        let options = FitOptions::default().with_max_iter(300);
        let result = fit_prototype("p0001", &dev_targets(), &provider, &options);
        assert!(result.success);
        assert!(result.quality_score.unwrap() > 85.0, "{:?}", result);
        assert_eq!(result.quality_bucket, QualityBucket::Ok);
    }

    #[test]
    fn test_small_budget_warns_not_converged() {
        let provider = ParametricTorsoProvider::new(42);
        let options = FitOptions::default().with_max_iter(5);
        let result = fit_prototype("p0002", &dev_targets(), &provider, &options);
        assert!(result.success);
        assert!(
            result
                .warnings
                .iter()
                .any(|w| w.starts_with("OPTIMIZER_NOT_CONVERGED:"))
        );
    }

    #[test]
    fn test_failing_provider_gives_stub() {
        let result = fit_prototype("p0009", &dev_targets(), &FailingProvider, &FitOptions::default());
        assert!(!result.success);
        assert_eq!(result.warnings, vec!["FIT_FAILED".to_string()]);
        assert_eq!(result.error_type.as_deref(), Some("ProviderError"));
        assert!(result.error_message.unwrap().contains("model weights"));
        assert!(result.beta.is_none());
        assert_eq!(result.quality_bucket, QualityBucket::Low);
    }

    #[test]
    fn test_missing_measurements_are_penalized_not_fatal() {
        let result = fit_prototype("p0004", &dev_targets(), &EmptyProvider, &FitOptions::default());
        assert!(result.success);
        assert_eq!(result.quality_score, Some(0.0));
        assert!(result.warnings.contains(&"MEASUREMENT_MISSING:HIP_CIRC_M".to_string()));
        assert!(result.warnings.contains(&"QUALITY_BELOW_THRESHOLD_70".to_string()));
        let json = serde_json::to_value(&result).unwrap();
        assert!(json["predicted_m"]["HIP_CIRC_M"].is_null());
    }

    #[test]
    fn test_invalid_targets() {
        let provider = ScaledTemplateProvider::fallback();
        let nan = TargetVector::from([(MeasurementKey::Hip, f64::NAN)]);
        let err = fit(&nan, &provider, &FitOptions::default()).unwrap_err();
        assert!(matches!(err, FitError::InvalidTargets { .. }));

        let empty = TargetVector::new();
        assert!(fit(&empty, &provider, &FitOptions::default()).is_err());
    }

    #[test]
    fn test_subset_of_keys() {
        let provider = ScaledTemplateProvider::fallback();
        let options = FitOptions::default().with_keys([MeasurementKey::Hip, MeasurementKey::Hip]);
        assert_eq!(options.keys, vec![MeasurementKey::Hip]);
        let result = fit_prototype("p0005", &dev_targets(), &provider, &options);
        assert_eq!(result.residuals_m.as_ref().unwrap().len(), 1);
        assert!(result.residual_cm(MeasurementKey::Hip).unwrap().abs() < 0.01);
    }

    #[test]
    fn test_result_round_trips_through_json() {
        let provider = ScaledTemplateProvider::fallback();
        let result = fit_prototype("p0006", &dev_targets(), &provider, &FitOptions::default());
        let text = serde_json::to_string_pretty(&result).unwrap();
        let back: BetaFitResult = serde_json::from_str(&text).unwrap();
        assert_eq!(back, result);
        assert!(!text.contains("error_type"));
    }

    #[test]
    fn test_long_error_messages_are_truncated() {
        let long = "x".repeat(2000);
        let err = FitError::provider("p", long);
        let stub = BetaFitResult::failed("p0007", &err);
        assert_eq!(stub.error_message.unwrap().chars().count(), ERROR_MESSAGE_MAX_CHARS);
    }
}
