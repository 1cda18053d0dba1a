//! Calibration harness over a finished batch run.
//!
//! - [`build_hip_eval_set`]: the prototypes with the largest hip residuals.
//! - [`run_hip_sweep`]: re-measure the eval set under every named hip band.
//! - [`eval_hip_method_ab`]: compare two hip methods, checking that the
//!   second is repeatable.
//! - [`check_determinism`]: byte-compare prototype results of two runs.
//!
//! Meshes are regenerated from each stored beta with the given provider.
//! The recorded target is recovered as `predicted − residual`, so the
//! provider must be the one that produced the run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use body_measure::tracing_ext::OperationTimer;
use body_measure::{
    HipBandId, HipMethod, MeasureConfig, MeasurementKey, MeasurementResult, PreparedMesh,
    measure_group_prepared, measure_prepared,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::atomic_io::{atomic_save_json, read_json};
use crate::batch::{prototype_id, prototype_result_path};
use crate::error::{FitError, FitResult};
use crate::fit::{BetaFitResult, DEFAULT_POSE_ID};
use crate::provider::{GeneratedMesh, MeshProvider};
use crate::report::percentile;

/// Default eval set size.
pub const DEFAULT_EVAL_SET_SIZE: usize = 40;

/// Smallest eval set the sweep and A/B evaluation accept.
pub const MIN_EVAL_SET_SIZE: usize = 3;

/// Default number of prototypes compared by [`check_determinism`].
pub const DEFAULT_SUBSET_SIZE: usize = 10;

pub const EVAL_SET_SCHEMA_VERSION: &str = "eval_set.hip_topN.v0";
pub const SWEEP_SCHEMA_VERSION: &str = "hip_sweep_eval.v0";
pub const AB_SCHEMA_VERSION: &str = "hip_method_ab.v0";
pub const DETERMINISM_SCHEMA_VERSION: &str = "determinism_check_v0";

const SELECTION_RULE: &str = "topN_abs_hip_residual";
const REPEAT_TOLERANCE: f64 = 1e-9;
const UNCHANGED_TOLERANCE: f64 = 1e-6;

/// Directory holding eval sets and calibration reports.
pub fn eval_sets_dir(run_dir: &Path) -> PathBuf {
    run_dir.join("artifacts").join("eval_sets")
}

/// Path of `hip_topN_ids.json`.
pub fn hip_eval_set_path(run_dir: &Path) -> PathBuf {
    eval_sets_dir(run_dir).join("hip_topN_ids.json")
}

fn is_close(a: f64, b: f64, tol: f64) -> bool {
    (a - b).abs() <= tol.max(tol * a.abs().max(b.abs()))
}

// ============================================================================
// Eval set
// ============================================================================

/// Contents of `hip_topN_ids.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HipEvalSet {
    pub schema_version: String,
    pub selection_rule: String,
    #[serde(rename = "N")]
    pub n: usize,
    /// Selected ids, sorted.
    pub prototype_ids: Vec<String>,
}

/// Select the `n` prototypes with the largest absolute hip residual.
///
/// Ties are broken by prototype id. Prototypes without a hip residual or
/// with an unreadable result file are skipped.
pub fn select_hip_eval_set(run_dir: &Path, n: usize) -> FitResult<HipEvalSet> {
    let prototypes_dir = run_dir.join("prototypes");
    let entries =
        std::fs::read_dir(&prototypes_dir).map_err(|e| FitError::io_read(&prototypes_dir, e))?;

    let mut rows: Vec<(f64, String)> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| FitError::io_read(&prototypes_dir, e))?;
        let path = entry.path().join("fit_result.json");
        if !path.is_file() {
            continue;
        }
        match read_json::<BetaFitResult>(&path) {
            Ok(result) => {
                if let Some(hip) = result.residual_cm(MeasurementKey::Hip) {
                    rows.push((hip.abs(), result.prototype_id));
                }
            }
            Err(e) => debug!(target: "beta_fit::calibration", error = %e, "Skipping unreadable result"),
        }
    }

    rows.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    let mut prototype_ids: Vec<String> = rows.into_iter().take(n).map(|(_, pid)| pid).collect();
    prototype_ids.sort();

    Ok(HipEvalSet {
        schema_version: EVAL_SET_SCHEMA_VERSION.to_string(),
        selection_rule: SELECTION_RULE.to_string(),
        n,
        prototype_ids,
    })
}

/// Select the eval set and write `hip_topN_ids.json`.
///
/// Fails with `EvalSetTooSmall` when fewer than three prototypes qualify;
/// nothing is written in that case.
pub fn build_hip_eval_set(run_dir: &Path, n: usize) -> FitResult<HipEvalSet> {
    let eval_set = select_hip_eval_set(run_dir, n)?;
    if eval_set.prototype_ids.len() < MIN_EVAL_SET_SIZE {
        return Err(FitError::EvalSetTooSmall {
            found: eval_set.prototype_ids.len(),
            required: MIN_EVAL_SET_SIZE,
        });
    }
    atomic_save_json(&hip_eval_set_path(run_dir), &eval_set)?;
    info!(
        target: "beta_fit::calibration",
        size = eval_set.prototype_ids.len(),
        "Hip eval set written"
    );
    Ok(eval_set)
}

/// Load `hip_topN_ids.json`, requiring at least three ids.
pub fn load_hip_eval_set(run_dir: &Path) -> FitResult<HipEvalSet> {
    let eval_set: HipEvalSet = read_json(&hip_eval_set_path(run_dir))?;
    if eval_set.prototype_ids.len() < MIN_EVAL_SET_SIZE {
        return Err(FitError::EvalSetTooSmall {
            found: eval_set.prototype_ids.len(),
            required: MIN_EVAL_SET_SIZE,
        });
    }
    Ok(eval_set)
}

// ============================================================================
// Shared evaluation
// ============================================================================

/// A stored prototype with its regenerated mesh.
struct EvalPrototype {
    result: BetaFitResult,
    target_hip_m: f64,
    mesh: Option<PreparedMesh>,
}

fn load_eval_prototypes(
    run_dir: &Path,
    prototype_ids: &[String],
    provider: &dyn MeshProvider,
) -> FitResult<Vec<EvalPrototype>> {
    let mut prototypes = Vec::with_capacity(prototype_ids.len());
    for pid in prototype_ids {
        let path = prototype_result_path(run_dir, pid);
        if !path.is_file() {
            warn!(target: "beta_fit::calibration", prototype_id = pid.as_str(), "Result missing, skipped");
            continue;
        }
        let result: BetaFitResult = read_json(&path)?;
        let beta = result.beta.clone().unwrap_or_else(|| vec![0.0]);
        let target_hip_m = result.target_m(MeasurementKey::Hip).unwrap_or(0.0);

        let mesh = match provider.generate_mesh(&beta, DEFAULT_POSE_ID) {
            Ok(generated) => Some(prepare(&generated)),
            Err(e) => {
                warn!(
                    target: "beta_fit::calibration",
                    prototype_id = pid.as_str(),
                    error = %e,
                    "Mesh regeneration failed"
                );
                None
            }
        };
        prototypes.push(EvalPrototype {
            result,
            target_hip_m,
            mesh,
        });
    }
    Ok(prototypes)
}

fn prepare(generated: &GeneratedMesh) -> PreparedMesh {
    let mesh = PreparedMesh::new(&generated.verts);
    match generated.pelvis_joint {
        Some(joint) => mesh.with_pelvis_joint(joint),
        None => mesh,
    }
}

/// Hip residuals and the stored waist/bust residuals over an eval set.
#[derive(Debug, Default, Clone)]
struct HipSamples {
    hip_cm: Vec<f64>,
    waist_cm: Vec<f64>,
    bust_cm: Vec<f64>,
    quality: Vec<f64>,
    null_count: usize,
    warnings_count: usize,
}

impl HipSamples {
    fn record(&mut self, prototype: &EvalPrototype, hip: Option<&MeasurementResult>) {
        match hip.and_then(|r| r.value()) {
            Some(measured) if measured.is_finite() => {
                self.hip_cm.push((measured - prototype.target_hip_m) * 100.0);
            }
            _ => self.null_count += 1,
        }
        if let Some(r) = hip {
            self.warnings_count += r.warnings().len();
        }

        let stored = &prototype.result;
        self.waist_cm
            .push(stored.residual_cm(MeasurementKey::Waist).unwrap_or(0.0));
        self.bust_cm
            .push(stored.residual_cm(MeasurementKey::Bust).unwrap_or(0.0));
        if let Some(q) = stored.quality_score {
            self.quality.push(q);
        }
    }

    fn max_abs_hip(&self) -> Option<f64> {
        self.hip_cm.iter().map(|v| v.abs()).reduce(f64::max)
    }
}

// ============================================================================
// Hip band sweep
// ============================================================================

/// Sweep statistics for one hip band config. Empty samples give `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfigStats {
    #[serde(rename = "HIP_p50_cm")]
    pub hip_p50_cm: Option<f64>,
    #[serde(rename = "HIP_p90_cm")]
    pub hip_p90_cm: Option<f64>,
    /// Largest absolute hip residual.
    #[serde(rename = "HIP_max_cm")]
    pub hip_max_cm: Option<f64>,
    #[serde(rename = "WAIST_p90_cm")]
    pub waist_p90_cm: Option<f64>,
    #[serde(rename = "BUST_p90_cm")]
    pub bust_p90_cm: Option<f64>,
    pub quality_p90: Option<f64>,
    pub count: usize,
    pub null_count: usize,
    pub warnings_count: usize,
}

impl SweepConfigStats {
    fn from_samples(s: &HipSamples) -> Self {
        Self {
            hip_p50_cm: percentile(&s.hip_cm, 50.0),
            hip_p90_cm: percentile(&s.hip_cm, 90.0),
            hip_max_cm: s.max_abs_hip(),
            waist_p90_cm: percentile(&s.waist_cm, 90.0),
            bust_p90_cm: percentile(&s.bust_cm, 90.0),
            quality_p90: percentile(&s.quality, 90.0),
            count: s.hip_cm.len(),
            null_count: s.null_count,
            warnings_count: s.warnings_count,
        }
    }
}

/// Contents of `hip_sweep_eval_report.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HipSweepReport {
    pub schema_version: String,
    pub eval_set_size: usize,
    pub configs: BTreeMap<HipBandId, SweepConfigStats>,
}

impl HipSweepReport {
    /// Config with the smallest absolute hip p90, if any config has one.
    pub fn best_config(&self) -> Option<(HipBandId, f64)> {
        self.configs
            .iter()
            .filter_map(|(id, stats)| stats.hip_p90_cm.map(|p90| (*id, p90)))
            .min_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
    }
}

/// Build the hip eval set and re-measure it under every named hip band.
///
/// Writes `hip_topN_ids.json` and `hip_sweep_eval_report.json` under
/// `artifacts/eval_sets/`.
pub fn run_hip_sweep(
    run_dir: &Path,
    n: usize,
    provider: &dyn MeshProvider,
) -> FitResult<HipSweepReport> {
    let eval_set = build_hip_eval_set(run_dir, n)?;
    let _timer = OperationTimer::with_items("hip_sweep", eval_set.prototype_ids.len());
    let prototypes = load_eval_prototypes(run_dir, &eval_set.prototype_ids, provider)?;

    let mut configs = BTreeMap::new();
    for id in HipBandId::ALL {
        let config = MeasureConfig::default().with_hip_band(id);
        let mut samples = HipSamples::default();
        for prototype in &prototypes {
            let hip = prototype
                .mesh
                .as_ref()
                .map(|mesh| measure_prepared(mesh, MeasurementKey::Hip, &config));
            samples.record(prototype, hip.as_ref());
        }
        let stats = SweepConfigStats::from_samples(&samples);
        debug!(
            target: "beta_fit::calibration",
            config = id.as_str(),
            hip_p90_cm = stats.hip_p90_cm.unwrap_or(f64::NAN),
            null_count = stats.null_count,
            "Hip config evaluated"
        );
        configs.insert(id, stats);
    }

    let report = HipSweepReport {
        schema_version: SWEEP_SCHEMA_VERSION.to_string(),
        eval_set_size: eval_set.prototype_ids.len(),
        configs,
    };
    atomic_save_json(
        &eval_sets_dir(run_dir).join("hip_sweep_eval_report.json"),
        &report,
    )?;

    if let Some((id, p90)) = report.best_config() {
        info!(target: "beta_fit::calibration", best = id.as_str(), hip_p90_cm = p90, "Hip sweep complete");
    }
    Ok(report)
}

// ============================================================================
// Hip method A/B
// ============================================================================

/// Statistics for one hip method. Empty samples give `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodStats {
    #[serde(rename = "HIP_p50_cm")]
    pub hip_p50_cm: Option<f64>,
    #[serde(rename = "HIP_p90_cm")]
    pub hip_p90_cm: Option<f64>,
    #[serde(rename = "HIP_max_abs_cm")]
    pub hip_max_abs_cm: Option<f64>,
    #[serde(rename = "WAIST_p90_cm")]
    pub waist_p90_cm: Option<f64>,
    #[serde(rename = "BUST_p90_cm")]
    pub bust_p90_cm: Option<f64>,
    pub quality_p90: Option<f64>,
    pub count: usize,
    pub null_count: usize,
    pub warnings_count: usize,
}

impl MethodStats {
    fn from_samples(s: &HipSamples) -> Self {
        Self {
            hip_p50_cm: percentile(&s.hip_cm, 50.0),
            hip_p90_cm: percentile(&s.hip_cm, 90.0),
            hip_max_abs_cm: s.max_abs_hip(),
            waist_p90_cm: percentile(&s.waist_cm, 90.0),
            bust_p90_cm: percentile(&s.bust_cm, 90.0),
            quality_p90: percentile(&s.quality, 90.0),
            count: s.hip_cm.len(),
            null_count: s.null_count,
            warnings_count: s.warnings_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalSetRef {
    #[serde(rename = "N")]
    pub n: usize,
    pub prototype_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepeatCheck {
    pub method_b_twice_identical: bool,
}

/// Contents of `hip_method_ab_report.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HipMethodAbReport {
    pub schema_version: String,
    pub eval_set: EvalSetRef,
    pub method_a: HipMethod,
    pub method_b: HipMethod,
    pub method_a_results: MethodStats,
    pub method_b_results: MethodStats,
    /// `p90(B) − p90(A)` of the hip residuals.
    pub delta_p90_cm: Option<f64>,
    /// `|p90(B)| − |p90(A)|`; negative means B is closer to zero.
    pub delta_abs_p90_cm: Option<f64>,
    pub waist_bust_unchanged: bool,
    pub determinism_check: RepeatCheck,
}

fn measure_method(prototypes: &[EvalPrototype], method: HipMethod) -> HipSamples {
    let config = MeasureConfig::default().with_hip_method(method);
    let mut samples = HipSamples::default();
    for prototype in prototypes {
        let hip = prototype.mesh.as_ref().and_then(|mesh| {
            measure_group_prepared(mesh, &prototype.result.prototype_id, &config)
                .remove(&MeasurementKey::Hip)
        });
        samples.record(prototype, hip.as_ref());
    }
    samples
}

/// Compare two hip methods on the stored eval set.
///
/// Method B is run twice; the report records whether both runs agree
/// within `1e-9`. Writes `hip_method_ab_report.json`.
pub fn eval_hip_method_ab(
    run_dir: &Path,
    method_a: HipMethod,
    method_b: HipMethod,
    provider: &dyn MeshProvider,
) -> FitResult<HipMethodAbReport> {
    let eval_set = load_hip_eval_set(run_dir)?;
    let _timer = OperationTimer::with_items("hip_method_ab", eval_set.prototype_ids.len());
    let prototypes = load_eval_prototypes(run_dir, &eval_set.prototype_ids, provider)?;

    let a = measure_method(&prototypes, method_a);
    let b = measure_method(&prototypes, method_b);
    let b_again = measure_method(&prototypes, method_b);

    let repeatable = b.hip_cm.len() == b_again.hip_cm.len()
        && b.hip_cm
            .iter()
            .zip(&b_again.hip_cm)
            .all(|(x, y)| is_close(*x, *y, REPEAT_TOLERANCE));

    let a_stats = MethodStats::from_samples(&a);
    let b_stats = MethodStats::from_samples(&b);

    let (delta_p90_cm, delta_abs_p90_cm) = match (a_stats.hip_p90_cm, b_stats.hip_p90_cm) {
        (Some(pa), Some(pb)) => (Some(pb - pa), Some(pb.abs() - pa.abs())),
        _ => (None, None),
    };

    let unchanged = |x: Option<f64>, y: Option<f64>| {
        is_close(x.unwrap_or(0.0), y.unwrap_or(0.0), UNCHANGED_TOLERANCE)
    };
    let waist_bust_unchanged = unchanged(a_stats.waist_p90_cm, b_stats.waist_p90_cm)
        && unchanged(a_stats.bust_p90_cm, b_stats.bust_p90_cm);

    let report = HipMethodAbReport {
        schema_version: AB_SCHEMA_VERSION.to_string(),
        eval_set: EvalSetRef {
            n: eval_set.n,
            prototype_ids: eval_set.prototype_ids.clone(),
        },
        method_a,
        method_b,
        method_a_results: a_stats,
        method_b_results: b_stats,
        delta_p90_cm,
        delta_abs_p90_cm,
        waist_bust_unchanged,
        determinism_check: RepeatCheck {
            method_b_twice_identical: repeatable,
        },
    };
    atomic_save_json(
        &eval_sets_dir(run_dir).join("hip_method_ab_report.json"),
        &report,
    )?;

    if !repeatable {
        warn!(target: "beta_fit::calibration", method = method_b.as_str(), "Hip method not repeatable");
    }
    info!(
        target: "beta_fit::calibration",
        method_a = method_a.as_str(),
        method_b = method_b.as_str(),
        delta_p90_cm = delta_p90_cm.unwrap_or(f64::NAN),
        "Hip method A/B complete"
    );
    Ok(report)
}

// ============================================================================
// Run-to-run determinism
// ============================================================================

/// Why a prototype failed the determinism check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MismatchReason {
    #[serde(rename = "missing_in_run_1")]
    MissingInRun1,
    #[serde(rename = "missing_in_run_2")]
    MissingInRun2,
    #[serde(rename = "differs")]
    Differs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
    pub prototype_id: String,
    pub reason: MismatchReason,
    /// Byte offset of the first difference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_difference: Option<usize>,
}

/// Contents of `determinism_check.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterminismReport {
    pub schema_version: String,
    pub run_dir_1: String,
    pub run_dir_2: String,
    pub subset_ids: Vec<String>,
    pub bytes_match: bool,
    pub mismatches: Vec<Mismatch>,
}

fn read_if_present(path: &Path) -> FitResult<Option<Vec<u8>>> {
    if !path.is_file() {
        return Ok(None);
    }
    std::fs::read(path)
        .map(Some)
        .map_err(|e| FitError::io_read(path, e))
}

/// Compare `fit_result.json` bytes for `p0000..p{subset_size-1}` of two
/// runs. Writes `determinism_check.json` into the first run directory.
pub fn check_determinism(
    run_dir_1: &Path,
    run_dir_2: &Path,
    subset_size: usize,
) -> FitResult<DeterminismReport> {
    let subset_ids: Vec<String> = (0..subset_size).map(prototype_id).collect();
    let mut mismatches = Vec::new();

    for pid in &subset_ids {
        let first = read_if_present(&prototype_result_path(run_dir_1, pid))?;
        let second = read_if_present(&prototype_result_path(run_dir_2, pid))?;
        let mismatch = match (first, second) {
            (None, _) => Some((MismatchReason::MissingInRun1, None)),
            (_, None) => Some((MismatchReason::MissingInRun2, None)),
            (Some(a), Some(b)) if a != b => {
                let offset = a
                    .iter()
                    .zip(&b)
                    .position(|(x, y)| x != y)
                    .unwrap_or(a.len().min(b.len()));
                Some((MismatchReason::Differs, Some(offset)))
            }
            _ => None,
        };
        if let Some((reason, first_difference)) = mismatch {
            mismatches.push(Mismatch {
                prototype_id: pid.clone(),
                reason,
                first_difference,
            });
        }
    }

    let report = DeterminismReport {
        schema_version: DETERMINISM_SCHEMA_VERSION.to_string(),
        run_dir_1: run_dir_1.display().to_string(),
        run_dir_2: run_dir_2.display().to_string(),
        subset_ids,
        bytes_match: mismatches.is_empty(),
        mismatches,
    };
    atomic_save_json(&run_dir_1.join("determinism_check.json"), &report)?;

    info!(
        target: "beta_fit::calibration",
        subset = subset_size,
        mismatches = report.mismatches.len(),
        bytes_match = report.bytes_match,
        "Determinism check complete"
    );
    Ok(report)
}
