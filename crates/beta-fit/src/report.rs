//! Batch summary statistics and human-readable reports.
//!
//! Everything here is a pure function of the per-prototype results, so two
//! runs with the same inputs produce byte-identical `summary.json`.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use body_measure::MeasurementKey;
use serde::{Deserialize, Serialize};

use crate::fit::{BetaFitResult, SCHEMA_VERSION};
use crate::quality::{QUALITY_THRESHOLD, QualityBucket, round_to};

/// Schema tag of `residual_report.json`.
pub const RESIDUAL_REPORT_SCHEMA_VERSION: &str = "beta_fit_residual_report_v0";

/// Optimizer name recorded in the summary.
pub const METHOD_NAME: &str = "Nelder-Mead";

const KPI_WORST_COUNT: usize = 10;
const REPORT_TOP_COUNT: usize = 20;
const UNLOCK_NOTE: &str = "facts-only; gating not enforced";

/// Percentile `q` (0..=100) with linear interpolation between closest ranks.
///
/// Returns `None` for an empty slice. NaN values sort last.
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

fn max_of(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}

fn min_of(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::min)
}

/// Residual distribution for one key, in centimeters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResidualStats {
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub max: f64,
}

impl ResidualStats {
    /// Stats over signed residuals; all zero when empty.
    pub fn from_values(values: &[f64]) -> Self {
        Self {
            p50: percentile(values, 50.0).unwrap_or(0.0),
            p90: percentile(values, 90.0).unwrap_or(0.0),
            p95: percentile(values, 95.0).unwrap_or(0.0),
            max: max_of(values).unwrap_or(0.0),
        }
    }
}

/// Quality score distribution.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QualityStats {
    pub p50: f64,
    pub p90: f64,
    pub min: f64,
}

impl QualityStats {
    pub fn from_values(values: &[f64]) -> Self {
        Self {
            p50: percentile(values, 50.0).unwrap_or(0.0),
            p90: percentile(values, 90.0).unwrap_or(0.0),
            min: min_of(values).unwrap_or(0.0),
        }
    }
}

/// Count of successful fits per quality bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BucketCounts {
    #[serde(rename = "OK")]
    pub ok: usize,
    #[serde(rename = "LOW")]
    pub low: usize,
}

/// Failed fits.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FailureSummary {
    pub count: usize,
    /// Distinct error types, sorted.
    pub top_error_types: Vec<String>,
}

/// Informational unlock signal. Nothing is gated on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnlockSignal {
    pub threshold_score: f64,
    pub fraction_above_threshold: f64,
    pub note: String,
}

/// Contents of `summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub schema_version: String,
    pub k: usize,
    pub seed: u64,
    pub max_iter: usize,
    pub method: String,
    pub mesh_provider: String,
    pub keyset: Vec<MeasurementKey>,
    pub residual_cm_stats: BTreeMap<MeasurementKey, ResidualStats>,
    pub quality_score_stats: QualityStats,
    pub bucket_counts: BucketCounts,
    pub dominant_pattern_counts: BTreeMap<String, usize>,
    pub failures: FailureSummary,
    pub proposed_unlock_signal: UnlockSignal,
}

/// Run parameters recorded in the summary.
#[derive(Debug, Clone)]
pub struct RunInfo<'a> {
    pub seed: u64,
    pub max_iter: usize,
    pub mesh_provider: &'a str,
    pub keys: &'a [MeasurementKey],
}

fn successful(results: &[BetaFitResult]) -> impl Iterator<Item = &BetaFitResult> {
    results.iter().filter(|r| r.success)
}

fn residual_values(results: &[BetaFitResult], key: MeasurementKey) -> Vec<f64> {
    successful(results).filter_map(|r| r.residual_cm(key)).collect()
}

fn failure_summary(results: &[BetaFitResult]) -> FailureSummary {
    let mut types: Vec<String> = results
        .iter()
        .filter(|r| !r.success)
        .filter_map(|r| r.error_type.clone())
        .collect();
    types.sort();
    types.dedup();
    FailureSummary {
        count: results.iter().filter(|r| !r.success).count(),
        top_error_types: types,
    }
}

fn dominant_counts(results: &[BetaFitResult]) -> BTreeMap<String, usize> {
    let mut counts: BTreeMap<String, usize> = MeasurementKey::ALL
        .iter()
        .map(|k| (k.region().to_string(), 0))
        .collect();
    for region in successful(results).filter_map(|r| r.dominant_region.as_ref()) {
        *counts.entry(region.clone()).or_insert(0) += 1;
    }
    counts
}

impl BatchSummary {
    /// Summarize a batch. `k` is the number of results, including failures.
    pub fn from_results(results: &[BetaFitResult], info: &RunInfo<'_>) -> Self {
        let residual_cm_stats = info
            .keys
            .iter()
            .map(|&key| (key, ResidualStats::from_values(&residual_values(results, key))))
            .collect();

        let scores: Vec<f64> = successful(results).filter_map(|r| r.quality_score).collect();

        let mut bucket_counts = BucketCounts::default();
        for r in successful(results) {
            match r.quality_bucket {
                QualityBucket::Ok => bucket_counts.ok += 1,
                QualityBucket::Low => bucket_counts.low += 1,
            }
        }

        let fraction_above = if results.is_empty() {
            0.0
        } else {
            bucket_counts.ok as f64 / results.len() as f64
        };

        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            k: results.len(),
            seed: info.seed,
            max_iter: info.max_iter,
            method: METHOD_NAME.to_string(),
            mesh_provider: info.mesh_provider.to_string(),
            keyset: info.keys.to_vec(),
            residual_cm_stats,
            quality_score_stats: QualityStats::from_values(&scores),
            bucket_counts,
            dominant_pattern_counts: dominant_counts(results),
            failures: failure_summary(results),
            proposed_unlock_signal: UnlockSignal {
                threshold_score: QUALITY_THRESHOLD,
                fraction_above_threshold: round_to(fraction_above, 4),
                note: UNLOCK_NOTE.to_string(),
            },
        }
    }
}

/// One entry of a best/worst list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedPrototype {
    pub prototype_id: String,
    pub quality_score: Option<f64>,
    pub residuals_cm: Option<BTreeMap<MeasurementKey, f64>>,
    pub dominant_residual_key: Option<MeasurementKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
}

impl RankedPrototype {
    fn from_result(result: &BetaFitResult, with_warnings: bool) -> Self {
        Self {
            prototype_id: result.prototype_id.clone(),
            quality_score: result.quality_score,
            residuals_cm: result.residuals_cm.clone(),
            dominant_residual_key: result.dominant_residual_key,
            warnings: with_warnings.then(|| result.warnings.clone()),
        }
    }
}

/// Contents of `residual_report.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidualReport {
    pub schema_version: String,
    pub top_worst: Vec<RankedPrototype>,
    pub top_best: Vec<RankedPrototype>,
    pub residual_distribution: BTreeMap<MeasurementKey, ResidualStats>,
    pub quality_score_distribution: QualityStats,
    pub pattern_counts: BTreeMap<String, usize>,
    /// Residual sign per key in key order (`+`, `-`, `0`), joined by commas.
    pub sign_pattern_histogram: BTreeMap<String, usize>,
    pub failure_summary: FailureSummary,
}

/// Successful results by ascending quality score. The sort is stable, so
/// ties keep prototype order.
fn by_score_ascending(results: &[BetaFitResult]) -> Vec<&BetaFitResult> {
    let mut sorted: Vec<&BetaFitResult> = successful(results).collect();
    sorted.sort_by(|a, b| {
        a.quality_score
            .unwrap_or(0.0)
            .total_cmp(&b.quality_score.unwrap_or(0.0))
    });
    sorted
}

fn by_score_descending(results: &[BetaFitResult]) -> Vec<&BetaFitResult> {
    let mut sorted: Vec<&BetaFitResult> = successful(results).collect();
    sorted.sort_by(|a, b| {
        b.quality_score
            .unwrap_or(0.0)
            .total_cmp(&a.quality_score.unwrap_or(0.0))
    });
    sorted
}

fn sign_pattern(result: &BetaFitResult, keys: &[MeasurementKey]) -> String {
    keys.iter()
        .map(|&k| {
            let v = result.residual_cm(k).unwrap_or(0.0);
            if v > 0.0 {
                "+"
            } else if v < 0.0 {
                "-"
            } else {
                "0"
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

impl ResidualReport {
    pub fn from_results(results: &[BetaFitResult], summary: &BatchSummary) -> Self {
        let mut sign_pattern_histogram = BTreeMap::new();
        for r in successful(results) {
            *sign_pattern_histogram
                .entry(sign_pattern(r, &summary.keyset))
                .or_insert(0) += 1;
        }

        Self {
            schema_version: RESIDUAL_REPORT_SCHEMA_VERSION.to_string(),
            top_worst: by_score_ascending(results)
                .into_iter()
                .take(REPORT_TOP_COUNT)
                .map(|r| RankedPrototype::from_result(r, true))
                .collect(),
            top_best: by_score_descending(results)
                .into_iter()
                .take(REPORT_TOP_COUNT)
                .map(|r| RankedPrototype::from_result(r, false))
                .collect(),
            residual_distribution: summary.residual_cm_stats.clone(),
            quality_score_distribution: summary.quality_score_stats,
            pattern_counts: summary.dominant_pattern_counts.clone(),
            sign_pattern_histogram,
            failure_summary: summary.failures.clone(),
        }
    }
}

fn fmt_opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn fmt_residuals(residuals: Option<&BTreeMap<MeasurementKey, f64>>) -> String {
    match residuals {
        Some(map) => map
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" "),
        None => "-".to_string(),
    }
}

/// Render `KPI.md`.
pub fn render_kpi(summary: &BatchSummary, results: &[BetaFitResult]) -> String {
    let q = &summary.quality_score_stats;
    let mut out = String::new();
    let _ = writeln!(out, "# KPI");
    let _ = writeln!(out);
    let _ = writeln!(out, "## Shape fit ({})", summary.schema_version);
    let _ = writeln!(out, "- k: {}", summary.k);
    let _ = writeln!(out, "- mesh_provider: {}", summary.mesh_provider);
    let _ = writeln!(out, "- failures: {}", summary.failures.count);
    let _ = writeln!(
        out,
        "- quality_score p50/p90/min: {:.2} / {:.2} / {:.2}",
        q.p50, q.p90, q.min
    );
    let _ = writeln!(
        out,
        "- bucket OK/LOW: {} / {}",
        summary.bucket_counts.ok, summary.bucket_counts.low
    );
    let _ = writeln!(out, "- residual_cm_stats:");
    for (key, s) in &summary.residual_cm_stats {
        let _ = writeln!(
            out,
            "  - {}: p50={:.4} p90={:.4} max={:.4}",
            key, s.p50, s.p90, s.max
        );
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "## Top-{} worst prototypes (by quality_score)", KPI_WORST_COUNT);
    for r in by_score_ascending(results).into_iter().take(KPI_WORST_COUNT) {
        let _ = writeln!(
            out,
            "- {} score={} dominant={}",
            r.prototype_id,
            fmt_opt(r.quality_score),
            fmt_opt(r.dominant_residual_key)
        );
    }
    out
}

/// Render `KPI_DIFF.md`. No baseline comparison is made.
pub fn render_kpi_diff() -> String {
    "# KPI_DIFF\n\nNO_BASELINE\n".to_string()
}

/// Render `RESIDUAL_REPORT.md`.
pub fn render_residual_report(report: &ResidualReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# RESIDUAL REPORT");
    let _ = writeln!(out);
    let _ = writeln!(out, "## Top-{} worst (by quality_score)", REPORT_TOP_COUNT);
    let _ = writeln!(
        out,
        "| prototype_id | quality_score | residuals_cm | dominant_residual_key |"
    );
    let _ = writeln!(
        out,
        "|--------------|---------------|--------------|-----------------------|"
    );
    for r in &report.top_worst {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} |",
            r.prototype_id,
            fmt_opt(r.quality_score),
            fmt_residuals(r.residuals_cm.as_ref()),
            fmt_opt(r.dominant_residual_key)
        );
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "## Top-{} best", REPORT_TOP_COUNT);
    let _ = writeln!(out, "| prototype_id | quality_score | dominant_residual_key |");
    let _ = writeln!(out, "|--------------|---------------|-----------------------|");
    for r in &report.top_best {
        let _ = writeln!(
            out,
            "| {} | {} | {} |",
            r.prototype_id,
            fmt_opt(r.quality_score),
            fmt_opt(r.dominant_residual_key)
        );
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "## Residual distribution (cm)");
    for (key, s) in &report.residual_distribution {
        let _ = writeln!(
            out,
            "- {}: p50={:.4} p90={:.4} p95={:.4} max={:.4}",
            key, s.p50, s.p90, s.p95, s.max
        );
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "## Pattern counts (dominant region)");
    for (region, count) in &report.pattern_counts {
        let _ = writeln!(out, "- {}: {}", region, count);
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "## Sign pattern histogram (BUST,WAIST,HIP)");
    let mut patterns: Vec<(&String, &usize)> = report.sign_pattern_histogram.iter().collect();
    patterns.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    for (pattern, count) in patterns {
        let _ = writeln!(out, "- {}: {}", pattern, count);
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "## Failure summary");
    let _ = writeln!(out, "- count: {}", report.failure_summary.count);
    let _ = writeln!(
        out,
        "- top_error_types: [{}]",
        report.failure_summary.top_error_types.join(", ")
    );
    out
}
