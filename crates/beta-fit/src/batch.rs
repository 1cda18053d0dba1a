//! Fluent builder for batch fitting runs.
//!
//! A batch fits one prototype per target vector and writes a run directory:
//!
//! ```text
//! <out_dir>/
//!   prototypes/p0000/fit_result.json
//!   artifacts/diagnostics/fit_error_<id>.json   (failed fits only)
//!   summary.json  residual_report.json
//!   KPI.md  KPI_DIFF.md  RESIDUAL_REPORT.md
//!   SKIPPED_RESUME.jsonl                        (resume only)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use beta_fit::{BatchBuilder, ScaledTemplateProvider, dev_targets};
//!
//! let report = BatchBuilder::new("runs/dev", Box::new(ScaledTemplateProvider::fallback()))
//!     .targets(dev_targets(10))
//!     .seed(42)
//!     .resume(true)
//!     .build()
//!     .unwrap();
//!
//! println!("fitted {} prototypes", report.results.len());
//! ```

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use body_measure::tracing_ext::OperationTimer;
use serde::Serialize;
use tracing::{info, info_span, warn};

use crate::atomic_io::{atomic_save_json, atomic_save_text, ensure_dir, read_json};
use crate::error::{FitError, FitResult};
use crate::fit::{BetaFitResult, FitOptions, TargetVector, fit_or_error, truncate_message};
use crate::progress::{Progress, ProgressCallback};
use crate::provider::MeshProvider;
use crate::report::{
    BatchSummary, ResidualReport, RunInfo, render_kpi, render_kpi_diff, render_residual_report,
};

/// Reason recorded for prototypes reused on resume.
pub const RESUME_SKIP_REASON: &str = "resume_skip";

/// Path of a prototype's result file inside a run directory.
pub fn prototype_result_path(run_dir: &Path, prototype_id: &str) -> PathBuf {
    run_dir
        .join("prototypes")
        .join(prototype_id)
        .join("fit_result.json")
}

/// Path of a failed prototype's diagnostics file.
pub fn diagnostics_path(run_dir: &Path, prototype_id: &str) -> PathBuf {
    run_dir
        .join("artifacts")
        .join("diagnostics")
        .join(format!("fit_error_{}.json", prototype_id))
}

/// Prototype id for the `index`-th target.
pub fn prototype_id(index: usize) -> String {
    format!("p{:04}", index)
}

/// Why a batch ended before fitting every target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The time budget ran out between prototypes.
    TimeBudget,
    /// The progress callback asked to stop.
    Cancelled,
}

/// Outcome of a batch run.
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// Run directory.
    pub out_dir: PathBuf,
    /// Results in prototype order, reused ones included.
    pub results: Vec<BetaFitResult>,
    /// Summary as written to `summary.json`.
    pub summary: BatchSummary,
    /// Prototypes reused from an earlier run.
    pub skipped_resume: Vec<String>,
    /// Set when the batch stopped early.
    pub stopped: Option<StopReason>,
    /// Prototypes whose `fit_result.json` could not be written.
    pub unsaved: Vec<String>,
    /// Wall time of the batch. Never written to the summary.
    pub elapsed: Duration,
}

impl BatchReport {
    /// Number of failed fits.
    pub fn failure_count(&self) -> usize {
        self.results.iter().filter(|r| !r.success).count()
    }
}

#[derive(Serialize)]
struct SkipRecord<'a> {
    prototype_id: &'a str,
    reason: &'a str,
}

#[derive(Serialize)]
struct FitDiagnostics {
    prototype_id: String,
    error_type: String,
    error_code: String,
    error_message: String,
    /// Source chain below the top-level message.
    causes: Vec<String>,
}

impl FitDiagnostics {
    fn new(prototype_id: &str, error: &FitError) -> Self {
        let mut causes = Vec::new();
        let mut source = std::error::Error::source(error);
        while let Some(cause) = source {
            causes.push(truncate_message(&cause.to_string()));
            source = cause.source();
        }
        Self {
            prototype_id: prototype_id.to_string(),
            error_type: error.error_type().to_string(),
            error_code: error.code().to_string(),
            error_message: truncate_message(&error.to_string()),
            causes,
        }
    }

    /// Record a second failure for the same prototype.
    fn also(mut self, error: &FitError) -> Self {
        self.causes
            .push(format!("{}: {}", error.code(), truncate_message(&error.to_string())));
        self
    }
}

/// Fluent builder for a batch fitting run.
///
/// Prototypes are fitted sequentially in target order. A failing fit, a
/// panicking provider or an unwritable result file never aborts the batch;
/// only errors on the run directory and its batch-level files do.
pub struct BatchBuilder {
    out_dir: PathBuf,
    provider: Box<dyn MeshProvider>,
    targets: Vec<TargetVector>,
    options: FitOptions,
    seed: u64,
    resume: bool,
    time_budget: Option<Duration>,
    batch_size: usize,
    progress_callback: Option<ProgressCallback>,
}

impl BatchBuilder {
    /// Create a builder writing to `out_dir` with the given provider.
    pub fn new(out_dir: impl Into<PathBuf>, provider: Box<dyn MeshProvider>) -> Self {
        Self {
            out_dir: out_dir.into(),
            provider,
            targets: Vec::new(),
            options: FitOptions::default(),
            seed: 42,
            resume: false,
            time_budget: None,
            batch_size: 1,
            progress_callback: None,
        }
    }

    /// Target vectors, one prototype each.
    pub fn targets(mut self, targets: Vec<TargetVector>) -> Self {
        self.targets = targets;
        self
    }

    /// Per-prototype fit options.
    pub fn options(mut self, options: FitOptions) -> Self {
        self.options = options;
        self
    }

    /// Seed recorded in the summary.
    ///
    /// The seed reaches the fits through the provider it configured.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Reuse parseable `fit_result.json` files from an earlier run.
    pub fn resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    /// Stop between prototypes once this much time has passed.
    /// A zero duration means no limit.
    pub fn time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = (!budget.is_zero()).then_some(budget);
        self
    }

    /// Accepted for compatibility; prototypes are always fitted one at a time.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set a progress callback, called after each prototype.
    ///
    /// Returning `false` stops the batch after the current prototype; the
    /// summary and reports are still written.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    fn try_resume(&self, path: &Path, pid: &str) -> Option<BetaFitResult> {
        if !self.resume || !path.exists() {
            return None;
        }
        match read_json::<BetaFitResult>(path) {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(
                    target: "beta_fit::batch",
                    prototype_id = pid,
                    error = %e,
                    "Existing result unreadable, refitting"
                );
                None
            }
        }
    }

    /// Run the batch and write every artifact.
    /// Write a fresh result and, when anything failed, its diagnostics.
    ///
    /// Returns `false` when the result file could not be written. Neither
    /// write failure stops the batch.
    fn save_prototype(&self, pid: &str, result: &BetaFitResult, error: Option<FitError>) -> bool {
        let save_error = atomic_save_json(&prototype_result_path(&self.out_dir, pid), result).err();
        if let Some(ref e) = save_error {
            warn!(
                target: "beta_fit::batch",
                prototype_id = pid,
                error = %e,
                "Could not write fit result, continuing"
            );
        }

        let diagnostics = match (&error, &save_error) {
            (Some(fit_error), Some(save_error)) => {
                Some(FitDiagnostics::new(pid, fit_error).also(save_error))
            }
            (Some(e), None) | (None, Some(e)) => Some(FitDiagnostics::new(pid, e)),
            (None, None) => None,
        };
        if let Some(diagnostics) = diagnostics {
            if let Err(e) = atomic_save_json(&diagnostics_path(&self.out_dir, pid), &diagnostics) {
                warn!(
                    target: "beta_fit::batch",
                    prototype_id = pid,
                    error = %e,
                    "Could not write diagnostics"
                );
            }
        }
        save_error.is_none()
    }

    pub fn build(self) -> FitResult<BatchReport> {
        let total = self.targets.len();
        let span = info_span!(
            "batch",
            out_dir = %self.out_dir.display(),
            provider = self.provider.name(),
            total
        );
        let _guard = span.enter();
        let _timer = OperationTimer::with_items("batch_fit", total);

        ensure_dir(&self.out_dir)?;
        info!(
            target: "beta_fit::batch",
            total,
            seed = self.seed,
            max_iter = self.options.max_iter,
            resume = self.resume,
            batch_size = self.batch_size,
            "Starting batch"
        );

        let start = Instant::now();
        let mut results = Vec::with_capacity(total);
        let mut skipped_resume = Vec::new();
        let mut stopped = None;
        let mut failures = 0usize;
        let mut unsaved = Vec::new();

        for (i, targets) in self.targets.iter().enumerate() {
            if let Some(budget) = self.time_budget {
                if start.elapsed() >= budget {
                    warn!(
                        target: "beta_fit::batch",
                        fitted = i,
                        total,
                        budget_sec = budget.as_secs_f64(),
                        "Time budget exhausted, stopping"
                    );
                    stopped = Some(StopReason::TimeBudget);
                    break;
                }
            }

            let pid = prototype_id(i);
            let path = prototype_result_path(&self.out_dir, &pid);

            if let Some(result) = self.try_resume(&path, &pid) {
                info!(target: "beta_fit::batch", prototype_id = pid.as_str(), "Reusing existing result");
                results.push(result);
                skipped_resume.push(pid.clone());
            } else {
                let (result, error) =
                    fit_or_error(&pid, targets, self.provider.as_ref(), &self.options);
                if !self.save_prototype(&pid, &result, error) {
                    unsaved.push(pid.clone());
                }
                results.push(result);
            }

            let success = results.last().is_some_and(|r| r.success);
            if !success {
                failures += 1;
            }
            if let Some(ref callback) = self.progress_callback {
                let progress = Progress::new(i + 1, total, pid.as_str())
                    .with_outcome(success, failures)
                    .with_elapsed(start.elapsed());
                if !callback(&progress) {
                    info!(target: "beta_fit::batch", fitted = i + 1, total, "Batch cancelled");
                    stopped = Some(StopReason::Cancelled);
                    break;
                }
            }
        }

        if !skipped_resume.is_empty() {
            let mut lines = String::new();
            for pid in &skipped_resume {
                let record = SkipRecord {
                    prototype_id: pid,
                    reason: RESUME_SKIP_REASON,
                };
                let line = serde_json::to_string(&record).map_err(|e| {
                    FitError::parse_error(self.out_dir.join("SKIPPED_RESUME.jsonl"), e.to_string())
                })?;
                lines.push_str(&line);
                lines.push('\n');
            }
            atomic_save_text(&self.out_dir.join("SKIPPED_RESUME.jsonl"), &lines)?;
        }

        let summary = BatchSummary::from_results(
            &results,
            &RunInfo {
                seed: self.seed,
                max_iter: self.options.max_iter,
                mesh_provider: self.provider.name(),
                keys: &self.options.keys,
            },
        );
        let residual_report = ResidualReport::from_results(&results, &summary);

        atomic_save_json(&self.out_dir.join("summary.json"), &summary)?;
        atomic_save_json(&self.out_dir.join("residual_report.json"), &residual_report)?;
        atomic_save_text(&self.out_dir.join("KPI.md"), &render_kpi(&summary, &results))?;
        atomic_save_text(&self.out_dir.join("KPI_DIFF.md"), &render_kpi_diff())?;
        atomic_save_text(
            &self.out_dir.join("RESIDUAL_REPORT.md"),
            &render_residual_report(&residual_report),
        )?;

        let elapsed = start.elapsed();
        info!(
            target: "beta_fit::batch",
            fitted = results.len(),
            failures = summary.failures.count,
            reused = skipped_resume.len(),
            quality_p50 = summary.quality_score_stats.p50,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "Batch complete"
        );

        Ok(BatchReport {
            out_dir: self.out_dir,
            results,
            summary,
            skipped_resume,
            stopped,
            unsaved,
            elapsed,
        })
    }
}
