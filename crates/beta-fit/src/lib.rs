//! Shape-parameter fitting against body circumference targets.
//!
//! Given target bust, waist and hip circumferences, this crate searches for
//! the shape vector (beta) whose generated body mesh measures closest to the
//! targets, using a derivative-free Nelder–Mead simplex search and the
//! measurement pipeline from [`body_measure`].
//!
//! # Features
//!
//! - **Mesh providers**: a scaled template and a procedural body with per-girth betas
//! - **Fitting**: squared-error objective, bounded function evaluations, quality scoring
//! - **Batch runs**: per-prototype results, failure isolation, resume, time budget
//! - **Reports**: byte-stable `summary.json`, residual report, KPI markdown
//! - **Calibration**: hip band sweep, hip method A/B, run-to-run determinism check
//!
//! # Determinism
//!
//! The optimizer is deterministic and providers draw jitter from a seeded
//! ChaCha8 stream that restarts on every call, so two runs with the same
//! targets, seed and options produce byte-identical result files and summary.
//!
//! # Failure Isolation
//!
//! A failing fit never aborts a batch. It is recorded as a stub result with
//! `success = false` plus a diagnostics file, and the batch continues.
//!
//! # Quick Start
//!
//! ```
//! use beta_fit::{FitOptions, ScaledTemplateProvider, TargetVector, fit_prototype};
//! use body_measure::MeasurementKey;
//!
//! let provider = ScaledTemplateProvider::fallback();
//! let targets = TargetVector::from([
//!     (MeasurementKey::Bust, 2.0),
//!     (MeasurementKey::Waist, 2.0),
//!     (MeasurementKey::Hip, 2.0),
//! ]);
//!
//! let result = fit_prototype("p0000", &targets, &provider, &FitOptions::default());
//! assert!(result.success);
//! ```

mod error;

pub mod atomic_io;
pub mod batch;
pub mod calibration;
pub mod fit;
pub mod nelder_mead;
pub mod progress;
pub mod provider;
pub mod quality;
pub mod report;
pub mod targets;
pub mod tracing_ext;

pub use error::{FitError, FitErrorCode, FitResult, RecoverySuggestion};

pub use batch::{BatchBuilder, BatchReport, StopReason, prototype_id, prototype_result_path};
pub use calibration::{
    DeterminismReport, HipEvalSet, HipMethodAbReport, HipSweepReport, build_hip_eval_set,
    check_determinism, eval_hip_method_ab, run_hip_sweep,
};
pub use fit::{
    BetaFitResult, DEFAULT_POSE_ID, FitOptions, FitOutcome, FitWarning, Prediction, TargetVector,
    fit, fit_prototype, loss, predict,
};
pub use nelder_mead::{NelderMeadOptions, NelderMeadOutcome, Termination, minimize};
pub use progress::{Progress, ProgressCallback};
pub use provider::{
    GeneratedMesh, MeshProvider, ParametricTorsoProvider, ProviderKind, ScaledTemplateProvider,
};
pub use quality::{QUALITY_THRESHOLD, QualityBucket, quality_score};
pub use report::{BatchSummary, ResidualReport, percentile};
pub use targets::{dev_targets, load_centroids};
