//! Tracing helpers for fitting and batch runs.
//!
//! # Targets
//!
//! - `beta_fit::fit`: per-prototype results
//! - `beta_fit::batch`: batch lifecycle, resume and budget decisions
//! - `beta_fit::calibration`: sweeps and A/B evaluations
//! - `beta_fit::provider`: mesh generation detail
//! - `beta_fit::io`: run directory writes
//!
//! Timing uses [`body_measure::tracing_ext::OperationTimer`].

use std::path::Path;

use tracing::{debug, info, warn};

use crate::fit::BetaFitResult;

/// Log one prototype result.
pub fn log_fit_result(result: &BetaFitResult) {
    if result.success {
        info!(
            target: "beta_fit::fit",
            prototype_id = result.prototype_id.as_str(),
            quality_score = result.quality_score.unwrap_or(0.0),
            bucket = result.quality_bucket.as_str(),
            dominant = result.dominant_region.as_deref().unwrap_or("-"),
            warnings = result.warnings.len(),
            "Prototype fitted"
        );
    } else {
        warn!(
            target: "beta_fit::fit",
            prototype_id = result.prototype_id.as_str(),
            error_type = result.error_type.as_deref().unwrap_or("unknown"),
            error = result.error_message.as_deref().unwrap_or(""),
            "Prototype fit failed"
        );
    }
}

/// Log a run directory write.
pub fn log_artifact_written(path: &Path, bytes: usize) {
    debug!(
        target: "beta_fit::io",
        path = path.display().to_string(),
        bytes,
        "Artifact written"
    );
}
