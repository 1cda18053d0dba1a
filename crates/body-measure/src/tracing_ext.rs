//! Structured logging for measurement and fitting runs.
//!
//! Nothing is emitted until the binary installs a subscriber; the `body` CLI
//! does this from `RUST_LOG` / `-v`. Useful filters:
//!
//! - `body_measure::timing=info`: per-operation wall time
//! - `body_measure::measure=trace`: every key with slice sizes
//! - `body_measure::slice=debug,body_measure::band=debug`: band and dedup detail
//! - `body_measure::io=info`: vertex files read and written

use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, trace, warn};

use crate::measure::MeasurementResult;
use crate::types::{MeasurementKey, VertexSet};

/// Wall-clock timer for a named operation over `items` units of work.
///
/// Enters an `operation` span for its lifetime and logs total and per-item
/// time when dropped.
pub struct OperationTimer {
    name: &'static str,
    items: usize,
    start: Instant,
    _entered: tracing::span::EnteredSpan,
}

impl OperationTimer {
    pub fn with_items(name: &'static str, items: usize) -> Self {
        let entered = tracing::info_span!("operation", operation = name, items).entered();
        debug!(target: "body_measure::timing", operation = name, items, "Started");
        Self {
            name,
            items,
            start: Instant::now(),
            _entered: entered,
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        let total_ms = self.elapsed_ms();
        let per_item_ms = if self.items > 0 {
            total_ms / self.items as f64
        } else {
            0.0
        };
        info!(
            target: "body_measure::timing",
            operation = self.name,
            items = self.items,
            total_ms = format!("{:.2}", total_ms),
            per_item_ms = format!("{:.3}", per_item_ms),
            "Finished"
        );
    }
}

/// Height range and size of a freshly loaded vertex set.
pub fn log_vertex_stats(verts: &VertexSet, source: &Path) {
    match verts.bounds() {
        Some((min, max)) => debug!(
            target: "body_measure::io",
            source = %source.display(),
            vertices = verts.len(),
            y_min = min.y,
            y_max = max.y,
            "Vertex set loaded"
        ),
        None => warn!(
            target: "body_measure::io",
            source = %source.display(),
            vertices = verts.len(),
            "Vertex set has no finite vertices"
        ),
    }
}

pub fn log_measurement(key: MeasurementKey, result: &MeasurementResult) {
    let slice = result.slice_debug();
    match result.value() {
        Some(value) => trace!(
            target: "body_measure::measure",
            key = key.as_str(),
            value_m = format!("{:.4}", value),
            n_points_raw = slice.n_points_raw,
            n_points_deduped = slice.n_points_deduped,
            component_mode = slice.component_mode.as_str(),
            warnings = result.warnings().len(),
            "Measured"
        ),
        None => debug!(
            target: "body_measure::measure",
            key = key.as_str(),
            reason = ?result.value_m.missing_reason(),
            warnings = ?result.warnings(),
            "Measurement missing"
        ),
    }
}

pub fn log_io_operation(operation: &str, path: &Path, success: bool) {
    if success {
        info!(target: "body_measure::io", operation, path = %path.display(), "Done");
    } else {
        warn!(target: "body_measure::io", operation, path = %path.display(), "Failed");
    }
}
