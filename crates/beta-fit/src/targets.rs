//! Target vectors for batch fitting.
//!
//! Targets come from a centroids file produced by the clustering step:
//!
//! ```json
//! {"feature_keys": ["BUST_CIRC_M", "WAIST_CIRC_M", "HIP_CIRC_M"],
//!  "centroid_vectors": [[0.86, 0.71, 0.94], ...]}
//! ```
//!
//! Without a file, [`dev_targets`] supplies a small deterministic set.

use std::path::Path;

use body_measure::MeasurementKey;
use serde::Deserialize;
use tracing::debug;

use crate::atomic_io::read_json;
use crate::error::FitResult;
use crate::fit::TargetVector;

/// Centroids file layout.
#[derive(Debug, Clone, Deserialize)]
pub struct CentroidsFile {
    #[serde(default)]
    pub feature_keys: Option<Vec<String>>,
    #[serde(default)]
    pub centroid_vectors: Vec<Vec<f64>>,
}

impl CentroidsFile {
    /// Map the first `k` centroid vectors onto measurement keys.
    ///
    /// Feature names that are not measurement keys are skipped. Without
    /// `feature_keys`, columns are bust, waist, hip.
    pub fn targets(&self, k: usize) -> Vec<TargetVector> {
        let columns: Vec<Option<MeasurementKey>> = match &self.feature_keys {
            Some(names) => names
                .iter()
                .map(|name| {
                    let key = name.parse::<MeasurementKey>().ok();
                    if key.is_none() {
                        debug!(target: "beta_fit::targets", feature = name.as_str(), "Skipping non-circumference feature");
                    }
                    key
                })
                .collect(),
            None => MeasurementKey::ALL.iter().copied().map(Some).collect(),
        };

        self.centroid_vectors
            .iter()
            .take(k)
            .map(|vector| {
                columns
                    .iter()
                    .zip(vector)
                    .filter_map(|(key, value)| key.map(|k| (k, *value)))
                    .collect()
            })
            .collect()
    }
}

/// Load the first `k` target vectors from a centroids file.
pub fn load_centroids(path: impl AsRef<Path>, k: usize) -> FitResult<Vec<TargetVector>> {
    let file: CentroidsFile = read_json(path.as_ref())?;
    Ok(file.targets(k))
}

/// Deterministic development targets: bust `0.85 + 0.02 i`, waist
/// `0.72 + 0.015 i`, hip `0.92 + 0.02 i`.
pub fn dev_targets(k: usize) -> Vec<TargetVector> {
    (0..k)
        .map(|i| {
            let i = i as f64;
            TargetVector::from([
                (MeasurementKey::Bust, 0.85 + i * 0.02),
                (MeasurementKey::Waist, 0.72 + i * 0.015),
                (MeasurementKey::Hip, 0.92 + i * 0.02),
            ])
        })
        .collect()
}
