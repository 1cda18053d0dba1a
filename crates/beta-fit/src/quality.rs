//! Fit quality scoring.
//!
//! Quality is a penalty score: 100 minus the weighted sum of absolute
//! residuals in centimeters, clamped to `[0, 100]`. A score at or above
//! [`QUALITY_THRESHOLD`] lands in the `OK` bucket.

use std::collections::BTreeMap;

use body_measure::MeasurementKey;
use serde::{Deserialize, Serialize};

/// Score separating the `OK` and `LOW` buckets.
pub const QUALITY_THRESHOLD: f64 = 70.0;

/// Quality bucket of a fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QualityBucket {
    Ok,
    #[default]
    Low,
}

impl QualityBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityBucket::Ok => "OK",
            QualityBucket::Low => "LOW",
        }
    }
}

impl std::fmt::Display for QualityBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Penalty weight per key.
#[inline]
pub fn quality_weight(_key: MeasurementKey) -> f64 {
    1.0
}

/// Score residuals given in meters.
pub fn quality_score(residuals_m: &BTreeMap<MeasurementKey, f64>, keys: &[MeasurementKey]) -> f64 {
    let penalty: f64 = keys
        .iter()
        .filter_map(|k| residuals_m.get(k).map(|r| quality_weight(*k) * r.abs() * 100.0))
        .sum();
    (100.0 - penalty).clamp(0.0, 100.0)
}

/// Bucket for a score.
#[inline]
pub fn quality_bucket(score: f64) -> QualityBucket {
    if score >= QUALITY_THRESHOLD {
        QualityBucket::Ok
    } else {
        QualityBucket::Low
    }
}

/// Keys by descending absolute residual; ties keep the order of `keys`.
pub fn rank_residuals(
    residuals_m: &BTreeMap<MeasurementKey, f64>,
    keys: &[MeasurementKey],
) -> Vec<MeasurementKey> {
    let mut ranked: Vec<(MeasurementKey, f64)> = keys
        .iter()
        .map(|k| (*k, residuals_m.get(k).map_or(0.0, |r| r.abs())))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.into_iter().map(|(k, _)| k).collect()
}

/// Round to a fixed number of decimal places. Negative zero becomes zero.
#[inline]
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor + 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use MeasurementKey::{Bust, Hip, Waist};

    fn residuals(b: f64, w: f64, h: f64) -> BTreeMap<MeasurementKey, f64> {
        BTreeMap::from([(Bust, b), (Waist, w), (Hip, h)])
    }

    #[test]
    fn test_score_and_bucket() {
        let r = residuals(0.05, -0.10, 0.01);
        let score = quality_score(&r, &MeasurementKey::ALL);
        assert_relative_eq!(score, 84.0, epsilon = 1e-9);
        assert_eq!(quality_bucket(score), QualityBucket::Ok);

        let r = residuals(0.2, -0.2, 0.2);
        assert_relative_eq!(quality_score(&r, &MeasurementKey::ALL), 40.0, epsilon = 1e-9);
        assert_eq!(quality_bucket(40.0), QualityBucket::Low);
        assert_eq!(quality_bucket(70.0), QualityBucket::Ok);
    }

    #[test]
    fn test_score_clamps() {
        let r = residuals(1.0, 1.0, 1.0);
        assert_eq!(quality_score(&r, &MeasurementKey::ALL), 0.0);
        assert_eq!(quality_score(&residuals(0.0, 0.0, 0.0), &MeasurementKey::ALL), 100.0);
    }

    #[test]
    fn test_score_only_counts_requested_keys() {
        let r = residuals(0.5, 0.0, 0.0);
        assert_eq!(quality_score(&r, &[Waist, Hip]), 100.0);
    }

    #[test]
    fn test_ranking_ties_follow_key_order() {
        let ranked = rank_residuals(&residuals(0.01, -0.03, 0.03), &[Hip, Waist, Bust]);
        assert_eq!(ranked, vec![Hip, Waist, Bust]);
        let ranked = rank_residuals(&residuals(0.01, -0.03, 0.03), &MeasurementKey::ALL);
        assert_eq!(ranked, vec![Waist, Hip, Bust]);
        let ranked = rank_residuals(&residuals(0.0, 0.0, 0.0), &[Waist, Bust, Hip]);
        assert_eq!(ranked, vec![Waist, Bust, Hip]);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(1.234_567_89, 4), 1.2346);
        assert!(round_to(-0.000_000_4, 6).is_sign_positive());
        assert_eq!(round_to(84.004, 2), 84.0);
    }

    // =========================================================================
    // Property tests
    // =========================================================================

    proptest! {
        #[test]
        fn prop_score_within_bounds(
            b in -2.0f64..2.0,
            w in -2.0f64..2.0,
            h in -2.0f64..2.0,
        ) {
            let score = quality_score(&residuals(b, w, h), &MeasurementKey::ALL);
            prop_assert!((0.0..=100.0).contains(&score));
        }

        #[test]
        fn prop_score_non_increasing_in_residual_magnitude(
            b in -0.5f64..0.5,
            w in -0.5f64..0.5,
            h in -0.5f64..0.5,
            grow in 0.0f64..0.5,
            which in 0usize..3,
        ) {
            let base = residuals(b, w, h);
            let mut worse = base.clone();
            let key = MeasurementKey::ALL[which];
            let r = worse[&key];
            worse.insert(key, r + grow * if r < 0.0 { -1.0 } else { 1.0 });

            let before = quality_score(&base, &MeasurementKey::ALL);
            let after = quality_score(&worse, &MeasurementKey::ALL);
            prop_assert!(after <= before + 1e-9, "{} > {}", after, before);
        }
    }

    #[test]
    fn test_bucket_serialization() {
        assert_eq!(serde_json::to_string(&QualityBucket::Ok).unwrap(), "\"OK\"");
        assert_eq!(
            serde_json::from_str::<QualityBucket>("\"LOW\"").unwrap(),
            QualityBucket::Low
        );
    }
}
