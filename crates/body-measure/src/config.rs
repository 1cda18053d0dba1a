//! Measurement configuration.
//!
//! Band placement and component selection are carried in an explicit
//! [`MeasureConfig`] passed by reference into every measurement call. There
//! is no process-wide override: a calibration run that forces one hip band
//! builds a config with [`MeasureConfig::with_hip_band`] and passes it along,
//! and [`MeasureConfig::default`] is the production behavior.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MeasureError, MeasureResult};
use crate::types::MeasurementKey;

/// Vertical axis of the mesh. Only world Y is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum UpAxis {
    #[default]
    #[serde(rename = "y")]
    Y,
}

impl UpAxis {
    /// Axis name.
    pub fn as_str(&self) -> &'static str {
        match self {
            UpAxis::Y => "y",
        }
    }

    /// The two in-plane axes, concatenated.
    pub fn plane(&self) -> &'static str {
        match self {
            UpAxis::Y => "xz",
        }
    }
}

/// A height band, in fractions of the body's vertical extent.
///
/// `y_start` and `y_end` are measured from the lowest vertex, so `0.0` is the
/// soles and `1.0` the crown. `y_start < y_end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SliceBandConfig {
    pub axis_up: UpAxis,
    pub y_start: f64,
    pub y_end: f64,
    /// Prefer the lower of two equally sized components.
    pub tie_prefer_lower_y: bool,
}

impl SliceBandConfig {
    /// Create a band, rejecting unordered bounds.
    pub fn new(y_start: f64, y_end: f64, tie_prefer_lower_y: bool) -> MeasureResult<Self> {
        if y_start.is_nan() || y_end.is_nan() || y_start >= y_end {
            return Err(MeasureError::InvalidBand { y_start, y_end });
        }
        Ok(Self::fixed(y_start, y_end, tie_prefer_lower_y))
    }

    const fn fixed(y_start: f64, y_end: f64, tie_prefer_lower_y: bool) -> Self {
        Self {
            axis_up: UpAxis::Y,
            y_start,
            y_end,
            tie_prefer_lower_y,
        }
    }

    /// Band width as a fraction of the vertical extent.
    #[inline]
    pub fn width(&self) -> f64 {
        self.y_end - self.y_start
    }
}

/// Bust band.
pub const BUST_BAND: SliceBandConfig = SliceBandConfig::fixed(0.70, 0.74, false);

/// Waist band.
pub const WAIST_BAND: SliceBandConfig = SliceBandConfig::fixed(0.60, 0.64, true);

/// Named world-frame hip band configurations.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum HipBandId {
    A,
    #[default]
    B,
    C,
    D,
    E,
    #[serde(rename = "B_high")]
    BHigh,
}

impl HipBandId {
    /// All hip band configs in calibration order.
    pub const ALL: [HipBandId; 6] = [
        HipBandId::A,
        HipBandId::B,
        HipBandId::C,
        HipBandId::D,
        HipBandId::E,
        HipBandId::BHigh,
    ];

    /// Config id string.
    pub fn as_str(&self) -> &'static str {
        match self {
            HipBandId::A => "A",
            HipBandId::B => "B",
            HipBandId::C => "C",
            HipBandId::D => "D",
            HipBandId::E => "E",
            HipBandId::BHigh => "B_high",
        }
    }

    /// The calibrated band for this config.
    pub fn band(&self) -> SliceBandConfig {
        match self {
            HipBandId::A => SliceBandConfig::fixed(0.48, 0.52, false),
            HipBandId::B => SliceBandConfig::fixed(0.50, 0.54, false),
            HipBandId::C => SliceBandConfig::fixed(0.46, 0.50, true),
            HipBandId::D => SliceBandConfig::fixed(0.52, 0.56, false),
            HipBandId::E => SliceBandConfig::fixed(0.44, 0.48, true),
            HipBandId::BHigh => SliceBandConfig::fixed(0.53, 0.57, false),
        }
    }
}

impl fmt::Display for HipBandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HipBandId {
    type Err = MeasureError;

    fn from_str(s: &str) -> MeasureResult<Self> {
        HipBandId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| MeasureError::unknown_hip_band(s))
    }
}

/// Hip band placement method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HipMethod {
    /// Fixed fraction of world height.
    WorldYBand,
    /// Offset from the detected pelvis landmark.
    PelvisFrameBand,
}

impl HipMethod {
    /// Method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            HipMethod::WorldYBand => "world_y_band",
            HipMethod::PelvisFrameBand => "pelvis_frame_band",
        }
    }
}

impl fmt::Display for HipMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HipMethod {
    type Err = MeasureError;

    fn from_str(s: &str) -> MeasureResult<Self> {
        match s {
            "world_y_band" => Ok(HipMethod::WorldYBand),
            "pelvis_frame_band" => Ok(HipMethod::PelvisFrameBand),
            other => Err(MeasureError::unknown_hip_method(other)),
        }
    }
}

/// How the hip band is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HipStrategy {
    /// A named world-frame band.
    WorldBand(HipBandId),
    /// A band relative to the pelvis landmark.
    PelvisFrame,
}

impl Default for HipStrategy {
    fn default() -> Self {
        HipStrategy::WorldBand(HipBandId::default())
    }
}

impl HipStrategy {
    /// Method this strategy belongs to.
    pub fn method(&self) -> HipMethod {
        match self {
            HipStrategy::WorldBand(_) => HipMethod::WorldYBand,
            HipStrategy::PelvisFrame => HipMethod::PelvisFrameBand,
        }
    }
}

/// Rule for picking one cluster out of a multi-component slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ComponentRule {
    /// Largest cluster, ties by height preference then centroid.
    #[default]
    Largest,
    /// Cluster whose centroid is closest to the centroid of the whole slice.
    Central,
}

impl ComponentRule {
    /// Rule name as reported in `component_mode`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentRule::Largest => "largest",
            ComponentRule::Central => "central",
        }
    }
}

/// Configuration threaded through every measurement call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MeasureConfig {
    pub hip: HipStrategy,
    pub component_rule: ComponentRule,
}

impl MeasureConfig {
    /// Force one named world-frame hip band.
    pub fn with_hip_band(mut self, id: HipBandId) -> Self {
        self.hip = HipStrategy::WorldBand(id);
        self
    }

    /// Force a hip method. The world method uses the default band.
    pub fn with_hip_method(mut self, method: HipMethod) -> Self {
        self.hip = match method {
            HipMethod::WorldYBand => HipStrategy::WorldBand(HipBandId::default()),
            HipMethod::PelvisFrameBand => HipStrategy::PelvisFrame,
        };
        self
    }

    /// Set the component selection rule.
    pub fn with_component_rule(mut self, rule: ComponentRule) -> Self {
        self.component_rule = rule;
        self
    }

    /// World-frame band for a key under this config.
    ///
    /// The pelvis strategy has no fixed band; it reports the default hip band,
    /// which is also where it falls back to.
    pub fn world_band(&self, key: MeasurementKey) -> SliceBandConfig {
        match key {
            MeasurementKey::Bust => BUST_BAND,
            MeasurementKey::Waist => WAIST_BAND,
            MeasurementKey::Hip => match self.hip {
                HipStrategy::WorldBand(id) => id.band(),
                HipStrategy::PelvisFrame => HipBandId::default().band(),
            },
        }
    }
}
