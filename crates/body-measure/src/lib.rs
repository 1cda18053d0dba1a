//! Circumference measurement from body-mesh vertex sets.
//!
//! This crate extracts bust, waist and hip circumferences from a 3D body mesh
//! given as a plain vertex set. Each measurement slices a height band, merges
//! near-duplicate points, picks one connected cluster and reports the
//! perimeter of its 2D convex hull.
//!
//! # Features
//!
//! - **Band location**: calibrated world-frame bands, or a hip band anchored at the pelvis
//! - **Slicing**: band filtering, projection to x/z, epsilon deduplication, band widening
//! - **Component selection**: proximity clustering with a deterministic ranking
//! - **Hull perimeter**: monotone-chain convex hull with degeneracy detection
//! - **Group measurement**: all three keys from one preparation pass
//! - **Diagnostics**: a fixed-key debug record and warning codes on every result
//!
//! # Units and Axes
//!
//! Coordinates are meters, Y up. Bands are fractions of the mesh's vertical
//! extent measured from its lowest vertex.
//!
//! # Determinism
//!
//! For a fixed vertex set and [`MeasureConfig`], measurement returns the same
//! value (or the same missing reason) and the same sorted warning list on
//! every call, independent of vertex order within a slice.
//!
//! # Quick Start
//!
//! ```no_run
//! use body_measure::{MeasureConfig, HipBandId, load_vertices, measure_group};
//!
//! let verts = load_vertices("body.json").unwrap();
//!
//! let results = measure_group(&verts, "case-001", &MeasureConfig::default());
//! for (key, result) in &results {
//!     println!("{}: {:?} {:?}", key, result.value(), result.warnings());
//! }
//!
//! // Calibration: force one hip band for a whole run.
//! let config = MeasureConfig::default().with_hip_band(HipBandId::C);
//! let hip = body_measure::measure(&verts, body_measure::MeasurementKey::Hip, &config);
//! ```

mod error;
mod types;

pub mod band;
pub mod components;
pub mod config;
pub mod debug;
pub mod hull;
pub mod io;
pub mod measure;
pub mod slice;
pub mod tracing_ext;

pub use error::{ErrorLocation, MeasureError, MeasureErrorCode, MeasureResult, RecoverySuggestion};
pub use types::{
    MeasuredValue, MeasurementKey, MissingReason, PreparedMesh, VertexSet, WarningCode,
    normalize_warnings,
};

pub use band::{BandFrame, PelvisFrame, ResolvedBand, detect_pelvis_frame};
pub use components::{ComponentMode, ComponentSelection, select_component};
pub use config::{
    BUST_BAND, ComponentRule, HipBandId, HipMethod, HipStrategy, MeasureConfig, SliceBandConfig,
    UpAxis, WAIST_BAND,
};
pub use debug::{SliceDebugRecord, finite_or_none, make_slice_debug_schema};
pub use hull::{HullResult, convex_hull_perimeter};
pub use io::{load_vertices, save_vertices};
pub use measure::{
    MeasurementResult, SANE_CIRC_MAX_M, SANE_CIRC_MIN_M, measure, measure_circumference_v0_with_metadata,
    measure_group, measure_group_prepared, measure_prepared,
};
pub use slice::{CrossSection, EPSILON_DEDUPE, SlicePoint};
