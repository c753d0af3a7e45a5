//! Georegistration: ground control points, similarity solve, residuals and artifact transforms.

pub mod abs_gate;
pub mod engine;
pub mod gcp;
pub mod transforms;

pub use abs_gate::{evaluate_absolute_accuracy, AbsoluteEligibility, ClaimLevel};
pub use engine::{
    compute_residuals, run_georegistration, GeoTransformRecord, GeoregConfig, GeoregError,
    GeoregMode, GeoregOutcome, GeoregReport, GeoregStatus, ResidualReport, ResidualSummary,
};
pub use gcp::{load_gcps, parse_gcps, GcpError, GcpRecord, GcpSet, WorldFrame};
pub use transforms::{TransformChain, TransformEntry, TransformSpace};
