//! Core math and geometry primitives for scan anchoring.
//!
//! This crate contains:
//! - linear algebra type aliases (`Real`, `Vec2`, `Pt3`, ...),
//! - a pinhole camera with OpenCV lens distortion,
//! - the serializable [`Intrinsics`] record produced by an external calibration,
//! - robust statistics used by quality gating ([`stats`]),
//! - WGS84 geodesy for local East-North-Up frames ([`geodesy`]).

/// WGS84 ellipsoid, ECEF and local ENU frames.
pub mod geodesy;
/// Linear algebra type aliases and helpers.
pub mod math;
/// Pinhole camera and intrinsics record.
pub mod models;
/// Order statistics and robust spread estimators.
pub mod stats;

pub use geodesy::*;
pub use math::*;
pub use models::*;
