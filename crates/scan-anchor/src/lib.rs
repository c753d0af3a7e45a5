//! Metric reference frames and georegistration for multi-view reconstructions.
//!
//! A run resolves an anchor (a fiducial board, a marker pair, or captured
//! geodetic/time metadata), chooses an origin for the reconstruction, and can
//! register it to ground control points.
//!
//! ```no_run
//! use scan_anchor::pipeline::{AnchorPipeline, RunConfig};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = RunConfig::from_json_file("run_config.json".as_ref())?;
//! let report = AnchorPipeline::new().run(&config)?;
//! println!("anchor resolved: {}", report.anchor.resolved);
//! if let Some(reason) = &report.anchor.failure_reason {
//!     println!("failure: {}", reason);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Lower layers are usable on their own:
//!
//! ```no_run
//! use scan_anchor::core::Pt3;
//! use scan_anchor::linear::solve_helmert;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let model = vec![Pt3::new(0.0, 0.0, 0.0), Pt3::new(1.0, 0.0, 0.0), Pt3::new(0.0, 1.0, 0.0)];
//! let world = vec![Pt3::new(10.0, 0.0, 0.0), Pt3::new(12.0, 0.0, 0.0), Pt3::new(10.0, 2.0, 0.0)];
//! let t = solve_helmert(&model, &world)?;
//! println!("scale {}", t.scale);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - **[`core`]**: math aliases, camera model, intrinsics, statistics, geodesy
//! - **[`linear`]**: homography, planar pose, LM pose refinement, Helmert solve
//! - **[`pipeline`]**: detection, board pose, quality gate, reference frame, georegistration
//! - **[`prelude`]**: common imports

/// Math aliases, camera models, robust statistics and WGS84 geodesy.
pub mod core {
    pub use anchor_core::*;
}

/// Closed-form and iterative geometric solvers.
pub mod linear {
    pub use anchor_linear::*;
}

/// Anchoring, reference frame resolution and georegistration.
pub mod pipeline {
    pub use anchor_pipeline::*;
}

/// Convenient re-exports for common use cases.
pub mod prelude {
    pub use anchor_core::{Geodetic, Intrinsics, Pt2, Pt3, Real};
    pub use anchor_linear::{solve_helmert, HelmertTransform};
    pub use anchor_pipeline::geo::{run_georegistration, GeoregConfig, GeoregMode};
    pub use anchor_pipeline::{
        AnchorPipeline, AnchorResult, BoardSpec, Confidence, MarkerFamily, RunConfig, RunReport,
        ScanRegime,
    };
}
