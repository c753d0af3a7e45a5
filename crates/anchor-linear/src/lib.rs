//! Closed-form and small iterative solvers used by scan anchoring.
//!
//! - [`dlt_homography`]: normalized DLT between a plane and its image.
//! - [`PlanarPoseSolver`]: board pose from a plane-induced homography.
//! - [`refine_pose_lm`]: Levenberg-Marquardt refinement of a pose on pixel residuals.
//! - [`solve_helmert`]: 7-parameter similarity (Umeyama) between two point sets.
//! - [`rotation`]: Rodrigues vectors, quaternions and rotation averaging.

mod helmert;
mod homography;
pub mod math;
mod planar_pose;
mod refine;
pub mod rotation;

pub use helmert::*;
pub use homography::*;
pub use planar_pose::*;
pub use refine::*;
