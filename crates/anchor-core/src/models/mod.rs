//! Camera model used for board pose estimation.
//!
//! The serializable [`Intrinsics`] record is the exchange format written by an
//! external calibration step; [`Intrinsics::camera`] turns it into a [`PinholeCamera`].

mod camera;
mod params;

pub use camera::*;
pub use params::*;
