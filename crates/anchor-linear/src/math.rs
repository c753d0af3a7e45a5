//! Hartley normalization for DLT-style solvers.
//!
//! Centering the data and scaling it to a mean distance of `√2` keeps the DLT
//! design matrix well conditioned regardless of the input units.

use anchor_core::{Mat3, Pt2, Real, Vec2};

/// Hartley normalization for 2D points.
///
/// Returns the normalized points and the 3×3 transform `T` such that
/// `p_norm = T * p_homogeneous`, or `None` if the input is empty or all points
/// coincide.
pub fn normalize_points_2d(points: &[Pt2]) -> Option<(Vec<Pt2>, Mat3)> {
    if points.is_empty() {
        return None;
    }

    let n = points.len() as Real;
    let centroid = points.iter().fold(Vec2::zeros(), |acc, p| acc + p.coords) / n;
    let spread = points.iter().map(|p| (p.coords - centroid).norm()).sum::<Real>() / n;
    if spread <= Real::EPSILON {
        return None;
    }

    let s = std::f64::consts::SQRT_2 / spread;
    #[rustfmt::skip]
    let t = Mat3::new(
        s, 0.0, -s * centroid.x,
        0.0, s, -s * centroid.y,
        0.0, 0.0, 1.0,
    );
    let normalized = points
        .iter()
        .map(|p| Pt2::from((p.coords - centroid) * s))
        .collect();

    Some((normalized, t))
}
