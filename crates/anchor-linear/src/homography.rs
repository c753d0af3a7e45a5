use anchor_core::{Mat3, Pt2};
use nalgebra::DMatrix;
use thiserror::Error;

use crate::math::normalize_points_2d;

#[derive(Debug, Error)]
pub enum HomographyError {
    #[error("need at least 4 point correspondences, got {0}")]
    NotEnoughPoints(usize),
    #[error("point sets differ in length ({0} vs {1})")]
    LengthMismatch(usize, usize),
    #[error("degenerate point configuration")]
    Degenerate,
    #[error("svd failed")]
    SvdFailed,
}

/// Estimate H such that x' ~ H x using the normalized DLT.
///
/// Both point sets are Hartley-normalized before building the design matrix and
/// the result is de-normalized and scaled so that `H[2,2] = 1` when possible.
pub fn dlt_homography(world: &[Pt2], image: &[Pt2]) -> Result<Mat3, HomographyError> {
    let n = world.len();
    if image.len() != n {
        return Err(HomographyError::LengthMismatch(n, image.len()));
    }
    if n < 4 {
        return Err(HomographyError::NotEnoughPoints(n));
    }

    let (world_n, t_w) = normalize_points_2d(world).ok_or(HomographyError::Degenerate)?;
    let (image_n, t_i) = normalize_points_2d(image).ok_or(HomographyError::Degenerate)?;

    let mut a = DMatrix::<f64>::zeros(2 * n.max(5), 9);

    for (i, (w, m)) in world_n.iter().zip(image_n.iter()).enumerate() {
        #[rustfmt::skip]
        a.row_mut(2 * i).copy_from_slice(&[
            -w.x, -w.y, -1.0, 0.0, 0.0, 0.0, m.x * w.x, m.x * w.y, m.x,
        ]);
        #[rustfmt::skip]
        a.row_mut(2 * i + 1).copy_from_slice(&[
            0.0, 0.0, 0.0, -w.x, -w.y, -1.0, m.y * w.x, m.y * w.y, m.y,
        ]);
    }

    // Null vector of A: right singular vector of the smallest singular value.
    // Four points give an 8×9 system; the zero rows above keep A at least 9×9 so
    // the SVD returns a full V.
    let svd = a.svd(false, true);
    let v_t = svd.v_t.ok_or(HomographyError::SvdFailed)?;
    let (min_idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .ok_or(HomographyError::SvdFailed)?;
    let h = v_t.row(min_idx);

    let h_norm = Mat3::from_fn(|r, c| h[3 * r + c]);
    let t_i_inv = t_i.try_inverse().ok_or(HomographyError::Degenerate)?;
    let mut h_mat = t_i_inv * h_norm * t_w;

    let scale = h_mat[(2, 2)];
    if scale.abs() > f64::EPSILON {
        h_mat /= scale;
    }
    if !h_mat.iter().all(|v| v.is_finite()) {
        return Err(HomographyError::Degenerate);
    }

    Ok(h_mat)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pure_scale_square() {
        let unit = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)];
        let w: Vec<Pt2> = unit.iter().map(|&(x, y)| Pt2::new(x, y)).collect();
        let img: Vec<Pt2> = unit.iter().map(|&(x, y)| Pt2::new(2.0 * x + 5.0, 2.0 * y)).collect();

        let h = dlt_homography(&w, &img).unwrap();
        assert!((h[(0, 0)] - 2.0).abs() < 1e-6, "scale {}", h[(0, 0)]);
        assert!((h[(0, 2)] - 5.0).abs() < 1e-6);
    }

    #[test]
    fn recovers_projective_map() {
        let h_gt = Mat3::new(1.2, 0.1, 3.0, -0.05, 0.9, -2.0, 0.001, 0.002, 1.0);
        let world: Vec<Pt2> = (0..3)
            .flat_map(|i| (0..3).map(move |j| Pt2::new(i as f64, j as f64)))
            .collect();
        let image: Vec<Pt2> = world
            .iter()
            .map(|p| anchor_core::from_homogeneous(&(h_gt * anchor_core::to_homogeneous(p))))
            .collect();

        let h = dlt_homography(&world, &image).unwrap();
        let err = (h - h_gt).norm();
        assert!(err < 1e-8, "homography error {}", err);
    }

    #[test]
    fn too_few_points_is_an_error() {
        let pts = vec![Pt2::new(0.0, 0.0), Pt2::new(1.0, 0.0), Pt2::new(0.0, 1.0)];
        assert!(matches!(
            dlt_homography(&pts, &pts),
            Err(HomographyError::NotEnoughPoints(3))
        ));
    }
}
