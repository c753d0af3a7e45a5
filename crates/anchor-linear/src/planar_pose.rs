use anchor_core::{Iso3, Mat3, Pt2, Real, Vec3};
use nalgebra::{Rotation3, Translation3, UnitQuaternion};

use crate::{dlt_homography, PoseError};

/// Linear pose initialisation from a homography and intrinsics.
///
/// This implements the classic decomposition of a plane-induced homography
/// `H` into a rotation and translation, assuming the target lies on the plane
/// `Z = 0` in its own coordinates.
#[derive(Debug, Clone, Copy)]
pub struct PlanarPoseSolver;

impl PlanarPoseSolver {
    /// Decompose a homography into a pose `T_C_B` given intrinsics `K`.
    ///
    /// The sign of `H` is chosen so that the board lies in front of the camera.
    pub fn from_homography(kmtx: &Mat3, hmtx: &Mat3) -> Result<Iso3, PoseError> {
        let k_inv = kmtx.try_inverse().ok_or(PoseError::Degenerate("singular K"))?;

        let k_inv_h1: Vec3 = k_inv * hmtx.column(0);
        let k_inv_h2: Vec3 = k_inv * hmtx.column(1);
        let k_inv_h3: Vec3 = k_inv * hmtx.column(2);

        // Scale factor λ: normalize first two columns (average for robustness)
        let mean_norm = (k_inv_h1.norm() + k_inv_h2.norm()) * 0.5;
        if mean_norm <= Real::EPSILON {
            return Err(PoseError::Degenerate("homography columns vanish"));
        }
        let mut lambda = 1.0 / mean_norm;
        if (lambda * k_inv_h3).z < 0.0 {
            lambda = -lambda;
        }

        let r1 = lambda * k_inv_h1;
        let r2 = lambda * k_inv_h2;
        let r3 = r1.cross(&r2);

        let mut r_mat = Mat3::zeros();
        r_mat.set_column(0, &r1);
        r_mat.set_column(1, &r2);
        r_mat.set_column(2, &r3);

        // Project onto SO(3) (polar decomposition via SVD)
        let svd = r_mat.svd(true, true);
        let u = svd.u.ok_or(PoseError::SvdFailed)?;
        let v_t = svd.v_t.ok_or(PoseError::SvdFailed)?;
        let mut r_orth = u * v_t;
        if r_orth.determinant() < 0.0 {
            let mut u_flipped = u;
            u_flipped.column_mut(2).neg_mut();
            r_orth = u_flipped * v_t;
        }

        let t_vec = lambda * k_inv_h3;
        if !t_vec.iter().all(|v| v.is_finite()) {
            return Err(PoseError::Degenerate("non-finite translation"));
        }

        let rot = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r_orth));
        Ok(Iso3::from_parts(Translation3::from(t_vec), rot))
    }

    /// Pose of a planar target from board-plane points and undistorted normalized
    /// image coordinates (identity intrinsics).
    pub fn from_normalized(board_xy: &[Pt2], normalized: &[Pt2]) -> Result<Iso3, PoseError> {
        let h = dlt_homography(board_xy, normalized)?;
        Self::from_homography(&Mat3::identity(), &h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Isometry3, Matrix3, Rotation3, Vector3};

    fn make_kmtx() -> Mat3 {
        Matrix3::new(800.0, 0.0, 640.0, 0.0, 780.0, 360.0, 0.0, 0.0, 1.0)
    }

    fn synthetic_pose() -> Iso3 {
        let rot = Rotation3::from_euler_angles(0.1, -0.05, 0.2);
        let t = Vector3::new(0.1, -0.05, 1.0);
        Isometry3::from_parts(Translation3::from(t), rot.into())
    }

    #[test]
    fn planar_pose_from_h_recovers_pose() {
        let kmtx = make_kmtx();
        let iso_gt = synthetic_pose();

        // For a plane Z=0, homography is H = K [r1 r2 t]
        let r_mat = iso_gt.rotation.to_rotation_matrix().into_inner();
        let mut hmtx = Mat3::zeros();
        hmtx.set_column(0, &(kmtx * r_mat.column(0)));
        hmtx.set_column(1, &(kmtx * r_mat.column(1)));
        hmtx.set_column(2, &(kmtx * iso_gt.translation.vector));

        // The overall sign of H is arbitrary.
        let iso_est = PlanarPoseSolver::from_homography(&kmtx, &(-hmtx)).unwrap();

        let dt = (iso_est.translation.vector - iso_gt.translation.vector).norm();
        let r_est = iso_est.rotation.to_rotation_matrix().into_inner();
        let dr = (r_est - r_mat).norm();
        assert!(dt < 1e-6, "translation error too large: {}", dt);
        assert!(dr < 1e-6, "rotation error too large: {}", dr);
    }

    #[test]
    fn from_normalized_points_recovers_pose() {
        let iso_gt = synthetic_pose();
        let board: Vec<Pt2> = (0..4)
            .flat_map(|i| (0..3).map(move |j| Pt2::new(i as f64 * 0.05, j as f64 * 0.05)))
            .collect();
        let normalized: Vec<Pt2> = board
            .iter()
            .map(|p| {
                let pc = iso_gt.transform_point(&anchor_core::Pt3::new(p.x, p.y, 0.0));
                Pt2::new(pc.x / pc.z, pc.y / pc.z)
            })
            .collect();

        let iso_est = PlanarPoseSolver::from_normalized(&board, &normalized).unwrap();
        let dt = (iso_est.translation.vector - iso_gt.translation.vector).norm();
        assert!(dt < 1e-6, "translation error too large: {}", dt);
        assert!(iso_est.rotation.angle_to(&iso_gt.rotation) < 1e-6);
    }
}
