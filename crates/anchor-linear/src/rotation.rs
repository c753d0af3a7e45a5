//! Rotation representation helpers shared by pose artifacts.

use anchor_core::{Mat3, Real, Vec3};
use nalgebra::{Quaternion, Rotation3, UnitQuaternion};

/// Rodrigues rotation vector (axis · angle) of a rotation.
pub fn rvec_from_rotation(rotation: &UnitQuaternion<Real>) -> [Real; 3] {
    let v = rotation.scaled_axis();
    [v.x, v.y, v.z]
}

pub fn rotation_from_rvec(rvec: &[Real; 3]) -> UnitQuaternion<Real> {
    UnitQuaternion::from_scaled_axis(Vec3::new(rvec[0], rvec[1], rvec[2]))
}

/// Quaternion `[w, x, y, z]` with a non-negative scalar part.
pub fn quat_wxyz(q: &UnitQuaternion<Real>) -> [Real; 4] {
    let q = if q.w < 0.0 { -q.into_inner() } else { q.into_inner() };
    [q.w, q.i, q.j, q.k]
}

/// Quaternion `[w, x, y, z]` of a (near-)orthonormal rotation matrix.
pub fn matrix_to_quat_wxyz(m: &Mat3) -> [Real; 4] {
    let rot = Rotation3::from_matrix(m);
    quat_wxyz(&UnitQuaternion::from_rotation_matrix(&rot))
}

/// Chordal mean of unit quaternions, sign-aligned to the first one.
///
/// Adequate for rotations clustered within a few tens of degrees, which is the
/// case for per-frame estimates of one rigid object.
pub fn average_quaternion(quats: &[UnitQuaternion<Real>]) -> Option<UnitQuaternion<Real>> {
    let first = quats.first()?.into_inner();
    let mut sum = Quaternion::new(0.0, 0.0, 0.0, 0.0);
    for q in quats {
        let q = q.into_inner();
        sum += if q.dot(&first) < 0.0 { -q } else { q };
    }
    UnitQuaternion::try_new(sum, Real::EPSILON)
}
