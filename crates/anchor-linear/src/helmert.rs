//! 7-parameter similarity transform (Helmert) via the Umeyama closed form.

use anchor_core::{Mat3, Mat4, Pt3, Real, Vec3};
use log::debug;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HelmertError {
    #[error("model and world point counts differ ({model} vs {world})")]
    LengthMismatch { model: usize, world: usize },
    #[error("need at least 3 point correspondences, got {0}")]
    NotEnoughPoints(usize),
    #[error("model points are collinear; the similarity transform is underdetermined")]
    Collinear,
    #[error("svd failed")]
    SvdFailed,
    #[error("degenerate solution: {0}")]
    Degenerate(&'static str),
}

/// `world = scale · R · model + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HelmertTransform {
    pub scale: Real,
    pub rotation: Mat3,
    pub translation: Vec3,
}

impl Default for HelmertTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl HelmertTransform {
    pub fn identity() -> Self {
        Self {
            scale: 1.0,
            rotation: Mat3::identity(),
            translation: Vec3::zeros(),
        }
    }

    pub fn apply(&self, p: &Pt3) -> Pt3 {
        Pt3::from(self.scale * (self.rotation * p.coords) + self.translation)
    }

    pub fn apply_all(&self, points: &[Pt3]) -> Vec<Pt3> {
        points.iter().map(|p| self.apply(p)).collect()
    }

    /// Homogeneous 4×4 form `[sR | t; 0 0 0 1]`.
    pub fn matrix(&self) -> Mat4 {
        let mut m = Mat4::identity();
        m.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&(self.rotation * self.scale));
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        m
    }

    /// Algebraic inverse: `model = (1/s) · Rᵀ · (world − t)`.
    pub fn inverse(&self) -> Self {
        let r_t = self.rotation.transpose();
        let inv_scale = 1.0 / self.scale;
        Self {
            scale: inv_scale,
            rotation: r_t,
            translation: -(r_t * self.translation) * inv_scale,
        }
    }

    /// `self ∘ other`: apply `other` first, then `self`.
    pub fn compose(&self, other: &Self) -> Self {
        Self {
            scale: self.scale * other.scale,
            rotation: self.rotation * other.rotation,
            translation: self.scale * (self.rotation * other.translation) + self.translation,
        }
    }

    /// Euclidean distance between each transformed model point and its world point.
    pub fn residuals(&self, model: &[Pt3], world: &[Pt3]) -> Vec<Real> {
        model
            .iter()
            .zip(world)
            .map(|(m, w)| (self.apply(m) - w).norm())
            .collect()
    }
}

fn centroid(points: &[Pt3]) -> Vec3 {
    points.iter().fold(Vec3::zeros(), |acc, p| acc + p.coords) / points.len() as Real
}

/// Relative threshold on the second singular value of the model scatter.
const RANK_TOLERANCE: Real = 1e-10;

/// Least-squares similarity transform mapping `model` onto `world` (Umeyama 1991).
///
/// Requires at least three non-collinear model points.
pub fn solve_helmert(model: &[Pt3], world: &[Pt3]) -> Result<HelmertTransform, HelmertError> {
    if model.len() != world.len() {
        return Err(HelmertError::LengthMismatch {
            model: model.len(),
            world: world.len(),
        });
    }
    let n = model.len();
    if n < 3 {
        return Err(HelmertError::NotEnoughPoints(n));
    }

    let mu_m = centroid(model);
    let mu_w = centroid(world);

    let mut scatter = Mat3::zeros();
    let mut cross = Mat3::zeros();
    let mut var_m = 0.0;
    for (m, w) in model.iter().zip(world) {
        let dm = m.coords - mu_m;
        let dw = w.coords - mu_w;
        scatter += dm * dm.transpose();
        cross += dw * dm.transpose();
        var_m += dm.norm_squared();
    }
    let inv_n = 1.0 / n as Real;
    cross *= inv_n;
    var_m *= inv_n;

    // Rank is judged relative to the largest spread so any unit of length works.
    if model.iter().all(|p| p == &model[0]) {
        return Err(HelmertError::Collinear);
    }
    let mut spread: Vec<Real> = scatter.singular_values().iter().copied().collect();
    spread.sort_by(|a, b| b.total_cmp(a));
    if spread[1] <= RANK_TOLERANCE * spread[0] {
        return Err(HelmertError::Collinear);
    }

    let svd = cross.svd(true, true);
    let mut u = svd.u.ok_or(HelmertError::SvdFailed)?;
    let v_t = svd.v_t.ok_or(HelmertError::SvdFailed)?;
    let mut sigma = svd.singular_values;

    if u.determinant() * v_t.determinant() < 0.0 {
        let (min_idx, _) = sigma
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .ok_or(HelmertError::SvdFailed)?;
        u.column_mut(min_idx).neg_mut();
        sigma[min_idx] = -sigma[min_idx];
    }

    let rotation = u * v_t;
    let scale = sigma.sum() / var_m;
    if !scale.is_finite() || scale <= 0.0 {
        return Err(HelmertError::Degenerate("non-positive scale"));
    }
    let translation = mu_w - scale * (rotation * mu_m);
    debug!("helmert: {} points, scale {:.6}", n, scale);

    Ok(HelmertTransform {
        scale,
        rotation,
        translation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn random_points(n: usize, seed: u64) -> Vec<Pt3> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                Pt3::new(
                    rng.random_range(-5.0..5.0),
                    rng.random_range(-5.0..5.0),
                    rng.random_range(-5.0..5.0),
                )
            })
            .collect()
    }

    fn rot_z_90() -> Mat3 {
        Mat3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0)
    }

    #[test]
    fn recovers_known_similarity() {
        let gt = HelmertTransform {
            scale: 2.5,
            rotation: rot_z_90(),
            translation: Vec3::new(1.0, -2.0, 0.5),
        };
        let model = random_points(10, 42);
        let world = gt.apply_all(&model);

        let est = solve_helmert(&model, &world).unwrap();
        assert!((est.scale - 2.5).abs() < 1e-6, "scale {}", est.scale);
        assert!((est.rotation - gt.rotation).norm() < 1e-6);
        assert!((est.translation - gt.translation).norm() < 1e-6);

        let rtr = est.rotation.transpose() * est.rotation;
        assert!((rtr - Mat3::identity()).norm() < 1e-9);
        assert!((est.rotation.determinant() - 1.0).abs() < 1e-9);

        let residuals = est.residuals(&model, &world);
        let rmse = (residuals.iter().map(|r| r * r).sum::<Real>() / residuals.len() as Real).sqrt();
        assert!(rmse < 1e-9, "rmse {}", rmse);
        for (m, w) in model.iter().zip(&world) {
            assert!((est.apply(m) - w).norm() < 1e-6);
        }
    }

    #[test]
    fn reflected_world_still_yields_proper_rotation() {
        let model = random_points(8, 3);
        let world: Vec<Pt3> = model.iter().map(|p| Pt3::new(p.x, p.y, -p.z)).collect();
        let est = solve_helmert(&model, &world).unwrap();
        assert!((est.rotation.determinant() - 1.0).abs() < 1e-9);
        assert!(est.scale > 0.0);
    }

    #[test]
    fn two_points_is_not_enough() {
        let model = vec![Pt3::new(0.0, 0.0, 0.0), Pt3::new(1.0, 0.0, 0.0)];
        let err = solve_helmert(&model, &model).unwrap_err();
        assert!(err.to_string().contains("at least 3"), "{}", err);
    }

    #[test]
    fn collinear_points_are_rejected() {
        let model = vec![
            Pt3::new(0.0, 0.0, 0.0),
            Pt3::new(1.0, 1.0, 1.0),
            Pt3::new(2.0, 2.0, 2.0),
        ];
        let world = vec![
            Pt3::new(0.0, 0.0, 0.0),
            Pt3::new(1.0, 0.0, 0.0),
            Pt3::new(0.0, 1.0, 0.0),
        ];
        let err = solve_helmert(&model, &world).unwrap_err();
        assert!(err.to_string().contains("collinear"), "{}", err);
    }

    #[test]
    fn nanometre_scale_cloud_is_solvable() {
        let gt = HelmertTransform {
            scale: 3.0,
            rotation: rot_z_90(),
            translation: Vec3::new(2e-9, -1e-9, 5e-10),
        };
        let model: Vec<Pt3> = random_points(6, 5).iter().map(|p| Pt3::from(p.coords * 1e-9)).collect();
        let world = gt.apply_all(&model);

        let est = solve_helmert(&model, &world).unwrap();
        assert!((est.scale - 3.0).abs() < 1e-6, "scale {}", est.scale);
        assert!((est.rotation - gt.rotation).norm() < 1e-6);
        assert!((est.translation - gt.translation).norm() < 1e-15);
    }

    #[test]
    fn nanometre_scale_collinear_points_are_rejected() {
        let model: Vec<Pt3> = (0..4).map(|i| Pt3::new(1e-9 * i as Real, 2e-9 * i as Real, 0.0)).collect();
        let err = solve_helmert(&model, &model).unwrap_err();
        assert!(err.to_string().contains("collinear"), "{}", err);
    }

    #[test]
    fn identical_points_are_rejected() {
        let model = vec![Pt3::new(0.1, 0.2, 0.3); 4];
        let world = random_points(4, 9);
        assert!(matches!(solve_helmert(&model, &world), Err(HelmertError::Collinear)));
    }

    #[test]
    fn identity_reproduces_points_exactly() {
        let pts = random_points(20, 11);
        assert_eq!(HelmertTransform::identity().apply_all(&pts), pts);
    }

    #[test]
    fn inverse_and_compose_cancel() {
        let t = HelmertTransform {
            scale: 0.75,
            rotation: rot_z_90(),
            translation: Vec3::new(3.0, 1.0, -4.0),
        };
        let round = t.compose(&t.inverse());
        assert!((round.matrix() - Mat4::identity()).norm() < 1e-12);

        let p = Pt3::new(0.3, -1.2, 2.0);
        let m = t.matrix() * p.to_homogeneous();
        assert!((Pt3::new(m.x, m.y, m.z) - t.apply(&p)).norm() < 1e-12);
    }
}
