//! Levenberg-Marquardt refinement of a rigid pose on pixel reprojection error.
//!
//! The pose is parameterized by a left-multiplied rotation increment (axis-angle)
//! and an additive translation increment around the initial guess. Jacobians are
//! central differences, which keeps the problem independent of the distortion model.

use anchor_core::{Iso3, PinholeCamera, Pt2, Pt3, Real, Vec3};
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use log::debug;
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn, Translation3, UnitQuaternion};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::HomographyError;

#[derive(Debug, Error)]
pub enum PoseError {
    #[error("need at least {needed} correspondences, got {got}")]
    NotEnoughPoints { needed: usize, got: usize },
    #[error("point sets differ in length ({0} vs {1})")]
    LengthMismatch(usize, usize),
    #[error("homography failed: {0}")]
    Homography(#[from] HomographyError),
    #[error("degenerate pose: {0}")]
    Degenerate(&'static str),
    #[error("point {0} projects behind the camera")]
    NotProjectable(usize),
    #[error("refinement did not converge after {0} evaluations")]
    NotConverged(usize),
    #[error("svd failed")]
    SvdFailed,
}

/// Solver tolerances for [`refine_pose_lm`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineOptions {
    /// Evaluation budget is `max_iters * (6 + 1)` (MINPACK patience).
    pub max_iters: usize,
    /// Relative tolerance on the cost reduction.
    pub ftol: Real,
    /// Relative tolerance on parameter updates.
    pub xtol: Real,
    /// Orthogonality tolerance between residuals and Jacobian columns.
    pub gtol: Real,
}

impl Default for RefineOptions {
    fn default() -> Self {
        Self {
            max_iters: 100,
            ftol: 1e-12,
            xtol: 1e-12,
            gtol: 1e-12,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PoseRefinement {
    pub pose: Iso3,
    pub initial_rms_px: Real,
    pub final_rms_px: Real,
    pub evaluations: usize,
}

const FD_STEP: Real = 1e-7;

fn apply_delta(pose: &Iso3, delta: &[Real]) -> Iso3 {
    let omega = Vec3::new(delta[0], delta[1], delta[2]);
    let v = Vec3::new(delta[3], delta[4], delta[5]);
    let rotation = UnitQuaternion::from_scaled_axis(omega) * pose.rotation;
    let translation = Translation3::from(pose.translation.vector + v);
    Iso3::from_parts(translation, rotation)
}

fn residuals(
    camera: &PinholeCamera,
    pose: &Iso3,
    object: &[Pt3],
    image: &[Pt2],
) -> Result<DVector<Real>, PoseError> {
    let mut r = DVector::zeros(2 * object.len());
    for (i, (pw, px)) in object.iter().zip(image).enumerate() {
        let uv = camera
            .project_point(&pose.transform_point(pw))
            .ok_or(PoseError::NotProjectable(i))?;
        r[2 * i] = uv.x - px.x;
        r[2 * i + 1] = uv.y - px.y;
    }
    Ok(r)
}

/// Root-mean-square pixel distance between projected object points and observations.
pub fn reprojection_rms(
    camera: &PinholeCamera,
    pose: &Iso3,
    object: &[Pt3],
    image: &[Pt2],
) -> Result<Real, PoseError> {
    if object.is_empty() {
        return Err(PoseError::NotEnoughPoints { needed: 1, got: 0 });
    }
    let r = residuals(camera, pose, object, image)?;
    Ok((r.norm_squared() / object.len() as Real).sqrt())
}

/// Board-to-camera pose as a least-squares problem over a 6-vector increment.
struct PoseProblem<'a> {
    camera: &'a PinholeCamera,
    object: &'a [Pt3],
    image: &'a [Pt2],
    init: Iso3,
    params: DVector<Real>,
}

impl PoseProblem<'_> {
    fn pose_at(&self, x: &DVector<Real>) -> Iso3 {
        apply_delta(&self.init, x.as_slice())
    }

    fn residuals_at(&self, x: &DVector<Real>) -> Option<DVector<Real>> {
        residuals(self.camera, &self.pose_at(x), self.object, self.image).ok()
    }
}

impl LeastSquaresProblem<Real, Dyn, Dyn> for PoseProblem<'_> {
    type ResidualStorage = Owned<Real, Dyn>;
    type JacobianStorage = Owned<Real, Dyn, Dyn>;
    type ParameterStorage = Owned<Real, Dyn>;

    fn set_params(&mut self, x: &DVector<Real>) {
        self.params.clone_from(x);
    }

    fn params(&self) -> DVector<Real> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<Real>> {
        self.residuals_at(&self.params)
    }

    fn jacobian(&self) -> Option<DMatrix<Real>> {
        let mut j = DMatrix::zeros(2 * self.object.len(), 6);
        for k in 0..6 {
            let mut plus = self.params.clone();
            plus[k] += FD_STEP;
            let mut minus = self.params.clone();
            minus[k] -= FD_STEP;
            let diff = self.residuals_at(&plus)? - self.residuals_at(&minus)?;
            j.set_column(k, &(diff / (2.0 * FD_STEP)));
        }
        Some(j)
    }
}

/// Refine `init` (board-to-camera) by minimizing squared pixel residuals.
///
/// Fails when any point leaves the front of the camera at the initial pose, or
/// when the solver stops without meeting a convergence criterion.
pub fn refine_pose_lm(
    camera: &PinholeCamera,
    object: &[Pt3],
    image: &[Pt2],
    init: &Iso3,
    opts: &RefineOptions,
) -> Result<PoseRefinement, PoseError> {
    if object.len() != image.len() {
        return Err(PoseError::LengthMismatch(object.len(), image.len()));
    }
    if object.len() < 3 {
        return Err(PoseError::NotEnoughPoints {
            needed: 3,
            got: object.len(),
        });
    }

    let n = object.len() as Real;
    let initial_cost = residuals(camera, init, object, image)?.norm_squared();
    if !initial_cost.is_finite() {
        return Err(PoseError::Degenerate("non-finite initial residual"));
    }

    let problem = PoseProblem {
        camera,
        object,
        image,
        init: *init,
        params: DVector::zeros(6),
    };
    let lm = LevenbergMarquardt::new()
        .with_ftol(opts.ftol)
        .with_xtol(opts.xtol)
        .with_gtol(opts.gtol)
        .with_patience(opts.max_iters.max(1));
    let (problem, report) = lm.minimize(problem);

    if !report.termination.was_successful() {
        debug!("pose refinement stopped: {:?}", report.termination);
        return Err(PoseError::NotConverged(report.number_of_evaluations));
    }

    let pose = problem.pose_at(&problem.params);
    let final_cost = residuals(camera, &pose, object, image)?.norm_squared();
    Ok(PoseRefinement {
        pose,
        initial_rms_px: (initial_cost / n).sqrt(),
        final_rms_px: (final_cost / n).sqrt(),
        evaluations: report.number_of_evaluations,
    })
}
