//! Per-frame board pose from marker detections.
//!
//! Every visible board marker contributes its four corners; the pose is
//! initialized from a plane homography in undistorted normalized coordinates and
//! refined on pixel residuals through the full distortion model.

use std::collections::HashSet;

use anchor_core::{mat3_rows, Iso3, PinholeCamera, Pt2, Pt3, Real, Vec3};
use anchor_linear::rotation::{quat_wxyz, rvec_from_rotation};
use anchor_linear::{refine_pose_lm, PlanarPoseSolver, PoseError, RefineOptions};
use log::debug;
use nalgebra::{Translation3, UnitQuaternion};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::board::BoardSpec;
use crate::markers::FrameScan;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardPoseOptions {
    /// Minimum distinct board markers in a frame for a pose to be attempted.
    pub min_markers: usize,
    pub refine: RefineOptions,
}

impl Default for BoardPoseOptions {
    fn default() -> Self {
        Self {
            min_markers: 2,
            refine: RefineOptions::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PoseRejection {
    #[error("{found} board markers visible, need {needed}")]
    TooFewMarkers { found: usize, needed: usize },
    #[error("pose solve failed: {0}")]
    Solve(#[from] PoseError),
}

/// Board pose in one frame, plus the camera pose expressed in the board frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorPose {
    pub frame_index: usize,
    pub frame_name: String,
    /// Rodrigues vector of the board-to-camera rotation.
    pub rvec: [Real; 3],
    /// Board origin in camera coordinates (meters).
    pub tvec: [Real; 3],
    pub reproj_err_px: Real,
    pub detected_markers: usize,
    pub camera_position_m: [Real; 3],
    /// Camera-to-board rotation, row-major.
    pub camera_rotation_matrix: [[Real; 3]; 3],
    pub rotation_quat_wxyz: [Real; 4],
}

impl AnchorPose {
    fn from_board_in_camera(
        frame_index: usize,
        frame_name: &str,
        cam_from_board: &Iso3,
        reproj_err_px: Real,
        detected_markers: usize,
    ) -> Self {
        let board_from_cam = cam_from_board.inverse();
        let t = cam_from_board.translation.vector;
        let c = board_from_cam.translation.vector;
        Self {
            frame_index,
            frame_name: frame_name.to_string(),
            rvec: rvec_from_rotation(&cam_from_board.rotation),
            tvec: [t.x, t.y, t.z],
            reproj_err_px,
            detected_markers,
            camera_position_m: [c.x, c.y, c.z],
            camera_rotation_matrix: mat3_rows(board_from_cam.rotation.to_rotation_matrix().matrix()),
            rotation_quat_wxyz: quat_wxyz(&board_from_cam.rotation),
        }
    }

    pub fn camera_position(&self) -> Vec3 {
        Vec3::from(self.camera_position_m)
    }

    /// Camera-to-board rotation as a unit quaternion.
    pub fn camera_rotation(&self) -> UnitQuaternion<Real> {
        let [w, x, y, z] = self.rotation_quat_wxyz;
        UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(w, x, y, z))
    }

    pub fn board_from_camera(&self) -> Iso3 {
        Iso3::from_parts(Translation3::from(self.camera_position()), self.camera_rotation())
    }
}

/// Board corners and observed pixels for every distinct board marker in a scan.
fn correspondences(
    board: &BoardSpec,
    scan: &FrameScan,
    allowed_ids: Option<&[u32]>,
) -> (Vec<Pt3>, Vec<Pt2>, usize) {
    let mut seen = HashSet::new();
    let mut object = Vec::new();
    let mut image = Vec::new();
    for marker in &scan.markers {
        if allowed_ids.is_some_and(|ids| !ids.contains(&marker.id)) {
            continue;
        }
        let Some(corners) = board.marker_corners(marker.id) else {
            continue;
        };
        if !seen.insert(marker.id) {
            continue;
        }
        object.extend_from_slice(&corners);
        image.extend_from_slice(&marker.corner_points());
    }
    (object, image, seen.len())
}

/// Estimate the board pose in a single frame.
pub fn estimate_board_pose(
    board: &BoardSpec,
    camera: &PinholeCamera,
    scan: &FrameScan,
    allowed_ids: Option<&[u32]>,
    opts: &BoardPoseOptions,
) -> Result<AnchorPose, PoseRejection> {
    let (object, image, markers) = correspondences(board, scan, allowed_ids);
    // A single-marker board can never show two markers.
    let needed = opts.min_markers.min(board.marker_count() as usize).max(1);
    if markers < needed {
        return Err(PoseRejection::TooFewMarkers {
            found: markers,
            needed,
        });
    }

    let board_xy: Vec<Pt2> = object.iter().map(|p| Pt2::new(p.x, p.y)).collect();
    let normalized: Vec<Pt2> = image
        .iter()
        .map(|px| Pt2::from(camera.normalize_pixel(&px.coords)))
        .collect();

    let init = PlanarPoseSolver::from_normalized(&board_xy, &normalized)?;
    let refined = refine_pose_lm(camera, &object, &image, &init, &opts.refine)?;
    if !refined.final_rms_px.is_finite() {
        return Err(PoseError::Degenerate("non-finite reprojection error").into());
    }

    Ok(AnchorPose::from_board_in_camera(
        scan.frame.index,
        scan.frame.name(),
        &refined.pose,
        refined.final_rms_px,
        markers,
    ))
}

/// Estimate poses for all scans in parallel; rejected frames are dropped.
///
/// The result is ordered by frame index.
pub fn estimate_board_poses(
    board: &BoardSpec,
    camera: &PinholeCamera,
    scans: &[FrameScan],
    allowed_ids: Option<&[u32]>,
    opts: &BoardPoseOptions,
) -> Vec<AnchorPose> {
    let mut poses: Vec<AnchorPose> = scans
        .par_iter()
        .filter(|scan| !scan.markers.is_empty())
        .filter_map(|scan| match estimate_board_pose(board, camera, scan, allowed_ids, opts) {
            Ok(pose) => Some(pose),
            Err(reason) => {
                debug!("frame {} rejected: {}", scan.frame.name(), reason);
                None
            }
        })
        .collect();
    poses.sort_by_key(|p| p.frame_index);
    poses
}
