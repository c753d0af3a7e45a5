//! Run configuration, loadable from a (partial) JSON file.

use std::path::{Path, PathBuf};

use anchor_core::Real;
use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

use crate::anchor_spec::AnchorRequest;
use crate::artifacts::read_json_file;
use crate::board_pose::BoardPoseOptions;
use crate::frames::FrameSelection;
use crate::geo::{GeoregConfig, GeoregMode};
use crate::quality_gate::QualityGateConfig;
use crate::reconstruction::ReconstructionSource;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub frames_dir: PathBuf,
    /// Run directory; every artifact is written beneath it.
    pub output_dir: PathBuf,
    pub intrinsics_path: Option<PathBuf>,
    pub anchor: AnchorRequest,
    pub frames: FrameSelection,
    pub pose: BoardPoseOptions,
    pub quality_gate: QualityGateConfig,
    /// Explicit origin in reconstruction coordinates.
    pub user_origin: Option<[Real; 3]>,
    /// Overrides the regime's heuristic policy.
    pub allow_heuristics: Option<bool>,
    pub reconstruction: ReconstructionSource,
    pub georeg: GeoregConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            frames_dir: PathBuf::from("frames"),
            output_dir: PathBuf::from("run"),
            intrinsics_path: None,
            anchor: AnchorRequest::default(),
            frames: FrameSelection::default(),
            pose: BoardPoseOptions::default(),
            quality_gate: QualityGateConfig::default(),
            user_origin: None,
            allow_heuristics: None,
            reconstruction: ReconstructionSource::None,
            georeg: GeoregConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn new(frames_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            frames_dir: frames_dir.into(),
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let config: Self = read_json_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no run could honor.
    pub fn validate(&self) -> Result<()> {
        let gate = &self.quality_gate;
        ensure!(
            gate.max_mean_reproj_err_px > 0.0 && gate.max_p95_reproj_err_px > 0.0,
            "reprojection error thresholds must be positive"
        );
        ensure!(gate.outlier_sigma > 0.0, "outlier_sigma must be positive");
        ensure!(self.frames.frames_max > 0, "frames_max must be at least 1");
        ensure!(
            self.georeg.max_rmse_m.is_finite() && self.georeg.max_rmse_m > 0.0,
            "georeg max_rmse_m must be positive"
        );
        if let Some(origin) = self.user_origin {
            ensure!(origin.iter().all(|v| v.is_finite()), "user_origin must be finite");
        }
        if self.georeg.mode == GeoregMode::Require {
            ensure!(
                self.georeg.gcp_file.is_some(),
                "georegistration is required but no gcp_file is configured"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::TransformSpace;

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(
            &path,
            r#"{
                "frames_dir": "/data/frames",
                "anchor": {"anchor": "marker", "marker_size_m": 0.04},
                "quality_gate": {"min_frames_with_pose": 3},
                "georeg": {"mode": "best_effort", "space": "centered"}
            }"#,
        )
        .unwrap();
        let config = RunConfig::from_json_file(&path).unwrap();
        assert_eq!(config.frames_dir, PathBuf::from("/data/frames"));
        assert_eq!(config.output_dir, PathBuf::from("run"));
        assert_eq!(config.quality_gate.min_frames_with_pose, 3);
        assert_eq!(config.quality_gate.max_p95_reproj_err_px, 4.0);
        assert_eq!(config.anchor.marker_size_m, Some(0.04));
        assert_eq!(config.anchor.regime, "small_object");
        assert_eq!(config.frames.frames_max, 300);
        assert_eq!(config.georeg.space, TransformSpace::Centered);
        assert_eq!(config.reconstruction, ReconstructionSource::None);
    }

    #[test]
    fn require_without_gcps_is_rejected() {
        let mut config = RunConfig::new("frames", "out");
        config.georeg.mode = GeoregMode::Require;
        assert!(config.validate().is_err());
        config.georeg.gcp_file = Some(PathBuf::from("gcps.csv"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn non_finite_origin_is_rejected() {
        let mut config = RunConfig::new("frames", "out");
        config.user_origin = Some([0.0, Real::NAN, 0.0]);
        assert!(config.validate().is_err());
    }
}
