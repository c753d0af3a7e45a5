//! Robust gating of per-frame reprojection errors.
//!
//! Outliers are removed with the modified z-score `0.6745·(x − median)/MAD`;
//! the survivors are then checked against count, mean and p95 thresholds.
//! Every failing criterion is reported.

use std::fmt;

use anchor_core::{stats, Real};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::board_pose::AnchorPose;

/// Consistency constant relating MAD to the standard deviation of a normal.
const MODIFIED_Z_SCALE: Real = 0.6745;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityGateConfig {
    pub min_frames_with_pose: usize,
    pub max_mean_reproj_err_px: Real,
    pub max_p95_reproj_err_px: Real,
    /// Modified z-score above which a measurement is discarded.
    pub outlier_sigma: Real,
}

impl Default for QualityGateConfig {
    fn default() -> Self {
        Self {
            min_frames_with_pose: 10,
            max_mean_reproj_err_px: 2.0,
            max_p95_reproj_err_px: 4.0,
            outlier_sigma: 3.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateCriterion {
    MinFramesWithPose,
    MaxMeanReprojErrPx,
    MaxP95ReprojErrPx,
}

impl GateCriterion {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateCriterion::MinFramesWithPose => "min_frames_with_pose",
            GateCriterion::MaxMeanReprojErrPx => "max_mean_reproj_err_px",
            GateCriterion::MaxP95ReprojErrPx => "max_p95_reproj_err_px",
        }
    }
}

impl fmt::Display for GateCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateStats {
    pub frame_count: usize,
    pub accepted_frame_count: usize,
    pub rejected_count: usize,
    pub median_reproj_err_px: Option<Real>,
    pub mad_reproj_err_px: Option<Real>,
    pub mean_reproj_err_px: Option<Real>,
    pub p95_reproj_err_px: Option<Real>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityGateResult {
    pub passed: bool,
    pub failures: Vec<GateCriterion>,
    pub stats: GateStats,
    /// `true` for each input value that survived outlier rejection.
    pub keep_mask: Vec<bool>,
}

impl QualityGateResult {
    /// Comma-separated failing criteria, or `None` when the gate passed.
    pub fn failure_reason(&self) -> Option<String> {
        (!self.failures.is_empty()).then(|| {
            self.failures
                .iter()
                .map(GateCriterion::as_str)
                .collect::<Vec<_>>()
                .join(",")
        })
    }

    /// Items whose measurement survived outlier rejection.
    pub fn survivors<'a, T>(&'a self, items: &'a [T]) -> impl Iterator<Item = &'a T> + 'a {
        items
            .iter()
            .zip(&self.keep_mask)
            .filter_map(|(item, keep)| keep.then_some(item))
    }
}

/// Keep-mask of values whose modified z-score is within `sigma`.
///
/// With MAD = 0 (all values at the median) nothing is rejected.
pub fn mad_keep_mask(values: &[Real], sigma: Real) -> Vec<bool> {
    let (Some(med), Some(mad)) = (stats::median(values), stats::mad(values)) else {
        return Vec::new();
    };
    if mad <= 0.0 {
        return vec![true; values.len()];
    }
    values
        .iter()
        .map(|x| (MODIFIED_Z_SCALE * (x - med) / mad).abs() <= sigma)
        .collect()
}

/// Evaluate the gate over a complete set of reprojection errors.
pub fn evaluate_quality_gate(errors: &[Real], config: &QualityGateConfig) -> QualityGateResult {
    let keep_mask = mad_keep_mask(errors, config.outlier_sigma);
    let survivors: Vec<Real> = errors
        .iter()
        .zip(&keep_mask)
        .filter_map(|(e, keep)| keep.then_some(*e))
        .collect();

    let mean = stats::mean(&survivors);
    let p95 = stats::percentile(&survivors, 95.0);

    let mut failures = Vec::new();
    if survivors.len() < config.min_frames_with_pose {
        failures.push(GateCriterion::MinFramesWithPose);
    }
    if mean.map_or(true, |m| m > config.max_mean_reproj_err_px) {
        failures.push(GateCriterion::MaxMeanReprojErrPx);
    }
    if p95.map_or(true, |p| p > config.max_p95_reproj_err_px) {
        failures.push(GateCriterion::MaxP95ReprojErrPx);
    }

    let stats = GateStats {
        frame_count: errors.len(),
        accepted_frame_count: survivors.len(),
        rejected_count: errors.len() - survivors.len(),
        median_reproj_err_px: stats::median(errors),
        mad_reproj_err_px: stats::mad(errors),
        mean_reproj_err_px: mean,
        p95_reproj_err_px: p95,
    };
    debug!("quality gate stats: {:?}", stats);

    QualityGateResult {
        passed: failures.is_empty(),
        failures,
        stats,
        keep_mask,
    }
}

/// Gate a complete pose sequence on its reprojection errors.
pub fn evaluate_pose_quality(poses: &[AnchorPose], config: &QualityGateConfig) -> QualityGateResult {
    let errors: Vec<Real> = poses.iter().map(|p| p.reproj_err_px).collect();
    let result = evaluate_quality_gate(&errors, config);
    match result.failure_reason() {
        None => info!(
            "pose quality gate passed ({} of {} frames kept)",
            result.stats.accepted_frame_count, result.stats.frame_count
        ),
        Some(reason) => info!("pose quality gate failed: {}", reason),
    }
    result
}
