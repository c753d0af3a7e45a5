//! Anchor resolution: turn an [`AnchorSpec`] plus frames into an [`AnchorResult`].
//!
//! Expected failures (no detector, no markers, gate failure, no intrinsics) are
//! reported through `failure_reason`; only I/O and malformed inputs are errors.

use std::collections::BTreeMap;
use std::fmt;

use anchor_core::{Geodetic, Intrinsics, Real};
use anyhow::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::anchor_spec::{AnchorKind, AnchorSpec};
use crate::board::{BoardSpec, MarkerFamily};
use crate::board_pose::{estimate_board_poses, AnchorPose, BoardPoseOptions};
use crate::frames::Frame;
use crate::markers::{
    scan_frames, CapabilityMissing, FrameScan, MarkerDetectionSummary, MarkerDetector, ScanOutcome,
};
use crate::quality_gate::{
    evaluate_pose_quality, GateCriterion, GateStats, QualityGateConfig, QualityGateResult,
};
use crate::reference_frame::MarkerEvidence;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Confidence {
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "MED")]
    Med,
    #[serde(rename = "LOW")]
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    ArucoUnavailable,
    NoMarkersDetected,
    InsufficientMarkers,
    PoseQualityGateFailed,
    MissingIntrinsics,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::ArucoUnavailable => "aruco_unavailable",
            FailureReason::NoMarkersDetected => "no_markers_detected",
            FailureReason::InsufficientMarkers => "insufficient_markers",
            FailureReason::PoseQualityGateFailed => "pose_quality_gate_failed",
            FailureReason::MissingIntrinsics => "missing_intrinsics",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw evidence gathered while resolving an anchor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnchorEvidence {
    pub frames_scanned: usize,
    pub frames_with_markers: usize,
    pub detected_ids: Vec<u32>,
    pub per_id_counts: BTreeMap<u32, usize>,
    pub avg_edge_px: Option<Real>,
    pub poses_with_valid_board: usize,
    pub reproj_error_stats: Option<GateStats>,
    pub gate_failures: Vec<GateCriterion>,
    pub board_id: Option<String>,
    pub geodetic: Option<Geodetic>,
    pub time_iso8601: Option<String>,
}

impl AnchorEvidence {
    fn from_summary(summary: &MarkerDetectionSummary) -> Self {
        Self {
            frames_scanned: summary.frames_scanned,
            frames_with_markers: summary.frames_with_markers,
            detected_ids: summary.detected_ids(),
            per_id_counts: summary.per_id_counts.clone(),
            avg_edge_px: summary.avg_edge_px(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorResult {
    pub anchor_type: String,
    /// Evidence was sufficient to establish the anchor.
    pub resolved: bool,
    /// The anchor was used to move geometry.
    pub applied: bool,
    pub scale_factor: Option<Real>,
    pub origin_xyz: Option<[Real; 3]>,
    pub rotation_quat_wxyz: Option<[Real; 4]>,
    pub confidence: Confidence,
    pub warnings: Vec<String>,
    pub evidence: AnchorEvidence,
    pub failure_reason: Option<FailureReason>,
    pub capability_missing: bool,
    pub guidance: Option<String>,
}

impl AnchorResult {
    fn unresolved(anchor_type: &str, reason: FailureReason) -> Self {
        Self {
            anchor_type: anchor_type.to_string(),
            resolved: false,
            applied: false,
            scale_factor: None,
            origin_xyz: None,
            rotation_quat_wxyz: None,
            confidence: Confidence::Low,
            warnings: Vec::new(),
            evidence: AnchorEvidence::default(),
            failure_reason: Some(reason),
            capability_missing: false,
            guidance: None,
        }
    }

    fn capability_missing(anchor_type: &str, missing: CapabilityMissing) -> Self {
        let mut result = Self::unresolved(anchor_type, FailureReason::ArucoUnavailable);
        result.capability_missing = true;
        result.warnings.push(missing.reason);
        result.guidance = Some(missing.guidance);
        result
    }

    /// Captured but deliberately not applied to geometry.
    fn captured(anchor_type: &str, evidence: AnchorEvidence, warning: String) -> Self {
        Self {
            anchor_type: anchor_type.to_string(),
            resolved: true,
            applied: false,
            scale_factor: None,
            origin_xyz: None,
            rotation_quat_wxyz: None,
            confidence: Confidence::Low,
            warnings: vec![warning],
            evidence,
            failure_reason: None,
            capability_missing: false,
            guidance: None,
        }
    }

    /// Placeholder when the run requested no anchor.
    pub fn not_requested() -> Self {
        Self {
            anchor_type: "none".to_string(),
            resolved: false,
            applied: false,
            scale_factor: None,
            origin_xyz: None,
            rotation_quat_wxyz: None,
            confidence: Confidence::Low,
            warnings: vec!["no anchor requested".to_string()],
            evidence: AnchorEvidence::default(),
            failure_reason: None,
            capability_missing: false,
            guidance: None,
        }
    }

    pub fn failure_reason_str(&self) -> Option<&'static str> {
        self.failure_reason.as_ref().map(FailureReason::as_str)
    }
}

/// Resolution output: the result plus the per-frame data behind it.
#[derive(Debug, Clone)]
pub struct AnchorOutcome {
    pub result: AnchorResult,
    pub poses: Vec<AnchorPose>,
    pub gate: Option<QualityGateResult>,
    pub marker_evidence: Option<MarkerEvidence>,
}

impl AnchorOutcome {
    fn bare(result: AnchorResult) -> Self {
        Self {
            result,
            poses: Vec::new(),
            gate: None,
            marker_evidence: None,
        }
    }
}

/// Shared inputs for resolving any anchor kind.
pub struct AnchorContext<'a> {
    pub detector: &'a dyn MarkerDetector,
    pub frames: &'a [Frame],
    pub intrinsics: Option<&'a Intrinsics>,
    pub pose_options: &'a BoardPoseOptions,
    pub gate_config: &'a QualityGateConfig,
}

/// Metric size of one normalized image unit at the observed marker size.
///
/// `marker_size_m · fx / avg_edge_px`; `None` without a measured edge or focal length.
pub fn marker_scale_factor(marker_size_m: Real, avg_edge_px: Option<Real>, fx: Real) -> Option<Real> {
    let edge = avg_edge_px?;
    (edge > 0.0 && fx > 0.0 && marker_size_m > 0.0).then(|| marker_size_m * fx / edge)
}

pub fn resolve_anchor(spec: &AnchorSpec, ctx: &AnchorContext<'_>) -> Result<AnchorOutcome> {
    let anchor_type = spec.kind.type_name();
    let outcome = match &spec.kind {
        AnchorKind::MarkerBoard { board, marker_ids } => {
            resolve_marker_board(board, marker_ids.as_deref(), ctx)?
        }
        AnchorKind::MarkerPair {
            family,
            marker_ids,
            marker_size_m,
        } => resolve_marker_pair(*family, *marker_ids, *marker_size_m, ctx)?,
        AnchorKind::GeoPoint { geodetic } => AnchorOutcome::bare(AnchorResult::captured(
            anchor_type,
            AnchorEvidence {
                geodetic: Some(*geodetic),
                ..AnchorEvidence::default()
            },
            "geodetic anchor captured as metadata; geometry is not moved in this version".into(),
        )),
        AnchorKind::TimeAnchor { time_iso8601 } => AnchorOutcome::bare(AnchorResult::captured(
            anchor_type,
            AnchorEvidence {
                time_iso8601: Some(time_iso8601.clone()),
                ..AnchorEvidence::default()
            },
            "time anchor captured as metadata; geometry is not moved in this version".into(),
        )),
    };

    match outcome.result.failure_reason {
        None => info!(
            "{} anchor resolved (applied: {}, confidence: {:?})",
            anchor_type, outcome.result.applied, outcome.result.confidence
        ),
        Some(reason) => warn!("{} anchor not resolved: {}", anchor_type, reason),
    }
    Ok(outcome)
}

/// Drop markers rejected by `keep` and summarize what is left.
fn retain_markers(
    scans: Vec<FrameScan>,
    keep: impl Fn(u32) -> bool,
) -> (Vec<FrameScan>, MarkerDetectionSummary) {
    let scans: Vec<FrameScan> = scans
        .into_iter()
        .map(|scan| FrameScan {
            markers: scan.markers.into_iter().filter(|m| keep(m.id)).collect(),
            frame: scan.frame,
        })
        .collect();
    let summary = scans
        .iter()
        .map(MarkerDetectionSummary::from_scan)
        .fold(MarkerDetectionSummary::default(), MarkerDetectionSummary::merge);
    (scans, summary)
}

fn resolve_marker_board(
    board: &BoardSpec,
    allowed_ids: Option<&[u32]>,
    ctx: &AnchorContext<'_>,
) -> Result<AnchorOutcome> {
    const KIND: &str = "marker_board";
    let Some(intrinsics) = ctx.intrinsics else {
        return Ok(AnchorOutcome::bare(AnchorResult::unresolved(
            KIND,
            FailureReason::MissingIntrinsics,
        )));
    };

    let scans = match scan_frames(ctx.detector, ctx.frames, board.family())? {
        ScanOutcome::Unavailable(missing) => {
            return Ok(AnchorOutcome::bare(AnchorResult::capability_missing(KIND, missing)))
        }
        ScanOutcome::Scanned { scans, .. } => scans,
    };

    // Foreign markers in view must not skew evidence or scale.
    let (scans, summary) = retain_markers(scans, |id| {
        board.contains_id(id) && allowed_ids.is_none_or(|ids| ids.contains(&id))
    });

    let mut evidence = AnchorEvidence::from_summary(&summary);
    evidence.board_id = Some(board.board_id().to_string());

    if summary.total_detections() == 0 {
        let mut result = AnchorResult::unresolved(KIND, FailureReason::NoMarkersDetected);
        result.evidence = evidence;
        return Ok(AnchorOutcome::bare(result));
    }

    let camera = intrinsics.camera();
    let poses = estimate_board_poses(board, &camera, &scans, allowed_ids, ctx.pose_options);
    evidence.poses_with_valid_board = poses.len();
    if poses.is_empty() {
        let mut result = AnchorResult::unresolved(KIND, FailureReason::InsufficientMarkers);
        result.warnings.push(format!(
            "no frame showed at least {} board markers with a solvable pose",
            ctx.pose_options.min_markers
        ));
        result.evidence = evidence;
        return Ok(AnchorOutcome::bare(result));
    }

    let gate = evaluate_pose_quality(&poses, ctx.gate_config);
    evidence.reproj_error_stats = Some(gate.stats.clone());
    evidence.gate_failures = gate.failures.clone();

    let scale_factor = marker_scale_factor(board.marker_size_m(), summary.avg_edge_px(), intrinsics.fx);
    let marker_evidence = MarkerEvidence::from_poses(&poses, &gate, scale_factor);

    let result = if gate.passed {
        let confidence = if scale_factor.is_some() {
            Confidence::High
        } else {
            Confidence::Med
        };
        let mut warnings = Vec::new();
        if scale_factor.is_none() {
            warnings.push("scale factor could not be derived from marker edges".to_string());
        }
        AnchorResult {
            anchor_type: KIND.to_string(),
            resolved: true,
            applied: true,
            scale_factor,
            origin_xyz: marker_evidence.mean_camera_position(),
            rotation_quat_wxyz: marker_evidence.mean_camera_rotation(),
            confidence,
            warnings,
            evidence,
            failure_reason: None,
            capability_missing: false,
            guidance: None,
        }
    } else {
        let mut result = AnchorResult::unresolved(KIND, FailureReason::PoseQualityGateFailed);
        result.scale_factor = scale_factor;
        result.warnings = gate
            .failures
            .iter()
            .map(|c| format!("quality gate failed: {}", c))
            .collect();
        result.evidence = evidence;
        result
    };

    Ok(AnchorOutcome {
        result,
        poses,
        gate: Some(gate),
        marker_evidence: Some(marker_evidence),
    })
}

fn resolve_marker_pair(
    family: MarkerFamily,
    marker_ids: [u32; 2],
    marker_size_m: Real,
    ctx: &AnchorContext<'_>,
) -> Result<AnchorOutcome> {
    const KIND: &str = "marker_pair";
    let Some(intrinsics) = ctx.intrinsics else {
        return Ok(AnchorOutcome::bare(AnchorResult::unresolved(
            KIND,
            FailureReason::MissingIntrinsics,
        )));
    };

    let scans = match scan_frames(ctx.detector, ctx.frames, family)? {
        ScanOutcome::Unavailable(missing) => {
            return Ok(AnchorOutcome::bare(AnchorResult::capability_missing(KIND, missing)))
        }
        ScanOutcome::Scanned { scans, .. } => scans,
    };

    // Only the pair's markers count toward evidence and scale.
    let (_, summary) = retain_markers(scans, |id| marker_ids.contains(&id));
    let evidence = AnchorEvidence::from_summary(&summary);

    if summary.total_detections() == 0 {
        let mut result = AnchorResult::unresolved(KIND, FailureReason::NoMarkersDetected);
        result.evidence = evidence;
        return Ok(AnchorOutcome::bare(result));
    }
    if marker_ids.iter().any(|id| !summary.per_id_counts.contains_key(id)) {
        let mut result = AnchorResult::unresolved(KIND, FailureReason::InsufficientMarkers);
        result
            .warnings
            .push(format!("marker pair {:?} was not fully observed", marker_ids));
        result.evidence = evidence;
        return Ok(AnchorOutcome::bare(result));
    }

    let scale_factor = marker_scale_factor(marker_size_m, summary.avg_edge_px(), intrinsics.fx);
    let result = AnchorResult {
        anchor_type: KIND.to_string(),
        resolved: true,
        applied: false,
        scale_factor,
        origin_xyz: None,
        rotation_quat_wxyz: None,
        confidence: if scale_factor.is_some() {
            Confidence::Med
        } else {
            Confidence::Low
        },
        warnings: vec!["marker pair constrains scale only; origin is not applied".to_string()],
        evidence,
        failure_reason: None,
        capability_missing: false,
        guidance: None,
    };
    Ok(AnchorOutcome::bare(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor_spec::ScanRegime;
    use crate::markers::{DetectedMarker, DetectionsFileDetector, UnavailableDetector};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    fn frames(n: usize) -> Vec<Frame> {
        (0..n)
            .map(|i| Frame {
                index: i,
                path: PathBuf::from(format!("f{i}.png")),
            })
            .collect()
    }

    fn square(id: u32, side: Real) -> DetectedMarker {
        DetectedMarker {
            id,
            corners: [[100.0, 100.0], [100.0 + side, 100.0], [100.0 + side, 100.0 + side], [100.0, 100.0 + side]],
        }
    }

    fn intrinsics() -> Intrinsics {
        Intrinsics::pinhole(800.0, 800.0, 640.0, 360.0, 1280, 720)
    }

    fn run(spec: &AnchorSpec, detector: &dyn MarkerDetector, intr: Option<&Intrinsics>) -> AnchorOutcome {
        let frames = frames(3);
        let ctx = AnchorContext {
            detector,
            frames: &frames,
            intrinsics: intr,
            pose_options: &BoardPoseOptions::default(),
            gate_config: &QualityGateConfig::default(),
        };
        resolve_anchor(spec, &ctx).unwrap()
    }

    fn board_spec() -> AnchorSpec {
        AnchorSpec {
            regime: ScanRegime::SmallObject,
            kind: AnchorKind::MarkerBoard {
                board: BoardSpec::new(MarkerFamily::Aruco4x4, 2, 2, 0.05, 0.01).unwrap(),
                marker_ids: None,
            },
        }
    }

    #[test]
    fn scale_factor_relates_marker_size_to_edge_pixels() {
        let s = marker_scale_factor(0.05, Some(40.0), 800.0).unwrap();
        assert!((s - 1.0).abs() < 1e-12);
        assert!(marker_scale_factor(0.05, None, 800.0).is_none());
        assert!(marker_scale_factor(0.05, Some(0.0), 800.0).is_none());
    }

    #[test]
    fn missing_intrinsics_is_reported() {
        let detector = UnavailableDetector::for_frames_dir(Path::new("/frames"));
        let outcome = run(&board_spec(), &detector, None);
        assert_eq!(outcome.result.failure_reason, Some(FailureReason::MissingIntrinsics));
        assert_eq!(outcome.result.confidence, Confidence::Low);
    }

    #[test]
    fn unavailable_detector_is_capability_missing() {
        let detector = UnavailableDetector::for_frames_dir(Path::new("/frames"));
        let outcome = run(&board_spec(), &detector, Some(&intrinsics()));
        let r = outcome.result;
        assert_eq!(r.failure_reason_str(), Some("aruco_unavailable"));
        assert!(r.capability_missing);
        assert!(r.guidance.unwrap().contains("markers.json"));
        assert!(!r.resolved && !r.applied);
    }

    #[test]
    fn empty_scans_mean_no_markers() {
        let detector = DetectionsFileDetector::from_records(MarkerFamily::Aruco4x4, HashMap::new()).unwrap();
        let outcome = run(&board_spec(), &detector, Some(&intrinsics()));
        assert_eq!(outcome.result.failure_reason, Some(FailureReason::NoMarkersDetected));
        assert_eq!(outcome.result.evidence.frames_scanned, 3);
        assert!(!outcome.result.capability_missing);
    }

    #[test]
    fn single_markers_are_insufficient_for_a_board_pose() {
        let mut records = HashMap::new();
        records.insert("f0.png".to_string(), vec![square(0, 40.0)]);
        records.insert("f1.png".to_string(), vec![square(3, 40.0)]);
        let detector = DetectionsFileDetector::from_records(MarkerFamily::Aruco4x4, records).unwrap();
        let outcome = run(&board_spec(), &detector, Some(&intrinsics()));
        assert_eq!(outcome.result.failure_reason, Some(FailureReason::InsufficientMarkers));
        assert_eq!(outcome.result.evidence.detected_ids, vec![0, 3]);
    }

    #[test]
    fn foreign_markers_do_not_enter_board_evidence() {
        // Board ids are 0..4; id 9 is a smaller marker from another target.
        let mut records = HashMap::new();
        records.insert("f0.png".to_string(), vec![square(0, 40.0), square(9, 10.0)]);
        records.insert("f1.png".to_string(), vec![square(3, 40.0), square(9, 10.0)]);
        records.insert("f2.png".to_string(), vec![square(9, 10.0)]);
        let detector = DetectionsFileDetector::from_records(MarkerFamily::Aruco4x4, records).unwrap();
        let r = run(&board_spec(), &detector, Some(&intrinsics())).result;
        assert_eq!(r.failure_reason, Some(FailureReason::InsufficientMarkers));
        assert_eq!(r.evidence.detected_ids, vec![0, 3]);
        assert!(!r.evidence.per_id_counts.contains_key(&9));
        assert_eq!(r.evidence.frames_scanned, 3);
        assert_eq!(r.evidence.frames_with_markers, 2);
        assert!((r.evidence.avg_edge_px.unwrap() - 40.0).abs() < 1e-12);
    }

    #[test]
    fn board_marker_subset_filters_evidence() {
        let mut records = HashMap::new();
        records.insert("f0.png".to_string(), vec![square(0, 40.0), square(1, 20.0)]);
        let detector = DetectionsFileDetector::from_records(MarkerFamily::Aruco4x4, records).unwrap();
        let spec = AnchorSpec {
            regime: ScanRegime::SmallObject,
            kind: AnchorKind::MarkerBoard {
                board: BoardSpec::new(MarkerFamily::Aruco4x4, 2, 2, 0.05, 0.01).unwrap(),
                marker_ids: Some(vec![0]),
            },
        };
        let r = run(&spec, &detector, Some(&intrinsics())).result;
        assert_eq!(r.evidence.detected_ids, vec![0]);
        assert!((r.evidence.avg_edge_px.unwrap() - 40.0).abs() < 1e-12);
    }

    #[test]
    fn only_foreign_markers_means_no_markers() {
        let mut records = HashMap::new();
        records.insert("f0.png".to_string(), vec![square(9, 10.0), square(12, 10.0)]);
        let detector = DetectionsFileDetector::from_records(MarkerFamily::Aruco4x4, records).unwrap();
        let r = run(&board_spec(), &detector, Some(&intrinsics())).result;
        assert_eq!(r.failure_reason, Some(FailureReason::NoMarkersDetected));
        assert!(r.evidence.detected_ids.is_empty());
    }

    #[test]
    fn marker_pair_resolves_scale_without_applying() {
        let mut records = HashMap::new();
        records.insert("f0.png".to_string(), vec![square(3, 40.0), square(7, 40.0), square(9, 10.0)]);
        records.insert("f2.png".to_string(), vec![square(7, 40.0)]);
        let detector = DetectionsFileDetector::from_records(MarkerFamily::Aruco4x4, records).unwrap();
        let spec = AnchorSpec {
            regime: ScanRegime::RoomBuilding,
            kind: AnchorKind::MarkerPair {
                family: MarkerFamily::Aruco4x4,
                marker_ids: [3, 7],
                marker_size_m: 0.05,
            },
        };
        let r = run(&spec, &detector, Some(&intrinsics())).result;
        assert!(r.resolved && !r.applied);
        assert!((r.scale_factor.unwrap() - 1.0).abs() < 1e-12);
        assert_eq!(r.evidence.detected_ids, vec![3, 7]);
        assert_eq!(r.confidence, Confidence::Med);
    }

    #[test]
    fn marker_pair_with_one_id_missing_is_insufficient() {
        let mut records = HashMap::new();
        records.insert("f0.png".to_string(), vec![square(3, 40.0)]);
        let detector = DetectionsFileDetector::from_records(MarkerFamily::Aruco4x4, records).unwrap();
        let spec = AnchorSpec {
            regime: ScanRegime::SmallObject,
            kind: AnchorKind::MarkerPair {
                family: MarkerFamily::Aruco4x4,
                marker_ids: [3, 7],
                marker_size_m: 0.05,
            },
        };
        let r = run(&spec, &detector, Some(&intrinsics())).result;
        assert_eq!(r.failure_reason, Some(FailureReason::InsufficientMarkers));
    }

    #[test]
    fn geodetic_and_time_anchors_are_captured_not_applied() {
        let detector = UnavailableDetector::for_frames_dir(Path::new("/frames"));
        let geo = AnchorSpec {
            regime: ScanRegime::Aerial,
            kind: AnchorKind::GeoPoint {
                geodetic: Geodetic::new(10.0, 20.0, 30.0),
            },
        };
        let r = run(&geo, &detector, None).result;
        assert!(r.resolved && !r.applied);
        assert!(r.failure_reason.is_none());
        assert_eq!(r.evidence.geodetic, Some(Geodetic::new(10.0, 20.0, 30.0)));

        let time = AnchorSpec {
            regime: ScanRegime::Aerial,
            kind: AnchorKind::TimeAnchor {
                time_iso8601: "2024-05-01T12:00:00Z".into(),
            },
        };
        let r = run(&time, &detector, None).result;
        assert!(r.resolved && !r.applied);
        assert_eq!(r.anchor_type, "time_anchor");
    }

    #[test]
    fn result_serializes_reason_and_confidence_strings() {
        let detector = UnavailableDetector::for_frames_dir(Path::new("/frames"));
        let r = run(&board_spec(), &detector, Some(&intrinsics())).result;
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["failure_reason"], "aruco_unavailable");
        assert_eq!(json["confidence"], "LOW");
    }
}
