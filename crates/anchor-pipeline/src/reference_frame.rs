//! Choice of the reconstruction's origin and orientation.
//!
//! Evidence is tried through an ordered list of [`ReferenceStrategy`]s; the first
//! one that resolves wins. Small-object scans refuse to fall back to a heuristic.

use anchor_core::{Geodetic, Pt3, Real, Vec3};
use anchor_linear::rotation::{average_quaternion, quat_wxyz};
use log::info;
use nalgebra::{Quaternion, UnitQuaternion};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::anchor_spec::ScanRegime;
use crate::anchors::Confidence;
use crate::board_pose::AnchorPose;
use crate::quality_gate::QualityGateResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceSource {
    UserDefinedOrigin,
    MarkerFrame,
    GeodeticAnchor,
    BboxCenter,
    None,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ReferenceFrameError {
    #[error(
        "{regime} scans need a user-defined origin or a gated marker frame; \
         refusing to guess an origin from the bounding box"
    )]
    Ungrounded { regime: ScanRegime },
}

/// Marker-derived camera poses that survived quality gating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerEvidence {
    pub gate_passed: bool,
    pub camera_positions_m: Vec<[Real; 3]>,
    pub camera_rotations_wxyz: Vec<[Real; 4]>,
    pub scale_factor: Option<Real>,
}

impl MarkerEvidence {
    pub fn from_poses(
        poses: &[AnchorPose],
        gate: &QualityGateResult,
        scale_factor: Option<Real>,
    ) -> Self {
        let survivors: Vec<&AnchorPose> = gate.survivors(poses).collect();
        Self {
            gate_passed: gate.passed,
            camera_positions_m: survivors.iter().map(|p| p.camera_position_m).collect(),
            camera_rotations_wxyz: survivors.iter().map(|p| p.rotation_quat_wxyz).collect(),
            scale_factor,
        }
    }

    pub fn mean_camera_position(&self) -> Option<[Real; 3]> {
        if self.camera_positions_m.is_empty() {
            return None;
        }
        let n = self.camera_positions_m.len() as Real;
        let mean = self
            .camera_positions_m
            .iter()
            .fold(Vec3::zeros(), |acc, p| acc + Vec3::from(*p))
            / n;
        Some([mean.x, mean.y, mean.z])
    }

    pub fn mean_camera_rotation(&self) -> Option<[Real; 4]> {
        let rotations: Vec<UnitQuaternion<Real>> = self
            .camera_rotations_wxyz
            .iter()
            .map(|[w, x, y, z]| UnitQuaternion::from_quaternion(Quaternion::new(*w, *x, *y, *z)))
            .collect();
        average_quaternion(&rotations).map(|q| quat_wxyz(&q))
    }
}

/// Everything the resolver may draw on for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorInputs {
    pub regime: ScanRegime,
    /// Explicit override of the regime's heuristic policy.
    pub allow_heuristics: Option<bool>,
    pub user_origin: Option<[Real; 3]>,
    pub marker: Option<MarkerEvidence>,
    pub geodetic: Option<Geodetic>,
}

impl AnchorInputs {
    pub fn new(regime: ScanRegime) -> Self {
        Self {
            regime,
            allow_heuristics: None,
            user_origin: None,
            marker: None,
            geodetic: None,
        }
    }

    pub fn resolved_allow_heuristics(&self) -> bool {
        self.allow_heuristics
            .unwrap_or_else(|| self.regime.allows_heuristics_by_default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceFrame {
    pub origin_xyz: Option<[Real; 3]>,
    pub rotation_quat_wxyz: Option<[Real; 4]>,
    pub source: ReferenceSource,
    pub confidence: Confidence,
    pub notes: Vec<String>,
    pub regime: ScanRegime,
    pub allow_heuristics: bool,
}

impl ReferenceFrame {
    /// Express points relative to the chosen origin; unchanged when there is none.
    pub fn apply(&self, points: &[Pt3]) -> Vec<Pt3> {
        match self.origin_xyz {
            Some(origin) => translate_points(points, origin),
            None => points.to_vec(),
        }
    }
}

/// Result of a single strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyOutcome {
    Resolved {
        origin_xyz: Option<[Real; 3]>,
        rotation_quat_wxyz: Option<[Real; 4]>,
        confidence: Confidence,
        note: String,
    },
    NotApplicable(String),
    Refused(ReferenceFrameError),
}

pub trait ReferenceStrategy {
    fn source(&self) -> ReferenceSource;
    fn evaluate(&self, inputs: &AnchorInputs, cloud: Option<&[Pt3]>) -> StrategyOutcome;
}

pub struct UserAnchorPoint;

impl ReferenceStrategy for UserAnchorPoint {
    fn source(&self) -> ReferenceSource {
        ReferenceSource::UserDefinedOrigin
    }

    fn evaluate(&self, inputs: &AnchorInputs, _cloud: Option<&[Pt3]>) -> StrategyOutcome {
        match inputs.user_origin {
            Some(origin) if origin.iter().all(|v| v.is_finite()) => StrategyOutcome::Resolved {
                origin_xyz: Some(origin),
                rotation_quat_wxyz: None,
                confidence: Confidence::High,
                note: "Applied user-defined origin.".to_string(),
            },
            Some(_) => StrategyOutcome::NotApplicable("user-defined origin is not finite".into()),
            None => StrategyOutcome::NotApplicable("no user-defined origin".into()),
        }
    }
}

pub struct MarkerFrame;

impl ReferenceStrategy for MarkerFrame {
    fn source(&self) -> ReferenceSource {
        ReferenceSource::MarkerFrame
    }

    fn evaluate(&self, inputs: &AnchorInputs, _cloud: Option<&[Pt3]>) -> StrategyOutcome {
        let Some(marker) = &inputs.marker else {
            return StrategyOutcome::NotApplicable("no marker evidence".into());
        };
        if !marker.gate_passed {
            return StrategyOutcome::NotApplicable("marker pose quality gate did not pass".into());
        }
        if marker.camera_positions_m.is_empty() {
            return StrategyOutcome::NotApplicable("no marker poses survived quality gating".into());
        }

        let confidence = if marker.scale_factor.is_some() {
            Confidence::High
        } else {
            Confidence::Med
        };
        StrategyOutcome::Resolved {
            origin_xyz: marker.mean_camera_position(),
            rotation_quat_wxyz: marker.mean_camera_rotation(),
            confidence,
            note: format!(
                "Applied marker-frame origin averaged over {} gated poses.",
                marker.camera_positions_m.len()
            ),
        }
    }
}

/// Small-object scans stop here when nothing grounded resolved above.
pub struct StrictRegimeGuard;

impl ReferenceStrategy for StrictRegimeGuard {
    fn source(&self) -> ReferenceSource {
        ReferenceSource::None
    }

    fn evaluate(&self, inputs: &AnchorInputs, _cloud: Option<&[Pt3]>) -> StrategyOutcome {
        if inputs.regime == ScanRegime::SmallObject && !inputs.resolved_allow_heuristics() {
            StrategyOutcome::Refused(ReferenceFrameError::Ungrounded {
                regime: inputs.regime,
            })
        } else {
            StrategyOutcome::NotApplicable(format!(
                "{} regime permits ungrounded fallbacks",
                inputs.regime
            ))
        }
    }
}

/// Geodetic anchors are captured as metadata only; geometry is left untouched.
pub struct GeodeticAnchor;

impl ReferenceStrategy for GeodeticAnchor {
    fn source(&self) -> ReferenceSource {
        ReferenceSource::GeodeticAnchor
    }

    fn evaluate(&self, inputs: &AnchorInputs, _cloud: Option<&[Pt3]>) -> StrategyOutcome {
        match inputs.geodetic {
            Some(g) => StrategyOutcome::Resolved {
                origin_xyz: None,
                rotation_quat_wxyz: None,
                confidence: Confidence::Low,
                note: format!(
                    "Geodetic anchor ({:.7}, {:.7}, {:.3} m) recorded as metadata; \
                     geometry is not moved by geodetic anchors in this version.",
                    g.lat_deg, g.lon_deg, g.alt_m
                ),
            },
            None => StrategyOutcome::NotApplicable("no geodetic anchor".into()),
        }
    }
}

pub struct BoundingBoxCenter;

impl ReferenceStrategy for BoundingBoxCenter {
    fn source(&self) -> ReferenceSource {
        ReferenceSource::BboxCenter
    }

    fn evaluate(&self, inputs: &AnchorInputs, cloud: Option<&[Pt3]>) -> StrategyOutcome {
        if !inputs.resolved_allow_heuristics() {
            return StrategyOutcome::NotApplicable(format!(
                "bounding-box heuristic disallowed for {} scans",
                inputs.regime
            ));
        }
        match cloud.and_then(compute_bbox_center) {
            Some(center) => StrategyOutcome::Resolved {
                origin_xyz: Some(center),
                rotation_quat_wxyz: None,
                confidence: Confidence::Med,
                note: "Applied bounding-box center heuristic.".to_string(),
            },
            None => StrategyOutcome::NotApplicable("point cloud unavailable".into()),
        }
    }
}

/// Strategies in precedence order.
pub fn default_strategies() -> Vec<Box<dyn ReferenceStrategy>> {
    vec![
        Box::new(UserAnchorPoint),
        Box::new(MarkerFrame),
        Box::new(StrictRegimeGuard),
        Box::new(GeodeticAnchor),
        Box::new(BoundingBoxCenter),
    ]
}

/// Resolve the run's reference frame with [`default_strategies`].
pub fn select_reference_frame(
    cloud: Option<&[Pt3]>,
    inputs: &AnchorInputs,
) -> Result<ReferenceFrame, ReferenceFrameError> {
    resolve_with(&default_strategies(), cloud, inputs)
}

pub fn resolve_with(
    strategies: &[Box<dyn ReferenceStrategy>],
    cloud: Option<&[Pt3]>,
    inputs: &AnchorInputs,
) -> Result<ReferenceFrame, ReferenceFrameError> {
    let allow_heuristics = inputs.resolved_allow_heuristics();
    let mut notes = Vec::new();

    for strategy in strategies {
        match strategy.evaluate(inputs, cloud) {
            StrategyOutcome::Resolved {
                origin_xyz,
                rotation_quat_wxyz,
                confidence,
                note,
            } => {
                notes.push(note);
                let source = strategy.source();
                info!("reference frame resolved from {:?} ({:?})", source, confidence);
                return Ok(ReferenceFrame {
                    origin_xyz,
                    rotation_quat_wxyz,
                    source,
                    confidence,
                    notes,
                    regime: inputs.regime,
                    allow_heuristics,
                });
            }
            StrategyOutcome::NotApplicable(note) => notes.push(note),
            StrategyOutcome::Refused(err) => return Err(err),
        }
    }

    info!("no reference frame could be established");
    notes.push("No origin established; geometry left in reconstruction coordinates.".into());
    Ok(ReferenceFrame {
        origin_xyz: None,
        rotation_quat_wxyz: None,
        source: ReferenceSource::None,
        confidence: Confidence::Low,
        notes,
        regime: inputs.regime,
        allow_heuristics,
    })
}

/// Center of the axis-aligned bounding box; `None` for an empty cloud.
pub fn compute_bbox_center(points: &[Pt3]) -> Option<[Real; 3]> {
    let first = points.first()?;
    let (mut lo, mut hi) = (first.coords, first.coords);
    for p in &points[1..] {
        lo = lo.inf(&p.coords);
        hi = hi.sup(&p.coords);
    }
    let c = (lo + hi) / 2.0;
    Some([c.x, c.y, c.z])
}

pub fn translate_points(points: &[Pt3], origin: [Real; 3]) -> Vec<Pt3> {
    let o = Vec3::from(origin);
    points.iter().map(|p| p - o).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cloud() -> Vec<Pt3> {
        vec![
            Pt3::new(0.0, 0.0, 0.0),
            Pt3::new(2.0, 4.0, 6.0),
            Pt3::new(1.0, -2.0, 3.0),
        ]
    }

    fn marker(gate_passed: bool, scale: Option<Real>) -> MarkerEvidence {
        MarkerEvidence {
            gate_passed,
            camera_positions_m: vec![[0.0, 0.0, 1.0], [0.2, 0.0, 1.2]],
            camera_rotations_wxyz: vec![[1.0, 0.0, 0.0, 0.0], [1.0, 0.0, 0.0, 0.0]],
            scale_factor: scale,
        }
    }

    #[test]
    fn user_origin_wins() {
        let mut inputs = AnchorInputs::new(ScanRegime::SmallObject);
        inputs.user_origin = Some([1.0, 2.0, 3.0]);
        inputs.marker = Some(marker(true, Some(1.0)));
        let frame = select_reference_frame(Some(&cloud()), &inputs).unwrap();
        assert_eq!(frame.source, ReferenceSource::UserDefinedOrigin);
        assert_eq!(frame.confidence, Confidence::High);
        assert_eq!(frame.origin_xyz, Some([1.0, 2.0, 3.0]));
    }

    #[test]
    fn gated_marker_frame_averages_camera_positions() {
        let mut inputs = AnchorInputs::new(ScanRegime::SmallObject);
        inputs.marker = Some(marker(true, Some(0.05)));
        let frame = select_reference_frame(None, &inputs).unwrap();
        assert_eq!(frame.source, ReferenceSource::MarkerFrame);
        assert_eq!(frame.confidence, Confidence::High);
        let o = frame.origin_xyz.unwrap();
        assert!((o[0] - 0.1).abs() < 1e-12 && (o[2] - 1.1).abs() < 1e-12);
        assert_eq!(frame.rotation_quat_wxyz, Some([1.0, 0.0, 0.0, 0.0]));

        inputs.marker = Some(marker(true, None));
        let frame = select_reference_frame(None, &inputs).unwrap();
        assert_eq!(frame.confidence, Confidence::Med);
    }

    #[test]
    fn small_object_without_grounding_refuses() {
        let mut inputs = AnchorInputs::new(ScanRegime::SmallObject);
        inputs.marker = Some(marker(false, Some(1.0)));
        let err = select_reference_frame(Some(&cloud()), &inputs).unwrap_err();
        assert_eq!(
            err,
            ReferenceFrameError::Ungrounded {
                regime: ScanRegime::SmallObject
            }
        );
    }

    #[test]
    fn refused_outcome_is_cloneable() {
        let refused = StrategyOutcome::Refused(ReferenceFrameError::Ungrounded {
            regime: ScanRegime::RoomBuilding,
        });
        let copy = refused.clone();
        assert_eq!(copy, refused);
        let StrategyOutcome::Refused(err) = copy else {
            panic!("expected refusal");
        };
        assert!(err.to_string().contains("refusing to guess"));
    }

    #[test]
    fn aerial_falls_back_to_bbox_center() {
        let inputs = AnchorInputs::new(ScanRegime::Aerial);
        let frame = select_reference_frame(Some(&cloud()), &inputs).unwrap();
        assert_eq!(frame.source, ReferenceSource::BboxCenter);
        assert_eq!(frame.confidence, Confidence::Med);
        assert_eq!(frame.origin_xyz, Some([1.0, 1.0, 3.0]));
        assert!(frame.allow_heuristics);
    }

    #[test]
    fn small_object_override_allows_heuristic() {
        let mut inputs = AnchorInputs::new(ScanRegime::SmallObject);
        inputs.allow_heuristics = Some(true);
        assert!(inputs.resolved_allow_heuristics());
        let frame = select_reference_frame(Some(&cloud()), &inputs).unwrap();
        assert_eq!(frame.source, ReferenceSource::BboxCenter);
    }

    #[test]
    fn disallowed_heuristic_on_large_scan_yields_none() {
        let mut inputs = AnchorInputs::new(ScanRegime::RoomBuilding);
        inputs.allow_heuristics = Some(false);
        let frame = select_reference_frame(Some(&cloud()), &inputs).unwrap();
        assert_eq!(frame.source, ReferenceSource::None);
        assert!(frame.origin_xyz.is_none());
        assert!(frame.notes.iter().any(|n| n.contains("disallowed")));
    }

    #[test]
    fn missing_cloud_yields_none_with_reason() {
        let inputs = AnchorInputs::new(ScanRegime::Aerial);
        let frame = select_reference_frame(None, &inputs).unwrap();
        assert_eq!(frame.source, ReferenceSource::None);
        assert!(frame.notes.iter().any(|n| n.contains("point cloud unavailable")));
    }

    #[test]
    fn geodetic_anchor_is_recorded_not_applied() {
        let mut inputs = AnchorInputs::new(ScanRegime::Aerial);
        inputs.geodetic = Some(Geodetic::new(46.0, 7.0, 500.0));
        let frame = select_reference_frame(Some(&cloud()), &inputs).unwrap();
        assert_eq!(frame.source, ReferenceSource::GeodeticAnchor);
        assert!(frame.origin_xyz.is_none());
        assert!(frame.notes.iter().any(|n| n.contains("not moved")));
        assert_eq!(frame.apply(&cloud()), cloud());
    }

    #[test]
    fn translate_points_moves_origin() {
        let moved = translate_points(&cloud(), [1.0, 1.0, 3.0]);
        assert_eq!(moved[0], Pt3::new(-1.0, -1.0, -3.0));
        assert_eq!(compute_bbox_center(&moved), Some([0.0, 0.0, 0.0]));
        assert!(compute_bbox_center(&[]).is_none());
    }

    #[test]
    fn reference_frame_serializes_snake_case_source() {
        let inputs = AnchorInputs::new(ScanRegime::Aerial);
        let frame = select_reference_frame(Some(&cloud()), &inputs).unwrap();
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["source"], "bbox_center");
        assert_eq!(json["confidence"], "MED");
        assert_eq!(json["regime"], "aerial");
    }
}
