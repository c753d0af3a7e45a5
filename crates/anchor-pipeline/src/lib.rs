//! Scan anchoring pipeline.
//!
//! Frames flow through marker detection ([`markers`]), per-frame board pose
//! estimation ([`board_pose`]) and robust gating ([`quality_gate`]) into an
//! [`AnchorResult`]. The [`reference_frame`] resolver then picks an origin, and
//! [`geo`] optionally registers the reconstruction to ground control points.
//! [`AnchorPipeline`] runs all of it for one run directory.

pub mod anchor_spec;
pub mod anchors;
pub mod artifacts;
pub mod board;
pub mod board_pose;
pub mod config;
pub mod frames;
pub mod geo;
pub mod markers;
pub mod mesh_io;
pub mod pipeline;
pub mod quality_gate;
pub mod reconstruction;
pub mod reference_frame;
pub mod tag_detector;

pub use anchor_spec::{parse_anchor_spec, AnchorKind, AnchorRequest, AnchorSpec, AnchorSpecError, ScanRegime};
pub use anchors::{resolve_anchor, AnchorContext, AnchorOutcome, AnchorResult, Confidence, FailureReason};
pub use board::{BoardSpec, BoardSpecError, MarkerFamily, OriginDefinition};
pub use board_pose::{estimate_board_pose, estimate_board_poses, AnchorPose, BoardPoseOptions};
pub use config::RunConfig;
pub use frames::{list_frames, Frame, FrameSelection};
pub use markers::{
    probe_detector, scan_frames, DetectedMarker, DetectionsFileDetector, MarkerDetectionSummary,
    MarkerDetector, MarkerScan, ScanOutcome, UnavailableDetector,
};
pub use pipeline::{AnchorPipeline, RunReport};
pub use quality_gate::{evaluate_quality_gate, GateCriterion, QualityGateConfig, QualityGateResult};
pub use reconstruction::{ReconstructionBackend, ReconstructionOutput, ReconstructionSource};
pub use reference_frame::{select_reference_frame, AnchorInputs, ReferenceFrame, ReferenceFrameError, ReferenceSource};
pub use tag_detector::TagImageDetector;
