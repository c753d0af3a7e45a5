//! Per-run orchestration: anchor, reference frame, georegistration, artifacts.
//!
//! A run always writes its anchor, reference-frame and run artifacts. Expected
//! failures land in the report; only malformed inputs and `require`-mode
//! georegistration failures abort with an error.

use std::path::{Path, PathBuf};

use anchor_core::{Intrinsics, Mat4, Pt3, Real, Vec3};
use anyhow::{Context, Result};
use log::{info, warn};
use serde::Serialize;

use crate::anchor_spec::{parse_anchor_spec, AnchorKind, AnchorSpec, ScanRegime};
use crate::anchors::{resolve_anchor, AnchorContext, AnchorOutcome, AnchorResult};
use crate::artifacts::{write_json_pretty, ArtifactPaths};
use crate::config::RunConfig;
use crate::frames::{check_frame_dimensions, list_frames, Frame};
use crate::geo::{
    run_georegistration, GeoregMode, GeoregReport, GeoregStatus, TransformChain, TransformEntry,
    TransformSpace,
};
use crate::markers::{probe_detector, MarkerDetector};
use crate::mesh_io::write_ply_points;
use crate::reconstruction::{CloudKind, ReconstructionOutput};
use crate::reference_frame::{select_reference_frame, AnchorInputs, ReferenceFrame, ReferenceSource};

/// Summary of one run, also written as `run.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub regime: ScanRegime,
    pub anchor: AnchorResult,
    pub reference_frame: Option<ReferenceFrame>,
    pub reference_frame_error: Option<String>,
    pub reconstruction: Option<ReconstructionOutput>,
    pub centered_cloud: Option<PathBuf>,
    pub georeg: GeoregReport,
    pub warnings: Vec<String>,
    pub artifacts: Vec<PathBuf>,
}

#[derive(Serialize)]
struct ReferenceFrameFile<'a> {
    reference_frame: Option<&'a ReferenceFrame>,
    error: Option<&'a str>,
    inputs: &'a AnchorInputs,
}

/// Runs the anchoring pipeline. Owns nothing across runs except an optional detector.
#[derive(Default)]
pub struct AnchorPipeline {
    detector: Option<Box<dyn MarkerDetector>>,
}

impl AnchorPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `detector` instead of probing the frames directory.
    pub fn with_detector(detector: Box<dyn MarkerDetector>) -> Self {
        Self {
            detector: Some(detector),
        }
    }

    pub fn run(&self, config: &RunConfig) -> Result<RunReport> {
        config.validate()?;
        let spec = parse_anchor_spec(&config.anchor).context("invalid anchor request")?;
        let regime = match &spec {
            Some(spec) => spec.regime,
            None => config.anchor.regime.parse().context("invalid anchor request")?,
        };
        info!(
            "run {} ({} regime, anchor {})",
            config.output_dir.display(),
            regime,
            spec.as_ref().map_or("none", |s| s.kind.type_name())
        );

        let paths = ArtifactPaths::new(&config.output_dir);
        let mut warnings = Vec::new();
        let mut artifacts = Vec::new();

        // ── Anchor ─────────────────────────────────────────────
        let intrinsics = load_intrinsics(config)?;
        let outcome = match &spec {
            Some(spec) => self.resolve(spec, config, intrinsics.as_ref(), &mut warnings)?,
            None => AnchorOutcome {
                result: AnchorResult::not_requested(),
                poses: Vec::new(),
                gate: None,
                marker_evidence: None,
            },
        };
        warnings.extend(outcome.result.warnings.iter().cloned());

        // ── Reconstruction ─────────────────────────────────────
        let reconstruction = match reconstruct(config) {
            Ok(out) => out,
            Err(e) => {
                warn!("reconstruction unavailable: {:#}", e);
                warnings.push(format!("reconstruction unavailable: {:#}", e));
                None
            }
        };
        let cloud = match reconstruction.as_ref().map(ReconstructionOutput::load_point_cloud) {
            Some(Ok(cloud)) => cloud,
            Some(Err(e)) => {
                warn!("point cloud unreadable: {:#}", e);
                warnings.push(format!("point cloud unreadable: {:#}", e));
                None
            }
            None => None,
        };

        // ── Reference frame ────────────────────────────────────
        let inputs = AnchorInputs {
            regime,
            allow_heuristics: config.allow_heuristics,
            user_origin: config.user_origin,
            marker: outcome.marker_evidence.clone(),
            geodetic: spec.as_ref().and_then(|s| match &s.kind {
                AnchorKind::GeoPoint { geodetic } => Some(*geodetic),
                _ => None,
            }),
        };
        let points = cloud.as_ref().map(|(_, pts)| pts.as_slice());
        let (reference_frame, reference_frame_error) = match select_reference_frame(points, &inputs) {
            Ok(frame) => (Some(frame), None),
            Err(e) => {
                warn!("reference frame refused: {}", e);
                (None, Some(e.to_string()))
            }
        };

        let mut centered_cloud = None;
        if let (Some(frame), Some((kind, pts))) = (&reference_frame, &cloud) {
            if let Some(origin) = frame.origin_xyz {
                let path = write_centered_cloud(&config.output_dir, *kind, &frame.apply(pts), origin)?;
                artifacts.push(path.clone());
                centered_cloud = Some(path);
            }
        }

        // A gated board only moves geometry when its frame was chosen and a cloud centered.
        let mut anchor = outcome.result;
        let marker_frame_applied = centered_cloud.is_some()
            && reference_frame
                .as_ref()
                .is_some_and(|f| f.source == ReferenceSource::MarkerFrame);
        if anchor.applied && !marker_frame_applied {
            info!("{} anchor resolved but not applied to geometry", anchor.anchor_type);
            anchor.applied = false;
        }

        let board = spec.as_ref().and_then(|s| match &s.kind {
            AnchorKind::MarkerBoard { board, .. } => Some(board),
            _ => None,
        });
        artifacts.push(paths.write_anchor_poses(board, &outcome.poses)?);
        artifacts.push(paths.write_anchor_summary(&anchor, board, outcome.poses.len())?);

        let reference_path = paths.reference_frame();
        write_json_pretty(
            &reference_path,
            &ReferenceFrameFile {
                reference_frame: reference_frame.as_ref(),
                error: reference_frame_error.as_deref(),
                inputs: &inputs,
            },
        )?;
        artifacts.push(reference_path);

        // ── Georegistration ────────────────────────────────────
        let georeg = run_georegistration(&config.output_dir, &config.georeg)?;
        if georeg.report.status == GeoregStatus::Skipped && config.georeg.mode != GeoregMode::Off {
            if let Some(reason) = &georeg.report.reason {
                warnings.push(format!("georegistration skipped: {}", reason));
            }
        }
        artifacts.extend(georeg.report.outputs.iter().cloned());

        let report = RunReport {
            regime,
            anchor,
            reference_frame,
            reference_frame_error,
            reconstruction,
            centered_cloud,
            georeg: georeg.report,
            warnings,
            artifacts,
        };
        write_json_pretty(&paths.run(), &report)?;
        info!("run complete: {}", paths.run().display());
        Ok(report)
    }

    fn resolve(
        &self,
        spec: &AnchorSpec,
        config: &RunConfig,
        intrinsics: Option<&Intrinsics>,
        warnings: &mut Vec<String>,
    ) -> Result<AnchorOutcome> {
        let needs_frames = matches!(
            spec.kind,
            AnchorKind::MarkerBoard { .. } | AnchorKind::MarkerPair { .. }
        );
        let frames: Vec<Frame> = if needs_frames {
            list_frames(&config.frames_dir, &config.frames)?
        } else {
            Vec::new()
        };
        if let Some(intr) = intrinsics {
            warnings.extend(check_frame_dimensions(&frames, intr));
        }

        let probed;
        let detector: &dyn MarkerDetector = match &self.detector {
            Some(d) => d.as_ref(),
            None => {
                probed = probe_detector(&config.frames_dir)?;
                probed.as_ref()
            }
        };

        let ctx = AnchorContext {
            detector,
            frames: &frames,
            intrinsics,
            pose_options: &config.pose,
            gate_config: &config.quality_gate,
        };
        resolve_anchor(spec, &ctx)
    }
}

fn load_intrinsics(config: &RunConfig) -> Result<Option<Intrinsics>> {
    let Some(path) = &config.intrinsics_path else {
        return Ok(None);
    };
    let intrinsics = Intrinsics::from_json_file(path)
        .with_context(|| format!("failed to load intrinsics {}", path.display()))?;
    intrinsics.validate()?;
    Ok(Some(intrinsics))
}

fn reconstruct(config: &RunConfig) -> Result<Option<ReconstructionOutput>> {
    let Some(backend) = config.reconstruction.backend()? else {
        return Ok(None);
    };
    info!("reconstruction backend: {}", backend.name());
    let workspace = config.output_dir.join("out");
    backend.reconstruct(&config.frames_dir, &workspace).map(Some)
}

/// Write the centered cloud and record the centering step in `out/transforms.json`.
fn write_centered_cloud(output_dir: &Path, kind: CloudKind, centered: &[Pt3], origin: [Real; 3]) -> Result<PathBuf> {
    let path = output_dir.join(kind.centered_file_name());
    write_ply_points(&path, centered)?;
    info!("wrote {} centered points to {}", centered.len(), path.display());

    let transforms = output_dir.join("out").join("transforms.json");
    let mut chain = TransformChain::load_or_default(&transforms)?;
    let shift = Mat4::new_translation(&-Vec3::from(origin));
    chain.push(TransformEntry::new("T_center", &shift, TransformSpace::Centered.as_str()));
    write_json_pretty(&transforms, &chain)?;
    Ok(path)
}
