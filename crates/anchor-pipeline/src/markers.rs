//! Fiducial marker detection behind a probe-first capability seam.
//!
//! A detector either scans a frame ([`MarkerScan::Scanned`], possibly empty) or
//! reports that it cannot look at all ([`MarkerScan::Unavailable`]). Callers must
//! branch on the latter before treating an empty scan as "nothing there".

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anchor_core::{Pt2, Real};
use anyhow::{ensure, Context, Result};
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::board::MarkerFamily;
use crate::frames::Frame;
use crate::tag_detector::TagImageDetector;

/// One detected marker: its ID and image corners (TL, TR, BR, BL) in pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedMarker {
    pub id: u32,
    pub corners: [[Real; 2]; 4],
}

impl DetectedMarker {
    pub fn corner_points(&self) -> [Pt2; 4] {
        self.corners.map(|[x, y]| Pt2::new(x, y))
    }

    /// Mean length of the four polygon edges in pixels.
    pub fn mean_edge_px(&self) -> Real {
        let c = self.corner_points();
        (0..4).map(|i| (c[(i + 1) % 4] - c[i]).norm()).sum::<Real>() / 4.0
    }
}

/// Why a detection capability is absent, and how to provide it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityMissing {
    pub reason: String,
    pub guidance: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Capability {
    Available,
    Unavailable(CapabilityMissing),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MarkerScan {
    Unavailable(CapabilityMissing),
    Scanned(Vec<DetectedMarker>),
}

pub trait MarkerDetector: Send + Sync {
    fn name(&self) -> &str;

    /// Report whether `family` can be detected at all in this environment.
    fn probe(&self, family: MarkerFamily) -> Capability;

    /// Detect markers of `family` in one frame. No markers is `Scanned(vec![])`.
    fn detect(&self, frame: &Frame, family: MarkerFamily) -> Result<MarkerScan>;
}

/// Reports a missing capability for every family, for environments without a usable backend.
#[derive(Debug, Clone)]
pub struct UnavailableDetector {
    missing: CapabilityMissing,
}

impl UnavailableDetector {
    pub fn new(missing: CapabilityMissing) -> Self {
        Self { missing }
    }

    pub fn for_frames_dir(frames_dir: &Path) -> Self {
        Self::new(CapabilityMissing {
            reason: "no fiducial marker detector is available".to_string(),
            guidance: format!(
                "export ArUco detections to {} with an aruco-capable detector and rerun",
                frames_dir.join(DetectionsFileDetector::FILE_NAME).display()
            ),
        })
    }
}

impl MarkerDetector for UnavailableDetector {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn probe(&self, _family: MarkerFamily) -> Capability {
        Capability::Unavailable(self.missing.clone())
    }

    fn detect(&self, _frame: &Frame, _family: MarkerFamily) -> Result<MarkerScan> {
        Ok(MarkerScan::Unavailable(self.missing.clone()))
    }
}

#[derive(Debug, Deserialize)]
struct DetectionsFile {
    family: MarkerFamily,
    #[serde(default)]
    frames: HashMap<String, Vec<DetectedMarker>>,
}

/// Detections exported by an external fiducial detector, keyed by frame file name.
#[derive(Debug, Clone)]
pub struct DetectionsFileDetector {
    source: PathBuf,
    family: MarkerFamily,
    frames: HashMap<String, Vec<DetectedMarker>>,
}

impl DetectionsFileDetector {
    pub const FILE_NAME: &'static str = "markers.json";

    pub fn from_records(
        family: MarkerFamily,
        frames: HashMap<String, Vec<DetectedMarker>>,
    ) -> Result<Self> {
        for (name, markers) in &frames {
            for m in markers {
                ensure!(
                    m.corners.iter().flatten().all(|v| v.is_finite()),
                    "marker {} in frame {} has non-finite corners",
                    m.id,
                    name
                );
            }
        }
        Ok(Self {
            source: PathBuf::new(),
            family,
            frames,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read marker detections {}", path.display()))?;
        let file: DetectionsFile = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse marker detections {}", path.display()))?;
        let mut detector = Self::from_records(file.family, file.frames)
            .with_context(|| format!("invalid marker detections in {}", path.display()))?;
        detector.source = path.to_path_buf();
        Ok(detector)
    }
}

impl MarkerDetector for DetectionsFileDetector {
    fn name(&self) -> &str {
        "detections_file"
    }

    fn probe(&self, family: MarkerFamily) -> Capability {
        if family == self.family {
            Capability::Available
        } else {
            Capability::Unavailable(CapabilityMissing {
                reason: format!(
                    "detections in {} were exported for {}, not {}",
                    self.source.display(),
                    self.family,
                    family
                ),
                guidance: format!("re-export detections for the {} family", family),
            })
        }
    }

    fn detect(&self, frame: &Frame, family: MarkerFamily) -> Result<MarkerScan> {
        if let Capability::Unavailable(missing) = self.probe(family) {
            return Ok(MarkerScan::Unavailable(missing));
        }
        let markers = self.frames.get(frame.name()).cloned().unwrap_or_default();
        Ok(MarkerScan::Scanned(markers))
    }
}

/// Pick the detector backend for a frames directory.
///
/// Exported detections in `markers.json` take precedence, and a malformed export is an
/// error. Otherwise frames are decoded from pixels by [`TagImageDetector`].
pub fn probe_detector(frames_dir: &Path) -> Result<Box<dyn MarkerDetector>> {
    let path = frames_dir.join(DetectionsFileDetector::FILE_NAME);
    if path.is_file() {
        info!("using marker detections from {}", path.display());
        Ok(Box::new(DetectionsFileDetector::from_file(&path)?))
    } else {
        debug!("no marker export at {}, decoding frames", path.display());
        Ok(Box::new(TagImageDetector::new()))
    }
}

/// Immutable per-frame detection record.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameScan {
    pub frame: Frame,
    pub markers: Vec<DetectedMarker>,
}

/// Run-level detection aggregates; a commutative fold over [`FrameScan`]s.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkerDetectionSummary {
    pub frames_scanned: usize,
    pub frames_with_markers: usize,
    pub per_id_counts: BTreeMap<u32, usize>,
    pub edge_length_sum_px: Real,
    pub edge_count: usize,
}

impl MarkerDetectionSummary {
    pub fn from_scan(scan: &FrameScan) -> Self {
        let mut per_id_counts = BTreeMap::new();
        for m in &scan.markers {
            *per_id_counts.entry(m.id).or_insert(0) += 1;
        }
        Self {
            frames_scanned: 1,
            frames_with_markers: usize::from(!scan.markers.is_empty()),
            per_id_counts,
            edge_length_sum_px: scan.markers.iter().map(|m| 4.0 * m.mean_edge_px()).sum(),
            edge_count: 4 * scan.markers.len(),
        }
    }

    pub fn merge(mut self, other: Self) -> Self {
        self.frames_scanned += other.frames_scanned;
        self.frames_with_markers += other.frames_with_markers;
        for (id, count) in other.per_id_counts {
            *self.per_id_counts.entry(id).or_insert(0) += count;
        }
        self.edge_length_sum_px += other.edge_length_sum_px;
        self.edge_count += other.edge_count;
        self
    }

    pub fn detected_ids(&self) -> Vec<u32> {
        self.per_id_counts.keys().copied().collect()
    }

    pub fn total_detections(&self) -> usize {
        self.per_id_counts.values().sum()
    }

    pub fn avg_edge_px(&self) -> Option<Real> {
        (self.edge_count > 0).then(|| self.edge_length_sum_px / self.edge_count as Real)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    Unavailable(CapabilityMissing),
    Scanned {
        scans: Vec<FrameScan>,
        summary: MarkerDetectionSummary,
    },
}

/// Probe the detector, then scan all frames in parallel and fold the aggregates.
pub fn scan_frames(
    detector: &dyn MarkerDetector,
    frames: &[Frame],
    family: MarkerFamily,
) -> Result<ScanOutcome> {
    if let Capability::Unavailable(missing) = detector.probe(family) {
        info!("marker detector '{}' unavailable: {}", detector.name(), missing.reason);
        return Ok(ScanOutcome::Unavailable(missing));
    }

    let results: Vec<MarkerScan> = frames
        .par_iter()
        .map(|frame| {
            detector
                .detect(frame, family)
                .with_context(|| format!("marker detection failed on {}", frame.path.display()))
        })
        .collect::<Result<_>>()?;

    let mut scans = Vec::with_capacity(frames.len());
    for (frame, result) in frames.iter().zip(results) {
        match result {
            MarkerScan::Unavailable(missing) => return Ok(ScanOutcome::Unavailable(missing)),
            MarkerScan::Scanned(markers) => scans.push(FrameScan {
                frame: frame.clone(),
                markers,
            }),
        }
    }

    let summary = scans
        .par_iter()
        .map(MarkerDetectionSummary::from_scan)
        .reduce(MarkerDetectionSummary::default, MarkerDetectionSummary::merge);
    info!(
        "scanned {} frames with '{}': {} with markers, ids {:?}",
        summary.frames_scanned,
        detector.name(),
        summary.frames_with_markers,
        summary.detected_ids()
    );
    Ok(ScanOutcome::Scanned { scans, summary })
}
