//! Image-backed marker detection on the `locus-core` ArUco/AprilTag detector.

use anyhow::{anyhow, Context, Result};
use locus_core::config::{DetectorConfig, TagFamily};
use locus_core::{Detector, ImageView};
use log::debug;

use crate::board::MarkerFamily;
use crate::frames::Frame;
use crate::markers::{Capability, CapabilityMissing, DetectedMarker, MarkerDetector, MarkerScan};

// 4x4_100 shares its first 50 codes with 4x4_50, so one dictionary covers both.
const ARUCO_4X4: [TagFamily; 1] = [TagFamily::ArUco4x4_100];
const APRILTAG: [TagFamily; 1] = [TagFamily::AprilTag36h11];

/// Decodes markers straight from frame pixels.
///
/// A fresh `locus_core::Detector` is built per frame, so frames can be scanned in
/// parallel against one shared instance.
#[derive(Clone, Copy)]
pub struct TagImageDetector {
    config: DetectorConfig,
}

impl Default for TagImageDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl TagImageDetector {
    pub fn new() -> Self {
        Self::with_config(DetectorConfig::default())
    }

    pub fn with_config(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// Dictionaries decoded for `family`; `None` when locus has no decoder for it.
    fn tag_families(family: MarkerFamily) -> Option<&'static [TagFamily]> {
        match family {
            MarkerFamily::Aruco4x4 => Some(&ARUCO_4X4),
            MarkerFamily::AprilTag => Some(&APRILTAG),
            MarkerFamily::Aruco5x5 => None,
        }
    }

    fn missing(family: MarkerFamily) -> CapabilityMissing {
        CapabilityMissing {
            reason: format!("the built-in tag detector cannot decode {}", family),
            guidance: "print the board with aruco_4x4 markers, or export detections to markers.json"
                .to_string(),
        }
    }
}

impl MarkerDetector for TagImageDetector {
    fn name(&self) -> &str {
        "locus"
    }

    fn probe(&self, family: MarkerFamily) -> Capability {
        match Self::tag_families(family) {
            Some(_) => Capability::Available,
            None => Capability::Unavailable(Self::missing(family)),
        }
    }

    fn detect(&self, frame: &Frame, family: MarkerFamily) -> Result<MarkerScan> {
        let Some(families) = Self::tag_families(family) else {
            return Ok(MarkerScan::Unavailable(Self::missing(family)));
        };

        let gray = image::open(&frame.path)
            .with_context(|| format!("failed to read frame {}", frame.path.display()))?
            .to_luma8();
        let (width, height) = (gray.width() as usize, gray.height() as usize);
        let view = ImageView::new(gray.as_raw(), width, height, width)
            .map_err(|e| anyhow!("frame {} has an invalid buffer: {}", frame.path.display(), e))?;

        let mut detector = Detector::with_config(self.config);
        detector.set_families(families);
        let markers: Vec<DetectedMarker> = detector
            .detect(&view)
            .into_iter()
            .map(|d| DetectedMarker {
                id: d.id,
                corners: d.corners,
            })
            .collect();
        debug!("{}: {} {} markers", frame.name(), markers.len(), family);
        Ok(MarkerScan::Scanned(markers))
    }
}
