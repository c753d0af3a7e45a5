//! JSON artifact layout under a run's output directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::anchors::AnchorResult;
use crate::board::BoardSpec;
use crate::board_pose::AnchorPose;

pub const ANCHOR_DIR: &str = "anchor";
pub const ANCHOR_POSES_FILE: &str = "anchor_poses.json";
pub const ANCHOR_SUMMARY_FILE: &str = "anchor_summary.json";
pub const REFERENCE_FRAME_FILE: &str = "reference_frame.json";
pub const RUN_FILE: &str = "run.json";

pub fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))
}

/// Pretty-print `value` to `path`, creating parent directories.
pub fn write_json_pretty<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json + "\n").with_context(|| format!("failed to write {}", path.display()))
}

#[derive(Debug, Serialize)]
struct AnchorPosesFile<'a> {
    board: Option<&'a BoardSpec>,
    poses: &'a [AnchorPose],
}

/// Anchor summary as written to disk.
#[derive(Debug, Serialize)]
pub struct AnchorSummary<'a> {
    #[serde(flatten)]
    pub result: &'a AnchorResult,
    pub board_spec: Option<&'a BoardSpec>,
    pub pose_count: usize,
}

/// Where each anchor artifact lives for one output directory.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    root: PathBuf,
}

impl ArtifactPaths {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            root: output_dir.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn anchor_poses(&self) -> PathBuf {
        self.root.join(ANCHOR_DIR).join(ANCHOR_POSES_FILE)
    }

    pub fn anchor_summary(&self) -> PathBuf {
        self.root.join(ANCHOR_DIR).join(ANCHOR_SUMMARY_FILE)
    }

    pub fn reference_frame(&self) -> PathBuf {
        self.root.join(REFERENCE_FRAME_FILE)
    }

    pub fn run(&self) -> PathBuf {
        self.root.join(RUN_FILE)
    }

    pub fn write_anchor_poses(&self, board: Option<&BoardSpec>, poses: &[AnchorPose]) -> Result<PathBuf> {
        let path = self.anchor_poses();
        write_json_pretty(&path, &AnchorPosesFile { board, poses })?;
        Ok(path)
    }

    pub fn write_anchor_summary(
        &self,
        result: &AnchorResult,
        board: Option<&BoardSpec>,
        pose_count: usize,
    ) -> Result<PathBuf> {
        let path = self.anchor_summary();
        write_json_pretty(
            &path,
            &AnchorSummary {
                result,
                board_spec: board,
                pose_count,
            },
        )?;
        Ok(path)
    }
}
