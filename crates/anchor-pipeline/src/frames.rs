//! Still-frame directories: listing, subsampling and dimension probing.

use std::path::{Path, PathBuf};

use anchor_core::Intrinsics;
use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

const FRAME_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Which frames of a directory are scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameSelection {
    /// Upper bound on scanned frames after subsampling.
    pub frames_max: usize,
    /// Keep every `frame_step`-th frame (0 behaves like 1).
    pub frame_step: usize,
}

impl Default for FrameSelection {
    fn default() -> Self {
        Self {
            frames_max: 300,
            frame_step: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Position in the full sorted listing, before subsampling.
    pub index: usize,
    pub path: PathBuf,
}

impl Frame {
    pub fn name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }
}

fn is_frame_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
}

/// Sorted image files of `dir`, subsampled and capped per `selection`.
pub fn list_frames(dir: &Path, selection: &FrameSelection) -> Result<Vec<Frame>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to list frames directory {}", dir.display()))?;
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("failed to read entry in {}", dir.display()))?
            .path();
        if is_frame_file(&path) {
            paths.push(path);
        }
    }
    paths.sort();

    let step = selection.frame_step.max(1);
    let frames: Vec<Frame> = paths
        .into_iter()
        .enumerate()
        .filter(|(index, _)| index % step == 0)
        .take(selection.frames_max)
        .map(|(index, path)| Frame { index, path })
        .collect();
    debug!(
        "selected {} frames from {} (step {}, max {})",
        frames.len(),
        dir.display(),
        step,
        selection.frames_max
    );
    Ok(frames)
}

/// Pixel dimensions of a frame, read from the image header.
pub fn probe_frame_size(frame: &Frame) -> Result<(u32, u32)> {
    image::image_dimensions(&frame.path)
        .with_context(|| format!("failed to read image header of {}", frame.path.display()))
}

/// Warnings when the first frame's size disagrees with the calibrated image size.
pub fn check_frame_dimensions(frames: &[Frame], intrinsics: &Intrinsics) -> Vec<String> {
    let (Some(first), Some((w, h))) = (frames.first(), intrinsics.image_size()) else {
        return Vec::new();
    };
    match probe_frame_size(first) {
        Ok((fw, fh)) if (fw, fh) != (w, h) => {
            let msg = format!(
                "frame {} is {}x{} but intrinsics were calibrated at {}x{}",
                first.name(),
                fw,
                fh,
                w,
                h
            );
            warn!("{}", msg);
            vec![msg]
        }
        Ok(_) => Vec::new(),
        Err(err) => {
            let msg = format!("could not probe frame size: {err:#}");
            warn!("{}", msg);
            vec![msg]
        }
    }
}
