use std::path::Path;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

use super::{LensDistortion, PinholeCamera};
use crate::{Mat3, Real};

fn default_model() -> String {
    "pinhole".to_string()
}

fn default_distortion_model() -> String {
    "opencv".to_string()
}

/// Finished camera intrinsics, as written by an external calibration step.
///
/// `distortion_coeffs` follows OpenCV ordering: `k1, k2, p1, p2, k3`. Missing
/// trailing coefficients are treated as zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: Real,
    pub fy: Real,
    pub cx: Real,
    pub cy: Real,
    #[serde(default)]
    pub distortion_coeffs: Vec<Real>,
    #[serde(default)]
    pub image_width: u32,
    #[serde(default)]
    pub image_height: u32,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_distortion_model")]
    pub distortion_model: String,
}

impl Intrinsics {
    /// Pinhole intrinsics without distortion.
    pub fn pinhole(fx: Real, fy: Real, cx: Real, cy: Real, image_width: u32, image_height: u32) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            distortion_coeffs: Vec::new(),
            image_width,
            image_height,
            model: default_model(),
            distortion_model: default_distortion_model(),
        }
    }

    /// Load and validate intrinsics from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read intrinsics {}", path.display()))?;
        let intrinsics: Self = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse intrinsics {}", path.display()))?;
        intrinsics.validate()?;
        Ok(intrinsics)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.fx.is_finite() && self.fy.is_finite() && self.fx > 0.0 && self.fy > 0.0,
            "focal lengths must be finite and positive (fx={}, fy={})",
            self.fx,
            self.fy
        );
        ensure!(
            self.cx.is_finite() && self.cy.is_finite(),
            "principal point must be finite"
        );
        ensure!(
            self.model == "pinhole",
            "unsupported camera model '{}'",
            self.model
        );
        ensure!(
            self.distortion_model == "opencv",
            "unsupported distortion model '{}'",
            self.distortion_model
        );
        ensure!(
            self.distortion_coeffs.len() <= 5,
            "expected at most 5 distortion coefficients, got {}",
            self.distortion_coeffs.len()
        );
        ensure!(
            self.distortion_coeffs.iter().all(|c| c.is_finite()),
            "distortion coefficients must be finite"
        );
        Ok(())
    }

    pub fn k_matrix(&self) -> Mat3 {
        self.camera().k_matrix()
    }

    pub fn distortion(&self) -> LensDistortion {
        LensDistortion::from_opencv(&self.distortion_coeffs)
    }

    pub fn camera(&self) -> PinholeCamera {
        PinholeCamera::new(self.fx, self.fy, self.cx, self.cy, self.distortion())
    }

    /// Image size in pixels, when recorded.
    pub fn image_size(&self) -> Option<(u32, u32)> {
        (self.image_width > 0 && self.image_height > 0).then_some((self.image_width, self.image_height))
    }
}
