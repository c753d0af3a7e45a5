use crate::{Mat3, Pt3, Real, Vec2};

/// OpenCV radial (k1, k2, k3) and tangential (p1, p2) lens distortion.
///
/// Operates on normalized image coordinates (Z=1 plane).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LensDistortion {
    pub k1: Real,
    pub k2: Real,
    pub k3: Real,
    pub p1: Real,
    pub p2: Real,
}

impl LensDistortion {
    const UNDISTORT_ITERS: usize = 10;

    /// Build from OpenCV-ordered coefficients `k1, k2, p1, p2, k3`; missing ones are zero.
    pub fn from_opencv(coeffs: &[Real]) -> Self {
        let c = |i: usize| coeffs.get(i).copied().unwrap_or(0.0);
        Self {
            k1: c(0),
            k2: c(1),
            p1: c(2),
            p2: c(3),
            k3: c(4),
        }
    }

    pub fn is_identity(&self) -> bool {
        [self.k1, self.k2, self.k3, self.p1, self.p2]
            .iter()
            .all(|c| *c == 0.0)
    }

    pub fn distort(&self, n: &Vec2) -> Vec2 {
        let (x, y) = (n.x, n.y);
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
        let dx = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        Vec2::new(x * radial + dx, y * radial + dy)
    }

    /// Fixed-point inverse of [`LensDistortion::distort`].
    pub fn undistort(&self, nd: &Vec2) -> Vec2 {
        if self.is_identity() {
            return *nd;
        }
        let mut n = *nd;
        for _ in 0..Self::UNDISTORT_ITERS {
            n -= self.distort(&n) - nd;
        }
        n
    }
}

/// Pinhole camera with lens distortion, the model board poses are estimated against.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PinholeCamera {
    pub fx: Real,
    pub fy: Real,
    pub cx: Real,
    pub cy: Real,
    pub distortion: LensDistortion,
}

impl PinholeCamera {
    pub fn new(fx: Real, fy: Real, cx: Real, cy: Real, distortion: LensDistortion) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            distortion,
        }
    }

    pub fn k_matrix(&self) -> Mat3 {
        Mat3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    /// Pixel position of a camera-frame point; `None` at or behind the image plane.
    pub fn project_point(&self, p_c: &Pt3) -> Option<Vec2> {
        if p_c.z <= 0.0 {
            return None;
        }
        let n = self
            .distortion
            .distort(&Vec2::new(p_c.x / p_c.z, p_c.y / p_c.z));
        Some(Vec2::new(self.fx * n.x + self.cx, self.fy * n.y + self.cy))
    }

    /// Undistorted normalized coordinates of a pixel.
    pub fn normalize_pixel(&self, px: &Vec2) -> Vec2 {
        let nd = Vec2::new((px.x - self.cx) / self.fx, (px.y - self.cy) / self.fy);
        self.distortion.undistort(&nd)
    }
}
