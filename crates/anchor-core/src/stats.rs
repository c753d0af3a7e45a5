//! Order statistics used for gating noisy per-frame measurements.
//!
//! All functions return `None` on empty input instead of NaN.

use crate::Real;

pub fn mean(values: &[Real]) -> Option<Real> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<Real>() / values.len() as Real)
}

/// Root mean square of the values.
pub fn rms(values: &[Real]) -> Option<Real> {
    if values.is_empty() {
        return None;
    }
    let sum_sq: Real = values.iter().map(|v| v * v).sum();
    Some((sum_sq / values.len() as Real).sqrt())
}

fn sorted(values: &[Real]) -> Vec<Real> {
    let mut v = values.to_vec();
    v.sort_by(|a, b| a.total_cmp(b));
    v
}

pub fn median(values: &[Real]) -> Option<Real> {
    percentile(values, 50.0)
}

/// Median absolute deviation from the median (unscaled).
pub fn mad(values: &[Real]) -> Option<Real> {
    let med = median(values)?;
    let deviations: Vec<Real> = values.iter().map(|v| (v - med).abs()).collect();
    median(&deviations)
}

/// Percentile `q` in `[0, 100]` with linear interpolation between closest ranks.
///
/// Matches the common "linear" definition: rank `q/100 · (n − 1)` over sorted values.
pub fn percentile(values: &[Real], q: Real) -> Option<Real> {
    if values.is_empty() {
        return None;
    }
    let v = sorted(values);
    let q = q.clamp(0.0, 100.0);
    let rank = q / 100.0 * (v.len() - 1) as Real;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as Real;
    Some(v[lo] + (v[hi] - v[lo]) * frac)
}
