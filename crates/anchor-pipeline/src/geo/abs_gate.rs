//! Whether a run may claim absolute (georegistered) accuracy.

use std::fmt;

use anchor_core::Real;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimLevel {
    Absolute,
    Relative,
    Unverified,
}

impl fmt::Display for ClaimLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ClaimLevel::Absolute => "ABSOLUTE",
            ClaimLevel::Relative => "RELATIVE",
            ClaimLevel::Unverified => "UNVERIFIED",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbsoluteEligibility {
    pub abs_eligible: bool,
    pub claim_level: ClaimLevel,
    pub reason: String,
    pub rel_eligible: bool,
    pub georeg_solved: bool,
    pub rmse_m: Option<Real>,
    pub max_rmse_m: Real,
}

/// Checked in order: relative eligibility, a solved transform, an RMSE, RMSE within threshold.
pub fn evaluate_absolute_accuracy(
    rel_eligible: bool,
    georeg_solved: bool,
    rmse_m: Option<Real>,
    max_rmse_m: Real,
) -> AbsoluteEligibility {
    let failure = if !rel_eligible {
        Some("REL not eligible".to_string())
    } else if !georeg_solved {
        Some("georegistration not solved".to_string())
    } else {
        match rmse_m {
            None => Some("missing RMSE".to_string()),
            Some(rmse) if rmse.is_nan() || rmse > max_rmse_m => Some(format!("RMSE {:.4} exceeds threshold", rmse)),
            Some(_) => None,
        }
    };

    let (abs_eligible, claim_level, reason) = match failure {
        None => (true, ClaimLevel::Absolute, "georeg RMSE within threshold".to_string()),
        Some(reason) if rel_eligible => (false, ClaimLevel::Relative, reason),
        Some(reason) => (false, ClaimLevel::Unverified, reason),
    };
    AbsoluteEligibility {
        abs_eligible,
        claim_level,
        reason,
        rel_eligible,
        georeg_solved,
        rmse_m,
        max_rmse_m,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_follow_check_order() {
        let r = evaluate_absolute_accuracy(false, false, None, 0.05);
        assert_eq!(r.reason, "REL not eligible");
        assert_eq!(r.claim_level, ClaimLevel::Unverified);

        let r = evaluate_absolute_accuracy(true, false, Some(0.01), 0.05);
        assert_eq!(r.reason, "georegistration not solved");
        assert_eq!(r.claim_level, ClaimLevel::Relative);

        let r = evaluate_absolute_accuracy(true, true, None, 0.05);
        assert_eq!(r.reason, "missing RMSE");

        let r = evaluate_absolute_accuracy(true, true, Some(0.123456), 0.05);
        assert_eq!(r.reason, "RMSE 0.1235 exceeds threshold");
        assert!(!r.abs_eligible);
    }

    #[test]
    fn within_threshold_is_absolute() {
        let r = evaluate_absolute_accuracy(true, true, Some(0.05), 0.05);
        assert!(r.abs_eligible);
        assert_eq!(r.claim_level, ClaimLevel::Absolute);
        assert_eq!(r.reason, "georeg RMSE within threshold");
        assert_eq!(serde_json::to_value(&r).unwrap()["claim_level"], "ABSOLUTE");
    }

    #[test]
    fn nan_rmse_is_not_within_threshold() {
        let r = evaluate_absolute_accuracy(true, true, Some(Real::NAN), 0.05);
        assert!(!r.abs_eligible);
    }
}
