//! Numeric precondition guards run before any metric is computed.
//!
//! Each guard either returns `Ok(())` or fails with a `FairAuditError`
//! naming the violated constraint. Nothing here repairs or clips input.

use crate::error::FairAuditError;
use crate::FairAuditResult;

/// Fail if any value lies outside the closed interval [0, 1].
///
/// NaN is rejected as well: a missing prediction is not a probability.
pub fn validate_probability_array(y_prob: &[f64]) -> FairAuditResult<()> {
    if let Some((idx, value)) = y_prob
        .iter()
        .enumerate()
        .find(|(_, p)| !(0.0..=1.0).contains(*p))
    {
        return Err(FairAuditError::InvalidInput {
            field: "y_prob".into(),
            reason: format!("Probabilities must be in [0, 1] range (index {idx}: {value})"),
        });
    }
    Ok(())
}

/// Fail if any non-NaN value is not exactly 0 or 1. NaN marks a missing label.
pub fn validate_binary_array(y: &[f64]) -> FairAuditResult<()> {
    if let Some((idx, value)) = y
        .iter()
        .enumerate()
        .find(|(_, v)| !v.is_nan() && **v != 0.0 && **v != 1.0)
    {
        return Err(FairAuditError::InvalidInput {
            field: "y_true".into(),
            reason: format!("Array must contain only 0 or 1 values (index {idx}: {value})"),
        });
    }
    Ok(())
}

/// Fail unless the decision threshold is strictly inside (0, 1).
pub fn validate_threshold(threshold: f64) -> FairAuditResult<()> {
    if !(threshold > 0.0 && threshold < 1.0) {
        return Err(FairAuditError::InvalidInput {
            field: "threshold".into(),
            reason: format!("Threshold must be in (0, 1), got {threshold}"),
        });
    }
    Ok(())
}

/// Fail if `n` is below `min_size`. `context` names the computation so the
/// error points at the slice that was too small.
pub fn validate_sample_size(n: usize, min_size: usize, context: &str) -> FairAuditResult<()> {
    if n < min_size {
        return Err(FairAuditError::InsufficientSample {
            context: context.to_string(),
            n,
            min: min_size,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probability_array_accepts_closed_interval() {
        assert!(validate_probability_array(&[0.0, 0.1, 0.5, 0.9, 1.0]).is_ok());
        assert!(validate_probability_array(&[]).is_ok());
    }

    #[test]
    fn test_probability_array_rejects_just_above_one() {
        assert!(validate_probability_array(&[0.2, 1.000_000_1]).is_err());
    }

    #[test]
    fn test_probability_array_rejects_negative() {
        assert!(validate_probability_array(&[-0.000_001, 0.3]).is_err());
    }

    #[test]
    fn test_probability_array_rejects_nan() {
        assert!(validate_probability_array(&[0.3, f64::NAN]).is_err());
    }

    #[test]
    fn test_binary_array_tolerates_nan() {
        assert!(validate_binary_array(&[0.0, 1.0, f64::NAN, 1.0, 0.0]).is_ok());
    }

    #[test]
    fn test_binary_array_rejects_two() {
        let err = validate_binary_array(&[0.0, 1.0, 2.0]).unwrap_err();
        assert!(err.to_string().contains("only 0 or 1"));
    }

    #[test]
    fn test_binary_array_rejects_fraction() {
        assert!(validate_binary_array(&[0.0, 0.5]).is_err());
    }

    #[test]
    fn test_threshold_boundaries() {
        assert!(validate_threshold(0.0).is_err());
        assert!(validate_threshold(1.0).is_err());
        assert!(validate_threshold(0.0001).is_ok());
        assert!(validate_threshold(0.9999).is_ok());
        assert!(validate_threshold(f64::NAN).is_err());
    }

    #[test]
    fn test_sample_size_names_context() {
        assert!(validate_sample_size(100, 50, "overall cohort").is_ok());
        let err = validate_sample_size(10, 50, "race=Asian").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Insufficient sample size for race=Asian: n=10 < 50"
        );
    }
}
