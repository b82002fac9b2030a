/// `numerator / denominator` when `denominator > 0`, otherwise `default`.
///
/// Rate metrics on small subgroups routinely have zero denominators
/// (no predicted positives, no events). This keeps NaN and infinity out of
/// downstream comparisons.
pub fn safe_divide(numerator: f64, denominator: f64, default: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positive_denominator() {
        assert_eq!(safe_divide(10.0, 5.0, 0.0), 2.0);
    }

    #[test]
    fn test_zero_denominator_returns_default() {
        assert_eq!(safe_divide(10.0, 0.0, 0.0), 0.0);
        assert_eq!(safe_divide(10.0, 0.0, -1.0), -1.0);
    }

    #[test]
    fn test_negative_denominator_returns_default() {
        assert_eq!(safe_divide(3.0, -2.0, 1.0), 1.0);
    }

    #[test]
    fn test_nan_denominator_returns_default() {
        assert_eq!(safe_divide(3.0, f64::NAN, 0.5), 0.5);
    }
}
