//! Helpers for the `int64` and `float64` value kinds (§3, §8).
use errors::ErrorMetadata;

/// Parse the decimal string carried by the `{__type:"bigint",value:"..."}`
/// wire encoding into an `i64`. `i64::MIN..=i64::MAX` round-trips; anything
/// a single decimal digit past either bound is rejected as `InvalidValue`
/// rather than silently wrapping.
pub fn parse_int64_decimal(s: &str) -> anyhow::Result<i64> {
    s.parse::<i64>().map_err(|_| {
        anyhow::Error::new(ErrorMetadata::invalid_value(
            "InvalidInt64",
            format!("\"{s}\" is not a valid int64 (must fit in [-2^63, 2^63 - 1])"),
        ))
    })
}

pub fn int64_to_decimal(n: i64) -> String {
    n.to_string()
}

/// `float64` values must be finite and not NaN at rest (§3) or as filter
/// literals (§4.A rule 3).
pub fn check_finite_float(n: f64) -> anyhow::Result<()> {
    if n.is_nan() {
        anyhow::bail!(ErrorMetadata::invalid_value(
            "InvalidFloat64",
            "NaN is not a valid Convex value",
        ));
    }
    if n.is_infinite() {
        anyhow::bail!(ErrorMetadata::invalid_value(
            "InvalidFloat64",
            "Infinite floats are not a valid Convex value",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_extremes() {
        assert_eq!(parse_int64_decimal(&i64::MAX.to_string()).unwrap(), i64::MAX);
        assert_eq!(parse_int64_decimal(&i64::MIN.to_string()).unwrap(), i64::MIN);
    }

    #[test]
    fn one_past_bounds_fails() {
        let one_past_max = (i64::MAX as i128 + 1).to_string();
        assert!(parse_int64_decimal(&one_past_max).is_err());
        let one_past_min = (i64::MIN as i128 - 1).to_string();
        assert!(parse_int64_decimal(&one_past_min).is_err());
    }

    #[test]
    fn rejects_nan_and_infinite() {
        assert!(check_finite_float(f64::NAN).is_err());
        assert!(check_finite_float(f64::INFINITY).is_err());
        assert!(check_finite_float(f64::NEG_INFINITY).is_err());
        assert!(check_finite_float(0.0).is_ok());
    }
}
