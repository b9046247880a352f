//! Parsing and display of restriction durations.
//!
//! Durations are whole seconds; `0` means permanent.

use crate::error::ModelError;

/// Keyword accepted in place of a number for a permanent restriction.
pub const PERMANENT: &str = "permanent";

/// Parse user input into a duration in seconds.
///
/// Accepts [`PERMANENT`] (case-insensitive, yields `0`) or a strictly
/// positive integer.
pub fn parse_duration(input: &str) -> Result<i64, ModelError> {
    let trimmed = input.trim();
    if trimmed.eq_ignore_ascii_case(PERMANENT) {
        return Ok(0);
    }
    match trimmed.parse::<i64>() {
        Ok(secs) if secs > 0 => Ok(secs),
        _ => Err(ModelError::InvalidDuration(input.to_owned())),
    }
}

/// Render a duration using its largest whole unit (`45s`, `5m`, `2h`, `7d`).
#[must_use]
pub fn format_duration(seconds: i64) -> String {
    match seconds {
        s if s <= 0 => PERMANENT.to_owned(),
        s if s < 60 => format!("{s}s"),
        s if s < 3_600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h", s / 3_600),
        s => format!("{}d", s / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_permanent_keyword() {
        assert_eq!(parse_duration("permanent").unwrap(), 0);
        assert_eq!(parse_duration("PERMANENT").unwrap(), 0);
    }

    #[test]
    fn parses_positive_seconds() {
        assert_eq!(parse_duration("3600").unwrap(), 3_600);
        assert_eq!(parse_duration(" 60 ").unwrap(), 60);
    }

    #[test]
    fn rejects_zero_negative_and_garbage() {
        for bad in ["0", "-5", "1h", ""] {
            assert!(
                matches!(parse_duration(bad), Err(ModelError::InvalidDuration(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn formats_with_largest_unit() {
        assert_eq!(format_duration(0), "permanent");
        assert_eq!(format_duration(45), "45s");
        assert_eq!(format_duration(300), "5m");
        assert_eq!(format_duration(7_200), "2h");
        assert_eq!(format_duration(604_800), "7d");
    }
}
