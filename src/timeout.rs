//! Timeout string parsing (§6): `<number><unit>`, unit one of `ms`, `s`, `m`,
//! `h`. An empty string means no timeout.

use snafu::prelude::*;
use std::time::Duration;

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum Error {
    #[snafu(display("malformed timeout '{value}': no numeric portion"))]
    MissingNumber { value: String },

    #[snafu(display("malformed timeout '{value}': '{number}' is not a valid number"))]
    InvalidNumber { value: String, number: String },

    #[snafu(display("malformed timeout '{value}': unrecognized unit '{unit}'"))]
    UnrecognizedUnit { value: String, unit: String },

    #[snafu(display("timeout '{value}' must not be negative"))]
    Negative { value: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Parse a timeout string. `""` (or all-whitespace) means "no timeout".
pub fn parse(value: &str) -> Result<Option<Duration>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let split_at = trimmed
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .context(MissingNumberSnafu {
            value: value.to_string(),
        })?;

    let (number_part, unit) = trimmed.split_at(split_at);
    ensure!(
        !number_part.is_empty(),
        MissingNumberSnafu {
            value: value.to_string()
        }
    );

    let number: f64 = number_part.parse().map_err(|_| {
        InvalidNumberSnafu {
            value: value.to_string(),
            number: number_part.to_string(),
        }
        .build()
    })?;
    ensure!(
        number >= 0.0,
        NegativeSnafu {
            value: value.to_string()
        }
    );

    let millis_per_unit: f64 = match unit {
        "ms" => 1.0,
        "s" => 1_000.0,
        "m" => 60_000.0,
        "h" => 3_600_000.0,
        other => {
            return UnrecognizedUnitSnafu {
                value: value.to_string(),
                unit: other.to_string(),
            }
            .fail();
        }
    };

    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    let millis = (number * millis_per_unit).round() as u64;
    Ok(Some(Duration::from_millis(millis)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_means_no_timeout() {
        assert_eq!(parse("").unwrap(), None);
        assert_eq!(parse("   ").unwrap(), None);
    }

    #[test]
    fn parses_each_unit() {
        assert_eq!(parse("500ms").unwrap(), Some(Duration::from_millis(500)));
        assert_eq!(parse("30s").unwrap(), Some(Duration::from_secs(30)));
        assert_eq!(parse("2m").unwrap(), Some(Duration::from_secs(120)));
        assert_eq!(parse("1h").unwrap(), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn parses_fractional_numbers() {
        assert_eq!(parse("1.5s").unwrap(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn unrecognized_unit_fails() {
        let err = parse("5days").unwrap_err();
        assert!(matches!(err, Error::UnrecognizedUnit { .. }));
    }

    #[test]
    fn missing_number_fails() {
        let err = parse("s").unwrap_err();
        assert!(matches!(err, Error::MissingNumber { .. }));
    }

    #[test]
    fn negative_duration_fails() {
        let err = parse("-5s").unwrap_err();
        assert!(matches!(err, Error::MissingNumber { .. } | Error::Negative { .. }));
    }
}
