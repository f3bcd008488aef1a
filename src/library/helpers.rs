//! Helper functions that don't belong elsewhere

use std::{num::ParseIntError, time::Duration};

/// Parses a Duration from a string containing milliseconds.
/// Useful for command line parsing
pub fn parse_millis(src: &str) -> Result<Duration, ParseIntError> {
    let millis = src.trim().parse::<u64>()?;
    Ok(Duration::from_millis(millis))
}

/// Formats a duration as whole milliseconds for human consumption
pub fn format_millis(duration: Duration) -> String {
    format!("{:.0}ms", duration.as_secs_f64() * 1000.0)
}

#[cfg(test)]
mod does {
    use super::*;

    #[test]
    fn parse_milliseconds() {
        assert_eq!(parse_millis("1500"), Ok(Duration::from_millis(1500)));
        assert_eq!(parse_millis(" 42 "), Ok(Duration::from_millis(42)));
    }

    #[test]
    fn reject_garbage() {
        assert!(parse_millis("soon").is_err());
        assert!(parse_millis("-5").is_err());
    }

    #[test]
    fn format_whole_milliseconds() {
        assert_eq!(format_millis(Duration::from_micros(2_400)), "2ms");
        assert_eq!(format_millis(Duration::from_secs(3)), "3000ms");
    }
}
