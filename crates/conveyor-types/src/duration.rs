//! Human time tuples: parsing "5 MINUTES" and formatting "5 minutes".
//!
//! Every configurable duration in Conveyor (step timeout, workflow timeout,
//! wait between retries) is a `TimeSpan`: an integer magnitude plus a unit.
//! A non-positive magnitude means the duration is disabled; the canonical
//! sentinel is `-1`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors produced while parsing a time-tuple string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeSpanError {
    /// The input was not of the form `<VALUE> <UNIT>`.
    #[error("time period value '{0}' is not in the format '<VALUE> <UNIT>'")]
    Invalid(String),

    /// The unit word was not a recognized unit of time.
    #[error("unknown unit of time '{0}'")]
    UnknownUnit(String),
}

// ---------------------------------------------------------------------------
// TimeUnit
// ---------------------------------------------------------------------------

/// A unit of time, from nanoseconds up to days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// The singular lowercase label used in friendly formatting.
    pub fn label(&self) -> &'static str {
        match self {
            TimeUnit::Nanoseconds => "nanosecond",
            TimeUnit::Microseconds => "microsecond",
            TimeUnit::Milliseconds => "millisecond",
            TimeUnit::Seconds => "second",
            TimeUnit::Minutes => "minute",
            TimeUnit::Hours => "hour",
            TimeUnit::Days => "day",
        }
    }

    /// Convert `value` of this unit into a `Duration`.
    ///
    /// Saturates on overflow; callers only hand this positive magnitudes.
    pub fn to_duration(&self, value: u64) -> Duration {
        match self {
            TimeUnit::Nanoseconds => Duration::from_nanos(value),
            TimeUnit::Microseconds => Duration::from_micros(value),
            TimeUnit::Milliseconds => Duration::from_millis(value),
            TimeUnit::Seconds => Duration::from_secs(value),
            TimeUnit::Minutes => Duration::from_secs(value.saturating_mul(60)),
            TimeUnit::Hours => Duration::from_secs(value.saturating_mul(3_600)),
            TimeUnit::Days => Duration::from_secs(value.saturating_mul(86_400)),
        }
    }

    /// Parse a unit word. Case-insensitive; singular and plural both accepted.
    fn parse_word(word: &str) -> Result<Self, TimeSpanError> {
        let upper = word.to_ascii_uppercase();
        let name = upper.strip_suffix('S').unwrap_or(&upper);
        match name {
            "NANOSECOND" => Ok(TimeUnit::Nanoseconds),
            "MICROSECOND" => Ok(TimeUnit::Microseconds),
            "MILLISECOND" => Ok(TimeUnit::Milliseconds),
            "SECOND" => Ok(TimeUnit::Seconds),
            "MINUTE" => Ok(TimeUnit::Minutes),
            "HOUR" => Ok(TimeUnit::Hours),
            "DAY" => Ok(TimeUnit::Days),
            _ => Err(TimeSpanError::UnknownUnit(word.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// TimeSpan
// ---------------------------------------------------------------------------

/// A (magnitude, unit) time tuple.
///
/// Magnitudes at or below zero mean "never"/disabled; constructors clamp
/// anything below `-1` to the `-1` sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSpan {
    value: i64,
    unit: TimeUnit,
}

impl TimeSpan {
    /// Create a new span, clamping magnitudes below `-1` to `-1`.
    pub fn new(value: i64, unit: TimeUnit) -> Self {
        Self {
            value: value.max(-1),
            unit,
        }
    }

    /// The disabled span: never elapses.
    pub fn disabled() -> Self {
        Self {
            value: -1,
            unit: TimeUnit::Seconds,
        }
    }

    /// The numeric magnitude; `-1` when disabled.
    pub fn value(&self) -> i64 {
        self.value
    }

    /// The unit of time, or `None` when the span is disabled.
    pub fn unit(&self) -> Option<TimeUnit> {
        if self.value < 0 { None } else { Some(self.unit) }
    }

    /// Whether this span describes an actual positive duration.
    pub fn is_enabled(&self) -> bool {
        self.value > 0
    }

    /// Convert to a `Duration`, or `None` when the span is disabled.
    pub fn to_duration(&self) -> Option<Duration> {
        if self.value > 0 {
            Some(self.unit.to_duration(self.value as u64))
        } else {
            None
        }
    }

    /// Parse a tuple string such as `"5 MINUTES"`, `"1 hour"`, or a bare
    /// `"5"` (seconds assumed). Whitespace around and between the two words
    /// is ignored; anything else is an error.
    pub fn parse(input: &str) -> Result<Self, TimeSpanError> {
        let mut words = input.split_whitespace();
        let value = words
            .next()
            .ok_or_else(|| TimeSpanError::Invalid(input.to_string()))?
            .parse::<i64>()
            .map_err(|_| TimeSpanError::Invalid(input.to_string()))?;
        let unit = match words.next() {
            Some(word) => TimeUnit::parse_word(word)?,
            None => TimeUnit::Seconds,
        };
        if words.next().is_some() {
            return Err(TimeSpanError::Invalid(input.to_string()));
        }
        Ok(Self::new(value, unit))
    }
}

impl FromStr for TimeSpan {
    type Err = TimeSpanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TimeSpan {
    /// Friendly form: `"5 minutes"`, `"1 second"`, or `"Never"` for a
    /// non-positive magnitude.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value <= 0 {
            return write!(f, "Never");
        }
        let plural = if self.value == 1 { "" } else { "s" };
        write!(f, "{} {}{}", self.value, self.unit.label(), plural)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------
    // Parsing failures
    // -------------------------------------------------------------------

    #[test]
    fn test_empty_string_rejected() {
        assert!(TimeSpan::parse("").is_err());
    }

    #[test]
    fn test_blank_string_rejected() {
        assert!(TimeSpan::parse("   ").is_err());
    }

    #[test]
    fn test_non_numeric_rejected() {
        assert!(TimeSpan::parse("OINK").is_err());
    }

    #[test]
    fn test_unknown_unit_rejected() {
        let err = TimeSpan::parse("1 LIGHTYEAR").unwrap_err();
        assert_eq!(err, TimeSpanError::UnknownUnit("LIGHTYEAR".to_string()));
    }

    #[test]
    fn test_non_numeric_value_with_unit_rejected() {
        assert!(TimeSpan::parse("Q MINUTES").is_err());
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        assert!(TimeSpan::parse("5 MINUTES EXTRA").is_err());
    }

    // -------------------------------------------------------------------
    // Parsing successes
    // -------------------------------------------------------------------

    #[test]
    fn test_no_unit_defaults_to_seconds() {
        let span = TimeSpan::parse("1").unwrap();
        assert_eq!(span.value(), 1);
        assert_eq!(span.unit(), Some(TimeUnit::Seconds));
    }

    #[test]
    fn test_singular_unit() {
        let span = TimeSpan::parse("5 HOUR").unwrap();
        assert_eq!(span.value(), 5);
        assert_eq!(span.unit(), Some(TimeUnit::Hours));

        let span = TimeSpan::parse("1 NANOSECOND").unwrap();
        assert_eq!(span.value(), 1);
        assert_eq!(span.unit(), Some(TimeUnit::Nanoseconds));
    }

    #[test]
    fn test_plural_unit() {
        let span = TimeSpan::parse("5 HOURS").unwrap();
        assert_eq!(span.value(), 5);
        assert_eq!(span.unit(), Some(TimeUnit::Hours));
    }

    #[test]
    fn test_lowercase_and_whitespace() {
        let span = TimeSpan::parse("  5   minutes ").unwrap();
        assert_eq!(span.value(), 5);
        assert_eq!(span.unit(), Some(TimeUnit::Minutes));
    }

    #[test]
    fn test_from_str() {
        let span: TimeSpan = "2 SECONDS".parse().unwrap();
        assert_eq!(span.value(), 2);
    }

    // -------------------------------------------------------------------
    // Clamping and the disabled sentinel
    // -------------------------------------------------------------------

    #[test]
    fn test_negative_clamps_to_sentinel() {
        let span = TimeSpan::new(-100, TimeUnit::Minutes);
        assert_eq!(span.value(), -1);
        assert_eq!(span.unit(), None);
        assert!(!span.is_enabled());
        assert_eq!(span.to_duration(), None);
    }

    #[test]
    fn test_disabled() {
        let span = TimeSpan::disabled();
        assert_eq!(span.value(), -1);
        assert!(!span.is_enabled());
    }

    #[test]
    fn test_zero_is_not_enabled() {
        let span = TimeSpan::new(0, TimeUnit::Seconds);
        assert_eq!(span.value(), 0);
        assert!(!span.is_enabled());
        assert_eq!(span.to_duration(), None);
    }

    // -------------------------------------------------------------------
    // Duration conversion
    // -------------------------------------------------------------------

    #[test]
    fn test_to_duration() {
        let span = TimeSpan::new(5, TimeUnit::Minutes);
        assert_eq!(span.to_duration(), Some(Duration::from_secs(300)));

        let span = TimeSpan::new(10, TimeUnit::Milliseconds);
        assert_eq!(span.to_duration(), Some(Duration::from_millis(10)));

        let span = TimeSpan::new(2, TimeUnit::Days);
        assert_eq!(span.to_duration(), Some(Duration::from_secs(172_800)));
    }

    // -------------------------------------------------------------------
    // Formatting
    // -------------------------------------------------------------------

    #[test]
    fn test_format_singular() {
        assert_eq!(TimeSpan::new(1, TimeUnit::Seconds).to_string(), "1 second");
    }

    #[test]
    fn test_format_plural() {
        assert_eq!(TimeSpan::new(2, TimeUnit::Seconds).to_string(), "2 seconds");
    }

    #[test]
    fn test_format_disabled() {
        assert_eq!(TimeSpan::disabled().to_string(), "Never");
        assert_eq!(TimeSpan::new(0, TimeUnit::Hours).to_string(), "Never");
    }
}
