//! Core types for the window query library
//!
//! This module defines the fundamental value, time and error types shared by
//! every stage of a query: loading, predicate generation, tree building,
//! evaluation and result assembly.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp type used throughout the library (subject-local, no timezone)
pub type Timestamp = NaiveDateTime;

/// Subject identifier
pub type SubjectId = u64;

/// Result type for query operations
pub type Result<T> = std::result::Result<T, QueryError>;

/// Errors that can occur while running a query
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Invalid input: {0}")]
    InputError(String),

    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),

    #[error("Trigger {0} excluded every subject")]
    EmptyResultError(String),

    #[error("Query exceeded its deadline of {0:?}")]
    DeadlineExceeded(std::time::Duration),

    #[error("Failed to {stage}: {source}")]
    StageError {
        stage: &'static str,
        #[source]
        source: Box<QueryError>,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Coarse error classification, stable across stage wrapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    Configuration,
    EmptyResult,
    Deadline,
}

impl QueryError {
    /// Wrap this error with the name of the stage that produced it
    pub fn in_stage(self, stage: &'static str) -> Self {
        QueryError::StageError {
            stage,
            source: Box::new(self),
        }
    }

    /// Kind of the innermost error
    ///
    /// IO and JSON failures surface as input errors: they only ever come from
    /// reading a dataset or configuration.
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueryError::InputError(_) | QueryError::IoError(_) | QueryError::JsonError(_) => {
                ErrorKind::Input
            }
            QueryError::ConfigurationError(_) => ErrorKind::Configuration,
            QueryError::EmptyResultError(_) => ErrorKind::EmptyResult,
            QueryError::DeadlineExceeded(_) => ErrorKind::Deadline,
            QueryError::StageError { source, .. } => source.kind(),
        }
    }
}

/// Value of an event-specific field folded in from a measurement record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Boolean value
    Boolean(bool),
    /// Signed integer value
    Integer(i64),
    /// Floating-point value
    Float(f64),
    /// Free text or categorical code
    Text(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{:.3}", v),
            FieldValue::Boolean(v) => write!(f, "{}", if *v { "true" } else { "false" }),
            FieldValue::Text(v) => write!(f, "{}", v),
        }
    }
}

impl FieldValue {
    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            FieldValue::Boolean(v) => Some(if *v { 1.0 } else { 0.0 }),
            FieldValue::Text(v) => v.trim().parse().ok(),
        }
    }

    /// Convert to i64 if possible
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(v) => Some(*v),
            FieldValue::Float(v) => Some(*v as i64),
            FieldValue::Boolean(v) => Some(if *v { 1 } else { 0 }),
            FieldValue::Text(v) => v.trim().parse().ok(),
        }
    }

    /// Truthiness of the value
    pub fn as_bool(&self) -> bool {
        match self {
            FieldValue::Boolean(v) => *v,
            FieldValue::Integer(v) => *v != 0,
            FieldValue::Float(v) => *v != 0.0,
            FieldValue::Text(v) => !v.is_empty(),
        }
    }

    /// Equality used by predicate matching: numbers compare numerically,
    /// text compares exactly.
    pub fn matches(&self, expected: &FieldValue) -> bool {
        match (self, expected) {
            (FieldValue::Text(a), FieldValue::Text(b)) => a == b,
            (FieldValue::Text(_), _) | (_, FieldValue::Text(_)) => false,
            (FieldValue::Boolean(a), FieldValue::Boolean(b)) => a == b,
            (a, b) => a.as_f64() == b.as_f64(),
        }
    }
}

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M",
];

/// Parse a timestamp in any of the accepted input formats
///
/// Accepts ISO-8601 date-times (with or without seconds), bare dates, and the
/// legacy `%m/%d/%Y %H:%M` form.
pub fn parse_timestamp(s: &str) -> Result<Timestamp> {
    let s = s.trim();
    for format in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(ts);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(ts) = date.and_hms_opt(0, 0, 0) {
            return Ok(ts);
        }
    }
    Err(QueryError::InputError(format!("Unrecognised timestamp: {:?}", s)))
}

/// Parse a compact duration such as `24h`, `1d12h`, `-6h` or `90m`
///
/// Units: `d` (days), `h` (hours), `m` (minutes), `s` (seconds). Returns
/// `None` for anything else, including an empty string.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (negative, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    if body.is_empty() {
        return None;
    }

    let mut total = Duration::zero();
    let mut digits = String::new();
    for c in body.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        if c.is_whitespace() {
            continue;
        }
        let num: i64 = digits.parse().ok()?;
        digits.clear();
        let part = match c {
            'd' => Duration::try_days(num)?,
            'h' => Duration::try_hours(num)?,
            'm' => Duration::try_minutes(num)?,
            's' => Duration::try_seconds(num)?,
            _ => return None,
        };
        total = total.checked_add(&part)?;
    }
    // Trailing digits without a unit
    if !digits.is_empty() {
        return None;
    }

    Some(if negative { -total } else { total })
}

/// Render a duration back into the compact form accepted by [`parse_duration`]
pub fn format_duration(d: Duration) -> String {
    if d.is_zero() {
        return "0s".to_string();
    }
    let sign = if d < Duration::zero() { "-" } else { "" };
    let mut secs = d.num_seconds().abs();
    let mut out = String::from(sign);
    for (unit, size) in [('d', 86_400), ('h', 3_600), ('m', 60), ('s', 1)] {
        if secs >= size {
            out.push_str(&format!("{}{}", secs / size, unit));
            secs %= size;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_value_conversions() {
        assert_eq!(FieldValue::Float(3.9).as_i64(), Some(3));
        assert_eq!(FieldValue::Text(" 42 ".into()).as_i64(), Some(42));
        assert_eq!(FieldValue::Text("n/a".into()).as_i64(), None);
        assert_eq!(FieldValue::Boolean(true).as_i64(), Some(1));

        assert!(FieldValue::Integer(-1).as_bool());
        assert!(!FieldValue::Float(0.0).as_bool());
        assert!(!FieldValue::Text(String::new()).as_bool());
        assert!(FieldValue::Text("no".into()).as_bool());
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("24h"), Some(Duration::hours(24)));
        assert_eq!(parse_duration("1d12h"), Some(Duration::hours(36)));
        assert_eq!(parse_duration("90m"), Some(Duration::minutes(90)));
        assert_eq!(parse_duration("-6h"), Some(Duration::hours(-6)));
        assert_eq!(parse_duration("+2d"), Some(Duration::days(2)));
        assert_eq!(parse_duration("0s"), Some(Duration::zero()));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("24"), None);
        assert_eq!(parse_duration("3w"), None);
        assert_eq!(parse_duration("h"), None);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::hours(36)), "1d12h");
        assert_eq!(format_duration(Duration::hours(-6)), "-6h");
        assert_eq!(format_duration(Duration::zero()), "0s");
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = NaiveDate::from_ymd_opt(2020, 3, 1)
            .unwrap()
            .and_hms_opt(14, 30, 0)
            .unwrap();
        assert_eq!(parse_timestamp("2020-03-01T14:30:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2020-03-01 14:30").unwrap(), expected);
        assert_eq!(parse_timestamp("03/01/2020 14:30").unwrap(), expected);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_field_value_matching() {
        assert!(FieldValue::Integer(5).matches(&FieldValue::Float(5.0)));
        assert!(FieldValue::Text("ICU".into()).matches(&FieldValue::Text("ICU".into())));
        assert!(!FieldValue::Text("5".into()).matches(&FieldValue::Integer(5)));
        assert!(FieldValue::Boolean(true).matches(&FieldValue::Boolean(true)));
    }

    #[test]
    fn test_error_kind_survives_stage_wrapping() {
        let err = QueryError::ConfigurationError("missing predicate".into())
            .in_stage("generate predicate columns");
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("generate predicate columns"));
    }
}
