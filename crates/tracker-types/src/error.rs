//! Error types for record parsing and validation in tracker-types.

use thiserror::Error;

/// Errors that can occur when validating or parsing tracker records.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The record is structurally valid but semantically wrong.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// A numeric field is outside its allowed range.
    #[error("{field} out of range: {value} (expected {min}..={max})")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    /// A device supplied timestamp could not be parsed.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// Result type alias using tracker-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;

/// Check that an integer field lies within `min..=max`.
pub(crate) fn check_range(field: &'static str, value: i64, min: i64, max: i64) -> ParseResult<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ParseError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

/// Same as [`check_range`] for optional fields; `None` always passes.
pub(crate) fn check_optional_range<T: Into<i64> + Copy>(
    field: &'static str,
    value: Option<T>,
    min: i64,
    max: i64,
) -> ParseResult<()> {
    match value {
        Some(v) => check_range(field, v.into(), min, max),
        None => Ok(()),
    }
}
