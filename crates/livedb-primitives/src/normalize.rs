use crate::Value;
use chrono::{DateTime, Utc};
use std::fmt;

///
/// NormalizeError
///
/// Invariant violations rejected before a value is allowed into an
/// index. NaN floats and non-finite dates have no canonical position
/// in a total order, so the index refuses to store them.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NormalizeError {
    NanFloat,
}

impl fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NanFloat => write!(f, "NaN is not a valid index key"),
        }
    }
}

impl std::error::Error for NormalizeError {}

/// Reject NaN floats; everything else normalizes to itself.
///
/// `eq` semantics additionally fold `Date` to its underlying instant
/// before comparison, which `Value::Date`/`canonical_cmp` already do
/// by comparing the `DateTime<Utc>` directly, so no extra step is
/// needed here beyond the NaN guard.
pub fn normalize_date(value: &Value) -> Result<Value, NormalizeError> {
    if let Value::Float(f) = value {
        if f.is_nan() {
            return Err(NormalizeError::NanFloat);
        }
    }
    Ok(value.clone())
}

#[must_use]
pub fn date_from_millis(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}
