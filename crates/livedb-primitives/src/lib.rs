//! Scalar value type and canonical ordering for the livedb engine.
//!
//! `Value` is the untyped carrier the expression IR, index, and planner
//! layers operate on. Concrete row types never need to implement it
//! directly; they only need to answer `field(path) -> Option<Value>`
//! (see `livedb_core::Row`).

mod compare;
mod normalize;

#[cfg(test)]
mod tests;

pub use compare::{canonical_cmp, ordered_cmp, NullsOrder, StringSortMode};
pub use normalize::{NormalizeError, normalize_date};

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::fmt;

///
/// Value
///
/// Closed scalar enum flowing through the expression IR, index, and
/// planner layers. `Eq`/`Ord` are canonical (see `compare::canonical_cmp`):
/// they exist so `Value` can key a `BTreeMap` inside an index, not to
/// express SQL-style three-valued comparison (that lives in the
/// evaluator, in `livedb-core`).
///
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    #[default]
    Null,
    /// Distinct from `Null`; mirrors JS `undefined` so `isNull`/`isUndefined`
    /// can disagree on the same value.
    Undefined,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(DateTime<Utc>),
    List(Vec<Value>),
}

impl Value {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub const fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// True for `Null` and `Undefined`, the two "absent" variants that
    /// most functions propagate through rather than operate on.
    #[must_use]
    pub const fn is_absent(&self) -> bool {
        matches!(self, Self::Null | Self::Undefined)
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Widen `Int`/`Float` to `f64`; used by arithmetic functions.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Canonical rank used to order mixed-variant comparisons. Lower
    /// sorts first; only meaningful relative to other ranks, never
    /// exposed as a stable number.
    const fn canonical_rank(&self) -> u8 {
        match self {
            Self::Undefined => 0,
            Self::Null => 1,
            Self::Bool(_) => 2,
            Self::Int(_) => 3,
            Self::Float(_) => 4,
            Self::Text(_) => 5,
            Self::Date(_) => 6,
            Self::List(_) => 7,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Undefined => write!(f, "undefined"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => write!(f, "{s}"),
            Self::Date(d) => write!(f, "{}", d.to_rfc3339()),
            Self::List(items) => {
                write!(f, "[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        canonical_cmp(self, other) == Ordering::Equal
    }
}
impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        canonical_cmp(self, other)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}
impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Date(v)
    }
}

///
/// CompareOptions
///
/// Options a `BTreeIndex` (or the synced-store comparator) is built
/// with: where nulls sort, and whether text compares by locale or by
/// raw byte order.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CompareOptions {
    pub nulls: NullsOrder,
    pub string_mode: StringSortMode,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            nulls: NullsOrder::First,
            string_mode: StringSortMode::Lexical,
        }
    }
}
