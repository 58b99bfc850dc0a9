use crate::Value;
use std::cmp::Ordering;

///
/// NullsOrder
///
/// Where `Null`/`Undefined` sort relative to everything else in an
/// index or an ordered snapshot. Default is `First`.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NullsOrder {
    First,
    Last,
}

///
/// StringSortMode
///
/// `Locale` is reserved for embedders that want collation-aware text
/// ordering; the engine itself only ships `Lexical` (plain byte-wise
/// `str` ordering), the same limitation the reference index has
/// without an ICU dependency.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StringSortMode {
    Lexical,
    Locale,
}

/// Total canonical comparator used by the index, planner, and ordered
/// snapshot code. Mixed-variant comparisons are rank-only (see
/// `Value::canonical_rank`); same-variant comparisons use the natural
/// order for that variant.
#[must_use]
pub fn canonical_cmp(left: &Value, right: &Value) -> Ordering {
    let rank = left.canonical_rank().cmp(&right.canonical_rank());
    if rank != Ordering::Equal {
        return rank;
    }
    canonical_cmp_same_rank(left, right)
}

#[allow(clippy::match_same_arms)]
fn canonical_cmp_same_rank(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Null, Value::Null) | (Value::Undefined, Value::Undefined) => Ordering::Equal,
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Int(a), Value::Int(b)) => a.cmp(b),
        (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
        (Value::Text(a), Value::Text(b)) => a.cmp(b),
        (Value::Date(a), Value::Date(b)) => a.cmp(b),
        (Value::List(a), Value::List(b)) => canonical_cmp_list(a, b),
        _ => Ordering::Equal,
    }
}

fn canonical_cmp_list(left: &[Value], right: &[Value]) -> Ordering {
    for (l, r) in left.iter().zip(right.iter()) {
        let cmp = canonical_cmp(l, r);
        if cmp != Ordering::Equal {
            return cmp;
        }
    }
    left.len().cmp(&right.len())
}

/// Apply a `NullsOrder` on top of `canonical_cmp`: absent values
/// (`Null`/`Undefined`) are pulled to the configured end before
/// falling back to canonical order for the rest.
#[must_use]
pub fn ordered_cmp(left: &Value, right: &Value, nulls: NullsOrder) -> Ordering {
    let (left_absent, right_absent) = (left.is_absent(), right.is_absent());
    match (left_absent, right_absent) {
        (true, true) => Ordering::Equal,
        (true, false) => absent_ordering(nulls, Ordering::Less),
        (false, true) => absent_ordering(nulls, Ordering::Greater),
        (false, false) => canonical_cmp(left, right),
    }
}

const fn absent_ordering(nulls: NullsOrder, if_first: Ordering) -> Ordering {
    match nulls {
        NullsOrder::First => if_first,
        NullsOrder::Last => if_first.reverse(),
    }
}
