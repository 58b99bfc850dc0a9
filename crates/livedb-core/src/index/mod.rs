//! Index abstraction: keyed secondary structures answering
//! `eq/gt/gte/lt/lte/in` and ordered range/take.

mod btree;
mod reverse;

pub use btree::BTreeIndex;
pub use reverse::ReverseIndex;

use crate::expr::Expr;
use crate::Value;
use std::collections::BTreeSet;

///
/// CompareOp
///
/// The operation family an index is asked to answer. `In` is handled
/// either natively or by falling back to a union of `Eq` lookups.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompareOp {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

///
/// RangeQuery
///
/// A (possibly open-ended) bound pair. `from`/`to` of `None` means
/// unbounded on that side.
///
#[derive(Clone, Debug, Default)]
pub struct RangeQuery {
    pub from: Option<Value>,
    pub to: Option<Value>,
    pub from_inclusive: bool,
    pub to_inclusive: bool,
}

impl RangeQuery {
    #[must_use]
    pub fn unbounded() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn lower(value: Value, inclusive: bool) -> Self {
        Self {
            from: Some(value),
            from_inclusive: inclusive,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn upper(value: Value, inclusive: bool) -> Self {
        Self {
            to: Some(value),
            to_inclusive: inclusive,
            ..Self::default()
        }
    }

    /// Tighten `self` by intersecting with `other`'s bounds — the
    /// fusion step the planner uses to merge `age >= 18 AND age < 65`
    /// into one range.
    #[must_use]
    pub fn fused_with(mut self, other: &Self) -> Self {
        if let Some(other_from) = &other.from {
            let tighten = match &self.from {
                None => true,
                Some(current) => other_from > current
                    || (other_from == current && !other.from_inclusive),
            };
            if tighten {
                self.from = Some(other_from.clone());
                self.from_inclusive = other.from_inclusive;
            }
        }
        if let Some(other_to) = &other.to {
            let tighten = match &self.to {
                None => true,
                Some(current) => other_to < current || (other_to == current && !other.to_inclusive),
            };
            if tighten {
                self.to = Some(other_to.clone());
                self.to_inclusive = other.to_inclusive;
            }
        }
        self
    }
}

///
/// Index
///
/// Every index exposes the expression it indexes, the ops it
/// supports, and maintenance + lookup operations. `K` is the
/// collection's key type.
///
pub trait Index<K: Ord + Clone + Eq + std::hash::Hash> {
    /// The expression this index is built over (used by the planner
    /// to match a `PropRef` in a where-expression to an index).
    fn expr(&self) -> &Expr;

    fn supported_ops(&self) -> &'static [CompareOp];

    /// Index one (key, value) pair. Called once per row on `build`,
    /// and once per insert/update thereafter.
    fn add(&mut self, key: K, value: &Value);

    /// Remove the (key, value) pair. A no-op if the pair is absent.
    fn remove(&mut self, key: &K, value: &Value);

    /// Re-index a key whose value changed. Equivalent to `remove` then
    /// `add` but exposed as one call so indexes spanning the keyspace
    /// can co-locate the work.
    fn update(&mut self, key: K, old: &Value, new: &Value) {
        self.remove(&key, old);
        self.add(key, new);
    }

    /// Rebuild the entire index from scratch.
    fn build<'a>(&mut self, rows: impl Iterator<Item = (K, &'a Value)>)
    where
        Self: Sized,
    {
        for (key, value) in rows {
            self.add(key, value);
        }
    }

    fn lookup(&self, op: CompareOp, value: &Value) -> BTreeSet<K>;

    /// Equality lookup for each member of a `Value::List`, unioned —
    /// the fallback path for `in` when an index has no native support.
    fn lookup_in(&self, values: &[Value]) -> BTreeSet<K> {
        let mut out = BTreeSet::new();
        for value in values {
            out.extend(self.lookup(CompareOp::Eq, value));
        }
        out
    }

    fn range_query(&self, range: &RangeQuery) -> BTreeSet<K>;

    /// Ascending ordered iteration, at most `n` keys satisfying
    /// `filter`, starting from `from` (exclusive) if given.
    fn take(&self, n: usize, from: Option<&Value>, filter: &dyn Fn(&K) -> bool) -> Vec<K>;

    /// Descending counterpart of `take`.
    fn take_rev(&self, n: usize, from: Option<&Value>, filter: &dyn Fn(&K) -> bool) -> Vec<K>;
}
