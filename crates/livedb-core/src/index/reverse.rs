use super::{CompareOp, Index, RangeQuery};
use crate::expr::Expr;
use crate::Value;
use std::collections::BTreeSet;
use std::hash::Hash;

///
/// ReverseIndex
///
/// Wraps another index and flips its comparison and iteration
/// direction: every operation and ordering the inner index answers
/// comes back reversed. Used when a query requests descending order
/// over a field that only has an ascending index.
///
pub struct ReverseIndex<I> {
    inner: I,
}

impl<I> ReverseIndex<I> {
    #[must_use]
    pub const fn new(inner: I) -> Self {
        Self { inner }
    }

    #[must_use]
    pub fn into_inner(self) -> I {
        self.inner
    }
}

impl<K, I> Index<K> for ReverseIndex<I>
where
    K: Ord + Clone + Eq + Hash,
    I: Index<K>,
{
    fn expr(&self) -> &Expr {
        self.inner.expr()
    }

    fn supported_ops(&self) -> &'static [CompareOp] {
        self.inner.supported_ops()
    }

    fn add(&mut self, key: K, value: &Value) {
        self.inner.add(key, value);
    }

    fn remove(&mut self, key: &K, value: &Value) {
        self.inner.remove(key, value);
    }

    fn update(&mut self, key: K, old: &Value, new: &Value) {
        self.inner.update(key, old, new);
    }

    fn lookup(&self, op: CompareOp, value: &Value) -> BTreeSet<K> {
        self.inner.lookup(op.flipped(), value)
    }

    fn lookup_in(&self, values: &[Value]) -> BTreeSet<K> {
        self.inner.lookup_in(values)
    }

    fn range_query(&self, range: &RangeQuery) -> BTreeSet<K> {
        self.inner.range_query(&range.clone().flipped())
    }

    fn take(&self, n: usize, from: Option<&Value>, filter: &dyn Fn(&K) -> bool) -> Vec<K> {
        self.inner.take_rev(n, from, filter)
    }

    fn take_rev(&self, n: usize, from: Option<&Value>, filter: &dyn Fn(&K) -> bool) -> Vec<K> {
        self.inner.take(n, from, filter)
    }
}

impl CompareOp {
    /// `Gt`/`Lt` and `Gte`/`Lte` swap; `Eq` is its own flip.
    #[must_use]
    pub const fn flipped(self) -> Self {
        match self {
            Self::Gt => Self::Lt,
            Self::Gte => Self::Lte,
            Self::Lt => Self::Gt,
            Self::Lte => Self::Gte,
            Self::Eq => Self::Eq,
        }
    }
}

impl RangeQuery {
    /// Swap `from`/`to` so ascending storage answers a descending
    /// range the same way `ReverseIndex` answers a flipped `CompareOp`.
    #[must_use]
    pub fn flipped(self) -> Self {
        Self {
            from: self.to,
            to: self.from,
            from_inclusive: self.to_inclusive,
            to_inclusive: self.from_inclusive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::BTreeIndex;

    fn forward() -> BTreeIndex<u32> {
        let mut idx = BTreeIndex::new(Expr::prop(&["age"]));
        for (k, v) in [(1u32, 10i64), (2, 20), (3, 30)] {
            idx.add(k, &Value::Int(v));
        }
        idx
    }

    #[test]
    fn flipped_compare_op_swaps_gt_and_lt() {
        let reversed = ReverseIndex::new(forward());
        // Gt(20) flips to Lt(20) against the inner ascending tree -> {1}.
        assert_eq!(
            reversed.lookup(CompareOp::Gt, &Value::Int(20)),
            [1].into()
        );
    }

    #[test]
    fn take_and_take_rev_are_swapped() {
        let reversed = ReverseIndex::new(forward());
        assert_eq!(reversed.take(1, None, &|_| true), vec![3]);
        assert_eq!(reversed.take_rev(1, None, &|_| true), vec![1]);
    }

    #[test]
    fn eq_is_unaffected_by_flip() {
        let reversed = ReverseIndex::new(forward());
        assert_eq!(
            reversed.lookup(CompareOp::Eq, &Value::Int(20)),
            [2].into()
        );
    }
}
