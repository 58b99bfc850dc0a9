use super::{CompareOp, Index, RangeQuery};
use crate::expr::Expr;
use crate::obs;
use crate::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::Hash;
use std::ops::Bound;

/// Human-readable label for `IndexRowSkipped`'s `index` field; mirrors
/// the `path.join(".")` label `Collection::create_index` already uses
/// for `IndexBuilt`.
fn describe_expr(expr: &Expr) -> String {
    match expr {
        Expr::PropRef(path) => path.join("."),
        _ => "?".to_string(),
    }
}

///
/// BTreeIndex
///
/// The default ordered index: a B-tree on the normalized indexed
/// value, backed by a `value -> Set<key>` map. `Value`'s
/// own `Ord` impl is the canonical total order (rank-first, then
/// same-variant comparison; NaN floats are rejected before insertion).
///
pub struct BTreeIndex<K: Ord + Clone + Eq + Hash> {
    expr: Expr,
    tree: BTreeMap<Value, BTreeSet<K>>,
    collection: String,
}

impl<K: Ord + Clone + Eq + Hash> BTreeIndex<K> {
    #[must_use]
    pub fn new(expr: Expr) -> Self {
        Self {
            expr,
            tree: BTreeMap::new(),
            collection: String::new(),
        }
    }

    /// Attach the owning collection's id, used only to label
    /// `IndexRowSkipped` observability events.
    #[must_use]
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.values().map(BTreeSet::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    fn range_bounds(range: &RangeQuery) -> (Bound<Value>, Bound<Value>) {
        let lower = match &range.from {
            None => Bound::Unbounded,
            Some(v) if range.from_inclusive => Bound::Included(v.clone()),
            Some(v) => Bound::Excluded(v.clone()),
        };
        let upper = match &range.to {
            None => Bound::Unbounded,
            Some(v) if range.to_inclusive => Bound::Included(v.clone()),
            Some(v) => Bound::Excluded(v.clone()),
        };
        (lower, upper)
    }
}

impl<K: Ord + Clone + Eq + Hash> Index<K> for BTreeIndex<K> {
    fn expr(&self) -> &Expr {
        &self.expr
    }

    fn supported_ops(&self) -> &'static [CompareOp] {
        &[
            CompareOp::Eq,
            CompareOp::Gt,
            CompareOp::Gte,
            CompareOp::Lt,
            CompareOp::Lte,
        ]
    }

    fn add(&mut self, key: K, value: &Value) {
        if matches!(value, Value::Float(f) if f.is_nan()) {
            obs::record(obs::Event::IndexRowSkipped {
                collection: self.collection.clone(),
                index: describe_expr(&self.expr),
                reason: "NaN key cannot be ordered".to_string(),
            });
            return;
        }
        self.tree.entry(value.clone()).or_default().insert(key);
    }

    fn remove(&mut self, key: &K, value: &Value) {
        if let Some(set) = self.tree.get_mut(value) {
            set.remove(key);
            if set.is_empty() {
                self.tree.remove(value);
            }
        }
    }

    fn lookup(&self, op: CompareOp, value: &Value) -> BTreeSet<K> {
        match op {
            CompareOp::Eq => self.tree.get(value).cloned().unwrap_or_default(),
            CompareOp::Gt => self.range_query(&RangeQuery::lower(value.clone(), false)),
            CompareOp::Gte => self.range_query(&RangeQuery::lower(value.clone(), true)),
            CompareOp::Lt => self.range_query(&RangeQuery::upper(value.clone(), false)),
            CompareOp::Lte => self.range_query(&RangeQuery::upper(value.clone(), true)),
        }
    }

    fn range_query(&self, range: &RangeQuery) -> BTreeSet<K> {
        let (lower, upper) = Self::range_bounds(range);
        self.tree
            .range((lower, upper))
            .flat_map(|(_, set)| set.iter().cloned())
            .collect()
    }

    fn take(&self, n: usize, from: Option<&Value>, filter: &dyn Fn(&K) -> bool) -> Vec<K> {
        let lower = match from {
            None => Bound::Unbounded,
            Some(v) => Bound::Excluded(v.clone()),
        };
        let mut out = Vec::with_capacity(n.min(self.tree.len()));
        'outer: for (_, set) in self.tree.range((lower, Bound::Unbounded)) {
            for key in set {
                if filter(key) {
                    out.push(key.clone());
                    if out.len() >= n {
                        break 'outer;
                    }
                }
            }
        }
        out
    }

    fn take_rev(&self, n: usize, from: Option<&Value>, filter: &dyn Fn(&K) -> bool) -> Vec<K> {
        let upper = match from {
            None => Bound::Unbounded,
            Some(v) => Bound::Excluded(v.clone()),
        };
        let mut out = Vec::with_capacity(n.min(self.tree.len()));
        'outer: for (_, set) in self.tree.range((Bound::Unbounded, upper)).rev() {
            for key in set.iter().rev() {
                if filter(key) {
                    out.push(key.clone());
                    if out.len() >= n {
                        break 'outer;
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;

    fn idx() -> BTreeIndex<u32> {
        let mut idx = BTreeIndex::new(Expr::prop(&["age"]));
        for (k, v) in [(1u32, 10i64), (2, 20), (3, 30), (4, 40), (5, 50)] {
            idx.add(k, &Value::Int(v));
        }
        idx
    }

    #[test]
    fn eq_lookup() {
        let idx = idx();
        assert_eq!(idx.lookup(CompareOp::Eq, &Value::Int(30)), [3].into());
    }

    #[test]
    fn range_query_matches_filter_semantics() {
        let idx = idx();
        let got = idx.range_query(&RangeQuery {
            from: Some(Value::Int(20)),
            from_inclusive: true,
            to: Some(Value::Int(40)),
            to_inclusive: false,
        });
        assert_eq!(got, [2, 3].into());
    }

    #[test]
    fn nan_is_never_indexed() {
        let mut idx: BTreeIndex<u32> = BTreeIndex::new(Expr::prop(&["score"]));
        idx.add(1, &Value::Float(f64::NAN));
        assert!(idx.is_empty());
    }

    #[test]
    fn take_respects_filter_and_limit() {
        let idx = idx();
        let got = idx.take(2, None, &|k| *k != 2);
        assert_eq!(got, vec![1, 3]);
    }

    #[test]
    fn take_rev_is_descending() {
        let idx = idx();
        let got = idx.take_rev(2, None, &|_| true);
        assert_eq!(got, vec![5, 4]);
    }
}
