use super::AccessPlan;
use crate::expr::{Expr, FuncName};
use crate::index::{CompareOp, Index, RangeQuery};
use crate::Value;
use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;

///
/// IndexCatalog
///
/// The set of indexes available to the planner for one collection.
/// Looked up by the `PropRef` path the index was built over.
///
pub struct IndexCatalog<K: Ord + Clone + Eq + Hash> {
    indexes: Vec<Box<dyn Index<K>>>,
}

impl<K: Ord + Clone + Eq + Hash> Default for IndexCatalog<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone + Eq + Hash> IndexCatalog<K> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            indexes: Vec::new(),
        }
    }

    pub fn register(&mut self, index: Box<dyn Index<K>>) {
        self.indexes.push(index);
    }

    /// Mutable access to every registered index, for maintenance calls
    /// (`add`/`remove`/`update`) the planner itself never needs.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn Index<K>>> {
        self.indexes.iter_mut()
    }

    #[must_use]
    pub fn has_index(&self, path: &[String]) -> bool {
        self.find(path).is_some()
    }

    #[must_use]
    pub fn find(&self, path: &[String]) -> Option<&dyn Index<K>> {
        self.indexes
            .iter()
            .map(AsRef::as_ref)
            .find(|idx| matches!(idx.expr(), Expr::PropRef(p) if p.as_slice() == path))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }
}

/// One `field <op> value` leaf extracted from a comparison `Func`,
/// with the operand order normalized so the ref always comes first.
struct Leaf<'a> {
    path: &'a [String],
    op: FuncName,
    value: &'a Value,
}

fn as_leaf(expr: &Expr) -> Option<Leaf<'_>> {
    let Expr::Func(op, args) = expr else {
        return None;
    };
    if !op.is_index_comparable() || *op == FuncName::In {
        return None;
    }
    match (args.first(), args.get(1)) {
        (Some(Expr::PropRef(path)), Some(Expr::Value(value))) => Some(Leaf {
            path,
            op: *op,
            value,
        }),
        (Some(Expr::Value(value)), Some(Expr::PropRef(path))) => Some(Leaf {
            path,
            op: op.flipped(),
            value,
        }),
        _ => None,
    }
}

/// Turn a where-expression into a candidate key set using whatever
/// indexes are registered. Never fails: a part of the expression no
/// index covers is simply left for the caller's per-row evaluation,
/// and if nothing at all is index-backed the result is `FullScan`.
pub fn plan_where<K: Ord + Clone + Eq + Hash>(
    expr: &Expr,
    catalog: &IndexCatalog<K>,
) -> AccessPlan<K> {
    match expr {
        Expr::Func(FuncName::And, args) => plan_and(args, catalog),
        Expr::Func(FuncName::Or, args) => plan_or(args, catalog),
        Expr::Func(FuncName::In, args) => plan_in(args, catalog),
        _ => as_leaf(expr)
            .and_then(|leaf| catalog.find(leaf.path).map(|idx| (leaf, idx)))
            .map_or(AccessPlan::FullScan, |(leaf, idx)| {
                AccessPlan::Keys(leaf_to_compare_op(leaf.op).map_or_else(
                    BTreeSet::new,
                    |op| idx.lookup(op, leaf.value),
                ))
            }),
    }
}

fn leaf_to_compare_op(op: FuncName) -> Option<CompareOp> {
    Some(match op {
        FuncName::Eq => CompareOp::Eq,
        FuncName::Gt => CompareOp::Gt,
        FuncName::Gte => CompareOp::Gte,
        FuncName::Lt => CompareOp::Lt,
        FuncName::Lte => CompareOp::Lte,
        _ => return None,
    })
}

fn plan_in<K: Ord + Clone + Eq + Hash>(args: &[Expr], catalog: &IndexCatalog<K>) -> AccessPlan<K> {
    let (Some(Expr::PropRef(path)), Some(Expr::Value(Value::List(values)))) =
        (args.first(), args.get(1))
    else {
        return AccessPlan::FullScan;
    };
    catalog.find(path).map_or(AccessPlan::FullScan, |idx| {
        AccessPlan::Keys(idx.lookup_in(values))
    })
}

/// `and` over a mix of range-comparable leaves (fused per field into
/// one `range_query`/`lookup` call) and arbitrary sub-expressions
/// (planned recursively and intersected in). Branches with no
/// matching index simply don't narrow the set; they're still
/// evaluated precisely by the caller.
fn plan_and<K: Ord + Clone + Eq + Hash>(args: &[Expr], catalog: &IndexCatalog<K>) -> AccessPlan<K> {
    let mut ranges: HashMap<&[String], RangeQuery> = HashMap::new();
    let mut eq_keys: Vec<BTreeSet<K>> = Vec::new();
    let mut other: Vec<&Expr> = Vec::new();

    for arg in args {
        match as_leaf(arg) {
            Some(leaf) if catalog.has_index(leaf.path) => match leaf.op {
                FuncName::Eq => {
                    let idx = catalog.find(leaf.path).expect("checked above");
                    eq_keys.push(idx.lookup(CompareOp::Eq, leaf.value));
                }
                FuncName::Gt | FuncName::Gte | FuncName::Lt | FuncName::Lte => {
                    let bound = match leaf.op {
                        FuncName::Gt => RangeQuery::lower(leaf.value.clone(), false),
                        FuncName::Gte => RangeQuery::lower(leaf.value.clone(), true),
                        FuncName::Lt => RangeQuery::upper(leaf.value.clone(), false),
                        _ => RangeQuery::upper(leaf.value.clone(), true),
                    };
                    ranges
                        .entry(leaf.path)
                        .and_modify(|existing| {
                            *existing = existing.clone().fused_with(&bound);
                        })
                        .or_insert(bound);
                }
                _ => other.push(arg),
            },
            _ => other.push(arg),
        }
    }

    let mut candidate_sets: Vec<BTreeSet<K>> = eq_keys;
    for (path, range) in ranges {
        if let Some(idx) = catalog.find(path) {
            candidate_sets.push(idx.range_query(&range));
        }
    }
    for arg in other {
        if let AccessPlan::Keys(keys) = plan_where(arg, catalog) {
            candidate_sets.push(keys);
        }
    }

    intersect_all(candidate_sets)
}

/// `or` only narrows the candidate set when every arm resolves
/// through an index; otherwise a row matching the un-indexed arm
/// would be silently excluded, so the whole expression falls back to
/// `FullScan`.
fn plan_or<K: Ord + Clone + Eq + Hash>(args: &[Expr], catalog: &IndexCatalog<K>) -> AccessPlan<K> {
    let mut union = BTreeSet::new();
    for arg in args {
        match plan_where(arg, catalog) {
            AccessPlan::Keys(keys) => union.extend(keys),
            AccessPlan::FullScan => return AccessPlan::FullScan,
        }
    }
    AccessPlan::Keys(union)
}

fn intersect_all<K: Ord + Clone + Eq + Hash>(sets: Vec<BTreeSet<K>>) -> AccessPlan<K> {
    let mut iter = sets.into_iter();
    let Some(first) = iter.next() else {
        return AccessPlan::FullScan;
    };
    let intersected = iter.fold(first, |acc, next| acc.intersection(&next).cloned().collect());
    AccessPlan::Keys(intersected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::BTreeIndex;

    fn age_index() -> Box<dyn Index<u32>> {
        let mut idx: BTreeIndex<u32> = BTreeIndex::new(Expr::prop(&["age"]));
        for (k, v) in [(1u32, 10i64), (2, 20), (3, 30), (4, 40), (5, 50)] {
            idx.add(k, &Value::Int(v));
        }
        Box::new(idx)
    }

    #[test]
    fn eq_uses_index() {
        let mut catalog = IndexCatalog::new();
        catalog.register(age_index());
        let expr = Expr::call(FuncName::Eq, vec![Expr::prop(&["age"]), Expr::val(30i64)]);
        let plan = plan_where(&expr, &catalog);
        assert!(plan.can_optimize());
        assert_eq!(plan.matching_keys().unwrap(), &[3].into());
    }

    #[test]
    fn flipped_operand_order_still_resolves() {
        let mut catalog = IndexCatalog::new();
        catalog.register(age_index());
        let expr = Expr::call(FuncName::Lt, vec![Expr::val(30i64), Expr::prop(&["age"])]);
        // `30 < age` flips to `age > 30`.
        let plan = plan_where(&expr, &catalog);
        assert_eq!(plan.matching_keys().unwrap(), &[4, 5].into());
    }

    #[test]
    fn compound_range_is_fused_into_one_candidate_set() {
        let mut catalog = IndexCatalog::new();
        catalog.register(age_index());
        let expr = Expr::call(
            FuncName::And,
            vec![
                Expr::call(FuncName::Gte, vec![Expr::prop(&["age"]), Expr::val(20i64)]),
                Expr::call(FuncName::Lt, vec![Expr::prop(&["age"]), Expr::val(50i64)]),
            ],
        );
        let plan = plan_where(&expr, &catalog);
        assert_eq!(plan.matching_keys().unwrap(), &[2, 3, 4].into());
    }

    #[test]
    fn or_falls_back_to_full_scan_without_full_index_coverage() {
        let catalog: IndexCatalog<u32> = IndexCatalog::new();
        let expr = Expr::call(
            FuncName::Or,
            vec![
                Expr::call(FuncName::Eq, vec![Expr::prop(&["age"]), Expr::val(10i64)]),
                Expr::call(FuncName::Eq, vec![Expr::prop(&["name"]), Expr::val("x")]),
            ],
        );
        assert_eq!(plan_where(&expr, &catalog), AccessPlan::FullScan);
    }

    #[test]
    fn and_with_one_unindexed_branch_still_narrows() {
        let mut catalog = IndexCatalog::new();
        catalog.register(age_index());
        let expr = Expr::call(
            FuncName::And,
            vec![
                Expr::call(FuncName::Eq, vec![Expr::prop(&["age"]), Expr::val(30i64)]),
                Expr::call(FuncName::Eq, vec![Expr::prop(&["name"]), Expr::val("x")]),
            ],
        );
        let plan = plan_where(&expr, &catalog);
        assert_eq!(plan.matching_keys().unwrap(), &[3].into());
    }
}
