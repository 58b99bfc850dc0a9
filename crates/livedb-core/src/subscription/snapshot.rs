//! Initial-snapshot delivery: a full, optionally index-narrowed scan
//! of currently-visible rows, or an index-ordered limited batch for
//! subscriptions that ask for an order and a limit.

use crate::access::{plan_where, IndexCatalog};
use crate::expr::{Compiled, Expr};
use crate::index::Index;
use crate::row::Row;
use crate::{CompareOptions, Value};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::hash::Hash;

///
/// OrderBy
///
/// One sort key of a snapshot's composite ordering. `compare_options`
/// controls null placement the same
/// way an index's own normalization does; string collation beyond
/// lexical order is out of scope (see `CompareOptions`'s doc comment).
///
#[derive(Clone)]
pub struct OrderBy {
    pub path: Vec<String>,
    pub descending: bool,
    pub compare_options: CompareOptions,
}

impl OrderBy {
    #[must_use]
    pub fn new(path: Vec<String>) -> Self {
        Self {
            path,
            descending: false,
            compare_options: CompareOptions::default(),
        }
    }

    #[must_use]
    pub const fn descending(mut self) -> Self {
        self.descending = true;
        self
    }
}

fn compare_rows<R: Row>(a: &R, b: &R, order: &[OrderBy]) -> Ordering {
    for clause in order {
        let va = a.field(&clause.path);
        let vb = b.field(&clause.path);
        let mut cmp = livedb_primitives::ordered_cmp(&va, &vb, clause.compare_options.nulls);
        if clause.descending {
            cmp = cmp.reverse();
        }
        if cmp != Ordering::Equal {
            return cmp;
        }
    }
    Ordering::Equal
}

/// Filtered full snapshot: narrow `visible` by the planner's
/// candidate-key set when one is found,
/// apply the compiled predicate to what's left, sort by `order` if
/// any is given, then slice to `limit`.
#[must_use]
pub fn full_snapshot<K, R>(
    visible: Vec<(K, R)>,
    catalog: &IndexCatalog<K>,
    where_expr: Option<&Expr>,
    predicate: Option<&Compiled<R>>,
    order: &[OrderBy],
    limit: Option<usize>,
) -> Vec<(K, R)>
where
    K: Ord + Clone + Eq + Hash,
    R: Row,
{
    let plan = where_expr.map(|expr| plan_where(expr, catalog));
    let mut rows: Vec<(K, R)> = visible
        .into_iter()
        .filter(|(key, _)| {
            plan.as_ref().is_none_or(|plan| {
                plan.matching_keys().is_none_or(|keys| keys.contains(key))
            })
        })
        .filter(|(_, row)| predicate.is_none_or(|p| p.eval_bool(row)))
        .collect();

    if !order.is_empty() {
        rows.sort_by(|(_, a), (_, b)| compare_rows(a, b, order));
    }
    if let Some(limit) = limit {
        rows.truncate(limit);
    }
    rows
}

/// Index-ordered limited snapshot: repeatedly `take`/`take_rev` from
/// `index`, skipping `already_sent` keys and
/// any row the compiled predicate rejects, advancing a value cursor
/// after each accepted row, until `limit` rows are collected or the
/// index is exhausted.
#[must_use]
pub fn ordered_batch<K, R>(
    index: &dyn Index<K>,
    path: &[String],
    descending: bool,
    limit: usize,
    already_sent: &HashSet<K>,
    predicate: Option<&Compiled<R>>,
    resolve: impl Fn(&K) -> Option<R>,
) -> Vec<(K, R)>
where
    K: Ord + Clone + Eq + Hash,
    R: Row,
{
    let mut out: Vec<(K, R)> = Vec::new();
    let mut cursor: Option<Value> = None;

    while out.len() < limit {
        let remaining = limit - out.len();
        let filter = |key: &K| {
            if already_sent.contains(key) {
                return false;
            }
            match (predicate, resolve(key)) {
                (Some(p), Some(row)) => p.eval_bool(&row),
                (None, Some(_)) => true,
                (_, None) => false,
            }
        };
        let batch = if descending {
            index.take_rev(remaining, cursor.as_ref(), &filter)
        } else {
            index.take(remaining, cursor.as_ref(), &filter)
        };
        if batch.is_empty() {
            break;
        }
        let exhausted = batch.len() < remaining;
        for key in &batch {
            if let Some(row) = resolve(key) {
                cursor = Some(row.field(path));
                out.push((key.clone(), row));
            }
        }
        if exhausted {
            break;
        }
    }
    out
}
