use std::collections::BTreeSet;
use std::hash::Hash;

///
/// AccessPlan
///
/// Result of attempting to satisfy a where-expression from the
/// available indexes. `FullScan` means no index could narrow the
/// candidate set at all;
/// callers fall back to evaluating the where-expression over every
/// row. `Keys` is always a *superset* of the rows that actually match
/// — the caller still evaluates the full expression per candidate.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccessPlan<K: Ord + Clone + Eq + Hash> {
    FullScan,
    Keys(BTreeSet<K>),
}

impl<K: Ord + Clone + Eq + Hash> AccessPlan<K> {
    #[must_use]
    pub const fn can_optimize(&self) -> bool {
        matches!(self, Self::Keys(_))
    }

    #[must_use]
    pub fn matching_keys(&self) -> Option<&BTreeSet<K>> {
        match self {
            Self::Keys(keys) => Some(keys),
            Self::FullScan => None,
        }
    }

    #[must_use]
    pub fn into_matching_keys(self) -> Option<BTreeSet<K>> {
        match self {
            Self::Keys(keys) => Some(keys),
            Self::FullScan => None,
        }
    }
}
