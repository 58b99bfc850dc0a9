use crate::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::rc::Rc;

///
/// CollectionState
///
/// The dual-layer store: a synced base plus an optimistic upsert map
/// and delete set. `compare`, when configured, makes iteration order
/// deterministic by value instead of by insertion/hash order — order
/// is recomputed on each snapshot rather than maintained incrementally,
/// which is simpler and cheap enough at the scale this engine targets.
///
pub struct CollectionState<T, K: Eq + Hash> {
    pub synced: HashMap<K, T>,
    pub synced_metadata: HashMap<K, Value>,
    pub optimistic_upserts: HashMap<K, T>,
    pub optimistic_deletes: HashSet<K>,
    pub compare: Option<Rc<dyn Fn(&T, &T) -> Ordering>>,
}

impl<T, K: Clone + Eq + Hash> CollectionState<T, K> {
    #[must_use]
    pub fn new(compare: Option<Rc<dyn Fn(&T, &T) -> Ordering>>) -> Self {
        Self {
            synced: HashMap::new(),
            synced_metadata: HashMap::new(),
            optimistic_upserts: HashMap::new(),
            optimistic_deletes: HashSet::new(),
            compare,
        }
    }

    /// An upsert overlay wins outright; otherwise an optimistic
    /// delete hides the synced value; otherwise the synced value (if
    /// any) shows through.
    #[must_use]
    pub fn visible(&self, key: &K) -> Option<&T> {
        if let Some(v) = self.optimistic_upserts.get(key) {
            return Some(v);
        }
        if self.optimistic_deletes.contains(key) {
            return None;
        }
        self.synced.get(key)
    }

    #[must_use]
    pub fn has(&self, key: &K) -> bool {
        self.visible(key).is_some()
    }

    /// Visible count: synced rows, minus those hidden by an
    /// optimistic delete with no overriding upsert, plus upserts for
    /// keys synced never had.
    #[must_use]
    pub fn size(&self) -> usize {
        let hidden = self
            .synced
            .keys()
            .filter(|k| {
                self.optimistic_deletes.contains(*k) && !self.optimistic_upserts.contains_key(*k)
            })
            .count();
        let added = self
            .optimistic_upserts
            .keys()
            .filter(|k| !self.synced.contains_key(*k))
            .count();
        self.synced.len() - hidden + added
    }

    fn visible_key_set(&self) -> HashSet<K> {
        let mut keys: HashSet<K> = self
            .synced
            .keys()
            .filter(|k| !self.optimistic_deletes.contains(*k) || self.optimistic_upserts.contains_key(*k))
            .cloned()
            .collect();
        keys.extend(self.optimistic_upserts.keys().cloned());
        keys
    }

    /// All visible keys, ordered by `compare` when configured and
    /// falling back to `K`'s own `Ord` otherwise for deterministic
    /// iteration when no comparator was configured.
    #[must_use]
    pub fn visible_keys_ordered(&self) -> Vec<K>
    where
        K: Ord,
    {
        let mut keys: Vec<K> = self.visible_key_set().into_iter().collect();
        match &self.compare {
            Some(compare) => keys.sort_by(|a, b| {
                let va = self.visible(a).expect("key came from visible_key_set");
                let vb = self.visible(b).expect("key came from visible_key_set");
                compare(va, vb)
            }),
            None => keys.sort(),
        }
        keys
    }

    /// Every currently-visible `(key, value)` pair, in the same order
    /// as [`CollectionState::visible_keys_ordered`]. Used to build
    /// snapshots and to backfill a freshly created index.
    #[must_use]
    pub fn visible_entries(&self) -> Vec<(K, &T)>
    where
        K: Ord,
    {
        self.visible_keys_ordered()
            .into_iter()
            .map(|key| {
                let value = self.visible(&key).expect("key came from visible_keys_ordered");
                (key, value)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> CollectionState<i64, u32> {
        let mut s = CollectionState::new(None);
        s.synced.insert(1, 10);
        s.synced.insert(2, 20);
        s
    }

    #[test]
    fn visible_overlays_optimistic_upsert() {
        let mut s = state();
        s.optimistic_upserts.insert(1, 99);
        assert_eq!(s.visible(&1), Some(&99));
    }

    #[test]
    fn visible_hides_optimistic_delete() {
        let mut s = state();
        s.optimistic_deletes.insert(2);
        assert_eq!(s.visible(&2), None);
    }

    #[test]
    fn upsert_wins_over_delete_for_same_key() {
        let mut s = state();
        s.optimistic_deletes.insert(1);
        s.optimistic_upserts.insert(1, 42);
        assert_eq!(s.visible(&1), Some(&42));
    }

    #[test]
    fn size_matches_identity_formula() {
        let mut s = state();
        s.optimistic_deletes.insert(2);
        s.optimistic_upserts.insert(3, 30);
        assert_eq!(s.size(), 2); // {1, 3}: 2 hidden-minus-added, 1 added
    }
}
