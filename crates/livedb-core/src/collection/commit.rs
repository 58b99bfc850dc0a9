//! Sync-commit application: fold one pending sync batch into
//! `synced`/`synced_metadata`. Diffing pre- vs
//! post-state and emitting events is the caller's job (`Collection`
//! owns the optimistic overlay and the subscriber list this needs);
//! this module only knows how to replay a batch of writes.

use super::events::RowUpdateMode;
use super::sync::{PendingSyncTransaction, SyncOp};
use crate::Value;
use std::collections::HashMap;
use std::hash::Hash;

/// Apply `batch` to `synced`/`synced_metadata`, honoring `truncate`
/// and `row_update_mode`. Returns every key the batch touched, in
/// first-touched order with duplicates removed — a truncate's
/// implicit "every currently-synced key" entries come first, then
/// each operation's key in write order.
pub fn apply_commit<T, K>(
    batch: &PendingSyncTransaction<T, K>,
    synced: &mut HashMap<K, T>,
    synced_metadata: &mut HashMap<K, Value>,
    row_update_mode: RowUpdateMode,
    get_key: &dyn Fn(&T) -> K,
    merge_partial: &dyn Fn(&T, &T) -> T,
) -> Vec<K>
where
    T: Clone,
    K: Clone + Eq + Hash,
{
    let mut changed_keys = Vec::new();
    let mut seen = std::collections::HashSet::new();

    if batch.truncate {
        for key in synced.keys() {
            if seen.insert(key.clone()) {
                changed_keys.push(key.clone());
            }
        }
        synced.clear();
        synced_metadata.clear();
    }

    for op in &batch.operations {
        let key = match op {
            SyncOp::Insert { value, .. } | SyncOp::Update { value, .. } => get_key(value),
            SyncOp::Delete { key } => key.clone(),
        };
        if seen.insert(key.clone()) {
            changed_keys.push(key.clone());
        }

        match op {
            SyncOp::Insert { value, metadata } => {
                synced.insert(key.clone(), value.clone());
                if let Some(metadata) = metadata {
                    synced_metadata.insert(key, metadata.clone());
                }
            }
            SyncOp::Update { value, metadata } => {
                let applied = match (row_update_mode, synced.get(&key)) {
                    (RowUpdateMode::Partial, Some(previous)) => merge_partial(previous, value),
                    (RowUpdateMode::Partial | RowUpdateMode::Full, _) => value.clone(),
                };
                synced.insert(key.clone(), applied);
                if let Some(metadata) = metadata {
                    synced_metadata.insert(key, metadata.clone());
                }
            }
            SyncOp::Delete { key } => {
                synced.remove(key);
                synced_metadata.remove(key);
            }
        }
    }

    changed_keys
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_key(value: &(u32, &'static str)) -> u32 {
        value.0
    }

    fn replace(_prev: &(u32, &'static str), next: &(u32, &'static str)) -> (u32, &'static str) {
        *next
    }

    #[test]
    fn insert_then_delete_same_batch_leaves_no_row() {
        let mut synced = HashMap::new();
        let mut metadata = HashMap::new();
        let mut batch = PendingSyncTransaction::new();
        batch.operations.push(SyncOp::Insert {
            value: (1, "a"),
            metadata: None,
        });
        batch.operations.push(SyncOp::Delete { key: 1 });

        let changed = apply_commit(
            &batch,
            &mut synced,
            &mut metadata,
            RowUpdateMode::Full,
            &get_key,
            &replace,
        );

        assert_eq!(changed, vec![1]);
        assert!(synced.is_empty());
    }

    #[test]
    fn truncate_clears_existing_rows_before_replaying_ops() {
        let mut synced = HashMap::from([(1, (1, "a")), (2, (2, "b"))]);
        let mut metadata = HashMap::new();
        let mut batch = PendingSyncTransaction::new();
        batch.truncate = true;
        batch.operations.push(SyncOp::Insert {
            value: (3, "c"),
            metadata: None,
        });

        let changed = apply_commit(
            &batch,
            &mut synced,
            &mut metadata,
            RowUpdateMode::Full,
            &get_key,
            &replace,
        );

        assert_eq!(synced.len(), 1);
        assert!(synced.contains_key(&3));
        assert!(changed.contains(&1));
        assert!(changed.contains(&2));
        assert!(changed.contains(&3));
    }

    #[test]
    fn partial_update_merges_via_caller_supplied_fn() {
        let mut synced = HashMap::from([(1, (1, "a"))]);
        let mut metadata = HashMap::new();
        let mut batch = PendingSyncTransaction::new();
        batch.operations.push(SyncOp::Update {
            value: (1, "b"),
            metadata: None,
        });

        apply_commit(
            &batch,
            &mut synced,
            &mut metadata,
            RowUpdateMode::Partial,
            &get_key,
            &|_prev, next| *next,
        );

        assert_eq!(synced.get(&1), Some(&(1, "b")));
    }
}
