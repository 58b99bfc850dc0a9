use crate::Value;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use ulid::Ulid;

///
/// MutationType
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MutationType {
    Insert,
    Update,
    Delete,
}

/// `"KEY::<collectionId>/<key>"` — the cross-transaction identity a
/// mutation is merged on.
#[must_use]
pub fn global_key<K: fmt::Display>(collection_id: &str, key: &K) -> String {
    format!("KEY::{collection_id}/{key}")
}

///
/// PendingMutation
///
/// One mutation against one key, attached to exactly one transaction.
/// `changes` is the minimal per-field diff; `modified` is the
/// post-image; `original` is `None` for inserts.
///
#[derive(Clone, Debug)]
pub struct PendingMutation<T, K> {
    pub mutation_id: Ulid,
    pub kind: MutationType,
    pub key: K,
    pub global_key: String,
    pub original: Option<T>,
    pub modified: Option<T>,
    pub changes: HashMap<String, Value>,
    pub metadata: Option<Value>,
    pub sync_metadata: Option<Value>,
    pub optimistic: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub collection: String,
}

impl<T, K: fmt::Display> PendingMutation<T, K> {
    #[must_use]
    pub fn insert(collection: &str, key: K, value: T, metadata: Option<Value>, optimistic: bool) -> Self {
        let now = Utc::now();
        Self {
            mutation_id: Ulid::new(),
            kind: MutationType::Insert,
            global_key: global_key(collection, &key),
            key,
            original: None,
            modified: Some(value),
            changes: HashMap::new(),
            metadata,
            sync_metadata: None,
            optimistic,
            created_at: now,
            updated_at: now,
            collection: collection.to_string(),
        }
    }

    #[must_use]
    pub fn update(
        collection: &str,
        key: K,
        original: T,
        modified: T,
        changes: HashMap<String, Value>,
        metadata: Option<Value>,
        optimistic: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            mutation_id: Ulid::new(),
            kind: MutationType::Update,
            global_key: global_key(collection, &key),
            key,
            original: Some(original),
            modified: Some(modified),
            changes,
            metadata,
            sync_metadata: None,
            optimistic,
            created_at: now,
            updated_at: now,
            collection: collection.to_string(),
        }
    }

    #[must_use]
    pub fn delete(collection: &str, key: K, original: T, metadata: Option<Value>, optimistic: bool) -> Self {
        let now = Utc::now();
        Self {
            mutation_id: Ulid::new(),
            kind: MutationType::Delete,
            global_key: global_key(collection, &key),
            key,
            original: Some(original),
            modified: None,
            changes: HashMap::new(),
            metadata,
            sync_metadata: None,
            optimistic,
            created_at: now,
            updated_at: now,
            collection: collection.to_string(),
        }
    }
}

/// Merge a same-`globalKey` successor into a predecessor. Returns
/// `None` when the pair cancels out entirely (an insert followed by
/// a delete in the same transaction nets to nothing).
#[must_use]
pub fn merge_pending<T: Clone, K: Clone>(
    prev: &PendingMutation<T, K>,
    next: PendingMutation<T, K>,
) -> Option<PendingMutation<T, K>> {
    use MutationType::{Delete, Insert, Update};

    match (prev.kind, next.kind) {
        (Insert, Insert | Update) => Some(PendingMutation {
            kind: Insert,
            modified: next.modified,
            changes: next.changes,
            updated_at: next.updated_at,
            sync_metadata: next.sync_metadata.or_else(|| prev.sync_metadata.clone()),
            metadata: next.metadata.or_else(|| prev.metadata.clone()),
            ..prev.clone()
        }),
        (Insert, Delete) => None,
        (Update, Insert) => Some(PendingMutation {
            kind: Insert,
            modified: next.modified,
            changes: next.changes,
            updated_at: next.updated_at,
            ..prev.clone()
        }),
        (Update, Update) => {
            let mut changes = prev.changes.clone();
            changes.extend(next.changes);
            Some(PendingMutation {
                kind: Update,
                modified: next.modified,
                changes,
                updated_at: next.updated_at,
                ..prev.clone()
            })
        }
        (Update, Delete) => Some(PendingMutation {
            kind: Delete,
            modified: None,
            changes: HashMap::new(),
            updated_at: next.updated_at,
            ..prev.clone()
        }),
        // An update immediately after a delete on the same global key
        // shouldn't reach the merge step at all: the visible view for
        // that key is already gone, so the planner rejects the update
        // with `UpdateKeyNotFound` before a successor mutation exists
        // to merge. Treated the same as a replace if it ever does.
        (Delete, Insert | Update) => Some(PendingMutation {
            kind: Insert,
            modified: next.modified,
            changes: next.changes,
            updated_at: next.updated_at,
            ..prev.clone()
        }),
        (Delete, Delete) => Some(PendingMutation {
            updated_at: next.updated_at,
            metadata: next.metadata.or_else(|| prev.metadata.clone()),
            ..prev.clone()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mutation(kind: MutationType, modified: Option<&str>) -> PendingMutation<String, u32> {
        PendingMutation {
            mutation_id: Ulid::new(),
            kind,
            key: 1,
            global_key: global_key("users", &1u32),
            original: None,
            modified: modified.map(str::to_string),
            changes: HashMap::new(),
            metadata: None,
            sync_metadata: None,
            optimistic: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            collection: "users".to_string(),
        }
    }

    #[test]
    fn insert_then_delete_cancels_out() {
        let prev = mutation(MutationType::Insert, Some("a"));
        let next = mutation(MutationType::Delete, None);
        assert!(merge_pending(&prev, next).is_none());
    }

    #[test]
    fn update_then_update_unions_changes_and_keeps_original() {
        let mut prev = mutation(MutationType::Update, Some("a"));
        prev.original = Some("orig".to_string());
        prev.changes.insert("a".to_string(), Value::Text("a".into()));
        let mut next = mutation(MutationType::Update, Some("b"));
        next.changes.insert("b".to_string(), Value::Text("y".into()));
        let merged = merge_pending(&prev, next).unwrap();
        assert_eq!(merged.original, Some("orig".to_string()));
        assert_eq!(merged.modified, Some("b".to_string()));
        assert_eq!(merged.changes.len(), 2);
    }

    #[test]
    fn delete_then_insert_is_replace() {
        let prev = mutation(MutationType::Delete, None);
        let next = mutation(MutationType::Insert, Some("a"));
        let merged = merge_pending(&prev, next).unwrap();
        assert_eq!(merged.kind, MutationType::Insert);
        assert_eq!(merged.modified, Some("a".to_string()));
    }
}
