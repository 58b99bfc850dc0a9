use super::draft::Draft;
use super::pending::PendingMutation;
use crate::error::{CollectionError, Result};
use crate::row::Row;
use crate::Value;
use std::fmt;
use std::hash::Hash;

/// Options accepted by `Collection::insert`/`update`/`delete`: caller
/// metadata to attach to the resulting `PendingMutation`, and whether
/// the mutation should apply to the optimistic overlay at all.
#[derive(Clone, Debug)]
pub struct MutationOptions {
    pub metadata: Option<Value>,
    pub optimistic: bool,
}

impl Default for MutationOptions {
    fn default() -> Self {
        Self {
            metadata: None,
            optimistic: true,
        }
    }
}

///
/// VisibleView
///
/// The read surface the mutation manager needs from a collection: the
/// current visible value at a key (optimistic overlay over synced
/// data). Kept as a trait so this module never
/// depends on `collection` directly.
///
pub trait VisibleView<K, T> {
    fn get_visible(&self, key: &K) -> Option<T>;
}

/// The bits of collection configuration the planner functions need.
pub struct MutationConfig<'a, T, K> {
    pub collection_id: &'a str,
    pub get_key: &'a dyn Fn(&T) -> K,
    pub schema: Option<&'a dyn Fn(&T) -> Result<()>>,
}

/// Schema-validates, computes the key, rejects duplicates against the
/// visible view, and builds insert mutations.
pub fn plan_insert<T, K>(
    items: Vec<T>,
    view: &dyn VisibleView<K, T>,
    cfg: &MutationConfig<'_, T, K>,
    opts: &MutationOptions,
) -> Result<Vec<PendingMutation<T, K>>>
where
    K: fmt::Display,
{
    items
        .into_iter()
        .map(|item| {
            if let Some(schema) = cfg.schema {
                schema(&item)?;
            }
            let key = (cfg.get_key)(&item);
            if view.get_visible(&key).is_some() {
                return Err(CollectionError::DuplicateKey);
            }
            Ok(PendingMutation::insert(
                cfg.collection_id,
                key,
                item,
                opts.metadata.clone(),
                opts.optimistic,
            ))
        })
        .collect()
}

/// `delete` planning: every key must currently be visible.
pub fn plan_delete<T, K>(
    keys: Vec<K>,
    view: &dyn VisibleView<K, T>,
    cfg: &MutationConfig<'_, T, K>,
    opts: &MutationOptions,
) -> Result<Vec<PendingMutation<T, K>>>
where
    K: fmt::Display,
{
    if keys.is_empty() {
        return Err(CollectionError::NoKeysPassedToDelete);
    }
    keys.into_iter()
        .map(|key| {
            let original = view
                .get_visible(&key)
                .ok_or(CollectionError::DeleteKeyNotFound)?;
            Ok(PendingMutation::delete(
                cfg.collection_id,
                key,
                original,
                opts.metadata.clone(),
                opts.optimistic,
            ))
        })
        .collect()
}

/// `update` planning: each key is deep-cloned into a [`Draft`], the
/// caller's callback mutates it field-by-field via `touch`, and a
/// no-op callback yields zero mutations. Schema validation runs on
/// the merged item; `changes` only records callback-touched fields.
pub fn plan_update<T, K>(
    keys: Vec<K>,
    callback: impl Fn(&mut Draft<T>),
    view: &dyn VisibleView<K, T>,
    cfg: &MutationConfig<'_, T, K>,
    opts: &MutationOptions,
) -> Result<Vec<PendingMutation<T, K>>>
where
    T: Row + Clone,
    K: fmt::Display + PartialEq,
{
    if keys.is_empty() {
        return Err(CollectionError::NoKeysPassedToUpdate);
    }
    let mut out = Vec::new();
    for key in keys {
        let current = view
            .get_visible(&key)
            .ok_or(CollectionError::UpdateKeyNotFound)?;
        let mut draft = Draft::new(current);
        callback(&mut draft);
        if draft.is_noop() {
            continue;
        }
        let (original, modified, changes) = draft.into_parts();
        if (cfg.get_key)(&modified) != key {
            return Err(CollectionError::KeyUpdateNotAllowed);
        }
        if let Some(schema) = cfg.schema {
            schema(&modified)?;
        }
        out.push(PendingMutation::update(
            cfg.collection_id,
            key,
            original,
            modified,
            changes,
            opts.metadata.clone(),
            opts.optimistic,
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Clone, PartialEq, Debug)]
    struct Item {
        id: u32,
        name: String,
    }

    impl Row for Item {
        fn field(&self, path: &[String]) -> Value {
            match path {
                [f] if f == "id" => Value::Int(i64::from(self.id)),
                [f] if f == "name" => Value::Text(self.name.clone()),
                _ => Value::Undefined,
            }
        }
    }

    struct FakeView(RefCell<HashMap<u32, Item>>);

    impl VisibleView<u32, Item> for FakeView {
        fn get_visible(&self, key: &u32) -> Option<Item> {
            self.0.borrow().get(key).cloned()
        }
    }

    #[test]
    fn insert_rejects_duplicate_visible_key() {
        let view = FakeView(RefCell::new(HashMap::from([(
            1,
            Item {
                id: 1,
                name: "a".into(),
            },
        )])));
        let cfg = MutationConfig {
            collection_id: "items",
            get_key: &|item: &Item| item.id,
            schema: None,
        };
        let err = plan_insert(
            vec![Item {
                id: 1,
                name: "b".into(),
            }],
            &view,
            &cfg,
            &MutationOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CollectionError::DuplicateKey));
    }

    #[test]
    fn update_rejects_key_change() {
        let view = FakeView(RefCell::new(HashMap::from([(
            1,
            Item {
                id: 1,
                name: "a".into(),
            },
        )])));
        let cfg = MutationConfig {
            collection_id: "items",
            get_key: &|item: &Item| item.id,
            schema: None,
        };
        let err = plan_update(
            vec![1],
            |draft| {
                draft.current_mut().id = 2;
                draft.touch(&["id".to_string()]);
            },
            &view,
            &cfg,
            &MutationOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CollectionError::KeyUpdateNotAllowed));
    }

    #[test]
    fn noop_update_yields_no_mutation() {
        let view = FakeView(RefCell::new(HashMap::from([(
            1,
            Item {
                id: 1,
                name: "a".into(),
            },
        )])));
        let cfg = MutationConfig {
            collection_id: "items",
            get_key: &|item: &Item| item.id,
            schema: None,
        };
        let mutations = plan_update(vec![1], |_draft| {}, &view, &cfg, &MutationOptions::default()).unwrap();
        assert!(mutations.is_empty());
    }
}
