use super::SubscriberEntry;
use crate::collection::ChangeEvent;
use crate::row::Row;
use std::hash::Hash;

/// Filter and flip one collection-level change event into zero or
/// more events for `entry`, updating its `sent_keys` bookkeeping in
/// the process.
///
/// - `insert`: emitted iff the filter passes.
/// - `update`: previous+new both pass -> `update`; only new passes ->
///   synthesized `insert`; only previous passes -> synthesized
///   `delete`; neither -> nothing.
/// - `delete`: emitted iff the filter passes.
///
/// Before `loaded_initial_state`, a delete for a key this subscriber
/// never saw is swallowed, and an update for such a key is flipped to
/// an insert.
pub fn process_event<T: Row + Clone, K: Clone + Eq + Hash>(
    entry: &mut SubscriberEntry<T, K>,
    event: &ChangeEvent<T, K>,
) -> Vec<ChangeEvent<T, K>> {
    match event {
        ChangeEvent::Insert { key, value } => {
            if !entry.passes(value) {
                return Vec::new();
            }
            entry.sent_keys.insert(key.clone());
            vec![ChangeEvent::Insert {
                key: key.clone(),
                value: value.clone(),
            }]
        }
        ChangeEvent::Delete { key, previous_value } => {
            if !entry.passes(previous_value) {
                return Vec::new();
            }
            if !entry.loaded_initial_state && !entry.sent_keys.contains(key) {
                return Vec::new();
            }
            entry.sent_keys.remove(key);
            vec![ChangeEvent::Delete {
                key: key.clone(),
                previous_value: previous_value.clone(),
            }]
        }
        ChangeEvent::Update {
            key,
            value,
            previous_value,
        } => {
            let new_passes = entry.passes(value);
            if !entry.loaded_initial_state && !entry.sent_keys.contains(key) {
                if new_passes {
                    entry.sent_keys.insert(key.clone());
                    return vec![ChangeEvent::Insert {
                        key: key.clone(),
                        value: value.clone(),
                    }];
                }
                return Vec::new();
            }
            let prev_passes = entry.passes(previous_value);
            match (prev_passes, new_passes) {
                (true, true) => vec![ChangeEvent::Update {
                    key: key.clone(),
                    value: value.clone(),
                    previous_value: previous_value.clone(),
                }],
                (false, true) => {
                    entry.sent_keys.insert(key.clone());
                    vec![ChangeEvent::Insert {
                        key: key.clone(),
                        value: value.clone(),
                    }]
                }
                (true, false) => {
                    entry.sent_keys.remove(key);
                    vec![ChangeEvent::Delete {
                        key: key.clone(),
                        previous_value: previous_value.clone(),
                    }]
                }
                (false, false) => Vec::new(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{compile, Expr, FuncName};
    use crate::subscription::SubscriptionStatus;
    use crate::Value;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Clone)]
    struct Item {
        age: i64,
    }

    impl Row for Item {
        fn field(&self, path: &[String]) -> Value {
            match path {
                [f] if f == "age" => Value::Int(self.age),
                _ => Value::Undefined,
            }
        }
    }

    fn entry(predicate: Option<Expr>) -> SubscriberEntry<Item, u32> {
        SubscriberEntry {
            id: 1,
            callback: Rc::new(|_| {}),
            predicate: predicate.map(|e| compile::<Item>(&e).unwrap()),
            sent_keys: Default::default(),
            loaded_initial_state: true,
            status: Rc::new(Cell::new(SubscriptionStatus::Ready)),
        }
    }

    fn adults_filter() -> Expr {
        Expr::call(FuncName::Gte, vec![Expr::prop(&["age"]), Expr::val(18i64)])
    }

    #[test]
    fn update_crossing_into_filter_synthesizes_insert() {
        let mut e = entry(Some(adults_filter()));
        let event = ChangeEvent::Update {
            key: 1u32,
            value: Item { age: 20 },
            previous_value: Item { age: 10 },
        };
        let out = process_event(&mut e, &event);
        assert!(matches!(out[0], ChangeEvent::Insert { .. }));
    }

    #[test]
    fn update_crossing_out_of_filter_synthesizes_delete() {
        let mut e = entry(Some(adults_filter()));
        e.sent_keys.insert(1);
        let event = ChangeEvent::Update {
            key: 1u32,
            value: Item { age: 10 },
            previous_value: Item { age: 20 },
        };
        let out = process_event(&mut e, &event);
        assert!(matches!(out[0], ChangeEvent::Delete { .. }));
    }

    #[test]
    fn neither_side_passing_emits_nothing() {
        let mut e = entry(Some(adults_filter()));
        let event = ChangeEvent::Update {
            key: 1u32,
            value: Item { age: 5 },
            previous_value: Item { age: 6 },
        };
        assert!(process_event(&mut e, &event).is_empty());
    }

    #[test]
    fn delete_for_never_sent_key_is_swallowed_before_initial_state() {
        let mut e = entry(None);
        e.loaded_initial_state = false;
        let event = ChangeEvent::Delete {
            key: 1u32,
            previous_value: Item { age: 99 },
        };
        assert!(process_event(&mut e, &event).is_empty());
    }

    #[test]
    fn update_for_never_sent_key_flips_to_insert_before_initial_state() {
        let mut e = entry(None);
        e.loaded_initial_state = false;
        let event = ChangeEvent::Update {
            key: 1u32,
            value: Item { age: 5 },
            previous_value: Item { age: 6 },
        };
        let out = process_event(&mut e, &event);
        assert!(matches!(out[0], ChangeEvent::Insert { .. }));
    }
}
