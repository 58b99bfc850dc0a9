//! Process-wide (thread-local) bookkeeping for cascade rollback across
//! transactions that may hold mutations on different collection
//! types. Kept type-erased on purpose: a `Transaction<T, K>` only
//! needs to register its global keys and a rollback callback here, so
//! two transactions over unrelated `T`s can still conflict on a
//! shared `globalKey`.

use crate::obs;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

struct Entry {
    global_keys: HashSet<String>,
    rollback: Box<dyn FnMut()>,
}

thread_local! {
    static REGISTRY: RefCell<HashMap<u64, Entry>> = RefCell::new(HashMap::new());
}

pub fn register(id: u64, global_keys: HashSet<String>, rollback: Box<dyn FnMut()>) {
    REGISTRY.with(|r| {
        r.borrow_mut().insert(
            id,
            Entry {
                global_keys,
                rollback,
            },
        );
    });
}

pub fn update_global_keys(id: u64, global_keys: HashSet<String>) {
    REGISTRY.with(|r| {
        if let Some(entry) = r.borrow_mut().get_mut(&id) {
            entry.global_keys = global_keys;
        }
    });
}

pub fn unregister(id: u64) {
    REGISTRY.with(|r| {
        r.borrow_mut().remove(&id);
    });
}

/// Roll back every *other* pending transaction whose global keys
/// overlap `failed_id`'s. One hop only — a secondary rollback does
/// not itself cascade.
pub fn cascade_rollback_conflicts(failed_id: u64, failed_keys: &HashSet<String>) {
    let victims: Vec<u64> = REGISTRY.with(|r| {
        r.borrow()
            .iter()
            .filter(|(id, entry)| {
                **id != failed_id && !entry.global_keys.is_disjoint(failed_keys)
            })
            .map(|(id, _)| *id)
            .collect()
    });
    for id in victims {
        // Remove before calling: `rollback` itself unregisters `id`,
        // which would re-borrow `REGISTRY` mutably if we were still
        // holding a borrow here.
        let entry = REGISTRY.with(|r| r.borrow_mut().remove(&id));
        if let Some(mut entry) = entry {
            (entry.rollback)();
            obs::record(obs::Event::CascadeRollback {
                failed_transaction_id: failed_id,
                rolled_back_transaction_id: id,
            });
        }
    }
}
