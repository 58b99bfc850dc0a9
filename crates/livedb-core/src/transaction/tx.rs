use super::{ambient, registry};
use crate::deferred::{deferred, Deferred, Resolver};
use crate::error::{CollectionError, Result};
use crate::mutation::{merge_pending, PendingMutation};
use crate::obs;
use chrono::{DateTime, Utc};
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

///
/// TransactionState
///
/// `pending -> persisting -> completed|failed`.
/// `rollback()` (explicit or cascaded) moves a still-`pending`
/// transaction straight to `failed` with its mutations discarded.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransactionState {
    Pending,
    Persisting,
    Completed,
    Failed,
}

struct Inner<T, K> {
    id: u64,
    state: TransactionState,
    auto_commit: bool,
    mutations: Vec<PendingMutation<T, K>>,
    created_at: DateTime<Utc>,
    sequence_number: u64,
    resolver: Option<Resolver<std::result::Result<(), CollectionError>>>,
    error: Option<CollectionError>,
    /// Run once, in registration order, when this `mutate()` block's
    /// ambient phase ends. A `Collection` registers one of these per
    /// call made while it holds the ambient slot, so that change-event
    /// emission sees the *net* effect of every call in the block
    /// rather than each call's intermediate state — this is what makes
    /// `insert(x); delete(key(x))` inside one `mutate` net to zero
    /// events.
    flush_callbacks: Vec<Box<dyn FnOnce()>>,
    /// Run once, with the final state and the transaction's mutation
    /// set, when this transaction reaches `Completed` or `Failed`. A
    /// `Collection` uses this to fold a completed transaction's
    /// mutations out of the optimistic overlay (and, for collections
    /// with no sync adapter, into `synced` directly — see
    /// `DESIGN.md`) without this module depending on `collection`.
    settle_callbacks: Vec<Box<dyn FnOnce(TransactionState, &[PendingMutation<T, K>])>>,
}

///
/// Transaction
///
/// A cheap-clone handle (`Rc<RefCell<_>>`) so the ambient stack and
/// the cross-transaction registry can hold independent references to
/// the same transaction.
///
pub struct Transaction<T, K> {
    inner: Rc<RefCell<Inner<T, K>>>,
    persisted: Deferred<std::result::Result<(), CollectionError>>,
}

impl<T, K> Clone for Transaction<T, K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            persisted: self.persisted.clone(),
        }
    }
}

impl<T: 'static, K: 'static> Transaction<T, K> {
    #[must_use]
    pub fn new(auto_commit: bool) -> Self
    where
        T: Clone,
        K: Clone,
    {
        let (resolver, persisted) = deferred();
        let id = NEXT_ID.fetch_add(1, AtomicOrdering::Relaxed);
        let sequence_number = NEXT_SEQUENCE.fetch_add(1, AtomicOrdering::Relaxed);
        let inner = Rc::new(RefCell::new(Inner {
            id,
            state: TransactionState::Pending,
            auto_commit,
            mutations: Vec::new(),
            created_at: Utc::now(),
            sequence_number,
            resolver: Some(resolver),
            error: None,
            flush_callbacks: Vec::new(),
            settle_callbacks: Vec::new(),
        }));
        let tx = Self { inner, persisted };
        let handle = tx.clone();
        registry::register(
            id,
            HashSet::new(),
            Box::new(move || {
                let _ = handle.rollback_internal(None);
            }),
        );
        tx
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.borrow().id
    }

    #[must_use]
    pub fn sequence_number(&self) -> u64 {
        self.inner.borrow().sequence_number
    }

    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.inner.borrow().state
    }

    #[must_use]
    pub fn error(&self) -> Option<CollectionError> {
        self.inner.borrow().error.clone()
    }

    #[must_use]
    pub fn is_persisted(&self) -> Deferred<std::result::Result<(), CollectionError>> {
        self.persisted.clone()
    }

    #[must_use]
    pub fn mutations(&self) -> Vec<PendingMutation<T, K>>
    where
        T: Clone,
        K: Clone,
    {
        self.inner.borrow().mutations.clone()
    }

    /// Register a callback to run once, when this transaction's
    /// ambient `mutate()` phase ends (see `Inner::flush_callbacks`).
    pub fn register_flush(&self, f: impl FnOnce() + 'static) {
        self.inner.borrow_mut().flush_callbacks.push(Box::new(f));
    }

    /// Register a callback to run once this transaction settles into
    /// `Completed` or `Failed` (see `Inner::settle_callbacks`). Firing
    /// for an already-settled transaction is a caller bug (nothing
    /// settles twice), so late registration simply never fires rather
    /// than replaying — callers register before `commit`/`rollback`.
    pub fn register_settle(&self, f: impl FnOnce(TransactionState, &[PendingMutation<T, K>]) + 'static) {
        self.inner.borrow_mut().settle_callbacks.push(Box::new(f));
    }

    fn run_settle_callbacks(&self, state: TransactionState)
    where
        T: Clone,
        K: Clone,
    {
        let callbacks = {
            let mut inner = self.inner.borrow_mut();
            std::mem::take(&mut inner.settle_callbacks)
        };
        let mutations = self.inner.borrow().mutations.clone();
        for cb in callbacks {
            cb(state, &mutations);
        }
    }

    /// Push this transaction onto the ambient stack, run `cb`, pop it,
    /// flush every collection touched during the block, then (if
    /// configured for autocommit) run `commit` with `mutation_fn`
    /// immediately — synchronously, since this engine has no executor
    /// of its own to hand a deferred commit to (see `DESIGN.md`).
    pub fn mutate(
        &self,
        cb: impl FnOnce(),
        mutation_fn: Option<impl FnOnce(&Self) -> Result<()>>,
    ) -> Result<()>
    where
        T: Clone,
        K: Clone,
    {
        ambient::push_ambient(self.clone());
        cb();
        ambient::pop_ambient();

        let flush_callbacks = {
            let mut inner = self.inner.borrow_mut();
            std::mem::take(&mut inner.flush_callbacks)
        };
        for flush in flush_callbacks {
            flush();
        }

        let should_auto_commit = self.inner.borrow().auto_commit;
        if should_auto_commit {
            if let Some(mutation_fn) = mutation_fn {
                return self.commit(mutation_fn);
            }
            return Err(CollectionError::MissingMutationFunction);
        }
        Ok(())
    }

    /// Merge `mutation` into this transaction's pending set, matching
    /// on `global_key`.
    pub fn add_mutation(&self, mutation: PendingMutation<T, K>) -> Result<()>
    where
        T: Clone,
        K: Clone,
    {
        let mut inner = self.inner.borrow_mut();
        if inner.state != TransactionState::Pending {
            return Err(CollectionError::TransactionNotPendingMutate);
        }
        if let Some(pos) = inner
            .mutations
            .iter()
            .position(|m| m.global_key == mutation.global_key)
        {
            let prev = inner.mutations[pos].clone();
            match merge_pending(&prev, mutation) {
                Some(merged) => inner.mutations[pos] = merged,
                None => {
                    inner.mutations.remove(pos);
                }
            }
        } else {
            inner.mutations.push(mutation);
        }
        let keys = inner.mutations.iter().map(|m| m.global_key.clone()).collect();
        let id = inner.id;
        drop(inner);
        registry::update_global_keys(id, keys);
        Ok(())
    }

    /// Transition to `persisting`, run the user-supplied
    /// `mutation_fn`, then `completed`/`failed`. A failure cascades one
    /// hop of rollback to conflicting pending transactions.
    pub fn commit(&self, mutation_fn: impl FnOnce(&Self) -> Result<()>) -> Result<()>
    where
        T: Clone,
        K: Clone,
    {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.state != TransactionState::Pending {
                return Err(CollectionError::TransactionNotPendingCommit);
            }
            inner.state = TransactionState::Persisting;
        }

        let result = mutation_fn(self);
        let id = self.id();

        match result {
            Ok(()) => {
                let resolver = {
                    let mut inner = self.inner.borrow_mut();
                    inner.state = TransactionState::Completed;
                    inner.resolver.take()
                };
                if let Some(resolver) = resolver {
                    resolver.resolve(Ok(()));
                }
                obs::record(obs::Event::TransactionCompleted { transaction_id: id });
                registry::unregister(id);
                self.run_settle_callbacks(TransactionState::Completed);
                Ok(())
            }
            Err(err) => {
                let global_keys: HashSet<String> = self
                    .inner
                    .borrow()
                    .mutations
                    .iter()
                    .map(|m| m.global_key.clone())
                    .collect();
                let resolver = {
                    let mut inner = self.inner.borrow_mut();
                    inner.state = TransactionState::Failed;
                    inner.error = Some(err.clone());
                    inner.resolver.take()
                };
                if let Some(resolver) = resolver {
                    resolver.resolve(Err(err.clone()));
                }
                obs::record(obs::Event::TransactionFailed {
                    transaction_id: id,
                    reason: err.to_string(),
                });
                registry::cascade_rollback_conflicts(id, &global_keys);
                registry::unregister(id);
                self.run_settle_callbacks(TransactionState::Failed);
                Err(err)
            }
        }
    }

    /// Explicit user-initiated rollback. Only valid while `pending`.
    pub fn rollback(&self) -> Result<()>
    where
        T: Clone,
        K: Clone,
    {
        if self.state() != TransactionState::Pending {
            return Err(CollectionError::TransactionNotPendingRollback);
        }
        self.rollback_internal(None)
    }

    /// Shared by explicit `rollback()` and cascade rollback triggered
    /// by a conflicting transaction's failed commit. Clears mutations
    /// (a rolled-back transaction contributes nothing to the
    /// optimistic overlay) and resolves `is_persisted` as failed.
    fn rollback_internal(&self, reason: Option<CollectionError>) -> Result<()>
    where
        T: Clone,
        K: Clone,
    {
        let id = self.id();
        let resolver = {
            let mut inner = self.inner.borrow_mut();
            if inner.state == TransactionState::Completed {
                return Ok(());
            }
            inner.mutations.clear();
            inner.state = TransactionState::Failed;
            inner.error = reason.clone();
            inner.resolver.take()
        };
        if let Some(resolver) = resolver {
            resolver.resolve(Err(reason.unwrap_or(CollectionError::Timeout)));
        }
        registry::unregister(id);
        self.run_settle_callbacks(TransactionState::Failed);
        Ok(())
    }
}

impl<T, K> fmt::Debug for Transaction<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Transaction")
            .field("id", &inner.id)
            .field("state", &inner.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_success_resolves_completed() {
        let tx: Transaction<String, u32> = Transaction::new(false);
        tx.commit(|_| Ok(())).unwrap();
        assert_eq!(tx.state(), TransactionState::Completed);
        assert_eq!(tx.is_persisted().peek(), Some(Ok(())));
    }

    #[test]
    fn commit_failure_cascades_to_conflicting_pending_transaction() {
        let a: Transaction<String, u32> = Transaction::new(false);
        let b: Transaction<String, u32> = Transaction::new(false);
        a.add_mutation(PendingMutation::insert("items", 7u32, "x".to_string(), None, true))
            .unwrap();
        b.add_mutation(PendingMutation::insert("items", 7u32, "y".to_string(), None, true))
            .unwrap();

        let err = a
            .commit(|_| Err(CollectionError::MutationFailed("boom".into())))
            .unwrap_err();
        assert!(matches!(err, CollectionError::MutationFailed(_)));
        assert_eq!(a.state(), TransactionState::Failed);
        assert_eq!(b.state(), TransactionState::Failed);
    }

    #[test]
    fn unrelated_transactions_do_not_cascade() {
        let a: Transaction<String, u32> = Transaction::new(false);
        let b: Transaction<String, u32> = Transaction::new(false);
        a.add_mutation(PendingMutation::insert("items", 7u32, "x".to_string(), None, true))
            .unwrap();
        b.add_mutation(PendingMutation::insert("items", 8u32, "y".to_string(), None, true))
            .unwrap();

        let _ = a.commit(|_| Err(CollectionError::MutationFailed("boom".into())));
        assert_eq!(b.state(), TransactionState::Pending);
    }
}
