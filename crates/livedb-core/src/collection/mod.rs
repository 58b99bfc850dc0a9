//! The collection: dual-layer store, lifecycle, mutation entry points,
//! index catalog, and subscriber fan-out. This
//! module is the facade the rest of the crate's subsystems (mutation
//! manager, transaction layer, planner, subscription protocol) are
//! wired into; the submodules hold the pieces that don't need to know
//! about each other.

mod commit;
mod config;
mod events;
mod state;
mod status;
mod sync;

pub use commit::apply_commit;
pub use config::{AutoIndex, CollectionConfig};
pub use events::{ChangeEvent, RowUpdateMode};
pub use state::CollectionState;
pub use status::{transition, Status};
pub use sync::{LoadSubsetRequest, PendingSyncTransaction, SyncAdapter, SyncOp, SyncOpKind};

use crate::access::IndexCatalog;
use crate::deferred::{deferred, Deferred, Resolver};
use crate::error::{CollectionError, Result};
use crate::expr::{compile, Compiled, Expr, FuncName};
use crate::index::{BTreeIndex, Index};
use crate::mutation::{
    plan_delete, plan_insert, plan_update, Draft, MutationConfig, MutationOptions, MutationType,
    PendingMutation, VisibleView,
};
use crate::obs;
use crate::row::Row;
use crate::subscription::{
    full_snapshot, ordered_batch, process_event, OrderBy, SubscriberEntry, Subscription,
    SubscriptionStatus,
};
use crate::transaction::{current_ambient, Transaction, TransactionState};
use crate::Value;

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Options for [`Collection::subscribe_changes`].
/// `order_by` + `limit` selects the index-ordered limited snapshot
/// mode; an empty `order_by` with a `limit` set still produces a full
/// snapshot narrowed by the where-expression and truncated.
pub struct SubscribeOptions {
    pub where_expr: Option<Expr>,
    pub include_initial_state: bool,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<usize>,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            where_expr: None,
            include_initial_state: true,
            order_by: Vec::new(),
            limit: None,
        }
    }
}

/// The read surface [`crate::mutation`]'s planner functions need,
/// implemented against a borrowed [`CollectionState`] so planning
/// never has to clone the whole map.
struct StateView<'a, T, K: Eq + Hash> {
    state: &'a CollectionState<T, K>,
}

impl<T: Clone, K: Clone + Eq + Hash> VisibleView<K, T> for StateView<'_, T, K> {
    fn get_visible(&self, key: &K) -> Option<T> {
        self.state.visible(key).cloned()
    }
}

enum HandlerKind {
    Insert,
    Update,
    Delete,
}

struct Inner<T, K> {
    id: String,
    get_key: Rc<dyn Fn(&T) -> K>,
    compare: Option<Rc<dyn Fn(&T, &T) -> Ordering>>,
    schema: Option<Rc<dyn Fn(&T) -> Result<()>>>,
    auto_index: AutoIndex,
    gc_time: Option<Duration>,
    row_update_mode: RowUpdateMode,
    partial_merge: Option<Rc<dyn Fn(&T, &T) -> T>>,
    on_insert: Option<Rc<dyn Fn(&Transaction<T, K>) -> Result<()>>>,
    on_update: Option<Rc<dyn Fn(&Transaction<T, K>) -> Result<()>>>,
    on_delete: Option<Rc<dyn Fn(&Transaction<T, K>) -> Result<()>>>,
    sync: Option<Rc<dyn SyncAdapter<T, K>>>,

    state: RefCell<CollectionState<T, K>>,
    status: Cell<Status>,
    indexes: RefCell<IndexCatalog<K>>,
    auto_indexed_paths: RefCell<HashSet<Vec<String>>>,

    subscribers: RefCell<Vec<SubscriberEntry<T, K>>>,
    next_subscriber_id: Cell<u64>,
    last_unsubscribed_at: Cell<Option<Instant>>,

    batch_open: Cell<bool>,
    in_flight_batch: RefCell<PendingSyncTransaction<T, K>>,
    deferred_batches: RefCell<VecDeque<PendingSyncTransaction<T, K>>>,

    tracked_transaction_ids: RefCell<HashSet<u64>>,
    active_transactions: RefCell<Vec<Transaction<T, K>>>,

    has_received_first_commit: Cell<bool>,
    first_ready_callbacks: RefCell<Vec<Box<dyn FnOnce()>>>,
    ready_resolver: RefCell<Option<Resolver<()>>>,
    ready_deferred: Deferred<()>,
}

///
/// Collection
///
/// A cheap-clone handle (`Rc<Inner<_>>`, the same pattern as
/// [`Transaction`]) over the dual-layer store:
/// synced base, optimistic upsert map, optimistic delete set, index
/// catalog, subscriber list, and lifecycle status.
///
pub struct Collection<T, K> {
    inner: Rc<Inner<T, K>>,
}

impl<T, K> Clone for Collection<T, K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, K> Collection<T, K>
where
    T: Row + Clone + PartialEq + 'static,
    K: Clone + Eq + Hash + Ord + fmt::Display + fmt::Debug + 'static,
{
    #[must_use]
    pub fn new(config: CollectionConfig<T, K>) -> Self {
        let (ready_resolver, ready_deferred) = deferred();
        let inner = Inner {
            id: config.id.clone(),
            get_key: config.get_key.clone(),
            compare: config.compare.clone(),
            schema: config.schema.clone(),
            auto_index: config.auto_index,
            gc_time: config.gc_time,
            row_update_mode: config.row_update_mode,
            partial_merge: config.partial_merge.clone(),
            on_insert: config.on_insert.clone(),
            on_update: config.on_update.clone(),
            on_delete: config.on_delete.clone(),
            sync: config.sync.clone(),
            state: RefCell::new(CollectionState::new(config.compare.clone())),
            status: Cell::new(Status::Idle),
            indexes: RefCell::new(IndexCatalog::new()),
            auto_indexed_paths: RefCell::new(HashSet::new()),
            subscribers: RefCell::new(Vec::new()),
            next_subscriber_id: Cell::new(1),
            last_unsubscribed_at: Cell::new(None),
            batch_open: Cell::new(false),
            in_flight_batch: RefCell::new(PendingSyncTransaction::new()),
            deferred_batches: RefCell::new(VecDeque::new()),
            tracked_transaction_ids: RefCell::new(HashSet::new()),
            active_transactions: RefCell::new(Vec::new()),
            has_received_first_commit: Cell::new(false),
            first_ready_callbacks: RefCell::new(Vec::new()),
            ready_resolver: RefCell::new(Some(ready_resolver)),
            ready_deferred,
        };
        let start_sync = config.start_sync;
        let collection = Self {
            inner: Rc::new(inner),
        };
        if start_sync {
            let _ = collection.start_sync();
        }
        collection
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.inner.status.get()
    }

    // -- read surface -------------------------------------------------

    #[must_use]
    pub fn get(&self, key: &K) -> Option<T> {
        self.inner.state.borrow().visible(key).cloned()
    }

    #[must_use]
    pub fn has(&self, key: &K) -> bool {
        self.inner.state.borrow().has(key)
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.state.borrow().size()
    }

    #[must_use]
    pub fn keys(&self) -> Vec<K> {
        self.inner.state.borrow().visible_keys_ordered()
    }

    #[must_use]
    pub fn values(&self) -> Vec<T> {
        self.inner
            .state
            .borrow()
            .visible_entries()
            .into_iter()
            .map(|(_, v)| v.clone())
            .collect()
    }

    #[must_use]
    pub fn entries(&self) -> Vec<(K, T)> {
        self.inner
            .state
            .borrow()
            .visible_entries()
            .into_iter()
            .map(|(k, v)| (k, v.clone()))
            .collect()
    }

    pub fn for_each(&self, mut f: impl FnMut(&K, &T)) {
        let state = self.inner.state.borrow();
        for (k, v) in state.visible_entries() {
            f(&k, v);
        }
    }

    #[must_use]
    pub fn map<R>(&self, mut f: impl FnMut(&K, &T) -> R) -> Vec<R> {
        let state = self.inner.state.borrow();
        state.visible_entries().into_iter().map(|(k, v)| f(&k, v)).collect()
    }

    // -- lifecycle ------------------------------------------------------

    fn guard_not_error(&self) -> Result<()> {
        if self.inner.status.get() == Status::Error {
            Err(CollectionError::CollectionInErrorState)
        } else {
            Ok(())
        }
    }

    fn set_status(&self, to: Status) -> Result<()> {
        let from = self.inner.status.get();
        let new = transition(from, to)?;
        self.inner.status.set(new);
        obs::record(obs::Event::StatusChanged {
            collection: self.inner.id.clone(),
            from,
            to: new,
        });
        Ok(())
    }

    /// Idle/cleaned-up -> loading, then hands off to the configured
    /// sync adapter. A no-op if already past `Idle`/`CleanedUp` so
    /// `preload`/`subscribe_changes` can call it unconditionally.
    pub fn start_sync(&self) -> Result<()> {
        if matches!(self.inner.status.get(), Status::Idle | Status::CleanedUp) {
            self.set_status(Status::Loading)?;
            if let Some(sync) = self.inner.sync.clone() {
                sync.start()?;
            }
        }
        Ok(())
    }

    /// The only path into `Ready`. Runs every callback registered via
    /// [`Collection::on_first_ready`] exactly once and resolves the
    /// shared `Deferred` behind `preload`/`state_when_ready`.
    pub fn mark_ready(&self) -> Result<()> {
        self.set_status(Status::Ready)?;
        let callbacks = std::mem::take(&mut *self.inner.first_ready_callbacks.borrow_mut());
        for cb in callbacks {
            cb();
        }
        if let Some(resolver) = self.inner.ready_resolver.borrow_mut().take() {
            resolver.resolve(());
        }
        Ok(())
    }

    pub fn on_first_ready(&self, cb: impl FnOnce() + 'static) {
        if self.inner.status.get() == Status::Ready {
            cb();
        } else {
            self.inner.first_ready_callbacks.borrow_mut().push(Box::new(cb));
        }
    }

    /// Starts sync if it hasn't already, and resolves once `markReady`
    /// has run. Cheap to call repeatedly; every caller shares the same
    /// underlying `Deferred`.
    #[must_use]
    pub fn preload(&self) -> Deferred<()> {
        let _ = self.start_sync();
        self.inner.ready_deferred.clone()
    }

    #[must_use]
    pub fn state_when_ready(&self) -> Deferred<()> {
        self.preload()
    }

    #[must_use]
    pub fn to_array_when_ready(&self) -> Deferred<()> {
        self.preload()
    }

    /// Tears down all state and returns to `CleanedUp`.
    /// Sync adapter cleanup failures are reported to the caller but
    /// never block the state reset.
    pub fn cleanup(&self) -> Result<()> {
        self.set_status(Status::CleanedUp)?;
        let cleanup_result = self
            .inner
            .sync
            .as_ref()
            .map_or(Ok(()), |sync| sync.cleanup());

        *self.inner.state.borrow_mut() = CollectionState::new(self.inner.compare.clone());
        *self.inner.indexes.borrow_mut() = IndexCatalog::new();
        self.inner.auto_indexed_paths.borrow_mut().clear();
        self.inner.subscribers.borrow_mut().clear();
        self.inner.deferred_batches.borrow_mut().clear();
        *self.inner.in_flight_batch.borrow_mut() = PendingSyncTransaction::new();
        self.inner.batch_open.set(false);
        self.inner.has_received_first_commit.set(false);
        self.inner.active_transactions.borrow_mut().clear();
        obs::record(obs::Event::GarbageCollected {
            collection: self.inner.id.clone(),
        });
        cleanup_result
    }

    /// The embedder's idle-loop poll for time-based garbage
    /// collection. There is no idle-callback scheduler in a library
    /// crate, so this is an explicit, polled substitute (see
    /// `DESIGN.md`): call it periodically with the current time.
    pub fn tick_gc(&self, now: Instant) {
        if !self.inner.subscribers.borrow().is_empty() {
            return;
        }
        if let (Some(gc_time), Some(since)) =
            (self.inner.gc_time, self.inner.last_unsubscribed_at.get())
        {
            if now.duration_since(since) >= gc_time {
                let _ = self.cleanup();
            }
        }
    }

    // -- indexes ----------------------------------------------------

    /// Builds a `BTreeIndex` over `path` from currently synced rows
    /// (indexes track synced data, not the optimistic overlay) and
    /// registers it for planner use.
    pub fn create_index(&self, path: Vec<String>) -> Result<()> {
        if path.is_empty() {
            return Err(CollectionError::EmptyReferencePath);
        }
        if self.inner.indexes.borrow().has_index(&path) {
            return Ok(());
        }
        let rows: Vec<(K, Value)> = {
            let state = self.inner.state.borrow();
            state
                .synced
                .iter()
                .map(|(k, v)| (k.clone(), v.field(&path)))
                .collect()
        };
        let mut idx: BTreeIndex<K> =
            BTreeIndex::new(Expr::PropRef(path.clone())).with_collection(self.inner.id.clone());
        idx.build(rows.iter().map(|(k, v)| (k.clone(), v)));
        self.inner.indexes.borrow_mut().register(Box::new(idx));
        obs::record(obs::Event::IndexBuilt {
            collection: self.inner.id.clone(),
            index: path.join("."),
        });
        Ok(())
    }

    /// With [`AutoIndex::Eager`] configured, the first use of a
    /// ref-field in an equality/range predicate synthesizes a B-tree
    /// index over it, once per field.
    fn maybe_auto_index(&self, expr: &Expr) {
        if self.inner.auto_index != AutoIndex::Eager {
            return;
        }
        match expr {
            Expr::Func(name, args)
                if matches!(
                    name,
                    FuncName::Eq | FuncName::Gt | FuncName::Gte | FuncName::Lt | FuncName::Lte
                ) =>
            {
                if let Some(path) = args.iter().find_map(|a| match a {
                    Expr::PropRef(p) => Some(p.clone()),
                    _ => None,
                }) {
                    let is_new = self.inner.auto_indexed_paths.borrow_mut().insert(path.clone());
                    if is_new {
                        let _ = self.create_index(path);
                    }
                }
            }
            Expr::Func(_, args) | Expr::Aggregate(_, args) => {
                for arg in args {
                    self.maybe_auto_index(arg);
                }
            }
            _ => {}
        }
    }

    fn maintain_indexes_for_change(&self, key: &K, pre: Option<&T>, post: Option<&T>) {
        let mut indexes = self.inner.indexes.borrow_mut();
        for idx in indexes.iter_mut() {
            let Expr::PropRef(path) = idx.expr().clone() else {
                continue;
            };
            let old_value = pre.map(|t| t.field(&path));
            let new_value = post.map(|t| t.field(&path));
            match (old_value, new_value) {
                (None, Some(new_value)) => idx.add(key.clone(), &new_value),
                (Some(old_value), None) => idx.remove(key, &old_value),
                (Some(old_value), Some(new_value)) => idx.update(key.clone(), &old_value, &new_value),
                (None, None) => {}
            }
        }
    }

    // -- mutations ----------------------------------------------------

    /// Attaches to the ambient transaction if one is pushed; otherwise
    /// opens and auto-commits a new one against the configured
    /// `on_insert` handler.
    pub fn insert(&self, items: Vec<T>) -> Result<Transaction<T, K>> {
        self.insert_with(items, MutationOptions::default())
    }

    /// As [`Collection::insert`], with caller-supplied metadata and/or
    /// a non-optimistic mutation request (spec §4.4 `{metadata?,
    /// optimistic?}`).
    pub fn insert_with(&self, items: Vec<T>, opts: MutationOptions) -> Result<Transaction<T, K>> {
        self.guard_not_error()?;
        let cfg = MutationConfig {
            collection_id: &self.inner.id,
            get_key: self.inner.get_key.as_ref(),
            schema: self.inner.schema.as_deref(),
        };
        let mutations = {
            let state = self.inner.state.borrow();
            let view = StateView { state: &state };
            plan_insert(items, &view, &cfg, &opts)?
        };
        self.attach_mutations(mutations, HandlerKind::Insert)
    }

    /// Each key is deep-cloned into a [`Draft`] the callback mutates
    /// through.
    pub fn update(&self, keys: Vec<K>, callback: impl Fn(&mut Draft<T>) + 'static) -> Result<Transaction<T, K>> {
        self.update_with(keys, MutationOptions::default(), callback)
    }

    /// As [`Collection::update`], with caller-supplied metadata and/or
    /// a non-optimistic mutation request.
    pub fn update_with(
        &self,
        keys: Vec<K>,
        opts: MutationOptions,
        callback: impl Fn(&mut Draft<T>) + 'static,
    ) -> Result<Transaction<T, K>> {
        self.guard_not_error()?;
        let cfg = MutationConfig {
            collection_id: &self.inner.id,
            get_key: self.inner.get_key.as_ref(),
            schema: self.inner.schema.as_deref(),
        };
        let mutations = {
            let state = self.inner.state.borrow();
            let view = StateView { state: &state };
            plan_update(keys, callback, &view, &cfg, &opts)?
        };
        self.attach_mutations(mutations, HandlerKind::Update)
    }

    pub fn delete(&self, keys: Vec<K>) -> Result<Transaction<T, K>> {
        self.delete_with(keys, MutationOptions::default())
    }

    /// As [`Collection::delete`], with caller-supplied metadata and/or
    /// a non-optimistic mutation request.
    pub fn delete_with(&self, keys: Vec<K>, opts: MutationOptions) -> Result<Transaction<T, K>> {
        self.guard_not_error()?;
        let cfg = MutationConfig {
            collection_id: &self.inner.id,
            get_key: self.inner.get_key.as_ref(),
            schema: self.inner.schema.as_deref(),
        };
        let mutations = {
            let state = self.inner.state.borrow();
            let view = StateView { state: &state };
            plan_delete(keys, &view, &cfg, &opts)?
        };
        self.attach_mutations(mutations, HandlerKind::Delete)
    }

    /// Open a fresh, non-auto-commit transaction for explicit
    /// `tx.mutate(cb, Some(mutation_fn))` use. Mutations issued from
    /// inside `cb` via this collection (or any other) attach to it as
    /// the ambient transaction.
    #[must_use]
    pub fn begin_transaction(&self) -> Transaction<T, K> {
        Transaction::new(false)
    }

    fn attach_mutations(
        &self,
        mutations: Vec<PendingMutation<T, K>>,
        kind: HandlerKind,
    ) -> Result<Transaction<T, K>> {
        let ambient = current_ambient::<T, K>();
        let (tx, is_new) = match ambient {
            Some(tx) => (tx, false),
            None => (Transaction::new(true), true),
        };
        self.track_transaction(&tx);
        for mutation in mutations {
            let key = mutation.key.clone();
            tx.add_mutation(mutation)?;
            self.register_optimistic_flush(&tx, key);
        }
        if is_new {
            let handler = match kind {
                HandlerKind::Insert => self.inner.on_insert.clone(),
                HandlerKind::Update => self.inner.on_update.clone(),
                HandlerKind::Delete => self.inner.on_delete.clone(),
            };
            let missing = match kind {
                HandlerKind::Insert => CollectionError::MissingInsertHandler,
                HandlerKind::Update => CollectionError::MissingUpdateHandler,
                HandlerKind::Delete => CollectionError::MissingDeleteHandler,
            };
            tx.mutate(
                || {},
                Some(move |t: &Transaction<T, K>| match &handler {
                    Some(h) => h(t),
                    None => Err(missing.clone()),
                }),
            )?;
        }
        Ok(tx)
    }

    fn track_transaction(&self, tx: &Transaction<T, K>) {
        let id = tx.id();
        {
            let mut tracked = self.inner.tracked_transaction_ids.borrow_mut();
            if !tracked.insert(id) {
                return;
            }
        }
        self.inner.active_transactions.borrow_mut().push(tx.clone());
        let collection = self.clone();
        tx.register_settle(move |state, mutations| {
            collection.handle_transaction_settled(id, state, mutations);
        });
    }

    fn register_optimistic_flush(&self, tx: &Transaction<T, K>, key: K) {
        let collection = self.clone();
        let tx = tx.clone();
        tx.register_flush(move || collection.apply_mutation_optimistically(&tx, key));
    }

    /// Overlay a transaction's net (possibly merged, possibly
    /// cancelled-out) mutation for `key` onto the optimistic layer and
    /// emit the resulting diff, at the transaction's flush point (see
    /// `transaction::tx::Inner::flush_callbacks`'s doc comment for why
    /// this makes `insert(x); delete(key(x))` net to zero events).
    fn apply_mutation_optimistically(&self, tx: &Transaction<T, K>, key: K) {
        let pre = self.get(&key);
        let net = tx.mutations().into_iter().find(|m| m.key == key);
        {
            let mut state = self.inner.state.borrow_mut();
            match net {
                Some(m) => match m.kind {
                    MutationType::Insert | MutationType::Update => {
                        if let Some(value) = m.modified {
                            state.optimistic_upserts.insert(key.clone(), value);
                            state.optimistic_deletes.remove(&key);
                        }
                    }
                    MutationType::Delete => {
                        state.optimistic_deletes.insert(key.clone());
                        state.optimistic_upserts.remove(&key);
                    }
                },
                None => {
                    state.optimistic_upserts.remove(&key);
                    state.optimistic_deletes.remove(&key);
                }
            }
        }
        let post = self.get(&key);
        self.emit_diff(&key, pre, post);
    }

    fn handle_transaction_settled(
        &self,
        id: u64,
        state: TransactionState,
        mutations: &[PendingMutation<T, K>],
    ) {
        self.inner.active_transactions.borrow_mut().retain(|t| t.id() != id);
        match state {
            TransactionState::Completed => self.fold_completed(mutations),
            TransactionState::Failed => self.revert_failed(mutations),
            TransactionState::Pending | TransactionState::Persisting => {}
        }
    }

    /// A completed transaction's mutations are already reflected in
    /// the optimistic overlay. With a sync adapter configured, the
    /// eventual sync commit will confirm and collapse them (and
    /// suppress the now-redundant event). With no
    /// sync adapter, there is no confirmation coming, so this folds
    /// the mutations directly into `synced` and collapses the overlay
    /// entry immediately, without re-emitting (the optimistic event
    /// already fired).
    fn fold_completed(&self, mutations: &[PendingMutation<T, K>]) {
        if self.inner.sync.is_some() {
            return;
        }
        for mutation in mutations {
            let key = mutation.key.clone();
            let pre_synced = self.inner.state.borrow().synced.get(&key).cloned();
            {
                let mut state = self.inner.state.borrow_mut();
                match mutation.kind {
                    MutationType::Insert | MutationType::Update => {
                        if let Some(value) = &mutation.modified {
                            state.synced.insert(key.clone(), value.clone());
                        }
                    }
                    MutationType::Delete => {
                        state.synced.remove(&key);
                    }
                }
                state.optimistic_upserts.remove(&key);
                state.optimistic_deletes.remove(&key);
            }
            let post_synced = self.inner.state.borrow().synced.get(&key).cloned();
            self.maintain_indexes_for_change(&key, pre_synced.as_ref(), post_synced.as_ref());
        }
        self.inner.has_received_first_commit.set(true);
    }

    /// Reverts each mutation's key to whatever the next-most-recent
    /// still-active transaction says, or to the synced baseline if
    /// none remains, emitting the resulting diff.
    fn revert_failed(&self, mutations: &[PendingMutation<T, K>]) {
        for mutation in mutations {
            let key = mutation.key.clone();
            let pre = self.get(&key);
            let replacement = self
                .inner
                .active_transactions
                .borrow()
                .iter()
                .rev()
                .find_map(|t| t.mutations().into_iter().find(|m| m.key == key));
            {
                let mut state = self.inner.state.borrow_mut();
                match replacement {
                    Some(m) => match m.kind {
                        MutationType::Insert | MutationType::Update => {
                            if let Some(value) = m.modified {
                                state.optimistic_upserts.insert(key.clone(), value);
                                state.optimistic_deletes.remove(&key);
                            }
                        }
                        MutationType::Delete => {
                            state.optimistic_deletes.insert(key.clone());
                            state.optimistic_upserts.remove(&key);
                        }
                    },
                    None => {
                        state.optimistic_upserts.remove(&key);
                        state.optimistic_deletes.remove(&key);
                    }
                }
            }
            let post = self.get(&key);
            self.emit_diff(&key, pre, post);
        }
    }

    // -- sync glue ------------------------------------------------------

    /// Opens a fresh sync batch; discards any uncommitted batch the
    /// adapter had abandoned.
    pub fn begin_sync(&self) {
        *self.inner.in_flight_batch.borrow_mut() = PendingSyncTransaction::new();
        self.inner.batch_open.set(true);
    }

    /// `write(op)`. Must be between a `begin_sync`/`commit_sync` pair.
    pub fn write_sync(&self, op: SyncOp<T, K>) -> Result<()> {
        if !self.inner.batch_open.get() {
            return Err(CollectionError::NoPendingSyncTransaction);
        }
        let mut batch = self.inner.in_flight_batch.borrow_mut();
        if batch.committed {
            return Err(CollectionError::SyncTransactionAlreadyCommitted);
        }
        batch.operations.push(op);
        Ok(())
    }

    /// Clears the in-flight batch's buffered ops and snapshots the
    /// current optimistic overlay for replay once the synced side is
    /// cleared.
    pub fn truncate_sync(&self) {
        let mut batch = self.inner.in_flight_batch.borrow_mut();
        batch.operations.clear();
        batch.truncate = true;
        let state = self.inner.state.borrow();
        batch.optimistic_snapshot = Some(state.optimistic_upserts.clone());
    }

    /// Closes the in-flight batch and either applies it immediately
    /// or defers it behind any persisting transaction.
    pub fn commit_sync(&self) -> Result<()> {
        if !self.inner.batch_open.get() {
            return Err(CollectionError::NoPendingSyncTransaction);
        }
        let batch = {
            let mut batch_ref = self.inner.in_flight_batch.borrow_mut();
            if batch_ref.committed {
                return Err(CollectionError::SyncTransactionAlreadyCommitted);
            }
            batch_ref.committed = true;
            std::mem::replace(&mut *batch_ref, PendingSyncTransaction::new())
        };
        self.inner.batch_open.set(false);
        self.process_or_defer(batch)
    }

    fn has_persisting_transaction(&self) -> bool {
        self.inner
            .active_transactions
            .borrow()
            .iter()
            .any(|t| t.state() == TransactionState::Persisting)
    }

    fn process_or_defer(&self, batch: PendingSyncTransaction<T, K>) -> Result<()> {
        if self.has_persisting_transaction() && !batch.truncate {
            self.inner.deferred_batches.borrow_mut().push_back(batch);
            obs::record(obs::Event::CommitDeferred {
                collection: self.inner.id.clone(),
            });
            return Ok(());
        }
        self.apply_batch(batch)?;
        loop {
            if self.has_persisting_transaction() {
                break;
            }
            let next = self.inner.deferred_batches.borrow_mut().pop_front();
            match next {
                Some(next) => self.apply_batch(next)?,
                None => break,
            }
        }
        Ok(())
    }

    /// Apply one pending sync batch: validate, fold into `synced`,
    /// replay a truncate's optimistic snapshot or collapse touched
    /// keys' overlay entries, diff pre-vs-post visible value per key
    /// (naturally suppressing the redundant-echo case, since an
    /// unchanged visible value diffs to nothing), and maintain indexes
    /// from synced pre/post.
    fn apply_batch(&self, batch: PendingSyncTransaction<T, K>) -> Result<()> {
        if !batch.truncate {
            let state = self.inner.state.borrow();
            for op in &batch.operations {
                if let SyncOp::Insert { value, .. } = op {
                    let key = (self.inner.get_key)(value);
                    if let Some(existing) = state.synced.get(&key) {
                        if existing != value {
                            return Err(CollectionError::DuplicateKeySync);
                        }
                    }
                }
            }
        }

        let mut touched: Vec<K> = Vec::new();
        if batch.truncate {
            let state = self.inner.state.borrow();
            touched.extend(state.synced.keys().cloned());
        }
        for op in &batch.operations {
            let key = match op {
                SyncOp::Insert { value, .. } | SyncOp::Update { value, .. } => {
                    (self.inner.get_key)(value)
                }
                SyncOp::Delete { key } => key.clone(),
            };
            if !touched.contains(&key) {
                touched.push(key);
            }
        }

        let pre_visible: HashMap<K, Option<T>> =
            touched.iter().map(|k| (k.clone(), self.get(k))).collect();
        let pre_synced: HashMap<K, Option<T>> = {
            let state = self.inner.state.borrow();
            touched.iter().map(|k| (k.clone(), state.synced.get(k).cloned())).collect()
        };

        let partial_merge = self.inner.partial_merge.clone();
        let merge_fn = move |prev: &T, next: &T| -> T {
            partial_merge.as_ref().map_or_else(|| next.clone(), |f| f(prev, next))
        };
        let changed_keys = {
            let mut state = self.inner.state.borrow_mut();
            let CollectionState {
                synced,
                synced_metadata,
                ..
            } = &mut *state;
            apply_commit(
                &batch,
                synced,
                synced_metadata,
                self.inner.row_update_mode,
                self.inner.get_key.as_ref(),
                &merge_fn,
            )
        };

        if batch.truncate {
            let replay = batch.optimistic_snapshot.clone().unwrap_or_default();
            let deleted = touched.len();
            let replayed = replay.len();
            let mut state = self.inner.state.borrow_mut();
            state.optimistic_upserts = replay;
            state.optimistic_deletes.clear();
            drop(state);
            obs::record(obs::Event::TruncateApplied {
                collection: self.inner.id.clone(),
                deleted,
                replayed,
            });
        } else {
            for key in &changed_keys {
                self.collapse_overlay_for_key(key);
            }
        }

        let post_synced: HashMap<K, Option<T>> = {
            let state = self.inner.state.borrow();
            touched.iter().map(|k| (k.clone(), state.synced.get(k).cloned())).collect()
        };
        for key in &changed_keys {
            self.maintain_indexes_for_change(
                key,
                pre_synced.get(key).and_then(Option::as_ref),
                post_synced.get(key).and_then(Option::as_ref),
            );
            let pre = pre_visible.get(key).cloned().flatten();
            let post = self.get(key);
            self.emit_diff(key, pre, post);
        }

        self.inner.has_received_first_commit.set(true);
        obs::record(obs::Event::CommitApplied {
            collection: self.inner.id.clone(),
            changed_keys: changed_keys.len(),
        });
        Ok(())
    }

    /// After folding a synced write for `key`, drop its optimistic
    /// overlay entry unless some still-active transaction continues
    /// to claim it.
    fn collapse_overlay_for_key(&self, key: &K) {
        let claim = self
            .inner
            .active_transactions
            .borrow()
            .iter()
            .rev()
            .find_map(|t| t.mutations().into_iter().find(|m| &m.key == key));
        let mut state = self.inner.state.borrow_mut();
        match claim {
            Some(m) => match m.kind {
                MutationType::Insert | MutationType::Update => {
                    if let Some(value) = m.modified {
                        state.optimistic_upserts.insert(key.clone(), value);
                        state.optimistic_deletes.remove(key);
                    }
                }
                MutationType::Delete => {
                    state.optimistic_deletes.insert(key.clone());
                    state.optimistic_upserts.remove(key);
                }
            },
            None => {
                state.optimistic_upserts.remove(key);
                state.optimistic_deletes.remove(key);
            }
        }
    }

    fn emit_diff(&self, key: &K, pre: Option<T>, post: Option<T>) {
        match (pre, post) {
            (None, Some(value)) => self.emit(ChangeEvent::Insert {
                key: key.clone(),
                value,
            }),
            (Some(previous_value), Some(value)) => {
                if previous_value != value {
                    self.emit(ChangeEvent::Update {
                        key: key.clone(),
                        value,
                        previous_value,
                    });
                }
            }
            (Some(previous_value), None) => self.emit(ChangeEvent::Delete {
                key: key.clone(),
                previous_value,
            }),
            (None, None) => {}
        }
    }

    /// Fan the event out to every subscriber's filter, collecting the
    /// callbacks to invoke before running any of them so a reentrant
    /// collection call from a callback never tries to re-borrow
    /// `subscribers`. A panicking listener is isolated rather than
    /// propagated.
    fn emit(&self, event: ChangeEvent<T, K>) {
        let mut dispatch: Vec<(Rc<dyn Fn(ChangeEvent<T, K>)>, Vec<ChangeEvent<T, K>>)> = Vec::new();
        {
            let mut subs = self.inner.subscribers.borrow_mut();
            for entry in subs.iter_mut() {
                let out = process_event(entry, &event);
                if !out.is_empty() {
                    dispatch.push((entry.callback.clone(), out));
                }
            }
        }
        for (callback, events) in dispatch {
            for ev in events {
                let callback = callback.clone();
                let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || callback(ev)));
            }
        }
    }

    // -- subscriptions --------------------------------------------------

    /// Delivers an initial snapshot
    /// (full or index-ordered + limited, per `options`) unless
    /// `include_initial_state` is false, then starts forwarding live
    /// change events through the where-expression filter.
    pub fn subscribe_changes(
        &self,
        options: SubscribeOptions,
        callback: impl Fn(ChangeEvent<T, K>) + 'static,
    ) -> Result<Subscription<T, K>> {
        self.guard_not_error()?;
        if !options.order_by.is_empty() && options.limit.is_none() {
            return Err(CollectionError::CollectionConfiguration(
                "orderBy requires a limit".to_string(),
            ));
        }
        if let Some(expr) = &options.where_expr {
            self.maybe_auto_index(expr);
        }
        let predicate: Option<Compiled<T>> =
            options.where_expr.as_ref().map(|e| compile::<T>(e)).transpose()?;

        let _ = self.start_sync();

        let id = self.inner.next_subscriber_id.get();
        self.inner.next_subscriber_id.set(id + 1);
        let status = Rc::new(Cell::new(SubscriptionStatus::Ready));
        let callback: Rc<dyn Fn(ChangeEvent<T, K>)> = Rc::new(callback);

        self.inner.subscribers.borrow_mut().push(SubscriberEntry {
            id,
            callback: callback.clone(),
            predicate: predicate.clone(),
            sent_keys: HashSet::new(),
            loaded_initial_state: false,
            status: status.clone(),
        });

        if options.include_initial_state {
            self.deliver_initial_snapshot(id, &options, predicate.as_ref(), &callback, &status);
        }
        if let Some(entry) = self.inner.subscribers.borrow_mut().iter_mut().find(|e| e.id == id) {
            entry.loaded_initial_state = true;
        }

        let collection = self.clone();
        let unsubscribe: Box<dyn FnOnce()> = Box::new(move || {
            collection.inner.subscribers.borrow_mut().retain(|e| e.id != id);
            if collection.inner.subscribers.borrow().is_empty() {
                collection.inner.last_unsubscribed_at.set(Some(Instant::now()));
            }
        });
        Ok(Subscription::new(id, status, unsubscribe))
    }

    fn deliver_initial_snapshot(
        &self,
        id: u64,
        options: &SubscribeOptions,
        predicate: Option<&Compiled<T>>,
        callback: &Rc<dyn Fn(ChangeEvent<T, K>)>,
        status: &Rc<Cell<SubscriptionStatus>>,
    ) {
        let rows: Vec<(K, T)> = {
            let catalog = self.inner.indexes.borrow();
            if !options.order_by.is_empty() {
                #[allow(clippy::expect_used)]
                let limit = options.limit.expect("validated by subscribe_changes");
                let first = &options.order_by[0];
                if let Some(idx) = catalog.find(&first.path) {
                    let already_sent = HashSet::new();
                    ordered_batch(idx, &first.path, first.descending, limit, &already_sent, predicate, |k| {
                        self.inner.state.borrow().visible(k).cloned()
                    })
                } else {
                    full_snapshot(
                        self.entries(),
                        &catalog,
                        options.where_expr.as_ref(),
                        predicate,
                        &options.order_by,
                        options.limit,
                    )
                }
            } else {
                full_snapshot(
                    self.entries(),
                    &catalog,
                    options.where_expr.as_ref(),
                    predicate,
                    &options.order_by,
                    options.limit,
                )
            }
        };

        let count = rows.len();
        for (key, value) in &rows {
            if let Some(entry) = self.inner.subscribers.borrow_mut().iter_mut().find(|e| e.id == id) {
                entry.sent_keys.insert(key.clone());
            }
            callback(ChangeEvent::Insert {
                key: key.clone(),
                value: value.clone(),
            });
        }
        obs::record(obs::Event::SubscriptionSnapshotSent {
            collection: self.inner.id.clone(),
            count,
        });

        if !options.order_by.is_empty() {
            if let Some(sync) = self.inner.sync.clone() {
                status.set(SubscriptionStatus::LoadingSubset);
                let cursor = rows.last().map(|(_, v)| v.field(&options.order_by[0].path));
                let _ = sync.load_subset(LoadSubsetRequest {
                    limit: options.limit.unwrap_or(0),
                    from_cursor: cursor,
                });
                status.set(SubscriptionStatus::Ready);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;

    #[derive(Clone, Debug, PartialEq)]
    struct Item {
        id: u32,
        name: String,
        age: i64,
    }

    impl Row for Item {
        fn field(&self, path: &[String]) -> Value {
            match path {
                [f] if f == "id" => Value::Int(i64::from(self.id)),
                [f] if f == "name" => Value::Text(self.name.clone()),
                [f] if f == "age" => Value::Int(self.age),
                _ => Value::Undefined,
            }
        }
    }

    fn config(id: &str) -> CollectionConfig<Item, u32> {
        CollectionConfig::new(id, |item: &Item| item.id)
    }

    #[test]
    fn autocommit_insert_emits_immediately_and_folds_into_synced() {
        let c = Collection::new(
            config("items").with_on_insert(|_tx| Ok(())),
        );
        let seen = Rc::new(StdRefCell::new(Vec::new()));
        let seen2 = seen.clone();
        let _sub = c
            .subscribe_changes(SubscribeOptions::default(), move |ev| {
                seen2.borrow_mut().push(ev);
            })
            .unwrap();

        c.insert(vec![Item {
            id: 1,
            name: "a".into(),
            age: 30,
        }])
        .unwrap();

        assert_eq!(c.get(&1).unwrap().name, "a");
        assert!(matches!(seen.borrow()[0], ChangeEvent::Insert { .. }));
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let c = Collection::new(config("items").with_on_insert(|_| Ok(())));
        c.insert(vec![Item {
            id: 1,
            name: "a".into(),
            age: 1,
        }])
        .unwrap();
        let err = c
            .insert(vec![Item {
                id: 1,
                name: "b".into(),
                age: 2,
            }])
            .unwrap_err();
        assert!(matches!(err, CollectionError::DuplicateKey));
    }

    #[test]
    fn insert_then_delete_in_one_transaction_nets_to_nothing() {
        let c = Collection::new(config("items"));
        let events = Rc::new(StdRefCell::new(Vec::new()));
        let events2 = events.clone();
        let _sub = c
            .subscribe_changes(SubscribeOptions::default(), move |ev| {
                events2.borrow_mut().push(ev);
            })
            .unwrap();

        let tx = c.begin_transaction();
        let c2 = c.clone();
        tx.mutate(
            move || {
                c2.insert(vec![Item {
                    id: 9,
                    name: "temp".into(),
                    age: 1,
                }])
                .unwrap();
                c2.delete(vec![9]).unwrap();
            },
            Some(|_t: &Transaction<Item, u32>| Ok(())),
        )
        .unwrap();

        assert!(events.borrow().is_empty());
        assert!(c.get(&9).is_none());
    }

    #[test]
    fn conflicting_transactions_cascade_rollback() {
        let c = Collection::new(config("items").with_on_insert(|_| Ok(())));
        c.insert(vec![Item {
            id: 7,
            name: "base".into(),
            age: 1,
        }])
        .unwrap();

        let tx_a = c.begin_transaction();
        let tx_b = c.begin_transaction();
        let c_a = c.clone();
        let c_b = c.clone();
        tx_a.mutate(
            move || {
                c_a.update(vec![7], |d| {
                    d.current_mut().name = "from-a".to_string();
                    d.touch(&["name".to_string()]);
                })
                .unwrap();
            },
            None::<fn(&Transaction<Item, u32>) -> Result<()>>,
        )
        .unwrap();
        tx_b.mutate(
            move || {
                c_b.update(vec![7], |d| {
                    d.current_mut().name = "from-b".to_string();
                    d.touch(&["name".to_string()]);
                })
                .unwrap();
            },
            None::<fn(&Transaction<Item, u32>) -> Result<()>>,
        )
        .unwrap();

        assert_eq!(c.get(&7).unwrap().name, "from-b");
        tx_a.commit(|_| Err(CollectionError::MutationFailed("boom".into())))
            .unwrap_err();

        assert_eq!(tx_b.state(), TransactionState::Failed);
        assert_eq!(c.get(&7).unwrap().name, "base");
    }

    #[test]
    fn sync_confirm_of_identical_value_emits_no_duplicate_event() {
        let c = Collection::new(config("items").with_on_insert(|_| Ok(())));
        let events = Rc::new(StdRefCell::new(Vec::new()));
        let events2 = events.clone();
        let _sub = c
            .subscribe_changes(SubscribeOptions::default(), move |ev| {
                events2.borrow_mut().push(ev);
            })
            .unwrap();

        c.insert(vec![Item {
            id: 1,
            name: "a".into(),
            age: 1,
        }])
        .unwrap();
        assert_eq!(events.borrow().len(), 1);

        c.begin_sync();
        c.write_sync(SyncOp::Insert {
            value: Item {
                id: 1,
                name: "a".into(),
                age: 1,
            },
            metadata: None,
        })
        .unwrap();
        c.commit_sync().unwrap();

        assert_eq!(events.borrow().len(), 1, "sync confirm of the same value shouldn't re-emit");
        assert_eq!(c.get(&1).unwrap().name, "a");
    }

    #[test]
    fn truncate_emits_deletes_then_replays_inserts() {
        let c = Collection::new(config("items"));
        c.begin_sync();
        for i in 0..3u32 {
            c.write_sync(SyncOp::Insert {
                value: Item {
                    id: i,
                    name: format!("row-{i}"),
                    age: i64::from(i),
                },
                metadata: None,
            })
            .unwrap();
        }
        c.commit_sync().unwrap();
        assert_eq!(c.size(), 3);

        let events = Rc::new(StdRefCell::new(Vec::new()));
        let events2 = events.clone();
        let _sub = c
            .subscribe_changes(SubscribeOptions::default(), move |ev| {
                events2.borrow_mut().push(ev);
            })
            .unwrap();

        c.begin_sync();
        c.truncate_sync();
        c.write_sync(SyncOp::Insert {
            value: Item {
                id: 9,
                name: "new".into(),
                age: 9,
            },
            metadata: None,
        })
        .unwrap();
        c.commit_sync().unwrap();

        assert_eq!(c.size(), 1);
        assert!(c.get(&9).is_some());
        let deletes = events
            .borrow()
            .iter()
            .filter(|e| matches!(e, ChangeEvent::Delete { .. }))
            .count();
        assert_eq!(deletes, 3);
    }

    #[test]
    fn subscriber_with_where_expr_synthesizes_insert_when_value_crosses_into_filter() {
        let c = Collection::new(
            config("items")
                .with_on_insert(|_| Ok(()))
                .with_on_update(|_| Ok(())),
        );
        c.insert(vec![Item {
            id: 1,
            name: "a".into(),
            age: 10,
        }])
        .unwrap();

        let events = Rc::new(StdRefCell::new(Vec::new()));
        let events2 = events.clone();
        let where_expr = Expr::call(FuncName::Gte, vec![Expr::prop(&["age"]), Expr::val(18i64)]);
        let _sub = c
            .subscribe_changes(
                SubscribeOptions {
                    where_expr: Some(where_expr),
                    include_initial_state: false,
                    ..SubscribeOptions::default()
                },
                move |ev| events2.borrow_mut().push(ev),
            )
            .unwrap();

        c.update(vec![1], |d| {
            d.current_mut().age = 20;
            d.touch(&["age".to_string()]);
        })
        .unwrap();

        assert_eq!(events.borrow().len(), 1);
        assert!(matches!(events.borrow()[0], ChangeEvent::Insert { .. }));
    }

    #[test]
    fn create_index_and_planner_use_it_for_equality() {
        let c = Collection::new(config("items").with_on_insert(|_| Ok(())));
        c.insert(vec![
            Item { id: 1, name: "a".into(), age: 10 },
            Item { id: 2, name: "b".into(), age: 20 },
        ])
        .unwrap();
        c.create_index(vec!["age".to_string()]).unwrap();
        assert!(c.inner.indexes.borrow().has_index(&["age".to_string()]));
    }

    #[test]
    fn insert_with_threads_metadata_onto_the_pending_mutation() {
        let c = Collection::new(config("items").with_on_insert(|_| Ok(())));
        let tx = c
            .insert_with(
                vec![Item {
                    id: 1,
                    name: "a".into(),
                    age: 1,
                }],
                MutationOptions {
                    metadata: Some(Value::Text("imported".into())),
                    optimistic: false,
                },
            )
            .unwrap();

        assert_eq!(tx.mutations()[0].metadata, Some(Value::Text("imported".into())));
        assert!(!tx.mutations()[0].optimistic);
    }
}
