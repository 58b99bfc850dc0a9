use crate::error::Result;
use crate::Value;
use std::collections::HashMap;

///
/// SyncOpKind
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncOpKind {
    Insert,
    Update,
    Delete,
}

/// One write in a pending sync batch. The key is derived from `value` via the collection's
/// `get_key` at `write()` time, not stored redundantly here for
/// inserts/updates; deletes carry the key directly since there's no
/// value to derive it from.
#[derive(Clone, Debug)]
pub enum SyncOp<T, K> {
    Insert { value: T, metadata: Option<Value> },
    Update { value: T, metadata: Option<Value> },
    Delete { key: K },
}

/// A buffered batch of sync writes, committed atomically.
#[derive(Default)]
pub struct PendingSyncTransaction<T, K> {
    pub operations: Vec<SyncOp<T, K>>,
    pub committed: bool,
    pub truncate: bool,
    /// Snapshot of the optimistic overlay captured at truncate time,
    /// replayed after the delete-everything step.
    pub optimistic_snapshot: Option<HashMap<K, T>>,
}

impl<T, K> PendingSyncTransaction<T, K> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            operations: Vec::new(),
            committed: false,
            truncate: false,
            optimistic_snapshot: None,
        }
    }
}

/// A request to fetch more rows matching a where-expression and
/// order, for the on-demand subscription snapshot mode.
pub struct LoadSubsetRequest {
    pub limit: usize,
    pub from_cursor: Option<Value>,
}

///
/// SyncAdapter
///
/// The user-supplied boundary the collection calls into. Kept as a
/// plain trait object (`Rc<dyn SyncAdapter<T, K>>`) rather than tied
/// to any transport or async runtime — concrete backends (HTTP,
/// WebSocket, SQL, ...) are out of scope here; this only specifies the
/// contract they plug into.
///
pub trait SyncAdapter<T, K> {
    /// Begin syncing. Implementations typically call back into the
    /// collection's `begin`/`write`/`commit` over time (eagerly at
    /// startup, or driven by a transport event loop the embedder
    /// owns) via a cloned collection handle.
    fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Fetch more rows on demand for a limited/ordered subscription
    /// snapshot. On-demand sync mode requires this.
    fn load_subset(&self, _request: LoadSubsetRequest) -> Result<()> {
        Ok(())
    }

    /// Release any resources the adapter is holding. Failures here
    /// are reported to the caller, never allowed to corrupt the
    /// commit path.
    fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}
