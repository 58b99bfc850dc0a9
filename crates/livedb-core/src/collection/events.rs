///
/// RowUpdateMode
///
/// How a synced `update` op is applied to the stored row: `Partial`
/// shallow-merges the written fields into the existing value; `Full`
/// replaces it outright. Merging itself is
/// left to the embedder (it owns the concrete `T`); the collection
/// only threads the mode through to the sync-apply step.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RowUpdateMode {
    Partial,
    Full,
}

///
/// ChangeEvent
///
/// One observable change to a collection's visible state.
///
#[derive(Clone, Debug)]
pub enum ChangeEvent<T, K> {
    Insert { key: K, value: T },
    Update { key: K, value: T, previous_value: T },
    Delete { key: K, previous_value: T },
}

impl<T, K: Clone> ChangeEvent<T, K> {
    #[must_use]
    pub fn key(&self) -> K {
        match self {
            Self::Insert { key, .. } | Self::Update { key, .. } | Self::Delete { key, .. } => {
                key.clone()
            }
        }
    }
}
