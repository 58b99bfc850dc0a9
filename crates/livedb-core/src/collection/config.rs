use super::events::RowUpdateMode;
use super::sync::SyncAdapter;
use crate::error::Result;
use crate::transaction::Transaction;
use std::cmp::Ordering;
use std::rc::Rc;
use std::time::Duration;

///
/// AutoIndex
///
/// Whether first use of a ref-field in an equality/range predicate
/// synthesizes an index.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AutoIndex {
    Eager,
    Off,
}

///
/// CollectionConfig
///
/// Builder for a collection's configuration. `get_key` is the only
/// required field; everything else defaults to leaving the feature
/// off (`auto_index: Off` rather than `Eager`, since synthesizing
/// indexes behind a caller's back is a cost/benefit tradeoff a library
/// default shouldn't make for them).
///
pub struct CollectionConfig<T, K> {
    pub(crate) id: String,
    pub(crate) get_key: Rc<dyn Fn(&T) -> K>,
    pub(crate) compare: Option<Rc<dyn Fn(&T, &T) -> Ordering>>,
    pub(crate) schema: Option<Rc<dyn Fn(&T) -> Result<()>>>,
    pub(crate) auto_index: AutoIndex,
    pub(crate) gc_time: Option<Duration>,
    pub(crate) start_sync: bool,
    pub(crate) row_update_mode: RowUpdateMode,
    pub(crate) on_insert: Option<Rc<dyn Fn(&Transaction<T, K>) -> Result<()>>>,
    pub(crate) on_update: Option<Rc<dyn Fn(&Transaction<T, K>) -> Result<()>>>,
    pub(crate) on_delete: Option<Rc<dyn Fn(&Transaction<T, K>) -> Result<()>>>,
    pub(crate) sync: Option<Rc<dyn SyncAdapter<T, K>>>,
    /// How a `RowUpdateMode::Partial` synced update is folded into the
    /// existing row. `T` is opaque to the engine (it only reads fields
    /// through `Row`), so shallow-merge has to be supplied by the
    /// embedder; without one, `Partial` behaves like `Full` (documented
    /// as an Open Question resolution in `DESIGN.md`).
    pub(crate) partial_merge: Option<Rc<dyn Fn(&T, &T) -> T>>,
}

impl<T, K> CollectionConfig<T, K> {
    #[must_use]
    pub fn new(id: impl Into<String>, get_key: impl Fn(&T) -> K + 'static) -> Self {
        Self {
            id: id.into(),
            get_key: Rc::new(get_key),
            compare: None,
            schema: None,
            auto_index: AutoIndex::Off,
            gc_time: None,
            start_sync: false,
            row_update_mode: RowUpdateMode::Partial,
            on_insert: None,
            on_update: None,
            on_delete: None,
            sync: None,
            partial_merge: None,
        }
    }

    #[must_use]
    pub fn with_compare(mut self, compare: impl Fn(&T, &T) -> Ordering + 'static) -> Self {
        self.compare = Some(Rc::new(compare));
        self
    }

    #[must_use]
    pub fn with_schema(mut self, schema: impl Fn(&T) -> Result<()> + 'static) -> Self {
        self.schema = Some(Rc::new(schema));
        self
    }

    #[must_use]
    pub const fn with_auto_index(mut self, auto_index: AutoIndex) -> Self {
        self.auto_index = auto_index;
        self
    }

    #[must_use]
    pub const fn with_gc_time(mut self, gc_time: Duration) -> Self {
        self.gc_time = Some(gc_time);
        self
    }

    #[must_use]
    pub const fn with_start_sync(mut self, start_sync: bool) -> Self {
        self.start_sync = start_sync;
        self
    }

    #[must_use]
    pub const fn with_row_update_mode(mut self, mode: RowUpdateMode) -> Self {
        self.row_update_mode = mode;
        self
    }

    #[must_use]
    pub fn with_on_insert(mut self, handler: impl Fn(&Transaction<T, K>) -> Result<()> + 'static) -> Self {
        self.on_insert = Some(Rc::new(handler));
        self
    }

    #[must_use]
    pub fn with_on_update(mut self, handler: impl Fn(&Transaction<T, K>) -> Result<()> + 'static) -> Self {
        self.on_update = Some(Rc::new(handler));
        self
    }

    #[must_use]
    pub fn with_on_delete(mut self, handler: impl Fn(&Transaction<T, K>) -> Result<()> + 'static) -> Self {
        self.on_delete = Some(Rc::new(handler));
        self
    }

    #[must_use]
    pub fn with_sync(mut self, sync: impl SyncAdapter<T, K> + 'static) -> Self {
        self.sync = Some(Rc::new(sync));
        self
    }

    #[must_use]
    pub fn with_partial_merge(mut self, merge: impl Fn(&T, &T) -> T + 'static) -> Self {
        self.partial_merge = Some(Rc::new(merge));
        self
    }
}
