//! Observability boundary.
//!
//! Core collection/transaction/subscription logic must not format
//! strings or reach for a logging crate directly; every notable event
//! flows through `record()` to whatever `Sink` is installed: a closed
//! `Event` enum behind a trait, not `log`/`tracing`, so embedders can
//! wire it into metrics or devtools without this crate choosing for
//! them.

use std::cell::RefCell;

///
/// Event
///
/// Closed set of notable engine occurrences. Embedders install a
/// `Sink` to observe these for metrics, debugging, or devtools;
/// the engine never depends on what they do with them.
///
#[derive(Clone, Debug)]
pub enum Event {
    StatusChanged {
        collection: String,
        from: crate::collection::Status,
        to: crate::collection::Status,
    },
    CommitApplied {
        collection: String,
        changed_keys: usize,
    },
    CommitDeferred {
        collection: String,
    },
    TruncateApplied {
        collection: String,
        deleted: usize,
        replayed: usize,
    },
    TransactionCompleted {
        transaction_id: u64,
    },
    TransactionFailed {
        transaction_id: u64,
        reason: String,
    },
    CascadeRollback {
        failed_transaction_id: u64,
        rolled_back_transaction_id: u64,
    },
    IndexBuilt {
        collection: String,
        index: String,
    },
    IndexRowSkipped {
        collection: String,
        index: String,
        reason: String,
    },
    SubscriptionSnapshotSent {
        collection: String,
        count: usize,
    },
    GarbageCollected {
        collection: String,
    },
}

///
/// Sink
///
pub trait Sink {
    fn record(&self, event: Event);
}

///
/// NoopSink
///
pub struct NoopSink;

impl Sink for NoopSink {
    fn record(&self, _event: Event) {}
}

thread_local! {
    static SINK: RefCell<Box<dyn Sink>> = RefCell::new(Box::new(NoopSink));
}

/// Install a sink for the current thread, replacing whatever was there.
pub fn set_sink(sink: Box<dyn Sink>) {
    SINK.with(|cell| *cell.borrow_mut() = sink);
}

/// Restore the no-op sink.
pub fn clear_sink() {
    SINK.with(|cell| *cell.borrow_mut() = Box::new(NoopSink));
}

/// Record one event against the currently installed sink.
pub fn record(event: Event) {
    SINK.with(|cell| cell.borrow().record(event));
}

#[cfg(test)]
pub(crate) mod test_sink {
    use super::{Event, Sink};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default, Clone)]
    pub(crate) struct RecordingSink {
        events: Rc<RefCell<Vec<Event>>>,
    }

    impl RecordingSink {
        pub(crate) fn events(&self) -> Vec<Event> {
            self.events.borrow().clone()
        }
    }

    impl Sink for RecordingSink {
        fn record(&self, event: Event) {
            self.events.borrow_mut().push(event);
        }
    }
}
