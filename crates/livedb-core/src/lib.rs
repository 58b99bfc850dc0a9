//! Core runtime for livedb: the collection state engine, the
//! transaction/mutation layer, the expression IR + planner, and the
//! subscription protocol.
//!
//! Concrete sync backends, framework bindings, and persistence
//! adapters are out of scope; this crate only specifies the contract
//! they plug into (`collection::sync::SyncAdapter`).

pub mod access;
pub mod collection;
pub mod deferred;
pub mod error;
pub mod expr;
pub mod index;
pub mod mutation;
pub mod obs;
pub mod row;
pub mod subscription;
pub mod transaction;

pub use livedb_primitives::{CompareOptions, NullsOrder, StringSortMode, Value};

///
/// Prelude
///
/// Domain vocabulary only: no error types, no obs internals.
///
pub mod prelude {
    pub use crate::{
        collection::{Collection, CollectionConfig, RowUpdateMode, Status},
        expr::{AggName, Expr, FuncName},
        mutation::MutationOptions,
        row::Row,
        transaction::Transaction,
        Value,
    };
}
