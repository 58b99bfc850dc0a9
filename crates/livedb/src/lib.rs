//! livedb — a client-side reactive collection engine: optimistic
//! mutations, transactions, and incrementally maintained live queries.
//!
//! This is the public meta-crate. Downstream users depend on **livedb**
//! only; `livedb-core` and `livedb-primitives` are implementation
//! detail crates that may split further without breaking this surface.

pub use livedb_core as core;
pub use livedb_primitives as primitives;

pub use livedb_core::{
    access, collection, deferred, error, expr, index, mutation, obs, row, subscription,
    transaction,
};
pub use livedb_core::{CompareOptions, NullsOrder, StringSortMode, Value};

pub use collection::{Collection, CollectionConfig, RowUpdateMode, Status};
pub use error::{CollectionError, Result};
pub use row::Row;
pub use transaction::Transaction;

///
/// Prelude
///
/// The handful of names most call sites need: the collection type and
/// its config builder, the row trait, the expression IR, and the
/// scalar value type.
///
pub mod prelude {
    pub use livedb_core::prelude::*;
}
