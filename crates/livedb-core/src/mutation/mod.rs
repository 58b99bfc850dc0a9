//! Mutation manager: `insert`/`update`/`delete` planning, schema
//! validation, and the change-tracking `Draft` mechanism callers use
//! to describe an update without a live mutable proxy.

mod draft;
mod manager;
mod pending;

pub use draft::Draft;
pub use manager::{plan_delete, plan_insert, plan_update, MutationConfig, MutationOptions, VisibleView};
pub use pending::{merge_pending, global_key, MutationType, PendingMutation};
