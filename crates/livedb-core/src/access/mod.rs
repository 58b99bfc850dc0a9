//! Index-driven query planner: turns a where-`Expr` plus a set of
//! available indexes into a candidate key set, falling back to a full
//! scan when no index fits.

mod plan;
mod planner;

pub use plan::AccessPlan;
pub use planner::{plan_where, IndexCatalog};
