//! Query plans
//!
//! - `QueryPlan`: immutable compiled query, generic over source and result shape
//! - `PlanBuilder`: fluent construction plus validation
//! - `PlanCache`: explicit memoization owned by whoever builds plans
//! - `ExplainPlan`: deterministic description
//!
//! Plans never touch documents. Executors consume them read-only.

mod cache;
mod explain;
mod key;
mod operations;
#[allow(clippy::module_inception)]
mod plan;

pub use cache::PlanCache;
pub use explain::ExplainPlan;
pub use key::Key;
pub use operations::{
    structural_eq, structural_key, Aggregation, Conversion, EqFn, GroupSpec, JoinKind, JoinSpec,
    KeyFn, NumberFn, Predicate, Projection, Quantifier, SetOperation, SortDirection, SortKey,
    TerminalOperation, ValueFn, WhilePartition,
};
pub use plan::{PlanBuilder, QueryPlan};
