//! aerostream - streaming, early-terminating query execution over JSON documents
//!
//! A validated [`QueryPlan`] is applied element by element to a collection
//! inside a document, read through a token-level reader. Reading stops as
//! soon as the result is decided; plans that need a global view fall back to
//! an in-memory operation executor.

pub mod config;
pub mod errors;
pub mod executor;
pub mod observability;
pub mod path;
pub mod plan;
pub mod reader;

mod engine;

pub use config::ExecutorConfig;
pub use engine::QueryEngine;
pub use errors::{QueryError, QueryResult};
pub use executor::{
    CancellationToken, ExecutionContext, ExecutionResult, ExecutionRoute, ExecutionStats,
    QueryOutput,
};
pub use plan::{Key, PlanBuilder, QueryPlan};
pub use reader::{BytesSource, DocumentSource, FileSource, JsonKind, StreamSource};
