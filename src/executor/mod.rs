//! Query execution subsystem
//!
//! Executors consume validated plans and produce results in a single
//! forward pass whenever the plan allows it.
//!
//! # Execution flow (fixed order)
//!
//! 1. Reach the target collection (root value, or a path)
//! 2. Type filter on each element's first token
//! 3. Deserialize; elements of the wrong shape are skipped and counted
//! 4. Predicates, while-partition, skip, projection, take
//! 5. Stop reading as soon as no later element can change the result
//!
//! Plans that need a global view (sorting, set algebra, grouping, joins,
//! aggregation, tail partitioning) buffer the collection and hand it to
//! [`OperationExecutor`].

mod cancel;
mod cursor;
mod operations;
mod path_filtered;
mod pipeline;
mod result;
mod streaming;

use std::fmt;
use std::io::Read;
use std::sync::Arc;

use tokio::io::AsyncRead;

pub use cancel::CancellationToken;
pub use operations::OperationExecutor;
pub use path_filtered::PathFilteredExecutor;
pub use result::{ExecutionResult, ExecutionRoute, ExecutionStats, Group, QueryOutput};
pub use streaming::{ResultStream, StreamingExecutor};

use crate::config::ExecutorConfig;
use crate::errors::{QueryError, QueryResult};
use crate::observability::{log_event, log_event_with_fields, Event, MetricsRegistry};
use crate::path::PathEvaluator;
use crate::reader::{AsyncJsonTokenReader, BufferPool, JsonTokenReader};

/// Shared state for every execution of one engine
#[derive(Clone)]
pub struct ExecutionContext {
    pub config: ExecutorConfig,
    pub pool: BufferPool,
    pub metrics: Arc<MetricsRegistry>,
    /// Evaluator for advanced path syntax
    pub evaluator: Option<Arc<dyn PathEvaluator>>,
}

impl ExecutionContext {
    pub fn new(config: ExecutorConfig) -> Self {
        let pool = BufferPool::new(config.pooled_buffers, config.pooled_buffer_capacity);
        Self {
            config,
            pool,
            metrics: Arc::new(MetricsRegistry::new()),
            evaluator: None,
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn PathEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Blocking reader sharing this context's configuration and pool
    pub fn reader<T: Read>(&self, source: T) -> JsonTokenReader<T> {
        JsonTokenReader::with_config(source, &self.config, self.pool.clone())
    }

    /// Async reader sharing this context's configuration and pool
    pub fn async_reader<T: AsyncRead + Unpin>(&self, source: T) -> AsyncJsonTokenReader<T> {
        AsyncJsonTokenReader::with_config(source, &self.config, self.pool.clone())
    }

    /// Folds the counters of one finished execution into the metrics
    pub(crate) fn record(&self, stats: &ExecutionStats) {
        self.metrics.increment_queries_executed();
        self.metrics.add_elements_read(stats.elements_read);
        self.metrics.add_elements_malformed(stats.elements_malformed);
        self.metrics.add_bytes_read(stats.bytes_read);
        if stats.early_terminated {
            self.metrics.increment_early_terminations();
        }
        if stats.materialized {
            self.metrics.increment_materializations();
        }
    }

    /// Records the outcome of one execution call
    pub(crate) fn conclude<R>(
        &self,
        result: QueryResult<QueryOutput<R>>,
        stats: ExecutionStats,
    ) -> QueryResult<ExecutionResult<R>> {
        match result {
            Ok(output) => {
                self.record(&stats);
                Ok(ExecutionResult::new(output, stats))
            }
            Err(err) => {
                self.record_failure(&err);
                Err(err)
            }
        }
    }

    pub(crate) fn record_failure(&self, err: &QueryError) {
        self.metrics.increment_queries_failed();
        match err {
            QueryError::DocumentParse { offset, reason } => {
                let offset = offset.to_string();
                log_event_with_fields(
                    Event::DocumentParseFailed,
                    &[("offset", offset.as_str()), ("reason", reason.as_str())],
                );
            }
            QueryError::Cancelled => {
                self.metrics.increment_cancellations();
                log_event(Event::QueryCancelled);
            }
            _ => {}
        }
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("config", &self.config)
            .field("has_evaluator", &self.evaluator.is_some())
            .finish()
    }
}
