//! Engine facade
//!
//! Routes a (plan, source, path) call to the right executor and wraps every
//! execution in a QUERY observation scope carrying a fresh query id.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::io::AsyncRead;
use uuid::Uuid;

use crate::config::ExecutorConfig;
use crate::errors::{QueryError, QueryResult};
use crate::executor::{
    CancellationToken, ExecutionContext, ExecutionResult, PathFilteredExecutor, ResultStream,
    StreamingExecutor,
};
use crate::observability::{Logger, MetricsSnapshot, ObservationScope};
use crate::path::PathEvaluator;
use crate::plan::{PlanBuilder, QueryPlan};
use crate::reader::DocumentSource;

/// Entry point for running validated plans against documents
#[derive(Debug, Clone)]
pub struct QueryEngine {
    ctx: ExecutionContext,
}

impl QueryEngine {
    /// Validates `config` and applies its log level
    pub fn new(config: ExecutorConfig) -> QueryResult<Self> {
        config.validate()?;
        Logger::set_min_severity(config.log_level);
        Ok(Self {
            ctx: ExecutionContext::new(config),
        })
    }

    /// Injects the evaluator used for advanced path syntax
    pub fn with_evaluator(mut self, evaluator: Arc<dyn PathEvaluator>) -> Self {
        self.ctx = self.ctx.with_evaluator(evaluator);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.ctx.config
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.ctx.metrics.snapshot()
    }

    /// Validates a plan, counting rejections
    pub fn prepare<S: 'static, R: 'static>(
        &self,
        builder: PlanBuilder<S, R>,
    ) -> QueryResult<QueryPlan<S, R>> {
        builder.build().map_err(|err| {
            self.ctx.metrics.increment_plans_rejected();
            err
        })
    }

    /// Runs `plan` over `source`; without a path the root value is the collection
    pub fn execute<S, R, D>(
        &self,
        plan: &QueryPlan<S, R>,
        source: &mut D,
        path: Option<&str>,
    ) -> QueryResult<ExecutionResult<R>>
    where
        S: DeserializeOwned,
        R: Clone,
        D: DocumentSource,
    {
        let query_id = Uuid::new_v4().to_string();
        let described = source.describe();
        let scope = ObservationScope::with_fields(
            "QUERY",
            &[
                ("query_id", query_id.as_str()),
                ("source", described.as_str()),
                ("path", path.unwrap_or("$")),
            ],
        );

        let result = match path {
            None => match source.open() {
                Ok(stream) => StreamingExecutor::new(plan, &self.ctx).execute(self.ctx.reader(stream)),
                Err(err) => Err(self.setup_failed(err)),
            },
            Some(expression) => match PathFilteredExecutor::new(plan, &self.ctx, expression) {
                Ok(executor) => executor.execute(source),
                Err(err) => Err(self.setup_failed(err)),
            },
        };

        close_scope(scope, &result);
        result
    }

    /// Async variant over a forward-only stream, cancellable at element boundaries
    pub async fn execute_async<S, R, T>(
        &self,
        plan: &QueryPlan<S, R>,
        stream: T,
        path: Option<&str>,
        cancel: &CancellationToken,
    ) -> QueryResult<ExecutionResult<R>>
    where
        S: DeserializeOwned,
        R: Clone,
        T: AsyncRead + Unpin,
    {
        let query_id = Uuid::new_v4().to_string();
        let scope = ObservationScope::with_fields(
            "QUERY",
            &[
                ("query_id", query_id.as_str()),
                ("source", "async_stream"),
                ("path", path.unwrap_or("$")),
            ],
        );

        let result = match path {
            None => {
                StreamingExecutor::new(plan, &self.ctx)
                    .execute_async(self.ctx.async_reader(stream), cancel)
                    .await
            }
            Some(expression) => match PathFilteredExecutor::new(plan, &self.ctx, expression) {
                Ok(executor) => executor.execute_async(stream, cancel).await,
                Err(err) => Err(self.setup_failed(err)),
            },
        };

        close_scope(scope, &result);
        result
    }

    /// Lazy results over the root collection of `source`
    pub fn stream<'a, S, R, D>(
        &'a self,
        plan: &'a QueryPlan<S, R>,
        source: &mut D,
    ) -> QueryResult<ResultStream<'a, D::Stream, S, R>>
    where
        S: DeserializeOwned,
        R: Clone,
        D: DocumentSource,
    {
        let stream = source.open().map_err(|err| self.setup_failed(err))?;
        StreamingExecutor::new(plan, &self.ctx).stream(self.ctx.reader(stream))
    }

    fn setup_failed(&self, err: QueryError) -> QueryError {
        self.ctx.record_failure(&err);
        err
    }
}

fn close_scope<R>(scope: ObservationScope<'_>, result: &QueryResult<ExecutionResult<R>>) {
    match result {
        Ok(result) => {
            let yielded = result.len().to_string();
            scope.complete_with_fields(&[
                ("route", result.stats.route.as_str()),
                ("output", result.output.kind()),
                ("yielded", yielded.as_str()),
            ]);
        }
        Err(err) => {
            let reason = err.to_string();
            scope.fail(err.code(), &reason, err.is_fatal());
        }
    }
}
