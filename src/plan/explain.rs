//! Explain output for query plans
//!
//! Produces deterministic, human-readable output. Closures are opaque, so
//! operations are described by name and position only.

use std::fmt;

use serde::Serialize;

use super::operations::TerminalOperation;
use super::plan::QueryPlan;
use crate::errors::QueryError;

/// Explain plan output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExplainPlan {
    /// Whether validation succeeded
    pub accepted: bool,
    pub source_type: Option<String>,
    pub result_type: Option<String>,
    pub type_filter: Option<String>,
    /// Number of predicates, applied in declaration order
    pub predicates: usize,
    /// Sort keys in priority order
    pub sort: Vec<String>,
    pub while_partition: Option<String>,
    pub projection: bool,
    pub set_operations: Vec<String>,
    pub skip: Option<usize>,
    pub take: Option<usize>,
    pub skip_last: Option<usize>,
    pub take_last: Option<usize>,
    pub grouping: bool,
    pub join: Option<String>,
    pub terminal: Option<String>,
    pub requires_materialization: bool,
    /// Rejection error code (if rejected)
    pub rejection_code: Option<String>,
    /// Rejection reason (if rejected)
    pub rejection_reason: Option<String>,
}

impl ExplainPlan {
    /// Creates an explain plan from a validated query plan
    pub fn from_plan<S, R>(plan: &QueryPlan<S, R>) -> Self {
        let sort = plan
            .sort_keys
            .iter()
            .enumerate()
            .map(|(i, k)| format!("key#{} {}", i + 1, k.direction.as_str()))
            .collect();

        let terminal = plan.terminal.as_ref().map(|t| match t {
            TerminalOperation::Aggregate(a) => format!("aggregation {}", a.name()),
            TerminalOperation::Quantify(q) => format!("quantifier {}", q.name()),
            TerminalOperation::Convert(c) => format!("conversion {}", c.name()),
        });

        Self {
            accepted: true,
            source_type: Some(plan.source_type.to_string()),
            result_type: Some(plan.result_type.to_string()),
            type_filter: plan.type_filter.map(|k| k.as_str().to_string()),
            predicates: plan.predicates.len(),
            sort,
            while_partition: plan.while_partition.as_ref().map(|w| w.name().to_string()),
            projection: plan.has_projection,
            set_operations: plan
                .set_operations
                .iter()
                .map(|op| op.name().to_string())
                .collect(),
            skip: plan.skip,
            take: plan.take,
            skip_last: plan.skip_last,
            take_last: plan.take_last,
            grouping: plan.grouping.is_some(),
            join: plan.join.as_ref().map(|j| j.kind.as_str().to_string()),
            terminal,
            requires_materialization: plan.requires_materialization,
            rejection_code: None,
            rejection_reason: None,
        }
    }

    /// Creates an explain plan from a validation error
    pub fn from_error(err: &QueryError) -> Self {
        Self {
            accepted: false,
            source_type: None,
            result_type: None,
            type_filter: None,
            predicates: 0,
            sort: Vec::new(),
            while_partition: None,
            projection: false,
            set_operations: Vec::new(),
            skip: None,
            take: None,
            skip_last: None,
            take_last: None,
            grouping: false,
            join: None,
            terminal: None,
            requires_materialization: false,
            rejection_code: Some(err.code().to_string()),
            rejection_reason: Some(err.to_string()),
        }
    }
}

impl fmt::Display for ExplainPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== EXPLAIN PLAN ===")?;

        if !self.accepted {
            writeln!(f, "Status: REJECTED")?;
            if let Some(code) = &self.rejection_code {
                writeln!(f, "Error Code: {}", code)?;
            }
            if let Some(reason) = &self.rejection_reason {
                writeln!(f, "Reason: {}", reason)?;
            }
            return Ok(());
        }

        writeln!(f, "Status: ACCEPTED")?;
        if let (Some(source), Some(result)) = (&self.source_type, &self.result_type) {
            writeln!(f, "Shape: {} -> {}", source, result)?;
        }
        if let Some(kind) = &self.type_filter {
            writeln!(f, "Type Filter: {}", kind)?;
        }
        if self.predicates > 0 {
            writeln!(f, "Predicates: {}", self.predicates)?;
        }
        if !self.sort.is_empty() {
            writeln!(f, "Sort: {}", self.sort.join(", "))?;
        }
        if let Some(partition) = &self.while_partition {
            writeln!(f, "Partition: {}", partition)?;
        }
        if self.projection {
            writeln!(f, "Projection: yes")?;
        }
        if !self.set_operations.is_empty() {
            writeln!(f, "Set Operations: {}", self.set_operations.join(" -> "))?;
        }
        if let Some(skip) = self.skip {
            writeln!(f, "Skip: {}", skip)?;
        }
        if let Some(take) = self.take {
            writeln!(f, "Take: {}", take)?;
        }
        if let Some(n) = self.skip_last {
            writeln!(f, "Skip Last: {}", n)?;
        }
        if let Some(n) = self.take_last {
            writeln!(f, "Take Last: {}", n)?;
        }
        if self.grouping {
            writeln!(f, "Grouping: yes")?;
        }
        if let Some(join) = &self.join {
            writeln!(f, "Join: {}", join)?;
        }
        if let Some(terminal) = &self.terminal {
            writeln!(f, "Terminal: {}", terminal)?;
        }
        writeln!(
            f,
            "Execution: {}",
            if self.requires_materialization {
                "MATERIALIZED"
            } else {
                "STREAMING"
            }
        )
    }
}
