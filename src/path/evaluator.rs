//! Evaluator seam for path expressions
//!
//! Advanced RFC 9535 syntax (filters, functions, slices, recursive descent)
//! is not evaluated by this crate. Hosts inject an implementation.

use serde_json::Value;

use super::classifier::ClassifiedPath;
use super::tree;
use crate::errors::{QueryError, QueryResult};

/// Evaluates a path expression against a parsed document
pub trait PathEvaluator: Send + Sync {
    /// Returns the matched nodes in document order
    fn evaluate(&self, document: &Value, expression: &str) -> QueryResult<Vec<Value>>;
}

/// Built-in evaluator covering literal segments and `[*]`
///
/// Rejects advanced syntax.
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeNavigator;

impl PathEvaluator for TreeNavigator {
    fn evaluate(&self, document: &Value, expression: &str) -> QueryResult<Vec<Value>> {
        let path = ClassifiedPath::classify(expression)?;
        if path.is_advanced() {
            return Err(QueryError::invalid_path(
                expression,
                "advanced syntax requires an injected path evaluator",
            ));
        }
        Ok(tree::select_nodes(document, path.segments())
            .nodes
            .into_iter()
            .cloned()
            .collect())
    }
}
