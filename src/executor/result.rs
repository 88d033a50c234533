//! Result types for query execution

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::plan::Key;

/// Elements sharing one key, in first-seen order
#[derive(Debug, Clone, PartialEq)]
pub struct Group<R> {
    pub key: Key,
    pub elements: Vec<R>,
}

/// What a plan produced
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput<R> {
    /// Plain element sequence
    Sequence(Vec<R>),
    /// `group_by` and `to_lookup`
    Groups(Vec<Group<R>>),
    /// `join` and `group_join`
    Joined(Vec<Value>),
    /// `to_dictionary`
    Dictionary(BTreeMap<Key, R>),
    /// Aggregations producing a value
    Scalar(Value),
    /// `min_by` / `max_by`; `None` on an empty sequence
    Element(Option<R>),
    /// Quantifiers
    Boolean(bool),
}

impl<R> QueryOutput<R> {
    /// Number of top-level items
    pub fn len(&self) -> usize {
        match self {
            QueryOutput::Sequence(items) => items.len(),
            QueryOutput::Groups(groups) => groups.len(),
            QueryOutput::Joined(items) => items.len(),
            QueryOutput::Dictionary(map) => map.len(),
            QueryOutput::Element(element) => usize::from(element.is_some()),
            QueryOutput::Scalar(_) | QueryOutput::Boolean(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> &'static str {
        match self {
            QueryOutput::Sequence(_) => "sequence",
            QueryOutput::Groups(_) => "groups",
            QueryOutput::Joined(_) => "joined",
            QueryOutput::Dictionary(_) => "dictionary",
            QueryOutput::Scalar(_) => "scalar",
            QueryOutput::Element(_) => "element",
            QueryOutput::Boolean(_) => "boolean",
        }
    }

    pub fn as_sequence(&self) -> Option<&[R]> {
        match self {
            QueryOutput::Sequence(items) => Some(items),
            _ => None,
        }
    }

    pub fn into_sequence(self) -> Option<Vec<R>> {
        match self {
            QueryOutput::Sequence(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            QueryOutput::Scalar(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            QueryOutput::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

/// How the target collection was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionRoute {
    /// Top-level collection read directly
    #[default]
    Root,
    /// Path navigated on the token stream
    PathNavigation,
    /// Wildcard before the terminal segment; branches collected one by one
    BranchCollection,
    /// Advanced path handed to the injected evaluator
    AdvancedEvaluation,
    /// Navigation failed and the source was re-read as a tree
    TreeFallback,
    /// Navigation failed on a forward-only source; nothing selected
    ForwardOnlyFallback,
}

impl ExecutionRoute {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionRoute::Root => "root",
            ExecutionRoute::PathNavigation => "path_navigation",
            ExecutionRoute::BranchCollection => "branch_collection",
            ExecutionRoute::AdvancedEvaluation => "advanced_evaluation",
            ExecutionRoute::TreeFallback => "tree_fallback",
            ExecutionRoute::ForwardOnlyFallback => "forward_only_fallback",
        }
    }
}

impl fmt::Display for ExecutionRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Counters describing one execution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionStats {
    pub route: ExecutionRoute,
    /// Elements of the target collection that were looked at
    pub elements_read: u64,
    /// Elements that passed every predicate
    pub elements_matched: u64,
    pub elements_yielded: u64,
    /// Elements skipped because they did not fit the source shape
    pub elements_malformed: u64,
    /// Elements skipped by the type filter without being decoded
    pub elements_filtered_by_kind: u64,
    /// Branches dropped during path traversal because of their shape
    pub branches_skipped: u64,
    pub bytes_read: u64,
    /// Reading stopped before the end of the collection
    pub early_terminated: bool,
    pub materialized: bool,
    pub fallback_used: bool,
}

/// Result of query execution
#[derive(Debug, Clone)]
pub struct ExecutionResult<R> {
    pub output: QueryOutput<R>,
    pub stats: ExecutionStats,
}

impl<R> ExecutionResult<R> {
    pub fn new(output: QueryOutput<R>, stats: ExecutionStats) -> Self {
        Self { output, stats }
    }

    /// The yielded sequence, if the plan produced one
    pub fn into_sequence(self) -> Option<Vec<R>> {
        self.output.into_sequence()
    }

    pub fn len(&self) -> usize {
        self.output.len()
    }

    pub fn is_empty(&self) -> bool {
        self.output.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_output_len() {
        assert_eq!(QueryOutput::Sequence(vec![1, 2, 3]).len(), 3);
        assert_eq!(QueryOutput::<i32>::Element(None).len(), 0);
        assert_eq!(QueryOutput::<i32>::Boolean(false).len(), 1);
        assert!(QueryOutput::<i32>::Joined(vec![]).is_empty());
    }

    #[test]
    fn test_output_accessors() {
        let output: QueryOutput<i32> = QueryOutput::Scalar(json!(4));
        assert_eq!(output.as_scalar(), Some(&json!(4)));
        assert!(output.as_sequence().is_none());
        assert_eq!(output.kind(), "scalar");
        assert_eq!(QueryOutput::<i32>::Boolean(true).as_bool(), Some(true));
    }

    #[test]
    fn test_stats_serialize() {
        let stats = ExecutionStats {
            route: ExecutionRoute::BranchCollection,
            elements_read: 3,
            ..Default::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["route"], "branch_collection");
        assert_eq!(json["elements_read"], 3);
    }
}
