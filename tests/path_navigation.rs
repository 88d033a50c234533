//! Path Navigation Tests
//!
//! Tests for queries scoped to a collection inside the document:
//! - direct navigation on the token stream
//! - branch collection for wildcards before the terminal segment
//! - fallbacks when navigation misses
//! - advanced paths delegated to an evaluator

use std::io::Cursor;
use std::sync::Arc;

use aerostream::path::{tree, ClassifiedPath, PathEvaluator, PathKind};
use aerostream::{
    BytesSource, ExecutionRoute, ExecutorConfig, QueryEngine, QueryPlan, QueryResult,
    StreamSource,
};
use serde::Deserialize;
use serde_json::{json, Value};

// =============================================================================
// Helper Functions
// =============================================================================

#[derive(Debug, Clone, Deserialize, PartialEq)]
struct Order {
    id: u32,
    total: f64,
}

const SHOP: &str = r#"{
    "shop": {"name": "north", "open": true},
    "orders": [
        {"id": 1, "total": 12.5},
        {"id": 2, "total": 99.0},
        {"id": 3, "total": 7.25},
        {"id": 4, "total": 150.0}
    ],
    "regions": [
        {"name": "east", "orders": [{"id": 10, "total": 1.0}, {"id": 11, "total": 2.0}]},
        {"name": "west", "orders": []},
        42,
        {"name": "south", "orders": [{"id": 12, "total": 3.0}]}
    ]
}"#;

fn engine() -> QueryEngine {
    QueryEngine::new(ExecutorConfig::default()).unwrap()
}

fn order_ids(orders: Vec<Order>) -> Vec<u32> {
    orders.into_iter().map(|o| o.id).collect()
}

/// Collects every member named `id`, depth-first
struct RecursiveIds;

impl PathEvaluator for RecursiveIds {
    fn evaluate(&self, document: &Value, _expression: &str) -> QueryResult<Vec<Value>> {
        fn walk(node: &Value, out: &mut Vec<Value>) {
            match node {
                Value::Object(map) => {
                    for (name, child) in map {
                        if name == "id" {
                            out.push(child.clone());
                        }
                        walk(child, out);
                    }
                }
                Value::Array(items) => items.iter().for_each(|item| walk(item, out)),
                _ => {}
            }
        }
        let mut out = Vec::new();
        walk(document, &mut out);
        Ok(out)
    }
}

// =============================================================================
// Classification Tests
// =============================================================================

/// Expressions are classified by their syntax alone.
#[test]
fn test_classification() {
    let cases = [
        ("$.orders", PathKind::BasicPath),
        ("$['orders']", PathKind::BasicPath),
        ("$.orders[*]", PathKind::SimpleWildcard),
        ("$.regions[*].orders[*]", PathKind::SimpleWildcard),
        ("$..id", PathKind::AdvancedRfc9535),
        ("$.orders[0]", PathKind::AdvancedRfc9535),
        ("$.orders[?(@.total > 10)]", PathKind::AdvancedRfc9535),
    ];
    for (expression, kind) in cases {
        let path = ClassifiedPath::classify(expression).unwrap();
        assert_eq!(path.kind(), kind, "{}", expression);
    }
}

// =============================================================================
// Direct Navigation Tests
// =============================================================================

/// A terminal wildcard selects the elements of the target array.
#[test]
fn test_simple_wildcard_path() {
    let plan = QueryPlan::<Value>::builder().build().unwrap();
    let mut source = BytesSource::from(r#"{"data":[{"id":1},{"id":2}]}"#);

    let result = engine().execute(&plan, &mut source, Some("$.data[*]")).unwrap();

    assert_eq!(result.stats.route, ExecutionRoute::PathNavigation);
    assert_eq!(
        result.into_sequence().unwrap(),
        vec![json!({"id": 1}), json!({"id": 2})]
    );
}

/// Member names match case-insensitively.
#[test]
fn test_case_insensitive_members() {
    let plan = QueryPlan::<Order>::builder().build().unwrap();
    let result = engine()
        .execute(&plan, &mut BytesSource::from(SHOP), Some("$.ORDERS[*]"))
        .unwrap();
    assert_eq!(order_ids(result.into_sequence().unwrap()), vec![1, 2, 3, 4]);
}

/// Predicates and take run on the navigated collection.
#[test]
fn test_filter_and_take_on_path() {
    let plan = QueryPlan::<Order>::builder()
        .filter(|o| o.total > 10.0)
        .take(2)
        .build()
        .unwrap();
    let result = engine()
        .execute(&plan, &mut BytesSource::from(SHOP), Some("$.orders[*]"))
        .unwrap();

    assert!(result.stats.early_terminated);
    assert_eq!(result.stats.elements_read, 2);
    assert_eq!(order_ids(result.into_sequence().unwrap()), vec![1, 2]);
}

/// A basic path to an array behaves like a terminal wildcard.
#[test]
fn test_basic_path_to_array() {
    let plan = QueryPlan::<Order>::builder()
        .order_by_descending(|o| o.total)
        .select(|o: Order| o.id)
        .build()
        .unwrap();
    let result = engine()
        .execute(&plan, &mut BytesSource::from(SHOP), Some("$.orders"))
        .unwrap();
    assert_eq!(result.into_sequence().unwrap(), vec![4, 2, 1, 3]);
}

/// A basic path to an object yields that object alone.
#[test]
fn test_basic_path_to_object() {
    let plan = QueryPlan::<Value>::builder().build().unwrap();
    let result = engine()
        .execute(&plan, &mut BytesSource::from(SHOP), Some("$.shop"))
        .unwrap();
    assert_eq!(
        result.into_sequence().unwrap(),
        vec![json!({"name": "north", "open": true})]
    );
}

/// Forward-only sources can be navigated directly.
#[test]
fn test_navigation_on_forward_only_source() {
    let plan = QueryPlan::<Order>::builder().skip(3).build().unwrap();
    let mut source = StreamSource::new(Cursor::new(SHOP.as_bytes().to_vec()));
    let result = engine()
        .execute(&plan, &mut source, Some("$.orders[*]"))
        .unwrap();
    assert_eq!(order_ids(result.into_sequence().unwrap()), vec![4]);
}

// =============================================================================
// Branch Collection Tests
// =============================================================================

/// Nested wildcards collect leaf elements in document order.
#[test]
fn test_nested_wildcards() {
    let plan = QueryPlan::<Value>::builder().build().unwrap();
    let mut source = BytesSource::from(r#"{"a":[{"b":[1,2]},{"b":[3]}]}"#);

    let result = engine()
        .execute(&plan, &mut source, Some("$.a[*].b[*]"))
        .unwrap();

    assert_eq!(result.stats.route, ExecutionRoute::BranchCollection);
    assert_eq!(
        result.into_sequence().unwrap(),
        vec![json!(1), json!(2), json!(3)]
    );
}

/// Branches of the wrong shape are skipped and counted.
#[test]
fn test_branch_collection_skips_scalars() {
    let plan = QueryPlan::<Order>::builder().build().unwrap();
    let result = engine()
        .execute(
            &plan,
            &mut BytesSource::from(SHOP),
            Some("$.regions[*].orders[*]"),
        )
        .unwrap();

    assert_eq!(result.stats.branches_skipped, 1);
    assert_eq!(order_ids(result.into_sequence().unwrap()), vec![10, 11, 12]);
}

// =============================================================================
// Fallback Tests
// =============================================================================

/// Token navigation and the tree fallback choose the same member when
/// several names differ only by case.
#[test]
fn test_tree_fallback_matches_like_navigation() {
    // navigation takes "X" and misses "y"; the tree takes "X" as well
    let doc = r#"{"X": {"z": 1}, "x": {"y": [5, 6]}}"#;
    let plan = QueryPlan::<u32>::builder().build().unwrap();
    let engine = engine();

    let result = engine
        .execute(&plan, &mut BytesSource::from(doc), Some("$.x.y"))
        .unwrap();

    assert_eq!(result.stats.route, ExecutionRoute::TreeFallback);
    assert!(result.stats.fallback_used);
    assert!(result.into_sequence().unwrap().is_empty());
    assert_eq!(engine.metrics().path_fallbacks, 1);
}

/// The first case-insensitive match wins on both routes.
#[test]
fn test_duplicate_names_by_case() {
    let doc = r#"{"name": [1], "NAME": [2]}"#;
    let plan = QueryPlan::<u32>::builder().build().unwrap();
    let engine = engine();

    let navigated = engine
        .execute(&plan, &mut BytesSource::from(doc), Some("$.NAME[*]"))
        .unwrap();
    assert_eq!(navigated.stats.route, ExecutionRoute::PathNavigation);
    assert_eq!(navigated.into_sequence().unwrap(), vec![1]);

    let document: Value = serde_json::from_str(doc).unwrap();
    let path = ClassifiedPath::classify("$.NAME[*]").unwrap();
    assert_eq!(tree::resolve(&document, &path), vec![json!(1)]);
}

/// A missing member selects nothing.
#[test]
fn test_missing_member_is_empty() {
    let plan = QueryPlan::<Value>::builder().count().build().unwrap();
    let result = engine()
        .execute(&plan, &mut BytesSource::from(SHOP), Some("$.refunds[*]"))
        .unwrap();
    assert_eq!(result.stats.route, ExecutionRoute::TreeFallback);
    assert_eq!(result.output.as_scalar(), Some(&json!(0)));
}

/// Forward-only sources cannot be re-read; a miss yields an empty result.
#[test]
fn test_forward_only_miss() {
    let plan = QueryPlan::<Value>::builder().build().unwrap();
    let mut source = StreamSource::new(Cursor::new(SHOP.as_bytes().to_vec()));
    let result = engine()
        .execute(&plan, &mut source, Some("$.refunds"))
        .unwrap();
    assert_eq!(result.stats.route, ExecutionRoute::ForwardOnlyFallback);
    assert!(result.is_empty());
}

/// Tree fallback can be turned off.
#[test]
fn test_tree_fallback_disabled() {
    let config = ExecutorConfig {
        allow_tree_fallback: false,
        ..Default::default()
    };
    let engine = QueryEngine::new(config).unwrap();
    let plan = QueryPlan::<Value>::builder().build().unwrap();
    let result = engine
        .execute(&plan, &mut BytesSource::from(SHOP), Some("$.refunds"))
        .unwrap();
    assert_eq!(result.stats.route, ExecutionRoute::ForwardOnlyFallback);
}

// =============================================================================
// Advanced Path Tests
// =============================================================================

/// Advanced syntax without an evaluator is rejected before reading.
#[test]
fn test_advanced_path_without_evaluator() {
    let plan = QueryPlan::<Value>::builder().build().unwrap();
    let err = engine()
        .execute(&plan, &mut BytesSource::from(SHOP), Some("$..id"))
        .unwrap_err();
    assert_eq!(err.code(), "AERO_INVALID_PATH");
}

/// Advanced paths are handed to the injected evaluator.
#[test]
fn test_advanced_path_with_evaluator() {
    let engine = engine().with_evaluator(Arc::new(RecursiveIds));
    let plan = QueryPlan::<u32>::builder()
        .filter(|id| *id >= 10)
        .build()
        .unwrap();
    let result = engine
        .execute(&plan, &mut BytesSource::from(SHOP), Some("$..id"))
        .unwrap();

    assert_eq!(result.stats.route, ExecutionRoute::AdvancedEvaluation);
    assert_eq!(result.into_sequence().unwrap(), vec![10, 11, 12]);
}

/// A malformed document is fatal on every route.
#[test]
fn test_broken_document_on_each_route() {
    let broken = r#"{"a": [{"b": [1, 2]}, {"b": [3}]}"#;
    let plan = QueryPlan::<Value>::builder().build().unwrap();
    let engine = engine().with_evaluator(Arc::new(RecursiveIds));

    for path in ["$.a[*]", "$.a[*].b[*]", "$..id"] {
        let err = engine
            .execute(&plan, &mut BytesSource::from(broken), Some(path))
            .unwrap_err();
        assert_eq!(err.code(), "AERO_DOCUMENT_PARSE", "{}", path);
    }
}

/// Members skipped on the way to the target must still be well-formed.
#[test]
fn test_malformed_sibling_member_is_fatal() {
    let plan = QueryPlan::<u32>::builder().build().unwrap();
    let engine = engine();

    for doc in [
        r#"{"junk": {nonsense tokens}, "data": [1, 2]}"#,
        r#"{"junk": [1 2], "data": [1, 2]}"#,
        r#"{"data": [1, 2], "junk": {"a" 1}}"#,
    ] {
        let err = engine
            .execute(&plan, &mut BytesSource::from(doc), Some("$.data[*]"))
            .unwrap_err();
        assert_eq!(err.code(), "AERO_DOCUMENT_PARSE", "{}", doc);
    }

    let err = engine
        .execute(
            &plan,
            &mut BytesSource::from(r#"{"a": [{"skip": {x}, "b": [1]}]}"#),
            Some("$.a[*].b[*]"),
        )
        .unwrap_err();
    assert_eq!(err.code(), "AERO_DOCUMENT_PARSE");
}
