//! Case-insensitive navigation over a parsed document tree
//!
//! Used when the token stream cannot be navigated directly: the fallback
//! re-read of a rewindable source and in-memory buffers.

use serde_json::{Map, Value};

use super::classifier::{ClassifiedPath, PathKind, PathSegment};

/// Nodes selected by a path, in document order
#[derive(Debug, Default)]
pub struct Selection<'a> {
    pub nodes: Vec<&'a Value>,
    /// Branches dropped because a node had the wrong shape for the next segment
    pub skipped_branches: usize,
}

/// Finds the first member, in document order, whose name matches
/// case-insensitively. Token navigation picks the same member.
pub fn find_member<'a>(map: &'a Map<String, Value>, segment: &PathSegment) -> Option<&'a Value> {
    if !matches!(segment, PathSegment::Property(_)) {
        return None;
    }
    map.iter()
        .find(|(k, _)| segment.matches_name(k))
        .map(|(_, v)| v)
}

/// Selects every node reached by `segments`, depth-first
pub fn select_nodes<'a>(root: &'a Value, segments: &[PathSegment]) -> Selection<'a> {
    let mut selection = Selection::default();
    walk(root, segments, &mut selection);
    selection
}

fn walk<'a>(node: &'a Value, segments: &[PathSegment], out: &mut Selection<'a>) {
    let Some((segment, rest)) = segments.split_first() else {
        out.nodes.push(node);
        return;
    };

    match (segment, node) {
        (PathSegment::Wildcard, Value::Array(items)) => {
            for item in items {
                walk(item, rest, out);
            }
        }
        (PathSegment::Property(_), Value::Object(map)) => {
            if let Some(child) = find_member(map, segment) {
                walk(child, rest, out);
            }
        }
        _ => out.skipped_branches += 1,
    }
}

/// Turns selected nodes into the collection a plan runs over.
///
/// A basic path that selects a single array yields that array's elements.
pub fn into_collection(nodes: Vec<Value>, kind: PathKind) -> Vec<Value> {
    if kind == PathKind::BasicPath && nodes.len() == 1 {
        let mut nodes = nodes;
        return match nodes.pop() {
            Some(Value::Array(items)) => items,
            Some(other) => vec![other],
            None => Vec::new(),
        };
    }
    nodes
}

/// Resolves a classified, non-advanced path against a tree
pub fn resolve(root: &Value, path: &ClassifiedPath) -> Vec<Value> {
    let selection = select_nodes(root, path.segments());
    into_collection(
        selection.nodes.into_iter().cloned().collect(),
        path.kind(),
    )
}
