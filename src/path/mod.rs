//! Path expressions
//!
//! Expressions are classified once per executor. Simple paths are navigated
//! directly on the token stream; advanced ones go to a `PathEvaluator`.

mod classifier;
mod evaluator;
pub mod tree;

pub use classifier::{ClassifiedPath, PathKind, PathSegment};
pub use evaluator::{PathEvaluator, TreeNavigator};
