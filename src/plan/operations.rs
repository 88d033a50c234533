//! Operation specifications carried by a query plan
//!
//! Every user-supplied function is an opaque closure. Executors only call
//! them; nothing here inspects or re-serializes them.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::key::Key;

/// Boolean test over an element
pub type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Key extractor over an element
pub type KeyFn<T> = Arc<dyn Fn(&T) -> Key + Send + Sync>;

/// Projection from the source shape to the result shape
pub type Projection<S, R> = Arc<dyn Fn(S) -> R + Send + Sync>;

/// Numeric selector used by `sum` and `average`
pub type NumberFn<T> = Arc<dyn Fn(&T) -> f64 + Send + Sync>;

/// Value selector used by `min` and `max`
pub type ValueFn<T> = Arc<dyn Fn(&T) -> Value + Send + Sync>;

/// Element equality used by `contains` and `sequence_equal`
pub type EqFn<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// Key over the element's JSON serialization, i.e. structural equality
pub fn structural_key<T: Serialize + 'static>() -> KeyFn<T> {
    Arc::new(|element: &T| {
        serde_json::to_value(element)
            .map(Key::from)
            .unwrap_or(Key::Null)
    })
}

/// Equality over the element's JSON serialization
pub fn structural_eq<T: Serialize + 'static>() -> EqFn<T> {
    let key = structural_key::<T>();
    Arc::new(move |a: &T, b: &T| key(a) == key(b))
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// One sort key with its direction
pub struct SortKey<S> {
    pub extractor: KeyFn<S>,
    pub direction: SortDirection,
}

impl<S> Clone for SortKey<S> {
    fn clone(&self) -> Self {
        Self {
            extractor: Arc::clone(&self.extractor),
            direction: self.direction,
        }
    }
}

/// Predicate-driven partitioning over the source sequence
pub enum WhilePartition<S> {
    /// Yield while the predicate holds, stop at the first failure
    TakeWhile(Predicate<S>),
    /// Drop while the predicate holds, yield everything after
    SkipWhile(Predicate<S>),
}

impl<S> WhilePartition<S> {
    pub fn name(&self) -> &'static str {
        match self {
            WhilePartition::TakeWhile(_) => "take_while",
            WhilePartition::SkipWhile(_) => "skip_while",
        }
    }
}

/// Set algebra over the result sequence
///
/// The first occurrence of a key always wins.
pub enum SetOperation<R> {
    Distinct { key: KeyFn<R> },
    Union { other: Vec<R>, key: KeyFn<R> },
    Intersect { other: Vec<Key>, key: KeyFn<R> },
    Except { other: Vec<Key>, key: KeyFn<R> },
}

impl<R> SetOperation<R> {
    pub fn name(&self) -> &'static str {
        match self {
            SetOperation::Distinct { .. } => "distinct",
            SetOperation::Union { .. } => "union",
            SetOperation::Intersect { .. } => "intersect",
            SetOperation::Except { .. } => "except",
        }
    }
}

/// Group-by specification
pub struct GroupSpec<R> {
    pub key: KeyFn<R>,
}

/// Combiner of one join result
pub enum JoinKind<R> {
    /// One result per matching (outer, inner) pair
    Inner(Arc<dyn Fn(&R, &Value) -> Value + Send + Sync>),
    /// One result per outer element with all of its matches
    Grouped(Arc<dyn Fn(&R, &[Value]) -> Value + Send + Sync>),
}

impl<R> JoinKind<R> {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinKind::Inner(_) => "INNER",
            JoinKind::Grouped(_) => "GROUPED",
        }
    }
}

/// In-memory join against a caller-supplied inner sequence
pub struct JoinSpec<R> {
    pub inner: Vec<Value>,
    pub outer_key: KeyFn<R>,
    pub inner_key: KeyFn<Value>,
    pub kind: JoinKind<R>,
}

/// Aggregations reducing the sequence to one value
pub enum Aggregation<R> {
    Count,
    Sum(NumberFn<R>),
    Average(NumberFn<R>),
    Min(ValueFn<R>),
    Max(ValueFn<R>),
    MinBy(KeyFn<R>),
    MaxBy(KeyFn<R>),
    Fold {
        seed: Value,
        fold: Arc<dyn Fn(Value, &R) -> Value + Send + Sync>,
    },
}

impl<R> Aggregation<R> {
    pub fn name(&self) -> &'static str {
        match self {
            Aggregation::Count => "count",
            Aggregation::Sum(_) => "sum",
            Aggregation::Average(_) => "average",
            Aggregation::Min(_) => "min",
            Aggregation::Max(_) => "max",
            Aggregation::MinBy(_) => "min_by",
            Aggregation::MaxBy(_) => "max_by",
            Aggregation::Fold { .. } => "fold",
        }
    }
}

/// Quantifiers reducing the sequence to a boolean
pub enum Quantifier<R> {
    All(Predicate<R>),
    Any(Option<Predicate<R>>),
    Contains { value: R, eq: EqFn<R> },
    SequenceEqual { other: Vec<R>, eq: EqFn<R> },
}

impl<R> Quantifier<R> {
    pub fn name(&self) -> &'static str {
        match self {
            Quantifier::All(_) => "all",
            Quantifier::Any(_) => "any",
            Quantifier::Contains { .. } => "contains",
            Quantifier::SequenceEqual { .. } => "sequence_equal",
        }
    }

    /// Whether the answer can be decided element by element
    pub fn is_streamable(&self) -> bool {
        !matches!(self, Quantifier::SequenceEqual { .. })
    }
}

/// Conversions into a collection shape
pub enum Conversion<R> {
    ToList,
    ToHashSet { key: KeyFn<R> },
    ToDictionary { key: KeyFn<R> },
    ToLookup { key: KeyFn<R> },
}

impl<R> Conversion<R> {
    pub fn name(&self) -> &'static str {
        match self {
            Conversion::ToList => "to_list",
            Conversion::ToHashSet { .. } => "to_hash_set",
            Conversion::ToDictionary { .. } => "to_dictionary",
            Conversion::ToLookup { .. } => "to_lookup",
        }
    }

    /// Whether the conversion builds an indexed structure
    pub fn is_indexed(&self) -> bool {
        !matches!(self, Conversion::ToList)
    }
}

/// The single terminal operation a plan may end with
pub enum TerminalOperation<R> {
    Aggregate(Aggregation<R>),
    Quantify(Quantifier<R>),
    Convert(Conversion<R>),
}

impl<R> TerminalOperation<R> {
    pub fn name(&self) -> &'static str {
        match self {
            TerminalOperation::Aggregate(a) => a.name(),
            TerminalOperation::Quantify(q) => q.name(),
            TerminalOperation::Convert(c) => c.name(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TerminalOperation::Aggregate(_) => "aggregation",
            TerminalOperation::Quantify(_) => "quantifier",
            TerminalOperation::Convert(_) => "conversion",
        }
    }
}

impl<R> fmt::Debug for TerminalOperation<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind(), self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_structural_eq() {
        let eq = structural_eq::<Value>();
        assert!(eq(&json!({"a": 1, "b": [2]}), &json!({"b": [2], "a": 1})));
        assert!(!eq(&json!({"a": 1}), &json!(["a", 1])));
        assert!(!eq(&json!(9_007_199_254_740_992_u64), &json!(9_007_199_254_740_993_u64)));
    }

    #[test]
    fn test_structural_key_of_owned_type() {
        let key = structural_key::<Vec<String>>();
        assert_eq!(key(&vec!["x".to_string()]), Key::composite([Key::from("x")]));
    }
}
