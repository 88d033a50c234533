//! Query plan and its validating builder
//!
//! A plan is a fixed pipeline, not a chain of calls. Whatever order the
//! builder methods are called in, execution applies:
//!
//! 1. type filter
//! 2. predicates (source shape)
//! 3. sort (source shape)
//! 4. take-while / skip-while (source shape)
//! 5. projection
//! 6. set operations (result shape, in declaration order)
//! 7. skip, then take
//! 8. skip-last, then take-last
//! 9. grouping, join or a terminal operation
//!
//! `build()` is the validator. A plan that comes out of it is immutable.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::explain::ExplainPlan;
use super::key::Key;
use super::operations::{
    structural_eq, structural_key, Aggregation, Conversion, GroupSpec, JoinKind, JoinSpec,
    Predicate, Projection, Quantifier, SetOperation, SortDirection, SortKey, TerminalOperation,
    WhilePartition,
};
use crate::errors::{QueryError, QueryResult};
use crate::observability::{warn_event, Event};
use crate::reader::JsonKind;

/// Immutable compiled description of one query
pub struct QueryPlan<S, R = S> {
    pub(crate) source_type: &'static str,
    pub(crate) result_type: &'static str,
    pub(crate) type_filter: Option<JsonKind>,
    pub(crate) predicates: Vec<Predicate<S>>,
    pub(crate) sort_keys: Vec<SortKey<S>>,
    pub(crate) while_partition: Option<WhilePartition<S>>,
    pub(crate) projection: Projection<S, R>,
    pub(crate) has_projection: bool,
    pub(crate) set_operations: Vec<SetOperation<R>>,
    pub(crate) skip: Option<usize>,
    pub(crate) take: Option<usize>,
    pub(crate) skip_last: Option<usize>,
    pub(crate) take_last: Option<usize>,
    pub(crate) grouping: Option<GroupSpec<R>>,
    pub(crate) join: Option<JoinSpec<R>>,
    pub(crate) terminal: Option<TerminalOperation<R>>,
    pub(crate) requires_materialization: bool,
}

impl<S: 'static> QueryPlan<S, S> {
    /// Starts a plan over elements of type `S`
    pub fn builder() -> PlanBuilder<S, S> {
        PlanBuilder::new()
    }
}

impl<S, R> QueryPlan<S, R> {
    pub fn source_type(&self) -> &'static str {
        self.source_type
    }

    pub fn result_type(&self) -> &'static str {
        self.result_type
    }

    pub fn type_filter(&self) -> Option<JsonKind> {
        self.type_filter
    }

    pub fn predicate_count(&self) -> usize {
        self.predicates.len()
    }

    pub fn has_projection(&self) -> bool {
        self.has_projection
    }

    pub fn skip(&self) -> Option<usize> {
        self.skip
    }

    pub fn take(&self) -> Option<usize> {
        self.take
    }

    /// Whether some operation needs the whole sequence at once.
    ///
    /// Computed once during validation.
    pub fn requires_materialization(&self) -> bool {
        self.requires_materialization
    }

    /// Name of the terminal operation, if any
    pub fn terminal_name(&self) -> Option<&'static str> {
        self.terminal.as_ref().map(|t| t.name())
    }

    /// Deterministic description of the pipeline
    pub fn explain(&self) -> ExplainPlan {
        ExplainPlan::from_plan(self)
    }

    /// A quantifier that can be decided inline while streaming.
    ///
    /// Only `all`, `any` and `contains` qualify, and only when nothing else
    /// in the plan needs a global view.
    pub(crate) fn streamable_quantifier(&self) -> Option<&Quantifier<R>> {
        match &self.terminal {
            Some(TerminalOperation::Quantify(q))
                if q.is_streamable() && !self.has_global_view_operation() =>
            {
                Some(q)
            }
            _ => None,
        }
    }

    /// Whether elements can be processed one at a time as they are read
    pub(crate) fn streams_inline(&self) -> bool {
        !self.requires_materialization || self.streamable_quantifier().is_some()
    }

    /// Whether the output is a plain element sequence
    pub(crate) fn yields_sequence(&self) -> bool {
        self.grouping.is_none()
            && self.join.is_none()
            && matches!(
                self.terminal,
                None | Some(TerminalOperation::Convert(Conversion::ToList))
            )
    }

    fn has_global_view_operation(&self) -> bool {
        !self.sort_keys.is_empty()
            || !self.set_operations.is_empty()
            || self.grouping.is_some()
            || self.join.is_some()
            || self.skip_last.is_some()
            || self.take_last.is_some()
    }

    fn compute_requires_materialization(&self) -> bool {
        let terminal_needs_view = match &self.terminal {
            None => false,
            Some(TerminalOperation::Convert(c)) => c.is_indexed(),
            Some(_) => true,
        };
        self.has_global_view_operation() || terminal_needs_view
    }
}

impl<S, R> fmt::Debug for QueryPlan<S, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryPlan")
            .field("source_type", &self.source_type)
            .field("result_type", &self.result_type)
            .field("type_filter", &self.type_filter)
            .field("predicates", &self.predicates.len())
            .field("sort_keys", &self.sort_keys.len())
            .field("skip", &self.skip)
            .field("take", &self.take)
            .field("terminal", &self.terminal)
            .field("requires_materialization", &self.requires_materialization)
            .finish()
    }
}

/// Builder and validator for [`QueryPlan`]
///
/// Invalid arguments are recorded and reported by `build()`, so calls can be
/// chained freely.
pub struct PlanBuilder<S, R> {
    type_filter: Option<JsonKind>,
    predicates: Vec<Predicate<S>>,
    sort_keys: Vec<SortKey<S>>,
    while_partition: Option<WhilePartition<S>>,
    projection: Projection<S, R>,
    has_projection: bool,
    set_operations: Vec<SetOperation<R>>,
    skip: Option<usize>,
    take: Option<usize>,
    skip_last: Option<usize>,
    take_last: Option<usize>,
    grouping: Option<GroupSpec<R>>,
    join: Option<JoinSpec<R>>,
    terminals: Vec<TerminalOperation<R>>,
    error: Option<QueryError>,
}

impl<S: 'static> PlanBuilder<S, S> {
    fn new() -> Self {
        Self {
            type_filter: None,
            predicates: Vec::new(),
            sort_keys: Vec::new(),
            while_partition: None,
            projection: Arc::new(|s: S| s),
            has_projection: false,
            set_operations: Vec::new(),
            skip: None,
            take: None,
            skip_last: None,
            take_last: None,
            grouping: None,
            join: None,
            terminals: Vec::new(),
            error: None,
        }
    }

    /// Projects each matched element into the result shape.
    ///
    /// Result-side operations (set algebra, grouping, join, terminal) must be
    /// declared after the projection.
    pub fn select<R, F>(mut self, f: F) -> PlanBuilder<S, R>
    where
        F: Fn(S) -> R + Send + Sync + 'static,
    {
        if self.has_result_operations() {
            self.record(QueryError::invalid_plan(
                "result-side operations must be declared after the projection",
            ));
        }

        let projection: Projection<S, R> = if self.has_projection {
            let previous = self.projection;
            Arc::new(move |s: S| f(previous(s)))
        } else {
            Arc::new(f)
        };

        PlanBuilder {
            type_filter: self.type_filter,
            predicates: self.predicates,
            sort_keys: self.sort_keys,
            while_partition: self.while_partition,
            projection,
            has_projection: true,
            set_operations: Vec::new(),
            skip: self.skip,
            take: self.take,
            skip_last: self.skip_last,
            take_last: self.take_last,
            grouping: None,
            join: None,
            terminals: Vec::new(),
            error: self.error,
        }
    }
}

impl<S: 'static, R: 'static> PlanBuilder<S, R> {
    fn record(&mut self, err: QueryError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn has_result_operations(&self) -> bool {
        !self.set_operations.is_empty()
            || self.grouping.is_some()
            || self.join.is_some()
            || !self.terminals.is_empty()
    }

    fn count_arg(&mut self, name: &str, n: i64) -> Option<usize> {
        if n < 0 {
            self.record(QueryError::invalid_plan(format!(
                "{} must be non-negative, got {}",
                name, n
            )));
            None
        } else {
            Some(n as usize)
        }
    }

    // ==================================================================
    // Source-side operations
    // ==================================================================

    /// Keeps elements matching the predicate (logical AND with earlier filters)
    pub fn filter<F>(mut self, f: F) -> Self
    where
        F: Fn(&S) -> bool + Send + Sync + 'static,
    {
        self.predicates.push(Arc::new(f));
        self
    }

    /// Keeps only elements whose JSON kind matches, without deserializing others
    pub fn of_kind(mut self, kind: JsonKind) -> Self {
        self.type_filter = Some(kind);
        self
    }

    /// Starts a new ordering, ascending
    pub fn order_by<K, F>(self, f: F) -> Self
    where
        K: Into<Key>,
        F: Fn(&S) -> K + Send + Sync + 'static,
    {
        self.order(f, SortDirection::Asc, true)
    }

    /// Starts a new ordering, descending
    pub fn order_by_descending<K, F>(self, f: F) -> Self
    where
        K: Into<Key>,
        F: Fn(&S) -> K + Send + Sync + 'static,
    {
        self.order(f, SortDirection::Desc, true)
    }

    /// Adds an ascending tie-breaker to the current ordering
    pub fn then_by<K, F>(self, f: F) -> Self
    where
        K: Into<Key>,
        F: Fn(&S) -> K + Send + Sync + 'static,
    {
        self.order(f, SortDirection::Asc, false)
    }

    /// Adds a descending tie-breaker to the current ordering
    pub fn then_by_descending<K, F>(self, f: F) -> Self
    where
        K: Into<Key>,
        F: Fn(&S) -> K + Send + Sync + 'static,
    {
        self.order(f, SortDirection::Desc, false)
    }

    fn order<K, F>(mut self, f: F, direction: SortDirection, reset: bool) -> Self
    where
        K: Into<Key>,
        F: Fn(&S) -> K + Send + Sync + 'static,
    {
        if reset {
            self.sort_keys.clear();
        }
        self.sort_keys.push(SortKey {
            extractor: Arc::new(move |s: &S| f(s).into()),
            direction,
        });
        self
    }

    /// Yields elements while the predicate holds, then stops reading
    pub fn take_while<F>(mut self, f: F) -> Self
    where
        F: Fn(&S) -> bool + Send + Sync + 'static,
    {
        self.while_partition = Some(WhilePartition::TakeWhile(Arc::new(f)));
        self
    }

    /// Drops elements while the predicate holds
    pub fn skip_while<F>(mut self, f: F) -> Self
    where
        F: Fn(&S) -> bool + Send + Sync + 'static,
    {
        self.while_partition = Some(WhilePartition::SkipWhile(Arc::new(f)));
        self
    }

    // ==================================================================
    // Partitioning
    // ==================================================================

    pub fn skip(mut self, n: i64) -> Self {
        self.skip = self.count_arg("skip", n);
        self
    }

    pub fn take(mut self, n: i64) -> Self {
        self.take = self.count_arg("take", n);
        self
    }

    pub fn skip_last(mut self, n: i64) -> Self {
        self.skip_last = self.count_arg("skip_last", n);
        self
    }

    pub fn take_last(mut self, n: i64) -> Self {
        self.take_last = self.count_arg("take_last", n);
        self
    }

    // ==================================================================
    // Set algebra
    // ==================================================================

    pub fn distinct_by<K, F>(mut self, f: F) -> Self
    where
        K: Into<Key>,
        F: Fn(&R) -> K + Send + Sync + 'static,
    {
        self.set_operations.push(SetOperation::Distinct {
            key: Arc::new(move |r: &R| f(r).into()),
        });
        self
    }

    pub fn union_by<K, F>(mut self, other: Vec<R>, f: F) -> Self
    where
        K: Into<Key>,
        F: Fn(&R) -> K + Send + Sync + 'static,
    {
        self.set_operations.push(SetOperation::Union {
            other,
            key: Arc::new(move |r: &R| f(r).into()),
        });
        self
    }

    /// Keeps elements whose key appears in `keys`
    pub fn intersect_by<K, F>(mut self, keys: Vec<Key>, f: F) -> Self
    where
        K: Into<Key>,
        F: Fn(&R) -> K + Send + Sync + 'static,
    {
        self.set_operations.push(SetOperation::Intersect {
            other: keys,
            key: Arc::new(move |r: &R| f(r).into()),
        });
        self
    }

    /// Drops elements whose key appears in `keys`
    pub fn except_by<K, F>(mut self, keys: Vec<Key>, f: F) -> Self
    where
        K: Into<Key>,
        F: Fn(&R) -> K + Send + Sync + 'static,
    {
        self.set_operations.push(SetOperation::Except {
            other: keys,
            key: Arc::new(move |r: &R| f(r).into()),
        });
        self
    }

    // ==================================================================
    // Grouping and joins
    // ==================================================================

    pub fn group_by<K, F>(mut self, f: F) -> Self
    where
        K: Into<Key>,
        F: Fn(&R) -> K + Send + Sync + 'static,
    {
        self.grouping = Some(GroupSpec {
            key: Arc::new(move |r: &R| f(r).into()),
        });
        self
    }

    /// Inner join: one combined value per matching (outer, inner) pair
    pub fn join<KO, KI, FO, FI, C>(mut self, inner: Vec<Value>, outer_key: FO, inner_key: FI, combine: C) -> Self
    where
        KO: Into<Key>,
        KI: Into<Key>,
        FO: Fn(&R) -> KO + Send + Sync + 'static,
        FI: Fn(&Value) -> KI + Send + Sync + 'static,
        C: Fn(&R, &Value) -> Value + Send + Sync + 'static,
    {
        self.join = Some(JoinSpec {
            inner,
            outer_key: Arc::new(move |r: &R| outer_key(r).into()),
            inner_key: Arc::new(move |v: &Value| inner_key(v).into()),
            kind: JoinKind::Inner(Arc::new(combine)),
        });
        self
    }

    /// Group join: one combined value per outer element with all its matches
    pub fn group_join<KO, KI, FO, FI, C>(
        mut self,
        inner: Vec<Value>,
        outer_key: FO,
        inner_key: FI,
        combine: C,
    ) -> Self
    where
        KO: Into<Key>,
        KI: Into<Key>,
        FO: Fn(&R) -> KO + Send + Sync + 'static,
        FI: Fn(&Value) -> KI + Send + Sync + 'static,
        C: Fn(&R, &[Value]) -> Value + Send + Sync + 'static,
    {
        self.join = Some(JoinSpec {
            inner,
            outer_key: Arc::new(move |r: &R| outer_key(r).into()),
            inner_key: Arc::new(move |v: &Value| inner_key(v).into()),
            kind: JoinKind::Grouped(Arc::new(combine)),
        });
        self
    }

    // ==================================================================
    // Terminal operations
    // ==================================================================

    fn aggregate(mut self, aggregation: Aggregation<R>) -> Self {
        self.terminals.push(TerminalOperation::Aggregate(aggregation));
        self
    }

    fn quantify(mut self, quantifier: Quantifier<R>) -> Self {
        self.terminals.push(TerminalOperation::Quantify(quantifier));
        self
    }

    fn convert(mut self, conversion: Conversion<R>) -> Self {
        self.terminals.push(TerminalOperation::Convert(conversion));
        self
    }

    pub fn count(self) -> Self {
        self.aggregate(Aggregation::Count)
    }

    pub fn sum<N, F>(self, f: F) -> Self
    where
        N: Into<f64>,
        F: Fn(&R) -> N + Send + Sync + 'static,
    {
        self.aggregate(Aggregation::Sum(Arc::new(move |r: &R| f(r).into())))
    }

    pub fn average<N, F>(self, f: F) -> Self
    where
        N: Into<f64>,
        F: Fn(&R) -> N + Send + Sync + 'static,
    {
        self.aggregate(Aggregation::Average(Arc::new(move |r: &R| f(r).into())))
    }

    pub fn min<V, F>(self, f: F) -> Self
    where
        V: Into<Value>,
        F: Fn(&R) -> V + Send + Sync + 'static,
    {
        self.aggregate(Aggregation::Min(Arc::new(move |r: &R| f(r).into())))
    }

    pub fn max<V, F>(self, f: F) -> Self
    where
        V: Into<Value>,
        F: Fn(&R) -> V + Send + Sync + 'static,
    {
        self.aggregate(Aggregation::Max(Arc::new(move |r: &R| f(r).into())))
    }

    pub fn min_by<K, F>(self, f: F) -> Self
    where
        K: Into<Key>,
        F: Fn(&R) -> K + Send + Sync + 'static,
    {
        self.aggregate(Aggregation::MinBy(Arc::new(move |r: &R| f(r).into())))
    }

    pub fn max_by<K, F>(self, f: F) -> Self
    where
        K: Into<Key>,
        F: Fn(&R) -> K + Send + Sync + 'static,
    {
        self.aggregate(Aggregation::MaxBy(Arc::new(move |r: &R| f(r).into())))
    }

    pub fn fold<F>(self, seed: impl Into<Value>, f: F) -> Self
    where
        F: Fn(Value, &R) -> Value + Send + Sync + 'static,
    {
        self.aggregate(Aggregation::Fold {
            seed: seed.into(),
            fold: Arc::new(f),
        })
    }

    pub fn all<F>(self, f: F) -> Self
    where
        F: Fn(&R) -> bool + Send + Sync + 'static,
    {
        self.quantify(Quantifier::All(Arc::new(f)))
    }

    /// True when the sequence has at least one element
    pub fn any(self) -> Self {
        self.quantify(Quantifier::Any(None))
    }

    /// True when some element matches
    pub fn any_match<F>(self, f: F) -> Self
    where
        F: Fn(&R) -> bool + Send + Sync + 'static,
    {
        self.quantify(Quantifier::Any(Some(Arc::new(f))))
    }

    pub fn contains_by<F>(self, value: R, eq: F) -> Self
    where
        F: Fn(&R, &R) -> bool + Send + Sync + 'static,
    {
        self.quantify(Quantifier::Contains {
            value,
            eq: Arc::new(eq),
        })
    }

    pub fn sequence_equal_by<F>(self, other: Vec<R>, eq: F) -> Self
    where
        F: Fn(&R, &R) -> bool + Send + Sync + 'static,
    {
        self.quantify(Quantifier::SequenceEqual {
            other,
            eq: Arc::new(eq),
        })
    }

    pub fn to_list(self) -> Self {
        self.convert(Conversion::ToList)
    }

    pub fn to_hash_set_by<K, F>(self, f: F) -> Self
    where
        K: Into<Key>,
        F: Fn(&R) -> K + Send + Sync + 'static,
    {
        self.convert(Conversion::ToHashSet {
            key: Arc::new(move |r: &R| f(r).into()),
        })
    }

    /// Fails at execution with a key collision if two elements share a key
    pub fn to_dictionary<K, F>(self, f: F) -> Self
    where
        K: Into<Key>,
        F: Fn(&R) -> K + Send + Sync + 'static,
    {
        self.convert(Conversion::ToDictionary {
            key: Arc::new(move |r: &R| f(r).into()),
        })
    }

    pub fn to_lookup<K, F>(self, f: F) -> Self
    where
        K: Into<Key>,
        F: Fn(&R) -> K + Send + Sync + 'static,
    {
        self.convert(Conversion::ToLookup {
            key: Arc::new(move |r: &R| f(r).into()),
        })
    }

    // ==================================================================
    // Validation
    // ==================================================================

    /// Validates the plan and computes its cached properties
    pub fn build(self) -> QueryResult<QueryPlan<S, R>> {
        match self.validate() {
            Ok(plan) => Ok(plan),
            Err(err) => {
                let reason = err.to_string();
                warn_event(
                    Event::PlanRejected,
                    &[("code", err.code()), ("reason", reason.as_str())],
                );
                Err(err)
            }
        }
    }

    fn validate(mut self) -> QueryResult<QueryPlan<S, R>> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }

        if self.terminals.len() > 1 {
            let names: Vec<&str> = self.terminals.iter().map(|t| t.name()).collect();
            return Err(QueryError::invalid_plan(format!(
                "at most one terminal operation is allowed, got {}",
                names.join(", ")
            )));
        }

        if self.grouping.is_some() && self.join.is_some() {
            return Err(QueryError::invalid_plan(
                "grouping and join cannot be combined",
            ));
        }

        let terminal = self.terminals.pop();
        if let Some(t) = &terminal {
            if self.grouping.is_some() || self.join.is_some() {
                return Err(QueryError::invalid_plan(format!(
                    "{} cannot follow a grouping or join",
                    t.name()
                )));
            }
        }

        let mut plan = QueryPlan {
            source_type: std::any::type_name::<S>(),
            result_type: std::any::type_name::<R>(),
            type_filter: self.type_filter,
            predicates: self.predicates,
            sort_keys: self.sort_keys,
            while_partition: self.while_partition,
            projection: self.projection,
            has_projection: self.has_projection,
            set_operations: self.set_operations,
            skip: self.skip,
            take: self.take,
            skip_last: self.skip_last,
            take_last: self.take_last,
            grouping: self.grouping,
            join: self.join,
            terminal,
            requires_materialization: false,
        };
        plan.requires_materialization = plan.compute_requires_materialization();
        Ok(plan)
    }
}

/// Operations whose default key is the element's JSON serialization
impl<S: 'static, R: Serialize + 'static> PlanBuilder<S, R> {
    pub fn distinct(mut self) -> Self {
        self.set_operations.push(SetOperation::Distinct {
            key: structural_key::<R>(),
        });
        self
    }

    pub fn union(mut self, other: Vec<R>) -> Self {
        self.set_operations.push(SetOperation::Union {
            other,
            key: structural_key::<R>(),
        });
        self
    }

    pub fn intersect(mut self, other: Vec<R>) -> Self {
        let key = structural_key::<R>();
        let keys = other.iter().map(|r| key(r)).collect();
        self.set_operations.push(SetOperation::Intersect { other: keys, key });
        self
    }

    pub fn except(mut self, other: Vec<R>) -> Self {
        let key = structural_key::<R>();
        let keys = other.iter().map(|r| key(r)).collect();
        self.set_operations.push(SetOperation::Except { other: keys, key });
        self
    }

    pub fn contains(self, value: R) -> Self {
        self.quantify(Quantifier::Contains {
            value,
            eq: structural_eq::<R>(),
        })
    }

    pub fn sequence_equal(self, other: Vec<R>) -> Self {
        self.quantify(Quantifier::SequenceEqual {
            other,
            eq: structural_eq::<R>(),
        })
    }

    pub fn to_hash_set(self) -> Self {
        self.convert(Conversion::ToHashSet {
            key: structural_key::<R>(),
        })
    }
}
