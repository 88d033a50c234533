//! Operations over a materialized buffer
//!
//! Applies the whole plan pipeline to an in-memory sequence. Used whenever a
//! plan needs a global view (sorting, set algebra, grouping, joins,
//! aggregation, tail partitioning). A failing operation never yields a
//! partial result.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::Value;

use super::result::{ExecutionStats, Group, QueryOutput};
use crate::errors::{QueryError, QueryResult};
use crate::plan::{
    Aggregation, Conversion, JoinKind, JoinSpec, Key, KeyFn, Quantifier, QueryPlan,
    SetOperation, SortDirection, SortKey, TerminalOperation, WhilePartition,
};

/// Executes plans against in-memory sequences
pub struct OperationExecutor;

impl OperationExecutor {
    /// Runs every stage of `plan` over `elements`
    pub fn execute<S, R: Clone>(elements: Vec<S>, plan: &QueryPlan<S, R>) -> QueryResult<QueryOutput<R>> {
        let mut stats = ExecutionStats::default();
        Self::run(elements, plan, &mut stats)
    }

    pub(crate) fn run<S, R: Clone>(
        elements: Vec<S>,
        plan: &QueryPlan<S, R>,
        stats: &mut ExecutionStats,
    ) -> QueryResult<QueryOutput<R>> {
        let mut elements: Vec<S> = elements
            .into_iter()
            .filter(|s| plan.predicates.iter().all(|p| p(s)))
            .collect();
        stats.elements_matched += elements.len() as u64;

        if !plan.sort_keys.is_empty() {
            elements = sort(elements, &plan.sort_keys);
        }

        if let Some(partition) = &plan.while_partition {
            elements = apply_while(elements, partition);
        }

        let mut results: Vec<R> = elements.into_iter().map(|s| (plan.projection)(s)).collect();

        for operation in &plan.set_operations {
            results = apply_set_operation(results, operation);
        }

        let skip = plan.skip.unwrap_or(0);
        let mut results: Vec<R> = match plan.take {
            Some(take) => results.into_iter().skip(skip).take(take).collect(),
            None => results.into_iter().skip(skip).collect(),
        };

        if let Some(n) = plan.skip_last {
            results.truncate(results.len().saturating_sub(n));
        }
        if let Some(n) = plan.take_last {
            let start = results.len().saturating_sub(n);
            results.drain(..start);
        }

        let output = if let Some(grouping) = &plan.grouping {
            QueryOutput::Groups(group(results, &grouping.key))
        } else if let Some(join) = &plan.join {
            QueryOutput::Joined(apply_join(&results, join))
        } else {
            match &plan.terminal {
                None => QueryOutput::Sequence(results),
                Some(TerminalOperation::Aggregate(a)) => aggregate(results, a)?,
                Some(TerminalOperation::Quantify(q)) => QueryOutput::Boolean(quantify(&results, q)),
                Some(TerminalOperation::Convert(c)) => convert(results, c)?,
            }
        };

        stats.elements_yielded += output.len() as u64;
        Ok(output)
    }
}

/// Stable multi-key sort with keys computed once per element
fn sort<S>(elements: Vec<S>, sort_keys: &[SortKey<S>]) -> Vec<S> {
    let mut keyed: Vec<(Vec<Key>, S)> = elements
        .into_iter()
        .map(|s| {
            let keys = sort_keys.iter().map(|k| (k.extractor)(&s)).collect();
            (keys, s)
        })
        .collect();

    keyed.sort_by(|(a, _), (b, _)| compare_keys(a, b, sort_keys));
    keyed.into_iter().map(|(_, s)| s).collect()
}

fn compare_keys<S>(a: &[Key], b: &[Key], sort_keys: &[SortKey<S>]) -> Ordering {
    for ((ka, kb), spec) in a.iter().zip(b).zip(sort_keys) {
        let ordering = match spec.direction {
            SortDirection::Asc => ka.cmp(kb),
            SortDirection::Desc => kb.cmp(ka),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn apply_while<S>(elements: Vec<S>, partition: &WhilePartition<S>) -> Vec<S> {
    match partition {
        WhilePartition::TakeWhile(p) => elements.into_iter().take_while(|s| p(s)).collect(),
        WhilePartition::SkipWhile(p) => elements.into_iter().skip_while(|s| p(s)).collect(),
    }
}

/// First occurrence of each key wins
fn distinct_by<R>(items: impl IntoIterator<Item = R>, key: &KeyFn<R>) -> Vec<R> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|r| seen.insert(key(r))).collect()
}

fn apply_set_operation<R: Clone>(results: Vec<R>, operation: &SetOperation<R>) -> Vec<R> {
    match operation {
        SetOperation::Distinct { key } => distinct_by(results, key),
        SetOperation::Union { other, key } => {
            distinct_by(results.into_iter().chain(other.iter().cloned()), key)
        }
        SetOperation::Intersect { other, key } => {
            let keep: HashSet<&Key> = other.iter().collect();
            let mut seen = HashSet::new();
            results
                .into_iter()
                .filter(|r| {
                    let k = key(r);
                    keep.contains(&k) && seen.insert(k)
                })
                .collect()
        }
        SetOperation::Except { other, key } => {
            let drop: HashSet<&Key> = other.iter().collect();
            let mut seen = HashSet::new();
            results
                .into_iter()
                .filter(|r| {
                    let k = key(r);
                    !drop.contains(&k) && seen.insert(k)
                })
                .collect()
        }
    }
}

fn group<R>(results: Vec<R>, key: &KeyFn<R>) -> Vec<Group<R>> {
    let mut groups: Vec<Group<R>> = Vec::new();
    let mut index: HashMap<Key, usize> = HashMap::new();

    for r in results {
        let k = key(&r);
        match index.get(&k) {
            Some(&i) => groups[i].elements.push(r),
            None => {
                index.insert(k.clone(), groups.len());
                groups.push(Group {
                    key: k,
                    elements: vec![r],
                });
            }
        }
    }
    groups
}

/// Hash join; null keys never match
fn apply_join<R>(outer: &[R], join: &JoinSpec<R>) -> Vec<Value> {
    let mut lookup: HashMap<Key, Vec<&Value>> = HashMap::new();
    for inner in &join.inner {
        let k = (join.inner_key)(inner);
        if !k.is_null() {
            lookup.entry(k).or_default().push(inner);
        }
    }

    match &join.kind {
        JoinKind::Inner(combine) => outer
            .iter()
            .flat_map(|o| {
                join_matches(&lookup, join, o)
                    .iter()
                    .map(move |inner| combine(o, *inner))
            })
            .collect(),
        JoinKind::Grouped(combine) => outer
            .iter()
            .map(|o| {
                let matched: Vec<Value> = join_matches(&lookup, join, o)
                    .iter()
                    .map(|v| (*v).clone())
                    .collect();
                combine(o, &matched)
            })
            .collect(),
    }
}

fn join_matches<'a, R>(
    lookup: &'a HashMap<Key, Vec<&'a Value>>,
    join: &JoinSpec<R>,
    outer: &R,
) -> &'a [&'a Value] {
    let k = (join.outer_key)(outer);
    if k.is_null() {
        return &[];
    }
    lookup.get(&k).map(Vec::as_slice).unwrap_or(&[])
}

/// Integral results render as integers
pub(crate) fn number_value(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

/// First element with the extreme key; `prefer` says which ordering replaces the current pick
fn extreme_by<R>(results: Vec<R>, key: &KeyFn<R>, prefer: Ordering) -> Option<R> {
    let mut best: Option<(Key, R)> = None;
    for r in results {
        let k = key(&r);
        let replace = match &best {
            None => true,
            Some((current, _)) => k.cmp(current) == prefer,
        };
        if replace {
            best = Some((k, r));
        }
    }
    best.map(|(_, r)| r)
}

fn extreme_value<R>(
    results: &[R],
    select: &(dyn Fn(&R) -> Value + Send + Sync),
    prefer: Ordering,
) -> Option<Value> {
    let mut best: Option<(Key, Value)> = None;
    for r in results {
        let value = select(r);
        let k = Key::from(&value);
        let replace = match &best {
            None => true,
            Some((current, _)) => k.cmp(current) == prefer,
        };
        if replace {
            best = Some((k, value));
        }
    }
    best.map(|(_, v)| v)
}

fn aggregate<R>(results: Vec<R>, aggregation: &Aggregation<R>) -> QueryResult<QueryOutput<R>> {
    let output = match aggregation {
        Aggregation::Count => QueryOutput::Scalar(Value::from(results.len() as u64)),
        Aggregation::Sum(f) => QueryOutput::Scalar(number_value(results.iter().map(|r| f(r)).sum())),
        Aggregation::Average(f) => {
            if results.is_empty() {
                return Err(QueryError::EmptySequence("average"));
            }
            let total: f64 = results.iter().map(|r| f(r)).sum();
            QueryOutput::Scalar(number_value(total / results.len() as f64))
        }
        Aggregation::Min(f) => QueryOutput::Scalar(
            extreme_value(&results, f.as_ref(), Ordering::Less)
                .ok_or(QueryError::EmptySequence("min"))?,
        ),
        Aggregation::Max(f) => QueryOutput::Scalar(
            extreme_value(&results, f.as_ref(), Ordering::Greater)
                .ok_or(QueryError::EmptySequence("max"))?,
        ),
        Aggregation::MinBy(key) => QueryOutput::Element(extreme_by(results, key, Ordering::Less)),
        Aggregation::MaxBy(key) => {
            QueryOutput::Element(extreme_by(results, key, Ordering::Greater))
        }
        Aggregation::Fold { seed, fold } => {
            QueryOutput::Scalar(results.iter().fold(seed.clone(), |acc, r| fold(acc, r)))
        }
    };
    Ok(output)
}

fn quantify<R>(results: &[R], quantifier: &Quantifier<R>) -> bool {
    match quantifier {
        Quantifier::All(p) => results.iter().all(|r| p(r)),
        Quantifier::Any(None) => !results.is_empty(),
        Quantifier::Any(Some(p)) => results.iter().any(|r| p(r)),
        Quantifier::Contains { value, eq } => results.iter().any(|r| eq(r, value)),
        Quantifier::SequenceEqual { other, eq } => {
            results.len() == other.len() && results.iter().zip(other).all(|(a, b)| eq(a, b))
        }
    }
}

fn convert<R>(results: Vec<R>, conversion: &Conversion<R>) -> QueryResult<QueryOutput<R>> {
    let output = match conversion {
        Conversion::ToList => QueryOutput::Sequence(results),
        Conversion::ToHashSet { key } => QueryOutput::Sequence(distinct_by(results, key)),
        Conversion::ToDictionary { key } => {
            let mut map = BTreeMap::new();
            for r in results {
                let k = key(&r);
                if map.contains_key(&k) {
                    return Err(QueryError::KeyCollision {
                        key: k.to_string(),
                        conversion: "to_dictionary",
                    });
                }
                map.insert(k, r);
            }
            QueryOutput::Dictionary(map)
        }
        Conversion::ToLookup { key } => QueryOutput::Groups(group(results, key)),
    };
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn people() -> Vec<Value> {
        vec![
            json!({"name": "ann", "age": 30, "team": "a"}),
            json!({"name": "bob", "age": 25, "team": "b"}),
            json!({"name": "cy", "age": 35, "team": "a"}),
            json!({"name": "dee", "age": 25, "team": "c"}),
        ]
    }

    fn age(v: &Value) -> i64 {
        v["age"].as_i64().unwrap_or(0)
    }

    fn names(output: QueryOutput<Value>) -> Vec<String> {
        output
            .into_sequence()
            .unwrap()
            .iter()
            .map(|v| v["name"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_stable_multi_key_sort() {
        let plan = QueryPlan::<Value>::builder()
            .order_by(age)
            .build()
            .unwrap();
        let out = OperationExecutor::execute(people(), &plan).unwrap();
        // bob and dee tie on age and keep input order
        assert_eq!(names(out), vec!["bob", "dee", "ann", "cy"]);

        let plan = QueryPlan::<Value>::builder()
            .order_by_descending(age)
            .then_by_descending(|v| v["name"].as_str().map(str::to_string))
            .build()
            .unwrap();
        let out = OperationExecutor::execute(people(), &plan).unwrap();
        assert_eq!(names(out), vec!["cy", "ann", "dee", "bob"]);
    }

    #[test]
    fn test_filter_sort_take() {
        let plan = QueryPlan::<Value>::builder()
            .filter(|v| age(v) > 25)
            .order_by(age)
            .take(1)
            .build()
            .unwrap();
        let out = OperationExecutor::execute(people(), &plan).unwrap();
        assert_eq!(names(out), vec!["ann"]);
    }

    #[test]
    fn test_set_operations_first_occurrence_wins() {
        let plan = QueryPlan::<Value>::builder()
            .distinct_by(age)
            .build()
            .unwrap();
        let out = OperationExecutor::execute(people(), &plan).unwrap();
        assert_eq!(names(out), vec!["ann", "bob", "cy"]);

        let plan = QueryPlan::<Value>::builder()
            .select(|v: Value| age(&v))
            .union(vec![25, 40, 40])
            .build()
            .unwrap();
        let out = OperationExecutor::execute(people(), &plan).unwrap();
        assert_eq!(out.into_sequence().unwrap(), vec![30, 25, 35, 40]);

        let plan = QueryPlan::<Value>::builder()
            .select(|v: Value| age(&v))
            .intersect(vec![25, 35])
            .build()
            .unwrap();
        let out = OperationExecutor::execute(people(), &plan).unwrap();
        assert_eq!(out.into_sequence().unwrap(), vec![25, 35]);

        let plan = QueryPlan::<Value>::builder()
            .select(|v: Value| age(&v))
            .except(vec![30])
            .build()
            .unwrap();
        let out = OperationExecutor::execute(people(), &plan).unwrap();
        assert_eq!(out.into_sequence().unwrap(), vec![25, 35]);
    }

    #[test]
    fn test_tail_partitioning() {
        let plan = QueryPlan::<i64>::builder().take_last(2).build().unwrap();
        let out = OperationExecutor::execute(vec![1, 2, 3, 4], &plan).unwrap();
        assert_eq!(out.into_sequence().unwrap(), vec![3, 4]);

        let plan = QueryPlan::<i64>::builder().skip_last(3).build().unwrap();
        let out = OperationExecutor::execute(vec![1, 2, 3, 4], &plan).unwrap();
        assert_eq!(out.into_sequence().unwrap(), vec![1]);

        let plan = QueryPlan::<i64>::builder().skip_last(10).build().unwrap();
        let out = OperationExecutor::execute(vec![1, 2], &plan).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_while_partitions() {
        let plan = QueryPlan::<i64>::builder().take_while(|n| *n < 3).build().unwrap();
        let out = OperationExecutor::execute(vec![1, 2, 3, 1], &plan).unwrap();
        assert_eq!(out.into_sequence().unwrap(), vec![1, 2]);

        let plan = QueryPlan::<i64>::builder().skip_while(|n| *n < 3).build().unwrap();
        let out = OperationExecutor::execute(vec![1, 2, 3, 1], &plan).unwrap();
        assert_eq!(out.into_sequence().unwrap(), vec![3, 1]);
    }

    #[test]
    fn test_grouping_first_seen_order() {
        let plan = QueryPlan::<Value>::builder()
            .group_by(|v| v["team"].as_str().map(str::to_string))
            .build()
            .unwrap();
        match OperationExecutor::execute(people(), &plan).unwrap() {
            QueryOutput::Groups(groups) => {
                let keys: Vec<Key> = groups.iter().map(|g| g.key.clone()).collect();
                assert_eq!(keys, vec![Key::from("a"), Key::from("b"), Key::from("c")]);
                assert_eq!(groups[0].elements.len(), 2);
            }
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[test]
    fn test_inner_join_and_group_join() {
        let teams = vec![
            json!({"id": "a", "lead": "x"}),
            json!({"id": "a", "lead": "y"}),
            json!({"id": "b", "lead": "z"}),
            json!({"id": null, "lead": "nobody"}),
        ];
        let team = |v: &Value| v["team"].as_str().map(str::to_string);
        let id = |v: &Value| v["id"].as_str().map(str::to_string);

        let plan = QueryPlan::<Value>::builder()
            .join(teams.clone(), team, id, |p, t| {
                json!([p["name"], t["lead"]])
            })
            .build()
            .unwrap();
        match OperationExecutor::execute(people(), &plan).unwrap() {
            QueryOutput::Joined(rows) => assert_eq!(
                rows,
                vec![
                    json!(["ann", "x"]),
                    json!(["ann", "y"]),
                    json!(["bob", "z"]),
                    json!(["cy", "x"]),
                    json!(["cy", "y"]),
                ]
            ),
            other => panic!("unexpected output {:?}", other),
        }

        let plan = QueryPlan::<Value>::builder()
            .group_join(teams, team, id, |p, matches| {
                json!({"name": p["name"], "leads": matches.len()})
            })
            .build()
            .unwrap();
        match OperationExecutor::execute(people(), &plan).unwrap() {
            QueryOutput::Joined(rows) => {
                assert_eq!(rows.len(), 4);
                assert_eq!(rows[0]["leads"], 2);
                assert_eq!(rows[3], json!({"name": "dee", "leads": 0}));
            }
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[test]
    fn test_null_keys_never_join() {
        let plan = QueryPlan::<Value>::builder()
            .join(
                vec![json!({"k": null})],
                |v: &Value| v.get("k").cloned(),
                |v: &Value| v.get("k").cloned(),
                |o, i| json!([o, i]),
            )
            .build()
            .unwrap();
        let out = OperationExecutor::execute(vec![json!({"k": null})], &plan).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_aggregations() {
        let run = |plan: QueryPlan<Value>| OperationExecutor::execute(people(), &plan).unwrap();

        let count = run(QueryPlan::<Value>::builder().count().build().unwrap());
        assert_eq!(count, QueryOutput::Scalar(json!(4)));

        let sum = run(QueryPlan::<Value>::builder().sum(|v| age(v) as f64).build().unwrap());
        assert_eq!(sum, QueryOutput::Scalar(json!(115)));

        let avg = run(QueryPlan::<Value>::builder().average(|v| age(v) as f64).build().unwrap());
        assert_eq!(avg.as_scalar().and_then(Value::as_f64), Some(28.75));

        let min = run(QueryPlan::<Value>::builder().min(age).build().unwrap());
        assert_eq!(min, QueryOutput::Scalar(json!(25)));

        let max = run(QueryPlan::<Value>::builder().max(|v| v["name"].clone()).build().unwrap());
        assert_eq!(max, QueryOutput::Scalar(json!("dee")));

        let min_by = run(QueryPlan::<Value>::builder().min_by(age).build().unwrap());
        assert_eq!(min_by, QueryOutput::Element(Some(people()[1].clone())));

        let max_by = run(QueryPlan::<Value>::builder().max_by(age).build().unwrap());
        assert_eq!(max_by, QueryOutput::Element(Some(people()[2].clone())));

        let fold = run(
            QueryPlan::<Value>::builder()
                .fold("", |acc, v| {
                    json!(format!("{}{}", acc.as_str().unwrap_or(""), v["name"].as_str().unwrap_or("")))
                })
                .build()
                .unwrap(),
        );
        assert_eq!(fold, QueryOutput::Scalar(json!("annbobcydee")));
    }

    #[test]
    fn test_empty_sequence_aggregations() {
        let empty: Vec<Value> = Vec::new();
        let run = |plan: QueryPlan<Value>| OperationExecutor::execute(empty.clone(), &plan);

        assert_eq!(
            run(QueryPlan::<Value>::builder().sum(|v| age(v) as f64).build().unwrap()).unwrap(),
            QueryOutput::Scalar(json!(0))
        );
        let err = run(QueryPlan::<Value>::builder().average(|v| age(v) as f64).build().unwrap())
            .unwrap_err();
        assert!(matches!(err, QueryError::EmptySequence("average")));
        assert!(run(QueryPlan::<Value>::builder().min(age).build().unwrap()).is_err());
        assert!(run(QueryPlan::<Value>::builder().max(age).build().unwrap()).is_err());
        assert_eq!(
            run(QueryPlan::<Value>::builder().min_by(age).build().unwrap()).unwrap(),
            QueryOutput::Element(None)
        );
        assert_eq!(
            run(QueryPlan::<Value>::builder().fold(7, |acc, _| acc).build().unwrap()).unwrap(),
            QueryOutput::Scalar(json!(7))
        );
        assert_eq!(
            run(QueryPlan::<Value>::builder().all(|_| false).build().unwrap()).unwrap(),
            QueryOutput::Boolean(true)
        );
        assert_eq!(
            run(QueryPlan::<Value>::builder().any().build().unwrap()).unwrap(),
            QueryOutput::Boolean(false)
        );
    }

    #[test]
    fn test_quantifiers() {
        let run = |plan: QueryPlan<Value>| {
            OperationExecutor::execute(people(), &plan)
                .unwrap()
                .as_bool()
                .unwrap()
        };
        assert!(run(QueryPlan::<Value>::builder().all(|v| age(v) >= 25).build().unwrap()));
        assert!(!run(QueryPlan::<Value>::builder().any_match(|v| age(v) > 40).build().unwrap()));
        assert!(run(QueryPlan::<Value>::builder().contains(people()[2].clone()).build().unwrap()));
        assert!(run(QueryPlan::<Value>::builder().sequence_equal(people()).build().unwrap()));
        assert!(!run(
            QueryPlan::<Value>::builder()
                .sequence_equal(people()[..3].to_vec())
                .build()
                .unwrap()
        ));
    }

    #[test]
    fn test_conversions() {
        let plan = QueryPlan::<Value>::builder()
            .to_dictionary(|v| v["name"].as_str().map(str::to_string))
            .build()
            .unwrap();
        match OperationExecutor::execute(people(), &plan).unwrap() {
            QueryOutput::Dictionary(map) => {
                assert_eq!(map.len(), 4);
                assert_eq!(map[&Key::from("cy")]["age"], 35);
            }
            other => panic!("unexpected output {:?}", other),
        }

        let plan = QueryPlan::<Value>::builder().to_dictionary(age).build().unwrap();
        let err = OperationExecutor::execute(people(), &plan).unwrap_err();
        assert!(matches!(
            err,
            QueryError::KeyCollision { conversion: "to_dictionary", .. }
        ));

        let plan = QueryPlan::<Value>::builder()
            .select(|v: Value| age(&v))
            .to_hash_set()
            .build()
            .unwrap();
        let out = OperationExecutor::execute(people(), &plan).unwrap();
        assert_eq!(out.into_sequence().unwrap(), vec![30, 25, 35]);

        let plan = QueryPlan::<Value>::builder().to_lookup(age).build().unwrap();
        let out = OperationExecutor::execute(people(), &plan).unwrap();
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_number_value() {
        assert_eq!(number_value(3.0), json!(3));
        assert_eq!(number_value(2.5), json!(2.5));
        assert_eq!(number_value(f64::NAN), Value::Null);
    }
}
