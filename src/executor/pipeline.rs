//! Per-element pipeline for streamable plans
//!
//! Shared by the blocking, async and in-memory routes. Holds the running
//! skip/take counters and decides, element by element, whether to yield,
//! pass, or stop reading altogether.

use super::result::{ExecutionStats, QueryOutput};
use crate::plan::{Quantifier, QueryPlan, WhilePartition};

/// Outcome of offering one element to the pipeline
#[derive(Debug, PartialEq)]
pub(crate) enum Admit<R> {
    Yield(R),
    /// Element consumed without output
    Pass,
    /// No later element can produce output
    Stop,
}

/// Running state of predicates, while-partition, skip, projection and take
pub(crate) struct ElementPipeline<'p, S, R> {
    plan: &'p QueryPlan<S, R>,
    skip_remaining: usize,
    take_remaining: Option<usize>,
    skipping_while: bool,
    stopped: bool,
}

impl<'p, S, R> ElementPipeline<'p, S, R> {
    pub(crate) fn new(plan: &'p QueryPlan<S, R>) -> Self {
        Self {
            plan,
            skip_remaining: plan.skip.unwrap_or(0),
            take_remaining: plan.take,
            skipping_while: matches!(plan.while_partition, Some(WhilePartition::SkipWhile(_))),
            stopped: false,
        }
    }

    /// No further element can be yielded; reading may stop
    pub(crate) fn exhausted(&self) -> bool {
        self.stopped || self.take_remaining == Some(0)
    }

    pub(crate) fn offer(&mut self, element: S, stats: &mut ExecutionStats) -> Admit<R> {
        if self.exhausted() {
            return Admit::Stop;
        }
        if !self.plan.predicates.iter().all(|p| p(&element)) {
            return Admit::Pass;
        }
        stats.elements_matched += 1;

        match &self.plan.while_partition {
            Some(WhilePartition::TakeWhile(p)) if !p(&element) => {
                self.stopped = true;
                return Admit::Stop;
            }
            Some(WhilePartition::SkipWhile(p)) if self.skipping_while => {
                if p(&element) {
                    return Admit::Pass;
                }
                self.skipping_while = false;
            }
            _ => {}
        }

        if self.skip_remaining > 0 {
            self.skip_remaining -= 1;
            return Admit::Pass;
        }

        let result = (self.plan.projection)(element);
        if let Some(take) = self.take_remaining.as_mut() {
            *take -= 1;
        }
        stats.elements_yielded += 1;
        Admit::Yield(result)
    }
}

/// Inline evaluation of `all`, `any` and `contains`
pub(crate) struct QuantifierProbe<'p, R> {
    quantifier: &'p Quantifier<R>,
    decided: Option<bool>,
}

impl<'p, R> QuantifierProbe<'p, R> {
    pub(crate) fn new(quantifier: &'p Quantifier<R>) -> Self {
        Self {
            quantifier,
            decided: None,
        }
    }

    /// Feeds one result; returns true once the answer is known
    pub(crate) fn observe(&mut self, result: &R) -> bool {
        let decisive = match self.quantifier {
            Quantifier::All(p) => (!p(result)).then_some(false),
            Quantifier::Any(None) => Some(true),
            Quantifier::Any(Some(p)) => p(result).then_some(true),
            Quantifier::Contains { value, eq } => eq(result, value).then_some(true),
            Quantifier::SequenceEqual { .. } => None,
        };
        if decisive.is_some() {
            self.decided = decisive;
        }
        self.decided.is_some()
    }

    /// Answer after the last observed result
    pub(crate) fn outcome(&self) -> bool {
        self.decided
            .unwrap_or(matches!(self.quantifier, Quantifier::All(_)))
    }
}

/// Collects pipeline output for a streamable plan
pub(crate) struct StreamDriver<'p, S, R> {
    pipeline: ElementPipeline<'p, S, R>,
    probe: Option<QuantifierProbe<'p, R>>,
    results: Vec<R>,
}

impl<'p, S, R> StreamDriver<'p, S, R> {
    pub(crate) fn new(plan: &'p QueryPlan<S, R>) -> Self {
        Self {
            pipeline: ElementPipeline::new(plan),
            probe: plan.streamable_quantifier().map(QuantifierProbe::new),
            results: Vec::new(),
        }
    }

    /// Whether reading another element can change the output
    pub(crate) fn wants_more(&self) -> bool {
        let decided = self.probe.as_ref().is_some_and(|p| p.decided.is_some());
        !decided && !self.pipeline.exhausted()
    }

    pub(crate) fn push(&mut self, element: S, stats: &mut ExecutionStats) {
        if let Admit::Yield(result) = self.pipeline.offer(element, stats) {
            match self.probe.as_mut() {
                Some(probe) => {
                    probe.observe(&result);
                }
                None => self.results.push(result),
            }
        }
    }

    pub(crate) fn finish(self) -> QueryOutput<R> {
        match self.probe {
            Some(probe) => QueryOutput::Boolean(probe.outcome()),
            None => QueryOutput::Sequence(self.results),
        }
    }
}
