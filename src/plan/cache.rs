//! Plan cache owned by the plan-construction stage
//!
//! Building a plan is cheap but not free: every closure gets boxed and the
//! plan gets validated. Callers that run the same query repeatedly keep a
//! `PlanCache` and reuse the `Arc<QueryPlan>`. Each cache is an ordinary
//! value, so independent engines never share state.

use std::collections::HashMap;
use std::sync::Arc;

use super::plan::QueryPlan;
use crate::errors::QueryResult;

struct CacheEntry<S, R> {
    plan: Arc<QueryPlan<S, R>>,
    last_access: u64,
}

/// LRU cache of validated plans keyed by a caller-chosen fingerprint
pub struct PlanCache<S, R = S> {
    entries: HashMap<String, CacheEntry<S, R>>,
    max_size: usize,
    access_counter: u64,
    hits: u64,
    misses: u64,
}

impl<S, R> PlanCache<S, R> {
    /// Creates a cache holding at most `max_size` plans
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_size: max_size.max(1),
            access_counter: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// Gets a cached plan
    pub fn get(&mut self, fingerprint: &str) -> Option<Arc<QueryPlan<S, R>>> {
        self.access_counter += 1;
        match self.entries.get_mut(fingerprint) {
            Some(entry) => {
                entry.last_access = self.access_counter;
                self.hits += 1;
                Some(Arc::clone(&entry.plan))
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Inserts a plan, evicting the least recently used one when full
    pub fn insert(&mut self, fingerprint: impl Into<String>, plan: QueryPlan<S, R>) -> Arc<QueryPlan<S, R>> {
        let fingerprint = fingerprint.into();
        if !self.entries.contains_key(&fingerprint) && self.entries.len() >= self.max_size {
            self.evict_lru();
        }

        self.access_counter += 1;
        let plan = Arc::new(plan);
        self.entries.insert(
            fingerprint,
            CacheEntry {
                plan: Arc::clone(&plan),
                last_access: self.access_counter,
            },
        );
        plan
    }

    /// Gets a cached plan or builds, validates and caches a new one.
    ///
    /// A build error is returned and nothing is cached.
    pub fn get_or_try_insert<F>(&mut self, fingerprint: &str, build: F) -> QueryResult<Arc<QueryPlan<S, R>>>
    where
        F: FnOnce() -> QueryResult<QueryPlan<S, R>>,
    {
        if let Some(plan) = self.get(fingerprint) {
            return Ok(plan);
        }
        let plan = build()?;
        Ok(self.insert(fingerprint, plan))
    }

    fn evict_lru(&mut self) {
        let lru_key = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(k, _)| k.clone());

        if let Some(key) = lru_key {
            self.entries.remove(&key);
        }
    }

    /// Clears the cache and its statistics
    pub fn clear(&mut self) {
        self.entries.clear();
        self.hits = 0;
        self.misses = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Fraction of lookups served from the cache
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl<S, R> Default for PlanCache<S, R> {
    fn default() -> Self {
        Self::new(64)
    }
}
