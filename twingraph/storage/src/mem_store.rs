use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use twingraph_common::{Capabilities, Term, Triple, TriplePattern};

use crate::store::{TripleIter, TripleStore};

/// Hash-indexed, unordered triple container.
///
/// Keeps one bucket map per triple position so that `find` with at least one
/// bound position scans a single bucket instead of the whole store. This is
/// the default product of the engine's graph factory and the base store used
/// throughout the test suite.
pub struct MemTripleStore {
    triples: DashSet<Triple>,
    by_subject: DashMap<Term, DashSet<Triple>>,
    by_predicate: DashMap<Term, DashSet<Triple>>,
    by_object: DashMap<Term, DashSet<Triple>>,
}

impl MemTripleStore {
    pub fn new() -> Self {
        MemTripleStore {
            triples: DashSet::new(),
            by_subject: DashMap::new(),
            by_predicate: DashMap::new(),
            by_object: DashMap::new(),
        }
    }

    fn index(&self, triple: &Triple) {
        self.by_subject
            .entry(triple.subject.clone())
            .or_default()
            .insert(triple.clone());
        self.by_predicate
            .entry(triple.predicate.clone())
            .or_default()
            .insert(triple.clone());
        self.by_object
            .entry(triple.object.clone())
            .or_default()
            .insert(triple.clone());
    }

    fn unindex(&self, triple: &Triple) {
        if let Some(bucket) = self.by_subject.get(&triple.subject) {
            bucket.remove(triple);
        }
        if let Some(bucket) = self.by_predicate.get(&triple.predicate) {
            bucket.remove(triple);
        }
        if let Some(bucket) = self.by_object.get(&triple.object) {
            bucket.remove(triple);
        }
        // Guards must be dropped before pruning, remove_if locks the shard.
        self.by_subject
            .remove_if(&triple.subject, |_, bucket| bucket.is_empty());
        self.by_predicate
            .remove_if(&triple.predicate, |_, bucket| bucket.is_empty());
        self.by_object
            .remove_if(&triple.object, |_, bucket| bucket.is_empty());
    }

    fn bucket_snapshot(map: &DashMap<Term, DashSet<Triple>>, term: &Term) -> Vec<Triple> {
        map.get(term)
            .map(|bucket| bucket.iter().map(|t| t.key().clone()).collect())
            .unwrap_or_default()
    }
}

impl Default for MemTripleStore {
    fn default() -> Self {
        MemTripleStore::new()
    }
}

impl TripleStore for MemTripleStore {
    fn insert(&self, triple: Triple) -> bool {
        if !self.triples.insert(triple.clone()) {
            return false;
        }
        self.index(&triple);
        true
    }

    fn remove(&self, triple: &Triple) -> bool {
        if self.triples.remove(triple).is_none() {
            return false;
        }
        self.unindex(triple);
        true
    }

    fn contains(&self, triple: &Triple) -> bool {
        self.triples.contains(triple)
    }

    fn find<'a>(&'a self, pattern: &TriplePattern) -> TripleIter<'a> {
        // Scan the bucket of the most selective bound position; predicates
        // tend to have the largest buckets, so they come last.
        let candidates: Vec<Triple> = if let Some(subject) = pattern.subject.term() {
            Self::bucket_snapshot(&self.by_subject, subject)
        } else if let Some(object) = pattern.object.term() {
            Self::bucket_snapshot(&self.by_object, object)
        } else if let Some(predicate) = pattern.predicate.term() {
            Self::bucket_snapshot(&self.by_predicate, predicate)
        } else {
            self.triples.iter().map(|t| t.key().clone()).collect()
        };
        let pattern = pattern.clone();
        Box::new(
            candidates
                .into_iter()
                .filter(move |triple| pattern.matches(triple)),
        )
    }

    fn len(&self) -> usize {
        self.triples.len()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::mutable()
    }

    fn try_clone(&self) -> Option<Arc<dyn TripleStore>> {
        let clone = MemTripleStore::new();
        for triple in self.find(&TriplePattern::any()) {
            clone.insert(triple);
        }
        Some(Arc::new(clone))
    }
}
