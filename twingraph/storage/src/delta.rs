use std::sync::Arc;

use dashmap::DashSet;
use twingraph_common::{Capabilities, Triple, TriplePattern};

use crate::error::{BaseCapabilityError, StorageResult};
use crate::mem_store::MemTripleStore;
use crate::store::{TripleIter, TripleStore};

/// A graph in a chain spine: either the original base store or a delta
/// overlay. The spine formed by following `Delta` bases is strictly linear
/// and ends in a `Store`.
#[derive(Clone)]
pub enum GraphRef {
    Store(Arc<dyn TripleStore>),
    Delta(Arc<DeltaGraph>),
}

impl GraphRef {
    pub fn contains(&self, triple: &Triple) -> bool {
        match self {
            GraphRef::Store(store) => store.contains(triple),
            GraphRef::Delta(delta) => delta.contains(triple),
        }
    }

    pub fn find<'a>(&'a self, pattern: &TriplePattern) -> TripleIter<'a> {
        match self {
            GraphRef::Store(store) => store.find(pattern),
            GraphRef::Delta(delta) => delta.find(pattern),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            GraphRef::Store(store) => store.len(),
            GraphRef::Delta(delta) => delta.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capabilities(&self) -> Capabilities {
        match self {
            GraphRef::Store(store) => store.capabilities(),
            GraphRef::Delta(delta) => delta.capabilities(),
        }
    }

    /// The number of delta overlays above the base store.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut cursor = self.clone();
        while let GraphRef::Delta(delta) = cursor {
            depth += 1;
            cursor = delta.base().clone();
        }
        depth
    }
}

/// Overlay of additions and deletions on a base graph.
///
/// The base is never touched: membership is resolved by consulting the
/// overlays first, and iteration filters deleted triples out of the base
/// stream. A delta's base may itself be a delta, which is how a chain of
/// committed-but-unmerged transactions stays cheap — each commit adds one
/// overlay instead of copying the graph.
///
/// Invariants maintained by `add`/`delete`:
/// - `additions` is disjoint from the base,
/// - `deletions` only ever holds triples present in the base,
/// - a triple is never in both overlays.
pub struct DeltaGraph {
    base: GraphRef,
    additions: Arc<MemTripleStore>,
    deletions: Arc<DashSet<Triple>>,
}

impl DeltaGraph {
    /// Wraps a base graph. Wrapping a raw store validates its capabilities;
    /// a delta base was validated when it was first wrapped.
    pub fn over(base: GraphRef) -> StorageResult<Self> {
        if let GraphRef::Store(store) = &base {
            Self::check_base(store.capabilities())?;
        }
        Ok(DeltaGraph {
            base,
            additions: Arc::new(MemTripleStore::new()),
            deletions: Arc::new(DashSet::new()),
        })
    }

    fn check_base(caps: Capabilities) -> Result<(), BaseCapabilityError> {
        if !caps.size_accurate {
            return Err(BaseCapabilityError::InaccurateSize);
        }
        if caps.handles_literal_typing {
            return Err(BaseCapabilityError::NormalizesLiterals);
        }
        Ok(())
    }

    /// An equivalent delta on a different base. The overlays of a committed
    /// delta are frozen, so they are shared rather than copied.
    pub(crate) fn rebased(source: &DeltaGraph, base: GraphRef) -> Self {
        DeltaGraph {
            base,
            additions: Arc::clone(&source.additions),
            deletions: Arc::clone(&source.deletions),
        }
    }

    pub fn base(&self) -> &GraphRef {
        &self.base
    }

    /// Makes the triple a member. A prior tombstone is lifted; a triple
    /// already visible is a no-op.
    pub fn add(&self, triple: Triple) {
        if self.base.contains(&triple) {
            self.deletions.remove(&triple);
        } else {
            self.additions.insert(triple);
        }
    }

    /// Makes the triple a non-member. Removes it from the additions overlay
    /// and tombstones it if the base holds it.
    pub fn delete(&self, triple: &Triple) {
        self.additions.remove(triple);
        if self.base.contains(triple) {
            self.deletions.insert(triple.clone());
        }
    }

    pub fn contains(&self, triple: &Triple) -> bool {
        if self.base.contains(triple) {
            !self.deletions.contains(triple)
        } else {
            self.additions.contains(triple)
        }
    }

    /// Lazy concatenation of the tombstone-filtered base stream and the
    /// additions stream. The two streams are never interleaved, and the
    /// result is a one-shot iterator.
    pub fn find<'a>(&'a self, pattern: &TriplePattern) -> TripleIter<'a> {
        let base = self
            .base
            .find(pattern)
            .filter(move |triple| !self.deletions.contains(triple));
        Box::new(base.chain(self.additions.find(pattern)))
    }

    pub fn len(&self) -> usize {
        self.base.len() + self.additions.len() - self.deletions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_changes(&self) -> bool {
        !self.additions.is_empty() || !self.deletions.is_empty()
    }

    pub fn addition_count(&self) -> usize {
        self.additions.len()
    }

    pub fn deletion_count(&self) -> usize {
        self.deletions.len()
    }

    pub fn capabilities(&self) -> Capabilities {
        // Size arithmetic stays exact and comparisons structural, whatever
        // the base reports for the write flags.
        Capabilities::mutable()
    }

    /// Replays this delta onto a store: additions first, then deletions.
    /// Deleting before adding would briefly shrink hash-indexed stores only
    /// to re-grow them.
    pub(crate) fn apply_onto(&self, store: &dyn TripleStore) {
        for triple in self.additions.find(&TriplePattern::any()) {
            store.insert(triple);
        }
        for triple in self.deletions.iter() {
            store.remove(triple.key());
        }
    }
}

#[cfg(test)]
mod tests {
    use twingraph_common::{Term, TermPattern};

    use super::*;

    fn triple(s: &str, p: &str, o: &str) -> Triple {
        Triple::new(Term::iri(s), Term::iri(p), Term::iri(o))
    }

    fn base_with(triples: &[Triple]) -> GraphRef {
        let store = MemTripleStore::new();
        for t in triples {
            store.insert(t.clone());
        }
        GraphRef::Store(Arc::new(store))
    }

    fn delta_over(triples: &[Triple]) -> DeltaGraph {
        DeltaGraph::over(base_with(triples)).unwrap()
    }

    #[test]
    fn membership_follows_overlays() {
        let in_base = triple("a", "p", "1");
        let delta = delta_over(std::slice::from_ref(&in_base));
        let added = triple("c", "p", "3");

        delta.add(added.clone());
        assert!(delta.contains(&in_base));
        assert!(delta.contains(&added));

        delta.delete(&in_base);
        assert!(!delta.contains(&in_base));
        assert_eq!(delta.len(), 1);
    }

    #[test]
    fn add_then_delete_of_new_triple_leaves_no_changes() {
        let delta = delta_over(&[]);
        let t = triple("x", "p", "1");
        delta.add(t.clone());
        delta.delete(&t);
        assert!(!delta.has_changes());
        assert_eq!(delta.len(), 0);
    }

    #[test]
    fn add_then_delete_of_base_triple_leaves_tombstone() {
        let t = triple("a", "p", "1");
        let delta = delta_over(std::slice::from_ref(&t));
        delta.add(t.clone());
        delta.delete(&t);
        assert!(delta.has_changes());
        assert_eq!(delta.deletion_count(), 1);
        assert_eq!(delta.addition_count(), 0);
    }

    #[test]
    fn delete_then_add_lifts_tombstone() {
        let t = triple("a", "p", "1");
        let delta = delta_over(std::slice::from_ref(&t));
        delta.delete(&t);
        assert!(!delta.contains(&t));
        delta.add(t.clone());
        assert!(delta.contains(&t));
        assert!(!delta.has_changes());
    }

    #[test]
    fn size_arithmetic_holds() {
        let t1 = triple("a", "p", "1");
        let t2 = triple("b", "p", "2");
        let delta = delta_over(&[t1.clone(), t2.clone()]);
        assert_eq!(delta.len(), 2);
        delta.delete(&t1);
        delta.add(triple("c", "p", "3"));
        delta.add(triple("d", "p", "4"));
        assert_eq!(delta.len(), 3);
    }

    #[test]
    fn find_filters_deletions_then_appends_additions() {
        let t1 = triple("a", "p", "1");
        let t2 = triple("b", "p", "2");
        let delta = delta_over(&[t1.clone(), t2.clone()]);
        delta.delete(&t1);
        let t3 = triple("c", "p", "3");
        delta.add(t3.clone());

        let by_predicate =
            TriplePattern::new(TermPattern::Any, Term::iri("p"), TermPattern::Any);
        let mut found: Vec<Triple> = delta.find(&by_predicate).collect();
        found.sort_by_key(|t| t.to_string());
        assert_eq!(found, vec![t2, t3]);
    }

    #[test]
    fn chained_deltas_compose() {
        let t1 = triple("a", "p", "1");
        let lower = Arc::new(delta_over(std::slice::from_ref(&t1)));
        let t2 = triple("b", "p", "2");
        lower.add(t2.clone());

        let upper = DeltaGraph::over(GraphRef::Delta(Arc::clone(&lower))).unwrap();
        upper.delete(&t1);
        let t3 = triple("c", "p", "3");
        upper.add(t3.clone());

        assert!(!upper.contains(&t1));
        assert!(upper.contains(&t2));
        assert!(upper.contains(&t3));
        assert_eq!(upper.len(), 2);
        assert_eq!(GraphRef::Delta(Arc::new(upper)).depth(), 2);
    }

    #[test]
    fn apply_onto_replays_additions_then_deletions() {
        let t1 = triple("a", "p", "1");
        let delta = delta_over(std::slice::from_ref(&t1));
        delta.delete(&t1);
        let t2 = triple("b", "p", "2");
        delta.add(t2.clone());

        let target = MemTripleStore::new();
        target.insert(t1.clone());
        delta.apply_onto(&target);
        assert!(!target.contains(&t1));
        assert!(target.contains(&t2));
        assert_eq!(target.len(), 1);
    }

    #[test]
    fn wrapping_rejects_bad_capabilities() {
        struct NormalizingStore(MemTripleStore);
        impl TripleStore for NormalizingStore {
            fn insert(&self, triple: Triple) -> bool {
                self.0.insert(triple)
            }
            fn remove(&self, triple: &Triple) -> bool {
                self.0.remove(triple)
            }
            fn contains(&self, triple: &Triple) -> bool {
                self.0.contains(triple)
            }
            fn find<'a>(&'a self, pattern: &TriplePattern) -> TripleIter<'a> {
                self.0.find(pattern)
            }
            fn len(&self) -> usize {
                self.0.len()
            }
            fn capabilities(&self) -> Capabilities {
                Capabilities {
                    handles_literal_typing: true,
                    ..Capabilities::mutable()
                }
            }
        }

        let base = GraphRef::Store(Arc::new(NormalizingStore(MemTripleStore::new())));
        assert!(matches!(
            DeltaGraph::over(base),
            Err(crate::error::StorageError::BaseCapability(
                BaseCapabilityError::NormalizesLiterals
            ))
        ));
    }
}
