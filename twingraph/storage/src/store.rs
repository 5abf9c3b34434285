use std::sync::Arc;

use twingraph_common::{Capabilities, Triple, TriplePattern};

/// A one-shot stream of triples.
pub type TripleIter<'a> = Box<dyn Iterator<Item = Triple> + 'a>;

/// The capability surface the transactional wrapper requires from a triple
/// container.
///
/// The wrapper only ever mutates a store when the store is unreachable from
/// any live reader or writer (merging a quiescent chain), so implementations
/// need interior mutability but no transactional behavior of their own.
pub trait TripleStore: Send + Sync {
    /// Inserts a triple. Returns `false` if it was already present.
    fn insert(&self, triple: Triple) -> bool;

    /// Removes a triple. Returns `false` if it was not present.
    fn remove(&self, triple: &Triple) -> bool;

    fn contains(&self, triple: &Triple) -> bool;

    /// All triples matching the pattern. The stream reflects the store at
    /// call time; ordering is implementation-defined.
    fn find<'a>(&'a self, pattern: &TriplePattern) -> TripleIter<'a>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn capabilities(&self) -> Capabilities;

    /// Clones into an independent store, if natively supported. Callers fall
    /// back to iterate-and-insert when this returns `None`.
    fn try_clone(&self) -> Option<Arc<dyn TripleStore>> {
        None
    }
}
