use twingraph_common::{Capabilities, Triple, TriplePattern};

use crate::delta::GraphRef;
use crate::error::{StorageError, StorageResult};
use crate::store::TripleIter;

/// Read-only wrapper handed to reader sessions.
///
/// Forwards every read to the wrapped graph and fails both mutations with
/// [`StorageError::ReadOnly`]. The view does not own the underlying graph;
/// its lifetime is bounded by the reader's session.
pub struct ReadOnlyView {
    inner: GraphRef,
}

impl ReadOnlyView {
    pub(crate) fn new(inner: GraphRef) -> Self {
        ReadOnlyView { inner }
    }

    pub fn add(&self, _triple: Triple) -> StorageResult<()> {
        Err(StorageError::ReadOnly)
    }

    pub fn delete(&self, _triple: &Triple) -> StorageResult<()> {
        Err(StorageError::ReadOnly)
    }

    pub fn contains(&self, triple: &Triple) -> bool {
        self.inner.contains(triple)
    }

    pub fn find<'a>(&'a self, pattern: &TriplePattern) -> TripleIter<'a> {
        self.inner.find(pattern)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.inner.capabilities().read_only()
    }
}
