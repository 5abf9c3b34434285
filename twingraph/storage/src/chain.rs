use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crossbeam_queue::SegQueue;
use dashmap::DashSet;
use parking_lot::{Mutex, RwLock};
use twingraph_transaction::SessionId;

use crate::delta::{DeltaGraph, GraphRef};
use crate::error::{ChainStateError, StorageResult};
use crate::store::TripleStore;
use crate::view::ReadOnlyView;

/// Point-in-time counters of one chain, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainStats {
    /// Number of delta overlays above the base store.
    pub chain_len: usize,
    /// Committed deltas queued for replay onto this chain.
    pub pending: usize,
    /// Readers currently bound to this chain.
    pub readers: usize,
    /// Writes this chain's lineage has absorbed.
    pub data_version: u64,
    /// Triple count of the last committed graph.
    pub size: usize,
}

/// One of the engine's two parallel graph chains.
///
/// A chain owns the last committed graph (a spine of delta overlays rooted in
/// a base store), at most one in-flight write slot, the set of readers bound
/// to its head, and a FIFO of committed deltas awaiting replay. The owning
/// engine serializes every structural operation here under its swap lock; the
/// preconditions below are therefore programmer errors when violated, not
/// race outcomes.
pub struct GraphChain {
    last_committed: RwLock<GraphRef>,
    write_slot: Mutex<Option<Arc<DeltaGraph>>>,
    readers: DashSet<SessionId>,
    pending: SegQueue<Arc<DeltaGraph>>,
    chain_len: AtomicUsize,
    data_version: AtomicU64,
}

impl GraphChain {
    pub(crate) fn new(base: Arc<dyn TripleStore>) -> Self {
        GraphChain {
            last_committed: RwLock::new(GraphRef::Store(base)),
            write_slot: Mutex::new(None),
            readers: DashSet::new(),
            pending: SegQueue::new(),
            chain_len: AtomicUsize::new(0),
            data_version: AtomicU64::new(0),
        }
    }

    pub fn last_committed(&self) -> GraphRef {
        self.last_committed.read().clone()
    }

    pub fn chain_len(&self) -> usize {
        self.chain_len.load(Ordering::Acquire)
    }

    pub fn data_version(&self) -> u64 {
        self.data_version.load(Ordering::Acquire)
    }

    pub fn has_readers(&self) -> bool {
        !self.readers.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn has_write_slot(&self) -> bool {
        self.write_slot.lock().is_some()
    }

    /// A chain is dirty when it has overlays to merge or deltas to replay.
    pub fn is_dirty(&self) -> bool {
        self.chain_len() > 0 || !self.pending.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        !self.is_dirty()
    }

    pub fn stats(&self) -> ChainStats {
        ChainStats {
            chain_len: self.chain_len(),
            pending: self.pending.len(),
            readers: self.readers.len(),
            data_version: self.data_version(),
            size: self.last_committed.read().len(),
        }
    }

    /// Registers a reader and returns a read-only view of the last committed
    /// graph. Double registration of the same session is a state error.
    pub(crate) fn snapshot_for_reader(&self, reader: SessionId) -> StorageResult<ReadOnlyView> {
        if !self.readers.insert(reader) {
            return Err(ChainStateError::DuplicateReader(reader).into());
        }
        Ok(ReadOnlyView::new(self.last_committed.read().clone()))
    }

    /// Idempotent removal, so a timeout sweep can clean up a reader whose
    /// thread never returns.
    pub(crate) fn remove_reader(&self, reader: SessionId) {
        self.readers.remove(&reader);
    }

    /// Creates a fresh delta over the last committed graph and parks it in
    /// the write slot.
    pub(crate) fn prepare_for_write(&self) -> StorageResult<Arc<DeltaGraph>> {
        let mut slot = self.write_slot.lock();
        if slot.is_some() {
            return Err(ChainStateError::WriteSlotOccupied.into());
        }
        let delta = Arc::new(DeltaGraph::over(self.last_committed.read().clone())?);
        *slot = Some(Arc::clone(&delta));
        Ok(delta)
    }

    /// Promotes the write slot to the new chain head.
    pub(crate) fn link_write_slot(&self) -> StorageResult<()> {
        let mut slot = self.write_slot.lock();
        let delta = slot.take().ok_or(ChainStateError::WriteSlotEmpty)?;
        *self.last_committed.write() = GraphRef::Delta(delta);
        self.chain_len.fetch_add(1, Ordering::AcqRel);
        self.data_version.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Installs an equivalent of `delta` on top of this chain's head. Used
    /// when a commit's original chain was demoted to stale mid-transaction.
    pub(crate) fn rebase_and_link(&self, delta: &DeltaGraph) {
        let rebased = Arc::new(DeltaGraph::rebased(delta, self.last_committed.read().clone()));
        *self.last_committed.write() = GraphRef::Delta(rebased);
        self.chain_len.fetch_add(1, Ordering::AcqRel);
        self.data_version.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn discard_write_slot(&self) {
        *self.write_slot.lock() = None;
    }

    /// Queues a committed delta for replay once this chain is merged.
    pub(crate) fn queue_delta(&self, delta: Arc<DeltaGraph>) {
        self.pending.push(delta);
    }

    /// Collapses the delta spine into the base store, bottom-up, and makes
    /// the bare store the new head. Requires a quiescent chain.
    pub(crate) fn merge_delta_chain(&self) -> StorageResult<()> {
        if self.has_readers() {
            return Err(ChainStateError::ChainBusy("readers active during merge").into());
        }
        if self.has_write_slot() {
            return Err(ChainStateError::ChainBusy("write slot occupied during merge").into());
        }
        if self.chain_len() == 0 {
            return Ok(());
        }

        let mut spine = Vec::new();
        let mut cursor = self.last_committed.read().clone();
        let base = loop {
            match cursor {
                GraphRef::Delta(delta) => {
                    cursor = delta.base().clone();
                    spine.push(delta);
                }
                GraphRef::Store(store) => break store,
            }
        };
        // Bottom-up so each replay lands on the merged predecessor.
        for delta in spine.iter().rev() {
            delta.apply_onto(base.as_ref());
        }
        *self.last_committed.write() = GraphRef::Store(base);
        self.chain_len.store(0, Ordering::Release);
        Ok(())
    }

    /// Drains the pending FIFO in commit order onto the (merged) base store,
    /// bumping the data version once per delta.
    pub(crate) fn apply_queued_deltas(&self) -> StorageResult<()> {
        if self.has_readers() {
            return Err(ChainStateError::ChainBusy("readers active during drain").into());
        }
        if self.has_write_slot() {
            return Err(ChainStateError::ChainBusy("write slot occupied during drain").into());
        }
        let GraphRef::Store(base) = self.last_committed.read().clone() else {
            return Err(ChainStateError::ChainBusy("chain not merged before drain").into());
        };
        while let Some(delta) = self.pending.pop() {
            delta.apply_onto(base.as_ref());
            self.data_version.fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use twingraph_common::{Term, Triple, TriplePattern};

    use super::*;
    use crate::mem_store::MemTripleStore;

    fn triple(s: &str, o: &str) -> Triple {
        Triple::new(Term::iri(s), Term::iri("p"), Term::iri(o))
    }

    fn chain() -> GraphChain {
        GraphChain::new(Arc::new(MemTripleStore::new()))
    }

    fn commit_one(chain: &GraphChain, t: Triple) {
        let delta = chain.prepare_for_write().unwrap();
        delta.add(t);
        chain.link_write_slot().unwrap();
    }

    #[test]
    fn link_grows_chain_and_version() {
        let chain = chain();
        commit_one(&chain, triple("a", "1"));
        commit_one(&chain, triple("b", "2"));
        assert_eq!(chain.chain_len(), 2);
        assert_eq!(chain.data_version(), 2);
        assert!(chain.last_committed().contains(&triple("a", "1")));
        assert!(chain.last_committed().contains(&triple("b", "2")));
    }

    #[test]
    fn double_write_slot_is_rejected() {
        let chain = chain();
        let _delta = chain.prepare_for_write().unwrap();
        assert!(matches!(
            chain.prepare_for_write(),
            Err(crate::error::StorageError::ChainState(
                ChainStateError::WriteSlotOccupied
            ))
        ));
        chain.discard_write_slot();
        chain.prepare_for_write().unwrap();
    }

    #[test]
    fn duplicate_reader_is_rejected_and_removal_is_idempotent() {
        let chain = chain();
        chain.snapshot_for_reader(1).unwrap();
        assert!(chain.snapshot_for_reader(1).is_err());
        chain.remove_reader(1);
        chain.remove_reader(1);
        chain.snapshot_for_reader(1).unwrap();
    }

    #[test]
    fn merge_collapses_spine_and_preserves_membership() {
        let chain = chain();
        commit_one(&chain, triple("a", "1"));
        commit_one(&chain, triple("b", "2"));
        let delta = chain.prepare_for_write().unwrap();
        delta.delete(&triple("a", "1"));
        chain.link_write_slot().unwrap();
        assert_eq!(chain.chain_len(), 3);

        chain.merge_delta_chain().unwrap();
        assert_eq!(chain.chain_len(), 0);
        let head = chain.last_committed();
        assert!(matches!(head, GraphRef::Store(_)));
        assert!(!head.contains(&triple("a", "1")));
        assert!(head.contains(&triple("b", "2")));
        assert_eq!(head.len(), 1);
    }

    #[test]
    fn merge_requires_quiescence() {
        let chain = chain();
        commit_one(&chain, triple("a", "1"));
        chain.snapshot_for_reader(9).unwrap();
        assert!(chain.merge_delta_chain().is_err());
        chain.remove_reader(9);
        chain.merge_delta_chain().unwrap();
    }

    #[test]
    fn drain_applies_in_commit_order_and_bumps_version() {
        let chain = chain();
        let t = triple("a", "1");

        let added = DeltaGraph::over(GraphRef::Store(Arc::new(MemTripleStore::new()))).unwrap();
        added.add(t.clone());
        let base_with_t = MemTripleStore::new();
        base_with_t.insert(t.clone());
        let removed = DeltaGraph::over(GraphRef::Store(Arc::new(base_with_t))).unwrap();
        removed.delete(&t);
        // Queue an add and then a delete of the same triple: order matters.
        chain.queue_delta(Arc::new(added));
        chain.queue_delta(Arc::new(removed));

        chain.apply_queued_deltas().unwrap();
        assert_eq!(chain.pending_len(), 0);
        assert_eq!(chain.data_version(), 2);
        assert!(!chain.last_committed().contains(&t));
    }

    #[test]
    fn merge_matches_direct_application() {
        // Build the same history through a delta chain and through direct
        // store mutation, then compare the merged result.
        let chain = chain();
        let direct = MemTripleStore::new();

        for i in 0..4 {
            let t = triple("s", &i.to_string());
            commit_one(&chain, t.clone());
            direct.insert(t);
        }
        let delta = chain.prepare_for_write().unwrap();
        delta.delete(&triple("s", "2"));
        chain.link_write_slot().unwrap();
        direct.remove(&triple("s", "2"));

        chain.merge_delta_chain().unwrap();
        let head = chain.last_committed();
        assert_eq!(head.len(), direct.len());
        for t in direct.find(&TriplePattern::any()) {
            assert!(head.contains(&t));
        }
    }
}
