use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use tracing::debug;
use twingraph_common::{Triple, TriplePattern};
use twingraph_transaction::{
    CoordinatorError, PromoteMode, SessionId, TimeoutAction, TxnMode, TxnType,
};

use crate::chain::GraphChain;
use crate::delta::DeltaGraph;
use crate::engine::EngineShared;
use crate::error::{StorageError, StorageResult};
use crate::view::ReadOnlyView;

/// The graph a session reads and writes through: a private delta for
/// writers, a read-only snapshot view for readers.
enum SessionGraph {
    Write(Arc<DeltaGraph>),
    Read(ReadOnlyView),
}

struct SessionState {
    id: SessionId,
    mode: TxnMode,
    graph: SessionGraph,
    /// The chain this session snapshotted at begin time. It may be demoted
    /// to stale by a swap while the session runs.
    chain: Arc<GraphChain>,
    /// Global data version captured at begin time, under the swap lock.
    snapshot_version: u64,
}

/// A transaction session handle.
///
/// Obtained from [`TransactionalGraph::begin`](crate::TransactionalGraph::begin);
/// all session operations live here. The session is bound to the thread that
/// began it for exclusivity accounting, but the handle itself may be moved.
/// Dropping a live handle performs the cleanup of an abort.
pub struct GraphTransaction {
    shared: Arc<EngineShared>,
    thread: ThreadId,
    state: Mutex<Option<SessionState>>,
}

impl std::fmt::Debug for GraphTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphTransaction")
            .field("thread", &self.thread)
            .finish_non_exhaustive()
    }
}

impl GraphTransaction {
    pub(crate) fn begin(shared: &Arc<EngineShared>, txn_type: TxnType) -> StorageResult<Self> {
        let thread = thread::current().id();
        if shared.threads_in_txn.contains_key(&thread) {
            return Err(StorageError::AlreadyInTransaction);
        }
        let mode = txn_type.effective_mode();
        // The registry entry must exist before the coordinator registration:
        // a sweep may fire the cleanup action at any point afterwards, and
        // the action removes the entry.
        shared.threads_in_txn.insert(thread, mode);
        let state = match mode {
            TxnMode::Write => Self::begin_write(shared, thread),
            TxnMode::Read => Self::begin_read(shared, thread),
        };
        let state = match state {
            Ok(state) => state,
            Err(err) => {
                shared.threads_in_txn.remove(&thread);
                return Err(err);
            }
        };
        debug!(session = state.id, ?mode, "transaction started");
        Ok(GraphTransaction {
            shared: Arc::clone(shared),
            thread,
            state: Mutex::new(Some(state)),
        })
    }

    fn begin_write(shared: &Arc<EngineShared>, thread: ThreadId) -> StorageResult<SessionState> {
        // The deadline covers one full sweep period past the transaction
        // timeout: a stalled writer is guaranteed to have been reclaimed by
        // then.
        let wait = shared.config.transaction_timeout + shared.config.sweep_interval;
        shared.write_permit.acquire_timeout(wait)?;
        match Self::prepare_write_session(shared, thread) {
            Ok(state) => Ok(state),
            Err(err) => {
                shared.write_permit.release();
                Err(err)
            }
        }
    }

    fn prepare_write_session(
        shared: &Arc<EngineShared>,
        thread: ThreadId,
    ) -> StorageResult<SessionState> {
        shared.reconcile_before_write();
        let id = shared.session_ids.next();
        let (chain, delta, snapshot_version) = {
            let chains = shared.chains.lock();
            let chain = Arc::clone(&chains.active);
            let delta = chain.prepare_for_write()?;
            (chain, delta, shared.data_version.load(Ordering::Acquire))
        };
        let action = write_timeout_action(shared, &chain, thread);
        if let Err(err) = shared.coordinator.register(id, action) {
            chain.discard_write_slot();
            return Err(err.into());
        }
        Ok(SessionState {
            id,
            mode: TxnMode::Write,
            graph: SessionGraph::Write(delta),
            chain,
            snapshot_version,
        })
    }

    fn begin_read(shared: &Arc<EngineShared>, thread: ThreadId) -> StorageResult<SessionState> {
        let id = shared.session_ids.next();
        let (chain, view, snapshot_version) = {
            let chains = shared.chains.lock();
            let chain = Arc::clone(&chains.active);
            let view = chain.snapshot_for_reader(id)?;
            (chain, view, shared.data_version.load(Ordering::Acquire))
        };
        let action = read_timeout_action(shared, &chain, id, thread);
        if let Err(err) = shared.coordinator.register(id, action) {
            chain.remove_reader(id);
            return Err(err.into());
        }
        Ok(SessionState {
            id,
            mode: TxnMode::Read,
            graph: SessionGraph::Read(view),
            chain,
            snapshot_version,
        })
    }

    /// The session id, while the session is live.
    pub fn session_id(&self) -> Option<SessionId> {
        self.state.lock().as_ref().map(|state| state.id)
    }

    /// The session's current mode, while the session is live.
    pub fn mode(&self) -> Option<TxnMode> {
        self.state.lock().as_ref().map(|state| state.mode)
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().is_some()
    }

    fn with_live_session<R>(
        &self,
        op: impl FnOnce(&SessionState) -> StorageResult<R>,
    ) -> StorageResult<R> {
        let mut guard = self.state.lock();
        let Some(id) = guard.as_ref().map(|state| state.id) else {
            return Err(StorageError::NotInTransaction);
        };
        if let Err(err) = self.shared.coordinator.refresh_heartbeat(id) {
            if matches!(err, CoordinatorError::TimedOut(_)) {
                // The sweep already performed the abort-equivalent cleanup;
                // only the local state is left to clear.
                *guard = None;
            }
            return Err(err.into());
        }
        match guard.as_ref() {
            Some(state) => op(state),
            None => Err(StorageError::NotInTransaction),
        }
    }

    pub fn add(&self, triple: Triple) -> StorageResult<()> {
        self.with_live_session(|state| match &state.graph {
            SessionGraph::Write(delta) => {
                delta.add(triple);
                Ok(())
            }
            SessionGraph::Read(view) => view.add(triple),
        })
    }

    pub fn delete(&self, triple: &Triple) -> StorageResult<()> {
        self.with_live_session(|state| match &state.graph {
            SessionGraph::Write(delta) => {
                delta.delete(triple);
                Ok(())
            }
            SessionGraph::Read(view) => view.delete(triple),
        })
    }

    pub fn contains(&self, triple: &Triple) -> StorageResult<bool> {
        self.with_live_session(|state| {
            Ok(match &state.graph {
                SessionGraph::Write(delta) => delta.contains(triple),
                SessionGraph::Read(view) => view.contains(triple),
            })
        })
    }

    /// All triples matching the pattern, materialized from the session's
    /// snapshot. The underlying overlay streams are one-shot; the session
    /// surface hands out an owned batch instead.
    pub fn find(&self, pattern: &TriplePattern) -> StorageResult<Vec<Triple>> {
        self.with_live_session(|state| {
            Ok(match &state.graph {
                SessionGraph::Write(delta) => delta.find(pattern).collect(),
                SessionGraph::Read(view) => view.find(pattern).collect(),
            })
        })
    }

    pub fn len(&self) -> StorageResult<usize> {
        self.with_live_session(|state| {
            Ok(match &state.graph {
                SessionGraph::Write(delta) => delta.len(),
                SessionGraph::Read(view) => view.len(),
            })
        })
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Commits the session.
    ///
    /// For a writer with changes, the delta is either linked onto the chain
    /// it was prepared on (still active) or, if the chains were swapped in
    /// the meantime, rebased onto the new active chain; either way it is
    /// queued for replay onto the stale chain. On success the global data
    /// version increases by one. A failed commit leaves the engine in the
    /// state an abort would have.
    pub fn commit(&self) -> StorageResult<()> {
        let mut guard = self.state.lock();
        let Some(state) = guard.take() else {
            return Err(StorageError::NotInTransaction);
        };
        if let Err(err) = self.shared.coordinator.unregister(state.id) {
            // TimedOut: the sweep's cleanup already ran; nothing to undo.
            return Err(err.into());
        }
        drop(guard);
        self.shared.threads_in_txn.remove(&self.thread);

        let SessionState {
            id, graph, chain, ..
        } = state;
        let result = match graph {
            SessionGraph::Read(_) => {
                chain.remove_reader(id);
                Ok(())
            }
            SessionGraph::Write(delta) => self.commit_write(&chain, delta),
        };
        self.shared.signal_reconciler();
        result
    }

    fn commit_write(&self, chain: &Arc<GraphChain>, delta: Arc<DeltaGraph>) -> StorageResult<()> {
        let shared = &self.shared;
        if !delta.has_changes() {
            chain.discard_write_slot();
            shared.write_permit.release();
            return Ok(());
        }

        let outcome = {
            let chains = shared.chains.lock();
            let linked = if Arc::ptr_eq(chain, &chains.active) {
                chains
                    .active
                    .link_write_slot()
                    .map(|()| chains.stale.queue_delta(delta))
            } else {
                // The chains were swapped while this writer ran; its chain
                // is now the stale one. Install an equivalent delta on the
                // new active chain and queue the original for replay.
                let stale_version = chains.stale.data_version();
                let active_version = chains.active.data_version();
                if stale_version != active_version {
                    Err(StorageError::RebaseImpossible {
                        stale: stale_version,
                        active: active_version,
                    })
                } else {
                    chains.stale.discard_write_slot();
                    chains.stale.queue_delta(Arc::clone(&delta));
                    chains.active.rebase_and_link(&delta);
                    debug!("commit rebased onto swapped active chain");
                    Ok(())
                }
            };
            linked.map(|()| {
                shared.data_version.fetch_add(1, Ordering::AcqRel);
            })
        };
        if outcome.is_err() {
            chain.discard_write_slot();
        }
        shared.write_permit.release();
        outcome
    }

    /// Aborts the session, discarding a writer's uncommitted delta.
    pub fn abort(&self) -> StorageResult<()> {
        let mut guard = self.state.lock();
        let Some(state) = guard.take() else {
            return Err(StorageError::NotInTransaction);
        };
        if let Err(err) = self.shared.coordinator.unregister(state.id) {
            return Err(err.into());
        }
        drop(guard);
        self.shared.threads_in_txn.remove(&self.thread);

        match state.graph {
            SessionGraph::Read(_) => state.chain.remove_reader(state.id),
            SessionGraph::Write(_) => {
                state.chain.discard_write_slot();
                self.shared.write_permit.release();
            }
        }
        self.shared.signal_reconciler();
        Ok(())
    }

    /// Finishes the session. Ending a read session is normal termination;
    /// ending a write session that neither committed nor aborted performs
    /// the abort and surfaces [`StorageError::MissingCommitOrAbort`].
    /// Ending an already-finished session is a no-op.
    pub fn end(&self) -> StorageResult<()> {
        let is_write = {
            let guard = self.state.lock();
            match guard.as_ref() {
                None => return Ok(()),
                Some(state) => state.mode == TxnMode::Write,
            }
        };
        self.abort()?;
        if is_write {
            return Err(StorageError::MissingCommitOrAbort);
        }
        Ok(())
    }

    /// Attempts to turn a read session into the writer without losing the
    /// session id. Returns `false` without blocking when the write permit is
    /// taken, or when `Isolated` validation sees a commit newer than the
    /// session's snapshot. A write session is already promoted.
    pub fn promote(&self, mode: PromoteMode) -> StorageResult<bool> {
        let mut guard = self.state.lock();
        let Some((id, current_mode, snapshot_version, old_chain)) = guard
            .as_ref()
            .map(|s| (s.id, s.mode, s.snapshot_version, Arc::clone(&s.chain)))
        else {
            return Err(StorageError::NotInTransaction);
        };
        if current_mode == TxnMode::Write {
            return Ok(true);
        }
        if let Err(err) = self.shared.coordinator.refresh_heartbeat(id) {
            if matches!(err, CoordinatorError::TimedOut(_)) {
                *guard = None;
            }
            return Err(err.into());
        }

        if !self.shared.write_permit.try_acquire() {
            return Ok(false);
        }
        if mode == PromoteMode::Isolated
            && snapshot_version != self.shared.data_version.load(Ordering::Acquire)
        {
            self.shared.write_permit.release();
            return Ok(false);
        }

        // Flip the registry entry first: the write timeout action installed
        // below removes it, and must not race a later update.
        self.shared.threads_in_txn.insert(self.thread, TxnMode::Write);
        match Self::switch_to_writer(&self.shared, id, &old_chain, self.thread) {
            Ok(new_state) => {
                *guard = Some(new_state);
                Ok(true)
            }
            Err(err) => {
                // The reader registration is already gone; the session
                // cannot continue in either mode.
                self.shared.write_permit.release();
                *guard = None;
                self.shared.threads_in_txn.remove(&self.thread);
                Err(err)
            }
        }
    }

    fn switch_to_writer(
        shared: &Arc<EngineShared>,
        id: SessionId,
        old_chain: &Arc<GraphChain>,
        thread: ThreadId,
    ) -> StorageResult<SessionState> {
        old_chain.remove_reader(id);
        shared.coordinator.unregister(id)?;
        let (chain, delta, snapshot_version) = {
            let chains = shared.chains.lock();
            let chain = Arc::clone(&chains.active);
            let delta = chain.prepare_for_write()?;
            (chain, delta, shared.data_version.load(Ordering::Acquire))
        };
        let action = write_timeout_action(shared, &chain, thread);
        if let Err(err) = shared.coordinator.register(id, action) {
            chain.discard_write_slot();
            return Err(err.into());
        }
        Ok(SessionState {
            id,
            mode: TxnMode::Write,
            graph: SessionGraph::Write(delta),
            chain,
            snapshot_version,
        })
    }
}

impl Drop for GraphTransaction {
    fn drop(&mut self) {
        // An unfinished session gets abort cleanup; errors cannot propagate
        // out of drop.
        if self.state.get_mut().is_some() {
            let _ = self.abort();
        }
    }
}

/// Cleanup for a swept writer: under the swap lock, free the write slot and
/// hand the permit back, then release the thread's session ownership.
fn write_timeout_action(
    shared: &Arc<EngineShared>,
    chain: &Arc<GraphChain>,
    thread: ThreadId,
) -> TimeoutAction {
    let shared = Arc::downgrade(shared);
    let chain = Arc::clone(chain);
    Box::new(move || {
        if let Some(shared) = shared.upgrade() {
            {
                let _swap = shared.chains.lock();
                chain.discard_write_slot();
                shared.write_permit.release();
            }
            shared.threads_in_txn.remove(&thread);
            shared.signal_reconciler();
        }
        Ok(())
    })
}

/// Cleanup for a swept reader: drop its registration from the chain it
/// snapshotted so the chain can be merged.
fn read_timeout_action(
    shared: &Arc<EngineShared>,
    chain: &Arc<GraphChain>,
    id: SessionId,
    thread: ThreadId,
) -> TimeoutAction {
    let shared = Arc::downgrade(shared);
    let chain = Arc::clone(chain);
    Box::new(move || {
        if let Some(shared) = shared.upgrade() {
            chain.remove_reader(id);
            shared.threads_in_txn.remove(&thread);
            shared.signal_reconciler();
        }
        Ok(())
    })
}
