use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};
use twingraph_common::TriplePattern;
use twingraph_transaction::{SessionIdGenerator, TxnCoordinator, TxnMode, TxnType, WritePermit};

use crate::chain::{ChainStats, GraphChain};
use crate::config::TransactionalGraphConfig;
use crate::error::{BaseCapabilityError, StorageResult};
use crate::store::TripleStore;
use crate::txn::GraphTransaction;

/// How soon the background reconciler retries when stale readers block it.
const BLOCKED_RETRY: Duration = Duration::from_millis(10);

/// The two chain roles. Exactly one chain accepts new transactions at any
/// instant (`active`); the other (`stale`) is quiescent from new sessions and
/// is the only chain that gets merged and drained.
pub(crate) struct ChainPair {
    pub(crate) active: Arc<GraphChain>,
    pub(crate) stale: Arc<GraphChain>,
}

/// Outcome of one locked reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReconcilePass {
    /// Both chains are clean.
    Idle,
    /// Some work was done; another pass may find more.
    Progressed,
    /// Work remains but stale readers are in the way.
    Blocked,
}

/// State shared between the public engine handle, live sessions, and the
/// background workers.
pub(crate) struct EngineShared {
    pub(crate) config: TransactionalGraphConfig,
    /// The swap lock. Serializes chain swaps, write-slot transitions,
    /// merges, drains, and reader registration.
    pub(crate) chains: Mutex<ChainPair>,
    pub(crate) write_permit: WritePermit,
    pub(crate) coordinator: TxnCoordinator,
    /// Global commit counter, bumped under the swap lock. Snapshot isolation
    /// and `Isolated` promotion validate against it.
    pub(crate) data_version: AtomicU64,
    pub(crate) session_ids: SessionIdGenerator,
    /// Which threads currently own a session, and in which mode.
    pub(crate) threads_in_txn: DashMap<thread::ThreadId, TxnMode>,
    pub(crate) reconcile_pending: Mutex<bool>,
    pub(crate) reconcile_signal: Condvar,
    sweep_mutex: Mutex<()>,
    sweep_signal: Condvar,
    pub(crate) shutdown: AtomicBool,
}

impl EngineShared {
    fn new(config: TransactionalGraphConfig) -> StorageResult<Self> {
        let active = Arc::new(GraphChain::new(Self::build_base(&config)?));
        let stale = Arc::new(GraphChain::new(Self::build_base(&config)?));
        Ok(EngineShared {
            coordinator: TxnCoordinator::new(
                config.transaction_timeout,
                config.keep_timed_out_multiplier,
            ),
            config,
            chains: Mutex::new(ChainPair { active, stale }),
            write_permit: WritePermit::new(),
            data_version: AtomicU64::new(0),
            session_ids: SessionIdGenerator::new(),
            threads_in_txn: DashMap::new(),
            reconcile_pending: Mutex::new(false),
            reconcile_signal: Condvar::new(),
            sweep_mutex: Mutex::new(()),
            sweep_signal: Condvar::new(),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Builds one chain base: a fresh factory store, or a copy of the
    /// initial graph (native clone when the store supports it, otherwise
    /// iterate-and-insert). Capabilities are validated here, at wrap time.
    fn build_base(config: &TransactionalGraphConfig) -> StorageResult<Arc<dyn TripleStore>> {
        let base: Arc<dyn TripleStore> = match &config.initial_graph {
            Some(initial) => match initial.try_clone() {
                Some(copy) => copy,
                None => {
                    let store = (config.graph_factory)();
                    for triple in initial.find(&TriplePattern::any()) {
                        store.insert(triple);
                    }
                    store
                }
            },
            None => (config.graph_factory)(),
        };
        let caps = base.capabilities();
        if !caps.size_accurate {
            return Err(BaseCapabilityError::InaccurateSize.into());
        }
        if caps.handles_literal_typing {
            return Err(BaseCapabilityError::NormalizesLiterals.into());
        }
        Ok(base)
    }

    /// Wakes the background reconciler. Called after every commit, abort,
    /// and reader departure.
    pub(crate) fn signal_reconciler(&self) {
        let mut pending = self.reconcile_pending.lock();
        *pending = true;
        self.reconcile_signal.notify_one();
    }

    /// One pass under the swap lock: merge and drain the stale chain if it
    /// is idle, then swap if the active chain needs reconciling and the
    /// stale chain came out clean.
    pub(crate) fn reconcile_once(&self) -> ReconcilePass {
        let mut chains = self.chains.lock();
        let mut progressed = false;

        if chains.stale.is_dirty()
            && !chains.stale.has_readers()
            && !chains.stale.has_write_slot()
        {
            match chains
                .stale
                .merge_delta_chain()
                .and_then(|()| chains.stale.apply_queued_deltas())
            {
                Ok(()) => progressed = true,
                Err(err) => warn!(error = %err, "stale chain reconciliation failed"),
            }
        }

        // Swap only when the stale side is fully reconciled; the rebase
        // invariant (equal data versions) depends on it.
        if chains.active.is_dirty() && chains.stale.is_clean() && !chains.stale.has_readers() {
            let pair = &mut *chains;
            mem::swap(&mut pair.active, &mut pair.stale);
            debug!("swapped active and stale chains");
            progressed = true;
        }

        if progressed {
            ReconcilePass::Progressed
        } else if chains.active.is_dirty() || chains.stale.is_dirty() {
            ReconcilePass::Blocked
        } else {
            ReconcilePass::Idle
        }
    }

    /// Synchronous reconciliation performed by a beginning writer, bounding
    /// the active chain's depth when the background task cannot keep up.
    /// Caller holds the write permit and has not prepared a write slot yet.
    pub(crate) fn reconcile_before_write(&self) {
        loop {
            let mut chains = self.chains.lock();
            if chains.active.is_clean() {
                return;
            }
            let over_budget = chains.active.chain_len() >= self.config.max_chain_length;
            let stale_idle = !chains.stale.has_readers();
            if !(chains.stale.is_clean() || stale_idle || over_budget) {
                return;
            }
            if stale_idle && chains.stale.is_dirty() && !chains.stale.has_write_slot() {
                if let Err(err) = chains
                    .stale
                    .merge_delta_chain()
                    .and_then(|()| chains.stale.apply_queued_deltas())
                {
                    warn!(error = %err, "synchronous reconciliation failed");
                    return;
                }
            }
            if chains.stale.is_clean() {
                let pair = &mut *chains;
                mem::swap(&mut pair.active, &mut pair.stale);
                debug!("writer swapped chains synchronously");
                // The new active side is clean; the next iteration exits.
            } else {
                // Stale readers hold the chain; the writer proceeds on the
                // dirty active chain and the bound is exceeded temporarily.
                return;
            }
        }
    }

    fn stats(&self) -> EngineStats {
        let chains = self.chains.lock();
        EngineStats {
            active: chains.active.stats(),
            stale: chains.stale.stats(),
            data_version: self.data_version.load(Ordering::Acquire),
        }
    }
}

fn reconciler_loop(shared: Arc<EngineShared>) {
    let mut pending = shared.reconcile_pending.lock();
    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            return;
        }
        if !*pending {
            shared.reconcile_signal.wait(&mut pending);
            continue;
        }
        *pending = false;
        drop(pending);

        let mut blocked = false;
        loop {
            match shared.reconcile_once() {
                ReconcilePass::Progressed => continue,
                ReconcilePass::Blocked => {
                    blocked = true;
                    break;
                }
                ReconcilePass::Idle => break,
            }
        }

        pending = shared.reconcile_pending.lock();
        if blocked && !*pending && !shared.shutdown.load(Ordering::Acquire) {
            // Stale readers were in the way. Retry on a timer rather than
            // spinning on the swap lock.
            let _ = shared
                .reconcile_signal
                .wait_for(&mut pending, BLOCKED_RETRY);
            *pending = true;
        }
    }
}

fn sweeper_loop(shared: Arc<EngineShared>) {
    let mut guard = shared.sweep_mutex.lock();
    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            return;
        }
        let _ = shared
            .sweep_signal
            .wait_for(&mut guard, shared.config.sweep_interval);
        if shared.shutdown.load(Ordering::Acquire) {
            return;
        }
        shared.coordinator.check_for_timeouts();
        shared.coordinator.remove_long_timed_out();
    }
}

/// Point-in-time counters of both chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    pub active: ChainStats,
    pub stale: ChainStats,
    /// Global commit counter.
    pub data_version: u64,
}

/// Transactional multi-reader/single-writer wrapper over a pair of
/// non-transactional triple stores.
///
/// Sessions are explicit handles obtained from [`begin`](Self::begin); at
/// most one session may be active per thread. A committed write is linked
/// onto the active chain as a delta overlay and queued for replay onto the
/// stale chain; a background reconciler merges the stale chain and swaps the
/// two so that reads stay on a shallow chain and memory stays bounded.
pub struct TransactionalGraph {
    shared: Arc<EngineShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TransactionalGraph {
    /// Opens an engine with background reconciliation and timeout sweeping.
    pub fn open(config: TransactionalGraphConfig) -> StorageResult<Self> {
        let engine = Self::new_unstarted(config)?;
        engine.start_workers();
        Ok(engine)
    }

    /// Builds the engine without spawning the background workers. Used by
    /// tests that drive reconciliation deterministically.
    pub(crate) fn new_unstarted(config: TransactionalGraphConfig) -> StorageResult<Self> {
        Ok(TransactionalGraph {
            shared: Arc::new(EngineShared::new(config)?),
            workers: Mutex::new(Vec::new()),
        })
    }

    fn start_workers(&self) {
        let mut workers = self.workers.lock();
        let reconciler = Arc::clone(&self.shared);
        workers.push(thread::spawn(move || reconciler_loop(reconciler)));
        let sweeper = Arc::clone(&self.shared);
        workers.push(thread::spawn(move || sweeper_loop(sweeper)));
    }

    /// Starts a new session of the given type on the calling thread.
    pub fn begin(&self, txn_type: TxnType) -> StorageResult<GraphTransaction> {
        GraphTransaction::begin(&self.shared, txn_type)
    }

    /// Whether the calling thread currently owns a session.
    pub fn is_in_transaction(&self) -> bool {
        self.shared
            .threads_in_txn
            .contains_key(&thread::current().id())
    }

    /// The mode of the calling thread's session, if any.
    pub fn transaction_mode(&self) -> Option<TxnMode> {
        self.shared
            .threads_in_txn
            .get(&thread::current().id())
            .map(|entry| *entry.value())
    }

    pub fn data_version(&self) -> u64 {
        self.shared.data_version.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> EngineStats {
        self.shared.stats()
    }

    /// Runs reconciliation passes until no further progress is possible.
    pub fn reconcile_now(&self) {
        while self.shared.reconcile_once() == ReconcilePass::Progressed {}
    }

    /// Stops the background workers and interrupts any blocked writer.
    /// Idempotent; also invoked on drop.
    pub fn close(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.write_permit.close();
        {
            let _pending = self.shared.reconcile_pending.lock();
            self.shared.reconcile_signal.notify_all();
        }
        {
            let _guard = self.shared.sweep_mutex.lock();
            self.shared.sweep_signal.notify_all();
        }
        for worker in self.workers.lock().drain(..) {
            let _ = worker.join();
        }
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<EngineShared> {
        &self.shared
    }
}

impl Drop for TransactionalGraph {
    fn drop(&mut self) {
        self.close();
    }
}
