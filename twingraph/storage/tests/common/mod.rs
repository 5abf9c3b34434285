#![allow(dead_code)]

use std::sync::Arc;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use twingraph_common::{Term, Triple};
use twingraph_storage::{GraphTransaction, TransactionalGraph, TransactionalGraphConfig};
use twingraph_transaction::TxnType;

pub fn triple(s: &str, o: &str) -> Triple {
    Triple::new(Term::iri(s), Term::iri("p"), Term::iri(o))
}

pub fn open_engine() -> Arc<TransactionalGraph> {
    Arc::new(TransactionalGraph::open(TransactionalGraphConfig::default()).unwrap())
}

pub fn open_engine_with(config: TransactionalGraphConfig) -> Arc<TransactionalGraph> {
    Arc::new(TransactionalGraph::open(config).unwrap())
}

/// Commits a single add through a fresh write session.
pub fn commit_add(engine: &TransactionalGraph, t: Triple) {
    let txn = engine.begin(TxnType::Write).unwrap();
    txn.add(t).unwrap();
    txn.commit().unwrap();
}

/// Polls until both chains are merged and drained.
pub fn wait_for_quiescence(engine: &TransactionalGraph) {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let stats = engine.stats();
        if stats.active.chain_len == 0
            && stats.stale.chain_len == 0
            && stats.active.pending == 0
            && stats.stale.pending == 0
        {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "chains did not quiesce: {stats:?}"
        );
        thread::sleep(Duration::from_millis(10));
    }
}

type SessionOp = Box<dyn FnOnce(&GraphTransaction) + Send>;

/// A session running on its own thread, since the engine allows one session
/// per thread. Operations are shipped over a channel and run against the
/// session handle; dropping the command channel ends the session.
pub struct SessionThread {
    ops: Option<mpsc::Sender<SessionOp>>,
    handle: Option<JoinHandle<()>>,
}

impl SessionThread {
    pub fn begin(engine: Arc<TransactionalGraph>, txn_type: TxnType) -> Self {
        let (ops, op_rx) = mpsc::channel::<SessionOp>();
        let (ready, ready_rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            let txn = engine.begin(txn_type).unwrap();
            ready.send(()).unwrap();
            for op in op_rx {
                op(&txn);
            }
            // The handle drops here; an unfinished session aborts.
        });
        ready_rx.recv().unwrap();
        SessionThread {
            ops: Some(ops),
            handle: Some(handle),
        }
    }

    /// Runs a closure against the session and returns its result.
    pub fn run<R: Send + 'static>(
        &self,
        op: impl FnOnce(&GraphTransaction) -> R + Send + 'static,
    ) -> R {
        let (reply, reply_rx) = mpsc::channel();
        self.ops
            .as_ref()
            .expect("session thread already finished")
            .send(Box::new(move |txn| {
                let _ = reply.send(op(txn));
            }))
            .unwrap();
        reply_rx.recv().unwrap()
    }

    /// Ships a closure to the session without waiting for it to finish.
    pub fn post(&self, op: impl FnOnce(&GraphTransaction) + Send + 'static) {
        self.ops
            .as_ref()
            .expect("session thread already finished")
            .send(Box::new(op))
            .unwrap();
    }

    pub fn contains(&self, t: &Triple) -> bool {
        let t = t.clone();
        self.run(move |txn| txn.contains(&t).unwrap())
    }

    pub fn len(&self) -> usize {
        self.run(|txn| txn.len().unwrap())
    }

    /// Shuts the session thread down, ending the session.
    pub fn finish(mut self) {
        self.ops.take();
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap();
        }
    }
}

impl Drop for SessionThread {
    fn drop(&mut self) {
        self.ops.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
