use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::mem_store::MemTripleStore;
use crate::store::TripleStore;

/// Builds the fresh base stores backing the two chains.
pub type GraphFactory = Arc<dyn Fn() -> Arc<dyn TripleStore> + Send + Sync>;

/// Tuning knobs for [`TransactionalGraph`](crate::TransactionalGraph).
#[derive(Clone)]
pub struct TransactionalGraphConfig {
    /// Produces the base store of each chain.
    pub graph_factory: GraphFactory,
    /// Upper bound on the active chain's delta depth before a beginning
    /// writer reconciles synchronously.
    pub max_chain_length: usize,
    /// Per-session heartbeat deadline.
    pub transaction_timeout: Duration,
    /// Coordinator sweep period.
    pub sweep_interval: Duration,
    /// How long, in units of the transaction timeout, a timed-out session is
    /// retained for diagnostics.
    pub keep_timed_out_multiplier: u32,
    /// Bulk-loaded into both chains on construction.
    pub initial_graph: Option<Arc<dyn TripleStore>>,
}

impl Default for TransactionalGraphConfig {
    fn default() -> Self {
        TransactionalGraphConfig {
            graph_factory: Arc::new(|| Arc::new(MemTripleStore::new())),
            max_chain_length: 2,
            transaction_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(5),
            keep_timed_out_multiplier: 10,
            initial_graph: None,
        }
    }
}

impl fmt::Debug for TransactionalGraphConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionalGraphConfig")
            .field("max_chain_length", &self.max_chain_length)
            .field("transaction_timeout", &self.transaction_timeout)
            .field("sweep_interval", &self.sweep_interval)
            .field("keep_timed_out_multiplier", &self.keep_timed_out_multiplier)
            .field("initial_graph", &self.initial_graph.is_some())
            .finish_non_exhaustive()
    }
}
