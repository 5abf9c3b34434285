use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of a transaction session (engine-wide unique).
pub type SessionId = u64;

/// Transaction types accepted by `begin`.
///
/// The two promote variants begin as readers; they differ only in how a later
/// promotion to writer is validated (see [`PromoteMode`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnType {
    Read,
    Write,
    ReadPromote,
    ReadCommittedPromote,
}

impl TxnType {
    /// The mode a session of this type starts in.
    pub fn effective_mode(self) -> TxnMode {
        match self {
            TxnType::Write => TxnMode::Write,
            TxnType::Read | TxnType::ReadPromote | TxnType::ReadCommittedPromote => TxnMode::Read,
        }
    }
}

/// The current mode of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnMode {
    Read,
    Write,
}

/// How a reader-to-writer promotion is validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromoteMode {
    /// Fail the promotion if any write committed since the reader's snapshot.
    Isolated,
    /// Promote unconditionally onto the current committed state.
    ReadCommitted,
}

/// Monotonic generator for session identifiers.
pub struct SessionIdGenerator {
    counter: AtomicU64,
}

impl SessionIdGenerator {
    pub fn new() -> Self {
        SessionIdGenerator {
            counter: AtomicU64::new(0),
        }
    }

    pub fn next(&self) -> SessionId {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl Default for SessionIdGenerator {
    fn default() -> Self {
        SessionIdGenerator::new()
    }
}
