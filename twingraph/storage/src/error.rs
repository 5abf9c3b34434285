use thiserror::Error;
use twingraph_transaction::{CoordinatorError, PermitError, SessionId};

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("operation outside a transaction")]
    NotInTransaction,

    #[error("a transaction is already active on this thread")]
    AlreadyInTransaction,

    #[error("coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),

    #[error("write permit error: {0}")]
    Permit(#[from] PermitError),

    #[error("chain state error: {0}")]
    ChainState(#[from] ChainStateError),

    #[error("mutation attempted on a read-only graph view")]
    ReadOnly,

    #[error("base graph capability rejected: {0}")]
    BaseCapability(#[from] BaseCapabilityError),

    /// The stale chain diverged from the active chain while a writer was in
    /// flight. The background merge is supposed to make this impossible
    /// before any swap, so hitting it indicates an engine bug.
    #[error("cannot rebase commit: stale chain at version {stale}, active at {active}")]
    RebaseImpossible { stale: u64, active: u64 },

    #[error("write transaction ended without commit or abort")]
    MissingCommitOrAbort,
}

/// Internal chain precondition violations. These are programmer errors, not
/// recoverable user-facing conditions.
#[derive(Error, Debug)]
pub enum ChainStateError {
    #[error("write slot is already occupied")]
    WriteSlotOccupied,

    #[error("write slot is empty")]
    WriteSlotEmpty,

    #[error("reader {0} is already registered on this chain")]
    DuplicateReader(SessionId),

    #[error("chain is busy: {0}")]
    ChainBusy(&'static str),
}

#[derive(Error, Debug)]
pub enum BaseCapabilityError {
    #[error("base graph does not report an accurate size")]
    InaccurateSize,

    #[error("base graph normalizes typed literals")]
    NormalizesLiterals,
}
