//! Transaction infrastructure for the twingraph engine.
//!
//! This crate provides the pieces of transaction management that are
//! independent of any particular graph representation: session identity,
//! transaction types and modes, the single-writer permit, and the
//! coordinator that tracks session heartbeats and sweeps timed-out sessions.

pub mod coordinator;
pub mod error;
pub mod permit;
pub mod session;

pub use coordinator::{TimeoutAction, TxnCoordinator};
pub use error::{CoordinatorError, PermitError};
pub use permit::WritePermit;
pub use session::{PromoteMode, SessionId, SessionIdGenerator, TxnMode, TxnType};
