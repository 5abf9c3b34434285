use std::time::Duration;

use thiserror::Error;

use crate::session::SessionId;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("session {0} is not registered with the coordinator")]
    NotRegistered(SessionId),

    #[error("session {0} timed out and was swept")]
    TimedOut(SessionId),

    #[error("session {0} is already registered")]
    AlreadyRegistered(SessionId),
}

#[derive(Error, Debug)]
pub enum PermitError {
    #[error("write permit not acquired within {0:?}")]
    AcquireTimeout(Duration),

    #[error("wait for the write permit was interrupted by shutdown")]
    Interrupted,
}
