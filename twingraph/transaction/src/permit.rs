use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::PermitError;

struct PermitState {
    held: bool,
    closed: bool,
}

/// Single-slot write token.
///
/// This is a binary semaphore rather than a lock: the permit may be released
/// by a thread other than the one that acquired it. A coordinator timeout
/// sweep reclaims the permit of a stalled writer, and a background swap may
/// hand it back on behalf of a session whose thread is long gone, so nothing
/// here may assume owner identity.
pub struct WritePermit {
    state: Mutex<PermitState>,
    available: Condvar,
}

impl WritePermit {
    pub fn new() -> Self {
        WritePermit {
            state: Mutex::new(PermitState {
                held: false,
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Blocks until the permit is free, up to `timeout`.
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<(), PermitError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(PermitError::Interrupted);
            }
            if !state.held {
                state.held = true;
                return Ok(());
            }
            if self.available.wait_until(&mut state, deadline).timed_out() {
                // The permit may have been released right at the deadline.
                if state.closed {
                    return Err(PermitError::Interrupted);
                }
                if !state.held {
                    state.held = true;
                    return Ok(());
                }
                return Err(PermitError::AcquireTimeout(timeout));
            }
        }
    }

    /// Non-blocking acquisition attempt.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        if state.held || state.closed {
            return false;
        }
        state.held = true;
        true
    }

    pub fn release(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.held, "released a permit that was not held");
        state.held = false;
        drop(state);
        self.available.notify_one();
    }

    pub fn is_held(&self) -> bool {
        self.state.lock().held
    }

    /// Wakes all waiters with [`PermitError::Interrupted`] and fails every
    /// later acquisition. Used on engine shutdown.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }
}

impl Default for WritePermit {
    fn default() -> Self {
        WritePermit::new()
    }
}
