use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::error::CoordinatorError;
use crate::session::SessionId;

/// Cleanup callback installed at registration time and invoked by the sweep
/// when the session misses its heartbeat deadline. It must perform the same
/// cleanup an abort from the session's own thread would: release the writer
/// permit if held, remove the reader registration, and invalidate the
/// session's local state.
pub type TimeoutAction =
    Box<dyn FnOnce() -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + Sync>;

struct ActiveSession {
    last_heartbeat: Instant,
    action: Option<TimeoutAction>,
}

struct TimedOutSession {
    swept_at: Instant,
}

/// Tracks per-session transaction lifetimes and dispatches the session's
/// timeout action when its heartbeat budget is exceeded.
///
/// Both sweeps ([`check_for_timeouts`](Self::check_for_timeouts) and
/// [`remove_long_timed_out`](Self::remove_long_timed_out)) are expected to be
/// driven from a single scheduler thread so that timeout actions never run
/// concurrently with each other.
pub struct TxnCoordinator {
    active: DashMap<SessionId, ActiveSession>,
    timed_out: DashMap<SessionId, TimedOutSession>,
    transaction_timeout: Duration,
    keep_timed_out_multiplier: u32,
}

impl TxnCoordinator {
    pub fn new(transaction_timeout: Duration, keep_timed_out_multiplier: u32) -> Self {
        TxnCoordinator {
            active: DashMap::new(),
            timed_out: DashMap::new(),
            transaction_timeout,
            keep_timed_out_multiplier,
        }
    }

    /// Registers a session together with its timeout action.
    pub fn register(&self, id: SessionId, action: TimeoutAction) -> Result<(), CoordinatorError> {
        match self.active.entry(id) {
            dashmap::Entry::Occupied(_) => Err(CoordinatorError::AlreadyRegistered(id)),
            dashmap::Entry::Vacant(entry) => {
                entry.insert(ActiveSession {
                    last_heartbeat: Instant::now(),
                    action: Some(action),
                });
                Ok(())
            }
        }
    }

    /// Marks the session as alive. Called on every session operation.
    pub fn refresh_heartbeat(&self, id: SessionId) -> Result<(), CoordinatorError> {
        if let Some(mut session) = self.active.get_mut(&id) {
            session.last_heartbeat = Instant::now();
            return Ok(());
        }
        if self.timed_out.contains_key(&id) {
            return Err(CoordinatorError::TimedOut(id));
        }
        Err(CoordinatorError::NotRegistered(id))
    }

    /// Removes the session. A session that was swept in the meantime is
    /// removed from the timed-out table and surfaced as such.
    pub fn unregister(&self, id: SessionId) -> Result<(), CoordinatorError> {
        if self.active.remove(&id).is_some() {
            return Ok(());
        }
        if self.timed_out.remove(&id).is_some() {
            return Err(CoordinatorError::TimedOut(id));
        }
        Err(CoordinatorError::NotRegistered(id))
    }

    pub fn is_registered(&self, id: SessionId) -> bool {
        self.active.contains_key(&id)
    }

    pub fn is_timed_out(&self, id: SessionId) -> bool {
        self.timed_out.contains_key(&id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Sweeps sessions whose heartbeat deadline has elapsed, moving each to
    /// the timed-out table and invoking its timeout action exactly once.
    /// Action errors are logged, never propagated.
    pub fn check_for_timeouts(&self) {
        let now = Instant::now();
        let expired: Vec<SessionId> = self
            .active
            .iter()
            .filter(|entry| now.duration_since(entry.last_heartbeat) > self.transaction_timeout)
            .map(|entry| *entry.key())
            .collect();

        for id in expired {
            // Removing before running the action keeps the session's own
            // thread from racing a concurrent commit into the same cleanup.
            let Some((_, mut session)) = self.active.remove(&id) else {
                continue;
            };
            self.timed_out.insert(id, TimedOutSession { swept_at: now });
            debug!(session = id, "sweeping timed-out session");
            if let Some(action) = session.action.take()
                && let Err(err) = action()
            {
                warn!(session = id, error = %err, "timeout cleanup failed");
            }
        }
    }

    /// Drops timed-out entries retained longer than
    /// `transaction_timeout * keep_timed_out_multiplier`.
    pub fn remove_long_timed_out(&self) {
        let keep_for = self.transaction_timeout * self.keep_timed_out_multiplier;
        self.timed_out
            .retain(|_, session| session.swept_at.elapsed() <= keep_for);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;

    fn coordinator(timeout_ms: u64) -> TxnCoordinator {
        TxnCoordinator::new(Duration::from_millis(timeout_ms), 2)
    }

    fn noop_action() -> TimeoutAction {
        Box::new(|| Ok(()))
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let coordinator = coordinator(1000);
        coordinator.register(1, noop_action()).unwrap();
        assert!(matches!(
            coordinator.register(1, noop_action()),
            Err(CoordinatorError::AlreadyRegistered(1))
        ));
    }

    #[test]
    fn heartbeat_requires_registration() {
        let coordinator = coordinator(1000);
        assert!(matches!(
            coordinator.refresh_heartbeat(7),
            Err(CoordinatorError::NotRegistered(7))
        ));
        coordinator.register(7, noop_action()).unwrap();
        coordinator.refresh_heartbeat(7).unwrap();
        coordinator.unregister(7).unwrap();
    }

    #[test]
    fn sweep_runs_action_once_and_moves_session() {
        let coordinator = coordinator(10);
        let fired = Arc::new(AtomicUsize::new(0));
        let action = {
            let fired = Arc::clone(&fired);
            Box::new(move || {
                fired.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };
        coordinator.register(1, action).unwrap();

        thread::sleep(Duration::from_millis(30));
        coordinator.check_for_timeouts();
        coordinator.check_for_timeouts();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!coordinator.is_registered(1));
        assert!(coordinator.is_timed_out(1));
        assert!(matches!(
            coordinator.refresh_heartbeat(1),
            Err(CoordinatorError::TimedOut(1))
        ));
    }

    #[test]
    fn heartbeat_defers_the_sweep() {
        let coordinator = coordinator(50);
        coordinator.register(1, noop_action()).unwrap();

        for _ in 0..4 {
            thread::sleep(Duration::from_millis(20));
            coordinator.refresh_heartbeat(1).unwrap();
        }
        coordinator.check_for_timeouts();
        assert!(coordinator.is_registered(1));
        coordinator.unregister(1).unwrap();
    }

    #[test]
    fn unregister_after_sweep_surfaces_timeout_and_clears_entry() {
        let coordinator = coordinator(10);
        coordinator.register(1, noop_action()).unwrap();
        thread::sleep(Duration::from_millis(30));
        coordinator.check_for_timeouts();

        assert!(matches!(
            coordinator.unregister(1),
            Err(CoordinatorError::TimedOut(1))
        ));
        assert!(!coordinator.is_timed_out(1));
        assert!(matches!(
            coordinator.unregister(1),
            Err(CoordinatorError::NotRegistered(1))
        ));
    }

    #[test]
    fn long_timed_out_entries_are_reaped() {
        let coordinator = coordinator(10);
        coordinator.register(1, noop_action()).unwrap();
        thread::sleep(Duration::from_millis(30));
        coordinator.check_for_timeouts();
        assert!(coordinator.is_timed_out(1));

        // Retention is timeout * multiplier = 20ms.
        thread::sleep(Duration::from_millis(40));
        coordinator.remove_long_timed_out();
        assert!(!coordinator.is_timed_out(1));
    }

    #[test]
    fn action_errors_are_swallowed() {
        let coordinator = coordinator(10);
        coordinator
            .register(1, Box::new(|| Err("cleanup failed".into())))
            .unwrap();
        thread::sleep(Duration::from_millis(30));
        coordinator.check_for_timeouts();
        assert!(coordinator.is_timed_out(1));
    }
}
