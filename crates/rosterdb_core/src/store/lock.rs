//! Row locks, cancellation tokens and scan controls.
//!
//! # Responsibility
//! - Track exclusive row locks held by sessions for pessimistic reads.
//! - Let a blocked session wait, bounded by a deadline, until the holder
//!   releases.
//!
//! # Invariants
//! - A row is held by at most one session; re-acquiring a held row is a
//!   no-op for its owner.
//! - Waiting never holds the store connection, so holders can always make
//!   progress and release.

use crate::model::value::RecordId;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

type RowKey = (&'static str, RecordId);

/// Lock table shared by every session of a store.
#[derive(Default)]
pub(crate) struct RowLockManager {
    held: Mutex<HashMap<RowKey, Uuid>>,
    released: Condvar,
}

impl RowLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any row of `entity` is held by a session other than `owner`.
    pub fn has_foreign_locks(&self, owner: Uuid, entity: &'static str) -> bool {
        self.held
            .lock()
            .iter()
            .any(|((held_entity, _), holder)| *held_entity == entity && *holder != owner)
    }

    /// First id in `ids` held by another session.
    pub fn first_conflict(
        &self,
        owner: Uuid,
        entity: &'static str,
        ids: &[RecordId],
    ) -> Option<RecordId> {
        let held = self.held.lock();
        ids.iter()
            .find(|id| {
                held.get(&(entity, (*id).clone()))
                    .is_some_and(|holder| *holder != owner)
            })
            .cloned()
    }

    /// Takes every row in `ids` for `owner`, or none of them.
    ///
    /// Returns the first conflicting id when another session holds one.
    pub fn try_acquire_all(
        &self,
        owner: Uuid,
        entity: &'static str,
        ids: &[RecordId],
    ) -> Result<usize, RecordId> {
        let mut held = self.held.lock();
        if let Some(conflict) = ids.iter().find(|id| {
            held.get(&(entity, (*id).clone()))
                .is_some_and(|holder| *holder != owner)
        }) {
            return Err(conflict.clone());
        }
        let mut acquired = 0;
        for id in ids {
            if held.insert((entity, id.clone()), owner).is_none() {
                acquired += 1;
            }
        }
        Ok(acquired)
    }

    /// Releases every row held by `owner` and wakes waiters.
    pub fn release_all(&self, owner: Uuid) -> usize {
        let mut held = self.held.lock();
        let before = held.len();
        held.retain(|_, holder| *holder != owner);
        let released = before - held.len();
        if released > 0 {
            self.released.notify_all();
        }
        released
    }

    pub fn held_by(&self, owner: Uuid) -> usize {
        self.held
            .lock()
            .values()
            .filter(|holder| **holder == owner)
            .count()
    }

    /// Blocks until `id` is no longer held by another session or
    /// `deadline` passes. Returns whether the row became available.
    pub fn wait_for_release(
        &self,
        owner: Uuid,
        entity: &'static str,
        id: &RecordId,
        deadline: Instant,
    ) -> bool {
        let key = (entity, id.clone());
        let mut held = self.held.lock();
        loop {
            match held.get(&key) {
                Some(holder) if *holder != owner => {}
                _ => return true,
            }
            if self.released.wait_until(&mut held, deadline).timed_out() {
                return !held.get(&key).is_some_and(|holder| *holder != owner);
            }
        }
    }
}

/// Cooperative cancellation flag shared between a scan and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Per-scan controls: cancellation and an optional lock-timeout override.
#[derive(Debug, Clone, Default)]
pub struct ScanControl {
    cancellation: Option<CancellationToken>,
    lock_timeout: Option<Duration>,
}

impl ScanControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::{CancellationToken, RowLockManager, ScanControl};
    use crate::model::value::RecordId;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};
    use uuid::Uuid;

    #[test]
    fn acquisition_is_all_or_nothing_and_reentrant() {
        let locks = RowLockManager::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let ids = [RecordId::from(1), RecordId::from(2)];

        assert_eq!(locks.try_acquire_all(a, "Member", &ids), Ok(2));
        assert_eq!(locks.try_acquire_all(a, "Member", &ids), Ok(0));
        assert_eq!(
            locks.try_acquire_all(b, "Member", &[RecordId::from(3), RecordId::from(2)]),
            Err(RecordId::from(2))
        );
        assert_eq!(locks.held_by(b), 0);
        assert!(locks.has_foreign_locks(b, "Member"));
        assert!(!locks.has_foreign_locks(b, "Team"));
        assert_eq!(locks.first_conflict(a, "Member", &ids), None);
    }

    #[test]
    fn waiter_wakes_on_release_and_times_out_otherwise() {
        let locks = Arc::new(RowLockManager::new());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let id = RecordId::from(7);
        locks.try_acquire_all(a, "Member", &[id.clone()]).unwrap();

        let deadline = Instant::now() + Duration::from_millis(20);
        assert!(!locks.wait_for_release(b, "Member", &id, deadline));

        let releaser = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                locks.release_all(a)
            })
        };
        let deadline = Instant::now() + Duration::from_secs(5);
        assert!(locks.wait_for_release(b, "Member", &id, deadline));
        assert_eq!(releaser.join().unwrap(), 1);
    }

    #[test]
    fn scan_control_reports_cancellation() {
        let token = CancellationToken::new();
        let control = ScanControl::new().with_cancellation(token.clone());
        assert!(!control.is_cancelled());
        token.cancel();
        assert!(control.is_cancelled());
    }
}
