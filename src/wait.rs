//! Condition waiting: block until a projection satisfies a predicate.
//!
//! The hub owns the live projection state. The engine's poll thread is
//! its only writer; any number of other threads wait on it. A waiter
//! blocks on a condition variable and re-evaluates its predicate against
//! the current value on every change notification — no polling loops,
//! no sleeps, no stale snapshots.
//!
//! This is the bridge between a blind fire-and-forget command and its
//! eventually observed effect: send the input, then wait for the
//! projection that will confirm it.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;
use uuid::Uuid;

use crate::fold::ProjectionSet;
use crate::model::{Event, ProjectionName, ProjectionSnapshot, ProjectionValue};

/// Failure modes of [`ProjectionHub::wait_for`].
///
/// Timeout is the expected outcome of a condition that never came true —
/// a first-class variant, distinct from any genuine fault.
#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("condition not met within {0:?}")]
    Timeout(Duration),
}

pub type Result<T> = core::result::Result<T, WaitError>;

/// A pending wait: predicate target plus deadline, discarded on resolve
/// or timeout. Tracked for introspection only.
#[derive(Debug, Clone)]
struct Subscription {
    id: Uuid,
    projection: ProjectionName,
}

/// Shared projection state with change notification.
pub struct ProjectionHub {
    state: Mutex<ProjectionSet>,
    changed: Condvar,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl Default for ProjectionHub {
    fn default() -> Self {
        Self::new(ProjectionSet::default())
    }
}

impl ProjectionHub {
    pub fn new(set: ProjectionSet) -> Self {
        Self {
            state: Mutex::new(set),
            changed: Condvar::new(),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Folds a batch of events and wakes every pending waiter.
    ///
    /// Returns the snapshots of the projections the batch mutated, for
    /// the caller's persistence pass. Called only by the engine's poll
    /// thread — the single writer.
    pub fn apply(&self, events: &[Event]) -> Vec<ProjectionSnapshot> {
        let dirty = {
            let mut set = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            for event in events {
                set.fold(event);
            }
            set.take_dirty()
        };
        if !dirty.is_empty() {
            self.changed.notify_all();
        }
        dirty
    }

    /// A point-in-time copy of the named projection.
    pub fn snapshot(&self, name: ProjectionName) -> ProjectionSnapshot {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot(name)
    }

    /// Blocks until `predicate` holds for the named projection, or until
    /// `timeout` elapses.
    ///
    /// Returns immediately when the predicate already holds. Otherwise
    /// the call re-evaluates against the value current at each change
    /// notification and returns the first snapshot that matches —
    /// never one the predicate was false for.
    pub fn wait_for(
        &self,
        name: ProjectionName,
        predicate: impl Fn(&ProjectionValue) -> bool,
        timeout: Duration,
    ) -> Result<ProjectionSnapshot> {
        let deadline = Instant::now() + timeout;
        let mut set = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let snapshot = set.snapshot(name);
        if predicate(&snapshot.value) {
            return Ok(snapshot);
        }

        let id = self.subscribe(name);
        loop {
            let now = Instant::now();
            if now >= deadline {
                self.unsubscribe(id);
                return Err(WaitError::Timeout(timeout));
            }

            let (guard, _) = self
                .changed
                .wait_timeout(set, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            set = guard;

            let snapshot = set.snapshot(name);
            if predicate(&snapshot.value) {
                self.unsubscribe(id);
                return Ok(snapshot);
            }
        }
    }

    /// Number of waits currently pending, across all projections.
    pub fn pending_waits(&self) -> usize {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of waits currently pending on one projection.
    pub fn pending_waits_for(&self, name: ProjectionName) -> usize {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.projection == name)
            .count()
    }

    fn subscribe(&self, projection: ProjectionName) -> Uuid {
        let id = Uuid::new_v4();
        debug!(%id, projection = projection.as_str(), "condition wait registered");
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscription { id, projection });
        id
    }

    fn unsubscribe(&self, id: Uuid) {
        let mut subs = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subs.retain(|s| s.id != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::thread;

    use jiff::Timestamp;

    use crate::model::{EventPayload, ShipStatus};

    fn docked_event(seq: u64) -> Event {
        Event {
            seq,
            timestamp: "2026-01-02T03:04:05Z".parse::<Timestamp>().unwrap(),
            payload: EventPayload::Game {
                name: "Docked".into(),
                data: serde_json::json!({
                    "timestamp": "2026-01-02T03:04:05Z",
                    "event": "Docked",
                    "StationName": "Azeban City",
                }),
            },
        }
    }

    fn is_in_station(value: &ProjectionValue) -> bool {
        matches!(
            value,
            ProjectionValue::CurrentStatus(s) if s.status == ShipStatus::InStation
        )
    }

    #[test]
    fn returns_immediately_when_predicate_already_holds() {
        let hub = ProjectionHub::default();
        hub.apply(&[docked_event(1)]);

        let snapshot = hub
            .wait_for(
                ProjectionName::CurrentStatus,
                is_in_station,
                Duration::from_millis(10),
            )
            .unwrap();
        assert_eq!(snapshot.last_event, Some(1));
    }

    #[test]
    fn wakes_when_a_later_event_satisfies_the_predicate() {
        let hub = Arc::new(ProjectionHub::default());

        let writer = {
            let hub = Arc::clone(&hub);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                hub.apply(&[docked_event(1)]);
            })
        };

        let snapshot = hub
            .wait_for(
                ProjectionName::CurrentStatus,
                is_in_station,
                Duration::from_secs(5),
            )
            .unwrap();
        assert_eq!(snapshot.last_event, Some(1));
        writer.join().unwrap();
    }

    #[test]
    fn times_out_when_condition_never_holds() {
        let hub = ProjectionHub::default();

        let err = hub
            .wait_for(
                ProjectionName::CurrentStatus,
                is_in_station,
                Duration::from_millis(50),
            )
            .unwrap_err();
        assert!(matches!(err, WaitError::Timeout(_)));
        assert_eq!(hub.pending_waits(), 0);
    }

    #[test]
    fn unrelated_updates_do_not_resolve_the_wait() {
        let hub = Arc::new(ProjectionHub::default());

        let writer = {
            let hub = Arc::clone(&hub);
            thread::spawn(move || {
                // A shield event changes CurrentStatus but not to in_station.
                hub.apply(&[Event {
                    seq: 1,
                    timestamp: "2026-01-02T03:04:05Z".parse::<Timestamp>().unwrap(),
                    payload: EventPayload::Game {
                        name: "ShieldState".into(),
                        data: serde_json::json!({"ShieldsUp": false}),
                    },
                }]);
            })
        };
        writer.join().unwrap();

        let err = hub
            .wait_for(
                ProjectionName::CurrentStatus,
                is_in_station,
                Duration::from_millis(50),
            )
            .unwrap_err();
        assert!(matches!(err, WaitError::Timeout(_)));
    }

    #[test]
    fn fans_out_to_multiple_waiters() {
        let hub = Arc::new(ProjectionHub::default());

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let hub = Arc::clone(&hub);
                thread::spawn(move || {
                    hub.wait_for(
                        ProjectionName::CurrentStatus,
                        is_in_station,
                        Duration::from_secs(5),
                    )
                })
            })
            .collect();

        // Give the waiters time to register before the update lands.
        thread::sleep(Duration::from_millis(100));
        assert_eq!(hub.pending_waits_for(ProjectionName::CurrentStatus), 3);
        hub.apply(&[docked_event(1)]);

        for waiter in waiters {
            let snapshot = waiter.join().unwrap().unwrap();
            assert_eq!(snapshot.last_event, Some(1));
        }
        assert_eq!(hub.pending_waits(), 0);
    }

    #[test]
    fn apply_returns_dirty_snapshots_for_persistence() {
        let hub = ProjectionHub::default();
        let dirty = hub.apply(&[docked_event(1)]);

        // Docked touches CurrentStatus and Location.
        assert_eq!(dirty.len(), 2);
        assert!(hub.apply(&[]).is_empty());
    }
}
