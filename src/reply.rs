//! Reply scheduling: decide when one response-generation cycle runs.
//!
//! A two-state machine — `Idle` and `Replying` — guards the downstream
//! response generator. The decision to start a cycle is a single
//! critical section; the generator itself always runs outside the lock.
//! At most one invocation's result is outstanding at any time: a trigger
//! while replying is coalesced into the next idle cycle, never queued as
//! a second invocation and never an error.
//!
//! Events observed while replying are kept pending and seed the next
//! trigger. Pending `game` events beyond a configurable budget are
//! compacted into a single summary event so the context handed to the
//! generator stays bounded.

use std::mem;
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info};

use crate::model::{Event, EventPayload};

/// Tag of the synthetic game event that stands in for compacted
/// telemetry.
pub const SUMMARY_TAG: &str = "TelemetrySummary";

/// How much pending telemetry survives into a trigger batch.
///
/// The most recent `verbatim_games` game events pass through untouched;
/// the `summarized_games` before them collapse into one summary event
/// naming their tags; anything older is dropped with a count. The
/// cutoffs are policy, not constants.
#[derive(Debug, Clone)]
pub struct ReplyPolicy {
    pub verbatim_games: usize,
    pub summarized_games: usize,

    /// How much persisted history accompanies a trigger.
    pub history_limit: usize,
}

impl Default for ReplyPolicy {
    fn default() -> Self {
        Self {
            verbatim_games: 5,
            summarized_games: 15,
            history_limit: 100,
        }
    }
}

/// Generates a response from the persisted history plus the newly
/// arrived events.
///
/// Runs outside every scheduler lock and may take arbitrarily long.
/// Expected to eventually feed an `assistant` event back into the core,
/// and an `assistant_completed` event once any external playback of the
/// response has finished.
pub trait Responder: Send + Sync {
    fn respond(&self, history: &[Event], new_events: &[Event]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Replying,
}

#[derive(Debug)]
struct State {
    phase: Phase,
    /// True while a `respond` call has not yet returned.
    generating: bool,
    pending: Vec<Event>,
}

/// The reply state machine. One lock guards the state; decisions come
/// out as batches for the caller to dispatch outside it.
pub struct ReplyScheduler {
    state: Mutex<State>,
    policy: ReplyPolicy,
}

impl ReplyScheduler {
    pub fn new(policy: ReplyPolicy) -> Self {
        Self {
            state: Mutex::new(State {
                phase: Phase::Idle,
                generating: false,
                pending: Vec::new(),
            }),
            policy,
        }
    }

    pub fn policy(&self) -> &ReplyPolicy {
        &self.policy
    }

    /// Feeds newly appended events to the state machine.
    ///
    /// Returns the batch to hand to the responder when this batch
    /// triggers a cycle: the scheduler was idle and the batch carried at
    /// least one `user` event. An `assistant_completed` event observed
    /// while replying — with no generation in flight — returns the
    /// machine to idle first, so playback completion can release the
    /// next cycle.
    pub fn observe(&self, batch: &[Event]) -> Option<Vec<Event>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.pending.extend(batch.iter().cloned());

        let completed = batch
            .iter()
            .any(|e| matches!(e.payload, EventPayload::AssistantCompleted));
        if completed && state.phase == Phase::Replying && !state.generating {
            info!("assistant finished speaking; reply cycle closed");
            state.phase = Phase::Idle;
        }

        self.try_trigger(&mut state)
    }

    /// Marks the in-flight `respond` call as returned.
    ///
    /// Not a completion signal: the cycle stays open until [`finish`]
    /// or an `assistant_completed` event closes it.
    ///
    /// [`finish`]: Self::finish
    pub fn invocation_returned(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.generating = false;
    }

    /// Signals completion of the current cycle, success or failure.
    ///
    /// Returns the next trigger batch when events queued during the
    /// cycle warrant an immediate follow-up.
    pub fn finish(&self) -> Option<Vec<Event>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.generating = false;
        if state.phase == Phase::Replying {
            state.phase = Phase::Idle;
        }
        self.try_trigger(&mut state)
    }

    /// True while a reply cycle is open.
    pub fn is_replying(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .phase
            == Phase::Replying
    }

    fn try_trigger(&self, state: &mut State) -> Option<Vec<Event>> {
        if state.phase == Phase::Replying {
            // Coalesced: the pending events seed the next idle cycle.
            debug!("reply already in flight; trigger coalesced");
            return None;
        }
        if !state.pending.iter().any(|e| e.payload.is_user()) {
            return None;
        }

        state.phase = Phase::Replying;
        state.generating = true;
        let drained = mem::take(&mut state.pending);
        Some(compact(drained, &self.policy))
    }
}

/// Applies the telemetry budget to a drained batch.
///
/// Order is preserved. Non-game events always pass through verbatim.
/// The summary event reuses the sequence number and timestamp of the
/// newest event it absorbs — no clock reads here.
fn compact(events: Vec<Event>, policy: &ReplyPolicy) -> Vec<Event> {
    let game_count = events
        .iter()
        .filter(|e| matches!(e.payload, EventPayload::Game { .. }))
        .count();
    if game_count <= policy.verbatim_games {
        return events;
    }

    let keep_from = game_count - policy.verbatim_games;
    let summarize_from = keep_from.saturating_sub(policy.summarized_games);
    let dropped = summarize_from;

    let mut summarized_tags = Vec::new();
    let mut summary_basis: Option<(u64, jiff::Timestamp)> = None;
    let mut out = Vec::with_capacity(events.len() - keep_from + 1);
    let mut game_index = 0;

    for event in events {
        let EventPayload::Game { name, .. } = &event.payload else {
            out.push(event);
            continue;
        };

        if game_index >= keep_from {
            out.push(event);
        } else if game_index >= summarize_from {
            summarized_tags.push(name.clone());
            summary_basis = Some((event.seq, event.timestamp));
            if game_index + 1 == keep_from {
                let (seq, timestamp) = summary_basis.take().unwrap_or((event.seq, event.timestamp));
                out.push(Event {
                    seq,
                    timestamp,
                    payload: EventPayload::Game {
                        name: SUMMARY_TAG.to_string(),
                        data: serde_json::json!({
                            "events": mem::take(&mut summarized_tags),
                            "dropped": dropped,
                        }),
                    },
                });
            }
        } else {
            // Beyond both budgets: dropped, counted in the summary.
            summary_basis = Some((event.seq, event.timestamp));
        }
        game_index += 1;
    }
    out
}
