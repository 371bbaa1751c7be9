//! The core engine: journal in, projections and replies out.
//!
//! One background thread polls the journal tailer on a fixed interval.
//! That thread is the sole writer of the log cursor and the projection
//! state; everything else reads snapshots or appends events. Per poll
//! batch: parse, persist, fold, notify waiters, feed the reply
//! scheduler. Any number of other threads may append `user`,
//! `assistant`, `tool`, or `external` events concurrently.
//!
//! Nothing in the poll loop is fatal: malformed lines are skipped and
//! logged, unreadable directories retried next poll, and a persistence
//! failure costs durability for that one event, never correctness of
//! the in-memory state.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use jiff::Timestamp;
use tracing::{error, info, warn};

use crate::fold::{self, ParseOutcome, ProjectionSet};
use crate::journal::{JournalTailer, StartPosition};
use crate::model::{Event, EventPayload, ProjectionName, ProjectionSnapshot, ProjectionValue};
use crate::reply::{ReplyPolicy, ReplyScheduler, Responder};
use crate::storage::{Storage, StorageError};
use crate::wait::{self, ProjectionHub};

/// How often the poll loop re-checks the stop flag while sleeping.
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// What the engine watches and how eagerly.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub journal_dir: PathBuf,
    pub journal_prefix: String,
    pub journal_suffix: String,
    pub poll_interval: Duration,
    pub reply: ReplyPolicy,
}

/// The telemetry-synchronization core.
///
/// Owns the store, the projection hub, and the reply scheduler; runs
/// the tailer on a background thread between [`start`] and [`stop`].
///
/// [`start`]: Self::start
/// [`stop`]: Self::stop
pub struct Engine {
    storage: Arc<Storage>,
    hub: Arc<ProjectionHub>,
    scheduler: Arc<ReplyScheduler>,
    responder: Arc<dyn Responder>,
    options: EngineOptions,
    tail_start: StartPosition,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Engine {
    /// Builds an engine over an open store, rehydrating persisted
    /// projections.
    ///
    /// When any projection rehydrates, the tailer starts at the end of
    /// the current journal file — the folded history is already in the
    /// store. A fresh store reads the current file from the top.
    pub fn new(
        options: EngineOptions,
        storage: Storage,
        responder: Arc<dyn Responder>,
    ) -> Result<Self, StorageError> {
        let mut set = ProjectionSet::default();
        let mut rehydrated = false;
        for name in ProjectionName::ALL {
            if let Some(snapshot) = storage.load_projection(name)? {
                set.rehydrate(snapshot);
                rehydrated = true;
            }
        }
        let tail_start = if rehydrated {
            info!("projections rehydrated; tailing from end of current journal");
            StartPosition::End
        } else {
            StartPosition::Beginning
        };

        Ok(Self {
            storage: Arc::new(storage),
            hub: Arc::new(ProjectionHub::new(set)),
            scheduler: Arc::new(ReplyScheduler::new(options.reply.clone())),
            responder,
            options,
            tail_start,
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        })
    }

    /// Spawns the background poll thread. Idempotent.
    pub fn start(&mut self) {
        if self.worker.is_some() {
            return;
        }
        self.stop.store(false, Ordering::SeqCst);

        let mut tailer = JournalTailer::new(
            self.options.journal_dir.clone(),
            self.options.journal_prefix.clone(),
            self.options.journal_suffix.clone(),
            self.tail_start,
        );
        let storage = Arc::clone(&self.storage);
        let hub = Arc::clone(&self.hub);
        let scheduler = Arc::clone(&self.scheduler);
        let responder = Arc::clone(&self.responder);
        let stop = Arc::clone(&self.stop);
        let interval = self.options.poll_interval;

        self.worker = Some(thread::spawn(move || {
            info!("journal poll thread started");
            while !stop.load(Ordering::SeqCst) {
                let lines = tailer.poll();
                if !lines.is_empty() {
                    let batch = ingest(&storage, &lines);
                    if !batch.is_empty() {
                        let dirty = hub.apply(&batch);
                        persist_projections(&storage, &dirty);
                        if let Some(new_events) = scheduler.observe(&batch) {
                            dispatch(&storage, &scheduler, responder.as_ref(), new_events);
                        }
                    }
                }
                sleep_until_stop(&stop, interval);
            }
            info!("journal poll thread stopped");
        }));
    }

    /// Stops the poll thread and waits for it to exit.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            error!("journal poll thread panicked");
        }
    }

    /// Appends an externally produced event: user input, assistant
    /// output, completion signals, tool results.
    ///
    /// The event is persisted (with retry) before the scheduler sees
    /// it; a persistence failure surfaces here and the event is not
    /// delivered. When the event triggers a reply cycle, the responder
    /// runs on the calling thread, outside all locks.
    pub fn append(&self, payload: EventPayload) -> Result<Event, StorageError> {
        let event = self.storage.append_event(&payload, Timestamp::now())?;
        if let Some(new_events) = self.scheduler.observe(std::slice::from_ref(&event)) {
            dispatch(
                &self.storage,
                &self.scheduler,
                self.responder.as_ref(),
                new_events,
            );
        }
        Ok(event)
    }

    /// Signals that the current reply cycle is complete.
    ///
    /// A queued `user` event starts the next cycle immediately, on the
    /// calling thread.
    pub fn reply_finished(&self) {
        if let Some(new_events) = self.scheduler.finish() {
            dispatch(
                &self.storage,
                &self.scheduler,
                self.responder.as_ref(),
                new_events,
            );
        }
    }

    /// Blocks until the named projection satisfies the predicate, or
    /// the timeout elapses. See [`ProjectionHub::wait_for`].
    pub fn wait_for(
        &self,
        name: ProjectionName,
        predicate: impl Fn(&ProjectionValue) -> bool,
        timeout: Duration,
    ) -> wait::Result<ProjectionSnapshot> {
        self.hub.wait_for(name, predicate, timeout)
    }

    /// A point-in-time copy of the named projection.
    pub fn snapshot(&self, name: ProjectionName) -> ProjectionSnapshot {
        self.hub.snapshot(name)
    }

    /// The most recent `n` persisted events, most recent first.
    pub fn recent_events(&self, n: usize) -> Result<Vec<Event>, StorageError> {
        self.storage.recent_events(n)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Parses and persists one poll's worth of lines, in order.
///
/// Malformed lines are skipped and logged — they mutate nothing and are
/// never persisted. A persistence failure on one line is logged at
/// error and costs that line's durability, not the batch's.
fn ingest(storage: &Storage, lines: &[String]) -> Vec<Event> {
    let mut batch = Vec::with_capacity(lines.len());
    for line in lines {
        match fold::parse_line(line) {
            Ok(ParseOutcome::Record {
                name,
                timestamp,
                data,
            }) => {
                let payload = EventPayload::Game { name, data };
                match storage.append_event(&payload, timestamp) {
                    Ok(event) => batch.push(event),
                    Err(e) => error!(error = %e, "failed to persist journal event"),
                }
            }
            Ok(ParseOutcome::Ignored) => {}
            Err(e) => warn!(error = %e, line = %line, "skipping malformed journal line"),
        }
    }
    batch
}

fn persist_projections(storage: &Storage, dirty: &[ProjectionSnapshot]) {
    for snapshot in dirty {
        if let Err(e) = storage.save_projection(snapshot) {
            error!(
                projection = snapshot.value.name().as_str(),
                error = %e,
                "failed to persist projection"
            );
        }
    }
}

/// Runs one responder invocation, outside all scheduler locks.
fn dispatch(
    storage: &Storage,
    scheduler: &ReplyScheduler,
    responder: &dyn Responder,
    new_events: Vec<Event>,
) {
    let mut history = match storage.recent_events(scheduler.policy().history_limit) {
        Ok(history) => history,
        Err(e) => {
            warn!(error = %e, "could not load history for reply; using empty context");
            Vec::new()
        }
    };
    // Stored most-recent-first; the responder reads chronologically.
    history.reverse();

    responder.respond(&history, &new_events);
    scheduler.invocation_returned();
}

fn sleep_until_stop(stop: &AtomicBool, interval: Duration) {
    let mut remaining = interval;
    while !remaining.is_zero() && !stop.load(Ordering::SeqCst) {
        let step = remaining.min(STOP_CHECK_INTERVAL);
        thread::sleep(step);
        remaining -= step;
    }
}
