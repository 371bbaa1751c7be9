//! Event parsing and projection folding.
//!
//! `parse_line` maps one raw journal line to at most one canonical
//! event. `ProjectionSet::fold` then updates every projection whose fold
//! function cares about that event. The tag set is closed and
//! enumerable: known tags fold into named projections, a short list of
//! noisy tags is dropped outright, and everything else is recorded as a
//! generic game event that folds into nothing.
//!
//! Folding is pure — no clock reads, no I/O. Cross-event memory (jump
//! intervals, for instance) lives in ordinary projection fields, so
//! replaying the same events from empty state reproduces the same
//! values.

use jiff::Timestamp;
use serde_json::Value;

use crate::model::{
    Cargo, Contact, CurrentStatus, DockingEvents, DockingOutcome, Event, EventPayload, Location,
    ProjectionName, ProjectionSnapshot, ProjectionValue, Route, ShipStatus, Target,
};

/// High-frequency tags with no bearing on any projection or on reply
/// context. Dropped before they become events at all.
const IGNORED_TAGS: [&str; 3] = ["Music", "ReceiveText", "FSSSignalDiscovered"];

/// Errors from parsing a single raw journal line.
///
/// Always recoverable: the offending line is skipped and folding
/// continues with the next one.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("record is not an object")]
    NotAnObject,

    #[error("record has no \"{0}\" field")]
    MissingField(&'static str),

    #[error("invalid timestamp: {0}")]
    Timestamp(String),
}

/// A raw journal record mapped to its canonical parts, or intentionally
/// dropped.
#[derive(Debug, PartialEq)]
pub enum ParseOutcome {
    /// A record worth keeping: journal tag, journal timestamp, and the
    /// full record body.
    Record {
        name: String,
        timestamp: Timestamp,
        data: Value,
    },

    /// A known-noisy tag, dropped by design.
    Ignored,
}

/// Parses one journal line into at most one canonical record.
pub fn parse_line(line: &str) -> Result<ParseOutcome, ParseError> {
    let data: Value = serde_json::from_str(line)?;
    if !data.is_object() {
        return Err(ParseError::NotAnObject);
    }

    let name = data
        .get("event")
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingField("event"))?
        .to_string();

    if IGNORED_TAGS.contains(&name.as_str()) {
        return Ok(ParseOutcome::Ignored);
    }

    let timestamp = data
        .get("timestamp")
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingField("timestamp"))?
        .parse::<Timestamp>()
        .map_err(|e| ParseError::Timestamp(e.to_string()))?;

    Ok(ParseOutcome::Record {
        name,
        timestamp,
        data,
    })
}

/// One projection's live state: the folded value, provenance, and a
/// dirty flag for the persistence pass.
#[derive(Debug, Default, Clone, PartialEq)]
struct Tracked<T> {
    value: T,
    last_event: Option<u64>,
    dirty: bool,
}

impl<T> Tracked<T> {
    fn update(&mut self, seq: u64, f: impl FnOnce(&mut T)) {
        f(&mut self.value);
        self.last_event = Some(seq);
        self.dirty = true;
    }
}

/// All named projections, folded together from the event stream.
///
/// Written only by the engine's poll thread; readers get snapshots.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ProjectionSet {
    status: Tracked<CurrentStatus>,
    location: Tracked<Location>,
    target: Tracked<Target>,
    docking: Tracked<DockingEvents>,
    cargo: Tracked<Cargo>,
    route: Tracked<Route>,
}

impl ProjectionSet {
    /// Folds one event into every projection that cares about it.
    ///
    /// Non-game events fold into nothing, as do game events with an
    /// unknown tag — those are recorded in the history but change no
    /// named projection.
    pub fn fold(&mut self, event: &Event) {
        let EventPayload::Game { name, data } = &event.payload else {
            return;
        };
        let seq = event.seq;

        match name.as_str() {
            "Docked" => {
                self.status.update(seq, |s| {
                    s.docked = true;
                    s.status = ShipStatus::InStation;
                });
                self.location.update(seq, |l| {
                    l.station = str_field(data, "StationName");
                    if let Some(system) = str_field(data, "StarSystem") {
                        l.star_system = Some(system);
                    }
                });
            }
            "Undocked" => {
                self.status.update(seq, |s| {
                    s.docked = false;
                    s.status = ShipStatus::InFlight;
                });
                self.location.update(seq, |l| l.station = None);
            }
            "Touchdown" => {
                self.status.update(seq, |s| {
                    s.landed = true;
                    s.status = ShipStatus::Landed;
                });
                if let Some(body) = str_field(data, "Body") {
                    self.location.update(seq, |l| l.body = Some(body));
                }
            }
            "Liftoff" => {
                self.status.update(seq, |s| {
                    s.landed = false;
                    s.status = ShipStatus::InFlight;
                });
            }
            "FSDJump" => {
                let at = event.timestamp;
                self.route.update(seq, |v| {
                    v.last_jump_interval_secs = v
                        .last_jump_at
                        .map(|prev| at.duration_since(prev).as_secs());
                    v.last_jump_at = Some(at);
                    v.jumps += 1;
                });
                self.location.update(seq, |l| {
                    l.star_system = str_field(data, "StarSystem");
                    l.station = None;
                    l.body = None;
                    l.coordinates = coords_field(data);
                });
                self.status.update(seq, |s| {
                    s.docked = false;
                    s.status = ShipStatus::InSupercruise;
                });
            }
            "SupercruiseEntry" => {
                self.status
                    .update(seq, |s| s.status = ShipStatus::InSupercruise);
            }
            "SupercruiseExit" => {
                self.status.update(seq, |s| s.status = ShipStatus::InFlight);
                if let Some(body) = str_field(data, "Body") {
                    self.location.update(seq, |l| l.body = Some(body));
                }
            }
            "Location" => {
                self.location.update(seq, |l| {
                    l.star_system = str_field(data, "StarSystem");
                    l.station = str_field(data, "StationName");
                    l.body = str_field(data, "Body");
                    l.coordinates = coords_field(data);
                });
                let docked = data.get("Docked").and_then(Value::as_bool).unwrap_or(false);
                self.status.update(seq, |s| {
                    s.docked = docked;
                    if docked {
                        s.status = ShipStatus::InStation;
                    }
                });
            }
            "ShieldState" => {
                let up = data
                    .get("ShieldsUp")
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                self.status.update(seq, |s| s.shields_up = up);
            }
            "ShipTargeted" => {
                let locked = data
                    .get("TargetLocked")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                self.target.update(seq, |t| {
                    t.contact = locked.then(|| Contact {
                        ship: str_field(data, "Ship"),
                        pilot: str_field(data, "PilotName"),
                    });
                });
            }
            "Cargo" => {
                self.cargo.update(seq, |c| {
                    c.counts.clear();
                    let Some(inventory) = data.get("Inventory").and_then(Value::as_array) else {
                        return;
                    };
                    for item in inventory {
                        let Some(name) = item.get("Name").and_then(Value::as_str) else {
                            continue;
                        };
                        let count = item.get("Count").and_then(Value::as_u64).unwrap_or(0);
                        c.counts.insert(name.to_string(), count);
                    }
                });
            }
            "CollectCargo" => {
                if let Some(kind) = str_field(data, "Type") {
                    self.cargo
                        .update(seq, |c| *c.counts.entry(kind).or_insert(0) += 1);
                }
            }
            "EjectCargo" => {
                if let Some(kind) = str_field(data, "Type") {
                    self.cargo.update(seq, |c| {
                        let count = data.get("Count").and_then(Value::as_u64).unwrap_or(1);
                        match c.counts.get_mut(&kind) {
                            Some(held) if *held > count => *held -= count,
                            Some(_) => {
                                c.counts.remove(&kind);
                            }
                            None => {}
                        }
                    });
                }
            }
            "DockingRequested" => self.fold_docking(seq, data, DockingOutcome::Requested),
            "DockingGranted" => self.fold_docking(seq, data, DockingOutcome::Granted),
            "DockingDenied" => self.fold_docking(seq, data, DockingOutcome::Denied),
            "DockingCancelled" => self.fold_docking(seq, data, DockingOutcome::Cancelled),
            "DockingTimeout" => self.fold_docking(seq, data, DockingOutcome::Timeout),
            // Unknown tag: recorded in history, folds into nothing.
            _ => {}
        }
    }

    fn fold_docking(&mut self, seq: u64, data: &Value, outcome: DockingOutcome) {
        self.docking.update(seq, |d| {
            d.last = Some(outcome);
            if let Some(station) = str_field(data, "StationName") {
                d.station = Some(station);
            }
            d.landing_pad = match outcome {
                DockingOutcome::Granted => data
                    .get("LandingPad")
                    .and_then(Value::as_u64)
                    .and_then(|p| u32::try_from(p).ok()),
                _ => None,
            };
        });
    }

    /// A point-in-time copy of the named projection.
    pub fn snapshot(&self, name: ProjectionName) -> ProjectionSnapshot {
        let (value, last_event) = match name {
            ProjectionName::CurrentStatus => (
                ProjectionValue::CurrentStatus(self.status.value.clone()),
                self.status.last_event,
            ),
            ProjectionName::Location => (
                ProjectionValue::Location(self.location.value.clone()),
                self.location.last_event,
            ),
            ProjectionName::Target => (
                ProjectionValue::Target(self.target.value.clone()),
                self.target.last_event,
            ),
            ProjectionName::DockingEvents => (
                ProjectionValue::DockingEvents(self.docking.value.clone()),
                self.docking.last_event,
            ),
            ProjectionName::Cargo => (
                ProjectionValue::Cargo(self.cargo.value.clone()),
                self.cargo.last_event,
            ),
            ProjectionName::Route => (
                ProjectionValue::Route(self.route.value.clone()),
                self.route.last_event,
            ),
        };
        ProjectionSnapshot { value, last_event }
    }

    /// Drains the snapshots of every projection mutated since the last
    /// call, for the persistence pass.
    pub fn take_dirty(&mut self) -> Vec<ProjectionSnapshot> {
        let mut dirty = Vec::new();
        for name in ProjectionName::ALL {
            if self.is_dirty(name) {
                dirty.push(self.snapshot(name));
                self.clear_dirty(name);
            }
        }
        dirty
    }

    /// Installs a persisted value during startup rehydration.
    pub fn rehydrate(&mut self, snapshot: ProjectionSnapshot) {
        let last_event = snapshot.last_event;
        match snapshot.value {
            ProjectionValue::CurrentStatus(v) => {
                self.status.value = v;
                self.status.last_event = last_event;
            }
            ProjectionValue::Location(v) => {
                self.location.value = v;
                self.location.last_event = last_event;
            }
            ProjectionValue::Target(v) => {
                self.target.value = v;
                self.target.last_event = last_event;
            }
            ProjectionValue::DockingEvents(v) => {
                self.docking.value = v;
                self.docking.last_event = last_event;
            }
            ProjectionValue::Cargo(v) => {
                self.cargo.value = v;
                self.cargo.last_event = last_event;
            }
            ProjectionValue::Route(v) => {
                self.route.value = v;
                self.route.last_event = last_event;
            }
        }
    }

    fn is_dirty(&self, name: ProjectionName) -> bool {
        match name {
            ProjectionName::CurrentStatus => self.status.dirty,
            ProjectionName::Location => self.location.dirty,
            ProjectionName::Target => self.target.dirty,
            ProjectionName::DockingEvents => self.docking.dirty,
            ProjectionName::Cargo => self.cargo.dirty,
            ProjectionName::Route => self.route.dirty,
        }
    }

    fn clear_dirty(&mut self, name: ProjectionName) {
        match name {
            ProjectionName::CurrentStatus => self.status.dirty = false,
            ProjectionName::Location => self.location.dirty = false,
            ProjectionName::Target => self.target.dirty = false,
            ProjectionName::DockingEvents => self.docking.dirty = false,
            ProjectionName::Cargo => self.cargo.dirty = false,
            ProjectionName::Route => self.route.dirty = false,
        }
    }
}

fn str_field(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(str::to_string)
}

fn coords_field(data: &Value) -> Option<[f64; 3]> {
    let pos = data.get("StarPos")?.as_array()?;
    match pos.as_slice() {
        [x, y, z] => Some([x.as_f64()?, y.as_f64()?, z.as_f64()?]),
        _ => None,
    }
}
