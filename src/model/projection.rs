//! Projections: named, versioned materialized views folded from the
//! event stream.
//!
//! Each projection's value is a pure function of the event prefix folded
//! into it so far — replaying the same events from empty state reproduces
//! the same value. Versions invalidate persisted values across schema
//! changes rather than silently misreading old rows.

use std::collections::BTreeMap;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// Names of the projections the folder maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProjectionName {
    CurrentStatus,
    Location,
    Target,
    DockingEvents,
    Cargo,
    Route,
}

impl ProjectionName {
    /// All known projections, for rehydration and status listings.
    pub const ALL: [Self; 6] = [
        Self::CurrentStatus,
        Self::Location,
        Self::Target,
        Self::DockingEvents,
        Self::Cargo,
        Self::Route,
    ];

    /// The key under which this projection is persisted.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CurrentStatus => "CurrentStatus",
            Self::Location => "Location",
            Self::Target => "Target",
            Self::DockingEvents => "DockingEvents",
            Self::Cargo => "Cargo",
            Self::Route => "Route",
        }
    }

    /// Schema version of this projection's value. Bumped on incompatible
    /// changes so stale persisted rows are discarded, not misread.
    pub fn version(self) -> u32 {
        match self {
            Self::CurrentStatus
            | Self::Location
            | Self::Target
            | Self::DockingEvents
            | Self::Cargo
            | Self::Route => 1,
        }
    }
}

/// A projection value, tagged by projection name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "projection", rename_all = "camelCase")]
pub enum ProjectionValue {
    CurrentStatus(CurrentStatus),
    Location(Location),
    Target(Target),
    DockingEvents(DockingEvents),
    Cargo(Cargo),
    Route(Route),
}

impl ProjectionValue {
    pub fn name(&self) -> ProjectionName {
        match self {
            Self::CurrentStatus(_) => ProjectionName::CurrentStatus,
            Self::Location(_) => ProjectionName::Location,
            Self::Target(_) => ProjectionName::Target,
            Self::DockingEvents(_) => ProjectionName::DockingEvents,
            Self::Cargo(_) => ProjectionName::Cargo,
            Self::Route(_) => ProjectionName::Route,
        }
    }
}

/// A point-in-time copy of a projection handed to readers.
///
/// Readers never see (or mutate) the live folded state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionSnapshot {
    pub value: ProjectionValue,

    /// Sequence number of the event that last mutated this projection,
    /// if any has.
    pub last_event: Option<u64>,
}

// ── Projection values ──

/// Where the ship stands right now: docked, landed, shields, and the
/// derived overall status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentStatus {
    pub status: ShipStatus,
    pub docked: bool,
    pub landed: bool,
    pub shields_up: bool,
}

/// Overall ship status derived from journal events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipStatus {
    #[default]
    Unknown,
    InStation,
    Landed,
    InSupercruise,
    InFlight,
}

/// Where the ship is: star system, station, body, galactic coordinates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub star_system: Option<String>,
    pub station: Option<String>,
    pub body: Option<String>,
    pub coordinates: Option<[f64; 3]>,
}

/// The currently locked contact, if any.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub contact: Option<Contact>,
}

/// A locked contact as reported by the game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub ship: Option<String>,
    pub pilot: Option<String>,
}

/// The docking-request flow: the last thing that happened and where.
///
/// Command issuers wait on `last` to confirm a blind dock request landed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockingEvents {
    pub last: Option<DockingOutcome>,
    pub station: Option<String>,
    pub landing_pad: Option<u32>,
}

/// Terminal and non-terminal states of a docking request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DockingOutcome {
    Requested,
    Granted,
    Denied,
    Cancelled,
    Timeout,
}

/// Inventory counts by commodity name.
///
/// A `BTreeMap` keeps iteration (and serialization) order stable so
/// replaying the same events yields byte-identical values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cargo {
    pub counts: BTreeMap<String, u64>,
}

/// Cross-event jump memory: how many jumps, when the last one was, and
/// the interval between the last two.
///
/// The interval is derived from consecutive event timestamps, never from
/// the wall clock, so folding stays deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub jumps: u64,
    pub last_jump_at: Option<Timestamp>,
    pub last_jump_interval_secs: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ship_status_serializes_snake_case() {
        let json = serde_json::to_string(&ShipStatus::InStation).unwrap();
        assert_eq!(json, "\"in_station\"");
    }

    #[test]
    fn projection_value_carries_its_name() {
        let value = ProjectionValue::Cargo(Cargo::default());
        assert_eq!(value.name(), ProjectionName::Cargo);
        assert_eq!(value.name().as_str(), "Cargo");
    }

    #[test]
    fn every_projection_has_a_version() {
        for name in ProjectionName::ALL {
            assert!(name.version() >= 1);
        }
    }
}
