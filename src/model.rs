//! Core data model for Wingman.
//!
//! Events are the immutable record of everything that happened — journal
//! telemetry, user input, assistant output, tool calls. Projections are
//! the named materialized views folded from them.

mod event;
mod projection;

pub use event::{Event, EventPayload};
pub use projection::{
    Cargo, Contact, CurrentStatus, DockingEvents, DockingOutcome, Location, ProjectionName,
    ProjectionSnapshot, ProjectionValue, Route, ShipStatus, Target,
};
