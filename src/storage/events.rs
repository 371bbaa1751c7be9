//! Event log storage: append, recent-N retrieval, and history reset.

use jiff::Timestamp;
use rusqlite::Connection;

use crate::model::{Event, EventPayload};

use super::{Result, Storage, StorageError};

impl Storage {
    /// Appends one event to the log and returns it stamped with its
    /// sequence number.
    ///
    /// The store assigns sequence numbers, so arrival order at the store
    /// is the canonical order. Busy failures are retried with backoff;
    /// an exhausted retry surfaces as an error — appends are never
    /// silently dropped.
    pub fn append_event(&self, payload: &EventPayload, timestamp: Timestamp) -> Result<Event> {
        let json = serde_json::to_string(payload)?;
        let kind = payload.kind();
        let ts = timestamp.to_string();

        let seq = self.with_retry(|conn| {
            conn.execute(
                "INSERT INTO events (kind, payload, timestamp) VALUES (?1, ?2, ?3)",
                rusqlite::params![kind, &json, &ts],
            )?;
            Ok(conn.last_insert_rowid())
        })?;

        Ok(Event {
            seq: u64::try_from(seq).unwrap_or(0),
            timestamp,
            payload: payload.clone(),
        })
    }

    /// Loads the `n` most recent events, most recent first.
    pub fn recent_events(&self, n: usize) -> Result<Vec<Event>> {
        let rows = self.with_retry(|conn| {
            let mut stmt = conn.prepare(
                "SELECT seq, payload, timestamp FROM events ORDER BY seq DESC LIMIT ?1",
            )?;
            let limit = i64::try_from(n).unwrap_or(i64::MAX);
            let rows = stmt.query_map(rusqlite::params![limit], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;

        rows.into_iter().map(event_from_row).collect()
    }

    /// Deletes all events and resets the sequence counter.
    ///
    /// The explicit history reset — the only deletion the event log
    /// supports.
    pub fn clear_events(&self) -> Result<()> {
        self.with_retry(|conn| {
            conn.execute("DELETE FROM events", [])?;
            conn.execute("DELETE FROM sqlite_sequence WHERE name = 'events'", [])?;
            Ok(())
        })
    }
}

/// Reconstructs an event from its table row.
fn event_from_row((seq, payload, timestamp): (i64, String, String)) -> Result<Event> {
    let payload: EventPayload = serde_json::from_str(&payload)?;
    let timestamp = timestamp
        .parse::<Timestamp>()
        .map_err(|e| StorageError::Corrupt(format!("invalid event timestamp: {e}")))?;
    Ok(Event {
        seq: u64::try_from(seq).unwrap_or(0),
        timestamp,
        payload,
    })
}
