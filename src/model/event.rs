//! Events: immutable records of something that happened.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// An immutable record of something that happened, stamped with a
/// monotonic sequence number at append time.
///
/// Ordering is by sequence number — arrival order — never by anything
/// inside the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Monotonic sequence number assigned by the event log on append.
    pub seq: u64,

    /// When the event happened. Game events carry the journal's own
    /// timestamp; events from other producers carry their creation time.
    pub timestamp: Timestamp,

    /// What happened.
    pub payload: EventPayload,
}

/// What happened, tagged by producer kind.
///
/// Serialized as a self-describing tagged object so each persisted row
/// and each JSONL line can be read back without context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EventPayload {
    /// A record from the game's journal. `name` is the journal's event
    /// tag; `data` is the full record as emitted.
    Game {
        name: String,
        data: serde_json::Value,
    },

    /// Something the user said.
    User { text: String },

    /// Something the assistant said.
    Assistant { text: String },

    /// The assistant finished delivering a response — including any
    /// external playback, which completes after generation does.
    AssistantCompleted,

    /// A tool invocation: the request that was made and what came back.
    Tool {
        request: String,
        results: serde_json::Value,
    },

    /// A record from an external producer outside the game (e.g. a
    /// command-completion signal from the input layer).
    External {
        source: String,
        data: serde_json::Value,
    },
}

impl EventPayload {
    /// The kind tag as stored in the event log's `kind` column.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Game { .. } => "game",
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
            Self::AssistantCompleted => "assistant_completed",
            Self::Tool { .. } => "tool",
            Self::External { .. } => "external",
        }
    }

    /// True for events that should trigger a reply cycle.
    pub fn is_user(&self) -> bool {
        matches!(self, Self::User { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_round_trips_with_kind_tag() {
        let payload = EventPayload::User {
            text: "dock at the nearest station".into(),
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"kind\":\"user\""));

        let back: EventPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn tool_payload_keeps_request_and_results_together() {
        let payload = EventPayload::Tool {
            request: "station_lookup".into(),
            results: serde_json::json!({"pads": 14}),
        };
        let json = serde_json::to_string(&payload).unwrap();

        let back: EventPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn kind_tags_are_stable() {
        assert_eq!(
            EventPayload::Game {
                name: "Docked".into(),
                data: serde_json::Value::Null,
            }
            .kind(),
            "game"
        );
        assert_eq!(EventPayload::AssistantCompleted.kind(), "assistant_completed");
    }
}
