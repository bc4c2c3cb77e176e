use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::models::TimestampMs;

pub const WIRE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventName {
    ChargerAnchored,
    MerchantVisitCommitted,
    MerchantArrived,
    SessionCompleted,
    SessionTerminated,
    SessionCancelled,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::ChargerAnchored => "charger_anchored",
            EventName::MerchantVisitCommitted => "merchant_visit_committed",
            EventName::MerchantArrived => "merchant_arrived",
            EventName::SessionCompleted => "session_completed",
            EventName::SessionTerminated => "session_terminated",
            EventName::SessionCancelled => "session_cancelled",
        }
    }
}

/// Ledger wire body. Serialized exactly once per logical event; the backend
/// deduplicates solely on `idempotency_key`, so retries must not regenerate
/// any field.
#[derive(Debug, Serialize)]
struct WireEvent<'a> {
    schema_version: u32,
    event_id: &'a str,
    idempotency_key: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
    event: &'a str,
    occurred_at: String,
    timestamp: i64,
    source: &'a str,
    app_state: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<serde_json::Value>,
}

/// The single most-recent billing event awaiting delivery. The serialized
/// `body` and `event_id` are fixed at construction; every retry sends the
/// exact same bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEvent {
    pub event_id: String,
    pub event_name: String,
    pub requires_session_id: bool,
    pub session_id: Option<String>,
    pub charger_id: Option<String>,
    pub occurred_at: TimestampMs,
    body: String,
}

impl PendingEvent {
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        name: EventName,
        occurred_at: TimestampMs,
        source: &str,
        app_state: &str,
        session_id: Option<&str>,
        charger_id: Option<&str>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        let event_id = Uuid::new_v4().to_string();
        let wire = WireEvent {
            schema_version: WIRE_SCHEMA_VERSION,
            event_id: &event_id,
            idempotency_key: &event_id,
            session_id,
            event: name.as_str(),
            occurred_at: timestamp_to_iso8601(occurred_at),
            timestamp: occurred_at.0,
            source,
            app_state,
            metadata,
        };

        // WireEvent holds only serializable primitives; this cannot fail.
        let body = serde_json::to_string(&wire).unwrap_or_default();

        Self {
            event_id,
            event_name: name.as_str().to_string(),
            requires_session_id: session_id.is_some(),
            session_id: session_id.map(str::to_string),
            charger_id: charger_id.map(str::to_string),
            occurred_at,
            body,
        }
    }

    /// The immutable serialized wire body.
    pub fn body(&self) -> &str {
        &self.body
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmissionOutcome {
    Delivered,
    AuthRequired,
    Failed(String),
}

pub fn timestamp_to_iso8601(timestamp: TimestampMs) -> String {
    let datetime = chrono::DateTime::<Utc>::from_timestamp_millis(timestamp.0)
        .unwrap_or_else(|| chrono::DateTime::<Utc>::from(std::time::UNIX_EPOCH));
    datetime.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::{EventName, PendingEvent, timestamp_to_iso8601};
    use crate::domain::models::TimestampMs;

    fn sample_event() -> PendingEvent {
        PendingEvent::build(
            EventName::ChargerAnchored,
            TimestampMs(1_700_000_000_000),
            "mobile-native",
            "anchored",
            None,
            Some("charger-9"),
            Some(serde_json::json!({ "lat": 48.1, "lng": 11.5 })),
        )
    }

    #[test]
    fn body_is_stable_across_accesses() {
        let event = sample_event();
        let first = event.body().to_string();
        let second = event.body().to_string();
        assert_eq!(first, second);
        assert_eq!(first.as_bytes(), event.body().as_bytes());
    }

    #[test]
    fn idempotency_key_equals_event_id() {
        let event = sample_event();
        let parsed: serde_json::Value =
            serde_json::from_str(event.body()).expect("body should be valid JSON");
        assert_eq!(parsed["event_id"], parsed["idempotency_key"]);
        assert_eq!(parsed["event_id"], event.event_id.as_str());
    }

    #[test]
    fn pre_session_event_omits_session_id() {
        let event = sample_event();
        assert!(!event.requires_session_id);
        let parsed: serde_json::Value =
            serde_json::from_str(event.body()).expect("body should be valid JSON");
        assert!(parsed.get("session_id").is_none());
        assert_eq!(parsed["event"], "charger_anchored");
        assert_eq!(parsed["schema_version"], 1);
        assert_eq!(parsed["timestamp"], 1_700_000_000_000_i64);
        assert_eq!(parsed["occurred_at"], "2023-11-14T22:13:20.000Z");
        assert_eq!(parsed["app_state"], "anchored");
        assert_eq!(parsed["metadata"]["lat"], 48.1);
    }

    #[test]
    fn session_event_carries_session_id() {
        let event = PendingEvent::build(
            EventName::SessionCompleted,
            TimestampMs(1_700_000_100_000),
            "mobile-native",
            "sessionEnded",
            Some("session-42"),
            Some("charger-9"),
            None,
        );
        assert!(event.requires_session_id);
        let parsed: serde_json::Value =
            serde_json::from_str(event.body()).expect("body should be valid JSON");
        assert_eq!(parsed["session_id"], "session-42");
        assert!(parsed.get("metadata").is_none());
    }

    #[test]
    fn snapshot_round_trip_preserves_body_bytes() {
        let event = sample_event();
        let serialized = serde_json::to_string(&event).expect("event serializes");
        let restored: PendingEvent =
            serde_json::from_str(&serialized).expect("event deserializes");
        assert_eq!(restored, event);
        assert_eq!(restored.body().as_bytes(), event.body().as_bytes());
    }

    #[test]
    fn distinct_events_get_distinct_ids() {
        assert_ne!(sample_event().event_id, sample_event().event_id);
    }

    #[test]
    fn renders_epoch_for_out_of_range_timestamp() {
        assert_eq!(timestamp_to_iso8601(TimestampMs(0)), "1970-01-01T00:00:00.000Z");
        assert_eq!(
            timestamp_to_iso8601(TimestampMs(i64::MAX)),
            "1970-01-01T00:00:00.000Z"
        );
    }
}
