use std::io::Write;

use serde_json::json;

use crate::domain::models::SessionState;

pub const REASON_INVALID_MERCHANT_LOCATION: &str = "INVALID_MERCHANT_LOCATION";

/// Messages pushed to the embedded web content. Serialized as
/// `{"action": ..., "payload": {...}}`, one JSON object per line.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeMessage {
    NativeReady,
    SessionStateChanged { state: SessionState },
    SessionStartRejected { reason: String },
    EventEmissionFailed { event: String, reason: String },
    AuthRequired,
    Error { request_id: Option<String>, message: String },
}

impl BridgeMessage {
    pub fn action(&self) -> &'static str {
        match self {
            BridgeMessage::NativeReady => "NATIVE_READY",
            BridgeMessage::SessionStateChanged { .. } => "SESSION_STATE_CHANGED",
            BridgeMessage::SessionStartRejected { .. } => "SESSION_START_REJECTED",
            BridgeMessage::EventEmissionFailed { .. } => "EVENT_EMISSION_FAILED",
            BridgeMessage::AuthRequired => "AUTH_REQUIRED",
            BridgeMessage::Error { .. } => "ERROR",
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        let payload = match self {
            BridgeMessage::NativeReady | BridgeMessage::AuthRequired => json!({}),
            BridgeMessage::SessionStateChanged { state } => json!({ "state": state.as_str() }),
            BridgeMessage::SessionStartRejected { reason } => json!({ "reason": reason }),
            BridgeMessage::EventEmissionFailed { event, reason } => {
                json!({ "event": event, "reason": reason })
            }
            BridgeMessage::Error { request_id, message } => match request_id {
                Some(request_id) => json!({ "requestId": request_id, "message": message }),
                None => json!({ "message": message }),
            },
        };

        json!({ "action": self.action(), "payload": payload })
    }
}

/// Outbound half of the JSON bridge. Implementations must never block the
/// engine on a slow consumer for longer than a line write.
pub trait BridgeSink {
    fn notify(&mut self, message: BridgeMessage);
}

/// Writes bridge messages as JSON lines on stdout, where the host webview
/// shim picks them up. Write failures are logged and dropped; a broken
/// bridge must not stall the engine.
#[derive(Debug, Default)]
pub struct StdoutBridge;

impl BridgeSink for StdoutBridge {
    fn notify(&mut self, message: BridgeMessage) {
        let line = message.to_value().to_string();
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        if let Err(error) = writeln!(handle, "{line}") {
            tracing::warn!(error = %error, action = message.action(), "bridge write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::BridgeMessage;
    use crate::domain::models::SessionState;

    #[test]
    fn state_change_shape() {
        let value = BridgeMessage::SessionStateChanged {
            state: SessionState::NearCharger,
        }
        .to_value();
        assert_eq!(value["action"], "SESSION_STATE_CHANGED");
        assert_eq!(value["payload"]["state"], "nearCharger");
    }

    #[test]
    fn rejection_shape() {
        let value = BridgeMessage::SessionStartRejected {
            reason: super::REASON_INVALID_MERCHANT_LOCATION.to_string(),
        }
        .to_value();
        assert_eq!(value["action"], "SESSION_START_REJECTED");
        assert_eq!(value["payload"]["reason"], "INVALID_MERCHANT_LOCATION");
    }

    #[test]
    fn emission_failure_shape() {
        let value = BridgeMessage::EventEmissionFailed {
            event: "charger_anchored".to_string(),
            reason: "status 503".to_string(),
        }
        .to_value();
        assert_eq!(value["action"], "EVENT_EMISSION_FAILED");
        assert_eq!(value["payload"]["event"], "charger_anchored");
        assert_eq!(value["payload"]["reason"], "status 503");
    }

    #[test]
    fn empty_payload_messages() {
        assert_eq!(BridgeMessage::NativeReady.to_value()["action"], "NATIVE_READY");
        assert_eq!(
            BridgeMessage::NativeReady.to_value()["payload"],
            serde_json::json!({})
        );
        assert_eq!(BridgeMessage::AuthRequired.to_value()["action"], "AUTH_REQUIRED");
    }

    #[test]
    fn error_omits_absent_request_id() {
        let without = BridgeMessage::Error {
            request_id: None,
            message: "bad input".to_string(),
        }
        .to_value();
        assert!(without["payload"].get("requestId").is_none());

        let with = BridgeMessage::Error {
            request_id: Some("req-7".to_string()),
            message: "bad input".to_string(),
        }
        .to_value();
        assert_eq!(with["payload"]["requestId"], "req-7");
    }
}
