//! Wire envelope shapes exchanged over a hub connection.
//!
//! An envelope is one complete protocol message. Requests carry a top-level
//! `resource` routing key and a payload whose `action` field names the
//! operation; responses and errors echo the request `id` — that echo is the
//! only correlation mechanism, there is no sequence numbering. Events,
//! `connected` welcomes, and heartbeats carry server-generated ids that are
//! not used for correlation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ClientId, UserId};

/// The six envelope kinds on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    /// Client-initiated operation against a named resource.
    Request,
    /// Successful result correlated to a request.
    Response,
    /// Failure correlated to a request.
    Error,
    /// Uncorrelated server-to-client notification.
    Event,
    /// Welcome message sent once after registration.
    Connected,
    /// Liveness probe.
    Heartbeat,
}

/// One complete protocol message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    /// Envelope kind.
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    /// Correlation token for request/response/error; server-generated
    /// otherwise.
    pub id: String,
    /// Resource routing key (requests only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// Kind-specific payload.
    pub payload: Value,
}

/// Structured error payload inside an error envelope.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable code (e.g. `unknown_resource`).
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Current UTC timestamp in RFC 3339 with millisecond precision.
fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

impl Envelope {
    /// Build a request envelope (used by clients and tests).
    pub fn request(
        id: impl Into<String>,
        resource: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            kind: EnvelopeKind::Request,
            id: id.into(),
            resource: Some(resource.into()),
            payload,
        }
    }

    /// Build a response envelope correlated to a request id.
    pub fn response(id: impl Into<String>, result: Value) -> Self {
        Self {
            kind: EnvelopeKind::Response,
            id: id.into(),
            resource: None,
            payload: result,
        }
    }

    /// Build an error envelope correlated to a request id.
    pub fn error(
        id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::from_error_body(
            id,
            ErrorBody {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        )
    }

    /// Build an error envelope with structured details.
    pub fn error_with_details(
        id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
        details: Value,
    ) -> Self {
        Self::from_error_body(
            id,
            ErrorBody {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        )
    }

    /// Build an error envelope from an [`ErrorBody`].
    pub fn from_error_body(id: impl Into<String>, body: ErrorBody) -> Self {
        let payload = serde_json::to_value(&body).unwrap_or(Value::Null);
        Self {
            kind: EnvelopeKind::Error,
            id: id.into(),
            resource: None,
            payload,
        }
    }

    /// Build an event envelope with a server-generated id.
    pub fn event(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            kind: EnvelopeKind::Event,
            id: uuid::Uuid::now_v7().to_string(),
            resource: None,
            payload: serde_json::json!({
                "type": event_type.into(),
                "data": data,
            }),
        }
    }

    /// Build the welcome envelope sent once after registration.
    pub fn connected(client_id: &ClientId, user_id: Option<&UserId>) -> Self {
        Self {
            kind: EnvelopeKind::Connected,
            id: uuid::Uuid::now_v7().to_string(),
            resource: None,
            payload: serde_json::json!({
                "client_id": client_id.as_str(),
                "user_id": user_id.map(UserId::as_str),
                "timestamp": now_rfc3339(),
            }),
        }
    }

    /// Build a heartbeat envelope.
    pub fn heartbeat() -> Self {
        Self {
            kind: EnvelopeKind::Heartbeat,
            id: uuid::Uuid::now_v7().to_string(),
            resource: None,
            payload: serde_json::json!({ "timestamp": now_rfc3339() }),
        }
    }

    /// The `action` string inside a request payload, if present.
    pub fn action(&self) -> Option<&str> {
        self.payload.get("action").and_then(Value::as_str)
    }
}
