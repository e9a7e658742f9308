// ABOUTME: Wire protocol for messages crossing the host messaging boundary.
// ABOUTME: Defines the {type, payload, timestamp} envelope, message kinds, and reply shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A structured message crossing the host messaging boundary.
///
/// Serializes as `{"type": "...", "payload": {...}, "timestamp": ...}` with
/// the kind and payload supplied by [`Message`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(flatten)]
    pub message: Message,
    /// Milliseconds since the Unix epoch, stamped at construction.
    pub timestamp: i64,
}

impl Envelope {
    /// Wrap a message, stamping the current time
    pub fn new(message: Message) -> Self {
        Self {
            message,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Message kinds routed by the protocol router.
///
/// `SubmitQuery` carries two shapes: the UI form (`text` + `providers`) and
/// the forwarded form delivered to a remote agent (`queryId` + `text`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Message {
    /// Dispatch a prompt (UI form) or deliver it to an endpoint (forwarded form)
    SubmitQuery {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        query_id: Option<String>,
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        providers: Vec<String>,
        #[serde(default)]
        fresh_session: bool,
    },

    /// A remote agent's successful reply for one (query, provider) leg
    ResponseReceived {
        query_id: String,
        provider_id: String,
        text: String,
        /// Wall-clock elapsed between forwarding and reply, stamped by the agent
        duration_ms: u64,
    },

    /// A remote agent's failure for one (query, provider) leg
    ResponseError {
        query_id: String,
        provider_id: String,
        error: String,
    },

    /// Readiness/auth snapshot pushed proactively by a remote agent
    ProviderStatusUpdate { status: StatusSnapshot },

    /// UI request for the current status of every known provider
    GetProviderStatus {},

    /// Session state broadcast toward the UI (best-effort, no reply)
    SessionUpdate { session: Value },

    /// Readiness probe; the agent replies synchronously with a [`StatusSnapshot`]
    Ping {},
}

impl Message {
    /// Message kind name as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SubmitQuery { .. } => "SUBMIT_QUERY",
            Self::ResponseReceived { .. } => "RESPONSE_RECEIVED",
            Self::ResponseError { .. } => "RESPONSE_ERROR",
            Self::ProviderStatusUpdate { .. } => "PROVIDER_STATUS_UPDATE",
            Self::GetProviderStatus {} => "GET_PROVIDER_STATUS",
            Self::SessionUpdate { .. } => "SESSION_UPDATE",
            Self::Ping {} => "PING",
        }
    }
}

/// A remote agent's readiness/auth snapshot, replied to `PING`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub provider_id: String,
    pub is_ready: bool,
    pub is_logged_in: bool,
}

/// Uniform acknowledgement reply: `{success, error?, session?}`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Value>,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            session: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            session: None,
        }
    }

    pub fn with_session(session: Value) -> Self {
        Self {
            success: true,
            error: None,
            session: Some(session),
        }
    }

    /// Serialize to a reply value; never fails
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| {
            serde_json::json!({"success": false, "error": "reply serialization failed"})
        })
    }
}
