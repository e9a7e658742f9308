// ABOUTME: Typed failure kinds for dispatch legs and endpoint management.
// ABOUTME: DispatchError carries a kind plus message and converts into anyhow errors.

use serde::{Deserialize, Serialize};

/// Typed failure codes for programmatic handling
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Could not obtain a new execution context for the provider
    EndpointCreationFailed,
    /// Readiness probing timed out
    ProviderNotReady,
    /// Message delivery to a no-longer-live endpoint failed
    ForwardingFailed,
    /// Late message referencing a session no longer tracked
    UnknownSession,
    /// Tracked handle no longer resolves; triggers rediscovery
    StaleEndpoint,
    /// Anything else
    Unknown,
}

impl FailureKind {
    /// Stable label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EndpointCreationFailed => "endpoint_creation_failed",
            Self::ProviderNotReady => "provider_not_ready",
            Self::ForwardingFailed => "forwarding_failed",
            Self::UnknownSession => "unknown_session",
            Self::StaleEndpoint => "stale_endpoint",
            Self::Unknown => "unknown",
        }
    }
}

/// A dispatch failure with a typed kind and a human-readable message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchError {
    pub kind: FailureKind,
    pub message: String,
}

impl DispatchError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn creation(provider_id: &str, cause: impl std::fmt::Display) -> Self {
        Self::new(
            FailureKind::EndpointCreationFailed,
            format!("Failed to create endpoint for {}: {}", provider_id, cause),
        )
    }

    pub fn not_ready(provider_id: &str, waited_secs: u64) -> Self {
        Self::new(
            FailureKind::ProviderNotReady,
            format!(
                "Provider {} did not become ready within {}s",
                provider_id, waited_secs
            ),
        )
    }

    pub fn forwarding(provider_id: &str, cause: impl std::fmt::Display) -> Self {
        Self::new(
            FailureKind::ForwardingFailed,
            format!("Failed to forward to {}: {}", provider_id, cause),
        )
    }

    pub fn stale(provider_id: &str) -> Self {
        Self::new(
            FailureKind::StaleEndpoint,
            format!("Endpoint for {} no longer resolves", provider_id),
        )
    }
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for DispatchError {}

/// Render an error for a response record, normalizing unprintable causes
pub fn error_message(error: &anyhow::Error) -> String {
    let message = error.to_string();
    if message.trim().is_empty() {
        "Unknown error".to_string()
    } else {
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_error_downcasts_through_anyhow() {
        let err: anyhow::Error = DispatchError::not_ready("claude", 30).into();
        let dispatch = err.downcast_ref::<DispatchError>().unwrap();
        assert_eq!(dispatch.kind, FailureKind::ProviderNotReady);
        assert!(dispatch.message.contains("claude"));
    }

    #[test]
    fn test_error_message_normalizes_empty() {
        let err = anyhow::anyhow!("");
        assert_eq!(error_message(&err), "Unknown error");

        let err = anyhow::anyhow!("boom");
        assert_eq!(error_message(&err), "boom");
    }

    #[test]
    fn test_failure_kind_labels() {
        assert_eq!(FailureKind::StaleEndpoint.as_str(), "stale_endpoint");
        assert_eq!(
            FailureKind::EndpointCreationFailed.as_str(),
            "endpoint_creation_failed"
        );
    }
}
