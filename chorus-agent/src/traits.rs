// ABOUTME: RemoteAgent trait that per-provider adapters implement.
// ABOUTME: Defines the request/reply and asynchronous result contract for an endpoint.

use crate::protocol::Envelope;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

/// Contract for the adapter embedded in a provider's chat surface.
///
/// An agent receives envelopes addressed to its endpoint and may push
/// envelopes of its own through `outbound` at any time. Obligations:
///
/// - On a forwarded `SUBMIT_QUERY {queryId, text}` it must eventually emit
///   exactly one `RESPONSE_RECEIVED` or `RESPONSE_ERROR` carrying the same
///   query id.
/// - On `PING` it must reply synchronously with its current readiness/auth
///   snapshot.
/// - On start it should proactively emit a `PROVIDER_STATUS_UPDATE`.
#[async_trait]
pub trait RemoteAgent: Send + 'static {
    /// Provider this agent speaks for
    fn provider_id(&self) -> &str;

    /// Called once when the agent's worker starts, before any envelope
    async fn on_start(&mut self, outbound: &mpsc::UnboundedSender<Envelope>) {
        let _ = outbound;
    }

    /// Handle one inbound envelope and produce the synchronous reply value
    async fn handle(
        &mut self,
        envelope: Envelope,
        outbound: &mpsc::UnboundedSender<Envelope>,
    ) -> Result<Value>;
}
