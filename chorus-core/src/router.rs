// ABOUTME: Protocol router: the single entry point for structured messages
// ABOUTME: crossing the host boundary, with immediate vs deferred reply handling.

use crate::error::error_message;
use crate::orchestrator::DispatchOrchestrator;
use crate::registry::EndpointRegistry;
use crate::traits::{ContextId, Environment};
use chorus_agent::{Ack, Envelope, Message};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Identity attached to an inbound message by the host transport
#[derive(Debug, Clone, Copy, Default)]
pub struct SenderIdentity {
    /// The execution context the sender lives in, when the message came
    /// from a remote agent rather than the UI
    pub context: Option<ContextId>,
}

impl SenderIdentity {
    pub fn ui() -> Self {
        Self { context: None }
    }

    pub fn endpoint(ctx: ContextId) -> Self {
        Self { context: Some(ctx) }
    }
}

/// Whether a reply is available now or arrives once downstream work settles.
/// The host transport must not block its dispatch loop on a deferred reply.
#[derive(Debug)]
pub enum RouteOutcome {
    Immediate(Value),
    Deferred(oneshot::Receiver<Value>),
}

impl RouteOutcome {
    /// Resolve to the final reply value, awaiting a deferred reply if needed
    pub async fn resolve(self) -> Value {
        match self {
            Self::Immediate(value) => value,
            Self::Deferred(rx) => rx
                .await
                .unwrap_or_else(|_| Ack::err("Reply channel dropped").to_value()),
        }
    }
}

/// Demultiplexes inbound messages by kind onto the orchestrator and
/// registry. Every downstream error is converted into a uniform
/// `{success: false, error}` reply rather than propagating.
pub struct ProtocolRouter<E: Environment> {
    orchestrator: Arc<DispatchOrchestrator<E>>,
    registry: Arc<EndpointRegistry<E>>,
}

impl<E: Environment> ProtocolRouter<E> {
    pub fn new(
        orchestrator: Arc<DispatchOrchestrator<E>>,
        registry: Arc<EndpointRegistry<E>>,
    ) -> Self {
        Self {
            orchestrator,
            registry,
        }
    }

    /// Route one inbound envelope to exactly one downstream operation
    pub async fn handle(&self, envelope: Envelope, sender: SenderIdentity) -> RouteOutcome {
        match envelope.message {
            Message::SubmitQuery {
                text,
                providers,
                fresh_session,
                ..
            } => {
                let (tx, rx) = oneshot::channel();
                let orchestrator = Arc::clone(&self.orchestrator);
                tokio::spawn(async move {
                    let reply = match orchestrator.submit(&text, &providers, fresh_session).await {
                        Ok(session) => match serde_json::to_value(&session) {
                            Ok(session) => Ack::with_session(session),
                            Err(e) => Ack::err(format!("Failed to serialize session: {}", e)),
                        },
                        Err(e) => Ack::err(error_message(&e)),
                    };
                    let _ = tx.send(reply.to_value());
                });
                RouteOutcome::Deferred(rx)
            }

            Message::ResponseReceived {
                query_id,
                provider_id,
                text,
                duration_ms,
            } => {
                self.orchestrator
                    .record_success(&query_id, &provider_id, &text, duration_ms)
                    .await;
                RouteOutcome::Immediate(Ack::ok().to_value())
            }

            Message::ResponseError {
                query_id,
                provider_id,
                error,
            } => {
                self.orchestrator
                    .record_failure(&query_id, &provider_id, &error)
                    .await;
                RouteOutcome::Immediate(Ack::ok().to_value())
            }

            Message::ProviderStatusUpdate { status } => {
                if sender.context.is_none() {
                    tracing::debug!(
                        provider = %status.provider_id,
                        "Dropping status update without endpoint identity"
                    );
                } else {
                    self.registry.update_status(
                        &status.provider_id,
                        status.is_ready,
                        status.is_logged_in,
                    );
                }
                RouteOutcome::Immediate(Ack::ok().to_value())
            }

            Message::GetProviderStatus {} => {
                let statuses = self.registry.status_of_all();
                let value = serde_json::to_value(&statuses)
                    .unwrap_or_else(|e| Ack::err(format!("Failed to serialize status: {}", e)).to_value());
                RouteOutcome::Immediate(value)
            }

            other @ (Message::SessionUpdate { .. } | Message::Ping {}) => RouteOutcome::Immediate(
                Ack::err(format!("Unroutable message kind: {}", other.kind())).to_value(),
            ),
        }
    }
}
