// ABOUTME: AgentChannel provides a Send+Sync handle to an agent running in a worker task.
// ABOUTME: AgentHost owns the agent and serializes all envelope handling through one queue.

use crate::protocol::Envelope;
use crate::traits::RemoteAgent;
use anyhow::Result;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

/// Commands sent from an AgentChannel to the agent worker
#[derive(Debug)]
pub enum Command {
    /// Deliver an envelope and wait for the synchronous reply
    Request {
        envelope: Envelope,
        reply: oneshot::Sender<Result<Value>>,
    },
    /// Deliver an envelope without waiting for a reply
    Post { envelope: Envelope },
}

/// Send + Sync handle to a remote agent's worker task.
///
/// All envelope handling is serialized through the worker's queue, so a
/// stateful agent never sees two envelopes at once.
#[derive(Clone)]
pub struct AgentChannel {
    tx: mpsc::Sender<Command>,
    provider_id: String,
}

impl AgentChannel {
    /// Provider the underlying agent speaks for
    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    /// Deliver an envelope and await the agent's synchronous reply
    pub async fn request(&self, envelope: Envelope) -> Result<Value> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Request {
                envelope,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("Agent worker closed"))?;
        reply_rx
            .await
            .map_err(|_| anyhow::anyhow!("Agent worker dropped reply channel"))?
    }

    /// Deliver an envelope without waiting for a reply
    pub async fn post(&self, envelope: Envelope) -> Result<()> {
        self.tx
            .send(Command::Post { envelope })
            .await
            .map_err(|_| anyhow::anyhow!("Agent worker closed"))
    }
}

/// Spawns agents into worker tasks and hands out channels to them.
pub struct AgentHost;

impl AgentHost {
    /// Spawn the agent into a worker task.
    ///
    /// Returns the channel for delivering envelopes and the receiver for
    /// envelopes the agent emits on its own (results, status updates).
    pub fn spawn(mut agent: Box<dyn RemoteAgent>) -> (AgentChannel, mpsc::UnboundedReceiver<Envelope>) {
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(64);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let provider_id = agent.provider_id().to_string();

        tokio::spawn(async move {
            agent.on_start(&out_tx).await;

            while let Some(cmd) = cmd_rx.recv().await {
                match cmd {
                    Command::Request { envelope, reply } => {
                        let _ = reply.send(agent.handle(envelope, &out_tx).await);
                    }
                    Command::Post { envelope } => {
                        let kind = envelope.message.kind();
                        if let Err(e) = agent.handle(envelope, &out_tx).await {
                            tracing::warn!(
                                provider = %agent.provider_id(),
                                kind = %kind,
                                error = %e,
                                "Agent failed to handle posted envelope"
                            );
                        }
                    }
                }
            }
        });

        (
            AgentChannel {
                tx: cmd_tx,
                provider_id,
            },
            out_rx,
        )
    }
}
