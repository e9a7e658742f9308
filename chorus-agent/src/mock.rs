// ABOUTME: Mock remote agent for testing - scriptable readiness, replies, and failures.
// ABOUTME: Allows deterministic tests without a live chat surface behind the endpoint.
//!
//! # Example
//!
//! ```no_run
//! use chorus_agent::mock::MockAgent;
//! use chorus_agent::{AgentHost, Envelope, Message};
//!
//! # async fn example() {
//! let agent = MockAgent::new("claude")
//!     .ready_after(2)
//!     .on_query("hello").respond("Hi there!")
//!     .on_query("explode").fail("model overloaded");
//!
//! let (channel, _outbound) = AgentHost::spawn(Box::new(agent));
//! let reply = channel
//!     .request(Envelope::new(Message::Ping {}))
//!     .await
//!     .unwrap();
//! assert_eq!(reply["isReady"], false);
//! # }
//! ```

use crate::protocol::{Ack, Envelope, Message, StatusSnapshot};
use crate::traits::RemoteAgent;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
enum Outcome {
    Respond(String),
    Fail(String),
}

#[derive(Debug, Clone)]
struct Expectation {
    pattern: String,
    outcome: Outcome,
}

/// Scriptable remote agent for tests and simulation
pub struct MockAgent {
    provider_id: String,
    logged_in: bool,
    probes_until_ready: u32,
    latency: Duration,
    expectations: VecDeque<Expectation>,
}

impl MockAgent {
    /// Create a mock agent that is ready and logged in immediately
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            logged_in: true,
            probes_until_ready: 0,
            latency: Duration::from_millis(0),
            expectations: VecDeque::new(),
        }
    }

    /// Report not-ready for the first `probes` PINGs
    pub fn ready_after(mut self, probes: u32) -> Self {
        self.probes_until_ready = probes;
        self
    }

    /// Set the authenticated flag reported in status snapshots
    pub fn logged_in(mut self, logged_in: bool) -> Self {
        self.logged_in = logged_in;
        self
    }

    /// Delay between accepting a query and emitting its result
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Set up an expectation for a query containing the given pattern
    pub fn on_query(self, pattern: &str) -> ExpectationBuilder {
        ExpectationBuilder {
            agent: self,
            pattern: pattern.to_string(),
        }
    }

    /// Match expectations with FIFO preference: check the front first, fall
    /// back to searching the queue if the front doesn't match. Unmatched
    /// queries get an echo response.
    fn take_outcome(&mut self, text: &str) -> Outcome {
        let matched = if let Some(front) = self.expectations.front() {
            if text.contains(&front.pattern) {
                self.expectations.pop_front()
            } else {
                self.expectations
                    .iter()
                    .position(|e| text.contains(&e.pattern))
                    .and_then(|i| self.expectations.remove(i))
            }
        } else {
            None
        };

        match matched {
            Some(expectation) => expectation.outcome,
            None => Outcome::Respond(format!("{}: {}", self.provider_id, text)),
        }
    }

    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            provider_id: self.provider_id.clone(),
            is_ready: self.probes_until_ready == 0,
            is_logged_in: self.logged_in,
        }
    }
}

/// Builder returned by [`MockAgent::on_query`]
pub struct ExpectationBuilder {
    agent: MockAgent,
    pattern: String,
}

impl ExpectationBuilder {
    /// Reply to the matching query with the given text
    pub fn respond(mut self, text: impl Into<String>) -> MockAgent {
        self.agent.expectations.push_back(Expectation {
            pattern: self.pattern,
            outcome: Outcome::Respond(text.into()),
        });
        self.agent
    }

    /// Fail the matching query with the given error
    pub fn fail(mut self, error: impl Into<String>) -> MockAgent {
        self.agent.expectations.push_back(Expectation {
            pattern: self.pattern,
            outcome: Outcome::Fail(error.into()),
        });
        self.agent
    }
}

#[async_trait]
impl RemoteAgent for MockAgent {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    async fn on_start(&mut self, outbound: &mpsc::UnboundedSender<Envelope>) {
        let _ = outbound.send(Envelope::new(Message::ProviderStatusUpdate {
            status: self.snapshot(),
        }));
    }

    async fn handle(
        &mut self,
        envelope: Envelope,
        outbound: &mpsc::UnboundedSender<Envelope>,
    ) -> Result<Value> {
        match envelope.message {
            Message::Ping {} => {
                let snapshot = self.snapshot();
                if self.probes_until_ready > 0 {
                    self.probes_until_ready -= 1;
                }
                Ok(serde_json::to_value(&snapshot)?)
            }

            Message::SubmitQuery {
                query_id: Some(query_id),
                text,
                ..
            } => {
                let outcome = self.take_outcome(&text);
                let provider_id = self.provider_id.clone();
                let latency = self.latency;
                let out = outbound.clone();

                tokio::spawn(async move {
                    let started = Instant::now();
                    tokio::time::sleep(latency).await;
                    let message = match outcome {
                        Outcome::Respond(text) => Message::ResponseReceived {
                            query_id,
                            provider_id,
                            text,
                            duration_ms: started.elapsed().as_millis() as u64,
                        },
                        Outcome::Fail(error) => Message::ResponseError {
                            query_id,
                            provider_id,
                            error,
                        },
                    };
                    let _ = out.send(Envelope::new(message));
                });

                Ok(Ack::ok().to_value())
            }

            other => Ok(Ack::err(format!("unsupported message kind: {}", other.kind())).to_value()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submit(query_id: &str, text: &str) -> Envelope {
        Envelope::new(Message::SubmitQuery {
            query_id: Some(query_id.to_string()),
            text: text.to_string(),
            providers: Vec::new(),
            fresh_session: false,
        })
    }

    #[tokio::test]
    async fn test_ready_after_counts_probes() {
        let mut agent = MockAgent::new("claude").ready_after(2);
        let (tx, _rx) = mpsc::unbounded_channel();

        for expected in [false, false, true] {
            let reply = agent
                .handle(Envelope::new(Message::Ping {}), &tx)
                .await
                .unwrap();
            assert_eq!(reply["isReady"], expected);
        }
    }

    #[tokio::test]
    async fn test_query_emits_exactly_one_response() {
        let mut agent = MockAgent::new("claude").on_query("hello").respond("Hi!");
        let (tx, mut rx) = mpsc::unbounded_channel();

        let reply = agent.handle(submit("q1", "hello world"), &tx).await.unwrap();
        assert_eq!(reply["success"], true);

        let envelope = rx.recv().await.unwrap();
        match envelope.message {
            Message::ResponseReceived { query_id, text, .. } => {
                assert_eq!(query_id, "q1");
                assert_eq!(text, "Hi!");
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failure_expectation_emits_error() {
        let mut agent = MockAgent::new("claude").on_query("boom").fail("overloaded");
        let (tx, mut rx) = mpsc::unbounded_channel();

        agent.handle(submit("q2", "boom now"), &tx).await.unwrap();

        let envelope = rx.recv().await.unwrap();
        match envelope.message {
            Message::ResponseError { query_id, error, .. } => {
                assert_eq!(query_id, "q2");
                assert_eq!(error, "overloaded");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unmatched_query_echoes() {
        let mut agent = MockAgent::new("gemini");
        let (tx, mut rx) = mpsc::unbounded_channel();

        agent.handle(submit("q3", "ping me"), &tx).await.unwrap();

        let envelope = rx.recv().await.unwrap();
        match envelope.message {
            Message::ResponseReceived { text, .. } => assert_eq!(text, "gemini: ping me"),
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
