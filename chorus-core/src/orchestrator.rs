// ABOUTME: Dispatch orchestrator: fans one query out to N provider legs and
// ABOUTME: converges the asynchronous replies into a single session record.

use crate::error::{error_message, DispatchError, FailureKind};
use crate::history::HistoryStore;
use crate::metrics;
use crate::query::{Query, QueryResponse, QuerySession};
use crate::registry::EndpointRegistry;
use crate::traits::Environment;
use anyhow::Result;
use chorus_agent::{Envelope, Message};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Tunables for dispatch legs
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Interval between readiness probes
    pub poll_interval: Duration,
    /// Total wait for an endpoint to report ready
    pub ready_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            ready_timeout: Duration::from_secs(30),
        }
    }
}

/// Turns one request into N concurrent legs and one aggregate outcome.
///
/// Sessions live in an in-memory map for the life of the process; history
/// is persisted separately. Every per-leg failure is converted into a
/// failed response on the session - `submit` itself only rejects malformed
/// requests, never provider failures.
pub struct DispatchOrchestrator<E: Environment> {
    env: Arc<E>,
    registry: Arc<EndpointRegistry<E>>,
    history: HistoryStore,
    config: DispatchConfig,
    sessions: Mutex<HashMap<String, QuerySession>>,
    updates: broadcast::Sender<QuerySession>,
}

impl<E: Environment> DispatchOrchestrator<E> {
    pub fn new(
        env: Arc<E>,
        registry: Arc<EndpointRegistry<E>>,
        history: HistoryStore,
        config: DispatchConfig,
    ) -> Self {
        let (updates, _) = broadcast::channel(64);
        Self {
            env,
            registry,
            history,
            config,
            sessions: Mutex::new(HashMap::new()),
            updates,
        }
    }

    /// Observe session changes. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<QuerySession> {
        self.updates.subscribe()
    }

    /// Snapshot of a tracked session
    pub fn session(&self, query_id: &str) -> Option<QuerySession> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.get(query_id).cloned()
    }

    pub fn session_count(&self) -> usize {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.len()
    }

    /// Dispatch a query to the given providers.
    ///
    /// Returns immediately with the session in its in-progress state; legs
    /// run independently and report back through `record_success` /
    /// `record_failure`. Only request-shape validation can fail here.
    pub async fn submit(
        self: &Arc<Self>,
        text: &str,
        providers: &[String],
        fresh_session: bool,
    ) -> Result<QuerySession> {
        if text.trim().is_empty() {
            anyhow::bail!("Query text must not be empty");
        }
        if providers.is_empty() {
            anyhow::bail!("At least one target provider is required");
        }
        for provider_id in providers {
            if self.registry.directory().get(provider_id).is_none() {
                anyhow::bail!("Unknown provider: {}", provider_id);
            }
        }

        let query = Query::new(text, providers.iter().cloned());
        let session = QuerySession::new(query.clone());
        {
            let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions.insert(query.id.clone(), session.clone());
        }

        if let Err(e) = self.history.record_query(&query) {
            tracing::warn!(query_id = %query.id, error = %e, "Failed to persist query history");
        }
        self.notify(&session);
        metrics::record_query_submitted(query.target_providers.len());

        tracing::info!(
            query_id = %query.id,
            providers = ?query.target_providers,
            fresh_session,
            "Dispatching query"
        );

        let mut legs = Vec::new();
        for provider_id in &query.target_providers {
            let orchestrator = Arc::clone(self);
            let query_id = query.id.clone();
            let provider_id = provider_id.clone();
            let text = query.text.clone();
            legs.push(tokio::spawn(async move {
                orchestrator
                    .run_leg(&query_id, &provider_id, &text, fresh_session)
                    .await;
            }));
        }

        let orchestrator = Arc::clone(self);
        let query_id = query.id.clone();
        tokio::spawn(async move {
            for leg in legs {
                let _ = leg.await;
            }
            orchestrator.recheck_completion(&query_id);
        });

        Ok(session)
    }

    async fn run_leg(&self, query_id: &str, provider_id: &str, text: &str, fresh_session: bool) {
        if let Err(e) = self
            .launch_leg(query_id, provider_id, text, fresh_session)
            .await
        {
            let kind = e
                .downcast_ref::<DispatchError>()
                .map(|d| d.kind)
                .unwrap_or(FailureKind::Unknown);
            metrics::record_leg_failure(kind.as_str());
            tracing::warn!(
                query_id = %query_id,
                provider = %provider_id,
                error = %e,
                "Dispatch leg failed"
            );
            self.record_failure(query_id, provider_id, &error_message(&e))
                .await;
        }
    }

    /// One leg: ensure the endpoint, wait for readiness, forward the query.
    /// The reply arrives later, out of band.
    async fn launch_leg(
        &self,
        query_id: &str,
        provider_id: &str,
        text: &str,
        fresh_session: bool,
    ) -> Result<()> {
        self.registry.ensure(provider_id, fresh_session).await?;
        self.registry
            .await_ready(provider_id, self.config.poll_interval, self.config.ready_timeout)
            .await?;

        // The context may have been replaced while waiting; resolve it fresh.
        let ctx = self
            .registry
            .tracked_context(provider_id)
            .ok_or_else(|| DispatchError::stale(provider_id))?;

        let envelope = Envelope::new(Message::SubmitQuery {
            query_id: Some(query_id.to_string()),
            text: text.to_string(),
            providers: Vec::new(),
            fresh_session: false,
        });
        self.env
            .post(ctx, envelope)
            .await
            .map_err(|e| DispatchError::forwarding(provider_id, e))?;

        tracing::debug!(query_id = %query_id, provider = %provider_id, context = ctx, "Query forwarded");
        Ok(())
    }

    /// Record a provider's successful reply
    pub async fn record_success(
        &self,
        query_id: &str,
        provider_id: &str,
        text: &str,
        duration_ms: u64,
    ) {
        self.record(QueryResponse::success(query_id, provider_id, text, duration_ms))
            .await;
    }

    /// Record a provider's failure (or a synthetic leg failure)
    pub async fn record_failure(&self, query_id: &str, provider_id: &str, error: &str) {
        let error = if error.trim().is_empty() {
            "Unknown error"
        } else {
            error
        };
        self.record(QueryResponse::failure(query_id, provider_id, error))
            .await;
    }

    async fn record(&self, response: QueryResponse) {
        let updated = {
            let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            match sessions.get_mut(&response.query_id) {
                None => {
                    tracing::debug!(
                        query_id = %response.query_id,
                        provider = %response.provider_id,
                        "Response for unknown session ignored"
                    );
                    metrics::record_unknown_session();
                    None
                }
                Some(session) => {
                    if !session.upsert_response(response.clone()) {
                        tracing::debug!(
                            query_id = %response.query_id,
                            provider = %response.provider_id,
                            "Late response after terminal status ignored"
                        );
                        None
                    } else {
                        session.check_completion();
                        Some(session.clone())
                    }
                }
            }
        };

        let Some(session) = updated else {
            return;
        };

        metrics::record_response(&response.provider_id);
        if let Err(e) = self.history.record_response(&response) {
            tracing::warn!(
                query_id = %response.query_id,
                error = %e,
                "Failed to persist response history"
            );
        }
        if session.is_terminal() {
            metrics::record_session_finished(&session.status.to_string());
            tracing::info!(
                query_id = %session.query.id,
                status = %session.status,
                responses = session.responses.len(),
                "Session settled"
            );
        }
        self.notify(&session);
    }

    /// Re-run the completion check for a session. Idempotent; usually a
    /// no-op because replies have already driven the transition.
    pub fn recheck_completion(&self, query_id: &str) {
        let updated = {
            let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            match sessions.get_mut(query_id) {
                Some(session) => {
                    if session.check_completion() {
                        Some(session.clone())
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };
        if let Some(session) = updated {
            metrics::record_session_finished(&session.status.to_string());
            self.notify(&session);
        }
    }

    /// Best-effort broadcast: log-and-drop when nobody is listening
    fn notify(&self, session: &QuerySession) {
        if self.updates.send(session.clone()).is_err() {
            tracing::trace!(query_id = %session.query.id, "No session update subscribers");
        }
    }
}
