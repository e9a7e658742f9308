// ABOUTME: Endpoint registry mapping each provider to one live execution context.
// ABOUTME: Lazily creates, adopts, or recycles contexts and tracks readiness/auth flags.

use crate::error::DispatchError;
use crate::providers::ProviderDirectory;
use crate::traits::{ContextId, Environment};
use anyhow::{Context, Result};
use chorus_agent::{Envelope, Message, StatusSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A tracked execution context for one provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedEndpoint {
    pub provider_id: String,
    pub context: ContextId,
    pub is_ready: bool,
    pub is_logged_in: bool,
}

/// Read-only projection of a provider's endpoint state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub provider_id: String,
    pub is_connected: bool,
    pub is_logged_in: bool,
    pub is_ready: bool,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "endpointHandle"
    )]
    pub context: Option<ContextId>,
}

/// Guarantees that "the current execution context for provider P" is a
/// single, well-defined, lazily-created resource.
///
/// The endpoint map is guarded by a plain mutex that is never held across
/// an await; every step after a suspension point re-reads the map instead
/// of trusting an earlier read. A per-provider async lock serializes
/// concurrent `ensure` calls for the same provider so two callers cannot
/// race each other into creating duplicate contexts.
pub struct EndpointRegistry<E: Environment> {
    env: Arc<E>,
    directory: ProviderDirectory,
    endpoints: Mutex<HashMap<String, ManagedEndpoint>>,
    ensure_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<E: Environment> EndpointRegistry<E> {
    pub fn new(env: Arc<E>, directory: ProviderDirectory) -> Self {
        Self {
            env,
            directory,
            endpoints: Mutex::new(HashMap::new()),
            ensure_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn directory(&self) -> &ProviderDirectory {
        &self.directory
    }

    /// Context currently tracked for the provider, if any
    pub fn tracked_context(&self, provider_id: &str) -> Option<ContextId> {
        let endpoints = self.endpoints.lock().unwrap_or_else(|e| e.into_inner());
        endpoints.get(provider_id).map(|ep| ep.context)
    }

    /// Obtain the live context for a provider, creating one if needed.
    ///
    /// With `fresh_session`, an existing context is navigated to the
    /// provider's new-conversation address (and marked not-ready for
    /// re-probing); if that navigation fails the stale entry is discarded
    /// and a new context is created. Without it, a tracked live context is
    /// reused; a stale one is dropped; an already-open matching context is
    /// adopted and focused; otherwise a background context is opened at the
    /// provider's base address without stealing focus.
    pub async fn ensure(&self, provider_id: &str, fresh_session: bool) -> Result<ContextId> {
        let info = self
            .directory
            .get(provider_id)
            .with_context(|| format!("Unknown provider: {}", provider_id))?
            .clone();

        let guard = self.provider_lock(provider_id);
        let _held = guard.lock().await;

        if fresh_session {
            if let Some(ctx) = self.tracked_context(provider_id) {
                match self.env.navigate(ctx, &info.new_chat_url).await {
                    Ok(()) => {
                        self.mark_not_ready(provider_id);
                        tracing::info!(
                            provider = %provider_id,
                            context = ctx,
                            "Reused endpoint for fresh conversation"
                        );
                        return Ok(ctx);
                    }
                    Err(e) => {
                        tracing::warn!(
                            provider = %provider_id,
                            context = ctx,
                            error = %e,
                            "Navigation to fresh conversation failed, discarding endpoint"
                        );
                        self.remove(provider_id);
                    }
                }
            }
            let ctx = self
                .env
                .open(&info.new_chat_url, false)
                .await
                .map_err(|e| DispatchError::creation(provider_id, e))?;
            self.track(provider_id, ctx);
            return Ok(ctx);
        }

        if let Some(ctx) = self.tracked_context(provider_id) {
            if self.env.url_of(ctx).await.is_some() {
                return Ok(ctx);
            }
            tracing::debug!(
                provider = %provider_id,
                context = ctx,
                "Tracked endpoint no longer resolves, dropping"
            );
            self.remove(provider_id);
        }

        for (ctx, url) in self.env.list().await {
            if info.matches(&url) {
                self.track(provider_id, ctx);
                if let Err(e) = self.env.focus(ctx).await {
                    tracing::debug!(provider = %provider_id, error = %e, "Failed to focus adopted endpoint");
                }
                let _ = self.probe(provider_id).await;
                tracing::info!(
                    provider = %provider_id,
                    context = ctx,
                    url = %url,
                    "Adopted already-open endpoint"
                );
                return Ok(ctx);
            }
        }

        let ctx = self
            .env
            .open(&info.base_url, true)
            .await
            .map_err(|e| DispatchError::creation(provider_id, e))?;
        self.track(provider_id, ctx);
        tracing::info!(provider = %provider_id, context = ctx, "Opened background endpoint");
        Ok(ctx)
    }

    /// Send one readiness probe and fold the snapshot into the tracked entry
    pub async fn probe(&self, provider_id: &str) -> Result<StatusSnapshot> {
        let ctx = self
            .tracked_context(provider_id)
            .ok_or_else(|| DispatchError::stale(provider_id))?;

        let reply = self
            .env
            .request(ctx, Envelope::new(Message::Ping {}))
            .await
            .map_err(|e| DispatchError::forwarding(provider_id, e))?;

        let snapshot: StatusSnapshot =
            serde_json::from_value(reply).context("Malformed probe reply")?;
        self.update_status(provider_id, snapshot.is_ready, snapshot.is_logged_in);
        Ok(snapshot)
    }

    /// Poll the endpoint until it reports ready or the timeout elapses.
    ///
    /// Probe failures count as not-ready (the agent may still be loading).
    /// The tracked context is re-resolved on every iteration.
    pub async fn await_ready(
        &self,
        provider_id: &str,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.probe(provider_id).await {
                Ok(snapshot) if snapshot.is_ready => return Ok(()),
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(provider = %provider_id, error = %e, "Probe failed, retrying");
                }
            }
            if Instant::now() + poll_interval > deadline {
                return Err(DispatchError::not_ready(provider_id, timeout.as_secs()).into());
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Idempotent status upsert; silently a no-op when the provider is untracked
    pub fn update_status(&self, provider_id: &str, is_ready: bool, is_logged_in: bool) {
        let mut endpoints = self.endpoints.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(ep) = endpoints.get_mut(provider_id) {
            ep.is_ready = is_ready;
            ep.is_logged_in = is_logged_in;
        }
    }

    /// A context finished navigating: re-evaluate which provider (if any)
    /// owns it, begin tracking on a match, and drop a mapping the context
    /// navigated away from.
    pub async fn on_navigation_committed(&self, ctx: ContextId, url: &str) {
        let matched = self
            .directory
            .provider_for_url(url)
            .map(|info| info.id.clone());
        {
            let mut endpoints = self.endpoints.lock().unwrap_or_else(|e| e.into_inner());
            endpoints
                .retain(|provider_id, ep| ep.context != ctx || Some(provider_id) == matched.as_ref());
            if let Some(provider_id) = &matched {
                endpoints.insert(
                    provider_id.clone(),
                    ManagedEndpoint {
                        provider_id: provider_id.clone(),
                        context: ctx,
                        is_ready: false,
                        is_logged_in: false,
                    },
                );
            }
        }
        if let Some(provider_id) = matched {
            tracing::debug!(provider = %provider_id, context = ctx, url = %url, "Tracking navigated endpoint");
            let _ = self.probe(&provider_id).await;
        }
    }

    /// A context closed: remove whichever provider referenced it
    pub fn on_context_closed(&self, ctx: ContextId) {
        let mut endpoints = self.endpoints.lock().unwrap_or_else(|e| e.into_inner());
        let before = endpoints.len();
        endpoints.retain(|_, ep| ep.context != ctx);
        if endpoints.len() < before {
            tracing::debug!(context = ctx, "Endpoint removed after context close");
        }
    }

    pub fn status_of(&self, provider_id: &str) -> ProviderStatus {
        let endpoints = self.endpoints.lock().unwrap_or_else(|e| e.into_inner());
        match endpoints.get(provider_id) {
            Some(ep) => ProviderStatus {
                provider_id: provider_id.to_string(),
                is_connected: true,
                is_logged_in: ep.is_logged_in,
                is_ready: ep.is_ready,
                context: Some(ep.context),
            },
            None => ProviderStatus {
                provider_id: provider_id.to_string(),
                is_connected: false,
                is_logged_in: false,
                is_ready: false,
                context: None,
            },
        }
    }

    /// Status of every provider in directory order
    pub fn status_of_all(&self) -> Vec<ProviderStatus> {
        self.directory
            .iter()
            .map(|info| self.status_of(&info.id))
            .collect()
    }

    fn track(&self, provider_id: &str, ctx: ContextId) {
        let mut endpoints = self.endpoints.lock().unwrap_or_else(|e| e.into_inner());
        endpoints.insert(
            provider_id.to_string(),
            ManagedEndpoint {
                provider_id: provider_id.to_string(),
                context: ctx,
                is_ready: false,
                is_logged_in: false,
            },
        );
    }

    fn remove(&self, provider_id: &str) {
        let mut endpoints = self.endpoints.lock().unwrap_or_else(|e| e.into_inner());
        endpoints.remove(provider_id);
    }

    fn mark_not_ready(&self, provider_id: &str) {
        let mut endpoints = self.endpoints.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(ep) = endpoints.get_mut(provider_id) {
            ep.is_ready = false;
        }
    }

    fn provider_lock(&self, provider_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.ensure_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(provider_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}
