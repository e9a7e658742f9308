// ABOUTME: Environment trait abstracting the host's execution-context manager.
// ABOUTME: Contexts are addressed by opaque ids; messaging reaches the agent inside.

use anyhow::Result;
use async_trait::async_trait;
use chorus_agent::Envelope;
use serde_json::Value;

/// Opaque handle to a live execution context hosting one provider's chat surface
pub type ContextId = u64;

/// The host environment that owns execution contexts.
///
/// All calls are suspension points. A context can disappear between any two
/// calls; callers must re-resolve handles after every await rather than
/// caching them.
#[async_trait]
pub trait Environment: Send + Sync + 'static {
    /// Open a new context at the address. With `background` set the context
    /// must not steal user focus.
    async fn open(&self, url: &str, background: bool) -> Result<ContextId>;

    /// All currently open contexts with their addresses
    async fn list(&self) -> Vec<(ContextId, String)>;

    /// Current address of a context, or None once it no longer exists.
    /// This is the liveness check for tracked handles.
    async fn url_of(&self, ctx: ContextId) -> Option<String>;

    /// Navigate an existing context to a new address
    async fn navigate(&self, ctx: ContextId, url: &str) -> Result<()>;

    /// Bring a context to the foreground
    async fn focus(&self, ctx: ContextId) -> Result<()>;

    /// Deliver an envelope to the agent in the context and await its
    /// synchronous reply (used for readiness probes)
    async fn request(&self, ctx: ContextId, envelope: Envelope) -> Result<Value>;

    /// Deliver an envelope without waiting for a reply
    async fn post(&self, ctx: ContextId, envelope: Envelope) -> Result<()>;
}
