// ABOUTME: Simulated host environment for tests and the --simulate mode.
// ABOUTME: Hosts mock agents in fake execution contexts addressed by id.

use crate::orchestrator::DispatchOrchestrator;
use crate::providers::ProviderDirectory;
use crate::query::QuerySession;
use crate::router::{ProtocolRouter, SenderIdentity};
use crate::traits::{ContextId, Environment};
use anyhow::Result;
use async_trait::async_trait;
use chorus_agent::{AgentChannel, AgentHost, Envelope, RemoteAgent};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Creates a fresh agent each time a context lands on the provider's surface
pub type AgentFactory = Box<dyn Fn() -> Box<dyn RemoteAgent> + Send + Sync>;

struct SimContext {
    url: String,
    background: bool,
    agent: Option<AgentChannel>,
}

/// In-memory environment: fake contexts, registered agents per provider,
/// and a single outbound stream of agent-emitted envelopes tagged with the
/// emitting context.
pub struct SimEnvironment {
    directory: ProviderDirectory,
    contexts: Mutex<HashMap<ContextId, SimContext>>,
    factories: Mutex<HashMap<String, AgentFactory>>,
    next_id: AtomicU64,
    focused: Mutex<Option<ContextId>>,
    refuse_opens: AtomicBool,
    outbound_tx: mpsc::UnboundedSender<(ContextId, Envelope)>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<(ContextId, Envelope)>>>,
}

impl SimEnvironment {
    pub fn new(directory: ProviderDirectory) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            directory,
            contexts: Mutex::new(HashMap::new()),
            factories: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            focused: Mutex::new(None),
            refuse_opens: AtomicBool::new(false),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
        }
    }

    /// Register the agent spawned whenever a context lands on this provider
    pub fn register_agent<F>(&self, provider_id: &str, factory: F)
    where
        F: Fn() -> Box<dyn RemoteAgent> + Send + Sync + 'static,
    {
        let mut factories = self.factories.lock().unwrap_or_else(|e| e.into_inner());
        factories.insert(provider_id.to_string(), Box::new(factory));
    }

    /// Take the stream of agent-emitted envelopes. Yields `None` after the
    /// first call.
    pub fn take_outbound(&self) -> Option<mpsc::UnboundedReceiver<(ContextId, Envelope)>> {
        let mut rx = self.outbound_rx.lock().unwrap_or_else(|e| e.into_inner());
        rx.take()
    }

    /// Make subsequent `open` calls fail
    pub fn refuse_opens(&self, refuse: bool) {
        self.refuse_opens.store(refuse, Ordering::SeqCst);
    }

    /// Close a context from the environment side
    pub fn close_context(&self, ctx: ContextId) {
        let mut contexts = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
        contexts.remove(&ctx);
        let mut focused = self.focused.lock().unwrap_or_else(|e| e.into_inner());
        if *focused == Some(ctx) {
            *focused = None;
        }
    }

    pub fn context_count(&self) -> usize {
        let contexts = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
        contexts.len()
    }

    pub fn focused(&self) -> Option<ContextId> {
        *self.focused.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_background(&self, ctx: ContextId) -> Option<bool> {
        let contexts = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
        contexts.get(&ctx).map(|c| c.background)
    }

    fn spawn_agent_for(&self, ctx: ContextId, url: &str) -> Option<AgentChannel> {
        let provider_id = self.directory.provider_for_url(url)?.id.clone();
        let factories = self.factories.lock().unwrap_or_else(|e| e.into_inner());
        let factory = factories.get(&provider_id)?;
        let (channel, mut agent_out) = AgentHost::spawn(factory());

        let outbound = self.outbound_tx.clone();
        tokio::spawn(async move {
            while let Some(envelope) = agent_out.recv().await {
                if outbound.send((ctx, envelope)).is_err() {
                    break;
                }
            }
        });
        Some(channel)
    }

    fn agent_of(&self, ctx: ContextId) -> Result<AgentChannel> {
        let contexts = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
        let context = contexts
            .get(&ctx)
            .ok_or_else(|| anyhow::anyhow!("Context {} no longer exists", ctx))?;
        context
            .agent
            .clone()
            .ok_or_else(|| anyhow::anyhow!("No agent in context {}", ctx))
    }
}

#[async_trait]
impl Environment for SimEnvironment {
    async fn open(&self, url: &str, background: bool) -> Result<ContextId> {
        if self.refuse_opens.load(Ordering::SeqCst) {
            anyhow::bail!("Environment refused to open a context");
        }
        let ctx = self.next_id.fetch_add(1, Ordering::SeqCst);
        let agent = self.spawn_agent_for(ctx, url);
        {
            let mut contexts = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
            contexts.insert(
                ctx,
                SimContext {
                    url: url.to_string(),
                    background,
                    agent,
                },
            );
        }
        if !background {
            let mut focused = self.focused.lock().unwrap_or_else(|e| e.into_inner());
            *focused = Some(ctx);
        }
        Ok(ctx)
    }

    async fn list(&self) -> Vec<(ContextId, String)> {
        let contexts = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
        contexts
            .iter()
            .map(|(ctx, state)| (*ctx, state.url.clone()))
            .collect()
    }

    async fn url_of(&self, ctx: ContextId) -> Option<String> {
        let contexts = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
        contexts.get(&ctx).map(|state| state.url.clone())
    }

    async fn navigate(&self, ctx: ContextId, url: &str) -> Result<()> {
        {
            let contexts = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
            if !contexts.contains_key(&ctx) {
                anyhow::bail!("Context {} no longer exists", ctx);
            }
        }
        // The navigated surface gets a fresh agent, like a page load would.
        let agent = self.spawn_agent_for(ctx, url);
        let mut contexts = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
        let Some(context) = contexts.get_mut(&ctx) else {
            anyhow::bail!("Context {} closed during navigation", ctx);
        };
        context.url = url.to_string();
        context.agent = agent;
        Ok(())
    }

    async fn focus(&self, ctx: ContextId) -> Result<()> {
        {
            let contexts = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
            if !contexts.contains_key(&ctx) {
                anyhow::bail!("Context {} no longer exists", ctx);
            }
        }
        let mut focused = self.focused.lock().unwrap_or_else(|e| e.into_inner());
        *focused = Some(ctx);
        Ok(())
    }

    async fn request(&self, ctx: ContextId, envelope: Envelope) -> Result<Value> {
        let agent = self.agent_of(ctx)?;
        agent.request(envelope).await
    }

    async fn post(&self, ctx: ContextId, envelope: Envelope) -> Result<()> {
        let agent = self.agent_of(ctx)?;
        agent.post(envelope).await
    }
}

/// Feed agent-emitted envelopes back through the router, the way the host
/// transport would
pub fn pump_outbound<E: Environment>(
    mut outbound: mpsc::UnboundedReceiver<(ContextId, Envelope)>,
    router: Arc<ProtocolRouter<E>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some((ctx, envelope)) = outbound.recv().await {
            let _ = router
                .handle(envelope, SenderIdentity::endpoint(ctx))
                .await;
        }
    })
}

/// Poll a session until it settles or the timeout elapses
pub async fn await_terminal<E: Environment>(
    orchestrator: &DispatchOrchestrator<E>,
    query_id: &str,
    timeout: Duration,
) -> Option<QuerySession> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(session) = orchestrator.session(query_id) {
            if session.is_terminal() {
                return Some(session);
            }
        }
        if Instant::now() > deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
