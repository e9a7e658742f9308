// ABOUTME: Headless host loop bridging JSON-line envelopes to the protocol router.
// ABOUTME: Also forwards agent-emitted envelopes and broadcasts session updates.

use anyhow::{Context, Result};
use chorus_agent::{Ack, Envelope, Message};
use chorus_core::testing::{await_terminal, pump_outbound, SimEnvironment};
use chorus_core::{
    DispatchOrchestrator, ProtocolRouter, ProviderDirectory, RouteOutcome, SenderIdentity,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::sync::broadcast;

/// Serve the router over stdin/stdout: one JSON envelope per input line,
/// one JSON reply (or SESSION_UPDATE broadcast) per output line.
pub async fn run(
    router: Arc<ProtocolRouter<SimEnvironment>>,
    orchestrator: Arc<DispatchOrchestrator<SimEnvironment>>,
    env: Arc<SimEnvironment>,
) -> Result<()> {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut outbound = env
        .take_outbound()
        .context("Outbound stream already taken")?;
    let mut updates = orchestrator.subscribe();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Envelope>(&line) {
                    Ok(envelope) => {
                        match router.handle(envelope, SenderIdentity::ui()).await {
                            RouteOutcome::Immediate(value) => println!("{}", value),
                            RouteOutcome::Deferred(rx) => {
                                tokio::spawn(async move {
                                    let value = rx.await.unwrap_or_else(|_| {
                                        Ack::err("Reply channel dropped").to_value()
                                    });
                                    println!("{}", value);
                                });
                            }
                        }
                    }
                    Err(e) => {
                        println!("{}", Ack::err(format!("Malformed envelope: {}", e)).to_value());
                    }
                }
            }

            outbound_item = outbound.recv() => {
                let Some((ctx, envelope)) = outbound_item else { break };
                let _ = router.handle(envelope, SenderIdentity::endpoint(ctx)).await;
            }

            update = updates.recv() => {
                match update {
                    Ok(session) => {
                        let session = serde_json::to_value(&session)
                            .context("Failed to serialize session update")?;
                        let envelope = Envelope::new(Message::SessionUpdate { session });
                        println!("{}", serde_json::to_string(&envelope)?);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Session update stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    tracing::info!("Host loop finished");
    Ok(())
}

/// Dispatch one scripted query to every provider, wait for the session to
/// settle, and print it.
pub async fn simulate(
    router: &Arc<ProtocolRouter<SimEnvironment>>,
    orchestrator: &Arc<DispatchOrchestrator<SimEnvironment>>,
    env: &Arc<SimEnvironment>,
    directory: &ProviderDirectory,
) -> Result<()> {
    let outbound = env
        .take_outbound()
        .context("Outbound stream already taken")?;
    pump_outbound(outbound, Arc::clone(router));

    let envelope = Envelope::new(Message::SubmitQuery {
        query_id: None,
        text: "In one sentence, what makes you different?".to_string(),
        providers: directory.ids(),
        fresh_session: false,
    });
    let reply = router
        .handle(envelope, SenderIdentity::ui())
        .await
        .resolve()
        .await;

    if reply["success"] != serde_json::Value::Bool(true) {
        anyhow::bail!("Dispatch rejected: {}", reply);
    }
    let query_id = reply["session"]["query"]["id"]
        .as_str()
        .context("Missing query id in dispatch reply")?
        .to_string();
    tracing::info!(query_id = %query_id, "Simulated query dispatched");

    let session = await_terminal(orchestrator, &query_id, Duration::from_secs(30))
        .await
        .context("Session did not settle in time")?;
    println!("{}", serde_json::to_string_pretty(&session)?);
    Ok(())
}
