// ABOUTME: Entry point for the chorus coordinator process.
// ABOUTME: Initializes logging and config, wires the dispatch stack, runs the host loop.

use anyhow::Result;
use chorus_agent::MockAgent;
use chorus_core::testing::SimEnvironment;
use chorus_core::{
    Config, DispatchOrchestrator, EndpointRegistry, HistoryStore, ProtocolRouter, SqliteStore,
};
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod host;

#[derive(Debug, Parser)]
#[command(
    name = "chorus",
    about = "Fan one prompt out to several AI chat providers and aggregate the replies"
)]
struct Cli {
    /// Path to config.toml (overrides the default search order)
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Run one scripted dispatch against simulated providers, print the
    /// settled session, and exit
    #[arg(long)]
    simulate: bool,

    /// Install the Prometheus metrics exporter
    #[arg(long)]
    metrics: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("chorus crashed: {}", panic_info);
        eprintln!("{:?}", std::backtrace::Backtrace::force_capture());
    }));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    if let Some(path) = &cli.config {
        std::env::set_var("CHORUS_CONFIG_PATH", path);
    }
    let config = Config::load()?;

    if cli.metrics {
        chorus_core::metrics::install_prometheus_exporter()?;
    }

    let directory = config.directory();
    tracing::info!(
        providers = directory.len(),
        storage = %config.storage.path,
        ready_timeout_secs = config.dispatch.ready_timeout_secs,
        "Configuration loaded"
    );

    // The per-provider chat-surface adapters live outside this process; the
    // coordinator talks to whatever the environment hosts. This build wires
    // the simulated environment with echo agents behind every provider.
    let env = Arc::new(SimEnvironment::new(directory.clone()));
    for provider in directory.iter() {
        let id = provider.id.clone();
        env.register_agent(&provider.id, move || Box::new(MockAgent::new(id.clone())));
    }

    let registry = Arc::new(EndpointRegistry::new(Arc::clone(&env), directory.clone()));
    let store = Arc::new(SqliteStore::open(&config.storage.path)?);
    let history = HistoryStore::new(store, config.dispatch.history_cap);
    let orchestrator = Arc::new(DispatchOrchestrator::new(
        Arc::clone(&env),
        Arc::clone(&registry),
        history,
        config.dispatch_config(),
    ));
    let router = Arc::new(ProtocolRouter::new(
        Arc::clone(&orchestrator),
        Arc::clone(&registry),
    ));

    if cli.simulate {
        host::simulate(&router, &orchestrator, &env, &directory).await
    } else {
        tracing::info!("Reading envelopes from stdin, one JSON object per line");
        host::run(router, orchestrator, env).await
    }
}
