use anyhow::Context;
use clap::Parser;
use queue_node::actions;
use queue_node::config::NodeConfig;
use queue_node::executor::executor::TaskExecutor;
use queue_node::executor::handlers::router;
use queue_node::executor::registry::ActionHandlerRegistry;
use queue_node::executor::security::SecurityGate;
use queue_node::executor::store::MemoryTaskStore;
use queue_node::executor::workers::QueueWorkerPools;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "queue_node", about = "Runs a queue node")]
struct Args {
    /// TOML settings file.
    #[arg(long, env = "QUEUE_NODE_SETTINGS")]
    config: Option<PathBuf>,

    /// Overrides the `bind` address from the settings file.
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Log filter used when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    // 1. Configuration:
    let mut config = NodeConfig::load(args.config.as_deref()).context("loading settings")?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if config.local_identity.is_empty() {
        tracing::warn!("No local identity configured, local-only actions accept empty senders");
    }

    // 2. Queues and handlers:
    let pools = QueueWorkerPools::new();
    let registry = ActionHandlerRegistry::new(pools.clone());
    actions::register_builtin(&registry, &config).context("registering built-in actions")?;

    // 3. Worker pools, now that queue limits are known:
    pools.start_all(&config.queues);

    let executor = TaskExecutor::new(
        registry.clone(),
        SecurityGate::new(&config.local_identity),
        Arc::new(MemoryTaskStore::new()),
    );

    for (action, queue) in registry.actions() {
        tracing::info!("  - {} @ {}", action, queue);
    }

    // 4. HTTP dispatch surface:
    let app = router(executor);

    tracing::info!("HTTP server listening on {}", config.bind);
    tracing::info!("Queues reachable at {}", config.root_url);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    axum::serve(listener, app).await?;

    Ok(())
}
