use std::sync::Arc;

use worker_agent::config::AgentConfig;
use worker_agent::server::Server;
use worker_agent::workers::{SleepWorker, WorkerRegistry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = match AgentConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {err}");
            eprintln!(
                "  required: WORKER_AGENT_SERVER_ID, WORKER_AGENT_PASSWORD, WORKER_AGENT_MASTER_HOST"
            );
            std::process::exit(1);
        }
    };

    eprintln!("{} v{}", config.name, env!("CARGO_PKG_VERSION"));
    eprintln!("   Master: {}", config.master.host);
    eprintln!("   Jobs cache: {}", config.jobs_dir.display());

    let mut registry = WorkerRegistry::new();
    registry.register(Arc::new(SleepWorker));
    eprintln!("   Workers: {} registered\n", registry.count());

    let server = Server::with_registry(config, registry)?;

    // Connect in the background; the retry loop runs until online or stopped.
    let starter = Arc::clone(&server);
    tokio::spawn(async move {
        if let Err(err) = starter.start().await {
            tracing::error!(error = %err, "agent failed to start");
        }
    });

    let signal = wait_for_shutdown().await;
    server.stop(signal).await;
    Ok(())
}

/// Wait for SIGINT (ctrl-C in a terminal) or SIGTERM (service manager stop).
async fn wait_for_shutdown() -> &'static str {
    let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = term.recv() => "SIGTERM",
    }
}
