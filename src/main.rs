//! graphite-agent Binary Entry Point
//!
//! This binary runs the collection loop until it is terminated.
//! Core functionality is provided by the `graphite_agent` library crate.

use std::time::Duration;

use clap::Parser;
use graphite_agent::{
    AgentConfig, AgentData, CycleController, Dispatcher, GraphiteSink, ProbeRegistry,
    config::{SAMPLE_CONFIG, parse_duration},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// graphite-agent - Periodic Graphite Metrics Agent
#[derive(Parser, Debug)]
#[command(name = "graphite-agent", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "/etc/graphite-agent.yaml",
        env = "GRAPHITE_AGENT_CONFIG"
    )]
    config: String,

    /// Print a sample configuration and exit
    #[arg(short = 'C', long)]
    configure: bool,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Carbon host (overrides config file)
    #[arg(long, env = "GRAPHITE_AGENT_GRAPHITE_HOST")]
    graphite_host: Option<String>,

    /// Carbon port (overrides config file)
    #[arg(long, env = "GRAPHITE_AGENT_GRAPHITE_PORT")]
    graphite_port: Option<u16>,

    /// Wake interval, e.g. "60" or "1m" (overrides config file)
    #[arg(long, env = "GRAPHITE_AGENT_WAKE_INTERVAL", value_parser = parse_duration)]
    wake_interval: Option<Duration>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.configure {
        print!("{SAMPLE_CONFIG}");
        return Ok(());
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,graphite_agent=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let agent = AgentData::current();
    tracing::info!(
        version = %agent.version,
        os = std::env::consts::OS,
        host = %agent.host,
        pid = agent.pid,
        "Agent starting"
    );

    // Load configuration from file
    tracing::info!("Loading configuration from: {}", cli.config);
    let mut config = AgentConfig::read(&cli.config)?;

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(host) = cli.graphite_host {
        config.application.graphite_host = host;
    }
    if let Some(port) = cli.graphite_port {
        config.application.graphite_port = port;
    }
    if let Some(interval) = cli.wake_interval {
        config.application.wake_interval = Some(interval);
    }
    config.validate()?;

    let app = &config.application;
    tracing::info!(
        "Graphite: {}:{}, wake interval: {:?}, probe timeout: {:?}",
        app.graphite_host,
        app.graphite_port,
        app.wake_interval(),
        app.probe_timeout(),
    );

    let registry = ProbeRegistry::with_builtins();
    let dispatcher = Dispatcher::new(
        GraphiteSink::from_config(app),
        agent,
        app.localhost_name.as_deref(),
    );
    tracing::info!(host = %dispatcher.host_segment(), "Metric host segment");

    let mut controller = CycleController::new(app, &registry, dispatcher);
    if controller.instance_count() == 0 {
        tracing::warn!("No probe instances configured, cycles will send nothing");
    }

    if cli.once {
        let report = controller.run_cycle().await;
        tracing::info!(
            spawned = report.spawned,
            failed = report.failed,
            sent = report.sent,
            send_failures = report.send_failures,
            "Single cycle complete"
        );
        return Ok(());
    }

    tracing::info!("Press Ctrl+C to shutdown");
    controller.run(shutdown_signal()).await;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
