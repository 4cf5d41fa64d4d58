//! # Message Relay Service
//!
//! Binary entry point for the message relay.
//!
//! This executable:
//! - Loads configuration from files and the environment
//! - Initializes logging
//! - Wires the transport, relay engine, outbound emitter and ingress
//! - Runs the relay loop, the send loop and the HTTP server until SIGINT/SIGTERM

use clap::Parser;
use relay_api::{
    start_server, AppState, LoggingConfig, ServiceConfig, ServiceError, CONFIG_FILE_ENV,
};
use relay_core::{
    Ingress, MinLengthValidator, OutboundEmitter, RelayEngine, Shutdown, SuffixTransformer,
};
use relay_runtime::{InMemoryTransport, ProviderConfig, TransportClient};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;

/// Reliable message relay with validation-driven dead-lettering
#[derive(Debug, Parser)]
#[command(name = "message-relay", version, about)]
struct Cli {
    /// YAML configuration file applied over the default locations
    #[arg(long, short = 'c', env = CONFIG_FILE_ENV)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logging settings come from the configuration, so load it first and
    // report any failure once logging is up.
    let loaded = ServiceConfig::load(cli.config.as_deref());
    let logging = loaded
        .as_ref()
        .map(|config| config.logging.clone())
        .unwrap_or_default();
    init_tracing(&logging);

    info!("Starting message relay");

    let service_config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!(
                error = %e,
                "Could not load service configuration; aborting. \
                 Fix the configuration and restart."
            );
            std::process::exit(3);
        }
    };

    if let Err(e) = service_config.validate() {
        error!(error = %e, "Service configuration is invalid; aborting");
        std::process::exit(3);
    }

    if let Err(e) = run(service_config).await {
        error!("Message relay failed: {}", e);
        std::process::exit(e.exit_code());
    }
}

/// Wire the components and run until a termination signal arrives
async fn run(config: ServiceConfig) -> Result<(), ServiceError> {
    let transport = build_transport(&config)?;
    let relay_config = config.relay_config()?;
    let destination = config.destination_queue()?;
    let source = relay_config.queue.clone();

    let engine = RelayEngine::new(
        transport.clone(),
        Arc::new(MinLengthValidator::new(config.validation.clone())),
        Arc::new(SuffixTransformer::default()),
        relay_config,
    );
    let (emitter, send_loop) = OutboundEmitter::new(config.emitter_config());

    let shutdown = Shutdown::new();

    let relay_task = {
        let engine = engine.clone();
        let signal = shutdown.signal();
        tokio::spawn(async move { engine.run(signal).await })
    };
    let send_task = tokio::spawn(send_loop.run(
        transport.clone(),
        destination.clone(),
        shutdown.signal(),
    ));

    info!(
        source = %source,
        destination = %destination,
        min_length = config.validation.min_length,
        capacity = config.emitter.capacity,
        "Relay loops started"
    );

    let state = AppState::new(
        config.server.clone(),
        Ingress::new(emitter),
        engine,
        transport.clone(),
        source,
        config.drain_options(),
    );

    info!(
        host = %config.server.host,
        port = config.server.port,
        "Starting HTTP server"
    );

    let server = start_server(state, shutdown.signal());
    tokio::pin!(server);

    let server_result = tokio::select! {
        result = &mut server => result,
        _ = wait_for_termination() => {
            shutdown.trigger();
            server.await
        }
    };

    // The server may have stopped on its own; stop the loops either way.
    shutdown.trigger();

    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout_seconds);
    let loops = async {
        if let Err(e) = relay_task.await {
            error!(error = %e, "Relay loop terminated abnormally");
        }
        if let Err(e) = send_task.await {
            error!(error = %e, "Send loop terminated abnormally");
        }
    };
    if tokio::time::timeout(shutdown_timeout, loops).await.is_err() {
        warn!(
            timeout_seconds = shutdown_timeout.as_secs(),
            "Background loops did not finish before the shutdown timeout"
        );
    }

    if let Err(e) = transport.close().await {
        warn!(error = %e, "Failed to close transport cleanly");
    }

    info!("Message relay stopped");
    server_result
}

/// Create the transport selected by the broker endpoint
fn build_transport(config: &ServiceConfig) -> Result<Arc<dyn TransportClient>, ServiceError> {
    let transport: Arc<dyn TransportClient> = match config.provider_config()? {
        ProviderConfig::InMemory(memory) => {
            if config.broker.credential.is_some() {
                warn!("broker.credential is set but the in-memory provider does not use it");
            }
            info!(
                endpoint = %config.broker.endpoint,
                max_queue_size = memory.max_queue_size,
                max_delivery_count = memory.max_delivery_count,
                lock_duration_seconds = memory.lock_duration.as_secs(),
                "Using in-memory broker"
            );
            Arc::new(InMemoryTransport::new(memory))
        }
    };
    Ok(transport)
}

/// Initialize the global tracing subscriber
///
/// `RUST_LOG` takes precedence over `logging.level`.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json_format {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Resolve when SIGINT (Ctrl+C) or SIGTERM is received
async fn wait_for_termination() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
                error!(error = %e, "Failed to install SIGTERM signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C), initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}
