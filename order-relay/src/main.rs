//! Order Relay - HTTP server that forwards orders to RabbitMQ.
//!
//! This binary:
//! - Accepts order documents on `POST /orders`
//! - Publishes each one, unmodified, to the order queue
//! - Answers `201` once the broker has the message
//!
//! One broker connection is shared by all requests for the life of the process.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use order_relay::{router, AppState, Config, LapinBroker, Publisher, PublisherSettings};

#[tokio::main]
async fn main() -> Result<()> {
    // Development convenience; production sets the environment directly
    let dotenv_loaded = dotenvy::dotenv().is_ok();

    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!(dotenv_loaded, "order_relay_starting");

    // Load configuration
    let config = Config::from_env();
    let settings = PublisherSettings::from_config(&config);
    info!(
        port = config.port,
        broker = %config.broker_endpoint(),
        queue = %settings.queue.name,
        queue_durable = settings.queue.durable,
        publisher_confirms = settings.confirms,
        channel_pool_size = settings.channel_pool_size,
        "config_loaded"
    );

    // Create RabbitMQ publisher
    let publisher = Publisher::new(LapinBroker::new(config.rabbitmq_url.clone()), settings);

    // The server starts even if the broker is down; orders fail until it returns
    if let Err(e) = publisher.connect_eagerly().await {
        warn!(error = %e, "rabbitmq_unavailable_at_startup");
    }

    let state = AppState::new(config.clone(), publisher.clone());
    let app = router(state);

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "order_relay_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Close publisher connection
    publisher.close().await;

    info!("order_relay_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("order_relay_shutting_down");
}
