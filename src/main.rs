//! # Edge Readaloud Bridge - Main Application Entry Point
//!
//! Starts the websocket server that readaloud clients talk to.
//!
//! ## Startup sequence:
//! 1. Load `.env`, set up tracing
//! 2. Load and validate configuration
//! 3. Build the synthesis pipeline (HTTP backend + ffmpeg transcoder)
//! 4. Bind with TLS (`wss://`) or plain (`ws://`) and serve until SIGINT/SIGTERM

use actix_web::{web, App, HttpServer};
use anyhow::{anyhow, Context, Result};
use edge_readaloud_bridge::{
    middleware, server, tls,
    tts::{FfmpegTranscoder, HttpSpeechBackend, Synthesizer},
    AppConfig, AppState,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    init_tracing()?;

    // Must happen before the backend client or the listener touch TLS
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting edge-readaloud-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!(
        backend = %config.backend.url,
        transcoder = %config.transcoder.program,
        tls = config.tls.enabled,
        "Configuration loaded: {}",
        config.bind_addr()
    );

    let backend = HttpSpeechBackend::new(&config.backend).context("Failed to build TTS backend client")?;
    let transcoder = FfmpegTranscoder::new(&config.transcoder);
    let synthesizer = Synthesizer::new(Arc::new(backend), Arc::new(transcoder));

    let app_state = AppState::new(config.clone(), synthesizer);
    let bind_addr = config.bind_addr();

    let http_server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            // Middleware runs in reverse registration order for requests
            .wrap(server::build_cors(&app_state.config.upgrade))
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .configure(server::configure_routes)
    });

    let http_server = if config.tls.enabled {
        let tls_config = tls::load_server_config(&config.tls.cert_path, &config.tls.key_path)?;
        info!("Starting WSS server on {}", bind_addr);
        http_server
            .bind_rustls_0_23(&bind_addr, tls_config)
            .with_context(|| format!("Failed to bind {}", bind_addr))?
    } else {
        info!("Starting WS server on {} (TLS disabled)", bind_addr);
        http_server
            .bind(&bind_addr)
            .with_context(|| format!("Failed to bind {}", bind_addr))?
    };

    let server = http_server.run();
    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // Whichever finishes first: the server (usually an error) or a signal
    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        signal = wait_for_shutdown() => {
            if let Err(e) = signal {
                error!("Failed to listen for shutdown signals: {}", e);
            }
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` controls the filter; defaults to debug for this crate.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "edge_readaloud_bridge=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| anyhow!("Failed to initialise tracing: {}", e))
}

/// Resolves on SIGTERM or SIGINT.
#[cfg(unix)]
async fn wait_for_shutdown() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C");
    Ok(())
}
