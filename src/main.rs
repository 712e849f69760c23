//! # WAV Stream Relay - Main Application Entry Point
//!
//! Relays (or plays locally) the live WAV stream produced by a TTS provider,
//! starting as soon as the container header has been parsed.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: Network I/O runs on the actix (tokio) runtime
//! - **modules**: Code is organized into separate modules (mod statements)
//! - **Result<T, E>**: Library errors are typed; `anyhow` collects them at this edge
//! - **static**: A global shutdown flag shared with the signal handler task
//!
//! ## Application Architecture:
//! - **wav**: Incremental RIFF/WAVE parsing (scanner, format resolver, header state machine)
//! - **relay**: Forwards the upstream stream to HTTP clients with defined failure semantics
//! - **playback**: Plays the upstream stream on a local output device
//! - **upstream**: Client for the TTS provider
//! - **config**: Layered configuration (defaults, config.toml, environment)
//! - **state / health / middleware / handlers / error**: The HTTP service around the relay

mod cli;
mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod playback;
mod relay;
mod state;
mod upstream;
mod wav;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands, PlayCommand};
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use upstream::UpstreamClient;

/// Global shutdown signal set by the signal handler task.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging**
/// 3. **Dispatches** to the relay server, local playback or device listing
#[actix_web::main]
async fn main() -> Result<()> {
    // .ok() because a missing .env file is fine
    dotenv::dotenv().ok();

    init_tracing()?;

    let cli = Cli::parse();

    let config = AppConfig::load()?;
    config.validate()?;

    match cli.into_command() {
        Commands::Serve => serve(config).await,
        Commands::Play(cmd) => play(config, cmd).await,
        Commands::Devices => list_devices(),
    }
}

/// Run the relay HTTP server until it stops or a shutdown signal arrives.
async fn serve(config: AppConfig) -> Result<()> {
    config.require_credentials()?;

    info!("Starting wav-stream-relay v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let app_state = AppState::new(config)?;
    info!(upstream = %app_state.upstream.url(), "Relaying TTS streams");

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            // Middleware runs in reverse registration order for responses
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .configure(handlers::configure_routes)
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // Whichever finishes first: the server (usually an error) or a shutdown signal
    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            // Graceful stop lets in-flight relay streams finish
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Synthesize one text and play it locally.
async fn play(config: AppConfig, cmd: PlayCommand) -> Result<()> {
    config.require_credentials()?;

    let device = cmd.device.or_else(|| config.playback.output_device.clone());
    let device = playback::selector_from_config(device.as_deref())?;
    let client = UpstreamClient::new(&config)?;

    let report = playback::play_text(&client, &config.playback, device, &cmd.text)
        .await
        .context("Playback failed")?;

    info!(
        sample_rate = report.sample_rate,
        channels = report.channels,
        encoding = %report.encoding,
        bytes = report.bytes_played,
        "Playback complete"
    );
    Ok(())
}

fn list_devices() -> Result<()> {
    let devices = playback::list_output_devices()?;
    if devices.is_empty() {
        println!("No output devices found");
    }
    for (index, name) in devices {
        println!("{}: {}", index, name);
    }
    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g. "debug", "wav_stream_relay=trace")
/// - If not set, defaults to "wav_stream_relay=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wav_stream_relay=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Set up signal handlers for graceful shutdown (SIGTERM and SIGINT).
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Poll the shutdown flag every 100ms.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
