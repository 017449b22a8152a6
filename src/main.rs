//! # ptt-relay - Server Entry Point
//!
//! Runs the relay as an Actix-web HTTP server with the following features:
//!
//! ## Application Architecture:
//! - **/ws**: One WebSocket per client, carrying room events and live audio
//! - **/api/v1**: Health, metrics, runtime config and archive export
//! - **Graceful shutdown**: SIGTERM/SIGINT stop the server after in-flight requests
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: The entire application is asynchronous
//! - **Result<T, E>**: Startup errors bubble up through `anyhow`
//! - **static**: A global shutdown flag shared with the signal task

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use ptt_relay::config::AppConfig;
use ptt_relay::state::AppState;
use ptt_relay::{handlers, health, middleware, websocket};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set by the signal task when the server should shut down.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging** for debugging and monitoring
/// 3. **Creates shared application state** (config, metrics, rooms, connections)
/// 4. **Configures the HTTP server** with middleware and routes
/// 5. **Handles graceful shutdown** when receiving system signals
#[actix_web::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting ptt-relay v{}", env!("CARGO_PKG_VERSION"));
    info!(
        max_rooms = config.rooms.max_rooms,
        max_display_name_len = config.rooms.max_display_name_len,
        "Configuration loaded: {}:{}",
        config.server.host,
        config.server.port
    );

    let app_state = AppState::new(config.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        // Browser clients are served from other origins
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .expose_headers(vec![handlers::rooms::EXPORT_SKIPPED_HEADER])
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            // Middleware executes in reverse order for responses
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::RequestLogging)
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route("/rooms/{code}/logs", web::get().to(handlers::list_logs))
                    .route(
                        "/rooms/{code}/logs/{index}/wav",
                        web::get().to(handlers::download_transmission),
                    )
                    .route("/rooms/{code}/export", web::get().to(handlers::export_logs)),
            )
            .route("/ws", web::get().to(websocket::ws_handler))
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize tracing.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "debug", "ptt_relay=trace")
/// - If not set, defaults to "ptt_relay=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ptt_relay=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Listen for SIGTERM and SIGINT and raise the shutdown flag on the first one.
fn setup_signal_handlers() {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async {
        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
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
