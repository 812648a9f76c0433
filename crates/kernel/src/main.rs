//! Pictor media server.
//!
//! HTTP server, expiry reaper and operator commands.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::http::{HeaderValue, Method};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use pictor_kernel::services::token::{DEFAULT_TOKEN_LIFETIME, TokenService};
use pictor_kernel::{AppState, Config, build_router};

/// Pictor media server.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server and the expiry reaper (default).
    Serve,

    /// Run a single reaper sweep and exit.
    Reap,

    /// Mint a bearer token for a user id.
    Token {
        /// User id to put in the `sub` claim.
        #[arg(long)]
        user: Uuid,

        /// Lifetime in seconds.
        #[arg(long, default_value_t = DEFAULT_TOKEN_LIFETIME)]
        ttl: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    let cli = Cli::parse();

    let config = Config::from_env().context("failed to load configuration")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Reap => reap(config).await,
        Command::Token { user, ttl } => {
            let token = TokenService::new(config.jwt_secret.as_bytes()).issue(user, ttl)?;
            println!("{token}");
            Ok(())
        }
    }
}

async fn serve(config: Config) -> Result<()> {
    info!(port = config.port, "Starting Pictor");

    let state = AppState::new(&config)
        .await
        .context("failed to initialize application state")?;

    let cancel = CancellationToken::new();
    let reaper = state
        .reaper()
        .with_interval(config.reaper_interval)
        .with_batch_size(config.reaper_batch_size)
        .spawn(cancel.clone());

    let cors = build_cors_layer(&config);
    let app = build_router(state).layer(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind to address")?;

    info!(%addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    cancel.cancel();
    if let Err(e) = reaper.await {
        warn!(error = %e, "reaper task ended abnormally");
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn reap(config: Config) -> Result<()> {
    let state = AppState::new(&config)
        .await
        .context("failed to initialize application state")?;

    let report = state
        .reaper()
        .with_batch_size(config.reaper_batch_size)
        .sweep()
        .await?;

    info!(
        examined = report.examined,
        reclaimed = report.reclaimed,
        failed_file = report.failed_file,
        failed_db = report.failed_db,
        "sweep complete"
    );
    Ok(())
}

fn build_cors_layer(config: &Config) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::PUT, Method::OPTIONS];

    if config.cors_allowed_origins.len() == 1 && config.cors_allowed_origins[0] == "*" {
        CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(methods)
            .allow_headers(tower_http::cors::Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_allowed_origins
            .iter()
            .filter_map(|o| match o.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(origin = %o, "ignoring unparseable CORS origin");
                    None
                }
            })
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(tower_http::cors::Any)
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
