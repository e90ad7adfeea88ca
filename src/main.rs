//! auth-gateway - Request-authentication gateway
//!
//! This is the main entry point for the auth-gateway application.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{debug, error, info, warn};

use auth_gateway::auth::{hash_password, AuthConfig, AuthManager, RequestGate, ServerSecret};
use auth_gateway::config::Config;
use auth_gateway::error::AppError;
use auth_gateway::otel::{init_tracing, Metrics, OtelProvider};
use auth_gateway::server::{AppState, Server};
use auth_gateway::store::{InMemoryCredentialStore, UserRecord};

/// auth-gateway - Request-authentication gateway
#[derive(Parser, Debug)]
#[command(name = "auth-gateway")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "AUTH_GATEWAY_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the gateway (default)
    Serve,

    /// Print a fresh base64 secret suitable for `auth.secret_key`
    GenerateSecret,

    /// Print the stored hash of a password under the configured secret
    HashPassword {
        /// Plain-text password
        password: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Some(Command::GenerateSecret) => {
            println!("{}", ServerSecret::generate().to_base64());
            Ok(())
        }
        Some(Command::HashPassword { ref password }) => {
            let config = load_config(&args)?;
            let secret = config.auth.secret()?;
            println!("{}", hash_password(&secret, password));
            Ok(())
        }
        Some(Command::Serve) | None => Ok(serve(load_config(&args)?).await?),
    }
}

async fn serve(config: Config) -> Result<(), AppError> {
    config.validate()?;

    let otel_provider = OtelProvider::new(&config.otel)?;
    init_tracing(&otel_provider, &config.logging)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting auth-gateway");

    let secret = config.auth.secret()?;

    let store = Arc::new(InMemoryCredentialStore::with_users(
        config
            .users
            .iter()
            .map(|u| UserRecord::new(&u.username, &u.password_hash)),
    ));
    if store.is_empty() {
        warn!("No users configured, every login will fail");
    }
    info!(users = store.len(), "Credential store initialized");

    let auth_config = AuthConfig::from(&config.auth);
    info!(
        token_ttl_secs = auth_config.token_ttl.as_secs(),
        max_failures = auth_config.rate_limit.max_failures,
        block_duration_secs = auth_config.rate_limit.block_duration.as_secs(),
        "Authentication manager initialized"
    );
    let auth_manager = Arc::new(AuthManager::new(store, secret, auth_config));

    let cleanup = spawn_block_cleanup(
        Arc::clone(&auth_manager),
        config.auth.rate_limit.cleanup_interval_secs,
    );

    let gate = RequestGate::new(auth_manager, config.gateway.public_paths.clone());
    let metrics = Arc::new(Metrics::new(&otel_provider.meter()));
    let state = AppState::new(gate, metrics, config.server.max_body_bytes);

    let server = Server::new(config.server.clone(), state);

    info!(
        host = %config.server.host,
        port = %config.server.port,
        "Starting HTTP server"
    );

    let result = server.run(shutdown_signal()).await;

    if let Some(handle) = cleanup {
        handle.abort();
    }

    if let Err(e) = otel_provider.shutdown() {
        error!(error = %e, "Failed to shutdown OpenTelemetry");
    }

    info!("auth-gateway shutdown complete");

    result.map_err(Into::into)
}

/// Periodically drop expired IP blocks
///
/// Expired blocks are already ignored on read; this only bounds memory.
fn spawn_block_cleanup(
    auth_manager: Arc<AuthManager<InMemoryCredentialStore>>,
    interval_secs: u64,
) -> Option<tokio::task::JoinHandle<()>> {
    if interval_secs == 0 {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let removed = auth_manager.guard().cleanup();
            if removed > 0 {
                debug!(
                    removed,
                    tracked = auth_manager.guard().tracked_ips_count(),
                    "Swept expired IP blocks"
                );
            }
        }
    }))
}

/// Load configuration from file or environment
fn load_config(args: &Args) -> anyhow::Result<Config> {
    match &args.config {
        Some(path) => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from file: {}", path);
            Config::from_file(path).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
        None => {
            eprintln!("Loading configuration from environment variables");
            Config::from_env().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
    }
}

/// Create a future that resolves when a shutdown signal is received
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
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
