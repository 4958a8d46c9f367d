//! Agrotrace companion server.
//!
//! Bootstraps the server:
//! 1. Load configuration from environment
//! 2. Pick the session slots (Redis when configured, else in memory)
//! 3. Open the profile store for the configured backend
//! 4. Build the per-client auth registry
//! 5. Build router with API routes + static placeholder pages
//! 6. Announce readiness to the host app and start serving
//!
//! Also supports a `sign` subcommand that signs the challenge message with a
//! local key, for exercising the API by hand.

use agrotrace::{
    announce,
    auth::{AppState, ClientRegistry, LocalWallet},
    config::{Config, ConfigError, ProfileBackend},
    middleware::{client_id, security_headers},
    routes,
    storage::{
        MemoryProfiles, MemorySessionSlots, PostgrestProfiles, ProfileRepository, RedisProfiles,
        RedisSessionSlots, RepositoryError, SessionSlots,
    },
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("Failed to load config: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid Redis URL: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Failed to open profile store: {0}")]
    Profiles(#[from] RepositoryError),

    #[error("Redis profile backend selected but REDIS_URL is not set")]
    MissingRedis,

    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

fn print_sign_usage() {
    eprintln!("Usage: agrotrace sign <private-key-hex> [message]");
    eprintln!();
    eprintln!("Sign the challenge message (EIP-191) with a local secp256k1 key.");
    eprintln!();
    eprintln!("Example:");
    eprintln!("  agrotrace sign 0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80");
}

/// `agrotrace sign`: print address and signature.
fn sign(args: &[String]) -> Result<(), String> {
    let key = args.first().ok_or("missing private key")?;
    let message = args
        .get(1)
        .map(String::as_str)
        .unwrap_or(agrotrace::auth::DEFAULT_AUTH_MESSAGE);

    let wallet = LocalWallet::from_hex(key).map_err(|e| e.to_string())?;
    let signature = wallet
        .sign_personal_message(message)
        .map_err(|e| e.to_string())?;

    println!("address:   {}", wallet.address_string());
    println!("message:   {}", message);
    println!("signature: {}", signature);
    Ok(())
}

async fn open_stores(
    config: &Config,
) -> Result<(Arc<dyn ProfileRepository>, Arc<dyn SessionSlots>), StartupError> {
    let redis_client = config
        .redis_url
        .as_deref()
        .map(redis::Client::open)
        .transpose()?;

    let sessions: Arc<dyn SessionSlots> = match &redis_client {
        Some(client) => {
            tracing::info!("Session slots in Redis");
            Arc::new(RedisSessionSlots::new(client.clone()))
        }
        None => {
            tracing::info!("Session slots in memory");
            Arc::new(MemorySessionSlots::new())
        }
    };

    let profiles: Arc<dyn ProfileRepository> = match &config.profile_backend {
        ProfileBackend::Supabase { url, anon_key } => {
            tracing::info!(url = %url, "Profiles in hosted store");
            Arc::new(PostgrestProfiles::new(url, anon_key))
        }
        ProfileBackend::Redis => {
            let client = redis_client.as_ref().ok_or(StartupError::MissingRedis)?;
            tracing::info!("Profiles in Redis");
            Arc::new(RedisProfiles::connect(client).await?)
        }
        ProfileBackend::Memory => {
            tracing::warn!("Profiles in memory; nothing survives a restart");
            Arc::new(MemoryProfiles::new())
        }
    };

    Ok((profiles, sessions))
}

async fn run() -> Result<(), StartupError> {
    let config = Config::from_env()?;
    tracing::info!("Starting agrotrace on {}", config.bind_addr);

    let (profiles, sessions) = open_stores(&config).await?;

    // Pages sign with the browser wallet and post the signature, so contexts
    // keep the default disconnected wallet.
    let clients = ClientRegistry::new(profiles, sessions)
        .with_prefix(config.storage_prefix.clone())
        .with_max_age(config.session_max_age)
        .with_challenge_message(config.auth_message.clone())
        .with_capacity(config.max_clients);

    let state = AppState {
        clients: Arc::new(clients),
    };

    // Same-origin only: no CORS origins allowed.
    let cors = CorsLayer::new();

    let app = routes::api_router()
        .fallback_service(ServeDir::new(&config.static_dir))
        .layer(cors)
        .layer(axum::middleware::from_fn(client_id))
        .layer(axum::middleware::from_fn(security_headers))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("Listening on {}", config.bind_addr);

    announce::spawn_announce(config.ready_url.clone(), config.ready_retry_delay);

    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() >= 2 && args[1] == "sign" {
        if args.len() < 3 || args.len() > 4 {
            print_sign_usage();
            std::process::exit(1);
        }
        if let Err(e) = sign(&args[2..]) {
            eprintln!("Error signing message: {}", e);
            std::process::exit(1);
        }
        return;
    }

    // Initialize tracing with env filter support (RUST_LOG)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "Startup failed");
        std::process::exit(1);
    }
}
