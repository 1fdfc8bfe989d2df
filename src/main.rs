//! Multi-room WebSocket Chat Server - Entry Point
//!
//! Loads configuration, opens the ledger, starts the Registry actor and
//! accepts connections until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use roomchat::config::LedgerBackend;
use roomchat::{
    serve_with_shutdown, AppState, Authenticator, Config, HandleValidator, IdentityMode, Ledger,
    MemoryLedger, Registry, RegistrySettings, SqliteLedger, TokenTable,
};

#[derive(Parser, Debug)]
#[command(name = "roomchat", version, about = "Multi-room WebSocket chat server")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides server.bind
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=roomchat=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("roomchat=info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    let ledger: Arc<dyn Ledger> = match config.ledger.backend {
        LedgerBackend::Memory => Arc::new(MemoryLedger::new()),
        LedgerBackend::Sqlite => {
            info!("Opening SQLite ledger at {}", config.ledger.path);
            Arc::new(SqliteLedger::connect(&config.ledger.path).await?)
        }
    };

    let auth: Arc<dyn Authenticator> = match config.identity.mode {
        IdentityMode::Handle => Arc::new(HandleValidator),
        IdentityMode::Authenticated => Arc::new(TokenTable::new(config.identity.tokens.clone())),
    };

    let registry = Registry::spawn(RegistrySettings::from(&config), ledger);
    info!("Registry actor started ({:?} identities)", config.identity.mode);

    let listener = TcpListener::bind(&config.server.bind).await?;
    info!("WebSocket Chat Server listening on {}", config.server.bind);

    let state = AppState {
        registry,
        auth,
        outbound_queue: config.server.outbound_queue,
        default_room: config.server.default_room.clone(),
    };

    // Serve until Ctrl-C; live sessions are notified and drained before exit
    serve_with_shutdown(listener, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    })
    .await;
    info!("Server stopped");

    Ok(())
}
