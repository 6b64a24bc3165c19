//! # herald
//!
//! STOMP relay binary: loads settings, wires the token manager into the
//! WebSocket server and runs until interrupted. Also mints tokens for
//! testing clients against a running relay.

#![deny(unsafe_code)]

mod wiring;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use herald_auth::{MemoryTokenStore, TokenManager, TokenSubject, spawn_sweeper};
use herald_core::logging::init_subscriber;
use herald_server::HeraldServer;
use herald_settings::{HeraldSettings, load_settings_from_path, settings_path};
use tracing::info;

/// How often expired blacklist entries are purged.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// herald STOMP relay.
#[derive(Parser, Debug)]
#[command(name = "herald", about = "Authenticated STOMP-over-WebSocket relay", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay.
    Serve(ServeArgs),
    /// Mint an access/refresh token pair and print it as JSON.
    Token(TokenArgs),
    /// Print a random signing secret for `auth.secret`.
    Secret,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Settings file (defaults to `~/.herald/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings, 0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Args, Debug)]
struct TokenArgs {
    /// Settings file (defaults to `~/.herald/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// User id to embed.
    #[arg(long)]
    user_id: i64,

    /// Login name to embed.
    #[arg(long)]
    username: String,

    /// Department id to embed.
    #[arg(long)]
    dept_id: Option<i64>,

    /// Data-scope level to embed.
    #[arg(long, default_value_t = 0)]
    data_scope: i32,

    /// Granted authority; repeat for several.
    #[arg(long = "authority")]
    authorities: Vec<String>,
}

fn load(config: Option<&Path>) -> Result<HeraldSettings> {
    let path = config.map_or_else(settings_path, Path::to_path_buf);
    load_settings_from_path(&path).with_context(|| format!("Failed to load settings from {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    match Cli::parse().command {
        Command::Serve(args) => serve(args).await,
        Command::Token(args) => mint(args).await,
        Command::Secret => {
            println!("{}", wiring::generate_secret());
            Ok(())
        }
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let mut settings = load(args.config.as_deref())?;
    if let Some(host) = args.host {
        settings.server.host = host;
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }

    init_subscriber(&settings.logging.level, settings.logging.format);
    let metrics = herald_server::metrics::install_recorder().context("Failed to install metrics recorder")?;

    let store = Arc::new(MemoryTokenStore::new());
    let tokens = Arc::new(TokenManager::new(wiring::token_config(&settings.auth), store.clone()));
    let server = HeraldServer::new(wiring::server_config(&settings.server), tokens).with_metrics(metrics);
    let sweeper = spawn_sweeper(store, SWEEP_INTERVAL, server.shutdown().token());

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    info!("herald listening on ws://{addr}{}", server.config().ws_path);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    info!("Shutting down...");
    let timeout = Duration::from_secs(settings.server.shutdown_timeout_secs);
    let drained = server.shutdown().graceful_shutdown(Some(timeout)).await;
    let _ = handle.await;
    let _ = sweeper.await;

    info!(drained, "Shutdown complete");
    Ok(())
}

async fn mint(args: TokenArgs) -> Result<()> {
    let settings = load(args.config.as_deref())?;
    init_subscriber(&settings.logging.level, settings.logging.format);
    if settings.auth.secret.is_none() {
        bail!("auth.secret must be set for minted tokens to validate against a running relay");
    }

    let tokens = TokenManager::new(
        wiring::token_config(&settings.auth),
        Arc::new(MemoryTokenStore::new()),
    );
    let subject = TokenSubject {
        user_id: args.user_id,
        dept_id: args.dept_id,
        data_scope: args.data_scope,
        username: args.username,
        authorities: args.authorities,
    };
    let pair = tokens.issue(&subject).await.context("Failed to issue token")?;
    println!("{}", serde_json::to_string_pretty(&pair)?);
    Ok(())
}
