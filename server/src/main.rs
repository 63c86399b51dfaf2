//! Vogo Server - Main Entry Point

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use vogo_server::{api, config, db, signal};

#[derive(Parser)]
#[command(name = "vogo-server", about = "Signaling server for vogo P2P voice chat")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the server
    Run,
    /// Create a registration invite code
    Invite {
        /// Use this code instead of generating one
        #[arg(long)]
        code: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = config::Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.log_level))
        .init();

    match Cli::parse().command {
        Command::Run => run(config).await,
        Command::Invite { code } => invite(config, code).await,
    }
}

async fn run(config: config::Config) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "starting vogo server");

    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;

    let state = api::AppState::new(pool.clone(), config.clone());

    // evict pending calls whose sessions never cleaned up
    let sweeper = signal::spawn_sweeper(state.calls.clone(), config.pending_call_ttl);

    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!(address = %config.bind_address, "server listening");

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install ctrl-c handler");
        }
        info!("received shutdown signal");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    sweeper.abort();
    let _ = sweeper.await;

    pool.close().await;
    info!("server shutdown complete");
    Ok(())
}

async fn invite(config: config::Config, code: Option<String>) -> Result<()> {
    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;

    let code = code.unwrap_or_else(vogo_server::util::invite_code);
    db::add_invite_code(&pool, &code).await?;

    println!("{code}");
    Ok(())
}
