//! Vogo Client - Main Entry Point
//!
//! Exit code 0 on clean shutdown (ctrl-c or peer hangup), 1 on error with a
//! single diagnostic line.

mod audio;
mod call;
mod commands;
mod config;
mod error;
mod peer;
mod rest;
mod signaling;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use commands::Cli;
use config::Config;

#[tokio::main]
async fn main() {
    // rustls needs a process-wide crypto provider before any DTLS handshake
    let _ =
        rustls::crypto::CryptoProvider::install_default(rustls::crypto::ring::default_provider());

    let cli = Cli::parse();

    let config_path = match cli.config.clone().map_or_else(Config::default_path, Ok) {
        Ok(path) => path,
        Err(e) => fail(&e),
    };
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => fail(&e),
    };

    let default_filter = if cli.debug || config.debug {
        "vogo=debug"
    } else {
        "vogo=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = commands::dispatch(cli.command, config, &config_path).await {
        fail(&e);
    }
}

fn fail(error: &error::ClientError) -> ! {
    eprintln!("vogo: {error}");
    std::process::exit(1);
}
