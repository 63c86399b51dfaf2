//! Server Configuration
//!
//! Loads configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address (env: `VOGO_BIND_ADDRESS`, default `0.0.0.0:8080`)
    pub bind_address: String,

    /// `SQLite` connection URL (env: `VOGO_DATABASE_URL`, default: a file
    /// under the platform data directory, created on first open)
    pub database_url: String,

    /// Hard ceiling on the lifetime of one signaling session
    /// (env: `VOGO_SIGNALING_TIMEOUT_SECS`, default 30)
    pub signaling_timeout: Duration,

    /// Age past which the sweeper evicts a pending call
    /// (env: `VOGO_PENDING_CALL_TTL_SECS`, default 60)
    pub pending_call_ttl: Duration,

    /// Log level filter (env: `RUST_LOG`, default `vogo_server=info`)
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let database_url = match env::var("VOGO_DATABASE_URL") {
            Ok(url) => url,
            Err(_) => default_database_url()?,
        };

        Ok(Self {
            bind_address: env::var("VOGO_BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            database_url,
            signaling_timeout: Duration::from_secs(
                env::var("VOGO_SIGNALING_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            ),
            pending_call_ttl: Duration::from_secs(
                env::var("VOGO_PENDING_CALL_TTL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60),
            ),
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "vogo_server=info".into()),
        })
    }
}

/// Default database location: `<data_dir>/vogo-server/vogo-server.sqlite`.
fn default_database_url() -> Result<String> {
    let dir: PathBuf = dirs::data_dir()
        .context("no platform data directory; set VOGO_DATABASE_URL")?
        .join("vogo-server");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("creating data directory {}", dir.display()))?;
    let path = dir.join("vogo-server.sqlite");
    Ok(format!("sqlite://{}", path.display()))
}
