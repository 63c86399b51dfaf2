//! Client Configuration
//!
//! A TOML file under the user config directory, created with defaults on
//! first run. `register` writes the server-assigned username back into it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ClientError;
use crate::signaling::Credentials;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub debug: bool,
    pub servers: Servers,
    pub user: User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Servers {
    /// Vogo server origin, e.g. `http://voice.example.com:8080`
    pub vogo: String,
    /// STUN server for ICE
    pub stun: String,
}

impl Default for Servers {
    fn default() -> Self {
        Self {
            vogo: String::new(),
            stun: "stun:stun.l.google.com:19302".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    /// Full username with suffix, assigned at registration
    pub name: String,
    pub password: String,
}

impl Config {
    /// Default config file location: `<config_dir>/vogo/vogo.toml`.
    pub fn default_path() -> Result<PathBuf, ClientError> {
        let dir = dirs::config_dir()
            .ok_or_else(|| ClientError::Config("no platform config directory".into()))?
            .join("vogo");
        std::fs::create_dir_all(&dir)
            .map_err(|e| ClientError::Config(format!("creating {}: {e}", dir.display())))?;
        Ok(dir.join("vogo.toml"))
    }

    /// Load the config file, writing a default one if it does not exist yet.
    pub fn load(path: &Path) -> Result<Self, ClientError> {
        if !path.exists() {
            let config = Self::default();
            config.store(path)?;
            tracing::info!(path = %path.display(), "wrote default config file");
            return Ok(config);
        }

        let text = std::fs::read_to_string(path)
            .map_err(|e| ClientError::Config(format!("reading {}: {e}", path.display())))?;
        toml::from_str(&text).map_err(|e| ClientError::Config(format!("parsing config: {e}")))
    }

    pub fn store(&self, path: &Path) -> Result<(), ClientError> {
        let text = toml::to_string_pretty(self)
            .map_err(|e| ClientError::Config(format!("serializing config: {e}")))?;
        std::fs::write(path, text)
            .map_err(|e| ClientError::Config(format!("writing {}: {e}", path.display())))
    }

    /// Credentials for server requests. Fails if registration has not
    /// populated the user section yet.
    pub fn credentials(&self) -> Result<Credentials, ClientError> {
        if self.servers.vogo.is_empty() {
            return Err(ClientError::Config(
                "no vogo server configured; set servers.vogo in the config file".into(),
            ));
        }
        if self.user.name.is_empty() || self.user.password.is_empty() {
            return Err(ClientError::Config(
                "missing credentials; run `vogo register` first".into(),
            ));
        }
        Ok(Credentials {
            base_url: self.servers.vogo.clone(),
            username: self.user.name.clone(),
            password: self.user.password.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.servers.stun, "stun:stun.l.google.com:19302");
        assert!(!back.debug);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [servers]
            vogo = "http://localhost:8080"

            [user]
            name = "alice#ab12"
            password = "hunter2"
            "#,
        )
        .unwrap();
        assert_eq!(config.servers.stun, "stun:stun.l.google.com:19302");

        let creds = config.credentials().unwrap();
        assert_eq!(creds.username, "alice#ab12");
    }

    #[test]
    fn credentials_require_registration() {
        let mut config = Config::default();
        assert!(matches!(
            config.credentials(),
            Err(ClientError::Config(_))
        ));

        config.servers.vogo = "http://localhost:8080".into();
        assert!(matches!(
            config.credentials(),
            Err(ClientError::Config(_))
        ));
    }
}
