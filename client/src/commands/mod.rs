//! Command Surface
//!
//! Clap subcommands and their handlers. Each command validates its input,
//! talks to the server through [`crate::rest`] or runs a call through
//! [`crate::call`], and prints a short human-readable result.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use vogo_common::{CreateChannelRequest, FriendStatus, RegisterRequest};

use crate::call;
use crate::config::Config;
use crate::error::ClientError;
use crate::rest::RestClient;

/// Bare names are capped at 16 characters; full usernames carry a `#xxxx`
/// suffix on top.
const MAX_NAME_LEN: usize = 16;
const MAX_FULL_NAME_LEN: usize = MAX_NAME_LEN + 5;

#[derive(Parser)]
#[command(name = "vogo", version, about = "P2P voice chat over WebRTC")]
pub struct Cli {
    /// Path to the config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Register this client with a new user
    Register {
        /// Invite code for the vogo server
        #[arg(long)]
        code: String,
    },
    /// Show friends, pending requests, and channels
    Status,
    /// Add a friend given their username
    AddFriend {
        /// The friend's full username
        name: String,
    },
    /// Create a channel
    CreateChannel {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Member limit (2-6)
        #[arg(long)]
        capacity: Option<i64>,
    },
    /// Invite a friend into a channel
    Invite {
        /// The friend's full username
        user: String,
        /// The channel name
        channel: String,
    },
    /// Call a friend
    Call {
        /// The recipient's full username
        recipient: String,
    },
    /// Answer a call from a friend
    Answer {
        /// The caller's full username
        caller: String,
    },
}

pub async fn dispatch(
    command: Command,
    mut config: Config,
    config_path: &Path,
) -> Result<(), ClientError> {
    match command {
        Command::Register { code } => register(&mut config, config_path, &code).await,
        Command::Status => status(&config).await,
        Command::AddFriend { name } => add_friend(&config, &name).await,
        Command::CreateChannel {
            name,
            description,
            capacity,
        } => create_channel(&config, name, description, capacity).await,
        Command::Invite { user, channel } => invite(&config, &user, &channel).await,
        Command::Call { recipient } => run_call(&config, &recipient, true).await,
        Command::Answer { caller } => run_call(&config, &caller, false).await,
    }
}

async fn register(config: &mut Config, config_path: &Path, code: &str) -> Result<(), ClientError> {
    let name = config.user.name.clone();
    if name.contains('#') {
        return Err(ClientError::Validation(format!(
            "already registered as {name}; clear user.name in {} to register again",
            config_path.display()
        )));
    }
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(ClientError::Validation(format!(
            "set user.name (1-{MAX_NAME_LEN} characters) in {}",
            config_path.display()
        )));
    }
    if config.user.password.is_empty() {
        return Err(ClientError::Validation(format!(
            "set user.password in {}",
            config_path.display()
        )));
    }
    if config.servers.vogo.is_empty() {
        return Err(ClientError::Config(
            "no vogo server configured; set servers.vogo in the config file".into(),
        ));
    }

    let response = RestClient::register(
        &config.servers.vogo,
        &RegisterRequest {
            name,
            password: config.user.password.clone(),
            invite_code: code.to_string(),
        },
    )
    .await?;

    config.user.name = response.username.clone();
    config.store(config_path)?;
    println!("registered as {}", response.username);
    Ok(())
}

async fn status(config: &Config) -> Result<(), ClientError> {
    let client = RestClient::new(config.credentials()?);
    let status = client.status().await?;

    if status.friends.is_empty() && status.channels.is_empty() && status.incoming_calls.is_empty()
    {
        println!("no friends or channels yet");
        return Ok(());
    }

    for caller in &status.incoming_calls {
        println!("ringing   {caller} is calling (vogo answer {caller})");
    }
    for friend in &status.friends {
        match friend.status {
            FriendStatus::Accepted => println!("friend    {}", friend.name),
            FriendStatus::Pending => println!("request   {} (pending)", friend.name),
        }
    }
    for channel in &status.channels {
        println!(
            "channel   {} ({}/{} members, owner {})",
            channel.name,
            channel.member_names.len(),
            channel.capacity,
            channel.owner,
        );
    }
    Ok(())
}

async fn add_friend(config: &Config, name: &str) -> Result<(), ClientError> {
    validate_name(name, "friend name")?;
    let client = RestClient::new(config.credentials()?);
    let friend = client.add_friend(name).await?;
    println!("added friend: {}", friend.name);
    Ok(())
}

async fn create_channel(
    config: &Config,
    name: String,
    description: String,
    capacity: Option<i64>,
) -> Result<(), ClientError> {
    if name.is_empty() {
        return Err(ClientError::Validation("channel name is required".into()));
    }
    let client = RestClient::new(config.credentials()?);
    client
        .create_channel(&CreateChannelRequest {
            name: name.clone(),
            description,
            capacity,
        })
        .await?;
    println!("created channel: {name}");
    Ok(())
}

async fn invite(config: &Config, user: &str, channel: &str) -> Result<(), ClientError> {
    validate_name(user, "username")?;
    let client = RestClient::new(config.credentials()?);
    client.invite(user, channel).await?;
    println!("invited {user} to {channel}");
    Ok(())
}

/// Run a call in either role until ctrl-c, peer hangup, or failure.
async fn run_call(config: &Config, other: &str, calling: bool) -> Result<(), ClientError> {
    validate_name(other, if calling { "recipient" } else { "caller" })?;
    let credentials = config.credentials()?;

    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, hanging up");
                token.cancel();
            }
        });
    }

    let result = if calling {
        println!("calling {other}...");
        call::call_friend(&token, credentials, &config.servers.stun, other).await
    } else {
        println!("answering {other}...");
        call::answer_call(&token, credentials, &config.servers.stun, other).await
    };

    match result {
        Ok(()) | Err(ClientError::Cancelled) => {
            println!("call ended");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn validate_name(name: &str, what: &str) -> Result<(), ClientError> {
    if name.is_empty() {
        return Err(ClientError::Validation(format!("{what} is required")));
    }
    if name.len() > MAX_FULL_NAME_LEN {
        return Err(ClientError::Validation(format!("{what} too long")));
    }
    Ok(())
}
