//! Public API Types
//!
//! Request and response bodies for the REST surface. Nothing here carries
//! private data (password hashes, internal ids, timestamps).

use serde::{Deserialize, Serialize};

/// State of a friendship as seen by one of its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendStatus {
    Pending,
    Accepted,
}

/// A friend (or incoming friend request), tagged with its status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Friend {
    pub name: String,
    pub status: FriendStatus,
}

/// A named room of users. Capacity defaults to 6, the practical WebRTC limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub owner: String,
    pub name: String,
    pub description: String,
    pub capacity: i64,
    pub member_names: Vec<String>,
}

/// Response to `GET /status`: everything associated with the calling user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub friends: Vec<Friend>,
    pub channels: Vec<Channel>,
    /// Names of friends with a call waiting for this user right now.
    #[serde(default)]
    pub incoming_calls: Vec<String>,
}

/// Body of `POST /register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub password: String,
    pub invite_code: String,
}

/// Response to `POST /register`: the full username, suffix included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub username: String,
}

/// Body of `POST /friend`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddFriendRequest {
    pub name: String,
}

/// Body of `POST /channel`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChannelRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub capacity: Option<i64>,
}

/// Body of `POST /invite`: invite a friend into a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteRequest {
    pub name: String,
    pub channel: String,
}
