//! Database Models

use chrono::NaiveDateTime;
use sqlx::FromRow;
use uuid::Uuid;

/// A user row, without the password column.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    #[sqlx(rename = "username")]
    pub name: String,
    pub created_at: NaiveDateTime,
}

/// The full user row, including the argon2 password hash.
#[derive(Debug, Clone, FromRow)]
pub struct UserWithPassword {
    pub id: Uuid,
    #[sqlx(rename = "username")]
    pub name: String,
    pub password: String,
    pub created_at: NaiveDateTime,
}

impl UserWithPassword {
    /// Strip the credential.
    #[must_use]
    pub fn into_user(self) -> User {
        User {
            id: self.id,
            name: self.name,
            created_at: self.created_at,
        }
    }
}

/// One friend edge as seen by a particular user.
#[derive(Debug, Clone, FromRow)]
pub struct FriendRow {
    pub name: String,
    pub status: String,
}

/// A channel with its members, aggregated for the status endpoint.
#[derive(Debug, Clone, FromRow)]
pub struct ChannelRow {
    pub owner: String,
    pub name: String,
    pub description: String,
    pub capacity: i64,
    /// Comma-joined member usernames (`GROUP_CONCAT`).
    pub member_names: String,
}
