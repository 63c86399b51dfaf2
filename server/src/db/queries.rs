//! Query Layer
//!
//! SQL queries and the logic that cannot be decoupled from them. Friendship
//! rows are keyed by the canonical `(least, greatest)` ordering of the two
//! user ids, computed here before binding, so the relation is symmetric.

use sqlx::SqlitePool;
use uuid::Uuid;
use vogo_common::{Channel, Friend, FriendStatus};

use super::models::{ChannelRow, FriendRow, User, UserWithPassword};

/// Domain failures surfaced by the query layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("username already taken")]
    UsernameTaken,

    #[error("cannot add yourself as a friend")]
    SelfFriend,

    #[error("invite code not found or already used")]
    InviteCodeUsed,

    #[error("invite code already exists")]
    InviteCodeExists,

    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    #[error("channel name already taken")]
    ChannelNameTaken,

    #[error("only channel members can invite")]
    NotAMember,

    #[error("you can only invite friends")]
    NotFriends,

    #[error("channel is at capacity")]
    ChannelFull,

    #[error("user is already a channel member")]
    AlreadyMember,
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

/// Order a pair of user ids canonically: `(least, greatest)`.
fn canonical_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Insert a user and claim their invite code, in one transaction.
///
/// The username must already carry its collision suffix. Claiming a code that
/// another user registered with rolls the whole transaction back.
pub async fn create_user(
    pool: &SqlitePool,
    username: &str,
    password_hash: &str,
    invite_code: &str,
) -> Result<User, DbError> {
    let mut tx = pool.begin().await?;

    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (id, username, password) VALUES (?, ?, ?)
         RETURNING id, username, created_at",
    )
    .bind(Uuid::new_v4())
    .bind(username)
    .bind(password_hash)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            DbError::UsernameTaken
        } else {
            e.into()
        }
    })?;

    let claimed = sqlx::query(
        "UPDATE invite_codes SET registered_user_id = ?
         WHERE code = ? AND registered_user_id IS NULL",
    )
    .bind(user.id)
    .bind(invite_code)
    .execute(&mut *tx)
    .await?;
    if claimed.rows_affected() == 0 {
        return Err(DbError::InviteCodeUsed);
    }

    tx.commit().await?;
    Ok(user)
}

/// Look up a user by their full username (suffix included).
pub async fn get_user_by_name(pool: &SqlitePool, name: &str) -> sqlx::Result<Option<User>> {
    sqlx::query_as::<_, User>("SELECT id, username, created_at FROM users WHERE username = ?")
        .bind(name.to_lowercase())
        .fetch_optional(pool)
        .await
}

/// Look up a user with their password hash, for authentication.
pub async fn get_user_with_password(
    pool: &SqlitePool,
    name: &str,
) -> sqlx::Result<Option<UserWithPassword>> {
    sqlx::query_as::<_, UserWithPassword>(
        "SELECT id, username, password, created_at FROM users WHERE username = ?",
    )
    .bind(name.to_lowercase())
    .fetch_optional(pool)
    .await
}

/// Friends of a user, tagged by status.
///
/// With `include_pending`, incoming friend requests (pending rows added by the
/// other side) are returned as well; requests this user sent are not.
pub async fn get_friends(
    pool: &SqlitePool,
    user_id: Uuid,
    include_pending: bool,
) -> sqlx::Result<Vec<Friend>> {
    let filter = if include_pending {
        "(f.status = 'accepted' OR (f.status = 'pending' AND f.added_by != ?1))"
    } else {
        "f.status = 'accepted'"
    };
    let query = format!(
        "SELECT u.username AS name, f.status AS status
         FROM friendships f
         JOIN users u ON u.id = CASE WHEN f.user_one = ?1 THEN f.user_two ELSE f.user_one END
         WHERE (f.user_one = ?1 OR f.user_two = ?1) AND {filter}
         ORDER BY u.username"
    );

    let rows = sqlx::query_as::<_, FriendRow>(&query)
        .bind(user_id)
        .fetch_all(pool)
        .await?;

    Ok(rows
        .into_iter()
        .map(|r| Friend {
            name: r.name,
            status: if r.status == "accepted" {
                FriendStatus::Accepted
            } else {
                FriendStatus::Pending
            },
        })
        .collect())
}

/// Create or accept a friendship with the named user.
///
/// A fresh pair inserts a pending request; adding someone whose request is
/// already pending promotes the row to accepted. Returns the friend tagged
/// with the resulting status.
pub async fn add_friend(
    pool: &SqlitePool,
    user_id: Uuid,
    friend_name: &str,
) -> Result<Friend, DbError> {
    let friend = get_user_by_name(pool, friend_name)
        .await?
        .ok_or_else(|| DbError::UserNotFound(friend_name.to_string()))?;
    if friend.id == user_id {
        return Err(DbError::SelfFriend);
    }

    let (one, two) = canonical_pair(user_id, friend.id);
    sqlx::query(
        "INSERT INTO friendships (user_one, user_two, status, added_by)
         VALUES (?1, ?2, 'pending', ?3)
         ON CONFLICT (user_one, user_two)
         DO UPDATE SET status = 'accepted'
         WHERE friendships.status = 'pending' AND friendships.added_by != ?3",
    )
    .bind(one)
    .bind(two)
    .bind(user_id)
    .execute(pool)
    .await?;

    let status: String =
        sqlx::query_scalar("SELECT status FROM friendships WHERE user_one = ? AND user_two = ?")
            .bind(one)
            .bind(two)
            .fetch_one(pool)
            .await?;

    Ok(Friend {
        name: friend.name,
        status: if status == "accepted" {
            FriendStatus::Accepted
        } else {
            FriendStatus::Pending
        },
    })
}

/// Whether the two users are accepted friends with no block in place.
pub async fn are_friends(pool: &SqlitePool, a: Uuid, b: Uuid) -> sqlx::Result<bool> {
    let (one, two) = canonical_pair(a, b);
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(
            SELECT 1 FROM friendships
            WHERE user_one = ? AND user_two = ?
              AND status = 'accepted'
              AND whos_blocked IS NULL
         )",
    )
    .bind(one)
    .bind(two)
    .fetch_one(pool)
    .await
}

/// Channels the user is a member of, with member names aggregated.
pub async fn get_channels(pool: &SqlitePool, user_id: Uuid) -> sqlx::Result<Vec<Channel>> {
    let rows = sqlx::query_as::<_, ChannelRow>(
        "SELECT ou.username AS owner, c.name AS name, c.description AS description,
                c.capacity AS capacity, GROUP_CONCAT(mu.username) AS member_names
         FROM channels c
         JOIN users ou ON ou.id = c.owner_id
         JOIN channel_members me ON me.channel_id = c.id AND me.user_id = ?
         JOIN channel_members m ON m.channel_id = c.id
         JOIN users mu ON mu.id = m.user_id
         GROUP BY c.id
         ORDER BY c.name",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| Channel {
            owner: r.owner,
            name: r.name,
            description: r.description,
            capacity: r.capacity,
            member_names: r.member_names.split(',').map(str::to_string).collect(),
        })
        .collect())
}

/// Create a channel owned by `owner_id`, who becomes its first member.
pub async fn create_channel(
    pool: &SqlitePool,
    owner_id: Uuid,
    name: &str,
    description: &str,
    capacity: i64,
) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;

    let channel_id = Uuid::new_v4();
    sqlx::query("INSERT INTO channels (id, owner_id, name, description, capacity) VALUES (?, ?, ?, ?, ?)")
        .bind(channel_id)
        .bind(owner_id)
        .bind(name)
        .bind(description)
        .bind(capacity)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                DbError::ChannelNameTaken
            } else {
                e.into()
            }
        })?;

    sqlx::query("INSERT INTO channel_members (channel_id, user_id) VALUES (?, ?)")
        .bind(channel_id)
        .bind(owner_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Invite a friend into a channel the inviter is a member of.
pub async fn invite_to_channel(
    pool: &SqlitePool,
    inviter_id: Uuid,
    invitee_name: &str,
    channel_name: &str,
) -> Result<(), DbError> {
    let channel: (Uuid, i64) =
        sqlx::query_as("SELECT id, capacity FROM channels WHERE name = ?")
            .bind(channel_name)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| DbError::ChannelNotFound(channel_name.to_string()))?;
    let (channel_id, capacity) = channel;

    let inviter_is_member = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM channel_members WHERE channel_id = ? AND user_id = ?)",
    )
    .bind(channel_id)
    .bind(inviter_id)
    .fetch_one(pool)
    .await?;
    if !inviter_is_member {
        return Err(DbError::NotAMember);
    }

    let invitee = get_user_by_name(pool, invitee_name)
        .await?
        .ok_or_else(|| DbError::UserNotFound(invitee_name.to_string()))?;

    if !are_friends(pool, inviter_id, invitee.id).await? {
        return Err(DbError::NotFriends);
    }

    let members = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM channel_members WHERE channel_id = ?",
    )
    .bind(channel_id)
    .fetch_one(pool)
    .await?;
    if members >= capacity {
        return Err(DbError::ChannelFull);
    }

    let inserted =
        sqlx::query("INSERT OR IGNORE INTO channel_members (channel_id, user_id) VALUES (?, ?)")
            .bind(channel_id)
            .bind(invitee.id)
            .execute(pool)
            .await?;
    if inserted.rows_affected() == 0 {
        return Err(DbError::AlreadyMember);
    }

    Ok(())
}

/// Register a new invite code.
pub async fn add_invite_code(pool: &SqlitePool, code: &str) -> Result<(), DbError> {
    let inserted = sqlx::query("INSERT OR IGNORE INTO invite_codes (id, code) VALUES (?, ?)")
        .bind(Uuid::new_v4())
        .bind(code)
        .execute(pool)
        .await?;
    if inserted.rows_affected() == 0 {
        return Err(DbError::InviteCodeExists);
    }
    Ok(())
}

/// Check that an invite code exists and is unclaimed.
pub async fn validate_invite_code(pool: &SqlitePool, code: &str) -> Result<(), DbError> {
    let registered: Option<Option<Uuid>> =
        sqlx::query_scalar("SELECT registered_user_id FROM invite_codes WHERE code = ? LIMIT 1")
            .bind(code)
            .fetch_optional(pool)
            .await?;

    match registered {
        None | Some(Some(_)) => Err(DbError::InviteCodeUsed),
        Some(None) => Ok(()),
    }
}
