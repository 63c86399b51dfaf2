//! Registration, Status, and Friends

use axum::extract::State;
use axum::Json;
use tracing::info;
use vogo_common::{
    AddFriendRequest, Friend, RegisterRequest, RegisterResponse, StatusResponse,
};

use super::AppState;
use crate::auth::{self, AuthUser};
use crate::db;
use crate::error::ApiError;
use crate::util;

/// POST /register
///
/// Register a new user. Gated by a single-use invite code; the stored
/// username is lowercased and given a random `#xxxx` suffix, and the full
/// name is returned for the client to persist.
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ApiError> {
    db::validate_invite_code(&state.db, &body.invite_code).await?;
    validate_username(&body.name)?;
    validate_password(&body.password)?;

    let hash = auth::hash_password(&body.password)
        .map_err(|e| ApiError::Internal(format!("password hash: {e}")))?;

    let username = format!("{}{}", body.name.to_lowercase(), util::username_suffix());
    let user = db::create_user(&state.db, &username, &hash, &body.invite_code).await?;

    info!(username = %user.name, "user registered");
    Ok(Json(RegisterResponse {
        username: user.name,
    }))
}

/// GET /status
///
/// Friends (accepted plus incoming requests, tagged by status), channels,
/// and any calls currently waiting for the calling user.
pub async fn status(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<StatusResponse>, ApiError> {
    let friends = db::get_friends(&state.db, user.id, true).await?;
    let channels = db::get_channels(&state.db, user.id).await?;
    let incoming_calls = state.calls.incoming_for(user.id);
    Ok(Json(StatusResponse {
        friends,
        channels,
        incoming_calls,
    }))
}

/// POST /friend
///
/// Create or accept a friend request with another user.
pub async fn add_friend(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(body): Json<AddFriendRequest>,
) -> Result<Json<Friend>, ApiError> {
    if body.name.is_empty() {
        return Err(ApiError::Validation("no name specified".into()));
    }

    let friend = db::add_friend(&state.db, user.id, &body.name).await?;
    Ok(Json(friend))
}

const MAX_USERNAME_LEN: usize = 16;
const MAX_PASSWORD_LEN: usize = 30;

fn valid_username_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "@$!%*?&".contains(c)
}

fn validate_username(name: &str) -> Result<(), ApiError> {
    if name.is_empty() {
        return Err(ApiError::Validation("empty username".into()));
    }
    if name.len() > MAX_USERNAME_LEN {
        return Err(ApiError::Validation(
            "username too long, must be 16 characters or less".into(),
        ));
    }
    // '#' is reserved for the suffix separator
    if !name.chars().all(valid_username_char) {
        return Err(ApiError::Validation(
            "invalid character(s) in username; letters, numbers, and @$!%*?& only".into(),
        ));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.is_empty() {
        return Err(ApiError::Validation("empty password".into()));
    }
    if password.len() > MAX_PASSWORD_LEN {
        return Err(ApiError::Validation(
            "password too long, must be 30 characters or less".into(),
        ));
    }
    if !password
        .chars()
        .all(|c| valid_username_char(c) || c == '#')
    {
        return Err(ApiError::Validation(
            "invalid character(s) in password".into(),
        ));
    }
    Ok(())
}
