//! Channel Management

use axum::extract::State;
use axum::Json;
use serde_json::json;
use tracing::info;
use vogo_common::{CreateChannelRequest, InviteRequest};

use super::AppState;
use crate::auth::AuthUser;
use crate::db;
use crate::error::ApiError;

const DEFAULT_CAPACITY: i64 = 6;
const MAX_CAPACITY: i64 = 6;

/// POST /channel
///
/// Create a named channel owned by the calling user.
pub async fn create_channel(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(body): Json<CreateChannelRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.name.is_empty() || body.name.len() > 32 {
        return Err(ApiError::Validation(
            "channel name must be 1-32 characters".into(),
        ));
    }
    let capacity = body.capacity.unwrap_or(DEFAULT_CAPACITY);
    if !(2..=MAX_CAPACITY).contains(&capacity) {
        return Err(ApiError::Validation(format!(
            "capacity must be between 2 and {MAX_CAPACITY}"
        )));
    }

    db::create_channel(&state.db, user.id, &body.name, &body.description, capacity).await?;

    info!(channel = %body.name, owner = %user.name, "channel created");
    Ok(Json(json!({ "name": body.name })))
}

/// POST /invite
///
/// Invite a friend into a channel the calling user is a member of.
pub async fn invite(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(body): Json<InviteRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.name.is_empty() || body.channel.is_empty() {
        return Err(ApiError::Validation("name and channel are required".into()));
    }

    db::invite_to_channel(&state.db, user.id, &body.name, &body.channel).await?;

    info!(channel = %body.channel, invitee = %body.name, "channel invite");
    Ok(Json(json!({ "name": body.name, "channel": body.channel })))
}
