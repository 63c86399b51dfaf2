//! API Error Type
//!
//! Maps every failure the REST surface can hit onto an HTTP status and a
//! `{ "error": code, "message": … }` JSON body.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::db::DbError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("internal error")]
    Internal(String),
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Sqlx(e) => Self::Database(e),
            DbError::UserNotFound(_) | DbError::ChannelNotFound(_) => {
                Self::NotFound(err.to_string())
            }
            DbError::UsernameTaken
            | DbError::ChannelNameTaken
            | DbError::InviteCodeExists
            | DbError::AlreadyMember => Self::Conflict(err.to_string()),
            // a bad invite code reads as an authorization failure, not a
            // validation one; the code is the only thing gating registration
            DbError::InviteCodeUsed => Self::Unauthorized,
            DbError::SelfFriend
            | DbError::NotAMember
            | DbError::NotFriends
            | DbError::ChannelFull => Self::Validation(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            Self::Database(err) => {
                tracing::error!(error = %err, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "database error".to_string(),
                )
            }
            Self::Internal(err) => {
                tracing::error!(error = %err, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "internal error".to_string(),
                )
            }
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
            ),
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
        };

        let body = Json(json!({ "error": code, "message": message }));
        if status == StatusCode::UNAUTHORIZED {
            (
                status,
                [(header::WWW_AUTHENTICATE, "Basic realm=\"vogo\"")],
                body,
            )
                .into_response()
        } else {
            (status, body).into_response()
        }
    }
}
