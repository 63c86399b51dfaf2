//! Basic Authentication
//!
//! Every route except `/register` and `/health` requires HTTP basic auth.
//! The [`AuthUser`] extractor parses the `Authorization` header of the
//! request (WebSocket upgrades included) and verifies the credential against
//! the users table.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::api::AppState;
use crate::db::{self, User};
use crate::error::ApiError;

/// The authenticated user, extracted from basic-auth headers.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let (username, password) = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(parse_basic)
            .ok_or(ApiError::Unauthorized)?;

        let user = db::get_user_with_password(&state.db, username.trim())
            .await?
            .ok_or(ApiError::Unauthorized)?;

        if !verify_password(&password, &user.password) {
            return Err(ApiError::Unauthorized);
        }

        Ok(Self(user.into_user()))
    }
}

/// Decode a `Basic <base64(user:pass)>` header value.
fn parse_basic(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// Hash a password with argon2id and a fresh salt.
pub fn hash_password(plaintext: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(plaintext.as_bytes(), &salt)?
        .to_string())
}

/// Verify a password against a stored argon2 hash.
#[must_use]
pub fn verify_password(plaintext: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(plaintext.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}
