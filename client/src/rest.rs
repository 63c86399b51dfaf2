//! REST Client
//!
//! CRUD calls against the vogo server with basic auth: registration, status,
//! friends, channels, invites.

use serde::Deserialize;
use vogo_common::{
    AddFriendRequest, CreateChannelRequest, Friend, InviteRequest, RegisterRequest,
    RegisterResponse, StatusResponse,
};

use crate::error::ClientError;
use crate::signaling::Credentials;

pub struct RestClient {
    http: reqwest::Client,
    credentials: Credentials,
}

/// Error body the server renders for failed requests.
#[derive(Deserialize)]
struct ErrorBody {
    #[allow(dead_code)]
    error: String,
    message: String,
}

impl RestClient {
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self {
            http: reqwest::Client::new(),
            credentials,
        }
    }

    /// Register a new user. The only unauthenticated request.
    pub async fn register(
        base_url: &str,
        request: &RegisterRequest,
    ) -> Result<RegisterResponse, ClientError> {
        let response = reqwest::Client::new()
            .post(url(base_url, "/register"))
            .json(request)
            .send()
            .await
            .map_err(ClientError::transport)?;
        parse(response).await
    }

    pub async fn status(&self) -> Result<StatusResponse, ClientError> {
        parse(self.get("/status").await?).await
    }

    pub async fn add_friend(&self, name: &str) -> Result<Friend, ClientError> {
        let body = AddFriendRequest {
            name: name.to_string(),
        };
        parse(self.post("/friend", &body).await?).await
    }

    pub async fn create_channel(
        &self,
        request: &CreateChannelRequest,
    ) -> Result<serde_json::Value, ClientError> {
        parse(self.post("/channel", request).await?).await
    }

    pub async fn invite(&self, name: &str, channel: &str) -> Result<serde_json::Value, ClientError> {
        let body = InviteRequest {
            name: name.to_string(),
            channel: channel.to_string(),
        };
        parse(self.post("/invite", &body).await?).await
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, ClientError> {
        self.http
            .get(url(&self.credentials.base_url, path))
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .send()
            .await
            .map_err(ClientError::transport)
    }

    async fn post<T: serde::Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response, ClientError> {
        self.http
            .post(url(&self.credentials.base_url, path))
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .json(body)
            .send()
            .await
            .map_err(ClientError::transport)
    }
}

fn url(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

/// Map a response onto the error taxonomy, or deserialize its body.
async fn parse<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        return response.json().await.map_err(ClientError::protocol);
    }

    let message = response
        .json::<ErrorBody>()
        .await
        .map(|body| body.message)
        .unwrap_or_else(|_| status.to_string());

    Err(match status.as_u16() {
        401 => ClientError::Auth,
        404 => ClientError::NotFound(message),
        409 => ClientError::Conflict(message),
        400 => ClientError::Validation(message),
        _ => ClientError::Transport(format!("server error: {message}")),
    })
}
