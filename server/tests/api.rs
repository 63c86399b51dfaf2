//! HTTP Integration Tests for the REST Surface
//!
//! Drives the router directly with `tower::ServiceExt::oneshot`: registration
//! (invite codes, username suffixing, validation), the friend flow, channels
//! and invites, and the status endpoint.
//!
//! Run with: `cargo test --test api`

use std::str::FromStr;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tower::ServiceExt;
use uuid::Uuid;
use vogo_common::SessionDescription;

use vogo_server::api::{create_router, AppState};
use vogo_server::config::Config;
use vogo_server::db;
use vogo_server::signal::registry::PendingCall;

const PASSWORD: &str = "hunter2";

struct TestApp {
    router: Router,
    state: AppState,
}

impl TestApp {
    async fn new() -> Self {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").expect("options");
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .expect("pool");
        sqlx::migrate!("./migrations").run(&pool).await.expect("migrations");

        let config = Config {
            bind_address: "127.0.0.1:0".into(),
            database_url: "sqlite::memory:".into(),
            signaling_timeout: Duration::from_secs(5),
            pending_call_ttl: Duration::from_secs(60),
            log_level: "warn".into(),
        };
        let state = AppState::new(pool, config);
        Self {
            router: create_router(state.clone()),
            state,
        }
    }

    async fn oneshot(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible service")
    }

    async fn post_json(
        &self,
        path: &str,
        auth: Option<&str>,
        body: serde_json::Value,
    ) -> Response<Body> {
        let mut request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(user) = auth {
            request = request.header(header::AUTHORIZATION, basic(user));
        }
        let request = request
            .body(Body::from(body.to_string()))
            .expect("request");
        self.oneshot(request).await
    }

    async fn get(&self, path: &str, auth: Option<&str>) -> Response<Body> {
        let mut request = Request::builder().method(Method::GET).uri(path);
        if let Some(user) = auth {
            request = request.header(header::AUTHORIZATION, basic(user));
        }
        let request = request.body(Body::empty()).expect("request");
        self.oneshot(request).await
    }

    /// Register a user through the endpoint, returning the suffixed name.
    async fn register(&self, name: &str) -> String {
        let code = format!("code-{name}");
        db::add_invite_code(&self.state.db, &code).await.expect("code");
        let response = self
            .post_json(
                "/register",
                None,
                serde_json::json!({
                    "name": name,
                    "password": PASSWORD,
                    "invite_code": code,
                }),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_to_json(response).await;
        json["username"].as_str().expect("username").to_string()
    }
}

fn basic(username: &str) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    format!("Basic {}", STANDARD.encode(format!("{username}:{PASSWORD}")))
}

async fn body_to_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

// ============================================================================
// Registration
// ============================================================================

#[tokio::test]
async fn register_assigns_a_suffixed_username() {
    let app = TestApp::new().await;
    let username = app.register("Alice").await;

    let (base, suffix) = username.split_once('#').expect("suffix");
    assert_eq!(base, "alice", "name is lowercased");
    assert_eq!(suffix.len(), 4);

    let user = db::get_user_by_name(&app.state.db, &username)
        .await
        .expect("query")
        .expect("stored");
    assert_eq!(user.name, username);
}

#[tokio::test]
async fn register_rejects_unknown_invite_code() {
    let app = TestApp::new().await;
    let response = app
        .post_json(
            "/register",
            None,
            serde_json::json!({
                "name": "alice",
                "password": PASSWORD,
                "invite_code": "nope42",
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn register_validates_credentials() {
    let app = TestApp::new().await;
    db::add_invite_code(&app.state.db, "abc123").await.expect("code");

    for bad_name in ["", "way-too-long-username", "with space", "has#hash"] {
        let response = app
            .post_json(
                "/register",
                None,
                serde_json::json!({
                    "name": bad_name,
                    "password": PASSWORD,
                    "invite_code": "abc123",
                }),
            )
            .await;
        assert_eq!(
            response.status(),
            StatusCode::BAD_REQUEST,
            "name {bad_name:?} should be rejected"
        );
    }

    let response = app
        .post_json(
            "/register",
            None,
            serde_json::json!({
                "name": "alice",
                "password": "",
                "invite_code": "abc123",
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn invite_code_works_exactly_once() {
    let app = TestApp::new().await;
    db::add_invite_code(&app.state.db, "once11").await.expect("code");

    let body = |name: &str| {
        serde_json::json!({
            "name": name,
            "password": PASSWORD,
            "invite_code": "once11",
        })
    };
    let first = app.post_json("/register", None, body("alice")).await;
    assert_eq!(first.status(), StatusCode::OK);

    let second = app.post_json("/register", None, body("bob")).await;
    assert_eq!(second.status(), StatusCode::UNAUTHORIZED);
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn status_requires_basic_auth() {
    let app = TestApp::new().await;

    let response = app.get("/status", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(
        response.headers().contains_key(header::WWW_AUTHENTICATE),
        "401 must carry a WWW-Authenticate challenge"
    );

    // wrong password
    let alice = app.register("alice").await;
    let request = Request::builder()
        .method(Method::GET)
        .uri("/status")
        .header(header::AUTHORIZATION, {
            use base64::engine::general_purpose::STANDARD;
            use base64::Engine;
            format!("Basic {}", STANDARD.encode(format!("{alice}:wrong")))
        })
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// ============================================================================
// Friends
// ============================================================================

#[tokio::test]
async fn friend_request_and_accept_flow() {
    let app = TestApp::new().await;
    let alice = app.register("alice").await;
    let bob = app.register("bob").await;

    // alice sends a request
    let response = app
        .post_json("/friend", Some(&alice), serde_json::json!({ "name": bob }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response).await;
    assert_eq!(json["status"], "pending");

    // bob sees the incoming request; alice does not see her own
    let json = body_to_json(app.get("/status", Some(&bob)).await).await;
    assert_eq!(json["friends"][0]["name"], alice);
    assert_eq!(json["friends"][0]["status"], "pending");
    let json = body_to_json(app.get("/status", Some(&alice)).await).await;
    assert_eq!(json["friends"].as_array().expect("array").len(), 0);

    // bob adds back, which accepts
    let response = app
        .post_json("/friend", Some(&bob), serde_json::json!({ "name": alice }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response).await;
    assert_eq!(json["status"], "accepted");

    let json = body_to_json(app.get("/status", Some(&alice)).await).await;
    assert_eq!(json["friends"][0]["name"], bob);
    assert_eq!(json["friends"][0]["status"], "accepted");
}

#[tokio::test]
async fn friend_endpoint_rejects_unknown_and_self() {
    let app = TestApp::new().await;
    let alice = app.register("alice").await;

    let response = app
        .post_json(
            "/friend",
            Some(&alice),
            serde_json::json!({ "name": "ghost#0000" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .post_json("/friend", Some(&alice), serde_json::json!({ "name": alice }))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ============================================================================
// Channels
// ============================================================================

#[tokio::test]
async fn channel_create_and_invite_flow() {
    let app = TestApp::new().await;
    let alice = app.register("alice").await;
    let bob = app.register("bob").await;
    let carol = app.register("carol").await;

    // alice and bob are friends
    app.post_json("/friend", Some(&alice), serde_json::json!({ "name": bob }))
        .await;
    app.post_json("/friend", Some(&bob), serde_json::json!({ "name": alice }))
        .await;

    let response = app
        .post_json(
            "/channel",
            Some(&alice),
            serde_json::json!({ "name": "games", "description": "late night", "capacity": 4 }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    // capacity outside 2..=6 is rejected
    let response = app
        .post_json(
            "/channel",
            Some(&alice),
            serde_json::json!({ "name": "too-big", "capacity": 7 }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // inviting a non-friend fails, a friend succeeds
    let response = app
        .post_json(
            "/invite",
            Some(&alice),
            serde_json::json!({ "name": carol, "channel": "games" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_json(
            "/invite",
            Some(&alice),
            serde_json::json!({ "name": bob, "channel": "games" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    // bob now sees the channel with both members
    let json = body_to_json(app.get("/status", Some(&bob)).await).await;
    assert_eq!(json["channels"][0]["name"], "games");
    assert_eq!(json["channels"][0]["capacity"], 4);
    let members = json["channels"][0]["member_names"]
        .as_array()
        .expect("members");
    assert_eq!(members.len(), 2);
}

// ============================================================================
// Status + pending calls
// ============================================================================

#[tokio::test]
async fn status_lists_incoming_calls() {
    let app = TestApp::new().await;
    let alice = app.register("alice").await;
    let bob = app.register("bob").await;

    let bob_user = db::get_user_by_name(&app.state.db, &bob)
        .await
        .expect("query")
        .expect("bob");

    let (call, _caller_ends) = PendingCall::new(
        alice.clone(),
        bob_user.id,
        SessionDescription::offer("sdp-a"),
    );
    app.state.calls.insert(Uuid::new_v4(), call).expect("insert");

    let json = body_to_json(app.get("/status", Some(&bob)).await).await;
    assert_eq!(json["incoming_calls"][0], alice);

    let json = body_to_json(app.get("/status", Some(&alice)).await).await;
    assert_eq!(json["incoming_calls"].as_array().expect("array").len(), 0);
}

#[tokio::test]
async fn health_reports_ok() {
    let app = TestApp::new().await;
    let response = app.get("/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["database"], true);
}
