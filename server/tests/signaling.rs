//! Signaling Broker Integration Tests
//!
//! Drives real WebSocket sessions against a server on an ephemeral port and
//! checks the rendezvous protocol end to end: offer/answer relay, ordered
//! trickle-ICE forwarding, and the failure close codes.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use vogo_common::signal::close;
use vogo_common::{AnswerRequest, CallRequest, IceCandidate, SessionDescription};

use vogo_server::api::{create_router, AppState};
use vogo_server::config::Config;
use vogo_server::{auth, db};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const PASSWORD: &str = "hunter2";
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

struct TestServer {
    addr: SocketAddr,
    state: AppState,
}

impl TestServer {
    async fn spawn() -> Self {
        // a single shared connection keeps the in-memory database alive
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

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let app = create_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });

        Self { addr, state }
    }

    /// Insert a user directly, returning the stored name.
    async fn seed_user(&self, name: &str) -> String {
        let code = format!("code-{}", name.replace('#', "-"));
        db::add_invite_code(&self.state.db, &code).await.expect("code");
        let hash = auth::hash_password(PASSWORD).expect("hash");
        db::create_user(&self.state.db, name, &hash, &code)
            .await
            .expect("user")
            .name
    }

    async fn open(&self, endpoint: &str, username: &str) -> Socket {
        let mut request = format!("ws://{}{}", self.addr, endpoint)
            .into_client_request()
            .expect("request");
        let credentials = base64_basic(username, PASSWORD);
        request
            .headers_mut()
            .insert(AUTHORIZATION, credentials.parse().expect("header"));
        let (socket, _) = connect_async(request).await.expect("connect");
        socket
    }
}

fn base64_basic(user: &str, pass: &str) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    format!("Basic {}", STANDARD.encode(format!("{user}:{pass}")))
}

async fn send_json<T: Serialize>(socket: &mut Socket, value: &T) {
    let text = serde_json::to_string(value).expect("serialize");
    socket.send(Message::Text(text.into())).await.expect("send");
}

async fn recv_json<T: DeserializeOwned>(socket: &mut Socket) -> T {
    loop {
        let msg = tokio::time::timeout(RECV_TIMEOUT, socket.next())
            .await
            .expect("recv timed out")
            .expect("stream ended")
            .expect("read error");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).expect("deserialize"),
            Message::Close(frame) => panic!("unexpected close: {frame:?}"),
            _ => {}
        }
    }
}

/// Wait for a close frame and return its code.
async fn recv_close(socket: &mut Socket) -> u16 {
    loop {
        let msg = tokio::time::timeout(RECV_TIMEOUT, socket.next())
            .await
            .expect("close timed out");
        match msg {
            Some(Ok(Message::Close(Some(frame)))) => return frame.code.into(),
            Some(Ok(Message::Close(None))) | None => panic!("closed without a code"),
            Some(Ok(_)) => {}
            Some(Err(e)) => panic!("read error awaiting close: {e}"),
        }
    }
}

fn candidate(n: u32) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 UDP 2122252543 192.0.2.{n} 50000 typ host"),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

/// Poll until the registry is empty or the deadline passes.
async fn assert_registry_drains(state: &AppState) {
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    while !state.calls.is_empty() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "pending call was never removed"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn happy_path_relays_offer_answer_and_ordered_candidates() {
    let server = TestServer::spawn().await;
    let alice = server.seed_user("alice#ab12").await;
    let bob = server.seed_user("bob#cd34").await;

    let mut caller = server.open("/call", &alice).await;
    send_json(
        &mut caller,
        &CallRequest {
            recipient_name: bob.clone(),
            sd: SessionDescription::offer("sdp-alice"),
        },
    )
    .await;

    let mut recipient = server.open(&format!("/answer/{alice}"), &bob).await;

    // recipient gets the stored offer as its first message
    let offer: SessionDescription = recv_json(&mut recipient).await;
    assert_eq!(offer.sdp, "sdp-alice");

    send_json(
        &mut recipient,
        &AnswerRequest {
            caller_name: alice.clone(),
            sd: SessionDescription::answer("sdp-bob"),
        },
    )
    .await;

    // the answer reaches the caller before any candidate
    let answer: SessionDescription = recv_json(&mut caller).await;
    assert_eq!(answer.sdp, "sdp-bob");

    // caller trickles three candidates; recipient sees them in order
    for n in 1..=3 {
        send_json(&mut caller, &candidate(n)).await;
    }
    send_json(&mut caller, &IceCandidate::end_of_candidates()).await;
    for n in 1..=3 {
        let got: IceCandidate = recv_json(&mut recipient).await;
        assert_eq!(got, candidate(n));
    }
    let sentinel: IceCandidate = recv_json(&mut recipient).await;
    assert!(sentinel.is_end_of_candidates());

    // and the reverse direction
    send_json(&mut recipient, &candidate(7)).await;
    send_json(&mut recipient, &IceCandidate::end_of_candidates()).await;
    let got: IceCandidate = recv_json(&mut caller).await;
    assert_eq!(got, candidate(7));
    let sentinel: IceCandidate = recv_json(&mut caller).await;
    assert!(sentinel.is_end_of_candidates());

    assert_registry_drains(&server.state).await;
}

#[tokio::test]
async fn second_call_from_same_caller_conflicts() {
    let server = TestServer::spawn().await;
    let alice = server.seed_user("alice#ab12").await;
    let bob = server.seed_user("bob#cd34").await;

    let mut first = server.open("/call", &alice).await;
    send_json(
        &mut first,
        &CallRequest {
            recipient_name: bob.clone(),
            sd: SessionDescription::offer("sdp-a"),
        },
    )
    .await;

    // wait until the first call is registered before racing a second one
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    while server.state.calls.is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "call never registered");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let mut second = server.open("/call", &alice).await;
    send_json(
        &mut second,
        &CallRequest {
            recipient_name: bob,
            sd: SessionDescription::offer("sdp-b"),
        },
    )
    .await;

    assert_eq!(recv_close(&mut second).await, close::CONFLICT);

    // session A is unaffected: its entry is still registered
    assert_eq!(server.state.calls.len(), 1);
    drop(first);
    assert_registry_drains(&server.state).await;
}

#[tokio::test]
async fn unknown_recipient_is_bad_request() {
    let server = TestServer::spawn().await;
    let alice = server.seed_user("alice#ab12").await;

    let mut caller = server.open("/call", &alice).await;
    send_json(
        &mut caller,
        &CallRequest {
            recipient_name: "nobody#0000".into(),
            sd: SessionDescription::offer("sdp-a"),
        },
    )
    .await;

    assert_eq!(recv_close(&mut caller).await, close::BAD_REQUEST);
    assert!(server.state.calls.is_empty());
}

#[tokio::test]
async fn empty_offer_is_bad_request() {
    let server = TestServer::spawn().await;
    let alice = server.seed_user("alice#ab12").await;
    let bob = server.seed_user("bob#cd34").await;

    let mut caller = server.open("/call", &alice).await;
    send_json(
        &mut caller,
        &CallRequest {
            recipient_name: bob,
            sd: SessionDescription::offer(""),
        },
    )
    .await;

    assert_eq!(recv_close(&mut caller).await, close::BAD_REQUEST);
    assert!(server.state.calls.is_empty());
}

#[tokio::test]
async fn answer_without_pending_call_is_bad_request() {
    let server = TestServer::spawn().await;
    let alice = server.seed_user("alice#ab12").await;
    let bob = server.seed_user("bob#cd34").await;

    let mut recipient = server.open(&format!("/answer/{alice}"), &bob).await;
    assert_eq!(recv_close(&mut recipient).await, close::BAD_REQUEST);
}

#[tokio::test]
async fn only_the_intended_recipient_may_answer() {
    let server = TestServer::spawn().await;
    let alice = server.seed_user("alice#ab12").await;
    let bob = server.seed_user("bob#cd34").await;
    let carol = server.seed_user("carol#ef56").await;

    let mut caller = server.open("/call", &alice).await;
    send_json(
        &mut caller,
        &CallRequest {
            recipient_name: bob,
            sd: SessionDescription::offer("sdp-a"),
        },
    )
    .await;

    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    while server.state.calls.is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "call never registered");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let mut eavesdropper = server.open(&format!("/answer/{alice}"), &carol).await;
    assert_eq!(recv_close(&mut eavesdropper).await, close::BAD_REQUEST);
}

#[tokio::test]
async fn caller_disconnect_tears_down_the_rendezvous() {
    let server = TestServer::spawn().await;
    let alice = server.seed_user("alice#ab12").await;
    let bob = server.seed_user("bob#cd34").await;

    let mut caller = server.open("/call", &alice).await;
    send_json(
        &mut caller,
        &CallRequest {
            recipient_name: bob.clone(),
            sd: SessionDescription::offer("sdp-a"),
        },
    )
    .await;

    let mut recipient = server.open(&format!("/answer/{alice}"), &bob).await;
    let _offer: SessionDescription = recv_json(&mut recipient).await;
    send_json(
        &mut recipient,
        &AnswerRequest {
            caller_name: alice,
            sd: SessionDescription::answer("sdp-b"),
        },
    )
    .await;
    let _answer: SessionDescription = recv_json(&mut caller).await;

    // caller goes away mid-exchange
    drop(caller);

    // the entry is deleted and the recipient sees the caller's side end
    assert_registry_drains(&server.state).await;
    let sentinel: IceCandidate = recv_json(&mut recipient).await;
    assert!(sentinel.is_end_of_candidates());
}
