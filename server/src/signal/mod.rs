//! Signaling Broker
//!
//! Pairs a caller's `/call` WebSocket session with the recipient's
//! `/answer/{name}` session through the in-memory [`registry`], forwarding the
//! offer, the answer, and trickled ICE candidates in both directions.
//!
//! Failures terminate the session with one of the close codes from
//! [`vogo_common::signal::close`] and remove the pending-call entry; clients
//! retry by re-invoking the whole call.

pub mod registry;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use vogo_common::signal::close;
use vogo_common::{AnswerRequest, CallRequest, IceCandidate};

use crate::api::AppState;
use crate::auth::AuthUser;
use crate::db::{self, User};
use registry::{CallerEnds, PendingCall, PendingCalls, RegistryGuard};

/// Why a signaling session ended early.
#[derive(Debug, thiserror::Error)]
enum SessionError {
    #[error("bad request: {0}")]
    BadRequest(&'static str),

    #[error("a pending call already exists for this caller")]
    Conflict,

    #[error("transport: {0}")]
    Transport(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl SessionError {
    fn close_code(&self) -> u16 {
        match self {
            Self::BadRequest(_) => close::BAD_REQUEST,
            Self::Conflict => close::CONFLICT,
            Self::Transport(_) | Self::Internal(_) => close::INTERNAL,
        }
    }
}

/// `GET /call` — the caller's signaling session.
pub async fn call_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
) -> Response {
    ws.on_upgrade(move |socket| call_session(socket, state, caller))
}

/// `GET /answer/{name}` — the recipient's signaling session, keyed by the
/// caller's name.
pub async fn answer_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(caller_name): Path<String>,
    AuthUser(recipient): AuthUser,
) -> Response {
    ws.on_upgrade(move |socket| answer_session(socket, state, caller_name, recipient))
}

async fn call_session(socket: WebSocket, state: AppState, caller: User) {
    let (mut sink, stream) = socket.split();
    let outcome = timeout(
        state.config.signaling_timeout,
        drive_call(&mut sink, stream, &state, &caller),
    )
    .await;
    finish(&mut sink, outcome, "call").await;
}

async fn answer_session(socket: WebSocket, state: AppState, caller_name: String, recipient: User) {
    let (mut sink, stream) = socket.split();
    let outcome = timeout(
        state.config.signaling_timeout,
        drive_answer(&mut sink, stream, &state, &caller_name, &recipient),
    )
    .await;
    finish(&mut sink, outcome, "answer").await;
}

/// Log the session outcome and close the socket with the matching code.
async fn finish(
    sink: &mut SplitSink<WebSocket, Message>,
    outcome: Result<Result<(), SessionError>, tokio::time::error::Elapsed>,
    session: &'static str,
) {
    let frame = match outcome {
        Ok(Ok(())) => {
            debug!(session, "signaling session completed");
            None
        }
        Ok(Err(err)) => {
            warn!(session, error = %err, "signaling session failed");
            Some(CloseFrame {
                code: err.close_code(),
                reason: close::reason(err.close_code()).into(),
            })
        }
        Err(_) => {
            warn!(session, "signaling session timed out");
            Some(CloseFrame {
                code: close::INTERNAL,
                reason: "timeout".into(),
            })
        }
    };
    let _ = sink.send(Message::Close(frame)).await;
}

/// The caller's side of the rendezvous.
///
/// Reads the offer, registers the pending call, forks a reader that routes the
/// caller's trickled candidates into the entry, and forwards the recipient's
/// answer and candidates back out until the recipient's side is exhausted.
async fn drive_call(
    sink: &mut SplitSink<WebSocket, Message>,
    mut stream: SplitStream<WebSocket>,
    state: &AppState,
    caller: &User,
) -> Result<(), SessionError> {
    let request: CallRequest = recv_json(&mut stream).await?;
    if request.sd.sdp.is_empty() {
        return Err(SessionError::BadRequest("empty offer"));
    }

    let recipient = db::get_user_by_name(&state.db, &request.recipient_name)
        .await
        .map_err(|e| SessionError::Internal(e.to_string()))?
        .ok_or(SessionError::BadRequest("unknown recipient"))?;

    let (call, ends) = PendingCall::new(caller.name.clone(), recipient.id, request.sd);
    state
        .calls
        .insert(caller.id, call)
        .map_err(|_| SessionError::Conflict)?;
    let _guard = RegistryGuard::new(state.calls.clone(), caller.id);
    info!(caller = %caller.name, recipient = %recipient.name, "call registered");

    let CallerEnds {
        candidates_tx,
        mut candidates_rx,
        mut answer_rx,
    } = ends;

    let (reader_err_tx, mut reader_err) = mpsc::channel::<SessionError>(1);
    tokio::spawn(route_candidates(stream, candidates_tx, reader_err_tx));

    let mut reader_open = true;
    let mut answered = false;
    loop {
        tokio::select! {
            err = reader_err.recv(), if reader_open => {
                match err {
                    Some(e) => return Err(e),
                    // caller finished trickling; keep forwarding the
                    // recipient's side
                    None => reader_open = false,
                }
            }
            sd = answer_rx.recv(), if !answered => {
                answered = true;
                if let Some(sd) = sd {
                    send_json(sink, &sd).await?;
                    debug!(caller = %caller.name, "forwarded answer");
                }
            }
            candidate = candidates_rx.recv() => {
                match candidate {
                    Some(c) => send_json(sink, &c).await?,
                    None => {
                        // recipient's gathering is done; forward the sentinel
                        // and this session has nothing left to do
                        send_json(sink, &IceCandidate::end_of_candidates()).await?;
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// The recipient's side of the rendezvous.
///
/// Sends the stored offer, waits for the answer and posts it onto the answer
/// channel, then relays candidates both ways. The session is complete once the
/// recipient has finished trickling its own candidates.
async fn drive_answer(
    sink: &mut SplitSink<WebSocket, Message>,
    mut stream: SplitStream<WebSocket>,
    state: &AppState,
    caller_name: &str,
    recipient: &User,
) -> Result<(), SessionError> {
    let caller = db::get_user_by_name(&state.db, caller_name)
        .await
        .map_err(|e| SessionError::Internal(e.to_string()))?
        .ok_or(SessionError::BadRequest("unknown caller"))?;

    let call = state
        .calls
        .get(caller.id)
        .ok_or(SessionError::BadRequest("no pending call"))?;
    // only the user the call was placed to may answer it
    if call.recipient_id != recipient.id {
        return Err(SessionError::BadRequest("no pending call"));
    }
    let ends = call.take_recipient_ends().ok_or(SessionError::Conflict)?;
    let _guard = RegistryGuard::new(state.calls.clone(), caller.id);

    send_json(sink, &call.offer).await?;

    let answer: AnswerRequest = recv_json(&mut stream).await?;
    if answer.sd.sdp.is_empty() {
        return Err(SessionError::BadRequest("empty answer"));
    }
    ends.answer_tx
        .send(answer.sd)
        .await
        .map_err(|_| SessionError::Internal("caller session went away".into()))?;
    info!(caller = %caller.name, recipient = %recipient.name, "answer relayed");

    let (reader_err_tx, mut reader_err) = mpsc::channel::<SessionError>(1);
    tokio::spawn(route_candidates(stream, ends.candidates_tx, reader_err_tx));

    let mut candidates_rx = ends.candidates_rx;
    let mut caller_done = false;
    loop {
        tokio::select! {
            err = reader_err.recv() => {
                match err {
                    Some(e) => return Err(e),
                    // recipient finished trickling; the exchange is complete
                    None => return Ok(()),
                }
            }
            candidate = candidates_rx.recv(), if !caller_done => {
                match candidate {
                    Some(c) => send_json(sink, &c).await?,
                    None => {
                        send_json(sink, &IceCandidate::end_of_candidates()).await?;
                        caller_done = true;
                    }
                }
            }
        }
    }
}

/// Route incoming candidate frames onto a pending-call channel.
///
/// The end-of-candidates sentinel (or a read error) drops the sender, which is
/// how the other session learns this side is done. A full channel means the
/// peer overran the gathering budget and the session is failed rather than
/// ever blocking.
async fn route_candidates(
    mut stream: SplitStream<WebSocket>,
    tx: mpsc::Sender<IceCandidate>,
    err_tx: mpsc::Sender<SessionError>,
) {
    loop {
        let candidate: IceCandidate = match recv_json(&mut stream).await {
            Ok(c) => c,
            Err(e) => {
                let _ = err_tx.try_send(e);
                return;
            }
        };
        if candidate.is_end_of_candidates() {
            debug!("end of candidates");
            return;
        }
        if tx.try_send(candidate).is_err() {
            let _ = err_tx.try_send(SessionError::BadRequest("candidate channel overrun"));
            return;
        }
    }
}

async fn recv_json<T: DeserializeOwned>(
    stream: &mut SplitStream<WebSocket>,
) -> Result<T, SessionError> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(&text)
                    .map_err(|_| SessionError::BadRequest("malformed message"));
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err(SessionError::Transport("connection closed".into()));
            }
            Some(Ok(_)) => {} // ping/pong/binary
            Some(Err(e)) => return Err(SessionError::Transport(e.to_string())),
        }
    }
}

async fn send_json<T: Serialize>(
    sink: &mut SplitSink<WebSocket, Message>,
    value: &T,
) -> Result<(), SessionError> {
    let text =
        serde_json::to_string(value).map_err(|e| SessionError::Internal(e.to_string()))?;
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|e| SessionError::Transport(e.to_string()))
}

/// Background eviction of pending calls whose sessions never cleaned up.
pub fn spawn_sweeper(calls: Arc<PendingCalls>, ttl: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            interval.tick().await;
            let evicted = calls.sweep(ttl);
            if evicted > 0 {
                warn!(evicted, "swept stale pending calls");
            }
        }
    })
}
