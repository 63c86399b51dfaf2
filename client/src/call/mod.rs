//! Call Orchestrator
//!
//! Supervises the concurrent activities of one call — signaling exchange,
//! speaker playback, microphone capture — with strict start ordering and
//! joint cancellation: the first fatal error from any activity, a terminal
//! peer-connection state, or a parent cancel (ctrl-c) unwinds everything.
//!
//! Startup order: peer connection and local description first, then speaker
//! init and signaling concurrently; the microphone starts only once the peer
//! connection reports `Connected`, which also ends the signaling session
//! (the trickle exchange has done its job by then).

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};
use url::form_urlencoded;
use vogo_common::{AnswerRequest, CallRequest, IceCandidate, SessionDescription};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::audio::{capture, playback};
use crate::error::ClientError;
use crate::peer::{self, AudioPeer, PeerEvents};
use crate::signaling::{
    self, Credentials, SignalingReceiver, SignalingSender, SignalingSession,
};

/// Buffered capacity for remote candidates read off the signaling session.
const CANDIDATE_BUFFER: usize = 16;

/// Place a call to `recipient` and run it until cancelled or failed.
pub async fn call_friend(
    parent: &CancellationToken,
    credentials: Credentials,
    stun_server: &str,
    recipient: &str,
) -> Result<(), ClientError> {
    let AudioPeer { pc, track, events } = AudioPeer::new(stun_server, &credentials.username).await?;
    let PeerEvents {
        candidates,
        connected,
        ended,
    } = events;

    // setting the local offer starts ICE gathering
    let offer = pc.create_offer(None).await.map_err(ClientError::media)?;
    pc.set_local_description(offer.clone())
        .await
        .map_err(ClientError::media)?;
    let offer = peer::description_from_rtc(&offer);

    let signaling_token = parent.child_token();
    let signaling = run_caller_signaling(
        signaling_token.clone(),
        credentials,
        recipient.to_string(),
        pc.clone(),
        offer,
        candidates,
    );

    run_call(parent, pc, track, connected, ended, signaling_token, signaling).await
}

/// Answer a pending call from `caller` and run it until cancelled or failed.
pub async fn answer_call(
    parent: &CancellationToken,
    credentials: Credentials,
    stun_server: &str,
    caller: &str,
) -> Result<(), ClientError> {
    let AudioPeer { pc, track, events } = AudioPeer::new(stun_server, &credentials.username).await?;
    let PeerEvents {
        candidates,
        connected,
        ended,
    } = events;

    let signaling_token = parent.child_token();
    let signaling = run_recipient_signaling(
        signaling_token.clone(),
        credentials,
        caller.to_string(),
        pc.clone(),
        candidates,
    );

    run_call(parent, pc, track, connected, ended, signaling_token, signaling).await
}

/// The supervisor shared by both roles.
async fn run_call(
    parent: &CancellationToken,
    pc: Arc<RTCPeerConnection>,
    track: Arc<TrackLocalStaticSample>,
    mut connected: mpsc::Receiver<()>,
    mut ended: mpsc::Receiver<RTCPeerConnectionState>,
    signaling_token: CancellationToken,
    signaling: impl Future<Output = Result<(), ClientError>> + Send + 'static,
) -> Result<(), ClientError> {
    // the first fatal error from any activity wins; later ones are dropped
    let (errors_tx, mut errors) = mpsc::channel::<ClientError>(8);
    let tracker = TaskTracker::new();

    // speaker init runs concurrently with signaling; a dead speaker aborts
    // the call through the error channel like any other fault
    let playback = playback::start(&pc, errors_tx.clone());

    {
        let errors = errors_tx.clone();
        tracker.spawn(async move {
            match signaling.await {
                Ok(()) | Err(ClientError::Cancelled) => {}
                Err(e) => {
                    let _ = errors.try_send(e);
                }
            }
        });
    }

    // the microphone starts only after `Connected`; samples written earlier
    // would be discarded. No receive-only fallback: a dead mic ends the call.
    let capture_token = parent.child_token();
    {
        let errors = errors_tx.clone();
        let token = capture_token.clone();
        let signaling_token = signaling_token.clone();
        tracker.spawn(async move {
            tokio::select! {
                () = token.cancelled() => return,
                notified = connected.recv() => {
                    if notified.is_none() {
                        return;
                    }
                    info!("call connected");
                    signaling_token.cancel();
                }
            }
            match capture::run(token, track).await {
                Ok(()) | Err(ClientError::Cancelled) => {}
                Err(e) => {
                    let _ = errors.try_send(e);
                }
            }
        });
    }

    // block until interrupt, the first fatal error, or a terminal peer state
    let result = tokio::select! {
        () = parent.cancelled() => Ok(()),
        Some(error) = errors.recv() => Err(error),
        Some(state) = ended.recv() => match state {
            // the peer hung up; that is a clean shutdown on this side too
            RTCPeerConnectionState::Disconnected => {
                info!("peer hung up");
                Ok(())
            }
            other => Err(ClientError::Media(format!("peer connection {other}"))),
        },
    };

    // cascade: cancel the children, close the peer connection (unblocking
    // in-flight media reads), join every task, release the devices
    signaling_token.cancel();
    capture_token.cancel();
    playback.shutdown(&pc).await;
    tracker.close();
    tracker.wait().await;
    debug!("all call tasks joined");

    result
}

/// Caller side of the signaling exchange: send the offer, trickle local
/// candidates, take the answer, then apply remote candidates until the
/// orchestrator cancels the session.
async fn run_caller_signaling(
    token: CancellationToken,
    credentials: Credentials,
    recipient: String,
    pc: Arc<RTCPeerConnection>,
    offer: SessionDescription,
    local_candidates: mpsc::Receiver<IceCandidate>,
) -> Result<(), ClientError> {
    let session = SignalingSession::connect(&credentials, "/call").await?;
    let (mut sender, receiver) = session.split();

    sender
        .send(&CallRequest {
            recipient_name: recipient,
            sd: offer,
        })
        .await?;
    debug!("offer sent");

    // trickle local candidates while waiting for the answer
    let forwarder = CandidateForwarder::spawn(&token, sender, local_candidates);
    let result = caller_exchange(&token, &pc, receiver).await;
    let forward_result = forwarder.finish().await;
    result.and(forward_result)
}

/// Await the answer, then stream the recipient's candidates into the peer
/// connection.
async fn caller_exchange(
    token: &CancellationToken,
    pc: &RTCPeerConnection,
    mut receiver: SignalingReceiver,
) -> Result<(), ClientError> {
    let answer: SessionDescription = receiver.recv(token).await?;
    pc.set_remote_description(peer::description_to_rtc(&answer)?)
        .await
        .map_err(ClientError::media)?;
    info!("received answer");

    apply_remote_candidates(token, pc, receiver).await
}

/// Recipient side: take the offer, post the answer, then exchange candidates
/// until the orchestrator cancels the session.
async fn run_recipient_signaling(
    token: CancellationToken,
    credentials: Credentials,
    caller: String,
    pc: Arc<RTCPeerConnection>,
    local_candidates: mpsc::Receiver<IceCandidate>,
) -> Result<(), ClientError> {
    let encoded: String = form_urlencoded::byte_serialize(caller.as_bytes()).collect();
    let session = SignalingSession::connect(&credentials, &format!("/answer/{encoded}")).await?;
    let (mut sender, mut receiver) = session.split();

    // the stored offer is the session's first message
    let offer: SessionDescription = receiver.recv(&token).await?;
    pc.set_remote_description(peer::description_to_rtc(&offer)?)
        .await
        .map_err(ClientError::media)?;

    // setting the local answer starts ICE gathering
    let answer = pc.create_answer(None).await.map_err(ClientError::media)?;
    pc.set_local_description(answer.clone())
        .await
        .map_err(ClientError::media)?;

    sender
        .send(&AnswerRequest {
            caller_name: caller,
            sd: peer::description_from_rtc(&answer),
        })
        .await?;
    info!("answer sent");

    let forwarder = CandidateForwarder::spawn(&token, sender, local_candidates);
    let result = apply_remote_candidates(&token, &pc, receiver).await;
    let forward_result = forwarder.finish().await;
    result.and(forward_result)
}

/// Read remote candidates off the session and add them to the peer
/// connection. Stays up after the remote side finishes (their sentinel) so
/// the session remains open until the orchestrator cancels it.
async fn apply_remote_candidates(
    token: &CancellationToken,
    pc: &RTCPeerConnection,
    receiver: SignalingReceiver,
) -> Result<(), ClientError> {
    let (remote_tx, mut remote_rx) = mpsc::channel(CANDIDATE_BUFFER);
    let read_token = token.child_token();
    let reader = tokio::spawn(signaling::read_candidates(
        receiver,
        read_token.clone(),
        remote_tx,
    ));

    let mut remote_done = false;
    let applied = loop {
        tokio::select! {
            () = token.cancelled() => break Ok(()),
            candidate = remote_rx.recv(), if !remote_done => match candidate {
                Some(candidate) => {
                    debug!("received remote candidate");
                    if let Err(e) = pc.add_ice_candidate(peer::candidate_to_init(candidate)).await {
                        break Err(ClientError::media(e));
                    }
                }
                // their side is done; stay up until the orchestrator
                // cancels the session
                None => remote_done = true,
            }
        }
    };

    read_token.cancel();
    let _ = reader.await;
    applied
}

/// Forwards locally gathered candidates on its own task; `finish` cancels it,
/// joins it, and closes the write half of the session.
struct CandidateForwarder {
    token: CancellationToken,
    handle: JoinHandle<(SignalingSender, Result<(), ClientError>)>,
}

impl CandidateForwarder {
    fn spawn(
        parent: &CancellationToken,
        mut sender: SignalingSender,
        mut local_candidates: mpsc::Receiver<IceCandidate>,
    ) -> Self {
        let token = parent.child_token();
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            let result =
                signaling::send_candidates(&mut sender, &task_token, &mut local_candidates).await;
            (sender, result)
        });
        Self { token, handle }
    }

    async fn finish(self) -> Result<(), ClientError> {
        self.token.cancel();
        match self.handle.await {
            Ok((mut sender, result)) => {
                sender.close().await;
                result
            }
            Err(_) => Err(ClientError::Transport("candidate forwarder failed".into())),
        }
    }
}
