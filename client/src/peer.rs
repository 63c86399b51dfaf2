//! Peer-Connection Factory
//!
//! Builds the WebRTC peer connection for a bidirectional Opus audio call: a
//! media engine with exactly one codec, a single sendrecv transceiver, the
//! local capture track, and channels carrying the library's ICE-candidate and
//! connection-state callbacks back into orderly task land.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use vogo_common::{IceCandidate, SdpKind, SessionDescription};

use crate::audio;
use crate::error::ClientError;

/// Opus RTP payload type.
const PAYLOAD_TYPE: u8 = 111;

/// Large enough that a full Opus frame never underruns a packet read.
const RECEIVE_MTU: usize = 3_000;

/// Buffered capacity of the local-candidate channel; gathering rarely
/// produces more than ten.
const CANDIDATE_BUFFER: usize = 16;

/// Event channels fed by the peer-connection callbacks.
///
/// The callbacks run on library threads and must never block, so each writes
/// with `try_send` into a buffer sized for the known maximum.
pub struct PeerEvents {
    /// Locally gathered candidates; closed when gathering finishes.
    pub candidates: mpsc::Receiver<IceCandidate>,
    /// One-shot notification that the connection reached `Connected`.
    pub connected: mpsc::Receiver<()>,
    /// One-shot notification of a terminal state: `Disconnected` (the peer
    /// hung up), `Failed`, or `Closed`.
    pub ended: mpsc::Receiver<RTCPeerConnectionState>,
}

/// A peer connection configured for one bidirectional Opus audio stream.
pub struct AudioPeer {
    pub pc: Arc<RTCPeerConnection>,
    /// Write endpoint for encoded microphone samples.
    pub track: Arc<TrackLocalStaticSample>,
    pub events: PeerEvents,
}

fn opus_codec() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_OPUS.to_string(),
        clock_rate: audio::SAMPLE_RATE,
        channels: audio::CHANNELS,
        sdp_fmtp_line: String::new(),
        rtcp_feedback: vec![],
    }
}

impl AudioPeer {
    /// Build the peer connection, register event handlers, and attach the
    /// local capture track.
    pub async fn new(stun_server: &str, track_id: &str) -> Result<Self, ClientError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_codec(
                RTCRtpCodecParameters {
                    capability: opus_codec(),
                    payload_type: PAYLOAD_TYPE,
                    ..Default::default()
                },
                RTPCodecType::Audio,
            )
            .map_err(ClientError::media)?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(ClientError::media)?;

        // keeps packet reads from underrunning on large Opus frames
        let mut setting_engine = SettingEngine::default();
        setting_engine.set_receive_mtu(RECEIVE_MTU);

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_setting_engine(setting_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: vec![stun_server.to_string()],
                ..Default::default()
            }],
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(ClientError::media)?,
        );

        let transceiver = pc
            .add_transceiver_from_kind(
                RTPCodecType::Audio,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Sendrecv,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(ClientError::media)?;

        let track = Arc::new(TrackLocalStaticSample::new(
            opus_codec(),
            "capture".to_string(),
            format!("capture-{track_id}"),
        ));
        transceiver
            .sender()
            .await
            .replace_track(Some(track.clone() as Arc<dyn TrackLocal + Send + Sync>))
            .await
            .map_err(ClientError::media)?;

        let events = register_event_handlers(&pc);
        info!("peer connection created");

        Ok(Self { pc, track, events })
    }
}

fn register_event_handlers(pc: &Arc<RTCPeerConnection>) -> PeerEvents {
    let (candidates_tx, candidates) = mpsc::channel(CANDIDATE_BUFFER);
    let (connected_tx, connected) = mpsc::channel(1);
    let (ended_tx, ended) = mpsc::channel(1);

    // the sender lives in a slot so the gathering-finished callback (a nil
    // candidate) can drop it, closing the channel for the forwarder
    let slot = Arc::new(Mutex::new(Some(candidates_tx)));
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let slot = slot.clone();
        Box::pin(async move {
            let Ok(mut guard) = slot.lock() else { return };
            match candidate {
                Some(candidate) => match candidate.to_json() {
                    Ok(init) => {
                        if let Some(tx) = guard.as_ref() {
                            if tx.try_send(candidate_from_init(init)).is_err() {
                                warn!("local candidate channel overrun");
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "serializing local candidate"),
                },
                None => {
                    debug!("local gathering finished");
                    guard.take();
                }
            }
        })
    }));

    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let connected_tx = connected_tx.clone();
        let ended_tx = ended_tx.clone();
        Box::pin(async move {
            info!(state = %state, "peer connection state");
            match state {
                RTCPeerConnectionState::Connected => {
                    let _ = connected_tx.try_send(());
                }
                RTCPeerConnectionState::Disconnected
                | RTCPeerConnectionState::Failed
                | RTCPeerConnectionState::Closed => {
                    let _ = ended_tx.try_send(state);
                }
                _ => {}
            }
        })
    }));

    PeerEvents {
        candidates,
        connected,
        ended,
    }
}

/// Close the peer connection. Idempotent; unblocks any in-flight media reads.
pub async fn close_peer(pc: &RTCPeerConnection) {
    debug!("closing peer connection");
    if let Err(e) = pc.close().await {
        warn!(error = %e, "closing peer connection");
    }
}

/// Wire-type conversions between the shared protocol structs and the WebRTC
/// library's own.
pub fn candidate_from_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

pub fn candidate_to_init(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

pub fn description_to_rtc(sd: &SessionDescription) -> Result<RTCSessionDescription, ClientError> {
    let result = match sd.kind {
        SdpKind::Offer => RTCSessionDescription::offer(sd.sdp.clone()),
        SdpKind::Answer => RTCSessionDescription::answer(sd.sdp.clone()),
        SdpKind::Pranswer => RTCSessionDescription::pranswer(sd.sdp.clone()),
        SdpKind::Rollback => {
            return Err(ClientError::Protocol("unexpected rollback description".into()))
        }
    };
    result.map_err(ClientError::protocol)
}

pub fn description_from_rtc(desc: &RTCSessionDescription) -> SessionDescription {
    let kind = match desc.sdp_type {
        RTCSdpType::Answer => SdpKind::Answer,
        RTCSdpType::Pranswer => SdpKind::Pranswer,
        RTCSdpType::Rollback => SdpKind::Rollback,
        _ => SdpKind::Offer,
    };
    SessionDescription {
        kind,
        sdp: desc.sdp.clone(),
    }
}
