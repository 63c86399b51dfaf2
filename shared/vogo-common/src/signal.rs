//! Signaling Wire Protocol
//!
//! Frames exchanged over the `/call` and `/answer/{name}` WebSocket sessions.
//! One JSON object per text frame. The field names of [`SessionDescription`]
//! and [`IceCandidate`] match the serde output of the WebRTC library so the
//! client can convert between the two without remapping.
//!
//! Message order within a session is fixed: the caller sends a [`CallRequest`]
//! first and then candidates; the recipient receives the offer description
//! first, replies with an [`AnswerRequest`], and then both sides stream
//! candidates until each has sent the end-of-candidates sentinel (a candidate
//! with an empty `candidate` string).

use serde::{Deserialize, Serialize};

/// Session-description type, as negotiated by WebRTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// An SDP offer or answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A trickled ICE candidate.
///
/// An empty `candidate` string is the end-of-candidates sentinel: the sending
/// side has finished gathering and will send no further candidates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// The end-of-candidates sentinel.
    #[must_use]
    pub fn end_of_candidates() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_end_of_candidates(&self) -> bool {
        self.candidate.is_empty()
    }
}

/// First frame on a `/call` session: who to call, and the caller's offer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CallRequest {
    pub recipient_name: String,
    pub sd: SessionDescription,
}

/// Sent by the recipient on an `/answer/{name}` session after it has received
/// the caller's offer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AnswerRequest {
    pub caller_name: String,
    pub sd: SessionDescription,
}

/// WebSocket close codes used by the signaling broker.
///
/// These are the HTTP statuses the failure maps to, offset into the 4000-4999
/// private-use range (RFC 6455 reserves everything below 1000, so a literal
/// `400` on the wire would be rejected as a protocol violation). Clients
/// translate them back into their error taxonomy.
pub mod close {
    pub const BAD_REQUEST: u16 = 4400;
    pub const UNAUTHORIZED: u16 = 4401;
    pub const CONFLICT: u16 = 4409;
    pub const INTERNAL: u16 = 4500;

    /// Human-readable reason for a close code.
    #[must_use]
    pub fn reason(code: u16) -> &'static str {
        match code {
            BAD_REQUEST => "bad_request",
            UNAUTHORIZED => "unauthorized",
            CONFLICT => "conflict",
            _ => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_description_wire_shape() {
        let sd = SessionDescription::offer("v=0\r\n");
        let json = serde_json::to_value(&sd).unwrap();
        assert_eq!(json["type"], "offer");
        assert_eq!(json["sdp"], "v=0\r\n");

        let back: SessionDescription = serde_json::from_value(json).unwrap();
        assert_eq!(back, sd);
    }

    #[test]
    fn candidate_wire_shape_is_camel_case() {
        let c = IceCandidate {
            candidate: "candidate:1 1 UDP 2122252543 192.0.2.1 54321 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        };
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["sdpMid"], "0");
        assert_eq!(json["sdpMLineIndex"], 0);
        assert!(json.get("usernameFragment").is_none());
    }

    #[test]
    fn empty_candidate_is_sentinel() {
        assert!(IceCandidate::end_of_candidates().is_end_of_candidates());

        let c: IceCandidate = serde_json::from_str(r#"{"candidate":""}"#).unwrap();
        assert!(c.is_end_of_candidates());

        let c: IceCandidate = serde_json::from_str(r#"{"candidate":"candidate:1"}"#).unwrap();
        assert!(!c.is_end_of_candidates());
    }

    #[test]
    fn call_request_uses_pascal_case_fields() {
        let req = CallRequest {
            recipient_name: "bob#AB12".into(),
            sd: SessionDescription::offer("sdp"),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["RecipientName"], "bob#AB12");
        assert_eq!(json["Sd"]["type"], "offer");
    }

    #[test]
    fn answer_request_round_trips() {
        let req = AnswerRequest {
            caller_name: "alice#XY99".into(),
            sd: SessionDescription::answer("sdp-b"),
        };
        let text = serde_json::to_string(&req).unwrap();
        let back: AnswerRequest = serde_json::from_str(&text).unwrap();
        assert_eq!(back.caller_name, "alice#XY99");
        assert_eq!(back.sd.kind, SdpKind::Answer);
    }

    #[test]
    fn close_reasons() {
        assert_eq!(close::reason(close::BAD_REQUEST), "bad_request");
        assert_eq!(close::reason(close::CONFLICT), "conflict");
        assert_eq!(close::reason(close::INTERNAL), "internal");
    }
}
