//! Vogo Common Library
//!
//! Wire-protocol frames and public API types shared by the client and server.

pub mod signal;
pub mod types;

pub use signal::{AnswerRequest, CallRequest, IceCandidate, SdpKind, SessionDescription};
pub use types::*;
