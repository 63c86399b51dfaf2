//! Client Error Taxonomy
//!
//! Every fatal failure a command can hit maps onto one of these variants; the
//! binary prints a single diagnostic line and exits non-zero. `Cancelled` is
//! not user-visible: it marks a sub-activity unwound by the joint-cancellation
//! tree and is swallowed at the top level.

use vogo_common::signal::close;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("authentication failed; check the credentials in your config file")]
    Auth,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("connection error: {0}")]
    Transport(String),

    #[error("media error: {0}")]
    Media(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("cancelled")]
    Cancelled,
}

impl ClientError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    pub fn media(err: impl std::fmt::Display) -> Self {
        Self::Media(err.to_string())
    }

    pub fn protocol(err: impl std::fmt::Display) -> Self {
        Self::Protocol(err.to_string())
    }

    /// Map a signaling close code back onto the taxonomy.
    #[must_use]
    pub fn from_close_code(code: u16) -> Self {
        match code {
            close::UNAUTHORIZED => Self::Auth,
            close::CONFLICT => Self::Conflict("a pending call already exists".into()),
            close::BAD_REQUEST => Self::Protocol("server rejected the request".into()),
            _ => Self::Transport(format!("session closed ({code})")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_codes_map_to_taxonomy() {
        assert!(matches!(ClientError::from_close_code(4401), ClientError::Auth));
        assert!(matches!(
            ClientError::from_close_code(4409),
            ClientError::Conflict(_)
        ));
        assert!(matches!(
            ClientError::from_close_code(4400),
            ClientError::Protocol(_)
        ));
        assert!(matches!(
            ClientError::from_close_code(1000),
            ClientError::Transport(_)
        ));
    }
}
