use crate::state::Phase;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Failures of the underlying message transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tungstenite::Error,
    },
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("connection closed by peer")]
    Closed,
    #[error("received a binary frame that is not valid UTF-8")]
    NonUtf8Frame,
}

/// Every way a session can end other than a healthy close.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("handshake rejected by server: {message}")]
    HandshakeRejected { message: String },

    #[error("server closed the session with an error: {message}")]
    ServerClosed { message: String },

    #[error("protocol violation while {phase:?}: {detail}")]
    ProtocolViolation { phase: Phase, detail: String },

    #[error("cannot {operation} while {phase:?}")]
    InvalidState {
        phase: Phase,
        operation: &'static str,
    },
}

impl SessionError {
    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Transport(_) => "transport",
            SessionError::HandshakeRejected { .. } => "handshake_rejected",
            SessionError::ServerClosed { .. } => "server_closed",
            SessionError::ProtocolViolation { .. } => "protocol_violation",
            SessionError::InvalidState { .. } => "invalid_state",
        }
    }
}
