//! Unified error type for the lobbysync hub.

use lobbysync_lobby::LobbyError;
use lobbysync_protocol::{ErrorKind, ProtocolError};
use lobbysync_session::SessionError;
use lobbysync_transport::{CloseCode, TransportError};

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant auto-generates `From` impls,
/// so the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// A transport-level error (accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid frame).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (auth, queue, lifecycle).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A lobby-level error (not found, gone, unauthorized, store).
    #[error(transparent)]
    Lobby(#[from] LobbyError),

    /// The handshake announced a protocol version the hub doesn't speak.
    #[error("protocol version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u32, got: u32 },

    /// No handshake arrived within the handshake timeout.
    #[error("handshake timed out")]
    HandshakeTimeout,
}

impl HubError {
    /// The category reported to the client in an `error` event.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) => ErrorKind::ConnectionLost,
            Self::Protocol(ProtocolError::InvalidMessage(_)) => {
                ErrorKind::InvalidEvent
            }
            Self::Protocol(_) => ErrorKind::MalformedFrame,
            Self::Session(SessionError::AuthFailed(_)) => ErrorKind::Unauthorized,
            Self::Session(_) => ErrorKind::Internal,
            Self::Lobby(e) => lobby_error_kind(e),
            Self::VersionMismatch { .. } => ErrorKind::VersionMismatch,
            Self::HandshakeTimeout => ErrorKind::Timeout,
        }
    }

    /// The close code for a connection that fails with this error
    /// before or while joining.
    pub fn close_code(&self) -> CloseCode {
        match self {
            Self::Transport(_) | Self::Lobby(LobbyError::Gone(_)) => {
                CloseCode::GoingAway
            }
            Self::Lobby(
                LobbyError::Timeout(_)
                | LobbyError::Store(_)
                | LobbyError::Unavailable(_),
            ) => CloseCode::TryAgainLater,
            Self::Lobby(LobbyError::InvariantViolation(_))
            | Self::Session(
                SessionError::Closed(_)
                | SessionError::QueueFull(_)
                | SessionError::InvalidTransition { .. },
            ) => CloseCode::InternalError,
            _ => CloseCode::PolicyViolation,
        }
    }
}

/// Maps a lobby failure onto the wire taxonomy.
pub(crate) fn lobby_error_kind(err: &LobbyError) -> ErrorKind {
    match err {
        LobbyError::NotFound(_) => ErrorKind::NotFound,
        LobbyError::Gone(_) => ErrorKind::Gone,
        LobbyError::Unauthorized(_) => ErrorKind::Unauthorized,
        LobbyError::Validation(_) => ErrorKind::ValidationError,
        LobbyError::Store(_) => ErrorKind::StoreFailure,
        LobbyError::Timeout(_) => ErrorKind::Timeout,
        LobbyError::Unavailable(_) | LobbyError::InvariantViolation(_) => {
            ErrorKind::Internal
        }
    }
}
