//! Error types for the session layer.

use lobbysync_protocol::SessionId;

use crate::SessionState;

/// Errors that can occur while authenticating or driving a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The token was invalid, expired, or rejected by the
    /// [`Authenticator`](crate::Authenticator).
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The session's outbound queue is full; the consumer is too slow.
    #[error("outbound queue of session {0} is full")]
    QueueFull(SessionId),

    /// The session's outbound queue has no receiver any more.
    #[error("session {0} is closed")]
    Closed(SessionId),

    /// The lifecycle state machine refused a transition.
    #[error("invalid session transition from {from} to {to}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },
}
