/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding or accepting connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// The WebSocket upgrade did not finish in time.
    #[error("upgrade timed out")]
    UpgradeTimeout,
}

impl TransportError {
    /// Returns `true` if the error means the peer is gone, as opposed to
    /// a local failure to bind or accept.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed(_)
                | Self::SendFailed(_)
                | Self::ReceiveFailed(_)
        )
    }
}
