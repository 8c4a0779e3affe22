//! Error types for the protocol layer.

/// Errors that can occur while encoding or decoding frames.
///
/// A `ProtocolError` always means "these bytes were not a valid frame";
/// whether the frame was *allowed* is decided higher up.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed JSON, a missing field, or a
    /// field of the wrong type.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The frame decoded but breaks a protocol rule, e.g. a handshake
    /// that arrives after the session is already joined.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
