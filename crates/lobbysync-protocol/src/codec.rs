//! Codec trait and implementations for serializing/deserializing frames.
//!
//! The hub never touches `serde_json` directly: the connection handler
//! encodes outbound [`Envelope`](crate::Envelope)s and decodes inbound
//! [`ClientFrame`](crate::ClientFrame)s through a [`Codec`], so the wire
//! format can change without touching the lobby logic.

use serde::{de::DeserializeOwned, Serialize};

use crate::{EventTag, ProtocolError};

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because one codec instance is shared by every
/// connection task for the lifetime of the server.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;

    /// Reads only the `event` discriminator of a frame.
    ///
    /// Lets the router tell an unknown event name apart from a known
    /// event with a broken payload.
    fn decode_tag(&self, data: &[u8]) -> Result<String, ProtocolError> {
        self.decode::<EventTag>(data).map(|tag| tag.event)
    }
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// JSON is what browser clients speak natively, so this is the default
/// and currently the only wire format.
///
/// ## Example
///
/// ```rust
/// use lobbysync_protocol::{ClientFrame, Codec, JsonCodec};
///
/// let codec = JsonCodec;
/// let frame: ClientFrame = codec
///     .decode(br#"{"event":"new_note","hint":"n-17"}"#)
///     .unwrap();
/// assert_eq!(frame, ClientFrame::NewNote { hint: Some("n-17".into()) });
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
