//! Wire protocol for lobbysync.
//!
//! This crate defines what clients and the hub say to each other:
//!
//! - **Types** ([`LobbyId`], [`SessionId`], [`UserId`], [`LobbySettings`])
//! - **Frames** ([`ClientFrame`] inbound, [`Envelope`]/[`ServerEvent`]
//!   outbound, [`ErrorKind`])
//! - **Codec** ([`Codec`] trait, [`JsonCodec`])
//! - **Errors** ([`ProtocolError`])
//!
//! It knows nothing about connections or lobbies' live state; it only
//! describes and (de)serializes frames.
//!
//! ```text
//! Transport (bytes) → Protocol (frames) → Session / Lobby
//! ```

mod codec;
mod error;
mod frames;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use frames::{
    ClientFrame, Envelope, ErrorKind, EventTag, PROTOCOL_VERSION, ServerEvent,
};
pub use types::{LobbyId, LobbySettings, MAX_CONCEPTS, SessionId, UserId};
