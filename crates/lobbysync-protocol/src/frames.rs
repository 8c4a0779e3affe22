//! Frames exchanged between clients and the hub.
//!
//! Every frame is a JSON object with an `event` discriminator:
//!
//! ```text
//! client → hub   {"event":"settings_updated","settings":{...}}
//! hub → client   {"lobby_id":"L","timestamp":1718000000000,
//!                 "originator":"alice","event":"settings_updated",
//!                 "settings":{...},"version":4}
//! ```
//!
//! Inbound frames are [`ClientFrame`]s. Outbound frames are
//! [`Envelope`]s wrapping a [`ServerEvent`].

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::{LobbyId, LobbySettings, SessionId, UserId};

/// The protocol version clients must announce in their handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// Just the discriminator of a frame, with every other field ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct EventTag {
    /// The declared event name.
    pub event: String,
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// A frame sent by a client.
///
/// Extra fields are ignored, so older clients that still send e.g.
/// `updatedBy` or `timestamp` keep working.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientFrame {
    /// First frame of every connection.
    Handshake {
        version: u32,
        token: String,
        lobby_id: LobbyId,
    },

    /// Advisory only. Presence is derived from live connections, so this
    /// never changes the participant count.
    Join {
        #[serde(default)]
        username: Option<String>,
    },

    /// Advisory only, like `Join`. Leaving means closing the connection.
    Leave {},

    /// A note was added; other clients may want to refresh.
    NewNote {
        #[serde(default)]
        hint: Option<String>,
    },

    /// Request to change the lobby settings. Creator only.
    SettingsUpdated { settings: LobbySettings },

    /// Request to delete the lobby. Creator only, password checked by
    /// the lobby store.
    LobbyDeleted { password: String },
}

impl ClientFrame {
    /// Every event name a client may send.
    pub const EVENTS: [&'static str; 6] = [
        "handshake",
        "join",
        "leave",
        "new_note",
        "settings_updated",
        "lobby_deleted",
    ];

    /// Returns `true` if `name` is a recognized inbound event.
    pub fn is_known_event(name: &str) -> bool {
        Self::EVENTS.contains(&name)
    }

    /// Returns the wire name of this frame's event.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Handshake { .. } => "handshake",
            Self::Join { .. } => "join",
            Self::Leave {} => "leave",
            Self::NewNote { .. } => "new_note",
            Self::SettingsUpdated { .. } => "settings_updated",
            Self::LobbyDeleted { .. } => "lobby_deleted",
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Machine-readable category of an error reported to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A non-creator tried a privileged mutation, the password was wrong,
    /// or the token was rejected.
    Unauthorized,
    /// Settings out of range.
    ValidationError,
    /// The lobby was deleted.
    Gone,
    /// The lobby never existed (according to the store).
    NotFound,
    /// The transport failed.
    ConnectionLost,
    /// A heartbeat or store call exceeded its bound.
    Timeout,
    /// The event name is not recognized.
    InvalidEvent,
    /// The frame could not be decoded.
    MalformedFrame,
    /// The lobby store failed or refused the request.
    StoreFailure,
    /// The handshake announced an unsupported protocol version.
    VersionMismatch,
    /// Something went wrong inside the hub.
    Internal,
}

impl ErrorKind {
    /// The wire name, as serialized in the `kind` field.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::ValidationError => "validation_error",
            Self::Gone => "gone",
            Self::NotFound => "not_found",
            Self::ConnectionLost => "connection_lost",
            Self::Timeout => "timeout",
            Self::InvalidEvent => "invalid_event",
            Self::MalformedFrame => "malformed_frame",
            Self::StoreFailure => "store_failure",
            Self::VersionMismatch => "version_mismatch",
            Self::Internal => "internal",
        }
    }
}

/// An event emitted by the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Sent only to a newly registered session: who it is and the
    /// authoritative lobby state at the moment it joined.
    Welcome {
        session_id: SessionId,
        user: UserId,
        creator: UserId,
        settings: LobbySettings,
        version: u64,
        count: usize,
    },

    /// Another session joined.
    Join { session_id: SessionId, user: UserId },

    /// Another session left.
    Leave { session_id: SessionId, user: UserId },

    /// Absolute number of live sessions in the lobby.
    Presence { count: usize },

    /// The authoritative settings after an accepted change.
    SettingsUpdated { settings: LobbySettings, version: u64 },

    /// The lobby was deleted; the connection will be closed next.
    LobbyDeleted { deleted_by: UserId },

    /// Best-effort hint that a note was added.
    NewNote {
        #[serde(default)]
        hint: Option<String>,
    },

    /// A request from this session failed.
    Error { kind: ErrorKind, message: String },
}

/// The outer frame of every hub → client message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Lobby the event belongs to.
    pub lobby_id: LobbyId,

    /// Milliseconds since the UNIX epoch when the event was created.
    pub timestamp: u64,

    /// The user whose action caused the event, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub originator: Option<UserId>,

    /// The event itself, flattened so `event` sits at the top level.
    #[serde(flatten)]
    pub event: ServerEvent,
}

impl Envelope {
    /// Wraps an event for the given lobby, stamped with the current time.
    pub fn new(lobby_id: LobbyId, event: ServerEvent) -> Self {
        Self {
            lobby_id,
            timestamp: now_millis(),
            originator: None,
            event,
        }
    }

    /// Sets the user who caused the event.
    pub fn originated_by(mut self, user: UserId) -> Self {
        self.originator = Some(user);
        self
    }

    /// Shorthand for an [`ServerEvent::Error`] envelope.
    pub fn error(
        lobby_id: LobbyId,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            lobby_id,
            ServerEvent::Error {
                kind,
                message: message.into(),
            },
        )
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
