//! Transport abstraction layer for lobbysync.
//!
//! Provides the [`Transport`] and [`Connection`] traits the hub is written
//! against, plus a WebSocket implementation.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{PendingWebSocket, WebSocketConnection, WebSocketTransport};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of an accepted connection, used to
/// correlate log lines before the session has an id of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocates the next id. Never returns the same value twice.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C-{}", self.0)
    }
}

/// Why a connection is being closed. Maps onto RFC 6455 status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// 1000: graceful leave.
    Normal,
    /// 1001: the server is fencing the connection (lobby deleted,
    /// heartbeat missed, shutdown).
    GoingAway,
    /// 1008: the peer broke protocol rules.
    PolicyViolation,
    /// 1011: the server hit an internal invariant violation.
    InternalError,
    /// 1013: the peer could not keep up and was shed.
    TryAgainLater,
}

impl CloseCode {
    /// Returns the numeric status code sent in the close frame.
    pub fn as_u16(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::GoingAway => 1001,
            Self::PolicyViolation => 1008,
            Self::InternalError => 1011,
            Self::TryAgainLater => 1013,
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// Something received from the remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// An application frame.
    Data(Vec<u8>),
    /// A pong answering one of our pings, with its payload.
    Pong(Vec<u8>),
}

/// Accepts new incoming connections.
///
/// Accepting only takes the peer off the listener. The protocol upgrade
/// happens in [`Upgrade::upgrade`], so a slow peer holds up its own task
/// and nobody else's.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// A peer that has been accepted but not yet upgraded.
    type Pending: Upgrade<Connection = Self::Connection, Error = Self::Error>;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming peer. Cancel-safe.
    async fn accept(&mut self) -> Result<Self::Pending, Self::Error>;
}

/// An accepted peer that still has to complete the protocol upgrade.
pub trait Upgrade: Send + 'static {
    /// The connection produced by a successful upgrade.
    type Connection: Connection;
    /// The error type for a failed upgrade.
    type Error: std::error::Error + Send + Sync;

    /// Identifier the connection will carry once upgraded.
    fn id(&self) -> ConnectionId;

    /// Completes the upgrade, bounded by the transport's own timeout.
    async fn upgrade(self) -> Result<Self::Connection, Self::Error>;
}

/// A single connection that can send and receive frames.
///
/// Sending and receiving are independent: a task may be parked in
/// [`recv`](Connection::recv) while another call sends.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Sends an application frame to the remote peer.
    async fn send(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// Receives the next frame from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    async fn recv(&self) -> Result<Option<Inbound>, Self::Error>;

    /// Sends a ping carrying `payload`. The peer answers with a pong
    /// carrying the same bytes.
    async fn ping(&self, payload: &[u8]) -> Result<(), Self::Error>;

    /// Closes the connection with the given status code and reason.
    async fn close(
        &self,
        code: CloseCode,
        reason: &str,
    ) -> Result<(), Self::Error>;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}
