//! # lobbysync
//!
//! Real-time synchronization hub for collaborative lobbies.
//!
//! Clients hold one WebSocket per lobby. The hub derives presence from
//! live connections, serializes creator-only settings changes into a
//! versioned broadcast, and fences every session out when the lobby is
//! deleted. Lobby records and passwords stay in the lobby store; the hub
//! never sees a stored password.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lobbysync::prelude::*;
//!
//! # async fn run() -> Result<(), HubError> {
//! let store = InMemoryLobbyStore::new().with_lobby("L1", "alice", Some("pw"));
//! let auth = StaticAuthenticator::new().with_token("tok-a", "alice");
//!
//! let hub = LobbyHub::builder()
//!     .bind("0.0.0.0:8765")
//!     .build(store, auth)
//!     .await?;
//! hub.run_until(async {
//!     let _ = tokio::signal::ctrl_c().await;
//! })
//! .await
//! # }
//! ```

mod config;
mod error;
mod handler;
#[cfg(feature = "rest")]
mod rest;
mod router;
mod server;

pub use config::{
    AuthConfig, BIND_ENV, CONFIG_PATH_ENV, HeartbeatConfig, HubConfig,
    STORE_URL_ENV, SeedLobby, StoreConfig,
};
pub use error::HubError;
#[cfg(feature = "rest")]
pub use rest::{RestAuthenticator, RestLobbyStore};
pub use server::{LobbyHub, LobbyHubBuilder};

/// Everything needed to embed a hub.
pub mod prelude {
    pub use crate::{HeartbeatConfig, HubConfig, HubError, LobbyHub};
    #[cfg(feature = "rest")]
    pub use crate::{RestAuthenticator, RestLobbyStore};
    pub use lobbysync_lobby::{
        InMemoryLobbyStore, LobbyConfig, LobbyError, LobbyRecord, LobbyStore,
        PresenceCounter, SessionRegistry, StoreError,
    };
    pub use lobbysync_protocol::{
        ErrorKind, LobbyId, LobbySettings, PROTOCOL_VERSION, UserId,
    };
    pub use lobbysync_session::{
        Authenticator, SessionError, StaticAuthenticator,
    };
    pub use lobbysync_transport::CloseCode;
}
