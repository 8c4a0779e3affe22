//! Lobby state for lobbysync.
//!
//! Each lobby runs as an isolated Tokio task (actor model) that owns its
//! membership, settings, version, and deleted flag.
//!
//! # Key types
//!
//! - [`SessionRegistry`]: finds or lazily loads lobby actors, tracks
//!   session → lobby
//! - [`LobbyHandle`]: send commands to a running lobby actor
//! - [`PresenceCounter`]: participant count derived from membership
//! - [`SettingsCoordinator`]: creator-only, versioned settings changes
//! - [`DeletionCoordinator`]: password-gated, terminal deletion
//! - [`LobbyStore`]: the external persistence seam

#![allow(async_fn_in_trait)]

mod config;
mod deletion;
mod error;
mod lobby;
mod presence;
mod registry;
mod settings;
mod store;

pub use config::LobbyConfig;
pub use deletion::DeletionCoordinator;
pub use error::{LobbyError, StoreError};
pub use lobby::{LobbyHandle, LobbySnapshot};
pub use presence::PresenceCounter;
pub use registry::SessionRegistry;
pub use settings::SettingsCoordinator;
pub use store::{InMemoryLobbyStore, LobbyRecord, LobbyStore};
