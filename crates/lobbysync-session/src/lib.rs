//! Session management for lobbysync.
//!
//! This crate covers one connection's identity and lifecycle:
//!
//! 1. **Authentication**: turning a bearer token into a user
//!    ([`Authenticator`] trait, [`StaticAuthenticator`])
//! 2. **Lifecycle**: the connection state machine ([`SessionState`],
//!    [`Lifecycle`])
//! 3. **Outbound queue**: the bounded channel a lobby delivers through
//!    ([`SessionHandle`], [`SessionInbox`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Lobby layer (above)    ← holds SessionHandles, never Sessions
//!     ↕
//! Session layer (this crate)
//!     ↕
//! Protocol layer (below) ← SessionId, UserId, Envelope
//! ```

#![allow(async_fn_in_trait)]

mod auth;
mod error;
mod queue;
mod session;

pub use auth::{Authenticator, StaticAuthenticator};
pub use error::SessionError;
pub use queue::{CloseReason, CloseSignal, SessionHandle, SessionInbox, channel};
pub use session::{Lifecycle, Session, SessionState};
