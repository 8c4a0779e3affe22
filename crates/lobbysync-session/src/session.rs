//! Session types: one authenticated connection to one lobby.
//!
//! A session records:
//! - WHO is connected (`UserId`) and to WHICH lobby (`LobbyId`)
//! - WHERE the lobby delivers events (its outbound queue)
//! - WHAT stage of its lifecycle the connection is in

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use lobbysync_protocol::{LobbyId, SessionId, UserId};

use crate::queue::{self, SessionHandle, SessionInbox};
use crate::SessionError;

/// Counter for generating unique session IDs.
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Lifecycle of a connection, from accept to teardown.
///
/// ```text
/// Connecting → Authenticating → Joined → Active ⇄ Idle → Closing → Closed
///      └──────────────┴────────────┴────────┴───────┴─────────────────┘
///                    (transport failure: straight to Closed)
/// ```
///
/// - **Connecting**: transport accepted, nothing received yet.
/// - **Authenticating**: handshake frame received, token being checked.
/// - **Joined**: registered with the lobby.
/// - **Active**: inbound traffic within the last heartbeat interval.
/// - **Idle**: no inbound traffic for a heartbeat interval.
/// - **Closing**: draining the queue and sending the close frame.
/// - **Closed**: terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Joined,
    Active,
    Idle,
    Closing,
    Closed,
}

impl SessionState {
    /// Returns `true` if moving from `self` to `target` is allowed.
    pub fn can_transition_to(self, target: Self) -> bool {
        use SessionState::*;
        match (self, target) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Connecting, Authenticating)
            | (Authenticating, Joined)
            | (Joined, Active)
            | (Active, Idle)
            | (Idle, Active) => true,
            (Authenticating | Joined | Active | Idle, Closing) => true,
            _ => false,
        }
    }

    /// Returns `true` once the session counts toward presence.
    pub fn is_registered(self) -> bool {
        matches!(self, Self::Joined | Self::Active | Self::Idle)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "Connecting",
            Self::Authenticating => "Authenticating",
            Self::Joined => "Joined",
            Self::Active => "Active",
            Self::Idle => "Idle",
            Self::Closing => "Closing",
            Self::Closed => "Closed",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// A [`SessionState`] plus the instant it was entered.
///
/// Exists before the [`Session`] does: the handler walks it through
/// Connecting and Authenticating, then hands it to the session.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: SessionState,
    since: Instant,
}

impl Lifecycle {
    /// Starts a lifecycle in `Connecting`.
    pub fn new() -> Self {
        Self {
            state: SessionState::Connecting,
            since: Instant::now(),
        }
    }

    /// The current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// When the current state was entered.
    pub fn since(&self) -> Instant {
        self.since
    }

    /// Moves to `target`, returning the previous state.
    ///
    /// Moving to the state the lifecycle is already in is a no-op.
    ///
    /// # Errors
    /// [`SessionError::InvalidTransition`] if the state machine forbids it.
    pub fn advance(
        &mut self,
        target: SessionState,
    ) -> Result<SessionState, SessionError> {
        let from = self.state;
        if from == target {
            return Ok(from);
        }
        if !from.can_transition_to(target) {
            return Err(SessionError::InvalidTransition { from, to: target });
        }
        self.state = target;
        self.since = Instant::now();
        tracing::trace!(%from, to = %target, "session state changed");
        Ok(from)
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One authenticated connection's identity, queue, and lifecycle.
///
/// Owned exclusively by its connection handler. The lobby only ever sees
/// the cloned [`SessionHandle`].
#[derive(Debug)]
pub struct Session {
    session_id: SessionId,
    lobby_id: LobbyId,
    user: UserId,
    joined_at: Instant,
    handle: SessionHandle,
    inbox: SessionInbox,
    lifecycle: Lifecycle,
}

impl Session {
    /// Creates a session with a fresh id and an outbound queue of
    /// `queue_capacity` events.
    pub fn new(
        lobby_id: LobbyId,
        user: UserId,
        queue_capacity: usize,
        lifecycle: Lifecycle,
    ) -> Self {
        let session_id =
            SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed));
        let (handle, inbox) =
            queue::channel(session_id, user.clone(), queue_capacity);
        Self {
            session_id,
            lobby_id,
            user,
            joined_at: Instant::now(),
            handle,
            inbox,
            lifecycle,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn lobby_id(&self) -> &LobbyId {
        &self.lobby_id
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn joined_at(&self) -> Instant {
        self.joined_at
    }

    /// A clone of the sending side, for registering with the lobby.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn inbox(&mut self) -> &mut SessionInbox {
        &mut self.inbox
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle.state()
    }

    /// Advances the session's lifecycle. See [`Lifecycle::advance`].
    pub fn advance(
        &mut self,
        target: SessionState,
    ) -> Result<SessionState, SessionError> {
        self.lifecycle.advance(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =====================================================================
    // SessionState
    // =====================================================================

    #[test]
    fn test_happy_path_transitions_are_allowed() {
        use SessionState::*;
        let path = [
            Connecting,
            Authenticating,
            Joined,
            Active,
            Idle,
            Active,
            Closing,
            Closed,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {} should be allowed",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_any_live_state_can_drop_to_closed() {
        use SessionState::*;
        for state in [Connecting, Authenticating, Joined, Active, Idle, Closing] {
            assert!(state.can_transition_to(Closed), "{state} -> Closed");
        }
    }

    #[test]
    fn test_closed_is_terminal() {
        use SessionState::*;
        for state in [Connecting, Authenticating, Joined, Active, Idle, Closing] {
            assert!(!Closed.can_transition_to(state));
        }
    }

    #[test]
    fn test_skipping_authentication_is_rejected() {
        assert!(
            !SessionState::Connecting.can_transition_to(SessionState::Joined)
        );
        assert!(
            !SessionState::Closing.can_transition_to(SessionState::Active)
        );
    }

    #[test]
    fn test_is_registered() {
        assert!(!SessionState::Authenticating.is_registered());
        assert!(SessionState::Joined.is_registered());
        assert!(SessionState::Idle.is_registered());
        assert!(!SessionState::Closing.is_registered());
    }

    // =====================================================================
    // Lifecycle
    // =====================================================================

    #[test]
    fn test_lifecycle_advance_returns_previous_state() {
        let mut lifecycle = Lifecycle::new();
        let prev = lifecycle.advance(SessionState::Authenticating).unwrap();
        assert_eq!(prev, SessionState::Connecting);
        assert_eq!(lifecycle.state(), SessionState::Authenticating);
    }

    #[test]
    fn test_lifecycle_invalid_advance_keeps_state() {
        let mut lifecycle = Lifecycle::new();
        let result = lifecycle.advance(SessionState::Active);
        assert!(matches!(
            result,
            Err(SessionError::InvalidTransition {
                from: SessionState::Connecting,
                to: SessionState::Active,
            })
        ));
        assert_eq!(lifecycle.state(), SessionState::Connecting);
    }

    #[test]
    fn test_lifecycle_same_state_is_noop() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.advance(SessionState::Closed).unwrap();
        assert!(lifecycle.advance(SessionState::Closed).is_ok());
    }

    // =====================================================================
    // Session
    // =====================================================================

    #[test]
    fn test_new_sessions_get_distinct_ids() {
        let a = Session::new(
            LobbyId::new("L"),
            UserId::new("alice"),
            4,
            Lifecycle::new(),
        );
        let b = Session::new(
            LobbyId::new("L"),
            UserId::new("alice"),
            4,
            Lifecycle::new(),
        );
        assert_ne!(a.session_id(), b.session_id());
        assert_eq!(a.handle().session_id(), a.session_id());
        assert_eq!(a.handle().user(), &UserId::new("alice"));
    }
}
