//! Error types for the lobby layer.

use lobbysync_protocol::LobbyId;

/// Errors returned by a [`LobbyStore`](crate::LobbyStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store has no lobby with this id.
    #[error("lobby not found in store")]
    NotFound,

    /// The store refused the request (wrong password, no password set).
    #[error("store refused the request")]
    Forbidden,

    /// The store answered with something the hub did not expect.
    #[error("store rejected the request: {0}")]
    Rejected(String),

    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Errors that can occur during lobby operations.
#[derive(Debug, thiserror::Error)]
pub enum LobbyError {
    /// The lobby does not exist in the store.
    #[error("lobby {0} not found")]
    NotFound(LobbyId),

    /// The lobby was deleted. Terminal.
    #[error("lobby {0} is gone")]
    Gone(LobbyId),

    /// The requester may not perform this operation.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The requested settings are out of range.
    #[error("invalid settings: {0}")]
    Validation(String),

    /// The lobby store failed; lobby state is unchanged.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The lobby store did not answer within the store timeout.
    #[error("store call for lobby {0} timed out")]
    Timeout(LobbyId),

    /// The lobby actor's command channel is closed.
    #[error("lobby {0} is unavailable")]
    Unavailable(LobbyId),

    /// A session showed up in two lobbies at once.
    #[error("registry invariant violated: {0}")]
    InvariantViolation(String),
}

impl LobbyError {
    /// Maps a store failure for `lobby_id` onto the lobby taxonomy.
    ///
    /// A missing lobby and a refused password are reported as what they
    /// mean to the client; anything else stays a store failure.
    pub fn from_store(lobby_id: &LobbyId, err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound(lobby_id.clone()),
            StoreError::Forbidden => {
                Self::Unauthorized("incorrect password".into())
            }
            other => Self::Store(other),
        }
    }
}
