//! Presence: the participant count of a lobby.
//!
//! There is no counter to keep in sync. The count is the size of the
//! lobby actor's membership, read on demand and broadcast as an absolute
//! value after every register, unregister, shed, or supersede.

use std::sync::Arc;

use lobbysync_protocol::{Envelope, LobbyId, ServerEvent};

use crate::{LobbyError, LobbyStore, SessionRegistry};

/// The presence broadcast for a lobby with `count` live sessions.
pub(crate) fn presence_envelope(lobby_id: &LobbyId, count: usize) -> Arc<Envelope> {
    Arc::new(Envelope::new(lobby_id.clone(), ServerEvent::Presence { count }))
}

/// Read side of presence, backed by the registry.
#[derive(Debug)]
pub struct PresenceCounter<S: LobbyStore> {
    registry: Arc<SessionRegistry<S>>,
}

impl<S: LobbyStore> PresenceCounter<S> {
    pub fn new(registry: Arc<SessionRegistry<S>>) -> Self {
        Self { registry }
    }

    /// Current number of live sessions in the lobby.
    pub async fn count(&self, lobby_id: &LobbyId) -> Result<usize, LobbyError> {
        self.registry.snapshot_count(lobby_id).await
    }

    /// Re-sends the current count to every session of the lobby and
    /// returns it.
    pub async fn publish(&self, lobby_id: &LobbyId) -> Result<usize, LobbyError> {
        let count = self.count(lobby_id).await?;
        self.registry
            .broadcast(lobby_id, presence_envelope(lobby_id, count), None)
            .await?;
        Ok(count)
    }
}

impl<S: LobbyStore> Clone for PresenceCounter<S> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}
