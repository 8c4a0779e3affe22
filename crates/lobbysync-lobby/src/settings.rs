//! Settings coordinator: creator-only, validated, persisted settings
//! changes with a strictly increasing version.

use std::sync::Arc;

use lobbysync_protocol::{LobbyId, LobbySettings, UserId};

use crate::{LobbyError, LobbyStore, SessionRegistry};

/// Applies settings changes to lobbies.
///
/// The order of operations matters:
///
/// ```text
/// creator check → validate → [gate] store write → actor apply + broadcast [/gate]
/// ```
///
/// Holding the lobby's mutation gate across the store write means the
/// store sees writes in the same order the actor assigns versions, so
/// every session observes one strictly increasing version sequence.
#[derive(Debug)]
pub struct SettingsCoordinator<S: LobbyStore> {
    registry: Arc<SessionRegistry<S>>,
}

impl<S: LobbyStore> SettingsCoordinator<S> {
    pub fn new(registry: Arc<SessionRegistry<S>>) -> Self {
        Self { registry }
    }

    /// Changes a lobby's settings and returns the new version.
    ///
    /// On success every session of the lobby, the requester included,
    /// receives the new settings and version.
    ///
    /// # Errors
    /// - [`LobbyError::Unauthorized`]: requester is not the creator
    /// - [`LobbyError::Validation`]: a field is out of range
    /// - [`LobbyError::Gone`]: the lobby was deleted
    /// - [`LobbyError::Store`] / [`LobbyError::Timeout`]: nothing changed
    pub async fn update(
        &self,
        lobby_id: &LobbyId,
        requester: &UserId,
        settings: LobbySettings,
    ) -> Result<u64, LobbyError> {
        let lobby = self.registry.live_lobby(lobby_id)?;
        if requester != lobby.creator() {
            tracing::debug!(%lobby_id, %requester, "settings change by non-creator refused");
            return Err(LobbyError::Unauthorized(
                "only the lobby creator can change settings".into(),
            ));
        }
        settings.validate().map_err(LobbyError::Validation)?;

        let _gate = lobby.lock_mutations().await;
        if lobby.is_deleted() {
            return Err(LobbyError::Gone(lobby_id.clone()));
        }

        let store = self.registry.store();
        tokio::time::timeout(
            self.registry.config().store_timeout_duration(),
            store.write_settings(lobby_id, &settings),
        )
        .await
        .map_err(|_| LobbyError::Timeout(lobby_id.clone()))?
        .map_err(|e| LobbyError::from_store(lobby_id, e))?;

        lobby.apply_settings(settings, requester.clone()).await
    }
}

impl<S: LobbyStore> Clone for SettingsCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}
