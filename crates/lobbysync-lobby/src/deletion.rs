//! Deletion coordinator: guarded, terminal teardown of a lobby.

use std::sync::Arc;

use lobbysync_protocol::{LobbyId, UserId};

use crate::{LobbyError, LobbyStore, SessionRegistry};

/// Deletes lobbies.
///
/// Shares each lobby's mutation gate with the
/// [`SettingsCoordinator`](crate::SettingsCoordinator), so a deletion and
/// a settings change of the same lobby never interleave.
#[derive(Debug)]
pub struct DeletionCoordinator<S: LobbyStore> {
    registry: Arc<SessionRegistry<S>>,
}

impl<S: LobbyStore> DeletionCoordinator<S> {
    pub fn new(registry: Arc<SessionRegistry<S>>) -> Self {
        Self { registry }
    }

    /// Deletes a lobby and returns how many sessions were closed.
    ///
    /// The password is checked by the store, never here. On success
    /// every session receives `lobby_deleted` and is closed with
    /// going-away; from then on every operation on the lobby fails with
    /// [`LobbyError::Gone`].
    ///
    /// # Errors
    /// - [`LobbyError::Unauthorized`]: requester is not the creator, or
    ///   the store refused the password
    /// - [`LobbyError::Gone`]: already deleted
    /// - [`LobbyError::Store`] / [`LobbyError::Timeout`]: nothing changed
    pub async fn delete(
        &self,
        lobby_id: &LobbyId,
        requester: &UserId,
        password: &str,
    ) -> Result<usize, LobbyError> {
        let lobby = self.registry.live_lobby(lobby_id)?;
        if requester != lobby.creator() {
            tracing::debug!(%lobby_id, %requester, "deletion by non-creator refused");
            return Err(LobbyError::Unauthorized(
                "only the lobby creator can delete the lobby".into(),
            ));
        }

        let _gate = lobby.lock_mutations().await;
        if lobby.is_deleted() {
            return Err(LobbyError::Gone(lobby_id.clone()));
        }

        let store = self.registry.store();
        tokio::time::timeout(
            self.registry.config().store_timeout_duration(),
            store.delete_with_password(lobby_id, password),
        )
        .await
        .map_err(|_| LobbyError::Timeout(lobby_id.clone()))?
        .map_err(|e| LobbyError::from_store(lobby_id, e))?;

        let closed = lobby.mark_deleted(requester.clone()).await?;
        self.registry.tombstone(lobby_id);
        Ok(closed)
    }
}

impl<S: LobbyStore> Clone for DeletionCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}
