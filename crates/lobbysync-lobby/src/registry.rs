//! Session registry: finds or loads the actor for a lobby and tracks
//! which lobby every registered session belongs to.
//!
//! This is the only structure shared across lobbies. Everything
//! lobby-specific lives in the lobby actors; the registry just routes.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use lobbysync_protocol::{Envelope, LobbyId, SessionId};
use lobbysync_session::SessionHandle;

use crate::lobby::{LobbyHandle, LobbySnapshot, spawn_lobby};
use crate::{LobbyConfig, LobbyError, LobbyStore};

/// What the registry knows about a lobby id.
#[derive(Debug, Clone)]
enum Slot {
    Live(LobbyHandle),
    /// Tombstone left by deletion. Never removed.
    Deleted,
}

/// Maps lobby ids to running lobby actors and session ids to lobbies.
#[derive(Debug)]
pub struct SessionRegistry<S: LobbyStore> {
    store: Arc<S>,
    config: LobbyConfig,
    lobbies: DashMap<LobbyId, Slot>,
    /// A session is registered in at most ONE lobby (key invariant).
    sessions: DashMap<SessionId, LobbyId>,
}

impl<S: LobbyStore> SessionRegistry<S> {
    /// Creates an empty registry that loads lobbies from `store`.
    pub fn new(store: Arc<S>, config: LobbyConfig) -> Self {
        Self {
            store,
            config,
            lobbies: DashMap::new(),
            sessions: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &LobbyConfig {
        &self.config
    }

    /// Returns the running actor for a lobby, loading the lobby from the
    /// store on first use.
    ///
    /// # Errors
    /// - [`LobbyError::Gone`]: the lobby was deleted
    /// - [`LobbyError::NotFound`]: the store does not know it
    /// - [`LobbyError::Timeout`]: the store did not answer in time
    pub async fn lobby(&self, lobby_id: &LobbyId) -> Result<LobbyHandle, LobbyError> {
        if let Some(handle) = self.loaded(lobby_id)? {
            return Ok(handle);
        }

        let record = tokio::time::timeout(
            self.config.store_timeout_duration(),
            self.store.fetch(lobby_id),
        )
        .await
        .map_err(|_| LobbyError::Timeout(lobby_id.clone()))?
        .map_err(|e| LobbyError::from_store(lobby_id, e))?;

        // Another task may have loaded the same lobby while we were
        // fetching. Its actor wins; our record is discarded.
        match self.lobbies.entry(lobby_id.clone()) {
            Entry::Occupied(entry) => match entry.get() {
                Slot::Live(handle) => Ok(handle.clone()),
                Slot::Deleted => Err(LobbyError::Gone(lobby_id.clone())),
            },
            Entry::Vacant(entry) => {
                let handle = spawn_lobby(record, self.config.command_channel_size);
                entry.insert(Slot::Live(handle.clone()));
                tracing::info!(%lobby_id, "lobby loaded");
                Ok(handle)
            }
        }
    }

    /// Returns the actor for a lobby that is already loaded.
    ///
    /// # Errors
    /// - [`LobbyError::Gone`]: the lobby was deleted
    /// - [`LobbyError::NotFound`]: nobody has joined it yet
    pub fn live_lobby(&self, lobby_id: &LobbyId) -> Result<LobbyHandle, LobbyError> {
        self.loaded(lobby_id)?
            .ok_or_else(|| LobbyError::NotFound(lobby_id.clone()))
    }

    fn loaded(&self, lobby_id: &LobbyId) -> Result<Option<LobbyHandle>, LobbyError> {
        match self.lobbies.get(lobby_id).as_deref() {
            Some(Slot::Live(handle)) => Ok(Some(handle.clone())),
            Some(Slot::Deleted) => Err(LobbyError::Gone(lobby_id.clone())),
            None => Ok(None),
        }
    }

    /// Adds a session to a lobby and returns the lobby's member count.
    ///
    /// Idempotent for a session already registered in the same lobby.
    ///
    /// # Errors
    /// [`LobbyError::InvariantViolation`] if the session is registered in
    /// a different lobby, plus everything [`lobby`](Self::lobby) returns.
    pub async fn register(
        &self,
        lobby_id: &LobbyId,
        handle: SessionHandle,
    ) -> Result<usize, LobbyError> {
        let session_id = handle.session_id();
        let newly_tracked = match self.sessions.entry(session_id) {
            Entry::Occupied(entry) if entry.get() != lobby_id => {
                let current = entry.get().clone();
                tracing::error!(
                    %session_id,
                    %lobby_id,
                    %current,
                    "session already registered in another lobby"
                );
                return Err(LobbyError::InvariantViolation(format!(
                    "session {session_id} is already in lobby {current}"
                )));
            }
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(lobby_id.clone());
                true
            }
        };

        let result = match self.lobby(lobby_id).await {
            Ok(lobby) => lobby.register(handle).await,
            Err(e) => Err(e),
        };
        if result.is_err() && newly_tracked {
            self.sessions.remove(&session_id);
        }
        result
    }

    /// Removes a session from a lobby. Returns `false` if it was not
    /// registered there, including when the lobby is already gone.
    pub async fn unregister(&self, lobby_id: &LobbyId, session_id: SessionId) -> bool {
        self.sessions
            .remove_if(&session_id, |_, registered| registered == lobby_id);

        let Ok(lobby) = self.live_lobby(lobby_id) else {
            return false;
        };
        match lobby.unregister(session_id).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::debug!(%lobby_id, %session_id, error = %e, "unregister skipped");
                false
            }
        }
    }

    /// Delivers an event to every live session of a lobby except
    /// `exclude`. Returns how many sessions it was queued for.
    pub async fn broadcast(
        &self,
        lobby_id: &LobbyId,
        envelope: Arc<Envelope>,
        exclude: Option<SessionId>,
    ) -> Result<usize, LobbyError> {
        self.live_lobby(lobby_id)?.broadcast(envelope, exclude).await
    }

    /// Current number of live sessions in a lobby.
    pub async fn snapshot_count(&self, lobby_id: &LobbyId) -> Result<usize, LobbyError> {
        Ok(self.snapshot(lobby_id).await?.count)
    }

    pub async fn snapshot(&self, lobby_id: &LobbyId) -> Result<LobbySnapshot, LobbyError> {
        self.live_lobby(lobby_id)?.snapshot().await
    }

    /// Replaces a lobby's slot with a tombstone and forgets its sessions.
    pub(crate) fn tombstone(&self, lobby_id: &LobbyId) {
        self.lobbies.insert(lobby_id.clone(), Slot::Deleted);
        self.sessions.retain(|_, registered| registered != lobby_id);
    }

    /// Returns `true` if the lobby was deleted through this hub.
    pub fn is_deleted(&self, lobby_id: &LobbyId) -> bool {
        matches!(self.lobbies.get(lobby_id).as_deref(), Some(Slot::Deleted))
    }

    /// Closes every session of every lobby with going-away and stops all
    /// lobby actors.
    pub async fn shutdown_all(&self) {
        let handles: Vec<LobbyHandle> = self
            .lobbies
            .iter()
            .filter_map(|slot| match slot.value() {
                Slot::Live(handle) => Some(handle.clone()),
                Slot::Deleted => None,
            })
            .collect();
        self.lobbies.retain(|_, slot| matches!(slot, Slot::Deleted));
        self.sessions.clear();

        for handle in &handles {
            let _ = handle.shutdown().await;
        }
        tracing::info!(lobbies = handles.len(), "all lobbies shut down");
    }

    /// Number of lobbies with a running actor.
    pub fn lobby_count(&self) -> usize {
        self.lobbies
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Live(_)))
            .count()
    }

    /// Number of registered sessions across all lobbies.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
