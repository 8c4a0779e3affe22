//! The lobby store seam.
//!
//! Lobby records live in an external service; the hub only reads a lobby
//! once (when it is first joined), writes settings, and asks the store to
//! delete with a password. Passwords never leave the store: the hub passes
//! the client's attempt through and the store says yes or no.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use lobbysync_protocol::{LobbyId, LobbySettings, UserId};

use crate::StoreError;

/// What the hub needs to know about a lobby when it first loads it.
#[derive(Debug, Clone, PartialEq)]
pub struct LobbyRecord {
    pub lobby_id: LobbyId,
    pub name: String,
    /// The only user allowed to change settings or delete the lobby.
    pub creator: UserId,
    /// `None` when the creator never customized them.
    pub settings: Option<LobbySettings>,
    pub has_password: bool,
}

/// Persistence for lobby records.
///
/// `Send + Sync + 'static` because one store is shared by the registry
/// and both coordinators for the lifetime of the hub. Callers bound every
/// call with the configured store timeout, so implementations need not.
pub trait LobbyStore: Send + Sync + 'static {
    /// Loads a lobby record.
    ///
    /// # Returns
    /// - `Err(StoreError::NotFound)`: no such lobby
    fn fetch(
        &self,
        lobby_id: &LobbyId,
    ) -> impl std::future::Future<Output = Result<LobbyRecord, StoreError>> + Send;

    /// Persists new settings for a lobby. Last writer wins.
    fn write_settings(
        &self,
        lobby_id: &LobbyId,
        settings: &LobbySettings,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Deletes a lobby if `password` matches the stored one.
    ///
    /// # Returns
    /// - `Err(StoreError::NotFound)`: no such lobby
    /// - `Err(StoreError::Forbidden)`: wrong password, or the lobby has none
    fn delete_with_password(
        &self,
        lobby_id: &LobbyId,
        password: &str,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;
}

// ---------------------------------------------------------------------------
// InMemoryLobbyStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredLobby {
    name: String,
    creator: UserId,
    settings: Option<LobbySettings>,
    password: Option<String>,
}

/// A [`LobbyStore`] kept in process memory.
///
/// Used for local runs and tests. It can simulate an outage
/// ([`set_unavailable`](Self::set_unavailable)) and a slow backend
/// ([`set_latency`](Self::set_latency)).
#[derive(Debug, Default)]
pub struct InMemoryLobbyStore {
    lobbies: Mutex<HashMap<LobbyId, StoredLobby>>,
    unavailable: AtomicBool,
    latency_ms: AtomicU64,
    writes: AtomicUsize,
}

impl InMemoryLobbyStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a lobby and returns the store, for chained setup.
    pub fn with_lobby(
        self,
        lobby_id: impl Into<String>,
        creator: impl Into<String>,
        password: Option<&str>,
    ) -> Self {
        self.insert(LobbyId::new(lobby_id), UserId::new(creator), password);
        self
    }

    /// Adds or replaces a lobby with default settings.
    pub fn insert(
        &self,
        lobby_id: LobbyId,
        creator: UserId,
        password: Option<&str>,
    ) {
        let stored = StoredLobby {
            name: lobby_id.to_string(),
            creator,
            settings: None,
            password: password.map(str::to_owned),
        };
        self.lock().insert(lobby_id, stored);
    }

    /// Returns `true` if the lobby exists.
    pub fn contains(&self, lobby_id: &LobbyId) -> bool {
        self.lock().contains_key(lobby_id)
    }

    /// Returns the last settings written for a lobby.
    pub fn settings(&self, lobby_id: &LobbyId) -> Option<LobbySettings> {
        self.lock().get(lobby_id).and_then(|l| l.settings)
    }

    /// Number of successful settings writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    /// Makes every call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    async fn simulate(&self) -> Result<(), StoreError> {
        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("store offline".into()));
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<LobbyId, StoredLobby>> {
        self.lobbies.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LobbyStore for InMemoryLobbyStore {
    async fn fetch(&self, lobby_id: &LobbyId) -> Result<LobbyRecord, StoreError> {
        self.simulate().await?;
        let lobbies = self.lock();
        let stored = lobbies.get(lobby_id).ok_or(StoreError::NotFound)?;
        Ok(LobbyRecord {
            lobby_id: lobby_id.clone(),
            name: stored.name.clone(),
            creator: stored.creator.clone(),
            settings: stored.settings,
            has_password: stored.password.is_some(),
        })
    }

    async fn write_settings(
        &self,
        lobby_id: &LobbyId,
        settings: &LobbySettings,
    ) -> Result<(), StoreError> {
        self.simulate().await?;
        let mut lobbies = self.lock();
        let stored = lobbies.get_mut(lobby_id).ok_or(StoreError::NotFound)?;
        stored.settings = Some(*settings);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn delete_with_password(
        &self,
        lobby_id: &LobbyId,
        password: &str,
    ) -> Result<(), StoreError> {
        self.simulate().await?;
        let mut lobbies = self.lock();
        let stored = lobbies.get(lobby_id).ok_or(StoreError::NotFound)?;
        let matches = stored
            .password
            .as_deref()
            .is_some_and(|expected| constant_time_eq(expected, password));
        if !matches {
            return Err(StoreError::Forbidden);
        }
        lobbies.remove(lobby_id);
        Ok(())
    }
}

/// Compares two strings without short-circuiting on the first mismatch.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> InMemoryLobbyStore {
        InMemoryLobbyStore::new().with_lobby("L", "alice", Some("pw"))
    }

    #[tokio::test]
    async fn test_fetch_known_lobby_returns_record() {
        let record = store().fetch(&LobbyId::new("L")).await.unwrap();
        assert_eq!(record.creator, UserId::new("alice"));
        assert!(record.has_password);
        assert_eq!(record.settings, None);
    }

    #[tokio::test]
    async fn test_fetch_unknown_lobby_returns_not_found() {
        let result = store().fetch(&LobbyId::new("nope")).await;
        assert!(matches!(result, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn test_write_settings_is_visible_to_fetch() {
        let store = store();
        let id = LobbyId::new("L");
        let settings = LobbySettings {
            num_concepts_class: 20,
            ..LobbySettings::default()
        };
        store.write_settings(&id, &settings).await.unwrap();
        assert_eq!(store.fetch(&id).await.unwrap().settings, Some(settings));
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_delete_with_wrong_password_is_forbidden() {
        let store = store();
        let id = LobbyId::new("L");
        let result = store.delete_with_password(&id, "guess").await;
        assert!(matches!(result, Err(StoreError::Forbidden)));
        assert!(store.contains(&id));
    }

    #[tokio::test]
    async fn test_delete_without_stored_password_is_forbidden() {
        let store = InMemoryLobbyStore::new().with_lobby("L", "alice", None);
        let result = store.delete_with_password(&LobbyId::new("L"), "").await;
        assert!(matches!(result, Err(StoreError::Forbidden)));
    }

    #[tokio::test]
    async fn test_delete_with_password_removes_lobby() {
        let store = store();
        let id = LobbyId::new("L");
        store.delete_with_password(&id, "pw").await.unwrap();
        assert!(!store.contains(&id));
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = store();
        store.set_unavailable(true);
        let result = store.fetch(&LobbyId::new("L")).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("secret", "secret"));
        assert!(!constant_time_eq("secret", "secreT"));
        assert!(!constant_time_eq("secret", "secre"));
        assert!(!constant_time_eq("", "a"));
    }
}
