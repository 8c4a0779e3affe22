//! Lobby actor: an isolated Tokio task that owns one lobby's live state.
//!
//! Each lobby runs in its own task, fed by a bounded command channel.
//! Every mutation of membership, settings, and the deleted flag happens
//! inside that task, so they are totally ordered per lobby while
//! different lobbies run in parallel.
//!
//! Store calls never run here. The coordinators talk to the store first,
//! holding the lobby's mutation gate, and only then ask the actor to
//! apply the outcome.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use lobbysync_protocol::{
    Envelope, LobbyId, LobbySettings, ServerEvent, SessionId, UserId,
};
use lobbysync_session::{CloseReason, SessionError, SessionHandle};
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc, oneshot};

use crate::presence::presence_envelope;
use crate::{LobbyError, LobbyRecord};

/// Commands sent to a lobby actor through its channel.
///
/// Variants carrying a `oneshot::Sender` expect a reply.
pub(crate) enum LobbyCommand {
    Register {
        handle: SessionHandle,
        reply: oneshot::Sender<Result<usize, LobbyError>>,
    },

    Unregister {
        session_id: SessionId,
        reply: oneshot::Sender<bool>,
    },

    Broadcast {
        envelope: Arc<Envelope>,
        exclude: Option<SessionId>,
        reply: oneshot::Sender<Result<usize, LobbyError>>,
    },

    Snapshot {
        reply: oneshot::Sender<LobbySnapshot>,
    },

    ApplySettings {
        settings: LobbySettings,
        originator: UserId,
        reply: oneshot::Sender<Result<u64, LobbyError>>,
    },

    MarkDeleted {
        deleted_by: UserId,
        reply: oneshot::Sender<Result<usize, LobbyError>>,
    },

    Shutdown,
}

/// Point-in-time view of a lobby.
#[derive(Debug, Clone, PartialEq)]
pub struct LobbySnapshot {
    pub lobby_id: LobbyId,
    pub creator: UserId,
    pub settings: LobbySettings,
    pub version: u64,
    pub count: usize,
    pub deleted: bool,
}

/// Handle to a running lobby actor. Cheap to clone.
///
/// Besides the command channel it carries the lobby's mutation gate,
/// which the settings and deletion coordinators hold across their store
/// calls.
#[derive(Debug, Clone)]
pub struct LobbyHandle {
    lobby_id: LobbyId,
    creator: UserId,
    sender: mpsc::Sender<LobbyCommand>,
    gate: Arc<Mutex<()>>,
    deleted: Arc<AtomicBool>,
}

impl std::fmt::Debug for LobbyCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Register { .. } => "Register",
            Self::Unregister { .. } => "Unregister",
            Self::Broadcast { .. } => "Broadcast",
            Self::Snapshot { .. } => "Snapshot",
            Self::ApplySettings { .. } => "ApplySettings",
            Self::MarkDeleted { .. } => "MarkDeleted",
            Self::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}

impl LobbyHandle {
    pub fn lobby_id(&self) -> &LobbyId {
        &self.lobby_id
    }

    /// The lobby's creator, fixed for the lobby's lifetime.
    pub fn creator(&self) -> &UserId {
        &self.creator
    }

    /// Returns `true` once the lobby has been marked deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    /// Waits for exclusive access to the lobby's store-backed mutations.
    pub async fn lock_mutations(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.gate).lock_owned().await
    }

    /// Adds a session and returns the new member count.
    ///
    /// Idempotent for a session id that is already a member.
    pub async fn register(&self, handle: SessionHandle) -> Result<usize, LobbyError> {
        let (reply, rx) = oneshot::channel();
        self.send(LobbyCommand::Register { handle, reply }).await?;
        rx.await.map_err(|_| self.unavailable())?
    }

    /// Removes a session. Returns `false` if it was not a member.
    pub async fn unregister(&self, session_id: SessionId) -> Result<bool, LobbyError> {
        let (reply, rx) = oneshot::channel();
        self.send(LobbyCommand::Unregister { session_id, reply })
            .await?;
        rx.await.map_err(|_| self.unavailable())
    }

    /// Delivers an event to every member except `exclude`. Returns how
    /// many sessions it was queued for.
    pub async fn broadcast(
        &self,
        envelope: Arc<Envelope>,
        exclude: Option<SessionId>,
    ) -> Result<usize, LobbyError> {
        let (reply, rx) = oneshot::channel();
        self.send(LobbyCommand::Broadcast {
            envelope,
            exclude,
            reply,
        })
        .await?;
        rx.await.map_err(|_| self.unavailable())?
    }

    pub async fn snapshot(&self) -> Result<LobbySnapshot, LobbyError> {
        let (reply, rx) = oneshot::channel();
        self.send(LobbyCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| self.unavailable())
    }

    /// Installs settings that the store already accepted and returns the
    /// new version.
    pub(crate) async fn apply_settings(
        &self,
        settings: LobbySettings,
        originator: UserId,
    ) -> Result<u64, LobbyError> {
        let (reply, rx) = oneshot::channel();
        self.send(LobbyCommand::ApplySettings {
            settings,
            originator,
            reply,
        })
        .await?;
        rx.await.map_err(|_| self.unavailable())?
    }

    /// Marks the lobby deleted, notifies and closes every member, and
    /// stops the actor. Returns how many sessions were closed.
    pub(crate) async fn mark_deleted(
        &self,
        deleted_by: UserId,
    ) -> Result<usize, LobbyError> {
        let (reply, rx) = oneshot::channel();
        self.send(LobbyCommand::MarkDeleted { deleted_by, reply })
            .await?;
        rx.await.map_err(|_| self.unavailable())?
    }

    /// Closes every member with going-away and stops the actor.
    pub async fn shutdown(&self) -> Result<(), LobbyError> {
        self.send(LobbyCommand::Shutdown).await
    }

    async fn send(&self, cmd: LobbyCommand) -> Result<(), LobbyError> {
        self.sender.send(cmd).await.map_err(|_| self.unavailable())
    }

    /// The error for a dead actor: Gone if it died because of deletion.
    fn unavailable(&self) -> LobbyError {
        if self.is_deleted() {
            LobbyError::Gone(self.lobby_id.clone())
        } else {
            LobbyError::Unavailable(self.lobby_id.clone())
        }
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct LobbyActor {
    lobby_id: LobbyId,
    creator: UserId,
    settings: LobbySettings,
    version: u64,
    deleted: Arc<AtomicBool>,
    /// Ordered by session id so fan-out order is stable.
    members: BTreeMap<SessionId, SessionHandle>,
    receiver: mpsc::Receiver<LobbyCommand>,
}

impl LobbyActor {
    async fn run(mut self) {
        tracing::info!(lobby_id = %self.lobby_id, "lobby actor started");

        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                LobbyCommand::Register { handle, reply } => {
                    let _ = reply.send(self.handle_register(handle));
                }
                LobbyCommand::Unregister { session_id, reply } => {
                    let _ = reply.send(self.depart(session_id));
                }
                LobbyCommand::Broadcast {
                    envelope,
                    exclude,
                    reply,
                } => {
                    let _ = reply.send(Ok(self.fan_out(envelope, exclude)));
                }
                LobbyCommand::Snapshot { reply } => {
                    let _ = reply.send(self.snapshot());
                }
                LobbyCommand::ApplySettings {
                    settings,
                    originator,
                    reply,
                } => {
                    let _ = reply.send(Ok(self.handle_settings(settings, originator)));
                }
                LobbyCommand::MarkDeleted { deleted_by, reply } => {
                    let closed = self.handle_deleted(deleted_by);
                    let _ = reply.send(Ok(closed));
                    break;
                }
                LobbyCommand::Shutdown => {
                    tracing::info!(lobby_id = %self.lobby_id, "lobby shutting down");
                    for handle in self.members.values() {
                        handle.close(CloseReason::Shutdown);
                    }
                    self.members.clear();
                    break;
                }
            }
        }

        tracing::info!(lobby_id = %self.lobby_id, "lobby actor stopped");
    }

    fn handle_register(&mut self, handle: SessionHandle) -> Result<usize, LobbyError> {
        let session_id = handle.session_id();
        if self.members.contains_key(&session_id) {
            return Ok(self.members.len());
        }

        // One connection per (user, lobby): the newer one wins.
        let stale: Vec<SessionId> = self
            .members
            .iter()
            .filter(|(_, member)| member.user() == handle.user())
            .map(|(id, _)| *id)
            .collect();
        for old in stale {
            if let Some(member) = self.members.get(&old) {
                member.close(CloseReason::Superseded);
            }
            tracing::info!(
                lobby_id = %self.lobby_id,
                session_id = %old,
                user = %handle.user(),
                "session superseded"
            );
            self.depart(old);
        }

        let user = handle.user().clone();
        self.members.insert(session_id, handle);
        let count = self.members.len();
        tracing::info!(
            lobby_id = %self.lobby_id,
            %session_id,
            %user,
            count,
            "session joined"
        );

        let welcome = self.envelope(ServerEvent::Welcome {
            session_id,
            user: user.clone(),
            creator: self.creator.clone(),
            settings: self.settings,
            version: self.version,
            count,
        });
        self.send_to(session_id, welcome);

        let joined = Arc::new(
            Envelope::new(
                self.lobby_id.clone(),
                ServerEvent::Join {
                    session_id,
                    user: user.clone(),
                },
            )
            .originated_by(user),
        );
        self.fan_out(joined, Some(session_id));
        self.fan_out(presence_envelope(&self.lobby_id, count), None);

        Ok(count)
    }

    /// Removes a member and tells the rest. Returns `false` if it was not
    /// a member.
    fn depart(&mut self, session_id: SessionId) -> bool {
        let Some(handle) = self.members.remove(&session_id) else {
            return false;
        };
        let user = handle.user().clone();
        let count = self.members.len();
        tracing::info!(
            lobby_id = %self.lobby_id,
            %session_id,
            %user,
            count,
            "session left"
        );

        let left = Arc::new(
            Envelope::new(
                self.lobby_id.clone(),
                ServerEvent::Leave {
                    session_id,
                    user: user.clone(),
                },
            )
            .originated_by(user),
        );
        self.fan_out(left, None);
        // Recompute: the fan-out above may have shed more members.
        let count = self.members.len();
        self.fan_out(presence_envelope(&self.lobby_id, count), None);
        true
    }

    /// Queues an event for every member except `exclude`, without
    /// waiting. Members whose queue is full are shed; members whose
    /// handler is gone are dropped.
    fn fan_out(&mut self, envelope: Arc<Envelope>, exclude: Option<SessionId>) -> usize {
        let mut delivered = 0;
        let mut dropped = Vec::new();

        for (session_id, handle) in &self.members {
            if exclude == Some(*session_id) {
                continue;
            }
            match handle.send(Arc::clone(&envelope)) {
                Ok(()) => delivered += 1,
                Err(SessionError::QueueFull(_)) => {
                    tracing::warn!(
                        lobby_id = %self.lobby_id,
                        %session_id,
                        user = %handle.user(),
                        "outbound queue full, shedding slow consumer"
                    );
                    handle.close(CloseReason::SlowConsumer);
                    dropped.push(*session_id);
                }
                Err(_) => dropped.push(*session_id),
            }
        }

        for session_id in dropped {
            self.depart(session_id);
        }
        delivered
    }

    fn send_to(&mut self, session_id: SessionId, envelope: Arc<Envelope>) {
        let Some(handle) = self.members.get(&session_id) else {
            return;
        };
        match handle.send(envelope) {
            Ok(()) => {}
            Err(SessionError::QueueFull(_)) => {
                handle.close(CloseReason::SlowConsumer);
                self.depart(session_id);
            }
            Err(_) => {
                self.depart(session_id);
            }
        }
    }

    fn handle_settings(&mut self, settings: LobbySettings, originator: UserId) -> u64 {
        self.settings = settings;
        self.version += 1;
        tracing::info!(
            lobby_id = %self.lobby_id,
            version = self.version,
            updated_by = %originator,
            "settings updated"
        );
        let event = ServerEvent::SettingsUpdated {
            settings,
            version: self.version,
        };
        let envelope =
            Arc::new(Envelope::new(self.lobby_id.clone(), event).originated_by(originator));
        self.fan_out(envelope, None);
        self.version
    }

    fn handle_deleted(&mut self, deleted_by: UserId) -> usize {
        self.deleted.store(true, Ordering::Release);
        let notice = Arc::new(
            Envelope::new(
                self.lobby_id.clone(),
                ServerEvent::LobbyDeleted {
                    deleted_by: deleted_by.clone(),
                },
            )
            .originated_by(deleted_by.clone()),
        );

        // No shedding here: every member is about to be closed anyway.
        let members = std::mem::take(&mut self.members);
        for handle in members.values() {
            let _ = handle.send(Arc::clone(&notice));
            handle.close(CloseReason::LobbyDeleted);
        }
        tracing::info!(
            lobby_id = %self.lobby_id,
            %deleted_by,
            closed = members.len(),
            "lobby deleted"
        );
        members.len()
    }

    fn snapshot(&self) -> LobbySnapshot {
        LobbySnapshot {
            lobby_id: self.lobby_id.clone(),
            creator: self.creator.clone(),
            settings: self.settings,
            version: self.version,
            count: self.members.len(),
            deleted: self.deleted.load(Ordering::Acquire),
        }
    }

    fn envelope(&self, event: ServerEvent) -> Arc<Envelope> {
        Arc::new(Envelope::new(self.lobby_id.clone(), event))
    }
}

/// Spawns a lobby actor for a freshly loaded record.
///
/// `channel_size` bounds the command channel; callers wait when it is
/// full.
pub(crate) fn spawn_lobby(record: LobbyRecord, channel_size: usize) -> LobbyHandle {
    let (tx, rx) = mpsc::channel(channel_size.max(1));
    let deleted = Arc::new(AtomicBool::new(false));

    let actor = LobbyActor {
        lobby_id: record.lobby_id.clone(),
        creator: record.creator.clone(),
        settings: record.settings.unwrap_or_default(),
        version: 0,
        deleted: Arc::clone(&deleted),
        members: BTreeMap::new(),
        receiver: rx,
    };

    tokio::spawn(actor.run());

    LobbyHandle {
        lobby_id: record.lobby_id,
        creator: record.creator,
        sender: tx,
        gate: Arc::new(Mutex::new(())),
        deleted,
    }
}

#[cfg(test)]
mod tests {
    use lobbysync_session::channel;

    use super::*;

    fn record(creator: &str) -> LobbyRecord {
        LobbyRecord {
            lobby_id: LobbyId::new("L"),
            name: "Lobby".into(),
            creator: UserId::new(creator),
            settings: None,
            has_password: true,
        }
    }

    fn session(id: u64, user: &str) -> (SessionHandle, lobbysync_session::SessionInbox) {
        channel(SessionId(id), UserId::new(user), 16)
    }

    #[tokio::test]
    async fn test_register_sends_welcome_then_presence() {
        let lobby = spawn_lobby(record("alice"), 8);
        let (handle, mut inbox) = session(1, "alice");

        assert_eq!(lobby.register(handle).await.unwrap(), 1);

        let welcome = inbox.recv().await.unwrap();
        assert!(matches!(
            &welcome.event,
            ServerEvent::Welcome { count: 1, version: 0, creator, .. }
                if creator == &UserId::new("alice")
        ));
        let presence = inbox.recv().await.unwrap();
        assert_eq!(presence.event, ServerEvent::Presence { count: 1 });
    }

    #[tokio::test]
    async fn test_register_same_session_twice_is_idempotent() {
        let lobby = spawn_lobby(record("alice"), 8);
        let (handle, mut inbox) = session(1, "alice");

        assert_eq!(lobby.register(handle.clone()).await.unwrap(), 1);
        assert_eq!(lobby.register(handle).await.unwrap(), 1);
        // Welcome + presence from the first registration only.
        assert_eq!(inbox.drain().len(), 2);
    }

    #[tokio::test]
    async fn test_second_session_of_same_user_supersedes_first() {
        let lobby = spawn_lobby(record("alice"), 8);
        let (old, _old_inbox) = session(1, "bob");
        let (new, _new_inbox) = session(2, "bob");

        lobby.register(old.clone()).await.unwrap();
        assert_eq!(lobby.register(new).await.unwrap(), 1);
        assert_eq!(old.close_reason(), Some(CloseReason::Superseded));
    }

    #[tokio::test]
    async fn test_unregister_unknown_session_is_noop() {
        let lobby = spawn_lobby(record("alice"), 8);
        assert!(!lobby.unregister(SessionId(99)).await.unwrap());
    }

    #[tokio::test]
    async fn test_broadcast_excludes_originator() {
        let lobby = spawn_lobby(record("alice"), 8);
        let (a, mut a_inbox) = session(1, "alice");
        let (b, mut b_inbox) = session(2, "bob");
        lobby.register(a).await.unwrap();
        lobby.register(b).await.unwrap();
        a_inbox.drain();
        b_inbox.drain();

        let note = Arc::new(Envelope::new(
            LobbyId::new("L"),
            ServerEvent::NewNote { hint: None },
        ));
        let delivered = lobby.broadcast(note, Some(SessionId(1))).await.unwrap();

        assert_eq!(delivered, 1);
        assert!(a_inbox.drain().is_empty());
        assert_eq!(b_inbox.drain().len(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_sheds_member() {
        let lobby = spawn_lobby(record("alice"), 8);
        let (fast, mut fast_inbox) = session(1, "alice");
        // Room for welcome + presence, nothing more.
        let (slow, _slow_inbox) = channel(SessionId(2), UserId::new("bob"), 2);
        lobby.register(fast).await.unwrap();
        lobby.register(slow.clone()).await.unwrap();
        fast_inbox.drain();

        let note = Arc::new(Envelope::new(
            LobbyId::new("L"),
            ServerEvent::NewNote { hint: None },
        ));
        lobby.broadcast(note, None).await.unwrap();

        assert_eq!(slow.close_reason(), Some(CloseReason::SlowConsumer));
        assert_eq!(lobby.snapshot().await.unwrap().count, 1);
        let events: Vec<_> = fast_inbox.drain().into_iter().map(|e| e.event.clone()).collect();
        assert!(events.contains(&ServerEvent::Presence { count: 1 }));
    }

    #[tokio::test]
    async fn test_mark_deleted_closes_members_and_fences_lobby() {
        let lobby = spawn_lobby(record("alice"), 8);
        let (a, mut a_inbox) = session(1, "alice");
        lobby.register(a.clone()).await.unwrap();
        a_inbox.drain();

        let closed = lobby.mark_deleted(UserId::new("alice")).await.unwrap();

        assert_eq!(closed, 1);
        assert!(lobby.is_deleted());
        assert_eq!(a.close_reason(), Some(CloseReason::LobbyDeleted));
        let notice = a_inbox.recv().await.unwrap();
        assert!(matches!(notice.event, ServerEvent::LobbyDeleted { .. }));

        let (b, _b_inbox) = session(2, "bob");
        let result = lobby.register(b).await;
        assert!(matches!(result, Err(LobbyError::Gone(_))));
    }
}
