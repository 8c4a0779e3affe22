//! The bounded outbound queue between a lobby and one session.
//!
//! Each session owns exactly one queue. The lobby keeps a cloned
//! [`SessionHandle`] (the sending side plus a close switch); the
//! connection handler keeps the [`SessionInbox`] (the receiving side).
//! Neither side ever sees the raw transport.
//!
//! ```text
//! lobby actor ──try_send──▶ [ bounded mpsc ] ──recv──▶ handler ──▶ socket
//!             ──close────▶ [ watch<Option<CloseReason>> ] ──▶ handler
//! ```

use std::sync::Arc;

use lobbysync_protocol::{Envelope, SessionId, UserId};
use tokio::sync::{mpsc, watch};

use crate::SessionError;

/// Why the hub asked a session to close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// The lobby was deleted.
    LobbyDeleted,
    /// The same user opened a newer session in the same lobby.
    Superseded,
    /// The outbound queue filled up.
    SlowConsumer,
    /// The hub is shutting down.
    Shutdown,
}

impl CloseReason {
    /// Short text sent as the close frame's reason.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LobbyDeleted => "lobby deleted",
            Self::Superseded => "superseded",
            Self::SlowConsumer => "slow consumer",
            Self::Shutdown => "shutting down",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Creates a queue of the given capacity for one session.
pub fn channel(
    session_id: SessionId,
    user: UserId,
    capacity: usize,
) -> (SessionHandle, SessionInbox) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (close_tx, close_rx) = watch::channel(None);
    let handle = SessionHandle {
        session_id,
        user,
        outbound: tx,
        closer: Arc::new(close_tx),
    };
    let inbox = SessionInbox {
        outbound: rx,
        close: close_rx,
    };
    (handle, inbox)
}

/// The sending side of a session queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session_id: SessionId,
    user: UserId,
    outbound: mpsc::Sender<Arc<Envelope>>,
    closer: Arc<watch::Sender<Option<CloseReason>>>,
}

impl SessionHandle {
    /// Returns the session this handle delivers to.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Returns the user that owns the session.
    pub fn user(&self) -> &UserId {
        &self.user
    }

    /// Enqueues an event without waiting.
    ///
    /// # Errors
    /// - [`SessionError::QueueFull`]: the consumer is behind by a full queue
    /// - [`SessionError::Closed`]: the handler is gone
    pub fn send(&self, envelope: Arc<Envelope>) -> Result<(), SessionError> {
        self.outbound.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                SessionError::QueueFull(self.session_id)
            }
            mpsc::error::TrySendError::Closed(_) => {
                SessionError::Closed(self.session_id)
            }
        })
    }

    /// Asks the handler to close the connection. The first reason wins;
    /// later calls are ignored.
    pub fn close(&self, reason: CloseReason) {
        self.closer.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
    }

    /// Returns the close reason, if one was requested.
    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.closer.borrow()
    }

    /// Returns `true` if the handler dropped its inbox.
    pub fn is_detached(&self) -> bool {
        self.outbound.is_closed()
    }
}

/// The receiving side of a session queue, owned by the handler.
#[derive(Debug)]
pub struct SessionInbox {
    outbound: mpsc::Receiver<Arc<Envelope>>,
    close: watch::Receiver<Option<CloseReason>>,
}

impl SessionInbox {
    /// Waits for the next queued event.
    ///
    /// Cancel-safe: no event is lost if the future is dropped.
    pub async fn recv(&mut self) -> Option<Arc<Envelope>> {
        self.outbound.recv().await
    }

    /// Returns a watcher for close requests that can be awaited
    /// alongside [`recv`](Self::recv).
    pub fn close_signal(&self) -> CloseSignal {
        CloseSignal {
            close: self.close.clone(),
        }
    }

    /// Takes every event that is already queued, without waiting.
    pub fn drain(&mut self) -> Vec<Arc<Envelope>> {
        let mut pending = Vec::new();
        while let Ok(envelope) = self.outbound.try_recv() {
            pending.push(envelope);
        }
        pending
    }
}

/// Resolves when the hub asks a session to close.
#[derive(Debug, Clone)]
pub struct CloseSignal {
    close: watch::Receiver<Option<CloseReason>>,
}

impl CloseSignal {
    /// Waits until a close is requested and returns the reason.
    ///
    /// Cancel-safe: the current value is re-checked on every call.
    pub async fn requested(&mut self) -> CloseReason {
        match self.close.wait_for(Option::is_some).await {
            Ok(reason) => (*reason).unwrap_or(CloseReason::Shutdown),
            // Every handle is gone, so nobody can reach this session.
            Err(_) => CloseReason::Shutdown,
        }
    }

    /// Returns the close reason without waiting, if one was requested.
    pub fn reason(&self) -> Option<CloseReason> {
        *self.close.borrow()
    }
}

#[cfg(test)]
mod tests {
    use lobbysync_protocol::{LobbyId, ServerEvent};

    use super::*;

    fn presence(count: usize) -> Arc<Envelope> {
        Arc::new(Envelope::new(
            LobbyId::new("L"),
            ServerEvent::Presence { count },
        ))
    }

    #[tokio::test]
    async fn test_send_then_recv_preserves_order() {
        let (handle, mut inbox) = channel(SessionId(1), UserId::new("a"), 4);
        handle.send(presence(1)).unwrap();
        handle.send(presence(2)).unwrap();

        let first = inbox.recv().await.unwrap();
        let second = inbox.recv().await.unwrap();
        assert_eq!(first.event, ServerEvent::Presence { count: 1 });
        assert_eq!(second.event, ServerEvent::Presence { count: 2 });
    }

    #[test]
    fn test_send_on_full_queue_returns_queue_full() {
        let (handle, _inbox) = channel(SessionId(1), UserId::new("a"), 1);
        handle.send(presence(1)).unwrap();
        let result = handle.send(presence(2));
        assert!(matches!(result, Err(SessionError::QueueFull(SessionId(1)))));
    }

    #[test]
    fn test_send_after_inbox_dropped_returns_closed() {
        let (handle, inbox) = channel(SessionId(3), UserId::new("a"), 1);
        drop(inbox);
        assert!(handle.is_detached());
        let result = handle.send(presence(1));
        assert!(matches!(result, Err(SessionError::Closed(SessionId(3)))));
    }

    #[tokio::test]
    async fn test_close_first_reason_wins() {
        let (handle, inbox) = channel(SessionId(1), UserId::new("a"), 1);
        handle.close(CloseReason::LobbyDeleted);
        handle.close(CloseReason::SlowConsumer);

        assert_eq!(handle.close_reason(), Some(CloseReason::LobbyDeleted));
        let mut signal = inbox.close_signal();
        assert_eq!(signal.requested().await, CloseReason::LobbyDeleted);
    }

    #[tokio::test]
    async fn test_close_signal_is_repeatable() {
        let (handle, inbox) = channel(SessionId(1), UserId::new("a"), 1);
        let mut signal = inbox.close_signal();
        assert_eq!(signal.reason(), None);
        handle.close(CloseReason::Superseded);
        assert_eq!(signal.requested().await, CloseReason::Superseded);
        assert_eq!(signal.requested().await, CloseReason::Superseded);
    }

    #[test]
    fn test_drain_returns_everything_queued() {
        let (handle, mut inbox) = channel(SessionId(1), UserId::new("a"), 8);
        for n in 0..3 {
            handle.send(presence(n)).unwrap();
        }
        assert_eq!(inbox.drain().len(), 3);
        assert!(inbox.drain().is_empty());
    }
}
