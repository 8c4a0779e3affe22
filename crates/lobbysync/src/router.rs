//! Event router: classifies a joined session's inbound frames and
//! dispatches them to the registry or a coordinator.
//!
//! Classification is two-step so that the sender learns *why* a frame
//! was dropped:
//!
//! ```text
//! bytes ──decode_tag──▶ name ──known?──▶ decode ──▶ ClientFrame
//!          │ fail              │ no          │ fail
//!          ▼                   ▼             ▼
//!    malformed_frame     invalid_event  malformed_frame
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use lobbysync_lobby::{LobbyError, LobbyStore};
use lobbysync_protocol::{
    ClientFrame, Codec, Envelope, ErrorKind, LobbyId, LobbySettings,
    ProtocolError, ServerEvent, SessionId, UserId,
};
use lobbysync_session::{Authenticator, Session, SessionHandle};
use lobbysync_transport::CloseCode;
use tokio::task::{JoinError, JoinSet};

use crate::HubError;
use crate::error::lobby_error_kind;
use crate::server::HubState;

/// Creator requests queued behind the one in flight.
const MAX_QUEUED_REQUESTS: usize = 8;

/// What the handler should do after a frame was routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Routed {
    Continue,
    Close(CloseCode, &'static str),
}

/// A request that goes through a coordinator and the lobby store.
enum Request {
    Settings(LobbySettings),
    Delete(String),
}

impl Request {
    fn event(&self) -> &'static str {
        match self {
            Self::Settings(_) => "settings_updated",
            Self::Delete(_) => "lobby_deleted",
        }
    }
}

/// Routes frames for one joined session.
pub(crate) struct EventRouter<S: LobbyStore, A: Authenticator, C: Codec> {
    state: Arc<HubState<S, A, C>>,
    lobby_id: LobbyId,
    session_id: SessionId,
    user: UserId,
    /// The session's own queue, used for error replies so they stay
    /// ordered with everything else the session receives.
    reply: SessionHandle,
    /// Consecutive frames that were malformed or not allowed.
    invalid_streak: u32,
    /// The request currently waiting on the store. At most one, so a
    /// session's requests apply in the order it sent them.
    in_flight: JoinSet<(&'static str, Result<(), LobbyError>)>,
    queued: VecDeque<Request>,
}

impl<S, A, C> EventRouter<S, A, C>
where
    S: LobbyStore,
    A: Authenticator,
    C: Codec,
{
    pub(crate) fn new(state: Arc<HubState<S, A, C>>, session: &Session) -> Self {
        Self {
            state,
            lobby_id: session.lobby_id().clone(),
            session_id: session.session_id(),
            user: session.user().clone(),
            reply: session.handle(),
            invalid_streak: 0,
            in_flight: JoinSet::new(),
            queued: VecDeque::new(),
        }
    }

    /// Whether a settings or delete request is still in flight.
    pub(crate) fn has_pending(&self) -> bool {
        !self.in_flight.is_empty()
    }

    /// Waits for the next in-flight request and reports a failure to the
    /// requester. Cancel-safe.
    pub(crate) async fn settle_next(&mut self) {
        if let Some(done) = self.in_flight.join_next().await {
            self.settled(done);
        }
        if let Some(next) = self.queued.pop_front() {
            self.start(next);
        }
    }

    /// Classifies and dispatches one inbound frame.
    pub(crate) async fn route(&mut self, data: &[u8]) -> Routed {
        let frame = match self.classify(data) {
            Ok(frame) => frame,
            Err(e) => return self.reject(e),
        };
        if let ClientFrame::Handshake { .. } = frame {
            return self.reject(
                ProtocolError::InvalidMessage("handshake already completed".into())
                    .into(),
            );
        }
        self.invalid_streak = 0;

        tracing::debug!(
            lobby_id = %self.lobby_id,
            session_id = %self.session_id,
            event = frame.event_name(),
            "frame received"
        );

        match frame {
            // Presence comes from registry membership only.
            ClientFrame::Handshake { .. } | ClientFrame::Join { .. } | ClientFrame::Leave {} => {}

            ClientFrame::NewNote { hint } => self.forward_note(hint).await,

            ClientFrame::SettingsUpdated { settings } => {
                self.submit(Request::Settings(settings));
            }
            ClientFrame::LobbyDeleted { password } => {
                self.submit(Request::Delete(password));
            }
        }

        Routed::Continue
    }

    fn classify(&self, data: &[u8]) -> Result<ClientFrame, HubError> {
        let name = self.state.codec.decode_tag(data)?;
        if !ClientFrame::is_known_event(&name) {
            return Err(
                ProtocolError::InvalidMessage(format!("unknown event `{name}`")).into()
            );
        }
        Ok(self.state.codec.decode(data)?)
    }

    /// Drops an invalid frame, tells the sender, and decides whether the
    /// connection has misbehaved for too long.
    fn reject(&mut self, err: HubError) -> Routed {
        self.invalid_streak += 1;
        tracing::debug!(
            lobby_id = %self.lobby_id,
            session_id = %self.session_id,
            streak = self.invalid_streak,
            error = %err,
            "invalid frame dropped"
        );
        self.reply_error(err.kind(), err.to_string());

        if self.invalid_streak >= self.state.config.max_invalid_frames.max(1) {
            tracing::info!(
                lobby_id = %self.lobby_id,
                session_id = %self.session_id,
                user = %self.user,
                "too many invalid frames, closing"
            );
            return Routed::Close(CloseCode::PolicyViolation, "too many invalid frames");
        }
        Routed::Continue
    }

    async fn forward_note(&self, hint: Option<String>) {
        let envelope = Arc::new(
            Envelope::new(self.lobby_id.clone(), ServerEvent::NewNote { hint })
                .originated_by(self.user.clone()),
        );
        if let Err(e) = self
            .state
            .registry
            .broadcast(&self.lobby_id, envelope, Some(self.session_id))
            .await
        {
            self.reply_error(lobby_error_kind(&e), e.to_string());
        }
    }

    fn submit(&mut self, request: Request) {
        if self.in_flight.is_empty() {
            self.start(request);
        } else if self.queued.len() < MAX_QUEUED_REQUESTS {
            self.queued.push_back(request);
        } else {
            tracing::info!(
                lobby_id = %self.lobby_id,
                session_id = %self.session_id,
                event = request.event(),
                "too many requests waiting on the store"
            );
            self.reply_error(
                ErrorKind::StoreFailure,
                "too many requests waiting on the lobby store".into(),
            );
        }
    }

    fn start(&mut self, request: Request) {
        let event = request.event();
        let (lobby_id, user) = (self.lobby_id.clone(), self.user.clone());
        match request {
            Request::Settings(settings) => {
                let coordinator = self.state.settings.clone();
                self.in_flight.spawn(async move {
                    let result = coordinator.update(&lobby_id, &user, settings).await;
                    (event, result.map(|_| ()))
                });
            }
            Request::Delete(password) => {
                let coordinator = self.state.deletion.clone();
                self.in_flight.spawn(async move {
                    let result = coordinator.delete(&lobby_id, &user, &password).await;
                    (event, result.map(|_| ()))
                });
            }
        }
    }

    fn settled(&self, done: Result<(&'static str, Result<(), LobbyError>), JoinError>) {
        match done {
            Ok((_, Ok(()))) => {}
            Ok((event, Err(e))) => {
                tracing::debug!(
                    lobby_id = %self.lobby_id,
                    session_id = %self.session_id,
                    user = %self.user,
                    event,
                    error = %e,
                    "request refused"
                );
                self.reply_error(lobby_error_kind(&e), e.to_string());
            }
            Err(e) => {
                tracing::error!(
                    lobby_id = %self.lobby_id,
                    session_id = %self.session_id,
                    error = %e,
                    "coordinator task failed"
                );
                self.reply_error(ErrorKind::Internal, "request failed".into());
            }
        }
    }

    fn reply_error(&self, kind: ErrorKind, message: String) {
        let envelope = Envelope::error(self.lobby_id.clone(), kind, message);
        // A full queue means the session is being shed anyway.
        let _ = self.reply.send(Arc::new(envelope));
    }
}

impl<S: LobbyStore, A: Authenticator, C: Codec> Drop for EventRouter<S, A, C> {
    fn drop(&mut self) {
        // A request the store may already have applied must run to the
        // end even after its session is gone.
        self.in_flight.detach_all();
    }
}
