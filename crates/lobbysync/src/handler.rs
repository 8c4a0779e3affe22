//! Per-connection handler: handshake, registration, and the session loop.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Receive Handshake → validate version
//!   2. Authenticate token → get UserId
//!   3. Register with the lobby → Welcome arrives through the queue
//!   4. Loop: inbound frames, outbound queue, close requests, heartbeat
//!   5. Close: drain the queue, send the close frame, unregister

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use lobbysync_lobby::{LobbyStore, SessionRegistry};
use lobbysync_protocol::{
    ClientFrame, Codec, Envelope, LobbyId, PROTOCOL_VERSION, ProtocolError,
    SessionId, UserId,
};
use lobbysync_session::{
    Authenticator, CloseReason, Lifecycle, Session, SessionState,
};
use lobbysync_transport::{
    CloseCode, Connection, Inbound, TransportError, WebSocketConnection,
};
use tokio::time::{Instant, MissedTickBehavior};

use crate::HubError;
use crate::router::{EventRouter, Routed};
use crate::server::HubState;

/// Upper bound on flushing the queue and sending the close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Pings remembered while waiting for their pongs.
const MAX_OUTSTANDING_PINGS: usize = 4;

/// Drop guard that unregisters the session when the handler exits.
///
/// Cleanup happens even if the handler panics. `Drop` is synchronous, so
/// the unregister runs as a fire-and-forget task.
struct SessionGuard<S: LobbyStore> {
    registry: Arc<SessionRegistry<S>>,
    lobby_id: LobbyId,
    session_id: SessionId,
}

impl<S: LobbyStore> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        // No runtime means the whole hub is being torn down.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let registry = Arc::clone(&self.registry);
        let lobby_id = self.lobby_id.clone();
        let session_id = self.session_id;
        runtime.spawn(async move {
            registry.unregister(&lobby_id, session_id).await;
        });
    }
}

/// Why the session loop ended.
enum Exit {
    /// The peer closed or the transport failed. Nothing more can be sent.
    Disconnected,
    /// The hub closes the connection with this code and reason.
    Close(CloseCode, String),
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<S, A, C>(
    conn: WebSocketConnection,
    state: Arc<HubState<S, A, C>>,
) -> Result<(), HubError>
where
    S: LobbyStore,
    A: Authenticator,
    C: Codec,
{
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling new connection");

    // --- Step 1: Handshake ---
    let mut lifecycle = Lifecycle::new();
    let (lobby_id, user) =
        perform_handshake(&conn, &state, &mut lifecycle).await?;

    tracing::info!(%conn_id, %lobby_id, %user, "client authenticated");

    // --- Step 2: Registration ---
    let mut session = Session::new(
        lobby_id.clone(),
        user.clone(),
        state.config.lobby.outbound_queue_capacity,
        lifecycle,
    );
    let session_id = session.session_id();

    if let Err(e) = state.registry.register(&lobby_id, session.handle()).await
    {
        let err = HubError::from(e);
        tracing::info!(
            %conn_id, %lobby_id, %user, error = %err,
            "registration refused"
        );
        reject(&conn, &state.codec, Some(&lobby_id), &err).await;
        let _ = session.advance(SessionState::Closed);
        return Err(err);
    }
    let _guard = SessionGuard {
        registry: Arc::clone(&state.registry),
        lobby_id: lobby_id.clone(),
        session_id,
    };
    session.advance(SessionState::Joined)?;
    tracing::info!(%conn_id, %lobby_id, %session_id, %user, "session joined");
    session.advance(SessionState::Active)?;

    // --- Step 3: Session loop ---
    let exit = run_session(&conn, &state, &mut session).await;

    // --- Step 4: Close ---
    close_session(&conn, &state, &mut session, exit).await;

    // _guard drops here → unregister fires.
    Ok(())
}

/// Receives the handshake, checks the version, and authenticates.
///
/// On failure the client gets an `error` event and a close frame before
/// the error is returned.
async fn perform_handshake<S, A, C>(
    conn: &WebSocketConnection,
    state: &Arc<HubState<S, A, C>>,
    lifecycle: &mut Lifecycle,
) -> Result<(LobbyId, UserId), HubError>
where
    S: LobbyStore,
    A: Authenticator,
    C: Codec,
{
    let mut claimed = None;
    match read_handshake(conn, state, lifecycle, &mut claimed).await {
        Ok(joined) => Ok(joined),
        Err(e) => {
            tracing::info!(
                conn_id = %conn.id(),
                lobby_id = ?claimed.as_ref().map(LobbyId::as_str),
                error = %e,
                "handshake failed"
            );
            if !matches!(e, HubError::Transport(_)) {
                reject(conn, &state.codec, claimed.as_ref(), &e).await;
            }
            let _ = lifecycle.advance(SessionState::Closed);
            Err(e)
        }
    }
}

async fn read_handshake<S, A, C>(
    conn: &WebSocketConnection,
    state: &Arc<HubState<S, A, C>>,
    lifecycle: &mut Lifecycle,
    claimed: &mut Option<LobbyId>,
) -> Result<(LobbyId, UserId), HubError>
where
    S: LobbyStore,
    A: Authenticator,
    C: Codec,
{
    let data = match tokio::time::timeout(
        state.config.handshake_timeout(),
        recv_data(conn),
    )
    .await
    {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            return Err(TransportError::ConnectionClosed(
                "closed before handshake".into(),
            )
            .into());
        }
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => return Err(HubError::HandshakeTimeout),
    };
    lifecycle.advance(SessionState::Authenticating)?;

    let frame: ClientFrame = state.codec.decode(&data)?;
    let ClientFrame::Handshake { version, token, lobby_id } = frame else {
        return Err(ProtocolError::InvalidMessage(format!(
            "expected handshake, got {}",
            frame.event_name()
        ))
        .into());
    };
    *claimed = Some(lobby_id.clone());

    if version != PROTOCOL_VERSION {
        return Err(HubError::VersionMismatch {
            expected: PROTOCOL_VERSION,
            got: version,
        });
    }

    let user = state.auth.authenticate(&token).await?;
    Ok((lobby_id, user))
}

/// Runs until the peer leaves, the hub asks the session to close, or the
/// heartbeat gives up.
async fn run_session<S, A, C>(
    conn: &WebSocketConnection,
    state: &Arc<HubState<S, A, C>>,
    session: &mut Session,
) -> Exit
where
    S: LobbyStore,
    A: Authenticator,
    C: Codec,
{
    let heartbeat = &state.config.heartbeat;
    let interval = heartbeat.interval();
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut last_alive = Instant::now();
    let mut last_data = Instant::now();
    let mut pending_pings: VecDeque<Vec<u8>> =
        VecDeque::with_capacity(MAX_OUTSTANDING_PINGS);

    let mut close_signal = session.inbox().close_signal();
    let mut router = EventRouter::new(Arc::clone(state), session);
    let session_id = session.session_id();

    loop {
        tokio::select! {
            biased;

            reason = close_signal.requested() => {
                tracing::debug!(%session_id, reason = reason.as_str(), "close requested");
                return Exit::Close(close_code_for(reason), reason.as_str().to_string());
            }

            inbound = conn.recv() => match inbound {
                Ok(Some(Inbound::Data(data))) => {
                    let now = Instant::now();
                    last_alive = now;
                    last_data = now;
                    if session.state() == SessionState::Idle {
                        let _ = session.advance(SessionState::Active);
                    }
                    if let Routed::Close(code, reason) = router.route(&data).await {
                        return Exit::Close(code, reason.to_string());
                    }
                }
                Ok(Some(Inbound::Pong(payload))) => {
                    // Unsolicited pongs don't prove anything.
                    if let Some(pos) = pending_pings.iter().position(|n| *n == payload) {
                        pending_pings.drain(..=pos);
                        last_alive = Instant::now();
                    }
                }
                Ok(None) => {
                    tracing::info!(%session_id, "connection closed by peer");
                    return Exit::Disconnected;
                }
                Err(e) => {
                    tracing::debug!(%session_id, error = %e, "recv error");
                    return Exit::Disconnected;
                }
            },

            Some(envelope) = session.inbox().recv() => {
                if let Err(e) = send_envelope(conn, &state.codec, &envelope, heartbeat.timeout()).await {
                    tracing::debug!(%session_id, error = %e, "send failed");
                    return Exit::Disconnected;
                }
            }

            () = router.settle_next(), if router.has_pending() => {}

            _ = ticker.tick() => {
                if last_alive.elapsed() >= heartbeat.timeout() {
                    tracing::info!(%session_id, "heartbeat missed, dropping session");
                    return Exit::Close(CloseCode::GoingAway, "heartbeat timeout".into());
                }
                if session.state() == SessionState::Active && last_data.elapsed() >= interval {
                    let _ = session.advance(SessionState::Idle);
                }

                let nonce = rand::random::<u64>().to_be_bytes().to_vec();
                if pending_pings.len() == MAX_OUTSTANDING_PINGS {
                    pending_pings.pop_front();
                }
                pending_pings.push_back(nonce.clone());
                if let Err(e) = conn.ping(&nonce).await {
                    tracing::debug!(%session_id, error = %e, "ping failed");
                    return Exit::Disconnected;
                }
            }
        }
    }
}

/// Flushes what is already queued, then sends the close frame.
async fn close_session<S, A, C>(
    conn: &WebSocketConnection,
    state: &Arc<HubState<S, A, C>>,
    session: &mut Session,
    exit: Exit,
) where
    S: LobbyStore,
    A: Authenticator,
    C: Codec,
{
    let session_id = session.session_id();

    if let Exit::Close(code, reason) = exit {
        let _ = session.advance(SessionState::Closing);
        let closing = async {
            for envelope in session.inbox().drain() {
                if send_envelope(conn, &state.codec, &envelope, CLOSE_GRACE)
                    .await
                    .is_err()
                {
                    return;
                }
            }
            if let Err(e) = conn.close(code, &reason).await {
                tracing::debug!(%session_id, error = %e, "close frame not sent");
            }
        };
        if tokio::time::timeout(CLOSE_GRACE, closing).await.is_err() {
            tracing::debug!(%session_id, "close did not finish in time");
        }
    }

    let _ = session.advance(SessionState::Closed);
    tracing::info!(
        %session_id,
        lobby_id = %session.lobby_id(),
        user = %session.user(),
        connected_for = ?session.joined_at().elapsed(),
        "session closed"
    );
}

/// Next data frame, skipping pongs.
async fn recv_data(
    conn: &WebSocketConnection,
) -> Result<Option<Vec<u8>>, TransportError> {
    loop {
        match conn.recv().await? {
            Some(Inbound::Data(data)) => return Ok(Some(data)),
            Some(Inbound::Pong(_)) => continue,
            None => return Ok(None),
        }
    }
}

/// Encodes and sends one envelope. A client that won't take it within
/// `limit` counts as gone.
async fn send_envelope<C: Codec>(
    conn: &WebSocketConnection,
    codec: &C,
    envelope: &Envelope,
    limit: Duration,
) -> Result<(), HubError> {
    let bytes = codec.encode(envelope)?;
    match tokio::time::timeout(limit, conn.send(&bytes)).await {
        Ok(sent) => Ok(sent?),
        Err(_) => Err(TransportError::ConnectionClosed(
            "send stalled".into(),
        )
        .into()),
    }
}

/// Sends an `error` event for `err` and closes with its close code.
async fn reject<C: Codec>(
    conn: &WebSocketConnection,
    codec: &C,
    lobby_id: Option<&LobbyId>,
    err: &HubError,
) {
    let lobby_id = lobby_id.cloned().unwrap_or_else(|| LobbyId::new(""));
    let envelope = Envelope::error(lobby_id, err.kind(), err.to_string());
    let closing = async {
        if let Ok(bytes) = codec.encode(&envelope) {
            let _ = conn.send(&bytes).await;
        }
        let _ = conn.close(err.close_code(), err.kind().as_str()).await;
    };
    let _ = tokio::time::timeout(CLOSE_GRACE, closing).await;
}

fn close_code_for(reason: CloseReason) -> CloseCode {
    match reason {
        CloseReason::LobbyDeleted | CloseReason::Shutdown => {
            CloseCode::GoingAway
        }
        CloseReason::Superseded => CloseCode::Normal,
        CloseReason::SlowConsumer => CloseCode::TryAgainLater,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_code_for_deleted_lobby_is_going_away() {
        assert_eq!(
            close_code_for(CloseReason::LobbyDeleted),
            CloseCode::GoingAway
        );
        assert_eq!(close_code_for(CloseReason::Shutdown), CloseCode::GoingAway);
    }

    #[test]
    fn test_close_code_for_slow_consumer_is_try_again_later() {
        assert_eq!(
            close_code_for(CloseReason::SlowConsumer),
            CloseCode::TryAgainLater
        );
    }

    #[test]
    fn test_close_code_for_superseded_is_normal() {
        assert_eq!(close_code_for(CloseReason::Superseded), CloseCode::Normal);
    }
}
