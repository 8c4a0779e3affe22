//! `LobbyHub` builder and server loop.
//!
//! This is the entry point for running a lobbysync hub. It ties together
//! all the layers: transport → protocol → session → lobby.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use lobbysync_lobby::{
    DeletionCoordinator, LobbyConfig, LobbyStore, PresenceCounter,
    SessionRegistry, SettingsCoordinator,
};
use lobbysync_protocol::{Codec, JsonCodec};
use lobbysync_session::Authenticator;
use lobbysync_transport::{Transport, Upgrade, WebSocketTransport};
use tokio::task::JoinSet;

use crate::handler::handle_connection;
use crate::{HeartbeatConfig, HubConfig, HubError};

/// How long shutdown waits for connection tasks to finish closing.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Shared hub state passed to each connection handler task.
///
/// Wrapped in `Arc` so it can be cheaply cloned across tasks. All
/// mutable state lives in the lobby actors behind the registry.
pub(crate) struct HubState<S: LobbyStore, A: Authenticator, C: Codec> {
    pub(crate) registry: Arc<SessionRegistry<S>>,
    pub(crate) settings: SettingsCoordinator<S>,
    pub(crate) deletion: DeletionCoordinator<S>,
    pub(crate) auth: A,
    pub(crate) codec: C,
    pub(crate) config: HubConfig,
}

/// Builder for configuring and starting a hub.
///
/// # Example
///
/// ```rust,no_run
/// use lobbysync::prelude::*;
///
/// # async fn run() -> Result<(), HubError> {
/// let store = InMemoryLobbyStore::new().with_lobby("L1", "alice", Some("pw"));
/// let auth = StaticAuthenticator::new().with_token("tok-a", "alice");
///
/// let hub = LobbyHub::builder()
///     .bind("0.0.0.0:8765")
///     .build(store, auth)
///     .await?;
/// hub.run().await
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct LobbyHubBuilder {
    config: HubConfig,
}

impl LobbyHubBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: HubConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address to bind the hub to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind = addr.to_string();
        self
    }

    pub fn heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.config.heartbeat = heartbeat;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn max_invalid_frames(mut self, max: u32) -> Self {
        self.config.max_invalid_frames = max;
        self
    }

    pub fn lobby_config(mut self, config: LobbyConfig) -> Self {
        self.config.lobby = config;
        self
    }

    /// Binds the listener and wires up the lobby layer.
    ///
    /// Uses `JsonCodec` and `WebSocketTransport`.
    pub async fn build<S, A>(
        self,
        store: S,
        auth: A,
    ) -> Result<LobbyHub<S, A, JsonCodec>, HubError>
    where
        S: LobbyStore,
        A: Authenticator,
    {
        let transport = WebSocketTransport::bind(&self.config.bind).await?;

        let registry = Arc::new(SessionRegistry::new(
            Arc::new(store),
            self.config.lobby.clone(),
        ));
        let state = Arc::new(HubState {
            settings: SettingsCoordinator::new(Arc::clone(&registry)),
            deletion: DeletionCoordinator::new(Arc::clone(&registry)),
            registry,
            auth,
            codec: JsonCodec,
            config: self.config,
        });

        Ok(LobbyHub { transport, state })
    }
}

/// A bound lobbysync hub.
///
/// Call [`run()`](Self::run) or [`run_until()`](Self::run_until) to start
/// accepting connections.
pub struct LobbyHub<S: LobbyStore, A: Authenticator, C: Codec> {
    transport: WebSocketTransport,
    state: Arc<HubState<S, A, C>>,
}

impl LobbyHub<lobbysync_lobby::InMemoryLobbyStore, lobbysync_session::StaticAuthenticator, JsonCodec> {
    /// Creates a new builder.
    pub fn builder() -> LobbyHubBuilder {
        LobbyHubBuilder::new()
    }
}

impl<S, A, C> LobbyHub<S, A, C>
where
    S: LobbyStore,
    A: Authenticator,
    C: Codec,
{
    /// Returns the local address the hub is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// The registry, for inspecting live lobbies.
    pub fn registry(&self) -> Arc<SessionRegistry<S>> {
        Arc::clone(&self.state.registry)
    }

    /// A presence reader over this hub's registry.
    pub fn presence(&self) -> PresenceCounter<S> {
        PresenceCounter::new(self.registry())
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(self) -> Result<(), HubError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the accept loop until `shutdown` resolves, then closes every
    /// session with going-away and waits for connection tasks to finish.
    pub async fn run_until(
        mut self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), HubError> {
        tracing::info!(bind = %self.state.config.bind, "lobbysync hub running");

        let mut tasks = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.transport.accept() => match accepted {
                    Ok(pending) => {
                        let state = Arc::clone(&self.state);
                        // The upgrade runs in the connection's own task so a
                        // peer that never finishes it stalls nobody else.
                        tasks.spawn(async move {
                            let conn_id = pending.id();
                            let conn = match pending.upgrade().await {
                                Ok(conn) => conn,
                                Err(e) => {
                                    tracing::debug!(
                                        %conn_id,
                                        error = %e,
                                        "WebSocket upgrade failed"
                                    );
                                    return;
                                }
                            };
                            if let Err(e) = handle_connection(conn, state).await {
                                tracing::debug!(
                                    %conn_id,
                                    error = %e,
                                    "connection ended with error"
                                );
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
                Some(finished) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = finished {
                        if e.is_panic() {
                            tracing::error!(error = %e, "connection task panicked");
                        }
                    }
                }
                () = &mut shutdown => break,
            }
        }

        tracing::info!(connections = tasks.len(), "lobbysync hub shutting down");
        self.state.registry.shutdown_all().await;

        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                remaining = tasks.len(),
                "connection tasks did not finish in time, aborting"
            );
            tasks.shutdown().await;
        }

        tracing::info!("lobbysync hub stopped");
        Ok(())
    }
}
