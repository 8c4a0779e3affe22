//! REST collaborators: the lobby service and the auth service.
//!
//! Both speak JSON over HTTP via `reqwest`:
//!
//! ```text
//! GET    {base}/lobby/lobbies/{id}                  → lobby record
//! PUT    {base}/lobby/lobbies/{id}/update-settings  {"advanced_settings": {...}}
//! DELETE {base}/lobby/lobbies/{id}                  {"password": "..."}
//! GET    {base}/auth/users/me                       → {"username": "..."}
//! ```

use std::time::Duration;

use lobbysync_lobby::{LobbyRecord, LobbyStore, StoreError};
use lobbysync_protocol::{LobbyId, LobbySettings, UserId};
use lobbysync_session::{Authenticator, SessionError};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

/// Bound on a token lookup. Store calls are bounded by the registry.
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// RestLobbyStore
// ---------------------------------------------------------------------------

/// A [`LobbyStore`] backed by the lobby REST service.
#[derive(Debug, Clone)]
pub struct RestLobbyStore {
    client: Client,
    base_url: String,
    service_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LobbyBody {
    lobby_id: String,
    #[serde(default)]
    lobby_name: String,
    created_by: String,
    #[serde(default)]
    advanced_settings: Option<LobbySettings>,
    #[serde(default)]
    has_password: bool,
}

#[derive(Serialize)]
struct SettingsBody<'a> {
    advanced_settings: &'a LobbySettings,
}

#[derive(Serialize)]
struct PasswordBody<'a> {
    password: &'a str,
}

impl RestLobbyStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    /// Uses a preconfigured client (proxies, TLS roots, pool limits).
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            service_token: None,
        }
    }

    /// Bearer token sent on every call.
    pub fn with_service_token(mut self, token: impl Into<String>) -> Self {
        self.service_token = Some(token.into());
        self
    }

    fn lobby_url(&self, lobby_id: &LobbyId) -> String {
        format!("{}/lobby/lobbies/{}", self.base_url, lobby_id.as_str())
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let req = self.client.request(method, url);
        match &self.service_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

impl LobbyStore for RestLobbyStore {
    async fn fetch(&self, lobby_id: &LobbyId) -> Result<LobbyRecord, StoreError> {
        let resp = self
            .request(Method::GET, self.lobby_url(lobby_id))
            .send()
            .await
            .map_err(unavailable)?;
        let body: LobbyBody = check(resp)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Rejected(format!("bad lobby record: {e}")))?;

        tracing::debug!(%lobby_id, name = %body.lobby_name, "lobby fetched");
        Ok(LobbyRecord {
            lobby_id: LobbyId::new(body.lobby_id),
            name: body.lobby_name,
            creator: UserId::new(body.created_by),
            settings: body.advanced_settings,
            has_password: body.has_password,
        })
    }

    async fn write_settings(
        &self,
        lobby_id: &LobbyId,
        settings: &LobbySettings,
    ) -> Result<(), StoreError> {
        let url = format!("{}/update-settings", self.lobby_url(lobby_id));
        let resp = self
            .request(Method::PUT, url)
            .json(&SettingsBody {
                advanced_settings: settings,
            })
            .send()
            .await
            .map_err(unavailable)?;
        check(resp).await.map(|_| ())
    }

    async fn delete_with_password(
        &self,
        lobby_id: &LobbyId,
        password: &str,
    ) -> Result<(), StoreError> {
        let resp = self
            .request(Method::DELETE, self.lobby_url(lobby_id))
            .json(&PasswordBody { password })
            .send()
            .await
            .map_err(unavailable)?;
        check(resp).await.map(|_| ())
    }
}

/// Maps a non-success status onto [`StoreError`].
async fn check(resp: Response) -> Result<Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    match status {
        StatusCode::NOT_FOUND => Err(StoreError::NotFound),
        StatusCode::FORBIDDEN => Err(StoreError::Forbidden),
        _ => {
            let text = resp.text().await.unwrap_or_default();
            Err(StoreError::Rejected(format!("{status}: {text}")))
        }
    }
}

fn unavailable(e: reqwest::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

// ---------------------------------------------------------------------------
// RestAuthenticator
// ---------------------------------------------------------------------------

/// An [`Authenticator`] that asks the auth service who a token belongs to.
#[derive(Debug, Clone)]
pub struct RestAuthenticator {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct MeBody {
    username: String,
}

impl RestAuthenticator {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }
}

impl Authenticator for RestAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<UserId, SessionError> {
        if token.is_empty() {
            return Err(SessionError::AuthFailed("empty token".into()));
        }

        let resp = self
            .client
            .get(format!("{}/auth/users/me", self.base_url))
            .bearer_auth(token)
            .timeout(AUTH_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "auth service unreachable");
                SessionError::AuthFailed("auth service unreachable".into())
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SessionError::AuthFailed(format!(
                "token rejected ({status})"
            )));
        }

        let me: MeBody = resp.json().await.map_err(|e| {
            SessionError::AuthFailed(format!("bad auth response: {e}"))
        })?;
        Ok(UserId::new(me.username))
    }
}
