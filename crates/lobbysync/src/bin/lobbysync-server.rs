//! # lobbysync-server
//!
//! Runs a lobbysync hub.
//!
//! ## Usage
//!
//! ```bash
//! # Defaults, or ./lobbysync.toml if present
//! lobbysync-server
//!
//! # Custom config
//! LOBBYSYNC_CONFIG=/etc/lobbysync.toml lobbysync-server
//!
//! # Environment overrides
//! LOBBYSYNC_BIND=0.0.0.0:8765 LOBBYSYNC_STORE_URL=http://lobby-api:8000 lobbysync-server
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use lobbysync::prelude::*;
use lobbysync::{AuthConfig, CONFIG_PATH_ENV, LobbyHubBuilder, StoreConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CONFIG_FILE: &str = "lobbysync.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lobbysync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config()?;
    tracing::info!(bind = %config.bind, "starting lobbysync");

    with_store(config).await
}

fn load_config() -> Result<HubConfig> {
    let config = match std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from) {
        Some(path) => read_config(&path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            read_config(Path::new(DEFAULT_CONFIG_FILE))?
        }
        None => HubConfig::default(),
    };
    Ok(config.with_overrides(|key| std::env::var(key).ok()))
}

fn read_config(path: &Path) -> Result<HubConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    HubConfig::from_toml(&text)
        .with_context(|| format!("failed to parse {}", path.display()))
}

async fn with_store(config: HubConfig) -> Result<()> {
    #[cfg(feature = "rest")]
    if let Some(url) = config.store.base_url.clone() {
        tracing::info!(%url, "using lobby service");
        let mut store = RestLobbyStore::new(url);
        if let Some(token) = config.store.service_token.clone() {
            store = store.with_service_token(token);
        }
        return with_auth(config, store).await;
    }
    #[cfg(not(feature = "rest"))]
    if config.store.base_url.is_some() {
        tracing::warn!("built without `rest`, ignoring store.base_url");
    }

    let store = seeded_store(&config.store);
    with_auth(config, store).await
}

async fn with_auth<S: LobbyStore>(config: HubConfig, store: S) -> Result<()> {
    #[cfg(feature = "rest")]
    if let Some(url) = config.auth.base_url.clone() {
        tracing::info!(%url, "using auth service");
        return serve(config, store, RestAuthenticator::new(url)).await;
    }
    #[cfg(not(feature = "rest"))]
    if config.auth.base_url.is_some() {
        tracing::warn!("built without `rest`, ignoring auth.base_url");
    }

    let auth = static_auth(&config.auth);
    serve(config, store, auth).await
}

fn seeded_store(config: &StoreConfig) -> InMemoryLobbyStore {
    tracing::info!(lobbies = config.lobbies.len(), "using in-memory lobby store");
    config.lobbies.iter().fold(InMemoryLobbyStore::new(), |store, seed| {
        store.with_lobby(seed.id.as_str(), seed.creator.as_str(), seed.password.as_deref())
    })
}

fn static_auth(config: &AuthConfig) -> StaticAuthenticator {
    if config.tokens.is_empty() {
        tracing::warn!("no auth service and no static tokens, every handshake will fail");
    }
    config
        .tokens
        .iter()
        .map(|(token, user)| (token.clone(), user.clone()))
        .collect()
}

async fn serve<S, A>(config: HubConfig, store: S, auth: A) -> Result<()>
where
    S: LobbyStore,
    A: Authenticator,
{
    let hub = LobbyHubBuilder::new()
        .config(config)
        .build(store, auth)
        .await
        .context("failed to start hub")?;
    tracing::info!(addr = %hub.local_addr()?, "listening");

    hub.run_until(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    })
    .await?;
    Ok(())
}
