//! Authentication hook for validating user identity.
//!
//! lobbysync doesn't issue or verify credentials itself; the auth service
//! does. The hub only needs to turn the bearer token a client presents in
//! its handshake into a [`UserId`], and the [`Authenticator`] trait is that
//! seam.

use std::collections::HashMap;

use lobbysync_protocol::UserId;

use crate::SessionError;

/// Validates a client's bearer token and returns its identity.
///
/// `Send + Sync + 'static` because one authenticator is shared by every
/// connection task for the lifetime of the server.
///
/// # Example
///
/// ```rust
/// use lobbysync_protocol::UserId;
/// use lobbysync_session::{Authenticator, SessionError};
///
/// /// Treats the token as the username. Development only.
/// struct TrustingAuthenticator;
///
/// impl Authenticator for TrustingAuthenticator {
///     async fn authenticate(
///         &self,
///         token: &str,
///     ) -> Result<UserId, SessionError> {
///         if token.is_empty() {
///             return Err(SessionError::AuthFailed("empty token".into()));
///         }
///         Ok(UserId::new(token))
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Validates the given token and returns the user's identity.
    ///
    /// Called once per connection, during the handshake.
    ///
    /// # Returns
    /// - `Ok(UserId)`: the token is valid
    /// - `Err(SessionError::AuthFailed)`: the token is invalid or expired
    fn authenticate(
        &self,
        token: &str,
    ) -> impl std::future::Future<Output = Result<UserId, SessionError>> + Send;
}

/// An [`Authenticator`] backed by a fixed token → user table.
///
/// Useful for local runs and tests where no auth service is available.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthenticator {
    tokens: HashMap<String, UserId>,
}

impl StaticAuthenticator {
    /// Creates an authenticator that knows no tokens.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `token` as a credential for `user`.
    pub fn with_token(
        mut self,
        token: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        self.tokens.insert(token.into(), UserId::new(user));
        self
    }

    /// Returns the number of known tokens.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Returns `true` if no tokens are known.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl<T: Into<String>, U: Into<String>> FromIterator<(T, U)>
    for StaticAuthenticator
{
    fn from_iter<I: IntoIterator<Item = (T, U)>>(iter: I) -> Self {
        Self {
            tokens: iter
                .into_iter()
                .map(|(token, user)| (token.into(), UserId::new(user)))
                .collect(),
        }
    }
}

impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<UserId, SessionError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| SessionError::AuthFailed("unknown token".into()))
    }
}
