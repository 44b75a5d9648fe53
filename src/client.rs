use std::future::Future;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{AuthError, Error};
use crate::types::{AccessToken, Credentials, UserProfile};

/// Successful login: the issued credential and the profile it belongs to.
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct LoginResponse {
    #[serde(alias = "access_token")]
    pub session_token: AccessToken,
    pub user: UserProfile,
}

impl LoginResponse {
    #[must_use]
    pub fn new(session_token: AccessToken, user: UserProfile) -> Self {
        Self {
            session_token,
            user,
        }
    }
}

/// The remote identity service, as consumed by the session core.
///
/// Every call takes the credential it should act with explicitly; an
/// implementation must not fall back to some other ambient credential
/// except the shared state that [`clear_shared_state`](Self::clear_shared_state)
/// removes.
///
/// # Example
///
/// ```rust,ignore
/// impl IdentityClient for MyTransport {
///     async fn who_am_i(&self, token: &AccessToken) -> Result<UserProfile, AuthError> {
///         self.get("/auth/me").bearer_auth(token.as_str()).send().await?...
///     }
///     // ...
/// }
/// ```
pub trait IdentityClient: Send + Sync + 'static {
    /// Exchange credentials for a token.
    ///
    /// Fails with [`AuthError::InvalidCredentials`] on a rejected login.
    fn login(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<LoginResponse, AuthError>> + Send;

    /// Ask the service whose token this is.
    ///
    /// Fails with [`AuthError::InvalidToken`] if the service rejects it.
    fn who_am_i(
        &self,
        token: &AccessToken,
    ) -> impl Future<Output = Result<UserProfile, AuthError>> + Send;

    /// Invalidate `token` server-side. Callers treat failure as non-fatal.
    fn logout(&self, token: &AccessToken) -> impl Future<Output = Result<(), AuthError>> + Send;

    /// Drop any credential carried outside the explicit token (cookies,
    /// connection-bound sessions).
    fn clear_shared_state(&self) -> impl Future<Output = Result<(), AuthError>> + Send;

    /// Remove this device's push registration for the account behind
    /// `token`. Callers treat failure as non-fatal.
    fn unregister_device(
        &self,
        token: &AccessToken,
        device_token: &str,
    ) -> impl Future<Output = Result<(), AuthError>> + Send;
}

/// Run an identity call under `limit`; expiry becomes [`Error::Timeout`].
pub(crate) async fn bounded<T>(
    limit: Duration,
    operation: &'static str,
    call: impl Future<Output = Result<T, AuthError>>,
) -> Result<T, AuthError> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| AuthError::Service(Error::Timeout(operation)))?
}
