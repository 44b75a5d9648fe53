use std::sync::Arc;

use parking_lot::RwLock;
use reqwest::StatusCode;
use reqwest::cookie::Jar;
use serde::Serialize;
use url::Url;

use crate::client::{IdentityClient, LoginResponse};
use crate::error::{AuthError, Error};
use crate::types::{AccessToken, Credentials, UserProfile};

/// Identity service endpoints.
///
/// The base URL is required; endpoint paths default to the service's REST
/// layout and are resolved against it.
///
/// ```rust,ignore
/// use crew_sessions::HttpClientConfig;
///
/// let config = HttpClientConfig::new("https://api.example.com/api/".parse()?)
///     .with_me_path("auth/whoami");
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct HttpClientConfig {
    pub(crate) base_url: Url,
    pub(crate) login_path: String,
    pub(crate) me_path: String,
    pub(crate) logout_path: String,
    pub(crate) unregister_path: String,
}

impl HttpClientConfig {
    #[must_use]
    pub fn new(mut base_url: Url) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            base_url,
            login_path: "auth/login".into(),
            me_path: "auth/me".into(),
            logout_path: "auth/logout".into(),
            unregister_path: "notifications/unsubscribe-push".into(),
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `CREW_IDENTITY_URL`: identity service base URL (e.g. `https://host/api/`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the variable is missing or not a URL.
    pub fn from_env() -> Result<Self, Error> {
        let raw = std::env::var("CREW_IDENTITY_URL")
            .map_err(|_| Error::Config("CREW_IDENTITY_URL is required".into()))?;
        let url: Url = raw
            .parse()
            .map_err(|e| Error::Config(format!("CREW_IDENTITY_URL: {e}")))?;
        Ok(Self::new(url))
    }

    #[must_use]
    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    #[must_use]
    pub fn with_me_path(mut self, path: impl Into<String>) -> Self {
        self.me_path = path.into();
        self
    }

    #[must_use]
    pub fn with_logout_path(mut self, path: impl Into<String>) -> Self {
        self.logout_path = path.into();
        self
    }

    #[must_use]
    pub fn with_unregister_path(mut self, path: impl Into<String>) -> Self {
        self.unregister_path = path.into();
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, Error> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::Config(format!("endpoint {path}: {e}")))
    }
}

#[derive(Serialize)]
struct UnsubscribeBody<'a> {
    endpoint: &'a str,
    keys: serde_json::Map<String, serde_json::Value>,
}

/// [`IdentityClient`] over the identity service's REST API.
///
/// Keeps a cookie jar so session cookies set by `login` behave as they
/// would in a browser; [`clear_shared_state`](IdentityClient::clear_shared_state)
/// swaps in a fresh jar.
pub struct HttpIdentityClient {
    config: HttpClientConfig,
    http: RwLock<reqwest::Client>,
}

impl std::fmt::Debug for HttpIdentityClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpIdentityClient")
            .field("base_url", &self.config.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl HttpIdentityClient {
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the HTTP client cannot be built.
    pub fn new(config: HttpClientConfig) -> Result<Self, Error> {
        Ok(Self {
            config,
            http: RwLock::new(Self::build_client()?),
        })
    }

    #[must_use]
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    fn build_client() -> Result<reqwest::Client, Error> {
        reqwest::Client::builder()
            .cookie_provider(Arc::new(Jar::default()))
            .build()
            .map_err(Into::into)
    }

    fn client(&self) -> reqwest::Client {
        self.http.read().clone()
    }

    /// Checks HTTP response status; returns the response on success or an error with details.
    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, Error> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(Error::Identity {
            operation,
            status: Some(status),
            detail: body,
        })
    }
}

impl IdentityClient for HttpIdentityClient {
    async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, AuthError> {
        let response = self
            .client()
            .post(self.config.endpoint(&self.config.login_path)?)
            .json(credentials)
            .send()
            .await
            .map_err(Error::from)?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(AuthError::InvalidCredentials);
        }
        let response = Self::ensure_success(response, "login").await?;
        Ok(response.json::<LoginResponse>().await.map_err(Error::from)?)
    }

    async fn who_am_i(&self, token: &AccessToken) -> Result<UserProfile, AuthError> {
        let response = self
            .client()
            .get(self.config.endpoint(&self.config.me_path)?)
            .bearer_auth(token.as_str())
            .send()
            .await
            .map_err(Error::from)?;

        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return Err(AuthError::InvalidToken);
        }
        let response = Self::ensure_success(response, "whoami").await?;
        Ok(response.json::<UserProfile>().await.map_err(Error::from)?)
    }

    async fn logout(&self, token: &AccessToken) -> Result<(), AuthError> {
        let response = self
            .client()
            .post(self.config.endpoint(&self.config.logout_path)?)
            .bearer_auth(token.as_str())
            .send()
            .await
            .map_err(Error::from)?;
        Self::ensure_success(response, "logout").await?;
        Ok(())
    }

    async fn clear_shared_state(&self) -> Result<(), AuthError> {
        let fresh = Self::build_client()?;
        *self.http.write() = fresh;
        tracing::debug!("Identity client cookie jar reset");
        Ok(())
    }

    async fn unregister_device(
        &self,
        token: &AccessToken,
        device_token: &str,
    ) -> Result<(), AuthError> {
        let body = UnsubscribeBody {
            endpoint: device_token,
            keys: serde_json::Map::new(),
        };
        let response = self
            .client()
            .delete(self.config.endpoint(&self.config.unregister_path)?)
            .bearer_auth(token.as_str())
            .json(&body)
            .send()
            .await
            .map_err(Error::from)?;
        Self::ensure_success(response, "unregister device").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gains_trailing_slash() {
        let config = HttpClientConfig::new("https://api.example.com/api".parse().unwrap());
        assert_eq!(config.base_url().as_str(), "https://api.example.com/api/");
        assert_eq!(
            config.endpoint("auth/login").unwrap().as_str(),
            "https://api.example.com/api/auth/login"
        );
    }

    #[test]
    fn endpoint_overrides_resolve_against_base() {
        let config = HttpClientConfig::new("https://api.example.com/api/".parse().unwrap())
            .with_me_path("/auth/whoami")
            .with_unregister_path("push/unregister");
        assert_eq!(
            config.endpoint(&config.me_path).unwrap().as_str(),
            "https://api.example.com/api/auth/whoami"
        );
        assert_eq!(
            config.endpoint(&config.unregister_path).unwrap().as_str(),
            "https://api.example.com/api/push/unregister"
        );
    }

    #[tokio::test]
    async fn clear_shared_state_rebuilds_client() {
        let client =
            HttpIdentityClient::new(HttpClientConfig::new("http://localhost/".parse().unwrap()))
                .unwrap();
        client.clear_shared_state().await.unwrap();
        assert!(format!("{client:?}").contains("localhost"));
    }
}
