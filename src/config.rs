use std::path::PathBuf;
use std::time::Duration;

use crate::error::Error;
use crate::fingerprint::DEFAULT_FINGERPRINT_LEN;

/// Upper bound on the post-commit settle delay.
pub const MAX_SETTLE_DELAY: Duration = Duration::from_millis(250);

/// Session core settings.
///
/// ```rust,ignore
/// use std::time::Duration;
/// use crew_sessions::SessionConfig;
///
/// let config = SessionConfig::new()
///     .with_request_timeout(Duration::from_secs(5))
///     .with_device_token("fcm-abc");
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct SessionConfig {
    pub(crate) request_timeout: Duration,
    pub(crate) fingerprint_len: usize,
    pub(crate) strict_identity: bool,
    pub(crate) settle_delay: Duration,
    pub(crate) device_token: Option<String>,
    pub(crate) session_file: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            fingerprint_len: DEFAULT_FINGERPRINT_LEN,
            strict_identity: false,
            settle_delay: Duration::ZERO,
            device_token: None,
            session_file: None,
        }
    }

    /// Create config from environment variables.
    ///
    /// # Optional env vars
    /// - `CREW_REQUEST_TIMEOUT_MS`: bound on each identity service call (default 10000)
    /// - `CREW_FINGERPRINT_LEN`: token characters shown in logs (default 10)
    /// - `CREW_STRICT_IDENTITY`: `"1"` or `"true"` aborts switches on identity mismatch
    /// - `CREW_SETTLE_DELAY_MS`: pause after a committed switch (default 0, max 250)
    /// - `CREW_DEVICE_TOKEN`: push registration to drop on logout
    /// - `CREW_SESSION_FILE`: JSON file backing the session store
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a numeric variable does not parse.
    pub fn from_env() -> Result<Self, Error> {
        let mut config = Self::new();

        if let Some(ms) = env_number("CREW_REQUEST_TIMEOUT_MS")? {
            config = config.with_request_timeout(Duration::from_millis(ms));
        }
        if let Some(len) = env_number("CREW_FINGERPRINT_LEN")? {
            let len = usize::try_from(len)
                .map_err(|e| Error::Config(format!("CREW_FINGERPRINT_LEN: {e}")))?;
            config = config.with_fingerprint_len(len);
        }
        if let Some(ms) = env_number("CREW_SETTLE_DELAY_MS")? {
            config = config.with_settle_delay(Duration::from_millis(ms));
        }

        let strict = matches!(
            std::env::var("CREW_STRICT_IDENTITY").as_deref(),
            Ok("1") | Ok("true"),
        );
        config = config.with_strict_identity(strict);

        if let Ok(device) = std::env::var("CREW_DEVICE_TOKEN") {
            if !device.is_empty() {
                config = config.with_device_token(device);
            }
        }
        if let Ok(path) = std::env::var("CREW_SESSION_FILE") {
            config = config.with_session_file(path);
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_fingerprint_len(mut self, len: usize) -> Self {
        self.fingerprint_len = len;
        self
    }

    /// Abort a switch instead of only logging when identities disagree.
    #[must_use]
    pub fn with_strict_identity(mut self, strict: bool) -> Self {
        self.strict_identity = strict;
        self
    }

    /// Clamped to [`MAX_SETTLE_DELAY`].
    #[must_use]
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay.min(MAX_SETTLE_DELAY);
        self
    }

    #[must_use]
    pub fn with_device_token(mut self, token: impl Into<String>) -> Self {
        self.device_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_session_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_file = Some(path.into());
        self
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    #[must_use]
    pub fn fingerprint_len(&self) -> usize {
        self.fingerprint_len
    }

    #[must_use]
    pub fn strict_identity(&self) -> bool {
        self.strict_identity
    }

    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    #[must_use]
    pub fn device_token(&self) -> Option<&str> {
        self.device_token.as_deref()
    }

    #[must_use]
    pub fn session_file(&self) -> Option<&std::path::Path> {
        self.session_file.as_deref()
    }
}

fn env_number(name: &str) -> Result<Option<u64>, Error> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{name}: {e}"))),
        Err(_) => Ok(None),
    }
}
