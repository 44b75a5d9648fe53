use std::sync::Arc;

use tokio::sync::watch;

use crate::client::{IdentityClient, bounded};
use crate::config::SessionConfig;
use crate::context::{ActiveContext, ExclusiveGuard};
use crate::error::{AuthError, Error};
use crate::fingerprint::decode_subject;
use crate::store::{FileBackend, SessionRecord, SessionStore};
use crate::switch::{RoleSwitchCoordinator, SwitchOutcome};
use crate::types::{AccessToken, Credentials, Role, UserProfile};

/// Entry point for login, switch and logout across role sessions.
///
/// Construct one per client context with its identity client and store;
/// there is no process-global state.
///
/// # Example
///
/// ```rust,ignore
/// use crew_sessions::{Credentials, HttpClientConfig, HttpIdentityClient, Role};
/// use crew_sessions::{SessionConfig, SessionLifecycleService};
///
/// let client = HttpIdentityClient::new(HttpClientConfig::from_env()?)?;
/// let sessions = SessionLifecycleService::open(client, SessionConfig::from_env()?)?;
///
/// sessions.login_for_role(&Credentials::new("driver@example.com", "..."), Role::Sofor).await?;
/// sessions.login_for_role(&Credentials::new("medic@example.com", "..."), Role::Paramedik).await?;
/// sessions.switch_role(Role::Sofor).await?;
/// ```
pub struct SessionLifecycleService<C> {
    client: Arc<C>,
    store: Arc<SessionStore>,
    context: Arc<ActiveContext>,
    coordinator: RoleSwitchCoordinator<C>,
    config: SessionConfig,
}

impl<C: IdentityClient> SessionLifecycleService<C> {
    /// Wrap an existing store. If it already has an active role, that
    /// role's token and cached profile become live.
    #[must_use]
    pub fn new(client: C, store: SessionStore, config: SessionConfig) -> Self {
        let client = Arc::new(client);
        let store = Arc::new(store);
        let active = store.active_session();
        let context = Arc::new(ActiveContext::new(active.as_ref().map(|r| r.role)));
        if let Some(record) = active {
            tracing::info!(
                role = %record.role,
                fingerprint = %record.token.fingerprint(config.fingerprint_len),
                "Restoring active session"
            );
            context.install_token(Some(record.token));
            context.set_profile(Some(record.user));
        }
        let coordinator = RoleSwitchCoordinator::new(
            client.clone(),
            store.clone(),
            context.clone(),
            config.clone(),
        );
        Self {
            client,
            store,
            context,
            coordinator,
            config,
        }
    }

    /// Build a service over the configured session file, or an in-memory
    /// store when none is configured.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the session file exists but is unreadable.
    pub fn open(client: C, config: SessionConfig) -> Result<Self, Error> {
        let store = match config.session_file() {
            Some(path) => SessionStore::open(FileBackend::new(path))?,
            None => SessionStore::in_memory(),
        };
        Ok(Self::new(client, store, config))
    }

    /// Authenticate and seat a session for `expected_role`.
    ///
    /// The live credential is dropped before calling the identity service
    /// so the login is not made on behalf of the current role.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidCredentials`] on a rejected login
    /// - [`AuthError::RoleMismatch`] if the account belongs to another role;
    ///   nothing is stored
    /// - [`AuthError::SwitchInProgress`] while another operation holds the
    ///   live slot
    pub async fn login_for_role(
        &self,
        credentials: &Credentials,
        expected_role: Role,
    ) -> Result<UserProfile, AuthError> {
        let mut guard = self.context.begin_exclusive()?;
        guard.save_live();
        self.context.install_token(None);

        let login = self.client.login(credentials);
        let response = match bounded(self.config.request_timeout, "login", login).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(role = %expected_role, error = %e, "Login failed");
                guard.restore_live();
                return Err(e);
            }
        };

        let token = response.session_token;
        let user = response.user;
        let subject = decode_subject(token.as_str());
        tracing::info!(
            role = %expected_role,
            user_id = %user.id,
            user_role = ?user.role,
            fingerprint = %token.fingerprint(self.config.fingerprint_len),
            token_subject = %subject,
            "Login response received"
        );
        if !subject.matches(&user) {
            tracing::error!(
                target: "crew_sessions::identity",
                role = %expected_role,
                token_subject = %subject,
                user_id = %user.id,
                "Issued token does not belong to the returned user"
            );
        }

        if user.role != Some(expected_role) {
            guard.restore_live();
            return Err(AuthError::RoleMismatch {
                expected: expected_role,
                actual: user.role,
            });
        }

        self.store.add(expected_role, user.clone(), token.clone());
        self.store.set_active_role(expected_role);
        self.context.install_token(Some(token));
        self.context.set_profile(Some(user.clone()));
        guard.forget_saved();
        drop(guard);

        self.context.publish(Some(expected_role));
        tracing::info!(role = %expected_role, sessions = self.store.count(), "Role login complete");

        Ok(user)
    }

    /// Verify and activate an already stored session.
    ///
    /// # Errors
    ///
    /// See [`RoleSwitchCoordinator::switch_to`].
    pub async fn switch_role(&self, role: Role) -> Result<SwitchOutcome, AuthError> {
        self.coordinator.switch_to(role).await
    }

    /// Leave the active role without logging it out. Stored sessions stay
    /// intact and the identity service is not contacted.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::SwitchInProgress`] while another operation holds
    /// the live slot.
    pub fn return_to_selector(&self) -> Result<(), AuthError> {
        let guard = self.context.begin_exclusive()?;
        self.store.clear_active_role();
        self.context.clear();
        drop(guard);

        self.context.publish(None);
        Ok(())
    }

    /// Log one role out and forget its session.
    ///
    /// Device unregistration and remote logout are best effort; their
    /// failures are logged and the local record is removed regardless.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NoSessionForRole`] if `role` has no stored record
    /// - [`AuthError::SwitchInProgress`] while another operation holds the
    ///   live slot
    pub async fn logout_from_role(&self, role: Role) -> Result<(), AuthError> {
        let mut guard = self.context.begin_exclusive()?;
        let was_active = self.logout_held(&mut guard, role).await?;
        drop(guard);

        if was_active {
            self.context.publish(None);
        }
        Ok(())
    }

    /// Log every role out, then clear the store and the live context even
    /// if some remote calls failed.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::SwitchInProgress`] while another operation holds
    /// the live slot; nothing is logged out in that case.
    pub async fn logout_all(&self) -> Result<(), AuthError> {
        let mut guard = self.context.begin_exclusive()?;
        for role in self.store.list_roles() {
            if let Err(e) = self.logout_held(&mut guard, role).await {
                tracing::warn!(role = %role, error = %e, "Logout failed during logout-all");
            }
        }
        self.store.clear_all();
        guard.forget_saved();
        self.context.clear();
        drop(guard);

        self.context.publish(None);
        Ok(())
    }

    /// Logout body, run under an already held guard. Returns whether the
    /// role was the active one, in which case the live slot is now empty.
    async fn logout_held(
        &self,
        guard: &mut ExclusiveGuard<'_>,
        role: Role,
    ) -> Result<bool, AuthError> {
        let record = self
            .store
            .get(role)
            .ok_or(AuthError::NoSessionForRole(role))?;

        guard.save_live();
        self.context.install_token(Some(record.token.clone()));

        if let Some(device) = self.config.device_token() {
            let unregister = self.client.unregister_device(&record.token, device);
            let result = bounded(self.config.request_timeout, "unregister device", unregister).await;
            if let Err(e) = result {
                tracing::warn!(role = %role, error = %e, "Device unregistration failed during logout");
            }
        }
        let logout = self.client.logout(&record.token);
        if let Err(e) = bounded(self.config.request_timeout, "logout", logout).await {
            tracing::warn!(role = %role, error = %e, "Remote logout failed, removing session locally");
        }

        let was_active = self.store.active_role() == Some(role);
        self.store.remove(role);
        if was_active {
            guard.forget_saved();
            self.context.clear();
        } else {
            guard.restore_live();
        }
        tracing::info!(role = %role, "Logged out of role");
        Ok(was_active)
    }

    #[must_use]
    pub fn active_role(&self) -> Option<Role> {
        self.store.active_role()
    }

    /// Profile of the active role, as last confirmed. `None` mid-switch.
    #[must_use]
    pub fn current_user(&self) -> Option<UserProfile> {
        self.context.profile()
    }

    /// Credential currently presented to the remote API.
    #[must_use]
    pub fn live_token(&self) -> Option<AccessToken> {
        self.context.live_token()
    }

    /// Whether a switch, login or logout currently holds the live slot.
    #[must_use]
    pub fn is_switching(&self) -> bool {
        self.context.is_switching()
    }

    #[must_use]
    pub fn sessions(&self) -> Vec<SessionRecord> {
        self.store.sessions()
    }

    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Receive every committed change of the active role.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<Role>> {
        self.context.subscribe()
    }
}
