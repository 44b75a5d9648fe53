//! Verified switching of the live role.
//!
//! A switch walks `Idle → Switching → {Committed | RolledBack}`:
//!
//! 1. take the switch guard and drop the cached profile,
//! 2. clear shared credential state on the identity client,
//! 3. install the target role's token in the live slot,
//! 4. ask the identity service who that token belongs to,
//! 5. cross-check the answer against the token subject and cached profile,
//! 6. commit the confirmed profile and the new active role,
//! 7. release the guard and publish the new role.
//!
//! Steps 2–4 are strictly sequential. Any failure restores the previous
//! live token, profile and active role, except that a token the service
//! rejects is evicted along with its record. Dropping the future before
//! step 6 restores the live slot the same way.

use std::sync::Arc;

use crate::client::{IdentityClient, bounded};
use crate::config::SessionConfig;
use crate::context::{ActiveContext, ExclusiveGuard};
use crate::error::AuthError;
use crate::fingerprint::{IdentityMismatch, check_identity};
use crate::store::SessionStore;
use crate::types::{Role, UserProfile};

/// A committed switch.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct SwitchOutcome {
    pub role: Role,
    /// Profile confirmed by the identity service.
    pub user: UserProfile,
    /// Diagnostic findings; the switch committed regardless.
    pub mismatches: Vec<IdentityMismatch>,
}

pub struct RoleSwitchCoordinator<C> {
    client: Arc<C>,
    store: Arc<SessionStore>,
    context: Arc<ActiveContext>,
    config: SessionConfig,
}

impl<C: IdentityClient> RoleSwitchCoordinator<C> {
    #[must_use]
    pub fn new(
        client: Arc<C>,
        store: Arc<SessionStore>,
        context: Arc<ActiveContext>,
        config: SessionConfig,
    ) -> Self {
        Self {
            client,
            store,
            context,
            config,
        }
    }

    /// Make `target` the live role after verifying its stored credential.
    ///
    /// # Errors
    ///
    /// - [`AuthError::SwitchInProgress`] if another switch is running
    /// - [`AuthError::NoSessionForRole`] if `target` has no stored record, or
    ///   the record was removed from the store before the switch committed
    /// - [`AuthError::StaleSession`] if the service rejected the token or
    ///   did not answer in time; the record is removed
    /// - [`AuthError::IdentityMismatch`] only in strict mode
    /// - [`AuthError::Service`] if clearing shared state failed or timed out,
    ///   or `whoAmI` failed for another reason; the record is kept
    pub async fn switch_to(&self, target: Role) -> Result<SwitchOutcome, AuthError> {
        let mut guard = self.context.begin_exclusive()?;

        let Some(record) = self.store.get(target) else {
            return Err(AuthError::NoSessionForRole(target));
        };
        let fingerprint = record.token.fingerprint(self.config.fingerprint_len);
        tracing::info!(role = %target, fingerprint = %fingerprint, "Switching role");

        let previous_role = self.store.active_role();
        guard.save_live();
        self.context.set_profile(None);

        let clear = self.client.clear_shared_state();
        if let Err(e) = bounded(self.config.request_timeout, "clear shared state", clear).await {
            tracing::warn!(role = %target, error = %e, "Clearing shared state failed, switch aborted");
            self.roll_back(guard, previous_role);
            return Err(e);
        }

        self.context.install_token(Some(record.token.clone()));

        let who_am_i = self.client.who_am_i(&record.token);
        let confirmed = match bounded(self.config.request_timeout, "whoami", who_am_i).await {
            Ok(profile) => profile,
            Err(e) if e.is_token_rejection() => {
                tracing::warn!(
                    role = %target,
                    fingerprint = %fingerprint,
                    error = %e,
                    "Stored token rejected, evicting session"
                );
                self.store.remove(target);
                self.roll_back(guard, previous_role);
                return Err(AuthError::StaleSession(target));
            }
            Err(e) => {
                tracing::warn!(role = %target, error = %e, "Identity check failed, switch aborted");
                self.roll_back(guard, previous_role);
                return Err(e);
            }
        };

        let mismatches = check_identity(
            &record.token,
            &record.user,
            &confirmed,
            self.config.fingerprint_len,
        );
        for mismatch in &mismatches {
            tracing::error!(
                target: "crew_sessions::identity",
                role = %target,
                mismatch = %mismatch,
                "Identity mismatch during role switch"
            );
        }
        if self.config.strict_identity {
            if let Some(first) = mismatches.first() {
                self.roll_back(guard, previous_role);
                return Err(AuthError::IdentityMismatch(first.clone()));
            }
        }

        if self.store.confirm_user(target, confirmed.clone()).is_none() {
            tracing::warn!(role = %target, "Session removed while switching, switch aborted");
            self.roll_back(guard, previous_role);
            return Err(AuthError::NoSessionForRole(target));
        }
        self.store.set_active_role(target);
        self.context.set_profile(Some(confirmed.clone()));
        guard.forget_saved();
        drop(guard);

        self.context.publish(Some(target));
        tracing::info!(role = %target, user_id = %confirmed.id, "Role switch committed");

        if !self.config.settle_delay.is_zero() {
            tokio::time::sleep(self.config.settle_delay).await;
        }

        Ok(SwitchOutcome {
            role: target,
            user: confirmed,
            mismatches,
        })
    }

    fn roll_back(&self, mut guard: ExclusiveGuard<'_>, previous_role: Option<Role>) {
        let active = self.store.active_role();
        if active.is_some() && active == previous_role {
            guard.restore_live();
        } else {
            // The previously active record was the one just evicted.
            guard.forget_saved();
            self.context.clear();
        }
        drop(guard);
        self.context.publish(active);
    }
}
