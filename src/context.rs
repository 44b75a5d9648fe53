use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::AuthError;
use crate::types::{AccessToken, Role, UserProfile};

/// Process-wide view of what is live against the remote API: the single
/// credential slot, the profile served to callers, and the switch guard.
///
/// The active role itself is persisted by the [`SessionStore`](crate::SessionStore);
/// changes to it are published here after they commit.
#[derive(Debug)]
pub struct ActiveContext {
    switching: AtomicBool,
    live_token: Mutex<Option<AccessToken>>,
    profile: Mutex<Option<UserProfile>>,
    active_tx: watch::Sender<Option<Role>>,
}

impl Default for ActiveContext {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ActiveContext {
    #[must_use]
    pub fn new(active_role: Option<Role>) -> Self {
        let (active_tx, _) = watch::channel(active_role);
        Self {
            switching: AtomicBool::new(false),
            live_token: Mutex::new(None),
            profile: Mutex::new(None),
            active_tx,
        }
    }

    /// Take exclusive use of the live slot. Switches, logins and logouts
    /// all hold this guard for their whole duration.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::SwitchInProgress`] if another operation holds it.
    pub fn begin_exclusive(&self) -> Result<ExclusiveGuard<'_>, AuthError> {
        self.switching
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AuthError::SwitchInProgress)?;
        Ok(ExclusiveGuard {
            context: self,
            saved: None,
        })
    }

    /// Whether an operation currently holds the live slot.
    #[must_use]
    pub fn is_switching(&self) -> bool {
        self.switching.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn live_token(&self) -> Option<AccessToken> {
        self.live_token.lock().clone()
    }

    /// Put `token` in the credential slot, returning what was there.
    pub fn install_token(&self, token: Option<AccessToken>) -> Option<AccessToken> {
        std::mem::replace(&mut *self.live_token.lock(), token)
    }

    #[must_use]
    pub fn profile(&self) -> Option<UserProfile> {
        self.profile.lock().clone()
    }

    pub fn set_profile(&self, profile: Option<UserProfile>) -> Option<UserProfile> {
        std::mem::replace(&mut *self.profile.lock(), profile)
    }

    /// Empty the credential slot and the cached profile.
    pub fn clear(&self) {
        self.install_token(None);
        self.set_profile(None);
    }

    /// Notify subscribers of a committed active-role value.
    /// Subscribers are only woken when the value actually changes.
    pub fn publish(&self, role: Option<Role>) {
        self.active_tx.send_if_modified(|current| {
            if *current == role {
                return false;
            }
            tracing::debug!(from = ?current, to = ?role, "Active role published");
            *current = role;
            true
        });
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<Role>> {
        self.active_tx.subscribe()
    }
}

/// Live token and profile as they were before an operation touched them.
#[derive(Debug)]
struct SavedLive {
    token: Option<AccessToken>,
    profile: Option<UserProfile>,
}

/// Holds the switching flag and, once [`save_live`](Self::save_live) is
/// called, what the live slot held before.
///
/// Dropping the guard with a saved state puts the token and profile back
/// before the flag is released, so a cancelled operation leaves the slot
/// as it found it. Call [`forget_saved`](Self::forget_saved) to keep the
/// new state.
#[derive(Debug)]
pub struct ExclusiveGuard<'a> {
    context: &'a ActiveContext,
    saved: Option<SavedLive>,
}

impl ExclusiveGuard<'_> {
    pub fn save_live(&mut self) {
        self.saved = Some(SavedLive {
            token: self.context.live_token(),
            profile: self.context.profile(),
        });
    }

    /// Put the saved token and profile back now.
    pub fn restore_live(&mut self) {
        if let Some(saved) = self.saved.take() {
            self.context.install_token(saved.token);
            self.context.set_profile(saved.profile);
        }
    }

    pub fn forget_saved(&mut self) {
        self.saved = None;
    }
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        if self.saved.is_some() {
            tracing::debug!("Live slot operation abandoned, restoring previous credential");
            self.restore_live();
        }
        self.context.switching.store(false, Ordering::Release);
    }
}
