//! Scripted in-process identity service for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Notify;

use crate::client::{IdentityClient, LoginResponse};
use crate::error::{AuthError, Error};
use crate::fingerprint::encode_test_token;
use crate::types::{AccessToken, Credentials, Role, UserProfile};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Login(String),
    WhoAmI(String),
    Logout(String),
    ClearSharedState,
    UnregisterDevice { token: String, device: String },
}

#[derive(Default)]
pub(crate) struct FakeIdentity {
    accounts: Mutex<HashMap<String, (String, LoginResponse)>>,
    answers: Mutex<HashMap<String, UserProfile>>,
    failing_logouts: Mutex<HashSet<String>>,
    calls: Mutex<Vec<Call>>,
    login_gate: Mutex<Option<Arc<Notify>>>,
    who_am_i_gate: Mutex<Option<Arc<Notify>>>,
    who_am_i_hangs: AtomicBool,
    logout_hangs: AtomicBool,
    clear_fails: AtomicBool,
    clear_hangs: AtomicBool,
    unregister_fails: AtomicBool,
}

impl FakeIdentity {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register an account for `role` whose token carries `sub = id`.
    /// Returns the token the fake will issue for it.
    pub(crate) fn with_account(&self, email: &str, password: &str, id: &str, role: Role) -> AccessToken {
        let token = AccessToken::new(encode_test_token(&json!({ "sub": id, "role": role })));
        let user = UserProfile::new(id).with_email(email).with_role(role);
        self.accounts.lock().insert(
            email.to_owned(),
            (
                password.to_owned(),
                LoginResponse::new(token.clone(), user.clone()),
            ),
        );
        self.answers.lock().insert(token.as_str().to_owned(), user);
        token
    }

    /// Make `who_am_i(token)` answer with `profile`.
    pub(crate) fn answer(&self, token: &AccessToken, profile: UserProfile) {
        self.answers.lock().insert(token.as_str().to_owned(), profile);
    }

    /// Make the service reject `token`.
    pub(crate) fn revoke(&self, token: &AccessToken) {
        self.answers.lock().remove(token.as_str());
    }

    pub(crate) fn fail_logout(&self, token: &AccessToken) {
        self.failing_logouts.lock().insert(token.as_str().to_owned());
    }

    /// Hold every `login` until the returned handle is notified.
    pub(crate) fn gate_login(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.login_gate.lock() = Some(gate.clone());
        gate
    }

    /// Hold every `who_am_i` until the returned handle is notified.
    pub(crate) fn gate_who_am_i(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.who_am_i_gate.lock() = Some(gate.clone());
        gate
    }

    pub(crate) fn hang_who_am_i(&self) {
        self.who_am_i_hangs.store(true, Ordering::SeqCst);
    }

    pub(crate) fn hang_logout(&self) {
        self.logout_hangs.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_clear_shared_state(&self) {
        self.clear_fails.store(true, Ordering::SeqCst);
    }

    pub(crate) fn hang_clear_shared_state(&self) {
        self.clear_hangs.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_unregister(&self) {
        self.unregister_fails.store(true, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub(crate) fn reset_calls(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

impl IdentityClient for FakeIdentity {
    async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, AuthError> {
        self.record(Call::Login(credentials.email.clone()));
        let gate = self.login_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let account = self.accounts.lock().get(&credentials.email).cloned();
        match account {
            Some((password, response)) if password == credentials.password => Ok(response),
            _ => Err(AuthError::InvalidCredentials),
        }
    }

    async fn who_am_i(&self, token: &AccessToken) -> Result<UserProfile, AuthError> {
        self.record(Call::WhoAmI(token.as_str().to_owned()));
        let gate = self.who_am_i_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.who_am_i_hangs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let answer = self.answers.lock().get(token.as_str()).cloned();
        answer.ok_or(AuthError::InvalidToken)
    }

    async fn logout(&self, token: &AccessToken) -> Result<(), AuthError> {
        self.record(Call::Logout(token.as_str().to_owned()));
        if self.logout_hangs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.failing_logouts.lock().contains(token.as_str()) {
            return Err(AuthError::Service(Error::Identity {
                operation: "logout",
                status: Some(502),
                detail: "bad gateway".into(),
            }));
        }
        Ok(())
    }

    async fn clear_shared_state(&self) -> Result<(), AuthError> {
        self.record(Call::ClearSharedState);
        if self.clear_hangs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.clear_fails.load(Ordering::SeqCst) {
            return Err(AuthError::Service(Error::Identity {
                operation: "clear shared state",
                status: None,
                detail: "unavailable".into(),
            }));
        }
        Ok(())
    }

    async fn unregister_device(
        &self,
        token: &AccessToken,
        device_token: &str,
    ) -> Result<(), AuthError> {
        self.record(Call::UnregisterDevice {
            token: token.as_str().to_owned(),
            device: device_token.to_owned(),
        });
        if self.unregister_fails.load(Ordering::SeqCst) {
            return Err(AuthError::Service(Error::Identity {
                operation: "unregister device",
                status: Some(500),
                detail: "push registry unavailable".into(),
            }));
        }
        Ok(())
    }
}
