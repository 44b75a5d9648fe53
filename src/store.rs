//! Per-role session records and the active-role pointer.
//!
//! State lives behind a mutex and is written through to a
//! [`SessionBackend`] after every mutation so the multi-session layout
//! survives a restart. Backend write failures are logged, never returned:
//! the in-memory view stays authoritative for the running process.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::Error;
use crate::fingerprint::decode_subject;
use crate::types::{AccessToken, Role, UserProfile};

/// One role's credential and cached profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub role: Role,
    pub token: AccessToken,
    pub user: UserProfile,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_verified_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_active_at: OffsetDateTime,
}

impl SessionRecord {
    fn new(role: Role, user: UserProfile, token: AccessToken) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            role,
            token,
            user,
            created_at: now,
            last_verified_at: now,
            last_active_at: now,
        }
    }

    /// The token's decoded subject names someone other than the cached user.
    ///
    /// A tainted record must be re-verified before its profile is trusted.
    #[must_use]
    pub fn is_tainted(&self) -> bool {
        !decode_subject(self.token.as_str()).matches(&self.user)
    }
}

/// Persisted layout: role → record, plus the active-role scalar.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedSessions {
    #[serde(default)]
    pub sessions: BTreeMap<Role, SessionRecord>,
    #[serde(default)]
    pub active_role: Option<Role>,
}

impl PersistedSessions {
    /// Drop an active pointer that names a role with no record.
    fn sanitize(&mut self) {
        if let Some(role) = self.active_role {
            if !self.sessions.contains_key(&role) {
                tracing::warn!(role = %role, "Dropping active role without a stored session");
                self.active_role = None;
            }
        }
    }
}

/// Durable storage for the session layout.
pub trait SessionBackend: Send + Sync + 'static {
    /// Load the stored layout. A missing store is an empty layout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the store exists but cannot be read.
    fn load(&self) -> Result<PersistedSessions, Error>;

    /// Replace the stored layout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the layout cannot be written.
    fn save(&self, sessions: &PersistedSessions) -> Result<(), Error>;
}

/// Process-local backend. Cloning shares the same slot, which lets tests
/// reopen a store and observe what a restart would see.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    slot: std::sync::Arc<Mutex<PersistedSessions>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionBackend for MemoryBackend {
    fn load(&self) -> Result<PersistedSessions, Error> {
        Ok(self.slot.lock().clone())
    }

    fn save(&self, sessions: &PersistedSessions) -> Result<(), Error> {
        *self.slot.lock() = sessions.clone();
        Ok(())
    }
}

/// JSON file backend. Writes go to a sibling temp file that is then
/// renamed over the target.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionBackend for FileBackend {
    fn load(&self) -> Result<PersistedSessions, Error> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(PersistedSessions::default());
            }
            Err(e) => {
                return Err(Error::Storage(format!("{}: {e}", self.path.display())));
            }
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::Storage(format!("{}: {e}", self.path.display())))
    }

    fn save(&self, sessions: &PersistedSessions) -> Result<(), Error> {
        let json = serde_json::to_vec_pretty(sessions)
            .map_err(|e| Error::Storage(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)
            .and_then(|()| std::fs::rename(&tmp, &self.path))
            .map_err(|e| Error::Storage(format!("{}: {e}", self.path.display())))
    }
}

/// Keyed session records, at most one per role, plus the active pointer.
pub struct SessionStore {
    state: Mutex<PersistedSessions>,
    backend: Box<dyn SessionBackend>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SessionStore")
            .field("roles", &state.sessions.keys().collect::<Vec<_>>())
            .field("active_role", &state.active_role)
            .finish()
    }
}

impl SessionStore {
    /// Store with no durable backing beyond the process.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(PersistedSessions::default()),
            backend: Box::new(MemoryBackend::new()),
        }
    }

    /// Open a store over `backend`, loading whatever it holds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the backend cannot be read.
    pub fn open(backend: impl SessionBackend) -> Result<Self, Error> {
        let mut state = backend.load()?;
        state.sanitize();
        tracing::debug!(
            sessions = state.sessions.len(),
            active_role = ?state.active_role,
            "Session store loaded"
        );
        Ok(Self {
            state: Mutex::new(state),
            backend: Box::new(backend),
        })
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut PersistedSessions) -> R) -> R {
        let mut state = self.state.lock();
        let result = f(&mut state);
        if let Err(e) = self.backend.save(&state) {
            tracing::warn!(error = %e, "Failed to persist session store");
        }
        result
    }

    /// Insert or overwrite the record for `role`.
    pub fn add(&self, role: Role, user: UserProfile, token: AccessToken) -> SessionRecord {
        let record = SessionRecord::new(role, user, token);
        self.mutate(|state| {
            state.sessions.insert(role, record.clone());
        });
        tracing::info!(role = %role, "Session added");
        record
    }

    #[must_use]
    pub fn get(&self, role: Role) -> Option<SessionRecord> {
        self.state.lock().sessions.get(&role).cloned()
    }

    /// Delete the record for `role`, clearing the active pointer if it
    /// pointed there.
    pub fn remove(&self, role: Role) -> Option<SessionRecord> {
        let removed = self.mutate(|state| {
            if state.active_role == Some(role) {
                state.active_role = None;
            }
            state.sessions.remove(&role)
        });
        if removed.is_some() {
            tracing::info!(role = %role, "Session removed");
        }
        removed
    }

    /// Point at `role`. Existence of the record is the caller's concern;
    /// if it exists its last-active time is refreshed.
    pub fn set_active_role(&self, role: Role) {
        self.mutate(|state| {
            state.active_role = Some(role);
            if let Some(record) = state.sessions.get_mut(&role) {
                record.last_active_at = OffsetDateTime::now_utc();
            }
        });
        tracing::debug!(role = %role, "Active role set");
    }

    pub fn clear_active_role(&self) {
        self.mutate(|state| state.active_role = None);
        tracing::debug!("Active role cleared");
    }

    #[must_use]
    pub fn active_role(&self) -> Option<Role> {
        self.state.lock().active_role
    }

    #[must_use]
    pub fn active_session(&self) -> Option<SessionRecord> {
        let state = self.state.lock();
        state
            .active_role
            .and_then(|role| state.sessions.get(&role).cloned())
    }

    /// Roles with a stored record.
    #[must_use]
    pub fn list_roles(&self) -> Vec<Role> {
        self.state.lock().sessions.keys().copied().collect()
    }

    #[must_use]
    pub fn sessions(&self) -> Vec<SessionRecord> {
        self.state.lock().sessions.values().cloned().collect()
    }

    /// Field roles that currently hold a usable session.
    #[must_use]
    pub fn logged_in_field_roles(&self) -> Vec<Role> {
        Role::FIELD
            .into_iter()
            .filter(|role| self.has_session(*role))
            .collect()
    }

    /// A record exists for `role` and carries a non-empty token.
    #[must_use]
    pub fn has_session(&self, role: Role) -> bool {
        self.state
            .lock()
            .sessions
            .get(&role)
            .is_some_and(|record| !record.token.is_empty())
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Remove every record and the active pointer.
    pub fn clear_all(&self) {
        self.mutate(|state| {
            state.sessions.clear();
            state.active_role = None;
        });
        tracing::info!("All sessions cleared");
    }

    /// Replace the token held for `role`. Returns `false` if no record exists.
    pub fn update_token(&self, role: Role, token: AccessToken) -> bool {
        self.mutate(|state| match state.sessions.get_mut(&role) {
            Some(record) => {
                record.token = token;
                record.last_active_at = OffsetDateTime::now_utc();
                true
            }
            None => false,
        })
    }

    /// Overlay profile fields onto the cached user for `role`.
    pub fn update_user(&self, role: Role, user: UserProfile) -> Option<SessionRecord> {
        self.mutate(|state| {
            let record = state.sessions.get_mut(&role)?;
            record.user.merge(user);
            record.last_active_at = OffsetDateTime::now_utc();
            Some(record.clone())
        })
    }

    /// Replace the cached user with a server-confirmed profile.
    pub fn confirm_user(&self, role: Role, user: UserProfile) -> Option<SessionRecord> {
        self.mutate(|state| {
            let record = state.sessions.get_mut(&role)?;
            let now = OffsetDateTime::now_utc();
            record.user = user;
            record.last_verified_at = now;
            record.last_active_at = now;
            Some(record.clone())
        })
    }

    pub fn touch(&self, role: Role) {
        self.mutate(|state| {
            if let Some(record) = state.sessions.get_mut(&role) {
                record.last_active_at = OffsetDateTime::now_utc();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::fingerprint::encode_test_token;

    fn profile(id: &str, role: Role) -> UserProfile {
        UserProfile::new(id).with_role(role)
    }

    #[test]
    fn add_is_last_write_wins() {
        let store = SessionStore::in_memory();
        store.add(Role::Sofor, profile("u-1", Role::Sofor), "t1".into());
        store.add(Role::Sofor, profile("u-2", Role::Sofor), "t2".into());
        store.add(Role::Att, profile("u-3", Role::Att), "t3".into());

        assert_eq!(store.count(), 2);
        let record = store.get(Role::Sofor).unwrap();
        assert_eq!(record.user.id.as_str(), "u-2");
        assert_eq!(record.token.as_str(), "t2");
    }

    #[test]
    fn remove_clears_active_pointer() {
        let store = SessionStore::in_memory();
        store.add(Role::Sofor, profile("u-1", Role::Sofor), "t1".into());
        store.add(Role::Att, profile("u-2", Role::Att), "t2".into());
        store.set_active_role(Role::Sofor);

        store.remove(Role::Att);
        assert_eq!(store.active_role(), Some(Role::Sofor));

        assert!(store.remove(Role::Sofor).is_some());
        assert_eq!(store.active_role(), None);
        assert!(store.remove(Role::Sofor).is_none());
    }

    #[test]
    fn list_and_field_roles() {
        let store = SessionStore::in_memory();
        store.add(Role::Paramedik, profile("u-1", Role::Paramedik), "t1".into());
        store.add(Role::Doktor, profile("u-2", Role::Doktor), "t2".into());
        store.add(Role::Att, profile("u-3", Role::Att), "".into());

        let mut roles = store.list_roles();
        roles.sort();
        assert_eq!(roles, vec![Role::Doktor, Role::Paramedik, Role::Att]);
        assert_eq!(store.logged_in_field_roles(), vec![Role::Paramedik]);
        assert!(!store.has_session(Role::Att));
    }

    #[test]
    fn clear_all_empties_everything() {
        let store = SessionStore::in_memory();
        store.add(Role::Sofor, profile("u-1", Role::Sofor), "t1".into());
        store.set_active_role(Role::Sofor);
        store.clear_all();
        assert_eq!(store.count(), 0);
        assert_eq!(store.active_role(), None);
        assert!(store.active_session().is_none());
    }

    #[test]
    fn confirm_replaces_and_update_merges() {
        let store = SessionStore::in_memory();
        store.add(
            Role::Sofor,
            profile("u-1", Role::Sofor).with_name("Ali"),
            "t1".into(),
        );

        let merged = store
            .update_user(Role::Sofor, UserProfile::new("u-1").with_email("a@b.c"))
            .unwrap();
        assert_eq!(merged.user.name.as_deref(), Some("Ali"));
        assert_eq!(merged.user.email.as_deref(), Some("a@b.c"));

        let confirmed = UserProfile::new("u-1").with_role(Role::Sofor);
        let record = store.confirm_user(Role::Sofor, confirmed.clone()).unwrap();
        assert_eq!(record.user, confirmed);
        assert!(store.confirm_user(Role::Att, confirmed).is_none());

        assert!(store.update_token(Role::Sofor, "t9".into()));
        assert!(!store.update_token(Role::Att, "t9".into()));
        assert_eq!(store.get(Role::Sofor).unwrap().token.as_str(), "t9");
    }

    #[test]
    fn tainted_when_subject_names_someone_else() {
        let store = SessionStore::in_memory();
        let token = encode_test_token(&json!({"sub": "u-2"}));
        let record = store.add(Role::Sofor, profile("u-1", Role::Sofor), token.into());
        assert!(record.is_tainted());

        let token = encode_test_token(&json!({"sub": "u-1"}));
        let record = store.add(Role::Sofor, profile("u-1", Role::Sofor), token.into());
        assert!(!record.is_tainted());

        let record = store.add(Role::Sofor, profile("u-1", Role::Sofor), "opaque".into());
        assert!(!record.is_tainted());
    }

    #[test]
    fn reopen_sees_persisted_layout() {
        let backend = MemoryBackend::new();
        let store = SessionStore::open(backend.clone()).unwrap();
        store.add(Role::Sofor, profile("u-1", Role::Sofor), "t1".into());
        store.add(Role::Att, profile("u-2", Role::Att), "t2".into());
        store.set_active_role(Role::Att);
        drop(store);

        let reopened = SessionStore::open(backend).unwrap();
        assert_eq!(reopened.count(), 2);
        assert_eq!(reopened.active_role(), Some(Role::Att));
    }

    #[test]
    fn load_drops_dangling_active_role() {
        let backend = MemoryBackend::new();
        backend
            .save(&PersistedSessions {
                sessions: BTreeMap::new(),
                active_role: Some(Role::Paramedik),
            })
            .unwrap();
        let store = SessionStore::open(backend).unwrap();
        assert_eq!(store.active_role(), None);
    }

    #[test]
    fn file_backend_round_trips_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");

        let store = SessionStore::open(FileBackend::new(&path)).unwrap();
        assert_eq!(store.count(), 0);
        store.add(Role::Paramedik, profile("u-1", Role::Paramedik), "t1".into());
        store.set_active_role(Role::Paramedik);

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["active_role"], "paramedik");
        assert_eq!(raw["sessions"]["paramedik"]["token"], "t1");

        let reopened = SessionStore::open(FileBackend::new(&path)).unwrap();
        assert_eq!(reopened.get(Role::Paramedik).unwrap().user.id.as_str(), "u-1");
        assert_eq!(reopened.active_role(), Some(Role::Paramedik));
    }

    #[test]
    fn file_backend_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(matches!(
            SessionStore::open(FileBackend::new(&path)),
            Err(Error::Storage(_))
        ));
    }
}
