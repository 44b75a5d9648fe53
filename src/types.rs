use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::fingerprint;

/// Operational role a session is held for.
///
/// Wire names match the identity service's role set. A client context holds
/// at most one session per role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    MerkezOfis,
    OperasyonMuduru,
    Doktor,
    Hemsire,
    Paramedik,
    Att,
    BasSofor,
    Sofor,
    CagriMerkezi,
}

impl Role {
    /// Field crew roles that share a device and keep concurrent sessions.
    pub const FIELD: [Role; 3] = [Role::Sofor, Role::Att, Role::Paramedik];

    pub const ALL: [Role; 9] = [
        Role::MerkezOfis,
        Role::OperasyonMuduru,
        Role::Doktor,
        Role::Hemsire,
        Role::Paramedik,
        Role::Att,
        Role::BasSofor,
        Role::Sofor,
        Role::CagriMerkezi,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MerkezOfis => "merkez_ofis",
            Self::OperasyonMuduru => "operasyon_muduru",
            Self::Doktor => "doktor",
            Self::Hemsire => "hemsire",
            Self::Paramedik => "paramedik",
            Self::Att => "att",
            Self::BasSofor => "bas_sofor",
            Self::Sofor => "sofor",
            Self::CagriMerkezi => "cagri_merkezi",
        }
    }

    /// Human-readable label shown on the role selector.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::MerkezOfis => "Merkez Ofis",
            Self::OperasyonMuduru => "Operasyon Müdürü",
            Self::Doktor => "Doktor",
            Self::Hemsire => "Hemşire",
            Self::Paramedik => "Paramedik",
            Self::Att => "ATT",
            Self::BasSofor => "Baş Şoför",
            Self::Sofor => "Şoför",
            Self::CagriMerkezi => "Çağrı Merkezi",
        }
    }

    #[must_use]
    pub fn is_field_role(self) -> bool {
        Self::FIELD.contains(&self)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| Error::UnknownRole(s.to_owned()))
    }
}

/// Identity service user identifier (opaque string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Opaque credential issued by the identity service.
///
/// `Debug` prints only the short fingerprint so tokens never reach logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, From, Into)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Display-only suffix of the token.
    #[must_use]
    pub fn fingerprint(&self, len: usize) -> String {
        fingerprint::short_fingerprint(&self.0, len)
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AccessToken")
            .field(&self.fingerprint(fingerprint::DEFAULT_FINGERPRINT_LEN))
            .finish()
    }
}

impl From<&str> for AccessToken {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Profile snapshot as last confirmed by the identity service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(alias = "_id")]
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Remaining display fields, kept verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl UserProfile {
    /// Create a profile with only the required `id`.
    #[must_use]
    pub fn new(id: impl Into<UserId>) -> Self {
        Self {
            id: id.into(),
            email: None,
            name: None,
            role: None,
            picture: None,
            phone: None,
            extra: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    /// Overlay `other` onto this profile. Fields absent in `other` keep
    /// their current value; the id is always taken from `other`.
    pub fn merge(&mut self, other: UserProfile) {
        self.id = other.id;
        if other.email.is_some() {
            self.email = other.email;
        }
        if other.name.is_some() {
            self.name = other.name;
        }
        if other.role.is_some() {
            self.role = other.role;
        }
        if other.picture.is_some() {
            self.picture = other.picture;
        }
        if other.phone.is_some() {
            self.phone = other.phone;
        }
        self.extra.extend(other.extra);
    }
}

/// Email/password pair for a role-scoped login.
#[derive(Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    #[must_use]
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_wire_names() {
        for role in Role::ALL {
            let json = serde_json::to_string(&role).unwrap();
            assert_eq!(json, format!("\"{}\"", role.as_str()));
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
    }

    #[test]
    fn unknown_role_rejected() {
        assert!(matches!("driver".parse::<Role>(), Err(Error::UnknownRole(s)) if s == "driver"));
        assert!("".parse::<Role>().is_err());
    }

    #[test]
    fn field_roles() {
        assert!(Role::Sofor.is_field_role());
        assert!(Role::Att.is_field_role());
        assert!(Role::Paramedik.is_field_role());
        assert!(!Role::Doktor.is_field_role());
        assert_eq!(Role::Att.label(), "ATT");
    }

    #[test]
    fn profile_accepts_mongo_style_id() {
        let json = r#"{"_id":"u-1","email":"a@b.c","name":"Ali","role":"sofor","tc_no":"123"}"#;
        let profile: UserProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.id.as_str(), "u-1");
        assert_eq!(profile.role, Some(Role::Sofor));
        assert_eq!(profile.extra.get("tc_no").unwrap(), "123");
    }

    #[test]
    fn merge_keeps_absent_fields() {
        let mut profile = UserProfile::new("u-1")
            .with_name("Ali")
            .with_email("ali@example.com");
        profile.merge(UserProfile::new("u-1").with_role(Role::Att));
        assert_eq!(profile.name.as_deref(), Some("Ali"));
        assert_eq!(profile.email.as_deref(), Some("ali@example.com"));
        assert_eq!(profile.role, Some(Role::Att));
    }

    #[test]
    fn secrets_not_in_debug_output() {
        let token = AccessToken::new("header.payload.signature-abcdefghij");
        let debug = format!("{token:?}");
        assert!(!debug.contains("payload"));
        assert!(debug.contains("abcdefghij"));

        let creds = Credentials::new("a@b.c", "hunter2");
        assert!(!format!("{creds:?}").contains("hunter2"));
    }
}
