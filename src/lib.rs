#![doc = include_str!("../README.md")]

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod fingerprint;
#[cfg(feature = "http")]
pub mod http;
pub mod service;
pub mod store;
pub mod switch;
pub mod types;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use client::{IdentityClient, LoginResponse};
pub use config::SessionConfig;
pub use context::ActiveContext;
pub use error::{AuthError, Error};
pub use fingerprint::{IdentityMismatch, MismatchSource, Subject, decode_subject, short_fingerprint};
#[cfg(feature = "http")]
pub use http::{HttpClientConfig, HttpIdentityClient};
pub use service::SessionLifecycleService;
pub use store::{FileBackend, MemoryBackend, PersistedSessions, SessionBackend, SessionRecord, SessionStore};
pub use switch::{RoleSwitchCoordinator, SwitchOutcome};
pub use types::{AccessToken, Credentials, Role, UserId, UserProfile};
