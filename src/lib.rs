//! Tokenkeep - session and credential lifecycle management.
//!
//! This library authenticates a principal against an identity backend,
//! issues and renews short-lived access credentials, protects them at rest
//! with authenticated encryption, and terminates sessions on inactivity or
//! repeated failure.
//!
//! The pieces, leaf-first:
//!
//! - [`crypto`]: symmetric key handling, AEAD encryption, password digests
//! - [`store`]: encrypted credential persistence with two storage scopes
//! - [`attempts`]: per-principal failure counters and lockout
//! - [`backend`]: the identity backend contract and its HTTP implementation
//! - [`session`]: the state machine tying it all together
//!
//! A typical embedding calls [`bootstrap`] once at startup and then drives
//! the returned [`SessionManager`] from its UI layer, consuming
//! [`SessionEvent`]s from the paired receiver.

pub mod attempts;
pub mod backend;
pub mod config;
pub mod crypto;
pub mod error;
pub mod models;
pub mod session;
pub mod store;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;

pub use attempts::AttemptTracker;
pub use backend::{HttpIdentityBackend, IdentityBackend, SocialProvider};
pub use config::Config;
pub use crypto::CipherKey;
pub use error::AuthError;
pub use models::{CredentialBundle, UserProfile};
pub use session::{EndReason, SessionEvent, SessionManager, SessionState};
pub use store::CredentialStore;

/// Keyring service name for the profile encryption key
const SERVICE_NAME: &str = "tokenkeep";

/// Wire up a session manager against the configured identity backend.
///
/// Loads (or generates) the profile encryption key from the OS keychain,
/// opens the credential store and attempt tracker under the profile
/// directory, and returns the manager together with the session event
/// receiver for the UI layer.
pub fn bootstrap(config: &Config) -> Result<(SessionManager, mpsc::Receiver<SessionEvent>)> {
    let profile_dir = config.profile_dir()?;
    let key = CipherKey::load_or_generate(SERVICE_NAME);
    let store = CredentialStore::new(profile_dir.clone(), key)?;
    let attempts = AttemptTracker::open(&profile_dir);
    let backend = HttpIdentityBackend::new(config.base_url())?;

    Ok(SessionManager::new(Arc::new(backend), store, attempts))
}
