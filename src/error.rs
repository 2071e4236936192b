//! Error taxonomy for session operations.

use thiserror::Error;

use crate::backend::BackendError;
use crate::crypto::CryptoError;

#[derive(Error, Debug)]
pub enum AuthError {
    /// Local validation failure - never reaches the network
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Deliberately countdown-free: revealing the exact unlock time would
    // hand an attacker a retry oracle.
    #[error("Too many failed attempts - please try again later")]
    AccountLocked,

    #[error("A session is already active - log out first")]
    AlreadyAuthenticated,

    /// A newer transition (e.g. logout) settled the session while this
    /// operation was in flight; its result was discarded.
    #[error("Operation superseded by a newer session transition")]
    Superseded,

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
