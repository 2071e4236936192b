//! Data models for session and credential management.
//!
//! This module contains the core data structures:
//!
//! - `CredentialBundle`: the paired access/refresh tokens for a session
//! - `UserProfile`: identity information returned by the backend
//! - `canonical_principal`: the fixed case-folding policy for principals

pub mod credential;
pub mod profile;

pub use credential::CredentialBundle;
pub use profile::UserProfile;

/// Canonicalize a principal identifier for use as a lockout/storage key.
///
/// Principals are trimmed and case-folded so that `User@Example.com` and
/// `user@example.com` track the same attempt history.
pub fn canonical_principal(principal: &str) -> String {
    principal.trim().to_lowercase()
}
