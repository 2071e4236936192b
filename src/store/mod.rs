//! Encrypted credential storage scoped to the local profile.
//!
//! This module provides the `CredentialStore`, which persists encrypted
//! token bundles with two lifetimes (session-only vs. persistent) and a
//! plaintext map of per-principal offline password verifiers.
//!
//! The store fails closed: anything that cannot be decrypted or is too old
//! reads back as absent, never as an error the caller could misinterpret.

pub mod credentials;

pub use credentials::CredentialStore;
