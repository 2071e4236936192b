//! Session state machine: login, refresh, logout and timeout.
//!
//! This module provides:
//! - `SessionManager`: the single funnel for all session transitions
//! - `SessionState`: `Anonymous`, `Authenticating`, `Authenticated`, `Refreshing`
//! - `SessionEvent`: notifications consumed by the UI layer
//!
//! All transitions are serialized through one internal lock; in-flight
//! network calls carry a generation counter so a late response can never
//! resurrect a session that was since logged out or timed out.

pub mod events;
pub mod manager;

pub use events::{EndReason, SessionEvent};
pub use manager::{Session, SessionManager, SessionState};
