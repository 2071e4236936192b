use crate::models::UserProfile;

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    LoggedOut,
    TimedOut,
    RefreshFailed,
}

/// Notifications emitted by the session manager, consumed by the UI layer.
///
/// `Started` is emitted exactly once per session instance, `Ended` exactly
/// once when that instance is torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Started { profile: UserProfile },
    Ended { reason: EndReason },
}
