use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Token lifetime in minutes.
/// The identity backend issues access tokens valid for one hour.
const TOKEN_LIFETIME_MINUTES: i64 = 60;

/// Buffer time before expiry to trigger refresh (5 minutes)
const REFRESH_THRESHOLD_MINUTES: i64 = 5;

/// The paired access/refresh tokens representing an authenticated session.
///
/// Both tokens are always set together - the bundle cannot exist with only
/// one of them, which rules out unrecoverable half-states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialBundle {
    pub access_token: String,
    pub refresh_token: String,
    pub issued_at: DateTime<Utc>,
}

impl CredentialBundle {
    pub fn new(access_token: String, refresh_token: String) -> Self {
        Self {
            access_token,
            refresh_token,
            issued_at: Utc::now(),
        }
    }

    /// The point in time at which the tokens should be refreshed
    pub fn refresh_at(&self) -> DateTime<Utc> {
        self.issued_at + Duration::minutes(TOKEN_LIFETIME_MINUTES - REFRESH_THRESHOLD_MINUTES)
    }

    /// Check if the tokens are past their scheduled refresh point.
    /// Also catches the case where the process was suspended past the
    /// refresh timer and should refresh immediately on resume.
    pub fn needs_refresh(&self) -> bool {
        Utc::now() > self.refresh_at()
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.issued_at + Duration::minutes(TOKEN_LIFETIME_MINUTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_bundle_does_not_need_refresh() {
        let bundle = CredentialBundle::new("a1".into(), "r1".into());
        assert!(!bundle.needs_refresh());
        assert!(!bundle.is_expired());
    }

    #[test]
    fn test_bundle_needs_refresh_after_threshold() {
        let mut bundle = CredentialBundle::new("a1".into(), "r1".into());
        bundle.issued_at = Utc::now() - Duration::minutes(56);
        assert!(bundle.needs_refresh());
        assert!(!bundle.is_expired());
    }

    #[test]
    fn test_bundle_expired_after_lifetime() {
        let mut bundle = CredentialBundle::new("a1".into(), "r1".into());
        bundle.issued_at = Utc::now() - Duration::minutes(61);
        assert!(bundle.is_expired());
    }
}
