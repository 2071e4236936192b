//! Failed-login attempt tracking and lockout policy.
//!
//! Counters are kept per principal, independent of whether a session ever
//! exists for that principal. Lockout is evaluated locally before any
//! network I/O, so a locked-out principal never consumes a login attempt
//! against the identity backend.
//!
//! Records are persisted as plaintext JSON - they contain no secrets, only
//! counters and timestamps. Tampering could at worst cause a local
//! denial-of-service, which is an accepted residual risk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Attempt records file name in the profile directory
const ATTEMPTS_FILE: &str = "attempts.json";

/// Failed attempts allowed before lockout
pub const MAX_ATTEMPTS: u32 = 5;

/// Window in which failures accumulate, in minutes.
/// Failures older than an hour restart the count instead of accumulating
/// indefinitely.
const FAILURE_WINDOW_MINUTES: i64 = 60;

/// Lockout duration in minutes once the attempt limit is reached
const LOCKOUT_MINUTES: i64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub failure_count: u32,
    pub window_start: DateTime<Utc>,
    pub locked_until: Option<DateTime<Utc>>,
}

/// Per-principal failure counters with lazy lockout eviction.
///
/// Expired records are evicted when observed through [`is_locked`] - no
/// background sweep is required.
///
/// [`is_locked`]: AttemptTracker::is_locked
pub struct AttemptTracker {
    path: PathBuf,
    records: HashMap<String, AttemptRecord>,
}

impl AttemptTracker {
    /// Open the tracker backed by `attempts.json` in the profile directory.
    /// A missing or unreadable file starts the tracker empty.
    pub fn open(profile_dir: &Path) -> Self {
        let path = profile_dir.join(ATTEMPTS_FILE);
        let records = match Self::load_records(&path) {
            Ok(records) => records,
            Err(e) => {
                debug!(error = %e, "no usable attempt records, starting empty");
                HashMap::new()
            }
        };
        Self { path, records }
    }

    fn load_records(path: &Path) -> Result<HashMap<String, AttemptRecord>> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&contents).context("Failed to parse attempt records")
    }

    /// Record a failed login attempt for a principal.
    ///
    /// Restarts the count at 1 when the failure window has elapsed; sets
    /// the lockout timestamp once the count reaches [`MAX_ATTEMPTS`].
    pub fn record_failure(&mut self, principal: &str) {
        let key = crate::models::canonical_principal(principal);
        let now = Utc::now();

        let record = self.records.entry(key).or_insert(AttemptRecord {
            failure_count: 0,
            window_start: now,
            locked_until: None,
        });

        if now - record.window_start > Duration::minutes(FAILURE_WINDOW_MINUTES) {
            record.failure_count = 1;
            record.window_start = now;
            record.locked_until = None;
        } else {
            record.failure_count += 1;
        }

        if record.failure_count >= MAX_ATTEMPTS && record.locked_until.is_none() {
            record.locked_until = Some(now + Duration::minutes(LOCKOUT_MINUTES));
            warn!(failures = record.failure_count, "principal locked out after repeated failures");
        }

        self.persist();
    }

    /// Check whether a principal is currently locked out.
    ///
    /// Clears the record as a side effect once the lockout or the failure
    /// window has elapsed.
    pub fn is_locked(&mut self, principal: &str) -> bool {
        let key = crate::models::canonical_principal(principal);
        let Some(record) = self.records.get(&key) else {
            return false;
        };

        let now = Utc::now();

        if let Some(locked_until) = record.locked_until {
            if now < locked_until {
                return true;
            }
            // Lockout served - evict so the counter starts fresh
            self.records.remove(&key);
            self.persist();
            return false;
        }

        if now - record.window_start > Duration::minutes(FAILURE_WINDOW_MINUTES) {
            self.records.remove(&key);
            self.persist();
        }

        false
    }

    /// Remove both the failure counter and lock state for a principal.
    /// Called on successful login and on explicit logout.
    pub fn clear(&mut self, principal: &str) {
        let key = crate::models::canonical_principal(principal);
        if self.records.remove(&key).is_some() {
            self.persist();
        }
    }

    /// Best-effort write-back. A failed write degrades lockout persistence
    /// across restarts but never blocks the login path.
    fn persist(&self) {
        let result = serde_json::to_string_pretty(&self.records)
            .context("Failed to serialize attempt records")
            .and_then(|contents| {
                std::fs::write(&self.path, contents)
                    .with_context(|| format!("Failed to write {}", self.path.display()))
            });
        if let Err(e) = result {
            warn!(error = %e, "failed to persist attempt records");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_not_locked_before_limit() {
        let dir = tempdir().unwrap();
        let mut tracker = AttemptTracker::open(dir.path());

        for _ in 0..4 {
            tracker.record_failure("u@example.com");
        }
        assert!(!tracker.is_locked("u@example.com"));
    }

    #[test]
    fn test_locked_after_five_failures() {
        let dir = tempdir().unwrap();
        let mut tracker = AttemptTracker::open(dir.path());

        for _ in 0..MAX_ATTEMPTS {
            tracker.record_failure("u@example.com");
        }
        assert!(tracker.is_locked("u@example.com"));
    }

    #[test]
    fn test_lockout_is_per_principal() {
        let dir = tempdir().unwrap();
        let mut tracker = AttemptTracker::open(dir.path());

        for _ in 0..MAX_ATTEMPTS {
            tracker.record_failure("bad@example.com");
        }
        assert!(tracker.is_locked("bad@example.com"));
        assert!(!tracker.is_locked("good@example.com"));
    }

    #[test]
    fn test_principal_is_case_folded() {
        let dir = tempdir().unwrap();
        let mut tracker = AttemptTracker::open(dir.path());

        for _ in 0..MAX_ATTEMPTS {
            tracker.record_failure("User@Example.com");
        }
        assert!(tracker.is_locked("user@example.com"));
    }

    #[test]
    fn test_expired_lockout_clears_record() {
        let dir = tempdir().unwrap();
        let mut tracker = AttemptTracker::open(dir.path());

        for _ in 0..MAX_ATTEMPTS {
            tracker.record_failure("u@example.com");
        }

        // Simulate the lockout having elapsed 5 minutes ago
        let record = tracker.records.get_mut("u@example.com").unwrap();
        record.locked_until = Some(Utc::now() - Duration::minutes(5));

        assert!(!tracker.is_locked("u@example.com"));
        assert!(!tracker.records.contains_key("u@example.com"));
    }

    #[test]
    fn test_stale_window_restarts_count() {
        let dir = tempdir().unwrap();
        let mut tracker = AttemptTracker::open(dir.path());

        for _ in 0..4 {
            tracker.record_failure("u@example.com");
        }

        // Push the window past the one-hour boundary
        let record = tracker.records.get_mut("u@example.com").unwrap();
        record.window_start = Utc::now() - Duration::minutes(61);

        tracker.record_failure("u@example.com");
        let record = tracker.records.get("u@example.com").unwrap();
        assert_eq!(record.failure_count, 1);
        assert!(record.locked_until.is_none());
    }

    #[test]
    fn test_clear_removes_record() {
        let dir = tempdir().unwrap();
        let mut tracker = AttemptTracker::open(dir.path());

        for _ in 0..MAX_ATTEMPTS {
            tracker.record_failure("u@example.com");
        }
        tracker.clear("u@example.com");
        assert!(!tracker.is_locked("u@example.com"));
        assert!(tracker.records.is_empty());
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempdir().unwrap();

        {
            let mut tracker = AttemptTracker::open(dir.path());
            for _ in 0..MAX_ATTEMPTS {
                tracker.record_failure("u@example.com");
            }
        }

        let mut reopened = AttemptTracker::open(dir.path());
        assert!(reopened.is_locked("u@example.com"));
    }
}
