use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crypto::{self, CipherKey};
use crate::models::{canonical_principal, CredentialBundle};

/// Encrypted credential blob file name (persistent scope)
const CREDENTIAL_FILE: &str = "credentials.bin";

/// Offline password verifier file name.
/// Contains one-way Argon2id digests only - no recoverable secrets.
const VERIFIER_FILE: &str = "verifiers.json";

/// Maximum age of a stored bundle before it is treated as absent.
/// Refresh tokens older than a day are assumed revoked server-side, so
/// presenting them would only produce a confusing backend failure.
const MAX_BUNDLE_AGE_HOURS: i64 = 24;

/// Envelope written to storage: the bundle plus the time it was saved,
/// so stale state can be rejected on load.
#[derive(Debug, Serialize, Deserialize)]
struct StoredBundle {
    bundle: CredentialBundle,
    saved_at: DateTime<Utc>,
}

/// Encrypted credential storage with two scopes.
///
/// The persistent scope is a file in the profile directory and survives
/// restarts. The session scope is held in memory and lives only as long as
/// the process - the local analogue of browser session storage.
pub struct CredentialStore {
    profile_dir: PathBuf,
    key: CipherKey,
    session_blob: Option<Vec<u8>>,
    verifiers: HashMap<String, String>,
}

impl CredentialStore {
    pub fn new(profile_dir: PathBuf, key: CipherKey) -> Result<Self> {
        std::fs::create_dir_all(&profile_dir)
            .with_context(|| format!("Failed to create profile dir {}", profile_dir.display()))?;

        let verifier_path = profile_dir.join(VERIFIER_FILE);
        let verifiers = if verifier_path.exists() {
            let contents = std::fs::read_to_string(&verifier_path)
                .context("Failed to read verifier file")?;
            serde_json::from_str(&contents).unwrap_or_else(|e| {
                debug!(error = %e, "verifier file unparseable, starting empty");
                HashMap::new()
            })
        } else {
            HashMap::new()
        };

        Ok(Self {
            profile_dir,
            key,
            session_blob: None,
            verifiers,
        })
    }

    fn credential_path(&self) -> PathBuf {
        self.profile_dir.join(CREDENTIAL_FILE)
    }

    fn verifier_path(&self) -> PathBuf {
        self.profile_dir.join(VERIFIER_FILE)
    }

    /// Encrypt and store a credential bundle, overwriting any prior entry
    /// in the chosen scope.
    ///
    /// `persistent` selects the on-disk scope; otherwise the blob lives in
    /// memory for the rest of the process.
    pub fn save(&mut self, bundle: &CredentialBundle, persistent: bool) -> Result<()> {
        let stored = StoredBundle {
            bundle: bundle.clone(),
            saved_at: Utc::now(),
        };
        let plaintext = serde_json::to_vec(&stored).context("Failed to serialize credentials")?;
        let blob = crypto::encrypt(&self.key, &plaintext)?;

        if persistent {
            std::fs::write(self.credential_path(), &blob)
                .context("Failed to write credential file")?;
        } else {
            self.session_blob = Some(blob);
        }
        Ok(())
    }

    /// Load the stored bundle, preferring the persistent scope. The flag
    /// reports whether the bundle came from the persistent scope, so a
    /// restored session keeps writing to the scope it was saved under.
    ///
    /// Fails closed: decryption failures, unparseable contents and bundles
    /// older than 24 hours all read as `None`. The caller must treat `None`
    /// as "not authenticated".
    pub fn load(&self) -> Option<(CredentialBundle, bool)> {
        if let Ok(blob) = std::fs::read(self.credential_path()) {
            if let Some(bundle) = self.decode(&blob) {
                return Some((bundle, true));
            }
        }

        self.session_blob
            .as_ref()
            .and_then(|blob| self.decode(blob))
            .map(|bundle| (bundle, false))
    }

    fn decode(&self, blob: &[u8]) -> Option<CredentialBundle> {
        let plaintext = match crypto::decrypt(&self.key, blob) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                debug!(error = %e, "stored credentials unusable, treating as absent");
                return None;
            }
        };

        let stored: StoredBundle = match serde_json::from_slice(&plaintext) {
            Ok(stored) => stored,
            Err(e) => {
                debug!(error = %e, "stored credentials unparseable, treating as absent");
                return None;
            }
        };

        if Utc::now() - stored.saved_at > Duration::hours(MAX_BUNDLE_AGE_HOURS) {
            debug!("stored credentials are stale, treating as absent");
            return None;
        }

        Some(stored.bundle)
    }

    /// Idempotently remove stored credential material from both scopes
    pub fn clear(&mut self) -> Result<()> {
        self.session_blob = None;
        let path = self.credential_path();
        if path.exists() {
            std::fs::remove_file(&path).context("Failed to remove credential file")?;
        }
        Ok(())
    }

    /// Store an offline password verifier for a principal
    pub fn save_verifier(&mut self, principal: &str, digest: String) -> Result<()> {
        self.verifiers
            .insert(canonical_principal(principal), digest);
        self.persist_verifiers()
    }

    /// Look up the offline password verifier for a principal
    pub fn verifier(&self, principal: &str) -> Option<&str> {
        self.verifiers
            .get(&canonical_principal(principal))
            .map(String::as_str)
    }

    /// Remove the offline password verifier for a principal
    pub fn remove_verifier(&mut self, principal: &str) -> Result<()> {
        if self
            .verifiers
            .remove(&canonical_principal(principal))
            .is_some()
        {
            self.persist_verifiers()?;
        }
        Ok(())
    }

    fn persist_verifiers(&self) -> Result<()> {
        let contents =
            serde_json::to_string_pretty(&self.verifiers).context("Failed to serialize verifiers")?;
        std::fs::write(self.verifier_path(), contents).context("Failed to write verifier file")
    }
}
