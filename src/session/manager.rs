use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::attempts::AttemptTracker;
use crate::backend::{IdentityBackend, LoginResponse, SocialProvider};
use crate::crypto;
use crate::error::AuthError;
use crate::models::{canonical_principal, CredentialBundle, UserProfile};
use crate::store::CredentialStore;

use super::{EndReason, SessionEvent};

// ============================================================================
// Constants
// ============================================================================

/// Inactivity threshold in minutes before a session is forcibly ended
const INACTIVITY_TIMEOUT_MINUTES: i64 = 30;

/// Interval in seconds at which the watchdog polls for inactivity and
/// overdue refreshes. One minute keeps the timeout accurate enough without
/// waking the process constantly.
const ACTIVITY_POLL_INTERVAL_SECS: u64 = 60;

/// Minimum secret length accepted before any network I/O
const MIN_SECRET_LENGTH: usize = 8;

/// Maximum secret length.
/// 128 chars accommodates password managers and passphrases.
const MAX_SECRET_LENGTH: usize = 128;

/// Maximum principal length (RFC 5321 mailbox limit)
const MAX_PRINCIPAL_LENGTH: usize = 254;

/// Buffer size for the session event channel.
/// Events are rare (one start/end pair per session), 16 leaves headroom
/// for a slow consumer.
const EVENT_CHANNEL_SIZE: usize = 16;

// ============================================================================
// Types
// ============================================================================

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Authenticating,
    Authenticated,
    Refreshing,
}

/// An authenticated session: principal, profile and the credential bundle,
/// all sharing one lifetime.
#[derive(Debug, Clone)]
pub struct Session {
    pub principal: String,
    pub profile: UserProfile,
    pub credential: CredentialBundle,
    pub persistent: bool,
}

struct Inner {
    state: SessionState,
    session: Option<Session>,
    /// Monotonically increasing tag for the current session instance.
    /// Bumped on every login start and teardown; in-flight continuations
    /// and timer tasks carry the generation they were started under and
    /// become no-ops once it changes.
    generation: u64,
    last_activity: DateTime<Utc>,
    store: CredentialStore,
    attempts: AttemptTracker,
    refresh_task: Option<JoinHandle<()>>,
    watchdog_task: Option<JoinHandle<()>>,
}

/// The session state machine.
///
/// Clone is cheap - all state is behind shared handles. Every transition
/// funnels through one internal lock; the lock is never held across a
/// network await, so a logout can always interrupt an in-flight refresh.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Mutex<Inner>>,
    backend: Arc<dyn IdentityBackend>,
    events: mpsc::Sender<SessionEvent>,
}

impl SessionManager {
    /// Create a manager and the receiver for its session events
    pub fn new(
        backend: Arc<dyn IdentityBackend>,
        store: CredentialStore,
        attempts: AttemptTracker,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);

        let manager = Self {
            inner: Arc::new(Mutex::new(Inner {
                state: SessionState::Anonymous,
                session: None,
                generation: 0,
                last_activity: Utc::now(),
                store,
                attempts,
                refresh_task: None,
                watchdog_task: None,
            })),
            backend,
            events: tx,
        };

        (manager, rx)
    }

    // =========================================================================
    // Login
    // =========================================================================

    /// Authenticate a principal with a secret.
    ///
    /// Validates input shape and checks the lockout policy before any
    /// network I/O. On success the credential bundle is stored encrypted
    /// (persistently when `remember_me` is set), the attempt record is
    /// cleared and the refresh timer is armed.
    pub async fn login(
        &self,
        principal: &str,
        secret: &str,
        remember_me: bool,
    ) -> Result<UserProfile, AuthError> {
        validate_login_input(principal, secret)?;
        let principal = canonical_principal(principal);

        let generation = {
            let mut inner = self.inner.lock().await;
            if inner.state != SessionState::Anonymous {
                return Err(AuthError::AlreadyAuthenticated);
            }
            if inner.attempts.is_locked(&principal) {
                debug!("login rejected locally, principal is locked out");
                return Err(AuthError::AccountLocked);
            }
            inner.state = SessionState::Authenticating;
            inner.generation += 1;
            inner.generation
        };

        match self.backend.submit_login(&principal, secret).await {
            Ok(response) => {
                let mut inner = self.inner.lock().await;
                if inner.generation != generation {
                    debug!("login response arrived after a newer transition, discarding");
                    return Err(AuthError::Superseded);
                }

                if remember_me {
                    match crypto::digest_password(secret) {
                        Ok(digest) => {
                            if let Err(e) = inner.store.save_verifier(&principal, digest) {
                                warn!(error = %e, "failed to store offline verifier");
                            }
                        }
                        Err(e) => warn!(error = %e, "failed to digest secret for offline verifier"),
                    }
                }

                let profile =
                    self.activate(&mut inner, generation, principal, response, remember_me);
                Ok(profile)
            }
            Err(e) => {
                let mut inner = self.inner.lock().await;
                if inner.generation == generation {
                    inner.state = SessionState::Anonymous;
                    inner.attempts.record_failure(&principal);
                }
                Err(AuthError::Backend(e))
            }
        }
    }

    /// Authenticate via a social provider token.
    ///
    /// Same installation path as a password login, but no attempt tracking:
    /// there is no local secret for an attacker to guess.
    pub async fn login_social(
        &self,
        provider: SocialProvider,
        provider_token: &str,
        remember_me: bool,
    ) -> Result<UserProfile, AuthError> {
        if provider_token.is_empty() {
            return Err(AuthError::InvalidInput(
                "provider token is required".to_string(),
            ));
        }

        let generation = {
            let mut inner = self.inner.lock().await;
            if inner.state != SessionState::Anonymous {
                return Err(AuthError::AlreadyAuthenticated);
            }
            inner.state = SessionState::Authenticating;
            inner.generation += 1;
            inner.generation
        };

        match self
            .backend
            .exchange_social_token(provider, provider_token)
            .await
        {
            Ok(response) => {
                let mut inner = self.inner.lock().await;
                if inner.generation != generation {
                    return Err(AuthError::Superseded);
                }
                let principal = canonical_principal(&response.profile.email);
                let profile =
                    self.activate(&mut inner, generation, principal, response, remember_me);
                Ok(profile)
            }
            Err(e) => {
                let mut inner = self.inner.lock().await;
                if inner.generation == generation {
                    inner.state = SessionState::Anonymous;
                }
                Err(AuthError::Backend(e))
            }
        }
    }

    /// Resume a session from stored credentials, validating them against
    /// the backend.
    ///
    /// Fails closed: anything unusable in the store reads as "no stored
    /// session" and `Ok(None)` is returned, clearing the leftovers.
    pub async fn resume(&self) -> Result<Option<UserProfile>, AuthError> {
        let (generation, bundle, persistent) = {
            let mut inner = self.inner.lock().await;
            if inner.state != SessionState::Anonymous {
                return Err(AuthError::AlreadyAuthenticated);
            }
            let Some((bundle, persistent)) = inner.store.load() else {
                return Ok(None);
            };
            inner.state = SessionState::Authenticating;
            inner.generation += 1;
            (inner.generation, bundle, persistent)
        };

        match self.backend.fetch_profile(&bundle.access_token).await {
            Ok(profile) => {
                let mut inner = self.inner.lock().await;
                if inner.generation != generation {
                    return Err(AuthError::Superseded);
                }
                let principal = canonical_principal(&profile.email);
                inner.attempts.clear(&principal);
                self.install(&mut inner, generation, principal, profile.clone(), bundle, persistent);
                info!("session resumed from stored credentials");
                Ok(Some(profile))
            }
            Err(e) => {
                debug!(error = %e, "stored credentials rejected by backend, clearing");
                let mut inner = self.inner.lock().await;
                if inner.generation == generation {
                    inner.state = SessionState::Anonymous;
                    if let Err(e) = inner.store.clear() {
                        warn!(error = %e, "failed to clear rejected credentials");
                    }
                }
                Ok(None)
            }
        }
    }

    // =========================================================================
    // Logout and timeout
    // =========================================================================

    /// End the session.
    ///
    /// Local teardown always succeeds; the backend is notified afterwards
    /// on a best-effort basis so a network failure can never leave local
    /// state behind.
    pub async fn logout(&self) {
        let access_token = {
            let mut inner = self.inner.lock().await;
            let token = inner
                .session
                .as_ref()
                .map(|s| s.credential.access_token.clone());
            self.teardown(&mut inner, EndReason::LoggedOut);
            token
        };

        if let Some(token) = access_token {
            if let Err(e) = self.backend.submit_logout(&token).await {
                debug!(error = %e, "backend logout notification failed");
            }
        }
    }

    /// Mark user activity, deferring the inactivity timeout
    pub async fn record_activity(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == SessionState::Authenticated || inner.state == SessionState::Refreshing {
            inner.last_activity = Utc::now();
        }
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    /// Force an immediate refresh check.
    /// Intended for app-resume hooks where timers may have been suspended.
    pub async fn refresh_now(&self) {
        let generation = self.inner.lock().await.generation;
        self.refresh(generation).await;
    }

    /// Run one refresh transition for the given session generation.
    ///
    /// A failed refresh is fatal for the session: the refresh token is
    /// treated as revoked, everything is torn down and the caller must log
    /// in again. No retry - a stale refresh token will not become valid by
    /// waiting.
    async fn refresh(&self, generation: u64) {
        let refresh_token = {
            let mut inner = self.inner.lock().await;
            if inner.generation != generation || inner.state != SessionState::Authenticated {
                return;
            }
            let Some(session) = &inner.session else {
                return;
            };
            let token = session.credential.refresh_token.clone();
            inner.state = SessionState::Refreshing;
            token
        };

        match self.backend.submit_refresh(&refresh_token).await {
            Ok(response) => {
                let mut inner = self.inner.lock().await;
                if inner.generation != generation {
                    debug!("stale refresh response discarded");
                    return;
                }

                // Both tokens are replaced together even when the backend
                // rotates only the access token.
                let new_refresh = response.refresh_token.unwrap_or(refresh_token);
                let bundle = CredentialBundle::new(response.access_token, new_refresh);

                let Some(persistent) = inner.session.as_ref().map(|s| s.persistent) else {
                    return;
                };

                if let Err(e) = inner.store.save(&bundle, persistent) {
                    warn!(error = %e, "failed to re-persist refreshed credentials");
                }

                if let Some(session) = inner.session.as_mut() {
                    session.credential = bundle.clone();
                }
                inner.state = SessionState::Authenticated;

                // Reschedule relative to the new issuance time, dropping the
                // timer armed for the previous bundle
                if let Some(task) = inner.refresh_task.take() {
                    task.abort();
                }
                inner.refresh_task = Some(self.spawn_refresh_task(generation, bundle.refresh_at()));
                debug!("credentials refreshed");
            }
            Err(e) => {
                let mut inner = self.inner.lock().await;
                if inner.generation != generation {
                    return;
                }
                warn!(error = %e, "token refresh failed, ending session");
                self.teardown(&mut inner, EndReason::RefreshFailed);
            }
        }
    }

    // =========================================================================
    // Offline verification
    // =========================================================================

    /// Verify a secret against the stored offline verifier for a principal.
    /// Returns `false` when no verifier exists.
    pub async fn verify_offline(&self, principal: &str, secret: &str) -> Result<bool, AuthError> {
        let inner = self.inner.lock().await;
        match inner.store.verifier(principal) {
            Some(digest) => Ok(crypto::verify_password(secret, digest)?),
            None => Ok(false),
        }
    }

    // =========================================================================
    // Observers
    // =========================================================================

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    pub async fn is_authenticated(&self) -> bool {
        matches!(
            self.inner.lock().await.state,
            SessionState::Authenticated | SessionState::Refreshing
        )
    }

    pub async fn profile(&self) -> Option<UserProfile> {
        self.inner
            .lock()
            .await
            .session
            .as_ref()
            .map(|s| s.profile.clone())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Install a session from a fresh backend login response
    fn activate(
        &self,
        inner: &mut Inner,
        generation: u64,
        principal: String,
        response: LoginResponse,
        persistent: bool,
    ) -> UserProfile {
        let bundle = CredentialBundle::new(response.access_token, response.refresh_token);

        // Persistence failure is non-fatal: the in-memory session stays
        // valid, it just will not survive a restart.
        if let Err(e) = inner.store.save(&bundle, persistent) {
            warn!(error = %e, "failed to persist credentials");
        }

        inner.attempts.clear(&principal);
        self.install(inner, generation, principal, response.profile.clone(), bundle, persistent);
        info!("session started");
        response.profile
    }

    /// Install an authenticated session and arm its timers
    fn install(
        &self,
        inner: &mut Inner,
        generation: u64,
        principal: String,
        profile: UserProfile,
        bundle: CredentialBundle,
        persistent: bool,
    ) {
        let refresh_at = bundle.refresh_at();

        inner.session = Some(Session {
            principal,
            profile: profile.clone(),
            credential: bundle,
            persistent,
        });
        inner.state = SessionState::Authenticated;
        inner.last_activity = Utc::now();

        if let Some(task) = inner.refresh_task.take() {
            task.abort();
        }
        if let Some(task) = inner.watchdog_task.take() {
            task.abort();
        }
        inner.refresh_task = Some(self.spawn_refresh_task(generation, refresh_at));
        inner.watchdog_task = Some(self.spawn_watchdog(generation));

        self.emit(SessionEvent::Started { profile });
    }

    /// Tear down the session: cancel timers, erase stored credentials and
    /// settle in `Anonymous`. Explicit logout also clears the principal's
    /// attempt record and offline verifier; a timeout keeps the lockout
    /// history intact.
    fn teardown(&self, inner: &mut Inner, reason: EndReason) {
        // A login still in flight has no session yet and never emitted
        // Started, so it must not produce an Ended. Bumping the generation
        // below is what supersedes it.
        let had_session = inner.session.is_some();

        inner.generation += 1;
        if let Some(task) = inner.refresh_task.take() {
            task.abort();
        }
        if let Some(task) = inner.watchdog_task.take() {
            task.abort();
        }

        if let Err(e) = inner.store.clear() {
            warn!(error = %e, "failed to clear credential store");
        }

        if reason == EndReason::LoggedOut {
            if let Some(principal) = inner.session.as_ref().map(|s| s.principal.clone()) {
                inner.attempts.clear(&principal);
                if let Err(e) = inner.store.remove_verifier(&principal) {
                    warn!(error = %e, "failed to remove offline verifier");
                }
            }
        }

        inner.session = None;
        inner.state = SessionState::Anonymous;

        if had_session {
            info!(?reason, "session ended");
            self.emit(SessionEvent::Ended { reason });
        }
    }

    fn emit(&self, event: SessionEvent) {
        if let Err(e) = self.events.try_send(event) {
            debug!(error = %e, "session event dropped");
        }
    }

    fn spawn_refresh_task(&self, generation: u64, refresh_at: DateTime<Utc>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let delay = (refresh_at - Utc::now())
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);
            tokio::time::sleep(delay).await;
            manager.refresh(generation).await;
        })
    }

    fn spawn_watchdog(&self, generation: u64) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(ACTIVITY_POLL_INTERVAL_SECS));
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !manager.watchdog_tick(generation).await {
                    break;
                }
            }
        })
    }

    /// One watchdog poll: end the session after 30 minutes of inactivity,
    /// and catch refreshes that became overdue while the process was
    /// suspended. Returns `false` once the watched generation is gone.
    async fn watchdog_tick(&self, generation: u64) -> bool {
        let overdue = {
            let mut inner = self.inner.lock().await;
            if inner.generation != generation {
                return false;
            }
            if inner.state != SessionState::Authenticated {
                // A refresh is in flight; check again next tick
                return true;
            }

            let idle = Utc::now() - inner.last_activity;
            if idle >= Duration::minutes(INACTIVITY_TIMEOUT_MINUTES) {
                info!(idle_minutes = idle.num_minutes(), "inactivity timeout");
                self.teardown(&mut inner, EndReason::TimedOut);
                return false;
            }

            inner
                .session
                .as_ref()
                .map(|s| s.credential.needs_refresh())
                .unwrap_or(false)
        };

        if overdue {
            debug!("refresh overdue, refreshing immediately");
            self.refresh(generation).await;
        }
        true
    }
}

/// Validate login input shape before any I/O
fn validate_login_input(principal: &str, secret: &str) -> Result<(), AuthError> {
    let principal = principal.trim();
    if principal.is_empty() {
        return Err(AuthError::InvalidInput("principal is required".to_string()));
    }
    if principal.len() > MAX_PRINCIPAL_LENGTH {
        return Err(AuthError::InvalidInput("principal is too long".to_string()));
    }
    let looks_like_email = principal
        .split_once('@')
        .map(|(local, domain)| !local.is_empty() && domain.contains('.'))
        .unwrap_or(false);
    if !looks_like_email {
        return Err(AuthError::InvalidInput(
            "principal must be an email address".to_string(),
        ));
    }
    if secret.len() < MIN_SECRET_LENGTH {
        return Err(AuthError::InvalidInput(format!(
            "secret must be at least {} characters",
            MIN_SECRET_LENGTH
        )));
    }
    if secret.len() > MAX_SECRET_LENGTH {
        return Err(AuthError::InvalidInput("secret is too long".to_string()));
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use tokio::sync::Notify;

    use super::*;
    use crate::backend::{BackendError, RefreshResponse};
    use crate::crypto::CipherKey;
    use async_trait::async_trait;
    use tempfile::{tempdir, TempDir};

    const GOOD_SECRET: &str = "Sup3r$ecret!";

    fn profile() -> UserProfile {
        UserProfile {
            user_id: 7,
            email: "u@example.com".to_string(),
            display_name: Some("Test User".to_string()),
        }
    }

    #[derive(Default)]
    struct MockBackend {
        login_calls: AtomicUsize,
        refresh_calls: AtomicUsize,
        logout_calls: AtomicUsize,
        fail_login: AtomicBool,
        fail_refresh: AtomicBool,
        login_gate: Option<Arc<Notify>>,
        refresh_gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl IdentityBackend for MockBackend {
        async fn submit_login(
            &self,
            _principal: &str,
            _secret: &str,
        ) -> Result<LoginResponse, BackendError> {
            self.login_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.login_gate {
                gate.notified().await;
            }
            if self.fail_login.load(Ordering::SeqCst) {
                return Err(BackendError::Unauthorized);
            }
            Ok(LoginResponse {
                access_token: "a1".to_string(),
                refresh_token: "r1".to_string(),
                profile: profile(),
            })
        }

        async fn submit_refresh(
            &self,
            _refresh_token: &str,
        ) -> Result<RefreshResponse, BackendError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.refresh_gate {
                gate.notified().await;
            }
            if self.fail_refresh.load(Ordering::SeqCst) {
                return Err(BackendError::Unauthorized);
            }
            Ok(RefreshResponse {
                access_token: "a2".to_string(),
                refresh_token: Some("r2".to_string()),
            })
        }

        async fn submit_logout(&self, _access_token: &str) -> Result<(), BackendError> {
            self.logout_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn fetch_profile(&self, access_token: &str) -> Result<UserProfile, BackendError> {
            if access_token == "a1" {
                Ok(profile())
            } else {
                Err(BackendError::Unauthorized)
            }
        }

        async fn exchange_social_token(
            &self,
            _provider: SocialProvider,
            _provider_token: &str,
        ) -> Result<LoginResponse, BackendError> {
            Ok(LoginResponse {
                access_token: "a1".to_string(),
                refresh_token: "r1".to_string(),
                profile: profile(),
            })
        }
    }

    struct Fixture {
        manager: SessionManager,
        events: mpsc::Receiver<SessionEvent>,
        backend: Arc<MockBackend>,
        key: CipherKey,
        _dir: TempDir,
    }

    fn fixture_with(backend: MockBackend) -> Fixture {
        let dir = tempdir().unwrap();
        let key = CipherKey::generate();
        let store = CredentialStore::new(dir.path().to_path_buf(), key.clone()).unwrap();
        let attempts = AttemptTracker::open(dir.path());
        let backend = Arc::new(backend);
        let (manager, events) = SessionManager::new(backend.clone(), store, attempts);
        Fixture {
            manager,
            events,
            backend,
            key,
            _dir: dir,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MockBackend::default())
    }

    #[tokio::test]
    async fn test_login_success_emits_started_and_persists() {
        let mut fx = fixture();

        let profile = fx
            .manager
            .login("u@example.com", GOOD_SECRET, true)
            .await
            .unwrap();
        assert_eq!(profile.email, "u@example.com");
        assert_eq!(fx.manager.state().await, SessionState::Authenticated);

        assert_eq!(
            fx.events.recv().await,
            Some(SessionEvent::Started { profile: profile.clone() })
        );

        // The persistent scope decrypts to the issued bundle
        let store = CredentialStore::new(fx._dir.path().to_path_buf(), fx.key.clone()).unwrap();
        let (bundle, persistent) = store.load().expect("persistent bundle present");
        assert_eq!(bundle.access_token, "a1");
        assert_eq!(bundle.refresh_token, "r1");
        assert!(persistent);
    }

    #[tokio::test]
    async fn test_invalid_input_never_reaches_backend() {
        let fx = fixture();

        assert!(matches!(
            fx.manager.login("", GOOD_SECRET, false).await,
            Err(AuthError::InvalidInput(_))
        ));
        assert!(matches!(
            fx.manager.login("not-an-email", GOOD_SECRET, false).await,
            Err(AuthError::InvalidInput(_))
        ));
        assert!(matches!(
            fx.manager.login("u@example.com", "short", false).await,
            Err(AuthError::InvalidInput(_))
        ));

        assert_eq!(fx.backend.login_calls.load(Ordering::SeqCst), 0);
        assert_eq!(fx.manager.state().await, SessionState::Anonymous);
    }

    #[tokio::test]
    async fn test_lockout_after_five_failures_skips_backend() {
        let fx = fixture();
        fx.backend.fail_login.store(true, Ordering::SeqCst);

        for _ in 0..5 {
            let err = fx
                .manager
                .login("bad@example.com", GOOD_SECRET, false)
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::Backend(BackendError::Unauthorized)));
        }
        assert_eq!(fx.backend.login_calls.load(Ordering::SeqCst), 5);

        // Sixth attempt is rejected locally without network I/O
        let err = fx
            .manager
            .login("bad@example.com", GOOD_SECRET, false)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AccountLocked));
        assert_eq!(fx.backend.login_calls.load(Ordering::SeqCst), 5);

        // An unrelated principal is unaffected
        fx.backend.fail_login.store(false, Ordering::SeqCst);
        fx.manager
            .login("good@example.com", GOOD_SECRET, false)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_login_while_authenticated_is_rejected() {
        let fx = fixture();
        fx.manager
            .login("u@example.com", GOOD_SECRET, false)
            .await
            .unwrap();

        let err = fx
            .manager
            .login("u@example.com", GOOD_SECRET, false)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AlreadyAuthenticated));
    }

    #[tokio::test]
    async fn test_logout_clears_everything() {
        let mut fx = fixture();
        fx.manager
            .login("u@example.com", GOOD_SECRET, true)
            .await
            .unwrap();
        assert_eq!(
            fx.events.recv().await,
            Some(SessionEvent::Started { profile: profile() })
        );

        fx.manager.logout().await;

        assert_eq!(fx.manager.state().await, SessionState::Anonymous);
        assert!(fx.manager.profile().await.is_none());
        assert_eq!(fx.backend.logout_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            fx.events.recv().await,
            Some(SessionEvent::Ended { reason: EndReason::LoggedOut })
        );

        let store = CredentialStore::new(fx._dir.path().to_path_buf(), fx.key.clone()).unwrap();
        assert_eq!(store.load(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_during_pending_login_emits_no_events() {
        let gate = Arc::new(Notify::new());
        let mut fx = fixture_with(MockBackend {
            login_gate: Some(gate.clone()),
            ..MockBackend::default()
        });

        // Start a login and hold its response at the backend
        let manager = fx.manager.clone();
        let pending = tokio::spawn(async move {
            manager.login("u@example.com", GOOD_SECRET, false).await
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(fx.manager.state().await, SessionState::Authenticating);

        // Logout before the login lands: nothing ever started, so
        // nothing must be reported as ended
        fx.manager.logout().await;
        assert_eq!(fx.manager.state().await, SessionState::Anonymous);
        assert!(fx.events.try_recv().is_err());
        assert_eq!(fx.backend.logout_calls.load(Ordering::SeqCst), 0);

        // The released login is superseded and installs nothing
        gate.notify_one();
        let result = pending.await.unwrap();
        assert!(matches!(result, Err(AuthError::Superseded)));
        assert_eq!(fx.manager.state().await, SessionState::Anonymous);
        assert!(fx.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_logout_when_anonymous_is_a_quiet_no_op() {
        let mut fx = fixture();
        fx.manager.logout().await;
        assert_eq!(fx.backend.logout_calls.load(Ordering::SeqCst), 0);
        assert!(fx.events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_timer_rotates_both_tokens() {
        let mut fx = fixture();
        fx.manager
            .login("u@example.com", GOOD_SECRET, true)
            .await
            .unwrap();
        let _ = fx.events.recv().await;

        // Let the 55-minute refresh timer fire under paused time
        tokio::time::sleep(std::time::Duration::from_secs(56 * 60)).await;

        assert_eq!(fx.backend.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.manager.state().await, SessionState::Authenticated);

        let store = CredentialStore::new(fx._dir.path().to_path_buf(), fx.key.clone()).unwrap();
        let (bundle, _) = store.load().expect("refreshed bundle present");
        assert_eq!(bundle.access_token, "a2");
        assert_eq!(bundle.refresh_token, "r2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_now_replaces_the_pending_timer() {
        let fx = fixture();
        fx.manager
            .login("u@example.com", GOOD_SECRET, true)
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        fx.manager.refresh_now().await;
        assert_eq!(fx.backend.refresh_calls.load(Ordering::SeqCst), 1);

        // The login-time timer is gone; only the timer armed for the new
        // bundle fires within the next hour
        tokio::time::sleep(std::time::Duration::from_secs(56 * 60)).await;
        assert_eq!(fx.backend.refresh_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_watchdog_catches_overdue_refresh() {
        let fx = fixture();
        fx.manager
            .login("u@example.com", GOOD_SECRET, true)
            .await
            .unwrap();

        // Simulate a process that was suspended past the refresh point
        let generation = {
            let mut inner = fx.manager.inner.lock().await;
            let session = inner.session.as_mut().unwrap();
            session.credential.issued_at = Utc::now() - Duration::minutes(56);
            inner.generation
        };

        assert!(fx.manager.watchdog_tick(generation).await);
        assert_eq!(fx.backend.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.manager.state().await, SessionState::Authenticated);

        let inner = fx.manager.inner.lock().await;
        let session = inner.session.as_ref().unwrap();
        assert_eq!(session.credential.access_token, "a2");
        assert_eq!(session.credential.refresh_token, "r2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_failure_is_fatal_for_the_session() {
        let mut fx = fixture();
        fx.backend.fail_refresh.store(true, Ordering::SeqCst);
        fx.manager
            .login("u@example.com", GOOD_SECRET, true)
            .await
            .unwrap();
        let _ = fx.events.recv().await;

        tokio::time::sleep(std::time::Duration::from_secs(56 * 60)).await;

        assert_eq!(fx.manager.state().await, SessionState::Anonymous);
        assert_eq!(
            fx.events.recv().await,
            Some(SessionEvent::Ended { reason: EndReason::RefreshFailed })
        );
        assert_eq!(fx.backend.refresh_calls.load(Ordering::SeqCst), 1);

        let store = CredentialStore::new(fx._dir.path().to_path_buf(), fx.key.clone()).unwrap();
        assert_eq!(store.load(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_wins_over_late_refresh() {
        let gate = Arc::new(Notify::new());
        let mut fx = fixture_with(MockBackend {
            refresh_gate: Some(gate.clone()),
            ..MockBackend::default()
        });

        fx.manager
            .login("u@example.com", GOOD_SECRET, true)
            .await
            .unwrap();
        let _ = fx.events.recv().await;

        // Start a refresh and hold its response at the backend
        let manager = fx.manager.clone();
        let in_flight = tokio::spawn(async move { manager.refresh_now().await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(fx.manager.state().await, SessionState::Refreshing);

        // Logout while the refresh is in flight
        fx.manager.logout().await;
        assert_eq!(
            fx.events.recv().await,
            Some(SessionEvent::Ended { reason: EndReason::LoggedOut })
        );

        // Release the stale refresh; it must not resurrect the session
        gate.notify_one();
        in_flight.await.unwrap();

        assert_eq!(fx.manager.state().await, SessionState::Anonymous);
        assert!(fx.events.try_recv().is_err());

        let store = CredentialStore::new(fx._dir.path().to_path_buf(), fx.key.clone()).unwrap();
        assert_eq!(store.load(), None);
    }

    #[tokio::test]
    async fn test_inactivity_timeout_tears_down_but_keeps_attempts() {
        let mut fx = fixture();

        // Build up some lockout history for an unrelated principal
        fx.backend.fail_login.store(true, Ordering::SeqCst);
        for _ in 0..5 {
            let _ = fx.manager.login("bad@example.com", GOOD_SECRET, false).await;
        }
        fx.backend.fail_login.store(false, Ordering::SeqCst);

        fx.manager
            .login("u@example.com", GOOD_SECRET, true)
            .await
            .unwrap();
        let _ = fx.events.recv().await;

        // Simulate half an hour of inactivity and run one watchdog poll
        let generation = {
            let mut inner = fx.manager.inner.lock().await;
            inner.last_activity = Utc::now() - Duration::minutes(INACTIVITY_TIMEOUT_MINUTES + 1);
            inner.generation
        };
        assert!(!fx.manager.watchdog_tick(generation).await);

        assert_eq!(fx.manager.state().await, SessionState::Anonymous);
        assert_eq!(
            fx.events.recv().await,
            Some(SessionEvent::Ended { reason: EndReason::TimedOut })
        );

        // Timeout preserves lockout history, unlike explicit logout
        let err = fx
            .manager
            .login("bad@example.com", GOOD_SECRET, false)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AccountLocked));
    }

    #[tokio::test]
    async fn test_record_activity_defers_timeout() {
        let fx = fixture();
        fx.manager
            .login("u@example.com", GOOD_SECRET, false)
            .await
            .unwrap();

        {
            let mut inner = fx.manager.inner.lock().await;
            inner.last_activity = Utc::now() - Duration::minutes(INACTIVITY_TIMEOUT_MINUTES + 1);
        }
        fx.manager.record_activity().await;

        let generation = fx.manager.inner.lock().await.generation;
        assert!(fx.manager.watchdog_tick(generation).await);
        assert_eq!(fx.manager.state().await, SessionState::Authenticated);
    }

    #[tokio::test]
    async fn test_resume_restores_session_from_store() {
        let mut fx = fixture();
        fx.manager
            .login("u@example.com", GOOD_SECRET, true)
            .await
            .unwrap();
        let _ = fx.events.recv().await;

        // A second manager over the same profile picks the session up
        let store = CredentialStore::new(fx._dir.path().to_path_buf(), fx.key.clone()).unwrap();
        let attempts = AttemptTracker::open(fx._dir.path());
        let (resumed, mut resumed_events) =
            SessionManager::new(fx.backend.clone(), store, attempts);

        let profile = resumed.resume().await.unwrap().expect("session resumed");
        assert_eq!(profile.email, "u@example.com");
        assert_eq!(resumed.state().await, SessionState::Authenticated);
        assert_eq!(
            resumed_events.recv().await,
            Some(SessionEvent::Started { profile })
        );
    }

    #[tokio::test]
    async fn test_resume_preserves_the_stored_scope() {
        let fx = fixture();
        {
            let mut inner = fx.manager.inner.lock().await;
            let bundle = CredentialBundle::new("a1".into(), "r1".into());
            inner.store.save(&bundle, false).unwrap();
        }

        fx.manager.resume().await.unwrap().expect("session resumed");

        // A session-scope bundle must not be upgraded to persistent
        let inner = fx.manager.inner.lock().await;
        assert!(!inner.session.as_ref().unwrap().persistent);
    }

    #[tokio::test]
    async fn test_resume_fails_closed_without_stored_credentials() {
        let fx = fixture();
        assert!(fx.manager.resume().await.unwrap().is_none());
        assert_eq!(fx.manager.state().await, SessionState::Anonymous);
    }

    #[tokio::test]
    async fn test_social_login_installs_session() {
        let mut fx = fixture();
        let profile = fx
            .manager
            .login_social(SocialProvider::Google, "provider-token", false)
            .await
            .unwrap();
        assert_eq!(profile.email, "u@example.com");
        assert_eq!(fx.manager.state().await, SessionState::Authenticated);
        assert_eq!(
            fx.events.recv().await,
            Some(SessionEvent::Started { profile })
        );
    }

    #[tokio::test]
    async fn test_social_login_requires_a_token() {
        let fx = fixture();
        assert!(matches!(
            fx.manager.login_social(SocialProvider::Apple, "", false).await,
            Err(AuthError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_offline_verifier_checks_remembered_secret() {
        let fx = fixture();
        fx.manager
            .login("u@example.com", GOOD_SECRET, true)
            .await
            .unwrap();

        assert!(fx
            .manager
            .verify_offline("U@Example.com", GOOD_SECRET)
            .await
            .unwrap());
        assert!(!fx
            .manager
            .verify_offline("u@example.com", "wrong-secret")
            .await
            .unwrap());
        assert!(!fx
            .manager
            .verify_offline("other@example.com", GOOD_SECRET)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_failed_login_leaves_no_partial_state() {
        let fx = fixture();
        fx.backend.fail_login.store(true, Ordering::SeqCst);

        let _ = fx.manager.login("u@example.com", GOOD_SECRET, true).await;

        // Either both tokens exist or neither: after a failure, neither
        assert_eq!(fx.manager.state().await, SessionState::Anonymous);
        assert!(fx.manager.profile().await.is_none());
        let store = CredentialStore::new(fx._dir.path().to_path_buf(), fx.key.clone()).unwrap();
        assert_eq!(store.load(), None);
    }
}
