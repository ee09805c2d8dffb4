//! Session store: token, profile and credit balance, plus the background
//! token refresh loop.
//!
//! # State machine
//!
//! ```text
//! Unauthenticated -> Authenticating -> Authenticated <-> RefreshInFlight
//! ```
//!
//! A failed sign-in returns to whatever state preceded it. A failed refresh
//! signs out. Every sign-out bumps the session generation, so a network call
//! that started under an older session can never write its result back.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::{AuthOps, AuthResponse, SharedToken};
use crate::error::AppError;
use crate::session::model::{Session, SessionSnapshot, UserProfile};
use crate::storage::{PersistedSession, SessionVault};

/// Default token refresh interval (the server issues one-hour tokens).
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(50 * 60);

const MIN_PASSWORD_LEN: usize = 6;

// ─────────────────────────────────────────────────────────────────────────────
// Public types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AuthState {
    Unauthenticated,
    Authenticating,
    /// `optimistic` until an API call has accepted the restored token.
    Authenticated { optimistic: bool },
    RefreshInFlight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignOutReason {
    UserRequested,
    SessionExpired,
    RefreshFailed,
}

impl SignOutReason {
    /// Whether the consumer must route the user back to the sign-in entry
    /// point.
    pub fn requires_redirect(&self) -> bool {
        !matches!(self, SignOutReason::UserRequested)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn { user_id: String },
    Refreshed,
    CreditsChanged { balance: u32 },
    SignedOut { reason: SignOutReason },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignUpOutcome {
    SignedIn(SessionSnapshot),
    /// Account created but no token issued; the user signs in separately.
    PendingSignIn { email: String },
}

// ─────────────────────────────────────────────────────────────────────────────
// SessionStore
// ─────────────────────────────────────────────────────────────────────────────

struct State {
    auth: AuthState,
    session: Option<Session>,
    /// Cancelled on sign-out. Background work tied to the session derives
    /// child tokens from it.
    lifetime: CancellationToken,
    generation: u64,
}

struct Inner {
    auth: Arc<dyn AuthOps>,
    vault: Arc<dyn SessionVault>,
    token: SharedToken,
    refresh_interval: Duration,
    state: Mutex<State>,
    events: broadcast::Sender<SessionEvent>,
    /// Serializes vault writes against the vault clear of a sign-out.
    persist_lock: tokio::sync::Mutex<()>,
}

/// Shared handle to the session. Cloning is cheap.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("state", &self.state())
            .finish()
    }
}

impl SessionStore {
    pub fn new(
        auth: Arc<dyn AuthOps>,
        vault: Arc<dyn SessionVault>,
        token: SharedToken,
        refresh_interval: Duration,
    ) -> Self {
        let lifetime = CancellationToken::new();
        lifetime.cancel();
        let (events, _) = broadcast::channel(64);

        Self {
            inner: Arc::new(Inner {
                auth,
                vault,
                token,
                refresh_interval,
                state: Mutex::new(State {
                    auth: AuthState::Unauthenticated,
                    session: None,
                    lifetime,
                    generation: 0,
                }),
                events,
                persist_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: SessionEvent) {
        // No receivers is fine.
        let _ = self.inner.events.send(event);
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    pub fn state(&self) -> AuthState {
        self.lock().auth
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock().session.is_some()
    }

    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        let state = self.lock();
        let optimistic = matches!(state.auth, AuthState::Authenticated { optimistic: true });
        state
            .session
            .as_ref()
            .map(|s| SessionSnapshot::of(s, optimistic))
    }

    pub fn profile(&self) -> Option<UserProfile> {
        self.lock().session.as_ref().map(|s| s.profile.clone())
    }

    /// `None` when signed out.
    pub fn credit_balance(&self) -> Option<u32> {
        self.lock().session.as_ref().map(Session::credit_balance)
    }

    /// Token cancelled when the current session ends. Already cancelled when
    /// signed out.
    pub fn lifetime(&self) -> CancellationToken {
        self.lock().lifetime.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    fn current_generation(&self) -> u64 {
        self.lock().generation
    }

    // ── Bootstrap ─────────────────────────────────────────────────────────────

    /// Restores the persisted session without touching the network.
    ///
    /// A record whose profile no longer parses is deleted and the store starts
    /// signed out.
    pub async fn bootstrap(&self) -> Result<AuthState, AppError> {
        let Some(stored) = self.inner.vault.load().await? else {
            info!("[SESSION] No stored session");
            return Ok(AuthState::Unauthenticated);
        };

        let profile = if stored.token.expose_secret().trim().is_empty() {
            None
        } else {
            serde_json::from_str::<UserProfile>(&stored.profile_json).ok()
        };

        let Some(profile) = profile else {
            warn!("[SESSION] Stored session is unreadable; clearing it");
            let _guard = self.inner.persist_lock.lock().await;
            self.inner.vault.clear().await?;
            return Ok(AuthState::Unauthenticated);
        };

        let session = Session {
            token: stored.token,
            token_issued_at: stored.issued_at,
            profile,
        };
        let user_id = session.profile.id.clone();
        self.install(session, true);
        info!("[SESSION] Restored session for user {}", user_id);
        self.emit(SessionEvent::SignedIn { user_id });

        Ok(self.state())
    }

    // ── Sign-in / sign-up ─────────────────────────────────────────────────────

    pub async fn sign_in(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<SessionSnapshot, AppError> {
        validate_email(email)?;
        if password.expose_secret().is_empty() {
            return Err(AppError::Validation {
                field: "password".to_string(),
                message: "Password is required".to_string(),
            });
        }

        let (prior, generation) = self.begin_authenticating()?;
        let result = self.inner.auth.sign_in(email.trim(), password).await;

        match result {
            Ok(AuthResponse {
                token: Some(token),
                user,
            }) => self.complete_authentication(token, user, generation).await,
            Ok(AuthResponse { token: None, .. }) => {
                self.abort_authenticating(prior, generation);
                error!("[SESSION] Sign-in response carried no token");
                Err(AppError::Internal(
                    "Sign-in response carried no token".to_string(),
                ))
            }
            Err(e) => {
                self.abort_authenticating(prior, generation);
                info!("[SESSION] Sign-in failed: {:?}", e.category());
                Err(e)
            }
        }
    }

    pub async fn sign_up(
        &self,
        email: &str,
        password: &SecretString,
        display_name: &str,
    ) -> Result<SignUpOutcome, AppError> {
        validate_email(email)?;
        if password.expose_secret().chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::Validation {
                field: "password".to_string(),
                message: format!("Password must be at least {} characters", MIN_PASSWORD_LEN),
            });
        }
        if display_name.trim().is_empty() {
            return Err(AppError::Validation {
                field: "displayName".to_string(),
                message: "Display name is required".to_string(),
            });
        }

        let (prior, generation) = self.begin_authenticating()?;
        let result = self
            .inner
            .auth
            .sign_up(email.trim(), password, display_name.trim())
            .await;

        match result {
            Ok(AuthResponse {
                token: Some(token),
                user,
            }) => self
                .complete_authentication(token, user, generation)
                .await
                .map(SignUpOutcome::SignedIn),
            Ok(AuthResponse { token: None, user }) => {
                self.abort_authenticating(prior, generation);
                info!("[SESSION] Account created; sign-in pending");
                Ok(SignUpOutcome::PendingSignIn { email: user.email })
            }
            Err(e) => {
                self.abort_authenticating(prior, generation);
                info!("[SESSION] Sign-up failed: {:?}", e.category());
                Err(e)
            }
        }
    }

    fn begin_authenticating(&self) -> Result<(AuthState, u64), AppError> {
        let mut state = self.lock();
        if state.auth == AuthState::Authenticating {
            return Err(AppError::Validation {
                field: "session".to_string(),
                message: "Sign-in already in progress".to_string(),
            });
        }
        let prior = state.auth;
        state.auth = AuthState::Authenticating;
        Ok((prior, state.generation))
    }

    /// Returns to the state preceding the attempt, unless a sign-out
    /// intervened.
    fn abort_authenticating(&self, prior: AuthState, generation: u64) {
        let mut state = self.lock();
        if state.generation == generation && state.auth == AuthState::Authenticating {
            state.auth = prior;
        }
    }

    async fn complete_authentication(
        &self,
        token: SecretString,
        profile: UserProfile,
        generation: u64,
    ) -> Result<SessionSnapshot, AppError> {
        if self.current_generation() != generation {
            warn!("[SESSION] Sign-out during sign-in; discarding the new session");
            return Err(AppError::NotAuthenticated);
        }

        let session = Session {
            token,
            token_issued_at: Utc::now(),
            profile,
        };
        let user_id = session.profile.id.clone();
        let new_generation = self.install(session.clone(), false);
        self.persist(&session, new_generation).await;

        info!("[SESSION] Signed in as user {}", user_id);
        self.emit(SessionEvent::SignedIn { user_id });

        Ok(SessionSnapshot::of(&session, false))
    }

    /// Replaces the in-memory session and restarts the refresh loop.
    fn install(&self, session: Session, optimistic: bool) -> u64 {
        let (lifetime, generation) = {
            let mut state = self.lock();
            state.lifetime.cancel();
            state.lifetime = CancellationToken::new();
            state.generation += 1;
            self.inner.token.set(session.token.clone());
            state.session = Some(session);
            state.auth = AuthState::Authenticated { optimistic };
            (state.lifetime.clone(), state.generation)
        };
        self.spawn_refresh_loop(lifetime);
        generation
    }

    // ── Refresh ───────────────────────────────────────────────────────────────

    fn spawn_refresh_loop(&self, lifetime: CancellationToken) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let interval = self.inner.refresh_interval;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = lifetime.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                let Some(inner) = weak.upgrade() else { break };
                let store = SessionStore { inner };
                if store.refresh().await.is_err() && lifetime.is_cancelled() {
                    break;
                }
            }
            debug!("[SESSION] Refresh loop stopped");
        });
    }

    /// Exchanges the current token for a fresh one. Any failure signs out.
    pub async fn refresh(&self) -> Result<(), AppError> {
        let (token, generation) = {
            let mut state = self.lock();
            let Some(session) = state.session.as_ref() else {
                return Err(AppError::NotAuthenticated);
            };
            if state.auth == AuthState::RefreshInFlight {
                debug!("[SESSION] Refresh already in flight");
                return Ok(());
            }
            let token = session.token.clone();
            state.auth = AuthState::RefreshInFlight;
            (token, state.generation)
        };

        info!("[SESSION] Refreshing token");
        let result = self.inner.auth.refresh(&token).await;

        let refreshed = match result {
            Ok(AuthResponse {
                token: Some(token),
                user,
            }) => {
                let mut state = self.lock();
                if state.generation != generation {
                    debug!("[SESSION] Session ended during refresh; result discarded");
                    return Err(AppError::NotAuthenticated);
                }
                let Some(session) = state.session.as_mut() else {
                    return Err(AppError::NotAuthenticated);
                };
                session.token = token.clone();
                session.token_issued_at = Utc::now();
                session.profile = user;
                state.auth = AuthState::Authenticated { optimistic: false };
                self.inner.token.set(token);
                state.session.clone()
            }
            Ok(AuthResponse { token: None, .. }) => {
                if self.current_generation() == generation {
                    error!("[SESSION] Refresh response carried no token; signing out");
                    self.sign_out(SignOutReason::RefreshFailed).await?;
                }
                return Err(AppError::SessionExpired);
            }
            Err(e) => {
                if self.current_generation() == generation {
                    error!("[SESSION] Token refresh failed; signing out");
                    self.sign_out(SignOutReason::RefreshFailed).await?;
                }
                return Err(e);
            }
        };

        if let Some(session) = refreshed {
            self.persist(&session, generation).await;
        }
        info!("[SESSION] Token refreshed");
        self.emit(SessionEvent::Refreshed);
        Ok(())
    }

    // ── Sign-out ──────────────────────────────────────────────────────────────

    /// Ends the session and deletes the persisted record. Idempotent.
    ///
    /// The in-memory session, the token slot and the refresh loop are torn
    /// down before the first await, so no refresh or poll started afterwards
    /// can observe a live session.
    pub async fn sign_out(&self, reason: SignOutReason) -> Result<(), AppError> {
        self.end_session(reason);

        let _guard = self.inner.persist_lock.lock().await;
        self.inner.vault.clear().await
    }

    /// Stops the refresh loop without signing out. The persisted session is
    /// kept for the next start.
    pub fn shutdown(&self) {
        let state = self.lock();
        if !state.lifetime.is_cancelled() {
            state.lifetime.cancel();
            debug!("[SESSION] Shut down");
        }
    }

    fn end_session(&self, reason: SignOutReason) -> bool {
        let had_session = {
            let mut state = self.lock();
            state.lifetime.cancel();
            state.generation += 1;
            state.auth = AuthState::Unauthenticated;
            self.inner.token.clear();
            state.session.take().is_some()
        };

        if had_session {
            info!("[SESSION] Signed out ({:?})", reason);
            self.emit(SessionEvent::SignedOut { reason });
        }
        had_session
    }

    /// Passes `result` through, signing out when it reports an invalid
    /// session. Every authenticated API call goes through here.
    pub async fn intercept<T>(&self, result: Result<T, AppError>) -> Result<T, AppError> {
        match result {
            Ok(value) => {
                let mut state = self.lock();
                if state.auth == (AuthState::Authenticated { optimistic: true }) {
                    state.auth = AuthState::Authenticated { optimistic: false };
                }
                Ok(value)
            }
            Err(e) if e.is_session_invalid() => {
                warn!("[SESSION] Server refused the session; signing out");
                if let Err(clear_err) = self.sign_out(SignOutReason::SessionExpired).await {
                    warn!(
                        "[SESSION] Failed to clear stored session: {:?}",
                        clear_err.category()
                    );
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    // ── Profile and credits ───────────────────────────────────────────────────

    /// Re-fetches the profile, reconciling the local credit balance with the
    /// server.
    pub async fn sync_profile(&self) -> Result<SessionSnapshot, AppError> {
        let generation = self.current_generation();
        if !self.is_authenticated() {
            return Err(AppError::NotAuthenticated);
        }
        let profile = self.intercept(self.inner.auth.get_profile().await).await?;
        self.apply_profile_at(profile, generation).await
    }

    /// Re-syncs after the user returns from the hosted checkout page.
    pub async fn resume_after_checkout(&self) -> Result<SessionSnapshot, AppError> {
        info!("[SESSION] Resuming after checkout");
        self.sync_profile().await
    }

    /// Replaces the profile with one returned by the server.
    pub async fn apply_profile(&self, profile: UserProfile) -> Result<SessionSnapshot, AppError> {
        let generation = self.current_generation();
        self.apply_profile_at(profile, generation).await
    }

    async fn apply_profile_at(
        &self,
        profile: UserProfile,
        generation: u64,
    ) -> Result<SessionSnapshot, AppError> {
        let (session, old_balance, optimistic) = {
            let mut state = self.lock();
            if state.generation != generation {
                return Err(AppError::NotAuthenticated);
            }
            let optimistic =
                matches!(state.auth, AuthState::Authenticated { optimistic: true });
            let Some(session) = state.session.as_mut() else {
                return Err(AppError::NotAuthenticated);
            };
            let old_balance = session.profile.credits;
            session.profile = profile;
            (session.clone(), old_balance, optimistic)
        };

        self.persist(&session, generation).await;
        if session.profile.credits != old_balance {
            self.emit(SessionEvent::CreditsChanged {
                balance: session.profile.credits,
            });
        }
        Ok(SessionSnapshot::of(&session, optimistic))
    }

    /// Debits one credit locally after an accepted submission. Returns the
    /// new balance, or `None` when signed out.
    pub async fn debit_credit(&self) -> Option<u32> {
        self.update_credits(|balance| balance.saturating_sub(1)).await
    }

    /// Overwrites the local balance (for instance after the server reported
    /// insufficient credits).
    pub async fn set_credit_balance(&self, balance: u32) -> Option<u32> {
        self.update_credits(|_| balance).await
    }

    async fn update_credits(&self, f: impl FnOnce(u32) -> u32) -> Option<u32> {
        let (session, generation, changed) = {
            let mut state = self.lock();
            let generation = state.generation;
            let session = state.session.as_mut()?;
            let before = session.profile.credits;
            session.profile.credits = f(before);
            (session.clone(), generation, session.profile.credits != before)
        };

        let balance = session.profile.credits;
        if changed {
            self.persist(&session, generation).await;
            debug!("[SESSION] Credit balance now {}", balance);
            self.emit(SessionEvent::CreditsChanged { balance });
        }
        Some(balance)
    }

    pub async fn reset_password(&self, email: &str) -> Result<(), AppError> {
        validate_email(email)?;
        self.inner.auth.reset_password(email.trim()).await
    }

    // ── Persistence ───────────────────────────────────────────────────────────

    /// Writes the session to the vault unless it has been superseded. Failures
    /// are logged; the in-memory session stays authoritative.
    async fn persist(&self, session: &Session, generation: u64) {
        let profile_json = match serde_json::to_string(&session.profile) {
            Ok(json) => json,
            Err(e) => {
                warn!("[SESSION] Failed to encode profile: {}", e);
                return;
            }
        };
        let record = PersistedSession {
            token: session.token.clone(),
            issued_at: session.token_issued_at,
            profile_json,
        };

        let _guard = self.inner.persist_lock.lock().await;
        if self.current_generation() != generation {
            debug!("[SESSION] Session superseded; not persisting");
            return;
        }
        if let Err(e) = self.inner.vault.save(&record).await {
            warn!("[SESSION] Failed to persist session: {:?}", e.category());
        }
    }
}

fn validate_email(email: &str) -> Result<(), AppError> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::Validation {
            field: "email".to_string(),
            message: "Enter a valid email address".to_string(),
        });
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::storage::MemoryVault;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    pub(crate) fn profile(credits: u32) -> UserProfile {
        UserProfile {
            id: "uid-1".to_string(),
            email: "ana@example.com".to_string(),
            display_name: Some("Ana".to_string()),
            photo_url: None,
            credits,
            subscription: None,
            created_at: None,
        }
    }

    /// Scriptable auth backend.
    pub(crate) struct FakeAuth {
        pub sign_in_ok: AtomicBool,
        pub issue_token_on_sign_up: AtomicBool,
        pub refresh_ok: AtomicBool,
        pub credits: AtomicU32,
        pub sign_in_calls: AtomicUsize,
        pub refresh_calls: AtomicUsize,
        pub profile_calls: AtomicUsize,
        token_counter: AtomicUsize,
        /// When set, refresh waits for a notification before answering.
        pub refresh_gate: Option<Arc<Notify>>,
    }

    impl FakeAuth {
        pub(crate) fn new(credits: u32) -> Self {
            Self {
                sign_in_ok: AtomicBool::new(true),
                issue_token_on_sign_up: AtomicBool::new(true),
                refresh_ok: AtomicBool::new(true),
                credits: AtomicU32::new(credits),
                sign_in_calls: AtomicUsize::new(0),
                refresh_calls: AtomicUsize::new(0),
                profile_calls: AtomicUsize::new(0),
                token_counter: AtomicUsize::new(0),
                refresh_gate: None,
            }
        }

        fn next_response(&self) -> AuthResponse {
            let n = self.token_counter.fetch_add(1, Ordering::SeqCst) + 1;
            AuthResponse {
                token: Some(SecretString::from(format!("tok-{}", n))),
                user: profile(self.credits.load(Ordering::SeqCst)),
            }
        }
    }

    impl AuthOps for FakeAuth {
        fn sign_in<'a>(
            &'a self,
            _email: &'a str,
            _password: &'a SecretString,
        ) -> Pin<Box<dyn Future<Output = Result<AuthResponse, AppError>> + Send + 'a>> {
            Box::pin(async move {
                self.sign_in_calls.fetch_add(1, Ordering::SeqCst);
                if self.sign_in_ok.load(Ordering::SeqCst) {
                    Ok(self.next_response())
                } else {
                    Err(AppError::InvalidCredentials)
                }
            })
        }

        fn sign_up<'a>(
            &'a self,
            _email: &'a str,
            _password: &'a SecretString,
            _display_name: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<AuthResponse, AppError>> + Send + 'a>> {
            Box::pin(async move {
                let mut response = self.next_response();
                if !self.issue_token_on_sign_up.load(Ordering::SeqCst) {
                    response.token = None;
                }
                Ok(response)
            })
        }

        fn refresh<'a>(
            &'a self,
            _token: &'a SecretString,
        ) -> Pin<Box<dyn Future<Output = Result<AuthResponse, AppError>> + Send + 'a>> {
            Box::pin(async move {
                self.refresh_calls.fetch_add(1, Ordering::SeqCst);
                if let Some(gate) = &self.refresh_gate {
                    gate.notified().await;
                }
                if self.refresh_ok.load(Ordering::SeqCst) {
                    Ok(self.next_response())
                } else {
                    Err(AppError::SessionExpired)
                }
            })
        }

        fn reset_password<'a>(
            &'a self,
            _email: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
            Box::pin(async { Ok(()) })
        }

        fn get_profile(
            &self,
        ) -> Pin<Box<dyn Future<Output = Result<UserProfile, AppError>> + Send + '_>> {
            Box::pin(async move {
                self.profile_calls.fetch_add(1, Ordering::SeqCst);
                Ok(profile(self.credits.load(Ordering::SeqCst)))
            })
        }
    }

    pub(crate) fn store_with(
        auth: Arc<FakeAuth>,
        vault: Arc<MemoryVault>,
    ) -> (SessionStore, SharedToken) {
        let token = SharedToken::new();
        let store = SessionStore::new(auth, vault, token.clone(), DEFAULT_REFRESH_INTERVAL);
        (store, token)
    }

    fn password() -> SecretString {
        SecretString::from("hunter22".to_string())
    }

    /// A store signed in with `credits` credits.
    pub(crate) async fn signed_in_store(credits: u32) -> (SessionStore, Arc<FakeAuth>) {
        let auth = Arc::new(FakeAuth::new(credits));
        let (store, _token) = store_with(auth.clone(), Arc::new(MemoryVault::new()));
        store
            .sign_in("ana@example.com", &password())
            .await
            .expect("sign-in");
        (store, auth)
    }

    // ── Bootstrap ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn bootstrap_without_record_is_unauthenticated() {
        let auth = Arc::new(FakeAuth::new(3));
        let (store, token) = store_with(auth, Arc::new(MemoryVault::new()));

        assert_eq!(store.bootstrap().await.unwrap(), AuthState::Unauthenticated);
        assert!(token.get().is_none());
        assert!(store.lifetime().is_cancelled());
    }

    #[tokio::test]
    async fn bootstrap_restores_optimistically_without_network() {
        let auth = Arc::new(FakeAuth::new(3));
        let vault = Arc::new(MemoryVault::with_raw(
            "stored-token",
            r#"{"id":"uid-1","email":"ana@example.com","credits":5}"#,
        ));
        let (store, token) = store_with(auth.clone(), vault);

        let state = store.bootstrap().await.unwrap();

        assert_eq!(state, AuthState::Authenticated { optimistic: true });
        assert_eq!(token.get().unwrap().expose_secret(), "stored-token");
        assert_eq!(store.credit_balance(), Some(5));
        assert_eq!(auth.sign_in_calls.load(Ordering::SeqCst), 0);
        assert_eq!(auth.refresh_calls.load(Ordering::SeqCst), 0);
        assert_eq!(auth.profile_calls.load(Ordering::SeqCst), 0);
        assert!(!store.lifetime().is_cancelled());
    }

    #[tokio::test]
    async fn bootstrap_with_corrupt_profile_clears_storage() {
        let auth = Arc::new(FakeAuth::new(3));
        let vault = Arc::new(MemoryVault::with_raw("stored-token", "{not json"));
        let (store, token) = store_with(auth, vault.clone());

        assert_eq!(store.bootstrap().await.unwrap(), AuthState::Unauthenticated);
        assert!(vault.is_empty());
        assert!(token.get().is_none());
    }

    #[tokio::test]
    async fn first_accepted_call_confirms_restored_session() {
        let auth = Arc::new(FakeAuth::new(3));
        let vault = Arc::new(MemoryVault::with_raw(
            "stored-token",
            r#"{"id":"uid-1","email":"ana@example.com"}"#,
        ));
        let (store, _token) = store_with(auth, vault);
        store.bootstrap().await.unwrap();

        store.intercept(Ok::<_, AppError>(())).await.unwrap();

        assert_eq!(store.state(), AuthState::Authenticated { optimistic: false });
    }

    // ── Sign-in / sign-up ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn sign_in_persists_and_emits() {
        let auth = Arc::new(FakeAuth::new(3));
        let vault = Arc::new(MemoryVault::new());
        let (store, token) = store_with(auth, vault.clone());
        let mut events = store.subscribe();

        let snapshot = store.sign_in("ana@example.com", &password()).await.unwrap();

        assert_eq!(snapshot.credit_balance, 3);
        assert!(!snapshot.optimistic);
        assert_eq!(token.get().unwrap().expose_secret(), "tok-1");
        let stored = vault.snapshot().unwrap();
        assert_eq!(stored.token.expose_secret(), "tok-1");
        assert!(stored.profile_json.contains("\"credits\":3"));
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::SignedIn {
                user_id: "uid-1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn invalid_email_never_calls_backend() {
        let auth = Arc::new(FakeAuth::new(3));
        let (store, _token) = store_with(auth.clone(), Arc::new(MemoryVault::new()));

        let result = store.sign_in("not-an-email", &password()).await;

        assert!(matches!(result, Err(AppError::Validation { ref field, .. }) if field == "email"));
        assert_eq!(auth.sign_in_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_sign_in_keeps_prior_session() {
        let (store, auth) = signed_in_store(3).await;
        auth.sign_in_ok.store(false, Ordering::SeqCst);

        let result = store.sign_in("ana@example.com", &password()).await;

        assert!(matches!(result, Err(AppError::InvalidCredentials)));
        assert_eq!(store.state(), AuthState::Authenticated { optimistic: false });
        assert_eq!(store.credit_balance(), Some(3));
        assert!(!store.lifetime().is_cancelled());
    }

    #[tokio::test]
    async fn failed_sign_in_from_signed_out_returns_there() {
        let auth = Arc::new(FakeAuth::new(3));
        auth.sign_in_ok.store(false, Ordering::SeqCst);
        let (store, _token) = store_with(auth, Arc::new(MemoryVault::new()));

        assert!(store.sign_in("ana@example.com", &password()).await.is_err());
        assert_eq!(store.state(), AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn sign_up_without_token_is_pending() {
        let auth = Arc::new(FakeAuth::new(0));
        auth.issue_token_on_sign_up.store(false, Ordering::SeqCst);
        let vault = Arc::new(MemoryVault::new());
        let (store, token) = store_with(auth, vault.clone());

        let outcome = store
            .sign_up("ana@example.com", &password(), "Ana")
            .await
            .unwrap();

        assert_eq!(
            outcome,
            SignUpOutcome::PendingSignIn {
                email: "ana@example.com".to_string()
            }
        );
        assert_eq!(store.state(), AuthState::Unauthenticated);
        assert!(token.get().is_none());
        assert!(vault.is_empty());
    }

    #[tokio::test]
    async fn sign_up_rejects_short_password_locally() {
        let auth = Arc::new(FakeAuth::new(0));
        let (store, _token) = store_with(auth, Arc::new(MemoryVault::new()));

        let result = store
            .sign_up("ana@example.com", &SecretString::from("abc".to_string()), "Ana")
            .await;

        assert!(matches!(result, Err(AppError::Validation { ref field, .. }) if field == "password"));
    }

    // ── Refresh ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn refresh_replaces_token_and_persists() {
        let auth = Arc::new(FakeAuth::new(3));
        let vault = Arc::new(MemoryVault::new());
        let (store, token) = store_with(auth, vault.clone());
        store.sign_in("ana@example.com", &password()).await.unwrap();

        store.refresh().await.unwrap();

        assert_eq!(token.get().unwrap().expose_secret(), "tok-2");
        assert_eq!(vault.snapshot().unwrap().token.expose_secret(), "tok-2");
        assert_eq!(store.state(), AuthState::Authenticated { optimistic: false });
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_signs_out_and_stops_refreshing() {
        let auth = Arc::new(FakeAuth::new(3));
        let vault = Arc::new(MemoryVault::new());
        let (store, token) = store_with(auth.clone(), vault.clone());
        store.sign_in("ana@example.com", &password()).await.unwrap();
        let mut events = store.subscribe();
        auth.refresh_ok.store(false, Ordering::SeqCst);

        // The loop fires after one interval and fails.
        let event = events.recv().await.unwrap();

        assert_eq!(
            event,
            SessionEvent::SignedOut {
                reason: SignOutReason::RefreshFailed
            }
        );
        assert!(SignOutReason::RefreshFailed.requires_redirect());
        assert!(vault.is_empty());
        assert!(token.get().is_none());
        assert_eq!(store.state(), AuthState::Unauthenticated);
        assert_eq!(auth.refresh_calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(DEFAULT_REFRESH_INTERVAL * 4).await;
        assert_eq!(auth.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_loop_keeps_refreshing_while_signed_in() {
        let auth = Arc::new(FakeAuth::new(3));
        let (store, token) = store_with(auth.clone(), Arc::new(MemoryVault::new()));
        store.sign_in("ana@example.com", &password()).await.unwrap();

        tokio::time::sleep(DEFAULT_REFRESH_INTERVAL * 2 + Duration::from_secs(1)).await;

        assert_eq!(auth.refresh_calls.load(Ordering::SeqCst), 2);
        assert_eq!(token.get().unwrap().expose_secret(), "tok-3");
    }

    #[tokio::test]
    async fn refresh_completing_after_sign_out_is_discarded() {
        let gate = Arc::new(Notify::new());
        let mut fake = FakeAuth::new(3);
        fake.refresh_gate = Some(gate.clone());
        let auth = Arc::new(fake);
        let vault = Arc::new(MemoryVault::new());
        let (store, token) = store_with(auth.clone(), vault.clone());
        store.sign_in("ana@example.com", &password()).await.unwrap();

        let pending = tokio::spawn({
            let store = store.clone();
            async move { store.refresh().await }
        });
        while auth.refresh_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        store.sign_out(SignOutReason::UserRequested).await.unwrap();
        gate.notify_one();

        assert!(pending.await.unwrap().is_err());
        assert_eq!(store.state(), AuthState::Unauthenticated);
        assert!(token.get().is_none());
        assert!(vault.is_empty());
    }

    // ── Sign-out ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn sign_out_is_idempotent_and_emits_once() {
        let (store, _auth) = signed_in_store(3).await;
        let lifetime = store.lifetime();
        let mut events = store.subscribe();

        store.sign_out(SignOutReason::UserRequested).await.unwrap();
        store.sign_out(SignOutReason::UserRequested).await.unwrap();

        assert!(lifetime.is_cancelled());
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::SignedOut {
                reason: SignOutReason::UserRequested
            }
        );
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
        assert!(!SignOutReason::UserRequested.requires_redirect());
    }

    #[tokio::test]
    async fn session_invalid_error_signs_out_with_redirect() {
        let (store, _auth) = signed_in_store(3).await;
        let mut events = store.subscribe();

        let result: Result<(), AppError> = store.intercept(Err(AppError::SessionExpired)).await;

        assert!(matches!(result, Err(AppError::SessionExpired)));
        assert!(!store.is_authenticated());
        match events.recv().await.unwrap() {
            SessionEvent::SignedOut { reason } => assert!(reason.requires_redirect()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn transient_error_leaves_session_untouched() {
        let (store, _auth) = signed_in_store(3).await;

        let result: Result<(), AppError> = store.intercept(Err(AppError::Timeout)).await;

        assert!(matches!(result, Err(AppError::Timeout)));
        assert!(store.is_authenticated());
    }

    // ── Credits ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn debit_saturates_and_persists() {
        let auth = Arc::new(FakeAuth::new(1));
        let vault = Arc::new(MemoryVault::new());
        let (store, _token) = store_with(auth, vault.clone());
        store.sign_in("ana@example.com", &password()).await.unwrap();

        assert_eq!(store.debit_credit().await, Some(0));
        assert_eq!(store.debit_credit().await, Some(0));
        assert!(vault.snapshot().unwrap().profile_json.contains("\"credits\":0"));
    }

    #[tokio::test]
    async fn debit_when_signed_out_is_none() {
        let auth = Arc::new(FakeAuth::new(1));
        let (store, _token) = store_with(auth, Arc::new(MemoryVault::new()));
        assert_eq!(store.debit_credit().await, None);
    }

    #[tokio::test]
    async fn sync_profile_reconciles_credits() {
        let (store, auth) = signed_in_store(3).await;
        store.debit_credit().await;
        auth.credits.store(52, Ordering::SeqCst);
        let mut events = store.subscribe();

        let snapshot = store.resume_after_checkout().await.unwrap();

        assert_eq!(snapshot.credit_balance, 52);
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::CreditsChanged { balance: 52 }
        );
    }

    #[tokio::test]
    async fn sync_profile_requires_session() {
        let auth = Arc::new(FakeAuth::new(1));
        let (store, _token) = store_with(auth.clone(), Arc::new(MemoryVault::new()));

        assert!(matches!(
            store.sync_profile().await,
            Err(AppError::NotAuthenticated)
        ));
        assert_eq!(auth.profile_calls.load(Ordering::SeqCst), 0);
    }
}
