//! Auth Session Controller
//!
//! Owns the signed-in user, the current access token, and the `loading` /
//! `error` flags the UI renders. All writes to token state go through this
//! type; the acquisition client only fetches.
//!
//! # State machine
//!
//! ```text
//! Uninitialized -> Loading -> Unauthenticated
//!                          -> Authenticated(Valid | NeedsSilentRefresh | NeedsConsent)
//!                          -> Error            (misconfigured, sign-in disabled)
//! ```
//!
//! Results are tagged with a generation number taken when the request
//! started. `sign_in` (on start and again on commit), `sign_out` and
//! `dispose` bump the generation, so a silent refresh that resolves after
//! any of them is discarded.

use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{Config, SessionConfig};
use crate::content::AuthHooks;
use crate::identity::Identity;
use crate::oauth::{
    Acquisition, AcquisitionFailure, AuthBackend, FileStore, HttpAuthBackend, IdentitySdk,
    IdentityStore, KeyValueStore, PromptMode, SdkConfig, SessionToken, TokenAcquisitionClient,
    TokenGrant, TokenStore,
};
use crate::policy;
use crate::{Error, Result};

/// Token sub-state of an authenticated session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TokenState {
    /// A usable token is held
    Valid,
    /// Token missing or expired; a silent refresh is in progress
    NeedsSilentRefresh,
    /// Silent refresh failed; the user must reconnect
    NeedsConsent,
}

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionStatus {
    /// `initialize` has not run
    Uninitialized,
    /// Startup in progress
    Loading,
    /// A user is signed in
    Authenticated(TokenState),
    /// No user
    Unauthenticated,
    /// Fatal configuration problem; sign-in is disabled
    Error,
}

/// What the UI should offer after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Affordance {
    /// Nothing to retry ("you are not allowed to use this app")
    NoRetry,
    /// Generic retry button
    Retry,
    /// One-tap reconnect, the user is still known
    Reconnect,
}

/// User-visible failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
pub enum AuthFailure {
    /// Email not on the allow-list
    #[error("This account is not allowed to use this app")]
    Unauthorized,
    /// OAuth client not configured
    #[error("Sign-in is not configured: {0}")]
    Misconfigured(String),
    /// Anything else
    #[error("Sign in failed: {0}")]
    Failed(String),
}

impl AuthFailure {
    /// UI affordance for this failure
    #[must_use]
    pub fn affordance(&self) -> Affordance {
        match self {
            Self::Unauthorized | Self::Misconfigured(_) => Affordance::NoRetry,
            Self::Failed(_) => Affordance::Retry,
        }
    }
}

impl From<AcquisitionFailure> for AuthFailure {
    fn from(failure: AcquisitionFailure) -> Self {
        match failure {
            AcquisitionFailure::Unauthorized => Self::Unauthorized,
            AcquisitionFailure::Misconfigured(message) => Self::Misconfigured(message),
            AcquisitionFailure::Cancelled => Self::Failed("Sign in cancelled".to_string()),
            other => Self::Failed(other.to_string()),
        }
    }
}

impl From<AuthFailure> for Error {
    fn from(failure: AuthFailure) -> Self {
        match failure {
            AuthFailure::Unauthorized => Self::Unauthorized(AuthFailure::Unauthorized.to_string()),
            AuthFailure::Misconfigured(message) => Self::Config(message),
            AuthFailure::Failed(message) => Self::Internal(message),
        }
    }
}

/// Everything the UI reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    /// Current state
    pub status: SessionStatus,
    /// Signed-in user, possibly restored before its token is known valid
    pub user: Option<Identity>,
    /// Current access token
    pub token: Option<SessionToken>,
    /// A startup or sign-in is in progress
    pub loading: bool,
    /// Last user-visible failure
    pub error: Option<AuthFailure>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            status: SessionStatus::Uninitialized,
            user: None,
            token: None,
            loading: false,
            error: None,
        }
    }
}

impl SessionSnapshot {
    /// Current access token value
    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.token.as_ref().map(|t| t.value.as_str())
    }

    /// Whether the sign-in button should be enabled
    #[must_use]
    pub fn can_sign_in(&self) -> bool {
        self.status != SessionStatus::Error && !self.loading
    }

    /// What to offer the user right now, if anything
    #[must_use]
    pub fn affordance(&self) -> Option<Affordance> {
        if let Some(error) = &self.error {
            return Some(error.affordance());
        }
        (self.status == SessionStatus::Authenticated(TokenState::NeedsConsent))
            .then_some(Affordance::Reconnect)
    }
}

/// Delay before a proactive refresh: `max(expires_in - lead, expires_in / 2)`
#[must_use]
pub fn refresh_delay(expires_in: Duration, lead: Duration) -> Duration {
    expires_in.saturating_sub(lead).max(expires_in / 2)
}

struct Inner {
    settings: SessionConfig,
    /// `None` when no client id is configured
    sdk_config: Option<SdkConfig>,
    acquisition: TokenAcquisitionClient,
    tokens: TokenStore,
    identities: IdentityStore,
    state: watch::Sender<SessionSnapshot>,
    generation: AtomicU64,
    /// Serializes generation checks with the writes they guard
    writes: Mutex<()>,
    refresh_timer: Mutex<Option<JoinHandle<()>>>,
    hooks: Mutex<Option<Arc<AuthHooks>>>,
}

impl Inner {
    fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    fn update(&self, f: impl FnOnce(&mut SessionSnapshot)) {
        let _guard = self.writes.lock();
        self.state.send_modify(f);
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn cancel_refresh_timer(&self) {
        if let Some(handle) = self.refresh_timer.lock().take() {
            handle.abort();
        }
    }

    /// Store a grant and mark the token valid, unless superseded
    fn commit_token(&self, generation: u64, grant: &TokenGrant) -> Option<SessionToken> {
        let _guard = self.writes.lock();
        if self.generation() != generation {
            debug!("Discarding token from a superseded request");
            return None;
        }
        if self.state.borrow().user.is_none() {
            debug!("Discarding token, no user signed in");
            return None;
        }

        let token = self.persist_token(grant);
        self.state.send_modify(|s| {
            s.token = Some(token.clone());
            s.status = SessionStatus::Authenticated(TokenState::Valid);
        });
        Some(token)
    }

    fn persist_token(&self, grant: &TokenGrant) -> SessionToken {
        match self.tokens.persist(&grant.access_token, grant.expires_in) {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Failed to persist access token, keeping it in memory");
                SessionToken::issued_now(grant.access_token.clone(), grant.expires_in)
            }
        }
    }
}

/// The auth session controller.
///
/// Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct AuthSession {
    inner: Arc<Inner>,
}

impl AuthSession {
    /// Create a session over explicit collaborators
    #[must_use]
    pub fn new(
        config: &Config,
        backend: Arc<dyn AuthBackend>,
        sdk: Arc<dyn IdentitySdk>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::default());
        let inner = Inner {
            settings: config.session.clone(),
            sdk_config: config.oauth.sdk_config().ok(),
            acquisition: TokenAcquisitionClient::new(backend, sdk),
            tokens: TokenStore::new(Arc::clone(&store), config.session.safety_buffer),
            identities: IdentityStore::new(store),
            state,
            generation: AtomicU64::new(0),
            writes: Mutex::new(()),
            refresh_timer: Mutex::new(None),
            hooks: Mutex::new(None),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Create a session talking to the configured exchange server and
    /// persisting to the configured storage directory
    pub fn connect(config: &Config, sdk: Arc<dyn IdentitySdk>) -> Result<Self> {
        let backend = Arc::new(HttpAuthBackend::new(&config.session.server_url)?);
        let store = match &config.session.storage_dir {
            Some(dir) => FileStore::new(dir.into())?,
            None => FileStore::default_location()?,
        };
        Ok(Self::new(config, backend, sdk, Arc::new(store)))
    }

    /// Current state
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshot()
    }

    /// Watch state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.state.subscribe()
    }

    /// Start the session: restore the user and token, or try one silent
    /// refresh bounded by the startup timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when no OAuth client id is configured; the
    /// session then stays in [`SessionStatus::Error`].
    pub async fn initialize(&self) -> Result<()> {
        let inner = &self.inner;
        let Some(sdk_config) = inner.sdk_config.clone() else {
            warn!("Google client ID not configured, sign-in disabled");
            let failure = AuthFailure::Misconfigured("Google client ID not configured".to_string());
            inner.update(|s| {
                s.status = SessionStatus::Error;
                s.loading = false;
                s.error = Some(failure.clone());
            });
            return Err(failure.into());
        };

        inner.update(|s| {
            s.status = SessionStatus::Loading;
            s.loading = true;
        });

        if let Err(e) = inner.acquisition.initialize(sdk_config).await {
            warn!(error = %e, "Identity SDK failed to initialize");
            inner.update(|s| s.error = Some(AuthFailure::Failed(e.to_string())));
        }

        let Some(user) = inner.identities.restore() else {
            debug!("No stored user");
            inner.update(|s| {
                s.status = SessionStatus::Unauthenticated;
                s.loading = false;
            });
            return Ok(());
        };

        if let Some(token) = inner.tokens.restore() {
            info!(email = %user.email, "Resumed session with stored token");
            inner.update(|s| {
                s.user = Some(user);
                s.token = Some(token.clone());
                s.status = SessionStatus::Authenticated(TokenState::Valid);
                s.loading = false;
            });
            self.schedule_refresh(&token, inner.generation());
            return Ok(());
        }

        info!(email = %user.email, "Stored token missing or expired, trying silent refresh");
        inner.update(|s| {
            s.user = Some(user);
            s.token = None;
            s.status = SessionStatus::Authenticated(TokenState::NeedsSilentRefresh);
        });

        // A race, not a cancellation: the refresh keeps running after the
        // timeout and is applied if nothing superseded it.
        let generation = inner.generation();
        let session = self.clone();
        let attempt = tokio::spawn(async move {
            let outcome = session.inner.acquisition.refresh().await;
            session.apply_silent(generation, outcome).is_some()
        });

        match tokio::time::timeout(inner.settings.startup_refresh_timeout, attempt).await {
            Ok(Ok(true)) => info!("Session resumed after silent refresh"),
            Ok(Ok(false)) => info!("Silent refresh failed, reconnect required"),
            Ok(Err(e)) => {
                warn!(error = %e, "Silent refresh task failed");
                self.mark_needs_consent(generation);
            }
            Err(_) => {
                warn!(
                    timeout = ?inner.settings.startup_refresh_timeout,
                    "Silent refresh timed out, reconnect required"
                );
                self.mark_needs_consent(generation);
            }
        }

        inner.update(|s| s.loading = false);
        Ok(())
    }

    /// Interactive sign-in (also used to reconnect).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthorized`] when the account is not on the
    /// allow-list, [`Error::Config`] when sign-in is not configured, and
    /// [`Error::Internal`] for cancellation and other failures.
    pub async fn sign_in(&self) -> Result<Identity> {
        let inner = &self.inner;
        if inner.sdk_config.is_none() {
            return Err(Error::Config("Google client ID not configured".to_string()));
        }

        let generation = {
            let _guard = inner.writes.lock();
            let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            inner.state.send_modify(|s| {
                s.loading = true;
                s.error = None;
            });
            generation
        };

        let outcome = inner.acquisition.acquire(PromptMode::Consent).await;
        let verified = match outcome {
            Ok(grant) => match grant.user.clone() {
                None => Err(AuthFailure::Failed("No user profile returned".to_string())),
                Some(user) if !policy::is_authorized(&user.email) => {
                    warn!(email = %user.email, "Signed-in email is not on the allow-list");
                    Err(AuthFailure::Unauthorized)
                }
                Some(user) => Ok((user, grant)),
            },
            Err(failure) => Err(AuthFailure::from(failure)),
        };

        match verified {
            Ok((user, grant)) => self.complete_sign_in(generation, user, &grant),
            Err(failure) => {
                warn!(error = %failure, "Sign-in failed");
                self.fail_sign_in(generation, &failure);
                Err(failure.into())
            }
        }
    }

    fn complete_sign_in(&self, generation: u64, user: Identity, grant: &TokenGrant) -> Result<Identity> {
        let inner = &self.inner;
        let (token, committed) = {
            let _guard = inner.writes.lock();
            if inner.generation() != generation {
                debug!("Sign-in superseded before it completed");
                return Err(AcquisitionFailure::Cancelled.into());
            }
            if let Err(e) = inner.identities.persist(&user) {
                warn!(error = %e, "Failed to persist user");
            }
            let token = inner.persist_token(grant);
            inner.state.send_modify(|s| {
                s.user = Some(user.clone());
                s.token = Some(token.clone());
                s.status = SessionStatus::Authenticated(TokenState::Valid);
                s.loading = false;
                s.error = None;
            });
            // Silent refreshes started while the popup was open are now stale
            let committed = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            (token, committed)
        };

        info!(email = %user.email, expires_in = grant.expires_in, "Signed in");
        self.schedule_refresh(&token, committed);
        Ok(user)
    }

    fn fail_sign_in(&self, generation: u64, failure: &AuthFailure) {
        let inner = &self.inner;
        let _guard = inner.writes.lock();
        if inner.generation() != generation {
            return;
        }
        match failure {
            AuthFailure::Unauthorized => {
                inner.cancel_refresh_timer();
                inner.identities.clear();
                inner.tokens.clear();
                inner.state.send_modify(|s| {
                    s.user = None;
                    s.token = None;
                    s.status = SessionStatus::Unauthenticated;
                });
            }
            AuthFailure::Misconfigured(_) => {
                inner.state.send_modify(|s| s.status = SessionStatus::Error);
            }
            AuthFailure::Failed(_) => {}
        }
        inner.state.send_modify(|s| {
            s.loading = false;
            s.error = Some(failure.clone());
        });
    }

    /// Sign out from any state. Always ends `Unauthenticated` with storage
    /// cleared; server-side revocation is best-effort.
    pub async fn sign_out(&self) {
        let inner = &self.inner;
        {
            let _guard = inner.writes.lock();
            inner.generation.fetch_add(1, Ordering::SeqCst);
            inner.cancel_refresh_timer();
            inner.identities.clear();
            inner.tokens.clear();
            inner.state.send_modify(|s| {
                s.user = None;
                s.token = None;
                s.status = SessionStatus::Unauthenticated;
                s.loading = false;
                s.error = s
                    .error
                    .take()
                    .filter(|e| matches!(e, AuthFailure::Misconfigured(_)));
            });
        }

        inner.acquisition.disable_auto_select();
        if let Err(e) = inner.acquisition.revoke().await {
            debug!(error = %e, "Server-side revocation failed, ignoring");
        }
        info!("Signed out");
    }

    /// A downstream call answered 401: drop the token, keep the user.
    pub fn handle_session_expired(&self) {
        let inner = &self.inner;
        let _guard = inner.writes.lock();
        inner.cancel_refresh_timer();
        inner.tokens.clear();
        inner.state.send_modify(|s| {
            s.token = None;
            s.status = if s.user.is_some() {
                SessionStatus::Authenticated(TokenState::NeedsConsent)
            } else {
                SessionStatus::Unauthenticated
            };
        });
        warn!("Session expired, reconnect required");
    }

    /// A valid token: the cached one, or one from a silent refresh.
    pub async fn access_token(&self) -> Option<String> {
        let snapshot = self.snapshot();
        snapshot.user.as_ref()?;
        if let Some(token) = snapshot
            .token
            .filter(|t| t.is_valid(self.inner.tokens.safety_buffer()))
        {
            return Some(token.value);
        }
        self.refresh_access_token().await
    }

    /// Request a token in the given mode.
    ///
    /// Silent mode behaves like [`access_token`](Self::access_token);
    /// consent mode runs [`sign_in`](Self::sign_in) and never errors.
    pub async fn request_token(&self, mode: PromptMode) -> Option<String> {
        match mode {
            PromptMode::Silent => self.access_token().await,
            PromptMode::Consent => match self.sign_in().await {
                Ok(_) => self.snapshot().access_token().map(str::to_string),
                Err(_) => None,
            },
        }
    }

    /// Silent refresh. Concurrent callers share one request and receive the
    /// same token.
    pub async fn refresh_access_token(&self) -> Option<String> {
        let inner = &self.inner;
        let generation = inner.generation();
        {
            let _guard = inner.writes.lock();
            if inner.state.borrow().user.is_none() {
                return None;
            }
            inner.state.send_if_modified(|s| {
                let stale = s.status == SessionStatus::Authenticated(TokenState::Valid)
                    && !s
                        .token
                        .as_ref()
                        .is_some_and(|t| t.is_valid(inner.tokens.safety_buffer()));
                if stale {
                    s.status = SessionStatus::Authenticated(TokenState::NeedsSilentRefresh);
                }
                stale
            });
        }

        let outcome = inner.acquisition.refresh().await;
        let succeeded = outcome.is_ok();
        if let Some(token) = self.apply_silent(generation, outcome) {
            return Some(token.value);
        }
        if !succeeded {
            return None;
        }
        // Superseded while in flight: hand out whatever is current
        self.snapshot()
            .token
            .filter(|t| t.is_valid(inner.tokens.safety_buffer()))
            .map(|t| t.value)
    }

    /// Install refresh and session-expired callbacks into `hooks`
    pub fn register(&self, hooks: &Arc<AuthHooks>) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let refresh_weak = weak.clone();
        hooks.set_refresh_callback(Arc::new(move || {
            let weak = refresh_weak.clone();
            async move {
                let inner = weak.upgrade()?;
                AuthSession { inner }.refresh_access_token().await
            }
            .boxed()
        }));
        hooks.set_session_expired_callback(Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                AuthSession { inner }.handle_session_expired();
            }
        }));
        *self.inner.hooks.lock() = Some(Arc::clone(hooks));
    }

    /// Stop timers, detach from the content layer, and ignore any
    /// in-flight results. State and storage are left as they are.
    pub fn dispose(&self) {
        let inner = &self.inner;
        {
            let _guard = inner.writes.lock();
            inner.generation.fetch_add(1, Ordering::SeqCst);
            inner.cancel_refresh_timer();
        }
        if let Some(hooks) = inner.hooks.lock().take() {
            hooks.clear();
        }
        debug!("Session disposed");
    }

    /// Apply a silent refresh outcome. Returns the new token on success.
    fn apply_silent(&self, generation: u64, outcome: Acquisition) -> Option<SessionToken> {
        let inner = &self.inner;
        match outcome {
            Ok(grant) => {
                let token = inner.commit_token(generation, &grant)?;
                debug!(expires_in = grant.expires_in, "Applied refreshed token");
                self.schedule_refresh(&token, generation);
                Some(token)
            }
            Err(failure) => {
                let _guard = inner.writes.lock();
                if inner.generation() != generation {
                    return None;
                }
                let buffer = inner.tokens.safety_buffer();
                inner.state.send_modify(|s| {
                    if let AcquisitionFailure::Misconfigured(message) = &failure {
                        s.status = SessionStatus::Error;
                        s.error = Some(AuthFailure::Misconfigured(message.clone()));
                        return;
                    }
                    let still_valid = s.token.as_ref().is_some_and(|t| t.is_valid(buffer));
                    if s.user.is_some() && !still_valid {
                        s.status = SessionStatus::Authenticated(TokenState::NeedsConsent);
                    }
                });
                debug!(error = %failure, "Silent refresh failed");
                None
            }
        }
    }

    fn mark_needs_consent(&self, generation: u64) {
        let inner = &self.inner;
        let _guard = inner.writes.lock();
        if inner.generation() != generation {
            return;
        }
        inner.state.send_if_modified(|s| {
            let waiting = s.status == SessionStatus::Authenticated(TokenState::NeedsSilentRefresh);
            if waiting {
                s.status = SessionStatus::Authenticated(TokenState::NeedsConsent);
            }
            waiting
        });
    }

    /// Arm the proactive refresh timer for `token`, replacing any previous one
    fn schedule_refresh(&self, token: &SessionToken, generation: u64) {
        let Some(remaining) = token.time_until_expiry() else {
            return;
        };
        let delay = refresh_delay(remaining, self.inner.settings.refresh_lead);
        let weak = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            debug!("Proactive token refresh");
            let session = AuthSession { inner };
            let outcome = session.inner.acquisition.refresh().await;
            if outcome.is_err() {
                info!("Proactive refresh failed, keeping current token until it expires");
            }
            session.apply_silent(generation, outcome);
        });

        debug!(delay = ?delay, "Scheduled proactive refresh");
        if let Some(previous) = self.inner.refresh_timer.lock().replace(handle) {
            previous.abort();
        }
    }
}
