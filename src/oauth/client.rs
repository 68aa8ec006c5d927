//! Token Acquisition Client
//!
//! Obtains access tokens in two modes:
//!
//! - **Silent**: `POST /api/auth/refresh`, relying on the HTTP-only refresh
//!   cookie. Concurrent callers share one in-flight request.
//! - **Consent**: the SDK code client opens a popup, the resulting code is
//!   exchanged at `POST /api/auth/exchange`. One pending slot; a newer
//!   request replaces an older one, which then resolves as cancelled.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use url::Url;

use super::sdk::{CodeCallback, CodeResponse, IdentitySdk, PromptMode, SdkConfig};
use crate::identity::Identity;
use crate::{Error, Result};

/// Body the server returns when it cannot find OAuth credentials
pub const MISCONFIGURED_MESSAGE: &str = "Server misconfigured";

/// Why a token could not be obtained.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AcquisitionFailure {
    /// OAuth client id or secret missing
    #[error("OAuth client is not configured: {0}")]
    Misconfigured(String),

    /// Signed-in email is not on the allow-list
    #[error("Email is not on the allow-list")]
    Unauthorized,

    /// Identity provider rejected the request
    #[error("Provider rejected the request: {0}")]
    Provider(String),

    /// Server endpoint could not be reached
    #[error("Network error: {0}")]
    Network(String),

    /// Refresh material revoked or expired; consent is needed
    #[error("Refresh grant expired or revoked")]
    ExpiredGrant,

    /// User closed the popup or a newer request took over
    #[error("Request cancelled")]
    Cancelled,
}

impl AcquisitionFailure {
    /// Whether the user can usefully try again
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Misconfigured(_) | Self::Unauthorized)
    }
}

/// Outcome of a token request
pub type Acquisition = std::result::Result<TokenGrant, AcquisitionFailure>;

/// A freshly issued access token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenGrant {
    /// Bearer value
    pub access_token: String,
    /// Lifetime in seconds
    pub expires_in: u64,
    /// Profile, present on code exchange
    #[serde(default)]
    pub user: Option<Identity>,
}

/// Client for the server exchange endpoints.
#[async_trait::async_trait]
pub trait AuthBackend: Send + Sync {
    /// Exchange an authorization code for a token and profile
    async fn exchange(&self, code: &str) -> Acquisition;

    /// Obtain a new token from the refresh cookie
    async fn refresh(&self) -> Acquisition;

    /// Revoke refresh material and clear the cookie
    async fn revoke(&self) -> std::result::Result<(), AcquisitionFailure>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: String,
}

/// [`AuthBackend`] talking to the exchange server over HTTP.
///
/// The underlying client keeps a cookie jar so the refresh cookie set by
/// `exchange` is sent back on `refresh` and `revoke`.
pub struct HttpAuthBackend {
    http: Client,
    base_url: Url,
}

impl HttpAuthBackend {
    /// Create a backend for the server at `base_url`
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("Invalid auth server URL {base_url}: {e}")))?;
        let http = Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self { http, base_url })
    }

    fn endpoint(&self, path: &str) -> std::result::Result<Url, AcquisitionFailure> {
        self.base_url
            .join(path)
            .map_err(|e| AcquisitionFailure::Network(format!("Invalid endpoint {path}: {e}")))
    }

    async fn post(
        &self,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> std::result::Result<reqwest::Response, AcquisitionFailure> {
        let url = self.endpoint(path)?;
        let mut request = self.http.post(url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        request
            .send()
            .await
            .map_err(|e| AcquisitionFailure::Network(e.to_string()))
    }

    async fn read_grant(response: reqwest::Response, refreshing: bool) -> Acquisition {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<TokenGrant>()
                .await
                .map_err(|e| AcquisitionFailure::Provider(format!("Malformed token response: {e}")));
        }

        let message = response
            .json::<ErrorBody>()
            .await
            .map(|b| b.error)
            .unwrap_or_default();
        Err(classify(status, &message, refreshing))
    }
}

/// Map a server error status to a failure kind.
fn classify(status: StatusCode, message: &str, refreshing: bool) -> AcquisitionFailure {
    match status {
        StatusCode::FORBIDDEN => AcquisitionFailure::Unauthorized,
        StatusCode::UNAUTHORIZED if refreshing => AcquisitionFailure::ExpiredGrant,
        StatusCode::INTERNAL_SERVER_ERROR if message == MISCONFIGURED_MESSAGE => {
            AcquisitionFailure::Misconfigured(message.to_string())
        }
        _ => AcquisitionFailure::Provider(format!("HTTP {status}: {message}")),
    }
}

#[async_trait::async_trait]
impl AuthBackend for HttpAuthBackend {
    async fn exchange(&self, code: &str) -> Acquisition {
        let response = self
            .post("api/auth/exchange", Some(serde_json::json!({ "code": code })))
            .await?;
        Self::read_grant(response, false).await
    }

    async fn refresh(&self) -> Acquisition {
        let response = self.post("api/auth/refresh", None).await?;
        Self::read_grant(response, true).await
    }

    async fn revoke(&self) -> std::result::Result<(), AcquisitionFailure> {
        let response = self.post("api/auth/revoke", None).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(AcquisitionFailure::Provider(format!(
                "Revoke failed: HTTP {}",
                response.status()
            )))
        }
    }
}

type SharedRefresh = Shared<BoxFuture<'static, Acquisition>>;

/// Requests tokens from the SDK and the exchange server.
pub struct TokenAcquisitionClient {
    backend: Arc<dyn AuthBackend>,
    sdk: Arc<dyn IdentitySdk>,
    /// Single pending consent request
    pending_code: Arc<Mutex<Option<oneshot::Sender<CodeResponse>>>>,
    /// Silent refresh currently in flight, shared by all callers
    refresh_in_flight: Mutex<Option<SharedRefresh>>,
    /// SDK loaded and callback registered
    sdk_ready: AtomicBool,
}

impl TokenAcquisitionClient {
    /// Create a client over the given backend and SDK
    #[must_use]
    pub fn new(backend: Arc<dyn AuthBackend>, sdk: Arc<dyn IdentitySdk>) -> Self {
        Self {
            backend,
            sdk,
            pending_code: Arc::new(Mutex::new(None)),
            refresh_in_flight: Mutex::new(None),
            sdk_ready: AtomicBool::new(false),
        }
    }

    /// Initialize the SDK, routing its callback into the pending slot
    pub async fn initialize(&self, config: SdkConfig) -> Result<()> {
        let slot = Arc::clone(&self.pending_code);
        let callback: CodeCallback = Arc::new(move |response: CodeResponse| {
            let sender = slot.lock().take();
            match sender {
                Some(tx) => {
                    let _ = tx.send(response);
                }
                None => debug!("Code response arrived with no pending request"),
            }
        });

        let result = self.sdk.initialize(config, callback).await;
        self.sdk_ready.store(result.is_ok(), Ordering::SeqCst);
        result
    }

    /// Whether consent requests can be served
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.sdk_ready.load(Ordering::SeqCst)
    }

    /// Request a token, resolving `None` on any failure
    pub async fn request_token(&self, mode: PromptMode) -> Option<TokenGrant> {
        match self.acquire(mode).await {
            Ok(grant) => Some(grant),
            Err(e) => {
                debug!(prompt = mode.as_prompt(), error = %e, "Token request failed");
                None
            }
        }
    }

    /// Request a token, keeping the failure classification
    pub async fn acquire(&self, mode: PromptMode) -> Acquisition {
        match mode {
            PromptMode::Silent => self.refresh().await,
            PromptMode::Consent => self.consent().await,
        }
    }

    /// Silent refresh; concurrent callers share one request and one result
    pub async fn refresh(&self) -> Acquisition {
        let shared = {
            let mut slot = self.refresh_in_flight.lock();
            if let Some(in_flight) = slot.as_ref() {
                debug!("Joining in-flight token refresh");
                in_flight.clone()
            } else {
                let backend = Arc::clone(&self.backend);
                let fresh = async move { backend.refresh().await }.boxed().shared();
                *slot = Some(fresh.clone());
                fresh
            }
        };

        let outcome = shared.clone().await;

        let mut slot = self.refresh_in_flight.lock();
        if slot.as_ref().is_some_and(|current| current.ptr_eq(&shared)) {
            *slot = None;
        }
        drop(slot);

        match &outcome {
            Ok(grant) => debug!(expires_in = grant.expires_in, "Silent refresh succeeded"),
            Err(e) => debug!(error = %e, "Silent refresh failed"),
        }
        outcome
    }

    async fn consent(&self) -> Acquisition {
        // Without a registered callback the popup result could never arrive
        if !self.is_ready() {
            warn!("Consent requested before the identity SDK initialized");
            return Err(AcquisitionFailure::Provider(
                "Identity SDK not initialized".to_string(),
            ));
        }

        let (tx, rx) = oneshot::channel();
        if self.pending_code.lock().replace(tx).is_some() {
            info!("Replacing pending consent request");
        }

        self.sdk.request_code(PromptMode::Consent);

        let response = rx.await.map_err(|_| AcquisitionFailure::Cancelled)?;
        match response.code.as_deref() {
            Some(code) if !code.is_empty() => self.backend.exchange(code).await,
            _ if response.is_cancellation() => Err(AcquisitionFailure::Cancelled),
            _ => {
                let error = response
                    .error_description
                    .or(response.error)
                    .unwrap_or_else(|| "No authorization code received".to_string());
                warn!(error = %error, "Consent request failed");
                Err(AcquisitionFailure::Provider(error))
            }
        }
    }

    /// Best-effort server-side revocation
    pub async fn revoke(&self) -> std::result::Result<(), AcquisitionFailure> {
        self.backend.revoke().await
    }

    /// Forward to the SDK
    pub fn disable_auto_select(&self) {
        self.sdk.disable_auto_select();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingBackend {
        refreshes: AtomicUsize,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl AuthBackend for CountingBackend {
        async fn exchange(&self, code: &str) -> Acquisition {
            Ok(TokenGrant {
                access_token: format!("exchanged-{code}"),
                expires_in: 3600,
                user: None,
            })
        }

        async fn refresh(&self) -> Acquisition {
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            Ok(TokenGrant {
                access_token: format!("refreshed-{n}"),
                expires_in: 3600,
                user: None,
            })
        }

        async fn revoke(&self) -> std::result::Result<(), AcquisitionFailure> {
            Ok(())
        }
    }

    /// SDK that answers each code request with a scripted response.
    struct ScriptedSdk {
        callback: Mutex<Option<CodeCallback>>,
        response: CodeResponse,
        answer: bool,
    }

    #[async_trait::async_trait]
    impl IdentitySdk for ScriptedSdk {
        async fn initialize(&self, _config: SdkConfig, callback: CodeCallback) -> Result<()> {
            *self.callback.lock() = Some(callback);
            Ok(())
        }

        fn request_code(&self, _prompt: PromptMode) {
            if !self.answer {
                return;
            }
            if let Some(callback) = self.callback.lock().clone() {
                let response = self.response.clone();
                tokio::spawn(async move { callback(response) });
            }
        }

        fn disable_auto_select(&self) {}
    }

    fn sdk_config() -> SdkConfig {
        SdkConfig {
            client_id: "client".into(),
            scope: DEFAULT_SCOPE.into(),
            redirect_uri: "postmessage".into(),
        }
    }

    const DEFAULT_SCOPE: &str = "email";

    async fn client_with(response: CodeResponse, answer: bool) -> (Arc<CountingBackend>, TokenAcquisitionClient) {
        let backend = Arc::new(CountingBackend {
            refreshes: AtomicUsize::new(0),
            delay: Duration::from_millis(50),
        });
        let sdk = Arc::new(ScriptedSdk {
            callback: Mutex::new(None),
            response,
            answer,
        });
        let client = TokenAcquisitionClient::new(backend.clone(), sdk);
        client.initialize(sdk_config()).await.unwrap();
        (backend, client)
    }

    #[tokio::test]
    async fn concurrent_silent_refreshes_share_one_request() {
        // GIVEN: no refresh in flight
        let (backend, client) = client_with(CodeResponse::default(), false).await;

        // WHEN: five callers refresh at once
        let results = futures::future::join_all((0..5).map(|_| client.refresh())).await;

        // THEN: one backend call, identical results
        assert_eq!(backend.refreshes.load(Ordering::SeqCst), 1);
        let first = results[0].clone().unwrap();
        assert!(results.iter().all(|r| r.as_ref() == Ok(&first)));

        // AND: the slot is released for the next refresh
        let next = client.refresh().await.unwrap();
        assert_eq!(next.access_token, "refreshed-2");
    }

    #[tokio::test]
    async fn consent_exchanges_the_returned_code() {
        let (_, client) = client_with(CodeResponse::success("4/code"), true).await;
        let grant = client.acquire(PromptMode::Consent).await.unwrap();
        assert_eq!(grant.access_token, "exchanged-4/code");
    }

    #[tokio::test]
    async fn closed_popup_resolves_cancelled_and_none() {
        let (_, client) = client_with(CodeResponse::failure("popup_closed"), true).await;
        assert_eq!(
            client.acquire(PromptMode::Consent).await,
            Err(AcquisitionFailure::Cancelled)
        );
        assert!(client.request_token(PromptMode::Consent).await.is_none());
    }

    #[tokio::test]
    async fn provider_error_is_not_a_cancellation() {
        let (_, client) = client_with(CodeResponse::failure("server_error"), true).await;
        assert!(matches!(
            client.acquire(PromptMode::Consent).await,
            Err(AcquisitionFailure::Provider(_))
        ));
    }

    #[tokio::test]
    async fn second_consent_request_replaces_the_first() {
        // GIVEN: an SDK that never answers on its own
        let (_, client) = client_with(CodeResponse::default(), false).await;
        let client = Arc::new(client);

        let first = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.acquire(PromptMode::Consent).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.acquire(PromptMode::Consent).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // WHEN: the SDK finally delivers one response
        let tx = client.pending_code.lock().take().unwrap();
        tx.send(CodeResponse::success("late")).unwrap();

        // THEN: the superseded request was cancelled, the newer one won
        assert_eq!(first.await.unwrap(), Err(AcquisitionFailure::Cancelled));
        assert_eq!(second.await.unwrap().unwrap().access_token, "exchanged-late");
    }

    #[tokio::test]
    async fn consent_before_initialize_fails_immediately() {
        // GIVEN: an SDK that was never initialized
        let backend = Arc::new(CountingBackend {
            refreshes: AtomicUsize::new(0),
            delay: Duration::from_millis(1),
        });
        let sdk = Arc::new(ScriptedSdk {
            callback: Mutex::new(None),
            response: CodeResponse::success("never"),
            answer: true,
        });
        let client = TokenAcquisitionClient::new(backend, sdk);

        // WHEN/THEN: consent resolves at once with a provider error
        assert!(!client.is_ready());
        assert_eq!(
            client.acquire(PromptMode::Consent).await,
            Err(AcquisitionFailure::Provider("Identity SDK not initialized".into()))
        );
    }

    #[test]
    fn classify_maps_statuses() {
        assert_eq!(
            classify(StatusCode::FORBIDDEN, "Unauthorized user", false),
            AcquisitionFailure::Unauthorized
        );
        assert_eq!(
            classify(StatusCode::UNAUTHORIZED, "Refresh token invalid", true),
            AcquisitionFailure::ExpiredGrant
        );
        assert!(matches!(
            classify(StatusCode::UNAUTHORIZED, "Token exchange failed", false),
            AcquisitionFailure::Provider(_)
        ));
        assert_eq!(
            classify(StatusCode::INTERNAL_SERVER_ERROR, MISCONFIGURED_MESSAGE, true),
            AcquisitionFailure::Misconfigured(MISCONFIGURED_MESSAGE.into())
        );
        assert!(matches!(
            classify(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", true),
            AcquisitionFailure::Provider(_)
        ));
    }

    #[test]
    fn http_backend_rejects_bad_base_url() {
        assert!(matches!(HttpAuthBackend::new("not a url"), Err(Error::Config(_))));
    }
}
