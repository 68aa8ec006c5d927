//! Fakes shared by the session and content tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use context_viewer::config::Config;
use context_viewer::identity::Identity;
use context_viewer::oauth::{
    Acquisition, AcquisitionFailure, AuthBackend, CodeCallback, CodeResponse, IdentitySdk,
    KeyValueStore, MemoryStore, PromptMode, SdkConfig, TokenGrant,
};
use context_viewer::session::AuthSession;

pub fn identity(email: &str) -> Identity {
    Identity {
        email: email.to_string(),
        name: "Carlos".to_string(),
        picture_url: "https://lh3.googleusercontent.com/a/photo".to_string(),
    }
}

pub fn grant(token: &str, expires_in: u64, user: Option<Identity>) -> TokenGrant {
    TokenGrant {
        access_token: token.to_string(),
        expires_in,
        user,
    }
}

/// Scripted exchange server
pub struct FakeBackend {
    pub refresh_delay: Mutex<Duration>,
    pub refresh_outcome: Mutex<Acquisition>,
    pub exchange_outcome: Mutex<Acquisition>,
    pub refreshes: AtomicUsize,
    pub exchanges: AtomicUsize,
    pub revokes: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            refresh_delay: Mutex::new(Duration::from_millis(10)),
            refresh_outcome: Mutex::new(Ok(grant("refreshed", 3600, None))),
            exchange_outcome: Mutex::new(Ok(grant(
                "exchanged",
                3600,
                Some(identity("carlosmartinezt@gmail.com")),
            ))),
            refreshes: AtomicUsize::new(0),
            exchanges: AtomicUsize::new(0),
            revokes: AtomicUsize::new(0),
        })
    }

    pub fn with_refresh(self: Arc<Self>, outcome: Acquisition, delay: Duration) -> Arc<Self> {
        *self.refresh_outcome.lock() = outcome;
        *self.refresh_delay.lock() = delay;
        self
    }

    pub fn with_exchange(self: Arc<Self>, outcome: Acquisition) -> Arc<Self> {
        *self.exchange_outcome.lock() = outcome;
        self
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl AuthBackend for FakeBackend {
    async fn exchange(&self, _code: &str) -> Acquisition {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        self.exchange_outcome.lock().clone()
    }

    async fn refresh(&self) -> Acquisition {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        let delay = *self.refresh_delay.lock();
        tokio::time::sleep(delay).await;
        self.refresh_outcome.lock().clone()
    }

    async fn revoke(&self) -> Result<(), AcquisitionFailure> {
        self.revokes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// SDK whose popup answers with a fixed response
pub struct FakeSdk {
    callback: Mutex<Option<CodeCallback>>,
    pub response: Mutex<Option<CodeResponse>>,
    /// How long the popup stays open before answering
    pub answer_delay: Mutex<Duration>,
    pub fail_initialize: AtomicBool,
    pub last_prompt: Mutex<Option<PromptMode>>,
    pub auto_select_disabled: AtomicBool,
}

impl FakeSdk {
    pub fn answering(response: CodeResponse) -> Arc<Self> {
        Arc::new(Self {
            callback: Mutex::new(None),
            response: Mutex::new(Some(response)),
            answer_delay: Mutex::new(Duration::ZERO),
            fail_initialize: AtomicBool::new(false),
            last_prompt: Mutex::new(None),
            auto_select_disabled: AtomicBool::new(false),
        })
    }
}

#[async_trait::async_trait]
impl IdentitySdk for FakeSdk {
    async fn initialize(
        &self,
        _config: SdkConfig,
        callback: CodeCallback,
    ) -> context_viewer::Result<()> {
        if self.fail_initialize.load(Ordering::SeqCst) {
            return Err(context_viewer::Error::Internal(
                "accounts.google.com/gsi/client failed to load".to_string(),
            ));
        }
        *self.callback.lock() = Some(callback);
        Ok(())
    }

    fn request_code(&self, prompt: PromptMode) {
        *self.last_prompt.lock() = Some(prompt);
        let response = self.response.lock().clone();
        let callback = self.callback.lock().clone();
        let delay = *self.answer_delay.lock();
        if let (Some(response), Some(callback)) = (response, callback) {
            tokio::spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                callback(response);
            });
        }
    }

    fn disable_auto_select(&self) {
        self.auto_select_disabled.store(true, Ordering::SeqCst);
    }
}

pub fn configured() -> Config {
    let mut config = Config::default();
    config.oauth.client_id = Some("client.apps.googleusercontent.com".to_string());
    config
}

pub struct Harness {
    pub session: AuthSession,
    pub backend: Arc<FakeBackend>,
    pub sdk: Arc<FakeSdk>,
    pub store: Arc<dyn KeyValueStore>,
}

pub fn harness(config: &Config, backend: Arc<FakeBackend>) -> Harness {
    harness_with_store(config, backend, Arc::new(MemoryStore::new()))
}

pub fn harness_with_store(
    config: &Config,
    backend: Arc<FakeBackend>,
    store: Arc<dyn KeyValueStore>,
) -> Harness {
    let sdk = FakeSdk::answering(CodeResponse::success("4/code"));
    let session = AuthSession::new(config, backend.clone(), sdk.clone(), Arc::clone(&store));
    Harness {
        session,
        backend,
        sdk,
        store,
    }
}
