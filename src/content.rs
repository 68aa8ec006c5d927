//! Content-fetch seam
//!
//! The Drive layer holds no auth state. It receives two single-slot hooks
//! from the session: one to obtain a fresh token, one to report that the
//! session is gone. [`ContentFetcher`] is the authorized GET the Drive calls
//! go through.

use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::{Error, Result};

/// Produces a fresh access token, or `None` if one cannot be had silently
pub type RefreshCallback = Arc<dyn Fn() -> BoxFuture<'static, Option<String>> + Send + Sync>;

/// Told that the session's token was rejected and could not be replaced
pub type SessionExpiredCallback = Arc<dyn Fn() + Send + Sync>;

/// Single-slot callback registration owned by the content-fetch layer.
///
/// Installing a callback replaces the previous one.
#[derive(Default)]
pub struct AuthHooks {
    refresh: RwLock<Option<RefreshCallback>>,
    session_expired: RwLock<Option<SessionExpiredCallback>>,
}

impl AuthHooks {
    /// Create empty hooks
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the refresh callback
    pub fn set_refresh_callback(&self, callback: RefreshCallback) {
        *self.refresh.write() = Some(callback);
    }

    /// Install the session-expired callback
    pub fn set_session_expired_callback(&self, callback: SessionExpiredCallback) {
        *self.session_expired.write() = Some(callback);
    }

    /// Remove both callbacks
    pub fn clear(&self) {
        *self.refresh.write() = None;
        *self.session_expired.write() = None;
    }

    /// Ask the registered callback for a fresh token
    pub async fn refresh_token(&self) -> Option<String> {
        let callback = self.refresh.read().clone();
        match callback {
            Some(callback) => callback().await,
            None => {
                debug!("No refresh callback registered");
                None
            }
        }
    }

    /// Report an expired session to the registered callback
    pub fn notify_session_expired(&self) {
        let callback = self.session_expired.read().clone();
        if let Some(callback) = callback {
            callback();
        }
    }
}

/// Authorized GET for Drive content.
pub struct ContentFetcher {
    http: Client,
    hooks: Arc<AuthHooks>,
}

impl ContentFetcher {
    /// Create a fetcher using `hooks` for token renewal
    #[must_use]
    pub fn new(http: Client, hooks: Arc<AuthHooks>) -> Self {
        Self { http, hooks }
    }

    /// The hooks the session registers into
    #[must_use]
    pub fn hooks(&self) -> &Arc<AuthHooks> {
        &self.hooks
    }

    /// GET `url` with `access_token`.
    ///
    /// On 401 a fresh token is requested once and the call retried. If no
    /// token can be obtained or the retry is also rejected, the session is
    /// reported expired and [`Error::SessionExpired`] returned.
    pub async fn get(&self, url: &str, access_token: &str) -> Result<reqwest::Response> {
        let response = self.send(url, access_token).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!(url = %url, "Content request rejected, refreshing token");
        let Some(fresh) = self.hooks.refresh_token().await else {
            warn!(url = %url, "No fresh token available, session expired");
            self.hooks.notify_session_expired();
            return Err(Error::SessionExpired);
        };

        let retried = self.send(url, &fresh).await?;
        if retried.status() == StatusCode::UNAUTHORIZED {
            warn!(url = %url, "Refreshed token also rejected, session expired");
            self.hooks.notify_session_expired();
            return Err(Error::SessionExpired);
        }
        Ok(retried)
    }

    async fn send(&self, url: &str, access_token: &str) -> Result<reqwest::Response> {
        Ok(self.http.get(url).bearer_auth(access_token).send().await?)
    }
}
