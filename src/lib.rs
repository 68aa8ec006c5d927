//! Context Viewer auth
//!
//! Sign-in and token lifecycle for Context Viewer (Chess Tracker): a small
//! set of Google accounts browse Drive content with short-lived access
//! tokens, while the refresh token stays server-side in an HTTP-only cookie.
//!
//! # Parts
//!
//! - **Identity decoding** of the provider's signed credential
//! - **Allow-list** policy
//! - **Token acquisition**: silent refresh via cookie, consent via code exchange
//! - **Session controller**: state machine, persistence, proactive refresh
//! - **Content-fetch seam**: one retry on 401, then session expiry
//! - **Exchange server**: `/api/auth/{exchange,refresh,revoke}`

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod content;
pub mod error;
pub mod identity;
pub mod oauth;
pub mod policy;
pub mod server;
pub mod session;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(format!("Failed to install subscriber: {e}"))),
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(format!("Failed to install subscriber: {e}"))),
    }
}
