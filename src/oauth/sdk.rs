//! Identity SDK surface
//!
//! The subset of Google Identity Services the session depends on. The SDK
//! delivers results through the single callback registered at
//! [`IdentitySdk::initialize`], never through the call that triggered them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Google OAuth scopes requested for Drive browsing
pub const DEFAULT_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/userinfo.email",
    "https://www.googleapis.com/auth/userinfo.profile",
    "https://www.googleapis.com/auth/drive.file",
    "https://www.googleapis.com/auth/drive.readonly",
];

/// How a token may be obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptMode {
    /// No user interaction allowed
    Silent,
    /// User may be shown a consent popup
    Consent,
}

impl PromptMode {
    /// Value of the provider's `prompt` parameter
    #[must_use]
    pub fn as_prompt(self) -> &'static str {
        match self {
            Self::Silent => "none",
            Self::Consent => "consent",
        }
    }
}

/// Settings handed to the SDK code client
#[derive(Debug, Clone)]
pub struct SdkConfig {
    /// OAuth client id
    pub client_id: String,
    /// Space-separated scopes
    pub scope: String,
    /// Redirect URI for the popup flow (`postmessage`)
    pub redirect_uri: String,
}

/// Result of a code-client request
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CodeResponse {
    /// Authorization code (present on success)
    #[serde(default)]
    pub code: Option<String>,
    /// Granted scopes
    #[serde(default)]
    pub scope: Option<String>,
    /// Error code (`access_denied`, `popup_closed`, ...)
    #[serde(default)]
    pub error: Option<String>,
    /// Human-readable error
    #[serde(default)]
    pub error_description: Option<String>,
}

impl CodeResponse {
    /// Successful response carrying `code`
    #[must_use]
    pub fn success(code: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            ..Self::default()
        }
    }

    /// Failed response
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Whether the user dismissed the popup rather than the provider failing
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self.error.as_deref(),
            Some("access_denied" | "popup_closed" | "popup_closed_by_user" | "user_cancel")
        )
    }
}

/// Callback the SDK invokes with each code-client result
pub type CodeCallback = Arc<dyn Fn(CodeResponse) + Send + Sync>;

/// Identity provider SDK operations used by the session.
#[async_trait::async_trait]
pub trait IdentitySdk: Send + Sync {
    /// Load the SDK and register the one result callback
    async fn initialize(&self, config: SdkConfig, callback: CodeCallback) -> Result<()>;

    /// Open the code-client popup, passing [`PromptMode::as_prompt`] as the
    /// provider's `prompt`; the outcome arrives through the callback
    fn request_code(&self, prompt: PromptMode);

    /// Stop the provider from signing the last account in automatically
    fn disable_auto_select(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_values() {
        assert_eq!(PromptMode::Silent.as_prompt(), "none");
        assert_eq!(PromptMode::Consent.as_prompt(), "consent");
    }

    #[test]
    fn cancellation_is_distinguished_from_errors() {
        assert!(CodeResponse::failure("popup_closed").is_cancellation());
        assert!(CodeResponse::failure("access_denied").is_cancellation());
        assert!(!CodeResponse::failure("server_error").is_cancellation());
        assert!(!CodeResponse::success("4/abc").is_cancellation());
    }

    #[test]
    fn code_response_deserializes_partial_payloads() {
        let ok: CodeResponse = serde_json::from_str(r#"{"code":"4/x","scope":"email"}"#).unwrap();
        assert_eq!(ok.code.as_deref(), Some("4/x"));

        let err: CodeResponse = serde_json::from_str(r#"{"error":"access_denied"}"#).unwrap();
        assert!(err.code.is_none());
        assert!(err.is_cancellation());
    }
}
