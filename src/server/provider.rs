//! Identity provider token endpoint
//!
//! The three provider calls the exchange server makes: authorization code
//! exchange, refresh-token grant, and revocation.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::OAuthConfig;
use crate::{Error, Result};

/// Token response from the provider
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderTokens {
    /// Access token
    pub access_token: String,
    /// Lifetime in seconds
    pub expires_in: u64,
    /// Only issued on first consent
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Signed identity credential, on code exchange
    #[serde(default)]
    pub id_token: Option<String>,
}

/// Provider call failures
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Client id or secret missing
    #[error("OAuth client credentials are not configured")]
    Misconfigured,

    /// Provider answered with a non-success status
    #[error("Provider rejected the request (HTTP {status}): {body}")]
    Rejected {
        /// HTTP status
        status: u16,
        /// Raw response body
        body: String,
    },

    /// Provider could not be reached or answered garbage
    #[error("Provider request failed: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Provider token endpoint.
#[async_trait::async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Whether client credentials are present
    fn is_configured(&self) -> bool;

    /// Exchange an authorization code
    async fn exchange_code(&self, code: &str) -> std::result::Result<ProviderTokens, ProviderError>;

    /// Use a refresh token
    async fn refresh(&self, refresh_token: &str) -> std::result::Result<ProviderTokens, ProviderError>;

    /// Revoke a refresh token
    async fn revoke(&self, refresh_token: &str) -> std::result::Result<(), ProviderError>;
}

/// Google's OAuth 2.0 token and revoke endpoints.
pub struct GoogleTokenEndpoint {
    http: Client,
    credentials: Option<(String, String)>,
    token_url: String,
    revoke_url: String,
    redirect_uri: String,
}

impl GoogleTokenEndpoint {
    /// Create an endpoint from OAuth settings
    pub fn new(config: &OAuthConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {e}")))?;

        let credentials = config
            .client_id()
            .zip(config.client_secret())
            .map(|(id, secret)| (id.to_string(), secret.to_string()));

        Ok(Self {
            http,
            credentials,
            token_url: config.token_endpoint.clone(),
            revoke_url: config.revoke_endpoint.clone(),
            redirect_uri: config.redirect_uri.clone(),
        })
    }

    async fn token_request(
        &self,
        params: &[(&str, &str)],
    ) -> std::result::Result<ProviderTokens, ProviderError> {
        let (client_id, client_secret) =
            self.credentials.as_ref().ok_or(ProviderError::Misconfigured)?;

        let mut form: Vec<(&str, &str)> = vec![
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
        ];
        form.extend_from_slice(params);

        let response = self.http.post(&self.token_url).form(&form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<ProviderTokens>().await?)
    }
}

#[async_trait::async_trait]
impl TokenEndpoint for GoogleTokenEndpoint {
    fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    async fn exchange_code(&self, code: &str) -> std::result::Result<ProviderTokens, ProviderError> {
        self.token_request(&[
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> std::result::Result<ProviderTokens, ProviderError> {
        self.token_request(&[
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ])
        .await
    }

    async fn revoke(&self, refresh_token: &str) -> std::result::Result<(), ProviderError> {
        let response = self
            .http
            .post(&self.revoke_url)
            .query(&[("token", refresh_token)])
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!("Refresh token revoked at provider");
            Ok(())
        } else {
            Err(ProviderError::Rejected {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_without_secret_is_not_configured() {
        let config = OAuthConfig {
            client_id: Some("id".into()),
            client_secret: None,
            ..OAuthConfig::default()
        };
        let endpoint = GoogleTokenEndpoint::new(&config).unwrap();
        assert!(!endpoint.is_configured());
    }

    #[tokio::test]
    async fn unconfigured_endpoint_refuses_without_network() {
        let endpoint = GoogleTokenEndpoint::new(&OAuthConfig::default()).unwrap();
        assert!(matches!(
            endpoint.exchange_code("code").await,
            Err(ProviderError::Misconfigured)
        ));
        assert!(matches!(
            endpoint.refresh("rt").await,
            Err(ProviderError::Misconfigured)
        ));
    }

    #[test]
    fn token_response_parses_optional_fields() {
        let tokens: ProviderTokens =
            serde_json::from_str(r#"{"access_token":"ya29","expires_in":3599,"scope":"email","token_type":"Bearer"}"#)
                .unwrap();
        assert_eq!(tokens.expires_in, 3599);
        assert!(tokens.refresh_token.is_none());
        assert!(tokens.id_token.is_none());
    }
}
