//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::oauth::{DEFAULT_SAFETY_BUFFER, DEFAULT_SCOPES, SdkConfig};
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// HTTP server configuration
    pub server: ServerConfig,
    /// OAuth client configuration
    pub oauth: OAuthConfig,
    /// Client session configuration
    pub session: SessionConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

/// OAuth client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// Google OAuth client id (`GOOGLE_CLIENT_ID`)
    pub client_id: Option<String>,
    /// Google OAuth client secret, server only (`GOOGLE_CLIENT_SECRET`)
    pub client_secret: Option<String>,
    /// Production deployment: refresh cookie gets the `Secure` attribute
    pub production: bool,
    /// Provider token endpoint
    pub token_endpoint: String,
    /// Provider revocation endpoint
    pub revoke_endpoint: String,
    /// Redirect URI used by the popup code flow
    pub redirect_uri: String,
    /// Requested scopes
    pub scopes: Vec<String>,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            production: false,
            token_endpoint: "https://oauth2.googleapis.com/token".to_string(),
            revoke_endpoint: "https://oauth2.googleapis.com/revoke".to_string(),
            redirect_uri: "postmessage".to_string(),
            scopes: DEFAULT_SCOPES.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

impl OAuthConfig {
    /// Client id, if set and non-empty
    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref().filter(|s| !s.trim().is_empty())
    }

    /// Client secret, if set and non-empty
    #[must_use]
    pub fn client_secret(&self) -> Option<&str> {
        self.client_secret.as_deref().filter(|s| !s.trim().is_empty())
    }

    /// Settings for the SDK code client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when no client id is configured.
    pub fn sdk_config(&self) -> Result<SdkConfig> {
        let client_id = self
            .client_id()
            .ok_or_else(|| Error::Config("Google client ID not configured".to_string()))?;
        Ok(SdkConfig {
            client_id: client_id.to_string(),
            scope: self.scopes.join(" "),
            redirect_uri: self.redirect_uri.clone(),
        })
    }
}

/// Client session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Base URL of the exchange server
    pub server_url: String,
    /// Tokens are treated as expired this long before their real expiry
    #[serde(with = "humantime_serde")]
    pub safety_buffer: Duration,
    /// Startup silent refresh gives up waiting after this long
    #[serde(with = "humantime_serde")]
    pub startup_refresh_timeout: Duration,
    /// Proactive refresh fires at least this long before expiry
    #[serde(with = "humantime_serde")]
    pub refresh_lead: Duration,
    /// Directory for persisted session state (default ~/.context-viewer/session)
    pub storage_dir: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:3000/".to_string(),
            safety_buffer: DEFAULT_SAFETY_BUFFER,
            startup_refresh_timeout: Duration::from_millis(3000),
            refresh_lead: Duration::from_secs(300),
            storage_dir: None,
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// Precedence (lowest first): defaults, YAML file, `CONTEXT_VIEWER_*`
    /// variables, then `GOOGLE_CLIENT_ID`, `GOOGLE_CLIENT_SECRET` and
    /// `VERCEL_ENV`.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("CONTEXT_VIEWER_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Env files first so the well-known variables can come from them
        config.load_env_files();
        config.apply_well_known_env();
        config.expand_env_vars();

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Apply the deployment's conventional variable names
    fn apply_well_known_env(&mut self) {
        self.apply_env_values(
            env::var("GOOGLE_CLIENT_ID").ok(),
            env::var("GOOGLE_CLIENT_SECRET").ok(),
            env::var("VERCEL_ENV").ok(),
        );
    }

    fn apply_env_values(
        &mut self,
        client_id: Option<String>,
        client_secret: Option<String>,
        deployment: Option<String>,
    ) {
        if let Some(id) = client_id.filter(|v| !v.is_empty()) {
            self.oauth.client_id = Some(id);
        }
        if let Some(secret) = client_secret.filter(|v| !v.is_empty()) {
            self.oauth.client_secret = Some(secret);
        }
        if deployment.as_deref() == Some("production") {
            self.oauth.production = true;
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in OAuth and session values
    fn expand_env_vars(&mut self) {
        // Pattern: ${VAR} or ${VAR:-default}
        let Ok(re) = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}") else {
            return;
        };

        for value in [&mut self.oauth.client_id, &mut self.oauth.client_secret]
            .into_iter()
            .flatten()
        {
            *value = Self::expand_string(&re, value);
        }
        self.session.server_url = Self::expand_string(&re, &self.session.server_url);
        if let Some(dir) = self.session.storage_dir.as_mut() {
            *dir = Self::expand_string(&re, dir);
        }
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to a human-readable string ("60s", or "1500ms"
    /// when not a whole number of seconds)
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.trim();

        // "ms" first, it also ends in 's'
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            let mins = mins.parse::<u64>().map_err(serde::de::Error::custom)?;
            mins.checked_mul(60)
                .map(Duration::from_secs)
                .ok_or_else(|| serde::de::Error::custom(format!("duration too large: {s}")))
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}
