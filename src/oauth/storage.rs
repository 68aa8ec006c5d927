//! Session Storage
//!
//! Persists the signed-in identity and the current access token so a
//! restart can resume without prompting. Storage is re-read on every
//! restore: several processes may share the same directory and the last
//! write wins.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::identity::Identity;
use crate::{Error, Result};

/// Storage key for the persisted [`Identity`]
pub const USER_KEY: &str = "context-viewer-user";

/// Storage key for the access token value
pub const TOKEN_KEY: &str = "context-viewer-token";

/// Storage key for the token's absolute expiry (epoch milliseconds)
pub const TOKEN_EXPIRES_AT_KEY: &str = "context-viewer-token-expires-at";

/// Default margin before expiry at which a token stops being used
pub const DEFAULT_SAFETY_BUFFER: Duration = Duration::from_secs(60);

/// A string key/value medium, shaped like browser local storage.
pub trait KeyValueStore: Send + Sync {
    /// Read a value
    fn get(&self, key: &str) -> Option<String>;

    /// Write a value
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-process store, mainly for tests and short-lived sessions.
#[derive(Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values.write().remove(key);
        Ok(())
    }
}

/// File-backed store: one file per key under a private directory.
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `base_dir`, creating the directory if needed
    pub fn new(base_dir: PathBuf) -> Result<Self> {
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir).map_err(|e| {
                Error::Internal(format!("Failed to create session storage dir: {e}"))
            })?;
        }

        Ok(Self { base_dir })
    }

    /// Create a store in the default location (~/.context-viewer/session)
    pub fn default_location() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Internal("Cannot determine home directory".to_string()))?;

        Self::new(home.join(".context-viewer").join("session"))
    }

    /// File path for a key. Keys are hashed so any string is a safe file name.
    fn path_for(&self, key: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        let hash = format!("{:x}", hasher.finalize());
        self.base_dir.join(format!("{}.value", &hash[..16]))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(content) => Some(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read session value");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        fs::write(&path, value)
            .map_err(|e| Error::Internal(format!("Failed to write session value: {e}")))?;

        // Owner read/write only
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            let _ = fs::set_permissions(&path, perms);
        }

        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Internal(format!("Failed to delete session value: {e}"))),
        }
    }
}

/// An access token with its lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    /// Opaque bearer value
    pub value: String,

    /// When the token was obtained (unknown for tokens restored from storage)
    #[serde(default)]
    pub issued_at: Option<DateTime<Utc>>,

    /// Absolute expiry
    pub expires_at: DateTime<Utc>,
}

impl SessionToken {
    /// Build a token that expires `expires_in_secs` from now
    #[must_use]
    pub fn issued_now(value: impl Into<String>, expires_in_secs: u64) -> Self {
        let now = Utc::now();
        let lifetime = i64::try_from(expires_in_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);
        Self {
            value: value.into(),
            issued_at: Some(now),
            expires_at: now.checked_add_signed(lifetime).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Whether the token is still usable at `now`, keeping `buffer` in reserve
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        let buffer = TimeDelta::from_std(buffer).unwrap_or(TimeDelta::MAX);
        match self.expires_at.checked_sub_signed(buffer) {
            Some(usable_until) => now < usable_until,
            None => false,
        }
    }

    /// Whether the token is usable right now
    #[must_use]
    pub fn is_valid(&self, buffer: Duration) -> bool {
        self.is_valid_at(Utc::now(), buffer)
    }

    /// Time until the hard expiry, if it has not passed
    #[must_use]
    pub fn time_until_expiry(&self) -> Option<Duration> {
        (self.expires_at - Utc::now()).to_std().ok()
    }
}

/// Persists the access token and its expiry.
pub struct TokenStore {
    store: Arc<dyn KeyValueStore>,
    safety_buffer: Duration,
}

impl TokenStore {
    /// Create a token store over `store`
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, safety_buffer: Duration) -> Self {
        Self {
            store,
            safety_buffer,
        }
    }

    /// Margin applied when checking validity
    #[must_use]
    pub fn safety_buffer(&self) -> Duration {
        self.safety_buffer
    }

    /// Store `token`, expiring `expires_in_secs` from now
    pub fn persist(&self, token: &str, expires_in_secs: u64) -> Result<SessionToken> {
        let session_token = SessionToken::issued_now(token, expires_in_secs);
        self.store.set(TOKEN_KEY, token)?;
        self.store.set(
            TOKEN_EXPIRES_AT_KEY,
            &session_token.expires_at.timestamp_millis().to_string(),
        )?;
        debug!(expires_at = %session_token.expires_at, "Persisted access token");
        Ok(session_token)
    }

    /// Read the stored token if it is still valid.
    ///
    /// Missing, corrupt, or expired (within the safety buffer) entries are
    /// cleared and reported as `None`.
    pub fn restore(&self) -> Option<SessionToken> {
        let value = self.store.get(TOKEN_KEY);
        let expires_at = self
            .store
            .get(TOKEN_EXPIRES_AT_KEY)
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .and_then(DateTime::<Utc>::from_timestamp_millis);

        let (Some(value), Some(expires_at)) = (value, expires_at) else {
            self.clear();
            return None;
        };
        if value.is_empty() {
            self.clear();
            return None;
        }

        let token = SessionToken {
            value,
            issued_at: None,
            expires_at,
        };
        if token.is_valid(self.safety_buffer) {
            info!(expires_in = ?token.time_until_expiry(), "Restored valid access token");
            Some(token)
        } else {
            debug!(expires_at = %token.expires_at, "Stored access token is expired");
            self.clear();
            None
        }
    }

    /// Remove both fields
    pub fn clear(&self) {
        for key in [TOKEN_KEY, TOKEN_EXPIRES_AT_KEY] {
            if let Err(e) = self.store.remove(key) {
                warn!(key = %key, error = %e, "Failed to clear stored token");
            }
        }
    }
}

/// Persists the signed-in [`Identity`].
pub struct IdentityStore {
    store: Arc<dyn KeyValueStore>,
}

impl IdentityStore {
    /// Create an identity store over `store`
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Store the identity as JSON
    pub fn persist(&self, identity: &Identity) -> Result<()> {
        let json = serde_json::to_string(identity)?;
        self.store.set(USER_KEY, &json)?;
        info!(email = %identity.email, "Saved signed-in user");
        Ok(())
    }

    /// Read the stored identity. Corrupt entries are cleared.
    pub fn restore(&self) -> Option<Identity> {
        let raw = self.store.get(USER_KEY)?;
        match serde_json::from_str::<Identity>(&raw) {
            Ok(identity) => Some(identity),
            Err(e) => {
                warn!(error = %e, "Failed to parse stored user");
                self.clear();
                None
            }
        }
    }

    /// Remove the stored identity
    pub fn clear(&self) {
        if let Err(e) = self.store.remove(USER_KEY) {
            warn!(error = %e, "Failed to clear stored user");
        }
    }
}
