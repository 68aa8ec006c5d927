//! Audit logging for the exchange endpoints.
//!
//! Every event is emitted via `tracing::info!` with the event serialized
//! into a single `audit` field.
//!
//! # Events
//!
//! | Event | When |
//! |-------|------|
//! | `auth.exchanged` | A code was exchanged for an allow-listed user |
//! | `auth.denied` | Exchange refused (provider rejection or allow-list) |
//! | `auth.refreshed` | The refresh cookie produced a new access token |
//! | `auth.refresh_rejected` | The provider refused the refresh token; cookie cleared |
//! | `auth.revoked` | Sign-out cleared the cookie |

use std::net::IpAddr;

use serde::Serialize;

/// Structured audit event.
#[derive(Debug, Serialize)]
pub struct AuditEvent {
    /// Event type string (e.g., `"auth.exchanged"`)
    pub event: &'static str,
    /// Email of the user, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Client IP address (when available)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<IpAddr>,
    /// Reason for denial events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    fn new(event: &'static str, client_ip: Option<IpAddr>) -> Self {
        Self {
            event,
            email: None,
            client_ip,
            reason: None,
        }
    }

    /// `auth.exchanged`
    #[must_use]
    pub fn exchanged(email: &str, client_ip: Option<IpAddr>) -> Self {
        Self {
            email: Some(email.to_string()),
            ..Self::new("auth.exchanged", client_ip)
        }
    }

    /// `auth.denied`
    #[must_use]
    pub fn denied(
        email: Option<&str>,
        reason: impl Into<String>,
        client_ip: Option<IpAddr>,
    ) -> Self {
        Self {
            email: email.map(str::to_string),
            reason: Some(reason.into()),
            ..Self::new("auth.denied", client_ip)
        }
    }

    /// `auth.refreshed`
    #[must_use]
    pub fn refreshed(client_ip: Option<IpAddr>) -> Self {
        Self::new("auth.refreshed", client_ip)
    }

    /// `auth.refresh_rejected`
    #[must_use]
    pub fn refresh_rejected(reason: impl Into<String>, client_ip: Option<IpAddr>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::new("auth.refresh_rejected", client_ip)
        }
    }

    /// `auth.revoked`
    #[must_use]
    pub fn revoked(client_ip: Option<IpAddr>) -> Self {
        Self::new("auth.revoked", client_ip)
    }
}

/// Emit an audit event:
///
/// ```text
/// INFO context_viewer::server::audit audit={"event":"auth.exchanged","email":...}
/// ```
pub fn emit(event: &AuditEvent) {
    match serde_json::to_string(event) {
        Ok(ref json) => tracing::info!(audit = %json, "auth audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchanged_event_carries_email() {
        // GIVEN: a successful exchange
        let event = AuditEvent::exchanged("carlosmartinezt@gmail.com", None);

        // THEN: the email is serialized and empty fields are skipped
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "auth.exchanged");
        assert_eq!(json["email"], "carlosmartinezt@gmail.com");
        assert!(json.get("reason").is_none());
        assert!(json.get("client_ip").is_none());
    }

    #[test]
    fn denied_event_carries_reason_and_ip() {
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let event = AuditEvent::denied(Some("x@y.com"), "not on allow-list", Some(ip));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "auth.denied");
        assert_eq!(json["reason"], "not on allow-list");
        assert_eq!(json["client_ip"], "10.0.0.1");
    }

    #[test]
    fn emit_does_not_panic() {
        emit(&AuditEvent::revoked(None));
        emit(&AuditEvent::refresh_rejected("invalid_grant", None));
    }
}
