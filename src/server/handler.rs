//! HTTP handlers for the token exchange endpoints.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/auth/exchange` | Exchange an authorization code; sets the refresh cookie |
//! | `POST` | `/api/auth/refresh` | New access token from the refresh cookie |
//! | `POST` | `/api/auth/revoke` | Best-effort provider revocation; always clears the cookie |
//! | `GET` | `/health` | Liveness and configuration state |
//!
//! Errors are `{"error": "<message>"}`. Other methods on the auth paths
//! answer `405`.

use std::{net::IpAddr, sync::Arc};

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, warn};

use super::{
    AuthServer,
    audit::{self, AuditEvent},
    cookie,
    provider::ProviderError,
};
use crate::identity::{self, Identity};
use crate::oauth::MISCONFIGURED_MESSAGE;
use crate::policy;

// ── Request / Response types ───────────────────────────────────────────────

/// `POST /api/auth/exchange` body
#[derive(Debug, Default, Deserialize)]
pub struct ExchangeRequest {
    /// Authorization code from the popup
    #[serde(default)]
    pub code: Option<String>,
}

/// Successful exchange
#[derive(Debug, Serialize)]
pub struct ExchangeResponse {
    /// Access token
    pub access_token: String,
    /// Lifetime in seconds
    pub expires_in: u64,
    /// Profile decoded from the identity credential
    pub user: Identity,
}

/// Successful refresh
#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    /// Access token
    pub access_token: String,
    /// Lifetime in seconds
    pub expires_in: u64,
}

// ── Route builder ─────────────────────────────────────────────────────────

/// Build the auth routes
pub fn auth_routes(server: Arc<AuthServer>) -> Router {
    Router::new()
        .route(
            "/api/auth/exchange",
            post(exchange).fallback(method_not_allowed),
        )
        .route("/api/auth/refresh", post(refresh).fallback(method_not_allowed))
        .route("/api/auth/revoke", post(revoke).fallback(method_not_allowed))
        .route("/health", get(health))
        .with_state(server)
}

// ── Handlers ──────────────────────────────────────────────────────────────

/// Extract client IP from `X-Forwarded-For` or `X-Real-IP` headers.
fn extract_client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|s| s.trim().parse().ok())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse().ok())
        })
}

/// `POST /api/auth/exchange`
async fn exchange(
    State(server): State<Arc<AuthServer>>,
    headers: HeaderMap,
    body: Result<Json<ExchangeRequest>, JsonRejection>,
) -> Response {
    let client_ip = extract_client_ip(&headers);

    let code = match body {
        Ok(Json(ExchangeRequest { code: Some(code) })) if !code.is_empty() => code,
        Ok(_) => return error_response(StatusCode::BAD_REQUEST, "Missing authorization code"),
        Err(e) => {
            debug!(error = %e, "Unreadable exchange body");
            return error_response(StatusCode::BAD_REQUEST, "Missing authorization code");
        }
    };

    if !server.endpoint.is_configured() {
        error!("Google client credentials missing, cannot exchange code");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, MISCONFIGURED_MESSAGE);
    }

    let tokens = match server.endpoint.exchange_code(&code).await {
        Ok(tokens) => tokens,
        Err(ProviderError::Rejected { status, body }) => {
            warn!(status, body = %body, "Token exchange failed");
            audit::emit(&AuditEvent::denied(None, "provider rejected code", client_ip));
            return error_response(StatusCode::UNAUTHORIZED, "Token exchange failed");
        }
        Err(ProviderError::Misconfigured) => {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, MISCONFIGURED_MESSAGE);
        }
        Err(e) => {
            error!(error = %e, "Exchange error");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error");
        }
    };

    let Some(id_token) = tokens.id_token.as_deref() else {
        return error_response(StatusCode::BAD_REQUEST, "No id_token returned");
    };

    let user = match identity::decode(id_token) {
        Ok(user) => user,
        Err(e) => {
            error!(error = %e, "Provider returned an undecodable id_token");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error");
        }
    };

    if !policy::is_authorized(&user.email) {
        warn!(email = %user.email, "Exchange refused, email not on allow-list");
        audit::emit(&AuditEvent::denied(
            Some(&user.email),
            "not on allow-list",
            client_ip,
        ));
        return error_response(StatusCode::FORBIDDEN, "Unauthorized user");
    }

    audit::emit(&AuditEvent::exchanged(&user.email, client_ip));
    let response = Json(ExchangeResponse {
        access_token: tokens.access_token,
        expires_in: tokens.expires_in,
        user,
    })
    .into_response();

    // Only the first consent yields a refresh token
    match tokens.refresh_token.as_deref() {
        Some(refresh_token) if !refresh_token.is_empty() => with_cookie(
            response,
            &cookie::refresh_cookie(refresh_token, server.secure_cookies),
        ),
        _ => response,
    }
}

/// `POST /api/auth/refresh`
async fn refresh(State(server): State<Arc<AuthServer>>, headers: HeaderMap) -> Response {
    let client_ip = extract_client_ip(&headers);

    let Some(refresh_token) = cookie::refresh_token_from(&headers) else {
        return error_response(StatusCode::UNAUTHORIZED, "No refresh token");
    };

    if !server.endpoint.is_configured() {
        error!("Google client credentials missing, cannot refresh");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, MISCONFIGURED_MESSAGE);
    }

    match server.endpoint.refresh(&refresh_token).await {
        Ok(tokens) => {
            audit::emit(&AuditEvent::refreshed(client_ip));
            Json(RefreshResponse {
                access_token: tokens.access_token,
                expires_in: tokens.expires_in,
            })
            .into_response()
        }
        Err(ProviderError::Rejected { status, body }) => {
            // invalid_grant: revoked or expired
            warn!(status, body = %body, "Refresh failed");
            audit::emit(&AuditEvent::refresh_rejected(
                format!("provider answered HTTP {status}"),
                client_ip,
            ));
            with_cookie(
                error_response(StatusCode::UNAUTHORIZED, "Refresh token invalid"),
                &cookie::clear_cookie(server.secure_cookies),
            )
        }
        Err(ProviderError::Misconfigured) => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, MISCONFIGURED_MESSAGE)
        }
        Err(e) => {
            error!(error = %e, "Refresh error");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

/// `POST /api/auth/revoke`
async fn revoke(State(server): State<Arc<AuthServer>>, headers: HeaderMap) -> Response {
    let client_ip = extract_client_ip(&headers);

    if let Some(refresh_token) = cookie::refresh_token_from(&headers) {
        if let Err(e) = server.endpoint.revoke(&refresh_token).await {
            debug!(error = %e, "Provider revocation failed, clearing cookie anyway");
        }
    }

    audit::emit(&AuditEvent::revoked(client_ip));
    with_cookie(
        (StatusCode::OK, Json(json!({ "success": true }))).into_response(),
        &cookie::clear_cookie(server.secure_cookies),
    )
}

/// `GET /health`
async fn health(State(server): State<Arc<AuthServer>>) -> Response {
    Json(json!({
        "status": "ok",
        "configured": server.endpoint.is_configured(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
    .into_response()
}

async fn method_not_allowed() -> Response {
    error_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
}

// ── Helpers ───────────────────────────────────────────────────────────────

/// Attach a `Set-Cookie` header
fn with_cookie(mut response: Response, cookie: &str) -> Response {
    match HeaderValue::from_str(cookie) {
        Ok(value) => {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
        Err(e) => warn!(error = %e, "Refresh cookie is not a valid header value"),
    }
    response
}

/// Create a JSON error response.
fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
