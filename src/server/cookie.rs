//! Refresh cookie helpers

use axum::http::{HeaderMap, header};

/// Name of the HTTP-only cookie carrying the provider refresh token
pub const REFRESH_COOKIE_NAME: &str = "auth_refresh_token";

/// Cookie lifetime: 7 days
pub const REFRESH_COOKIE_MAX_AGE: u64 = 7 * 24 * 60 * 60;

fn build(value: &str, max_age: u64, secure: bool) -> String {
    let mut cookie = format!(
        "{REFRESH_COOKIE_NAME}={value}; HttpOnly; Path=/; SameSite=Lax; Max-Age={max_age}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// `Set-Cookie` value storing `refresh_token`
#[must_use]
pub fn refresh_cookie(refresh_token: &str, secure: bool) -> String {
    build(refresh_token, REFRESH_COOKIE_MAX_AGE, secure)
}

/// `Set-Cookie` value deleting the refresh cookie
#[must_use]
pub fn clear_cookie(secure: bool) -> String {
    build("", 0, secure)
}

/// Refresh token from the request's `Cookie` headers.
///
/// An empty value counts as absent.
#[must_use]
pub fn refresh_token_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == REFRESH_COOKIE_NAME)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use pretty_assertions::assert_eq;

    use super::*;

    fn headers(cookie: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(cookie).unwrap());
        headers
    }

    #[test]
    fn refresh_cookie_attributes() {
        assert_eq!(
            refresh_cookie("1//rt", false),
            "auth_refresh_token=1//rt; HttpOnly; Path=/; SameSite=Lax; Max-Age=604800"
        );
        assert!(refresh_cookie("1//rt", true).ends_with("; Secure"));
    }

    #[test]
    fn clear_cookie_expires_immediately() {
        assert_eq!(
            clear_cookie(false),
            "auth_refresh_token=; HttpOnly; Path=/; SameSite=Lax; Max-Age=0"
        );
        assert_eq!(
            clear_cookie(true),
            "auth_refresh_token=; HttpOnly; Path=/; SameSite=Lax; Max-Age=0; Secure"
        );
    }

    #[test]
    fn extracts_token_among_other_cookies() {
        let map = headers("theme=dark; auth_refresh_token=abc123; other=1");
        assert_eq!(refresh_token_from(&map).as_deref(), Some("abc123"));
    }

    #[test]
    fn missing_or_empty_token_is_none() {
        assert_eq!(refresh_token_from(&HeaderMap::new()), None);
        assert_eq!(refresh_token_from(&headers("theme=dark")), None);
        assert_eq!(refresh_token_from(&headers("auth_refresh_token=")), None);
        // Prefix of another cookie name does not match
        assert_eq!(refresh_token_from(&headers("xauth_refresh_token=abc")), None);
    }
}
