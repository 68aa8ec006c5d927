//! Allow-list authorization.
//!
//! The list is compiled in and identical on both sides of the exchange. The
//! server-side check in [`crate::server`] is the authority; the client-side
//! check in [`crate::session`] only fails fast for a better sign-in message.

use tracing::debug;

/// Emails allowed to use the app.
pub const ALLOWED_EMAILS: &[&str] = &[
    "carlosmartinezt@gmail.com",
    "lisvette.villar@gmail.com",
    "cjmartinez@meta.com",
];

/// Case-insensitive exact match against [`ALLOWED_EMAILS`].
///
/// Surrounding whitespace is ignored. There is no domain or wildcard
/// matching.
#[must_use]
pub fn is_authorized(email: &str) -> bool {
    let email = email.trim();
    let allowed = !email.is_empty()
        && ALLOWED_EMAILS
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(email));
    if !allowed {
        debug!(email = %email, "Email not on allow-list");
    }
    allowed
}
