//! Identity decoding
//!
//! Turns a signed identity assertion (a JWT issued by Google) into the
//! profile the app displays. The signature is **not** verified here: the
//! credential arrives straight from the identity provider (SDK callback or
//! token endpoint response), never from user input.

use base64::{
    Engine as _, alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// URL-safe alphabet, padding optional (JWT segments are usually unpadded).
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Standard alphabet, padding optional.
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A signed-in user's profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Email address (the allow-list key)
    pub email: String,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Avatar URL
    #[serde(default, rename = "picture", alias = "pictureUrl")]
    pub picture_url: String,
}

/// Claims we read from the credential payload.
#[derive(Debug, Deserialize)]
struct CredentialClaims {
    email: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
}

/// Decode a three-part dot-delimited credential into an [`Identity`].
///
/// Only the payload segment is read. Expiry and signature are not checked.
///
/// # Errors
///
/// Returns [`Error::Decode`] if the credential is not three segments, the
/// payload is not base64, or the JSON lacks an `email` claim.
pub fn decode(credential: &str) -> Result<Identity> {
    let segments: Vec<&str> = credential.trim().split('.').collect();
    let [_, payload, _] = segments.as_slice() else {
        return Err(Error::Decode(format!(
            "expected 3 segments, found {}",
            segments.len()
        )));
    };

    let bytes = URL_SAFE_LENIENT
        .decode(payload)
        .or_else(|_| STANDARD_LENIENT.decode(payload))
        .map_err(|e| Error::Decode(format!("payload is not base64: {e}")))?;

    let claims: CredentialClaims = serde_json::from_slice(&bytes)
        .map_err(|e| Error::Decode(format!("payload is not a valid claim set: {e}")))?;

    Ok(Identity {
        email: claims.email,
        name: claims.name.unwrap_or_default(),
        picture_url: claims.picture.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
    use pretty_assertions::assert_eq;

    use super::*;

    fn credential_with(payload: &str) -> String {
        format!("eyJhbGciOiJSUzI1NiJ9.{}.c2ln", URL_SAFE_NO_PAD.encode(payload))
    }

    #[test]
    fn decodes_profile_claims_exactly() {
        // GIVEN: a credential whose payload carries email/name/picture
        let credential =
            credential_with(r#"{"email":"X@Y.com","name":"X","picture":"url"}"#);

        // WHEN: decoded
        let identity = decode(&credential).unwrap();

        // THEN: fields map one-to-one
        assert_eq!(
            identity,
            Identity {
                email: "X@Y.com".to_string(),
                name: "X".to_string(),
                picture_url: "url".to_string(),
            }
        );
    }

    #[test]
    fn accepts_standard_alphabet_with_padding() {
        let payload = STANDARD.encode(r#"{"email":"a@b.com","name":"Ä?>"}"#);
        let identity = decode(&format!("h.{payload}.s")).unwrap();
        assert_eq!(identity.email, "a@b.com");
        assert_eq!(identity.name, "Ä?>");
        assert_eq!(identity.picture_url, "");
    }

    #[test]
    fn ignores_extra_claims() {
        let credential = credential_with(
            r#"{"iss":"https://accounts.google.com","sub":"1","email":"a@b.com","exp":1}"#,
        );
        assert_eq!(decode(&credential).unwrap().email, "a@b.com");
    }

    #[test]
    fn rejects_wrong_segment_count() {
        assert!(matches!(decode("only.two"), Err(Error::Decode(_))));
        assert!(matches!(decode("a.b.c.d"), Err(Error::Decode(_))));
        assert!(matches!(decode(""), Err(Error::Decode(_))));
    }

    #[test]
    fn rejects_non_base64_payload() {
        assert!(matches!(decode("a.!!!.c"), Err(Error::Decode(_))));
    }

    #[test]
    fn rejects_payload_without_email() {
        let credential = credential_with(r#"{"name":"No Email"}"#);
        assert!(matches!(decode(&credential), Err(Error::Decode(_))));
    }

    #[test]
    fn identity_serializes_with_wire_names() {
        let identity = Identity {
            email: "a@b.com".into(),
            name: "A".into(),
            picture_url: "p".into(),
        };
        let json = serde_json::to_value(&identity).unwrap();
        assert_eq!(json["picture"], "p");

        let back: Identity =
            serde_json::from_str(r#"{"email":"a@b.com","name":"A","pictureUrl":"p"}"#).unwrap();
        assert_eq!(back, identity);
    }
}
