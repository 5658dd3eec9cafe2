use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::Value as JsonValue;

use crate::error::Error;

/// Claims read from a JWT payload without checking its signature.
///
/// The backing API is the only party that validates access tokens. This side
/// only needs the expiry to decide when to refresh.
#[derive(Debug, Clone)]
pub struct UnverifiedClaims {
    inner: JsonValue,
}

impl UnverifiedClaims {
    /// Gets a claim value by key.
    #[must_use]
    pub fn get_claim(&self, key: &str) -> Option<&JsonValue> {
        self.inner.get(key)
    }

    /// The standard `exp` claim, in unix seconds.
    #[must_use]
    pub fn expires_at(&self) -> Option<i64> {
        match self.inner.get("exp")? {
            JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            _ => None,
        }
    }
}

/// Decodes the payload segment of a compact JWT.
///
/// # Errors
///
/// Returns `Error::Token` if the token does not have three segments or the
/// payload is not base64url-encoded JSON.
pub fn decode_unverified(token_str: &str) -> Result<UnverifiedClaims, Error> {
    let parts: Vec<&str> = token_str.split('.').collect();
    if parts.len() != 3 {
        return Err(Error::Token("invalid token format".into()));
    }

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(parts[1].trim_end_matches('='))
        .map_err(|_| Error::Token("invalid payload encoding".into()))?;

    let inner: JsonValue = serde_json::from_slice(&payload_bytes)
        .map_err(|e| Error::Token(format!("invalid payload: {e}")))?;
    if !inner.is_object() {
        return Err(Error::Token("payload is not a JSON object".into()));
    }

    Ok(UnverifiedClaims { inner })
}

/// Reads the `exp` claim of an access token.
///
/// Shared by code exchange and refresh so both derive `expires_at` the same way.
///
/// # Errors
///
/// Returns `Error::Token` if the token cannot be decoded or has no numeric `exp`.
pub fn decode_expiry(token_str: &str) -> Result<i64, Error> {
    decode_unverified(token_str)?
        .expires_at()
        .ok_or_else(|| Error::Token("missing claim: exp".into()))
}

/// Builds an unsigned token carrying the given claims. Test helper only.
#[cfg(test)]
pub(crate) fn encode_for_tests(claims: &JsonValue) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.c2lnbmF0dXJl")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_expiry() {
        let token = encode_for_tests(&json!({"exp": 1_700_000_300, "user_id": 7}));
        assert_eq!(decode_expiry(&token).unwrap(), 1_700_000_300);

        let claims = decode_unverified(&token).unwrap();
        assert_eq!(claims.get_claim("user_id"), Some(&json!(7)));
    }

    #[test]
    fn test_missing_exp() {
        let token = encode_for_tests(&json!({"sub": "abc"}));
        assert!(matches!(decode_expiry(&token), Err(Error::Token(_))));
    }

    #[test]
    fn test_non_numeric_exp() {
        let token = encode_for_tests(&json!({"exp": "soon"}));
        assert!(decode_expiry(&token).is_err());
    }

    #[test]
    fn test_rejects_malformed_tokens() {
        assert!(decode_unverified("opaque-token").is_err());
        assert!(decode_unverified("a.b").is_err());
        assert!(decode_unverified("a.!!!.c").is_err());
        let not_object = format!("x.{}.y", URL_SAFE_NO_PAD.encode("[1,2]"));
        assert!(decode_unverified(&not_object).is_err());
    }
}
