//! Webhook signature verification.
//!
//! The gateway signs every confirmation with
//! `hex(HMAC-SHA256(raw_body, secret))` and sends it in
//! [`SIGNATURE_HEADER`]. The signature is checked over the raw bytes before
//! any field of the body is parsed.

use ring::hmac;

/// Header carrying the hex-encoded HMAC-SHA256 of the raw body.
pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Errors produced by signature checks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    /// No signature header was sent.
    #[error("missing signature")]
    Missing,
    /// The header is not a 64-character hex string.
    #[error("malformed signature: {0}")]
    Malformed(String),
    /// The signature does not match the body.
    #[error("invalid signature")]
    Mismatch,
}

impl From<ring::error::Unspecified> for SignatureError {
    fn from(_: ring::error::Unspecified) -> Self {
        Self::Mismatch
    }
}

/// Verifies webhook bodies against the shared secret.
pub struct WebhookVerifier {
    key: hmac::Key,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier").finish_non_exhaustive()
    }
}

impl WebhookVerifier {
    /// Creates a verifier for `secret`.
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
        }
    }

    /// Hex signature of `body`, as the gateway computes it.
    #[must_use]
    pub fn sign(&self, body: &[u8]) -> String {
        hex::encode(hmac::sign(&self.key, body))
    }

    /// Checks `signature` (the raw header value) against `body`.
    ///
    /// # Errors
    ///
    /// [`SignatureError::Missing`] when absent or blank,
    /// [`SignatureError::Malformed`] when not 32 hex-encoded bytes, and
    /// [`SignatureError::Mismatch`] when the MAC differs.
    pub fn verify(&self, body: &[u8], signature: Option<&str>) -> Result<(), SignatureError> {
        let signature = signature
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(SignatureError::Missing)?;
        let bytes =
            hex::decode(signature).map_err(|err| SignatureError::Malformed(err.to_string()))?;
        if bytes.len() != 32 {
            return Err(SignatureError::Malformed(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        hmac::verify(&self.key, body, &bytes)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    const BODY: &[u8] = b"order_ref=ORD-1&status=paid&amount=7900";

    #[test]
    fn signed_body_verifies() {
        let verifier = WebhookVerifier::new(b"secret");
        let signature = verifier.sign(BODY);
        assert_eq!(signature.len(), 64);
        assert_eq!(verifier.verify(BODY, Some(&signature)), Ok(()));
        assert_eq!(
            verifier.verify(BODY, Some(&signature.to_uppercase())),
            Ok(())
        );
    }

    #[test]
    fn missing_and_blank_are_missing() {
        let verifier = WebhookVerifier::new(b"secret");
        assert_eq!(verifier.verify(BODY, None), Err(SignatureError::Missing));
        assert_eq!(verifier.verify(BODY, Some("  ")), Err(SignatureError::Missing));
    }

    #[test]
    fn malformed_is_distinguished_from_mismatch() {
        let verifier = WebhookVerifier::new(b"secret");
        assert!(matches!(
            verifier.verify(BODY, Some("xyz")),
            Err(SignatureError::Malformed(_))
        ));
        assert!(matches!(
            verifier.verify(BODY, Some("abcd")),
            Err(SignatureError::Malformed(_))
        ));
        let other = WebhookVerifier::new(b"other").sign(BODY);
        assert_eq!(verifier.verify(BODY, Some(&other)), Err(SignatureError::Mismatch));
    }

    #[test]
    fn tampered_body_is_a_mismatch() {
        let verifier = WebhookVerifier::new(b"secret");
        let signature = verifier.sign(BODY);
        assert_eq!(
            verifier.verify(b"order_ref=ORD-1&status=paid&amount=1", Some(&signature)),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn signature_is_lowercase_hex() {
        let signature = WebhookVerifier::new(b"secret").sign(BODY);
        assert!(
            signature
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        );
    }

    #[test]
    fn non_hex_digits_of_the_right_length_are_malformed() {
        let verifier = WebhookVerifier::new(b"secret");
        let Err(SignatureError::Malformed(reason)) = verifier.verify(BODY, Some(&"zz".repeat(32)))
        else {
            panic!("expected malformed");
        };
        assert!(!reason.is_empty());
    }
}
