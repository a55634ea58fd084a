//! HMAC-SHA256 request signatures.
//!
//! The signature is the lowercase hex encoding of
//! `HMAC-SHA256(secret, raw_body)`, carried in the configured header. The
//! comparison runs in constant time.
//!
//! ```rust
//! use http::HeaderMap;
//! use sluice_webhook::{SignatureConfig, SignatureVerifier};
//!
//! let verifier = SignatureVerifier::new(&SignatureConfig::hmac_sha256("s3cret")).unwrap();
//! let body = br#"{"id":1}"#;
//!
//! let mut headers = HeaderMap::new();
//! headers.insert("X-Webhook-Signature", verifier.sign(body).parse().unwrap());
//! assert!(verifier.verify(&headers, body).is_ok());
//! ```

use hmac::{Hmac, Mac};
use http::{HeaderMap, HeaderName};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::config::SignatureConfig;
use crate::error::{ConfigError, SignatureError};

type HmacSha256 = Hmac<Sha256>;

/// Verifies request signatures against a shared secret.
#[derive(Clone)]
pub struct SignatureVerifier {
    header: HeaderName,
    mac: HmacSha256,
}

impl SignatureVerifier {
    /// Builds a verifier from validated signature settings.
    pub fn new(config: &SignatureConfig) -> Result<Self, ConfigError> {
        let header = HeaderName::from_bytes(config.header().as_bytes()).map_err(|e| {
            ConfigError::invalid_value("signature.header", e.to_string())
        })?;
        let mac = HmacSha256::new_from_slice(config.secret().as_bytes())
            .map_err(|e| ConfigError::invalid_value("signature.secret", e.to_string()))?;

        Ok(Self { header, mac })
    }

    /// Header the signature is read from.
    #[must_use]
    pub fn header(&self) -> &HeaderName {
        &self.header
    }

    /// Hex-encoded signature for `body`.
    #[must_use]
    pub fn sign(&self, body: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Checks the signature header against `body`.
    pub fn verify(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), SignatureError> {
        let received = headers
            .get(&self.header)
            .map(http::HeaderValue::as_bytes)
            .filter(|value| !value.is_empty())
            .ok_or(SignatureError::Missing)?;

        let expected = self.sign(body);
        if bool::from(received.ct_eq(expected.as_bytes())) {
            Ok(())
        } else {
            Err(SignatureError::Invalid)
        }
    }
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}
