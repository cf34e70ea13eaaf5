// src/signer.rs

//! HMAC-SHA256 signing of cookie payloads.

use std::fmt;
use std::sync::Arc;

use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error;
use crate::secret::SecretSource;
use crate::Result;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE: &str = "&s=";

/// Signs strings with the current secret and verifies them against every
/// secret the source still accepts.
#[derive(Clone)]
pub struct RequestSigner {
    secrets: Arc<dyn SecretSource>,
}

impl RequestSigner {
    pub fn new(secrets: Arc<dyn SecretSource>) -> Self {
        RequestSigner { secrets }
    }

    /// Returns `payload&s=<signature>`.
    pub fn sign(&self, payload: &str) -> Result<String> {
        if payload.is_empty() {
            return Err(error::signature("NULL or empty string to sign"));
        }
        let state = self.secrets.snapshot();
        let signature = compute_signature(state.current(), payload)?;
        Ok(format!("{payload}{SIGNATURE}{signature}"))
    }

    /// Verifies a signed string and returns the payload it carries.
    ///
    /// The signature is located at the last `&s=`; it is accepted if it was
    /// produced by the current or the previous secret.
    pub fn verify_and_extract(&self, signed: &str) -> Result<String> {
        let index = signed
            .rfind(SIGNATURE)
            .ok_or_else(|| error::signature("Invalid signed text: missing signature"))?;
        let (payload, signature) = (&signed[..index], &signed[index + SIGNATURE.len()..]);

        let state = self.secrets.snapshot();
        for secret in state.iter() {
            let expected = compute_signature(secret, payload)?;
            if bool::from(expected.as_bytes().ct_eq(signature.as_bytes())) {
                return Ok(payload.to_owned());
            }
        }
        Err(error::signature("Invalid signature"))
    }
}

impl fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSigner")
            .field("secrets", &self.secrets)
            .finish()
    }
}

fn compute_signature(secret: &[u8], payload: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|_| error::signature("invalid HMAC key length"))?;
    mac.update(payload.as_bytes());
    Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret::{RandomSecretSource, StaticSecretSource};

    fn static_signer(secret: &'static str) -> RequestSigner {
        RequestSigner::new(Arc::new(StaticSecretSource::new(secret).unwrap()))
    }

    #[test]
    fn test_sign_appends_signature() {
        let signer = static_signer("secret");
        let signed = signer.sign("hello").unwrap();
        assert!(signed.starts_with("hello&s="));
        assert_eq!(signer.verify_and_extract(&signed).unwrap(), "hello");
    }

    #[test]
    fn test_sign_is_deterministic_per_secret() {
        let a = static_signer("secret").sign("u=a&e=1").unwrap();
        let b = static_signer("secret").sign("u=a&e=1").unwrap();
        let c = static_signer("other").sign("u=a&e=1").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_sign_rejects_empty() {
        assert!(static_signer("secret").sign("").unwrap_err().is_signature());
    }

    #[test]
    fn test_verify_rejects_missing_signature() {
        let err = static_signer("secret").verify_and_extract("hello").unwrap_err();
        assert!(err.is_signature());
    }

    #[test]
    fn test_verify_rejects_tampering() {
        let signer = static_signer("secret");
        let signed = signer.sign("u=alice&e=1").unwrap();
        let tampered = signed.replacen("alice", "mallory", 1);
        assert!(signer.verify_and_extract(&tampered).unwrap_err().is_signature());
        assert!(static_signer("other")
            .verify_and_extract(&signed)
            .unwrap_err()
            .is_signature());
    }

    #[test]
    fn test_payload_containing_signature_marker() {
        let signer = static_signer("secret");
        let signed = signer.sign("a&s=b").unwrap();
        assert_eq!(signer.verify_and_extract(&signed).unwrap(), "a&s=b");
    }

    #[test]
    fn test_grace_period_spans_one_rotation() {
        let source = Arc::new(RandomSecretSource::seeded(7));
        let signer = RequestSigner::new(source.clone());

        let signed = signer.sign("hello").unwrap();
        source.roll_secret();
        assert_eq!(signer.verify_and_extract(&signed).unwrap(), "hello");

        source.roll_secret();
        assert!(signer.verify_and_extract(&signed).unwrap_err().is_signature());
    }
}
