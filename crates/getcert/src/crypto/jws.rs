//! JWK construction and the base64 variant used on the ACME wire.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPublicKey};
use sha2::{Digest, Sha256};

/// URL-safe base64 without padding: no `=`, `+` or `/`, never any
/// whitespace. Used for every ACME field.
pub fn base64url(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

pub fn base64url_decode(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(text)
}

/// RSA public key as the two JWK components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Jwk {
    pub e: String,
    pub n: String,
}

impl Jwk {
    pub fn from_public(public: &RsaPublicKey) -> Self {
        Jwk {
            e: int_component(public.e()),
            n: int_component(public.n()),
        }
    }

    /// JWK object for the JWS `header` / `protected` fields.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "e": self.e,
            "kty": "RSA",
            "n": self.n,
        })
    }

    /// SHA-256 over the canonical member-sorted JSON
    /// `{"e":…,"kty":"RSA","n":…}`, URL-safe base64. Stable for a given
    /// key across runs.
    pub fn thumbprint(&self) -> String {
        let canonical = format!(r#"{{"e":"{}","kty":"RSA","n":"{}"}}"#, self.e, self.n);
        base64url(&Sha256::digest(canonical.as_bytes()))
    }
}

/// Big-endian bytes of the integer, with a leading zero byte when the
/// high bit of the first byte is set, URL-safe base64.
fn int_component(value: &BigUint) -> String {
    let mut bytes = value.to_bytes_be();
    if bytes.first().is_some_and(|b| b & 0x80 != 0) {
        bytes.insert(0, 0);
    }
    base64url(&bytes)
}

/// `token "." thumbprint` - the value proved to the CA.
pub fn key_authorization(token: &str, thumbprint: &str) -> String {
    format!("{token}.{thumbprint}")
}

/// DNS-01 TXT record value: `base64url(SHA-256(keyAuthorization))`.
pub fn dns_auth_key(key_authorization: &str) -> String {
    base64url(&Sha256::digest(key_authorization.as_bytes()))
}
