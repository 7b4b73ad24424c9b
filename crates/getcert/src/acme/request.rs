//! The signed request engine: JWS envelopes in the ACME v1 flattened
//! form with an explicit top-level `header` object.

use super::http::{AcmeHttp, AcmeResponse};
use super::AcmeError;
use crate::crypto::jws::base64url;
use crate::crypto::keys::AccountKey;
use serde::Serialize;
use tracing::debug;

/// Signs and posts ACME payloads with the account key, one outstanding
/// request at a time.
pub struct SignedRequester {
    http: AcmeHttp,
    key: AccountKey,
}

impl SignedRequester {
    pub fn new(http: AcmeHttp, key: AccountKey) -> Self {
        SignedRequester { http, key }
    }

    pub fn thumbprint(&self) -> &str {
        self.key.thumbprint()
    }

    /// Unsigned GET (challenge polling, certificate download).
    pub async fn get(&mut self, url: &str) -> Result<AcmeResponse, AcmeError> {
        self.http.get(url).await
    }

    /// Sign `payload` and POST it to `url`.
    ///
    /// The envelope is
    /// `{"header":{"alg","jwk"},"protected":…,"payload":…,"signature":…}`
    /// where `protected` additionally carries the nonce and the
    /// signature is RS256 over `protected64 "." payload64`. With
    /// `body_as_b64` the response body is returned URL-safe base64
    /// encoded (DER-over-the-wire mode).
    pub async fn send_signed<T: Serialize>(
        &mut self,
        url: &str,
        payload: &T,
        body_as_b64: bool,
    ) -> Result<AcmeResponse, AcmeError> {
        let nonce = self.http.take_nonce().await?;
        let jwk = self.key.jwk().to_value();

        let protected = serde_json::json!({
            "alg": "RS256",
            "jwk": jwk,
            "nonce": nonce,
        });
        let protected64 = base64url(
            &serde_json::to_vec(&protected).map_err(|e| AcmeError::Decode(e.to_string()))?,
        );
        let payload64 =
            base64url(&serde_json::to_vec(payload).map_err(|e| AcmeError::Decode(e.to_string()))?);

        let signing_input = format!("{protected64}.{payload64}");
        let signature = base64url(&self.key.sign(signing_input.as_bytes())?);

        let envelope = serde_json::json!({
            "header": { "alg": "RS256", "jwk": jwk },
            "protected": protected64,
            "payload": payload64,
            "signature": signature,
        });

        debug!(url, "sending signed request");
        let mut response = self.http.post_raw(url, envelope.to_string()).await?;
        if body_as_b64 {
            response.body = base64url(&response.body).into_bytes();
        }
        Ok(response)
    }
}
