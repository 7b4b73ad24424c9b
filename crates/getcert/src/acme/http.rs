//! HTTP transport for the ACME server, owning the current nonce.
//!
//! Every CA response may carry a `Replay-Nonce`; the transport records
//! it and hands it out exactly once. When none is banked it fetches a
//! fresh one with `HEAD /directory`. Signed requests are serial, so a
//! single slot suffices.

use super::AcmeError;
use reqwest::header::HeaderMap;
use std::time::Duration;
use tracing::{debug, trace};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Response surface the callers need: status, the two interesting
/// headers, and the raw body.
#[derive(Debug, Clone)]
pub struct AcmeResponse {
    pub status: u16,
    pub location: Option<String>,
    /// Target of the `Link: <…>;rel="up"` header, if present.
    pub link_up: Option<String>,
    pub body: Vec<u8>,
}

impl AcmeResponse {
    pub fn body_str(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Short body excerpt for error messages.
    pub fn detail(&self) -> String {
        let text = self.body_str();
        text.chars().take(200).collect()
    }
}

pub struct AcmeHttp {
    client: reqwest::Client,
    directory_url: String,
    nonce: Option<String>,
}

impl AcmeHttp {
    pub fn new(directory_url: String) -> Result<Self, AcmeError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("getcert/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AcmeError::Transport {
                url: directory_url.clone(),
                source: e,
            })?;
        Ok(AcmeHttp {
            client,
            directory_url,
            nonce: None,
        })
    }

    /// Take the banked nonce, or fetch a fresh one. Each nonce is
    /// consumed by exactly one signed request.
    pub async fn take_nonce(&mut self) -> Result<String, AcmeError> {
        if let Some(nonce) = self.nonce.take() {
            trace!("reusing banked nonce");
            return Ok(nonce);
        }

        debug!(url = %self.directory_url, "fetching nonce");
        let response = self
            .client
            .head(&self.directory_url)
            .send()
            .await
            .map_err(|e| AcmeError::Transport {
                url: self.directory_url.clone(),
                source: e,
            })?;

        nonce_from(response.headers())
            .ok_or_else(|| AcmeError::MissingNonce(self.directory_url.clone()))
    }

    /// GET a CA URL, banking any nonce it returns.
    pub async fn get(&mut self, url: &str) -> Result<AcmeResponse, AcmeError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AcmeError::Transport {
                url: url.to_string(),
                source: e,
            })?;
        self.absorb(url, response).await
    }

    /// POST a raw JWS envelope, banking any nonce in the response.
    pub async fn post_raw(&mut self, url: &str, body: String) -> Result<AcmeResponse, AcmeError> {
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| AcmeError::Transport {
                url: url.to_string(),
                source: e,
            })?;
        self.absorb(url, response).await
    }

    async fn absorb(
        &mut self,
        url: &str,
        response: reqwest::Response,
    ) -> Result<AcmeResponse, AcmeError> {
        let status = response.status().as_u16();
        let headers = response.headers().clone();

        if let Some(nonce) = nonce_from(&headers) {
            self.nonce = Some(nonce);
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| AcmeError::Transport {
                url: url.to_string(),
                source: e,
            })?
            .to_vec();

        Ok(AcmeResponse {
            status,
            location: header_str(&headers, "location"),
            link_up: link_up(&headers),
            body,
        })
    }
}

fn nonce_from(headers: &HeaderMap) -> Option<String> {
    header_str(headers, "replay-nonce")
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Pick the `rel="up"` target from however many `Link` headers the CA
/// sent: `<https://…>;rel="up"`.
fn link_up(headers: &HeaderMap) -> Option<String> {
    for value in headers.get_all("link") {
        let Ok(text) = value.to_str() else { continue };
        for part in text.split(',') {
            let part = part.trim();
            if !part.contains("rel=\"up\"") {
                continue;
            }
            if let Some(url) = part.split(';').next() {
                let url = url.trim().trim_start_matches('<').trim_end_matches('>');
                return Some(url.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderName, HeaderValue};

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.append(
                k.parse::<HeaderName>().unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        map
    }

    #[test]
    fn link_up_extracts_target() {
        let h = headers(&[(
            "link",
            "<https://ca.example/acme/issuer-cert>;rel=\"up\"",
        )]);
        assert_eq!(
            link_up(&h).as_deref(),
            Some("https://ca.example/acme/issuer-cert")
        );
    }

    #[test]
    fn link_up_skips_other_relations() {
        let h = headers(&[
            ("link", "<https://ca.example/tos>;rel=\"terms-of-service\""),
            ("link", "<https://ca.example/up>;rel=\"up\""),
        ]);
        assert_eq!(link_up(&h).as_deref(), Some("https://ca.example/up"));
    }

    #[test]
    fn link_up_handles_combined_header() {
        let h = headers(&[(
            "link",
            "<https://ca.example/tos>;rel=\"terms-of-service\", <https://ca.example/up>;rel=\"up\"",
        )]);
        assert_eq!(link_up(&h).as_deref(), Some("https://ca.example/up"));
    }

    #[test]
    fn nonce_header_is_case_insensitive() {
        let h = headers(&[("replay-nonce", "abc123")]);
        assert_eq!(nonce_from(&h).as_deref(), Some("abc123"));
    }
}
