//! Upstream OCSP fetching
//!
//! One fetch attempt per loop iteration against a randomly chosen
//! responder, with a backoff sleep between failed attempts. The loop has no
//! attempt cap; callers bound it with `tokio::time::timeout`, which aborts
//! the backoff sleep and the in-flight request alike.

use std::sync::Mutex;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use percent_encoding::{percent_encode, NON_ALPHANUMERIC};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use reqwest::StatusCode;
use stapled_ocsp::{parse_response, CertStatus, Certificate, OcspError, OcspResponse};
use tracing::{info, warn};

use crate::error::CacheError;

const DEFAULT_BACKOFF: Duration = Duration::from_secs(10);

/// What a successful fetch produced.
#[derive(Debug)]
pub struct FetchOutcome {
    /// Parsed response plus raw bytes; `None` for a 304
    pub response: Option<(OcspResponse, Vec<u8>)>,
    /// ETag header from the responder, if any
    pub etag: Option<String>,
    /// `Cache-Control: max-age` from the responder, if any
    pub max_age: Option<Duration>,
}

/// Fetch a response for `request` from one of `responders`.
///
/// Retries (with backoff) on transport errors, bad HTTP statuses,
/// unparsable bodies, and non-Good certificate statuses. Returns only on a
/// usable answer; cancellation is the caller's timeout.
pub async fn fetch(
    client: &reqwest::Client,
    responders: &[String],
    request: &[u8],
    etag: Option<&str>,
    issuer: &Certificate,
    rng: &Mutex<StdRng>,
) -> Result<FetchOutcome, CacheError> {
    if responders.is_empty() {
        return Err(CacheError::NoResponders);
    }
    let encoded = percent_encode(BASE64.encode(request).as_bytes(), NON_ALPHANUMERIC).to_string();

    let mut backoff: Option<Duration> = None;
    loop {
        if let Some(delay) = backoff.take() {
            info!(
                "[fetcher] Request failed, backing off for {} seconds",
                delay.as_secs()
            );
            tokio::time::sleep(delay).await;
        }

        let responder = match responders.choose(&mut *rng.lock().unwrap()) {
            Some(responder) => responder.clone(),
            None => return Err(CacheError::NoResponders),
        };
        let url = format!("{}/{}", responder, encoded);

        info!("[fetcher] Sending request to '{}'", url);
        let mut req = client.get(&url);
        if let Some(etag) = etag {
            req = req.header(reqwest::header::IF_NONE_MATCH, etag);
        }
        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!("[fetcher] Request for '{}' failed: {}", url, e);
                backoff = Some(DEFAULT_BACKOFF);
                continue;
            }
        };

        let status = resp.status();
        let new_etag = header_string(&resp, reqwest::header::ETAG);
        let max_age = resp
            .headers()
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_cache_control);

        if status == StatusCode::NOT_MODIFIED {
            return Ok(FetchOutcome {
                response: None,
                etag: new_etag,
                max_age,
            });
        }
        if status != StatusCode::OK {
            warn!(
                "[fetcher] Request for '{}' got a non-200 response: {}",
                url, status
            );
            backoff = Some(if status == StatusCode::SERVICE_UNAVAILABLE {
                retry_after(&resp).unwrap_or(DEFAULT_BACKOFF)
            } else {
                DEFAULT_BACKOFF
            });
            continue;
        }

        let body = match resp.bytes().await {
            Ok(body) => body.to_vec(),
            Err(e) => {
                warn!("[fetcher] Failed to read response body from '{}': {}", url, e);
                backoff = Some(DEFAULT_BACKOFF);
                continue;
            }
        };
        let parsed = match parse_response(&body, issuer) {
            Ok(parsed) => parsed,
            Err(OcspError::ResponderFailure(name)) => {
                warn!(
                    "[fetcher] Request for '{}' got an invalid OCSP response status: {}",
                    url, name
                );
                backoff = Some(DEFAULT_BACKOFF);
                continue;
            }
            Err(e) => {
                warn!("[fetcher] Failed to parse response body from '{}': {}", url, e);
                backoff = Some(DEFAULT_BACKOFF);
                continue;
            }
        };
        if parsed.status != CertStatus::Good {
            warn!(
                "[fetcher] Response from '{}' reports non-Good certificate status",
                url
            );
            backoff = Some(DEFAULT_BACKOFF);
            continue;
        }

        return Ok(FetchOutcome {
            response: Some((parsed, body)),
            etag: new_etag,
            max_age,
        });
    }
}

fn header_string(resp: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

fn retry_after(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Extract `max-age` from a Cache-Control header. Other directives are
/// ignored.
pub(crate) fn parse_cache_control(header: &str) -> Option<Duration> {
    for directive in header.split(',') {
        let directive = directive.trim().replace(' ', "");
        if let Some(value) = directive.strip_prefix("max-age=") {
            if let Ok(secs) = value.parse::<u64>() {
                return Some(Duration::from_secs(secs));
            }
        }
    }
    None
}

/// Trim a single trailing '/' from each responder URL.
pub(crate) fn normalize_responders(responders: &[String]) -> Vec<String> {
    responders
        .iter()
        .map(|r| r.strip_suffix('/').unwrap_or(r).to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cache_control_max_age() {
        assert_eq!(
            parse_cache_control("max-age=600"),
            Some(Duration::from_secs(600))
        );
        assert_eq!(
            parse_cache_control("public, max-age=43200, no-transform"),
            Some(Duration::from_secs(43200))
        );
        assert_eq!(
            parse_cache_control(" max-age = 10"),
            Some(Duration::from_secs(10)),
            "whitespace inside a directive is stripped before matching"
        );
        assert_eq!(
            parse_cache_control("public,  max-age=7"),
            Some(Duration::from_secs(7))
        );
        assert_eq!(parse_cache_control("no-store"), None);
        assert_eq!(parse_cache_control("max-age=abc"), None);
    }

    #[test]
    fn test_normalize_responders_trims_one_slash() {
        let responders = vec![
            "http://ocsp.example.com/".to_string(),
            "http://ocsp.example.com".to_string(),
            "http://ocsp.example.com//".to_string(),
        ];
        assert_eq!(
            normalize_responders(&responders),
            vec![
                "http://ocsp.example.com",
                "http://ocsp.example.com",
                "http://ocsp.example.com/",
            ]
        );
    }

    #[tokio::test]
    async fn test_fetch_requires_responders() {
        let rng = Mutex::new(<StdRng as rand::SeedableRng>::seed_from_u64(1));
        let signer = stapled_ocsp::testutil::TestSigner::generate();
        let issuer = signer.issuer_certificate(b"issuer");
        let client = reqwest::Client::new();
        assert!(matches!(
            fetch(&client, &[], b"req", None, &issuer, &rng).await,
            Err(CacheError::NoResponders)
        ));
    }
}
