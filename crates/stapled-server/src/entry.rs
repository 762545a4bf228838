//! Per-certificate cache entries
//!
//! An entry's identity (name, serial, issuer, responders, request blob) is
//! fixed at construction. Everything refresh-mutable lives in one state
//! bundle behind a RwLock, so a reader always observes a complete
//! before-or-after snapshot of `{response, etag, max_age, last_sync,
//! this_update, next_update}`.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::Rng;
use stapled_ocsp::{verify_response, Certificate, HashAlgorithm, OcspRequest, OcspResponse};
use tracing::{error, info};

use crate::clock::Clock;
use crate::error::CacheError;
use crate::fetcher::{fetch, normalize_responders};
use crate::stable::StableCache;

#[derive(Debug, Default)]
struct EntryState {
    response: Option<Vec<u8>>,
    etag: Option<String>,
    max_age: Option<Duration>,
    last_sync: Option<DateTime<Utc>>,
    this_update: Option<DateTime<Utc>>,
    next_update: Option<DateTime<Utc>>,
}

/// Refresh-mutable metadata, copied out under the read lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMetadata {
    pub etag: Option<String>,
    pub max_age: Option<Duration>,
    pub last_sync: Option<DateTime<Utc>>,
    pub this_update: Option<DateTime<Utc>>,
    pub next_update: Option<DateTime<Utc>>,
}

pub struct Entry {
    name: String,
    serial: Vec<u8>,
    issuer: Arc<Certificate>,
    responders: Vec<String>,
    request: Vec<u8>,
    timeout: Duration,
    clock: Arc<dyn Clock>,
    rng: Mutex<StdRng>,
    state: RwLock<EntryState>,
}

impl Entry {
    /// Build an entry whose upstream request is derived from the issuer and
    /// serial (SHA-1, the canonical CertID algorithm).
    pub fn new(
        name: String,
        serial: Vec<u8>,
        issuer: Arc<Certificate>,
        responders: &[String],
        timeout: Duration,
        clock: Arc<dyn Clock>,
        rng: StdRng,
    ) -> Result<Self, CacheError> {
        let request = OcspRequest::new(HashAlgorithm::Sha1, &issuer, &serial).to_der()?;
        Ok(Self::with_request(
            name, serial, issuer, responders, request, timeout, clock, rng,
        ))
    }

    /// Build an entry around an already-marshaled request blob, as when the
    /// entry is synthesized from a wire request.
    #[allow(clippy::too_many_arguments)]
    pub fn with_request(
        name: String,
        serial: Vec<u8>,
        issuer: Arc<Certificate>,
        responders: &[String],
        request: Vec<u8>,
        timeout: Duration,
        clock: Arc<dyn Clock>,
        rng: StdRng,
    ) -> Self {
        Entry {
            name,
            serial,
            issuer,
            responders: normalize_responders(responders),
            request,
            timeout,
            clock,
            rng: Mutex::new(rng),
            state: RwLock::new(EntryState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn serial(&self) -> &[u8] {
        &self.serial
    }

    pub fn issuer(&self) -> &Arc<Certificate> {
        &self.issuer
    }

    /// Current response bytes plus whether they are past nextUpdate.
    pub fn serve(&self) -> Option<(Vec<u8>, bool)> {
        let now = self.clock.now();
        let state = self.state.read().unwrap();
        let response = state.response.clone()?;
        let stale = state.next_update.map(|next| next < now).unwrap_or(false);
        Some((response, stale))
    }

    pub fn metadata(&self) -> EntryMetadata {
        let state = self.state.read().unwrap();
        EntryMetadata {
            etag: state.etag.clone(),
            max_age: state.max_age,
            last_sync: state.last_sync,
            this_update: state.this_update,
            next_update: state.next_update,
        }
    }

    /// Populate the entry: adopt the first usable stable-backing response,
    /// otherwise fetch one. Failure means the entry must not enter the
    /// cache.
    pub async fn init(
        &self,
        backings: &[Arc<dyn StableCache>],
        client: &reqwest::Client,
    ) -> Result<(), CacheError> {
        for backing in backings {
            if let Some((parsed, bytes)) = backing.read(&self.name, &self.serial, &self.issuer) {
                // adopted, not fetched: no etag/max-age, no write-back
                self.install(&parsed, bytes, None, None, &[]);
                return Ok(());
            }
        }
        self.refresh(backings, client).await
    }

    /// Whether the entry should refresh now.
    ///
    /// Immediately when it has no response, the response is stale, or the
    /// responder's max-age has lapsed; otherwise with uniformly random
    /// probability across the final quarter of the validity window, which
    /// smears refresh load instead of stampeding at a fixed boundary.
    pub fn time_to_update(&self) -> bool {
        let now = self.clock.now();
        let state = self.state.read().unwrap();
        let (this_update, next_update) = match (&state.response, state.this_update, state.next_update)
        {
            (Some(_), Some(this_update), Some(next_update)) => (this_update, next_update),
            _ => return true,
        };
        if next_update < now {
            self.log_info("Stale response, updating immediately");
            return true;
        }
        if let (Some(max_age), Some(last_sync)) = (state.max_age, state.last_sync) {
            if !max_age.is_zero() {
                if let Ok(max_age) = chrono::Duration::from_std(max_age) {
                    if last_sync + max_age < now {
                        self.log_info("max-age has expired, updating immediately");
                        return true;
                    }
                }
            }
        }

        let window = (next_update - this_update) / 4;
        let window_start = next_update - window;
        if window_start > now {
            return false;
        }

        let window_secs = window.num_seconds().max(1);
        let offset = self.rng.lock().unwrap().gen_range(0..window_secs);
        if window_start + chrono::Duration::seconds(offset) < now {
            self.log_info("Time to update");
            return true;
        }
        false
    }

    /// Fetch, verify, and swap in a newer response.
    ///
    /// A 304 or byte-identical body only advances `etag`/`max_age`/
    /// `last_sync`; the body, validity window, and stable backings stay
    /// untouched. Errors leave all state as it was.
    pub async fn refresh(
        &self,
        backings: &[Arc<dyn StableCache>],
        client: &reqwest::Client,
    ) -> Result<(), CacheError> {
        if !self.time_to_update() {
            return Ok(());
        }
        let etag = self.state.read().unwrap().etag.clone();
        let outcome = tokio::time::timeout(
            self.timeout,
            fetch(
                client,
                &self.responders,
                &self.request,
                etag.as_deref(),
                &self.issuer,
                &self.rng,
            ),
        )
        .await
        .map_err(|_| CacheError::Timeout)??;

        let (parsed, bytes) = match outcome.response {
            None => {
                self.apply_metadata(outcome.etag, outcome.max_age);
                self.log_info("Response hasn't changed since last sync");
                return Ok(());
            }
            Some(response) => response,
        };

        verify_response(self.clock.now(), &self.serial, &parsed)?;

        let unchanged = {
            let state = self.state.read().unwrap();
            state.response.as_deref() == Some(bytes.as_slice())
        };
        if unchanged {
            self.apply_metadata(outcome.etag, outcome.max_age);
            self.log_info("Response hasn't changed since last sync");
            return Ok(());
        }

        let expires_in = (parsed.next_update - self.clock.now())
            .to_std()
            .unwrap_or_default();
        self.install(&parsed, bytes, outcome.etag, outcome.max_age, backings);
        self.log_info(&format!(
            "Updating with new response, expires in {}",
            humantime::format_duration(Duration::from_secs(expires_in.as_secs()))
        ));
        Ok(())
    }

    /// Refresh wrapper for background tasks that own no error channel.
    pub async fn refresh_and_log(
        &self,
        backings: &[Arc<dyn StableCache>],
        client: &reqwest::Client,
    ) {
        if let Err(e) = self.refresh(backings, client).await {
            error!("[entry:{}] Failed to refresh response: {}", self.name, e);
        }
    }

    fn apply_metadata(&self, etag: Option<String>, max_age: Option<Duration>) {
        let mut state = self.state.write().unwrap();
        state.etag = etag;
        state.max_age = max_age;
        state.last_sync = Some(self.clock.now());
    }

    fn install(
        &self,
        parsed: &OcspResponse,
        bytes: Vec<u8>,
        etag: Option<String>,
        max_age: Option<Duration>,
        backings: &[Arc<dyn StableCache>],
    ) {
        let mut state = self.state.write().unwrap();
        state.etag = etag;
        state.max_age = max_age;
        state.last_sync = Some(self.clock.now());
        state.this_update = Some(parsed.this_update);
        state.next_update = Some(parsed.next_update);
        // fan out before the bytes move into the state bundle; holding the
        // write lock keeps disk writes in swap order
        for backing in backings {
            backing.write(&self.name, &bytes);
        }
        state.response = Some(bytes);
    }

    fn log_info(&self, msg: &str) {
        info!("[entry:{}] {}", self.name, msg);
    }

    #[cfg(test)]
    pub(crate) fn inject_response(
        &self,
        bytes: Vec<u8>,
        this_update: DateTime<Utc>,
        next_update: DateTime<Utc>,
    ) {
        let mut state = self.state.write().unwrap();
        state.response = Some(bytes);
        state.this_update = Some(this_update);
        state.next_update = Some(next_update);
        state.last_sync = Some(this_update);
    }
}
