//! The entry cache
//!
//! Two maps share ownership of every entry: `by_name` is the authoritative
//! set, `by_key` indexes the same entries under one 32-byte key per
//! configured hash algorithm so a wire request can be answered with a
//! single map read. Both maps sit behind one RwLock because insertion and
//! removal must change them together; nothing may observe a name without
//! its keys or keys without their name.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use stapled_ocsp::{hash_name_and_key, Certificate, HashAlgorithm, OcspRequest};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::entry::Entry;
use crate::error::CacheError;
use crate::issuers::IssuerCache;
use crate::stable::StableCache;

/// Collapse a request identity to the fixed-width cache key:
/// `SHA-256(nameHash ‖ keyHash ‖ SHA-256(serial))`. The outer digest
/// normalizes away the inner hash algorithm's width.
pub fn request_key(name_hash: &[u8], key_hash: &[u8], serial: &[u8]) -> [u8; 32] {
    let serial_hash = Sha256::digest(serial);
    let mut hasher = Sha256::new();
    hasher.update(name_hash);
    hasher.update(key_hash);
    hasher.update(serial_hash);
    hasher.finalize().into()
}

fn entry_key(alg: HashAlgorithm, issuer: &Certificate, serial: &[u8]) -> [u8; 32] {
    let (name_hash, key_hash) =
        hash_name_and_key(alg, &issuer.raw_subject, &issuer.spki_public_key);
    request_key(&name_hash, &key_hash, serial)
}

#[derive(Default)]
struct Maps {
    by_name: HashMap<String, Arc<Entry>>,
    by_key: HashMap<[u8; 32], Arc<Entry>>,
}

pub struct EntryCache {
    clock: Arc<dyn Clock>,
    request_timeout: Duration,
    client: reqwest::Client,
    stable_backings: Vec<Arc<dyn StableCache>>,
    issuers: IssuerCache,
    hashes: Vec<HashAlgorithm>,
    rng: Mutex<StdRng>,
    maps: RwLock<Maps>,
}

impl EntryCache {
    pub fn new(
        clock: Arc<dyn Clock>,
        stable_backings: Vec<Arc<dyn StableCache>>,
        client: reqwest::Client,
        request_timeout: Duration,
        issuers: Vec<Certificate>,
        hashes: Vec<HashAlgorithm>,
        rng: StdRng,
    ) -> Self {
        EntryCache {
            issuers: IssuerCache::new(issuers, &hashes),
            clock,
            request_timeout,
            client,
            stable_backings,
            hashes,
            rng: Mutex::new(rng),
            maps: RwLock::new(Maps::default()),
        }
    }

    /// Spawn the background refresh driver: every `tick`, fan one refresh
    /// task out per entry. A stuck responder stalls only its own task.
    pub fn start_monitor(self: &Arc<Self>, tick: Duration) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // entries are refreshed as part of init; skip the immediate tick
            interval.tick().await;
            loop {
                interval.tick().await;
                let entries: Vec<Arc<Entry>> = {
                    let maps = cache.maps.read().unwrap();
                    maps.by_name.values().cloned().collect()
                };
                for entry in entries {
                    let backings = cache.stable_backings.clone();
                    let client = cache.client.clone();
                    tokio::spawn(async move {
                        entry.refresh_and_log(&backings, &client).await;
                    });
                }
            }
        })
    }

    /// Install an entry under its name and every configured hash key,
    /// overwriting (with a warning) an existing entry of the same name.
    pub fn add(&self, entry: Arc<Entry>) {
        let keys = self.entry_keys(&entry);
        let mut maps = self.maps.write().unwrap();
        if let Some(old) = maps.by_name.get(entry.name()).cloned() {
            warn!("[cache] Overwriting cache entry '{}'", entry.name());
            for key in self.entry_keys(&old) {
                maps.by_key.remove(&key);
            }
        } else {
            info!("[cache] Adding entry for '{}'", entry.name());
        }
        maps.by_name.insert(entry.name().to_string(), entry.clone());
        for key in keys {
            maps.by_key.insert(key, entry.clone());
        }
    }

    /// Install an entry known only under a single request key, as when it
    /// was synthesized from one wire request. Never overwrites: a
    /// synthesized entry must not clobber a named one that happens to
    /// share its name.
    pub fn add_single(&self, entry: Arc<Entry>, key: [u8; 32]) {
        let mut maps = self.maps.write().unwrap();
        if maps.by_name.contains_key(entry.name()) {
            warn!("[cache] Entry for '{}' already exists in cache", entry.name());
            return;
        }
        info!("[cache] Adding entry for '{}'", entry.name());
        maps.by_name.insert(entry.name().to_string(), entry.clone());
        maps.by_key.insert(key, entry);
    }

    pub fn lookup(&self, request: &OcspRequest) -> Option<Arc<Entry>> {
        let key = request_key(
            &request.issuer_name_hash,
            &request.issuer_key_hash,
            &request.serial,
        );
        self.maps.read().unwrap().by_key.get(&key).cloned()
    }

    /// Response bytes for a request, plus whether they are past their
    /// nextUpdate.
    pub fn lookup_response(&self, request: &OcspRequest) -> Option<(Vec<u8>, bool)> {
        self.lookup(request).and_then(|entry| entry.serve())
    }

    /// Drop an entry and all of its keys. In-flight serves holding the
    /// entry finish normally; it just stops being refreshed.
    pub fn remove(&self, name: &str) -> Result<(), CacheError> {
        let mut maps = self.maps.write().unwrap();
        let entry = maps
            .by_name
            .remove(name)
            .ok_or_else(|| CacheError::NotInCache(name.to_string()))?;
        for key in self.entry_keys(&entry) {
            maps.by_key.remove(&key);
        }
        info!("[cache] Removed entry for '{}' from cache", name);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.maps.read().unwrap().by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.maps.read().unwrap().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create, initialize, and insert an entry from a certificate file.
    ///
    /// The issuer comes from the explicit argument, the issuer cache, or an
    /// AIA fetch, in that order; `responders` (when non-empty) overrides
    /// the certificate's own OCSP URLs.
    pub async fn add_from_certificate(
        &self,
        path: impl AsRef<Path>,
        issuer: Option<Certificate>,
        responders: &[String],
    ) -> Result<(), CacheError> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .filter(|stem| !stem.is_empty())
            .ok_or_else(|| CacheError::BadEntryName(path.display().to_string()))?
            .to_string();
        let cert = Certificate::from_file(path)?;
        let responders = if responders.is_empty() {
            cert.ocsp_servers.clone()
        } else {
            responders.to_vec()
        };

        let issuer = match issuer {
            Some(issuer) => {
                let issuer = Arc::new(issuer);
                self.issuers.add(issuer.clone());
                issuer
            }
            None => match self
                .issuers
                .get_from_certificate(&cert.raw_issuer, &cert.authority_key_id)
            {
                Some(issuer) => issuer,
                None => self.fetch_issuer(&cert).await?,
            },
        };

        let entry = Arc::new(Entry::new(
            name,
            cert.serial.clone(),
            issuer,
            &responders,
            self.request_timeout,
            self.clock.clone(),
            self.entry_rng(),
        )?);
        entry.init(&self.stable_backings, &self.client).await?;
        self.insert_initialized(entry)
    }

    /// Create, initialize, and insert an entry from a name and serial,
    /// for certificates the daemon cannot read from disk.
    pub async fn add_from_serial(
        &self,
        name: String,
        serial: Vec<u8>,
        issuer: Certificate,
        responders: &[String],
    ) -> Result<(), CacheError> {
        let issuer = Arc::new(issuer);
        self.issuers.add(issuer.clone());
        let entry = Arc::new(Entry::new(
            name,
            serial,
            issuer,
            responders,
            self.request_timeout,
            self.clock.clone(),
            self.entry_rng(),
        )?);
        entry.init(&self.stable_backings, &self.client).await?;
        self.insert_initialized(entry)
    }

    /// Synthesize an entry from a wire request and return its response
    /// bytes. The issuer must already be resolvable through the issuer
    /// cache; the marshaled request is reused upstream as-is.
    pub async fn add_from_request(
        &self,
        request: &OcspRequest,
        upstream: &[String],
    ) -> Result<Vec<u8>, CacheError> {
        let issuer = self
            .issuers
            .get_from_request(&request.issuer_name_hash, &request.issuer_key_hash)
            .ok_or(CacheError::UnknownIssuer)?;
        let request_der = request.to_der()?;
        let key = request_key(
            &request.issuer_name_hash,
            &request.issuer_key_hash,
            &request.serial,
        );
        let name = hex::encode_upper(key);

        let entry = Arc::new(Entry::with_request(
            name,
            request.serial.clone(),
            issuer,
            upstream,
            request_der,
            self.request_timeout,
            self.clock.clone(),
            self.entry_rng(),
        ));
        entry.init(&self.stable_backings, &self.client).await?;
        let (response, _) = entry
            .serve()
            .ok_or_else(|| CacheError::EmptyEntry(entry.name().to_string()))?;
        self.add_single(entry, key);
        Ok(response)
    }

    // an entry must never enter the maps without a verified response
    fn insert_initialized(&self, entry: Arc<Entry>) -> Result<(), CacheError> {
        if entry.serve().is_none() {
            return Err(CacheError::EmptyEntry(entry.name().to_string()));
        }
        self.add(entry);
        Ok(())
    }

    async fn fetch_issuer(&self, cert: &Certificate) -> Result<Arc<Certificate>, CacheError> {
        for url in &cert.issuer_urls {
            match self.get_issuer(url).await {
                Ok(issuer) => {
                    let issuer = Arc::new(issuer);
                    self.issuers.add(issuer.clone());
                    return Ok(issuer);
                }
                Err(e) => {
                    warn!("Failed to retrieve issuer from '{}': {}", url, e);
                }
            }
        }
        Err(CacheError::UnknownIssuer)
    }

    async fn get_issuer(&self, url: &str) -> Result<Certificate, CacheError> {
        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(Certificate::parse(&body)?)
    }

    fn entry_keys(&self, entry: &Entry) -> Vec<[u8; 32]> {
        self.hashes
            .iter()
            .map(|&alg| entry_key(alg, entry.issuer(), entry.serial()))
            .collect()
    }

    fn entry_rng(&self) -> StdRng {
        StdRng::seed_from_u64(self.rng.lock().unwrap().gen())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use chrono::Utc;
    use stapled_ocsp::testutil::TestSigner;

    fn test_cache(hashes: Vec<HashAlgorithm>) -> Arc<EntryCache> {
        Arc::new(EntryCache::new(
            Arc::new(FakeClock::new(Utc::now())),
            Vec::new(),
            reqwest::Client::new(),
            Duration::from_secs(10),
            Vec::new(),
            hashes,
            StdRng::seed_from_u64(42),
        ))
    }

    fn test_entry(cache: &EntryCache, name: &str, serial: &[u8], issuer: Arc<Certificate>) -> Arc<Entry> {
        let entry = Arc::new(
            Entry::new(
                name.to_string(),
                serial.to_vec(),
                issuer,
                &["http://ocsp.example.com".to_string()],
                Duration::from_secs(10),
                cache.clock.clone(),
                StdRng::seed_from_u64(1),
            )
            .expect("entry"),
        );
        let now = Utc::now();
        entry.inject_response(
            vec![0x05, 0x00, 0x01],
            now - chrono::Duration::hours(1),
            now + chrono::Duration::hours(1),
        );
        entry
    }

    #[test]
    fn test_lookup_under_every_hash() {
        let cache = test_cache(HashAlgorithm::ALL.to_vec());
        let signer = TestSigner::generate();
        let issuer = Arc::new(signer.issuer_certificate(b"issuer"));
        let entry = test_entry(&cache, "test.der", &[0x05, 0x39], issuer.clone());
        cache.add(entry.clone());

        for alg in HashAlgorithm::ALL {
            let request = OcspRequest::new(alg, &issuer, &[0x05, 0x39]);
            let found = cache.lookup(&request).expect("entry should be indexed");
            assert!(Arc::ptr_eq(&found, &entry), "wrong entry for {}", alg.name());
            let (response, stale) = cache
                .lookup_response(&request)
                .expect("response should be served");
            assert_eq!(response, vec![0x05, 0x00, 0x01]);
            assert!(!stale);
        }
    }

    #[test]
    fn test_remove_clears_every_key() {
        let cache = test_cache(HashAlgorithm::ALL.to_vec());
        let signer = TestSigner::generate();
        let issuer = Arc::new(signer.issuer_certificate(b"issuer"));
        cache.add(test_entry(&cache, "test.der", &[0x05, 0x39], issuer.clone()));

        cache.remove("test.der").expect("remove");
        for alg in HashAlgorithm::ALL {
            let request = OcspRequest::new(alg, &issuer, &[0x05, 0x39]);
            assert!(cache.lookup(&request).is_none());
            assert!(cache.lookup_response(&request).is_none());
        }

        // second remove reports absence without corrupting the maps
        assert!(matches!(
            cache.remove("test.der"),
            Err(CacheError::NotInCache(_))
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_overwrite_replaces_old_keys() {
        let cache = test_cache(HashAlgorithm::ALL.to_vec());
        let signer = TestSigner::generate();
        let issuer = Arc::new(signer.issuer_certificate(b"issuer"));
        cache.add(test_entry(&cache, "site", &[0x01], issuer.clone()));
        cache.add(test_entry(&cache, "site", &[0x02], issuer.clone()));

        assert_eq!(cache.len(), 1);
        let old = OcspRequest::new(HashAlgorithm::Sha1, &issuer, &[0x01]);
        assert!(cache.lookup(&old).is_none(), "old keys must be gone");
        let new = OcspRequest::new(HashAlgorithm::Sha1, &issuer, &[0x02]);
        assert!(cache.lookup(&new).is_some());
    }

    #[test]
    fn test_add_single_does_not_overwrite() {
        let cache = test_cache(HashAlgorithm::ALL.to_vec());
        let signer = TestSigner::generate();
        let issuer = Arc::new(signer.issuer_certificate(b"issuer"));
        let named = test_entry(&cache, "site", &[0x01], issuer.clone());
        cache.add(named.clone());

        let synthesized = test_entry(&cache, "site", &[0x02], issuer.clone());
        let key = entry_key(HashAlgorithm::Sha1, &issuer, &[0x02]);
        cache.add_single(synthesized, key);

        // the named entry survives and the synthesized key was not installed
        let request = OcspRequest::new(HashAlgorithm::Sha1, &issuer, &[0x02]);
        assert!(cache.lookup(&request).is_none());
        let named_request = OcspRequest::new(HashAlgorithm::Sha1, &issuer, &[0x01]);
        assert!(Arc::ptr_eq(&cache.lookup(&named_request).unwrap(), &named));
    }

    #[test]
    fn test_limited_hash_set_limits_reachability() {
        let cache = test_cache(vec![HashAlgorithm::Sha1]);
        let signer = TestSigner::generate();
        let issuer = Arc::new(signer.issuer_certificate(b"issuer"));
        cache.add(test_entry(&cache, "narrow", &[0x07], issuer.clone()));

        let sha1 = OcspRequest::new(HashAlgorithm::Sha1, &issuer, &[0x07]);
        assert!(cache.lookup(&sha1).is_some());
        let sha256 = OcspRequest::new(HashAlgorithm::Sha256, &issuer, &[0x07]);
        assert!(cache.lookup(&sha256).is_none());
    }

    #[tokio::test]
    async fn test_add_from_request_requires_known_issuer() {
        let cache = test_cache(HashAlgorithm::ALL.to_vec());
        let signer = TestSigner::generate();
        let issuer = signer.issuer_certificate(b"issuer");
        let request = OcspRequest::new(HashAlgorithm::Sha1, &issuer, &[0x05, 0x39]);
        assert!(matches!(
            cache
                .add_from_request(&request, &["http://127.0.0.1:1".to_string()])
                .await,
            Err(CacheError::UnknownIssuer)
        ));
    }

    #[tokio::test]
    async fn test_add_from_certificate_rejects_missing_file() {
        let cache = test_cache(HashAlgorithm::ALL.to_vec());
        assert!(matches!(
            cache
                .add_from_certificate("/nonexistent/site.pem", None, &[])
                .await,
            Err(CacheError::Ocsp(_))
        ));
    }

    #[test]
    fn test_request_key_matches_wire_request_hashing() {
        // a key built from issuer identity must equal one built from the
        // equivalent wire request fields
        let signer = TestSigner::generate();
        let issuer = signer.issuer_certificate(b"issuer");
        for alg in HashAlgorithm::ALL {
            let request = OcspRequest::new(alg, &issuer, &[0x05, 0x39]);
            let from_request = request_key(
                &request.issuer_name_hash,
                &request.issuer_key_hash,
                &request.serial,
            );
            let from_identity = entry_key(alg, &issuer, &[0x05, 0x39]);
            assert_eq!(from_request, from_identity);
        }
    }
}
