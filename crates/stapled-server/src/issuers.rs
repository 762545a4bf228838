//! Issuer certificate resolution
//!
//! An issuer is reachable two ways: by the raw subject DN plus key
//! identifier a child certificate names, or by the hashed
//! (issuerNameHash, issuerKeyHash) pair a wire OCSP request carries. One
//! request-hash key is installed per configured hash algorithm; an issuer
//! is only resolvable from requests using a configured hash.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use sha2::{Digest, Sha256};
use stapled_ocsp::{hash_name_and_key, Certificate, HashAlgorithm};

#[derive(Default)]
struct Maps {
    by_subject_akid: HashMap<[u8; 32], Arc<Certificate>>,
    by_request_hashes: HashMap<[u8; 32], Arc<Certificate>>,
}

pub struct IssuerCache {
    hashes: Vec<HashAlgorithm>,
    maps: RwLock<Maps>,
}

impl IssuerCache {
    pub fn new(issuers: Vec<Certificate>, hashes: &[HashAlgorithm]) -> Self {
        let cache = IssuerCache {
            hashes: hashes.to_vec(),
            maps: RwLock::new(Maps::default()),
        };
        for issuer in issuers {
            cache.add(Arc::new(issuer));
        }
        cache
    }

    pub fn add(&self, issuer: Arc<Certificate>) {
        let subject_key = subject_akid_key(&issuer.raw_subject, &issuer.subject_key_id);
        let request_keys: Vec<[u8; 32]> = self
            .hashes
            .iter()
            .map(|&alg| {
                let (name_hash, key_hash) =
                    hash_name_and_key(alg, &issuer.raw_subject, &issuer.spki_public_key);
                request_hash_key(&name_hash, &key_hash)
            })
            .collect();

        let mut maps = self.maps.write().unwrap();
        maps.by_subject_akid.insert(subject_key, issuer.clone());
        for key in request_keys {
            maps.by_request_hashes.insert(key, issuer.clone());
        }
    }

    /// Resolve by a child certificate's raw issuer DN and authority key id.
    pub fn get_from_certificate(&self, raw_issuer: &[u8], akid: &[u8]) -> Option<Arc<Certificate>> {
        let key = subject_akid_key(raw_issuer, akid);
        self.maps.read().unwrap().by_subject_akid.get(&key).cloned()
    }

    /// Resolve by the hashed issuer identity in a wire OCSP request.
    pub fn get_from_request(&self, name_hash: &[u8], key_hash: &[u8]) -> Option<Arc<Certificate>> {
        let key = request_hash_key(name_hash, key_hash);
        self.maps
            .read()
            .unwrap()
            .by_request_hashes
            .get(&key)
            .cloned()
    }
}

fn subject_akid_key(raw_subject: &[u8], key_id: &[u8]) -> [u8; 32] {
    // copy the DN bytes before hashing; callers may hand us slices that
    // alias a decoder's scratch buffer
    let mut subject = raw_subject.to_vec();
    subject.extend_from_slice(key_id);
    Sha256::digest(&subject).into()
}

fn request_hash_key(name_hash: &[u8], key_hash: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(name_hash);
    hasher.update(key_hash);
    hasher.finalize().into()
}
