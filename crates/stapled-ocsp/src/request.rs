//! OCSP request construction and parsing
//!
//! Requests are keyed by a `CertID`: a hash algorithm plus digests of the
//! issuer's subject DN and public key, and the certificate serial. The
//! daemon builds its own upstream requests with SHA-1 (the de facto
//! algorithm for OCSP) but must understand requests hashed with any of the
//! algorithms a TLS client may pick.

use const_oid::ObjectIdentifier;
use der::asn1::{Null, OctetString};
use der::{Any, Decode, Encode};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use spki::AlgorithmIdentifierOwned;
use x509_cert::serial_number::SerialNumber;
use x509_ocsp::{CertId, OcspRequest as OcspRequestDer, Request, TbsRequest, Version};

use crate::cert::Certificate;
use crate::error::OcspError;

const OID_SHA1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.14.3.2.26");
const OID_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1");
const OID_SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.2");
const OID_SHA512: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.3");

/// Digest algorithms accepted in OCSP `CertID`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// Every supported algorithm, in preference order.
    pub const ALL: [HashAlgorithm; 4] = [
        HashAlgorithm::Sha1,
        HashAlgorithm::Sha256,
        HashAlgorithm::Sha384,
        HashAlgorithm::Sha512,
    ];

    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha1 => Sha1::digest(data).to_vec(),
            HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            HashAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
            HashAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            HashAlgorithm::Sha1 => OID_SHA1,
            HashAlgorithm::Sha256 => OID_SHA256,
            HashAlgorithm::Sha384 => OID_SHA384,
            HashAlgorithm::Sha512 => OID_SHA512,
        }
    }

    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        HashAlgorithm::ALL.into_iter().find(|alg| alg.oid() == *oid)
    }

    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => "SHA1",
            HashAlgorithm::Sha256 => "SHA256",
            HashAlgorithm::Sha384 => "SHA384",
            HashAlgorithm::Sha512 => "SHA512",
        }
    }
}

/// Digest an issuer's subject DN and public key the way OCSP `CertID`s do.
///
/// The key hash covers the right-aligned `subjectPublicKey` bits, never the
/// whole SPKI structure.
pub fn hash_name_and_key(alg: HashAlgorithm, raw_subject: &[u8], key_bits: &[u8]) -> (Vec<u8>, Vec<u8>) {
    (alg.digest(raw_subject), alg.digest(key_bits))
}

/// A single-certificate OCSP request in logical form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcspRequest {
    pub hash_algorithm: HashAlgorithm,
    pub issuer_name_hash: Vec<u8>,
    pub issuer_key_hash: Vec<u8>,
    /// Big-endian serial with leading zero octets stripped
    pub serial: Vec<u8>,
}

impl OcspRequest {
    /// Build a request identifying `serial` under `issuer`.
    pub fn new(alg: HashAlgorithm, issuer: &Certificate, serial: &[u8]) -> Self {
        let (issuer_name_hash, issuer_key_hash) =
            hash_name_and_key(alg, &issuer.raw_subject, &issuer.spki_public_key);
        OcspRequest {
            hash_algorithm: alg,
            issuer_name_hash,
            issuer_key_hash,
            serial: strip_leading_zeros(serial).to_vec(),
        }
    }

    /// Marshal to a DER `OCSPRequest` (unsigned, no extensions).
    pub fn to_der(&self) -> Result<Vec<u8>, OcspError> {
        let req = OcspRequestDer {
            tbs_request: TbsRequest {
                version: Version::V1,
                requestor_name: None,
                request_list: vec![Request {
                    req_cert: self.cert_id()?,
                    single_request_extensions: None,
                }],
                request_extensions: None,
            },
            optional_signature: None,
        };
        Ok(req.to_der()?)
    }

    /// Decode a wire `OCSPRequest` carrying exactly one request.
    pub fn parse(bytes: &[u8]) -> Result<Self, OcspError> {
        let req = OcspRequestDer::from_der(bytes)
            .map_err(|e| OcspError::MalformedRequest(e.to_string()))?;
        let requests = &req.tbs_request.request_list;
        if requests.len() != 1 {
            return Err(OcspError::MalformedRequest(format!(
                "expected 1 request, got {}",
                requests.len()
            )));
        }
        let cert_id = &requests[0].req_cert;
        let alg = HashAlgorithm::from_oid(&cert_id.hash_algorithm.oid).ok_or_else(|| {
            OcspError::MalformedRequest(format!(
                "unsupported hash algorithm {}",
                cert_id.hash_algorithm.oid
            ))
        })?;
        Ok(OcspRequest {
            hash_algorithm: alg,
            issuer_name_hash: cert_id.issuer_name_hash.as_bytes().to_vec(),
            issuer_key_hash: cert_id.issuer_key_hash.as_bytes().to_vec(),
            serial: strip_leading_zeros(cert_id.serial_number.as_bytes()).to_vec(),
        })
    }

    pub(crate) fn cert_id(&self) -> Result<CertId, OcspError> {
        Ok(CertId {
            hash_algorithm: AlgorithmIdentifierOwned {
                oid: self.hash_algorithm.oid(),
                parameters: Some(Any::encode_from(&Null)?),
            },
            issuer_name_hash: OctetString::new(self.issuer_name_hash.clone())?,
            issuer_key_hash: OctetString::new(self.issuer_key_hash.clone())?,
            serial_number: SerialNumber::new(&self.serial)?,
        })
    }
}

/// Normalize an integer's big-endian bytes by dropping sign-padding zeros.
pub(crate) fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_issuer() -> Certificate {
        Certificate {
            der: vec![0x30, 0x00],
            serial: vec![0x01],
            raw_subject: b"subject-dn-der".to_vec(),
            raw_issuer: b"issuer-dn-der".to_vec(),
            spki_public_key: b"public-key-bits".to_vec(),
            subject_key_id: vec![0xaa, 0xbb],
            authority_key_id: vec![],
            ocsp_servers: vec!["http://ocsp.example.com".to_string()],
            issuer_urls: vec![],
        }
    }

    #[test]
    fn test_digest_lengths() {
        assert_eq!(HashAlgorithm::Sha1.digest(b"x").len(), 20);
        assert_eq!(HashAlgorithm::Sha256.digest(b"x").len(), 32);
        assert_eq!(HashAlgorithm::Sha384.digest(b"x").len(), 48);
        assert_eq!(HashAlgorithm::Sha512.digest(b"x").len(), 64);
    }

    #[test]
    fn test_oid_round_trip() {
        for alg in HashAlgorithm::ALL {
            assert_eq!(HashAlgorithm::from_oid(&alg.oid()), Some(alg));
        }
        let unknown = ObjectIdentifier::new_unwrap("1.2.3.4");
        assert!(HashAlgorithm::from_oid(&unknown).is_none());
    }

    #[test]
    fn test_request_der_round_trip() {
        let issuer = fake_issuer();
        for alg in HashAlgorithm::ALL {
            let req = OcspRequest::new(alg, &issuer, &[0x05, 0x39]);
            let der = req.to_der().expect("marshal");
            let parsed = OcspRequest::parse(&der).expect("parse");
            assert_eq!(parsed, req);
        }
    }

    #[test]
    fn test_request_hashes_match_direct_digest() {
        let issuer = fake_issuer();
        let req = OcspRequest::new(HashAlgorithm::Sha256, &issuer, &[0x01]);
        assert_eq!(req.issuer_name_hash, Sha256::digest(b"subject-dn-der").to_vec());
        assert_eq!(req.issuer_key_hash, Sha256::digest(b"public-key-bits").to_vec());
    }

    #[test]
    fn test_serial_normalization() {
        let issuer = fake_issuer();
        let padded = OcspRequest::new(HashAlgorithm::Sha1, &issuer, &[0x00, 0x80]);
        let bare = OcspRequest::new(HashAlgorithm::Sha1, &issuer, &[0x80]);
        assert_eq!(padded.serial, bare.serial);

        // DER sign-pads a serial with the top bit set; parsing must strip
        // the pad again
        let der = bare.to_der().expect("marshal");
        let parsed = OcspRequest::parse(&der).expect("parse");
        assert_eq!(parsed.serial, vec![0x80]);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            OcspRequest::parse(&[0xde, 0xad, 0xbe, 0xef]),
            Err(OcspError::MalformedRequest(_))
        ));
    }
}
