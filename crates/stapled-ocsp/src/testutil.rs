//! Test-only helpers for producing signed OCSP material without fixtures
//!
//! Keys are generated at runtime (ECDSA P-256 via `ring`), so tests need no
//! checked-in private keys and every run exercises real signatures.

use chrono::{DateTime, Utc};
use const_oid::db::rfc5912::ECDSA_WITH_SHA_256;
use const_oid::db::rfc6960::ID_PKIX_OCSP_BASIC;
use der::asn1::{BitString, GeneralizedTime, Null, OctetString};
use der::Encode;
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_ASN1_SIGNING};
use sha1::{Digest, Sha1};
use spki::AlgorithmIdentifierOwned;
use x509_cert::ext::pkix::CrlReason;
use x509_ocsp::{
    BasicOcspResponse, OcspGeneralizedTime, OcspResponse as OcspResponseDer, OcspResponseStatus,
    ResponderId, ResponseBytes, ResponseData, RevokedInfo, SingleResponse, Version,
};
use x509_ocsp::CertStatus as CertStatusDer;

use crate::cert::Certificate;
use crate::request::{HashAlgorithm, OcspRequest};
use crate::response::CertStatus;

/// An in-memory OCSP signer with a freshly generated P-256 key.
pub struct TestSigner {
    key: EcdsaKeyPair,
    rng: SystemRandom,
}

impl TestSigner {
    pub fn generate() -> Self {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng)
            .expect("generate test key");
        let key = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8.as_ref(), &rng)
            .expect("load test key");
        TestSigner { key, rng }
    }

    /// The uncompressed EC point, i.e. the subjectPublicKey bits an issuer
    /// certificate would carry for this key.
    pub fn public_key_bits(&self) -> Vec<u8> {
        self.key.public_key().as_ref().to_vec()
    }

    /// A fabricated issuer certificate whose identity fields are arbitrary
    /// but whose public key matches this signer.
    pub fn issuer_certificate(&self, subject: &[u8]) -> Certificate {
        Certificate {
            der: vec![0x30, 0x00],
            serial: vec![0x01],
            raw_subject: subject.to_vec(),
            raw_issuer: b"test-root".to_vec(),
            spki_public_key: self.public_key_bits(),
            subject_key_id: Sha1::digest(self.public_key_bits()).to_vec(),
            authority_key_id: vec![],
            ocsp_servers: vec![],
            issuer_urls: vec![],
        }
    }

    /// Build and sign a single-status OCSP response.
    pub fn signed_response(
        &self,
        serial: &[u8],
        status: CertStatus,
        this_update: DateTime<Utc>,
        next_update: DateTime<Utc>,
    ) -> Vec<u8> {
        self.build(serial, status, this_update, Some(next_update))
    }

    /// A response lacking nextUpdate, which the parser must reject.
    pub fn signed_response_without_next_update(
        &self,
        serial: &[u8],
        this_update: DateTime<Utc>,
    ) -> Vec<u8> {
        self.build(serial, CertStatus::Good, this_update, None)
    }

    fn build(
        &self,
        serial: &[u8],
        status: CertStatus,
        this_update: DateTime<Utc>,
        next_update: Option<DateTime<Utc>>,
    ) -> Vec<u8> {
        let issuer = self.issuer_certificate(b"test-issuer");
        let cert_id = OcspRequest::new(HashAlgorithm::Sha1, &issuer, serial)
            .cert_id()
            .expect("cert id");

        let cert_status = match status {
            CertStatus::Good => CertStatusDer::Good(Null),
            CertStatus::Unknown => CertStatusDer::Unknown(Null),
            CertStatus::Revoked { revoked_at, reason } => CertStatusDer::Revoked(RevokedInfo {
                revocation_time: generalized(revoked_at),
                revocation_reason: reason.map(crl_reason),
            }),
        };

        let tbs = ResponseData {
            version: Version::V1,
            responder_id: ResponderId::ByKey(
                OctetString::new(Sha1::digest(self.public_key_bits()).to_vec())
                    .expect("responder key hash"),
            ),
            produced_at: generalized(this_update),
            responses: vec![SingleResponse {
                cert_id,
                cert_status,
                this_update: generalized(this_update),
                next_update: next_update.map(generalized),
                single_extensions: None,
            }],
            response_extensions: None,
        };

        let tbs_der = tbs.to_der().expect("encode tbsResponseData");
        let sig = self
            .key
            .sign(&self.rng, &tbs_der)
            .expect("sign tbsResponseData");

        let basic = BasicOcspResponse {
            tbs_response_data: tbs,
            signature_algorithm: AlgorithmIdentifierOwned {
                oid: ECDSA_WITH_SHA_256,
                parameters: None,
            },
            signature: BitString::from_bytes(sig.as_ref()).expect("signature bits"),
            certs: None,
        };

        OcspResponseDer {
            response_status: OcspResponseStatus::Successful,
            response_bytes: Some(ResponseBytes {
                response_type: ID_PKIX_OCSP_BASIC,
                response: OctetString::new(basic.to_der().expect("encode basic response"))
                    .expect("wrap basic response"),
            }),
        }
        .to_der()
        .expect("encode response")
    }
}

fn generalized(time: DateTime<Utc>) -> OcspGeneralizedTime {
    OcspGeneralizedTime(
        GeneralizedTime::from_unix_duration(std::time::Duration::from_secs(
            time.timestamp() as u64,
        ))
        .expect("generalized time"),
    )
}

fn crl_reason(code: u8) -> CrlReason {
    match code {
        1 => CrlReason::KeyCompromise,
        2 => CrlReason::CaCompromise,
        3 => CrlReason::AffiliationChanged,
        4 => CrlReason::Superseded,
        5 => CrlReason::CessationOfOperation,
        6 => CrlReason::CertificateHold,
        8 => CrlReason::RemoveFromCRL,
        9 => CrlReason::PrivilegeWithdrawn,
        10 => CrlReason::AaCompromise,
        _ => CrlReason::Unspecified,
    }
}
