//! OCSP response decoding and signature verification
//!
//! [`parse_response`] is the single entry point: it unwraps the outer
//! `OCSPResponse`, rejects responder-level failures, checks the signature
//! on the embedded `BasicOCSPResponse`, and lifts the single status it
//! carries into [`OcspResponse`]. Callers that hold the raw bytes keep
//! them; the parsed form is metadata only.
//!
//! Signature checking follows the responder model of RFC 6960 §4.2.2.2:
//! the response is signed either by the issuer itself or by a delegated
//! responder certificate included in the response, which must in turn be
//! signed by the issuer.

use chrono::{DateTime, Utc};
use const_oid::db::rfc5912::{
    ECDSA_WITH_SHA_256, ECDSA_WITH_SHA_384, SHA_1_WITH_RSA_ENCRYPTION,
    SHA_256_WITH_RSA_ENCRYPTION, SHA_384_WITH_RSA_ENCRYPTION, SHA_512_WITH_RSA_ENCRYPTION,
};
use const_oid::db::rfc6960::ID_PKIX_OCSP_BASIC;
use const_oid::db::rfc8410::ID_ED_25519;
use const_oid::ObjectIdentifier;
use der::asn1::GeneralizedTime;
use der::{Decode, Encode};
use ring::signature::{self, UnparsedPublicKey};
use x509_ocsp::{BasicOcspResponse, CertStatus as CertStatusDer, OcspResponse as OcspResponseDer};
use x509_ocsp::OcspResponseStatus;
use x509_parser::prelude::parse_x509_certificate;

use crate::cert::Certificate;
use crate::error::OcspError;
use crate::request::strip_leading_zeros;

/// Canned `OCSPResponse` bodies for responder-level errors (RFC 6960 §4.2.1).
/// Each is a bare responseStatus with no responseBytes.
pub const MALFORMED_REQUEST_RESPONSE: [u8; 5] = [0x30, 0x03, 0x0a, 0x01, 0x01];
pub const INTERNAL_ERROR_RESPONSE: [u8; 5] = [0x30, 0x03, 0x0a, 0x01, 0x02];
pub const TRY_LATER_RESPONSE: [u8; 5] = [0x30, 0x03, 0x0a, 0x01, 0x03];
pub const UNAUTHORIZED_RESPONSE: [u8; 5] = [0x30, 0x03, 0x0a, 0x01, 0x06];

/// Revocation state reported for the certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertStatus {
    Good,
    Revoked {
        revoked_at: DateTime<Utc>,
        reason: Option<u8>,
    },
    Unknown,
}

/// A parsed, signature-verified OCSP response for one certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcspResponse {
    pub status: CertStatus,
    /// Serial from the response's CertID, leading zeros stripped
    pub serial: Vec<u8>,
    pub produced_at: DateTime<Utc>,
    pub this_update: DateTime<Utc>,
    pub next_update: DateTime<Utc>,
}

/// Decode `bytes` as a DER `OCSPResponse` and verify its signature against
/// `issuer`.
pub fn parse_response(bytes: &[u8], issuer: &Certificate) -> Result<OcspResponse, OcspError> {
    let outer = OcspResponseDer::from_der(bytes)?;
    match outer.response_status {
        OcspResponseStatus::Successful => {}
        other => return Err(OcspError::ResponderFailure(status_name(other))),
    }
    let response_bytes = outer
        .response_bytes
        .ok_or(OcspError::MissingResponseBytes)?;
    if response_bytes.response_type != ID_PKIX_OCSP_BASIC {
        return Err(OcspError::UnsupportedResponseType(
            response_bytes.response_type.to_string(),
        ));
    }
    let basic = BasicOcspResponse::from_der(response_bytes.response.as_bytes())?;

    verify_signature(&basic, issuer)?;

    let responses = &basic.tbs_response_data.responses;
    if responses.len() != 1 {
        return Err(OcspError::ResponseCount(responses.len()));
    }
    let single = &responses[0];

    let status = match &single.cert_status {
        CertStatusDer::Good(_) => CertStatus::Good,
        CertStatusDer::Revoked(info) => CertStatus::Revoked {
            revoked_at: generalized_to_utc(&info.revocation_time.0)?,
            reason: info.revocation_reason.map(|r| r as u8),
        },
        CertStatusDer::Unknown(_) => CertStatus::Unknown,
    };

    Ok(OcspResponse {
        status,
        serial: strip_leading_zeros(single.cert_id.serial_number.as_bytes()).to_vec(),
        produced_at: generalized_to_utc(&basic.tbs_response_data.produced_at.0)?,
        this_update: generalized_to_utc(&single.this_update.0)?,
        next_update: generalized_to_utc(
            &single
                .next_update
                .as_ref()
                .ok_or(OcspError::MissingNextUpdate)?
                .0,
        )?,
    })
}

fn status_name(status: OcspResponseStatus) -> &'static str {
    match status {
        OcspResponseStatus::Successful => "Successful",
        OcspResponseStatus::MalformedRequest => "MalformedRequest",
        OcspResponseStatus::InternalError => "InternalError",
        OcspResponseStatus::TryLater => "TryLater",
        OcspResponseStatus::SigRequired => "SignatureRequired",
        OcspResponseStatus::Unauthorized => "Unauthorized",
    }
}

fn generalized_to_utc(time: &GeneralizedTime) -> Result<DateTime<Utc>, OcspError> {
    let secs = time.to_unix_duration().as_secs();
    DateTime::<Utc>::from_timestamp(secs as i64, 0).ok_or(OcspError::InvalidTimestamp)
}

/// Verify the `BasicOCSPResponse` signature.
///
/// Tries the issuer key first, then any delegated responder certificate
/// embedded in the response (after checking the issuer signed it).
fn verify_signature(basic: &BasicOcspResponse, issuer: &Certificate) -> Result<(), OcspError> {
    let tbs = basic.tbs_response_data.to_der()?;
    let sig = basic
        .signature
        .as_bytes()
        .ok_or(OcspError::InvalidSignature)?;
    let alg = ring_algorithm(&basic.signature_algorithm.oid)?;

    if UnparsedPublicKey::new(alg, &issuer.spki_public_key)
        .verify(&tbs, sig)
        .is_ok()
    {
        return Ok(());
    }

    let Some(certs) = &basic.certs else {
        return Err(OcspError::InvalidSignature);
    };
    let Some(responder) = certs.first() else {
        return Err(OcspError::InvalidSignature);
    };
    let responder_der = responder.to_der()?;
    let (_, responder_cert) = parse_x509_certificate(&responder_der)
        .map_err(|e| OcspError::InvalidCertificate(e.to_string()))?;
    let (_, issuer_cert) = parse_x509_certificate(&issuer.der)
        .map_err(|e| OcspError::InvalidCertificate(e.to_string()))?;
    responder_cert
        .verify_signature(Some(issuer_cert.public_key()))
        .map_err(|_| OcspError::InvalidSignature)?;

    let responder_key = responder_cert.public_key().subject_public_key.data.to_vec();
    UnparsedPublicKey::new(alg, &responder_key)
        .verify(&tbs, sig)
        .map_err(|_| OcspError::InvalidSignature)
}

fn ring_algorithm(
    oid: &ObjectIdentifier,
) -> Result<&'static dyn signature::VerificationAlgorithm, OcspError> {
    if *oid == SHA_256_WITH_RSA_ENCRYPTION {
        Ok(&signature::RSA_PKCS1_2048_8192_SHA256)
    } else if *oid == SHA_384_WITH_RSA_ENCRYPTION {
        Ok(&signature::RSA_PKCS1_2048_8192_SHA384)
    } else if *oid == SHA_512_WITH_RSA_ENCRYPTION {
        Ok(&signature::RSA_PKCS1_2048_8192_SHA512)
    } else if *oid == SHA_1_WITH_RSA_ENCRYPTION {
        Ok(&signature::RSA_PKCS1_2048_8192_SHA1_FOR_LEGACY_USE_ONLY)
    } else if *oid == ECDSA_WITH_SHA_256 {
        Ok(&signature::ECDSA_P256_SHA256_ASN1)
    } else if *oid == ECDSA_WITH_SHA_384 {
        Ok(&signature::ECDSA_P384_SHA384_ASN1)
    } else if *oid == ID_ED_25519 {
        Ok(&signature::ED25519)
    } else {
        Err(OcspError::UnsupportedSignatureAlgorithm(oid.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::HashAlgorithm;

    fn fake_issuer(key_bits: Vec<u8>) -> Certificate {
        Certificate {
            der: vec![0x30, 0x00],
            serial: vec![0x01],
            raw_subject: b"ocsp-test-issuer".to_vec(),
            raw_issuer: b"ocsp-test-root".to_vec(),
            spki_public_key: key_bits,
            subject_key_id: vec![],
            authority_key_id: vec![],
            ocsp_servers: vec![],
            issuer_urls: vec![],
        }
    }

    #[test]
    fn test_canned_error_responses_decode() {
        for (bytes, status) in [
            (MALFORMED_REQUEST_RESPONSE, "MalformedRequest"),
            (INTERNAL_ERROR_RESPONSE, "InternalError"),
            (TRY_LATER_RESPONSE, "TryLater"),
            (UNAUTHORIZED_RESPONSE, "Unauthorized"),
        ] {
            let issuer = fake_issuer(vec![1, 2, 3]);
            match parse_response(&bytes, &issuer) {
                Err(OcspError::ResponderFailure(name)) => assert_eq!(name, status),
                other => panic!("expected ResponderFailure, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let issuer = fake_issuer(vec![1, 2, 3]);
        assert!(matches!(
            parse_response(&[0xff, 0x00, 0x12], &issuer),
            Err(OcspError::Der(_))
        ));
    }

    #[test]
    fn test_signed_response_round_trip() {
        let signer = crate::testutil::TestSigner::generate();
        let issuer = fake_issuer(signer.public_key_bits());
        let now = Utc::now();
        let der = signer.signed_response(
            &[0x05, 0x39],
            CertStatus::Good,
            now - chrono::Duration::hours(1),
            now + chrono::Duration::hours(1),
        );

        let parsed = parse_response(&der, &issuer).expect("parse signed response");
        assert_eq!(parsed.status, CertStatus::Good);
        assert_eq!(parsed.serial, vec![0x05, 0x39]);
        assert!(parsed.next_update > parsed.this_update);
    }

    #[test]
    fn test_wrong_key_fails_verification() {
        let signer = crate::testutil::TestSigner::generate();
        let other = crate::testutil::TestSigner::generate();
        let issuer = fake_issuer(other.public_key_bits());
        let now = Utc::now();
        let der = signer.signed_response(
            &[0x01],
            CertStatus::Good,
            now - chrono::Duration::hours(1),
            now + chrono::Duration::hours(1),
        );

        assert!(matches!(
            parse_response(&der, &issuer),
            Err(OcspError::InvalidSignature)
        ));
    }

    #[test]
    fn test_revoked_status_carries_time_and_reason() {
        let signer = crate::testutil::TestSigner::generate();
        let issuer = fake_issuer(signer.public_key_bits());
        let now = Utc::now();
        let revoked_at = now - chrono::Duration::days(2);
        let der = signer.signed_response(
            &[0x02],
            CertStatus::Revoked {
                revoked_at,
                reason: Some(1),
            },
            now - chrono::Duration::hours(1),
            now + chrono::Duration::hours(1),
        );

        let parsed = parse_response(&der, &issuer).expect("parse revoked response");
        match parsed.status {
            CertStatus::Revoked { revoked_at: t, reason } => {
                assert_eq!(t.timestamp(), revoked_at.timestamp());
                assert_eq!(reason, Some(1));
            }
            other => panic!("expected Revoked, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_next_update_rejected() {
        let signer = crate::testutil::TestSigner::generate();
        let issuer = fake_issuer(signer.public_key_bits());
        let now = Utc::now();
        let der = signer.signed_response_without_next_update(
            &[0x03],
            now - chrono::Duration::hours(1),
        );
        assert!(matches!(
            parse_response(&der, &issuer),
            Err(OcspError::MissingNextUpdate)
        ));
    }

    #[test]
    fn test_request_key_matches_response_identity() {
        // a response's CertID hashed with the issuer identity must line up
        // with a request built from the same identity
        let signer = crate::testutil::TestSigner::generate();
        let issuer = fake_issuer(signer.public_key_bits());
        let req = crate::request::OcspRequest::new(HashAlgorithm::Sha1, &issuer, &[0x05, 0x39]);
        let now = Utc::now();
        let der = signer.signed_response(
            &[0x05, 0x39],
            CertStatus::Good,
            now - chrono::Duration::hours(1),
            now + chrono::Duration::hours(1),
        );
        let parsed = parse_response(&der, &issuer).expect("parse");
        assert_eq!(parsed.serial, req.serial);
    }
}
