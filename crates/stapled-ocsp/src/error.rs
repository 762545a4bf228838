//! Protocol-level error types

use chrono::{DateTime, Utc};

/// Errors raised while parsing certificates, building OCSP requests, or
/// decoding and verifying OCSP responses.
#[derive(Debug, thiserror::Error)]
pub enum OcspError {
    /// IO error while reading a certificate or response file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// DER encoding or decoding failed
    #[error("DER error: {0}")]
    Der(#[from] der::Error),

    /// Certificate could not be parsed
    #[error("certificate parse error: {0}")]
    InvalidCertificate(String),

    /// PEM block had an unexpected label
    #[error("invalid PEM type '{0}'")]
    InvalidPemType(String),

    /// The responder answered with a non-successful OCSP status
    #[error("OCSP responder returned {0}")]
    ResponderFailure(&'static str),

    /// Successful response carried no responseBytes
    #[error("OCSP response is missing responseBytes")]
    MissingResponseBytes,

    /// responseBytes carried something other than a basic OCSP response
    #[error("unsupported OCSP response type {0}")]
    UnsupportedResponseType(String),

    /// BasicOCSPResponse must contain exactly one SingleResponse
    #[error("OCSP response contains bad number of responses ({0})")]
    ResponseCount(usize),

    /// Response lacked a nextUpdate; the cache cannot schedule refreshes
    /// without one
    #[error("OCSP response is missing nextUpdate")]
    MissingNextUpdate,

    /// Timestamp outside the representable range
    #[error("OCSP response contains an unrepresentable timestamp")]
    InvalidTimestamp,

    /// Signature did not verify against the issuer or responder key
    #[error("OCSP response signature verification failed")]
    InvalidSignature,

    /// No verification routine for the response's signature algorithm
    #[error("unsupported signature algorithm {0}")]
    UnsupportedSignatureAlgorithm(String),

    /// thisUpdate is in the future
    #[error("malformed OCSP response: ThisUpdate is in the future ({this_update} after {now})")]
    NotYetValid {
        this_update: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    /// nextUpdate has passed
    #[error("stale OCSP response: NextUpdate is in the past ({next_update} before {now})")]
    Stale {
        next_update: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    /// nextUpdate precedes thisUpdate
    #[error("malformed OCSP response: NextUpdate is before ThisUpdate ({next_update} before {this_update})")]
    InvertedValidity {
        this_update: DateTime<Utc>,
        next_update: DateTime<Utc>,
    },

    /// Response is for a different certificate
    #[error("malformed OCSP response: serial numbers don't match (wanted {wanted}, got {got})")]
    SerialMismatch { wanted: String, got: String },

    /// Wire OCSP request could not be decoded
    #[error("malformed OCSP request: {0}")]
    MalformedRequest(String),
}
