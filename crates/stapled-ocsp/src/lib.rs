//! OCSP protocol primitives for the stapled daemon
//!
//! This crate carries everything protocol-shaped and nothing stateful:
//! certificate metadata extraction, OCSP request construction and parsing,
//! response decoding with signature verification, and the freshness checks
//! applied before a response may be cached or served. The daemon's caches,
//! fetch loops, and HTTP surface live in `stapled-server`.
//!
//! # Example
//!
//! ```rust,no_run
//! use stapled_ocsp::{Certificate, HashAlgorithm, OcspRequest};
//!
//! # fn main() -> Result<(), stapled_ocsp::OcspError> {
//! let issuer = Certificate::from_file("issuer.pem")?;
//! let request = OcspRequest::new(HashAlgorithm::Sha1, &issuer, &[0x05, 0x39]);
//! let der = request.to_der()?;
//! # let _ = der;
//! # Ok(())
//! # }
//! ```

pub mod cert;
pub mod error;
pub mod request;
pub mod response;
pub mod verify;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use cert::Certificate;
pub use error::OcspError;
pub use request::{hash_name_and_key, HashAlgorithm, OcspRequest};
pub use response::{
    parse_response, CertStatus, OcspResponse, INTERNAL_ERROR_RESPONSE,
    MALFORMED_REQUEST_RESPONSE, TRY_LATER_RESPONSE, UNAUTHORIZED_RESPONSE,
};
pub use verify::verify_response;
