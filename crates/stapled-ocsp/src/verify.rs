//! Response freshness and identity checks
//!
//! Signature verification happens when a response is parsed; this check is
//! the last gate before a response is cached or served.

use chrono::{DateTime, Utc};

use crate::error::OcspError;
use crate::response::OcspResponse;

/// Reject a parsed response that is future-dated, expired, internally
/// inconsistent, or issued for a different serial.
pub fn verify_response(
    now: DateTime<Utc>,
    serial: &[u8],
    resp: &OcspResponse,
) -> Result<(), OcspError> {
    if resp.this_update > now {
        return Err(OcspError::NotYetValid {
            this_update: resp.this_update,
            now,
        });
    }
    if resp.next_update < now {
        return Err(OcspError::Stale {
            next_update: resp.next_update,
            now,
        });
    }
    if resp.this_update > resp.next_update {
        return Err(OcspError::InvertedValidity {
            this_update: resp.this_update,
            next_update: resp.next_update,
        });
    }
    if resp.serial != serial {
        return Err(OcspError::SerialMismatch {
            wanted: hex::encode(serial),
            got: hex::encode(&resp.serial),
        });
    }
    Ok(())
}
