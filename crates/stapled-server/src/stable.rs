//! Stable (disk) write-through backing
//!
//! The disk layer is an optimization, never a correctness layer: reads and
//! writes are best-effort and their failures stay inside this module. Real
//! IO faults are routed through the injected [`Failer`] so they cannot pass
//! silently; a response that merely went stale while the daemon was down is
//! skipped quietly so initialization falls through to a fresh fetch.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use stapled_ocsp::{parse_response, verify_response, Certificate, OcspResponse};
use tracing::{error, info, warn};

use crate::clock::Clock;

/// Sink for disk faults that must not pass silently.
pub trait Failer: Send + Sync {
    fn fail(&self, msg: &str);
}

/// Default sink: log and stop the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExitFailer;

impl Failer for ExitFailer {
    fn fail(&self, msg: &str) {
        error!("{}", msg);
        eprintln!("{}", msg);
        std::process::exit(1);
    }
}

/// Test sink that records instead of exiting.
#[derive(Debug, Default)]
pub struct RecordingFailer {
    messages: Mutex<Vec<String>>,
}

impl RecordingFailer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl Failer for RecordingFailer {
    fn fail(&self, msg: &str) {
        error!("{}", msg);
        self.messages.lock().unwrap().push(msg.to_string());
    }
}

/// A durable backing for raw response bytes.
pub trait StableCache: Send + Sync {
    /// Fetch, re-parse, and re-verify a stored response. `None` when absent
    /// or unusable.
    fn read(&self, name: &str, serial: &[u8], issuer: &Certificate)
        -> Option<(OcspResponse, Vec<u8>)>;

    /// Persist raw response bytes under `name`.
    fn write(&self, name: &str, content: &[u8]);
}

/// One `<name>.resp` file per entry in a flat folder.
pub struct DiskCache {
    path: PathBuf,
    clock: Arc<dyn Clock>,
    failer: Arc<dyn Failer>,
}

impl DiskCache {
    pub fn new(path: PathBuf, clock: Arc<dyn Clock>) -> Self {
        Self::with_failer(path, clock, Arc::new(ExitFailer))
    }

    pub fn with_failer(path: PathBuf, clock: Arc<dyn Clock>, failer: Arc<dyn Failer>) -> Self {
        DiskCache {
            path,
            clock,
            failer,
        }
    }

    fn response_path(&self, name: &str) -> PathBuf {
        self.path.join(format!("{}.resp", name))
    }
}

impl StableCache for DiskCache {
    fn read(
        &self,
        name: &str,
        serial: &[u8],
        issuer: &Certificate,
    ) -> Option<(OcspResponse, Vec<u8>)> {
        let path = self.response_path(name);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                self.failer.fail(&format!(
                    "[disk-cache] Failed to read response from '{}': {}",
                    path.display(),
                    e
                ));
                return None;
            }
        };
        let parsed = match parse_response(&bytes, issuer) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.failer.fail(&format!(
                    "[disk-cache] Failed to parse response from '{}': {}",
                    path.display(),
                    e
                ));
                return None;
            }
        };
        if let Err(e) = verify_response(self.clock.now(), serial, &parsed) {
            // expired on disk while we were down; fall through to a fetch
            warn!(
                "[disk-cache] Ignoring unusable response from '{}': {}",
                path.display(),
                e
            );
            return None;
        }
        info!("[disk-cache] Loaded valid response from '{}'", path.display());
        Some((parsed, bytes))
    }

    fn write(&self, name: &str, content: &[u8]) {
        let path = self.response_path(name);
        let tmp = self.path.join(format!("{}.resp.tmp", name));
        if let Err(e) = std::fs::write(&tmp, content) {
            self.failer.fail(&format!(
                "[disk-cache] Failed to write response to '{}': {}",
                tmp.display(),
                e
            ));
            return;
        }
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            self.failer.fail(&format!(
                "[disk-cache] Failed to rename '{}' to '{}': {}",
                tmp.display(),
                path.display(),
                e
            ));
            return;
        }
        info!("[disk-cache] Written new response to '{}'", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use chrono::{Duration, Utc};
    use stapled_ocsp::testutil::TestSigner;
    use stapled_ocsp::CertStatus;

    fn disk(dir: &std::path::Path) -> (DiskCache, Arc<RecordingFailer>, Arc<FakeClock>) {
        let clock = Arc::new(FakeClock::new(Utc::now()));
        let failer = RecordingFailer::new();
        let cache = DiskCache::with_failer(dir.to_path_buf(), clock.clone(), failer.clone());
        (cache, failer, clock)
    }

    #[test]
    fn test_read_missing_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, failer, clock) = disk(dir.path());
        let signer = TestSigner::generate();
        let issuer = signer.issuer_certificate(b"issuer");
        let _ = clock;
        assert!(cache.read("absent", &[0x01], &issuer).is_none());
        assert!(failer.messages().is_empty());
    }

    #[test]
    fn test_write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, failer, clock) = disk(dir.path());
        let signer = TestSigner::generate();
        let issuer = signer.issuer_certificate(b"issuer");
        let now = clock.now();
        let bytes = signer.signed_response(
            &[0x05, 0x39],
            CertStatus::Good,
            now - Duration::hours(1),
            now + Duration::hours(1),
        );

        cache.write("serial1337", &bytes);
        assert!(!dir.path().join("serial1337.resp.tmp").exists());
        assert!(dir.path().join("serial1337.resp").exists());

        let (parsed, raw) = cache
            .read("serial1337", &[0x05, 0x39], &issuer)
            .expect("stored response should read back");
        assert_eq!(raw, bytes);
        assert_eq!(parsed.serial, vec![0x05, 0x39]);
        assert!(failer.messages().is_empty());
    }

    #[test]
    fn test_expired_response_skipped_without_failing() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, failer, clock) = disk(dir.path());
        let signer = TestSigner::generate();
        let issuer = signer.issuer_certificate(b"issuer");
        let now = clock.now();
        let bytes = signer.signed_response(
            &[0x01],
            CertStatus::Good,
            now - Duration::hours(3),
            now + Duration::hours(1),
        );
        cache.write("expired", &bytes);

        clock.advance(Duration::hours(2));
        assert!(cache.read("expired", &[0x01], &issuer).is_none());
        assert!(failer.messages().is_empty());
    }

    #[test]
    fn test_corrupt_file_reports_through_failer() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, failer, _clock) = disk(dir.path());
        let signer = TestSigner::generate();
        let issuer = signer.issuer_certificate(b"issuer");
        std::fs::write(dir.path().join("junk.resp"), b"not ocsp").unwrap();

        assert!(cache.read("junk", &[0x01], &issuer).is_none());
        let messages = failer.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("Failed to parse response"));
    }

    #[test]
    fn test_write_failure_reports_through_failer() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let clock = Arc::new(FakeClock::new(Utc::now()));
        let failer = RecordingFailer::new();
        let cache = DiskCache::with_failer(missing, clock, failer.clone());

        cache.write("x", b"bytes");
        let messages = failer.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("Failed to write response"));
    }

    #[test]
    fn test_serial_mismatch_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, failer, clock) = disk(dir.path());
        let signer = TestSigner::generate();
        let issuer = signer.issuer_certificate(b"issuer");
        let now = clock.now();
        let bytes = signer.signed_response(
            &[0x01],
            CertStatus::Good,
            now - Duration::hours(1),
            now + Duration::hours(1),
        );
        cache.write("other", &bytes);

        assert!(cache.read("other", &[0x02], &issuer).is_none());
        assert!(failer.messages().is_empty());
    }
}
