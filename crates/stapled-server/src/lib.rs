//! Caching OCSP stapling daemon
//!
//! `stapled` sits between TLS servers that staple OCSP responses and the
//! responders run by certificate issuers. It keeps a warm cache of
//! verified, unexpired responses, refreshes each one at a random instant
//! inside the final quarter of its validity window, writes responses
//! through to disk so restarts start warm, and serves the whole thing over
//! the RFC 6960 HTTP interface.
//!
//! The serving path never waits on upstream I/O: entries are fully
//! initialized before they are inserted, and a steady-state lookup is two
//! map reads and a clone under read locks.

pub mod cache;
pub mod clock;
pub mod config;
pub mod entry;
pub mod error;
pub mod fetcher;
pub mod issuers;
pub mod responder;
pub mod stable;
pub mod watcher;

pub use cache::{request_key, EntryCache};
pub use clock::{Clock, FakeClock, SystemClock};
pub use config::{CertDefinition, Config, ConfigError, SupportedHashes};
pub use entry::{Entry, EntryMetadata};
pub use error::CacheError;
pub use issuers::IssuerCache;
pub use responder::Responder;
pub use stable::{DiskCache, ExitFailer, Failer, RecordingFailer, StableCache};
pub use watcher::DirWatcher;
