//! YAML configuration loading and validation

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use stapled_ocsp::HashAlgorithm;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Daemon configuration.
///
/// All keys are kebab-case; durations use humantime strings such as `"10s"`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub syslog: SyslogConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub disk: DiskConfig,

    #[serde(default)]
    pub supported_hashes: SupportedHashes,

    #[serde(default)]
    pub fetcher: FetcherConfig,

    #[serde(default)]
    pub definitions: Definitions,

    /// Serve responses whose nextUpdate has passed instead of refusing.
    /// Off by default: a stale staple can invalidate a TLS handshake, which
    /// is a worse failure mode than not answering.
    #[serde(default)]
    pub dont_die_on_stale_response: bool,
}

/// Syslog transport settings. The transport itself is handled outside this
/// daemon; `stdout-level` also drives the tracing filter.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SyslogConfig {
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub addr: String,
    /// Syslog-style level 0-7; 0 is treated as 7 (debug)
    #[serde(default)]
    pub stdout_level: u8,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct HttpConfig {
    #[serde(default = "default_http_addr")]
    pub addr: String,
}

fn default_http_addr() -> String {
    "0.0.0.0:10302".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            addr: default_http_addr(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DiskConfig {
    /// Folder for the on-disk response cache; no folder, no disk cache
    #[serde(default)]
    pub cache_folder: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FetcherConfig {
    /// Upstream request timeout (default 10s)
    #[serde(default)]
    pub timeout: Option<ConfigDuration>,
    /// Outbound proxies, one picked at random per request
    #[serde(default)]
    pub proxies: Vec<String>,
    /// Global responder override for all entries
    #[serde(default)]
    pub upstream_responders: Vec<String>,
}

impl FetcherConfig {
    pub fn timeout_or_default(&self) -> Duration {
        self.timeout
            .as_ref()
            .map(|d| d.0)
            .unwrap_or(Duration::from_secs(10))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Definitions {
    /// Folder polled for added and removed certificate files
    #[serde(default)]
    pub cert_watch_folder: Option<PathBuf>,
    /// Folder of issuer certificates preloaded into the issuer cache
    #[serde(default)]
    pub issuer_folder: Option<PathBuf>,
    #[serde(default)]
    pub certificates: Vec<CertDefinition>,
}

/// One monitored certificate: either a certificate file or a name plus a
/// hex serial.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CertDefinition {
    #[serde(default)]
    pub certificate: Option<PathBuf>,
    #[serde(default)]
    pub name: Option<String>,
    /// Hex-encoded serial number
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default)]
    pub issuer: Option<PathBuf>,
    #[serde(default)]
    pub responders: Vec<String>,
    /// Keep this definition's responders even when a global upstream is set
    #[serde(default)]
    pub override_global_upstream: bool,
}

impl CertDefinition {
    /// Decode the configured hex serial.
    pub fn serial_bytes(&self) -> Result<Vec<u8>, ConfigError> {
        let serial = self
            .serial
            .as_deref()
            .ok_or_else(|| ConfigError::Invalid("definition has no serial".to_string()))?;
        hex::decode(serial)
            .map_err(|e| ConfigError::Invalid(format!("invalid serial '{}': {}", serial, e)))
    }
}

/// Which CertID hash algorithms the cache indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedHashes(pub Vec<HashAlgorithm>);

impl Default for SupportedHashes {
    fn default() -> Self {
        SupportedHashes(HashAlgorithm::ALL.to_vec())
    }
}

impl<'de> Deserialize<'de> for SupportedHashes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct Raw {
            #[serde(default)]
            sha1: bool,
            #[serde(default)]
            sha256: bool,
            #[serde(default)]
            sha384: bool,
            #[serde(default)]
            sha512: bool,
        }
        let raw = Raw::deserialize(deserializer)?;
        let mut hashes = Vec::new();
        if raw.sha1 {
            hashes.push(HashAlgorithm::Sha1);
        }
        if raw.sha256 {
            hashes.push(HashAlgorithm::Sha256);
        }
        if raw.sha384 {
            hashes.push(HashAlgorithm::Sha384);
        }
        if raw.sha512 {
            hashes.push(HashAlgorithm::Sha512);
        }
        if hashes.is_empty() {
            return Err(D::Error::custom(
                "at least one supported hash must be configured",
            ));
        }
        Ok(SupportedHashes(hashes))
    }
}

/// A `std::time::Duration` parsed from a humantime string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigDuration(pub Duration);

impl<'de> Deserialize<'de> for ConfigDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw)
            .map(ConfigDuration)
            .map_err(D::Error::custom)
    }
}

impl Config {
    /// Load and validate a configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Listen address for the HTTP responder.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.http.addr.parse().map_err(|_| {
            ConfigError::Invalid(format!("invalid HTTP listen address: {}", self.http.addr))
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;

        if self.syslog.stdout_level > 7 {
            return Err(ConfigError::Invalid(format!(
                "stdout-level must be 0-7, got {}",
                self.syslog.stdout_level
            )));
        }

        if !self.supported_hashes.0.contains(&HashAlgorithm::Sha1) {
            return Err(ConfigError::Invalid(
                "supported-hashes must include sha1".to_string(),
            ));
        }

        for (i, def) in self.definitions.certificates.iter().enumerate() {
            let has_cert = def.certificate.is_some();
            let has_pair = def.name.is_some() && def.serial.is_some();
            if !has_cert && !has_pair {
                return Err(ConfigError::Invalid(format!(
                    "certificate definition {} needs either 'certificate' or 'name' and 'serial'",
                    i
                )));
            }
            if has_cert && has_pair {
                return Err(ConfigError::Invalid(format!(
                    "certificate definition {} sets both 'certificate' and 'name'/'serial'",
                    i
                )));
            }
            if has_pair {
                def.serial_bytes()?;
                if def.issuer.is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "certificate definition {} uses name/serial and must name an issuer",
                        i
                    )));
                }
            }
        }

        Ok(())
    }

    /// Effective stdout level: syslog semantics, 0 promoted to debug.
    pub fn effective_stdout_level(&self) -> u8 {
        match self.syslog.stdout_level {
            0 => 7,
            l => l,
        }
    }

    /// Map the syslog-style stdout level onto a tracing filter directive.
    pub fn tracing_filter(&self) -> &'static str {
        match self.effective_stdout_level() {
            7 => "debug",
            6 | 5 => "info",
            4 => "warn",
            _ => "error",
        }
    }
}
