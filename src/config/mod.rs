//! Configuration
//!
//! Three layers, merged in order:
//! 1. Built-in defaults
//! 2. TOML file (`salsag.toml` or `--config`)
//! 3. CLI flags
//!
//! The merged value is deserialized into [`Config`] and validated before
//! any store, signer or network call is made.

pub mod defaults;
mod layers;

pub use defaults::DEFAULT_CONFIG_FILE;
pub use layers::{deep_merge, ConfigOrigin, ConfigSource, LoadedConfig};

use std::path::PathBuf;

use regex_lite::Regex;
use salsag_ledger::TrustError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::timeout::TimeoutConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {message}")]
    Io { path: String, message: String },

    #[error("config parse error: {0}")]
    Parse(String),

    #[error("invalid config: {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            message: message.into(),
        }
    }
}

impl From<ConfigError> for TrustError {
    fn from(err: ConfigError) -> Self {
        TrustError::config(err.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub storage: StorageConfig,
    pub signing: SigningConfig,
    pub transparency: TransparencyConfig,
    pub artifacts: ArtifactsConfig,
    pub logging: LoggingConfig,
    pub verification: VerificationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    #[serde(default = "defaults::region")]
    pub region: String,

    /// Object store bucket for artifacts and signing evidence.
    #[serde(default = "defaults::bucket", alias = "staging_bucket")]
    pub bucket: String,

    /// Ledger table name.
    #[serde(default = "defaults::table", alias = "ledger_table")]
    pub table: String,

    /// Local directory backing both stores.
    #[serde(default = "defaults::store_root")]
    pub root: PathBuf,

    #[serde(default = "defaults::lock_timeout_seconds")]
    pub lock_timeout_seconds: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            region: defaults::region(),
            bucket: defaults::bucket(),
            table: defaults::table(),
            root: defaults::store_root(),
            lock_timeout_seconds: defaults::lock_timeout_seconds(),
        }
    }
}

impl StorageConfig {
    /// Directory holding the ledger table.
    pub fn ledger_dir(&self) -> PathBuf {
        self.root.join("ledger").join(&self.table)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignerBackend {
    /// `cosign sign-blob` keyless signing.
    #[default]
    Cosign,
    /// In-process Ed25519 key generated per run; for local use only.
    Ephemeral,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SigningConfig {
    #[serde(default)]
    pub backend: SignerBackend,

    #[serde(default = "defaults::cosign_path")]
    pub cosign_path: String,

    /// Passed to cosign as `--oidc-issuer` when signing and as
    /// `--certificate-oidc-issuer` when checking stored signatures.
    #[serde(default = "defaults::oidc_issuer")]
    pub oidc_issuer: String,

    /// Signer identities must fully match this pattern.
    #[serde(default = "defaults::identity_regexp")]
    pub identity_regexp: String,

    /// Fixed signer identity. Taken from the CI environment when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,

    #[serde(default = "defaults::signing_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            backend: SignerBackend::default(),
            cosign_path: defaults::cosign_path(),
            oidc_issuer: defaults::oidc_issuer(),
            identity_regexp: defaults::identity_regexp(),
            identity: None,
            timeout_seconds: defaults::signing_timeout_seconds(),
        }
    }
}

impl SigningConfig {
    /// Compiled identity pattern, anchored for full-match semantics.
    pub fn identity_pattern(&self) -> Result<Regex, ConfigError> {
        Regex::new(&format!("^(?:{})$", self.identity_regexp))
            .map_err(|e| ConfigError::invalid("signing.identity_regexp", e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransparencyConfig {
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,

    #[serde(default = "defaults::rekor_url")]
    pub url: String,

    #[serde(default = "defaults::transparency_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for TransparencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: defaults::rekor_url(),
            timeout_seconds: defaults::transparency_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactsConfig {
    #[serde(default = "defaults::enabled")]
    pub include_sbom: bool,

    #[serde(default = "defaults::enabled")]
    pub include_provenance: bool,

    /// Reject packages larger than this. Unset means no limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bytes: Option<u64>,

    #[serde(default = "defaults::builder_id")]
    pub builder_id: String,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            include_sbom: true,
            include_provenance: true,
            max_bytes: None,
            builder_id: defaults::builder_id(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Filter directive; `SALSAG_LOG` takes precedence.
    #[serde(default = "defaults::log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerificationConfig {
    /// Record each verdict as a status observation and audit event.
    #[serde(default = "defaults::enabled")]
    pub record_observations: bool,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            record_observations: true,
        }
    }
}

impl Config {
    pub fn timeouts(&self) -> TimeoutConfig {
        TimeoutConfig {
            lock_seconds: self.storage.lock_timeout_seconds,
            transparency_seconds: self.transparency.timeout_seconds,
            signing_seconds: self.signing.timeout_seconds,
        }
    }

    /// Format checks only; nothing here touches the network.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.region.trim().is_empty() {
            return Err(ConfigError::invalid("storage.region", "must not be empty"));
        }
        validate_bucket_name(&self.storage.bucket)?;
        validate_table_name(&self.storage.table)?;

        if !self.signing.oidc_issuer.starts_with("https://") {
            return Err(ConfigError::invalid(
                "signing.oidc_issuer",
                format!("{:?} is not an https URL", self.signing.oidc_issuer),
            ));
        }
        let pattern = self.signing.identity_pattern()?;
        if let Some(identity) = &self.signing.identity {
            if !pattern.is_match(identity) {
                return Err(ConfigError::invalid(
                    "signing.identity",
                    format!("{:?} does not match identity_regexp", identity),
                ));
            }
        }
        if self.signing.backend == SignerBackend::Cosign && self.signing.cosign_path.trim().is_empty() {
            return Err(ConfigError::invalid("signing.cosign_path", "must not be empty"));
        }

        if self.transparency.enabled
            && !(self.transparency.url.starts_with("https://") || self.transparency.url.starts_with("http://"))
        {
            return Err(ConfigError::invalid(
                "transparency.url",
                format!("{:?} is not an http(s) URL", self.transparency.url),
            ));
        }

        if self.artifacts.max_bytes == Some(0) {
            return Err(ConfigError::invalid("artifacts.max_bytes", "must be positive when set"));
        }

        self.timeouts()
            .validate()
            .map_err(|e| ConfigError::invalid("timeouts", e.to_string()))
    }

    /// Default config rendered as TOML, used by `salsag init`.
    pub fn template() -> Result<String, ConfigError> {
        toml::to_string_pretty(&Config::default()).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

/// Bucket names: 3-63 characters of `[a-z0-9.-]`, starting and ending
/// alphanumeric.
pub fn validate_bucket_name(name: &str) -> Result<(), ConfigError> {
    let ok_len = (3..=63).contains(&name.len());
    let ok_chars = name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'.' || b == b'-');
    let ok_ends = name
        .bytes()
        .next()
        .zip(name.bytes().last())
        .map_or(false, |(first, last)| first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric());

    if ok_len && ok_chars && ok_ends {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            "storage.bucket",
            format!("{:?} must be 3-63 chars of [a-z0-9.-], alphanumeric at both ends", name),
        ))
    }
}

/// Table names: 3-255 characters of `[A-Za-z0-9_.-]`.
pub fn validate_table_name(name: &str) -> Result<(), ConfigError> {
    let ok_len = (3..=255).contains(&name.len());
    let ok_chars = name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.' || b == b'-');
    if ok_len && ok_chars {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            "storage.table",
            format!("{:?} must be 3-255 chars of [A-Za-z0-9_.-]", name),
        ))
    }
}
