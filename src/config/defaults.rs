//! Built-in configuration defaults (layer 1)

use std::path::PathBuf;

/// Config file looked up when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "salsag.toml";

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_BUCKET: &str = "salsag-staging";
pub const DEFAULT_TABLE: &str = "trust-ledger";
pub const DEFAULT_STORE_ROOT: &str = ".salsag";

pub const DEFAULT_OIDC_ISSUER: &str = "https://token.actions.githubusercontent.com";
pub const DEFAULT_IDENTITY_REGEXP: &str = "https://github.com/.+";
pub const DEFAULT_COSIGN_PATH: &str = "cosign";

pub const DEFAULT_REKOR_URL: &str = "https://rekor.sigstore.dev";

pub const DEFAULT_BUILDER_ID: &str = "https://github.com/salsag/cli";

pub const DEFAULT_LOCK_TIMEOUT_SECONDS: u64 = 10;
pub const DEFAULT_TRANSPARENCY_TIMEOUT_SECONDS: u64 = 10;
pub const DEFAULT_SIGNING_TIMEOUT_SECONDS: u64 = 30;

pub(super) fn region() -> String {
    DEFAULT_REGION.to_string()
}

pub(super) fn bucket() -> String {
    DEFAULT_BUCKET.to_string()
}

pub(super) fn table() -> String {
    DEFAULT_TABLE.to_string()
}

pub(super) fn store_root() -> PathBuf {
    PathBuf::from(DEFAULT_STORE_ROOT)
}

pub(super) fn oidc_issuer() -> String {
    DEFAULT_OIDC_ISSUER.to_string()
}

pub(super) fn identity_regexp() -> String {
    DEFAULT_IDENTITY_REGEXP.to_string()
}

pub(super) fn cosign_path() -> String {
    DEFAULT_COSIGN_PATH.to_string()
}

pub(super) fn rekor_url() -> String {
    DEFAULT_REKOR_URL.to_string()
}

pub(super) fn builder_id() -> String {
    DEFAULT_BUILDER_ID.to_string()
}

pub(super) fn lock_timeout_seconds() -> u64 {
    DEFAULT_LOCK_TIMEOUT_SECONDS
}

pub(super) fn transparency_timeout_seconds() -> u64 {
    DEFAULT_TRANSPARENCY_TIMEOUT_SECONDS
}

pub(super) fn signing_timeout_seconds() -> u64 {
    DEFAULT_SIGNING_TIMEOUT_SECONDS
}

pub(super) fn log_level() -> String {
    "info".to_string()
}

pub(super) fn enabled() -> bool {
    true
}
