//! Layer loading and merging
//!
//! Merge rules:
//! - tables deep-merge by key
//! - arrays and scalars: the later layer wins

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::{Config, ConfigError, DEFAULT_CONFIG_FILE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    File,
    Cli,
}

/// One contributing layer.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// SHA-256 of the raw file bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Validated configuration plus the layers it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub sources: Vec<ConfigSource>,
}

impl LoadedConfig {
    /// Load and validate.
    ///
    /// An explicit `path` must exist. Without one, `salsag.toml` in the
    /// working directory is used when present and defaults otherwise.
    pub fn load(path: Option<&Path>, cli_overrides: Option<Value>) -> Result<Self, ConfigError> {
        let builtin = serde_json::to_value(Config::default()).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let mut layers = vec![builtin];
        let mut sources = vec![ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        }];

        let file = match path {
            Some(p) => Some(p.to_path_buf()),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                default.is_file().then_some(default)
            }
        };
        if let Some(file) = file {
            let (value, digest) = load_toml_file(&file)?;
            layers.push(value);
            sources.push(ConfigSource {
                origin: ConfigOrigin::File,
                path: Some(file),
                digest: Some(digest),
            });
        }

        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let merged = layers.into_iter().fold(Value::Null, deep_merge);
        let config: Config =
            serde_json::from_value(merged).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;

        Ok(Self { config, sources })
    }

    /// Digest of the file layer, if one was loaded.
    pub fn file_digest(&self) -> Option<&str> {
        self.sources
            .iter()
            .find(|s| s.origin == ConfigOrigin::File)
            .and_then(|s| s.digest.as_deref())
    }
}

fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
    let bytes = fs::read(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let digest = hex::encode(Sha256::digest(&bytes));

    let text = String::from_utf8(bytes)
        .map_err(|e| ConfigError::Parse(format!("{}: invalid UTF-8: {}", path.display(), e)))?;
    let table: toml::Table =
        toml::from_str(&text).map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))?;
    let mut value = serde_json::to_value(table).map_err(|e| ConfigError::Parse(e.to_string()))?;
    normalize_aliases(&mut value);

    Ok((value, digest))
}

/// Rename legacy keys so they merge onto the builtin layer instead of
/// colliding with it.
fn normalize_aliases(value: &mut Value) {
    const ALIASES: &[(&str, &str)] = &[("staging_bucket", "bucket"), ("ledger_table", "table")];

    if let Some(storage) = value.get_mut("storage").and_then(Value::as_object_mut) {
        for (legacy, current) in ALIASES {
            if let Some(v) = storage.remove(*legacy) {
                storage.entry(*current).or_insert(v);
            }
        }
    }
}

pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Object(base)
        }
        (_, overlay) => overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_deep_merge_tables_and_scalars() {
        let merged = deep_merge(
            json!({"storage": {"bucket": "a", "table": "t1"}, "list": [1, 2]}),
            json!({"storage": {"bucket": "b"}, "list": [3]}),
        );
        assert_eq!(merged["storage"]["bucket"], "b");
        assert_eq!(merged["storage"]["table"], "t1");
        assert_eq!(merged["list"], json!([3]));
    }

    #[test]
    fn test_file_layer_overrides_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[storage]\nbucket = \"from-file\"\n[transparency]\nenabled = false").unwrap();

        let loaded = LoadedConfig::load(Some(file.path()), None).unwrap();
        assert_eq!(loaded.config.storage.bucket, "from-file");
        assert_eq!(loaded.config.storage.table, "trust-ledger");
        assert!(!loaded.config.transparency.enabled);
        assert_eq!(loaded.sources.len(), 2);
        assert_eq!(loaded.file_digest().unwrap().len(), 64);
    }

    #[test]
    fn test_cli_layer_wins() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[storage]\nbucket = \"from-file\"").unwrap();

        let cli = json!({"storage": {"bucket": "from-cli"}});
        let loaded = LoadedConfig::load(Some(file.path()), Some(cli)).unwrap();
        assert_eq!(loaded.config.storage.bucket, "from-cli");
        assert_eq!(loaded.sources.last().unwrap().origin, ConfigOrigin::Cli);
    }

    #[test]
    fn test_legacy_keys_merge_over_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[storage]\nstaging_bucket = \"legacy-bucket\"").unwrap();
        let loaded = LoadedConfig::load(Some(file.path()), None).unwrap();
        assert_eq!(loaded.config.storage.bucket, "legacy-bucket");
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let err = LoadedConfig::load(Some(Path::new("/nonexistent/salsag.toml")), None).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[storage]\nbukket = \"typo\"").unwrap();
        let err = LoadedConfig::load(Some(file.path()), None).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_invalid_bucket_rejected_at_load() {
        let cli = json!({"storage": {"bucket": "Bad_Bucket"}});
        let err = LoadedConfig::load(Some(Path::new("/dev/null")), Some(cli)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "storage.bucket", .. }));
    }
}
