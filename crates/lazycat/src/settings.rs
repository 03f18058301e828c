//! Runtime settings
//!
//! Settings are layered: built-in defaults, then an optional TOML file,
//! then `LAZYCAT_*` environment variables.
//!
//! ```toml
//! cache_capacity_bytes = "2GB"
//! chunk_rows = 50000
//! parallel = true
//! max_threads = 8
//! log_level = "info"
//! ```

use crate::{Error, Result};
use lazycat_cache::{DEFAULT_CAPACITY_BYTES, parse_byte_size};
use lazycat_catalog::DEFAULT_CHUNK_ROWS;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use tracing::debug;

/// Cache budget in bytes
pub const ENV_CACHE_BYTES: &str = "LAZYCAT_CACHE_BYTES";
/// Rows per catalog chunk
pub const ENV_CHUNK_ROWS: &str = "LAZYCAT_CHUNK_ROWS";
/// Parallel evaluation on or off
pub const ENV_PARALLEL: &str = "LAZYCAT_PARALLEL";
/// Worker thread limit
pub const ENV_THREADS: &str = "LAZYCAT_THREADS";
/// Log level or filter directive
pub const ENV_LOG: &str = "LAZYCAT_LOG";

/// Engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Result cache budget; accepts a number of bytes or a size such as `"512MB"`
    #[serde(deserialize_with = "byte_size")]
    pub cache_capacity_bytes: usize,
    /// Rows per chunk for catalog views
    pub chunk_rows: usize,
    /// Run independent chunk tasks concurrently
    pub parallel: bool,
    /// Dedicated worker pool size; the global rayon pool when unset
    pub max_threads: Option<usize>,
    /// Default log level or `EnvFilter` directive
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_capacity_bytes: DEFAULT_CAPACITY_BYTES,
            chunk_rows: DEFAULT_CHUNK_ROWS,
            parallel: true,
            max_threads: None,
            log_level: "warn".to_string(),
        }
    }
}

fn byte_size<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<usize, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bytes(usize),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Bytes(bytes) => Ok(bytes),
        Raw::Text(text) => parse_byte_size(&text).map_err(serde::de::Error::custom),
    }
}

impl Settings {
    /// Parse settings from TOML, filling omitted keys with defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for malformed TOML, unknown keys or
    /// invalid values.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let settings: Self =
            toml::from_str(input).map_err(|e| Error::config(format!("invalid settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read settings from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigIo`] if the file cannot be read, otherwise see
    /// [`Settings::from_toml_str`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| Error::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loading settings file");
        Self::from_toml_str(&text)
    }

    /// Defaults, then `path` if given, then the environment.
    ///
    /// # Errors
    ///
    /// See [`Settings::from_file`] and [`Settings::with_env_overrides`].
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        base.with_env_overrides()
    }

    /// Apply any `LAZYCAT_*` environment variables that are set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a variable does not parse, or
    /// [`Error::Cache`] for a malformed byte size.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(value) = env(ENV_CACHE_BYTES) {
            self.cache_capacity_bytes = parse_byte_size(&value)?;
        }
        if let Some(value) = env(ENV_CHUNK_ROWS) {
            self.chunk_rows = value
                .trim()
                .parse()
                .map_err(|e| Error::config(format!("{ENV_CHUNK_ROWS}={value}: {e}")))?;
        }
        if let Some(value) = env(ENV_PARALLEL) {
            self.parallel = parse_flag(&value)
                .ok_or_else(|| Error::config(format!("{ENV_PARALLEL}={value}: expected a boolean")))?;
        }
        if let Some(value) = env(ENV_THREADS) {
            let threads: usize = value
                .trim()
                .parse()
                .map_err(|e| Error::config(format!("{ENV_THREADS}={value}: {e}")))?;
            self.max_threads = Some(threads);
        }
        if let Some(value) = env(ENV_LOG) {
            self.log_level = value;
        }
        self.validate()?;
        Ok(self)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero chunk size or thread count.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_rows == 0 {
            return Err(Error::config("chunk_rows must be at least 1"));
        }
        if self.max_threads == Some(0) {
            return Err(Error::config("max_threads must be at least 1"));
        }
        Ok(())
    }
}

fn env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_VARS: [&str; 5] = [ENV_CACHE_BYTES, ENV_CHUNK_ROWS, ENV_PARALLEL, ENV_THREADS, ENV_LOG];

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.cache_capacity_bytes, 1_000_000_000);
        assert_eq!(settings.chunk_rows, 100_000);
        assert!(settings.parallel);
        assert_eq!(settings.max_threads, None);
    }

    #[test]
    fn test_toml_partial_and_sizes() {
        let settings = Settings::from_toml_str(
            r#"
            cache_capacity_bytes = "256MiB"
            chunk_rows = 4096
            "#,
        )
        .unwrap();
        assert_eq!(settings.cache_capacity_bytes, 256 * 1024 * 1024);
        assert_eq!(settings.chunk_rows, 4096);
        assert!(settings.parallel);

        let numeric = Settings::from_toml_str("cache_capacity_bytes = 1234").unwrap();
        assert_eq!(numeric.cache_capacity_bytes, 1234);
    }

    #[test]
    fn test_toml_rejects_bad_values() {
        assert!(Settings::from_toml_str("chunk_rows = 0").is_err());
        assert!(Settings::from_toml_str("cache_capacity_bytes = \"lots\"").is_err());
        assert!(Settings::from_toml_str("colour = \"blue\"").is_err());
    }

    #[test]
    fn test_env_overrides() {
        temp_env::with_vars(
            [
                (ENV_CACHE_BYTES, Some("2GB")),
                (ENV_CHUNK_ROWS, Some("500")),
                (ENV_PARALLEL, Some("off")),
                (ENV_THREADS, Some("3")),
                (ENV_LOG, Some("lazycat_array=trace")),
            ],
            || {
                let settings = Settings::default().with_env_overrides().unwrap();
                assert_eq!(settings.cache_capacity_bytes, 2_000_000_000);
                assert_eq!(settings.chunk_rows, 500);
                assert!(!settings.parallel);
                assert_eq!(settings.max_threads, Some(3));
                assert_eq!(settings.log_level, "lazycat_array=trace");
            },
        );
    }

    #[test]
    fn test_env_errors() {
        temp_env::with_vars([(ENV_PARALLEL, Some("maybe"))], || {
            assert!(Settings::default().with_env_overrides().is_err());
        });
        temp_env::with_vars([(ENV_THREADS, Some("0"))], || {
            assert!(Settings::default().with_env_overrides().is_err());
        });
        temp_env::with_vars([(ENV_CACHE_BYTES, Some("-5"))], || {
            assert!(matches!(
                Settings::default().with_env_overrides(),
                Err(Error::Cache(_))
            ));
        });
    }

    #[test]
    fn test_load_layers_file_then_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lazycat.toml");
        std::fs::write(&path, "chunk_rows = 64\nparallel = false\n").unwrap();

        temp_env::with_vars_unset(ALL_VARS, || {
            let settings = Settings::load(Some(path.as_path())).unwrap();
            assert_eq!(settings.chunk_rows, 64);
            assert!(!settings.parallel);
        });
        temp_env::with_vars([(ENV_CHUNK_ROWS, Some("128"))], || {
            assert_eq!(Settings::load(Some(path.as_path())).unwrap().chunk_rows, 128);
        });
    }

    #[test]
    fn test_missing_file() {
        let err = Settings::from_file("/nonexistent/lazycat.toml").unwrap_err();
        assert!(matches!(err, Error::ConfigIo { .. }));
    }
}
