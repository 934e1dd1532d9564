use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{ConfigError, Result};

/// Files below this size are never considered packages (100 KiB).
pub const DEFAULT_MIN_PACKAGE_SIZE: u64 = 100 * 1024;

/// Tool queried for the embedded squashfs timestamp when it cannot be read directly.
pub const DEFAULT_UNSQUASHFS_BIN: &str = "unsquashfs";

/// Suffixes used by browsers and download managers for files still in flight.
pub const DEFAULT_TEMPORARY_SUFFIXES: &[&str] =
    &[".temp", "~", ".part", ".partial", ".zs-old", ".crdownload"];

/// Environment variable pointing at a TOML config file.
pub const CONFIG_ENV: &str = "IMGPROBE_CONFIG";

/// Environment variable overriding [`ProbeConfig::unsquashfs_bin`].
pub const UNSQUASHFS_ENV: &str = "IMGPROBE_UNSQUASHFS";

/// Inspector configuration.
///
/// Every field is optional in the TOML form; [`ProbeConfig::resolve`] fills the
/// gaps with the defaults above.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeConfig {
    /// Minimum size in bytes for a file to be sniffed at all.
    /// Default: 102400
    pub min_package_size: Option<u64>,

    /// Path suffixes rejected before any byte is read.
    /// Default: [".temp", "~", ".part", ".partial", ".zs-old", ".crdownload"]
    pub temporary_suffixes: Option<Vec<String>>,

    /// External utility used as the second timestamp tier for squashfs packages.
    /// Default: "unsquashfs"
    pub unsquashfs_bin: Option<String>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl ProbeConfig {
    pub fn default_config() -> Self {
        Self {
            min_package_size: Some(DEFAULT_MIN_PACKAGE_SIZE),
            temporary_suffixes: Some(
                DEFAULT_TEMPORARY_SUFFIXES
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ),
            unsquashfs_bin: Some(DEFAULT_UNSQUASHFS_BIN.to_string()),
        }
    }

    /// Loads the configuration from a TOML file.
    /// If the file is not found, the default configuration is used.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let mut config: Self = match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!(path = %path.display(), "config file not found, using defaults");
                Self::default_config()
            }
            Err(err) => return Err(ConfigError::IoError(err)),
        };

        config.resolve()?;
        debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Builds the configuration from the environment.
    ///
    /// Reads the file named by `IMGPROBE_CONFIG` when set, then applies the
    /// `IMGPROBE_UNSQUASHFS` override.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::load(path)?,
            Err(_) => Self::default_config(),
        };

        if let Ok(bin) = std::env::var(UNSQUASHFS_ENV) {
            if !bin.is_empty() {
                config.unsquashfs_bin = Some(bin);
            }
        }

        Ok(config)
    }

    pub fn resolve(&mut self) -> Result<()> {
        if self.min_package_size == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "min_package_size",
                reason: "must be greater than zero".into(),
            });
        }

        if matches!(&self.unsquashfs_bin, Some(bin) if bin.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "unsquashfs_bin",
                reason: "must not be empty".into(),
            });
        }

        self.min_package_size.get_or_insert(DEFAULT_MIN_PACKAGE_SIZE);
        self.unsquashfs_bin
            .get_or_insert_with(|| DEFAULT_UNSQUASHFS_BIN.to_string());
        self.temporary_suffixes.get_or_insert_with(|| {
            DEFAULT_TEMPORARY_SUFFIXES
                .iter()
                .map(|s| s.to_string())
                .collect()
        });

        Ok(())
    }

    pub fn min_package_size(&self) -> u64 {
        self.min_package_size.unwrap_or(DEFAULT_MIN_PACKAGE_SIZE)
    }

    pub fn unsquashfs_bin(&self) -> &str {
        self.unsquashfs_bin
            .as_deref()
            .unwrap_or(DEFAULT_UNSQUASHFS_BIN)
    }

    /// Returns true if `path` ends with one of the configured temporary suffixes.
    pub fn is_temporary_file(&self, path: &str) -> bool {
        match &self.temporary_suffixes {
            Some(suffixes) => suffixes.iter().any(|s| path.ends_with(s.as_str())),
            None => DEFAULT_TEMPORARY_SUFFIXES.iter().any(|s| path.ends_with(s)),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
