use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum ConfigError {
    #[error("Failed to serialize probe config: {0}")]
    #[diagnostic(code(imgprobe_config::toml_serialize))]
    TomlSerError(#[from] toml::ser::Error),

    #[error("Failed to parse probe config: {0}")]
    #[diagnostic(
        code(imgprobe_config::toml_deserialize),
        help("Only min_package_size, temporary_suffixes and unsquashfs_bin are recognized")
    )]
    TomlDeError(#[from] toml::de::Error),

    #[error("Invalid value for `{field}`: {reason}")]
    #[diagnostic(
        code(imgprobe_config::invalid_value),
        help("Remove the field to fall back to its default")
    )]
    InvalidValue { field: &'static str, reason: String },

    #[error("Failed to read probe config: {0}")]
    #[diagnostic(code(imgprobe_config::io))]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
