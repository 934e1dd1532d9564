//! Error types for the package crate.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Errors that can occur while inspecting a package.
#[derive(Error, Diagnostic, Debug)]
pub enum PackageError {
    #[error("Error while {action}: {source}")]
    #[diagnostic(code(imgprobe_package::io))]
    IoError {
        action: String,
        source: std::io::Error,
    },

    #[error("`{path}` is a temporary file")]
    #[diagnostic(
        code(imgprobe_package::temporary_file),
        help("Wait for the download to finish before inspecting the file")
    )]
    TemporaryFile { path: PathBuf },

    #[error("Invalid input `{path}`: {reason}")]
    #[diagnostic(code(imgprobe_package::invalid_input))]
    InvalidInput { path: PathBuf, reason: String },

    #[error("`{0}` is not a recognized package")]
    #[diagnostic(code(imgprobe_package::unrecognized_format))]
    UnrecognizedFormat(PathBuf),

    #[error("No desktop file found in package")]
    #[diagnostic(code(imgprobe_package::descriptor_missing))]
    DescriptorMissing,

    #[error("Failed to parse desktop file: {0}")]
    #[diagnostic(code(imgprobe_package::descriptor_unparseable))]
    DescriptorUnparseable(String),

    #[error("No entry matching `{0}` in package")]
    #[diagnostic(code(imgprobe_package::not_found))]
    NotFound(String),

    #[error("`{0}` is a directory")]
    #[diagnostic(code(imgprobe_package::is_a_directory))]
    IsADirectory(String),

    #[error("Desktop file doesn't specify an icon")]
    #[diagnostic(code(imgprobe_package::no_icon_declared))]
    NoIconDeclared,

    #[error("Cannot find the package's icon: {0}")]
    #[diagnostic(code(imgprobe_package::icon_not_found))]
    IconNotFound(String),

    #[error("Missing update section on target ELF")]
    #[diagnostic(code(imgprobe_package::missing_update_section))]
    MissingUpdateSection,

    #[error("Unable to read update section: {0}")]
    #[diagnostic(code(imgprobe_package::section_read))]
    SectionReadError(String),

    #[error("Failed to write `{path}`: {source}")]
    #[diagnostic(code(imgprobe_package::write_failure))]
    WriteFailure {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed ISO9660 image: {0}")]
    #[diagnostic(code(imgprobe_package::iso9660))]
    MalformedImage(String),

    #[error(transparent)]
    #[diagnostic(code(imgprobe_package::elf))]
    ElfError(#[from] goblin::error::Error),

    #[error(transparent)]
    #[diagnostic(code(imgprobe_package::squashfs))]
    SquashfsError(#[from] squishy::error::SquishyError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    ConfigError(#[from] imgprobe_config::error::ConfigError),

    #[error("{0}")]
    #[diagnostic(code(imgprobe_package::custom))]
    Custom(String),
}

impl PackageError {
    /// Returns true if the file was rejected before its format was examined.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            PackageError::TemporaryFile { .. } | PackageError::InvalidInput { .. }
        )
    }

    /// Returns true for the descriptor errors that only degrade a handle
    /// instead of failing its construction.
    pub fn is_descriptor_error(&self) -> bool {
        matches!(
            self,
            PackageError::DescriptorMissing | PackageError::DescriptorUnparseable(_)
        )
    }
}

/// A specialized Result type for package operations.
pub type Result<T> = std::result::Result<T, PackageError>;

/// Extension trait for adding context to I/O errors.
pub trait ErrorContext<T> {
    /// Adds context to an error, describing what action was being performed.
    fn with_context<C>(self, context: C) -> Result<T>
    where
        C: FnOnce() -> String;
}

impl<T> ErrorContext<T> for std::io::Result<T> {
    fn with_context<C>(self, context: C) -> Result<T>
    where
        C: FnOnce() -> String,
    {
        self.map_err(|err| {
            PackageError::IoError {
                action: context(),
                source: err,
            }
        })
    }
}

impl From<imgprobe_utils::error::FileSystemError> for PackageError {
    fn from(err: imgprobe_utils::error::FileSystemError) -> Self {
        use imgprobe_utils::error::FileSystemError;

        match err {
            FileSystemError::Io {
                operation,
                path,
                source,
            } => {
                PackageError::IoError {
                    action: format!("trying to {operation} {}", path.display()),
                    source,
                }
            }
            other => PackageError::Custom(other.to_string()),
        }
    }
}
