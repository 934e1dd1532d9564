//! Inspection of self-contained application images.
//!
//! A package is an executable carrying a read-only filesystem, either an
//! ISO9660 image (type 1) or a squashfs image appended to the runtime ELF
//! (type 2), plus a `.desktop` file describing the application.
//!
//! # Example
//!
//! ```no_run
//! use imgprobe_package::{PackageHandle, PackageError};
//!
//! fn show(path: &str) -> Result<(), PackageError> {
//!     let package = PackageHandle::new(path)?;
//!     println!("{} {} ({})", package.name, package.version, package.package_type());
//!
//!     let (_icon, file_name) = package.icon()?;
//!     println!("icon: {file_name}");
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod desktop;
pub mod error;
pub mod formats;
pub mod icon;
pub mod metadata;
pub mod package;
pub mod update;

#[cfg(test)]
mod test_utils;

pub use archive::{ArchiveReader, Entry, EntryKind, EntryReader};
pub use desktop::{DesktopEntry, DesktopParser, IniParser};
pub use error::{ErrorContext, PackageError, Result};
pub use formats::{detect_package_type, PackageType};
pub use metadata::Metadata;
pub use package::PackageHandle;
