//! Package format detection and archive reader selection.
//!
//! Classification only looks at a few fixed byte offsets. Once a package is
//! classified, [`open_archive_reader`] is the single place where the layout
//! decides which reader is used.

pub mod iso9660;
pub mod squashfs;

use std::{fs, path::Path};

use goblin::elf::Elf;
use imgprobe_config::config::ProbeConfig;
use imgprobe_utils::fs::{read_bytes_at, read_file_signature};
use tracing::{debug, trace};

use crate::{
    archive::ArchiveReader,
    error::{PackageError, Result},
};

/// Magic bytes for ELF executables (at offset 0).
pub const ELF_MAGIC_BYTES: [u8; 3] = [0x7f, 0x45, 0x4c];

/// Type 1 marker (at offset 8).
pub const TYPE1_MAGIC_BYTES: [u8; 3] = [0x41, 0x49, 0x01];

/// Type 2 marker (at offset 8).
pub const TYPE2_MAGIC_BYTES: [u8; 3] = [0x41, 0x49, 0x02];

/// Bytes needed to check the ELF magic and the type marker.
const MAGIC_HEADER_LEN: usize = 11;

/// ISO9660 primary volume descriptor signature.
pub const ISO9660_MAGIC_BYTES: [u8; 5] = *b"CD001";

/// Offset of [`ISO9660_MAGIC_BYTES`] inside an ISO9660 image.
pub const ISO9660_MAGIC_OFFSET: u64 = 32769;

/// Container layout of a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageType {
    /// Not a package.
    Unknown,
    /// ISO9660 filesystem inside the executable.
    Type1,
    /// Squashfs filesystem appended to the runtime ELF.
    Type2,
}

impl PackageType {
    /// Numeric type as written in the package marker, `-1` when unknown.
    pub fn as_i32(&self) -> i32 {
        match self {
            PackageType::Unknown => -1,
            PackageType::Type1 => 1,
            PackageType::Type2 => 2,
        }
    }
}

impl std::fmt::Display for PackageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PackageType::Unknown => write!(f, "unknown"),
            PackageType::Type1 => write!(f, "type 1"),
            PackageType::Type2 => write!(f, "type 2"),
        }
    }
}

/// Checks that `path` is a readable file large enough to be a package.
pub fn validate_candidate<P: AsRef<Path>>(path: P, config: &ProbeConfig) -> Result<()> {
    let path = path.as_ref();
    let invalid = |reason: String| {
        PackageError::InvalidInput {
            path: path.to_path_buf(),
            reason,
        }
    };

    let meta = fs::metadata(path).map_err(|err| invalid(err.to_string()))?;
    if meta.is_dir() {
        return Err(invalid("is a directory".into()));
    }

    let min = config.min_package_size();
    if meta.len() < min {
        return Err(invalid(format!(
            "{} bytes is below the minimum package size of {min} bytes",
            meta.len()
        )));
    }

    read_file_signature(path, MAGIC_HEADER_LEN).map_err(|err| invalid(err.to_string()))?;
    Ok(())
}

/// Detects the package type from the file's magic bytes.
///
/// Files that cannot be read, directories and files below the configured
/// minimum size are [`PackageType::Unknown`]. The explicit type marker wins
/// over the ELF + ISO9660 heuristic.
pub fn detect_package_type<P: AsRef<Path>>(path: P, config: &ProbeConfig) -> PackageType {
    let path = path.as_ref();

    if let Err(err) = validate_candidate(path, config) {
        trace!(path = %path.display(), error = %err, "not a package candidate");
        return PackageType::Unknown;
    }

    let Ok(header) = read_file_signature(path, MAGIC_HEADER_LEN) else {
        return PackageType::Unknown;
    };

    let package_type = if header.get(8..11) == Some(&TYPE2_MAGIC_BYTES[..]) {
        PackageType::Type2
    } else if header.get(8..11) == Some(&TYPE1_MAGIC_BYTES[..]) {
        PackageType::Type1
    } else if header.get(..3) == Some(&ELF_MAGIC_BYTES[..]) && has_iso9660_signature(path) {
        PackageType::Type1
    } else {
        PackageType::Unknown
    };

    debug!(path = %path.display(), package_type = %package_type, "detected package type");
    package_type
}

fn has_iso9660_signature(path: &Path) -> bool {
    read_bytes_at(path, ISO9660_MAGIC_OFFSET, ISO9660_MAGIC_BYTES.len())
        .map(|bytes| bytes == ISO9660_MAGIC_BYTES)
        .unwrap_or(false)
}

/// Size of the runtime ELF, i.e. where the appended filesystem begins.
///
/// The section header table is the last part of the runtime, so the size is
/// `e_shoff + e_shentsize * e_shnum`.
pub fn elf_size<P: AsRef<Path>>(path: P) -> Result<u64> {
    let header = read_file_signature(&path, 64)?;
    if header.len() < 64 {
        return Err(PackageError::Custom(format!(
            "{} is too short for an ELF header",
            path.as_ref().display()
        )));
    }

    let header = Elf::parse_header(&header)?;
    let table_len = u64::from(header.e_shentsize) * u64::from(header.e_shnum);
    header.e_shoff.checked_add(table_len).ok_or_else(|| {
        PackageError::Custom(format!(
            "{}: section header table at {:#x} overflows the file offset range",
            path.as_ref().display(),
            header.e_shoff
        ))
    })
}

/// Opens the archive reader for `package_type`.
///
/// `offset` is only used by type 2 packages.
pub fn open_archive_reader<P: AsRef<Path>>(
    path: P,
    package_type: PackageType,
    offset: u64,
    config: &ProbeConfig,
) -> Result<Box<dyn ArchiveReader>> {
    let path = path.as_ref();
    debug!(path = %path.display(), package_type = %package_type, offset, "opening archive reader");

    match package_type {
        PackageType::Type1 => Ok(Box::new(iso9660::IsoReader::open(path)?)),
        PackageType::Type2 => {
            Ok(Box::new(squashfs::SquashfsReader::open(
                path,
                offset,
                config.unsquashfs_bin(),
            )?))
        }
        PackageType::Unknown => Err(PackageError::UnrecognizedFormat(path.to_path_buf())),
    }
}
