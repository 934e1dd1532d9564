//! The package handle tying detection, archive access and metadata together.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use imgprobe_config::config::ProbeConfig;
use tracing::{debug, warn};

use crate::{
    archive::{ArchiveReader, EntryReader},
    desktop::{load_desktop_entry, DesktopEntry, DesktopParser, IniParser},
    error::{PackageError, Result},
    formats::{detect_package_type, elf_size, open_archive_reader, validate_candidate, PackageType},
    icon, metadata,
    update::read_update_info,
};

/// An opened package.
///
/// The type and filesystem offset are determined once, when the handle is
/// created. The archive reader belongs to this handle alone and must not be
/// used by several threads at the same time.
pub struct PackageHandle {
    pub path: PathBuf,
    pub name: String,
    pub version: String,
    pub description: String,
    pub categories: Vec<String>,
    pub mime_types: Vec<String>,
    /// Filled by [`PackageHandle::load_update_locator`].
    pub update_information: Option<String>,
    package_type: PackageType,
    offset: u64,
    desktop: Option<DesktopEntry>,
    reader: Box<dyn ArchiveReader>,
}

impl fmt::Debug for PackageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageHandle")
            .field("path", &self.path)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("package_type", &self.package_type)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

impl PackageHandle {
    /// Opens the package at `path` with the default configuration.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_config(path, &ProbeConfig::default())
    }

    /// Opens the package at `path` with the configuration named by the
    /// `IMGPROBE_CONFIG` and `IMGPROBE_UNSQUASHFS` environment variables.
    pub fn from_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = ProbeConfig::from_env()?;
        Self::with_config(path, &config)
    }

    pub fn with_config<P: AsRef<Path>>(path: P, config: &ProbeConfig) -> Result<Self> {
        Self::with_parser(path, config, &IniParser)
    }

    /// Opens the package at `path`, parsing its desktop file with `parser`.
    ///
    /// A missing or unparseable desktop file doesn't fail the call; the
    /// handle then only carries the file-name derived name and the default
    /// version.
    pub fn with_parser<P: AsRef<Path>>(
        path: P,
        config: &ProbeConfig,
        parser: &dyn DesktopParser,
    ) -> Result<Self> {
        let path = path.as_ref();

        if config.is_temporary_file(&path.to_string_lossy()) {
            return Err(PackageError::TemporaryFile {
                path: path.to_path_buf(),
            });
        }
        validate_candidate(path, config)?;

        let package_type = detect_package_type(path, config);
        if package_type == PackageType::Unknown {
            return Err(PackageError::UnrecognizedFormat(path.to_path_buf()));
        }

        let offset = match package_type {
            PackageType::Type2 => elf_size(path)?,
            _ => 0,
        };
        let reader = open_archive_reader(path, package_type, offset, config)?;

        let desktop = match load_desktop_entry(reader.as_ref(), parser) {
            Ok(desktop) => Some(desktop),
            Err(err) if err.is_descriptor_error() => {
                warn!(path = %path.display(), error = %err, "package has no usable desktop file");
                None
            }
            Err(err) => return Err(err),
        };

        let meta = metadata::resolve_metadata(desktop.as_ref(), path);
        debug!(
            path = %path.display(),
            name = %meta.name,
            version = %meta.version,
            package_type = %package_type,
            "opened package"
        );

        Ok(Self {
            path: path.to_path_buf(),
            name: meta.name,
            version: meta.version,
            description: meta.description,
            categories: meta.categories,
            mime_types: meta.mime_types,
            update_information: None,
            package_type,
            offset,
            desktop,
            reader,
        })
    }

    pub fn package_type(&self) -> PackageType {
        self.package_type
    }

    /// Where the embedded filesystem starts; 0 unless the package is type 2.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn desktop(&self) -> Option<&DesktopEntry> {
        self.desktop.as_ref()
    }

    pub fn shall_be_integrated(&self) -> bool {
        metadata::shall_be_integrated(self.desktop.as_ref())
    }

    /// Extracts the file at `path` (wildcards allowed) into `destination`.
    ///
    /// See [`ArchiveReader::extract_to`] for the symlink rules.
    pub fn extract_file<P: AsRef<Path>>(
        &self,
        path: &str,
        destination: P,
        resolve_symlinks: bool,
    ) -> Result<PathBuf> {
        let destination = destination.as_ref();
        debug!(
            file = %path,
            destination = %destination.display(),
            resolve_symlinks,
            "extracting from package"
        );
        self.reader.extract_to(path, destination, resolve_symlinks)
    }

    /// Opens the file at `path`, following symlinks that stay in the package.
    pub fn extract_file_reader(&self, path: &str) -> Result<EntryReader<'_>> {
        self.reader.file_reader(path)
    }

    pub fn thumbnail(&self) -> Result<EntryReader<'_>> {
        icon::thumbnail(self.reader.as_ref())
    }

    /// Opens the icon declared in the desktop file and returns it with its
    /// file name.
    pub fn icon(&self) -> Result<(EntryReader<'_>, String)> {
        icon::icon(self.reader.as_ref(), self.desktop.as_ref())
    }

    /// Reads the update information from the runtime ELF.
    pub fn update_locator(&self) -> Result<String> {
        read_update_info(&self.path)
    }

    /// Reads the update information and keeps it in
    /// [`update_information`](Self::update_information).
    pub fn load_update_locator(&mut self) -> Result<&str> {
        let info = read_update_info(&self.path)?;
        Ok(self.update_information.insert(info).as_str())
    }

    pub fn mod_time(&self) -> DateTime<Utc> {
        self.reader.mod_time()
    }
}
