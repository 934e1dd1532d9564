//! Uniform read access to the filesystem embedded in a package.
//!
//! Each container layout provides an [`ArchiveReader`] implementation that
//! only knows how to enumerate its entries and stream a file's bytes. Path
//! matching, symlink resolution and extraction are shared by all layouts and
//! live in the provided trait methods.

use std::{
    fs::File,
    io::{self, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use fast_glob::glob_match;
use imgprobe_utils::{
    error::FileSystemError,
    fs::{create_symlink, ensure_dir_exists, safe_remove},
};
use tracing::{debug, trace};

use crate::error::{PackageError, Result};

/// Maximum number of symlinks followed before giving up on a path.
const MAX_SYMLINK_HOPS: usize = 32;

/// A byte stream over a single file inside a package.
pub type EntryReader<'a> = Box<dyn Read + 'a>;

/// Kind of an entry in the embedded filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    /// Symlink with its raw target as stored in the image.
    Symlink(String),
}

/// An entry of the embedded filesystem.
///
/// Paths are normalized: relative to the image root, `/`-separated, without a
/// leading slash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub path: String,
    pub kind: EntryKind,
}

impl Entry {
    pub fn new<S: AsRef<str>>(path: S, kind: EntryKind) -> Self {
        Self {
            path: normalize_path(path.as_ref()),
            kind,
        }
    }

    /// Final path component.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Directory containing this entry, `""` for top-level entries.
    pub fn parent(&self) -> &str {
        self.path.rsplit_once('/').map(|(p, _)| p).unwrap_or("")
    }
}

/// Read access to the filesystem embedded in a package.
///
/// Implementors provide [`entries`](ArchiveReader::entries),
/// [`open_entry`](ArchiveReader::open_entry) and
/// [`mod_time`](ArchiveReader::mod_time); everything else is derived.
///
/// A reader is owned by a single package handle and is not meant to be used
/// from several threads at once.
pub trait ArchiveReader: Send {
    /// Every entry of the image, in the decoder's listing order.
    fn entries(&self) -> Result<Vec<Entry>>;

    /// Opens the content of a regular file entry.
    fn open_entry(&self, entry: &Entry) -> Result<EntryReader<'_>>;

    /// Time the embedded filesystem was created or last modified.
    fn mod_time(&self) -> DateTime<Utc>;

    /// Lists the direct children of the directory `dir`, as normalized paths.
    ///
    /// `"/"` and `""` both name the image root.
    fn list_files(&self, dir: &str) -> Result<Vec<String>> {
        let dir = normalize_path(dir);
        Ok(self
            .entries()?
            .into_iter()
            .filter(|entry| !entry.path.is_empty() && entry.parent() == dir)
            .map(|entry| entry.path)
            .collect())
    }

    /// Finds the entry named by `path`.
    ///
    /// With `wildcard` set, `path` is a glob (`*.desktop`); the first entry in
    /// listing order that matches wins.
    fn find_entry(&self, path: &str, wildcard: bool) -> Result<Entry> {
        let pattern = normalize_path(path);
        let is_glob = wildcard && pattern.contains(['*', '?', '[', '{']);

        self.entries()?
            .into_iter()
            .find(|entry| {
                if is_glob {
                    glob_match(&pattern, &entry.path)
                } else {
                    entry.path == pattern
                }
            })
            .ok_or_else(|| PackageError::NotFound(path.to_string()))
    }

    /// Follows relative symlinks starting at `entry` until a non-link entry.
    ///
    /// Absolute symlinks, and relative ones escaping the image root, are
    /// never followed and yield [`PackageError::NotFound`].
    fn resolve_entry(&self, entry: Entry) -> Result<Entry> {
        let mut current = entry;

        for _ in 0..MAX_SYMLINK_HOPS {
            let target = match &current.kind {
                EntryKind::Symlink(target) => target.clone(),
                _ => return Ok(current),
            };

            let resolved = resolve_link_target(current.parent(), &target)
                .ok_or(PackageError::NotFound(target))?;
            trace!(link = %current.path, target = %resolved, "following symlink");
            current = self.find_entry(&resolved, false)?;
        }

        Err(PackageError::NotFound(current.path))
    }

    /// Opens the file named by `path`, which may contain wildcards.
    ///
    /// Symlinks are followed as long as they stay inside the image.
    fn file_reader(&self, path: &str) -> Result<EntryReader<'_>> {
        self.file_reader_with(path, true)
    }

    /// Like [`file_reader`](ArchiveReader::file_reader) with explicit
    /// control over wildcard matching.
    fn file_reader_with(&self, path: &str, wildcard: bool) -> Result<EntryReader<'_>> {
        let entry = self.resolve_entry(self.find_entry(path, wildcard)?)?;

        match entry.kind {
            EntryKind::Directory => Err(PackageError::IsADirectory(entry.path)),
            _ => self.open_entry(&entry),
        }
    }

    /// Extracts the entry named by `path` into `destination`.
    ///
    /// The written file keeps the entry's own name. When `resolve_symlinks`
    /// is set, a relative symlink is replaced by the content of its target;
    /// otherwise, and always for absolute symlinks, the link itself is
    /// recreated verbatim.
    ///
    /// Returns the path written.
    fn extract_to(&self, path: &str, destination: &Path, resolve_symlinks: bool) -> Result<PathBuf> {
        let entry = self.find_entry(path, true)?;
        let dest = destination.join(entry.file_name());
        let prepare_destination =
            || ensure_dir_exists(destination).map_err(|err| fs_write_failure(destination, err));

        let source = match &entry.kind {
            EntryKind::Directory => return Err(PackageError::IsADirectory(entry.path)),
            EntryKind::Symlink(target) => {
                let followable = resolve_symlinks
                    && resolve_link_target(entry.parent(), target).is_some();
                if !followable {
                    debug!(path = %entry.path, target = %target, dest = %dest.display(), "extracting symlink verbatim");
                    prepare_destination()?;
                    replace_with_symlink(target, &dest)?;
                    return Ok(dest);
                }
                self.resolve_entry(entry.clone())?
            }
            EntryKind::File => entry.clone(),
        };

        if source.kind == EntryKind::Directory {
            return Err(PackageError::IsADirectory(source.path));
        }
        prepare_destination()?;

        debug!(path = %entry.path, source = %source.path, dest = %dest.display(), "extracting file");
        let mut reader = self.open_entry(&source)?;
        write_stream(&mut reader, &dest)?;
        Ok(dest)
    }
}

fn write_failure(path: &Path) -> impl FnOnce(io::Error) -> PackageError + '_ {
    move |source| {
        PackageError::WriteFailure {
            path: path.to_path_buf(),
            source,
        }
    }
}

fn fs_write_failure(path: &Path, err: FileSystemError) -> PackageError {
    let message = err.to_string();
    let source = err
        .into_io_error()
        .unwrap_or_else(|| io::Error::other(message));
    write_failure(path)(source)
}

fn replace_with_symlink(target: &str, dest: &Path) -> Result<()> {
    safe_remove(dest).map_err(|err| fs_write_failure(dest, err))?;
    create_symlink(target, dest).map_err(|err| fs_write_failure(dest, err))
}

fn write_stream(reader: &mut dyn Read, dest: &Path) -> Result<()> {
    if dest.is_symlink() {
        safe_remove(dest).map_err(|err| fs_write_failure(dest, err))?;
    }

    let file = File::create(dest).map_err(write_failure(dest))?;
    let mut writer = BufWriter::new(file);
    io::copy(reader, &mut writer).map_err(write_failure(dest))?;
    writer.flush().map_err(write_failure(dest))
}

/// Normalizes an archive path: strips leading `/` and `./`, collapses
/// repeated separators and `.` components.
///
/// `..` components are kept as-is; they only carry meaning when resolving a
/// symlink target, see [`resolve_link_target`].
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Resolves a symlink `target` found in directory `parent`.
///
/// Returns `None` for absolute targets and for relative targets that climb
/// above the image root.
pub fn resolve_link_target(parent: &str, target: &str) -> Option<String> {
    if target.starts_with('/') {
        return None;
    }

    let mut parts: Vec<&str> = parent.split('/').filter(|p| !p.is_empty()).collect();
    for part in target.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }

    Some(parts.join("/"))
}
