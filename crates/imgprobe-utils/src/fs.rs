use std::{
    fs::{self, File},
    io::{Read, Seek, SeekFrom},
    path::Path,
};

use chrono::{DateTime, Utc};

use crate::error::{FileSystemError, FileSystemResult, FsOperation};

/// Filesystem mutations performed while extracting from a package.
pub trait FileSystemProvider {
    /// Removes whatever is at `path`: a file, a symlink (dangling or not) or
    /// a whole directory tree.
    ///
    /// A missing path is not an error.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use imgprobe_utils::error::FileSystemResult;
    /// use imgprobe_utils::fs::{FileSystemProvider, StandardFileSystemProvider};
    ///
    /// fn main() -> FileSystemResult<()> {
    ///     StandardFileSystemProvider.safe_remove("/tmp/extracted/.DirIcon")?;
    ///     Ok(())
    /// }
    /// ```
    fn safe_remove<P: AsRef<Path>>(&self, path: P) -> FileSystemResult<()>;

    /// Creates `path` and its parents unless it is already a directory.
    ///
    /// # Errors
    ///
    /// [`FileSystemError::NotADirectory`] if something else is at `path`.
    fn ensure_dir_exists<P: AsRef<Path>>(&self, path: P) -> FileSystemResult<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StandardFileSystemProvider;

impl FileSystemProvider for StandardFileSystemProvider {
    fn safe_remove<P: AsRef<Path>>(&self, path: P) -> FileSystemResult<()> {
        let path = path.as_ref();

        // symlink_metadata doesn't follow links, so dangling ones are seen too
        let Ok(meta) = fs::symlink_metadata(path) else {
            return Ok(());
        };

        let removed = if meta.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        removed.map_err(FileSystemError::io(FsOperation::Remove, path))
    }

    fn ensure_dir_exists<P: AsRef<Path>>(&self, path: P) -> FileSystemResult<()> {
        let path = path.as_ref();
        match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(FileSystemError::NotADirectory(path.to_path_buf())),
            Err(_) => {
                fs::create_dir_all(path).map_err(FileSystemError::io(FsOperation::CreateDir, path))
            }
        }
    }
}

/// Shorthand for [`FileSystemProvider::ensure_dir_exists`] on the standard provider.
pub fn ensure_dir_exists<P: AsRef<Path>>(path: P) -> FileSystemResult<()> {
    StandardFileSystemProvider.ensure_dir_exists(path)
}

/// Shorthand for [`FileSystemProvider::safe_remove`] on the standard provider.
pub fn safe_remove<P: AsRef<Path>>(path: P) -> FileSystemResult<()> {
    StandardFileSystemProvider.safe_remove(path)
}

/// Reads `len` bytes starting at `offset` from the file at `path`.
///
/// Returns fewer bytes than requested only when the file ends first. The file
/// handle is dropped before returning.
///
/// The buffer is sized by what the file holds past `offset`, never by `len`
/// alone.
pub fn read_bytes_at<P: AsRef<Path>>(path: P, offset: u64, len: usize) -> FileSystemResult<Vec<u8>> {
    let path = path.as_ref();

    let mut file = File::open(path).map_err(FileSystemError::io(FsOperation::Open, path))?;
    let available = file
        .metadata()
        .map_err(FileSystemError::io(FsOperation::Read, path))?
        .len()
        .saturating_sub(offset);
    file.seek(SeekFrom::Start(offset))
        .map_err(FileSystemError::io(FsOperation::Seek, path))?;

    let mut buf = Vec::with_capacity(available.min(len as u64) as usize);
    file.take(len as u64)
        .read_to_end(&mut buf)
        .map_err(FileSystemError::io(FsOperation::Read, path))?;
    Ok(buf)
}

/// Reads the first `len` bytes of a file, typically to inspect its magic.
pub fn read_file_signature<P: AsRef<Path>>(path: P, len: usize) -> FileSystemResult<Vec<u8>> {
    read_bytes_at(path, 0, len)
}

/// Returns the modification time of `path`, or `None` if it cannot be stat'ed.
pub fn file_mod_time<P: AsRef<Path>>(path: P) -> Option<DateTime<Utc>> {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

/// Creates a symlink at `link` pointing to `target`, creating parent directories.
pub fn create_symlink<P: AsRef<Path>, Q: AsRef<Path>>(target: P, link: Q) -> FileSystemResult<()> {
    let target = target.as_ref();
    let link = link.as_ref();

    if let Some(parent) = link.parent() {
        ensure_dir_exists(parent)?;
    }

    std::os::unix::fs::symlink(target, link).map_err(|source| {
        FileSystemError::LinkFailed {
            link: link.to_path_buf(),
            target: target.to_path_buf(),
            source,
        }
    })
}
