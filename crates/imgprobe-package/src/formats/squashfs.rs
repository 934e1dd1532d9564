//! Type 2 packages: a squashfs image appended to the runtime ELF.

use std::{
    fs::File,
    io::{self, BufReader, Cursor, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    process::Command,
};

use chrono::{DateTime, Utc};
use imgprobe_utils::fs::{file_mod_time, read_bytes_at};
use squishy::{EntryKind as SquashfsEntryKind, SquashFS};
use tracing::{debug, trace};

use crate::{
    archive::{normalize_path, ArchiveReader, Entry, EntryKind, EntryReader},
    error::{ErrorContext, PackageError, Result},
};

/// Squashfs superblock magic.
const SQUASHFS_MAGIC: &[u8; 4] = b"hsqs";

/// Offset of `mkfs_time` inside the superblock.
const MKFS_TIME_OFFSET: usize = 8;

/// Reader for squashfs-based packages.
///
/// The image is opened through `squishy` at the runtime's end for each
/// operation and released before returning.
pub struct SquashfsReader {
    path: PathBuf,
    offset: u64,
    unsquashfs_bin: String,
}

impl SquashfsReader {
    /// Opens the squashfs image of `path` starting at `offset`.
    ///
    /// `unsquashfs_bin` is only run when the image's timestamp can't be read
    /// from its superblock.
    pub fn open<P: AsRef<Path>>(path: P, offset: u64, unsquashfs_bin: &str) -> Result<Self> {
        let reader = Self {
            path: path.as_ref().to_path_buf(),
            offset,
            unsquashfs_bin: unsquashfs_bin.to_string(),
        };
        reader.image()?;
        Ok(reader)
    }

    fn image(&self) -> Result<SquashFS<'static>> {
        let file = File::open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        let window = ImageWindow::new(file, self.offset)
            .with_context(|| format!("seeking to offset {} in {}", self.offset, self.path.display()))?;

        // position 0 of the window is the superblock, where squishy's own
        // magic scan stops right away
        Ok(SquashFS::new(BufReader::new(window), Some(0))?)
    }

    /// `mkfs_time` straight from the superblock.
    fn superblock_time(&self) -> Option<DateTime<Utc>> {
        let sb = read_bytes_at(&self.path, self.offset, MKFS_TIME_OFFSET + 4).ok()?;
        if sb.len() < MKFS_TIME_OFFSET + 4 || &sb[..4] != SQUASHFS_MAGIC {
            return None;
        }

        let secs = u32::from_le_bytes([sb[8], sb[9], sb[10], sb[11]]);
        DateTime::from_timestamp(secs as i64, 0)
    }

    /// Asks `unsquashfs` for the filesystem time. Any failure is `None`.
    fn unsquashfs_time(&self) -> Option<DateTime<Utc>> {
        let output = Command::new(&self.unsquashfs_bin)
            .args(["-q", "-fstime", "-o", &self.offset.to_string()])
            .arg(&self.path)
            .output()
            .ok()?;

        if !output.status.success() {
            return None;
        }

        let secs = String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse::<i64>()
            .ok()?;
        DateTime::from_timestamp(secs, 0)
    }
}

/// The part of a file from `offset` on, seen as a stream of its own.
struct ImageWindow<R> {
    inner: R,
    offset: u64,
}

impl<R: Seek> ImageWindow<R> {
    fn new(mut inner: R, offset: u64) -> io::Result<Self> {
        inner.seek(SeekFrom::Start(offset))?;
        Ok(Self { inner, offset })
    }
}

impl<R: Read> Read for ImageWindow<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Seek> Seek for ImageWindow<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let pos = match pos {
            SeekFrom::Start(start) => {
                let absolute = self.offset.checked_add(start).ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidInput, "seek offset overflows")
                })?;
                SeekFrom::Start(absolute)
            }
            relative => relative,
        };

        let absolute = self.inner.seek(pos)?;
        absolute.checked_sub(self.offset).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before the start of the squashfs image",
            )
        })
    }
}

/// squishy reports every symlink target with one extra leading `/`.
fn link_target(raw: &Path) -> String {
    let raw = raw.to_string_lossy();
    raw.strip_prefix('/').unwrap_or(&raw).to_string()
}

impl ArchiveReader for SquashfsReader {
    fn entries(&self) -> Result<Vec<Entry>> {
        let image = self.image()?;
        let entries = image
            .entries()
            .filter_map(|entry| {
                let kind = match entry.kind {
                    SquashfsEntryKind::File(_) => EntryKind::File,
                    SquashfsEntryKind::Directory => EntryKind::Directory,
                    SquashfsEntryKind::Symlink(target) => EntryKind::Symlink(link_target(&target)),
                    SquashfsEntryKind::Unknown => return None,
                };
                Some(Entry::new(entry.path.to_string_lossy(), kind))
            })
            .filter(|entry| !entry.path.is_empty())
            .collect();

        Ok(entries)
    }

    fn open_entry(&self, entry: &Entry) -> Result<EntryReader<'_>> {
        let image = self.image()?;

        let candidate = image
            .entries()
            .find(|candidate| {
                matches!(candidate.kind, SquashfsEntryKind::File(_))
                    && normalize_path(&candidate.path.to_string_lossy()) == entry.path
            })
            .ok_or_else(|| PackageError::NotFound(entry.path.clone()))?;

        let data = image.read_file(&candidate.path)?;
        Ok(Box::new(Cursor::new(data)))
    }

    fn mod_time(&self) -> DateTime<Utc> {
        if let Some(time) = self.superblock_time() {
            trace!(path = %self.path.display(), "using squashfs superblock time");
            return time;
        }

        if let Some(time) = self.unsquashfs_time() {
            debug!(path = %self.path.display(), bin = %self.unsquashfs_bin, "using unsquashfs time");
            return time;
        }

        debug!(path = %self.path.display(), "falling back to the host file's modification time");
        file_mod_time(&self.path).unwrap_or_default()
    }
}
