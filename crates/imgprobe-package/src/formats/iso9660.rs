//! Type 1 packages: an ISO9660 filesystem laid over the runtime executable.
//!
//! The image is read in place, starting at offset 0 of the package. Names and
//! symlinks come from Rock Ridge `NM`/`SL` system use entries when present.

use std::{
    collections::{HashMap, HashSet},
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use imgprobe_utils::fs::{file_mod_time, read_bytes_at};
use tracing::{debug, trace};

use crate::{
    archive::{ArchiveReader, Entry, EntryKind, EntryReader},
    error::{ErrorContext, PackageError, Result},
};

/// Byte offset of the first volume descriptor (sector 16).
const VOLUME_DESCRIPTORS_START: u64 = 16 * 2048;

const DESCRIPTOR_SIZE: usize = 2048;
const MAX_DESCRIPTORS: u64 = 32;
const MAX_DEPTH: usize = 64;

/// Continuation areas followed for a single directory record.
const MAX_CONTINUATIONS: usize = 16;

const FLAG_DIRECTORY: u8 = 0x02;

/// Location of a file's data inside the image.
#[derive(Debug, Clone, Copy)]
struct Extent {
    start: u64,
    len: u64,
}

/// A parsed directory record.
#[derive(Debug)]
struct DirRecord {
    name: String,
    extent: Extent,
    is_dir: bool,
    symlink: Option<String>,
}

/// Reader for ISO9660-based packages.
///
/// The directory tree is indexed once when the reader is opened; file data
/// is streamed from the image on each read.
pub struct IsoReader {
    path: PathBuf,
    entries: Vec<Entry>,
    extents: HashMap<String, Extent>,
}

impl IsoReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (block_size, root) = read_primary_descriptor(&path)?;

        let mut reader = Self {
            path,
            entries: Vec::new(),
            extents: HashMap::new(),
        };
        let mut visited = HashSet::new();
        reader.walk(root, "", block_size, 0, &mut visited)?;

        debug!(
            path = %reader.path.display(),
            entries = reader.entries.len(),
            "indexed ISO9660 image"
        );
        Ok(reader)
    }

    fn walk(
        &mut self,
        dir: Extent,
        prefix: &str,
        block_size: u64,
        depth: usize,
        visited: &mut HashSet<u64>,
    ) -> Result<()> {
        if depth > MAX_DEPTH || !visited.insert(dir.start) {
            return Err(PackageError::MalformedImage(format!(
                "directory loop or excessive nesting at `{prefix}`"
            )));
        }

        let data = read_bytes_at(&self.path, dir.start, dir.len as usize)?;
        let records = parse_directory(&data, block_size, |area| {
            Ok(read_bytes_at(&self.path, area.start, area.len as usize)?)
        })?;
        for record in records {
            let path = if prefix.is_empty() {
                record.name.clone()
            } else {
                format!("{prefix}/{}", record.name)
            };

            let kind = match (&record.symlink, record.is_dir) {
                (Some(target), _) => EntryKind::Symlink(target.clone()),
                (None, true) => EntryKind::Directory,
                (None, false) => EntryKind::File,
            };
            trace!(path = %path, kind = ?kind, "ISO9660 entry");

            self.entries.push(Entry::new(&path, kind.clone()));
            match kind {
                EntryKind::Directory => self.walk(record.extent, &path, block_size, depth + 1, visited)?,
                EntryKind::File => {
                    self.extents.insert(path, record.extent);
                }
                EntryKind::Symlink(_) => {}
            }
        }

        Ok(())
    }
}

impl ArchiveReader for IsoReader {
    fn entries(&self) -> Result<Vec<Entry>> {
        Ok(self.entries.clone())
    }

    fn open_entry(&self, entry: &Entry) -> Result<EntryReader<'_>> {
        let extent = self
            .extents
            .get(&entry.path)
            .ok_or_else(|| PackageError::NotFound(entry.path.clone()))?;

        let mut file = File::open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        file.seek(SeekFrom::Start(extent.start))
            .with_context(|| format!("seeking to `{}` in {}", entry.path, self.path.display()))?;

        Ok(Box::new(file.take(extent.len)))
    }

    fn mod_time(&self) -> DateTime<Utc> {
        file_mod_time(&self.path).unwrap_or_default()
    }
}

fn le_u32(data: &[u8], at: usize) -> u64 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]) as u64
}

/// Locates the primary volume descriptor and returns the logical block size
/// and the root directory extent.
fn read_primary_descriptor(path: &Path) -> Result<(u64, Extent)> {
    for index in 0..MAX_DESCRIPTORS {
        let offset = VOLUME_DESCRIPTORS_START + index * DESCRIPTOR_SIZE as u64;
        let desc = read_bytes_at(path, offset, DESCRIPTOR_SIZE)?;

        if desc.len() < DESCRIPTOR_SIZE || &desc[1..6] != b"CD001" {
            break;
        }

        match desc[0] {
            1 => {
                let block_size = u16::from_le_bytes([desc[128], desc[129]]) as u64;
                if block_size == 0 {
                    return Err(PackageError::MalformedImage("zero logical block size".into()));
                }
                let root = &desc[156..190];
                let extent = Extent {
                    start: le_u32(root, 2) * block_size,
                    len: le_u32(root, 10),
                };
                return Ok((block_size, extent));
            }
            255 => break,
            _ => continue,
        }
    }

    Err(PackageError::MalformedImage(
        "no primary volume descriptor".into(),
    ))
}

/// Parses the records of one directory extent, skipping `.` and `..`.
///
/// Records never straddle a logical block; a zero length byte means the
/// rest of the block is padding. `read_area` loads the SUSP continuation
/// areas that `CE` entries point to.
fn parse_directory<F>(data: &[u8], block_size: u64, mut read_area: F) -> Result<Vec<DirRecord>>
where
    F: FnMut(Extent) -> Result<Vec<u8>>,
{
    let block_size = block_size as usize;
    let mut records = Vec::new();
    let mut pos = 0;

    while pos < data.len() {
        let len = data[pos] as usize;
        if len == 0 {
            pos = (pos / block_size + 1) * block_size;
            continue;
        }
        if len < 34 || pos + len > data.len() {
            return Err(PackageError::MalformedImage(format!(
                "truncated directory record at {pos}"
            )));
        }

        let rec = &data[pos..pos + len];
        pos += len;

        let id_len = rec[32] as usize;
        if 33 + id_len > rec.len() {
            return Err(PackageError::MalformedImage(
                "identifier exceeds directory record".into(),
            ));
        }
        let id = &rec[33..33 + id_len];
        if id_len == 1 && (id[0] == 0 || id[0] == 1) {
            continue;
        }

        let su_start = (33 + id_len + usize::from(id_len % 2 == 0)).min(rec.len());
        let mut susp = SystemUse::default();
        let mut next = susp.parse_area(&rec[su_start..], block_size as u64);
        let mut hops = 0;
        while let Some(area) = next {
            hops += 1;
            if hops > MAX_CONTINUATIONS {
                return Err(PackageError::MalformedImage(format!(
                    "more than {MAX_CONTINUATIONS} system use continuation areas"
                )));
            }
            next = susp.parse_area(&read_area(area)?, block_size as u64);
        }
        let (name, symlink) = susp.finish();

        records.push(DirRecord {
            name: name.unwrap_or_else(|| decode_identifier(id)),
            extent: Extent {
                start: le_u32(rec, 2) * block_size as u64,
                len: le_u32(rec, 10),
            },
            is_dir: rec[25] & FLAG_DIRECTORY != 0,
            symlink,
        });
    }

    Ok(records)
}

/// Plain ISO9660 identifier without its `;1` version and trailing dot.
fn decode_identifier(id: &[u8]) -> String {
    let name = String::from_utf8_lossy(id);
    let name = name.split(';').next().unwrap_or_default();
    name.strip_suffix('.').unwrap_or(name).to_string()
}

/// Rock Ridge data of one directory record, gathered across its system use
/// area and any continuation areas.
#[derive(Default)]
struct SystemUse {
    name: Vec<u8>,
    has_name: bool,
    link: SymlinkBuilder,
}

impl SystemUse {
    /// Consumes one system use area and returns the continuation area its
    /// `CE` entry announces, if any.
    fn parse_area(&mut self, data: &[u8], block_size: u64) -> Option<Extent> {
        let mut continuation = None;
        let mut pos = 0;

        while pos + 4 <= data.len() {
            let sig = &data[pos..pos + 2];
            let len = data[pos + 2] as usize;
            if len < 4 || pos + len > data.len() {
                break;
            }
            let body = &data[pos + 4..pos + len];
            pos += len;

            match sig {
                b"NM" if !body.is_empty() => {
                    // flags: 0x02 current dir, 0x04 parent dir; neither is a real name
                    if body[0] & 0x06 == 0 {
                        self.has_name = true;
                        self.name.extend_from_slice(&body[1..]);
                    }
                }
                b"SL" if !body.is_empty() => self.link.push_components(&body[1..]),
                // block, offset and length, each stored both-endian
                b"CE" if body.len() >= 20 => {
                    continuation = Some(Extent {
                        start: le_u32(body, 0) * block_size + le_u32(body, 8),
                        len: le_u32(body, 16),
                    });
                }
                b"ST" => break,
                _ => {}
            }
        }

        continuation
    }

    /// The alternate name and the symlink target.
    fn finish(self) -> (Option<String>, Option<String>) {
        let name = self
            .has_name
            .then(|| String::from_utf8_lossy(&self.name).into_owned());
        (name, self.link.finish())
    }
}

#[derive(Default)]
struct SymlinkBuilder {
    seen: bool,
    absolute: bool,
    parts: Vec<String>,
    continues: bool,
}

impl SymlinkBuilder {
    fn push_components(&mut self, mut data: &[u8]) {
        self.seen = true;

        while data.len() >= 2 {
            let flags = data[0];
            let len = (data[1] as usize).min(data.len() - 2);
            let content = String::from_utf8_lossy(&data[2..2 + len]);
            data = &data[2 + len..];

            let piece = if flags & 0x02 != 0 {
                ".".to_string()
            } else if flags & 0x04 != 0 {
                "..".to_string()
            } else if flags & 0x08 != 0 {
                self.absolute = true;
                self.continues = false;
                continue;
            } else {
                content.into_owned()
            };

            match self.parts.last_mut() {
                Some(last) if self.continues => last.push_str(&piece),
                _ => self.parts.push(piece),
            }
            self.continues = flags & 0x01 != 0;
        }
    }

    fn finish(self) -> Option<String> {
        if !self.seen {
            return None;
        }
        let joined = self.parts.join("/");
        Some(if self.absolute {
            format!("/{joined}")
        } else {
            joined
        })
    }
}
