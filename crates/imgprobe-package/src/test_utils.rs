use std::io::Cursor;

use backhand::{FilesystemWriter, NodeHeader};
use chrono::{DateTime, Utc};

use crate::{
    archive::{ArchiveReader, Entry, EntryKind, EntryReader},
    error::{PackageError, Result},
};

/// In-memory archive used to exercise the shared reader logic.
#[derive(Default)]
pub struct MemoryArchive {
    entries: Vec<(Entry, Vec<u8>)>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(mut self, path: &str, data: &[u8]) -> Self {
        self.entries
            .push((Entry::new(path, EntryKind::File), data.to_vec()));
        self
    }

    pub fn dir(mut self, path: &str) -> Self {
        self.entries
            .push((Entry::new(path, EntryKind::Directory), Vec::new()));
        self
    }

    pub fn symlink(mut self, path: &str, target: &str) -> Self {
        self.entries.push((
            Entry::new(path, EntryKind::Symlink(target.to_string())),
            Vec::new(),
        ));
        self
    }
}

impl ArchiveReader for MemoryArchive {
    fn entries(&self) -> Result<Vec<Entry>> {
        Ok(self.entries.iter().map(|(entry, _)| entry.clone()).collect())
    }

    fn open_entry(&self, entry: &Entry) -> Result<EntryReader<'_>> {
        self.entries
            .iter()
            .find(|(e, _)| e.path == entry.path && e.kind == EntryKind::File)
            .map(|(_, data)| Box::new(Cursor::new(data.as_slice())) as EntryReader<'_>)
            .ok_or_else(|| PackageError::NotFound(entry.path.clone()))
    }

    fn mod_time(&self) -> DateTime<Utc> {
        DateTime::<Utc>::default()
    }
}

const SECTOR: usize = 2048;

enum IsoNode {
    File(String, Vec<u8>),
    Dir(String),
    Symlink(String, String),
    /// Symlink whose name tail and `SL` entry live in a continuation area.
    SpilledSymlink(String, String),
    /// File stored without a Rock Ridge name.
    Plain(String, Vec<u8>),
}

impl IsoNode {
    fn path(&self) -> &str {
        match self {
            IsoNode::File(p, _)
            | IsoNode::Dir(p)
            | IsoNode::Symlink(p, _)
            | IsoNode::SpilledSymlink(p, _)
            | IsoNode::Plain(p, _) => p,
        }
    }
}

/// Builds small ISO9660 images with Rock Ridge `NM`/`SL` entries.
///
/// Entries keep insertion order on disk. Every directory must fit into a
/// single sector.
#[derive(Default)]
pub struct IsoBuilder {
    nodes: Vec<IsoNode>,
    min_len: usize,
}

impl IsoBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pads the image with zeroes up to `len` bytes.
    pub fn min_len(mut self, len: usize) -> Self {
        self.min_len = len;
        self
    }

    pub fn file(mut self, path: &str, data: &[u8]) -> Self {
        self.nodes.push(IsoNode::File(path.into(), data.to_vec()));
        self
    }

    pub fn plain_file(mut self, path: &str, data: &[u8]) -> Self {
        self.nodes.push(IsoNode::Plain(path.into(), data.to_vec()));
        self
    }

    pub fn dir(mut self, path: &str) -> Self {
        self.nodes.push(IsoNode::Dir(path.into()));
        self
    }

    pub fn symlink(mut self, path: &str, target: &str) -> Self {
        self.nodes
            .push(IsoNode::Symlink(path.into(), target.into()));
        self
    }

    pub fn spilled_symlink(mut self, path: &str, target: &str) -> Self {
        self.nodes
            .push(IsoNode::SpilledSymlink(path.into(), target.into()));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let parent_of = |path: &str| path.rsplit_once('/').map(|(p, _)| p.to_string()).unwrap_or_default();
        let name_of = |path: &str| path.rsplit('/').next().unwrap_or(path).to_string();

        // Directories: root first, then explicit ones in insertion order.
        let mut dirs: Vec<String> = vec![String::new()];
        for node in &self.nodes {
            if let IsoNode::Dir(path) = node {
                dirs.push(path.clone());
            }
        }
        let dir_sector = |path: &str| 18 + dirs.iter().position(|d| d == path).expect("unknown dir");

        // File extents follow the directory sectors.
        let mut next = 18 + dirs.len();
        let mut extents = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let extent = match node {
                IsoNode::File(_, data) | IsoNode::Plain(_, data) => {
                    let start = next;
                    next += data.len().div_ceil(SECTOR).max(1);
                    (start, data.len())
                }
                IsoNode::Dir(path) => (dir_sector(path), SECTOR),
                IsoNode::Symlink(..) => (0, 0),
                // the extent holds the continuation area
                IsoNode::SpilledSymlink(..) => {
                    next += 1;
                    (next - 1, 0)
                }
            };
            extents.push(extent);
        }

        let mut image = vec![0u8; next * SECTOR];

        // Primary volume descriptor and terminator.
        let pvd = 16 * SECTOR;
        image[pvd] = 1;
        image[pvd + 1..pvd + 6].copy_from_slice(b"CD001");
        image[pvd + 6] = 1;
        image[pvd + 80..pvd + 84].copy_from_slice(&(next as u32).to_le_bytes());
        image[pvd + 128..pvd + 130].copy_from_slice(&(SECTOR as u16).to_le_bytes());
        image[pvd + 130..pvd + 132].copy_from_slice(&(SECTOR as u16).to_be_bytes());
        let root = record(18, SECTOR, 0x02, &[0], &[]);
        image[pvd + 156..pvd + 156 + root.len()].copy_from_slice(&root);

        let term = 17 * SECTOR;
        image[term] = 255;
        image[term + 1..term + 6].copy_from_slice(b"CD001");
        image[term + 6] = 1;

        for dir in &dirs {
            let sector = dir_sector(dir);
            let parent_sector = if dir.is_empty() { 18 } else { dir_sector(&parent_of(dir)) };
            let mut listing = record(sector, SECTOR, 0x02, &[0], &[]);
            listing.extend(record(parent_sector, SECTOR, 0x02, &[1], &[]));

            for (node, &(extent, size)) in self.nodes.iter().zip(&extents) {
                if parent_of(node.path()) != *dir {
                    continue;
                }
                let name = name_of(node.path());
                let rec = match node {
                    IsoNode::File(..) => {
                        record(extent, size, 0, format!("{};1", name.to_uppercase()).as_bytes(), &nm(&name))
                    }
                    IsoNode::Plain(..) => record(extent, size, 0, format!("{name};1").as_bytes(), &[]),
                    IsoNode::Dir(..) => record(extent, size, 0x02, name.to_uppercase().as_bytes(), &nm(&name)),
                    IsoNode::Symlink(_, target) => {
                        let mut su = nm(&name);
                        su.extend(sl(target));
                        record(0, 0, 0, name.to_uppercase().as_bytes(), &su)
                    }
                    IsoNode::SpilledSymlink(_, target) => {
                        let area = spilled_area(&name, target);
                        let mut su = nm_part(0x01, &name[..name.len() / 2]);
                        su.extend(ce_entry(extent, CONTINUATION_OFFSET, area.len()));
                        record(0, 0, 0, name.to_uppercase().as_bytes(), &su)
                    }
                };
                listing.extend(rec);
            }

            assert!(listing.len() <= SECTOR, "directory too large for the test builder");
            let start = sector * SECTOR;
            image[start..start + listing.len()].copy_from_slice(&listing);
        }

        for (node, &(extent, _)) in self.nodes.iter().zip(&extents) {
            let (start, data) = match node {
                IsoNode::File(_, data) | IsoNode::Plain(_, data) => (extent * SECTOR, data.clone()),
                IsoNode::SpilledSymlink(path, target) => {
                    let area = spilled_area(&name_of(path), target);
                    (extent * SECTOR + CONTINUATION_OFFSET, area)
                }
                _ => continue,
            };
            image[start..start + data.len()].copy_from_slice(&data);
        }

        if image.len() < self.min_len {
            image.resize(self.min_len, 0);
        }
        image
    }
}

pub fn record(extent: usize, size: usize, flags: u8, id: &[u8], su: &[u8]) -> Vec<u8> {
    let mut rec = vec![0u8; 33];
    rec[2..6].copy_from_slice(&(extent as u32).to_le_bytes());
    rec[6..10].copy_from_slice(&(extent as u32).to_be_bytes());
    rec[10..14].copy_from_slice(&(size as u32).to_le_bytes());
    rec[14..18].copy_from_slice(&(size as u32).to_be_bytes());
    rec[25] = flags;
    rec[28] = 1;
    rec[31] = 1;
    rec[32] = id.len() as u8;
    rec.extend_from_slice(id);
    if id.len() % 2 == 0 {
        rec.push(0);
    }
    rec.extend_from_slice(su);
    if rec.len() % 2 == 1 {
        rec.push(0);
    }
    rec[0] = rec.len() as u8;
    rec
}

fn nm(name: &str) -> Vec<u8> {
    nm_part(0, name)
}

fn nm_part(flags: u8, name: &str) -> Vec<u8> {
    let mut entry = vec![b'N', b'M', (5 + name.len()) as u8, 1, flags];
    entry.extend_from_slice(name.as_bytes());
    entry
}

/// Where continuation areas start inside their sector.
const CONTINUATION_OFFSET: usize = 100;

/// `CE` entry pointing at `len` bytes at `offset` inside sector `block`.
pub fn ce_entry(block: usize, offset: usize, len: usize) -> Vec<u8> {
    let mut entry = vec![b'C', b'E', 28, 1];
    for value in [block, offset, len] {
        entry.extend_from_slice(&(value as u32).to_le_bytes());
        entry.extend_from_slice(&(value as u32).to_be_bytes());
    }
    entry
}

/// Continuation area of a spilled symlink: the second half of its name, its
/// `SL` entry and a terminator.
fn spilled_area(name: &str, target: &str) -> Vec<u8> {
    let mut area = nm_part(0, &name[name.len() / 2..]);
    area.extend(sl(target));
    area.extend_from_slice(&[b'S', b'T', 4, 1]);
    area
}

fn sl(target: &str) -> Vec<u8> {
    let mut components = Vec::new();
    if target.starts_with('/') {
        components.extend_from_slice(&[0x08, 0]);
    }
    for part in target.split('/').filter(|p| !p.is_empty()) {
        match part {
            "." => components.extend_from_slice(&[0x02, 0]),
            ".." => components.extend_from_slice(&[0x04, 0]),
            other => {
                components.extend_from_slice(&[0, other.len() as u8]);
                components.extend_from_slice(other.as_bytes());
            }
        }
    }
    let mut entry = vec![b'S', b'L', (5 + components.len()) as u8, 1, 0];
    entry.extend(components);
    entry
}

/// Writes a minimal 64-bit little-endian ELF header at the start of `image`
/// and appends the given sections plus the section header table to its end.
pub fn write_elf(image: &mut Vec<u8>, sections: &[(&str, &[u8])]) {
    if image.len() < 64 {
        image.resize(64, 0);
    }

    // Section header string table.
    let mut shstrtab = vec![0u8];
    let mut name_offsets = Vec::new();
    let shstrtab_name = shstrtab.len();
    shstrtab.extend_from_slice(b".shstrtab\0");
    for (name, _) in sections {
        name_offsets.push(shstrtab.len());
        shstrtab.extend_from_slice(name.as_bytes());
        shstrtab.push(0);
    }

    let shstrtab_offset = image.len();
    image.extend_from_slice(&shstrtab);

    let mut data_offsets = Vec::new();
    for (_, data) in sections {
        data_offsets.push(image.len());
        image.extend_from_slice(data);
    }

    while image.len() % 8 != 0 {
        image.push(0);
    }
    let shoff = image.len();

    let mut shdr = |name: usize, kind: u32, offset: usize, size: usize| {
        image.extend_from_slice(&(name as u32).to_le_bytes());
        image.extend_from_slice(&kind.to_le_bytes());
        image.extend_from_slice(&0u64.to_le_bytes());
        image.extend_from_slice(&0u64.to_le_bytes());
        image.extend_from_slice(&(offset as u64).to_le_bytes());
        image.extend_from_slice(&(size as u64).to_le_bytes());
        image.extend_from_slice(&0u32.to_le_bytes());
        image.extend_from_slice(&0u32.to_le_bytes());
        image.extend_from_slice(&1u64.to_le_bytes());
        image.extend_from_slice(&0u64.to_le_bytes());
    };

    // null, .shstrtab, then the requested sections as SHT_PROGBITS
    shdr(0, 0, 0, 0);
    shdr(shstrtab_name, 3, shstrtab_offset, shstrtab.len());
    for (i, (_, data)) in sections.iter().enumerate() {
        shdr(name_offsets[i], 1, data_offsets[i], data.len());
    }

    let mut header = Vec::with_capacity(64);
    header.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1]);
    header.extend_from_slice(&[0; 9]);
    header.extend_from_slice(&2u16.to_le_bytes()); // ET_EXEC
    header.extend_from_slice(&0x3eu16.to_le_bytes()); // EM_X86_64
    header.extend_from_slice(&1u32.to_le_bytes());
    header.extend_from_slice(&0u64.to_le_bytes()); // e_entry
    header.extend_from_slice(&0u64.to_le_bytes()); // e_phoff
    header.extend_from_slice(&(shoff as u64).to_le_bytes());
    header.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    header.extend_from_slice(&64u16.to_le_bytes()); // e_ehsize
    header.extend_from_slice(&0u16.to_le_bytes()); // e_phentsize
    header.extend_from_slice(&0u16.to_le_bytes()); // e_phnum
    header.extend_from_slice(&64u16.to_le_bytes()); // e_shentsize
    header.extend_from_slice(&((sections.len() + 2) as u16).to_le_bytes());
    header.extend_from_slice(&1u16.to_le_bytes()); // e_shstrndx
    image[..64].copy_from_slice(&header);
}

/// Marks `image` with the type marker at offset 8 (`AI` + type byte).
pub fn mark(image: &mut [u8], kind: u8) {
    image[8..11].copy_from_slice(&[0x41, 0x49, kind]);
}

/// Writes a 32-bit little-endian ELF header (EM_386) whose section header
/// table starts at `shoff` and is empty, so the runtime ends at `shoff`.
pub fn write_elf32_header(image: &mut [u8], shoff: u32) {
    let mut header = Vec::with_capacity(52);
    header.extend_from_slice(&[0x7f, b'E', b'L', b'F', 1, 1, 1]);
    header.extend_from_slice(&[0; 9]);
    header.extend_from_slice(&2u16.to_le_bytes()); // ET_EXEC
    header.extend_from_slice(&3u16.to_le_bytes()); // EM_386
    header.extend_from_slice(&1u32.to_le_bytes());
    header.extend_from_slice(&0u32.to_le_bytes()); // e_entry
    header.extend_from_slice(&0u32.to_le_bytes()); // e_phoff
    header.extend_from_slice(&shoff.to_le_bytes());
    header.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    header.extend_from_slice(&52u16.to_le_bytes()); // e_ehsize
    header.extend_from_slice(&0u16.to_le_bytes()); // e_phentsize
    header.extend_from_slice(&0u16.to_le_bytes()); // e_phnum
    header.extend_from_slice(&40u16.to_le_bytes()); // e_shentsize
    header.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
    header.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx
    image[..52].copy_from_slice(&header);
}

pub fn node_header() -> NodeHeader {
    NodeHeader::new(0o755, 0, 0, 0)
}

/// Appends a squashfs image filled by `fill` to the end of `image`.
///
/// `mod_time` ends up in the superblock.
pub fn append_squashfs<F>(image: &mut Vec<u8>, mod_time: u32, fill: F)
where
    F: FnOnce(&mut FilesystemWriter<'static, 'static, 'static>),
{
    let mut writer = FilesystemWriter::default();
    writer.set_time(mod_time);
    fill(&mut writer);

    let offset = image.len() as u64;
    let mut out = Cursor::new(std::mem::take(image));
    writer.write_with_offset(&mut out, offset).unwrap();
    *image = out.into_inner();
}
