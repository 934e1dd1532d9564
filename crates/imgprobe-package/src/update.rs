//! Update information embedded in the runtime ELF.

use std::{fs, path::Path};

use goblin::elf::Elf;
use imgprobe_utils::fs::read_bytes_at;
use tracing::{debug, trace};

use crate::{
    error::{PackageError, Result},
    formats::elf_size,
};

/// ELF section carrying the update information string.
pub const UPDATE_SECTION: &str = ".upd_info";

/// Reads the update information string of the package at `path`.
///
/// The section is NUL padded; everything from the first NUL on is dropped.
/// The file is opened anew on every call.
pub fn read_update_info<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();

    // Only the runtime is parsed, the appended filesystem can be large.
    let runtime_len = elf_size(path)?;
    let runtime = read_bytes_at(path, 0, runtime_len as usize)?;
    let elf = Elf::parse(&runtime)?;

    let section = elf
        .section_headers
        .iter()
        .find(|sh| elf.shdr_strtab.get_at(sh.sh_name) == Some(UPDATE_SECTION))
        .ok_or(PackageError::MissingUpdateSection)?;
    trace!(
        offset = section.sh_offset,
        size = section.sh_size,
        "found update section"
    );

    let file_len = fs::metadata(path)
        .map_err(|err| PackageError::SectionReadError(err.to_string()))?
        .len();
    match section.sh_offset.checked_add(section.sh_size) {
        Some(end) if end <= file_len => {}
        _ => {
            return Err(PackageError::SectionReadError(format!(
                "section at {:#x} with {} bytes extends past the end of the file ({file_len} bytes)",
                section.sh_offset, section.sh_size
            )));
        }
    }

    let data = read_bytes_at(path, section.sh_offset, section.sh_size as usize)
        .map_err(|err| PackageError::SectionReadError(err.to_string()))?;

    let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
    let info = String::from_utf8_lossy(&data[..end]).into_owned();
    debug!(path = %path.display(), update_info = %info, "read update information");
    Ok(info)
}
