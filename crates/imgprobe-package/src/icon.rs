//! Icon and thumbnail lookup.

use tracing::{debug, trace};

use crate::{
    archive::{ArchiveReader, EntryReader},
    desktop::DesktopEntry,
    error::{PackageError, Result},
};

/// Fixed location of the package thumbnail.
pub const THUMBNAIL_PATH: &str = ".DirIcon";

/// Extensions tried for an icon declared without one, in this order.
pub const ICON_EXTENSIONS: [&str; 2] = ["png", "svg"];

/// Opens the package thumbnail.
pub fn thumbnail(reader: &dyn ArchiveReader) -> Result<EntryReader<'_>> {
    reader.file_reader(THUMBNAIL_PATH)
}

/// Opens the icon declared by the desktop file's `Icon` key.
///
/// Returns the stream together with the file name of the icon found.
pub fn icon<'a>(
    reader: &'a dyn ArchiveReader,
    desktop: Option<&DesktopEntry>,
) -> Result<(EntryReader<'a>, String)> {
    let desktop = desktop.ok_or(PackageError::DescriptorMissing)?;
    let icon = desktop
        .desktop_value("Icon")
        .filter(|icon| !icon.is_empty())
        .ok_or(PackageError::NoIconDeclared)?;

    if ICON_EXTENSIONS
        .iter()
        .any(|ext| icon.ends_with(&format!(".{ext}")))
    {
        match reader.file_reader_with(icon, false) {
            Ok(stream) => return Ok((stream, icon.to_string())),
            Err(err) => trace!(icon = %icon, error = %err, "declared icon path not readable"),
        }
    }

    for file in reader.list_files("/")? {
        if !file.starts_with(icon) {
            continue;
        }
        let accepted = ICON_EXTENSIONS
            .iter()
            .any(|ext| file == format!("{icon}.{ext}"));
        if !accepted {
            continue;
        }

        match reader.file_reader_with(&file, false) {
            Ok(stream) => {
                debug!(icon = %file, "found package icon");
                return Ok((stream, file));
            }
            Err(err) => trace!(icon = %file, error = %err, "skipping unreadable icon candidate"),
        }
    }

    Err(PackageError::IconNotFound(icon.to_string()))
}
