//! Loading of the package's `.desktop` file.
//!
//! Desktop files separate list values with `;`, which ini readers treat as a
//! comment marker. Every `;` is swapped for [`LIST_SEPARATOR`] before parsing
//! and list values are split on that placeholder afterwards.

use std::{
    collections::HashMap,
    io::{BufRead, BufReader},
};

use ini::{Ini, ParseOption};
use tracing::{debug, trace};

use crate::{
    archive::ArchiveReader,
    error::{ErrorContext, PackageError, Result},
};

/// FULLWIDTH SEMICOLON, stands in for `;` while the file is parsed.
pub const LIST_SEPARATOR: char = '\u{FF1B}';

/// Section holding the application's identity.
pub const DESKTOP_ENTRY_SECTION: &str = "Desktop Entry";

/// Pattern used to find the desktop file at the image root.
pub const DESKTOP_FILE_PATTERN: &str = "*.desktop";

/// A parsed desktop file: section name to key/value pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesktopEntry {
    sections: HashMap<String, HashMap<String, String>>,
}

impl DesktopEntry {
    pub fn new(sections: HashMap<String, HashMap<String, String>>) -> Self {
        Self { sections }
    }

    pub fn section(&self, name: &str) -> Option<&HashMap<String, String>> {
        self.sections.get(name)
    }

    pub fn sections(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section)?.get(key).map(String::as_str)
    }

    pub fn has_key(&self, section: &str, key: &str) -> bool {
        self.get(section, key).is_some()
    }

    /// Value of `key` in the `[Desktop Entry]` section.
    pub fn desktop_value(&self, key: &str) -> Option<&str> {
        self.get(DESKTOP_ENTRY_SECTION, key)
    }

    /// List value of `key` in the `[Desktop Entry]` section.
    pub fn desktop_list(&self, key: &str) -> Option<Vec<String>> {
        self.desktop_value(key).map(split_list)
    }
}

/// Splits a sanitized list value. A trailing separator keeps its empty
/// element: `Utility；Development；` gives `["Utility", "Development", ""]`.
pub fn split_list(value: &str) -> Vec<String> {
    value.split(LIST_SEPARATOR).map(String::from).collect()
}

/// Turns a sanitized desktop file into a [`DesktopEntry`].
pub trait DesktopParser {
    fn parse(&self, data: &[u8]) -> Result<DesktopEntry>;
}

/// [`DesktopParser`] backed by `rust-ini`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IniParser;

impl DesktopParser for IniParser {
    fn parse(&self, data: &[u8]) -> Result<DesktopEntry> {
        let text = std::str::from_utf8(data)
            .map_err(|err| PackageError::DescriptorUnparseable(err.to_string()))?;

        let opt = ParseOption {
            enabled_quote: false,
            enabled_escape: false,
            ..ParseOption::default()
        };
        let ini = Ini::load_from_str_opt(text, opt)
            .map_err(|err| PackageError::DescriptorUnparseable(err.to_string()))?;

        let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
        for (name, props) in ini.iter() {
            let Some(name) = name else {
                continue;
            };
            let section = sections.entry(name.to_string()).or_default();
            for (key, value) in props.iter() {
                section
                    .entry(key.to_string())
                    .or_insert_with(|| value.to_string());
            }
        }

        Ok(DesktopEntry::new(sections))
    }
}

/// Copies `reader` line by line, replacing each `;` with [`LIST_SEPARATOR`].
pub fn sanitize<R: BufRead>(mut reader: R) -> Result<Vec<u8>> {
    let mut buf = [0u8; 4];
    let placeholder = LIST_SEPARATOR.encode_utf8(&mut buf).as_bytes();

    let mut out = Vec::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        let read = reader
            .read_until(b'\n', &mut line)
            .with_context(|| "reading desktop file".to_string())?;
        if read == 0 {
            break;
        }

        if !line.contains(&b';') {
            out.extend_from_slice(&line);
            continue;
        }
        for &byte in &line {
            if byte == b';' {
                out.extend_from_slice(placeholder);
            } else {
                out.push(byte);
            }
        }
    }

    Ok(out)
}

/// Finds the desktop file at the root of `reader`, sanitizes it and hands it
/// to `parser`.
pub fn load_desktop_entry(
    reader: &dyn ArchiveReader,
    parser: &dyn DesktopParser,
) -> Result<DesktopEntry> {
    let file = match reader.file_reader(DESKTOP_FILE_PATTERN) {
        Ok(file) => file,
        Err(PackageError::NotFound(_)) => return Err(PackageError::DescriptorMissing),
        Err(err) => return Err(err),
    };

    let data = sanitize(BufReader::new(file))?;
    trace!(bytes = data.len(), "sanitized desktop file");

    let entry = parser.parse(&data)?;
    debug!(sections = entry.sections.len(), "loaded desktop file");
    Ok(entry)
}
