//! Public metadata derived from the desktop file.

use std::path::Path;

use crate::desktop::DesktopEntry;

/// Version reported when the desktop file declares none.
pub const DEFAULT_VERSION: &str = "1.0";

/// Substrings removed from a file name to get a readable application name.
const NAME_NOISE: &[&str] = &[
    ".AppImage",
    ".appimage",
    "-x86_64",
    "-i386",
    "-i686",
    "-aarch64",
    "-armhf",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub name: String,
    pub version: String,
    pub description: String,
    pub categories: Vec<String>,
    pub mime_types: Vec<String>,
}

/// Resolves the metadata of the package at `path`.
///
/// Without a desktop file only the name (derived from the file name) and the
/// default version are set.
pub fn resolve_metadata<P: AsRef<Path>>(desktop: Option<&DesktopEntry>, path: P) -> Metadata {
    let value = |key: &str| {
        desktop
            .and_then(|d| d.desktop_value(key))
            .unwrap_or_default()
            .to_string()
    };
    let list = |key: &str| {
        desktop
            .and_then(|d| d.desktop_list(key))
            .unwrap_or_default()
    };

    let mut name = value("Name");
    if name.is_empty() {
        name = nice_name(path);
    }

    let version = [value("X-AppImage-Version"), value("Version")]
        .into_iter()
        .find(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_VERSION.to_string());

    Metadata {
        name,
        version,
        description: value("Comment"),
        categories: list("Categories"),
        mime_types: list("MimeType"),
    }
}

/// Derives an application name from the file name:
/// `my-app-1.2-x86_64.AppImage` becomes `my app 1.2`.
pub fn nice_name<P: AsRef<Path>>(path: P) -> String {
    let mut name = path
        .as_ref()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    for noise in NAME_NOISE {
        name = name.replace(noise, "");
    }
    name.replace(['-', '_'], " ")
}

/// Whether the package asks to be integrated into the desktop.
///
/// `X-AppImage-Integrate` decides when present and `NoDisplay` is then never
/// looked at. With neither key, or no desktop file at all, the answer is yes.
pub fn shall_be_integrated(desktop: Option<&DesktopEntry>) -> bool {
    let Some(desktop) = desktop else {
        return true;
    };

    match desktop.desktop_value("X-AppImage-Integrate") {
        Some(requested) => requested != "false",
        None => desktop.desktop_value("NoDisplay") != Some("true"),
    }
}
