//! Format classification by file extension, plus magic-byte sniffing for mislabeled archives.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ReadError;

/// Book file kinds this crate reads. Resolved once from the declared extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveKind {
    Cbz,
    Cbr,
    Cb7,
    Epub,
    Pdf,
}

/// The physical container format behind a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Zip,
    Rar,
    SevenZip,
    Pdf,
}

impl ArchiveKind {
    /// Classify a path by its extension (case-insensitive).
    pub fn from_path(path: &Path) -> Result<Self, ReadError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        Self::from_extension(&ext).ok_or_else(|| {
            ReadError::UnsupportedFormat(format!(
                "{} (extension {:?})",
                path.display(),
                ext
            ))
        })
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "cbz" => Some(ArchiveKind::Cbz),
            "cbr" => Some(ArchiveKind::Cbr),
            "cb7" => Some(ArchiveKind::Cb7),
            "epub" => Some(ArchiveKind::Epub),
            "pdf" => Some(ArchiveKind::Pdf),
            _ => None,
        }
    }

    pub fn container(&self) -> Container {
        match self {
            ArchiveKind::Cbz | ArchiveKind::Epub => Container::Zip,
            ArchiveKind::Cbr => Container::Rar,
            ArchiveKind::Cb7 => Container::SevenZip,
            ArchiveKind::Pdf => Container::Pdf,
        }
    }

    pub fn is_comic(&self) -> bool {
        matches!(self, ArchiveKind::Cbz | ArchiveKind::Cbr | ArchiveKind::Cb7)
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ArchiveKind::Cbz => "application/vnd.comicbook+zip",
            ArchiveKind::Cbr => "application/vnd.comicbook-rar",
            ArchiveKind::Cb7 => "application/x-cb7",
            ArchiveKind::Epub => "application/epub+zip",
            ArchiveKind::Pdf => "application/pdf",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveKind::Cbz => "cbz",
            ArchiveKind::Cbr => "cbr",
            ArchiveKind::Cb7 => "cb7",
            ArchiveKind::Epub => "epub",
            ArchiveKind::Pdf => "pdf",
        }
    }
}

impl std::fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension().to_uppercase())
    }
}

/// Identify the container from its leading bytes.
pub fn sniff_container(header: &[u8]) -> Option<Container> {
    if header.starts_with(b"PK\x03\x04") || header.starts_with(b"PK\x05\x06") {
        return Some(Container::Zip);
    }
    if header.starts_with(b"Rar!\x1a\x07") {
        return Some(Container::Rar);
    }
    if header.starts_with(b"7z\xbc\xaf\x27\x1c") {
        return Some(Container::SevenZip);
    }
    if header.starts_with(b"%PDF-") {
        return Some(Container::Pdf);
    }
    None
}

/// Read the first bytes of `path` and identify its container.
pub fn sniff_file(path: &Path) -> std::io::Result<Option<Container>> {
    let mut header = [0u8; 8];
    let mut file = File::open(path)?;
    let n = file.read(&mut header)?;
    Ok(sniff_container(&header[..n]))
}

/// The container a comic archive should be opened with. The declared kind decides unless the
/// leading bytes identify a different comic container, in which case the content wins.
pub fn comic_container(path: &Path, kind: ArchiveKind) -> Container {
    let declared = kind.container();
    match sniff_file(path) {
        Ok(Some(actual)) if actual != declared && actual != Container::Pdf => {
            tracing::warn!(
                "{} is declared {} but looks like {:?}; opening by content",
                path.display(),
                kind,
                actual
            );
            actual
        }
        _ => declared,
    }
}

/// Media type for an archive entry, guessed from its extension.
pub fn guess_media_type(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "xhtml" | "xht" => "application/xhtml+xml",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "xml" | "opf" => "application/xml",
        "ncx" => "application/x-dtbncx+xml",
        "smil" => "application/smil+xml",
        "svg" => "image/svg+xml",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "heic" => "image/heic",
        "bmp" => "image/bmp",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "mp3" => "audio/mpeg",
        "m4a" | "mp4" => "audio/mp4",
        "txt" => "text/plain",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}
