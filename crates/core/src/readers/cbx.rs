//! Comic archive reader: CBZ (ZIP), CBR (RAR) and CB7 (7z).
//!
//! The backend is chosen from the declared extension unless the leading bytes name another
//! comic container, so a ZIP saved as `.cbr` still opens as ZIP. ZIP comics go through the strategy
//! prober because their entry names are frequently written in a legacy code page; RAR and 7z
//! names are taken as the libraries report them.

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sevenz_rust::{Password, SevenZReader};
use unrar::Archive as RarArchive;

use crate::cache::SnapshotCache;
use crate::detect::{self, ArchiveKind, Container};
use crate::error::ReadError;
use crate::filter;
use crate::natural;
use crate::readers::{validate_page, PagedReader, ReaderOptions, ReaderStats, StatsSnapshot};
use crate::zip_strategy::{StrategyDescriptor, StrategyProber, ZipContainer};

/// One page image inside a comic archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CbxEntry {
    /// Decoded entry name, `/`-separated.
    pub name: String,
    pub size: u64,
}

/// Immutable scan result for one comic archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CbxSnapshot {
    pub kind: ArchiveKind,
    /// Container the archive was actually opened as.
    pub container: Container,
    /// Payload images in reading order.
    pub pages: Vec<CbxEntry>,
    /// Strategy that decoded the names (ZIP only).
    pub strategy: Option<StrategyDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub page_number: usize,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CbxBookInfo {
    pub page_info: Vec<PageInfo>,
}

pub struct CbxReader {
    cache: SnapshotCache<CbxSnapshot>,
    prober: StrategyProber,
    stats: ReaderStats,
}

impl CbxReader {
    pub fn new(opts: &ReaderOptions) -> Self {
        Self {
            cache: SnapshotCache::new(opts.cache_capacity),
            prober: StrategyProber::for_comics(&opts.cbx_charsets),
            stats: ReaderStats::default(),
        }
    }

    /// The current snapshot for `path`, scanning when missing or stale.
    pub fn snapshot(&self, path: &Path) -> Result<Arc<CbxSnapshot>, ReadError> {
        let kind = ArchiveKind::from_path(path)?;
        if !kind.is_comic() {
            return Err(ReadError::UnsupportedFormat(format!(
                "{} is not a comic archive",
                path.display()
            )));
        }
        self.cache
            .get_or_scan(path, |canonical, stale| self.scan(canonical, kind, stale))
    }

    pub fn book_info(&self, path: &Path) -> Result<CbxBookInfo, ReadError> {
        let snapshot = self.snapshot(path)?;
        let page_info = snapshot
            .pages
            .iter()
            .enumerate()
            .map(|(i, entry)| PageInfo {
                page_number: i + 1,
                display_name: filter::base_name(&entry.name).to_string(),
            })
            .collect();
        Ok(CbxBookInfo { page_info })
    }

    /// Stream a page image by its entry name. Only names that made it into the page list
    /// are served.
    pub fn stream_entry(
        &self,
        path: &Path,
        name: &str,
        sink: &mut dyn Write,
    ) -> Result<u64, ReadError> {
        let snapshot = self.snapshot(path)?;
        if !snapshot.pages.iter().any(|p| p.name == name) {
            return Err(ReadError::EntryNotFound(format!(
                "{name} in {}",
                path.display()
            )));
        }
        self.copy_entry(path, &snapshot, name, sink)
    }

    /// Media type of a page, from its extension.
    pub fn page_media_type(&self, path: &Path, page: usize) -> Result<&'static str, ReadError> {
        let snapshot = self.snapshot(path)?;
        let index = validate_page(page, snapshot.pages.len())?;
        Ok(detect::guess_media_type(&snapshot.pages[index].name))
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn cache(&self) -> &SnapshotCache<CbxSnapshot> {
        &self.cache
    }

    fn scan(
        &self,
        path: &Path,
        kind: ArchiveKind,
        stale: Option<&CbxSnapshot>,
    ) -> Result<CbxSnapshot, ReadError> {
        let container = detect::comic_container(path, kind);

        let (listed, strategy) = match container {
            Container::Zip => {
                let preferred = stale.and_then(|s| s.strategy);
                let outcome = self.prober.probe(path, preferred, |strategy| {
                    let container = ZipContainer::open(path, strategy)?;
                    Ok(container
                        .entries()
                        .iter()
                        .map(|e| (e.name.clone(), e.is_dir, e.size))
                        .collect::<Vec<_>>())
                })?;
                if outcome.reprobed {
                    self.stats.record_probe();
                }
                (outcome.value, Some(outcome.strategy))
            }
            Container::Rar => (list_rar(path)?, None),
            Container::SevenZip => (list_7z(path)?, None),
            Container::Pdf => {
                return Err(ReadError::UnsupportedFormat(path.display().to_string()))
            }
        };

        let mut pages: Vec<CbxEntry> = listed
            .into_iter()
            .filter(|(name, is_dir, _)| filter::is_payload_image(name, *is_dir))
            .map(|(name, _, size)| CbxEntry { name, size })
            .collect();
        natural::sort_naturally(&mut pages, |p| p.name.as_str());

        self.stats.record_scan();
        tracing::debug!(
            "Scanned {} ({}): {} pages",
            path.display(),
            kind,
            pages.len()
        );
        Ok(CbxSnapshot {
            kind,
            container,
            pages,
            strategy,
        })
    }

    fn copy_entry(
        &self,
        path: &Path,
        snapshot: &CbxSnapshot,
        name: &str,
        sink: &mut dyn Write,
    ) -> Result<u64, ReadError> {
        match snapshot.container {
            Container::Zip => {
                let outcome = self.prober.probe(path, snapshot.strategy, |strategy| {
                    let mut container = ZipContainer::open(path, strategy)?;
                    container.copy_to(name, &mut *sink)
                })?;
                if outcome.reprobed {
                    self.stats.record_probe();
                    tracing::warn!(
                        "Cached strategy for {} no longer works; {} succeeded",
                        path.display(),
                        outcome.strategy
                    );
                }
                Ok(outcome.value)
            }
            Container::Rar => copy_rar_entry(path, name, sink),
            Container::SevenZip => copy_7z_entry(path, name, sink),
            Container::Pdf => Err(ReadError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

impl PagedReader for CbxReader {
    fn page_count(&self, path: &Path) -> Result<usize, ReadError> {
        Ok(self.snapshot(path)?.pages.len())
    }

    fn stream_page(
        &self,
        path: &Path,
        page: usize,
        sink: &mut dyn Write,
    ) -> Result<u64, ReadError> {
        let snapshot = self.snapshot(path)?;
        let index = validate_page(page, snapshot.pages.len())?;
        let name = &snapshot.pages[index].name;
        self.copy_entry(path, &snapshot, name, sink)
    }
}

fn rar_error(e: unrar::error::UnrarError) -> ReadError {
    ReadError::malformed("RAR", e.to_string())
}

fn sevenz_error(e: sevenz_rust::Error) -> ReadError {
    ReadError::malformed("7z", e.to_string())
}

fn rar_entry_name(filename: &Path) -> String {
    filename.to_string_lossy().replace('\\', "/")
}

fn list_rar(path: &Path) -> Result<Vec<(String, bool, u64)>, ReadError> {
    let archive = RarArchive::new(path)
        .open_for_listing()
        .map_err(rar_error)?;
    let mut entries = Vec::new();
    for header in archive {
        let header = header.map_err(rar_error)?;
        entries.push((
            rar_entry_name(&header.filename),
            header.is_directory(),
            header.unpacked_size,
        ));
    }
    Ok(entries)
}

fn copy_rar_entry(path: &Path, name: &str, sink: &mut dyn Write) -> Result<u64, ReadError> {
    let mut archive = RarArchive::new(path)
        .open_for_processing()
        .map_err(rar_error)?;
    while let Some(header) = archive.read_header().map_err(rar_error)? {
        if rar_entry_name(&header.entry().filename) == name {
            let (data, _) = header.read().map_err(rar_error)?;
            sink.write_all(&data)?;
            return Ok(data.len() as u64);
        }
        archive = header.skip().map_err(rar_error)?;
    }
    Err(ReadError::EntryNotFound(format!(
        "{name} in {}",
        path.display()
    )))
}

fn list_7z(path: &Path) -> Result<Vec<(String, bool, u64)>, ReadError> {
    let reader = SevenZReader::open(path, Password::empty()).map_err(sevenz_error)?;
    Ok(reader
        .archive()
        .files
        .iter()
        .map(|f| (f.name().replace('\\', "/"), f.is_directory(), f.size()))
        .collect())
}

fn copy_7z_entry(path: &Path, name: &str, sink: &mut dyn Write) -> Result<u64, ReadError> {
    let mut reader = SevenZReader::open(path, Password::empty()).map_err(sevenz_error)?;
    let mut copied = None;
    let mut sink_error = None;
    reader
        .for_each_entries(|entry, data| {
            if entry.name().replace('\\', "/") != name {
                // Solid blocks must be consumed in order.
                io::copy(data, &mut io::sink())?;
                return Ok(true);
            }
            match io::copy(data, &mut *sink) {
                Ok(n) => copied = Some(n),
                Err(e) => sink_error = Some(e),
            }
            Ok(false)
        })
        .map_err(sevenz_error)?;

    if let Some(e) = sink_error {
        return Err(ReadError::Io(e));
    }
    copied.ok_or_else(|| ReadError::EntryNotFound(format!("{name} in {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use zip::write::SimpleFileOptions;

    fn write_cbz(path: &Path, names: &[&str]) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let opts = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for name in names {
            if name.ends_with('/') {
                zip.add_directory(name.trim_end_matches('/'), opts).unwrap();
            } else {
                zip.start_file(*name, opts).unwrap();
                zip.write_all(name.as_bytes()).unwrap();
            }
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_pages_are_filtered_and_naturally_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.cbz");
        write_cbz(
            &path,
            &[
                "p10.jpg",
                "p2.png",
                "scans/",
                "__MACOSX/._p1.jpg",
                "Thumbs.db",
                "ComicInfo.xml",
                "p1.JPG",
            ],
        );

        let reader = CbxReader::new(&ReaderOptions::default());
        let info = reader.book_info(&path).unwrap();
        let names: Vec<_> = info.page_info.iter().map(|p| p.display_name.as_str()).collect();
        assert_eq!(names, vec!["p1.JPG", "p2.png", "p10.jpg"]);
        assert_eq!(info.page_info[2].page_number, 3);
        assert_eq!(reader.available_pages(&path).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_stream_page_copies_raw_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.cbz");
        write_cbz(&path, &["a/2.jpg", "a/1.jpg"]);

        let reader = CbxReader::new(&ReaderOptions::default());
        let mut out = Vec::new();
        let n = reader.stream_page(&path, 2, &mut out).unwrap();
        assert_eq!(out, b"a/2.jpg");
        assert_eq!(n, 7);
        assert_eq!(reader.page_media_type(&path, 1).unwrap(), "image/jpeg");
    }

    #[test]
    fn test_stream_entry_rejects_unlisted_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.cbz");
        write_cbz(&path, &["1.jpg", "notes.txt"]);

        let reader = CbxReader::new(&ReaderOptions::default());
        let mut out = Vec::new();
        reader.stream_entry(&path, "1.jpg", &mut out).unwrap();
        assert_eq!(out, b"1.jpg");
        let err = reader.stream_entry(&path, "notes.txt", &mut Vec::new()).unwrap_err();
        assert!(matches!(err, ReadError::EntryNotFound(_)));
    }

    #[test]
    fn test_non_comic_extension_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.epub");
        write_cbz(&path, &["1.jpg"]);
        let reader = CbxReader::new(&ReaderOptions::default());
        let err = reader.book_info(&path).unwrap_err();
        assert!(matches!(err, ReadError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_zip_named_cbr_opens_as_zip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mislabeled.cbr");
        write_cbz(&path, &["2.jpg", "1.jpg"]);
        let reader = CbxReader::new(&ReaderOptions::default());

        let snapshot = reader.snapshot(&path).unwrap();
        assert_eq!(snapshot.kind, ArchiveKind::Cbr);
        assert_eq!(snapshot.container, Container::Zip);
        assert!(snapshot.strategy.is_some());
        assert_eq!(reader.available_pages(&path).unwrap(), vec![1, 2]);

        let mut out = Vec::new();
        reader.stream_page(&path, 2, &mut out).unwrap();
        assert_eq!(out, b"2.jpg");
        reader.stream_entry(&path, "1.jpg", &mut out).unwrap();
        assert_eq!(out, b"2.jpg1.jpg");
    }

    #[test]
    fn test_unreadable_cbr_still_goes_to_unrar() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.cbr");
        std::fs::write(&path, b"not an archive at all").unwrap();
        let reader = CbxReader::new(&ReaderOptions::default());
        let err = reader.book_info(&path).unwrap_err();
        assert!(matches!(err, ReadError::Malformed { .. }), "{err:?}");
    }
}
