//! One entry point for every supported book format.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::detect::ArchiveKind;
use crate::error::ReadError;
use crate::readers::cbx::{CbxBookInfo, CbxReader};
use crate::readers::epub::{EpubBookInfo, EpubReader};
use crate::readers::pdf::{PageRasterizer, PdfBookInfo, PdfReader};
use crate::readers::{PagedReader, ReaderOptions, StatsSnapshot};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "lowercase")]
pub enum BookInfo {
    Cbx(CbxBookInfo),
    Epub(EpubBookInfo),
    Pdf(PdfBookInfo),
}

impl BookInfo {
    /// Pages a paged viewer would show: images, spine items or PDF pages.
    pub fn page_count(&self) -> usize {
        match self {
            BookInfo::Cbx(info) => info.page_info.len(),
            BookInfo::Epub(info) => info.spine.len(),
            BookInfo::Pdf(info) => info.page_count,
        }
    }
}

/// Owns one reader (and so one snapshot cache) per format family.
pub struct BookReader {
    cbx: CbxReader,
    epub: EpubReader,
    pdf: PdfReader,
}

impl BookReader {
    pub fn new(opts: &ReaderOptions) -> Self {
        Self {
            cbx: CbxReader::new(opts),
            epub: EpubReader::new(opts),
            pdf: PdfReader::new(opts),
        }
    }

    /// Use a custom PDF rasterizer instead of PDFium.
    pub fn with_rasterizer(opts: &ReaderOptions, rasterizer: Box<dyn PageRasterizer>) -> Self {
        Self {
            cbx: CbxReader::new(opts),
            epub: EpubReader::new(opts),
            pdf: PdfReader::with_rasterizer(opts, rasterizer),
        }
    }

    pub fn cbx(&self) -> &CbxReader {
        &self.cbx
    }

    pub fn epub(&self) -> &EpubReader {
        &self.epub
    }

    pub fn pdf(&self) -> &PdfReader {
        &self.pdf
    }

    fn paged(&self, kind: ArchiveKind) -> &dyn PagedReader {
        match kind {
            ArchiveKind::Cbz | ArchiveKind::Cbr | ArchiveKind::Cb7 => &self.cbx,
            ArchiveKind::Epub => &self.epub,
            ArchiveKind::Pdf => &self.pdf,
        }
    }

    pub fn available_pages(&self, path: &Path) -> Result<Vec<usize>, ReadError> {
        let kind = ArchiveKind::from_path(path)?;
        self.paged(kind).available_pages(path)
    }

    pub fn stream_page(
        &self,
        path: &Path,
        page: usize,
        sink: &mut dyn Write,
    ) -> Result<u64, ReadError> {
        let kind = ArchiveKind::from_path(path)?;
        self.paged(kind).stream_page(path, page, sink)
    }

    pub fn book_info(&self, path: &Path) -> Result<BookInfo, ReadError> {
        Ok(match ArchiveKind::from_path(path)? {
            ArchiveKind::Cbz | ArchiveKind::Cbr | ArchiveKind::Cb7 => {
                BookInfo::Cbx(self.cbx.book_info(path)?)
            }
            ArchiveKind::Epub => BookInfo::Epub(self.epub.book_info(path)?),
            ArchiveKind::Pdf => BookInfo::Pdf(self.pdf.book_info(path)?),
        })
    }

    /// Stream a named entry: a page image for comics, a package file for EPUB.
    pub fn stream_entry(
        &self,
        path: &Path,
        name: &str,
        sink: &mut dyn Write,
    ) -> Result<u64, ReadError> {
        match ArchiveKind::from_path(path)? {
            ArchiveKind::Cbz | ArchiveKind::Cbr | ArchiveKind::Cb7 => {
                self.cbx.stream_entry(path, name, sink)
            }
            ArchiveKind::Epub => self.epub.stream_file(path, name, sink),
            ArchiveKind::Pdf => Err(ReadError::UnsupportedFormat(format!(
                "{} has no named entries",
                path.display()
            ))),
        }
    }

    /// Counters for the reader that handles `kind`.
    pub fn stats(&self, kind: ArchiveKind) -> StatsSnapshot {
        match kind {
            ArchiveKind::Cbz | ArchiveKind::Cbr | ArchiveKind::Cb7 => self.cbx.stats(),
            ArchiveKind::Epub => self.epub.stats(),
            ArchiveKind::Pdf => self.pdf.stats(),
        }
    }

    /// Drop every cached snapshot.
    pub fn clear_caches(&self) {
        self.cbx.cache().clear();
        self.epub.cache().clear();
        self.pdf.cache().clear();
    }
}

impl Default for BookReader {
    fn default() -> Self {
        Self::new(&ReaderOptions::default())
    }
}
