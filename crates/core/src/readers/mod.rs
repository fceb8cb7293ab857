//! Format readers. Each owns a snapshot cache and exposes the paged view of its format.

pub mod cbx;
pub mod epub;
pub mod pdf;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_CAPACITY;
use crate::encoding::Charset;
use crate::error::ReadError;
use crate::zip_strategy::{COMIC_CHARSETS, EPUB_CHARSETS};

/// A book that can be addressed by 1-based page number.
pub trait PagedReader: Send + Sync {
    /// Number of pages, scanning the file if its snapshot is missing or stale.
    fn page_count(&self, path: &Path) -> Result<usize, ReadError>;

    /// Copy page `page` (1-based) to `sink`, returning the number of bytes written.
    fn stream_page(&self, path: &Path, page: usize, sink: &mut dyn Write)
        -> Result<u64, ReadError>;

    /// Page numbers `1..=N`.
    fn available_pages(&self, path: &Path) -> Result<Vec<usize>, ReadError> {
        Ok((1..=self.page_count(path)?).collect())
    }
}

/// Check a 1-based page number against `count` and return the 0-based index.
pub fn validate_page(page: usize, count: usize) -> Result<usize, ReadError> {
    if page == 0 || page > count {
        return Err(ReadError::page_out_of_range(page, count));
    }
    Ok(page - 1)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReaderOptions {
    pub cache_capacity: usize,
    pub cbx_charsets: Vec<Charset>,
    pub epub_charsets: Vec<Charset>,
    pub render: RenderOptions,
    pub pdfium_library: Option<PathBuf>,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CAPACITY,
            cbx_charsets: COMIC_CHARSETS.to_vec(),
            epub_charsets: EPUB_CHARSETS.to_vec(),
            render: RenderOptions::default(),
            pdfium_library: None,
        }
    }
}

/// PDF rasterization settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderOptions {
    pub dpi: u32,
    pub jpeg_quality: u8,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            dpi: 200,
            jpeg_quality: 90,
        }
    }
}

/// Counters shared by a reader's scan and open paths.
#[derive(Debug, Default)]
pub struct ReaderStats {
    scans: AtomicU64,
    probes: AtomicU64,
}

/// Point-in-time copy of [`ReaderStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Full scans that produced a new snapshot.
    pub scans: u64,
    /// Opens that had to walk the candidate list because no cached strategy worked.
    pub probes: u64,
}

impl ReaderStats {
    pub(crate) fn record_scan(&self) {
        self.scans.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_probe(&self) {
        self.probes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            scans: self.scans.load(Ordering::Relaxed),
            probes: self.probes.load(Ordering::Relaxed),
        }
    }
}
