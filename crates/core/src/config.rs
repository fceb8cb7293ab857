//! Config file parsing for `~/.config/folio/config.toml`.
//!
//! Use `reader_options_from_config` to build reader options from the loaded config so cache,
//! charset and rendering settings apply.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_CAPACITY;
use crate::encoding::Charset;
use crate::readers::{ReaderOptions, RenderOptions};
use crate::zip_strategy::{COMIC_CHARSETS, EPUB_CHARSETS};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub cbx: CbxConfig,
    #[serde(default)]
    pub epub: EpubConfig,
    #[serde(default)]
    pub pdf: PdfConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Snapshots kept per reader before least-recently-accessed eviction.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CbxConfig {
    /// Entry-name charsets tried for ZIP comics, in order.
    #[serde(default = "default_cbx_charsets")]
    pub charsets: Vec<Charset>,
}

fn default_cbx_charsets() -> Vec<Charset> {
    COMIC_CHARSETS.to_vec()
}

impl Default for CbxConfig {
    fn default() -> Self {
        Self {
            charsets: default_cbx_charsets(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpubConfig {
    #[serde(default = "default_epub_charsets")]
    pub charsets: Vec<Charset>,
}

fn default_epub_charsets() -> Vec<Charset> {
    EPUB_CHARSETS.to_vec()
}

impl Default for EpubConfig {
    fn default() -> Self {
        Self {
            charsets: default_epub_charsets(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdfConfig {
    #[serde(default = "default_dpi")]
    pub dpi: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    /// Explicit PDFium shared library; the system library is used when unset.
    pub pdfium_library: Option<PathBuf>,
}

fn default_dpi() -> u32 {
    200
}
fn default_jpeg_quality() -> u8 {
    90
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self {
            dpi: default_dpi(),
            jpeg_quality: default_jpeg_quality(),
            pdfium_library: None,
        }
    }
}

/// Load config from the default path (`~/.config/folio/config.toml`).
pub fn load_config() -> AppConfig {
    match config_path() {
        Some(path) => load_config_from(&path),
        None => AppConfig::default(),
    }
}

/// Load config from `path`, falling back to defaults when it is missing or unparsable.
pub fn load_config_from(path: &Path) -> AppConfig {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return AppConfig::default(),
    };

    match toml::from_str::<AppConfig>(&content) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("Ignoring invalid config {}: {}", path.display(), e);
            AppConfig::default()
        }
    }
}

/// Return the default config file path (for init and show).
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|mut p| {
        p.push("folio");
        p.push("config.toml");
        p
    })
}

/// Build reader options from the full app config. Empty charset lists fall back to the
/// built-in order.
pub fn reader_options_from_config(cfg: &AppConfig) -> ReaderOptions {
    let defaults = ReaderOptions::default();
    ReaderOptions {
        cache_capacity: cfg.cache.capacity.max(1),
        cbx_charsets: if cfg.cbx.charsets.is_empty() {
            defaults.cbx_charsets
        } else {
            cfg.cbx.charsets.clone()
        },
        epub_charsets: if cfg.epub.charsets.is_empty() {
            defaults.epub_charsets
        } else {
            cfg.epub.charsets.clone()
        },
        render: RenderOptions {
            dpi: cfg.pdf.dpi.clamp(36, 1200),
            jpeg_quality: cfg.pdf.jpeg_quality.clamp(1, 100),
        },
        pdfium_library: cfg.pdf.pdfium_library.clone(),
    }
}
