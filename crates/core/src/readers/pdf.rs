//! PDF reader: page count, outline and document info via `lopdf`; page images via PDFium.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbImage, RgbaImage};
use lopdf::{Dictionary, Document, Object, ObjectId};
use pdfium_render::prelude::{PdfRenderConfig, Pdfium};
use serde::{Deserialize, Serialize};

use crate::cache::SnapshotCache;
use crate::detect::ArchiveKind;
use crate::error::ReadError;
use crate::readers::{
    validate_page, PagedReader, ReaderOptions, ReaderStats, RenderOptions, StatsSnapshot,
};

/// Outline nesting below this depth is ignored.
const MAX_OUTLINE_DEPTH: usize = 64;
/// Reference chains longer than this are treated as broken.
const MAX_DEREF: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdfOutlineNode {
    pub title: String,
    /// 1-based target page, when the destination resolves.
    pub page_number: Option<u32>,
    pub children: Vec<PdfOutlineNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdfBookInfo {
    pub page_count: usize,
    pub outline: Vec<PdfOutlineNode>,
    /// Document information dictionary entries, keyed in lowercase.
    pub metadata: BTreeMap<String, String>,
}

/// Renders one page of a PDF file to an RGB bitmap.
pub trait PageRasterizer: Send + Sync {
    /// `page_index` is 0-based.
    fn render(
        &self,
        path: &Path,
        page_index: usize,
        opts: &RenderOptions,
    ) -> Result<RgbImage, ReadError>;
}

/// [`PageRasterizer`] backed by the PDFium shared library.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRasterizer {
    library: Option<PathBuf>,
}

impl PdfiumRasterizer {
    /// Bind to `library` when given, otherwise to the system PDFium.
    pub fn new(library: Option<PathBuf>) -> Self {
        Self { library }
    }
}

fn render_error(e: impl std::fmt::Display) -> ReadError {
    ReadError::Render(e.to_string())
}

impl PageRasterizer for PdfiumRasterizer {
    fn render(
        &self,
        path: &Path,
        page_index: usize,
        opts: &RenderOptions,
    ) -> Result<RgbImage, ReadError> {
        let bindings = match &self.library {
            Some(library) => Pdfium::bind_to_library(library),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(render_error)?;
        let pdfium = Pdfium::new(bindings);

        let document = pdfium.load_pdf_from_file(path, None).map_err(render_error)?;
        let index = page_index
            .try_into()
            .map_err(|_| render_error(format!("page index {page_index} is too large")))?;
        let page = document.pages().get(index).map_err(render_error)?;

        let config = PdfRenderConfig::new().scale_page_by_factor(opts.dpi as f32 / 72.0);
        let bitmap = page.render_with_config(&config).map_err(render_error)?;
        let (width, height) = (bitmap.width() as u32, bitmap.height() as u32);
        let rgba = RgbaImage::from_raw(width, height, bitmap.as_rgba_bytes())
            .ok_or_else(|| render_error("PDFium returned a short bitmap"))?;
        Ok(DynamicImage::ImageRgba8(rgba).to_rgb8())
    }
}

#[derive(Debug, Clone)]
pub struct PdfSnapshot {
    pub info: PdfBookInfo,
}

pub struct PdfReader {
    cache: SnapshotCache<PdfSnapshot>,
    rasterizer: Box<dyn PageRasterizer>,
    render: RenderOptions,
    stats: ReaderStats,
}

impl PdfReader {
    pub fn new(opts: &ReaderOptions) -> Self {
        Self::with_rasterizer(
            opts,
            Box::new(PdfiumRasterizer::new(opts.pdfium_library.clone())),
        )
    }

    pub fn with_rasterizer(opts: &ReaderOptions, rasterizer: Box<dyn PageRasterizer>) -> Self {
        Self {
            cache: SnapshotCache::new(opts.cache_capacity),
            rasterizer,
            render: opts.render,
            stats: ReaderStats::default(),
        }
    }

    pub fn snapshot(&self, path: &Path) -> Result<Arc<PdfSnapshot>, ReadError> {
        if ArchiveKind::from_path(path)? != ArchiveKind::Pdf {
            return Err(ReadError::UnsupportedFormat(format!(
                "{} is not a PDF",
                path.display()
            )));
        }
        self.cache.get_or_scan(path, |canonical, _| {
            let info = scan_pdf(canonical)?;
            self.stats.record_scan();
            tracing::debug!(
                "Scanned {}: {} pages, {} outline roots",
                canonical.display(),
                info.page_count,
                info.outline.len()
            );
            Ok(PdfSnapshot { info })
        })
    }

    pub fn book_info(&self, path: &Path) -> Result<PdfBookInfo, ReadError> {
        Ok(self.snapshot(path)?.info.clone())
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn cache(&self) -> &SnapshotCache<PdfSnapshot> {
        &self.cache
    }
}

impl PagedReader for PdfReader {
    fn page_count(&self, path: &Path) -> Result<usize, ReadError> {
        Ok(self.snapshot(path)?.info.page_count)
    }

    /// Rasterize the page and write it as a JPEG. The image is fully encoded before the first
    /// byte reaches `sink`.
    fn stream_page(
        &self,
        path: &Path,
        page: usize,
        sink: &mut dyn Write,
    ) -> Result<u64, ReadError> {
        let snapshot = self.snapshot(path)?;
        let index = validate_page(page, snapshot.info.page_count)?;

        let image = self.rasterizer.render(path, index, &self.render)?;
        let mut encoded = Vec::new();
        JpegEncoder::new_with_quality(&mut encoded, self.render.jpeg_quality)
            .encode_image(&image)
            .map_err(render_error)?;

        sink.write_all(&encoded)?;
        Ok(encoded.len() as u64)
    }
}

fn pdf_error(e: lopdf::Error) -> ReadError {
    ReadError::malformed("PDF", e.to_string())
}

fn scan_pdf(path: &Path) -> Result<PdfBookInfo, ReadError> {
    let doc = Document::load(path).map_err(pdf_error)?;
    let pages = doc.get_pages();
    let page_ids: HashMap<ObjectId, u32> = pages.iter().map(|(&n, &id)| (id, n)).collect();

    let walker = OutlineWalker {
        doc: &doc,
        page_ids: &page_ids,
        catalog: catalog(&doc),
    };
    let outline = walker.outline();

    Ok(PdfBookInfo {
        page_count: pages.len(),
        outline,
        metadata: info_metadata(&doc),
    })
}

fn catalog(doc: &Document) -> Option<&Dictionary> {
    let root = doc.trailer.get(b"Root").ok()?;
    resolve(doc, root).as_dict().ok()
}

/// Follow indirect references until a direct object is reached.
fn resolve<'a>(doc: &'a Document, mut obj: &'a Object) -> &'a Object {
    for _ in 0..MAX_DEREF {
        match obj {
            Object::Reference(id) => match doc.get_object(*id) {
                Ok(next) => obj = next,
                Err(_) => return obj,
            },
            _ => return obj,
        }
    }
    obj
}

/// Decode a PDF text string: UTF-16BE or UTF-8 with a byte order mark, else PDFDocEncoding
/// (read as Latin-1).
fn decode_text(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(rest).into_owned();
    }
    bytes.iter().map(|&b| char::from(b)).collect()
}

fn text_of(doc: &Document, obj: &Object) -> Option<String> {
    match resolve(doc, obj) {
        Object::String(bytes, _) => Some(decode_text(bytes)),
        Object::Name(name) => Some(String::from_utf8_lossy(name).into_owned()),
        _ => None,
    }
}

const INFO_KEYS: &[&str] = &["Title", "Author", "Subject", "Keywords", "Creator", "Producer"];

fn info_metadata(doc: &Document) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    let Some(info) = doc
        .trailer
        .get(b"Info")
        .ok()
        .and_then(|o| resolve(doc, o).as_dict().ok())
    else {
        return metadata;
    };
    for key in INFO_KEYS {
        let value = info
            .get(key.as_bytes())
            .ok()
            .and_then(|o| text_of(doc, o))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        if let Some(value) = value {
            metadata.insert(key.to_lowercase(), value);
        }
    }
    metadata
}

struct OutlineWalker<'a> {
    doc: &'a Document,
    page_ids: &'a HashMap<ObjectId, u32>,
    catalog: Option<&'a Dictionary>,
}

impl<'a> OutlineWalker<'a> {
    fn outline(&self) -> Vec<PdfOutlineNode> {
        let first = self
            .catalog
            .and_then(|c| c.get(b"Outlines").ok())
            .and_then(|o| resolve(self.doc, o).as_dict().ok())
            .and_then(|outlines| outlines.get(b"First").ok())
            .and_then(|f| f.as_reference().ok());
        let mut visited = HashSet::new();
        self.siblings(first, 0, &mut visited)
    }

    fn siblings(
        &self,
        first: Option<ObjectId>,
        depth: usize,
        visited: &mut HashSet<ObjectId>,
    ) -> Vec<PdfOutlineNode> {
        let mut nodes = Vec::new();
        let mut current = first;
        while let Some(id) = current {
            if !visited.insert(id) {
                tracing::warn!("Outline item {:?} revisited, cutting the cycle", id);
                break;
            }
            let Ok(item) = self.doc.get_dictionary(id) else {
                break;
            };
            current = item.get(b"Next").and_then(Object::as_reference).ok();

            let title = item
                .get(b"Title")
                .ok()
                .and_then(|t| text_of(self.doc, t))
                .map(|t| t.trim().to_string())
                .unwrap_or_default();
            if title.is_empty() {
                continue;
            }

            let children = match item.get(b"First").and_then(Object::as_reference) {
                Ok(child) if depth + 1 < MAX_OUTLINE_DEPTH => {
                    self.siblings(Some(child), depth + 1, visited)
                }
                _ => Vec::new(),
            };
            nodes.push(PdfOutlineNode {
                title,
                page_number: self.item_page(item),
                children,
            });
        }
        nodes
    }

    fn item_page(&self, item: &Dictionary) -> Option<u32> {
        if let Ok(dest) = item.get(b"Dest") {
            return self.dest_page(dest, 0);
        }
        let action = resolve(self.doc, item.get(b"A").ok()?).as_dict().ok()?;
        let kind = action.get(b"S").and_then(Object::as_name).ok()?;
        if kind != b"GoTo" {
            return None;
        }
        self.dest_page(action.get(b"D").ok()?, 0)
    }

    fn dest_page(&self, dest: &Object, depth: usize) -> Option<u32> {
        if depth > MAX_DEREF {
            return None;
        }
        match resolve(self.doc, dest) {
            Object::Array(parts) => match parts.first()? {
                Object::Reference(page_id) => self.page_ids.get(page_id).copied(),
                Object::Integer(index) if *index >= 0 => u32::try_from(*index + 1).ok(),
                _ => None,
            },
            Object::Dictionary(d) => self.dest_page(d.get(b"D").ok()?, depth + 1),
            Object::Name(name) => self.named_dest(name, depth),
            Object::String(name, _) => self.named_dest(name, depth),
            _ => None,
        }
    }

    /// Look up a named destination in the catalog's `/Dests` dictionary, then in the
    /// `/Names` `/Dests` name tree.
    fn named_dest(&self, name: &[u8], depth: usize) -> Option<u32> {
        let catalog = self.catalog?;
        if let Some(target) = catalog
            .get(b"Dests")
            .ok()
            .and_then(|d| resolve(self.doc, d).as_dict().ok())
            .and_then(|d| d.get(name).ok())
        {
            return self.dest_page(target, depth + 1);
        }
        let tree = catalog
            .get(b"Names")
            .ok()
            .and_then(|n| resolve(self.doc, n).as_dict().ok())
            .and_then(|n| n.get(b"Dests").ok())
            .and_then(|d| resolve(self.doc, d).as_dict().ok())?;
        let target = self.search_name_tree(tree, name, 0)?;
        self.dest_page(target, depth + 1)
    }

    fn search_name_tree(&self, node: &'a Dictionary, name: &[u8], depth: usize) -> Option<&'a Object> {
        if depth > MAX_OUTLINE_DEPTH {
            return None;
        }
        if let Ok(names) = node.get(b"Names").and_then(Object::as_array) {
            for pair in names.chunks_exact(2) {
                if let Object::String(key, _) = resolve(self.doc, &pair[0]) {
                    if key.as_slice() == name {
                        return Some(&pair[1]);
                    }
                }
            }
        }
        let kids = node.get(b"Kids").and_then(Object::as_array).ok()?;
        kids.iter().find_map(|kid| {
            let kid = resolve(self.doc, kid).as_dict().ok()?;
            self.search_name_tree(kid, name, depth + 1)
        })
    }
}
