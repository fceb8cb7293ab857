//! EPUB reader: container.xml → OPF → manifest, spine, table of contents and cover.
//! Supports both EPUB3 navigation documents and EPUB2 NCX.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader as XmlReader;
use serde::{Deserialize, Serialize};

use crate::cache::SnapshotCache;
use crate::detect::{self, ArchiveKind};
use crate::error::ReadError;
use crate::natural;
use crate::readers::{validate_page, PagedReader, ReaderOptions, ReaderStats, StatsSnapshot};
use crate::security;
use crate::zip_strategy::{StrategyDescriptor, StrategyProber, ZipContainer};

const CONTAINER_XML: &str = "META-INF/container.xml";
const NCX_MEDIA_TYPE: &str = "application/x-dtbncx+xml";

/// Label given to the synthetic root of a table of contents without a heading.
const DEFAULT_TOC_LABEL: &str = "Table of Contents";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestItem {
    pub id: String,
    /// Archive-absolute path, qualified with the package root.
    pub href: String,
    pub media_type: String,
    pub properties: BTreeSet<String>,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpineItem {
    pub idref: String,
    pub href: String,
    pub media_type: String,
    /// False for `linear="no"` itemrefs.
    pub linear: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocNode {
    pub label: String,
    /// Archive-absolute target, `#fragment` included.
    pub href: Option<String>,
    pub children: Vec<TocNode>,
}

impl TocNode {
    /// Number of nodes below this one.
    pub fn descendant_count(&self) -> usize {
        self.children
            .iter()
            .map(|c| 1 + c.descendant_count())
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpubBookInfo {
    /// Path of the OPF package document inside the archive.
    pub container_path: String,
    /// Directory of the package document, `/`-terminated (empty at the archive root).
    pub root_path: String,
    pub manifest: Vec<ManifestItem>,
    pub spine: Vec<SpineItem>,
    pub toc: Option<TocNode>,
    pub cover_path: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// Immutable scan result for one EPUB.
#[derive(Debug, Clone)]
pub struct EpubSnapshot {
    pub info: EpubBookInfo,
    pub strategy: StrategyDescriptor,
    /// Manifest hrefs in natural order.
    pub entries: Vec<String>,
    by_href: HashMap<String, usize>,
}

impl EpubSnapshot {
    fn new(info: EpubBookInfo, strategy: StrategyDescriptor) -> Self {
        let by_href = info
            .manifest
            .iter()
            .enumerate()
            .map(|(i, item)| (item.href.clone(), i))
            .collect();
        let mut entries: Vec<String> = info.manifest.iter().map(|m| m.href.clone()).collect();
        natural::sort_naturally(&mut entries, |e| e.as_str());
        Self {
            info,
            strategy,
            entries,
            by_href,
        }
    }

    pub fn manifest_item(&self, href: &str) -> Option<&ManifestItem> {
        self.by_href.get(href).map(|&i| &self.info.manifest[i])
    }

    /// Archive path for an external request. Root-relative resolution comes first; an
    /// archive-absolute manifest href outside the package directory is accepted as well.
    pub fn locate(&self, requested: &str) -> Result<String, ReadError> {
        let resolved = security::resolve_package_path(&self.info.root_path, requested)?;
        if self.is_served(&resolved) {
            return Ok(resolved);
        }
        match security::normalize_segments(&security::clean_request(requested)) {
            Some(absolute) if self.by_href.contains_key(&absolute) => Ok(absolute),
            _ => Ok(resolved),
        }
    }

    /// Resolve an externally requested path to an entry this package may serve: the OPF
    /// itself or a manifest item.
    pub fn resolve(&self, requested: &str) -> Result<String, ReadError> {
        let resolved = self.locate(requested)?;
        if self.is_served(&resolved) {
            Ok(resolved)
        } else {
            Err(ReadError::EntryNotFound(requested.to_string()))
        }
    }

    fn is_served(&self, resolved: &str) -> bool {
        resolved == self.info.container_path || self.by_href.contains_key(resolved)
    }
}

pub struct EpubReader {
    cache: SnapshotCache<EpubSnapshot>,
    prober: StrategyProber,
    stats: ReaderStats,
}

impl EpubReader {
    pub fn new(opts: &ReaderOptions) -> Self {
        Self {
            cache: SnapshotCache::new(opts.cache_capacity),
            prober: StrategyProber::for_epub(&opts.epub_charsets),
            stats: ReaderStats::default(),
        }
    }

    pub fn snapshot(&self, path: &Path) -> Result<Arc<EpubSnapshot>, ReadError> {
        if ArchiveKind::from_path(path)? != ArchiveKind::Epub {
            return Err(ReadError::UnsupportedFormat(format!(
                "{} is not an EPUB",
                path.display()
            )));
        }
        self.cache
            .get_or_scan(path, |canonical, stale| self.scan(canonical, stale))
    }

    pub fn book_info(&self, path: &Path) -> Result<EpubBookInfo, ReadError> {
        Ok(self.snapshot(path)?.info.clone())
    }

    /// Copy a package file to `sink`. `requested` is relative to the package root (a leading
    /// `/` is ignored) or already root-qualified.
    pub fn stream_file(
        &self,
        path: &Path,
        requested: &str,
        sink: &mut dyn Write,
    ) -> Result<u64, ReadError> {
        let snapshot = self.snapshot(path)?;
        let resolved = snapshot.resolve(requested)?;
        self.copy_entry(path, &snapshot, &resolved, sink)
    }

    /// Media type from the manifest, else guessed from the extension.
    pub fn content_type(&self, path: &Path, entry: &str) -> Result<String, ReadError> {
        let snapshot = self.snapshot(path)?;
        let resolved = snapshot.locate(entry)?;
        Ok(match snapshot.manifest_item(&resolved) {
            Some(item) if !item.media_type.is_empty() => item.media_type.clone(),
            _ => detect::guess_media_type(&resolved).to_string(),
        })
    }

    /// Uncompressed size from the ZIP directory, zero when unknown.
    pub fn file_size(&self, path: &Path, entry: &str) -> Result<u64, ReadError> {
        let snapshot = self.snapshot(path)?;
        let resolved = snapshot.locate(entry)?;
        Ok(snapshot
            .manifest_item(&resolved)
            .map(|item| item.size_bytes)
            .unwrap_or(0))
    }

    pub fn stream_cover(&self, path: &Path, sink: &mut dyn Write) -> Result<u64, ReadError> {
        let snapshot = self.snapshot(path)?;
        let cover = snapshot.info.cover_path.clone().ok_or_else(|| {
            ReadError::EntryNotFound(format!("{} has no cover", path.display()))
        })?;
        self.copy_entry(path, &snapshot, &cover, sink)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn cache(&self) -> &SnapshotCache<EpubSnapshot> {
        &self.cache
    }

    fn scan(&self, path: &Path, stale: Option<&EpubSnapshot>) -> Result<EpubSnapshot, ReadError> {
        let preferred = stale.map(|s| s.strategy);
        let outcome = self.prober.probe(path, preferred, |strategy| {
            let mut container = ZipContainer::open(path, strategy)?;
            parse_package(&mut container)
        })?;
        if outcome.reprobed {
            self.stats.record_probe();
        }
        self.stats.record_scan();
        tracing::debug!(
            "Scanned {}: {} manifest items, {} spine items ({})",
            path.display(),
            outcome.value.manifest.len(),
            outcome.value.spine.len(),
            outcome.strategy
        );
        Ok(EpubSnapshot::new(outcome.value, outcome.strategy))
    }

    fn copy_entry(
        &self,
        path: &Path,
        snapshot: &EpubSnapshot,
        entry: &str,
        sink: &mut dyn Write,
    ) -> Result<u64, ReadError> {
        let outcome = self.prober.probe(path, Some(snapshot.strategy), |strategy| {
            let mut container = ZipContainer::open(path, strategy)?;
            container.copy_to(entry, &mut *sink)
        })?;
        if outcome.reprobed {
            self.stats.record_probe();
        }
        Ok(outcome.value)
    }
}

impl PagedReader for EpubReader {
    /// Spine length.
    fn page_count(&self, path: &Path) -> Result<usize, ReadError> {
        Ok(self.snapshot(path)?.info.spine.len())
    }

    fn stream_page(
        &self,
        path: &Path,
        page: usize,
        sink: &mut dyn Write,
    ) -> Result<u64, ReadError> {
        let snapshot = self.snapshot(path)?;
        let index = validate_page(page, snapshot.info.spine.len())?;
        let href = snapshot.info.spine[index].href.clone();
        self.copy_entry(path, &snapshot, &href, sink)
    }
}

// --- Package parsing ---

fn parse_package(container: &mut ZipContainer) -> Result<EpubBookInfo, ReadError> {
    let container_xml = read_document(container, CONTAINER_XML)?;
    let opf_path = find_opf_path(&container_xml)?;
    let root_path = security::parent_dir(&opf_path).to_string();

    let opf_text = read_document(container, &opf_path)?;
    let opf = parse_opf(&opf_text)?;

    let mut manifest = Vec::with_capacity(opf.items.len());
    for item in opf.items {
        let href = match security::resolve_relative(&root_path, &item.href) {
            Some(href) => security::split_fragment(&href).0.to_string(),
            None => {
                tracing::warn!("Dropping manifest item '{}' with href {:?}", item.id, item.href);
                continue;
            }
        };
        let size_bytes = container.find(&href).map(|e| e.size).unwrap_or(0);
        manifest.push(ManifestItem {
            id: item.id,
            href,
            media_type: item.media_type,
            properties: item.properties,
            size_bytes,
        });
    }
    let by_id: HashMap<&str, &ManifestItem> =
        manifest.iter().map(|m| (m.id.as_str(), m)).collect();

    let mut spine = Vec::with_capacity(opf.itemrefs.len());
    for (idref, linear) in &opf.itemrefs {
        match by_id.get(idref.as_str()) {
            Some(item) => spine.push(SpineItem {
                idref: idref.clone(),
                href: item.href.clone(),
                media_type: item.media_type.clone(),
                linear: *linear,
            }),
            None => tracing::warn!("Spine itemref '{}' has no manifest item", idref),
        }
    }

    let cover_path = manifest
        .iter()
        .find(|m| m.properties.contains("cover-image"))
        .or_else(|| {
            opf.cover_id
                .as_deref()
                .and_then(|id| by_id.get(id).copied())
        })
        .map(|m| m.href.clone());

    let toc = resolve_toc(container, &manifest, opf.toc_id.as_deref());

    Ok(EpubBookInfo {
        container_path: opf_path,
        root_path,
        manifest,
        spine,
        toc,
        cover_path,
        metadata: opf.metadata,
    })
}

/// Navigation document first, then NCX. Failures degrade to no table of contents.
fn resolve_toc(
    container: &mut ZipContainer,
    manifest: &[ManifestItem],
    spine_toc_id: Option<&str>,
) -> Option<TocNode> {
    if let Some(nav) = manifest.iter().find(|m| m.properties.contains("nav")) {
        match read_document(container, &nav.href) {
            Ok(content) => {
                if let Some(toc) = parse_nav_document(&content, security::parent_dir(&nav.href))
                {
                    return Some(toc);
                }
                tracing::debug!("Navigation document {} has no usable toc", nav.href);
            }
            Err(e) => tracing::warn!("Skipping navigation document {}: {}", nav.href, e),
        }
    }

    let ncx = manifest
        .iter()
        .find(|m| m.media_type == NCX_MEDIA_TYPE)
        .or_else(|| spine_toc_id.and_then(|id| manifest.iter().find(|m| m.id == id)))?;
    match read_document(container, &ncx.href) {
        Ok(content) => parse_ncx(&content, security::parent_dir(&ncx.href)),
        Err(e) => {
            tracing::warn!("Skipping NCX {}: {}", ncx.href, e);
            None
        }
    }
}

fn read_document(container: &mut ZipContainer, name: &str) -> Result<String, ReadError> {
    let bytes = container.read_to_vec(name)?;
    decode_document(bytes, name)
}

/// Decode XML/XHTML bytes: a UTF-8 or UTF-16 byte order mark wins, then the `encoding` of the
/// XML declaration, then UTF-8.
fn decode_document(bytes: Vec<u8>, name: &str) -> Result<String, ReadError> {
    let (encoding, body) = match encoding_rs::Encoding::for_bom(&bytes) {
        Some((encoding, bom_len)) => (encoding, &bytes[bom_len..]),
        None => match declared_encoding(&bytes) {
            Some(encoding) => (encoding, &bytes[..]),
            None => {
                return String::from_utf8(bytes).map_err(|e| {
                    ReadError::malformed("EPUB", format!("Invalid UTF-8 in {name}: {e}"))
                })
            }
        },
    };
    let (text, had_errors) = encoding.decode_without_bom_handling(body);
    if had_errors {
        return Err(ReadError::malformed(
            "EPUB",
            format!("{name} is not valid {}", encoding.name()),
        ));
    }
    Ok(text.into_owned())
}

/// Encoding named by a leading `<?xml ... encoding="..."?>`, when it is ASCII-compatible.
fn declared_encoding(bytes: &[u8]) -> Option<&'static encoding_rs::Encoding> {
    let head = &bytes[..bytes.len().min(256)];
    if !head.starts_with(b"<?xml") {
        return None;
    }
    let decl = &head[..head.windows(2).position(|w| w == b"?>")?];
    let at = decl.windows(8).position(|w| w == b"encoding")?;
    let rest = skip_spaces(skip_spaces(&decl[at + 8..]).strip_prefix(b"=")?);
    let (&quote, rest) = rest.split_first()?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }
    let label = &rest[..rest.iter().position(|&b| b == quote)?];
    encoding_rs::Encoding::for_label(label).filter(|e| e.is_ascii_compatible())
}

fn skip_spaces(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    &bytes[start..]
}

fn attr_value(e: &BytesStart, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .map(|a| match a.unescape_value() {
            Ok(v) => v.into_owned(),
            Err(_) => String::from_utf8_lossy(&a.value).into_owned(),
        })
}

fn xml_error(document: &str, e: quick_xml::Error) -> ReadError {
    ReadError::malformed("EPUB", format!("Failed to parse {document}: {e}"))
}

fn find_opf_path(container_xml: &str) -> Result<String, ReadError> {
    let mut reader = XmlReader::from_str(container_xml);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e))
                if e.local_name().as_ref() == b"rootfile" =>
            {
                if let Some(path) = attr_value(e, b"full-path") {
                    let path = path.trim().trim_start_matches('/').to_string();
                    if !path.is_empty() {
                        return Ok(path);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(CONTAINER_XML, e)),
            _ => {}
        }
        buf.clear();
    }

    Err(ReadError::malformed(
        "EPUB",
        "No rootfile found in container.xml",
    ))
}

#[derive(Debug, Default)]
struct OpfDocument {
    metadata: BTreeMap<String, String>,
    items: Vec<RawItem>,
    itemrefs: Vec<(String, bool)>,
    toc_id: Option<String>,
    cover_id: Option<String>,
}

#[derive(Debug)]
struct RawItem {
    id: String,
    href: String,
    media_type: String,
    properties: BTreeSet<String>,
}

/// Dublin Core elements copied into the metadata map.
const DC_FIELDS: &[&str] = &[
    "title",
    "creator",
    "language",
    "publisher",
    "identifier",
    "description",
    "date",
    "subject",
    "rights",
];

fn parse_opf(content: &str) -> Result<OpfDocument, ReadError> {
    let mut reader = XmlReader::from_str(content);
    let mut buf = Vec::new();
    let mut opf = OpfDocument::default();

    let mut in_metadata = false;
    let mut current_field: Option<&'static str> = None;
    let mut current_text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let local = e.local_name();
                if local.as_ref() == b"metadata" {
                    in_metadata = true;
                } else if in_metadata {
                    // Only an element with content can own the text that follows.
                    current_field = DC_FIELDS
                        .iter()
                        .copied()
                        .find(|f| f.as_bytes() == local.as_ref());
                    current_text.clear();
                }
                read_opf_element(&mut opf, e, in_metadata);
            }
            Ok(Event::Empty(ref e)) => read_opf_element(&mut opf, e, in_metadata),
            Ok(Event::Text(ref e)) => {
                if current_field.is_some() {
                    current_text.push_str(&e.unescape().unwrap_or_default());
                }
            }
            Ok(Event::CData(ref e)) => {
                if current_field.is_some() {
                    current_text.push_str(&String::from_utf8_lossy(e));
                }
            }
            Ok(Event::End(ref e)) => {
                let local = e.local_name();
                if local.as_ref() == b"metadata" {
                    in_metadata = false;
                }
                if let Some(field) = current_field {
                    if local.as_ref() == field.as_bytes() {
                        add_metadata(&mut opf.metadata, field, current_text.trim());
                        current_field = None;
                        current_text.clear();
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error("OPF", e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(opf)
}

/// Collect manifest items, spine itemrefs and the EPUB2 cover hint from one element.
fn read_opf_element(opf: &mut OpfDocument, e: &BytesStart, in_metadata: bool) {
    match e.local_name().as_ref() {
        b"meta" if in_metadata => {
            // EPUB2 style: <meta name="cover" content="cover-image-id"/>
            if attr_value(e, b"name").as_deref() == Some("cover") {
                opf.cover_id = attr_value(e, b"content");
            }
        }
        b"item" if !in_metadata => {
            let id = attr_value(e, b"id").unwrap_or_default();
            let href = attr_value(e, b"href").unwrap_or_default();
            if id.is_empty() || href.is_empty() {
                tracing::warn!("Skipping manifest item without id or href");
                return;
            }
            opf.items.push(RawItem {
                id,
                href,
                media_type: attr_value(e, b"media-type").unwrap_or_default(),
                properties: attr_value(e, b"properties")
                    .map(|p| p.split_whitespace().map(str::to_string).collect())
                    .unwrap_or_default(),
            });
        }
        b"spine" => opf.toc_id = attr_value(e, b"toc"),
        b"itemref" => {
            if let Some(idref) = attr_value(e, b"idref") {
                let linear = attr_value(e, b"linear")
                    .map_or(true, |l| !l.trim().eq_ignore_ascii_case("no"));
                opf.itemrefs.push((idref, linear));
            }
        }
        _ => {}
    }
}

/// Creators accumulate; every other field keeps its first non-empty value.
fn add_metadata(metadata: &mut BTreeMap<String, String>, field: &str, value: &str) {
    if value.is_empty() {
        return;
    }
    let value = collapse_whitespace(value);
    match metadata.get_mut(field) {
        Some(existing) if field == "creator" => {
            existing.push_str(", ");
            existing.push_str(&value);
        }
        Some(_) => {}
        None => {
            metadata.insert(field.to_string(), value);
        }
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// --- Table of contents ---

/// Parse an EPUB3 navigation document: the `nav` typed `toc`, else the first `nav`.
fn parse_nav_document(content: &str, base_dir: &str) -> Option<TocNode> {
    let document = scraper::Html::parse_document(content);
    let nav_selector = scraper::Selector::parse("nav").ok()?;
    let navs: Vec<_> = document.select(&nav_selector).collect();
    let nav = navs
        .iter()
        .find(|n| {
            n.value()
                .attr("epub:type")
                .map_or(false, |t| t.split_whitespace().any(|t| t == "toc"))
        })
        .or_else(|| navs.first())?;

    let ol = nav
        .children()
        .filter_map(scraper::ElementRef::wrap)
        .find(|c| c.value().name() == "ol")
        .or_else(|| {
            let ol_selector = scraper::Selector::parse("ol").ok()?;
            nav.select(&ol_selector).next()
        })?;

    let children = parse_nav_ol(ol, base_dir);
    if children.is_empty() {
        return None;
    }

    let heading = nav
        .children()
        .filter_map(scraper::ElementRef::wrap)
        .find(|c| matches!(c.value().name(), "h1" | "h2" | "h3" | "h4" | "h5" | "h6"))
        .map(|h| collapse_whitespace(&h.text().collect::<String>()))
        .filter(|h| !h.is_empty());

    Some(TocNode {
        label: heading.unwrap_or_else(|| DEFAULT_TOC_LABEL.to_string()),
        href: None,
        children,
    })
}

fn parse_nav_ol(ol: scraper::ElementRef, base_dir: &str) -> Vec<TocNode> {
    let mut entries = Vec::new();
    for li in ol
        .children()
        .filter_map(scraper::ElementRef::wrap)
        .filter(|c| c.value().name() == "li")
    {
        let mut label = String::new();
        let mut href = None;
        let mut children = Vec::new();
        for child in li.children().filter_map(scraper::ElementRef::wrap) {
            match child.value().name() {
                "a" | "span" if label.is_empty() => {
                    label = collapse_whitespace(&child.text().collect::<String>());
                    href = child
                        .value()
                        .attr("href")
                        .and_then(|h| security::resolve_relative(base_dir, h));
                }
                "ol" => children = parse_nav_ol(child, base_dir),
                _ => {}
            }
        }
        if !label.is_empty() || !children.is_empty() {
            entries.push(TocNode {
                label,
                href,
                children,
            });
        }
    }
    entries
}

struct NcxFrame {
    label: String,
    href: Option<String>,
    children: Vec<TocNode>,
}

impl NcxFrame {
    fn new() -> Self {
        Self {
            label: String::new(),
            href: None,
            children: Vec::new(),
        }
    }
}

/// Parse an EPUB2 NCX `navMap`. Each open `navPoint` owns a frame so nested points cannot
/// overwrite their parent's label.
fn parse_ncx(content: &str, base_dir: &str) -> Option<TocNode> {
    let mut reader = XmlReader::from_str(content);
    let mut buf = Vec::new();
    let mut stack = vec![NcxFrame::new()];
    let mut doc_title = String::new();
    let mut in_doc_title = false;
    let mut in_label_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"docTitle" => in_doc_title = true,
                b"navPoint" => stack.push(NcxFrame::new()),
                b"text" => in_label_text = true,
                b"content" => set_ncx_href(&mut stack, e, base_dir),
                _ => {}
            },
            Ok(Event::Empty(ref e)) => {
                if e.local_name().as_ref() == b"content" {
                    set_ncx_href(&mut stack, e, base_dir);
                }
            }
            Ok(Event::Text(ref e)) => {
                if in_label_text {
                    let text = e.unescape().unwrap_or_default();
                    if in_doc_title {
                        doc_title.push_str(&text);
                    } else if stack.len() > 1 {
                        if let Some(frame) = stack.last_mut() {
                            frame.label.push_str(&text);
                        }
                    }
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"docTitle" => in_doc_title = false,
                b"text" => in_label_text = false,
                b"navPoint" if stack.len() > 1 => {
                    if let Some(frame) = stack.pop() {
                        let label = collapse_whitespace(&frame.label);
                        let keep = !label.is_empty() || !frame.children.is_empty();
                        if let (true, Some(parent)) = (keep, stack.last_mut()) {
                            parent.children.push(TocNode {
                                label,
                                href: frame.href,
                                children: frame.children,
                            });
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::warn!("NCX parse error: {}", e);
                return None;
            }
            _ => {}
        }
        buf.clear();
    }

    let root = stack.into_iter().next()?;
    if root.children.is_empty() {
        return None;
    }
    let title = collapse_whitespace(&doc_title);
    Some(TocNode {
        label: if title.is_empty() {
            DEFAULT_TOC_LABEL.to_string()
        } else {
            title
        },
        href: None,
        children: root.children,
    })
}

fn set_ncx_href(stack: &mut [NcxFrame], e: &BytesStart, base_dir: &str) {
    if stack.len() < 2 {
        return;
    }
    if let Some(frame) = stack.last_mut() {
        if frame.href.is_none() {
            frame.href = attr_value(e, b"src")
                .and_then(|src| security::resolve_relative(base_dir, &src));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn flatten_labels(node: &TocNode) -> Vec<&str> {
        let mut out = Vec::new();
        for child in &node.children {
            out.push(child.label.as_str());
            out.extend(flatten_labels(child));
        }
        out
    }

    #[test]
    fn test_find_opf_path() {
        let xml = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;
        assert_eq!(find_opf_path(xml).unwrap(), "OEBPS/content.opf");
        assert!(find_opf_path("<container/>").is_err());
    }

    #[test]
    fn test_parse_opf_metadata_rules() {
        let opf = r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>First  Title</dc:title>
    <dc:title>Second Title</dc:title>
    <dc:creator>Ann Author</dc:creator>
    <dc:creator>Bob Writer</dc:creator>
    <dc:language>en</dc:language>
    <meta name="cover" content="img-cover"/>
    <meta property="dcterms:modified">2024-01-01T00:00:00Z</meta>
  </metadata>
  <manifest>
    <item id="c1" href="text/ch1.xhtml" media-type="application/xhtml+xml"/>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav scripted"/>
  </manifest>
  <spine toc="ncx">
    <itemref idref="c1"/>
    <itemref idref="notes" linear="no"/>
  </spine>
</package>"#;
        let parsed = parse_opf(opf).unwrap();
        assert_eq!(parsed.metadata["title"], "First Title");
        assert_eq!(parsed.metadata["creator"], "Ann Author, Bob Writer");
        assert_eq!(parsed.metadata["language"], "en");
        assert!(!parsed.metadata.contains_key("meta"));
        assert_eq!(parsed.cover_id.as_deref(), Some("img-cover"));
        assert_eq!(parsed.toc_id.as_deref(), Some("ncx"));
        assert_eq!(parsed.items.len(), 2);
        assert!(parsed.items[1].properties.contains("nav"));
        assert_eq!(
            parsed.itemrefs,
            vec![("c1".to_string(), true), ("notes".to_string(), false)]
        );
    }

    #[test]
    fn test_parse_opf_empty_dc_element_owns_no_text() {
        let opf = r#"<package><metadata>
    <dc:subject>Fiction<dc:title/> and more</dc:subject>
    <dc:creator/>
    <dc:language>fr</dc:language>
  </metadata></package>"#;
        let parsed = parse_opf(opf).unwrap();
        assert_eq!(parsed.metadata["subject"], "Fiction and more");
        assert_eq!(parsed.metadata["language"], "fr");
        assert!(!parsed.metadata.contains_key("title"));
        assert!(!parsed.metadata.contains_key("creator"));
    }

    #[test]
    fn test_parse_opf_rejects_broken_xml() {
        let err = parse_opf("<package><manifest></spine></package>").unwrap_err();
        assert!(matches!(err, ReadError::Malformed { .. }));
    }

    #[test]
    fn test_nav_document_prefers_toc_nav() {
        let html = r##"<html xmlns:epub="http://www.idpf.org/2007/ops"><body>
<nav epub:type="landmarks"><ol><li><a href="cover.xhtml">Cover</a></li></ol></nav>
<nav epub:type="toc"><h1>Contents</h1>
  <ol>
    <li><a href="text/ch1.xhtml">Chapter 1</a>
      <ol><li><a href="text/ch1.xhtml#s1">Section  1.1</a></li></ol>
    </li>
    <li><span>Part II</span>
      <ol><li><a href="../OEBPS/text/ch2.xhtml">Chapter 2</a></li></ol>
    </li>
  </ol>
</nav></body></html>"##;
        let toc = parse_nav_document(html, "OEBPS/").unwrap();
        assert_eq!(toc.label, "Contents");
        assert_eq!(toc.children.len(), 2);
        assert_eq!(toc.children[0].href.as_deref(), Some("OEBPS/text/ch1.xhtml"));
        assert_eq!(
            toc.children[0].children[0].href.as_deref(),
            Some("OEBPS/text/ch1.xhtml#s1")
        );
        assert_eq!(toc.children[0].children[0].label, "Section 1.1");
        assert_eq!(toc.children[1].href, None);
        assert_eq!(
            toc.children[1].children[0].href.as_deref(),
            Some("OEBPS/text/ch2.xhtml")
        );
        assert_eq!(toc.descendant_count(), 4);
    }

    #[test]
    fn test_nav_without_list_is_none() {
        assert!(parse_nav_document("<html><body><p>nothing</p></body></html>", "").is_none());
        assert!(parse_nav_document("<html><body><nav><ol></ol></nav></body></html>", "").is_none());
    }

    #[test]
    fn test_ncx_nested_points_keep_labels() {
        let ncx = r#"<?xml version="1.0"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <docTitle><text>My Book</text></docTitle>
  <navMap>
    <navPoint id="p1" playOrder="1">
      <navLabel><text>Part One</text></navLabel>
      <content src="part1.xhtml"/>
      <navPoint id="p1c1" playOrder="2">
        <navLabel><text>Chapter 1</text></navLabel>
        <content src="ch1.xhtml#start"/>
      </navPoint>
    </navPoint>
    <navPoint id="p2" playOrder="3">
      <navLabel><text>Part Two</text></navLabel>
      <content src="part2.xhtml"/>
    </navPoint>
  </navMap>
</ncx>"#;
        let toc = parse_ncx(ncx, "OEBPS/").unwrap();
        assert_eq!(toc.label, "My Book");
        assert_eq!(flatten_labels(&toc), vec!["Part One", "Chapter 1", "Part Two"]);
        assert_eq!(toc.children[0].href.as_deref(), Some("OEBPS/part1.xhtml"));
        assert_eq!(
            toc.children[0].children[0].href.as_deref(),
            Some("OEBPS/ch1.xhtml#start")
        );
    }

    #[test]
    fn test_empty_ncx_is_none() {
        let ncx = r#"<ncx><navMap></navMap></ncx>"#;
        assert!(parse_ncx(ncx, "").is_none());
    }

    #[test]
    fn test_decode_document_boms() {
        let mut utf8 = vec![0xEF, 0xBB, 0xBF];
        utf8.extend_from_slice(b"<a/>");
        assert_eq!(decode_document(utf8, "x").unwrap(), "<a/>");

        let mut utf16 = vec![0xFF, 0xFE];
        for unit in "<b/>".encode_utf16() {
            utf16.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(decode_document(utf16, "x").unwrap(), "<b/>");

        assert!(decode_document(vec![0xC3, 0x28], "x").is_err());
    }

    #[test]
    fn test_decode_document_declared_encoding() {
        let latin1 = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><t>Caf\xE9</t>".to_vec();
        assert!(decode_document(latin1, "x").unwrap().ends_with("<t>Caf\u{e9}</t>"));

        let sjis = b"<?xml version='1.0' encoding = 'Shift_JIS'?><t>\x93\xfa</t>".to_vec();
        assert!(decode_document(sjis, "x").unwrap().ends_with("<t>\u{65e5}</t>"));

        // Declared UTF-8 and unknown labels decode as UTF-8.
        let utf8 = "<?xml version=\"1.0\" encoding=\"utf-8\"?><t>\u{e9}</t>".as_bytes().to_vec();
        assert!(decode_document(utf8, "x").unwrap().ends_with("<t>\u{e9}</t>"));
        let unknown = b"<?xml version=\"1.0\" encoding=\"klingon\"?><t>\xE9</t>".to_vec();
        assert!(decode_document(unknown, "x").is_err());
    }
}
