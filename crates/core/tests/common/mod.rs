//! Fixture builders shared by the integration tests.
#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};

use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use zip::write::SimpleFileOptions;

/// One entry of a hand-built stored ZIP, with the raw name bytes as written to the headers.
pub struct RawEntry {
    pub name: Vec<u8>,
    pub data: Vec<u8>,
    pub extra: Vec<u8>,
}

impl RawEntry {
    pub fn new(name: impl Into<Vec<u8>>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
            extra: Vec::new(),
        }
    }

    /// Attach an Info-ZIP Unicode Path extra field carrying `utf8_name`.
    pub fn with_unicode_path(mut self, utf8_name: &str) -> Self {
        let mut body = vec![1u8];
        body.extend_from_slice(&crc32fast::hash(&self.name).to_le_bytes());
        body.extend_from_slice(utf8_name.as_bytes());
        self.extra.extend_from_slice(&0x7075u16.to_le_bytes());
        self.extra.extend_from_slice(&(body.len() as u16).to_le_bytes());
        self.extra.extend_from_slice(&body);
        self
    }
}

fn local_header(out: &mut Vec<u8>, entry: &RawEntry) {
    let crc = crc32fast::hash(&entry.data);
    out.extend_from_slice(&0x04034b50u32.to_le_bytes());
    out.extend_from_slice(&20u16.to_le_bytes()); // version needed
    out.extend_from_slice(&0u16.to_le_bytes()); // flags: no UTF-8 bit
    out.extend_from_slice(&0u16.to_le_bytes()); // stored
    out.extend_from_slice(&0u16.to_le_bytes()); // time
    out.extend_from_slice(&0x21u16.to_le_bytes()); // date: 1980-01-01
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(&(entry.data.len() as u32).to_le_bytes());
    out.extend_from_slice(&(entry.data.len() as u32).to_le_bytes());
    out.extend_from_slice(&(entry.name.len() as u16).to_le_bytes());
    out.extend_from_slice(&(entry.extra.len() as u16).to_le_bytes());
    out.extend_from_slice(&entry.name);
    out.extend_from_slice(&entry.extra);
    out.extend_from_slice(&entry.data);
}

/// A well-formed stored ZIP with a central directory.
pub fn stored_zip(entries: &[RawEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut offsets = Vec::new();
    for entry in entries {
        offsets.push(out.len() as u32);
        local_header(&mut out, entry);
    }

    let cd_start = out.len() as u32;
    for (entry, offset) in entries.iter().zip(&offsets) {
        let crc = crc32fast::hash(&entry.data);
        out.extend_from_slice(&0x02014b50u32.to_le_bytes());
        out.extend_from_slice(&20u16.to_le_bytes()); // made by
        out.extend_from_slice(&20u16.to_le_bytes()); // needed
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0x21u16.to_le_bytes());
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&(entry.data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(entry.data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(entry.name.len() as u16).to_le_bytes());
        out.extend_from_slice(&(entry.extra.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // comment
        out.extend_from_slice(&0u16.to_le_bytes()); // disk
        out.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
        out.extend_from_slice(&0u32.to_le_bytes()); // external attrs
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&entry.name);
        out.extend_from_slice(&entry.extra);
    }
    let cd_size = out.len() as u32 - cd_start;

    out.extend_from_slice(&0x06054b50u32.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    out.extend_from_slice(&cd_size.to_le_bytes());
    out.extend_from_slice(&cd_start.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}

/// Local headers only, followed by a truncated central directory and no end record: only
/// a sequential local-header walk can read it.
pub fn local_headers_only(entries: &[RawEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    for entry in entries {
        local_header(&mut out, entry);
    }
    out.extend_from_slice(b"PK\x01\x02");
    out.extend_from_slice(&[0u8; 42]);
    out
}

pub fn shift_jis(s: &str) -> Vec<u8> {
    encoding_rs::SHIFT_JIS.encode(s).0.into_owned()
}

pub fn write(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

/// Move a file's mtime to `secs` after the epoch.
pub fn set_mtime(path: &Path, secs: i64) {
    filetime::set_file_mtime(path, filetime::FileTime::from_unix_time(secs, 0)).unwrap();
}

// --- EPUB ---

pub const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

pub fn chapter(title: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml"><head><title>{title}</title></head>
<body><h1>{title}</h1><p>Text of {title}.</p></body></html>"#
    )
}

pub const NAV_XHTML: &str = r##"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head><title>Navigation</title></head>
<body>
  <nav epub:type="toc"><h1>Contents</h1>
    <ol>
      <li><a href="chapter1.xhtml">Chapter One</a>
        <ol><li><a href="chapter1.xhtml#part2">Part Two</a></li></ol>
      </li>
      <li><a href="chapter2.xhtml">Chapter Two</a></li>
    </ol>
  </nav>
</body></html>"##;

pub const TOC_NCX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head><meta name="dtb:uid" content="urn:uuid:1234"/></head>
  <docTitle><text>Legacy Book</text></docTitle>
  <navMap>
    <navPoint id="np1" playOrder="1">
      <navLabel><text>Chapter One</text></navLabel>
      <content src="chapter1.xhtml"/>
    </navPoint>
    <navPoint id="np2" playOrder="2">
      <navLabel><text>Chapter Two</text></navLabel>
      <content src="chapter2.xhtml"/>
    </navPoint>
  </navMap>
</ncx>"#;

/// OPF for the standard fixture. `with_nav` adds an EPUB3 navigation document.
pub fn opf(with_nav: bool) -> String {
    let nav_item = if with_nav {
        r#"<item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>"#
    } else {
        ""
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="uid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="uid">urn:uuid:1234</dc:identifier>
    <dc:title>Fixture Book</dc:title>
    <dc:creator>Ada Lovelace</dc:creator>
    <dc:creator>Charles Babbage</dc:creator>
    <dc:language>en</dc:language>
    <dc:publisher>Analytical Press</dc:publisher>
    <meta name="cover" content="cover-img"/>
  </metadata>
  <manifest>
    {nav_item}
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
    <item id="ch2" href="chapter2.xhtml" media-type="application/xhtml+xml"/>
    <item id="ch1" href="chapter1.xhtml" media-type="application/xhtml+xml"/>
    <item id="notes" href="notes.xhtml" media-type="application/xhtml+xml"/>
    <item id="cover-img" href="images/cover.png" media-type="image/png"/>
    <item id="css" href="style/main.css" media-type="text/css"/>
  </manifest>
  <spine toc="ncx">
    <itemref idref="ch1"/>
    <itemref idref="ch2"/>
    <itemref idref="notes" linear="no"/>
    <itemref idref="missing"/>
  </spine>
</package>"#
    )
}

pub const COVER_PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake-cover";

/// Write an EPUB with the standard fixture content.
pub fn write_epub(dir: &Path, name: &str, with_nav: bool) -> PathBuf {
    let mut files: Vec<(&str, Vec<u8>)> = vec![
        ("META-INF/container.xml", CONTAINER_XML.as_bytes().to_vec()),
        ("OEBPS/content.opf", opf(with_nav).into_bytes()),
        ("OEBPS/toc.ncx", TOC_NCX.as_bytes().to_vec()),
        ("OEBPS/chapter1.xhtml", chapter("Chapter One").into_bytes()),
        ("OEBPS/chapter2.xhtml", chapter("Chapter Two").into_bytes()),
        ("OEBPS/notes.xhtml", chapter("Notes").into_bytes()),
        ("OEBPS/images/cover.png", COVER_PNG.to_vec()),
        ("OEBPS/style/main.css", b"body { margin: 0 }".to_vec()),
    ];
    if with_nav {
        files.push(("OEBPS/nav.xhtml", NAV_XHTML.as_bytes().to_vec()));
    }
    write_epub_files(dir, name, &files)
}

pub fn write_epub_files(dir: &Path, name: &str, files: &[(&str, Vec<u8>)]) -> PathBuf {
    let path = dir.join(name);
    let file = std::fs::File::create(&path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let stored = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    let deflated =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    zip.start_file("mimetype", stored).unwrap();
    zip.write_all(b"application/epub+zip").unwrap();
    for (entry, data) in files {
        zip.start_file(*entry, deflated).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
    path
}

/// Write a simple CBZ whose entries contain their own names as data.
pub fn write_cbz(dir: &Path, name: &str, entries: &[&str]) -> PathBuf {
    let path = dir.join(name);
    let file = std::fs::File::create(&path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let opts = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for entry in entries {
        zip.start_file(*entry, opts).unwrap();
        zip.write_all(entry.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
    path
}

// --- PDF ---

/// Page object ids of a generated PDF, 0-based.
pub struct PdfFixture {
    pub path: PathBuf,
    pub pages: Vec<ObjectId>,
}

/// A PDF with `page_count` empty pages. `decorate` may add objects and catalog entries
/// (outlines, name trees) before the file is saved.
pub fn write_pdf<F>(dir: &Path, name: &str, page_count: usize, decorate: F) -> PdfFixture
where
    F: FnOnce(&mut Document, &[ObjectId], &mut Dictionary),
{
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut page_ids = Vec::new();
    for _ in 0..page_count {
        let content_id = doc.add_object(Stream::new(Dictionary::new(), Vec::new()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 200.into(), 300.into()],
            "Contents" => content_id,
        });
        page_ids.push(page_id);
    }
    let kids: Vec<Object> = page_ids.iter().map(|&id| id.into()).collect();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count as i64,
        }),
    );

    let mut catalog = dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    };
    decorate(&mut doc, &page_ids, &mut catalog);
    let catalog_id = doc.add_object(catalog);
    doc.trailer.set("Root", catalog_id);

    let info_id = doc.add_object(dictionary! {
        "Title" => Object::string_literal("Fixture PDF"),
        "Author" => Object::string_literal("Grace Hopper"),
        "Producer" => Object::string_literal("   "),
    });
    doc.trailer.set("Info", info_id);

    let path = dir.join(name);
    doc.save(&path).unwrap();
    PdfFixture {
        path,
        pages: page_ids,
    }
}

/// Store `items` as a linked list of outline items under `parent` and return their ids.
pub fn outline_items(doc: &mut Document, parent: ObjectId, items: Vec<Dictionary>) -> Vec<ObjectId> {
    let ids: Vec<ObjectId> = items.iter().map(|_| doc.new_object_id()).collect();
    for (i, mut item) in items.into_iter().enumerate() {
        item.set("Parent", parent);
        if i + 1 < ids.len() {
            item.set("Next", ids[i + 1]);
        }
        if i > 0 {
            item.set("Prev", ids[i - 1]);
        }
        doc.objects.insert(ids[i], Object::Dictionary(item));
    }
    ids
}

/// Add an outline root holding `ids` (as returned by [`outline_items`]) to the catalog.
pub fn attach_outline(
    doc: &mut Document,
    catalog: &mut Dictionary,
    outlines_id: ObjectId,
    ids: &[ObjectId],
) {
    let (Some(&first), Some(&last)) = (ids.first(), ids.last()) else {
        return;
    };
    doc.objects.insert(
        outlines_id,
        Object::Dictionary(dictionary! {
            "Type" => "Outlines",
            "First" => first,
            "Last" => last,
            "Count" => ids.len() as i64,
        }),
    );
    catalog.set("Outlines", outlines_id);
}
