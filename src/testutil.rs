//! In-memory EPUB fixtures shared by unit tests.

use std::sync::Arc;

use crate::zip::{METHOD_DEFLATED, METHOD_STORED};

pub(crate) struct ZipFixtureEntry {
    name: String,
    content: Vec<u8>,
    deflate: bool,
}

impl ZipFixtureEntry {
    pub(crate) fn stored(name: &str, content: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            content: content.to_vec(),
            deflate: false,
        }
    }

    pub(crate) fn deflated(name: &str, content: &[u8]) -> Self {
        Self {
            deflate: true,
            ..Self::stored(name, content)
        }
    }
}

/// Build a ZIP archive with one local header and one central directory
/// record per entry.
pub(crate) fn build_zip(entries: &[ZipFixtureEntry]) -> Vec<u8> {
    let mut zip = Vec::new();
    let mut central = Vec::new();

    for entry in entries {
        let name = entry.name.as_bytes();
        let crc = crc32fast::hash(&entry.content);
        let (method, payload) = if entry.deflate {
            (
                METHOD_DEFLATED,
                miniz_oxide::deflate::compress_to_vec(&entry.content, 6),
            )
        } else {
            (METHOD_STORED, entry.content.clone())
        };
        let local_offset = zip.len() as u32;

        zip.extend_from_slice(&0x04034b50u32.to_le_bytes());
        zip.extend_from_slice(&20u16.to_le_bytes()); // version needed
        zip.extend_from_slice(&0u16.to_le_bytes()); // flags
        zip.extend_from_slice(&method.to_le_bytes());
        zip.extend_from_slice(&0u32.to_le_bytes()); // mod time + date
        zip.extend_from_slice(&crc.to_le_bytes());
        zip.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        zip.extend_from_slice(&(entry.content.len() as u32).to_le_bytes());
        zip.extend_from_slice(&(name.len() as u16).to_le_bytes());
        zip.extend_from_slice(&0u16.to_le_bytes()); // extra length
        zip.extend_from_slice(name);
        zip.extend_from_slice(&payload);

        central.extend_from_slice(&0x02014b50u32.to_le_bytes());
        central.extend_from_slice(&20u16.to_le_bytes()); // version made by
        central.extend_from_slice(&20u16.to_le_bytes()); // version needed
        central.extend_from_slice(&0u16.to_le_bytes()); // flags
        central.extend_from_slice(&method.to_le_bytes());
        central.extend_from_slice(&0u32.to_le_bytes()); // mod time + date
        central.extend_from_slice(&crc.to_le_bytes());
        central.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        central.extend_from_slice(&(entry.content.len() as u32).to_le_bytes());
        central.extend_from_slice(&(name.len() as u16).to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes()); // extra length
        central.extend_from_slice(&0u16.to_le_bytes()); // comment length
        central.extend_from_slice(&0u16.to_le_bytes()); // disk number
        central.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
        central.extend_from_slice(&0u32.to_le_bytes()); // external attrs
        central.extend_from_slice(&local_offset.to_le_bytes());
        central.extend_from_slice(name);
    }

    let cd_offset = zip.len() as u32;
    let cd_size = central.len() as u32;
    zip.extend_from_slice(&central);

    let count = entries.len() as u16;
    zip.extend_from_slice(&0x06054b50u32.to_le_bytes());
    zip.extend_from_slice(&0u16.to_le_bytes()); // disk number
    zip.extend_from_slice(&0u16.to_le_bytes()); // disk with CD
    zip.extend_from_slice(&count.to_le_bytes());
    zip.extend_from_slice(&count.to_le_bytes());
    zip.extend_from_slice(&cd_size.to_le_bytes());
    zip.extend_from_slice(&cd_offset.to_le_bytes());
    zip.extend_from_slice(&0u16.to_le_bytes()); // comment length
    zip
}

pub(crate) const CONTAINER_XML: &str = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

/// Package document with the given manifest items and spine itemrefs.
pub(crate) fn opf(manifest: &str, spine_attrs: &str, spine: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>Fixture Book</dc:title>
    <dc:creator>A. Writer</dc:creator>
    <dc:language>en</dc:language>
  </metadata>
  <manifest>{}</manifest>
  <spine{}>{}</spine>
</package>"#,
        manifest, spine_attrs, spine
    )
}

pub(crate) fn chapter_xhtml(title: &str, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<html xmlns="http://www.w3.org/1999/xhtml"><head><title>{}</title></head><body>{}</body></html>"#,
        title, body
    )
}

/// EPUB with `mimetype`, the standard container and the given OEBPS files.
pub(crate) fn epub(opf_xml: &str, files: &[(&str, &str)]) -> Arc<[u8]> {
    let mut entries = vec![
        ZipFixtureEntry::stored("mimetype", b"application/epub+zip"),
        ZipFixtureEntry::deflated("META-INF/container.xml", CONTAINER_XML.as_bytes()),
        ZipFixtureEntry::deflated("OEBPS/content.opf", opf_xml.as_bytes()),
    ];
    for (path, content) in files {
        entries.push(ZipFixtureEntry::deflated(path, content.as_bytes()));
    }
    Arc::from(build_zip(&entries))
}

/// Three-chapter book without any table of contents.
pub(crate) fn three_chapter_epub() -> Arc<[u8]> {
    let manifest = r#"
      <item id="c1" href="text/ch1.xhtml" media-type="application/xhtml+xml"/>
      <item id="c2" href="text/ch2.xhtml" media-type="application/xhtml+xml"/>
      <item id="c3" href="text/ch3.xhtml" media-type="application/xhtml+xml"/>
      <item id="css" href="style.css" media-type="text/css"/>"#;
    let spine = r#"<itemref idref="c1"/><itemref idref="c2"/><itemref idref="c3"/>"#;
    let ch1 = chapter_xhtml("One", "<p>first</p>");
    let ch2 = chapter_xhtml("Two", "<p>second</p>");
    let ch3 = chapter_xhtml("Three", "<p>third</p>");
    epub(
        &opf(manifest, "", spine),
        &[
            ("OEBPS/text/ch1.xhtml", ch1.as_str()),
            ("OEBPS/text/ch2.xhtml", ch2.as_str()),
            ("OEBPS/text/ch3.xhtml", ch3.as_str()),
            ("OEBPS/style.css", "body { margin: 0 }"),
        ],
    )
}
