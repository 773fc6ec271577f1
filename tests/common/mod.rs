//! Shared fixtures for integration tests: an in-memory EPUB builder and a
//! display surface that records what the viewer sends it.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use lector::{ArchiveOptions, BookOptions, DisplaySurface, HostMessage};

/// Book options that decode on the calling task, so paused-time tests never
/// wait on the blocking pool.
pub fn inline_options() -> BookOptions {
    BookOptions::default().with_archive_options(ArchiveOptions::default().with_offload(false))
}

pub struct EpubBuilder {
    manifest: Vec<String>,
    spine: Vec<String>,
    spine_attrs: String,
    files: Vec<(String, Vec<u8>, bool)>,
}

impl EpubBuilder {
    pub fn new() -> Self {
        Self {
            manifest: Vec::new(),
            spine: Vec::new(),
            spine_attrs: String::new(),
            files: Vec::new(),
        }
    }

    /// Add a manifest item and its content under `OEBPS/`.
    pub fn item(mut self, id: &str, href: &str, media_type: &str, content: &str) -> Self {
        self.manifest.push(format!(
            r#"<item id="{}" href="{}" media-type="{}"/>"#,
            id, href, media_type
        ));
        self.files
            .push((format!("OEBPS/{}", href), content.as_bytes().to_vec(), true));
        self
    }

    /// Add an XHTML chapter to the manifest and the spine.
    pub fn chapter(self, id: &str, href: &str, title: &str, body: &str) -> Self {
        let mut builder = self.item(id, href, "application/xhtml+xml", &xhtml(title, body));
        builder.spine.push(format!(r#"<itemref idref="{}"/>"#, id));
        builder
    }

    /// Add an NCX table of contents.
    pub fn ncx(mut self, nav_points: &str) -> Self {
        let ncx = format!(
            r#"<?xml version="1.0"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <navMap>{}</navMap>
</ncx>"#,
            nav_points
        );
        self.spine_attrs = r#" toc="ncx""#.to_string();
        self.item("ncx", "toc.ncx", "application/x-dtbncx+xml", &ncx)
    }

    /// Add a file that is not in the manifest, stored uncompressed.
    pub fn raw_file(mut self, path: &str, content: &[u8]) -> Self {
        self.files.push((path.to_string(), content.to_vec(), false));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let opf = format!(
            r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="uid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="uid">urn:uuid:fixture</dc:identifier>
    <dc:title>Integration Book</dc:title>
    <dc:creator>B. Author</dc:creator>
    <dc:language>en</dc:language>
  </metadata>
  <manifest>{}</manifest>
  <spine{}>{}</spine>
</package>"#,
            self.manifest.join(""),
            self.spine_attrs,
            self.spine.join("")
        );
        let mut entries: Vec<(String, Vec<u8>, bool)> = vec![
            ("mimetype".into(), b"application/epub+zip".to_vec(), false),
            ("META-INF/container.xml".into(), CONTAINER.as_bytes().to_vec(), true),
            ("OEBPS/content.opf".into(), opf.into_bytes(), true),
        ];
        entries.extend(self.files);
        zip(&entries)
    }
}

const CONTAINER: &str = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

pub fn xhtml(title: &str, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<html xmlns="http://www.w3.org/1999/xhtml"><head><title>{}</title><link rel="stylesheet" href="style.css"/></head><body>{}</body></html>"#,
        title, body
    )
}

/// ZIP archive with DEFLATE (`true`) or stored entries.
pub fn zip(entries: &[(String, Vec<u8>, bool)]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut central = Vec::new();
    for (name, content, deflate) in entries {
        let (method, payload) = if *deflate {
            (8u16, miniz_oxide::deflate::compress_to_vec(content, 6))
        } else {
            (0u16, content.clone())
        };
        let crc = crc32fast::hash(content);
        let offset = out.len() as u32;
        let header = |sig: u32, buf: &mut Vec<u8>, central: bool| {
            buf.extend_from_slice(&sig.to_le_bytes());
            if central {
                buf.extend_from_slice(&20u16.to_le_bytes());
            }
            buf.extend_from_slice(&20u16.to_le_bytes());
            buf.extend_from_slice(&0u16.to_le_bytes());
            buf.extend_from_slice(&method.to_le_bytes());
            buf.extend_from_slice(&0u32.to_le_bytes());
            buf.extend_from_slice(&crc.to_le_bytes());
            buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            buf.extend_from_slice(&(content.len() as u32).to_le_bytes());
            buf.extend_from_slice(&(name.len() as u16).to_le_bytes());
            buf.extend_from_slice(&0u16.to_le_bytes());
        };
        header(0x04034b50, &mut out, false);
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(&payload);

        header(0x02014b50, &mut central, true);
        central.extend_from_slice(&[0u8; 6]); // comment len, disk, internal attrs
        central.extend_from_slice(&0u32.to_le_bytes()); // external attrs
        central.extend_from_slice(&offset.to_le_bytes());
        central.extend_from_slice(name.as_bytes());
    }
    let cd_offset = out.len() as u32;
    out.extend_from_slice(&central);
    let count = entries.len() as u16;
    out.extend_from_slice(&0x06054b50u32.to_le_bytes());
    out.extend_from_slice(&[0u8; 4]);
    out.extend_from_slice(&count.to_le_bytes());
    out.extend_from_slice(&count.to_le_bytes());
    out.extend_from_slice(&(central.len() as u32).to_le_bytes());
    out.extend_from_slice(&cd_offset.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}

#[derive(Default, Clone)]
pub struct RecordingSurface {
    pub sources: Arc<Mutex<Vec<String>>>,
    pub messages: Arc<Mutex<Vec<HostMessage>>>,
}

impl RecordingSurface {
    pub fn sources(&self) -> Vec<String> {
        self.sources.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<HostMessage> {
        self.messages.lock().unwrap().clone()
    }
}

impl DisplaySurface for RecordingSurface {
    fn set_source(&self, url: &str) {
        self.sources.lock().unwrap().push(url.to_string());
    }

    fn post_message(&self, message: HostMessage) {
        self.messages.lock().unwrap().push(message);
    }
}
