//! Package document metadata
//!
//! `META-INF/container.xml` names the OPF; the OPF carries Dublin Core
//! metadata, the manifest and the EPUB 2 guide. Reading order lives in
//! [`crate::spine`].

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::{LectorError, Result};
use crate::xml::{collapse_whitespace, decode, find_attr, local_name, parse_error, resolve_entity};

const MAX_MANIFEST_ITEMS: usize = 16_384;
const MAX_SUBJECTS: usize = 64;
const MAX_GUIDE_REFS: usize = 64;

/// A manifest `<item>`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct ManifestItem {
    /// Manifest id.
    pub id: String,
    /// Href relative to the OPF.
    pub href: String,
    /// Declared media type; empty when missing.
    pub media_type: String,
    /// Space separated `properties` (`nav`, `cover-image`, ...).
    pub properties: Option<String>,
}

impl ManifestItem {
    /// Whether `properties` lists `token`.
    pub fn has_property(&self, token: &str) -> bool {
        self.properties
            .as_deref()
            .is_some_and(|p| p.split_ascii_whitespace().any(|t| t == token))
    }

    fn from_element(reader: &Reader<&[u8]>, e: &BytesStart<'_>) -> Result<Option<Self>> {
        let id = find_attr(reader, e, b"id")?;
        let href = find_attr(reader, e, b"href")?;
        let (Some(id), Some(href)) = (id, href) else {
            log::debug!("[OPF] Skipping manifest item without id or href");
            return Ok(None);
        };
        Ok(Some(Self {
            id,
            href,
            media_type: find_attr(reader, e, b"media-type")?.unwrap_or_default(),
            properties: find_attr(reader, e, b"properties")?,
        }))
    }
}

/// An EPUB 2 `<guide>` reference.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct GuideRef {
    /// `cover`, `toc`, `text`, ...
    pub guide_type: String,
    /// Display title.
    pub title: Option<String>,
    /// Href relative to the OPF.
    pub href: String,
}

impl GuideRef {
    fn from_element(reader: &Reader<&[u8]>, e: &BytesStart<'_>) -> Result<Option<Self>> {
        let guide_type = find_attr(reader, e, b"type")?;
        let href = find_attr(reader, e, b"href")?;
        let (Some(guide_type), Some(href)) = (guide_type, href) else {
            return Ok(None);
        };
        Ok(Some(Self {
            guide_type,
            title: find_attr(reader, e, b"title")?,
            href,
        }))
    }
}

/// What the OPF says about the book, minus the spine.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct PackageMetadata {
    /// First `dc:title`.
    pub title: Option<String>,
    /// First `dc:creator`.
    pub author: Option<String>,
    /// Every `dc:creator`.
    pub creators: Vec<String>,
    /// First `dc:language`.
    pub language: Option<String>,
    /// First `dc:identifier`.
    pub identifier: Option<String>,
    /// `dc:publisher`
    pub publisher: Option<String>,
    /// `dc:date`
    pub date: Option<String>,
    /// `dc:description`
    pub description: Option<String>,
    /// `dc:subject` tags.
    pub subjects: Vec<String>,
    /// `dc:rights`
    pub rights: Option<String>,
    /// `dcterms:modified`
    pub modified: Option<String>,
    /// `rendition:layout`
    pub rendition_layout: Option<String>,
    /// Manifest id of the cover image.
    pub cover_id: Option<String>,
    /// Manifest items in document order.
    #[serde(skip)]
    pub manifest: Vec<ManifestItem>,
    /// Guide references.
    #[serde(skip)]
    pub guide: Vec<GuideRef>,
}

impl PackageMetadata {
    /// Manifest item by id.
    pub fn get_item(&self, id: &str) -> Option<&ManifestItem> {
        self.manifest.iter().find(|item| item.id == id)
    }

    /// Manifest item of the cover image.
    pub fn cover_item(&self) -> Option<&ManifestItem> {
        self.cover_id.as_deref().and_then(|id| self.get_item(id))
    }

    /// EPUB 3 navigation document.
    pub fn nav_item(&self) -> Option<&ManifestItem> {
        self.manifest.iter().find(|item| item.has_property("nav"))
    }

    /// First item with `media_type`, compared case-insensitively.
    pub fn first_item_of_type(&self, media_type: &str) -> Option<&ManifestItem> {
        self.manifest
            .iter()
            .find(|item| item.media_type.eq_ignore_ascii_case(media_type))
    }

    fn set_meta_property(&mut self, property: &str, value: String) {
        match property {
            "dcterms:modified" => self.modified = Some(value),
            "rendition:layout" => self.rendition_layout = Some(value),
            _ => {}
        }
    }

    fn set_field(&mut self, name: &[u8], property: Option<&str>, text: String) {
        match name {
            b"title" => {
                self.title.get_or_insert(text);
            }
            b"creator" => {
                self.author.get_or_insert_with(|| text.clone());
                self.creators.push(text);
            }
            b"language" => {
                self.language.get_or_insert(text);
            }
            b"identifier" => {
                self.identifier.get_or_insert(text);
            }
            b"publisher" => self.publisher = Some(text),
            b"date" => self.date = Some(text),
            b"description" => self.description = Some(text),
            b"rights" => self.rights = Some(text),
            b"subject" if self.subjects.len() < MAX_SUBJECTS => self.subjects.push(text),
            b"meta" => {
                if let Some(property) = property {
                    self.set_meta_property(property, text);
                }
            }
            _ => {}
        }
    }
}

/// `full-path` of the first `<rootfile>` in `container.xml`.
pub fn parse_container_xml(content: &[u8]) -> Result<String> {
    let mut reader = Reader::from_reader(content);
    reader.config_mut().trim_text(true);

    let mut saw_rootfile = false;
    loop {
        match reader.read_event().map_err(|e| parse_error("container.xml", e))? {
            Event::Start(e) | Event::Empty(e) if local_name(&e) == b"rootfile" => {
                saw_rootfile = true;
                if let Some(path) = find_attr(&reader, &e, b"full-path")?.filter(|p| !p.is_empty()) {
                    return Ok(path);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Err(LectorError::Parse(if saw_rootfile {
        "rootfile in container.xml has no full-path".into()
    } else {
        "no rootfile found in container.xml".into()
    }))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Outside,
    Metadata,
    Manifest,
    Guide,
}

/// A metadata child whose text is still arriving.
struct PendingField {
    name: Vec<u8>,
    property: Option<String>,
    text: String,
}

struct OpfBuilder {
    metadata: PackageMetadata,
    section: Section,
    pending: Option<PendingField>,
}

impl OpfBuilder {
    fn element(&mut self, reader: &Reader<&[u8]>, e: &BytesStart<'_>, empty: bool) -> Result<()> {
        let name = local_name(e);
        match (self.section, name.as_slice()) {
            (_, b"metadata") if !empty => self.section = Section::Metadata,
            (_, b"manifest") if !empty => self.section = Section::Manifest,
            (_, b"guide") if !empty => self.section = Section::Guide,
            (Section::Manifest, b"item") => {
                if self.metadata.manifest.len() >= MAX_MANIFEST_ITEMS {
                    return Ok(());
                }
                if let Some(item) = ManifestItem::from_element(reader, e)? {
                    if item.has_property("cover-image") {
                        self.metadata.cover_id = Some(item.id.clone());
                    }
                    self.metadata.manifest.push(item);
                }
            }
            (Section::Guide, b"reference") => {
                if self.metadata.guide.len() >= MAX_GUIDE_REFS {
                    return Ok(());
                }
                if let Some(reference) = GuideRef::from_element(reader, e)? {
                    self.metadata.guide.push(reference);
                }
            }
            (Section::Metadata, _) => {
                let property = if name == b"meta" {
                    self.meta_attributes(reader, e)?
                } else {
                    None
                };
                if !empty {
                    self.pending = Some(PendingField {
                        name,
                        property,
                        text: String::new(),
                    });
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// `<meta name="cover" content>` names the cover unless a `cover-image`
    /// item already did. `<meta property content>` is applied directly; the
    /// property is returned so element text can be attributed to it too.
    fn meta_attributes(&mut self, reader: &Reader<&[u8]>, e: &BytesStart<'_>) -> Result<Option<String>> {
        let content = find_attr(reader, e, b"content")?;
        let property = find_attr(reader, e, b"property")?;
        if find_attr(reader, e, b"name")?.as_deref() == Some("cover") && self.metadata.cover_id.is_none() {
            self.metadata.cover_id = content.clone();
        }
        if let (Some(property), Some(content)) = (property.as_deref(), content) {
            self.metadata.set_meta_property(property, content);
        }
        Ok(property)
    }

    fn text(&mut self, text: &str) {
        if let Some(field) = self.pending.as_mut() {
            field.text.push_str(text);
        }
    }

    fn end(&mut self, name: &[u8]) {
        if let Some(field) = self.pending.take() {
            let text = collapse_whitespace(&field.text);
            if !text.is_empty() {
                self.metadata
                    .set_field(&field.name, field.property.as_deref(), text);
            }
        }
        if matches!(name, b"metadata" | b"manifest" | b"guide") {
            self.section = Section::Outside;
        }
    }
}

/// Read metadata, manifest and guide from an OPF document.
pub fn parse_opf(content: &[u8]) -> Result<PackageMetadata> {
    let mut reader = Reader::from_reader(content);

    let mut builder = OpfBuilder {
        metadata: PackageMetadata::default(),
        section: Section::Outside,
        pending: None,
    };
    loop {
        match reader.read_event().map_err(|e| parse_error("OPF", e))? {
            Event::Start(e) => builder.element(&reader, &e, false)?,
            Event::Empty(e) => builder.element(&reader, &e, true)?,
            Event::Text(e) => builder.text(&decode(&reader, &e)?),
            Event::GeneralRef(e) => builder.text(&resolve_entity(&decode(&reader, &e)?)),
            Event::End(e) => builder.end(e.local_name().as_ref()),
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(builder.metadata)
}
