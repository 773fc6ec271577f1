//! Reading order declared by `<spine>` in the package document.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::Result;
use crate::xml::{find_attr, local_name, parse_error};

const MAX_ITEMREFS: usize = 16_384;

/// One `<itemref>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpineItem {
    /// Manifest id of the chapter.
    pub idref: String,
    /// `id` of the itemref itself.
    pub id: Option<String>,
    /// `false` for `linear="no"`.
    pub linear: bool,
    /// Space separated `properties`.
    pub properties: Option<String>,
}

impl SpineItem {
    fn from_element(reader: &Reader<&[u8]>, e: &BytesStart<'_>) -> Result<Option<Self>> {
        let Some(idref) = find_attr(reader, e, b"idref")? else {
            return Ok(None);
        };
        Ok(Some(Self {
            idref,
            id: find_attr(reader, e, b"id")?,
            linear: find_attr(reader, e, b"linear")?.as_deref() != Some("no"),
            properties: find_attr(reader, e, b"properties")?,
        }))
    }
}

/// Chapters of a package in reading order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Spine {
    items: Vec<SpineItem>,
    toc_id: Option<String>,
    direction: Option<String>,
}

impl Spine {
    /// Itemrefs in document order, including non-linear ones.
    pub fn items(&self) -> &[SpineItem] {
        &self.items
    }

    /// Number of itemrefs.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// No itemrefs at all.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// `<spine toc>`: manifest id of the EPUB 2 NCX.
    pub fn toc_id(&self) -> Option<&str> {
        self.toc_id.as_deref()
    }

    /// `<spine page-progression-direction>`.
    pub fn page_progression_direction(&self) -> Option<&str> {
        self.direction.as_deref()
    }

    fn read_spine_element(&mut self, reader: &Reader<&[u8]>, e: &BytesStart<'_>) -> Result<()> {
        self.toc_id = find_attr(reader, e, b"toc")?.filter(|v| !v.is_empty());
        self.direction =
            find_attr(reader, e, b"page-progression-direction")?.filter(|v| !v.is_empty());
        Ok(())
    }
}

/// Read the spine out of an OPF document. Itemrefs without `idref` are
/// dropped.
pub fn parse_spine(opf: &[u8]) -> Result<Spine> {
    let mut reader = Reader::from_reader(opf);
    reader.config_mut().trim_text(true);

    let mut spine = Spine::default();
    let mut inside = false;
    loop {
        let event = reader.read_event().map_err(|e| parse_error("Spine", e))?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => match local_name(e).as_slice() {
                b"spine" => {
                    inside = matches!(event, Event::Start(_));
                    spine.read_spine_element(&reader, e)?;
                }
                b"itemref" if inside => {
                    if spine.items.len() >= MAX_ITEMREFS {
                        log::warn!("[SPINE] More than {} itemrefs, ignoring the rest", MAX_ITEMREFS);
                        break;
                    }
                    if let Some(item) = SpineItem::from_element(&reader, e)? {
                        spine.items.push(item);
                    }
                }
                _ => {}
            },
            Event::End(ref e) if e.local_name().as_ref() == b"spine" => inside = false,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(spine)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idrefs(spine: &Spine) -> Vec<&str> {
        spine.items().iter().map(|i| i.idref.as_str()).collect()
    }

    #[test]
    fn test_reading_order_and_attributes() {
        let opf = br#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf">
  <manifest><item id="x" href="x.xhtml"/></manifest>
  <spine toc="ncx" page-progression-direction="rtl">
    <itemref idref="cover" linear="no"/>
    <itemref idref="ch1"/>
    <itemref idref="ch2" properties="page-spread-left"/>
    <itemref linear="yes"/>
  </spine>
</package>"#;

        let spine = parse_spine(opf).unwrap();
        assert_eq!(idrefs(&spine), vec!["cover", "ch1", "ch2"]);
        assert_eq!(spine.toc_id(), Some("ncx"));
        assert_eq!(spine.page_progression_direction(), Some("rtl"));
        assert!(!spine.items()[0].linear);
        assert!(spine.items()[1].linear);
        assert_eq!(
            spine.items()[2].properties.as_deref(),
            Some("page-spread-left")
        );
    }

    #[test]
    fn test_prefixed_elements() {
        let opf = br#"<opf:package xmlns:opf="http://www.idpf.org/2007/opf">
  <opf:spine><opf:itemref idref="a"/><opf:itemref idref="b"/></opf:spine>
</opf:package>"#;
        assert_eq!(idrefs(&parse_spine(opf).unwrap()), vec!["a", "b"]);
    }

    #[test]
    fn test_stray_itemrefs() {
        let opf = br#"<package><itemref idref="stray"/><spine toc=""/><itemref idref="late"/></package>"#;
        let spine = parse_spine(opf).unwrap();
        assert!(spine.is_empty());
        assert_eq!(spine.toc_id(), None);
    }
}
