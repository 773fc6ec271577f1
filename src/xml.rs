//! quick-xml helpers shared by the package, navigation and chapter parsers.
//!
//! Element and attribute names are matched by local name, so `dc:title`,
//! `opf:item` and `title` are treated alike.

use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::{LectorError, Result};

/// Parse failure in the named document.
pub(crate) fn parse_error(what: &str, err: impl std::fmt::Debug) -> LectorError {
    LectorError::Parse(format!("{} parse error: {:?}", what, err))
}

/// Decode raw bytes through the reader's decoder.
pub(crate) fn decode<R>(reader: &Reader<R>, bytes: &[u8]) -> Result<String> {
    reader
        .decoder()
        .decode(bytes)
        .map(|s| s.into_owned())
        .map_err(|e| LectorError::Parse(format!("Decode error: {:?}", e)))
}

/// Local name of an element (`dc:title` -> `title`).
pub(crate) fn local_name(e: &BytesStart<'_>) -> Vec<u8> {
    e.local_name().as_ref().to_vec()
}

/// Decoded and unescaped attribute value.
pub(crate) fn attr_value<R>(reader: &Reader<R>, attr: &Attribute<'_>) -> Result<String> {
    let raw = decode(reader, &attr.value)?;
    match quick_xml::escape::unescape(&raw) {
        Ok(unescaped) => Ok(unescaped.into_owned()),
        Err(_) => Ok(raw),
    }
}

/// Find an attribute by local name (`xlink:href` matches `href`).
pub(crate) fn find_attr<R>(
    reader: &Reader<R>,
    e: &BytesStart<'_>,
    name: &[u8],
) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| LectorError::Parse(format!("Attr error: {:?}", e)))?;
        if attr.key.local_name().as_ref() == name {
            return attr_value(reader, &attr).map(Some);
        }
    }
    Ok(None)
}

/// Resolve a general entity reference (`&amp;`, `&#8220;`, ...) to text.
/// Unknown named entities are kept verbatim.
pub(crate) fn resolve_entity(name: &str) -> String {
    let reference = format!("&{};", name);
    match quick_xml::escape::unescape(&reference) {
        Ok(resolved) => resolved.into_owned(),
        Err(_) => reference,
    }
}

/// Strip a UTF-8 byte order mark.
pub(crate) fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes)
}

/// Trim and collapse runs of whitespace to single spaces.
pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Decode entry bytes as UTF-8 text.
pub(crate) fn decode_text(bytes: &[u8]) -> Result<String> {
    String::from_utf8(strip_bom(bytes).to_vec())
        .map_err(|e| LectorError::Parse(format!("Invalid UTF-8: {}", e)))
}

/// A markup document that has been checked to be well formed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct XmlDocument {
    text: String,
    root: Option<String>,
    title: Option<String>,
}

impl XmlDocument {
    /// Parse `text` as XML. End tags must match their start tags.
    pub fn parse_xml(text: String) -> Result<Self> {
        Self::parse(text, true)
    }

    /// Parse `text` as an XHTML document, tolerating mismatched end tags.
    pub fn parse_document(text: String) -> Result<Self> {
        Self::parse(text, false)
    }

    fn parse(text: String, check_end_names: bool) -> Result<Self> {
        let mut reader = Reader::from_reader(text.as_bytes());
        reader.config_mut().check_end_names = check_end_names;

        let mut buf = Vec::new();
        let mut root = None;
        let mut title: Option<String> = None;
        let mut in_title = false;
        let mut title_done = false;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    let name = local_name(&e);
                    if root.is_none() {
                        root = Some(decode(&reader, &name)?);
                    }
                    if name == b"title" && !title_done {
                        in_title = true;
                    }
                }
                Ok(Event::Empty(e)) => {
                    if root.is_none() {
                        root = Some(decode(&reader, &local_name(&e))?);
                    }
                }
                Ok(Event::Text(e)) if in_title => {
                    title.get_or_insert_with(String::new).push_str(&decode(&reader, &e)?);
                }
                Ok(Event::GeneralRef(e)) if in_title => {
                    let name = decode(&reader, &e)?;
                    title.get_or_insert_with(String::new).push_str(&resolve_entity(&name));
                }
                Ok(Event::End(e)) => {
                    if in_title && e.local_name().as_ref() == b"title" {
                        in_title = false;
                        title_done = true;
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(LectorError::Parse(format!(
                        "XML parse error at {}: {:?}",
                        reader.buffer_position(),
                        e
                    )))
                }
                _ => {}
            }
            buf.clear();
        }

        if root.is_none() {
            return Err(LectorError::Parse("document has no root element".into()));
        }
        let title = title.map(|t| collapse_whitespace(&t));
        Ok(Self { text, root, title })
    }

    /// Source text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Local name of the root element.
    pub fn root(&self) -> Option<&str> {
        self.root.as_deref()
    }

    /// Text of the first `<title>` element with whitespace collapsed.
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref().filter(|t| !t.is_empty())
    }

    /// Consume the document, returning its text.
    pub fn into_text(self) -> String {
        self.text
    }
}
