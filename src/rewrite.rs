//! Chapter markup rewriting
//!
//! Chapters are rewritten in a streaming pass over quick-xml events. Events
//! that need no change are re-emitted from their raw bytes, so the output
//! keeps the chapter's own markup byte for byte; only the tags that change
//! are re-serialized.
//!
//! Rewriting happens in two steps: [`collect_references`] lists the archive
//! paths a chapter needs URLs for, the caller acquires them, and
//! [`rewrite_chapter`] substitutes the acquired URLs, injects the
//! pagination support and wraps the body.

use std::collections::{HashMap, HashSet};

use quick_xml::escape::{escape, unescape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::{LectorError, Result};
use crate::href::{is_absolute_url, is_internal_link, parent_dir, resolve_href, split_fragment};
use crate::settings::RenderSettings;
use crate::xml::decode;

/// Id of the element wrapping the original body content.
pub const WRAPPER_ID: &str = "lector:wrapper";
/// Id of the end-of-chapter sentinel; also the fragment that opens a
/// chapter on its last page.
pub const END_SENTINEL_ID: &str = "lector_end";
/// Id of the injected application stylesheet link.
pub const INJECT_LINK_ID: &str = "lector:injectLink";
/// Id of the injected theme stylesheet link.
pub const INJECT_THEME_ID: &str = "lector:injectTheme";
/// Id of the injected pagination script.
pub const INJECT_SCRIPT_ID: &str = "lector:injectScript";
/// Body of the injected script element, so it is never self-closing.
pub const SCRIPT_PLACEHOLDER: &str = "// Nothing to see";
/// Prefix of rewritten in-book links.
pub const GOTO_PREFIX: &str = "javascript:window.Lector.goto(";

/// Start tag being re-serialized.
struct Tag {
    name: String,
    // (qualified key, escaped value)
    attrs: Vec<(String, String)>,
}

fn local_part(name: &str) -> &str {
    name.rsplit_once(':').map(|(_, local)| local).unwrap_or(name)
}

impl Tag {
    fn read(reader: &Reader<&[u8]>, e: &BytesStart<'_>) -> Result<Self> {
        let name = decode(reader, e.name().as_ref())?;
        let mut attrs = Vec::new();
        for attr in e.attributes().with_checks(false) {
            let attr = attr.map_err(|e| LectorError::Parse(format!("Attr error: {:?}", e)))?;
            let key = decode(reader, attr.key.as_ref())?;
            let raw = decode(reader, &attr.value)?;
            let value = match unescape(&raw) {
                Ok(plain) => escape(&*plain).into_owned(),
                // Unknown entity: keep the value as written.
                Err(_) => raw.replace('"', "&quot;"),
            };
            attrs.push((key, value));
        }
        Ok(Self { name, attrs })
    }

    fn local_name(&self) -> &str {
        local_part(&self.name)
    }

    /// Unescaped value of the first attribute with this local name.
    fn get(&self, local: &str) -> Option<String> {
        self.attrs
            .iter()
            .find(|(key, _)| local_part(key) == local)
            .map(|(_, value)| match unescape(value) {
                Ok(plain) => plain.into_owned(),
                Err(_) => value.clone(),
            })
    }

    fn set(&mut self, local: &str, value: &str) {
        let escaped = escape(value).into_owned();
        match self.attrs.iter_mut().find(|(key, _)| local_part(key) == local) {
            Some((_, existing)) => *existing = escaped,
            None => self.attrs.push((local.to_string(), escaped)),
        }
    }

    fn remove(&mut self, local: &str) {
        self.attrs.retain(|(key, _)| local_part(key) != local);
    }

    fn write(&self, out: &mut String, empty: bool) {
        out.push('<');
        out.push_str(&self.name);
        for (key, value) in &self.attrs {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(value);
            out.push('"');
        }
        out.push_str(if empty { "/>" } else { ">" });
    }
}

fn has_token(value: &str, token: &str) -> bool {
    value
        .split_ascii_whitespace()
        .any(|t| t.eq_ignore_ascii_case(token))
}

/// Attribute holding a resource reference, for elements that have one.
fn reference_attr(tag: &Tag) -> Option<&'static str> {
    match tag.local_name() {
        "img" | "iframe" | "script" => Some("src"),
        // SVG <image>: matches both xlink:href and href.
        "image" => Some("href"),
        "link" if tag.get("rel").is_some_and(|rel| has_token(&rel, "stylesheet")) => Some("href"),
        _ => None,
    }
}

fn may_rewrite(local: &[u8]) -> bool {
    matches!(
        local,
        b"img" | b"iframe" | b"script" | b"image" | b"link" | b"a"
    )
}

/// Resolved reference of `tag`: attribute, archive path, fragment.
fn reference_of(tag: &Tag, base_dir: &str) -> Option<(&'static str, String, Option<String>)> {
    let attr = reference_attr(tag)?;
    let value = tag.get(attr)?;
    let value = value.trim();
    if value.is_empty() || value.starts_with('#') || is_absolute_url(value) {
        return None;
    }
    let resolved = resolve_href(base_dir, value);
    let (path, fragment) = split_fragment(&resolved);
    if path.is_empty() {
        return None;
    }
    Some((attr, path.to_string(), fragment.map(str::to_string)))
}

fn reader_for(text: &str) -> Reader<&[u8]> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().check_end_names = false;
    reader
}

/// Archive paths referenced by a chapter's stylesheets, images, frames and
/// scripts, resolved against `chapter_path` and deduplicated in document
/// order. Absolute URLs are skipped.
pub fn collect_references(text: &str, chapter_path: &str) -> Result<Vec<String>> {
    let base_dir = parent_dir(chapter_path);
    let mut reader = reader_for(text);
    let mut seen = HashSet::new();
    let mut paths = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if !may_rewrite(e.local_name().as_ref()) {
                    continue;
                }
                let tag = Tag::read(&reader, &e)?;
                if let Some((_, path, _)) = reference_of(&tag, base_dir) {
                    if seen.insert(path.clone()) {
                        paths.push(path);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(LectorError::Parse(format!("XML parse error: {:?}", e))),
            Ok(_) => {}
        }
    }
    Ok(paths)
}

fn push_raw(out: &mut String, bytes: &[u8]) {
    out.push_str(&String::from_utf8_lossy(bytes));
}

/// Injections that go at the end of `<head>`.
fn write_head_injections(out: &mut String, settings: &RenderSettings) {
    if let Some(href) = &settings.app_stylesheet {
        out.push_str(&format!(
            r#"<link id="{}" rel="stylesheet" type="text/css" href="{}"/>"#,
            INJECT_LINK_ID,
            escape(href.as_str())
        ));
    }
    if let Some(href) = &settings.theme_stylesheet {
        out.push_str(&format!(
            r#"<link id="{}" rel="stylesheet" type="text/css" href="{}"/>"#,
            INJECT_THEME_ID,
            escape(href.as_str())
        ));
    }
    if let Some(src) = &settings.pagination_script {
        out.push_str(&format!(
            r#"<script id="{}" type="text/javascript" src="{}">{}</script>"#,
            INJECT_SCRIPT_ID,
            escape(src.as_str()),
            SCRIPT_PLACEHOLDER
        ));
    }
}

fn write_body_close(out: &mut String) {
    out.push_str("</div>");
    out.push_str(&format!(r#"<div id="{}"></div>"#, END_SENTINEL_ID));
}

/// Link target for an in-book anchor.
pub fn goto_href(path: &str) -> String {
    // serde_json quoting keeps the path a valid script string literal.
    let literal = serde_json::to_string(path).unwrap_or_else(|_| format!("\"{}\"", path));
    format!("{}{})", GOTO_PREFIX, literal)
}

/// Inverse of [`goto_href`].
pub fn parse_goto_href(href: &str) -> Option<String> {
    let literal = href.strip_prefix(GOTO_PREFIX)?.strip_suffix(')')?;
    serde_json::from_str(literal).ok()
}

struct Rewriter<'a> {
    base_dir: &'a str,
    urls: &'a HashMap<String, String>,
    settings: &'a RenderSettings,
    out: String,
    head_done: bool,
}

impl Rewriter<'_> {
    fn inject_head_block(&mut self) {
        self.out.push_str("<head>");
        write_head_injections(&mut self.out, self.settings);
        self.out.push_str("</head>");
        self.head_done = true;
    }

    fn rewrite_reference(&self, tag: &mut Tag) {
        let Some((attr, path, fragment)) = reference_of(tag, self.base_dir) else {
            return;
        };
        match self.urls.get(&path) {
            Some(url) => {
                let value = match fragment {
                    Some(fragment) => format!("{}#{}", url, fragment),
                    None => url.clone(),
                };
                tag.set(attr, &value);
            }
            None => log::warn!(
                "[CHAPTER] No resource for '{}', leaving {} unrewritten",
                path,
                tag.local_name()
            ),
        }
        if tag.local_name() == "img" {
            for dimension in ["width", "height"] {
                if tag.get(dimension).is_some_and(|v| v.trim() == "100%") {
                    tag.remove(dimension);
                }
            }
        }
    }

    fn rewrite_anchor(&self, tag: &mut Tag) {
        let Some(href) = tag.get("href") else {
            return;
        };
        let href = href.trim();
        if is_internal_link(href) {
            let target = resolve_href(self.base_dir, href);
            tag.set("href", &goto_href(&target));
        }
    }

    fn body_tag(&self, tag: &mut Tag) {
        let Some(size) = &self.settings.font_size else {
            return;
        };
        let style = tag.get("style").unwrap_or_default();
        let style = style.trim().trim_end_matches(';').trim();
        let style = if style.is_empty() {
            format!("font-size: {}", size)
        } else {
            format!("{}; font-size: {}", style, size)
        };
        tag.set("style", &style);
    }

    fn start(&mut self, reader: &Reader<&[u8]>, e: &BytesStart<'_>, empty: bool) -> Result<()> {
        let local = e.local_name();
        match local.as_ref() {
            b"head" => {
                self.out.push('<');
                push_raw(&mut self.out, e);
                self.out.push('>');
                if empty {
                    write_head_injections(&mut self.out, self.settings);
                    self.out.push_str("</head>");
                    self.head_done = true;
                }
            }
            b"body" => {
                if !self.head_done {
                    self.inject_head_block();
                }
                let mut tag = Tag::read(reader, e)?;
                self.body_tag(&mut tag);
                tag.write(&mut self.out, false);
                self.out.push_str(&format!(r#"<div id="{}">"#, WRAPPER_ID));
                if empty {
                    write_body_close(&mut self.out);
                    self.out.push_str(&format!("</{}>", tag.name));
                }
            }
            b"a" => {
                let mut tag = Tag::read(reader, e)?;
                self.rewrite_anchor(&mut tag);
                tag.write(&mut self.out, empty);
            }
            name if may_rewrite(name) => {
                let mut tag = Tag::read(reader, e)?;
                self.rewrite_reference(&mut tag);
                tag.write(&mut self.out, empty);
            }
            _ => {
                self.out.push('<');
                push_raw(&mut self.out, e);
                self.out.push_str(if empty { "/>" } else { ">" });
            }
        }
        Ok(())
    }

    fn end(&mut self, raw: &[u8], local: &[u8]) {
        match local {
            b"head" if !self.head_done => {
                write_head_injections(&mut self.out, self.settings);
                self.head_done = true;
            }
            b"body" => write_body_close(&mut self.out),
            _ => {}
        }
        self.out.push_str("</");
        push_raw(&mut self.out, raw);
        self.out.push('>');
    }
}

/// Rewrite one chapter document.
///
/// `urls` maps archive paths returned by [`collect_references`] to the URLs
/// acquired for them; references without an entry are left as written.
/// In-book anchors become [`goto_href`] links, pagination support is
/// injected into `<head>` (created if missing) and the body content is
/// wrapped in `#lector:wrapper`, followed by the `#lector_end` sentinel.
pub fn rewrite_chapter(
    text: &str,
    chapter_path: &str,
    urls: &HashMap<String, String>,
    settings: &RenderSettings,
) -> Result<String> {
    let mut reader = reader_for(text);
    let mut rw = Rewriter {
        base_dir: parent_dir(chapter_path),
        urls,
        settings,
        out: String::with_capacity(text.len() + 512),
        head_done: false,
    };

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => rw.start(&reader, &e, false)?,
            Ok(Event::Empty(e)) => rw.start(&reader, &e, true)?,
            Ok(Event::End(e)) => rw.end(&e, e.local_name().as_ref()),
            Ok(Event::Text(e)) => push_raw(&mut rw.out, &e),
            Ok(Event::GeneralRef(e)) => {
                rw.out.push('&');
                push_raw(&mut rw.out, &e);
                rw.out.push(';');
            }
            Ok(Event::CData(e)) => {
                rw.out.push_str("<![CDATA[");
                push_raw(&mut rw.out, &e);
                rw.out.push_str("]]>");
            }
            Ok(Event::Comment(e)) => {
                rw.out.push_str("<!--");
                push_raw(&mut rw.out, &e);
                rw.out.push_str("-->");
            }
            Ok(Event::Decl(e)) => {
                rw.out.push_str("<?");
                push_raw(&mut rw.out, &e);
                rw.out.push_str("?>");
            }
            Ok(Event::PI(e)) => {
                rw.out.push_str("<?");
                push_raw(&mut rw.out, &e);
                rw.out.push_str("?>");
            }
            Ok(Event::DocType(e)) => {
                rw.out.push_str("<!DOCTYPE ");
                push_raw(&mut rw.out, &e);
                rw.out.push('>');
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(LectorError::Parse(format!(
                    "XML parse error at {}: {:?}",
                    reader.buffer_position(),
                    e
                )))
            }
        }
    }

    if !rw.head_done {
        log::debug!("[CHAPTER] {} has no <head> or <body>", chapter_path);
    }
    Ok(rw.out)
}
