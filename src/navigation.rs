//! Table of contents parsing
//!
//! Reads the EPUB 3 navigation document (`<nav epub:type="toc">`) or the
//! EPUB 2 NCX into a tree of [`NavPoint`]s. [`TableOfContents`] flattens
//! that tree into entries whose hrefs are archive paths.
//!
//! ```rust
//! use lector::navigation::{parse_nav_xhtml, TableOfContents};
//!
//! let nav = parse_nav_xhtml(br#"<html><body><nav epub:type="toc"><ol>
//!   <li><a href="ch1.xhtml">One</a></li>
//! </ol></nav></body></html>"#).unwrap();
//! let toc = TableOfContents::from_nav(&nav, "OEBPS");
//! assert_eq!(toc.entries()[0].href, "OEBPS/ch1.xhtml");
//! ```

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::Result;
use crate::href::resolve_href;
use crate::xml::{collapse_whitespace, decode, find_attr, local_name, parse_error, resolve_entity};

/// A navigation point and whatever is nested below it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NavPoint {
    /// Display label.
    pub label: String,
    /// Href relative to the navigation document.
    pub href: String,
    /// NCX `playOrder`, if numeric.
    pub play_order: Option<u32>,
    /// Nested points.
    pub children: Vec<NavPoint>,
}

/// Every list found in one navigation document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Navigation {
    /// Table of contents.
    pub toc: Vec<NavPoint>,
    /// Print page markers.
    pub page_list: Vec<NavPoint>,
    /// Landmarks (cover, bodymatter, ...).
    pub landmarks: Vec<NavPoint>,
}

impl Navigation {
    /// Any table of contents entries at all.
    pub fn has_toc(&self) -> bool {
        !self.toc.is_empty()
    }

    /// Table of contents entries at every depth.
    pub fn toc_count(&self) -> usize {
        walk(&self.toc).count()
    }
}

/// Depth-first `(depth, point)` pairs in document order.
fn walk(points: &[NavPoint]) -> impl Iterator<Item = (usize, &NavPoint)> {
    let mut pending: Vec<(usize, &NavPoint)> = points.iter().rev().map(|p| (0, p)).collect();
    std::iter::from_fn(move || {
        let (depth, point) = pending.pop()?;
        pending.extend(point.children.iter().rev().map(|c| (depth + 1, c)));
        Some((depth, point))
    })
}

/// Which document a table of contents was read from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TocSource {
    /// EPUB 3 navigation document.
    Nav,
    /// EPUB 2 NCX.
    Ncx,
}

/// Where a TOC entry points.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TocTarget {
    /// Archive path, fragment included.
    Href(String),
    /// NCX reading position.
    PlayOrder(u32),
}

/// One flattened entry.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct TocEntry {
    /// Display title.
    pub title: String,
    /// What selecting the entry navigates by.
    pub target: TocTarget,
    /// Archive path of the entry, fragment included.
    pub href: String,
    /// 0 for top-level entries.
    pub depth: usize,
}

/// A book's table of contents.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct TableOfContents {
    source: TocSource,
    entries: Vec<TocEntry>,
}

impl TableOfContents {
    fn flatten(
        nav: &Navigation,
        base_dir: &str,
        target: impl Fn(&NavPoint, &str) -> TocTarget,
    ) -> Vec<TocEntry> {
        walk(&nav.toc)
            .map(|(depth, point)| {
                let href = resolve_href(base_dir, &point.href);
                TocEntry {
                    title: point.label.clone(),
                    target: target(point, &href),
                    href,
                    depth,
                }
            })
            .collect()
    }

    /// Entries of a navigation document stored in `base_dir`.
    pub fn from_nav(nav: &Navigation, base_dir: &str) -> Self {
        Self {
            source: TocSource::Nav,
            entries: Self::flatten(nav, base_dir, |_, href| TocTarget::Href(href.to_string())),
        }
    }

    /// Entries of an NCX stored in `base_dir`, stably sorted by `playOrder`.
    /// Points without a usable `playOrder` go last and target their href.
    pub fn from_ncx(nav: &Navigation, base_dir: &str) -> Self {
        let mut entries = Self::flatten(nav, base_dir, |point, href| match point.play_order {
            Some(order) => TocTarget::PlayOrder(order),
            None => TocTarget::Href(href.to_string()),
        });
        entries.sort_by_key(|entry| match entry.target {
            TocTarget::PlayOrder(order) => (0, order),
            TocTarget::Href(_) => (1, 0),
        });
        Self {
            source: TocSource::Ncx,
            entries,
        }
    }

    /// Document the entries were read from.
    pub fn source(&self) -> TocSource {
        self.source
    }

    /// Entries in reading order.
    pub fn entries(&self) -> &[TocEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// -- EPUB 3 navigation document ---------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NavKind {
    Toc,
    PageList,
    Landmarks,
    Untyped,
    Other,
}

impl NavKind {
    fn of(reader: &Reader<&[u8]>, e: &BytesStart<'_>) -> Result<Self> {
        let Some(types) = find_attr(reader, e, b"type")? else {
            return Ok(NavKind::Untyped);
        };
        Ok(types
            .split_ascii_whitespace()
            .find_map(|token| match token {
                "toc" => Some(NavKind::Toc),
                "page-list" => Some(NavKind::PageList),
                "landmarks" => Some(NavKind::Landmarks),
                _ => None,
            })
            .unwrap_or(NavKind::Other))
    }
}

/// An `<li>` whose end tag has not been seen yet.
#[derive(Default)]
struct OpenItem {
    href: Option<String>,
    title: Option<String>,
    text: String,
    children: Vec<NavPoint>,
}

impl OpenItem {
    /// Items without a link hand their children up a level.
    fn close(self) -> std::result::Result<NavPoint, Vec<NavPoint>> {
        let Some(href) = self.href else {
            return Err(self.children);
        };
        let label = self
            .title
            .map(|t| collapse_whitespace(&t))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| collapse_whitespace(&self.text));
        Ok(NavPoint {
            label,
            href,
            play_order: None,
            children: self.children,
        })
    }
}

#[derive(Default)]
struct NavDocumentBuilder {
    nav: Navigation,
    typed_toc: bool,
    untyped: Option<Vec<NavPoint>>,
    kind: Option<NavKind>,
    open: Vec<OpenItem>,
    closed: Vec<NavPoint>,
    in_anchor: bool,
}

impl NavDocumentBuilder {
    fn start(&mut self, reader: &Reader<&[u8]>, e: &BytesStart<'_>, empty: bool) -> Result<()> {
        match local_name(e).as_slice() {
            b"nav" if self.kind.is_none() && !empty => {
                self.kind = Some(NavKind::of(reader, e)?);
                self.open.clear();
                self.closed.clear();
            }
            b"li" if self.kind.is_some() && !empty => self.open.push(OpenItem::default()),
            b"a" if self.kind.is_some() => {
                self.in_anchor = !empty;
                if let Some(item) = self.open.last_mut() {
                    item.href = find_attr(reader, e, b"href")?;
                    item.title = find_attr(reader, e, b"title")?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn text(&mut self, text: &str) {
        if !self.in_anchor {
            return;
        }
        if let Some(item) = self.open.last_mut() {
            item.text.push_str(text);
        }
    }

    fn end(&mut self, name: &[u8]) {
        match name {
            b"a" => self.in_anchor = false,
            b"li" if self.kind.is_some() => {
                let Some(item) = self.open.pop() else {
                    return;
                };
                let level = match self.open.last_mut() {
                    Some(parent) => &mut parent.children,
                    None => &mut self.closed,
                };
                match item.close() {
                    Ok(point) => level.push(point),
                    Err(orphans) => level.extend(orphans),
                }
            }
            b"nav" => {
                let Some(kind) = self.kind.take() else {
                    return;
                };
                let points = std::mem::take(&mut self.closed);
                self.open.clear();
                match kind {
                    NavKind::Toc if !self.typed_toc => {
                        self.nav.toc = points;
                        self.typed_toc = true;
                    }
                    NavKind::PageList => self.nav.page_list = points,
                    NavKind::Landmarks => self.nav.landmarks = points,
                    NavKind::Untyped if self.untyped.is_none() => self.untyped = Some(points),
                    _ => {}
                }
            }
            _ => {}
        }
    }

    fn finish(mut self) -> Navigation {
        if !self.typed_toc {
            if let Some(points) = self.untyped {
                self.nav.toc = points;
            }
        }
        self.nav
    }
}

/// Parse an EPUB 3 navigation document.
///
/// Reads the `toc`, `page-list` and `landmarks` navs. Without a nav typed
/// `toc`, the first untyped `<nav>` serves as the table of contents. An
/// anchor's `title` attribute wins over its text.
pub fn parse_nav_xhtml(content: &[u8]) -> Result<Navigation> {
    let mut reader = Reader::from_reader(content);

    let mut builder = NavDocumentBuilder::default();
    loop {
        match reader.read_event().map_err(|e| parse_error("Nav", e))? {
            Event::Start(e) => builder.start(&reader, &e, false)?,
            Event::Empty(e) => builder.start(&reader, &e, true)?,
            Event::Text(e) => builder.text(&decode(&reader, &e)?),
            Event::GeneralRef(e) => builder.text(&resolve_entity(&decode(&reader, &e)?)),
            Event::End(e) => builder.end(e.local_name().as_ref()),
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(builder.finish())
}

// -- EPUB 2 NCX ---------------------------------------------------------------

#[derive(Default)]
struct NcxBuilder {
    nav: Navigation,
    in_nav_map: bool,
    in_page_list: bool,
    in_text: bool,
    points: Vec<NavPoint>,
    page: Option<NavPoint>,
}

impl NcxBuilder {
    /// The page target or nav point that text and `<content>` belong to.
    fn current(&mut self) -> Option<&mut NavPoint> {
        match self.page.as_mut() {
            Some(page) => Some(page),
            None => self.points.last_mut(),
        }
    }

    fn start(&mut self, reader: &Reader<&[u8]>, e: &BytesStart<'_>) -> Result<()> {
        match local_name(e).as_slice() {
            b"navMap" => self.in_nav_map = true,
            b"pageList" => self.in_page_list = true,
            b"navPoint" if self.in_nav_map => {
                let play_order = find_attr(reader, e, b"playOrder")?
                    .and_then(|v| v.trim().parse::<u32>().ok());
                self.points.push(NavPoint {
                    play_order,
                    ..NavPoint::default()
                });
            }
            b"pageTarget" if self.in_page_list => self.page = Some(NavPoint::default()),
            b"text" => self.in_text = true,
            b"content" => {
                if let Some(src) = find_attr(reader, e, b"src")? {
                    if let Some(point) = self.current() {
                        point.href = src;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn text(&mut self, text: &str) {
        if self.in_text {
            if let Some(point) = self.current() {
                point.label.push_str(text);
            }
        }
    }

    fn end(&mut self, name: &[u8]) {
        match name {
            b"text" => self.in_text = false,
            b"navPoint" => {
                if let Some(mut done) = self.points.pop() {
                    done.label = collapse_whitespace(&done.label);
                    match self.points.last_mut() {
                        Some(parent) => parent.children.push(done),
                        None => self.nav.toc.push(done),
                    }
                }
            }
            b"pageTarget" => {
                if let Some(mut page) = self.page.take().filter(|p| !p.href.is_empty()) {
                    page.label = collapse_whitespace(&page.label);
                    self.nav.page_list.push(page);
                }
            }
            b"navMap" => self.in_nav_map = false,
            b"pageList" => self.in_page_list = false,
            _ => {}
        }
    }
}

/// Parse an EPUB 2 NCX: the `<navMap>` with each `playOrder`, and the
/// optional `<pageList>`.
pub fn parse_ncx(content: &[u8]) -> Result<Navigation> {
    let mut reader = Reader::from_reader(content);

    let mut builder = NcxBuilder::default();
    loop {
        match reader.read_event().map_err(|e| parse_error("NCX", e))? {
            Event::Start(e) | Event::Empty(e) => builder.start(&reader, &e)?,
            Event::Text(e) => builder.text(&decode(&reader, &e)?),
            Event::GeneralRef(e) => builder.text(&resolve_entity(&decode(&reader, &e)?)),
            Event::End(e) => builder.end(e.local_name().as_ref()),
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(builder.nav)
}
