//! Package resolver
//!
//! A [`Book`] resolves the structure of an opened archive:
//! `META-INF/container.xml` -> package document -> spine-ordered chapter
//! list and table of contents. Initialization happens once; every other
//! operation fails with `NotInitialized` until it has succeeded.
//!
//! Books are opened through a [`BookOpener`], a registry of container
//! formats that sniffs the archive and picks the matching [`Book`] variant.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OnceCell;

use crate::archive::{Archive, ArchiveEntries, ArchiveOptions, ArchiveSource};
use crate::blob::BlobStore;
use crate::error::{LectorError, Result};
use crate::href::{normalize_path, parent_dir, resolve_href, split_fragment};
use crate::metadata::{parse_container_xml, parse_opf, ManifestItem, PackageMetadata};
use crate::navigation::{parse_nav_xhtml, parse_ncx, TableOfContents};
use crate::resource::{Resource, ResourceOptions};
use crate::spine::{parse_spine, Spine};

/// Location of the OCF container document.
pub const CONTAINER_PATH: &str = "META-INF/container.xml";

/// Media type of EPUB 2 NCX documents.
pub const NCX_MEDIA_TYPE: &str = "application/x-dtbncx+xml";

/// Validation strictness for opening books.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum ValidationMode {
    /// Best-effort behavior for partial/quirky EPUBs.
    #[default]
    Lenient,
    /// Fail early for structural inconsistencies.
    Strict,
}

/// Configuration for opening books.
#[derive(Clone, Debug, Default)]
pub struct BookOptions {
    /// Archive reader configuration.
    pub archive: ArchiveOptions,
    /// Resource cache configuration.
    pub resources: ResourceOptions,
    /// Validation strictness.
    pub validation_mode: ValidationMode,
}

impl BookOptions {
    /// Set the archive options.
    pub fn with_archive_options(mut self, archive: ArchiveOptions) -> Self {
        self.archive = archive;
        self
    }

    /// Set the resource cache options.
    pub fn with_resource_options(mut self, resources: ResourceOptions) -> Self {
        self.resources = resources;
        self
    }

    /// Set the validation mode. Strict mode also makes the ZIP reader fail
    /// on a damaged central directory.
    pub fn with_validation_mode(mut self, mode: ValidationMode) -> Self {
        self.validation_mode = mode;
        self.archive.zip_limits = self
            .archive
            .zip_limits
            .with_strict(mode == ValidationMode::Strict);
        self
    }

    /// Enable strict validation mode.
    pub fn strict(self) -> Self {
        self.with_validation_mode(ValidationMode::Strict)
    }

    fn is_strict(&self) -> bool {
        self.validation_mode == ValidationMode::Strict
    }
}

/// Initialization state of a book.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BookState {
    /// `init` has not been called.
    Unopened,
    /// `init` is running.
    Initializing,
    /// Structure resolved.
    Ready,
    /// Initialization failed; the error is cached.
    Failed,
}

/// How a chapter is addressed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChapterRef {
    /// Spine position.
    Index(usize),
    /// Archive path, optionally with a `#fragment`.
    Href(String),
}

impl From<usize> for ChapterRef {
    fn from(index: usize) -> Self {
        ChapterRef::Index(index)
    }
}

impl From<&str> for ChapterRef {
    fn from(href: &str) -> Self {
        ChapterRef::Href(href.to_string())
    }
}

impl From<String> for ChapterRef {
    fn from(href: String) -> Self {
        ChapterRef::Href(href)
    }
}

impl fmt::Display for ChapterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChapterRef::Index(index) => write!(f, "chapter {}", index),
            ChapterRef::Href(href) => f.write_str(href),
        }
    }
}

/// One spine entry joined with its manifest item.
#[derive(Clone, Debug)]
pub struct Chapter {
    index: usize,
    id: String,
    media_type: String,
    linear: bool,
    resource: Resource,
}

impl Chapter {
    /// Position in the chapter list.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Manifest id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Archive path of the chapter document.
    pub fn path(&self) -> &str {
        self.resource.path()
    }

    /// Declared media type.
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// Whether the spine marks this chapter as part of the linear reading
    /// order.
    pub fn is_linear(&self) -> bool {
        self.linear
    }

    /// Cache handle for the chapter document.
    pub fn resource(&self) -> &Resource {
        &self.resource
    }
}

/// A chapter reference resolved against the chapter list.
#[derive(Clone, Debug)]
pub struct ResolvedChapter {
    /// The chapter.
    pub chapter: Chapter,
    /// Fragment of an href reference, without the `#`.
    pub fragment: Option<String>,
}

/// Parsed package document and everything derived from it.
#[derive(Debug)]
pub struct Package {
    opf_path: String,
    metadata: PackageMetadata,
    spine: Spine,
    chapters: Vec<Chapter>,
    toc: Option<TableOfContents>,
}

impl Package {
    /// Archive path of the package document.
    pub fn opf_path(&self) -> &str {
        &self.opf_path
    }

    /// Directory hrefs in the package document are relative to.
    pub fn base_dir(&self) -> &str {
        parent_dir(&self.opf_path)
    }

    /// Metadata and manifest.
    pub fn metadata(&self) -> &PackageMetadata {
        &self.metadata
    }

    /// Spine as declared.
    pub fn spine(&self) -> &Spine {
        &self.spine
    }
}

struct EpubInner {
    archive: Archive,
    options: BookOptions,
    started: AtomicBool,
    package: OnceCell<Result<Package>>,
    resources: Mutex<HashMap<String, Resource>>,
}

/// An EPUB book (OCF container).
#[derive(Clone)]
pub struct EpubBook {
    inner: Arc<EpubInner>,
}

impl fmt::Debug for EpubBook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EpubBook")
            .field("archive", &self.inner.archive)
            .field("state", &self.state())
            .finish()
    }
}

impl EpubBook {
    /// Wrap an archive. Nothing is read until [`EpubBook::init`].
    pub fn new(archive: Archive, options: BookOptions) -> Self {
        Self {
            inner: Arc::new(EpubInner {
                archive,
                options,
                started: AtomicBool::new(false),
                package: OnceCell::new(),
                resources: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Whether the archive looks like an EPUB container.
    pub fn sniff(entries: &ArchiveEntries) -> bool {
        entries.contains(CONTAINER_PATH) || entries.contains("mimetype")
    }

    /// The underlying archive.
    pub fn archive(&self) -> &Archive {
        &self.inner.archive
    }

    /// Options this book was opened with.
    pub fn options(&self) -> &BookOptions {
        &self.inner.options
    }

    /// Initialization state.
    pub fn state(&self) -> BookState {
        match self.inner.package.get() {
            Some(Ok(_)) => BookState::Ready,
            Some(Err(_)) => BookState::Failed,
            None if self.inner.started.load(Ordering::Acquire) => BookState::Initializing,
            None => BookState::Unopened,
        }
    }

    /// Resolve the book structure. Concurrent callers share one
    /// initialization and its outcome.
    pub async fn init(&self) -> Result<()> {
        self.inner.started.store(true, Ordering::Release);
        self.inner
            .package
            .get_or_init(|| self.load())
            .await
            .as_ref()
            .map(|_| ())
            .map_err(Clone::clone)
    }

    /// The parsed package. Fails with `NotInitialized` before `init`.
    pub fn package(&self) -> Result<&Package> {
        match self.inner.package.get() {
            Some(Ok(package)) => Ok(package),
            Some(Err(err)) => Err(err.clone()),
            None => Err(LectorError::NotInitialized("book")),
        }
    }

    /// Package metadata.
    pub fn metadata(&self) -> Result<&PackageMetadata> {
        Ok(&self.package()?.metadata)
    }

    /// Book title.
    pub fn title(&self) -> Result<Option<&str>> {
        Ok(self.metadata()?.title.as_deref())
    }

    /// Primary author.
    pub fn author(&self) -> Result<Option<&str>> {
        Ok(self.metadata()?.author.as_deref())
    }

    /// Chapters in spine order.
    pub fn chapters(&self) -> Result<&[Chapter]> {
        Ok(&self.package()?.chapters)
    }

    /// Number of chapters.
    pub fn chapter_count(&self) -> Result<usize> {
        Ok(self.chapters()?.len())
    }

    /// Table of contents, if the book has one.
    pub fn toc(&self) -> Result<Option<&TableOfContents>> {
        Ok(self.package()?.toc.as_ref())
    }

    /// Look up a chapter. Href references ignore their fragment.
    pub fn chapter(&self, chapter_ref: &ChapterRef) -> Result<Chapter> {
        self.resolve(chapter_ref).map(|resolved| resolved.chapter)
    }

    /// Look up a chapter, keeping the fragment of an href reference.
    pub fn resolve(&self, chapter_ref: &ChapterRef) -> Result<ResolvedChapter> {
        let chapters = self.chapters()?;
        let not_found = || LectorError::ChapterNotFound(chapter_ref.to_string());
        match chapter_ref {
            ChapterRef::Index(index) => chapters
                .get(*index)
                .cloned()
                .map(|chapter| ResolvedChapter {
                    chapter,
                    fragment: None,
                })
                .ok_or_else(not_found),
            ChapterRef::Href(href) => {
                let (path, fragment) = split_fragment(href);
                let path = normalize_path(path);
                let entry = self
                    .inner
                    .archive
                    .entries()?
                    .get(&path)
                    .ok_or_else(not_found)?;
                chapters
                    .iter()
                    .find(|chapter| chapter.resource.entry().same_entry(entry))
                    .cloned()
                    .map(|chapter| ResolvedChapter {
                        chapter,
                        fragment: fragment.filter(|f| !f.is_empty()).map(str::to_string),
                    })
                    .ok_or_else(not_found)
            }
        }
    }

    /// The cache handle for an archive path. The same entry is never
    /// wrapped twice. Unknown paths fail with `NotFound`.
    pub fn get_resource(&self, path: &str) -> Result<Resource> {
        self.package()?;
        self.resource_for(path)
    }

    /// Ephemeral URL store resources materialize into.
    pub fn blobs(&self) -> &BlobStore {
        self.inner.archive.blobs()
    }

    fn resource_for(&self, path: &str) -> Result<Resource> {
        let (path, _) = split_fragment(path);
        let entry = self.inner.archive.entry(&normalize_path(path))?;
        let mut resources = self
            .inner
            .resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let resource = resources
            .entry(entry.path().to_string())
            .or_insert_with(|| {
                Resource::new(
                    entry.clone(),
                    self.blobs().clone(),
                    self.inner.options.resources,
                )
            });
        Ok(resource.clone())
    }

    async fn read_entry(&self, path: &str) -> Result<Vec<u8>> {
        self.inner.archive.entry(path)?.read_bytes().await
    }

    async fn load(&self) -> Result<Package> {
        let archive = &self.inner.archive;
        let strict = self.inner.options.is_strict();
        log::debug!("[BOOK] Initializing {}", archive.source().describe());

        archive.init().await?;
        if strict {
            archive.validate_mimetype().await?;
        }

        let container = self.read_entry(CONTAINER_PATH).await?;
        let opf_path = normalize_path(&parse_container_xml(&container)?);
        let opf = self.read_entry(&opf_path).await?;
        let metadata = parse_opf(&opf)?;
        let spine = parse_spine(&opf)?;
        let base_dir = parent_dir(&opf_path);

        let mut chapters = Vec::with_capacity(spine.len());
        for item in spine.items() {
            let Some(manifest_item) = metadata.get_item(&item.idref) else {
                if strict {
                    return Err(LectorError::Parse(format!(
                        "spine references missing manifest item '{}'",
                        item.idref
                    )));
                }
                log::warn!(
                    "[BOOK] Skipping spine itemref '{}': no manifest item",
                    item.idref
                );
                continue;
            };
            let href = resolve_href(base_dir, &manifest_item.href);
            let resource = self.resource_for(&href)?;
            chapters.push(Chapter {
                index: chapters.len(),
                id: manifest_item.id.clone(),
                media_type: manifest_item.media_type.clone(),
                linear: item.linear,
                resource,
            });
        }

        let toc = self.load_toc(&metadata, &spine, base_dir).await?;
        log::info!(
            "[BOOK] Opened '{}' ({} chapters, toc: {})",
            metadata.title.as_deref().unwrap_or("untitled"),
            chapters.len(),
            toc.as_ref()
                .map(|t| format!("{:?}, {} entries", t.source(), t.len()))
                .unwrap_or_else(|| "none".into())
        );

        Ok(Package {
            opf_path,
            metadata,
            spine,
            chapters,
            toc,
        })
    }

    async fn load_toc(
        &self,
        metadata: &PackageMetadata,
        spine: &Spine,
        base_dir: &str,
    ) -> Result<Option<TableOfContents>> {
        if let Some(item) = metadata.nav_item() {
            return self.read_toc(item, base_dir, false).await;
        }
        let ncx = spine
            .toc_id()
            .and_then(|id| metadata.get_item(id))
            .or_else(|| metadata.first_item_of_type(NCX_MEDIA_TYPE));
        match ncx {
            Some(item) => self.read_toc(item, base_dir, true).await,
            None => Ok(None),
        }
    }

    async fn read_toc(
        &self,
        item: &ManifestItem,
        base_dir: &str,
        ncx: bool,
    ) -> Result<Option<TableOfContents>> {
        let href = resolve_href(base_dir, &item.href);
        let (path, _) = split_fragment(&href);
        let parsed = match self.read_entry(path).await {
            Ok(bytes) => {
                if ncx {
                    parse_ncx(&bytes).map(|nav| TableOfContents::from_ncx(&nav, parent_dir(path)))
                } else {
                    parse_nav_xhtml(&bytes)
                        .map(|nav| TableOfContents::from_nav(&nav, parent_dir(path)))
                }
            }
            Err(err) => Err(err),
        };
        match parsed {
            Ok(toc) => Ok(Some(toc)),
            Err(err) if self.inner.options.is_strict() => Err(err),
            Err(err) => {
                log::warn!("[BOOK] Ignoring table of contents '{}': {}", path, err);
                Ok(None)
            }
        }
    }
}

/// A book in one of the supported container formats.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Book {
    /// EPUB (OCF zip container).
    Epub(EpubBook),
}

impl From<EpubBook> for Book {
    fn from(book: EpubBook) -> Self {
        Book::Epub(book)
    }
}

impl Book {
    /// Open an EPUB without going through a [`BookOpener`].
    pub fn epub(source: impl Into<ArchiveSource>, options: BookOptions) -> Self {
        let archive = Archive::open(source, options.archive.clone());
        Book::Epub(EpubBook::new(archive, options))
    }

    /// Resolve the book structure.
    pub async fn init(&self) -> Result<()> {
        match self {
            Book::Epub(book) => book.init().await,
        }
    }

    /// Initialization state.
    pub fn state(&self) -> BookState {
        match self {
            Book::Epub(book) => book.state(),
        }
    }

    /// The underlying archive.
    pub fn archive(&self) -> &Archive {
        match self {
            Book::Epub(book) => book.archive(),
        }
    }

    /// Ephemeral URL store of this book's resources.
    pub fn blobs(&self) -> &BlobStore {
        match self {
            Book::Epub(book) => book.blobs(),
        }
    }

    /// Package metadata.
    pub fn metadata(&self) -> Result<&PackageMetadata> {
        match self {
            Book::Epub(book) => book.metadata(),
        }
    }

    /// Book title.
    pub fn title(&self) -> Result<Option<&str>> {
        match self {
            Book::Epub(book) => book.title(),
        }
    }

    /// Primary author.
    pub fn author(&self) -> Result<Option<&str>> {
        match self {
            Book::Epub(book) => book.author(),
        }
    }

    /// Chapters in reading order.
    pub fn chapters(&self) -> Result<&[Chapter]> {
        match self {
            Book::Epub(book) => book.chapters(),
        }
    }

    /// Number of chapters.
    pub fn chapter_count(&self) -> Result<usize> {
        match self {
            Book::Epub(book) => book.chapter_count(),
        }
    }

    /// Look up a chapter.
    pub fn chapter(&self, chapter_ref: &ChapterRef) -> Result<Chapter> {
        match self {
            Book::Epub(book) => book.chapter(chapter_ref),
        }
    }

    /// Look up a chapter, keeping the fragment of an href reference.
    pub fn resolve(&self, chapter_ref: &ChapterRef) -> Result<ResolvedChapter> {
        match self {
            Book::Epub(book) => book.resolve(chapter_ref),
        }
    }

    /// Cache handle for an archive path.
    pub fn get_resource(&self, path: &str) -> Result<Resource> {
        match self {
            Book::Epub(book) => book.get_resource(path),
        }
    }

    /// Table of contents.
    pub fn toc(&self) -> Result<Option<&TableOfContents>> {
        match self {
            Book::Epub(book) => book.toc(),
        }
    }

    /// Whether two handles refer to the same book.
    pub fn same_book(&self, other: &Book) -> bool {
        match (self, other) {
            (Book::Epub(a), Book::Epub(b)) => Arc::ptr_eq(&a.inner, &b.inner),
        }
    }
}

/// One container format known to a [`BookOpener`].
pub trait BookFormat: Send + Sync {
    /// Short format name used in logs.
    fn name(&self) -> &'static str;

    /// Whether the archive is in this format.
    fn sniff(&self, entries: &ArchiveEntries) -> bool;

    /// Wrap the (initialized) archive.
    fn open(&self, archive: Archive, options: BookOptions) -> Book;
}

/// The EPUB format.
#[derive(Clone, Copy, Debug, Default)]
pub struct EpubFormat;

impl BookFormat for EpubFormat {
    fn name(&self) -> &'static str {
        "epub"
    }

    fn sniff(&self, entries: &ArchiveEntries) -> bool {
        EpubBook::sniff(entries)
    }

    fn open(&self, archive: Archive, options: BookOptions) -> Book {
        Book::Epub(EpubBook::new(archive, options))
    }
}

/// Registry of container formats, tried in registration order.
pub struct BookOpener {
    formats: Vec<Box<dyn BookFormat>>,
    options: BookOptions,
}

impl fmt::Debug for BookOpener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BookOpener")
            .field(
                "formats",
                &self.formats.iter().map(|f| f.name()).collect::<Vec<_>>(),
            )
            .field("options", &self.options)
            .finish()
    }
}

impl Default for BookOpener {
    fn default() -> Self {
        Self::new(BookOptions::default())
    }
}

impl BookOpener {
    /// Opener with every built-in format registered.
    pub fn new(options: BookOptions) -> Self {
        Self {
            formats: vec![Box::new(EpubFormat)],
            options,
        }
    }

    /// Opener with no formats registered.
    pub fn empty(options: BookOptions) -> Self {
        Self {
            formats: Vec::new(),
            options,
        }
    }

    /// Register another format, tried after the existing ones.
    pub fn register(&mut self, format: Box<dyn BookFormat>) {
        self.formats.push(format);
    }

    /// Options books are opened with.
    pub fn options(&self) -> &BookOptions {
        &self.options
    }

    /// Read the archive and pick the first format that recognizes it. The
    /// returned book is not initialized yet.
    pub async fn open(&self, source: impl Into<ArchiveSource>) -> Result<Book> {
        let archive = Archive::open(source, self.options.archive.clone());
        archive.init().await?;
        let entries = archive.entries()?;
        for format in &self.formats {
            if format.sniff(entries) {
                log::debug!(
                    "[BOOK] {} recognized as {}",
                    archive.source().describe(),
                    format.name()
                );
                return Ok(format.open(archive, self.options.clone()));
            }
        }
        Err(LectorError::NotFound(format!(
            "no supported book format in {}",
            archive.source().describe()
        )))
    }
}
