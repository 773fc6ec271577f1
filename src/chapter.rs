//! Chapter rendering
//!
//! [`ChapterContents`] turns one spine chapter into a self-contained
//! displayable document: referenced stylesheets, images, frames and scripts
//! are acquired from the resource cache, the markup is rewritten to point at
//! them, and the result is registered as an ephemeral URL.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::OnceCell;
use tokio::task::JoinSet;

use crate::book::{Book, Chapter};
use crate::error::{LectorError, Result};
use crate::resource::{HolderId, Resource, Retain};
use crate::rewrite::{collect_references, rewrite_chapter, END_SENTINEL_ID};
use crate::settings::{RenderSettings, SharedSettings};

/// Media type rendered chapters are registered under.
pub const CHAPTER_MEDIA_TYPE: &str = "application/xhtml+xml";

#[derive(Default)]
struct ChapterState {
    loading: Option<Arc<OnceCell<Result<String>>>>,
    url: Option<String>,
    title: Option<String>,
    acquired: Vec<Resource>,
    entry_held: bool,
}

struct ChapterInner {
    key: HolderId,
    book: Book,
    chapter: Chapter,
    settings: SharedSettings,
    // Serializes render and unload in call order.
    queue: tokio::sync::Mutex<()>,
    state: Mutex<ChapterState>,
}

impl ChapterInner {
    fn state(&self) -> MutexGuard<'_, ChapterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Release on a failure path, where the rendering error is the one to report.
fn release_logged(resource: &Resource, key: HolderId) {
    if let Err(err) = resource.release(key) {
        log::warn!("[CHAPTER] Failed to release {}: {}", resource.path(), err);
    }
}

/// Render state of one chapter. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ChapterContents {
    inner: Arc<ChapterInner>,
}

impl fmt::Debug for ChapterContents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state();
        f.debug_struct("ChapterContents")
            .field("index", &self.index())
            .field("path", &self.path())
            .field("key", &self.inner.key)
            .field("url", &state.url)
            .field("acquired", &state.acquired.len())
            .finish()
    }
}

impl ChapterContents {
    /// Render state for `chapter` of `book`. Nothing is read until
    /// [`ChapterContents::load`]. Each rendering uses the value `settings`
    /// holds at that time.
    pub fn new(book: Book, chapter: Chapter, settings: impl Into<SharedSettings>) -> Self {
        Self {
            inner: Arc::new(ChapterInner {
                key: HolderId::next(),
                book,
                chapter,
                settings: settings.into(),
                queue: tokio::sync::Mutex::new(()),
                state: Mutex::new(ChapterState::default()),
            }),
        }
    }

    /// Key this chapter acquires resources with.
    pub fn key(&self) -> HolderId {
        self.inner.key
    }

    /// Spine index.
    pub fn index(&self) -> usize {
        self.inner.chapter.index()
    }

    /// Archive path of the chapter document.
    pub fn path(&self) -> &str {
        self.inner.chapter.path()
    }

    /// The spine chapter.
    pub fn chapter(&self) -> &Chapter {
        &self.inner.chapter
    }

    /// Settings the next rendering will use.
    pub fn settings(&self) -> RenderSettings {
        self.inner.settings.get()
    }

    /// `<title>` of the chapter document, once loaded.
    pub fn title(&self) -> Option<String> {
        self.inner.state().title.clone()
    }

    /// URL of the rendered document, once loaded.
    pub fn as_url(&self) -> Option<String> {
        self.inner.state().url.clone()
    }

    /// Whether a rendered document is currently registered.
    pub fn is_loaded(&self) -> bool {
        self.inner.state().url.is_some()
    }

    /// Resources acquired for the current rendering.
    pub fn acquired_resources(&self) -> Vec<Resource> {
        self.inner.state().acquired.clone()
    }

    /// Render the chapter and return its URL, with `#lector_end` appended
    /// when `end_of_chapter` is set.
    ///
    /// Concurrent and repeated calls share one rendering. A failed
    /// rendering is not cached; the next call retries.
    pub async fn load(&self, end_of_chapter: bool) -> Result<String> {
        let cell = {
            let mut state = self.inner.state();
            Arc::clone(
                state
                    .loading
                    .get_or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        let result = cell
            .get_or_init(|| async {
                let _turn = self.inner.queue.lock().await;
                self.render().await
            })
            .await;

        match result {
            Ok(url) if end_of_chapter => Ok(format!("{}#{}", url, END_SENTINEL_ID)),
            Ok(url) => Ok(url.clone()),
            Err(err) => {
                let mut state = self.inner.state();
                if state
                    .loading
                    .as_ref()
                    .is_some_and(|current| Arc::ptr_eq(current, &cell))
                {
                    state.loading = None;
                }
                Err(err.clone())
            }
        }
    }

    async fn render(&self) -> Result<String> {
        let key = self.inner.key;
        let chapter = &self.inner.chapter;
        let entry = chapter.resource();

        let doc = match entry.as_document(key, Retain::Keep).await {
            Ok(doc) => doc,
            Err(err) => {
                if entry.is_held_by(key) {
                    release_logged(entry, key);
                }
                log::warn!("[CHAPTER] Failed to read {}: {}", chapter.path(), err);
                return Err(err);
            }
        };

        let paths = match collect_references(doc.text(), chapter.path()) {
            Ok(paths) => paths,
            Err(err) => {
                release_logged(entry, key);
                return Err(err);
            }
        };

        let (urls, acquired) = self.acquire_all(paths).await;

        let settings = self.inner.settings.get();
        let markup = match rewrite_chapter(doc.text(), chapter.path(), &urls, &settings) {
            Ok(markup) => markup,
            Err(err) => {
                for resource in &acquired {
                    release_logged(resource, key);
                }
                release_logged(entry, key);
                log::warn!("[CHAPTER] Failed to rewrite {}: {}", chapter.path(), err);
                return Err(err);
            }
        };

        let url = self
            .inner
            .book
            .blobs()
            .create(markup.into_bytes(), CHAPTER_MEDIA_TYPE);
        log::debug!(
            "[CHAPTER] Rendered {} as {} ({} resources)",
            chapter.path(),
            url,
            acquired.len()
        );

        let mut state = self.inner.state();
        state.url = Some(url.clone());
        state.title = doc.title().map(str::to_string);
        state.acquired = acquired;
        state.entry_held = true;
        Ok(url)
    }

    /// Acquire every referenced path concurrently. Paths that cannot be
    /// resolved or materialized are logged and left out.
    async fn acquire_all(&self, paths: Vec<String>) -> (HashMap<String, String>, Vec<Resource>) {
        let key = self.inner.key;
        let mut tasks = JoinSet::new();
        for path in paths {
            match self.inner.book.get_resource(&path) {
                Ok(resource) => {
                    tasks.spawn(async move {
                        let url = resource.as_ephemeral_url(key).await;
                        (path, resource, url)
                    });
                }
                Err(err) => {
                    log::warn!(
                        "[CHAPTER] {} references '{}': {}",
                        self.path(),
                        path,
                        err
                    );
                }
            }
        }

        let mut urls = HashMap::new();
        let mut acquired: Vec<Resource> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((path, resource, Ok(url))) => {
                    urls.insert(path, url);
                    if !acquired.iter().any(|held| held.same_resource(&resource)) {
                        acquired.push(resource);
                    }
                }
                Ok((path, _, Err(err))) => {
                    log::warn!("[CHAPTER] Could not acquire '{}': {}", path, err);
                }
                Err(err) => {
                    log::warn!("[CHAPTER] Acquisition task failed: {}", err);
                }
            }
        }
        (urls, acquired)
    }

    /// Release everything the rendering acquired and revoke its URL. Waits
    /// for an in-flight rendering to finish first.
    pub async fn unload(&self) -> Result<()> {
        self.inner.state().loading = None;
        let _turn = self.inner.queue.lock().await;

        let (url, acquired, entry_held) = {
            let mut state = self.inner.state();
            state.title = None;
            (
                state.url.take(),
                std::mem::take(&mut state.acquired),
                std::mem::take(&mut state.entry_held),
            )
        };

        let key = self.inner.key;
        let mut first_err: Option<LectorError> = None;
        for resource in &acquired {
            if let Err(err) = resource.release(key) {
                first_err.get_or_insert(err);
            }
        }
        if entry_held {
            if let Err(err) = self.inner.chapter.resource().release(key) {
                first_err.get_or_insert(err);
            }
        }
        if let Some(url) = url {
            self.inner.book.blobs().revoke(&url);
            log::debug!("[CHAPTER] Unloaded {} ({})", self.path(), url);
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveOptions;
    use crate::book::{BookOptions, ChapterRef};
    use crate::rewrite::{goto_href, INJECT_SCRIPT_ID, WRAPPER_ID};
    use crate::testutil::{chapter_xhtml, epub, opf};

    fn options() -> BookOptions {
        BookOptions::default().with_archive_options(ArchiveOptions::default().with_offload(false))
    }

    async fn illustrated_book(chapter_body: &str) -> Book {
        let manifest = r#"
          <item id="c1" href="text/ch1.xhtml" media-type="application/xhtml+xml"/>
          <item id="c2" href="text/ch2.xhtml" media-type="application/xhtml+xml"/>
          <item id="css" href="style.css" media-type="text/css"/>
          <item id="img" href="images/a.png" media-type="image/png"/>"#;
        let spine = r#"<itemref idref="c1"/><itemref idref="c2"/>"#;
        let ch1 = chapter_xhtml("One", chapter_body)
            .replace("<head>", r#"<head><link rel="stylesheet" href="../style.css"/>"#);
        let ch2 = chapter_xhtml("Two", "<p>two</p>");
        let data = epub(
            &opf(manifest, "", spine),
            &[
                ("OEBPS/text/ch1.xhtml", ch1.as_str()),
                ("OEBPS/text/ch2.xhtml", ch2.as_str()),
                ("OEBPS/style.css", "p { color: black }"),
                ("OEBPS/images/a.png", "PNG"),
            ],
        );
        let book = Book::epub(data, options());
        book.init().await.unwrap();
        book
    }

    fn contents(book: &Book, index: usize) -> ChapterContents {
        let chapter = book.chapter(&ChapterRef::Index(index)).unwrap();
        ChapterContents::new(book.clone(), chapter, RenderSettings::default())
    }

    fn rendered(book: &Book, url: &str) -> String {
        let blob = book.blobs().get(url).unwrap();
        assert_eq!(blob.media_type, CHAPTER_MEDIA_TYPE);
        String::from_utf8(blob.data.to_vec()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_rewrites_references() {
        let book = illustrated_book(
            r#"<p><img src="../images/a.png" width="100%"/><a href="ch2.xhtml#s1">next</a> <a href="https://example.com/">web</a></p>"#,
        )
        .await;
        let chapter = contents(&book, 0);
        let url = chapter.load(false).await.unwrap();

        let html = rendered(&book, &url);
        let image = book.get_resource("OEBPS/images/a.png").unwrap();
        let css = book.get_resource("OEBPS/style.css").unwrap();
        assert!(image.is_held_by(chapter.key()));
        assert!(css.is_held_by(chapter.key()));
        assert!(!html.contains("../images/a.png"));
        assert!(!html.contains("width="));
        let goto = goto_href("OEBPS/text/ch2.xhtml#s1");
        assert!(html.contains(&*quick_xml::escape::escape(goto.as_str())));
        assert!(html.contains(r#"href="https://example.com/""#));
        assert!(html.contains(WRAPPER_ID));
        assert!(html.contains(INJECT_SCRIPT_ID));
        assert_eq!(chapter.title().as_deref(), Some("One"));
        assert_eq!(chapter.acquired_resources().len(), 2);
        assert_eq!(chapter.as_url(), Some(url));
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_is_shared_and_end_suffixed() {
        let book = illustrated_book("<p>plain</p>").await;
        let chapter = contents(&book, 0);
        let (a, b) = tokio::join!(chapter.load(false), chapter.load(true));
        let a = a.unwrap();
        assert_eq!(b.unwrap(), format!("{}#lector_end", a));
        assert_eq!(chapter.chapter().resource().materializations(), 1);
        assert_eq!(chapter.load(false).await.unwrap(), a);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unload_releases_everything() {
        let book = illustrated_book(r#"<img src="../images/a.png"/>"#).await;
        let chapter = contents(&book, 0);
        let url = chapter.load(false).await.unwrap();
        let image = book.get_resource("OEBPS/images/a.png").unwrap();
        let entry = chapter.chapter().resource().clone();

        chapter.unload().await.unwrap();
        assert!(!chapter.is_loaded());
        assert!(!book.blobs().contains(&url));
        assert_eq!(image.holder_count(), 0);
        assert_eq!(entry.holder_count(), 0);

        // Revocation waits out the grace period.
        assert!(image.is_materialized());
        tokio::time::sleep(std::time::Duration::from_millis(1001)).await;
        assert!(!image.is_materialized());

        // Loading again renders afresh.
        let again = chapter.load(false).await.unwrap();
        assert_ne!(again, url);
        assert!(image.is_held_by(chapter.key()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_reference_is_not_fatal() {
        let book = illustrated_book(r#"<img src="../images/missing.png"/>"#).await;
        let chapter = contents(&book, 0);
        let url = chapter.load(false).await.unwrap();
        assert!(rendered(&book, &url).contains("../images/missing.png"));
        assert_eq!(chapter.acquired_resources().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unparseable_chapter_acquires_nothing() {
        let manifest = r#"<item id="c1" href="bad.xhtml" media-type="application/xhtml+xml"/>"#;
        let data = epub(
            &opf(manifest, "", r#"<itemref idref="c1"/>"#),
            &[("OEBPS/bad.xhtml", "no markup here")],
        );
        let book = Book::epub(data, options());
        book.init().await.unwrap();
        let chapter = contents(&book, 0);

        let err = chapter.load(false).await.unwrap_err();
        assert!(matches!(err, LectorError::Parse(_)));
        assert_eq!(chapter.chapter().resource().holder_count(), 0);
        assert!(chapter.acquired_resources().is_empty());
        assert!(!chapter.is_loaded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rewrite_failure_releases_acquired_resources() {
        // Only the rewriter reads <body> attributes, so this fails after
        // the image and stylesheet were acquired.
        let book = illustrated_book(r#"<img src="../images/a.png"/><body class=inner></body>"#).await;
        let chapter = contents(&book, 0);
        let image = book.get_resource("OEBPS/images/a.png").unwrap();
        let css = book.get_resource("OEBPS/style.css").unwrap();

        let err = chapter.load(false).await.unwrap_err();
        assert!(matches!(err, LectorError::Parse(_)));
        assert_eq!(image.holder_count(), 0);
        assert_eq!(css.holder_count(), 0);
        assert_eq!(chapter.chapter().resource().holder_count(), 0);
        assert!(!chapter.is_loaded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rendering_reads_settings_at_load_time() {
        let book = illustrated_book("<p>text</p>").await;
        let chapter = book.chapter(&ChapterRef::Index(0)).unwrap();
        let shared = SharedSettings::from(RenderSettings::default());
        let contents = ChapterContents::new(book.clone(), chapter, shared.clone());

        let first = contents.load(false).await.unwrap();
        assert!(!rendered(&book, &first).contains("font-size"));
        contents.unload().await.unwrap();

        shared.update(|s| s.font_size = Some("150%".into()));
        let second = contents.load(false).await.unwrap();
        assert!(rendered(&book, &second).contains("font-size: 150%"));
        assert_eq!(contents.settings().font_size.as_deref(), Some("150%"));
    }
}
