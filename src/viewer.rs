//! Viewer controller
//!
//! [`BookViewer`] drives a [`DisplaySurface`] running the paginator: it
//! opens books, renders chapters through [`ChapterContents`], hands their
//! URLs to the surface and reacts to the messages the surface sends back.
//!
//! Navigations may overlap. Each one whose target resolves takes a
//! generation number and only the newest is allowed to touch the surface;
//! older ones finish as [`NavigationOutcome::Superseded`] and unload what
//! they rendered unless it is on display.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::archive::ArchiveSource;
use crate::book::{Book, BookOpener, BookOptions, ChapterRef};
use crate::chapter::ChapterContents;
use crate::error::{LectorError, Result};
use crate::href::split_fragment;
use crate::notifications::{Notifications, ViewerEvent};
use crate::protocol::{key_direction, HostMessage, ScrollTarget, SurfaceMessage};
use crate::settings::{RenderSettings, SettingsProvider, SharedSettings};

/// The isolated display context chapters are shown in.
pub trait DisplaySurface: Send + Sync {
    /// Load the document at `url` (fragment included).
    fn set_source(&self, url: &str);

    /// Deliver a message to the paginator.
    fn post_message(&self, message: HostMessage);
}

/// Viewer configuration.
#[derive(Clone, Debug, Default)]
pub struct ViewerOptions {
    /// Options books are opened with.
    pub book: BookOptions,
    /// Settings chapters are rendered with.
    pub settings: RenderSettings,
}

impl ViewerOptions {
    /// Set the book options.
    pub fn with_book_options(mut self, book: BookOptions) -> Self {
        self.book = book;
        self
    }

    /// Set the render settings.
    pub fn with_settings(mut self, settings: RenderSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Take font size and theme defaults from `provider`.
    pub fn with_provider(mut self, provider: &dyn SettingsProvider) -> Self {
        self.settings.apply(provider);
        self
    }
}

/// Lifecycle of a [`BookViewer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewerPhase {
    /// No book.
    Closed,
    /// A book is being opened or initialized.
    Opening,
    /// A book is open.
    Open {
        /// Whether a chapter transition is in progress.
        navigating: bool,
    },
}

/// How a navigation ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NavigationOutcome {
    /// The surface shows the requested chapter.
    Displayed,
    /// A newer navigation started before this one finished.
    Superseded,
}

struct BookView {
    id: u64,
    book: Book,
    by_path: HashMap<String, ChapterContents>,
    by_url: HashMap<String, ChapterContents>,
    current: Option<ChapterContents>,
    // Navigations waiting on each chapter path.
    in_flight: HashMap<String, usize>,
}

impl BookView {
    fn new(id: u64, book: Book) -> Self {
        Self {
            id,
            book,
            by_path: HashMap::new(),
            by_url: HashMap::new(),
            current: None,
            in_flight: HashMap::new(),
        }
    }

    fn is_current(&self, contents: &ChapterContents) -> bool {
        self.current
            .as_ref()
            .is_some_and(|current| current.key() == contents.key())
    }

    /// Whether no other navigation is still waiting on `path`.
    fn finish_loading(&mut self, path: &str) -> bool {
        match self.in_flight.get_mut(path) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            _ => {
                self.in_flight.remove(path);
                true
            }
        }
    }

    /// Forget a chapter nobody shows or waits for.
    fn forget(&mut self, contents: &ChapterContents) {
        let key = contents.key();
        self.by_path.retain(|_, held| held.key() != key);
        self.by_url.retain(|_, held| held.key() != key);
    }
}

/// Host-side orchestrator for one display surface.
pub struct BookViewer<S: DisplaySurface> {
    surface: S,
    opener: BookOpener,
    notifications: Notifications,
    settings: SharedSettings,
    phase: Mutex<ViewerPhase>,
    view: Mutex<Option<BookView>>,
    generation: AtomicU64,
    views: AtomicU64,
}

impl<S: DisplaySurface> std::fmt::Debug for BookViewer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookViewer")
            .field("phase", &self.phase())
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<S: DisplaySurface> BookViewer<S> {
    /// Viewer for `surface` with every built-in book format.
    pub fn new(surface: S, options: ViewerOptions) -> Self {
        Self::with_opener(surface, BookOpener::new(options.book), options.settings)
    }

    /// Viewer that opens books through `opener`.
    pub fn with_opener(surface: S, opener: BookOpener, settings: RenderSettings) -> Self {
        Self {
            surface,
            opener,
            notifications: Notifications::new(),
            settings: SharedSettings::from(settings),
            phase: Mutex::new(ViewerPhase::Closed),
            view: Mutex::new(None),
            generation: AtomicU64::new(0),
            views: AtomicU64::new(0),
        }
    }

    /// The display surface.
    pub fn surface(&self) -> &S {
        &self.surface
    }

    /// Event hub listeners subscribe to.
    pub fn notifications(&self) -> &Notifications {
        &self.notifications
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> ViewerPhase {
        *lock(&self.phase)
    }

    /// Settings chapters are rendered with.
    pub fn settings(&self) -> RenderSettings {
        self.settings.get()
    }

    /// The book being viewed.
    pub fn book(&self) -> Option<Book> {
        lock(&self.view).as_ref().map(|view| view.book.clone())
    }

    /// The chapter shown on the surface.
    pub fn current_chapter(&self) -> Option<ChapterContents> {
        lock(&self.view)
            .as_ref()
            .and_then(|view| view.current.clone())
    }

    fn set_phase(&self, phase: ViewerPhase) {
        *lock(&self.phase) = phase;
    }

    fn set_navigating(&self, navigating: bool) {
        let mut phase = lock(&self.phase);
        if let ViewerPhase::Open { .. } = *phase {
            *phase = ViewerPhase::Open { navigating };
        }
    }

    /// Open a book and show `chapter_ref`.
    pub async fn open(
        &self,
        source: impl Into<ArchiveSource>,
        chapter_ref: impl Into<ChapterRef>,
        end_of_chapter: bool,
    ) -> Result<NavigationOutcome> {
        let source = source.into();
        self.notifications.publish(ViewerEvent::BookOpening {
            source: source.describe(),
        });
        self.set_phase(ViewerPhase::Opening);
        log::info!("[VIEWER] Opening {}", source.describe());

        match self.opener.open(source).await {
            Ok(book) => self.view(book, chapter_ref, end_of_chapter).await,
            Err(err) => {
                self.opening_failed(err.clone());
                Err(err)
            }
        }
    }

    fn opening_failed(&self, error: LectorError) {
        log::warn!("[VIEWER] Failed to open book: {}", error);
        self.set_phase(ViewerPhase::Closed);
        self.notifications
            .publish(ViewerEvent::BookOpeningFailed { error });
    }

    /// Replace the viewed book and show `chapter_ref`.
    pub async fn view(
        &self,
        book: Book,
        chapter_ref: impl Into<ChapterRef>,
        end_of_chapter: bool,
    ) -> Result<NavigationOutcome> {
        self.dispose().await;
        self.set_phase(ViewerPhase::Opening);

        let id = self.views.fetch_add(1, Ordering::SeqCst) + 1;
        *lock(&self.view) = Some(BookView::new(id, book.clone()));

        let opened = async {
            book.init().await?;
            Ok::<_, LectorError>(ViewerEvent::BookOpened {
                title: book.title()?.map(str::to_string),
                author: book.author()?.map(str::to_string),
                chapters: book.chapter_count()?,
            })
        }
        .await;
        match opened {
            Ok(event) => self.notifications.publish(event),
            Err(err) => {
                let mut view = lock(&self.view);
                if view.as_ref().is_some_and(|v| v.id == id) {
                    *view = None;
                }
                drop(view);
                self.opening_failed(err.clone());
                return Err(err);
            }
        }

        self.set_phase(ViewerPhase::Open { navigating: false });
        self.navigate_to(chapter_ref, end_of_chapter).await
    }

    /// Show a chapter by index or href. With `end_of_chapter` the surface
    /// starts on the chapter's last page.
    pub async fn navigate_to(
        &self,
        chapter_ref: impl Into<ChapterRef>,
        end_of_chapter: bool,
    ) -> Result<NavigationOutcome> {
        let chapter_ref = chapter_ref.into();
        let (view_id, book, current) = {
            let view = lock(&self.view);
            let view = view.as_ref().ok_or(LectorError::NotInitialized("viewer"))?;
            (view.id, view.book.clone(), view.current.clone())
        };
        let resolved = book.resolve(&chapter_ref)?;
        let fragment = resolved.fragment;
        let chapter = resolved.chapter;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(current) = current
            .as_ref()
            .filter(|current| current.path() == chapter.path())
        {
            let target = match (end_of_chapter, fragment) {
                (true, _) => ScrollTarget::Last,
                (false, Some(anchor)) => ScrollTarget::Anchor(anchor),
                (false, None) => ScrollTarget::Page(0),
            };
            log::debug!(
                "[VIEWER] Already showing {}, scrolling to {:?}",
                current.path(),
                target
            );
            self.surface.post_message(HostMessage::ScrollToPage(target));
            self.set_navigating(false);
            return Ok(NavigationOutcome::Displayed);
        }

        self.set_navigating(true);
        if let Some(previous) = &current {
            self.notifications.publish(ViewerEvent::ChapterExit {
                index: previous.index(),
                path: previous.path().to_string(),
            });
        }

        let contents = {
            let mut view = lock(&self.view);
            let view = match view.as_mut() {
                Some(view) if view.id == view_id => view,
                _ => return Ok(NavigationOutcome::Superseded),
            };
            *view.in_flight.entry(chapter.path().to_string()).or_insert(0) += 1;
            view.by_path
                .entry(chapter.path().to_string())
                .or_insert_with(|| {
                    ChapterContents::new(book.clone(), chapter.clone(), self.settings.clone())
                })
                .clone()
        };

        let loaded = contents.load(end_of_chapter).await;
        let latest = self.generation.load(Ordering::SeqCst) == generation;
        let mut shown = false;
        let mut orphaned = false;
        {
            let mut view = lock(&self.view);
            if let Some(view) = view.as_mut().filter(|view| view.id == view_id) {
                let idle = view.finish_loading(chapter.path());
                match &loaded {
                    Ok(location) if latest => {
                        let url = split_fragment(location).0.to_string();
                        view.by_url.insert(url, contents.clone());
                        view.current = Some(contents.clone());
                        shown = true;
                    }
                    Ok(_) if idle && !view.is_current(&contents) => {
                        view.forget(&contents);
                        orphaned = true;
                    }
                    _ => {}
                }
            }
        }

        let location = match loaded {
            Ok(location) => location,
            Err(err) => {
                if latest {
                    self.set_navigating(false);
                }
                log::warn!("[VIEWER] Failed to load {}: {}", chapter.path(), err);
                return Err(err);
            }
        };
        if !shown {
            log::debug!("[VIEWER] Navigation to {} superseded", chapter.path());
            if orphaned {
                if let Err(err) = contents.unload().await {
                    log::warn!("[VIEWER] Failed to unload {}: {}", chapter.path(), err);
                }
            }
            return Ok(NavigationOutcome::Superseded);
        }

        let location = match fragment {
            Some(anchor) if !end_of_chapter => format!("{}#{}", location, anchor),
            _ => location,
        };
        log::debug!("[VIEWER] Showing {} at {}", chapter.path(), location);
        self.surface.set_source(&location);
        self.set_navigating(false);
        Ok(NavigationOutcome::Displayed)
    }

    /// Move `delta` chapters through the spine. Moving backwards enters the
    /// target chapter from its end. Past either end of the book the surface
    /// is scrolled to the first or last page instead.
    pub async fn change_chapter_by(&self, delta: i32) -> Result<NavigationOutcome> {
        let (book, index) = {
            let view = lock(&self.view);
            let view = view.as_ref().ok_or(LectorError::NotInitialized("viewer"))?;
            let current = view
                .current
                .as_ref()
                .ok_or(LectorError::NotInitialized("chapter"))?;
            (view.book.clone(), current.index())
        };

        let target = index as i64 + i64::from(delta);
        let count = book.chapter_count()? as i64;
        if target < 0 || target >= count {
            let edge = if delta < 0 {
                ScrollTarget::Page(0)
            } else {
                ScrollTarget::Last
            };
            log::debug!("[VIEWER] Chapter {} is outside the book", target);
            self.surface.post_message(HostMessage::ScrollToPage(edge));
            return Err(LectorError::ChapterNotFound(target.to_string()));
        }
        self.navigate_to(ChapterRef::Index(target as usize), delta < 0)
            .await
    }

    /// Move `delta` pages within the displayed chapter.
    pub fn change_page_by(&self, delta: i32) {
        self.surface.post_message(HostMessage::ScrollBy(delta));
    }

    /// Change the font size of the displayed and future chapters.
    pub fn set_font_size(&self, size: impl Into<String>) {
        let size = size.into();
        self.settings.update(|s| s.font_size = Some(size.clone()));
        self.surface.post_message(HostMessage::SetFontSize(size));
    }

    /// Change the theme stylesheet of the displayed and future chapters.
    pub fn set_theme(&self, path: impl Into<String>) {
        let path = path.into();
        self.settings.update(|s| s.theme_stylesheet = Some(path.clone()));
        self.surface.post_message(HostMessage::SetTheme(path));
    }

    /// Page in response to a key press. Unknown keys are ignored.
    pub fn handle_key(&self, code: &str) {
        if let Some(delta) = key_direction(code) {
            self.change_page_by(delta);
        }
    }

    /// Parse and dispatch a raw `{method, args}` message.
    pub async fn handle_raw_message(&self, raw: &str) -> Result<()> {
        let message = SurfaceMessage::from_json(raw)?;
        self.handle_message(message).await
    }

    /// Dispatch a message from the surface.
    pub async fn handle_message(&self, message: SurfaceMessage) -> Result<()> {
        match message {
            SurfaceMessage::Goto(href) => {
                self.navigate_to(ChapterRef::Href(href), false).await?;
            }
            SurfaceMessage::Load { title } => {
                if let Some(current) = self.current_chapter() {
                    self.notifications.publish(ViewerEvent::ChapterEnter {
                        index: current.index(),
                        path: current.path().to_string(),
                        title: current.title().or(title),
                    });
                }
            }
            SurfaceMessage::Unload(url) => self.unload_url(&url).await?,
            SurfaceMessage::PageChange { page, last_page } => {
                self.notifications
                    .publish(ViewerEvent::PageChanging { page, last_page });
            }
            SurfaceMessage::ChangeChapterBy(delta) => match self.change_chapter_by(delta).await {
                Ok(_) | Err(LectorError::ChapterNotFound(_)) => {}
                Err(err) => return Err(err),
            },
            SurfaceMessage::KeyboardNavigation(code) => self.handle_key(&code),
        }
        Ok(())
    }

    async fn unload_url(&self, url: &str) -> Result<()> {
        let url = split_fragment(url).0;
        let contents = {
            let mut view = lock(&self.view);
            let Some(view) = view.as_mut() else {
                return Ok(());
            };
            match view.by_url.get(url) {
                Some(contents) if view.is_current(contents) => {
                    log::debug!("[VIEWER] Ignoring unload of displayed chapter {}", url);
                    return Ok(());
                }
                Some(_) => view.by_url.remove(url),
                None => None,
            }
        };
        match contents {
            Some(contents) => contents.unload().await,
            None => Ok(()),
        }
    }

    /// Close the book and release everything it holds.
    pub async fn close(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.dispose().await;
        self.set_phase(ViewerPhase::Closed);
    }

    async fn dispose(&self) {
        let Some(view) = lock(&self.view).take() else {
            return;
        };
        for contents in view.by_path.values() {
            if let Err(err) = contents.unload().await {
                log::warn!("[VIEWER] Failed to unload {}: {}", contents.path(), err);
            }
        }
        log::debug!("[VIEWER] Disposed view {}", view.id);
    }
}
