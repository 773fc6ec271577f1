//! Viewer notifications
//!
//! The viewer publishes [`ViewerEvent`]s to any number of listeners. Each
//! listener owns an unbounded tokio channel, so publishing never runs
//! listener code and never blocks. Listeners whose receiver was dropped are
//! pruned on the next publish.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::error::LectorError;

/// Channel name of [`ViewerEvent::BookOpening`].
pub const BOOK_OPENING: &str = "book:opening";
/// Channel name of [`ViewerEvent::BookOpened`].
pub const BOOK_OPEN: &str = "book:open";
/// Channel name of [`ViewerEvent::BookOpeningFailed`].
pub const BOOK_OPENING_FAILED: &str = "book:opening:failed";
/// Channel name of [`ViewerEvent::ChapterExit`].
pub const CHAPTER_EXIT: &str = "chapter:exit";
/// Channel name of [`ViewerEvent::ChapterEnter`].
pub const CHAPTER_ENTER: &str = "chapter:enter";
/// Channel name of [`ViewerEvent::PageChanging`].
pub const PAGE_CHANGING: &str = "page:changing";

/// Something the viewer did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ViewerEvent {
    /// A book source is being opened.
    BookOpening {
        /// Description of the source.
        source: String,
    },
    /// A book finished initializing.
    BookOpened {
        /// Book title.
        title: Option<String>,
        /// First author.
        author: Option<String>,
        /// Number of spine chapters.
        chapters: usize,
    },
    /// Opening a book failed.
    BookOpeningFailed {
        /// Why.
        error: LectorError,
    },
    /// The displayed chapter is being left.
    ChapterExit {
        /// Spine index.
        index: usize,
        /// Archive path.
        path: String,
    },
    /// A chapter finished loading on the display surface.
    ChapterEnter {
        /// Spine index.
        index: usize,
        /// Archive path.
        path: String,
        /// Chapter title.
        title: Option<String>,
    },
    /// The page shown by the display surface changed.
    PageChanging {
        /// Current page, 0-indexed.
        page: u32,
        /// Index of the last page.
        last_page: u32,
    },
}

impl ViewerEvent {
    /// Channel this event is published on.
    pub fn channel(&self) -> &'static str {
        match self {
            ViewerEvent::BookOpening { .. } => BOOK_OPENING,
            ViewerEvent::BookOpened { .. } => BOOK_OPEN,
            ViewerEvent::BookOpeningFailed { .. } => BOOK_OPENING_FAILED,
            ViewerEvent::ChapterExit { .. } => CHAPTER_EXIT,
            ViewerEvent::ChapterEnter { .. } => CHAPTER_ENTER,
            ViewerEvent::PageChanging { .. } => PAGE_CHANGING,
        }
    }
}

struct Listener {
    channels: Option<Vec<String>>,
    tx: UnboundedSender<ViewerEvent>,
}

impl Listener {
    fn wants(&self, channel: &str) -> bool {
        self.channels
            .as_ref()
            .is_none_or(|channels| channels.iter().any(|c| c == channel))
    }
}

/// Fan-out hub for [`ViewerEvent`]s. Cheap to clone; clones share
/// listeners.
#[derive(Clone, Default)]
pub struct Notifications {
    listeners: Arc<Mutex<Vec<Listener>>>,
}

impl std::fmt::Debug for Notifications {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifications")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl Notifications {
    /// Hub without listeners.
    pub fn new() -> Self {
        Self::default()
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<Listener>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receive every event.
    pub fn subscribe(&self) -> UnboundedReceiver<ViewerEvent> {
        self.add(None)
    }

    /// Receive only events published on `channels`.
    pub fn subscribe_to(&self, channels: &[&str]) -> UnboundedReceiver<ViewerEvent> {
        self.add(Some(channels.iter().map(|c| c.to_string()).collect()))
    }

    fn add(&self, channels: Option<Vec<String>>) -> UnboundedReceiver<ViewerEvent> {
        let (tx, rx) = unbounded_channel();
        self.listeners().push(Listener { channels, tx });
        rx
    }

    /// Deliver `event` to every interested listener.
    pub fn publish(&self, event: ViewerEvent) {
        let channel = event.channel();
        log::debug!("[VIEWER] Publishing {}", channel);
        self.listeners().retain(|listener| {
            if listener.tx.is_closed() {
                return false;
            }
            if !listener.wants(channel) {
                return true;
            }
            listener.tx.send(event.clone()).is_ok()
        });
    }

    /// Number of live listeners.
    pub fn listener_count(&self) -> usize {
        let mut listeners = self.listeners();
        listeners.retain(|listener| !listener.tx.is_closed());
        listeners.len()
    }
}
