use std::time::Instant;

use lector::protocol::{key_direction, HostMessage, ScrollTarget, SurfaceMessage};
use lector::rewrite::parse_goto_href;

use crate::config::{KeyRouting, PaginatorConfig};
use crate::layout::{ColumnStyle, ContentLayout, Presentation};
use crate::location::StartDirective;

/// Current page and the viewport it was measured in.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PageState {
    /// Current page, 0-indexed.
    pub current_page: u32,
    /// Index of the last page.
    pub last_page: u32,
    /// Cached viewport width in px.
    pub viewport_width: f64,
    /// Cached viewport height in px.
    pub viewport_height: f64,
}

#[derive(Clone, Copy, Debug)]
struct Touch {
    start_x: f64,
    x: f64,
    // Moved since the last animation frame.
    dirty: bool,
}

#[derive(Clone, Copy, Debug, Default)]
struct Wheel {
    accumulated: f64,
    last: Option<Instant>,
}

/// Pagination state machine for one loaded chapter.
#[derive(Debug)]
pub struct Paginator {
    config: PaginatorConfig,
    location: String,
    state: PageState,
    presentation: Presentation,
    outbox: Vec<SurfaceMessage>,
    gestures_enabled: bool,
    transitions_enabled: bool,
    frames_until_transitions: Option<u32>,
    touch: Option<Touch>,
    wheel: Wheel,
    resize_due: Option<Instant>,
}

impl Paginator {
    /// Paginator for the chapter document loaded at `location`.
    pub fn new(location: impl Into<String>, config: PaginatorConfig) -> Self {
        Self {
            config,
            location: location.into(),
            state: PageState::default(),
            presentation: Presentation::default(),
            outbox: Vec::new(),
            gestures_enabled: true,
            transitions_enabled: false,
            frames_until_transitions: None,
            touch: None,
            wheel: Wheel::default(),
            resize_due: None,
        }
    }

    /// Location the chapter was loaded from.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Page state.
    pub fn state(&self) -> PageState {
        self.state
    }

    /// Current page.
    pub fn current_page(&self) -> u32 {
        self.state.current_page
    }

    /// Last page.
    pub fn last_page(&self) -> u32 {
        self.state.last_page
    }

    /// What the display context should show.
    pub fn presentation(&self) -> &Presentation {
        &self.presentation
    }

    /// Whether touch, wheel, keys and `scroll_by` are handled.
    pub fn gestures_enabled(&self) -> bool {
        self.gestures_enabled
    }

    /// Whether page changes animate.
    pub fn transitions_enabled(&self) -> bool {
        self.transitions_enabled
    }

    /// Take the messages posted so far, oldest first.
    pub fn drain_messages(&mut self) -> Vec<SurfaceMessage> {
        std::mem::take(&mut self.outbox)
    }

    fn post(&mut self, message: SurfaceMessage) {
        log::debug!("[PAGINATE] Posting {}", message.method());
        self.outbox.push(message);
    }

    /// The document finished loading: lay out columns, go to the page the
    /// location asks for and report `load`.
    pub fn on_load(&mut self, layout: &dyn ContentLayout, title: Option<String>, _now: Instant) {
        self.measure(layout);
        self.reinit_gestures();
        let target = match StartDirective::parse(&self.location) {
            StartDirective::First => ScrollTarget::Page(0),
            StartDirective::End => ScrollTarget::Last,
            StartDirective::Page(page) => ScrollTarget::Page(page),
            StartDirective::Anchor(id) => ScrollTarget::Anchor(id),
        };
        self.scroll_to_page(&target, layout);
        self.post(SurfaceMessage::Load { title });
        self.frames_until_transitions = Some(self.config.transition_frames);
    }

    /// The document is going away.
    pub fn on_unload(&mut self) {
        let location = self.location.clone();
        self.post(SurfaceMessage::Unload(location));
    }

    /// Resume gesture handling after a chapter change request.
    pub fn reinit_gestures(&mut self) {
        self.gestures_enabled = true;
        self.touch = None;
        self.wheel = Wheel::default();
    }

    fn measure(&mut self, layout: &dyn ContentLayout) {
        let width = layout.viewport_width();
        let height = layout.viewport_height();
        self.state.viewport_width = width;
        self.state.viewport_height = height;
        self.presentation.columns = ColumnStyle::for_viewport(width, height, self.config.column_gap);

        self.state.last_page = if width <= 0.0 {
            0
        } else {
            match layout.sentinel_offset() {
                Some(offset) => (offset.max(0.0) / width).floor() as u32,
                None => {
                    log::warn!("[PAGINATE] End sentinel missing, using scroll width");
                    ((layout.scroll_width() / width).ceil() as u32).saturating_sub(1)
                }
            }
        };
        log::debug!(
            "[PAGINATE] Measured {}x{}, last page {}",
            width,
            height,
            self.state.last_page
        );
    }

    fn page_of_offset(&self, offset: f64) -> u32 {
        if self.state.viewport_width <= 0.0 {
            return 0;
        }
        (offset.max(0.0) / self.state.viewport_width).floor() as u32
    }

    fn apply_translation(&mut self) {
        self.presentation.translate_x =
            -(f64::from(self.state.current_page) * self.state.viewport_width);
        self.presentation.animated = self.transitions_enabled;
    }

    fn set_page(&mut self, page: u32) {
        self.state.current_page = page.min(self.state.last_page);
        self.apply_translation();
        self.post(SurfaceMessage::PageChange {
            page: self.state.current_page,
            last_page: self.state.last_page,
        });
    }

    /// Go to a page, the last page or the page holding an anchor.
    pub fn scroll_to_page(&mut self, target: &ScrollTarget, layout: &dyn ContentLayout) {
        let page = match target {
            ScrollTarget::Page(page) => *page,
            ScrollTarget::Last => self.state.last_page,
            ScrollTarget::Anchor(id) => match layout.anchor_offset(id) {
                Some(offset) => self.page_of_offset(offset),
                None => {
                    log::warn!("[PAGINATE] Unknown anchor '{}'", id);
                    0
                }
            },
        };
        self.set_page(page);
    }

    /// Move `delta` pages. Running past either end asks the host for the
    /// neighbouring chapter when `may_change_chapter` is set, and stops
    /// local paging until gestures are reinitialized.
    pub fn scroll_by(&mut self, delta: i32, may_change_chapter: bool) {
        if !self.gestures_enabled {
            log::debug!("[PAGINATE] Ignoring scroll while changing chapter");
            return;
        }
        let target = i64::from(self.state.current_page) + i64::from(delta);
        let last = i64::from(self.state.last_page);
        if (target < 0 || target > last) && may_change_chapter {
            self.gestures_enabled = false;
            self.touch = None;
            self.post(SurfaceMessage::ChangeChapterBy(delta.signum()));
            return;
        }
        self.set_page(target.clamp(0, last) as u32);
    }

    /// Finger down at `x`.
    pub fn touch_start(&mut self, x: f64) {
        if !self.gestures_enabled {
            return;
        }
        self.touch = Some(Touch {
            start_x: x,
            x,
            dirty: false,
        });
        self.presentation.animated = false;
    }

    /// Finger moved to `x`. The translation follows on the next frame.
    pub fn touch_move(&mut self, x: f64) {
        if let Some(touch) = self.touch.as_mut() {
            touch.x = x;
            touch.dirty = true;
        }
    }

    /// Finger lifted at `x`.
    pub fn touch_end(&mut self, x: f64) {
        let Some(touch) = self.touch.take() else {
            return;
        };
        let dx = x - touch.start_x;
        if dx.abs() < self.config.swipe_threshold * self.state.viewport_width {
            self.scroll_by(0, false);
        } else if dx < 0.0 {
            self.scroll_by(1, true);
        } else {
            self.scroll_by(-1, true);
        }
    }

    /// Touch interrupted; snap back to the current page.
    pub fn touch_cancel(&mut self) {
        if self.touch.take().is_some() {
            self.apply_translation();
        }
    }

    /// One animation frame elapsed.
    pub fn animation_frame(&mut self) {
        if let Some(touch) = self.touch.as_mut().filter(|touch| touch.dirty) {
            touch.dirty = false;
            let base = -(f64::from(self.state.current_page) * self.state.viewport_width);
            self.presentation.translate_x = base + (touch.x - touch.start_x);
        }
        if let Some(frames) = self.frames_until_transitions {
            let frames = frames.saturating_sub(1);
            if frames == 0 {
                self.frames_until_transitions = None;
                self.transitions_enabled = true;
                self.presentation.animated = self.touch.is_none();
            } else {
                self.frames_until_transitions = Some(frames);
            }
        }
    }

    fn expire_wheel(&mut self, now: Instant) {
        if let Some(last) = self.wheel.last {
            if now.saturating_duration_since(last) > self.config.wheel_idle {
                self.wheel = Wheel::default();
            }
        }
    }

    /// Wheel or trackpad scroll.
    pub fn wheel(&mut self, dx: f64, dy: f64, now: Instant) {
        if !self.gestures_enabled {
            return;
        }
        self.expire_wheel(now);
        self.wheel.last = Some(now);
        self.wheel.accumulated += if dx.abs() > dy.abs() { dx } else { dy };

        if self.wheel.accumulated.abs() > self.state.viewport_width / 2.0 {
            let delta = if self.wheel.accumulated > 0.0 { 1 } else { -1 };
            self.wheel = Wheel::default();
            self.scroll_by(delta, true);
        }
    }

    /// Key press.
    pub fn key(&mut self, code: &str) {
        if self.config.key_routing == KeyRouting::Host {
            self.post(SurfaceMessage::KeyboardNavigation(code.to_string()));
            return;
        }
        if !self.gestures_enabled {
            return;
        }
        if let Some(delta) = key_direction(code) {
            self.scroll_by(delta, true);
        }
    }

    /// The viewport is being resized; re-measure once it settles.
    pub fn resize(&mut self, now: Instant) {
        if self.resize_due.is_none() {
            self.resize_due = Some(now + self.config.resize_debounce);
        }
    }

    /// Run timers due at `now`.
    pub fn tick(&mut self, now: Instant, layout: &dyn ContentLayout) {
        self.expire_wheel(now);
        if self.resize_due.is_some_and(|due| due <= now) {
            self.resize_due = None;
            self.remeasure(layout);
        }
    }

    fn remeasure(&mut self, layout: &dyn ContentLayout) {
        self.measure(layout);
        self.set_page(self.state.current_page);
    }

    /// Apply a message from the host.
    pub fn handle_host_message(&mut self, message: HostMessage, layout: &dyn ContentLayout) {
        match message {
            HostMessage::ScrollBy(delta) => self.scroll_by(delta, true),
            HostMessage::ScrollToPage(target) => {
                self.reinit_gestures();
                self.scroll_to_page(&target, layout);
            }
            HostMessage::SetFontSize(size) => {
                self.presentation.font_size = Some(size);
                self.remeasure(layout);
            }
            HostMessage::SetTheme(path) => {
                self.presentation.theme = Some(path);
                self.remeasure(layout);
            }
        }
    }

    /// Parse and apply a raw `{method, args}` host message.
    pub fn handle_raw_host_message(
        &mut self,
        raw: &str,
        layout: &dyn ContentLayout,
    ) -> lector::Result<()> {
        let message = HostMessage::from_json(raw)?;
        self.handle_host_message(message, layout);
        Ok(())
    }

    /// A link in the chapter was activated. In-book links written by the
    /// renderer become `goto` messages; returns whether `href` was one.
    pub fn link_activated(&mut self, href: &str) -> bool {
        match parse_goto_href(href) {
            Some(path) => {
                self.post(SurfaceMessage::Goto(path));
                true
            }
            None => false,
        }
    }
}
