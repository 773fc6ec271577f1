use std::collections::HashMap;
use std::time::{Duration, Instant};

use lector::protocol::{HostMessage, ScrollTarget, SurfaceMessage};
use lector::rewrite::goto_href;
use lector_paginate::{ContentLayout, KeyRouting, Paginator, PaginatorConfig};

struct FakeLayout {
    width: f64,
    height: f64,
    sentinel: Option<f64>,
    scroll_width: f64,
    anchors: HashMap<String, f64>,
}

impl FakeLayout {
    /// `pages` pages of 400px with the sentinel on the last one.
    fn pages(pages: u32) -> Self {
        let width = 400.0;
        Self {
            width,
            height: 600.0,
            sentinel: Some(f64::from(pages - 1) * width + 10.0),
            scroll_width: f64::from(pages) * width,
            anchors: HashMap::from([("sec2".to_string(), 2.0 * width + 5.0)]),
        }
    }
}

impl ContentLayout for FakeLayout {
    fn viewport_width(&self) -> f64 {
        self.width
    }

    fn viewport_height(&self) -> f64 {
        self.height
    }

    fn sentinel_offset(&self) -> Option<f64> {
        self.sentinel
    }

    fn anchor_offset(&self, id: &str) -> Option<f64> {
        self.anchors.get(id).copied()
    }

    fn scroll_width(&self) -> f64 {
        self.scroll_width
    }
}

fn loaded(location: &str, layout: &FakeLayout) -> Paginator {
    let mut paginator = Paginator::new(location, PaginatorConfig::default());
    paginator.on_load(layout, Some("Chapter".into()), Instant::now());
    paginator.drain_messages();
    paginator
}

#[test]
fn test_on_load_reports_page_and_title() {
    let layout = FakeLayout::pages(5);
    let mut paginator = Paginator::new("blob:lector/1", PaginatorConfig::default());
    paginator.on_load(&layout, Some("Chapter".into()), Instant::now());

    assert_eq!(paginator.last_page(), 4);
    assert_eq!(
        paginator.drain_messages(),
        vec![
            SurfaceMessage::PageChange {
                page: 0,
                last_page: 4
            },
            SurfaceMessage::Load {
                title: Some("Chapter".into())
            },
        ]
    );
    assert_eq!(paginator.presentation().columns.column_width, 360.0);
    assert_eq!(paginator.presentation().columns.column_gap, 40.0);
}

#[test]
fn test_start_directives() {
    let layout = FakeLayout::pages(5);
    assert_eq!(loaded("blob:lector/1#lector_end", &layout).current_page(), 4);
    assert_eq!(loaded("blob:lector/1#lector_page=2", &layout).current_page(), 2);
    assert_eq!(loaded("blob:lector/1#lector_page=9", &layout).current_page(), 4);
    assert_eq!(loaded("blob:lector/1#sec2", &layout).current_page(), 2);
    assert_eq!(loaded("blob:lector/1#nowhere", &layout).current_page(), 0);
}

#[test]
fn test_last_page_falls_back_to_scroll_width() {
    let mut layout = FakeLayout::pages(3);
    layout.sentinel = None;
    assert_eq!(loaded("blob:lector/1", &layout).last_page(), 2);
}

#[test]
fn test_scroll_past_end_requests_chapter_once() {
    let layout = FakeLayout::pages(2);
    let mut paginator = loaded("blob:lector/1", &layout);

    paginator.scroll_by(1, true);
    assert_eq!(paginator.current_page(), 1);
    paginator.drain_messages();

    paginator.scroll_by(1, true);
    paginator.scroll_by(1, true);
    paginator.key("ArrowRight");
    paginator.wheel(0.0, 1000.0, Instant::now());
    assert_eq!(
        paginator.drain_messages(),
        vec![SurfaceMessage::ChangeChapterBy(1)]
    );
    assert!(!paginator.gestures_enabled());
    assert_eq!(paginator.current_page(), 1);

    // The host answers a book boundary with scrollToPage.
    paginator.handle_host_message(HostMessage::ScrollToPage(ScrollTarget::Last), &layout);
    assert!(paginator.gestures_enabled());
    paginator.scroll_by(-1, true);
    assert_eq!(paginator.current_page(), 0);
}

#[test]
fn test_scroll_without_chapter_change_clamps() {
    let layout = FakeLayout::pages(3);
    let mut paginator = loaded("blob:lector/1", &layout);
    paginator.scroll_by(-1, false);
    assert_eq!(paginator.current_page(), 0);
    assert!(paginator.gestures_enabled());
    paginator.scroll_by(10, false);
    assert_eq!(paginator.current_page(), 2);
    assert_eq!(paginator.presentation().translate_x, -800.0);
}

#[test]
fn test_touch_swipe_and_settle() {
    let layout = FakeLayout::pages(3);
    let mut paginator = loaded("blob:lector/1", &layout);

    // 30px is below 10% of 400px.
    paginator.touch_start(200.0);
    paginator.touch_move(170.0);
    paginator.animation_frame();
    assert_eq!(paginator.presentation().translate_x, -30.0);
    paginator.touch_end(170.0);
    assert_eq!(paginator.current_page(), 0);
    assert_eq!(paginator.presentation().translate_x, 0.0);

    // Dragging left turns to the next page.
    paginator.touch_start(300.0);
    paginator.touch_move(100.0);
    paginator.touch_end(100.0);
    assert_eq!(paginator.current_page(), 1);

    paginator.touch_start(100.0);
    paginator.touch_move(300.0);
    paginator.touch_cancel();
    assert_eq!(paginator.current_page(), 1);
    assert_eq!(paginator.presentation().translate_x, -400.0);
}

#[test]
fn test_wheel_accumulates_until_half_viewport() {
    let layout = FakeLayout::pages(3);
    let mut paginator = loaded("blob:lector/1", &layout);
    let start = Instant::now();

    paginator.wheel(0.0, 120.0, start);
    paginator.wheel(0.0, 60.0, start + Duration::from_millis(50));
    assert_eq!(paginator.current_page(), 0);
    paginator.wheel(30.0, 40.0, start + Duration::from_millis(100));
    assert_eq!(paginator.current_page(), 1);

    // Idle longer than 250ms drops what was accumulated.
    paginator.wheel(150.0, 0.0, start + Duration::from_millis(200));
    paginator.tick(start + Duration::from_millis(500), &layout);
    paginator.wheel(150.0, 0.0, start + Duration::from_millis(510));
    assert_eq!(paginator.current_page(), 1);
}

#[test]
fn test_key_routing() {
    let layout = FakeLayout::pages(3);
    let mut paginator = loaded("blob:lector/1", &layout);
    paginator.key("ArrowRight");
    paginator.key("KeyQ");
    assert_eq!(paginator.current_page(), 1);

    let mut forwarding = Paginator::new(
        "blob:lector/1",
        PaginatorConfig::default().with_key_routing(KeyRouting::Host),
    );
    forwarding.on_load(&layout, None, Instant::now());
    forwarding.drain_messages();
    forwarding.key("ArrowRight");
    assert_eq!(
        forwarding.drain_messages(),
        vec![SurfaceMessage::KeyboardNavigation("ArrowRight".into())]
    );
    assert_eq!(forwarding.current_page(), 0);
}

#[test]
fn test_resize_is_debounced() {
    let mut layout = FakeLayout::pages(4);
    let mut paginator = loaded("blob:lector/1#lector_end", &layout);
    let start = Instant::now();

    layout.width = 800.0;
    layout.sentinel = Some(810.0);
    paginator.resize(start);
    paginator.resize(start + Duration::from_millis(10));
    paginator.tick(start + Duration::from_millis(10), &layout);
    assert_eq!(paginator.last_page(), 3);

    paginator.tick(start + Duration::from_millis(15), &layout);
    assert_eq!(paginator.last_page(), 1);
    assert_eq!(paginator.current_page(), 1);
    assert_eq!(
        paginator.drain_messages(),
        vec![SurfaceMessage::PageChange {
            page: 1,
            last_page: 1
        }]
    );
}

#[test]
fn test_transitions_enable_after_two_frames() {
    let layout = FakeLayout::pages(3);
    let mut paginator = loaded("blob:lector/1", &layout);
    assert!(!paginator.transitions_enabled());
    paginator.animation_frame();
    assert!(!paginator.transitions_enabled());
    paginator.animation_frame();
    assert!(paginator.transitions_enabled());
    paginator.scroll_by(1, true);
    assert!(paginator.presentation().animated);
}

#[test]
fn test_host_messages_and_links() {
    let layout = FakeLayout::pages(3);
    let mut paginator = loaded("blob:lector/7", &layout);

    paginator
        .handle_raw_host_message(r#"{"method":"setFontSize","args":["120%"]}"#, &layout)
        .unwrap();
    assert_eq!(paginator.presentation().font_size.as_deref(), Some("120%"));
    paginator.handle_host_message(HostMessage::SetTheme("night.css".into()), &layout);
    assert_eq!(paginator.presentation().theme.as_deref(), Some("night.css"));
    assert!(paginator
        .handle_raw_host_message(r#"{"method":"explode","args":[]}"#, &layout)
        .is_err());
    paginator.drain_messages();

    assert!(paginator.link_activated(&goto_href("OEBPS/ch2.xhtml#s1")));
    assert!(!paginator.link_activated("https://example.com/"));
    paginator.on_unload();
    assert_eq!(
        paginator.drain_messages(),
        vec![
            SurfaceMessage::Goto("OEBPS/ch2.xhtml#s1".into()),
            SurfaceMessage::Unload("blob:lector/7".into()),
        ]
    );
}
