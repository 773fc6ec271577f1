//! Integration tests for lector
//!
//! Books are built in memory; timer tests run on paused tokio time.

mod common;

use std::time::Duration;

use common::{inline_options, EpubBuilder, RecordingSurface};
use lector::notifications::{CHAPTER_ENTER, CHAPTER_EXIT};
use lector::{
    Book, BookOpener, BookViewer, ChapterContents, ChapterRef, HolderId, LectorError,
    NavigationOutcome, RenderSettings, SurfaceMessage, TocSource, TocTarget, ViewerEvent,
    ViewerOptions, ViewerPhase,
};

const CSS: &str = "p { margin: 0 }";

fn two_chapters() -> Vec<u8> {
    EpubBuilder::new()
        .chapter("c1", "one.xhtml", "One", "<p>one</p>")
        .chapter("c2", "two.xhtml", "Two", "<p>two</p>")
        .item("css", "style.css", "text/css", CSS)
        .build()
}

async fn open(data: Vec<u8>) -> Book {
    let book = Book::epub(data, inline_options());
    book.init().await.unwrap();
    book
}

// -- Resource cache -----------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn resource_refcount_and_grace_period() {
    let book = open(two_chapters()).await;
    let css = book.get_resource("OEBPS/style.css").unwrap();
    let (a, b) = (HolderId::next(), HolderId::next());

    let first = css.as_ephemeral_url(a).await.unwrap();
    assert_eq!(css.as_ephemeral_url(a).await.unwrap(), first);
    assert_eq!(css.as_ephemeral_url(b).await.unwrap(), first);
    assert_eq!(css.materializations(), 1);
    assert_eq!(css.holder_count(), 2);

    assert!(matches!(
        css.release(HolderId::next()),
        Err(LectorError::ResourceKey { .. })
    ));
    css.release(a).unwrap();
    assert!(matches!(css.release(a), Err(LectorError::ResourceKey { .. })));
    css.release(b).unwrap();
    assert_eq!(css.holder_count(), 0);

    // Still valid for the whole grace period.
    tokio::time::sleep(Duration::from_millis(999)).await;
    assert!(book.blobs().contains(&first));

    // Re-acquiring inside the window cancels the revoke.
    assert_eq!(css.as_ephemeral_url(a).await.unwrap(), first);
    tokio::time::sleep(Duration::from_millis(2000)).await;
    assert!(book.blobs().contains(&first));

    // A later release still revokes eventually.
    css.release(a).unwrap();
    tokio::time::sleep(Duration::from_millis(1001)).await;
    assert!(!book.blobs().contains(&first));
    assert_eq!(css.materializations(), 1);

    let fresh = css.as_ephemeral_url(a).await.unwrap();
    assert_ne!(fresh, first);
    assert_eq!(css.materializations(), 2);
}

// -- Package resolution -------------------------------------------------------

#[tokio::test]
async fn three_spine_items_without_toc() {
    let book = open(
        EpubBuilder::new()
            .chapter("a", "a.xhtml", "A", "<p>a</p>")
            .chapter("b", "b.xhtml", "B", "<p>b</p>")
            .chapter("c", "c.xhtml", "C", "<p>c</p>")
            .build(),
    )
    .await;
    let ids: Vec<&str> = book.chapters().unwrap().iter().map(|c| c.id()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert!(book.toc().unwrap().is_none());
    assert_eq!(book.title().unwrap(), Some("Integration Book"));
}

#[tokio::test]
async fn ncx_entries_follow_play_order() {
    let nav_point = |id: &str, order: u32, label: &str, src: &str| {
        format!(
            r#"<navPoint id="{}" playOrder="{}"><navLabel><text>{}</text></navLabel><content src="{}"/></navPoint>"#,
            id, order, label, src
        )
    };
    let points = [
        nav_point("n3", 3, "Third", "c.xhtml"),
        nav_point("n1", 1, "First", "a.xhtml"),
        nav_point("n2", 2, "Second", "b.xhtml#mid"),
    ]
    .concat();
    let book = open(
        EpubBuilder::new()
            .chapter("a", "a.xhtml", "A", "<p>a</p>")
            .chapter("b", "b.xhtml", "B", "<p>b</p>")
            .chapter("c", "c.xhtml", "C", "<p>c</p>")
            .ncx(&points)
            .build(),
    )
    .await;

    let toc = book.toc().unwrap().unwrap();
    assert_eq!(toc.source(), TocSource::Ncx);
    let order: Vec<(&str, &TocTarget)> = toc
        .entries()
        .iter()
        .map(|e| (e.title.as_str(), &e.target))
        .collect();
    assert_eq!(
        order,
        vec![
            ("First", &TocTarget::PlayOrder(1)),
            ("Second", &TocTarget::PlayOrder(2)),
            ("Third", &TocTarget::PlayOrder(3)),
        ]
    );
    assert_eq!(toc.entries()[1].href, "OEBPS/b.xhtml#mid");
    let resolved = book
        .resolve(&ChapterRef::from(toc.entries()[1].href.as_str()))
        .unwrap();
    assert_eq!(resolved.chapter.index(), 1);
    assert_eq!(resolved.fragment.as_deref(), Some("mid"));
}

#[tokio::test]
async fn opener_rejects_unknown_containers() {
    let data = common::zip(&[("readme.txt".into(), b"hello".to_vec(), false)]);
    let err = BookOpener::new(inline_options()).open(data).await.unwrap_err();
    assert!(matches!(err, LectorError::NotFound(_)));
}

#[tokio::test]
async fn open_from_file_path() {
    let path = std::env::temp_dir().join(format!("lector-{}.epub", std::process::id()));
    std::fs::write(&path, two_chapters()).unwrap();
    let book = Book::epub(path.clone(), inline_options());
    book.init().await.unwrap();
    assert_eq!(book.chapter_count().unwrap(), 2);
    std::fs::remove_file(path).unwrap();
}

// -- Chapter rendering --------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn rendered_chapter_uses_ephemeral_urls() {
    let book = open(
        EpubBuilder::new()
            .chapter(
                "c1",
                "text/one.xhtml",
                "One",
                r#"<p><img src="images/cover.png"/><a href="http://example.com">site</a></p>"#,
            )
            .item("img", "text/images/cover.png", "image/png", "PNG")
            .build(),
    )
    .await;
    let chapter = book.chapter(&ChapterRef::Index(0)).unwrap();
    let contents = ChapterContents::new(book.clone(), chapter, RenderSettings::default());
    let url = contents.load(false).await.unwrap();
    let blob = book.blobs().get(&url).unwrap();
    let html = String::from_utf8(blob.data.to_vec()).unwrap();

    let image = book.get_resource("OEBPS/text/images/cover.png").unwrap();
    assert!(image.is_held_by(contents.key()));
    assert!(!html.contains(r#"src="images/cover.png""#));
    assert!(html.contains(r#"href="http://example.com""#));

    contents.unload().await.unwrap();
    assert_eq!(image.holder_count(), 0);
}

// -- Viewer -------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn change_chapter_publishes_exit_then_enter() {
    let surface = RecordingSurface::default();
    let viewer = BookViewer::new(
        surface.clone(),
        ViewerOptions::default().with_book_options(inline_options()),
    );
    let book = Book::epub(two_chapters(), inline_options());
    let mut events = viewer.notifications().subscribe_to(&[CHAPTER_EXIT, CHAPTER_ENTER]);

    viewer.view(book, 0usize, false).await.unwrap();
    viewer.change_chapter_by(1).await.unwrap();
    viewer
        .handle_message(SurfaceMessage::Load { title: None })
        .await
        .unwrap();

    assert_eq!(viewer.current_chapter().unwrap().index(), 1);
    assert_eq!(
        events.try_recv().unwrap(),
        ViewerEvent::ChapterExit {
            index: 0,
            path: "OEBPS/one.xhtml".into()
        }
    );
    assert_eq!(
        events.try_recv().unwrap(),
        ViewerEvent::ChapterEnter {
            index: 1,
            path: "OEBPS/two.xhtml".into(),
            title: Some("Two".into())
        }
    );
    assert_eq!(surface.sources().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn newer_navigation_supersedes_older() {
    let surface = RecordingSurface::default();
    let viewer = BookViewer::new(
        surface.clone(),
        ViewerOptions::default().with_book_options(inline_options()),
    );
    let data = EpubBuilder::new()
        .chapter("c1", "one.xhtml", "One", "<p>one</p>")
        .chapter("c2", "two.xhtml", "Two", "<p>two</p>")
        .chapter("c3", "three.xhtml", "Three", "<p>three</p>")
        .item("css", "style.css", "text/css", CSS)
        .build();
    viewer.open(data, 0usize, false).await.unwrap();

    let (older, newer) = tokio::join!(viewer.navigate_to(1usize, false), viewer.navigate_to(2usize, false));
    assert_eq!(older.unwrap(), NavigationOutcome::Superseded);
    assert_eq!(newer.unwrap(), NavigationOutcome::Displayed);

    let current = viewer.current_chapter().unwrap();
    assert_eq!(current.index(), 2);
    assert_eq!(surface.sources().last(), current.as_url().as_ref());
    assert_eq!(surface.sources().len(), 2);
    assert_eq!(viewer.phase(), ViewerPhase::Open { navigating: false });

    // The superseded rendering of chapter two was unloaded, not leaked.
    let book = viewer.book().unwrap();
    assert_eq!(book.get_resource("OEBPS/two.xhtml").unwrap().holder_count(), 0);
    assert!(book.get_resource("OEBPS/three.xhtml").unwrap().is_held_by(current.key()));

    // Going back renders chapter two afresh.
    viewer.navigate_to(1usize, false).await.unwrap();
    assert!(viewer.current_chapter().unwrap().is_loaded());
}

#[tokio::test(start_paused = true)]
async fn goto_links_navigate_with_fragment() {
    let surface = RecordingSurface::default();
    let viewer = BookViewer::new(
        surface.clone(),
        ViewerOptions::default().with_book_options(inline_options()),
    );
    viewer.open(two_chapters(), 0usize, false).await.unwrap();

    viewer
        .handle_raw_message(r#"{"method":"goto","args":["OEBPS/two.xhtml#later"]}"#)
        .await
        .unwrap();
    let last = surface.sources().pop().unwrap();
    assert!(last.ends_with("#later"));
    assert_eq!(viewer.current_chapter().unwrap().index(), 1);

    assert!(matches!(
        viewer.handle_raw_message(r#"{"method":"goto"}"#).await,
        Err(LectorError::Protocol(_))
    ));
}
