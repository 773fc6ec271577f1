//! lector -- EPUB reader core
//!
//! Opens EPUB containers, resolves their package structure and renders
//! chapters into self-contained documents for a paginating display surface.
//!
//! # Layers
//!
//! - [`archive`] -- ZIP container access with lazily decoded entries
//! - [`resource`] -- refcounted ephemeral URLs for archive entries
//! - [`book`] -- package document, spine-ordered chapters, table of contents
//! - [`chapter`] -- chapter rewrite and registration
//! - [`viewer`] -- host-side controller driving a [`DisplaySurface`]
//!
//! The paginator running inside the display surface lives in the
//! `lector-paginate` crate and talks to the viewer through [`protocol`].
//!
//! # Example
//!
//! ```no_run
//! use lector::{Book, BookOptions, ChapterContents, ChapterRef, RenderSettings};
//!
//! # async fn run() -> lector::Result<()> {
//! let book = Book::epub(std::path::PathBuf::from("book.epub"), BookOptions::default());
//! book.init().await?;
//! let chapter = book.chapter(&ChapterRef::Index(0))?;
//! let contents = ChapterContents::new(book.clone(), chapter, RenderSettings::default());
//! let url = contents.load(false).await?;
//! println!("{}", url);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![deny(clippy::large_enum_variant, clippy::redundant_clone)]
#![warn(
    clippy::needless_collect,
    clippy::map_clone,
    clippy::implicit_clone,
    clippy::inefficient_to_string
)]

pub mod archive;
pub mod blob;
pub mod book;
pub mod chapter;
pub mod error;
pub mod href;
pub mod metadata;
pub mod navigation;
pub mod notifications;
pub mod protocol;
pub mod resource;
pub mod rewrite;
pub mod settings;
pub mod spine;
pub mod viewer;
pub mod xml;
pub mod zip;

#[cfg(test)]
mod testutil;

// Re-export key types for convenience
pub use archive::{Archive, ArchiveEntry, ArchiveOptions, ArchiveSource, Fetcher};
pub use blob::{Blob, BlobStore};
pub use book::{
    Book, BookFormat, BookOpener, BookOptions, BookState, Chapter, ChapterRef, EpubBook,
    EpubFormat, ValidationMode,
};
pub use chapter::ChapterContents;
pub use error::{LectorError, Result, ZipError};
pub use metadata::PackageMetadata;
pub use navigation::{TableOfContents, TocEntry, TocSource, TocTarget};
pub use notifications::{Notifications, ViewerEvent};
pub use protocol::{HostMessage, ScrollTarget, SurfaceMessage};
pub use resource::{HolderId, Resource, ResourceOptions, Retain};
pub use settings::{RenderSettings, SettingsProvider, SharedSettings, StaticSettings};
pub use spine::Spine;
pub use viewer::{BookViewer, DisplaySurface, NavigationOutcome, ViewerOptions, ViewerPhase};
pub use xml::XmlDocument;
pub use zip::ZipLimits;
