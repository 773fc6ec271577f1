//! Column pagination for `lector` display surfaces.
//!
//! The rendered chapter is laid out in CSS columns one viewport wide; a page
//! is one column. [`Paginator`] keeps the page state, interprets gestures
//! and host messages, and reports back to the host through
//! [`lector::SurfaceMessage`]s. Measurements come from a [`ContentLayout`]
//! and time is passed in explicitly, so the state machine is deterministic.

mod config;
mod layout;
mod location;
mod paginator;

pub use config::{KeyRouting, PaginatorConfig};
pub use layout::{ColumnStyle, ContentLayout, Presentation};
pub use location::StartDirective;
pub use paginator::{PageState, Paginator};
