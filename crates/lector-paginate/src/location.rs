use lector::href::split_fragment;
use lector::rewrite::END_SENTINEL_ID;

const PAGE_PREFIX: &str = "lector_page=";

/// Where to start after a chapter loads, read from its location fragment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StartDirective {
    /// No fragment: first page.
    First,
    /// `#lector_end`: last page.
    End,
    /// `#lector_page=N`.
    Page(u32),
    /// Any other fragment names an element.
    Anchor(String),
}

impl StartDirective {
    /// Directive encoded in `location`.
    pub fn parse(location: &str) -> Self {
        match split_fragment(location).1 {
            None | Some("") => StartDirective::First,
            Some(END_SENTINEL_ID) => StartDirective::End,
            Some(fragment) => match fragment
                .strip_prefix(PAGE_PREFIX)
                .and_then(|n| n.parse().ok())
            {
                Some(page) => StartDirective::Page(page),
                None => StartDirective::Anchor(fragment.to_string()),
            },
        }
    }
}
