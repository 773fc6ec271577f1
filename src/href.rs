//! Path and href helpers shared by the package resolver and the renderer.
//!
//! Archive paths are always `/`-separated, relative to the archive root and
//! never start with `/`.

/// Split `href` into its base and optional `#fragment` (without the `#`).
pub fn split_fragment(href: &str) -> (&str, Option<&str>) {
    match href.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (href, None),
    }
}

/// Collapse `.`/`..`/empty segments. `..` segments that would climb above
/// the archive root are dropped.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            _ => parts.push(part),
        }
    }
    parts.join("/")
}

/// Directory part of an archive path (`""` for root-level files).
pub fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Whether `href` parses as a standalone URL: a scheme followed by `:`, or a
/// protocol-relative `//host` reference.
pub fn is_absolute_url(href: &str) -> bool {
    if href.starts_with("//") {
        return true;
    }
    let Some((scheme, _)) = href.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Whether an anchor target points inside the book: not a same-document
/// fragment, not `javascript:`, and without a scheme separator.
pub fn is_internal_link(href: &str) -> bool {
    let href = href.trim();
    !href.is_empty()
        && !href.starts_with('#')
        && !href.starts_with("javascript:")
        && !href.contains("://")
}

/// Resolve `href` against `base_dir` into an archive path, keeping any
/// fragment. Absolute URLs are returned unchanged; a leading `/` anchors the
/// href at the archive root.
pub fn resolve_href(base_dir: &str, href: &str) -> String {
    if is_absolute_url(href) {
        return href.to_string();
    }
    let (path, fragment) = split_fragment(href);
    let resolved = if path.is_empty() {
        String::new()
    } else if let Some(rooted) = path.strip_prefix('/') {
        normalize_path(rooted)
    } else if base_dir.is_empty() {
        normalize_path(path)
    } else {
        normalize_path(&format!("{}/{}", base_dir, path))
    };
    match fragment {
        Some(fragment) => format!("{}#{}", resolved, fragment),
        None => resolved,
    }
}

/// Percent-decode an archive path, if it contains escapes.
pub fn decode_path(path: &str) -> Option<String> {
    if !path.contains('%') {
        return None;
    }
    percent_encoding::percent_decode_str(path)
        .decode_utf8()
        .ok()
        .map(|decoded| decoded.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_fragment() {
        assert_eq!(split_fragment("a.xhtml#x"), ("a.xhtml", Some("x")));
        assert_eq!(split_fragment("a.xhtml"), ("a.xhtml", None));
        assert_eq!(split_fragment("#only"), ("", Some("only")));
    }

    #[test]
    fn test_normalize_strips_escaping_parent_segments() {
        assert_eq!(normalize_path("../../OEBPS/./text/ch1.xhtml"), "OEBPS/text/ch1.xhtml");
        assert_eq!(normalize_path("OEBPS/text/../images/a.png"), "OEBPS/images/a.png");
    }

    #[test]
    fn test_resolve_href_against_package_dir() {
        assert_eq!(resolve_href("OEBPS", "text/ch1.xhtml"), "OEBPS/text/ch1.xhtml");
        assert_eq!(resolve_href("OEBPS/text", "../images/c.png"), "OEBPS/images/c.png");
        assert_eq!(resolve_href("", "ch1.xhtml#p2"), "ch1.xhtml#p2");
        assert_eq!(resolve_href("OEBPS", "/style.css"), "style.css");
        assert_eq!(
            resolve_href("OEBPS", "http://example.com/a"),
            "http://example.com/a"
        );
    }

    #[test]
    fn test_absolute_url_detection() {
        assert!(is_absolute_url("http://example.com"));
        assert!(is_absolute_url("data:image/png;base64,AAAA"));
        assert!(is_absolute_url("blob:lector/3"));
        assert!(is_absolute_url("//cdn.example.com/x.css"));
        assert!(!is_absolute_url("images/cover.png"));
        assert!(!is_absolute_url("../style.css"));
        assert!(!is_absolute_url("1chapter:x"));
    }

    #[test]
    fn test_internal_link_heuristic() {
        assert!(is_internal_link("ch2.xhtml"));
        assert!(is_internal_link("ch2.xhtml#sec"));
        assert!(!is_internal_link("#sec"));
        assert!(!is_internal_link("javascript:void(0)"));
        assert!(!is_internal_link("http://example.com"));
        assert!(!is_internal_link(""));
    }

    #[test]
    fn test_decode_path() {
        assert_eq!(decode_path("OEBPS/chapter%201.xhtml").as_deref(), Some("OEBPS/chapter 1.xhtml"));
        assert_eq!(decode_path("OEBPS/plain.xhtml"), None);
    }
}
