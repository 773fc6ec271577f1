//! Cross-context message protocol
//!
//! The host and the paginated chapter exchange JSON messages of the form
//! `{"method": "...", "args": [...]}`. [`HostMessage`] flows from the host to
//! the display surface, [`SurfaceMessage`] the other way.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{LectorError, Result};

/// Wire name of the "last page" scroll target.
pub const SCROLL_TARGET_LAST: &str = "infinity";

#[derive(Serialize, Deserialize)]
struct Envelope {
    method: String,
    #[serde(default)]
    args: Vec<Value>,
}

impl Envelope {
    fn new(method: &str, args: Vec<Value>) -> Self {
        Self {
            method: method.to_string(),
            args,
        }
    }

    fn parse(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }

    fn arg(&self, index: usize) -> Result<&Value> {
        self.args.get(index).ok_or_else(|| {
            LectorError::Protocol(format!("{}: missing argument {}", self.method, index))
        })
    }

    fn malformed(&self, what: &str) -> LectorError {
        LectorError::Protocol(format!("{}: malformed {}", self.method, what))
    }

    fn int_arg(&self, index: usize) -> Result<i32> {
        self.arg(index)?
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .ok_or_else(|| self.malformed("integer argument"))
    }

    fn str_arg(&self, index: usize) -> Result<String> {
        self.arg(index)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.malformed("string argument"))
    }
}

/// Where to scroll within a chapter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScrollTarget {
    /// Page index, clamped by the paginator.
    Page(u32),
    /// The last page.
    Last,
    /// The page holding the element with this id.
    Anchor(String),
}

impl ScrollTarget {
    fn to_value(&self) -> Value {
        match self {
            ScrollTarget::Page(page) => json!(page),
            ScrollTarget::Last => json!(SCROLL_TARGET_LAST),
            ScrollTarget::Anchor(id) => json!(id),
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        if let Some(page) = value.as_u64() {
            return Some(ScrollTarget::Page(u32::try_from(page).unwrap_or(u32::MAX)));
        }
        if let Some(page) = value.as_f64() {
            if page.is_infinite() && page > 0.0 {
                return Some(ScrollTarget::Last);
            }
            return Some(ScrollTarget::Page(page.max(0.0) as u32));
        }
        match value.as_str()? {
            s if s.eq_ignore_ascii_case(SCROLL_TARGET_LAST) => Some(ScrollTarget::Last),
            s => Some(ScrollTarget::Anchor(s.to_string())),
        }
    }
}

/// Messages from the host to the display surface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostMessage {
    /// Move by a number of pages.
    ScrollBy(i32),
    /// Jump to a page, the last page or an anchor.
    ScrollToPage(ScrollTarget),
    /// Change the body font size (CSS value).
    SetFontSize(String),
    /// Switch the theme stylesheet.
    SetTheme(String),
}

impl HostMessage {
    /// Wire method name.
    pub fn method(&self) -> &'static str {
        match self {
            HostMessage::ScrollBy(_) => "scrollBy",
            HostMessage::ScrollToPage(_) => "scrollToPage",
            HostMessage::SetFontSize(_) => "setFontSize",
            HostMessage::SetTheme(_) => "setTheme",
        }
    }

    /// Encode as `{method, args}` JSON.
    pub fn to_json(&self) -> String {
        let args = match self {
            HostMessage::ScrollBy(delta) => vec![json!(delta)],
            HostMessage::ScrollToPage(target) => vec![target.to_value()],
            HostMessage::SetFontSize(size) => vec![json!(size)],
            HostMessage::SetTheme(path) => vec![json!(path)],
        };
        Envelope::new(self.method(), args).to_json()
    }

    /// Decode `{method, args}` JSON.
    pub fn from_json(raw: &str) -> Result<Self> {
        let env = Envelope::parse(raw)?;
        match env.method.as_str() {
            "scrollBy" => Ok(HostMessage::ScrollBy(env.int_arg(0)?)),
            "scrollToPage" => ScrollTarget::from_value(env.arg(0)?)
                .map(HostMessage::ScrollToPage)
                .ok_or_else(|| env.malformed("scroll target")),
            "setFontSize" => Ok(HostMessage::SetFontSize(env.str_arg(0)?)),
            "setTheme" => Ok(HostMessage::SetTheme(env.str_arg(0)?)),
            other => Err(LectorError::Protocol(format!("unknown method '{}'", other))),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct LoadArgs {
    #[serde(default)]
    title: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageChangeArgs {
    page: u32,
    last_page: u32,
}

/// Messages from the display surface to the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SurfaceMessage {
    /// An in-book link was activated.
    Goto(String),
    /// The chapter finished loading.
    Load {
        /// Document title reported by the surface.
        title: Option<String>,
    },
    /// The chapter document at this URL is being unloaded.
    Unload(String),
    /// The current page changed.
    PageChange {
        /// Current page, 0-indexed.
        page: u32,
        /// Index of the last page.
        last_page: u32,
    },
    /// Paging ran past a chapter boundary.
    ChangeChapterBy(i32),
    /// A key press forwarded for host-side handling.
    KeyboardNavigation(String),
}

impl SurfaceMessage {
    /// Wire method name.
    pub fn method(&self) -> &'static str {
        match self {
            SurfaceMessage::Goto(_) => "goto",
            SurfaceMessage::Load { .. } => "load",
            SurfaceMessage::Unload(_) => "unload",
            SurfaceMessage::PageChange { .. } => "pagechange",
            SurfaceMessage::ChangeChapterBy(_) => "changeChapterBy",
            SurfaceMessage::KeyboardNavigation(_) => "keyboardNavigation",
        }
    }

    /// Encode as `{method, args}` JSON.
    pub fn to_json(&self) -> String {
        let args = match self {
            SurfaceMessage::Goto(href) => vec![json!(href)],
            SurfaceMessage::Load { title } => vec![json!(LoadArgs {
                title: title.clone()
            })],
            SurfaceMessage::Unload(url) => vec![json!(url)],
            SurfaceMessage::PageChange { page, last_page } => vec![json!(PageChangeArgs {
                page: *page,
                last_page: *last_page
            })],
            SurfaceMessage::ChangeChapterBy(delta) => vec![json!(delta)],
            SurfaceMessage::KeyboardNavigation(code) => vec![json!(code)],
        };
        Envelope::new(self.method(), args).to_json()
    }

    /// Decode `{method, args}` JSON.
    pub fn from_json(raw: &str) -> Result<Self> {
        let env = Envelope::parse(raw)?;
        match env.method.as_str() {
            "goto" => Ok(SurfaceMessage::Goto(env.str_arg(0)?)),
            "load" => {
                let title = match env.args.first() {
                    None | Some(Value::Null) => None,
                    Some(value) => {
                        serde_json::from_value::<LoadArgs>(value.clone())
                            .map_err(|_| env.malformed("load arguments"))?
                            .title
                    }
                };
                Ok(SurfaceMessage::Load { title })
            }
            "unload" => Ok(SurfaceMessage::Unload(env.str_arg(0)?)),
            "pagechange" => {
                let args: PageChangeArgs = serde_json::from_value(env.arg(0)?.clone())
                    .map_err(|_| env.malformed("pagechange arguments"))?;
                Ok(SurfaceMessage::PageChange {
                    page: args.page,
                    last_page: args.last_page,
                })
            }
            "changeChapterBy" => Ok(SurfaceMessage::ChangeChapterBy(env.int_arg(0)?)),
            "keyboardNavigation" => Ok(SurfaceMessage::KeyboardNavigation(env.str_arg(0)?)),
            other => Err(LectorError::Protocol(format!("unknown method '{}'", other))),
        }
    }
}

/// Page direction for a key code: `-1` for previous, `+1` for next.
pub fn key_direction(code: &str) -> Option<i32> {
    match code {
        "ArrowLeft" | "Left" | "ArrowUp" | "Up" | "Space" | " " => Some(-1),
        "ArrowRight" | "Right" | "ArrowDown" | "Down" | "Backspace" => Some(1),
        _ => None,
    }
}
