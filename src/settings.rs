//! Rendering settings
//!
//! What the chapter renderer injects into every chapter: the application
//! stylesheet, an optional theme stylesheet, the pagination script and a
//! font size override. The URLs are plain configuration values.

use std::sync::{Arc, Mutex, PoisonError};

/// Default URL of the application stylesheet.
pub const DEFAULT_APP_STYLESHEET: &str = "/lector/paginate.css";

/// Default URL of the pagination script.
pub const DEFAULT_PAGINATION_SCRIPT: &str = "/lector/paginate.js";

/// Settings applied while rendering chapters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderSettings {
    /// Stylesheet injected as `lector:injectLink`.
    pub app_stylesheet: Option<String>,
    /// Theme stylesheet injected as `lector:injectTheme`.
    pub theme_stylesheet: Option<String>,
    /// CSS font size set on `<body>` (e.g. `"120%"`).
    pub font_size: Option<String>,
    /// Script injected as `lector:injectScript`.
    pub pagination_script: Option<String>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            app_stylesheet: Some(DEFAULT_APP_STYLESHEET.to_string()),
            theme_stylesheet: None,
            font_size: None,
            pagination_script: Some(DEFAULT_PAGINATION_SCRIPT.to_string()),
        }
    }
}

impl RenderSettings {
    /// Settings that inject nothing.
    pub fn bare() -> Self {
        Self {
            app_stylesheet: None,
            theme_stylesheet: None,
            font_size: None,
            pagination_script: None,
        }
    }

    /// Set the application stylesheet URL.
    pub fn with_app_stylesheet(mut self, url: impl Into<String>) -> Self {
        self.app_stylesheet = Some(url.into());
        self
    }

    /// Set the theme stylesheet URL.
    pub fn with_theme(mut self, url: impl Into<String>) -> Self {
        self.theme_stylesheet = Some(url.into());
        self
    }

    /// Set the body font size.
    pub fn with_font_size(mut self, size: impl Into<String>) -> Self {
        self.font_size = Some(size.into());
        self
    }

    /// Set the pagination script URL.
    pub fn with_pagination_script(mut self, url: impl Into<String>) -> Self {
        self.pagination_script = Some(url.into());
        self
    }

    /// Take font size and theme defaults from `provider`. Values the
    /// provider does not supply are left unchanged.
    pub fn apply(&mut self, provider: &dyn SettingsProvider) {
        if let Some(size) = provider.font_size() {
            self.font_size = Some(size);
        }
        if let Some(theme) = provider.theme() {
            self.theme_stylesheet = Some(theme);
        }
    }
}

/// Settings shared between a viewer and the chapters it renders. Chapters
/// read the value when they render, so changes reach chapters that are
/// unloaded and rendered again.
#[derive(Clone, Debug, Default)]
pub struct SharedSettings(Arc<Mutex<RenderSettings>>);

impl SharedSettings {
    /// Current value.
    pub fn get(&self) -> RenderSettings {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Modify the value in place.
    pub fn update(&self, f: impl FnOnce(&mut RenderSettings)) {
        f(&mut self.0.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

impl From<RenderSettings> for SharedSettings {
    fn from(settings: RenderSettings) -> Self {
        Self(Arc::new(Mutex::new(settings)))
    }
}

/// Source of user preferences (font size, theme).
pub trait SettingsProvider: Send + Sync {
    /// Preferred CSS font size.
    fn font_size(&self) -> Option<String>;

    /// Preferred theme stylesheet URL.
    fn theme(&self) -> Option<String>;
}

/// Fixed preferences.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StaticSettings {
    /// Preferred CSS font size.
    pub font_size: Option<String>,
    /// Preferred theme stylesheet URL.
    pub theme: Option<String>,
}

impl SettingsProvider for StaticSettings {
    fn font_size(&self) -> Option<String> {
        self.font_size.clone()
    }

    fn theme(&self) -> Option<String> {
        self.theme.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_overrides_only_supplied_values() {
        let mut settings = RenderSettings::default().with_theme("day.css");
        settings.apply(&StaticSettings {
            font_size: Some("120%".into()),
            theme: None,
        });
        assert_eq!(settings.font_size.as_deref(), Some("120%"));
        assert_eq!(settings.theme_stylesheet.as_deref(), Some("day.css"));
        assert_eq!(
            settings.pagination_script.as_deref(),
            Some(DEFAULT_PAGINATION_SCRIPT)
        );
    }

    #[test]
    fn test_shared_settings_update_every_clone() {
        let shared = SharedSettings::from(RenderSettings::bare());
        let other = shared.clone();
        other.update(|s| s.font_size = Some("90%".into()));
        assert_eq!(shared.get().font_size.as_deref(), Some("90%"));
        assert_eq!(shared.get().app_stylesheet, None);
    }
}
