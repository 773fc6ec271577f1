use std::time::Duration;

/// Where key presses are handled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum KeyRouting {
    /// Page locally.
    #[default]
    Local,
    /// Forward as `keyboardNavigation` for the host to decide.
    Host,
}

/// Paginator tuning.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PaginatorConfig {
    /// Gap between columns in px.
    pub column_gap: f64,
    /// Idle time after which accumulated wheel deltas are dropped.
    pub wheel_idle: Duration,
    /// Delay between a resize event and the re-measure.
    pub resize_debounce: Duration,
    /// Animation frames after load before page changes animate.
    pub transition_frames: u32,
    /// Fraction of the viewport width a drag must cover to turn the page.
    pub swipe_threshold: f64,
    /// Key handling.
    pub key_routing: KeyRouting,
}

impl Default for PaginatorConfig {
    fn default() -> Self {
        Self {
            column_gap: 40.0,
            wheel_idle: Duration::from_millis(250),
            resize_debounce: Duration::from_millis(15),
            transition_frames: 2,
            swipe_threshold: 0.1,
            key_routing: KeyRouting::Local,
        }
    }
}

impl PaginatorConfig {
    /// Set the column gap.
    pub fn with_column_gap(mut self, gap: f64) -> Self {
        self.column_gap = gap;
        self
    }

    /// Set the wheel idle timeout.
    pub fn with_wheel_idle(mut self, idle: Duration) -> Self {
        self.wheel_idle = idle;
        self
    }

    /// Set the resize debounce delay.
    pub fn with_resize_debounce(mut self, debounce: Duration) -> Self {
        self.resize_debounce = debounce;
        self
    }

    /// Set the swipe threshold (fraction of the viewport width).
    pub fn with_swipe_threshold(mut self, threshold: f64) -> Self {
        self.swipe_threshold = threshold;
        self
    }

    /// Set key routing.
    pub fn with_key_routing(mut self, routing: KeyRouting) -> Self {
        self.key_routing = routing;
        self
    }
}
