/// Measurements of the laid-out chapter, supplied by the display context.
pub trait ContentLayout {
    /// Visible width in px.
    fn viewport_width(&self) -> f64;

    /// Visible height in px.
    fn viewport_height(&self) -> f64;

    /// Horizontal offset of the `#lector_end` sentinel, if it is in the
    /// document.
    fn sentinel_offset(&self) -> Option<f64>;

    /// Horizontal offset of the element with id `id`.
    fn anchor_offset(&self, id: &str) -> Option<f64>;

    /// Total scrollable width of the content.
    fn scroll_width(&self) -> f64;
}

/// Column geometry: one column plus one gap spans the viewport.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ColumnStyle {
    /// Column width in px.
    pub column_width: f64,
    /// Gap between columns in px.
    pub column_gap: f64,
    /// Column height in px.
    pub height: f64,
}

impl ColumnStyle {
    /// Geometry for a viewport.
    pub fn for_viewport(width: f64, height: f64, gap: f64) -> Self {
        Self {
            column_width: (width - gap).max(0.0),
            column_gap: gap,
            height,
        }
    }

    /// CSS declarations for the column container.
    pub fn css(&self) -> String {
        format!(
            "column-width: {}px; column-gap: {}px; height: {}px;",
            self.column_width, self.column_gap, self.height
        )
    }
}

/// What the display context should currently show.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Presentation {
    /// Horizontal translation of the content in px.
    pub translate_x: f64,
    /// Whether translation changes animate.
    pub animated: bool,
    /// Column geometry.
    pub columns: ColumnStyle,
    /// Body font size set by the host.
    pub font_size: Option<String>,
    /// Theme stylesheet set by the host.
    pub theme: Option<String>,
}
