//! Session configuration.

use relmodel_core::DEFAULT_DATE_FORMAT;

/// Default accessor a pivot record is attached under.
pub const DEFAULT_PIVOT_ACCESSOR: &str = "pivot";

/// Configuration for Session behavior.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Canonical stored date format (chrono `strftime` syntax).
    pub date_format: String,
    /// Lazy loads per relation before an N+1 warning; `None` disables detection.
    pub n1_threshold: Option<usize>,
    /// Refuse lazy single-parent resolution.
    pub prevent_lazy_loading: bool,
    /// Accessor many-to-many relations attach pivot records under.
    pub pivot_accessor: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            n1_threshold: Some(3),
            prevent_lazy_loading: false,
            pivot_accessor: DEFAULT_PIVOT_ACCESSOR.to_string(),
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn date_format(mut self, format: impl Into<String>) -> Self {
        self.date_format = format.into();
        self
    }

    #[must_use]
    pub fn n1_threshold(mut self, threshold: Option<usize>) -> Self {
        self.n1_threshold = threshold;
        self
    }

    #[must_use]
    pub fn prevent_lazy_loading(mut self, prevent: bool) -> Self {
        self.prevent_lazy_loading = prevent;
        self
    }

    #[must_use]
    pub fn pivot_accessor(mut self, accessor: impl Into<String>) -> Self {
        self.pivot_accessor = accessor.into();
        self
    }
}
