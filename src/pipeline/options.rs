//! Pipeline options and configuration.

use std::ops::Range;
use std::time::Duration;

use crate::document::DEFAULT_DPI;
use crate::error::{Error, Result};
use crate::inference::DEFAULT_MAX_TOKENS;
use crate::normalize::DEFAULT_MAX_EDGE;

/// How often accelerator memory is released when the caller does not pick.
pub const DEFAULT_RELEASE_EVERY: u32 = 10;

/// Options for a batch run over one document.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Rendering resolution for PDF pages
    pub dpi: u32,

    /// Longest-edge cap applied before inference
    pub max_edge: u32,

    /// Generation budget per page
    pub max_tokens: u32,

    /// Release accelerator memory and report progress every N pages
    pub release_every: u32,

    /// First page to process (0-based)
    pub start_page: u32,

    /// Number of pages to process (`None` = through the last page)
    pub num_pages: Option<u32>,

    /// Wall-clock budget for the whole run
    pub deadline: Option<Duration>,
}

impl PipelineOptions {
    /// Create new pipeline options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set rendering DPI.
    pub fn with_dpi(mut self, dpi: u32) -> Self {
        self.dpi = dpi;
        self
    }

    /// Set the longest-edge cap.
    pub fn with_max_edge(mut self, max_edge: u32) -> Self {
        self.max_edge = max_edge;
        self
    }

    /// Set the generation budget per page.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the memory release / progress interval.
    pub fn with_release_every(mut self, pages: u32) -> Self {
        self.release_every = pages;
        self
    }

    /// Start at `start_page` (0-based) and process at most `num_pages` pages.
    pub fn with_pages(mut self, start_page: u32, num_pages: Option<u32>) -> Self {
        self.start_page = start_page;
        self.num_pages = num_pages;
        self
    }

    /// Bound the whole run by a wall-clock budget.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Check that every numeric option is usable.
    pub fn validate(&self) -> Result<()> {
        if self.dpi == 0 {
            return Err(Error::InvalidConfig("dpi must be positive".into()));
        }
        if self.max_edge == 0 {
            return Err(Error::InvalidConfig("max_edge must be positive".into()));
        }
        if self.max_tokens == 0 {
            return Err(Error::InvalidConfig("max_tokens must be positive".into()));
        }
        if self.release_every == 0 {
            return Err(Error::InvalidConfig("release_every must be positive".into()));
        }
        if self.num_pages == Some(0) {
            return Err(Error::InvalidPageRange("num_pages must be positive".into()));
        }
        Ok(())
    }

    /// Resolve the page range `[start, end)` against a document's page count.
    ///
    /// Both ends are clamped to `[0, page_count]`, so a start past the last
    /// page (or an empty document) gives an empty range.
    pub fn page_range(&self, page_count: u32) -> Range<u32> {
        let start = self.start_page.min(page_count);
        let end = match self.num_pages {
            Some(n) => start.saturating_add(n).min(page_count),
            None => page_count,
        };
        start..end
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            dpi: DEFAULT_DPI,
            max_edge: DEFAULT_MAX_EDGE,
            max_tokens: DEFAULT_MAX_TOKENS,
            release_every: DEFAULT_RELEASE_EVERY,
            start_page: 0,
            num_pages: None,
            deadline: None,
        }
    }
}

/// Options for a single-image extraction.
#[derive(Debug, Clone, Copy)]
pub struct ExtractOptions {
    /// Longest-edge cap applied before inference
    pub max_edge: u32,
    /// Generation budget
    pub max_tokens: u32,
}

impl ExtractOptions {
    /// Create new extraction options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the longest-edge cap.
    pub fn with_max_edge(mut self, max_edge: u32) -> Self {
        self.max_edge = max_edge;
        self
    }

    /// Set the generation budget.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Check that every numeric option is usable.
    pub fn validate(&self) -> Result<()> {
        if self.max_edge == 0 {
            return Err(Error::InvalidConfig("resize_max must be positive".into()));
        }
        if self.max_tokens == 0 {
            return Err(Error::InvalidConfig("max_tokens must be positive".into()));
        }
        Ok(())
    }
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            max_edge: DEFAULT_MAX_EDGE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl From<&PipelineOptions> for ExtractOptions {
    fn from(options: &PipelineOptions) -> Self {
        Self {
            max_edge: options.max_edge,
            max_tokens: options.max_tokens,
        }
    }
}
