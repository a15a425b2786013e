//! Paged document sources and page rasterization.
//!
//! A [`DocumentSource`] is anything with a page count that can render one page
//! at a time into an in-memory raster. PDFs are rasterized through pdfium;
//! single images and image batches are exposed as documents so the batch
//! pipeline treats every input the same way.

mod image;
mod pdf;

pub use self::image::{ImageDocument, ImageSet, NamedImage};
pub use pdf::{points_to_pixels, DocumentLoader, PdfSource};

use crate::detect::{detect_format_from_bytes, InputFormat};
use crate::error::{Error, Result};
use ::image::DynamicImage;

/// Rendering resolution used when the caller does not pick one.
pub const DEFAULT_DPI: u32 = 150;

/// PDF user-space units per inch.
pub const POINTS_PER_INCH: f32 = 72.0;

/// A paged document that renders pages on demand.
///
/// Implementations must be deterministic: the same page at the same DPI always
/// yields the same pixel dimensions.
pub trait DocumentSource {
    /// Human-readable identifier (usually the source path).
    fn label(&self) -> &str;

    /// Total number of pages.
    fn page_count(&self) -> u32;

    /// Render the page at `index` (0-based) at `dpi` dots per inch.
    ///
    /// Fails with [`Error::Render`] when the page cannot be decoded.
    fn render_page(&self, index: u32, dpi: u32) -> Result<DynamicImage>;
}

/// Validate the common preconditions of [`DocumentSource::render_page`].
pub(crate) fn check_page_request(index: u32, dpi: u32, page_count: u32) -> Result<()> {
    if dpi == 0 {
        return Err(Error::InvalidConfig("DPI must be positive".into()));
    }
    if index >= page_count {
        return Err(Error::PageOutOfRange(index + 1, page_count));
    }
    Ok(())
}

/// A document opened through a [`DocumentLoader`].
pub enum Document<'a> {
    /// A PDF rendered by pdfium
    Pdf(PdfSource<'a>),
    /// A single raster image
    Image(ImageDocument),
}

impl Document<'_> {
    /// The detected input format.
    pub fn format(&self) -> InputFormat {
        match self {
            Document::Pdf(_) => InputFormat::Pdf,
            Document::Image(img) => img.format(),
        }
    }
}

impl DocumentSource for Document<'_> {
    fn label(&self) -> &str {
        match self {
            Document::Pdf(pdf) => pdf.label(),
            Document::Image(img) => img.label(),
        }
    }

    fn page_count(&self) -> u32 {
        match self {
            Document::Pdf(pdf) => pdf.page_count(),
            Document::Image(img) => img.page_count(),
        }
    }

    fn render_page(&self, index: u32, dpi: u32) -> Result<DynamicImage> {
        match self {
            Document::Pdf(pdf) => pdf.render_page(index, dpi),
            Document::Image(img) => img.render_page(index, dpi),
        }
    }
}

impl DocumentLoader {
    /// Open a file as a document, choosing PDF or image from its magic bytes.
    pub fn open<P: AsRef<std::path::Path>>(&self, path: P) -> Result<Document<'_>> {
        let path = path.as_ref();
        match crate::detect::detect_format_from_path(path)? {
            InputFormat::Pdf => self.open_pdf(path).map(Document::Pdf),
            InputFormat::Image(_) => ImageDocument::open(path).map(Document::Image),
        }
    }

    /// Open an in-memory document.
    pub fn open_bytes<'a>(
        &'a self,
        data: &'a [u8],
        label: impl Into<String>,
    ) -> Result<Document<'a>> {
        match detect_format_from_bytes(data)? {
            InputFormat::Pdf => self.open_pdf_bytes(data, label).map(Document::Pdf),
            InputFormat::Image(_) => {
                ImageDocument::from_bytes(data.to_vec(), label).map(Document::Image)
            }
        }
    }
}
