//! PDF page rasterization backed by pdfium.

use std::cell::OnceCell;
use std::path::{Path, PathBuf};

use ::image::DynamicImage;
use pdfium_render::prelude::*;

use super::{check_page_request, DocumentSource, POINTS_PER_INCH};
use crate::error::{Error, Result};

/// Convert a length in PDF points to pixels at the given DPI.
///
/// Rounds to the nearest pixel and never returns less than one.
pub fn points_to_pixels(points: f32, dpi: u32) -> i32 {
    let pixels = (points * dpi as f32 / POINTS_PER_INCH).round() as i32;
    pixels.max(1)
}

/// Opens documents, binding the pdfium library the first time a PDF is seen.
///
/// Image inputs never touch pdfium, so a missing pdfium library only matters
/// for PDF inputs.
pub struct DocumentLoader {
    library_dir: Option<PathBuf>,
    password: Option<String>,
    pdfium: OnceCell<Pdfium>,
}

impl DocumentLoader {
    /// Create a loader that looks for pdfium next to the working directory,
    /// then falls back to the system library.
    pub fn new() -> Self {
        Self {
            library_dir: None,
            password: None,
            pdfium: OnceCell::new(),
        }
    }

    /// Look for the pdfium shared library in `dir` first.
    pub fn with_library_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.library_dir = Some(dir.into());
        self
    }

    /// Set the password used for encrypted PDFs.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    fn pdfium(&self) -> Result<&Pdfium> {
        if let Some(pdfium) = self.pdfium.get() {
            return Ok(pdfium);
        }

        let dir = self
            .library_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("./"));
        let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir))
            .or_else(|_| Pdfium::bind_to_system_library())
            .map_err(|e| Error::DocumentOpen(format!("failed to bind pdfium library: {}", e)))?;

        log::debug!("Bound pdfium library");
        Ok(self.pdfium.get_or_init(|| Pdfium::new(bindings)))
    }

    /// Open a PDF file.
    pub fn open_pdf(&self, path: &Path) -> Result<PdfSource<'_>> {
        let pdfium = self.pdfium()?;
        let document = pdfium
            .load_pdf_from_file(path, self.password.as_deref())
            .map_err(|e| Error::DocumentOpen(format!("{}: {}", path.display(), e)))?;
        Ok(PdfSource::new(document, path.display().to_string()))
    }

    /// Open a PDF held in memory.
    pub fn open_pdf_bytes<'a>(
        &'a self,
        data: &'a [u8],
        label: impl Into<String>,
    ) -> Result<PdfSource<'a>> {
        let pdfium = self.pdfium()?;
        let document = pdfium.load_pdf_from_byte_slice(data, self.password.as_deref())?;
        Ok(PdfSource::new(document, label.into()))
    }
}

impl Default for DocumentLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// A PDF document whose pages are rasterized on demand.
pub struct PdfSource<'a> {
    document: PdfDocument<'a>,
    label: String,
    page_count: u32,
}

impl<'a> PdfSource<'a> {
    fn new(document: PdfDocument<'a>, label: String) -> Self {
        let page_count = u32::from(document.pages().len());
        Self {
            document,
            label,
            page_count,
        }
    }

    /// Page size in points for the page at `index`.
    pub fn page_size(&self, index: u32) -> Result<(f32, f32)> {
        let page = self.page(index)?;
        Ok((page.width().value, page.height().value))
    }

    fn page(&self, index: u32) -> Result<PdfPage<'_>> {
        let page_index = PdfPageIndex::try_from(index)
            .map_err(|_| Error::PageOutOfRange(index + 1, self.page_count))?;
        self.document
            .pages()
            .get(page_index)
            .map_err(|e| Error::render(index + 1, e.to_string()))
    }
}

impl DocumentSource for PdfSource<'_> {
    fn label(&self) -> &str {
        &self.label
    }

    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn render_page(&self, index: u32, dpi: u32) -> Result<DynamicImage> {
        check_page_request(index, dpi, self.page_count)?;

        let page = self.page(index)?;
        let width = points_to_pixels(page.width().value, dpi);
        let height = points_to_pixels(page.height().value, dpi);

        let config = PdfRenderConfig::new()
            .set_target_width(width)
            .set_target_height(height)
            .render_form_data(true)
            .render_annotations(true);

        let bitmap = page
            .render_with_config(&config)
            .map_err(|e| Error::render(index + 1, e.to_string()))?;

        log::trace!(
            "Rendered page {} of {} at {} dpi ({}x{})",
            index + 1,
            self.label,
            dpi,
            width,
            height
        );

        Ok(bitmap.as_image())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_points_to_pixels_letter_at_150_dpi() {
        // 8.5 x 11 inches
        assert_eq!(points_to_pixels(612.0, 150), 1275);
        assert_eq!(points_to_pixels(792.0, 150), 1650);
    }

    #[test]
    fn test_points_to_pixels_rounds_to_nearest() {
        // 595 * 150 / 72 = 1239.58
        assert_eq!(points_to_pixels(595.0, 150), 1240);
        // 72 points at 72 dpi is exactly one inch
        assert_eq!(points_to_pixels(72.0, 72), 72);
    }

    #[test]
    fn test_points_to_pixels_minimum_one() {
        assert_eq!(points_to_pixels(0.1, 1), 1);
    }

    #[test]
    fn test_loader_builder() {
        let loader = DocumentLoader::new()
            .with_library_dir("/opt/pdfium/lib")
            .with_password("secret");
        assert_eq!(loader.library_dir, Some(PathBuf::from("/opt/pdfium/lib")));
        assert_eq!(loader.password.as_deref(), Some("secret"));
        assert!(loader.pdfium.get().is_none());
    }
}
