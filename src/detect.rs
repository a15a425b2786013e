//! Input format detection from magic bytes.

use crate::error::{Error, Result};
use image::ImageFormat;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Kind of input a document source can be built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// A PDF document (paged, needs rasterization)
    Pdf,
    /// A single raster image
    Image(ImageFormat),
}

impl InputFormat {
    /// Check whether the input is a PDF.
    pub fn is_pdf(&self) -> bool {
        matches!(self, InputFormat::Pdf)
    }
}

impl std::fmt::Display for InputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputFormat::Pdf => write!(f, "PDF"),
            InputFormat::Image(format) => write!(f, "{:?} image", format),
        }
    }
}

/// PDF magic bytes: %PDF-
const PDF_MAGIC: &[u8] = b"%PDF-";

/// Enough bytes for every signature `image::guess_format` knows about.
const SNIFF_LEN: usize = 32;

/// Detect the input format of a file.
///
/// # Example
/// ```no_run
/// use docvl::detect::detect_format_from_path;
///
/// let format = detect_format_from_path("scan.png").unwrap();
/// println!("{}", format);
/// ```
pub fn detect_format_from_path<P: AsRef<Path>>(path: P) -> Result<InputFormat> {
    let mut file = File::open(path)?;
    let mut header = Vec::with_capacity(SNIFF_LEN);
    file.by_ref().take(SNIFF_LEN as u64).read_to_end(&mut header)?;
    detect_format_from_bytes(&header)
}

/// Detect the input format from the leading bytes of a file.
///
/// # Returns
/// * `Ok(InputFormat)` for PDFs and images the `image` crate can decode
/// * `Err(Error::UnknownFormat)` otherwise
pub fn detect_format_from_bytes(data: &[u8]) -> Result<InputFormat> {
    if data.starts_with(PDF_MAGIC) {
        return Ok(InputFormat::Pdf);
    }

    image::guess_format(data)
        .map(InputFormat::Image)
        .map_err(|_| Error::UnknownFormat)
}

/// Check if bytes start with a PDF header.
pub fn is_pdf_bytes(data: &[u8]) -> bool {
    data.starts_with(PDF_MAGIC)
}
