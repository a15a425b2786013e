//! Raster images exposed as documents.

use std::path::Path;

use ::image::{DynamicImage, ImageFormat};

use super::{check_page_request, DocumentSource};
use crate::detect::InputFormat;
use crate::error::{Error, Result};

/// A single encoded image treated as a one-page document.
///
/// The image is kept encoded and decoded on each render, matching the
/// on-demand contract of PDF pages. DPI is ignored: the raster already has
/// its final resolution.
#[derive(Debug, Clone)]
pub struct ImageDocument {
    label: String,
    data: Vec<u8>,
    format: ImageFormat,
}

impl ImageDocument {
    /// Read an image file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        Self::from_bytes(data, path.display().to_string())
    }

    /// Wrap encoded image bytes.
    ///
    /// Fails with [`Error::UnknownFormat`] if the bytes are not a known image format.
    pub fn from_bytes(data: Vec<u8>, label: impl Into<String>) -> Result<Self> {
        let format = ::image::guess_format(&data).map_err(|_| Error::UnknownFormat)?;
        Ok(Self {
            label: label.into(),
            data,
            format,
        })
    }

    /// The detected input format.
    pub fn format(&self) -> InputFormat {
        InputFormat::Image(self.format)
    }
}

impl DocumentSource for ImageDocument {
    fn label(&self) -> &str {
        &self.label
    }

    fn page_count(&self) -> u32 {
        1
    }

    fn render_page(&self, index: u32, dpi: u32) -> Result<DynamicImage> {
        check_page_request(index, dpi, 1)?;
        ::image::load_from_memory_with_format(&self.data, self.format)
            .map_err(|e| Error::render(index + 1, e.to_string()))
    }
}

/// One named, still-encoded image of an [`ImageSet`].
#[derive(Debug, Clone)]
pub struct NamedImage {
    /// File name as supplied by the caller
    pub name: String,
    /// Encoded image bytes
    pub data: Vec<u8>,
}

impl NamedImage {
    /// Create a named image.
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// An ordered batch of images processed as the pages of one document.
///
/// Nothing is decoded up front: a corrupt entry fails only its own page.
#[derive(Debug, Clone, Default)]
pub struct ImageSet {
    label: String,
    images: Vec<NamedImage>,
}

impl ImageSet {
    /// Create an empty set.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            images: Vec::new(),
        }
    }

    /// Append an image; it becomes the next page.
    pub fn push(&mut self, image: NamedImage) {
        self.images.push(image);
    }

    /// Name of the image backing the page at `index`.
    pub fn name(&self, index: u32) -> Option<&str> {
        self.images.get(index as usize).map(|img| img.name.as_str())
    }

    /// Number of images.
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Check whether the set has no images.
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

impl FromIterator<NamedImage> for ImageSet {
    fn from_iter<T: IntoIterator<Item = NamedImage>>(iter: T) -> Self {
        Self {
            label: "batch".to_string(),
            images: iter.into_iter().collect(),
        }
    }
}

impl DocumentSource for ImageSet {
    fn label(&self) -> &str {
        &self.label
    }

    fn page_count(&self) -> u32 {
        self.images.len() as u32
    }

    fn render_page(&self, index: u32, dpi: u32) -> Result<DynamicImage> {
        check_page_request(index, dpi, self.page_count())?;
        let entry = &self.images[index as usize];
        ::image::load_from_memory(&entry.data)
            .map_err(|e| Error::render(index + 1, format!("{}: {}", entry.name, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::image::{ImageBuffer, Rgb};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_pixel(width, height, Rgb([255, 255, 255]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_image_document_single_page() {
        let doc = ImageDocument::from_bytes(png_bytes(40, 20), "scan.png").unwrap();
        assert_eq!(doc.page_count(), 1);
        assert_eq!(doc.label(), "scan.png");
        assert_eq!(doc.format(), InputFormat::Image(ImageFormat::Png));

        let img = doc.render_page(0, 150).unwrap();
        assert_eq!((img.width(), img.height()), (40, 20));
    }

    #[test]
    fn test_image_document_rejects_out_of_range() {
        let doc = ImageDocument::from_bytes(png_bytes(4, 4), "scan.png").unwrap();
        assert!(matches!(
            doc.render_page(1, 150),
            Err(Error::PageOutOfRange(2, 1))
        ));
        assert!(matches!(
            doc.render_page(0, 0),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_image_document_unknown_bytes() {
        let result = ImageDocument::from_bytes(b"plain text".to_vec(), "notes.txt");
        assert!(matches!(result, Err(Error::UnknownFormat)));
    }

    #[test]
    fn test_image_set_isolates_corrupt_entry() {
        let mut set = ImageSet::new("upload");
        set.push(NamedImage::new("a.png", png_bytes(8, 8)));
        // PNG signature followed by garbage
        set.push(NamedImage::new("b.png", b"\x89PNG\r\n\x1a\ngarbage".to_vec()));
        set.push(NamedImage::new("c.png", png_bytes(16, 8)));

        assert_eq!(set.page_count(), 3);
        assert!(set.render_page(0, 150).is_ok());

        let err = set.render_page(1, 150).unwrap_err();
        assert!(matches!(err, Error::Render { page: 2, .. }));
        assert!(err.to_string().contains("b.png"));

        assert_eq!(set.render_page(2, 150).unwrap().width(), 16);
        assert_eq!(set.name(2), Some("c.png"));
    }
}
