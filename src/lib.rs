//! # docvl
//!
//! Batch document OCR with vision-language models.
//!
//! This library rasterizes PDF pages (or takes raster images directly), caps
//! their size, sends each one to a vision-language model and collects the
//! transcriptions into a report with timing and, when a reference
//! transcription is available, character-level quality metrics.
//!
//! ## Quick Start
//!
//! ```no_run
//! use docvl::inference::{ChatCompletionsBackend, ChatCompletionsConfig, InferenceGateway};
//! use docvl::DocVl;
//!
//! fn main() -> docvl::Result<()> {
//!     let backend = ChatCompletionsBackend::new(ChatCompletionsConfig::default());
//!     let mut gateway = InferenceGateway::open_with(Box::new(backend))?;
//!
//!     let report = DocVl::new()
//!         .with_dpi(150)
//!         .with_pages(0, Some(10))
//!         .process("scan.pdf", &mut gateway)?;
//!
//!     println!("{}", report.summary);
//!     report.write_to_dir("ocr_results")?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Any paged input**: PDFs through pdfium, single images, image batches
//! - **Pluggable backends**: OpenAI-compatible chat endpoints or a remote docvl service
//! - **Failure isolation**: a broken page becomes a failed record, never an aborted run
//! - **Quality metrics**: CER and accuracy against per-page ground truth
//! - **Reports**: concatenated text, detailed JSON and per-page CSV

pub mod detect;
pub mod document;
pub mod error;
pub mod inference;
pub mod metrics;
pub mod normalize;
pub mod pipeline;
pub mod report;

// Re-export commonly used types
pub use detect::{detect_format_from_bytes, detect_format_from_path, InputFormat};
pub use document::{Document, DocumentLoader, DocumentSource, ImageSet, NamedImage};
pub use error::{Error, Result};
pub use inference::{InferenceBackend, InferenceGateway, InferenceResult};
pub use metrics::{score, GroundTruth, QualityMetrics};
pub use normalize::{normalize, ImageSize, NormalizedImage};
pub use pipeline::{
    extract_image, BatchOrchestrator, ExtractOptions, NoProgress, PageRecord, PipelineOptions,
    ProgressObserver,
};
pub use report::{aggregate, DocumentReport, JsonFormat, Summary};

/// Raster type passed between renderers, the normalizer and backends.
pub use image::DynamicImage;

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Process a PDF or image file with default options.
///
/// # Example
///
/// ```no_run
/// use docvl::inference::{ServiceBackend, ServiceConfig};
/// use docvl::{process_file, InferenceGateway};
///
/// let backend = ServiceBackend::new(ServiceConfig::new("http://gpu-box:8000"));
/// let mut gateway = InferenceGateway::open_with(Box::new(backend)).unwrap();
/// let report = process_file("scan.pdf", &mut gateway).unwrap();
/// println!("{}", report.full_text());
/// ```
pub fn process_file<P: AsRef<Path>>(
    path: P,
    gateway: &mut InferenceGateway,
) -> Result<DocumentReport> {
    DocVl::new().process(path, gateway)
}

/// Transcribe one image file with default options.
pub fn extract_file<P: AsRef<Path>>(
    path: P,
    gateway: &mut InferenceGateway,
) -> Result<pipeline::ImageExtraction> {
    let image = image::open(path)?;
    extract_image(gateway, image, &ExtractOptions::default())
}

/// Builder for running documents through the OCR pipeline.
///
/// # Example
///
/// ```no_run
/// use docvl::{DocVl, GroundTruth, InferenceGateway};
/// # fn run(gateway: &mut InferenceGateway) -> docvl::Result<()> {
///
/// let report = DocVl::new()
///     .with_dpi(200)
///     .with_max_tokens(1024)
///     .with_ground_truth(GroundTruth::from_file("truth.txt")?)
///     .process("scan.pdf", gateway)?;
/// # Ok(())
/// # }
/// ```
pub struct DocVl {
    loader: DocumentLoader,
    options: PipelineOptions,
    ground_truth: Option<GroundTruth>,
}

impl DocVl {
    /// Create a new builder with default options.
    pub fn new() -> Self {
        Self {
            loader: DocumentLoader::new(),
            options: PipelineOptions::default(),
            ground_truth: None,
        }
    }

    /// Replace all pipeline options.
    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// Set rendering DPI for PDF pages.
    pub fn with_dpi(mut self, dpi: u32) -> Self {
        self.options = self.options.with_dpi(dpi);
        self
    }

    /// Set the longest-edge cap.
    pub fn with_max_edge(mut self, max_edge: u32) -> Self {
        self.options = self.options.with_max_edge(max_edge);
        self
    }

    /// Set the generation budget per page.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.options = self.options.with_max_tokens(max_tokens);
        self
    }

    /// Set the page range (0-based start, optional count).
    pub fn with_pages(mut self, start_page: u32, num_pages: Option<u32>) -> Self {
        self.options = self.options.with_pages(start_page, num_pages);
        self
    }

    /// Bound each run by a wall-clock budget.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.options = self.options.with_deadline(deadline);
        self
    }

    /// Score pages against a reference transcription.
    pub fn with_ground_truth(mut self, ground_truth: GroundTruth) -> Self {
        self.ground_truth = Some(ground_truth);
        self
    }

    /// Look for the pdfium library in `dir` before the system paths.
    pub fn with_pdfium_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.loader = self.loader.with_library_dir(dir);
        self
    }

    /// Set the password for encrypted PDFs.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.loader = self.loader.with_password(password);
        self
    }

    /// Current pipeline options.
    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Process a PDF or image file.
    pub fn process<P: AsRef<Path>>(
        &self,
        path: P,
        gateway: &mut InferenceGateway,
    ) -> Result<DocumentReport> {
        self.process_with_observer(path, gateway, &mut NoProgress)
    }

    /// Process a PDF or image file, reporting progress to `observer`.
    pub fn process_with_observer<P: AsRef<Path>>(
        &self,
        path: P,
        gateway: &mut InferenceGateway,
        observer: &mut dyn ProgressObserver,
    ) -> Result<DocumentReport> {
        let document = self.loader.open(path)?;
        self.process_document(&document, gateway, observer)
    }

    /// Process an in-memory PDF or image.
    pub fn process_bytes(
        &self,
        data: &[u8],
        label: impl Into<String>,
        gateway: &mut InferenceGateway,
    ) -> Result<DocumentReport> {
        let document = self.loader.open_bytes(data, label)?;
        self.process_document(&document, gateway, &mut NoProgress)
    }

    /// Process any document source.
    pub fn process_document(
        &self,
        document: &dyn DocumentSource,
        gateway: &mut InferenceGateway,
        observer: &mut dyn ProgressObserver,
    ) -> Result<DocumentReport> {
        let mut orchestrator = BatchOrchestrator::new(gateway, self.options.clone());
        if let Some(truth) = &self.ground_truth {
            orchestrator = orchestrator.with_ground_truth(truth);
        }

        let records = orchestrator.run(document, observer)?;
        Ok(aggregate(records).with_source(document.label()))
    }
}

impl Default for DocVl {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::BackendOutput;
    use ::image::{DynamicImage, ImageFormat};
    use std::io::Cursor;

    struct Upper;

    impl InferenceBackend for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn generate(
            &mut self,
            image: &DynamicImage,
            _prompt: &str,
            _max_tokens: u32,
        ) -> Result<BackendOutput> {
            Ok(BackendOutput {
                decoded: format!("WIDTH {}", image.width()),
                prompt_tokens: 0,
                sequence_tokens: 2,
                generation_time: None,
            })
        }
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::new_rgb8(width, height)
            .write_to(&mut buffer, ImageFormat::Png)
            .unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_builder_options() {
        let docvl = DocVl::new()
            .with_dpi(300)
            .with_max_edge(800)
            .with_max_tokens(64)
            .with_pages(1, Some(2))
            .with_deadline(Duration::from_secs(5));

        let options = docvl.options();
        assert_eq!(options.dpi, 300);
        assert_eq!(options.max_edge, 800);
        assert_eq!(options.max_tokens, 64);
        assert_eq!(options.start_page, 1);
        assert_eq!(options.num_pages, Some(2));
    }

    #[test]
    fn test_process_image_bytes() {
        let mut gateway = InferenceGateway::open_with(Box::new(Upper)).unwrap();
        let report = DocVl::new()
            .with_ground_truth(GroundTruth::from_text("WIDTH 1200\n"))
            .process_bytes(&png(2000, 1000), "photo.png", &mut gateway)
            .unwrap();

        assert_eq!(report.source, "photo.png");
        assert_eq!(report.pages.len(), 1);
        assert_eq!(report.pages[0].text(), Some("WIDTH 1200"));
        assert_eq!(report.pages[0].quality().unwrap().accuracy, 1.0);
        assert_eq!(report.full_text(), "=== Page 1 ===\nWIDTH 1200\n");
    }

    #[test]
    fn test_process_unknown_bytes() {
        let mut gateway = InferenceGateway::open_with(Box::new(Upper)).unwrap();
        let result = DocVl::new().process_bytes(b"plain text", "notes.txt", &mut gateway);
        assert!(matches!(result, Err(Error::UnknownFormat)));
    }
}
