//! Single-image extraction.

use image::DynamicImage;
use serde::Serialize;

use crate::error::Result;
use crate::inference::{InferenceGateway, InferenceResult, PROMPT_MARKER};
use crate::normalize::{normalize, ImageSize};

use super::options::ExtractOptions;

/// Transcription of one standalone image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageExtraction {
    /// Text, token count and latency
    #[serde(flatten)]
    pub result: InferenceResult,
    /// Size of the input image
    pub original: ImageSize,
    /// Size sent to the model
    pub processed: ImageSize,
}

/// Normalize `image` and transcribe it.
///
/// Unlike a batch run, a failure here is returned to the caller.
pub fn extract_image(
    gateway: &mut InferenceGateway,
    image: DynamicImage,
    options: &ExtractOptions,
) -> Result<ImageExtraction> {
    options.validate()?;

    let normalized = normalize(image, options.max_edge);
    let result = gateway.infer(&normalized.image, PROMPT_MARKER, options.max_tokens)?;

    Ok(ImageExtraction {
        result,
        original: normalized.original,
        processed: normalized.processed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::inference::{BackendOutput, InferenceBackend};

    struct SizeReporter;

    impl InferenceBackend for SizeReporter {
        fn name(&self) -> &str {
            "size"
        }

        fn generate(
            &mut self,
            image: &DynamicImage,
            prompt: &str,
            _max_tokens: u32,
        ) -> Result<BackendOutput> {
            Ok(BackendOutput {
                decoded: format!("{} {}x{}", prompt, image.width(), image.height()),
                prompt_tokens: 4,
                sequence_tokens: 9,
                generation_time: None,
            })
        }
    }

    #[test]
    fn test_extract_resizes_before_inference() {
        let mut gateway = InferenceGateway::open_with(Box::new(SizeReporter)).unwrap();
        let image = DynamicImage::new_rgb8(2400, 1200);

        let extraction = extract_image(&mut gateway, image, &ExtractOptions::default()).unwrap();
        assert_eq!(extraction.result.extracted_text, "1200x600");
        assert_eq!(extraction.result.token_count, 5);
        assert_eq!(extraction.original, ImageSize::new(2400, 1200));
        assert_eq!(extraction.processed, ImageSize::new(1200, 600));
    }

    #[test]
    fn test_extract_rejects_zero_tokens() {
        let mut gateway = InferenceGateway::open_with(Box::new(SizeReporter)).unwrap();
        let image = DynamicImage::new_rgb8(10, 10);

        let result = extract_image(
            &mut gateway,
            image,
            &ExtractOptions::new().with_max_tokens(0),
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_extract_surfaces_backend_errors() {
        let mut gateway = InferenceGateway::new(Box::new(SizeReporter));
        let image = DynamicImage::new_rgb8(10, 10);

        let result = extract_image(&mut gateway, image, &ExtractOptions::default());
        assert!(matches!(result, Err(Error::BackendUnavailable(_))));
    }
}
