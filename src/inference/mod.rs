//! Inference gateway in front of a vision-language model backend.
//!
//! Backends differ in how they are reached and in what they return. Each one
//! implements [`InferenceBackend`] and reports a raw [`BackendOutput`]; the
//! [`InferenceGateway`] turns that into the one stable [`InferenceResult`] the
//! pipeline consumes.
//!
//! # Example
//!
//! ```no_run
//! use docvl::inference::{
//!     ChatCompletionsBackend, ChatCompletionsConfig, InferenceGateway, PROMPT_MARKER,
//! };
//!
//! fn main() -> docvl::Result<()> {
//!     let backend = ChatCompletionsBackend::new(ChatCompletionsConfig::default());
//!     let mut gateway = InferenceGateway::new(Box::new(backend));
//!     gateway.open()?;
//!
//!     let image = image::open("page.png").map_err(docvl::Error::from)?;
//!     let result = gateway.infer(&image, PROMPT_MARKER, 512)?;
//!     println!("{} ({} tokens)", result.extracted_text, result.token_count);
//!
//!     gateway.close();
//!     Ok(())
//! }
//! ```

mod chat;
mod service;

pub use chat::{ChatCompletionsBackend, ChatCompletionsConfig};
pub use service::{
    ExtractResponse, HealthResponse, ImageSizeReport, ServiceBackend, ServiceClient,
    ServiceConfig, ServiceInfo, StatusResponse,
};

use std::io::Cursor;
use std::time::{Duration, Instant};

use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Placeholder token the model's processor expands into image patches.
///
/// Sent as the whole prompt; the model answers with the page transcription.
pub const PROMPT_MARKER: &str = "<|IMAGE_PLACEHOLDER|>";

/// Generation budget used when the caller does not pick one.
pub const DEFAULT_MAX_TOKENS: u32 = 512;

/// Raw answer of a backend, before the gateway cleans it up.
#[derive(Debug, Clone, Default)]
pub struct BackendOutput {
    /// Decoded output sequence (may still contain the prompt)
    pub decoded: String,

    /// Number of tokens in the prompt
    pub prompt_tokens: u32,

    /// Number of tokens in the full output sequence, prompt included
    pub sequence_tokens: u32,

    /// Generation time measured by the backend itself, if it reports one
    pub generation_time: Option<Duration>,
}

/// Description of a backend for health and status reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendInfo {
    /// Backend name
    pub name: String,
    /// Device the model runs on, if known
    pub device: Option<String>,
    /// Model identifier, if known
    pub model: Option<String>,
}

impl BackendInfo {
    /// Create info with only a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device: None,
            model: None,
        }
    }
}

/// A vision-language model that transcribes one image per call.
///
/// Calls are blocking and may take seconds. Implementations hold the only
/// handle to their accelerator context; the gateway never calls them
/// concurrently.
pub trait InferenceBackend: Send {
    /// Short backend name.
    fn name(&self) -> &str;

    /// Prepare the backend (load weights, connect, check reachability).
    fn load(&mut self) -> Result<()> {
        Ok(())
    }

    /// Run one generation over `image` with `prompt`.
    fn generate(
        &mut self,
        image: &DynamicImage,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<BackendOutput>;

    /// Give cached accelerator memory back to the device.
    fn release_memory(&mut self) {}

    /// Describe the backend.
    fn describe(&self) -> BackendInfo {
        BackendInfo::new(self.name())
    }

    /// Release everything acquired in [`load`](Self::load).
    fn unload(&mut self) {}
}

/// Transcription of one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    /// Extracted text, prompt marker removed and whitespace trimmed
    pub extracted_text: String,
    /// Generated tokens (output length minus prompt length)
    pub token_count: u32,
    /// Generation time in seconds
    pub latency_seconds: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GatewayState {
    Closed,
    Ready,
}

/// Owns a backend and exposes it through an explicit open/close lifecycle.
pub struct InferenceGateway {
    backend: Box<dyn InferenceBackend>,
    state: GatewayState,
}

impl InferenceGateway {
    /// Wrap a backend. The gateway starts closed.
    pub fn new(backend: Box<dyn InferenceBackend>) -> Self {
        Self {
            backend,
            state: GatewayState::Closed,
        }
    }

    /// Wrap and open a backend in one step.
    pub fn open_with(backend: Box<dyn InferenceBackend>) -> Result<Self> {
        let mut gateway = Self::new(backend);
        gateway.open()?;
        Ok(gateway)
    }

    /// Load the backend. Opening an open gateway is a no-op.
    pub fn open(&mut self) -> Result<()> {
        if self.state == GatewayState::Ready {
            return Ok(());
        }

        let start = Instant::now();
        self.backend.load()?;
        self.state = GatewayState::Ready;
        log::info!(
            "Backend '{}' ready in {:.2}s",
            self.backend.name(),
            start.elapsed().as_secs_f64()
        );
        Ok(())
    }

    /// Unload the backend. Closing a closed gateway is a no-op.
    pub fn close(&mut self) {
        if self.state == GatewayState::Ready {
            self.backend.unload();
            self.state = GatewayState::Closed;
            log::info!("Backend '{}' closed", self.backend.name());
        }
    }

    /// Whether [`infer`](Self::infer) can be called.
    pub fn is_ready(&self) -> bool {
        self.state == GatewayState::Ready
    }

    /// Describe the wrapped backend.
    pub fn backend_info(&self) -> BackendInfo {
        self.backend.describe()
    }

    /// Transcribe `image`.
    ///
    /// Never retries: a failed call is reported once, as a typed error.
    pub fn infer(
        &mut self,
        image: &DynamicImage,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<InferenceResult> {
        if max_tokens == 0 {
            return Err(Error::InvalidConfig("max_tokens must be positive".into()));
        }
        if !self.is_ready() {
            return Err(Error::BackendUnavailable(format!(
                "backend '{}' is not loaded",
                self.backend.name()
            )));
        }

        let start = Instant::now();
        let output = self.backend.generate(image, prompt, max_tokens)?;
        let elapsed = start.elapsed();

        let token_count = match output.sequence_tokens.checked_sub(output.prompt_tokens) {
            Some(generated) => generated,
            None => {
                log::warn!(
                    "Backend '{}' returned {} tokens for a {}-token prompt",
                    self.backend.name(),
                    output.sequence_tokens,
                    output.prompt_tokens
                );
                0
            }
        };

        Ok(InferenceResult {
            extracted_text: strip_prompt(&output.decoded, prompt),
            token_count,
            latency_seconds: output.generation_time.unwrap_or(elapsed).as_secs_f64(),
        })
    }

    /// Ask the backend to release cached accelerator memory.
    pub fn release_memory(&mut self) {
        if self.is_ready() {
            log::debug!("Releasing accelerator memory");
            self.backend.release_memory();
        }
    }
}

impl Drop for InferenceGateway {
    fn drop(&mut self) {
        self.close();
    }
}

/// Remove every occurrence of the prompt from decoded output and trim it.
pub fn strip_prompt(decoded: &str, prompt: &str) -> String {
    if prompt.is_empty() {
        return decoded.trim().to_string();
    }
    decoded.replace(prompt, "").trim().to_string()
}

/// Encode an image as PNG for transport.
pub(crate) fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| Error::Inference(format!("failed to encode image: {}", e)))?;
    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct EchoBackend {
        decoded: String,
        prompt_tokens: u32,
        sequence_tokens: u32,
        reported: Option<Duration>,
        unloads: Arc<AtomicUsize>,
    }

    impl EchoBackend {
        fn new(decoded: &str, prompt_tokens: u32, sequence_tokens: u32) -> Self {
            Self {
                decoded: decoded.to_string(),
                prompt_tokens,
                sequence_tokens,
                reported: None,
                unloads: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl InferenceBackend for EchoBackend {
        fn name(&self) -> &str {
            "echo"
        }

        fn generate(
            &mut self,
            _image: &DynamicImage,
            _prompt: &str,
            _max_tokens: u32,
        ) -> Result<BackendOutput> {
            Ok(BackendOutput {
                decoded: self.decoded.clone(),
                prompt_tokens: self.prompt_tokens,
                sequence_tokens: self.sequence_tokens,
                generation_time: self.reported,
            })
        }

        fn unload(&mut self) {
            self.unloads.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn page() -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(4, 4, Luma([0])))
    }

    #[test]
    fn test_strip_prompt() {
        assert_eq!(
            strip_prompt("<|IMAGE_PLACEHOLDER|>\n  Invoice 42 \n", PROMPT_MARKER),
            "Invoice 42"
        );
        assert_eq!(strip_prompt("  plain  ", ""), "plain");
    }

    #[test]
    fn test_infer_requires_open() {
        let mut gateway = InferenceGateway::new(Box::new(EchoBackend::new("x", 1, 2)));
        assert!(!gateway.is_ready());
        let err = gateway.infer(&page(), PROMPT_MARKER, 16).unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable(_)));
    }

    #[test]
    fn test_infer_cleans_output_and_counts_tokens() {
        let backend = EchoBackend::new("<|IMAGE_PLACEHOLDER|> Total: 10 ", 300, 342);
        let mut gateway = InferenceGateway::open_with(Box::new(backend)).unwrap();

        let result = gateway.infer(&page(), PROMPT_MARKER, 512).unwrap();
        assert_eq!(result.extracted_text, "Total: 10");
        assert_eq!(result.token_count, 42);
        assert!(result.latency_seconds >= 0.0);
    }

    #[test]
    fn test_short_sequence_clamps_tokens() {
        let backend = EchoBackend::new("text", 300, 12);
        let mut gateway = InferenceGateway::open_with(Box::new(backend)).unwrap();
        assert_eq!(gateway.infer(&page(), PROMPT_MARKER, 8).unwrap().token_count, 0);
    }

    #[test]
    fn test_reported_generation_time_wins() {
        let mut backend = EchoBackend::new("text", 0, 1);
        backend.reported = Some(Duration::from_millis(2500));
        let mut gateway = InferenceGateway::open_with(Box::new(backend)).unwrap();
        let result = gateway.infer(&page(), PROMPT_MARKER, 8).unwrap();
        assert_eq!(result.latency_seconds, 2.5);
    }

    #[test]
    fn test_zero_max_tokens_rejected() {
        let mut gateway =
            InferenceGateway::open_with(Box::new(EchoBackend::new("x", 0, 1))).unwrap();
        assert!(matches!(
            gateway.infer(&page(), PROMPT_MARKER, 0),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_close_unloads_once() {
        let backend = EchoBackend::new("x", 0, 1);
        let unloads = backend.unloads.clone();
        let mut gateway = InferenceGateway::open_with(Box::new(backend)).unwrap();

        gateway.close();
        gateway.close();
        assert!(!gateway.is_ready());
        drop(gateway);
        assert_eq!(unloads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_encode_png_signature() {
        let png = encode_png(&page()).unwrap();
        assert!(png.starts_with(b"\x89PNG"));
    }
}
