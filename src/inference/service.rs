//! Client side of the docvl HTTP service.
//!
//! [`ServiceBackend`] lets a local pipeline (for example `docvl process` on a
//! laptop) run inference on a remote `docvl serve` instance next to the GPU.
//! The response types are shared with the server so both ends agree on the
//! wire format.

use std::time::Duration;

use image::DynamicImage;
use reqwest::blocking::{multipart, Client};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{encode_png, BackendInfo, BackendOutput, InferenceBackend};
use crate::error::{Error, Result};
use crate::normalize::ImageSize;

/// Body of `GET /`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Service name
    pub service: String,
    /// Service version
    pub version: String,
    /// Backend name
    pub backend: String,
    /// `ready` or `loading`
    pub status: String,
}

/// Body of a successful `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `healthy` on success
    pub status: String,
    /// Backend name
    pub backend: String,
}

/// Body of `GET /status`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Whether the backend is loaded
    pub model_loaded: bool,
    /// Backend name
    pub backend: String,
    /// Device the model runs on
    pub device: Option<String>,
    /// Model identifier
    pub model: Option<String>,
}

/// Original and processed image dimensions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ImageSizeReport {
    /// Size of the uploaded image
    pub original: ImageSize,
    /// Size sent to the model
    pub processed: ImageSize,
}

/// Body of a successful `POST /ocr/extract`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractResponse {
    /// Transcribed text
    pub extracted_text: String,
    /// Generation time in seconds
    pub processing_time: f64,
    /// Image dimensions before and after normalization
    pub image_size: ImageSizeReport,
    /// Generated tokens
    pub tokens_generated: u32,
    /// Backend name
    pub backend: String,
}

/// Error body returned with 5xx responses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: String,
}

/// Remote service settings.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Service base URL, e.g. `https://ocr.example.com`
    pub url: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl ServiceConfig {
    /// Create a configuration with the default timeout.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.url.trim_end_matches('/'), path)
    }
}

/// Client for a remote docvl service.
pub struct ServiceClient {
    config: ServiceConfig,
    client: Client,
}

impl ServiceClient {
    /// Create a client.
    pub fn new(config: ServiceConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    /// Base URL of the service.
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// `GET /health`. Any non-200 answer is [`Error::BackendUnavailable`].
    pub fn health(&self) -> Result<HealthResponse> {
        let response = self
            .client
            .get(self.config.url("/health"))
            .send()
            .map_err(|e| Error::BackendUnavailable(format!("cannot reach service: {}", e)))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(Error::BackendUnavailable(format!(
                "service unhealthy: {}",
                status
            )));
        }
        Ok(response.json()?)
    }

    /// `GET /status`.
    pub fn status(&self) -> Result<StatusResponse> {
        let response = self.client.get(self.config.url("/status")).send()?;
        if !response.status().is_success() {
            return Err(Error::Inference(format!(
                "status request failed: {}",
                response.status()
            )));
        }
        Ok(response.json()?)
    }

    /// `POST /ocr/extract` with an encoded image.
    pub fn extract(
        &self,
        png: Vec<u8>,
        max_tokens: u32,
        resize_max: u32,
    ) -> Result<ExtractResponse> {
        let part = multipart::Part::bytes(png)
            .file_name("page.png")
            .mime_str("image/png")?;
        let form = multipart::Form::new()
            .part("file", part)
            .text("max_tokens", max_tokens.to_string())
            .text("resize_max", resize_max.to_string());

        let response = self
            .client
            .post(self.config.url("/ocr/extract"))
            .multipart(form)
            .send()?;

        let status = response.status();
        if status == StatusCode::OK {
            let body = response.text()?;
            return serde_json::from_str(&body)
                .map_err(|e| Error::MalformedResponse(format!("invalid extract response: {}", e)));
        }

        let detail = response
            .json::<ErrorBody>()
            .map(|body| body.detail)
            .unwrap_or_else(|_| status.to_string());
        if status == StatusCode::SERVICE_UNAVAILABLE {
            Err(Error::BackendUnavailable(detail))
        } else {
            Err(Error::Inference(format!("OCR failed: {} - {}", status, detail)))
        }
    }
}

/// Runs inference on a remote `docvl serve` instance.
pub struct ServiceBackend {
    config: ServiceConfig,
    client: Option<ServiceClient>,
    remote: StatusResponse,
}

impl ServiceBackend {
    /// Create a backend. The service is contacted on [`InferenceBackend::load`].
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            client: None,
            remote: StatusResponse::default(),
        }
    }
}

impl InferenceBackend for ServiceBackend {
    fn name(&self) -> &str {
        "service"
    }

    fn load(&mut self) -> Result<()> {
        let client = ServiceClient::new(self.config.clone())?;
        let health = client.health()?;
        log::info!("Service {} is {}", client.url(), health.status);

        // Status is informational; an old server without /status is still usable.
        match client.status() {
            Ok(status) => self.remote = status,
            Err(e) => log::warn!("Could not read service status: {}", e),
        }

        self.client = Some(client);
        Ok(())
    }

    fn generate(
        &mut self,
        image: &DynamicImage,
        _prompt: &str,
        max_tokens: u32,
    ) -> Result<BackendOutput> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| Error::BackendUnavailable("service backend is not loaded".into()))?;

        // The page is already normalized; ask the service not to shrink it again.
        let longest = image.width().max(image.height());
        let response = client.extract(encode_png(image)?, max_tokens, longest)?;

        Ok(BackendOutput {
            decoded: response.extracted_text,
            prompt_tokens: 0,
            sequence_tokens: response.tokens_generated,
            generation_time: Some(Duration::from_secs_f64(response.processing_time.max(0.0))),
        })
    }

    fn describe(&self) -> BackendInfo {
        let name = if self.remote.backend.is_empty() {
            self.name().to_string()
        } else {
            format!("service ({})", self.remote.backend)
        };
        BackendInfo {
            name,
            device: self.remote.device.clone(),
            model: self.remote.model.clone(),
        }
    }

    fn unload(&mut self) {
        self.client = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_url_join() {
        let config = ServiceConfig::new("https://ocr.example.com/");
        assert_eq!(config.url("/health"), "https://ocr.example.com/health");
    }

    #[test]
    fn test_extract_response_wire_format() {
        let body = r#"{
            "extracted_text": "Chapter 1",
            "processing_time": 1.25,
            "image_size": {
                "original": {"width": 2550, "height": 3300},
                "processed": {"width": 927, "height": 1200}
            },
            "tokens_generated": 18,
            "backend": "chat-completions"
        }"#;
        let parsed: ExtractResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.extracted_text, "Chapter 1");
        assert_eq!(parsed.image_size.processed.height, 1200);
        assert_eq!(parsed.tokens_generated, 18);
    }

    #[test]
    fn test_status_defaults() {
        let body = r#"{"model_loaded": false, "backend": "x", "device": null, "model": null}"#;
        let parsed: StatusResponse = serde_json::from_str(body).unwrap();
        assert!(!parsed.model_loaded);
        assert!(parsed.device.is_none());
    }

    #[test]
    fn test_backend_not_loaded() {
        let mut backend = ServiceBackend::new(ServiceConfig::new("http://localhost:1"));
        let image = DynamicImage::new_luma8(2, 2);
        assert!(matches!(
            backend.generate(&image, "", 8),
            Err(Error::BackendUnavailable(_))
        ));
        assert_eq!(backend.describe().name, "service");
    }
}
