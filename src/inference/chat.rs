//! Backend for OpenAI-compatible chat completion servers (vLLM, SGLang, ...).

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use image::DynamicImage;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{encode_png, BackendInfo, BackendOutput, InferenceBackend};
use crate::error::{Error, Result};

/// Connection settings for a chat completions endpoint.
#[derive(Debug, Clone)]
pub struct ChatCompletionsConfig {
    /// Base URL including the API version, e.g. `http://localhost:8000/v1`
    pub base_url: String,

    /// Model name as served by the endpoint
    pub model: String,

    /// Bearer token, if the endpoint requires one
    pub api_key: Option<String>,

    /// Per-request timeout
    pub timeout: Duration,
}

impl ChatCompletionsConfig {
    /// Create a configuration for `base_url` with default model and timeout.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Set the model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

impl Default for ChatCompletionsConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/v1".to_string(),
            model: "PaddlePaddle/PaddleOCR-VL".to_string(),
            api_key: None,
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: Vec<Content>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Content {
    ImageUrl { image_url: ImageUrl },
    Text { text: String },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: Option<u32>,
}

/// Sends each page as a base64 PNG data URL to `/chat/completions`.
///
/// Decoding is greedy (`temperature = 0`), the equivalent of single-beam
/// generation without sampling.
pub struct ChatCompletionsBackend {
    config: ChatCompletionsConfig,
    client: Option<Client>,
}

impl ChatCompletionsBackend {
    /// Create a backend. Nothing is contacted until [`InferenceBackend::load`].
    pub fn new(config: ChatCompletionsConfig) -> Self {
        Self {
            config,
            client: None,
        }
    }

    fn client(&self) -> Result<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| Error::BackendUnavailable("chat backend is not loaded".into()))
    }

    fn authorize(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

impl InferenceBackend for ChatCompletionsBackend {
    fn name(&self) -> &str {
        "chat-completions"
    }

    fn load(&mut self) -> Result<()> {
        let client = Client::builder().timeout(self.config.timeout).build()?;

        let response = self
            .authorize(client.get(self.config.url("models")))
            .send()
            .map_err(|e| Error::BackendUnavailable(format!("{}: {}", self.config.base_url, e)))?;
        if !response.status().is_success() {
            return Err(Error::BackendUnavailable(format!(
                "{} answered {}",
                self.config.url("models"),
                response.status()
            )));
        }

        log::info!(
            "Connected to {} (model {})",
            self.config.base_url,
            self.config.model
        );
        self.client = Some(client);
        Ok(())
    }

    fn generate(
        &mut self,
        image: &DynamicImage,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<BackendOutput> {
        let png = encode_png(image)?;
        let data_url = format!("data:image/png;base64,{}", BASE64_STANDARD.encode(&png));

        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![Message {
                role: "user",
                content: vec![
                    Content::ImageUrl {
                        image_url: ImageUrl { url: data_url },
                    },
                    Content::Text {
                        text: prompt.to_string(),
                    },
                ],
            }],
            max_tokens,
            temperature: 0.0,
        };

        let client = self.client()?;
        let response = self
            .authorize(client.post(self.config.url("chat/completions")))
            .json(&request)
            .send()?;

        let status = response.status();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            return Err(Error::BackendUnavailable(response.text().unwrap_or_default()));
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(Error::Inference(format!("{}: {}", status, body)));
        }

        let body = response.text()?;
        parse_chat_response(&body)
    }

    fn describe(&self) -> BackendInfo {
        BackendInfo {
            name: self.name().to_string(),
            device: None,
            model: Some(self.config.model.clone()),
        }
    }

    fn unload(&mut self) {
        self.client = None;
    }
}

fn parse_chat_response(body: &str) -> Result<BackendOutput> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| Error::MalformedResponse(format!("invalid chat response: {}", e)))?;

    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::MalformedResponse("chat response has no choices".into()))?;

    // Chat servers report prompt and completion separately; the full sequence
    // is their sum unless a total is given.
    let (prompt_tokens, sequence_tokens) = match parsed.usage {
        Some(usage) => (
            usage.prompt_tokens,
            usage
                .total_tokens
                .unwrap_or(usage.prompt_tokens + usage.completion_tokens),
        ),
        None => (0, 0),
    };

    Ok(BackendOutput {
        decoded: choice.message.content.unwrap_or_default(),
        prompt_tokens,
        sequence_tokens,
        generation_time: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ChatCompletionsConfig::new("http://gpu-box:8000/v1/")
            .with_model("ocr-vl")
            .with_api_key("token")
            .with_timeout(Duration::from_secs(30));

        assert_eq!(
            config.url("chat/completions"),
            "http://gpu-box:8000/v1/chat/completions"
        );
        assert_eq!(config.model, "ocr-vl");
        assert_eq!(config.api_key.as_deref(), Some("token"));
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_request_shape() {
        let request = ChatRequest {
            model: "m",
            messages: vec![Message {
                role: "user",
                content: vec![
                    Content::ImageUrl {
                        image_url: ImageUrl {
                            url: "data:image/png;base64,AAAA".into(),
                        },
                    },
                    Content::Text {
                        text: "<|IMAGE_PLACEHOLDER|>".into(),
                    },
                ],
            }],
            max_tokens: 512,
            temperature: 0.0,
        };

        let json = serde_json::to_value(&request).unwrap();
        let content = &json["messages"][0]["content"];
        assert_eq!(content[0]["type"], "image_url");
        assert_eq!(content[0]["image_url"]["url"], "data:image/png;base64,AAAA");
        assert_eq!(content[1]["type"], "text");
        assert_eq!(json["max_tokens"], 512);
    }

    #[test]
    fn test_parse_response_with_usage() {
        let body = r#"{
            "choices": [{"message": {"role": "assistant", "content": "  Hello page  "}}],
            "usage": {"prompt_tokens": 812, "completion_tokens": 37, "total_tokens": 849}
        }"#;
        let output = parse_chat_response(body).unwrap();
        assert_eq!(output.decoded, "  Hello page  ");
        assert_eq!(output.sequence_tokens - output.prompt_tokens, 37);
    }

    #[test]
    fn test_parse_response_without_total() {
        let body = r#"{"choices": [{"message": {"content": "x"}}],
                       "usage": {"prompt_tokens": 10, "completion_tokens": 5}}"#;
        let output = parse_chat_response(body).unwrap();
        assert_eq!(output.sequence_tokens, 15);
    }

    #[test]
    fn test_parse_response_no_choices() {
        let result = parse_chat_response(r#"{"choices": []}"#);
        assert!(matches!(result, Err(Error::MalformedResponse(_))));
    }

    #[test]
    fn test_parse_response_garbage() {
        let result = parse_chat_response("<html>bad gateway</html>");
        assert!(matches!(result, Err(Error::MalformedResponse(_))));
    }

    #[test]
    fn test_generate_before_load() {
        let mut backend = ChatCompletionsBackend::new(ChatCompletionsConfig::default());
        let image = DynamicImage::new_luma8(2, 2);
        let result = backend.generate(&image, "p", 8);
        assert!(matches!(result, Err(Error::BackendUnavailable(_))));
    }
}
