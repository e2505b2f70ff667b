//! Intent Classifier
//!
//! Anthropic Messages API client. The static instructions go out as a cached
//! system block, the per-message context as a second system block, and the
//! user's message as text or a text+image pair.

use anyhow::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::receipts::Attachment;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Image types the Messages API accepts
const SUPPORTED_IMAGE_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/gif", "image/webp"];

/// One classification call
#[derive(Debug, Clone, Copy)]
pub struct ClassifierRequest<'a> {
    pub instructions: &'a str,
    pub context: &'a str,
    pub message: &'a str,
    pub image: Option<&'a Attachment>,
}

/// Turns a message plus context into free text embedding an action object
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, request: ClassifierRequest<'_>) -> Result<String>;
}

/// System message block with optional cache control
#[derive(Debug, Serialize)]
struct SystemBlock {
    r#type: &'static str,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

#[derive(Debug, Serialize)]
struct CacheControl {
    r#type: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    Image { source: ImageSource },
}

#[derive(Debug, Serialize)]
struct ImageSource {
    r#type: &'static str,
    media_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: Vec<ContentPart>,
}

/// API request
#[derive(Debug, Serialize)]
struct MessageRequest {
    model: String,
    max_tokens: usize,
    system: Vec<SystemBlock>,
    messages: Vec<Message>,
}

/// API response
#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    r#type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: usize,
    output_tokens: usize,
    #[serde(default)]
    cache_read_input_tokens: usize,
}

/// Anthropic API client
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: Option<String>,
    model: String,
    max_tokens: usize,
}

impl LlmClient {
    pub fn new(api_key: Option<&str>, model: &str, max_tokens: usize, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_key: api_key.map(|s| s.to_string()),
            model: model.to_string(),
            max_tokens,
        }
    }

    /// Create from config
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.anthropic_api_key.as_deref(),
            &config.model,
            config.llm_max_tokens,
            Duration::from_secs(config.llm_timeout_secs),
        )
    }

    /// Check if API key is configured
    pub fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    fn build_request(&self, request: &ClassifierRequest<'_>) -> MessageRequest {
        let mut system = vec![SystemBlock {
            r#type: "text",
            text: request.instructions.to_string(),
            cache_control: Some(CacheControl { r#type: "ephemeral" }),
        }];
        if !request.context.trim().is_empty() {
            system.push(SystemBlock {
                r#type: "text",
                text: request.context.to_string(),
                cache_control: None,
            });
        }

        let mut content = Vec::new();
        let mut text = request.message.to_string();
        match request.image {
            Some(image) if SUPPORTED_IMAGE_TYPES.contains(&image.content_type.as_str()) => {
                content.push(ContentPart::Image {
                    source: ImageSource {
                        r#type: "base64",
                        media_type: image.content_type.clone(),
                        data: STANDARD.encode(&image.bytes),
                    },
                });
            }
            Some(image) => {
                warn!(
                    "Not forwarding attachment of type {} to the classifier",
                    image.content_type
                );
                text = format!("{}\n[attached file: {}]", text, image.filename);
            }
            None => {}
        }
        if text.trim().is_empty() {
            text = "(no text, see the attached image)".to_string();
        }
        content.push(ContentPart::Text { text });

        MessageRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system,
            messages: vec![Message {
                role: "user",
                content,
            }],
        }
    }
}

#[async_trait]
impl IntentClassifier for LlmClient {
    async fn classify(&self, request: ClassifierRequest<'_>) -> Result<String> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("ANTHROPIC_API_KEY not set - classifier unavailable"))?;

        let body = self.build_request(&request);
        debug!(
            "Calling classifier: model={}, message_len={}, image={}",
            self.model,
            request.message.len(),
            request.image.is_some()
        );

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await?;
            anyhow::bail!("Classifier API error {}: {}", status, text);
        }

        let result: MessageResponse = response.json().await?;
        info!(
            "Classifier response: model={}, in={}, out={}, cache_read={}",
            self.model,
            result.usage.input_tokens,
            result.usage.output_tokens,
            result.usage.cache_read_input_tokens
        );

        Ok(result
            .content
            .into_iter()
            .filter_map(|b| if b.r#type == "text" { b.text } else { None })
            .collect::<Vec<_>>()
            .join("\n"))
    }
}
