// src/ai.rs
//! Vision (OCR) and text-generation service adapters.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;

use crate::utils::config::Config;
use crate::utils::error::ExtractError;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
// Inline request payloads are capped by the provider.
const MAX_INLINE_BYTES: usize = 20 * 1024 * 1024;

const OCR_PROMPT: &str = "Extract all text from this document verbatim, page by page. \
Preserve table rows on single lines with cells separated by ' | '. Do not summarize.";

/// Reads text out of an image-based document.
#[async_trait]
pub trait OcrService: Send + Sync {
    async fn recognize(&self, url: &str, bytes: &[u8]) -> Result<String, ExtractError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 8_192,
        }
    }
}

/// Prompt in, text out.
#[async_trait]
pub trait LlmService: Send + Sync {
    async fn complete(&self, prompt: &str, options: GenerationOptions) -> Result<String, ExtractError>;
}

/// Stand-in used when no provider key is configured; every call fails.
pub struct Unconfigured;

#[async_trait]
impl OcrService for Unconfigured {
    async fn recognize(&self, _url: &str, _bytes: &[u8]) -> Result<String, ExtractError> {
        Err(ExtractError::NotConfigured("GEMINI_API_KEY"))
    }
}

#[async_trait]
impl LlmService for Unconfigured {
    async fn complete(&self, _prompt: &str, _options: GenerationOptions) -> Result<String, ExtractError> {
        Err(ExtractError::NotConfigured("GEMINI_API_KEY"))
    }
}

/// Gemini `generateContent` client serving both OCR and text completion.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    ocr_timeout: Duration,
    text_timeout: Duration,
}

impl GeminiClient {
    pub fn new(api_key: &str, model: &str, ocr_timeout: Duration, text_timeout: Duration) -> Result<Self, ExtractError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ExtractError::Llm(e.to_string()))?;
        Ok(Self {
            http,
            api_key: api_key.to_string(),
            model: model.to_string(),
            ocr_timeout,
            text_timeout,
        })
    }

    pub fn from_config(config: &Config) -> Option<Result<Self, ExtractError>> {
        config
            .gemini_api_key
            .as_deref()
            .map(|key| Self::new(key, &config.gemini_model, config.ocr_timeout, config.page_timeout))
    }

    async fn generate(&self, body: serde_json::Value, timeout: Duration) -> Result<String, String> {
        let url = format!("{}/{}:generateContent", GEMINI_BASE_URL, self.model);
        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(format!("HTTP {}: {}", status, detail.chars().take(200).collect::<String>()));
        }

        let parsed: GenerateResponse = response.json().await.map_err(|e| e.to_string())?;
        response_text(parsed)
    }
}

#[async_trait]
impl OcrService for GeminiClient {
    async fn recognize(&self, url: &str, bytes: &[u8]) -> Result<String, ExtractError> {
        if bytes.is_empty() || bytes.len() > MAX_INLINE_BYTES {
            return Err(ExtractError::Ocr(format!(
                "document from {} is {} bytes, outside the inline range",
                url,
                bytes.len()
            )));
        }
        let data = base64::engine::general_purpose::STANDARD.encode(bytes);
        let body = json!({
            "contents": [{
                "parts": [
                    { "inline_data": { "mime_type": "application/pdf", "data": data } },
                    { "text": OCR_PROMPT }
                ]
            }],
            "generationConfig": { "temperature": 0.0 }
        });
        tracing::debug!("Sending {} bytes from {} to OCR", bytes.len(), url);
        self.generate(body, self.ocr_timeout).await.map_err(ExtractError::Ocr)
    }
}

#[async_trait]
impl LlmService for GeminiClient {
    async fn complete(&self, prompt: &str, options: GenerationOptions) -> Result<String, ExtractError> {
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": options.temperature,
                "maxOutputTokens": options.max_tokens
            }
        });
        self.generate(body, self.text_timeout).await.map_err(ExtractError::Llm)
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
}

#[derive(Debug, Deserialize)]
struct ResponseCandidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

// The single mapping from the provider's response shape to plain text.
fn response_text(response: GenerateResponse) -> Result<String, String> {
    let text = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        Err("response contained no text".to_string())
    } else {
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_text_parts_of_first_candidate() {
        let raw = json!({
            "candidates": [
                { "content": { "parts": [{ "text": "Revenue " }, { "text": "grew." }] } },
                { "content": { "parts": [{ "text": "ignored" }] } }
            ]
        });
        let parsed: GenerateResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(response_text(parsed).unwrap(), "Revenue grew.");
    }

    #[test]
    fn blocked_or_empty_response_is_an_error() {
        let parsed: GenerateResponse = serde_json::from_value(json!({ "promptFeedback": {} })).unwrap();
        assert!(response_text(parsed).is_err());

        let parsed: GenerateResponse =
            serde_json::from_value(json!({ "candidates": [{ "finishReason": "SAFETY" }] })).unwrap();
        assert!(response_text(parsed).is_err());
    }

    #[tokio::test]
    async fn unconfigured_services_fail_cleanly() {
        let err = LlmService::complete(&Unconfigured, "hi", GenerationOptions::default()).await.unwrap_err();
        assert!(matches!(err, ExtractError::NotConfigured(_)));
        assert!(OcrService::recognize(&Unconfigured, "u", b"x").await.is_err());
    }

    #[tokio::test]
    async fn oversized_documents_are_not_sent() {
        let client = GeminiClient::new("key", "model", Duration::from_secs(1), Duration::from_secs(1)).unwrap();
        let err = client.recognize("https://x/ar.pdf", &[]).await.unwrap_err();
        assert!(matches!(err, ExtractError::Ocr(_)));
    }
}
