//! Chat-completions translation client (OpenAI-compatible; Groq by default).
//! Connection pooling via reqwest. One request per call, temperature 0,
//! no retries: failures surface to the caller as `UpstreamError`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Translator, UpstreamError};
use crate::config::TranslatorConfig;

/// Longest slice of an upstream error body kept in the error message.
const ERROR_BODY_CHARS: usize = 200;

pub struct ChatTranslator {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl ChatTranslator {
    pub fn new(config: &TranslatorConfig, api_key: impl Into<String>) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(8)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(config.timeout)
            .build()
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Translator for ChatTranslator {
    async fn translate(&self, text: &str, target_lang: &str) -> Result<String, UpstreamError> {
        let body = build_request(&self.model, text, target_lang);

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    UpstreamError::Timeout
                } else {
                    UpstreamError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            let snippet: String = body_text.chars().take(ERROR_BODY_CHARS).collect();
            return Err(match status.as_u16() {
                401 | 403 => UpstreamError::Unauthorized(snippet),
                429 => UpstreamError::RateLimited(snippet),
                code => UpstreamError::Status {
                    status: code,
                    body: snippet,
                },
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::Malformed(e.to_string()))?;
        let translated = extract_content(parsed)?;
        debug!(model = %self.model, chars = translated.chars().count(), "upstream translation received");
        Ok(translated)
    }
}

// --- Prompt construction ---

fn system_prompt(target_lang: &str) -> String {
    format!("You are a skilled translator. Translate into {target_lang}. Return ONLY the text.")
}

fn build_request<'a>(model: &'a str, text: &'a str, target_lang: &str) -> ChatRequest<'a> {
    ChatRequest {
        model,
        temperature: 0.0,
        stream: false,
        messages: vec![
            ChatMessage {
                role: "system",
                content: system_prompt(target_lang),
            },
            ChatMessage {
                role: "user",
                content: text.to_string(),
            },
        ],
    }
}

fn extract_content(response: ChatResponse) -> Result<String, UpstreamError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| UpstreamError::Malformed("response has no message content".into()))
}

// --- Wire types ---

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}
