//! OpenAI-compatible streaming completion client
//!
//! Talks to any `/chat/completions` endpoint that speaks SSE: DeepSeek,
//! OpenAI, Ollama, LM Studio. Reasoning deltas (`reasoning_content`) and
//! usage blocks with prompt-cache details are surfaced when the provider
//! sends them.

use async_stream::try_stream;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client as HttpClient, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ChatMessage, CompletionStream, EventStream, StreamEvent};
use crate::config::Config;
use crate::error::CoreError;
use crate::metrics::UsageRecord;

const REQUEST_TIMEOUT_SECS: u64 = 300;
const MAX_COMPLETION_TOKENS: u32 = 8000;
const TEMPERATURE: f32 = 0.1;

pub struct LlmClient {
    base_url: String,
    api_key: String,
    model: String,
    http: HttpClient,
}

impl LlmClient {
    pub fn new(config: &Config) -> Result<Self, CoreError> {
        let http = HttpClient::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| CoreError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(LlmClient {
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            http,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_headers(&self) -> Result<HeaderMap, CoreError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if !self.api_key.is_empty() && self.api_key != "none" {
            let value = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|_| CoreError::Transport("API key contains invalid characters".into()))?;
            headers.insert("Authorization", value);
        }
        Ok(headers)
    }
}

impl CompletionStream for LlmClient {
    fn chat_stream<'a>(&'a self, messages: &'a [ChatMessage]) -> EventStream<'a> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = CompletionRequest {
            model: &self.model,
            messages,
            temperature: TEMPERATURE,
            max_tokens: MAX_COMPLETION_TOKENS,
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
        };

        Box::pin(try_stream! {
            let response = self
                .http
                .post(&url)
                .headers(self.build_headers()?)
                .json(&body)
                .send()
                .await
                .map_err(|e| CoreError::Transport(format!("request failed: {}", e)))?;

            let status = response.status();
            if !status.is_success() {
                let message = match status {
                    StatusCode::UNAUTHORIZED => "authentication failed, check the API key".to_string(),
                    StatusCode::TOO_MANY_REQUESTS => "rate limit exceeded".to_string(),
                    _ => {
                        let body: Option<serde_json::Value> = response.json().await.ok();
                        body.as_ref()
                            .and_then(|v| v.get("error").and_then(|e| e.get("message")))
                            .and_then(|v| v.as_str())
                            .unwrap_or("unknown error")
                            .to_string()
                    }
                };
                Err(CoreError::Provider {
                    status: status.as_u16(),
                    message,
                })?;
                return;
            }

            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();

            'outer: while let Some(chunk) = bytes.next().await {
                let chunk =
                    chunk.map_err(|e| CoreError::Transport(format!("failed to read chunk: {}", e)))?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // Process complete SSE lines; partial lines wait for more bytes.
                while let Some(newline_pos) = buffer.find('\n') {
                    let line = buffer[..newline_pos].trim_end_matches('\r').to_string();
                    buffer = buffer[newline_pos + 1..].to_string();

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if data == "[DONE]" {
                        break 'outer;
                    }

                    let Ok(parsed) = serde_json::from_str::<StreamChunk>(data) else {
                        debug!(data, "skipping unparseable stream chunk");
                        continue;
                    };
                    if let Some(delta) = parsed.choices.first().map(|c| &c.delta) {
                        if let Some(reasoning) = &delta.reasoning_content {
                            if !reasoning.is_empty() {
                                yield StreamEvent::Reasoning(reasoning.clone());
                            }
                        }
                        if let Some(content) = &delta.content {
                            if !content.is_empty() {
                                yield StreamEvent::Content(content.clone());
                            }
                        }
                    }
                    if let Some(usage) = parsed.usage {
                        yield StreamEvent::Usage(usage.into_record());
                    }
                }
            }

            yield StreamEvent::Done;
        })
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
    stream_options: StreamOptions,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    content: Option<String>,
    reasoning_content: Option<String>,
}

/// Usage as providers send it. DeepSeek reports the cache split directly;
/// OpenAI nests hits under `prompt_tokens_details.cached_tokens`.
#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
    #[serde(default)]
    prompt_cache_hit_tokens: u64,
    #[serde(default)]
    prompt_cache_miss_tokens: u64,
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Deserialize)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: u64,
}

impl WireUsage {
    fn into_record(self) -> UsageRecord {
        let hit = if self.prompt_cache_hit_tokens > 0 {
            self.prompt_cache_hit_tokens
        } else {
            self.prompt_tokens_details
                .as_ref()
                .map(|d| d.cached_tokens)
                .unwrap_or(0)
        };
        UsageRecord {
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            total_tokens: self.total_tokens,
            prompt_cache_hit_tokens: hit,
            prompt_cache_miss_tokens: self.prompt_cache_miss_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_usage_deepseek_style() {
        let usage: WireUsage = serde_json::from_str(
            r#"{"prompt_tokens":10,"completion_tokens":4,"total_tokens":14,
                "prompt_cache_hit_tokens":6,"prompt_cache_miss_tokens":4}"#,
        )
        .unwrap();
        let record = usage.into_record();
        assert_eq!(record.prompt_cache_hit_tokens, 6);
        assert_eq!(record.prompt_cache_miss_tokens, 4);
    }

    #[test]
    fn test_wire_usage_openai_cached_tokens_fallback() {
        let usage: WireUsage = serde_json::from_str(
            r#"{"prompt_tokens":10,"completion_tokens":4,"total_tokens":14,
                "prompt_tokens_details":{"cached_tokens":7}}"#,
        )
        .unwrap();
        let record = usage.into_record();
        assert_eq!(record.prompt_cache_hit_tokens, 7);
        // Miss side is derived downstream from the prompt total.
        assert_eq!(record.cache_miss(), 3);
    }

    #[test]
    fn test_stream_chunk_with_reasoning_delta() {
        let chunk: StreamChunk = serde_json::from_str(
            r#"{"choices":[{"delta":{"reasoning_content":"thinking..."}}]}"#,
        )
        .unwrap();
        assert_eq!(
            chunk.choices[0].delta.reasoning_content.as_deref(),
            Some("thinking...")
        );
        assert!(chunk.choices[0].delta.content.is_none());
    }

    #[test]
    fn test_request_serializes_stream_options() {
        let messages = vec![ChatMessage::user("hi")];
        let body = CompletionRequest {
            model: "deepseek-chat",
            messages: &messages,
            temperature: TEMPERATURE,
            max_tokens: MAX_COMPLETION_TOKENS,
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["stream"], true);
        assert_eq!(json["stream_options"]["include_usage"], true);
        assert_eq!(json["max_tokens"], 8000);
    }
}
