//! Google Gemini API client
//!
//! `generateContent` for blocking calls and `streamGenerateContent?alt=sse`
//! for streaming. Each SSE message carries a full `GenerateContentResponse`
//! whose text parts are the next delta.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use reqwest_eventsource::{Event, EventSource};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use super::retry::send_with_retry;
use super::{CompletionRequest, CompletionResponse, LlmClient, LlmError, Role, StopReason, StreamChunk, TokenUsage};
use crate::config::LlmConfig;

/// Google Gemini API client
pub struct GeminiClient {
    model: String,
    api_key: String,
    base_url: String,
    http: Client,
    max_tokens: u32,
}

impl GeminiClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        debug!(model = %config.model, base_url = %config.base_url, "GeminiClient::from_config: called");
        let api_key = config
            .get_api_key()
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(LlmError::Network)?;

        Ok(Self {
            model: config.model.clone(),
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
            max_tokens: config.max_tokens,
        })
    }

    fn endpoint(&self, streaming: bool) -> String {
        if streaming {
            format!("{}/v1beta/models/{}:streamGenerateContent?alt=sse", self.base_url, self.model)
        } else {
            format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
        }
    }

    fn build_request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        debug!(%self.model, message_count = request.messages.len(), "build_request_body: called");
        let contents: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|msg| {
                let role = match msg.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                };
                serde_json::json!({
                    "role": role,
                    "parts": [{ "text": msg.content }],
                })
            })
            .collect();

        let mut generation_config = serde_json::json!({
            "maxOutputTokens": request.max_tokens.min(self.max_tokens),
        });
        if let Some(temperature) = request.temperature {
            generation_config["temperature"] = serde_json::json!(temperature);
        }

        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": generation_config,
        });
        if !request.system_prompt.is_empty() {
            body["systemInstruction"] = serde_json::json!({
                "parts": [{ "text": request.system_prompt }],
            });
        }
        body
    }

    fn post(&self, url: &str, body: &serde_json::Value) -> reqwest::RequestBuilder {
        self.http
            .post(url)
            .header("x-goog-api-key", self.api_key.clone())
            .header("content-type", "application/json")
            .json(body)
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        debug!(%self.model, tags = ?request.tags, "GeminiClient::complete: called");
        let url = self.endpoint(false);
        let body = self.build_request_body(&request);

        let response = send_with_retry("gemini", || self.post(&url, &body)).await?;
        let api_response: GeminiResponse = response.json().await?;
        api_response.into_completion()
    }

    async fn stream(
        &self,
        request: CompletionRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<CompletionResponse, LlmError> {
        debug!(%self.model, tags = ?request.tags, "GeminiClient::stream: called");
        let url = self.endpoint(true);
        let body = self.build_request_body(&request);

        let mut es = EventSource::new(self.post(&url, &body)).map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let mut full_content = String::new();
        let mut stop_reason = StopReason::EndTurn;
        let mut usage = TokenUsage::default();
        let mut started = false;

        while let Some(event) = es.next().await {
            match event {
                Ok(Event::Open) => {
                    debug!("stream: Event::Open");
                }
                Ok(Event::Message(msg)) => {
                    let chunk: GeminiResponse = serde_json::from_str(&msg.data).map_err(LlmError::Json)?;
                    if let Some(u) = chunk.usage_metadata.as_ref() {
                        usage = u.to_usage();
                    }
                    if !started {
                        started = true;
                        let _ = chunk_tx
                            .send(StreamChunk::MessageStart {
                                input_tokens: usage.input_tokens,
                            })
                            .await;
                    }
                    if let Some(reason) = chunk.finish_reason() {
                        stop_reason = StopReason::from_gemini(reason);
                    }

                    let text = chunk.text();
                    if text.is_empty() {
                        continue;
                    }
                    full_content.push_str(&text);
                    if chunk_tx.send(StreamChunk::TextDelta(text)).await.is_err() {
                        debug!("stream: receiver dropped, abandoning upstream");
                        es.close();
                        break;
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => {
                    debug!("stream: stream ended");
                    break;
                }
                Err(reqwest_eventsource::Error::InvalidStatusCode(status, _)) => {
                    es.close();
                    let status = status.as_u16();
                    debug!(status, "stream: invalid status");
                    let _ = chunk_tx.send(StreamChunk::Error(format!("HTTP {}", status))).await;
                    return Err(LlmError::ApiError {
                        status,
                        message: "stream rejected".to_string(),
                    });
                }
                Err(e) => {
                    es.close();
                    debug!(%e, "stream: Event error");
                    let _ = chunk_tx.send(StreamChunk::Error(e.to_string())).await;
                    return Err(LlmError::InvalidResponse(e.to_string()));
                }
            }
        }

        if stop_reason == StopReason::Blocked && full_content.is_empty() {
            return Err(LlmError::InvalidResponse("Response blocked by provider".to_string()));
        }

        let _ = chunk_tx
            .send(StreamChunk::MessageDone {
                stop_reason: stop_reason.clone(),
                usage: usage.clone(),
            })
            .await;

        Ok(CompletionResponse {
            content: if full_content.is_empty() { None } else { Some(full_content) },
            stop_reason,
            usage,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsage>,
}

impl GeminiResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| content.parts.iter().filter_map(|p| p.text.as_deref()).collect())
            .unwrap_or_default()
    }

    fn finish_reason(&self) -> Option<&str> {
        self.candidates.first().and_then(|c| c.finish_reason.as_deref())
    }

    fn into_completion(self) -> Result<CompletionResponse, LlmError> {
        if self.candidates.is_empty() {
            return Err(LlmError::InvalidResponse("No candidates in response".to_string()));
        }
        let text = self.text();
        let stop_reason = self.finish_reason().map(StopReason::from_gemini).unwrap_or(StopReason::EndTurn);
        if stop_reason == StopReason::Blocked && text.is_empty() {
            return Err(LlmError::InvalidResponse("Response blocked by provider".to_string()));
        }
        Ok(CompletionResponse {
            content: if text.is_empty() { None } else { Some(text) },
            stop_reason,
            usage: self.usage_metadata.map(|u| u.to_usage()).unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

impl GeminiUsage {
    fn to_usage(&self) -> TokenUsage {
        TokenUsage {
            input_tokens: self.prompt_token_count,
            output_tokens: self.candidates_token_count,
        }
    }
}
