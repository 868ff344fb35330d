//! LlmGateway: the one place model calls are made from
//!
//! Wraps a shared client handle with the configured timeout, token limit and
//! temperature, and tags every request for observability.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{CompletionRequest, LlmClient, LlmError, Message, StreamChunk};
use crate::config::LlmConfig;

/// Buffer between the provider stream and the token relay
const STREAM_BUFFER: usize = 64;

#[derive(Clone)]
pub struct LlmGateway {
    client: Arc<dyn LlmClient>,
    timeout: Duration,
    max_tokens: u32,
    temperature: Option<f32>,
}

impl LlmGateway {
    pub fn new(client: Arc<dyn LlmClient>, config: &LlmConfig) -> Self {
        debug!(timeout_ms = config.timeout_ms, max_tokens = config.max_tokens, "LlmGateway::new: called");
        Self {
            client,
            timeout: Duration::from_millis(config.timeout_ms),
            max_tokens: config.max_tokens,
            temperature: Some(config.temperature),
        }
    }

    /// Builder: override the per-call timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn request(&self, system: &str, messages: Vec<Message>, tag: &str) -> CompletionRequest {
        CompletionRequest {
            system_prompt: system.to_string(),
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            tags: vec![tag.to_string()],
        }
    }

    /// One blocking call; returns the reply text
    pub async fn complete(&self, system: &str, messages: Vec<Message>, tag: &str) -> Result<String, LlmError> {
        debug!(%tag, message_count = messages.len(), "LlmGateway::complete: called");
        let request = self.request(system, messages, tag);

        let response = tokio::time::timeout(self.timeout, self.client.complete(request))
            .await
            .map_err(|_| {
                warn!(%tag, timeout = ?self.timeout, "LlmGateway::complete: timed out");
                LlmError::Timeout(self.timeout)
            })??;

        response
            .content
            .ok_or_else(|| LlmError::InvalidResponse("Empty model response".to_string()))
    }

    /// Streaming call; relays text deltas to `tx` and returns the full text
    ///
    /// If `tx` is closed the provider stream is abandoned and the text
    /// received so far is returned.
    pub async fn stream(
        &self,
        system: &str,
        messages: Vec<Message>,
        tag: &str,
        tx: mpsc::Sender<String>,
    ) -> Result<String, LlmError> {
        debug!(%tag, message_count = messages.len(), "LlmGateway::stream: called");
        let request = self.request(system, messages, tag);
        let (chunk_tx, mut chunk_rx) = mpsc::channel::<StreamChunk>(STREAM_BUFFER);

        let relay = async move {
            while let Some(chunk) = chunk_rx.recv().await {
                if let StreamChunk::TextDelta(text) = chunk
                    && tx.send(text).await.is_err()
                {
                    debug!("LlmGateway::stream: token receiver dropped");
                    break;
                }
            }
        };

        let call = async {
            tokio::time::timeout(self.timeout, self.client.stream(request, chunk_tx))
                .await
                .map_err(|_| LlmError::Timeout(self.timeout))
        };

        let (result, ()) = tokio::join!(call, relay);
        let response = result
            .and_then(|r| r)
            .inspect_err(|e| warn!(%tag, error = %e, "LlmGateway::stream: failed"))?;
        Ok(response.content.unwrap_or_default())
    }
}
