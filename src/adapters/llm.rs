//! Streaming language-model adapter.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::CancellationToken;

/// The terminal result of a generation that was not cancelled mid-stream.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub content: String,
    pub model: String,
    pub tokens_used: Option<u32>,
    pub processing_ms: u64,
}

/// A narrow, replaceable surface over a streaming chat-completion provider.
/// The token sequence stops delivering tokens as soon as `cancel` is
/// observed — implementations must check it between emissions, not just at
/// the start of the call.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Streams tokens via `on_token`, returning `Ok(None)` if the
    /// generation was cancelled before completion, or `Ok(Some(outcome))`
    /// if it ran to completion.
    async fn generate(
        &self,
        session: Uuid,
        prompt: &str,
        language: &str,
        cancel: CancellationToken,
        on_token: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<Option<GenerationOutcome>>;
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Delta,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

/// How long the adapter allows the connection to come up before giving up.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// The overall deadline for one generation, from request to a completed or
/// cancelled stream. Owned here rather than by the orchestrator, since the
/// orchestrator's idle timeout only fires on missing input frames, not on a
/// provider connection that accepted the request and then stalled.
const GENERATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Talks to an OpenAI-compatible chat-completions endpoint over SSE.
pub struct HttpLlmAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpLlmAdapter {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .expect("reqwest client with a connect timeout should always build");
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl LlmAdapter for HttpLlmAdapter {
    async fn generate(
        &self,
        _session: Uuid,
        prompt: &str,
        language: &str,
        cancel: CancellationToken,
        on_token: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<Option<GenerationOutcome>> {
        let started = Instant::now();
        let system = format!(
            "You are a concise real-time voice assistant. Reply in {language}. \
             Keep responses short and conversational."
        );
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system,
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            stream: true,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .context("failed to send streaming request to LLM provider")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("LLM streaming API error ({status}): {body}");
        }

        let read_loop = async {
            let mut stream = response.bytes_stream();
            let mut full_content = String::new();
            let mut buffer = String::new();
            let mut token_count: u32 = 0;

            while let Some(chunk) = stream.next().await {
                if cancel.is_cancelled() {
                    return Ok(None);
                }
                let chunk = chunk.context("failed to read LLM stream chunk")?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = buffer.find("\n\n") {
                    let event_str = buffer[..pos].to_string();
                    buffer = buffer[pos + 2..].to_string();

                    for line in event_str.lines() {
                        let Some(data) = line.strip_prefix("data: ") else {
                            continue;
                        };
                        if data == "[DONE]" {
                            continue;
                        }
                        if cancel.is_cancelled() {
                            return Ok(None);
                        }
                        if let Ok(parsed) = serde_json::from_str::<StreamResponse>(data) {
                            if let Some(choice) = parsed.choices.first() {
                                if let Some(content) = &choice.delta.content {
                                    on_token(content);
                                    full_content.push_str(content);
                                    token_count += 1;
                                }
                            }
                        }
                    }
                }
            }

            if cancel.is_cancelled() {
                return Ok(None);
            }

            Ok(Some(GenerationOutcome {
                content: full_content,
                model: self.model.clone(),
                tokens_used: Some(token_count),
                processing_ms: started.elapsed().as_millis() as u64,
            }))
        };

        match tokio::time::timeout(GENERATION_TIMEOUT, read_loop).await {
            Ok(result) => result,
            Err(_) => bail!(
                "LLM stream exceeded {}s without completing",
                GENERATION_TIMEOUT.as_secs()
            ),
        }
    }
}

/// A deterministic token source for tests: yields a preset list of tokens
/// with an optional induced error after a given number of tokens, honoring
/// cancellation between each one.
pub struct MockLlmAdapter {
    tokens: Vec<String>,
    fail_after: Option<usize>,
    calls: Mutex<u32>,
}

impl MockLlmAdapter {
    pub fn new(tokens: Vec<String>) -> Self {
        Self {
            tokens,
            fail_after: None,
            calls: Mutex::new(0),
        }
    }

    pub fn failing_after(tokens: Vec<String>, fail_after: usize) -> Self {
        Self {
            tokens,
            fail_after: Some(fail_after),
            calls: Mutex::new(0),
        }
    }

    pub fn call_count(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl LlmAdapter for MockLlmAdapter {
    async fn generate(
        &self,
        _session: Uuid,
        _prompt: &str,
        _language: &str,
        cancel: CancellationToken,
        on_token: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<Option<GenerationOutcome>> {
        *self.calls.lock().unwrap() += 1;
        let mut full_content = String::new();
        for (i, token) in self.tokens.iter().enumerate() {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            if let Some(limit) = self.fail_after {
                if i == limit {
                    bail!("mock LLM transient failure after {limit} tokens");
                }
            }
            on_token(token);
            full_content.push_str(token);
            tokio::task::yield_now().await;
        }
        if cancel.is_cancelled() {
            return Ok(None);
        }
        Ok(Some(GenerationOutcome {
            content: full_content,
            model: "mock-model".to_string(),
            tokens_used: Some(self.tokens.len() as u32),
            processing_ms: 0,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_adapter_streams_tokens_in_order() {
        let adapter = MockLlmAdapter::new(vec!["hi".into(), " there".into()]);
        let mut seen = Vec::new();
        let outcome = adapter
            .generate(Uuid::new_v4(), "hello", "en", CancellationToken::new(), &mut |t| {
                seen.push(t.to_string())
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen, vec!["hi", " there"]);
        assert_eq!(outcome.content, "hi there");
    }

    #[tokio::test]
    async fn mock_adapter_honors_pre_cancelled_token() {
        let adapter = MockLlmAdapter::new(vec!["hi".into()]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = adapter
            .generate(Uuid::new_v4(), "hello", "en", cancel, &mut |_| {})
            .await
            .unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn mock_adapter_fails_after_n_tokens() {
        let adapter = MockLlmAdapter::failing_after(vec!["a".into(), "b".into(), "c".into()], 2);
        let mut seen = Vec::new();
        let result = adapter
            .generate(Uuid::new_v4(), "hello", "en", CancellationToken::new(), &mut |t| {
                seen.push(t.to_string())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(seen, vec!["a", "b"]);
    }
}
