//! Streaming chat-completion client

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use pitchcall_config::LlmSettings;
use pitchcall_core::{ChatRole, ChatTurn, ReplyStream};

use crate::persona::PersonaConfig;
use crate::LlmError;

/// Chat-completion configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: String::new(),
            model: String::new(),
            max_tokens: 256,
            temperature: 0.2,
            top_p: 1.0,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            timeout: Duration::from_secs(60),
        }
    }
}

impl LlmConfig {
    pub fn from_settings(settings: &LlmSettings) -> Self {
        Self {
            api_key: settings.api_key.clone(),
            base_url: settings.base_url.clone(),
            model: settings.model.clone(),
            ..Default::default()
        }
    }

    pub(crate) fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
    presence_penalty: f32,
    frequency_penalty: f32,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    content: Option<String>,
}

/// Persona-conditioned streaming chat client for one session.
///
/// One `stream_reply` call is live at a time; `cancel` aborts the in-flight
/// reader so further yields cease promptly.
pub struct ChatClient {
    client: reqwest::Client,
    config: LlmConfig,
    persona: PersonaConfig,
    active: Mutex<Option<AbortHandle>>,
}

impl ChatClient {
    pub fn new(config: LlmConfig, persona: PersonaConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            config,
            persona,
            active: Mutex::new(None),
        }
    }

    pub fn persona(&self) -> &PersonaConfig {
        &self.persona
    }

    /// Assemble `[system, *history, user]` for one turn
    pub(crate) fn build_messages(&self, user_text: &str, history: &[ChatTurn]) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage {
            role: "system",
            content: self.persona.full_system_prompt(),
        });
        for turn in history {
            messages.push(ChatMessage {
                role: match turn.role {
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                },
                content: turn.content.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: user_text.to_string(),
        });
        messages
    }

    /// Start a streaming completion. The receiver yields non-empty deltas in
    /// generation order; it closes when the stream ends or is cancelled.
    pub async fn stream_reply(
        &self,
        user_text: &str,
        history: &[ChatTurn],
    ) -> Result<mpsc::Receiver<String>, LlmError> {
        let messages = self.build_messages(user_text, history);
        let request = ChatRequest {
            model: &self.config.model,
            messages: &messages,
            stream: true,
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            max_tokens: self.config.max_tokens,
            presence_penalty: self.config.presence_penalty,
            frequency_penalty: self.config.frequency_penalty,
        };

        let response = self
            .client
            .post(self.config.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("{}: {}", status, body)));
        }

        let (tx, rx) = mpsc::channel(64);
        let handle = tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut pending = String::new();

            'outer: while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        tracing::warn!("token stream read error: {}", e);
                        break;
                    }
                };
                pending.push_str(&String::from_utf8_lossy(&chunk));

                // Events are newline-delimited; keep the unterminated tail.
                while let Some(pos) = pending.find('\n') {
                    let line = pending[..pos].trim().to_string();
                    pending.drain(..=pos);

                    match parse_sse_line(&line) {
                        SseLine::Token(token) => {
                            if tx.send(token).await.is_err() {
                                break 'outer;
                            }
                        }
                        SseLine::Done => break 'outer,
                        SseLine::Skip => {}
                    }
                }
            }
        });

        *self.active.lock() = Some(handle.abort_handle());
        Ok(rx)
    }

    /// Cancel any in-flight streaming call.
    pub async fn cancel(&self) {
        if let Some(handle) = self.active.lock().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl ReplyStream for ChatClient {
    async fn stream_reply(
        &self,
        user_text: &str,
        history: &[ChatTurn],
    ) -> pitchcall_core::Result<mpsc::Receiver<String>> {
        ChatClient::stream_reply(self, user_text, history)
            .await
            .map_err(Into::into)
    }

    async fn cancel(&self) {
        ChatClient::cancel(self).await;
    }
}

/// One parsed server-sent-event line
#[derive(Debug, PartialEq)]
enum SseLine {
    Token(String),
    Done,
    Skip,
}

/// Parse one SSE line. Empty deltas, comments, and malformed payloads are
/// skipped; `[DONE]` terminates the stream.
fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.strip_prefix("data:").map(str::trim) else {
        return SseLine::Skip;
    };
    if data == "[DONE]" {
        return SseLine::Done;
    }

    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|t| !t.is_empty())
            .map(SseLine::Token)
            .unwrap_or(SseLine::Skip),
        Err(_) => SseLine::Skip,
    }
}
