use anyhow::{Context, Result};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::LlmConfig;
use crate::models::chat::ChatMessage;
use crate::services::completion::{CompletionClient, CompletionError, FragmentStream};

/// Upstream error bodies are cut to this many bytes before surfacing
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub max_tokens: u32,
    pub temperature: f32,
    pub stream: bool,
}

// Local response structs
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
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
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChoiceChunk>,
}

#[derive(Debug, Deserialize)]
struct ChoiceChunk {
    delta: Delta,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat completions client
#[derive(Clone)]
pub struct LlmService {
    client: Client,
    config: LlmConfig,
    endpoint: String,
}

impl LlmService {
    pub fn new(config: LlmConfig) -> Result<Self> {
        // No overall timeout here: streams may legitimately run long.
        // The conversation manager bounds each wait instead.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs.max(1)))
            .build()
            .context("Failed to create HTTP client")?;

        let endpoint = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));

        Ok(Self { client, config, endpoint })
    }

    async fn send(&self, messages: &[ChatMessage], stream: bool) -> Result<reqwest::Response, CompletionError> {
        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream,
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let mut body = response.text().await.unwrap_or_default();
            truncate_utf8(&mut body, MAX_ERROR_BODY);
            return Err(CompletionError::Upstream { status, body });
        }

        Ok(response)
    }
}

#[async_trait::async_trait]
impl CompletionClient for LlmService {
    fn name(&self) -> &'static str {
        "openai-compatible"
    }

    /// Generate completion without streaming (wait for full response)
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        debug!("Starting chat generation with {} messages", messages.len());

        let response = self.send(messages, false).await?;
        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::Decode(e.to_string()))?;

        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.unwrap_or_default())
            .ok_or(CompletionError::EmptyReply)
    }

    /// Generate completion with streaming
    async fn stream(&self, messages: &[ChatMessage]) -> Result<FragmentStream, CompletionError> {
        debug!("Starting chat stream with {} messages", messages.len());

        let response = self.send(messages, true).await?;

        let stream = async_stream::stream! {
            let mut body = response.bytes_stream();
            let mut decoder = SseDecoder::default();

            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(CompletionError::Transport(e.to_string()));
                        return;
                    }
                };

                for event in decoder.push(&chunk) {
                    match event {
                        SseEvent::Delta(text) => yield Ok(text),
                        SseEvent::Done => return,
                        SseEvent::Invalid(reason) => {
                            yield Err(CompletionError::Decode(reason));
                            return;
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

#[derive(Debug, PartialEq)]
enum SseEvent {
    Delta(String),
    Done,
    Invalid(String),
}

/// Incremental parser for `data: {...}` lines. Network chunks may split a
/// line anywhere, so bytes are buffered until a newline arrives.
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            let Some(payload) = line.strip_prefix("data:") else {
                // Comments, event names, blank separators
                continue;
            };
            let payload = payload.trim_start();

            if payload == "[DONE]" {
                events.push(SseEvent::Done);
                break;
            }

            match serde_json::from_str::<ChatCompletionChunk>(payload) {
                Ok(chunk) => {
                    if let Some(content) = chunk
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|choice| choice.delta.content)
                        .filter(|content| !content.is_empty())
                    {
                        events.push(SseEvent::Delta(content));
                    }
                }
                Err(e) => {
                    events.push(SseEvent::Invalid(format!("{}: {}", e, payload)));
                    break;
                }
            }
        }

        events
    }
}

fn truncate_utf8(text: &mut String, max_bytes: usize) {
    if text.len() <= max_bytes {
        return;
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    fn delta(text: &str) -> String {
        format!("data: {{\"choices\":[{{\"delta\":{{\"content\":\"{}\"}}}}]}}\n\n", text)
    }

    #[test]
    fn test_decoder_yields_deltas_in_order() {
        let mut decoder = SseDecoder::default();
        let input = format!("{}{}data: [DONE]\n\n", delta("Hel"), delta("lo"));
        assert_eq!(
            decoder.push(input.as_bytes()),
            vec![SseEvent::Delta("Hel".into()), SseEvent::Delta("lo".into()), SseEvent::Done]
        );
    }

    #[test]
    fn test_decoder_handles_lines_split_across_chunks() {
        let mut decoder = SseDecoder::default();
        let line = delta("Hello");
        let (head, tail) = line.split_at(17);

        assert!(decoder.push(head.as_bytes()).is_empty());
        assert_eq!(decoder.push(tail.as_bytes()), vec![SseEvent::Delta("Hello".into())]);
    }

    #[test]
    fn test_decoder_skips_role_only_and_comment_lines() {
        let mut decoder = SseDecoder::default();
        let input = ": keep-alive\n\
                     data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n\
                     data: {\"choices\":[]}\n\n";
        assert!(decoder.push(input.as_bytes()).is_empty());
    }

    #[test]
    fn test_decoder_reports_invalid_payload() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(b"data: {not json}\r\n\r\n");
        assert!(matches!(events.as_slice(), [SseEvent::Invalid(_)]));
    }

    #[test]
    fn test_request_wire_shape() {
        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("hi")];
        let request = ChatCompletionRequest {
            model: "gpt-4o-mini",
            messages: &messages,
            max_tokens: 256,
            temperature: 0.5,
            stream: true,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model"], "gpt-4o-mini");
        assert_eq!(value["stream"], true);
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "hi");
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let mut settings = Settings::defaults().unwrap();
        settings.llm.base_url = "http://localhost:8080/v1/".to_string();
        let service = LlmService::new(settings.llm).unwrap();
        assert_eq!(service.endpoint, "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let mut text = "héllo".to_string();
        truncate_utf8(&mut text, 2);
        assert_eq!(text, "h");
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_transport_error() {
        let mut settings = Settings::defaults().unwrap();
        settings.llm.base_url = "http://127.0.0.1:9".to_string();
        settings.llm.connect_timeout_secs = 1;
        let service = LlmService::new(settings.llm).unwrap();

        let err = service.complete(&[ChatMessage::user("hi")]).await.unwrap_err();
        assert!(matches!(err, CompletionError::Transport(_)));
    }
}
