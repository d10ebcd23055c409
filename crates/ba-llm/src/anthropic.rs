//! Anthropic Messages API adapter (`POST /v1/messages`, `stream: true`).

use std::collections::HashMap;

use ba_core::message::{Message, MessageContent, ToolDefinition};
use ba_core::stream::{ChatAdapter, ChunkStream, StreamChunk, StreamRequest, Usage};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::http::{self, Endpoint};
use crate::retry::RetryPolicy;
use crate::sse;

const VENDOR: &str = "anthropic";
const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone)]
pub struct AnthropicAdapter {
    client: reqwest::Client,
    endpoint: Endpoint,
    retry: RetryPolicy,
}

impl AnthropicAdapter {
    pub fn new(client: reqwest::Client, endpoint: Endpoint, retry: RetryPolicy) -> Self {
        Self {
            client,
            endpoint,
            retry,
        }
    }

    fn request_body(&self, request: &StreamRequest) -> Value {
        let mut body = json!({
            "model": self.endpoint.model,
            "max_tokens": request.max_tokens,
            "stream": true,
            "messages": request.messages.iter().map(wire_message).collect::<Vec<_>>(),
        });
        if !request.system_prompt.is_empty() {
            body["system"] = json!(request.system_prompt);
        }
        if let Some(tools) = request.tools.as_ref().filter(|t| !t.is_empty()) {
            body["tools"] = json!(tools.iter().map(wire_tool).collect::<Vec<_>>());
        }
        body
    }

    async fn send(&self, body: &Value) -> crate::Result<reqwest::Response> {
        let request = self
            .client
            .post(self.endpoint.url("/v1/messages"))
            .header("x-api-key", &self.endpoint.api_key)
            .header("anthropic-version", API_VERSION)
            .json(body);
        http::send(VENDOR, request).await
    }
}

/// The message model already uses Anthropic's block shapes; only thinking
/// blocks are dropped.
fn wire_message(msg: &Message) -> Value {
    let content = match &msg.content {
        MessageContent::Text(text) => json!(text),
        MessageContent::Blocks(_) => json!(msg.replayable_blocks()),
    };
    json!({ "role": msg.role, "content": content })
}

fn wire_tool(tool: &ToolDefinition) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.input_schema,
    })
}

impl ChatAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        VENDOR
    }

    fn model(&self) -> &str {
        &self.endpoint.model
    }

    fn stream(&self, request: StreamRequest) -> ChunkStream {
        let this = self.clone();
        Box::pin(async_stream::stream! {
            let body = this.request_body(&request);
            let response = match this.retry.run(VENDOR, || this.send(&body)).await {
                Ok(r) => r,
                Err(e) => {
                    yield StreamChunk::error(e.to_string());
                    return;
                }
            };

            let mut events = Box::pin(sse::events(response));
            let mut state = StreamState::default();
            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(ev) => ev,
                    Err(e) => {
                        yield StreamChunk::error(e.to_string());
                        return;
                    }
                };
                for chunk in state.handle(&event.data) {
                    let terminal = chunk.is_terminal();
                    yield chunk;
                    if terminal {
                        return;
                    }
                }
            }
            yield StreamChunk::error("anthropic stream ended before message_stop");
        })
    }
}

// ─── Stream events ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart {
        message: StartMessage,
    },
    ContentBlockStart {
        index: usize,
        content_block: StartBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: BlockDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        #[serde(default)]
        usage: Option<WireUsage>,
    },
    MessageStop,
    Error {
        error: WireError,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct StartMessage {
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StartBlock {
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: Option<u64>,
    #[serde(default)]
    output_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

#[derive(Debug)]
struct PendingTool {
    id: String,
    name: String,
    json: String,
}

/// Folds Anthropic stream events into chunks.
#[derive(Debug, Default)]
struct StreamState {
    usage: Usage,
    tools: HashMap<usize, PendingTool>,
}

impl StreamState {
    fn handle(&mut self, data: &str) -> Vec<StreamChunk> {
        let event: StreamEvent = match serde_json::from_str(data) {
            Ok(ev) => ev,
            Err(e) => {
                tracing::warn!(error = %e, "skipping undecodable anthropic event");
                return Vec::new();
            }
        };
        match event {
            StreamEvent::MessageStart { message } => {
                if let Some(u) = message.usage {
                    self.apply(u);
                }
                Vec::new()
            }
            StreamEvent::ContentBlockStart {
                index,
                content_block: StartBlock::ToolUse { id, name },
            } => {
                self.tools.insert(
                    index,
                    PendingTool {
                        id,
                        name,
                        json: String::new(),
                    },
                );
                Vec::new()
            }
            StreamEvent::ContentBlockStart { .. } => Vec::new(),
            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                BlockDelta::TextDelta { text } if !text.is_empty() => vec![StreamChunk::text(text)],
                BlockDelta::InputJsonDelta { partial_json } => {
                    if let Some(tool) = self.tools.get_mut(&index) {
                        tool.json.push_str(&partial_json);
                    }
                    Vec::new()
                }
                // Thinking and signature deltas are never user-visible.
                _ => Vec::new(),
            },
            StreamEvent::ContentBlockStop { index } => {
                let Some(tool) = self.tools.remove(&index) else {
                    return Vec::new();
                };
                let input = if tool.json.trim().is_empty() {
                    Ok(json!({}))
                } else {
                    serde_json::from_str::<Value>(&tool.json)
                };
                match input {
                    Ok(input) => vec![StreamChunk::ToolUse {
                        id: tool.id,
                        name: tool.name,
                        input,
                    }],
                    Err(e) => vec![StreamChunk::error(format!(
                        "anthropic sent invalid input for tool '{}': {e}",
                        tool.name
                    ))],
                }
            }
            StreamEvent::MessageDelta { usage } => {
                if let Some(u) = usage {
                    self.apply(u);
                }
                Vec::new()
            }
            StreamEvent::MessageStop => vec![StreamChunk::complete(self.usage)],
            StreamEvent::Error { error } => vec![StreamChunk::error(format!(
                "anthropic stream error ({}): {}",
                error.kind, error.message
            ))],
            StreamEvent::Unknown => Vec::new(),
        }
    }

    fn apply(&mut self, u: WireUsage) {
        if let Some(n) = u.input_tokens {
            self.usage.input_tokens = n;
        }
        if let Some(n) = u.output_tokens {
            self.usage.output_tokens = n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ba_core::message::{ToolCall, ToolResult};
    use futures::StreamExt;

    const HELLO_STREAM: &str = "event: message_start\n\
data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"usage\":{\"input_tokens\":10,\"output_tokens\":1}}}\n\n\
event: content_block_start\n\
data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"thinking\",\"thinking\":\"\"}}\n\n\
event: content_block_delta\n\
data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"thinking_delta\",\"thinking\":\"user greets\"}}\n\n\
event: content_block_stop\n\
data: {\"type\":\"content_block_stop\",\"index\":0}\n\n\
event: content_block_start\n\
data: {\"type\":\"content_block_start\",\"index\":1,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n\
event: ping\n\
data: {\"type\":\"ping\"}\n\n\
event: content_block_delta\n\
data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hello\"}}\n\n\
event: content_block_delta\n\
data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"text_delta\",\"text\":\" world\"}}\n\n\
event: content_block_stop\n\
data: {\"type\":\"content_block_stop\",\"index\":1}\n\n\
event: message_delta\n\
data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":5}}\n\n\
event: message_stop\n\
data: {\"type\":\"message_stop\"}\n\n";

    const TOOL_STREAM: &str = "event: message_start\n\
data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":20,\"output_tokens\":1}}}\n\n\
event: content_block_start\n\
data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"tool_use\",\"id\":\"toolu_1\",\"name\":\"search_documents\",\"input\":{}}}\n\n\
event: content_block_delta\n\
data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"query\\\": \\\"ref\"}}\n\n\
event: content_block_delta\n\
data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"unds\\\"}\"}}\n\n\
event: content_block_stop\n\
data: {\"type\":\"content_block_stop\",\"index\":0}\n\n\
event: message_delta\n\
data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"tool_use\"},\"usage\":{\"output_tokens\":12}}\n\n\
event: message_stop\n\
data: {\"type\":\"message_stop\"}\n\n";

    fn adapter(server: &mockito::ServerGuard, retry: RetryPolicy) -> AnthropicAdapter {
        AnthropicAdapter::new(
            http::client().unwrap(),
            Endpoint::new(server.url(), "test-key", "claude-test"),
            retry,
        )
    }

    fn request() -> StreamRequest {
        StreamRequest {
            messages: vec![Message::user("hi")],
            system_prompt: "be brief".into(),
            tools: None,
            max_tokens: 256,
            session: None,
        }
    }

    #[tokio::test]
    async fn streams_text_and_skips_thinking() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .match_header("x-api-key", "test-key")
            .match_header("anthropic-version", API_VERSION)
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(HELLO_STREAM)
            .create_async()
            .await;

        let chunks: Vec<_> = adapter(&server, RetryPolicy::none()).stream(request()).collect().await;
        mock.assert_async().await;
        assert_eq!(
            chunks,
            vec![
                StreamChunk::text("Hello"),
                StreamChunk::text(" world"),
                StreamChunk::complete(Usage::new(10, 5)),
            ]
        );
    }

    #[tokio::test]
    async fn accumulates_tool_input_json() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/messages")
            .with_status(200)
            .with_body(TOOL_STREAM)
            .create_async()
            .await;

        let chunks: Vec<_> = adapter(&server, RetryPolicy::none()).stream(request()).collect().await;
        assert_eq!(
            chunks,
            vec![
                StreamChunk::ToolUse {
                    id: "toolu_1".into(),
                    name: "search_documents".into(),
                    input: json!({"query": "refunds"}),
                },
                StreamChunk::complete(Usage::new(20, 12)),
            ]
        );
    }

    #[tokio::test]
    async fn rate_limit_is_retried_then_surfaced() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .with_status(429)
            .with_body(r#"{"type":"error","error":{"type":"rate_limit_error","message":"rate limit exceeded"}}"#)
            .expect(3)
            .create_async()
            .await;

        let retry = RetryPolicy {
            max_retries: 2,
            delay: std::time::Duration::from_millis(1),
        };
        let chunks: Vec<_> = adapter(&server, retry).stream(request()).collect().await;
        mock.assert_async().await;
        assert_eq!(chunks.len(), 1);
        assert!(matches!(&chunks[0], StreamChunk::Error { message } if message.contains("rate limit exceeded")));
    }

    #[tokio::test]
    async fn bad_request_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .with_status(400)
            .with_body(r#"{"type":"error","error":{"type":"invalid_request_error","message":"max_tokens too large"}}"#)
            .expect(1)
            .create_async()
            .await;

        let chunks: Vec<_> = adapter(&server, RetryPolicy::default()).stream(request()).collect().await;
        mock.assert_async().await;
        assert!(matches!(&chunks[..], [StreamChunk::Error { message }] if message.contains("max_tokens too large")));
    }

    #[tokio::test]
    async fn in_stream_error_event_terminates() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/messages")
            .with_status(200)
            .with_body(
                "event: content_block_delta\n\
data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n\n\
event: error\n\
data: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n",
            )
            .create_async()
            .await;

        let chunks: Vec<_> = adapter(&server, RetryPolicy::none()).stream(request()).collect().await;
        assert_eq!(chunks.len(), 2);
        assert!(matches!(&chunks[1], StreamChunk::Error { message } if message.contains("Overloaded")));
    }

    #[tokio::test]
    async fn truncated_stream_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/messages")
            .with_status(200)
            .with_body(
                "event: content_block_delta\n\
data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n\n",
            )
            .create_async()
            .await;

        let chunks: Vec<_> = adapter(&server, RetryPolicy::none()).stream(request()).collect().await;
        assert!(matches!(chunks.last(), Some(StreamChunk::Error { .. })));
    }

    #[test]
    fn body_replays_tool_turns_without_thinking() {
        let adapter = AnthropicAdapter::new(
            reqwest::Client::new(),
            Endpoint::new("http://unused", "k", "claude-test"),
            RetryPolicy::none(),
        );
        let calls = vec![ToolCall {
            id: "toolu_1".into(),
            name: "search_documents".into(),
            input: json!({"query": "scope"}),
        }];
        let request = StreamRequest {
            messages: vec![
                Message::user("what's in scope?"),
                Message::assistant_with_tools("Checking.", &calls),
                Message::tool_results(&[ToolResult {
                    tool_use_id: "toolu_1".into(),
                    content: "Found 1".into(),
                    is_error: false,
                }]),
            ],
            system_prompt: "sys".into(),
            tools: Some(ba_core::tools::definitions()),
            max_tokens: 100,
            session: None,
        };
        let body = adapter.request_body(&request);
        assert_eq!(body["system"], "sys");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["content"], "what's in scope?");
        assert_eq!(body["messages"][1]["content"][1]["type"], "tool_use");
        assert_eq!(body["messages"][2]["content"][0]["type"], "tool_result");
        assert_eq!(body["tools"][0]["name"], "search_documents");
        assert!(body["tools"][0]["input_schema"].is_object());
    }
}
