//! Adapter for OpenAI-compatible chat completion APIs (OpenAI, DeepSeek).

use std::collections::BTreeMap;

use ba_core::message::{ContentBlock, Message, MessageContent, Role, ToolDefinition};
use ba_core::stream::{ChatAdapter, ChunkStream, StreamChunk, StreamRequest, Usage};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::http::{self, Endpoint};
use crate::retry::RetryPolicy;
use crate::sse;

#[derive(Debug, Clone)]
pub struct OpenAiCompatAdapter {
    vendor: String,
    client: reqwest::Client,
    endpoint: Endpoint,
    retry: RetryPolicy,
}

impl OpenAiCompatAdapter {
    pub fn new(
        vendor: impl Into<String>,
        client: reqwest::Client,
        endpoint: Endpoint,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            vendor: vendor.into(),
            client,
            endpoint,
            retry,
        }
    }

    fn request_body(&self, request: &StreamRequest) -> Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if !request.system_prompt.is_empty() {
            messages.push(json!({ "role": "system", "content": request.system_prompt }));
        }
        for msg in &request.messages {
            wire_messages(msg, &mut messages);
        }
        let mut body = json!({
            "model": self.endpoint.model,
            "max_tokens": request.max_tokens,
            "stream": true,
            "stream_options": { "include_usage": true },
            "messages": messages,
        });
        if let Some(tools) = request.tools.as_ref().filter(|t| !t.is_empty()) {
            body["tools"] = json!(tools.iter().map(wire_tool).collect::<Vec<_>>());
        }
        body
    }

    async fn send(&self, body: &Value) -> crate::Result<reqwest::Response> {
        let request = self
            .client
            .post(self.endpoint.url("/chat/completions"))
            .bearer_auth(&self.endpoint.api_key)
            .json(body);
        http::send(&self.vendor, request).await
    }
}

/// One conversation message can expand to several wire messages: each tool
/// result is its own `role: tool` entry.
fn wire_messages(msg: &Message, out: &mut Vec<Value>) {
    let blocks = match &msg.content {
        MessageContent::Text(text) => {
            out.push(json!({ "role": msg.role, "content": text }));
            return;
        }
        MessageContent::Blocks(blocks) => blocks,
    };

    match msg.role {
        Role::Assistant => {
            let text: String = blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect();
            let calls: Vec<Value> = blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolUse { id, name, input } => Some(json!({
                        "id": id,
                        "type": "function",
                        "function": { "name": name, "arguments": input.to_string() },
                    })),
                    _ => None,
                })
                .collect();
            let mut wire = json!({ "role": "assistant", "content": text });
            if !calls.is_empty() {
                wire["tool_calls"] = json!(calls);
            }
            out.push(wire);
        }
        Role::User => {
            let mut text = String::new();
            for block in blocks {
                match block {
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        ..
                    } => out.push(json!({
                        "role": "tool",
                        "tool_call_id": tool_use_id,
                        "content": content,
                    })),
                    ContentBlock::Text { text: t } => text.push_str(t),
                    _ => {}
                }
            }
            if !text.is_empty() {
                out.push(json!({ "role": "user", "content": text }));
            }
        }
    }
}

fn wire_tool(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.input_schema,
        },
    })
}

impl ChatAdapter for OpenAiCompatAdapter {
    fn name(&self) -> &str {
        &self.vendor
    }

    fn model(&self) -> &str {
        &self.endpoint.model
    }

    fn stream(&self, request: StreamRequest) -> ChunkStream {
        let this = self.clone();
        Box::pin(async_stream::stream! {
            let body = this.request_body(&request);
            let response = match this.retry.run(&this.vendor, || this.send(&body)).await {
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
                if event.data.trim() == "[DONE]" {
                    state.finished = true;
                    break;
                }
                match serde_json::from_str::<CompletionChunk>(&event.data) {
                    Ok(chunk) => {
                        if let Some(err) = chunk.error {
                            yield StreamChunk::error(format!("{} stream error: {}", this.vendor, err.message));
                            return;
                        }
                        for out in state.handle(chunk) {
                            yield out;
                        }
                    }
                    Err(e) => tracing::warn!(vendor = %this.vendor, error = %e, "skipping undecodable chunk"),
                }
            }
            if !state.finished {
                yield StreamChunk::error(format!("{} stream ended before [DONE]", this.vendor));
                return;
            }
            for out in state.flush_tools() {
                yield out;
            }
            yield StreamChunk::complete(state.usage);
        })
    }
}

// ─── Stream chunks ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    error: Option<WireError>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Delta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct WireError {
    message: String,
}

#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

#[derive(Debug, Default)]
struct StreamState {
    usage: Usage,
    calls: BTreeMap<usize, PendingCall>,
    /// Set by a `finish_reason` or the `[DONE]` sentinel.
    finished: bool,
}

impl StreamState {
    fn handle(&mut self, chunk: CompletionChunk) -> Vec<StreamChunk> {
        if let Some(u) = chunk.usage {
            self.usage = Usage::new(u.prompt_tokens, u.completion_tokens);
        }
        let mut out = Vec::new();
        for choice in chunk.choices {
            // `reasoning_content` (DeepSeek) is not captured by `Delta`.
            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                out.push(StreamChunk::text(text));
            }
            for call in choice.delta.tool_calls {
                let pending = self.calls.entry(call.index).or_default();
                if let Some(id) = call.id {
                    pending.id = id;
                }
                if let Some(f) = call.function {
                    if let Some(name) = f.name {
                        pending.name.push_str(&name);
                    }
                    if let Some(args) = f.arguments {
                        pending.arguments.push_str(&args);
                    }
                }
            }
            if choice.finish_reason.is_some() {
                self.finished = true;
                out.extend(self.flush_tools());
            }
        }
        out
    }

    /// Emit accumulated tool calls in index order.
    fn flush_tools(&mut self) -> Vec<StreamChunk> {
        std::mem::take(&mut self.calls)
            .into_values()
            .map(|call| {
                let input = if call.arguments.trim().is_empty() {
                    Ok(json!({}))
                } else {
                    serde_json::from_str::<Value>(&call.arguments)
                };
                match input {
                    Ok(input) => StreamChunk::ToolUse {
                        id: call.id,
                        name: call.name,
                        input,
                    },
                    Err(e) => StreamChunk::error(format!(
                        "invalid arguments for tool '{}': {e}",
                        call.name
                    )),
                }
            })
            .collect()
    }
}
