//! Google Gemini adapter.
//!
//! Plain conversations stream via `:streamGenerateContent?alt=sse`. When tools
//! are offered the request falls back to a single `:generateContent` call,
//! because streamed function calls arrive split across events with no stable
//! way to reassemble them.

use std::collections::HashMap;

use ba_core::message::{ContentBlock, Message, MessageContent, Role, ToolDefinition};
use ba_core::stream::{ChatAdapter, ChunkStream, StreamChunk, StreamRequest, Usage};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{ProviderError, Result};
use crate::http::{self, Endpoint};
use crate::retry::RetryPolicy;
use crate::sse;

const VENDOR: &str = "gemini";

#[derive(Debug, Clone)]
pub struct GeminiAdapter {
    client: reqwest::Client,
    endpoint: Endpoint,
    retry: RetryPolicy,
}

impl GeminiAdapter {
    pub fn new(client: reqwest::Client, endpoint: Endpoint, retry: RetryPolicy) -> Self {
        Self {
            client,
            endpoint,
            retry,
        }
    }

    fn request_body(&self, request: &StreamRequest) -> Value {
        let mut body = json!({
            "contents": contents(&request.messages),
            "generationConfig": { "maxOutputTokens": request.max_tokens },
        });
        if !request.system_prompt.is_empty() {
            body["systemInstruction"] = json!({ "parts": [{ "text": request.system_prompt }] });
        }
        if let Some(tools) = request.tools.as_ref().filter(|t| !t.is_empty()) {
            body["tools"] = json!([{
                "functionDeclarations": tools.iter().map(function_declaration).collect::<Vec<_>>(),
            }]);
        }
        body
    }

    async fn send(&self, method: &str, body: &Value) -> Result<reqwest::Response> {
        let mut url = self
            .endpoint
            .url(&format!("/v1beta/models/{}:{method}", self.endpoint.model));
        if method == "streamGenerateContent" {
            url.push_str("?alt=sse");
        }
        let request = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.endpoint.api_key)
            .json(body);
        http::send(VENDOR, request).await
    }
}

/// Convert the conversation to Gemini `contents`. Tool results need the
/// function *name*, which Gemini keys on instead of a call id, so names are
/// looked up from earlier `tool_use` blocks.
fn contents(messages: &[Message]) -> Vec<Value> {
    let mut names: HashMap<&str, &str> = HashMap::new();
    for msg in messages {
        if let MessageContent::Blocks(blocks) = &msg.content {
            for block in blocks {
                if let ContentBlock::ToolUse { id, name, .. } = block {
                    names.insert(id, name);
                }
            }
        }
    }

    messages
        .iter()
        .filter_map(|msg| {
            let parts: Vec<Value> = match &msg.content {
                MessageContent::Text(text) => vec![json!({ "text": text })],
                MessageContent::Blocks(blocks) => blocks
                    .iter()
                    .filter_map(|block| match block {
                        ContentBlock::Text { text } => Some(json!({ "text": text })),
                        ContentBlock::ToolUse { name, input, .. } => {
                            Some(json!({ "functionCall": { "name": name, "args": input } }))
                        }
                        ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            ..
                        } => {
                            let name = names.get(tool_use_id.as_str()).copied().unwrap_or(tool_use_id);
                            Some(json!({
                                "functionResponse": {
                                    "name": name,
                                    "response": { "content": content },
                                }
                            }))
                        }
                        ContentBlock::Thinking { .. } => None,
                    })
                    .collect(),
            };
            if parts.is_empty() {
                return None;
            }
            let role = match msg.role {
                Role::User => "user",
                Role::Assistant => "model",
            };
            Some(json!({ "role": role, "parts": parts }))
        })
        .collect()
}

fn function_declaration(tool: &ToolDefinition) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "parameters": tool.input_schema,
    })
}

impl ChatAdapter for GeminiAdapter {
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
            let with_tools = request.tools.as_ref().is_some_and(|t| !t.is_empty());

            if with_tools {
                let response = match this.retry.run(VENDOR, || this.send("generateContent", &body)).await {
                    Ok(r) => r,
                    Err(e) => {
                        yield StreamChunk::error(e.to_string());
                        return;
                    }
                };
                let parsed = match response.json::<GenerateResponse>().await {
                    Ok(p) => p,
                    Err(e) => {
                        yield StreamChunk::error(ProviderError::Network(e).to_string());
                        return;
                    }
                };
                for chunk in one_shot_chunks(parsed, tool_use_count(&request.messages)) {
                    yield chunk;
                }
                return;
            }

            let response = match this.retry.run(VENDOR, || this.send("streamGenerateContent", &body)).await {
                Ok(r) => r,
                Err(e) => {
                    yield StreamChunk::error(e.to_string());
                    return;
                }
            };
            let mut events = Box::pin(sse::events(response));
            let mut usage = Usage::default();
            let mut finished = false;
            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(ev) => ev,
                    Err(e) => {
                        yield StreamChunk::error(e.to_string());
                        return;
                    }
                };
                let parsed: GenerateResponse = match serde_json::from_str(&event.data) {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping undecodable gemini event");
                        continue;
                    }
                };
                if let Some(err) = parsed.error {
                    yield StreamChunk::error(format!("gemini stream error ({}): {}", err.status, err.message));
                    return;
                }
                let text = parsed.text();
                finished |= parsed.candidates.iter().any(|c| c.finish_reason.is_some());
                if let Some(u) = parsed.usage_metadata {
                    usage = u.into();
                }
                if !text.is_empty() {
                    yield StreamChunk::text(text);
                }
            }
            if !finished {
                yield StreamChunk::error("gemini stream ended before a finish reason");
                return;
            }
            yield StreamChunk::complete(usage);
        })
    }
}

/// Number of `tool_use` blocks already in the conversation. Synthesized call
/// ids start here so they never collide with an earlier round's.
fn tool_use_count(messages: &[Message]) -> usize {
    messages
        .iter()
        .filter_map(|msg| match &msg.content {
            MessageContent::Blocks(blocks) => Some(blocks),
            MessageContent::Text(_) => None,
        })
        .flatten()
        .filter(|block| matches!(block, ContentBlock::ToolUse { .. }))
        .count()
}

/// Chunks for a non-streamed response: its text, then each function call,
/// then completion. Calls without a vendor id get `call_<n>`, counting from
/// `first_id`.
fn one_shot_chunks(response: GenerateResponse, first_id: usize) -> Vec<StreamChunk> {
    if let Some(err) = response.error {
        return vec![StreamChunk::error(format!(
            "gemini error ({}): {}",
            err.status, err.message
        ))];
    }
    let mut chunks = Vec::new();
    let text = response.text();
    if !text.is_empty() {
        chunks.push(StreamChunk::text(text));
    }
    let calls = response
        .candidates
        .iter()
        .take(1)
        .flat_map(|c| c.parts())
        .filter_map(|p| p.function_call.as_ref());
    for (n, call) in calls.enumerate() {
        chunks.push(StreamChunk::ToolUse {
            id: call
                .id
                .clone()
                .unwrap_or_else(|| format!("call_{}", first_id + n)),
            name: call.name.clone(),
            input: call.args.clone().unwrap_or_else(|| json!({})),
        });
    }
    let usage = response.usage_metadata.map(Usage::from).unwrap_or_default();
    chunks.push(StreamChunk::complete(usage));
    chunks
}

// ─── Wire types ───────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    error: Option<WireError>,
}

impl GenerateResponse {
    /// Visible text of the first candidate; thought parts are excluded.
    fn text(&self) -> String {
        self.candidates
            .iter()
            .take(1)
            .flat_map(|c| c.parts())
            .filter(|p| !p.thought)
            .filter_map(|p| p.text.as_deref())
            .collect()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

impl Candidate {
    fn parts(&self) -> impl Iterator<Item = &Part> {
        self.content.iter().flat_map(|c| c.parts.iter())
    }
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: bool,
    #[serde(default)]
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    args: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

impl From<UsageMetadata> for Usage {
    fn from(u: UsageMetadata) -> Self {
        Usage::new(u.prompt_token_count, u.candidates_token_count)
    }
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
}
