//! Out-of-process agent mode: one Claude CLI process per turn, taken from
//! the warm pool.
//!
//! The CLI has no structured way to call our tools, so the prompt declares a
//! contract: POST the tool input to the server's callback route with the
//! turn's session token. Tool results come back inside the CLI's own
//! `tool_result` blocks, which is where sideband markers are picked up.

use std::fmt::Write as _;
use std::sync::Arc;

use ba_core::message::{ContentBlock, Message, MessageContent, Role, ToolDefinition};
use ba_core::session::SessionToken;
use ba_core::sideband;
use ba_core::stream::{
    AdapterMode, ChatAdapter, ChunkStream, CompletionMetadata, StreamChunk, StreamRequest, Usage,
};
use claude_agent::{ContentBlock as CliBlock, Message as CliMessage, ProcessPool, UserContentBlock};
use futures::StreamExt;

pub struct ClaudeCliAdapter {
    pool: Arc<ProcessPool>,
    model: String,
    callback_base: String,
}

impl ClaudeCliAdapter {
    pub fn new(pool: Arc<ProcessPool>, model: impl Into<String>, callback_base: impl Into<String>) -> Self {
        Self {
            pool,
            model: model.into(),
            callback_base: callback_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn pool(&self) -> &Arc<ProcessPool> {
        &self.pool
    }
}

impl ChatAdapter for ClaudeCliAdapter {
    fn name(&self) -> &str {
        "claude_cli"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn mode(&self) -> AdapterMode {
        AdapterMode::Agent
    }

    fn stream(&self, request: StreamRequest) -> ChunkStream {
        let pool = Arc::clone(&self.pool);
        let callback_base = self.callback_base.clone();
        Box::pin(async_stream::stream! {
            let Some(session) = request.session.as_ref() else {
                yield StreamChunk::error("claude cli requires a session token");
                return;
            };
            let tools = request.tools.clone().unwrap_or_default();
            let prompt = render_prompt(&request, &tools, session, &callback_base);

            let mut messages = match claude_agent::query(&pool, prompt) {
                Ok(s) => s,
                Err(e) => {
                    yield StreamChunk::error(e.to_string());
                    return;
                }
            };

            let mut metadata = CompletionMetadata::default();
            while let Some(msg) = messages.next().await {
                let msg = match msg {
                    Ok(m) => m,
                    Err(e) => {
                        yield StreamChunk::error(e.to_string());
                        return;
                    }
                };
                match msg {
                    CliMessage::Assistant(a) => {
                        if let Some(err) = a.error {
                            tracing::warn!(error = %err, "claude cli reported an assistant error");
                        }
                        for block in a.message.content {
                            match block {
                                CliBlock::Text { text } if !text.is_empty() => {
                                    yield StreamChunk::text(text);
                                }
                                CliBlock::ToolUse { id, name, input } => {
                                    yield StreamChunk::ToolUse { id, name, input };
                                }
                                _ => {}
                            }
                        }
                    }
                    CliMessage::User(u) => {
                        for block in u.message.content.blocks() {
                            if let UserContentBlock::ToolResult { content: Some(body), .. } = block {
                                sideband::promote(&body.text(), &mut metadata);
                            }
                        }
                    }
                    CliMessage::Result(result) => {
                        if let Some(message) = result.error_message() {
                            yield StreamChunk::error(message);
                        } else {
                            let u = result.usage();
                            yield StreamChunk::Complete {
                                usage: Usage::new(u.input_tokens, u.output_tokens),
                                metadata,
                            };
                        }
                        return;
                    }
                    CliMessage::System(_) | CliMessage::Unknown => {}
                }
            }
            yield StreamChunk::error("claude cli exited without a result");
        })
    }
}

/// Everything the CLI sees for one turn: instructions, the tool contract and
/// the conversation so far.
fn render_prompt(
    request: &StreamRequest,
    tools: &[ToolDefinition],
    session: &SessionToken,
    callback_base: &str,
) -> String {
    let mut out = String::new();
    if !request.system_prompt.is_empty() {
        out.push_str(&request.system_prompt);
        out.push_str("\n\n");
    }

    if !tools.is_empty() {
        out.push_str("## Tools\n\n");
        out.push_str(
            "Call a tool by POSTing JSON with curl. The response body is the tool result.\n\n",
        );
        let _ = writeln!(
            out,
            "curl -s -X POST {callback_base}/api/agent-tools/<tool> \\\n  \
             -H 'content-type: application/json' \\\n  \
             -d '{{\"session\": \"{session}\", \"input\": {{...}}}}'\n"
        );
        out.push_str("Always pass the session value exactly as shown. Available tools:\n");
        for tool in tools {
            let _ = writeln!(out, "\n### {}\n{}\nInput schema: {}", tool.name, tool.description, tool.input_schema);
        }
        out.push('\n');
    }

    out.push_str("## Conversation\n");
    for msg in &request.messages {
        let label = match msg.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        let text = transcript_text(msg);
        if !text.is_empty() {
            let _ = write!(out, "\n{label}: {text}\n");
        }
    }
    out.push_str("\nRespond as the Assistant to the last User message.\n");
    out
}

fn transcript_text(msg: &Message) -> String {
    match &msg.content {
        MessageContent::Text(text) => text.clone(),
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.clone()),
                ContentBlock::ToolUse { name, input, .. } => Some(format!("[called {name} with {input}]")),
                ContentBlock::ToolResult { content, .. } => Some(format!("[tool result] {content}")),
                ContentBlock::Thinking { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}
