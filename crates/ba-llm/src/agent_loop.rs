//! In-process agent mode: an inner direct adapter driven by a loop that
//! executes registered tool functions itself.
//!
//! The caller only forwards events. Tool functions receive the turn's
//! session token and resolve their context through the session registry,
//! exactly as an out-of-process agent would over HTTP.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ba_core::message::{Message, ToolCall, ToolDefinition, ToolResult};
use ba_core::session::{SessionRegistry, SessionToken};
use ba_core::stream::{
    guard_terminal, AdapterMode, ChatAdapter, ChunkStream, CompletionMetadata, StreamChunk,
    StreamRequest, Usage,
};
use ba_core::{sideband, tools};
use futures::StreamExt;
use serde_json::Value;

/// A function the agent loop may call on the model's behalf.
#[async_trait]
pub trait AgentTool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    /// Returns the text fed back to the model; `Err` is fed back as an error
    /// result rather than ending the turn.
    async fn call(&self, session: &SessionToken, input: Value) -> Result<String, String>;
}

/// Registered tool functions, keyed by name.
#[derive(Clone, Default)]
pub struct AgentToolbox {
    tools: HashMap<String, Arc<dyn AgentTool>>,
}

impl AgentToolbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard tools, resolving each call's context from `sessions`.
    pub fn for_sessions(sessions: SessionRegistry) -> Self {
        let mut toolbox = Self::new();
        for definition in tools::definitions() {
            toolbox.register(SessionTool {
                definition,
                sessions: sessions.clone(),
            });
        }
        toolbox
    }

    pub fn register(&mut self, tool: impl AgentTool + 'static) {
        self.tools.insert(tool.definition().name, Arc::new(tool));
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<_> = self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub async fn call(&self, session: &SessionToken, name: &str, input: Value) -> Result<String, String> {
        match self.tools.get(name) {
            Some(tool) => tool.call(session, input).await,
            None => Err(format!("unknown tool: {name}")),
        }
    }
}

struct SessionTool {
    definition: ToolDefinition,
    sessions: SessionRegistry,
}

#[async_trait]
impl AgentTool for SessionTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn call(&self, session: &SessionToken, input: Value) -> Result<String, String> {
        let ctx = self
            .sessions
            .lookup(session)
            .ok_or_else(|| format!("session not found: {session}"))?;
        tools::execute_for_agent(&ctx, &self.definition.name, &input)
            .await
            .map_err(|e| e.to_string())
    }
}

pub struct AgentLoopAdapter {
    inner: Arc<dyn ChatAdapter>,
    toolbox: AgentToolbox,
    max_turns: usize,
}

impl AgentLoopAdapter {
    pub fn new(inner: Arc<dyn ChatAdapter>, toolbox: AgentToolbox, max_turns: usize) -> Self {
        Self {
            inner,
            toolbox,
            max_turns,
        }
    }
}

impl ChatAdapter for AgentLoopAdapter {
    fn name(&self) -> &str {
        "agent_loop"
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    fn mode(&self) -> AdapterMode {
        AdapterMode::Agent
    }

    fn stream(&self, request: StreamRequest) -> ChunkStream {
        let inner = Arc::clone(&self.inner);
        let toolbox = self.toolbox.clone();
        let max_turns = self.max_turns;
        Box::pin(async_stream::stream! {
            let Some(session) = request.session.clone() else {
                yield StreamChunk::error("agent loop requires a session token");
                return;
            };
            let definitions = toolbox.definitions();
            let mut messages = request.messages;
            let mut usage = Usage::default();
            let mut metadata = CompletionMetadata::default();

            for turn in 1..=max_turns {
                let mut chunks = guard_terminal(inner.stream(StreamRequest {
                    messages: messages.clone(),
                    system_prompt: request.system_prompt.clone(),
                    tools: Some(definitions.clone()),
                    max_tokens: request.max_tokens,
                    session: None,
                }));
                let mut text = String::new();
                let mut calls: Vec<ToolCall> = Vec::new();
                while let Some(chunk) = chunks.next().await {
                    match chunk {
                        StreamChunk::Text { content } => {
                            text.push_str(&content);
                            yield StreamChunk::Text { content };
                        }
                        StreamChunk::ToolUse { id, name, input } => {
                            yield StreamChunk::ToolUse {
                                id: id.clone(),
                                name: name.clone(),
                                input: input.clone(),
                            };
                            calls.push(ToolCall { id, name, input });
                        }
                        StreamChunk::Complete { usage: u, .. } => usage += u,
                        StreamChunk::Error { message } => {
                            yield StreamChunk::Error { message };
                            return;
                        }
                    }
                }

                if calls.is_empty() {
                    yield StreamChunk::Complete { usage, metadata };
                    return;
                }

                tracing::debug!(turn, calls = calls.len(), "agent loop executing tools");
                let mut results = Vec::with_capacity(calls.len());
                for call in &calls {
                    let result = match toolbox.call(&session, &call.name, call.input.clone()).await {
                        Ok(content) => {
                            sideband::promote(&content, &mut metadata);
                            ToolResult {
                                tool_use_id: call.id.clone(),
                                content,
                                is_error: false,
                            }
                        }
                        Err(e) => {
                            tracing::warn!(tool = %call.name, error = %e, "agent tool failed");
                            ToolResult {
                                tool_use_id: call.id.clone(),
                                content: format!("Error: {e}"),
                                is_error: true,
                            }
                        }
                    };
                    results.push(result);
                }
                messages.push(Message::assistant_with_tools(&text, &calls));
                messages.push(Message::tool_results(&results));
            }

            yield StreamChunk::error(format!("agent exceeded {max_turns} turns"));
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ba_core::context::RequestContext;
    use ba_core::message::{ContentBlock, MessageContent};
    use ba_core::store::InMemoryStore;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Direct adapter replaying one scripted round per call and recording
    /// the requests it saw.
    #[derive(Default)]
    struct Scripted {
        rounds: Mutex<VecDeque<Vec<StreamChunk>>>,
        requests: Mutex<Vec<StreamRequest>>,
    }

    impl Scripted {
        fn new(rounds: Vec<Vec<StreamChunk>>) -> Arc<Self> {
            Arc::new(Self {
                rounds: Mutex::new(rounds.into()),
                requests: Mutex::default(),
            })
        }
    }

    impl ChatAdapter for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }
        fn model(&self) -> &str {
            "scripted-1"
        }
        fn stream(&self, request: StreamRequest) -> ChunkStream {
            self.requests.lock().unwrap().push(request);
            let round = self.rounds.lock().unwrap().pop_front().unwrap_or_default();
            Box::pin(futures::stream::iter(round))
        }
    }

    fn search_call(query: &str) -> StreamChunk {
        StreamChunk::ToolUse {
            id: "tu_1".into(),
            name: tools::SEARCH_DOCUMENTS.into(),
            input: json!({ "query": query }),
        }
    }

    fn request(session: Option<SessionToken>) -> StreamRequest {
        StreamRequest {
            messages: vec![Message::user("what are the KPIs?")],
            system_prompt: "sys".into(),
            tools: Some(tools::definitions()),
            max_tokens: 100,
            session,
        }
    }

    fn setup() -> (SessionRegistry, RequestContext) {
        let store = Arc::new(InMemoryStore::new());
        store.add_document("p1", "kpis.md", "Primary KPI: monthly churn below 2%.");
        let ctx = RequestContext::new(store, "p1", "t1");
        (SessionRegistry::new(), ctx)
    }

    #[tokio::test]
    async fn runs_tools_and_promotes_markers() {
        let (sessions, ctx) = setup();
        let guard = sessions.register(ctx.clone());
        let inner = Scripted::new(vec![
            vec![
                StreamChunk::text("Checking."),
                search_call("churn"),
                StreamChunk::complete(Usage::new(10, 3)),
            ],
            vec![
                StreamChunk::text("Churn must stay below 2%."),
                StreamChunk::complete(Usage::new(20, 6)),
            ],
        ]);
        let adapter = AgentLoopAdapter::new(inner.clone(), AgentToolbox::for_sessions(sessions.clone()), 5);

        let chunks: Vec<_> = adapter.stream(request(Some(guard.token().clone()))).collect().await;

        assert_eq!(chunks.len(), 4);
        assert!(matches!(&chunks[1], StreamChunk::ToolUse { name, .. } if name == tools::SEARCH_DOCUMENTS));
        let StreamChunk::Complete { usage, metadata } = &chunks[3] else {
            panic!("expected completion, got {:?}", chunks[3])
        };
        assert_eq!(*usage, Usage::new(30, 9));
        assert_eq!(metadata.documents_used.len(), 1);
        assert_eq!(metadata.documents_used[0].filename, "kpis.md");

        let requests = inner.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].session.is_none());
        let MessageContent::Blocks(blocks) = &requests[1].messages[2].content else {
            panic!("expected tool results")
        };
        assert!(matches!(&blocks[0], ContentBlock::ToolResult { content, is_error: false, .. }
            if content.contains("kpis.md")));
    }

    #[tokio::test]
    async fn unknown_session_is_fed_back_as_tool_error() {
        let (sessions, _ctx) = setup();
        let inner = Scripted::new(vec![
            vec![search_call("churn"), StreamChunk::complete(Usage::default())],
            vec![StreamChunk::text("Sorry."), StreamChunk::complete(Usage::default())],
        ]);
        let adapter = AgentLoopAdapter::new(inner.clone(), AgentToolbox::for_sessions(sessions), 5);

        let chunks: Vec<_> = adapter.stream(request(Some("stale".into()))).collect().await;
        assert!(matches!(chunks.last(), Some(StreamChunk::Complete { .. })));
        let requests = inner.requests.lock().unwrap();
        let MessageContent::Blocks(blocks) = &requests[1].messages[2].content else {
            panic!("expected tool results")
        };
        assert!(matches!(&blocks[0], ContentBlock::ToolResult { content, is_error: true, .. }
            if content.contains("session not found")));
    }

    #[tokio::test]
    async fn turn_cap_ends_with_error() {
        let (sessions, ctx) = setup();
        let guard = sessions.register(ctx);
        let inner = Scripted::new(vec![
            vec![search_call("a"), StreamChunk::complete(Usage::default())],
            vec![search_call("b"), StreamChunk::complete(Usage::default())],
        ]);
        let adapter = AgentLoopAdapter::new(inner, AgentToolbox::for_sessions(sessions.clone()), 2);

        let chunks: Vec<_> = adapter.stream(request(Some(guard.token().clone()))).collect().await;
        assert!(matches!(chunks.last(), Some(StreamChunk::Error { message }) if message == "agent exceeded 2 turns"));
    }

    #[tokio::test]
    async fn missing_session_is_an_error() {
        let adapter = AgentLoopAdapter::new(Scripted::new(vec![]), AgentToolbox::new(), 3);
        let chunks: Vec<_> = adapter.stream(request(None)).collect().await;
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_terminal());
    }

    #[tokio::test]
    async fn inner_error_is_forwarded() {
        let inner = Scripted::new(vec![vec![StreamChunk::error("anthropic returned HTTP 429: slow down")]]);
        let adapter = AgentLoopAdapter::new(inner, AgentToolbox::new(), 3);
        let chunks: Vec<_> = adapter.stream(request(Some("t".into()))).collect().await;
        assert_eq!(chunks, vec![StreamChunk::error("anthropic returned HTTP 429: slow down")]);
    }

    #[test]
    fn toolbox_lists_standard_tools() {
        let names: Vec<_> = AgentToolbox::for_sessions(SessionRegistry::new())
            .definitions()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec![tools::SAVE_ARTIFACT, tools::SEARCH_DOCUMENTS]);
    }
}
