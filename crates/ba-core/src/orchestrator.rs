//! Per-turn tool-execution loop.
//!
//! Direct-mode adapters return tool calls; the orchestrator executes them,
//! appends the results to the history and calls the adapter again, one round
//! at a time. Agent-mode adapters execute tools themselves, so their turn is
//! a single delegated call whose events are forwarded.
//!
//! Whatever happens inside, a turn's event stream ends with exactly one
//! `message_complete` or one `error`.

use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};

use crate::config::LimitsConfig;
use crate::context::RequestContext;
use crate::event::ChatEvent;
use crate::message::{Message, ToolCall};
use crate::session::SessionRegistry;
use crate::stream::{
    guard_terminal, AdapterMode, ChatAdapter, CompletionMetadata, StreamChunk, StreamRequest,
    Usage,
};
use crate::tokens::estimate_tokens;
use crate::tools;
use crate::ChatError;

pub type EventStream = Pin<Box<dyn Stream<Item = ChatEvent> + Send>>;

#[derive(Clone)]
pub struct ChatOrchestrator {
    adapter: Arc<dyn ChatAdapter>,
    sessions: SessionRegistry,
    limits: LimitsConfig,
}

impl ChatOrchestrator {
    pub fn new(adapter: Arc<dyn ChatAdapter>, sessions: SessionRegistry, limits: LimitsConfig) -> Self {
        Self {
            adapter,
            sessions,
            limits,
        }
    }

    pub fn adapter(&self) -> &Arc<dyn ChatAdapter> {
        &self.adapter
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Run one chat turn. Lazy: nothing happens until the stream is polled.
    pub fn run_turn(
        &self,
        ctx: RequestContext,
        messages: Vec<Message>,
        system_prompt: String,
    ) -> EventStream {
        let this = self.clone();
        Box::pin(async_stream::stream! {
            let estimated = estimate_tokens(&system_prompt, &messages);
            let ceiling = this.limits.emergency_token_ceiling;
            if estimated > ceiling {
                tracing::warn!(
                    thread = %ctx.thread_id(),
                    estimated,
                    ceiling,
                    "token ceiling exceeded, refusing turn"
                );
                yield ChatEvent::error(ChatError::TokenCeiling { estimated, ceiling }.to_string());
                return;
            }

            tracing::info!(
                thread = %ctx.thread_id(),
                adapter = this.adapter.name(),
                model = this.adapter.model(),
                estimated_tokens = estimated,
                "starting chat turn"
            );

            let mut events = match this.adapter.mode() {
                AdapterMode::Direct => this.direct_turn(ctx, messages, system_prompt),
                AdapterMode::Agent => this.agent_turn(ctx, messages, system_prompt),
            };
            while let Some(event) = events.next().await {
                let terminal = event.is_terminal();
                yield event;
                if terminal {
                    return;
                }
            }
            yield ChatEvent::error("turn ended without a completion");
        })
    }

    fn direct_turn(
        &self,
        ctx: RequestContext,
        messages: Vec<Message>,
        system_prompt: String,
    ) -> EventStream {
        let adapter = Arc::clone(&self.adapter);
        let limits = self.limits.clone();
        Box::pin(async_stream::stream! {
            let definitions = tools::definitions();
            let mut history = messages;
            let mut content = String::new();
            let mut usage = Usage::default();

            for round in 0..limits.max_tool_rounds {
                tracing::debug!(round, thread = %ctx.thread_id(), "tool loop round");
                let request = StreamRequest {
                    messages: history.clone(),
                    system_prompt: system_prompt.clone(),
                    tools: Some(definitions.clone()),
                    max_tokens: limits.max_tokens,
                    session: None,
                };

                let mut chunks = guard_terminal(adapter.stream(request));
                let mut round_text = String::new();
                let mut calls: Vec<ToolCall> = Vec::new();
                while let Some(chunk) = chunks.next().await {
                    match chunk {
                        StreamChunk::Text { content: delta } => {
                            round_text.push_str(&delta);
                            yield ChatEvent::TextDelta { text: delta };
                        }
                        StreamChunk::ToolUse { id, name, input } => {
                            calls.push(ToolCall { id, name, input });
                        }
                        StreamChunk::Complete { usage: u, metadata } => {
                            usage += u;
                            absorb(&ctx, metadata);
                        }
                        StreamChunk::Error { message } => {
                            tracing::warn!(thread = %ctx.thread_id(), error = %message, "adapter error");
                            yield ChatEvent::error(message);
                            return;
                        }
                    }
                }
                content.push_str(&round_text);

                if calls.is_empty() {
                    yield complete(&ctx, content, usage);
                    return;
                }

                history.push(Message::assistant_with_tools(&round_text, &calls));
                let mut results = Vec::with_capacity(calls.len());
                for call in &calls {
                    yield ChatEvent::ToolExecuting { status: tools::status_for(&call.name) };
                    let outcome = tools::execute(&ctx, call).await;
                    if let Some(artifact) = outcome.artifact {
                        // A saved artifact ends the turn; no further adapter calls.
                        yield ChatEvent::ArtifactCreated(artifact);
                        yield complete(&ctx, content, usage);
                        return;
                    }
                    results.push(outcome.result);
                }
                history.push(Message::tool_results(&results));
            }

            tracing::warn!(thread = %ctx.thread_id(), rounds = limits.max_tool_rounds, "tool loop cap reached");
            yield ChatEvent::error(ChatError::ToolLoopExceeded(limits.max_tool_rounds).to_string());
        })
    }

    fn agent_turn(
        &self,
        ctx: RequestContext,
        messages: Vec<Message>,
        system_prompt: String,
    ) -> EventStream {
        let adapter = Arc::clone(&self.adapter);
        let sessions = self.sessions.clone();
        let max_tokens = self.limits.max_tokens;
        Box::pin(async_stream::stream! {
            // Held until the generator is dropped, whichever way the turn ends.
            let guard = sessions.register(ctx.clone());
            let request = StreamRequest {
                messages,
                system_prompt,
                tools: Some(tools::definitions()),
                max_tokens,
                session: Some(guard.token().clone()),
            };

            let mut chunks = guard_terminal(adapter.stream(request));
            let mut content = String::new();
            while let Some(chunk) = chunks.next().await {
                match chunk {
                    StreamChunk::Text { content: delta } => {
                        content.push_str(&delta);
                        yield ChatEvent::TextDelta { text: delta };
                    }
                    StreamChunk::ToolUse { name, .. } => {
                        yield ChatEvent::ToolExecuting { status: tools::status_for(&name) };
                    }
                    StreamChunk::Complete { usage, metadata } => {
                        absorb(&ctx, metadata);
                        for artifact in ctx.artifacts_created() {
                            yield ChatEvent::ArtifactCreated(artifact);
                        }
                        yield complete(&ctx, content, usage);
                        return;
                    }
                    StreamChunk::Error { message } => {
                        tracing::warn!(thread = %ctx.thread_id(), error = %message, "agent adapter error");
                        yield ChatEvent::error(message);
                        return;
                    }
                }
            }
        })
    }
}

/// Fold adapter-reported metadata into the turn's ledger.
fn absorb(ctx: &RequestContext, metadata: CompletionMetadata) {
    ctx.record_documents(&metadata.documents_used);
    if let Some(artifact) = metadata.artifact_created {
        ctx.record_artifact(artifact);
    }
}

fn complete(ctx: &RequestContext, content: String, usage: Usage) -> ChatEvent {
    ChatEvent::MessageComplete {
        content,
        usage,
        documents_used: ctx.documents_used(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ArtifactType, DocumentRef};
    use crate::message::{ContentBlock, MessageContent};
    use crate::store::InMemoryStore;
    use crate::stream::ChunkStream;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays one scripted chunk list per call.
    struct ScriptedAdapter {
        mode: AdapterMode,
        rounds: Mutex<VecDeque<Vec<StreamChunk>>>,
        requests: Mutex<Vec<StreamRequest>>,
        calls: AtomicUsize,
        repeat_last: bool,
        sessions: Option<SessionRegistry>,
    }

    impl ScriptedAdapter {
        fn direct(rounds: Vec<Vec<StreamChunk>>) -> Self {
            Self {
                mode: AdapterMode::Direct,
                rounds: Mutex::new(rounds.into()),
                requests: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
                repeat_last: false,
                sessions: None,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ChatAdapter for ScriptedAdapter {
        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted-1"
        }

        fn mode(&self) -> AdapterMode {
            self.mode
        }

        fn stream(&self, request: StreamRequest) -> ChunkStream {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let (Some(sessions), Some(token)) = (&self.sessions, &request.session) {
                // Simulate a detached tool callback reporting through the registry.
                let ctx = sessions.lookup(token).unwrap();
                ctx.record_documents(&[DocumentRef {
                    id: "d7".into(),
                    filename: "interviews.md".into(),
                }]);
            }
            self.requests.lock().unwrap().push(request);
            let mut rounds = self.rounds.lock().unwrap();
            let chunks = if self.repeat_last && rounds.len() == 1 {
                rounds[0].clone()
            } else {
                rounds.pop_front().unwrap_or_default()
            };
            Box::pin(futures::stream::iter(chunks))
        }
    }

    fn ctx() -> (RequestContext, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        store.add_document("p1", "scope.md", "Refunds must be issued within 5 days.");
        (RequestContext::new(store.clone(), "p1", "t1"), store)
    }

    fn orchestrator(adapter: Arc<ScriptedAdapter>) -> ChatOrchestrator {
        ChatOrchestrator::new(adapter, SessionRegistry::new(), LimitsConfig::default())
    }

    fn tool_use(id: &str, name: &str, input: serde_json::Value) -> StreamChunk {
        StreamChunk::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    async fn run(orch: &ChatOrchestrator, ctx: RequestContext, text: &str) -> Vec<ChatEvent> {
        orch.run_turn(ctx, vec![Message::user(text)], "system".into())
            .collect()
            .await
    }

    #[tokio::test]
    async fn text_deltas_then_single_completion() {
        let adapter = Arc::new(ScriptedAdapter::direct(vec![vec![
            StreamChunk::text("Hello"),
            StreamChunk::text(" world"),
            StreamChunk::complete(Usage::new(10, 5)),
        ]]));
        let (ctx, _) = ctx();
        let events = run(&orchestrator(adapter.clone()), ctx, "hi").await;
        assert_eq!(
            events,
            vec![
                ChatEvent::TextDelta { text: "Hello".into() },
                ChatEvent::TextDelta { text: " world".into() },
                ChatEvent::MessageComplete {
                    content: "Hello world".into(),
                    usage: Usage::new(10, 5),
                    documents_used: vec![],
                },
            ]
        );
        assert_eq!(adapter.calls(), 1);
    }

    #[tokio::test]
    async fn adapter_error_becomes_single_error_event() {
        let adapter = Arc::new(ScriptedAdapter::direct(vec![vec![StreamChunk::error(
            "rate limit exceeded",
        )]]));
        let (ctx, _) = ctx();
        let events = run(&orchestrator(adapter), ctx, "hi").await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ChatEvent::Error { message } if message.contains("rate limit exceeded")));
    }

    #[tokio::test]
    async fn saved_artifact_short_circuits_the_loop() {
        let adapter = Arc::new(ScriptedAdapter::direct(vec![
            vec![
                tool_use(
                    "tu_1",
                    tools::SAVE_ARTIFACT,
                    json!({"artifact_type": "brd", "title": "Billing BRD", "content": "# BRD"}),
                ),
                StreamChunk::complete(Usage::new(20, 30)),
            ],
            vec![StreamChunk::text("should never be requested")],
        ]));
        let (ctx, store) = ctx();
        let events = run(&orchestrator(adapter.clone()), ctx, "write the BRD").await;

        let names: Vec<_> = events.iter().map(ChatEvent::name).collect();
        assert_eq!(names, vec!["tool_executing", "artifact_created", "message_complete"]);
        assert!(matches!(
            &events[1],
            ChatEvent::ArtifactCreated(a) if a.artifact_type == ArtifactType::Brd && a.title == "Billing BRD"
        ));
        assert_eq!(adapter.calls(), 1);
        assert_eq!(store.artifacts().len(), 1);
    }

    #[tokio::test]
    async fn token_ceiling_errors_before_any_adapter_call() {
        let adapter = Arc::new(ScriptedAdapter::direct(vec![vec![StreamChunk::text("x")]]));
        let limits = LimitsConfig {
            emergency_token_ceiling: 10,
            ..Default::default()
        };
        let orch = ChatOrchestrator::new(adapter.clone(), SessionRegistry::new(), limits);
        let (ctx, _) = ctx();
        let events = run(&orch, ctx, &"word ".repeat(100)).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ChatEvent::Error { message } if message.contains("token ceiling")));
        assert_eq!(adapter.calls(), 0);
    }

    #[tokio::test]
    async fn tool_results_feed_the_next_round() {
        let adapter = Arc::new(ScriptedAdapter::direct(vec![
            vec![
                StreamChunk::text("Checking. "),
                tool_use("tu_1", tools::SEARCH_DOCUMENTS, json!({"query": "refunds"})),
                StreamChunk::complete(Usage::new(10, 2)),
            ],
            vec![
                StreamChunk::text("Refunds take 5 days."),
                StreamChunk::complete(Usage::new(15, 6)),
            ],
        ]));
        let (ctx, _) = ctx();
        let events = run(&orchestrator(adapter.clone()), ctx, "refund policy?").await;

        let names: Vec<_> = events.iter().map(ChatEvent::name).collect();
        assert_eq!(
            names,
            vec!["text_delta", "tool_executing", "text_delta", "message_complete"]
        );
        let ChatEvent::MessageComplete {
            content,
            usage,
            documents_used,
        } = events.last().unwrap()
        else {
            panic!("expected completion")
        };
        assert_eq!(content, "Checking. Refunds take 5 days.");
        assert_eq!(*usage, Usage::new(25, 8));
        assert_eq!(documents_used.len(), 1);
        assert_eq!(documents_used[0].filename, "scope.md");

        let requests = adapter.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let second = &requests[1].messages;
        assert_eq!(second.len(), 3);
        let MessageContent::Blocks(blocks) = &second[2].content else {
            panic!("expected tool results")
        };
        assert!(matches!(&blocks[0], ContentBlock::ToolResult { tool_use_id, is_error: false, .. } if tool_use_id == "tu_1"));
    }

    #[tokio::test]
    async fn failing_tool_is_reported_to_the_model() {
        let adapter = Arc::new(ScriptedAdapter::direct(vec![
            vec![
                tool_use("tu_1", "delete_project", json!({})),
                StreamChunk::complete(Usage::default()),
            ],
            vec![
                StreamChunk::text("I can't do that."),
                StreamChunk::complete(Usage::default()),
            ],
        ]));
        let (ctx, _) = ctx();
        let events = run(&orchestrator(adapter.clone()), ctx, "delete it").await;
        assert_eq!(events.last().map(ChatEvent::name), Some("message_complete"));

        let requests = adapter.requests.lock().unwrap();
        let MessageContent::Blocks(blocks) = &requests[1].messages[2].content else {
            panic!("expected tool results")
        };
        assert!(matches!(&blocks[0], ContentBlock::ToolResult { is_error: true, .. }));
    }

    #[tokio::test]
    async fn runaway_tool_loop_is_capped() {
        let mut adapter = ScriptedAdapter::direct(vec![vec![
            tool_use("tu_1", tools::SEARCH_DOCUMENTS, json!({"query": "x"})),
            StreamChunk::complete(Usage::default()),
        ]]);
        adapter.repeat_last = true;
        let adapter = Arc::new(adapter);
        let limits = LimitsConfig {
            max_tool_rounds: 2,
            ..Default::default()
        };
        let orch = ChatOrchestrator::new(adapter.clone(), SessionRegistry::new(), limits);
        let (ctx, _) = ctx();
        let events = run(&orch, ctx, "loop").await;
        assert!(matches!(events.last(), Some(ChatEvent::Error { message }) if message == "tool loop exceeded 2 rounds"));
        assert_eq!(adapter.calls(), 2);
    }

    #[tokio::test]
    async fn unterminated_adapter_stream_yields_error() {
        let adapter = Arc::new(ScriptedAdapter::direct(vec![vec![StreamChunk::text("partial")]]));
        let (ctx, _) = ctx();
        let events = run(&orchestrator(adapter), ctx, "hi").await;
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], ChatEvent::Error { .. }));
    }

    #[tokio::test]
    async fn agent_turn_registers_session_and_merges_ledger() {
        let sessions = SessionRegistry::new();
        let adapter = Arc::new(ScriptedAdapter {
            mode: AdapterMode::Agent,
            rounds: Mutex::new(
                vec![vec![
                    tool_use("tu_1", tools::SEARCH_DOCUMENTS, json!({"query": "x"})),
                    StreamChunk::text("Done."),
                    StreamChunk::complete(Usage::new(3, 4)),
                ]]
                .into(),
            ),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            repeat_last: false,
            sessions: Some(sessions.clone()),
        });
        let orch = ChatOrchestrator::new(adapter.clone(), sessions.clone(), LimitsConfig::default());
        let (ctx, _) = ctx();
        let events = run(&orch, ctx, "summarize interviews").await;

        let names: Vec<_> = events.iter().map(ChatEvent::name).collect();
        assert_eq!(names, vec!["tool_executing", "text_delta", "message_complete"]);
        let ChatEvent::MessageComplete { documents_used, .. } = &events[2] else {
            panic!("expected completion")
        };
        assert_eq!(documents_used[0].id, "d7");
        assert!(sessions.is_empty());
        assert!(adapter.requests.lock().unwrap()[0].session.is_some());
    }

    #[tokio::test]
    async fn dropping_agent_turn_early_unregisters_session() {
        let sessions = SessionRegistry::new();
        let adapter = Arc::new(ScriptedAdapter {
            mode: AdapterMode::Agent,
            rounds: Mutex::new(
                vec![vec![
                    StreamChunk::text("partial"),
                    StreamChunk::complete(Usage::default()),
                ]]
                .into(),
            ),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            repeat_last: false,
            sessions: None,
        });
        let orch = ChatOrchestrator::new(adapter, sessions.clone(), LimitsConfig::default());
        let (ctx, _) = ctx();
        let mut turn = orch.run_turn(ctx, vec![Message::user("hi")], String::new());
        assert!(turn.next().await.is_some());
        assert_eq!(sessions.len(), 1);
        drop(turn);
        assert!(sessions.is_empty());
    }
}
