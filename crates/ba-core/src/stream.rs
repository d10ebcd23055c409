//! Stream protocol shared by every backend adapter.
//!
//! An adapter turns one vendor call into a lazy sequence of [`StreamChunk`]s:
//! zero or more `Text`/`ToolUse` chunks followed by exactly one terminal
//! chunk (`Complete` or `Error`). Concatenating the `Text` contents yields the
//! full response text.

use std::pin::Pin;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::context::{ArtifactCreated, DocumentRef};
use crate::message::{Message, ToolDefinition};
use crate::session::SessionToken;

// ---------------------------------------------------------------------------
// StreamChunk
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }
}

impl std::ops::AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
    }
}

/// Out-of-band data carried by a `Complete` chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub documents_used: Vec<DocumentRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_created: Option<ArtifactCreated>,
}

impl CompletionMetadata {
    pub fn is_empty(&self) -> bool {
        self.documents_used.is_empty() && self.artifact_created.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    Text {
        content: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    Complete {
        usage: Usage,
        #[serde(default)]
        metadata: CompletionMetadata,
    },
    Error {
        message: String,
    },
}

impl StreamChunk {
    pub fn text(content: impl Into<String>) -> Self {
        StreamChunk::Text {
            content: content.into(),
        }
    }

    pub fn complete(usage: Usage) -> Self {
        StreamChunk::Complete {
            usage,
            metadata: CompletionMetadata::default(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamChunk::Error {
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamChunk::Complete { .. } | StreamChunk::Error { .. })
    }
}

// ---------------------------------------------------------------------------
// ChatAdapter
// ---------------------------------------------------------------------------

pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// Input to a single adapter call.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub messages: Vec<Message>,
    pub system_prompt: String,
    pub tools: Option<Vec<ToolDefinition>>,
    pub max_tokens: u32,
    /// Set for agent-mode adapters so their detached tool callbacks can find
    /// the turn's context in the session registry.
    pub session: Option<SessionToken>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterMode {
    /// Returns tool calls for the caller to execute.
    Direct,
    /// Executes tools itself; the caller forwards events only.
    Agent,
}

/// One backend. `stream` performs exactly one vendor call (agent-mode
/// adapters may loop internally) and must not do any work before the returned
/// stream is first polled.
pub trait ChatAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    fn mode(&self) -> AdapterMode {
        AdapterMode::Direct
    }

    fn stream(&self, request: StreamRequest) -> ChunkStream;
}

/// Enforce the single-terminal invariant on an arbitrary chunk stream.
///
/// Anything after the first terminal chunk is dropped. A stream that ends
/// without one gets a synthesized `Error`.
pub fn guard_terminal(inner: ChunkStream) -> ChunkStream {
    Box::pin(async_stream::stream! {
        let mut inner = inner;
        while let Some(chunk) = inner.next().await {
            let terminal = chunk.is_terminal();
            yield chunk;
            if terminal {
                return;
            }
        }
        yield StreamChunk::error("stream ended without a completion");
    })
}
