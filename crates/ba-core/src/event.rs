use serde::Serialize;
use serde_json::json;

use crate::context::{ArtifactCreated, DocumentRef};
use crate::stream::Usage;

/// Events the orchestrator emits for the transport layer to serialize.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ChatEvent {
    TextDelta {
        text: String,
    },
    ToolExecuting {
        status: String,
    },
    ArtifactCreated(ArtifactCreated),
    MessageComplete {
        content: String,
        usage: Usage,
        documents_used: Vec<DocumentRef>,
    },
    Error {
        message: String,
    },
}

impl ChatEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ChatEvent::Error {
            message: message.into(),
        }
    }

    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            ChatEvent::TextDelta { .. } => "text_delta",
            ChatEvent::ToolExecuting { .. } => "tool_executing",
            ChatEvent::ArtifactCreated(_) => "artifact_created",
            ChatEvent::MessageComplete { .. } => "message_complete",
            ChatEvent::Error { .. } => "error",
        }
    }

    /// JSON payload of the event.
    pub fn payload(&self) -> serde_json::Value {
        match self {
            ChatEvent::TextDelta { text } => json!({ "text": text }),
            ChatEvent::ToolExecuting { status } => json!({ "status": status }),
            ChatEvent::ArtifactCreated(a) => json!({
                "id": a.id,
                "artifact_type": a.artifact_type,
                "title": a.title,
            }),
            ChatEvent::MessageComplete {
                content,
                usage,
                documents_used,
            } => json!({
                "content": content,
                "usage": usage,
                "documents_used": documents_used,
            }),
            ChatEvent::Error { message } => json!({ "message": message }),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatEvent::MessageComplete { .. } | ChatEvent::Error { .. })
    }
}
