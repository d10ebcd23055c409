use serde::Deserialize;
use serde_json::json;

use crate::context::{ArtifactCreated, ArtifactType, DocumentRef, RequestContext};
use crate::message::{ToolCall, ToolDefinition, ToolResult};
use crate::sideband;
use crate::{ChatError, Result};

pub const SEARCH_DOCUMENTS: &str = "search_documents";
pub const SAVE_ARTIFACT: &str = "save_artifact";

/// Tools offered to every backend.
pub fn definitions() -> Vec<ToolDefinition> {
    let artifact_types: Vec<&str> = ArtifactType::ALL.iter().map(|t| t.as_str()).collect();
    vec![
        ToolDefinition {
            name: SEARCH_DOCUMENTS.into(),
            description: "Search the project's uploaded documents for passages relevant to a \
                          query. Use this before answering questions about the project."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Search terms"}
                },
                "required": ["query"]
            }),
        },
        ToolDefinition {
            name: SAVE_ARTIFACT.into(),
            description: "Save a finished deliverable (BRD, user stories, acceptance criteria, \
                          requirements document) to the thread. Call once per deliverable."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "artifact_type": {"type": "string", "enum": artifact_types},
                    "title": {"type": "string"},
                    "content": {"type": "string", "description": "Markdown body"}
                },
                "required": ["artifact_type", "title", "content"]
            }),
        },
    ]
}

/// Human-readable status shown while a tool runs.
pub fn status_for(name: &str) -> String {
    match name {
        SEARCH_DOCUMENTS => "Searching project documents...".to_string(),
        SAVE_ARTIFACT => "Generating artifact...".to_string(),
        other => format!("Running {other}..."),
    }
}

#[derive(Debug, Deserialize)]
struct SearchInput {
    query: String,
}

#[derive(Debug, Deserialize)]
struct SaveArtifactInput {
    artifact_type: String,
    title: String,
    content: String,
}

/// Result of one tool call on the direct-API path.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub result: ToolResult,
    /// Set when a save succeeded; ends the tool loop.
    pub artifact: Option<ArtifactCreated>,
}

/// What one tool call produced.
struct Ran {
    text: String,
    artifact: Option<ArtifactCreated>,
    /// Documents this call's search returned.
    documents: Vec<DocumentRef>,
}

impl Ran {
    fn text(text: String) -> Self {
        Ran {
            text,
            artifact: None,
            documents: Vec::new(),
        }
    }
}

/// Execute `call` against the turn's collaborators.
///
/// Never fails: any error becomes an `is_error` result for the model to read.
pub async fn execute(ctx: &RequestContext, call: &ToolCall) -> ToolOutcome {
    tracing::info!(tool = %call.name, thread = %ctx.thread_id(), "executing tool");
    match run(ctx, &call.name, &call.input).await {
        Ok(ran) => ToolOutcome {
            result: ToolResult {
                tool_use_id: call.id.clone(),
                content: ran.text,
                is_error: false,
            },
            artifact: ran.artifact,
        },
        Err(e) => {
            tracing::warn!(tool = %call.name, error = %e, "tool failed");
            ToolOutcome {
                result: ToolResult {
                    tool_use_id: call.id.clone(),
                    content: format!("Error: {e}"),
                    is_error: true,
                },
                artifact: None,
            }
        }
    }
}

/// Execute a tool for an agent-mode backend.
///
/// Returns plain text with sideband markers appended, since that text is all
/// that crosses the boundary. Results are also recorded in `ctx`.
pub async fn execute_for_agent(
    ctx: &RequestContext,
    name: &str,
    input: &serde_json::Value,
) -> Result<String> {
    tracing::info!(tool = %name, thread = %ctx.thread_id(), "executing agent tool");
    let ran = run(ctx, name, input).await?;
    let mut text = ran.text;
    if !ran.documents.is_empty() {
        text.push('\n');
        text.push_str(&sideband::documents_marker(&ran.documents)?);
    }
    if let Some(a) = &ran.artifact {
        text.push('\n');
        text.push_str(&sideband::artifact_marker(a)?);
    }
    Ok(text)
}

async fn run(
    ctx: &RequestContext,
    name: &str,
    input: &serde_json::Value,
) -> Result<Ran> {
    match name {
        SEARCH_DOCUMENTS => {
            let input: SearchInput = parse_input(name, input)?;
            let hits = ctx
                .store()
                .search_documents(ctx.project_id(), &input.query)
                .await?;
            if hits.is_empty() {
                return Ok(Ran::text(format!("No documents matched '{}'.", input.query)));
            }
            let mut out = format!("Found {} relevant passages:\n", hits.len());
            for (i, hit) in hits.iter().enumerate() {
                out.push_str(&format!("\n[{}] {}\n{}\n", i + 1, hit.filename, hit.snippet));
            }
            let documents: Vec<_> = hits.iter().map(|h| h.to_ref()).collect();
            ctx.record_documents(&documents);
            Ok(Ran {
                documents,
                ..Ran::text(out)
            })
        }
        SAVE_ARTIFACT => {
            let input: SaveArtifactInput = parse_input(name, input)?;
            let artifact_type =
                ArtifactType::parse(&input.artifact_type).ok_or_else(|| {
                    ChatError::InvalidToolInput {
                        tool: name.to_string(),
                        reason: format!("unknown artifact_type '{}'", input.artifact_type),
                    }
                })?;
            if input.title.trim().is_empty() || input.content.trim().is_empty() {
                return Err(ChatError::InvalidToolInput {
                    tool: name.to_string(),
                    reason: "title and content must not be empty".into(),
                });
            }
            let artifact = ctx
                .store()
                .save_artifact(ctx.thread_id(), artifact_type, &input.title, &input.content)
                .await?;
            let created = ArtifactCreated::from(&artifact);
            ctx.record_artifact(created.clone());
            let text = format!(
                "Artifact saved: '{}' ({}). It is now visible to the user. The task is \
                 complete; do not save it again.",
                created.title, created.artifact_type
            );
            Ok(Ran {
                artifact: Some(created),
                ..Ran::text(text)
            })
        }
        other => Err(ChatError::UnknownTool(other.to_string())),
    }
}

fn parse_input<T: serde::de::DeserializeOwned>(tool: &str, input: &serde_json::Value) -> Result<T> {
    serde_json::from_value(input.clone()).map_err(|e| ChatError::InvalidToolInput {
        tool: tool.to_string(),
        reason: e.to_string(),
    })
}
