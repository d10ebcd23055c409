use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ─── Outer Message enum ───────────────────────────────────────────────────

/// One line of `claude --output-format stream-json`, discriminated by `type`.
///
/// Only the shapes the chat adapter acts on are modelled in full. Everything
/// else (`stream_event`, `tool_progress`, `rate_limit_event`, future types)
/// lands in [`Message::Unknown`] and is ignored.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    System(SystemMessage),
    Assistant(AssistantMessage),
    User(UserMessage),
    Result(ResultMessage),
    #[serde(other)]
    Unknown,
}

// ─── System messages ──────────────────────────────────────────────────────

/// `type = "system"`. Informational only (init, status, compaction).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemMessage {
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub model: Option<String>,
}

// ─── Assistant messages ───────────────────────────────────────────────────

/// `type = "assistant"`: one model response with its content blocks.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssistantMessage {
    pub message: AssistantContent,
    #[serde(default)]
    pub parent_tool_use_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub session_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssistantContent {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        /// Tool inputs are schema-polymorphic (varies per tool), so Value is correct here.
        input: serde_json::Value,
    },
    Thinking {
        thinking: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

// ─── User messages ────────────────────────────────────────────────────────

/// `type = "user"`: tool results fed back to the model inside the CLI.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserMessage {
    pub message: UserContent,
    #[serde(default)]
    pub session_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserContent {
    #[serde(default)]
    pub content: UserBody,
}

/// The CLI sends either a bare string or a block list.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum UserBody {
    Text(String),
    Blocks(Vec<UserContentBlock>),
}

impl Default for UserBody {
    fn default() -> Self {
        UserBody::Blocks(Vec::new())
    }
}

impl UserBody {
    pub fn blocks(&self) -> &[UserContentBlock] {
        match self {
            UserBody::Text(_) => &[],
            UserBody::Blocks(b) => b,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserContentBlock {
    Text {
        text: String,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<ToolResultBody>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ToolResultBody {
    Text(String),
    Blocks(Vec<ToolResultContent>),
}

impl ToolResultBody {
    /// All text in the result, concatenated.
    pub fn text(&self) -> String {
        match self {
            ToolResultBody::Text(s) => s.clone(),
            ToolResultBody::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ToolResultContent::Text { text } => Some(text.as_str()),
                    ToolResultContent::Unknown => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResultContent {
    Text {
        text: String,
    },
    #[serde(other)]
    Unknown,
}

// ─── Result messages ──────────────────────────────────────────────────────

/// `type = "result"`: the terminal message in every query stream.
///
/// `subtype` distinguishes success from the various error conditions.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ResultMessage {
    Success(ResultSuccess),
    ErrorDuringExecution(ResultError),
    ErrorMaxTurns(ResultError),
    ErrorMaxBudgetUsd(ResultError),
}

impl ResultMessage {
    pub fn is_error(&self) -> bool {
        match self {
            ResultMessage::Success(r) => r.is_error,
            _ => true,
        }
    }

    /// The final result text. `None` for error subtypes.
    pub fn result_text(&self) -> Option<&str> {
        if let ResultMessage::Success(r) = self {
            Some(&r.result)
        } else {
            None
        }
    }

    pub fn usage(&self) -> &TokenUsage {
        match self {
            ResultMessage::Success(r) => &r.usage,
            ResultMessage::ErrorDuringExecution(r)
            | ResultMessage::ErrorMaxTurns(r)
            | ResultMessage::ErrorMaxBudgetUsd(r) => &r.usage,
        }
    }

    /// Human-readable reason for an error result.
    pub fn error_message(&self) -> Option<String> {
        let (label, errors) = match self {
            ResultMessage::Success(r) if r.is_error => return Some(r.result.clone()),
            ResultMessage::Success(_) => return None,
            ResultMessage::ErrorDuringExecution(r) => ("error during execution", &r.errors),
            ResultMessage::ErrorMaxTurns(r) => ("agent hit its turn limit", &r.errors),
            ResultMessage::ErrorMaxBudgetUsd(r) => ("agent hit its budget limit", &r.errors),
        };
        Some(if errors.is_empty() {
            label.to_string()
        } else {
            format!("{label}: {}", errors.join("; "))
        })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResultSuccess {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub num_turns: u32,
    #[serde(default)]
    pub total_cost_usd: f64,
    #[serde(default)]
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResultError {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub num_turns: u32,
    #[serde(default)]
    pub total_cost_usd: f64,
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(default)]
    pub errors: Vec<String>,
}

// ─── QueryOptions ─────────────────────────────────────────────────────────

/// How to launch the CLI. Fixed per pool: processes are spawned before the
/// prompt is known, so nothing prompt-specific belongs here.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Claude model name (e.g. `"sonnet"`)
    pub model: Option<String>,
    /// Maximum number of agentic turns before stopping with `error_max_turns`
    pub max_turns: Option<u32>,
    /// Tool names that are auto-approved without user prompting
    pub allowed_tools: Vec<String>,
    /// Tool names that are explicitly disallowed
    pub disallowed_tools: Vec<String>,
    pub permission_mode: PermissionMode,
    /// Working directory for the subprocess (default: current dir)
    pub cwd: Option<std::path::PathBuf>,
    /// Additional environment variables for the subprocess
    pub env: HashMap<String, String>,
    /// Custom path to the `claude` binary (default: `"claude"`)
    pub path_to_executable: Option<String>,
}

/// Permission mode. Controls how tool executions are authorized.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PermissionMode {
    #[default]
    Default,
    /// Don't prompt; deny if not pre-approved
    DontAsk,
}

impl PermissionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionMode::Default => "default",
            PermissionMode::DontAsk => "dontAsk",
        }
    }
}
