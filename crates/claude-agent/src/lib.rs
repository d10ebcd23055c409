//! `claude-agent`: native Rust driver for the Claude CLI subprocess.
//!
//! Speaks the `--output-format stream-json` protocol and keeps a warm pool of
//! pre-spawned CLI processes so a chat turn does not pay the cold-start cost.
//!
//! # Architecture
//!
//! ```text
//! QueryOptions
//!     │
//!     ▼
//! ProcessPool     ← keeps N `claude -p --output-format stream-json …`
//!     │              processes idle with stdin open; refills in background
//!     ▼
//! ClaudeProcess   ← prompt written to stdin, stdin closed,
//!     │              JSONL read from stdout, stderr captured
//!     ▼
//! QueryStream     ← implements futures::Stream<Item = Result<Message>>
//!     │              background task + mpsc channel
//!     ▼
//! Message enum    ← typed by `type`; unknown types ignored
//! ```
//!
//! # Quick start
//!
//! ```rust,ignore
//! use claude_agent::{query, CliSpawner, Message, PoolOptions, ProcessPool, QueryOptions};
//! use futures::StreamExt;
//!
//! let pool = ProcessPool::new(CliSpawner::new(QueryOptions::default()), PoolOptions::default());
//! pool.start(2);
//! let mut stream = query(&pool, "Summarize the billing scope.")?;
//! while let Some(msg) = stream.next().await {
//!     if let Message::Result(r) = msg? {
//!         println!("{}", r.result_text().unwrap_or(""));
//!     }
//! }
//! pool.stop().await;
//! ```

pub mod error;
pub mod pool;
pub mod process;
pub mod stream;
pub mod types;


pub use error::ClaudeAgentError;
pub use pool::{CliSpawner, PoolOptions, ProcessPool, Spawner};
pub use process::ClaudeProcess;
pub use stream::QueryStream;
pub use types::{
    AssistantContent, AssistantMessage, ContentBlock, Message, PermissionMode, QueryOptions,
    ResultMessage, SystemMessage, TokenUsage, ToolResultBody, UserContentBlock, UserMessage,
};

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, ClaudeAgentError>;

/// Run one prompt on a process taken from `pool`.
///
/// The stream terminates after the first [`Message::Result`] or on process
/// exit. Fails only if the pool had to cold-spawn and that spawn failed.
pub fn query(pool: &ProcessPool, prompt: impl Into<String>) -> Result<QueryStream> {
    let process = pool.acquire()?;
    Ok(QueryStream::new(process, prompt.into()))
}
