//! Core of the business-analyst chat service.
//!
//! Holds the vendor-neutral stream protocol every backend adapter speaks, the
//! per-turn tool-execution loop, and the small pieces they share: the message
//! model, request context, session registry, sideband markers and config.
//! Transport (HTTP/SSE) and the concrete vendor adapters live in other crates.

pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod message;
pub mod orchestrator;
pub mod prompt;
pub mod session;
pub mod sideband;
pub mod store;
pub mod stream;
pub mod tokens;
pub mod tools;

pub use context::{DocumentStore, RequestContext};
pub use error::{ChatError, Result};
pub use event::ChatEvent;
pub use message::{Message, ToolCall, ToolDefinition};
pub use orchestrator::ChatOrchestrator;
pub use session::{SessionRegistry, SessionToken};
pub use stream::{AdapterMode, ChatAdapter, ChunkStream, StreamChunk, StreamRequest, Usage};
