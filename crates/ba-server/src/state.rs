use std::sync::Arc;

use ba_core::config::Config;
use ba_core::{ChatAdapter, ChatOrchestrator, DocumentStore, SessionRegistry};
use ba_llm::Backend;
use claude_agent::ProcessPool;

use crate::heartbeat::HeartbeatConfig;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: ChatOrchestrator,
    pub store: Arc<dyn DocumentStore>,
    pub sessions: SessionRegistry,
    pub heartbeat: HeartbeatConfig,
    /// Present only for the CLI backend.
    pub pool: Option<Arc<ProcessPool>>,
}

impl AppState {
    /// Build the configured backend. The pool, if any, is not started.
    pub fn from_config(config: &Config, store: Arc<dyn DocumentStore>) -> ba_llm::Result<Self> {
        let sessions = SessionRegistry::new();
        let backend = Backend::from_config(config, &sessions)?;
        let mut state = Self::with_adapter(config, store, sessions, backend.adapter);
        state.pool = backend.pool;
        Ok(state)
    }

    /// State around an already-built adapter. `sessions` must be the registry
    /// the adapter's tool callbacks resolve against.
    pub fn with_adapter(
        config: &Config,
        store: Arc<dyn DocumentStore>,
        sessions: SessionRegistry,
        adapter: Arc<dyn ChatAdapter>,
    ) -> Self {
        Self {
            orchestrator: ChatOrchestrator::new(adapter, sessions.clone(), config.limits.clone()),
            store,
            sessions,
            heartbeat: HeartbeatConfig::from(&config.heartbeat),
            pool: None,
        }
    }
}
