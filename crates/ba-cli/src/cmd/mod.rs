pub mod chat;
pub mod config;
pub mod serve;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use ba_core::config::Config;
use ba_core::store::InMemoryStore;

pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    Config::load(path).with_context(|| format!("failed to load config from {}", path.display()))
}

/// An in-memory store holding `docs` under `project_id`.
pub fn seed_store(project_id: &str, docs: &[PathBuf]) -> anyhow::Result<Arc<InMemoryStore>> {
    let store = Arc::new(InMemoryStore::new());
    for path in docs {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read document {}", path.display()))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        store.add_document(project_id, &filename, &text);
        tracing::debug!(project = %project_id, file = %filename, "seeded document");
    }
    Ok(store)
}
