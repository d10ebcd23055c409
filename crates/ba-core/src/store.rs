use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::context::{Artifact, ArtifactType, DocumentHit, DocumentStore};
use crate::Result;

const SNIPPET_RADIUS: usize = 160;
const MAX_HITS: usize = 5;

#[derive(Debug, Clone)]
struct StoredDocument {
    id: String,
    filename: String,
    text: String,
}

/// Process-local [`DocumentStore`]: documents are seeded in code and
/// artifacts live until the process exits.
///
/// Search is case-insensitive term matching ranked by hit count. Good enough
/// for local runs and tests; real deployments plug in their own store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    documents: Mutex<HashMap<String, Vec<StoredDocument>>>,
    artifacts: Mutex<Vec<Artifact>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document to `project_id` and return its generated id.
    pub fn add_document(&self, project_id: &str, filename: &str, text: &str) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.documents
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(project_id.to_string())
            .or_default()
            .push(StoredDocument {
                id: id.clone(),
                filename: filename.to_string(),
                text: text.to_string(),
            });
        id
    }

    pub fn artifacts(&self) -> Vec<Artifact> {
        self.artifacts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn search_documents(&self, project_id: &str, query: &str) -> Result<Vec<DocumentHit>> {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .filter(|t| t.len() > 1)
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let docs = self.documents.lock().unwrap_or_else(|p| p.into_inner());
        let Some(docs) = docs.get(project_id) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<DocumentHit> = docs
            .iter()
            .filter_map(|doc| {
                let haystack = doc.text.to_lowercase();
                let count: usize = terms.iter().map(|t| haystack.matches(t.as_str()).count()).sum();
                if count == 0 {
                    return None;
                }
                let first = terms
                    .iter()
                    .filter_map(|t| haystack.find(t.as_str()))
                    .min()
                    .unwrap_or(0);
                Some(DocumentHit {
                    id: doc.id.clone(),
                    filename: doc.filename.clone(),
                    snippet: snippet_around(&doc.text, first),
                    score: count as f32,
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(MAX_HITS);
        Ok(hits)
    }

    async fn save_artifact(
        &self,
        thread_id: &str,
        artifact_type: ArtifactType,
        title: &str,
        content: &str,
    ) -> Result<Artifact> {
        let artifact = Artifact {
            id: uuid::Uuid::new_v4().to_string(),
            thread_id: thread_id.to_string(),
            artifact_type,
            title: title.to_string(),
            content: content.to_string(),
            created_at: chrono::Utc::now(),
        };
        self.artifacts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(artifact.clone());
        Ok(artifact)
    }
}

/// Cut a window of text around byte offset `at`, respecting char boundaries.
fn snippet_around(text: &str, at: usize) -> String {
    let mut start = at.saturating_sub(SNIPPET_RADIUS);
    while !text.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (at + SNIPPET_RADIUS).min(text.len());
    while !text.is_char_boundary(end) {
        end += 1;
    }
    let mut out = String::new();
    if start > 0 {
        out.push_str("...");
    }
    out.push_str(text[start..end].trim());
    if end < text.len() {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn search_ranks_by_term_frequency() {
        let store = InMemoryStore::new();
        store.add_document("p1", "a.txt", "billing once");
        let best = store.add_document("p1", "b.txt", "billing billing invoices billing");
        store.add_document("p2", "c.txt", "billing everywhere billing billing billing");

        let hits = store.search_documents("p1", "Billing").await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, best);
    }

    #[tokio::test]
    async fn search_unknown_project_is_empty() {
        let store = InMemoryStore::new();
        let hits = store.search_documents("nope", "anything").await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn save_artifact_assigns_id_and_keeps_it() {
        let store = InMemoryStore::new();
        let a = store
            .save_artifact("t1", ArtifactType::Brd, "Billing BRD", "# BRD")
            .await
            .unwrap();
        assert!(!a.id.is_empty());
        assert_eq!(store.artifacts().len(), 1);
        assert_eq!(store.artifacts()[0].title, "Billing BRD");
    }

    #[test]
    fn snippet_handles_multibyte_text() {
        let text = "é".repeat(400);
        let s = snippet_around(&text, 401);
        assert!(s.starts_with("..."));
        assert!(s.ends_with("..."));
    }
}
