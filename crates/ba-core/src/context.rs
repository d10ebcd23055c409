use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

// ---------------------------------------------------------------------------
// Documents and artifacts
// ---------------------------------------------------------------------------

/// A project document referenced while answering (source attribution).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: String,
    pub filename: String,
}

/// One search hit returned by the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentHit {
    pub id: String,
    pub filename: String,
    pub snippet: String,
    #[serde(default)]
    pub score: f32,
}

impl DocumentHit {
    pub fn to_ref(&self) -> DocumentRef {
        DocumentRef {
            id: self.id.clone(),
            filename: self.filename.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    RequirementsDoc,
    Brd,
    UserStories,
    AcceptanceCriteria,
}

impl ArtifactType {
    pub const ALL: [ArtifactType; 4] = [
        ArtifactType::RequirementsDoc,
        ArtifactType::Brd,
        ArtifactType::UserStories,
        ArtifactType::AcceptanceCriteria,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::RequirementsDoc => "requirements_doc",
            ArtifactType::Brd => "brd",
            ArtifactType::UserStories => "user_stories",
            ArtifactType::AcceptanceCriteria => "acceptance_criteria",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub thread_id: String,
    pub artifact_type: ArtifactType,
    pub title: String,
    pub content: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// The part of an artifact the client needs to render a "created" card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactCreated {
    pub id: String,
    pub artifact_type: ArtifactType,
    pub title: String,
}

impl From<&Artifact> for ArtifactCreated {
    fn from(a: &Artifact) -> Self {
        Self {
            id: a.id.clone(),
            artifact_type: a.artifact_type,
            title: a.title.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// DocumentStore: the persistence collaborator
// ---------------------------------------------------------------------------

/// Persistence calls the tool loop needs. Implemented outside the core.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn search_documents(&self, project_id: &str, query: &str) -> Result<Vec<DocumentHit>>;

    async fn save_artifact(
        &self,
        thread_id: &str,
        artifact_type: ArtifactType,
        title: &str,
        content: &str,
    ) -> Result<Artifact>;
}

// ---------------------------------------------------------------------------
// RequestContext
// ---------------------------------------------------------------------------

/// Everything a tool invocation needs for one chat turn.
///
/// Cloning is cheap and clones share the document ledger, which is how a
/// detached tool callback (looked up through the session registry) reports
/// back into the turn that owns it. Never reused across turns.
#[derive(Clone)]
pub struct RequestContext {
    store: Arc<dyn DocumentStore>,
    project_id: String,
    thread_id: String,
    ledger: Arc<Mutex<TurnLedger>>,
}

#[derive(Debug, Default)]
struct TurnLedger {
    documents: Vec<DocumentRef>,
    artifacts: Vec<ArtifactCreated>,
}

impl RequestContext {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        project_id: impl Into<String>,
        thread_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            project_id: project_id.into(),
            thread_id: thread_id.into(),
            ledger: Arc::new(Mutex::new(TurnLedger::default())),
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Record referenced documents; an id already present is ignored.
    pub fn record_documents<'a>(&self, docs: impl IntoIterator<Item = &'a DocumentRef>) {
        let mut ledger = self.ledger.lock().unwrap_or_else(|p| p.into_inner());
        for doc in docs {
            if !ledger.documents.iter().any(|d| d.id == doc.id) {
                ledger.documents.push(doc.clone());
            }
        }
    }

    pub fn documents_used(&self) -> Vec<DocumentRef> {
        self.ledger
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .documents
            .clone()
    }

    pub fn record_artifact(&self, artifact: ArtifactCreated) {
        let mut ledger = self.ledger.lock().unwrap_or_else(|p| p.into_inner());
        if !ledger.artifacts.iter().any(|a| a.id == artifact.id) {
            ledger.artifacts.push(artifact);
        }
    }

    pub fn artifacts_created(&self) -> Vec<ArtifactCreated> {
        self.ledger
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .artifacts
            .clone()
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("project_id", &self.project_id)
            .field("thread_id", &self.thread_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn doc(id: &str, name: &str) -> DocumentRef {
        DocumentRef {
            id: id.into(),
            filename: name.into(),
        }
    }

    #[test]
    fn documents_are_deduplicated_by_id() {
        let ctx = RequestContext::new(Arc::new(InMemoryStore::new()), "p1", "t1");
        ctx.record_documents(&[doc("d1", "scope.docx"), doc("d2", "notes.txt")]);
        ctx.record_documents(&[doc("d1", "scope (renamed).docx")]);
        let used = ctx.documents_used();
        assert_eq!(used.len(), 2);
        assert_eq!(used[0].filename, "scope.docx");
    }

    #[test]
    fn clones_share_the_ledger() {
        let ctx = RequestContext::new(Arc::new(InMemoryStore::new()), "p1", "t1");
        let detached = ctx.clone();
        detached.record_documents(&[doc("d9", "interview.md")]);
        assert_eq!(ctx.documents_used(), vec![doc("d9", "interview.md")]);
    }

    #[test]
    fn artifact_type_round_trips_through_str() {
        for t in ArtifactType::ALL {
            assert_eq!(ArtifactType::parse(t.as_str()), Some(t));
        }
        assert_eq!(ArtifactType::parse("novel"), None);
    }
}
