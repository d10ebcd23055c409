//! Sideband markers: structured results smuggled through plain-text tool output.
//!
//! Agent-mode backends run tools behind a boundary that only carries text, so
//! a tool appends `NAME:{json}|` to its result and the adapter promotes it
//! into `Complete.metadata`.
//!
//! The payload is read with a JSON-aware reader that consumes exactly one
//! value before looking for the `|` terminator, so a `|` inside a title or
//! filename does not cut the payload short. A `|` that is not preceded by a
//! complete JSON value still makes the marker malformed; those are skipped.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::context::{ArtifactCreated, DocumentRef};
use crate::stream::CompletionMetadata;

pub const ARTIFACT_CREATED: &str = "ARTIFACT_CREATED";
pub const DOCUMENTS_USED: &str = "DOCUMENTS_USED";

const TERMINATOR: char = '|';

static MARKER_RE: OnceLock<Regex> = OnceLock::new();

fn marker_re() -> &'static Regex {
    MARKER_RE.get_or_init(|| {
        Regex::new(r"\b(ARTIFACT_CREATED|DOCUMENTS_USED):").expect("marker regex is valid")
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum Marker {
    ArtifactCreated(ArtifactCreated),
    DocumentsUsed(Vec<DocumentRef>),
}

/// Render `NAME:{json}|`.
pub fn encode<T: Serialize>(name: &str, payload: &T) -> serde_json::Result<String> {
    Ok(format!("{name}:{}{TERMINATOR}", serde_json::to_string(payload)?))
}

pub fn artifact_marker(artifact: &ArtifactCreated) -> serde_json::Result<String> {
    encode(ARTIFACT_CREATED, artifact)
}

pub fn documents_marker(docs: &[DocumentRef]) -> serde_json::Result<String> {
    encode(DOCUMENTS_USED, &docs)
}

/// Find every well-formed marker in `text`, in order of appearance.
pub fn scan(text: &str) -> Vec<Marker> {
    let mut found = Vec::new();
    for caps in marker_re().captures_iter(text) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let rest = &text[whole.end()..];
        let Some(value) = read_payload(rest) else {
            tracing::warn!(marker = name.as_str(), "skipping malformed sideband marker");
            continue;
        };
        let marker = match name.as_str() {
            ARTIFACT_CREATED => serde_json::from_value(value).map(Marker::ArtifactCreated),
            _ => serde_json::from_value(value).map(Marker::DocumentsUsed),
        };
        match marker {
            Ok(m) => found.push(m),
            Err(e) => {
                tracing::warn!(marker = name.as_str(), error = %e, "sideband payload has the wrong shape")
            }
        }
    }
    found
}

/// Read one JSON value from the start of `rest` and require the terminator
/// immediately after it.
fn read_payload(rest: &str) -> Option<serde_json::Value> {
    let mut values = serde_json::Deserializer::from_str(rest).into_iter::<serde_json::Value>();
    let value = values.next()?.ok()?;
    let after = &rest[values.byte_offset()..];
    after.starts_with(TERMINATOR).then_some(value)
}

/// Merge every marker found in `text` into `metadata`.
///
/// Documents are de-duplicated by id; the last artifact marker wins.
pub fn promote(text: &str, metadata: &mut CompletionMetadata) {
    for marker in scan(text) {
        match marker {
            Marker::ArtifactCreated(a) => metadata.artifact_created = Some(a),
            Marker::DocumentsUsed(docs) => {
                for doc in docs {
                    if !metadata.documents_used.iter().any(|d| d.id == doc.id) {
                        metadata.documents_used.push(doc);
                    }
                }
            }
        }
    }
}
