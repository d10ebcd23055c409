use crate::context::ArtifactType;
use crate::tools::{SAVE_ARTIFACT, SEARCH_DOCUMENTS};

const BASE_PROMPT: &str = "\
You are an experienced business analyst working inside a project workspace. \
You help the user turn conversations and uploaded project documents into clear \
requirements.

Guidelines:
- Ground answers in the project's documents. Search them before making claims \
about the project, and say so when nothing relevant was found.
- Ask one focused clarifying question when the request is ambiguous instead of \
guessing.
- Write deliverables in Markdown with numbered, testable requirements.
- When a deliverable is finished, save it exactly once and then stop. Do not \
re-save or revise an artifact unless the user asks.";

/// System prompt for a chat turn. `project_name` is woven in when known.
pub fn system_prompt(project_name: Option<&str>) -> String {
    let types: Vec<&str> = ArtifactType::ALL.iter().map(|t| t.as_str()).collect();
    let mut prompt = String::from(BASE_PROMPT);
    prompt.push_str(&format!(
        "\n\nTools:\n- {SEARCH_DOCUMENTS}: full-text search over the project's documents.\n\
         - {SAVE_ARTIFACT}: save a deliverable. artifact_type is one of: {}.",
        types.join(", ")
    ));
    if let Some(name) = project_name.filter(|n| !n.trim().is_empty()) {
        prompt.push_str(&format!("\n\nCurrent project: {name}"));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_every_artifact_type() {
        let prompt = system_prompt(None);
        for t in ArtifactType::ALL {
            assert!(prompt.contains(t.as_str()));
        }
        assert!(!prompt.contains("Current project"));
    }

    #[test]
    fn includes_project_name_when_given() {
        assert!(system_prompt(Some("Billing revamp")).ends_with("Current project: Billing revamp"));
        assert!(!system_prompt(Some("  ")).contains("Current project"));
    }
}
