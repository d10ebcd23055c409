use axum::extract::{Path, State};
use axum::Json;
use ba_core::{tools, ChatError, SessionToken};
use serde::Deserialize;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AgentToolBody {
    pub session: SessionToken,
    #[serde(default)]
    pub input: serde_json::Value,
}

/// POST /api/agent-tools/{tool}: tool callback for out-of-process agents.
///
/// The response is plain text, sideband markers included, because the
/// agent reads it verbatim as its tool result.
pub async fn call_tool(
    State(app): State<AppState>,
    Path(tool): Path<String>,
    Json(body): Json<AgentToolBody>,
) -> Result<String, AppError> {
    let ctx = app
        .sessions
        .lookup(&body.session)
        .ok_or_else(|| ChatError::SessionNotFound(body.session.to_string()))?;
    Ok(tools::execute_for_agent(&ctx, &tool, &body.input).await?)
}
