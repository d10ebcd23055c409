use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use axum::Json;
use ba_core::message::Role;
use ba_core::{prompt, ChatEvent, Message, RequestContext};
use futures::{Stream, StreamExt};
use serde::Deserialize;

use crate::error::AppError;
use crate::heartbeat::{multiplex, Pulse};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub project_id: String,
    /// Shown to the model in the system prompt.
    #[serde(default)]
    pub project_name: Option<String>,
    pub messages: Vec<Message>,
}

/// POST /api/threads/{thread_id}/chat: run one turn, streamed as SSE.
pub async fn chat(
    State(app): State<AppState>,
    Path(thread_id): Path<String>,
    Json(body): Json<ChatBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    if body.project_id.trim().is_empty() {
        return Err(AppError::bad_request("project_id must not be empty"));
    }
    match body.messages.last() {
        Some(last) if last.role == Role::User => {}
        Some(_) => return Err(AppError::bad_request("last message must be from the user")),
        None => return Err(AppError::bad_request("messages must not be empty")),
    }

    let ctx = RequestContext::new(app.store.clone(), body.project_id, thread_id);
    let system_prompt = prompt::system_prompt(body.project_name.as_deref());
    let events = app.orchestrator.run_turn(ctx, body.messages, system_prompt);

    let max_silence = app.heartbeat.max_silence.as_secs();
    let stream = multiplex(events, app.heartbeat)
        .map(move |pulse| Ok::<_, Infallible>(sse_event(pulse, max_silence)));
    Ok(Sse::new(stream))
}

fn sse_event(pulse: Pulse<ChatEvent>, max_silence_secs: u64) -> Event {
    match pulse {
        Pulse::Data(event) => Event::default()
            .event(event.name())
            .data(event.payload().to_string()),
        Pulse::Heartbeat => Event::default().comment("heartbeat"),
        Pulse::Timeout => {
            let timeout = ChatEvent::error(format!(
                "Response timed out after {max_silence_secs} seconds of silence"
            ));
            Event::default()
                .event(timeout.name())
                .data(timeout.payload().to_string())
        }
    }
}
