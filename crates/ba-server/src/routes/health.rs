use axum::extract::State;
use axum::Json;

use crate::state::AppState;

/// GET /api/health: backend in use and warm pool occupancy.
pub async fn health(State(app): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "provider": app.orchestrator.adapter().name(),
        "model": app.orchestrator.adapter().model(),
        "pool_size": app.pool.as_ref().map(|p| p.idle_count()),
    }))
}
