use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ba_core::ChatError;

/// Unified error type for HTTP responses.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    /// Construct a 400 Bad Request error with the given message.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(ChatError::InvalidRequest(msg.into()).into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0.downcast_ref::<ChatError>() {
            Some(ChatError::InvalidRequest(_)) => StatusCode::BAD_REQUEST,
            Some(ChatError::SessionNotFound(_) | ChatError::UnknownTool(_)) => StatusCode::NOT_FOUND,
            Some(ChatError::InvalidToolInput { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
            Some(ChatError::TokenCeiling { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            Some(
                ChatError::Store(_)
                | ChatError::ToolLoopExceeded(_)
                | ChatError::Provider(_)
                | ChatError::Io(_)
                | ChatError::Yaml(_)
                | ChatError::Json(_),
            )
            | None => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %format!("{:#}", self.0), "request failed");
        }
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_not_found_maps_to_404() {
        let err = AppError(ChatError::SessionNotFound("abc".into()).into());
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn unknown_tool_maps_to_404() {
        let err = AppError(ChatError::UnknownTool("delete_everything".into()).into());
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn bad_request_constructor_maps_to_400() {
        let err = AppError::bad_request("messages must not be empty");
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn invalid_tool_input_maps_to_422() {
        let err = AppError(
            ChatError::InvalidToolInput {
                tool: "save_artifact".into(),
                reason: "missing field `title`".into(),
            }
            .into(),
        );
        assert_eq!(err.into_response().status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn store_error_maps_to_500() {
        let err = AppError(ChatError::Store("connection refused".into()).into());
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn non_chat_error_maps_to_500() {
        let err = AppError(anyhow::anyhow!("something unexpected"));
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn response_body_is_json() {
        let response = AppError(ChatError::SessionNotFound("abc".into()).into()).into_response();
        let ct = response
            .headers()
            .get(axum::http::header::CONTENT_TYPE)
            .expect("should have content-type");
        assert!(ct.to_str().unwrap().contains("application/json"));
    }
}
