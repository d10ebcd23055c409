use serde_json::Value;

use crate::error::{ProviderError, Result};

/// Where and as whom an HTTP adapter talks to its vendor.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl Endpoint {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

pub fn client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(concat!("ba-assistant/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Send `request`; any non-2xx status becomes a [`ProviderError::Http`].
pub async fn send(vendor: &str, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(http_error(vendor, status.as_u16(), &body))
}

/// Build an HTTP error from a vendor error body.
///
/// Understands the common `{"error": {"message", "type" | "status" | "code"}}`
/// envelope; anything else is reported verbatim.
pub fn http_error(vendor: &str, status: u16, body: &str) -> ProviderError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));

    let message = error
        .and_then(|e| e.get("message").and_then(Value::as_str).or_else(|| e.as_str()))
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string());
    let code = error.and_then(|e| {
        ["type", "status", "code"]
            .iter()
            .find_map(|k| e.get(*k).and_then(Value::as_str))
            .map(str::to_string)
    });

    ProviderError::Http {
        vendor: vendor.to_string(),
        status,
        code,
        message,
    }
}
