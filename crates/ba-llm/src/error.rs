use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Non-success HTTP status. `message` is the vendor's error text when the
    /// body could be parsed, otherwise the raw body.
    #[error("{vendor} returned HTTP {status}: {message}")]
    Http {
        vendor: String,
        status: u16,
        /// Vendor error code, e.g. `rate_limit_error` or `RESOURCE_EXHAUSTED`.
        code: Option<String>,
        message: String,
    },

    /// Error reported inside an otherwise successful stream.
    #[error("{vendor} stream error ({code}): {message}")]
    Stream {
        vendor: String,
        code: String,
        message: String,
    },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("failed to decode {vendor} response: {message}")]
    Decode { vendor: String, message: String },

    #[error("missing API key: set ${0}")]
    MissingApiKey(String),

    #[error(transparent)]
    Cli(#[from] claude_agent::ClaudeAgentError),
}

/// Vendor error codes that mean "try again shortly".
const TRANSIENT_CODES: &[&str] = &[
    "rate_limit_error",
    "overloaded_error",
    "RESOURCE_EXHAUSTED",
    "UNAVAILABLE",
    "rate_limit_exceeded",
];

impl ProviderError {
    /// Whether a retry with a short delay could succeed: HTTP 429/500/503,
    /// Anthropic's 529 overload, or a vendor rate-limit code.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Http { status, code, .. } => {
                matches!(status, 429 | 500 | 503 | 529)
                    || code.as_deref().is_some_and(|c| TRANSIENT_CODES.contains(&c))
            }
            ProviderError::Stream { code, .. } => TRANSIENT_CODES.contains(&code.as_str()),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16, code: Option<&str>) -> ProviderError {
        ProviderError::Http {
            vendor: "test".into(),
            status,
            code: code.map(String::from),
            message: "x".into(),
        }
    }

    #[test]
    fn transient_statuses() {
        for status in [429, 500, 503, 529] {
            assert!(http(status, None).is_transient(), "{status}");
        }
        for status in [400, 401, 403, 404, 502] {
            assert!(!http(status, None).is_transient(), "{status}");
        }
    }

    #[test]
    fn vendor_rate_limit_codes_are_transient() {
        assert!(http(400, Some("RESOURCE_EXHAUSTED")).is_transient());
        assert!(ProviderError::Stream {
            vendor: "anthropic".into(),
            code: "overloaded_error".into(),
            message: "Overloaded".into(),
        }
        .is_transient());
        assert!(!http(400, Some("invalid_request_error")).is_transient());
    }

    #[test]
    fn missing_key_is_permanent() {
        assert!(!ProviderError::MissingApiKey("ANTHROPIC_API_KEY".into()).is_transient());
    }
}
