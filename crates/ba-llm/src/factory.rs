use std::sync::Arc;
use std::time::Duration;

use ba_core::config::Config;
use ba_core::session::SessionRegistry;
use ba_core::stream::ChatAdapter;
use claude_agent::{CliSpawner, PermissionMode, PoolOptions, ProcessPool, QueryOptions};

use crate::agent_loop::{AgentLoopAdapter, AgentToolbox};
use crate::anthropic::AnthropicAdapter;
use crate::claude_cli::ClaudeCliAdapter;
use crate::error::{ProviderError, Result};
use crate::gemini::GeminiAdapter;
use crate::http::{self, Endpoint};
use crate::openai_compat::OpenAiCompatAdapter;
use crate::retry::RetryPolicy;

/// The CLI may only reach the outside world through curl, which is how it
/// calls our tool route.
const CLI_ALLOWED_TOOLS: &[&str] = &["Bash(curl:*)"];

/// The configured adapter, plus the process pool when the backend needs one.
///
/// The pool is returned unstarted; the server starts it at boot and stops it
/// on shutdown.
pub struct Backend {
    pub adapter: Arc<dyn ChatAdapter>,
    pub pool: Option<Arc<ProcessPool>>,
}

impl Backend {
    pub fn from_config(config: &Config, sessions: &SessionRegistry) -> Result<Self> {
        build(config, sessions, config.provider.api_key())
    }
}

fn build(config: &Config, sessions: &SessionRegistry, api_key: Option<String>) -> Result<Backend> {
    use ba_core::config::ProviderConfig as P;

    let provider = &config.provider;
    let retry = RetryPolicy::from_config(&config.retry);
    let adapter: Arc<dyn ChatAdapter> = match provider {
        P::ClaudeCli { .. } => return Ok(cli_backend(config)),
        P::Anthropic(_) => Arc::new(AnthropicAdapter::new(
            http::client()?,
            endpoint(config, api_key)?,
            retry,
        )),
        P::Gemini(_) => Arc::new(GeminiAdapter::new(
            http::client()?,
            endpoint(config, api_key)?,
            retry,
        )),
        P::Deepseek(_) | P::Openai(_) => Arc::new(OpenAiCompatAdapter::new(
            provider.name(),
            http::client()?,
            endpoint(config, api_key)?,
            retry,
        )),
        P::AgentLoop(_) => {
            let inner = AnthropicAdapter::new(http::client()?, endpoint(config, api_key)?, retry);
            Arc::new(AgentLoopAdapter::new(
                Arc::new(inner),
                AgentToolbox::for_sessions(sessions.clone()),
                config.limits.agent_max_turns,
            ))
        }
    };
    Ok(Backend {
        adapter,
        pool: None,
    })
}

fn endpoint(config: &Config, api_key: Option<String>) -> Result<Endpoint> {
    let provider = &config.provider;
    let api_key = api_key
        .ok_or_else(|| ProviderError::MissingApiKey(provider.api_key_env().unwrap_or_default()))?;
    Ok(Endpoint::new(
        provider.base_url().unwrap_or_default(),
        api_key,
        provider.model(),
    ))
}

fn cli_backend(config: &Config) -> Backend {
    let model = config.provider.model();
    let opts = QueryOptions {
        model: Some(model.clone()),
        max_turns: u32::try_from(config.limits.agent_max_turns).ok(),
        allowed_tools: CLI_ALLOWED_TOOLS.iter().map(|t| t.to_string()).collect(),
        permission_mode: PermissionMode::DontAsk,
        path_to_executable: Some(config.pool.executable.clone()),
        ..Default::default()
    };
    let pool = Arc::new(ProcessPool::new(
        CliSpawner::new(opts),
        PoolOptions {
            refill_interval: Duration::from_millis(config.pool.refill_interval_ms),
            terminate_timeout: Duration::from_millis(config.pool.terminate_timeout_ms),
        },
    ));
    let adapter = ClaudeCliAdapter::new(Arc::clone(&pool), model, config.server.callback_base());
    Backend {
        adapter: Arc::new(adapter),
        pool: Some(pool),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ba_core::config::{ApiSettings, ProviderConfig};
    use ba_core::stream::AdapterMode;

    fn config(provider: ProviderConfig) -> Config {
        Config {
            provider,
            ..Config::default()
        }
    }

    #[test]
    fn missing_key_names_the_variable() {
        let cfg = config(ProviderConfig::Gemini(ApiSettings::default()));
        let err = build(&cfg, &SessionRegistry::new(), None).err().unwrap();
        assert_eq!(err.to_string(), "missing API key: set $GEMINI_API_KEY");
    }

    #[test]
    fn direct_providers_build_direct_adapters() {
        let sessions = SessionRegistry::new();
        for (provider, name) in [
            (ProviderConfig::Anthropic(ApiSettings::default()), "anthropic"),
            (ProviderConfig::Gemini(ApiSettings::default()), "gemini"),
            (ProviderConfig::Deepseek(ApiSettings::default()), "deepseek"),
            (ProviderConfig::Openai(ApiSettings::default()), "openai"),
        ] {
            let backend = build(&config(provider), &sessions, Some("k".into())).unwrap();
            assert_eq!(backend.adapter.name(), name);
            assert_eq!(backend.adapter.mode(), AdapterMode::Direct);
            assert!(backend.pool.is_none());
        }
    }

    #[test]
    fn agent_loop_is_agent_mode() {
        let cfg = config(ProviderConfig::AgentLoop(ApiSettings {
            model: Some("claude-opus-test".into()),
            ..ApiSettings::default()
        }));
        let backend = build(&cfg, &SessionRegistry::new(), Some("k".into())).unwrap();
        assert_eq!(backend.adapter.mode(), AdapterMode::Agent);
        assert_eq!(backend.adapter.model(), "claude-opus-test");
    }

    #[tokio::test]
    async fn claude_cli_needs_no_key_and_returns_a_pool() {
        let cfg = config(ProviderConfig::ClaudeCli { model: None });
        let backend = build(&cfg, &SessionRegistry::new(), None).unwrap();
        assert_eq!(backend.adapter.name(), "claude_cli");
        assert_eq!(backend.adapter.model(), "sonnet");
        let pool = backend.pool.expect("pool");
        assert_eq!(pool.idle_count(), 0);
    }
}
