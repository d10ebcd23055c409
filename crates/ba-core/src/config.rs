use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_CONFIG_FILE: &str = "ba.yaml";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ProviderConfig
// ---------------------------------------------------------------------------

/// Connection settings shared by the HTTP backends. Every field falls back
/// to a per-vendor default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Name of the environment variable holding the API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    Anthropic(ApiSettings),
    Gemini(ApiSettings),
    Deepseek(ApiSettings),
    Openai(ApiSettings),
    /// In-process agent loop over the Anthropic Messages API.
    AgentLoop(ApiSettings),
    /// Claude CLI subprocess, served from the warm pool.
    ClaudeCli {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig::Anthropic(ApiSettings::default())
    }
}

impl ProviderConfig {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderConfig::Anthropic(_) => "anthropic",
            ProviderConfig::Gemini(_) => "gemini",
            ProviderConfig::Deepseek(_) => "deepseek",
            ProviderConfig::Openai(_) => "openai",
            ProviderConfig::AgentLoop(_) => "agent_loop",
            ProviderConfig::ClaudeCli { .. } => "claude_cli",
        }
    }

    fn settings(&self) -> Option<&ApiSettings> {
        match self {
            ProviderConfig::Anthropic(s)
            | ProviderConfig::Gemini(s)
            | ProviderConfig::Deepseek(s)
            | ProviderConfig::Openai(s)
            | ProviderConfig::AgentLoop(s) => Some(s),
            ProviderConfig::ClaudeCli { .. } => None,
        }
    }

    pub fn model(&self) -> String {
        let configured = match self {
            ProviderConfig::ClaudeCli { model } => model.clone(),
            _ => self.settings().and_then(|s| s.model.clone()),
        };
        configured.unwrap_or_else(|| self.default_model().to_string())
    }

    fn default_model(&self) -> &'static str {
        match self {
            ProviderConfig::Anthropic(_) | ProviderConfig::AgentLoop(_) => "claude-sonnet-4-5",
            ProviderConfig::Gemini(_) => "gemini-2.5-flash",
            ProviderConfig::Deepseek(_) => "deepseek-chat",
            ProviderConfig::Openai(_) => "gpt-4o",
            ProviderConfig::ClaudeCli { .. } => "sonnet",
        }
    }

    pub fn base_url(&self) -> Option<String> {
        let default = match self {
            ProviderConfig::Anthropic(_) | ProviderConfig::AgentLoop(_) => {
                "https://api.anthropic.com"
            }
            ProviderConfig::Gemini(_) => "https://generativelanguage.googleapis.com",
            ProviderConfig::Deepseek(_) => "https://api.deepseek.com",
            ProviderConfig::Openai(_) => "https://api.openai.com/v1",
            ProviderConfig::ClaudeCli { .. } => return None,
        };
        Some(
            self.settings()
                .and_then(|s| s.base_url.clone())
                .unwrap_or_else(|| default.to_string()),
        )
    }

    pub fn api_key_env(&self) -> Option<String> {
        let default = match self {
            ProviderConfig::Anthropic(_) | ProviderConfig::AgentLoop(_) => "ANTHROPIC_API_KEY",
            ProviderConfig::Gemini(_) => "GEMINI_API_KEY",
            ProviderConfig::Deepseek(_) => "DEEPSEEK_API_KEY",
            ProviderConfig::Openai(_) => "OPENAI_API_KEY",
            ProviderConfig::ClaudeCli { .. } => return None,
        };
        Some(
            self.settings()
                .and_then(|s| s.api_key_env.clone())
                .unwrap_or_else(|| default.to_string()),
        )
    }

    /// Read the API key from the environment, if this backend needs one.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

// ---------------------------------------------------------------------------
// Retry / Heartbeat / Pool / Limits / Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            delay_ms: default_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatSettings {
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_max_silence")]
    pub max_silence_secs: u64,
}

fn default_initial_delay() -> u64 {
    5
}

fn default_interval() -> u64 {
    15
}

fn default_max_silence() -> u64 {
    600
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_initial_delay(),
            interval_secs: default_interval(),
            max_silence_secs: default_max_silence(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_pool_size")]
    pub size: usize,
    #[serde(default = "default_refill_interval_ms")]
    pub refill_interval_ms: u64,
    #[serde(default = "default_executable")]
    pub executable: String,
    #[serde(default = "default_terminate_timeout_ms")]
    pub terminate_timeout_ms: u64,
}

fn default_pool_size() -> usize {
    2
}

fn default_refill_interval_ms() -> u64 {
    500
}

fn default_executable() -> String {
    "claude".to_string()
}

fn default_terminate_timeout_ms() -> u64 {
    2000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: default_pool_size(),
            refill_interval_ms: default_refill_interval_ms(),
            executable: default_executable(),
            terminate_timeout_ms: default_terminate_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Last-resort guard, checked before any vendor call.
    #[serde(default = "default_token_ceiling")]
    pub emergency_token_ceiling: usize,
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    #[serde(default = "default_agent_max_turns")]
    pub agent_max_turns: usize,
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_token_ceiling() -> usize {
    150_000
}

fn default_max_tool_rounds() -> usize {
    10
}

fn default_agent_max_turns() -> usize {
    10
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            emergency_token_ceiling: default_token_ceiling(),
            max_tool_rounds: default_max_tool_rounds(),
            agent_max_turns: default_agent_max_turns(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Base URL CLI agents use to call tools back. Defaults to localhost.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            public_url: None,
        }
    }
}

impl ServerConfig {
    pub fn callback_base(&self) -> String {
        self.public_url
            .clone()
            .unwrap_or_else(|| format!("http://127.0.0.1:{}", self.port))
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatSettings,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Load from `path`; a missing file means all defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        // 1. API key present for HTTP backends
        if let Some(var) = self.provider.api_key_env() {
            if self.provider.api_key().is_none() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!(
                        "provider '{}' needs an API key in ${var}",
                        self.provider.name()
                    ),
                });
            }
        }

        // 2. Pool sizing only matters for the CLI backend
        if matches!(self.provider, ProviderConfig::ClaudeCli { .. }) && self.pool.size == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "pool.size=0: every CLI turn will cold-spawn a process".into(),
            });
        }

        // 3. Heartbeat windows must nest
        let hb = &self.heartbeat;
        if hb.initial_delay_secs >= hb.max_silence_secs || hb.interval_secs >= hb.max_silence_secs
        {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "heartbeat delays ({}s/{}s) must be shorter than max_silence_secs ({}s)",
                    hb.initial_delay_secs, hb.interval_secs, hb.max_silence_secs
                ),
            });
        }
        if hb.interval_secs == 0 || hb.initial_delay_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "heartbeat delays must be non-zero".into(),
            });
        }

        // 4. Retry count
        if self.retry.max_retries > 5 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "retry.max_retries={} (>5 is unusual)",
                    self.retry.max_retries
                ),
            });
        }

        // 5. Limits
        if self.limits.max_tool_rounds == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "limits.max_tool_rounds must be at least 1".into(),
            });
        }
        if (self.limits.max_tokens as usize) >= self.limits.emergency_token_ceiling {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "limits.max_tokens is not below limits.emergency_token_ceiling".into(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
