use crate::retry::RetryPolicy;
use colloquy_core::{ColloquyError, ColloquyResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection settings for the chat-completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub api_base_url: String,
    /// Sent only when set.
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Sent only when set.
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

impl ModelConfig {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            api_key: None,
            api_base_url: default_base_url(),
            temperature: None,
            max_tokens: None,
            timeouts: TimeoutConfig::default(),
            retry: RetryPolicy::default(),
        }
    }

    /// `<base>/chat/completions`, or a config error when no base URL is set.
    pub fn endpoint(&self) -> ColloquyResult<String> {
        let base = self.api_base_url.trim().trim_end_matches('/');
        if base.is_empty() {
            return Err(ColloquyError::Config("api_base_url is empty".into()));
        }
        Ok(format!("{base}/chat/completions"))
    }
}

/// HTTP timeouts, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment.
    pub connect_secs: u64,
    /// Maximum gap between two reads of the response body.
    pub read_secs: u64,
    /// Whole request, including streaming the body.
    pub total_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            read_secs: 120,
            total_secs: 600,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn read(&self) -> Duration {
        Duration::from_secs(self.read_secs)
    }

    pub fn total(&self) -> Duration {
        Duration::from_secs(self.total_secs)
    }
}

/// Context window budget and compaction settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Model context window in tokens.
    pub context_size: usize,
    /// Share of the window (percent) at which auto-compaction is considered. 0 disables it.
    pub compact_percentage: u32,
    /// Most recent groups that compaction never touches.
    pub compact_protect_rounds: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            context_size: 128_000,
            compact_percentage: 80,
            compact_protect_rounds: 2,
        }
    }
}

impl ContextConfig {
    /// `context_size * compact_percentage / 100`; 0 means disabled.
    pub fn auto_compact_threshold(&self) -> usize {
        let pct = self.compact_percentage.min(100) as usize;
        self.context_size.saturating_mul(pct) / 100
    }

    pub fn auto_compact_enabled(&self) -> bool {
        self.auto_compact_threshold() > 0
    }
}
