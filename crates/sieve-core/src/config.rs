use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, SieveError};

const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
const DEFAULT_MODEL: &str = "claude-haiku-4-5-20251001";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Engine-level execution settings shared by all engine kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GenerationSettings {
    /// Chunks per backend call for batch backends, or requests in flight for per-record
    /// backends. `None` sends everything at once.
    #[serde(default)]
    pub batch_size: Option<usize>,
    /// Whether unparseable model output is an error instead of an absent chunk result.
    #[serde(default)]
    pub strict: bool,
}

impl GenerationSettings {
    pub fn effective_batch_size(&self, total: usize) -> usize {
        match self.batch_size {
            Some(n) if n > 0 => n,
            _ => total.max(1),
        }
    }
}

/// Environment-level overrides for the settings recorded in a pipeline snapshot. Unset
/// values leave the snapshot's settings alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SettingsOverride {
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub strict: Option<bool>,
}

impl SettingsOverride {
    pub fn is_empty(&self) -> bool {
        self.batch_size.is_none() && self.strict.is_none()
    }

    pub fn apply(&self, settings: &mut GenerationSettings) {
        if let Some(batch_size) = self.batch_size {
            settings.batch_size = Some(batch_size);
        }
        if let Some(strict) = self.strict {
            settings.strict = strict;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicSettings {
    pub api_key: String,
    pub api_url: Url,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SieveConfig {
    pub anthropic: AnthropicSettings,
    pub generation: SettingsOverride,
}

impl SieveConfig {
    pub fn from_env() -> Result<Self> {
        let api_url = std::env::var("SIEVE_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.into());
        let api_url = Url::parse(&api_url)
            .map_err(|e| SieveError::Config(format!("invalid SIEVE_API_URL '{api_url}': {e}")))?;

        Ok(Self {
            anthropic: AnthropicSettings {
                api_key: std::env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
                api_url,
                model: std::env::var("SIEVE_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.into()),
                max_tokens: env_parse("SIEVE_MAX_TOKENS").unwrap_or(DEFAULT_MAX_TOKENS),
                timeout_secs: env_parse("SIEVE_TIMEOUT_SECS").unwrap_or(DEFAULT_TIMEOUT_SECS),
            },
            generation: SettingsOverride {
                batch_size: env_parse("SIEVE_BATCH_SIZE"),
                strict: env_parse("SIEVE_STRICT"),
            },
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
