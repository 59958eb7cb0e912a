//! `OpenAI` adapter configuration.

use std::time::Duration;

use llm_typed::error::LlmError;
use llm_typed::registry::ProviderConfig;
use llm_typed::transport::TransportRetryConfig;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o";

/// Settings for [`OpenAiProvider`](crate::OpenAiProvider).
///
/// ```rust
/// use llm_typed_openai::OpenAiConfig;
///
/// let config = OpenAiConfig {
///     api_key: "sk-...".into(),
///     model: "gpt-4o-mini".into(),
///     ..Default::default()
/// };
/// assert_eq!(config.base_url, "https://api.openai.com/v1");
/// ```
#[derive(Clone)]
pub struct OpenAiConfig {
    /// Bearer token sent on every request.
    pub api_key: String,
    /// Model id, e.g. `"gpt-4o-mini"`.
    pub model: String,
    /// API root without the `/chat/completions` suffix. Point it at a
    /// proxy or any compatible server.
    pub base_url: String,
    /// Sent as the `OpenAI-Organization` header.
    pub organization: Option<String>,
    /// Fallback when a request carries no
    /// [`timeout`](llm_typed::ProviderRequest::timeout) of its own.
    pub timeout: Option<Duration>,
    /// Backoff policy for rate limits and dropped connections. Applied
    /// by the provider itself through
    /// [`Retrying`](llm_typed::transport::Retrying).
    pub retry: TransportRetryConfig,
    /// Shared HTTP client. A default client is used when `None`.
    pub client: Option<reqwest::Client>,
}

impl OpenAiConfig {
    /// Reads `OPENAI_API_KEY`, plus `OPENAI_BASE_URL` and
    /// `OPENAI_ORG_ID` when set. Everything else keeps its default.
    pub fn from_env() -> Result<Self, LlmError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| LlmError::Auth("OPENAI_API_KEY is not set".into()))?;
        let mut config = Self {
            api_key,
            organization: std::env::var("OPENAI_ORG_ID").ok(),
            ..Self::default()
        };
        if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
            config.base_url = base_url;
        }
        Ok(config)
    }
}

impl TryFrom<&ProviderConfig> for OpenAiConfig {
    type Error = LlmError;

    fn try_from(config: &ProviderConfig) -> Result<Self, LlmError> {
        let Some(api_key) = config.api_key.clone() else {
            return Err(LlmError::InvalidRequest("openai provider requires api_key".into()));
        };
        if config.model.is_empty() {
            return Err(LlmError::InvalidRequest("openai provider requires model".into()));
        }

        let mut retry = TransportRetryConfig::default();
        if let Some(max_retries) = config.get_extra_u64("max_retries") {
            retry.max_retries = u32::try_from(max_retries).unwrap_or(u32::MAX);
        }

        Ok(Self {
            api_key,
            model: config.model.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.into()),
            organization: config.get_extra_str("organization").map(str::to_owned),
            timeout: config.timeout,
            retry,
            client: None,
        })
    }
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("organization", &self.organization)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("client", &self.client.is_some())
            .finish()
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.into(),
            base_url: DEFAULT_BASE_URL.into(),
            organization: None,
            timeout: None,
            retry: TransportRetryConfig::default(),
            client: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OpenAiConfig::default();
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert!(config.api_key.is_empty());
        assert_eq!(config.retry, TransportRetryConfig::default());
    }

    #[test]
    fn test_debug_never_shows_the_key() {
        let config = OpenAiConfig {
            api_key: "sk-live-abc123".into(),
            ..Default::default()
        };
        let shown = format!("{config:?}");
        assert!(!shown.contains("sk-live-abc123"));
        assert!(shown.contains("[REDACTED]"));
    }

    #[test]
    fn test_from_provider_config() {
        let provider_config = ProviderConfig::new("openai", "gpt-4o-mini")
            .api_key("sk-test")
            .base_url("http://localhost:4000/v1")
            .timeout(Duration::from_secs(20))
            .extra("organization", "org-9")
            .extra("max_retries", 7);
        let config = OpenAiConfig::try_from(&provider_config).unwrap();
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.base_url, "http://localhost:4000/v1");
        assert_eq!(config.organization.as_deref(), Some("org-9"));
        assert_eq!(config.timeout, Some(Duration::from_secs(20)));
        assert_eq!(config.retry.max_retries, 7);
    }

    #[test]
    fn test_from_provider_config_requires_key_and_model() {
        let missing_key = ProviderConfig::new("openai", "gpt-4o");
        assert!(matches!(
            OpenAiConfig::try_from(&missing_key),
            Err(LlmError::InvalidRequest(_))
        ));
        let missing_model = ProviderConfig::new("openai", "").api_key("sk");
        assert!(matches!(
            OpenAiConfig::try_from(&missing_model),
            Err(LlmError::InvalidRequest(_))
        ));
    }
}
