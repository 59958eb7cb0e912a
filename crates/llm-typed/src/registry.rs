//! Building providers from configuration.
//!
//! Adapter crates register a [`ProviderFactory`] under a name; callers
//! then turn a [`ProviderConfig`] (typically deserialized from a config
//! file) into a `Box<dyn DynProvider>` without naming the adapter type.
//!
//! ```rust,no_run
//! use llm_typed::registry::{ProviderConfig, ProviderRegistry};
//!
//! let config = ProviderConfig::new("openai", "gpt-4o").api_key("sk-...");
//! let provider = ProviderRegistry::global().build(&config)?;
//! # Ok::<(), llm_typed::LlmError>(())
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::LlmError;
use crate::provider::DynProvider;

/// Backend-neutral settings for constructing a provider.
///
/// Options specific to one adapter go in [`extra`](Self::extra); each
/// adapter documents the keys it reads.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Registered factory name, e.g. `"openai"`. Matched
    /// case-insensitively.
    pub provider: String,
    /// API key, for backends that need one.
    pub api_key: Option<String>,
    /// Model identifier.
    pub model: String,
    /// Override for the backend's endpoint.
    pub base_url: Option<String>,
    /// HTTP client timeout.
    #[serde(deserialize_with = "duration_secs::deserialize")]
    pub timeout: Option<Duration>,
    /// Adapter-specific options.
    pub extra: HashMap<String, Value>,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider", &self.provider)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("extra", &self.extra)
            .finish()
    }
}

impl ProviderConfig {
    /// A config for `provider` serving `model`.
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            ..Default::default()
        }
    }

    /// Sets the API key.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the endpoint.
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the HTTP timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Adds an adapter-specific option.
    #[must_use]
    pub fn extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// A string option from [`extra`](Self::extra).
    pub fn get_extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }

    /// A boolean option from [`extra`](Self::extra).
    pub fn get_extra_bool(&self, key: &str) -> Option<bool> {
        self.extra.get(key).and_then(Value::as_bool)
    }

    /// An unsigned integer option from [`extra`](Self::extra).
    pub fn get_extra_u64(&self, key: &str) -> Option<u64> {
        self.extra.get(key).and_then(Value::as_u64)
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(Duration::from_secs_f64))
    }
}

/// Constructs one kind of provider from a [`ProviderConfig`].
pub trait ProviderFactory: Send + Sync {
    /// The name the factory is registered under. Lowercase by
    /// convention.
    fn name(&self) -> &str;

    /// Builds a provider.
    ///
    /// # Errors
    ///
    /// When the config is missing something this backend requires.
    fn build(&self, config: &ProviderConfig) -> Result<Box<dyn DynProvider>, LlmError>;
}

/// Name → factory map.
///
/// Use [`global`](Self::global) for the process-wide instance adapter
/// crates register into, or [`new`](Self::new) for an isolated one.
pub struct ProviderRegistry {
    factories: RwLock<HashMap<String, Arc<dyn ProviderFactory>>>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// The process-wide registry.
    pub fn global() -> &'static Self {
        static GLOBAL: OnceLock<ProviderRegistry> = OnceLock::new();
        GLOBAL.get_or_init(ProviderRegistry::new)
    }

    /// Registers `factory`, replacing any factory with the same name.
    pub fn register(&self, factory: impl ProviderFactory + 'static) -> &Self {
        self.register_shared(Arc::new(factory))
    }

    /// Registers a shared factory, replacing any with the same name.
    pub fn register_shared(&self, factory: Arc<dyn ProviderFactory>) -> &Self {
        let name = factory.name().to_lowercase();
        self.factories
            .write()
            .expect("provider registry lock poisoned")
            .insert(name, factory);
        self
    }

    /// Removes a factory. Returns `true` if one was registered.
    pub fn unregister(&self, name: &str) -> bool {
        self.factories
            .write()
            .expect("provider registry lock poisoned")
            .remove(&name.to_lowercase())
            .is_some()
    }

    /// Returns `true` if a factory is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.factories
            .read()
            .expect("provider registry lock poisoned")
            .contains_key(&name.to_lowercase())
    }

    /// Registered names, sorted.
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .factories
            .read()
            .expect("provider registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Builds the provider `config.provider` names.
    ///
    /// # Errors
    ///
    /// [`LlmError::InvalidRequest`] if no factory has that name, or
    /// whatever the factory returns.
    pub fn build(&self, config: &ProviderConfig) -> Result<Box<dyn DynProvider>, LlmError> {
        let factory = self
            .factories
            .read()
            .expect("provider registry lock poisoned")
            .get(&config.provider.to_lowercase())
            .cloned();
        let Some(factory) = factory else {
            return Err(LlmError::InvalidRequest(format!(
                "unknown provider '{}'. Available: {:?}",
                config.provider,
                self.providers()
            )));
        };
        factory.build(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::mock_for;

    struct MockFactory;

    impl ProviderFactory for MockFactory {
        fn name(&self) -> &'static str {
            "Mock"
        }

        fn build(&self, config: &ProviderConfig) -> Result<Box<dyn DynProvider>, LlmError> {
            if config.model.is_empty() {
                return Err(LlmError::InvalidRequest("model is required".into()));
            }
            Ok(Box::new(mock_for("mock", &config.model)))
        }
    }

    #[test]
    fn test_register_and_build_case_insensitive() {
        let registry = ProviderRegistry::new();
        registry.register(MockFactory);
        assert!(registry.contains("MOCK"));

        let provider = registry.build(&ProviderConfig::new("mock", "m-1")).unwrap();
        assert_eq!(provider.metadata().model, "m-1");
    }

    #[test]
    fn test_unknown_provider_lists_available() {
        let registry = ProviderRegistry::new();
        registry.register(MockFactory);
        let err = registry
            .build(&ProviderConfig::new("nope", "m"))
            .err()
            .unwrap();
        assert!(matches!(err, LlmError::InvalidRequest(ref m) if m.contains("mock")));
    }

    #[test]
    fn test_factory_errors_propagate() {
        let registry = ProviderRegistry::new();
        registry.register(MockFactory);
        assert!(registry.build(&ProviderConfig::new("mock", "")).is_err());
    }

    #[test]
    fn test_unregister() {
        let registry = ProviderRegistry::new();
        registry.register(MockFactory);
        assert!(registry.unregister("mock"));
        assert!(!registry.unregister("mock"));
        assert!(registry.providers().is_empty());
    }

    #[test]
    fn test_config_deserializes_from_json() {
        let config: ProviderConfig = serde_json::from_value(serde_json::json!({
            "provider": "openai",
            "model": "gpt-4o",
            "timeout": 2.5,
            "extra": {"organization": "org-1", "max_retries": 4}
        }))
        .unwrap();
        assert_eq!(config.timeout, Some(Duration::from_millis(2500)));
        assert_eq!(config.get_extra_str("organization"), Some("org-1"));
        assert_eq!(config.get_extra_u64("max_retries"), Some(4));
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let config = ProviderConfig::new("openai", "gpt-4o").api_key("sk-secret");
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("***"));
    }
}
