//! Config-driven construction through [`ProviderRegistry`].

use llm_typed::registry::{ProviderConfig, ProviderFactory, ProviderRegistry};
use llm_typed::{DynProvider, LlmError};

use crate::{OpenAiConfig, OpenAiProvider};

/// Builds [`OpenAiProvider`]s from a [`ProviderConfig`] whose
/// `provider` is `"openai"`.
///
/// `api_key` and `model` are required. `base_url` and `timeout` are
/// honoured when present, as are `extra.organization` and
/// `extra.max_retries`, which sets the adapter's transport retry
/// budget.
///
/// ```rust,no_run
/// use llm_typed::ProviderRegistry;
/// use llm_typed::registry::ProviderConfig;
/// use llm_typed_openai::OpenAiFactory;
///
/// let registry = ProviderRegistry::new();
/// registry.register(OpenAiFactory);
/// let provider = registry
///     .build(&ProviderConfig::new("openai", "gpt-4o-mini").api_key("sk-..."))
///     .unwrap();
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiFactory;

impl ProviderFactory for OpenAiFactory {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn build(&self, config: &ProviderConfig) -> Result<Box<dyn DynProvider>, LlmError> {
        let config = OpenAiConfig::try_from(config)?;
        Ok(Box::new(OpenAiProvider::new(config)))
    }
}

/// Adds [`OpenAiFactory`] to [`ProviderRegistry::global`].
pub fn register_global() {
    ProviderRegistry::global().register(OpenAiFactory);
}
