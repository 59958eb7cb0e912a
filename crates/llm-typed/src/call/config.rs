use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::provider::{Capability, ProviderMetadata};

/// How the model is asked to return the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Pick from the provider's advertised capabilities.
    #[default]
    Auto,
    /// Constrain the text output with a native response format.
    Json,
    /// Force a single tool call whose arguments are the value.
    Tool,
}

impl OutputMode {
    /// Resolves [`Auto`](Self::Auto) against a provider.
    ///
    /// Returns the concrete mode and whether the schema must also be put
    /// in the system prompt because the provider has no native support
    /// for either mode.
    pub fn resolve(self, metadata: &ProviderMetadata) -> (Self, bool) {
        match self {
            Self::Auto if metadata.capabilities.contains(&Capability::StructuredOutput) => {
                (Self::Json, false)
            }
            Self::Auto if metadata.capabilities.contains(&Capability::Tools) => (Self::Tool, false),
            Self::Auto => (Self::Json, true),
            other => (other, false),
        }
    }
}

/// Sampling parameters forwarded to the provider unchanged.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModelParams {
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Upper bound on generated tokens.
    pub max_tokens: Option<u32>,
    /// Stop sequences.
    pub stop: Option<Vec<String>>,
}

/// Configuration for a [`TypedCall`](super::TypedCall).
///
/// ```rust
/// use std::time::Duration;
/// use llm_typed::call::{CallConfig, OutputMode};
///
/// let config = CallConfig {
///     max_retries: 1,
///     timeout: Some(Duration::from_secs(30)),
///     mode: OutputMode::Tool,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// Corrective retries after the first attempt. A call sends at most
    /// `max_retries + 1` requests. Default: 2.
    pub max_retries: u32,
    /// Deadline across all attempts. Default: none.
    pub timeout: Option<Duration>,
    /// Timeout for each individual request, passed to the adapter.
    pub request_timeout: Option<Duration>,
    /// Emit partial snapshots while the value streams in. When `false`
    /// only the final value is reported. Default: true.
    pub streaming: bool,
    /// How the value is requested. Default: [`OutputMode::Auto`].
    pub mode: OutputMode,
    /// Also describe the schema in the system prompt. Forced on when the
    /// provider supports neither native mode. Default: false.
    pub system_prompt_fallback: bool,
    /// Emit unions as `anyOf`. When `None`, follows the provider's
    /// [`Capability::NativeUnions`]. Default: none.
    pub native_unions: Option<bool>,
    /// Sampling parameters.
    pub params: ModelParams,
    /// Cancels the call when triggered.
    pub cancel: Option<CancellationToken>,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            timeout: None,
            request_timeout: None,
            streaming: true,
            mode: OutputMode::Auto,
            system_prompt_fallback: false,
            native_unions: None,
            params: ModelParams::default(),
            cancel: None,
        }
    }
}

impl CallConfig {
    /// Sets the retry budget.
    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the overall deadline.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the output mode.
    #[must_use]
    pub fn mode(mut self, mode: OutputMode) -> Self {
        self.mode = mode;
        self
    }

    /// Attaches a cancellation token.
    #[must_use]
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}
