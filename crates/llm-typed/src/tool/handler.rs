//! Tool handler trait and closure-backed implementations.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use crate::decode::CompleteValue;
use crate::schema::{DescriptorRegistry, TypeDescriptor};

/// Error raised by a tool's executable.
///
/// The message is shown to the model as the tool's result, so it should
/// say what went wrong in terms the model can act on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ToolError {
    /// Description of the failure.
    pub message: String,
}

impl ToolError {
    /// A tool error with `message`.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<crate::LlmError> for ToolError {
    fn from(err: crate::LlmError) -> Self {
        Self::new(err.to_string())
    }
}

/// What a tool returns to the model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Text sent back as the tool result.
    pub content: String,
}

impl ToolOutput {
    /// An output carrying `content`.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

impl From<String> for ToolOutput {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for ToolOutput {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<serde_json::Value> for ToolOutput {
    fn from(value: serde_json::Value) -> Self {
        Self::new(value.to_string())
    }
}

/// Name, description, and argument type of a tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    /// The name the model calls the tool by.
    pub name: String,
    /// What the tool does, shown to the model.
    pub description: String,
    /// The shape of the arguments.
    pub arguments: TypeDescriptor,
    /// Resolves named references inside `arguments`.
    pub registry: DescriptorRegistry,
}

impl ToolSpec {
    /// A tool named `name` taking `arguments`.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        arguments: impl Into<TypeDescriptor>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            arguments: arguments.into(),
            registry: DescriptorRegistry::new(),
        }
    }

    /// Resolves named references through `registry`.
    #[must_use]
    pub fn with_registry(mut self, registry: DescriptorRegistry) -> Self {
        self.registry = registry;
        self
    }
}

/// A single tool the model can invoke.
///
/// Arguments reach [`execute`](Self::execute) already decoded and
/// validated against [`ToolSpec::arguments`]. For simple tools, wrap a
/// closure with [`tool_fn`] or [`tool_fn_with_ctx`].
///
/// The trait is object-safe (boxed futures) so handlers can be stored as
/// `Arc<dyn ToolHandler<Ctx>>`.
pub trait ToolHandler<Ctx = ()>: Send + Sync {
    /// The tool's name and argument type.
    fn spec(&self) -> &ToolSpec;

    /// Runs the tool.
    fn execute<'a>(
        &'a self,
        arguments: CompleteValue,
        ctx: &'a Ctx,
    ) -> Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send + 'a>>;
}

/// A handler backed by an async closure that receives the context.
pub struct FnToolHandler<Ctx, F> {
    spec: ToolSpec,
    handler: F,
    _ctx: PhantomData<fn(&Ctx)>,
}

impl<Ctx, F> fmt::Debug for FnToolHandler<Ctx, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnToolHandler")
            .field("name", &self.spec.name)
            .finish_non_exhaustive()
    }
}

impl<Ctx, F, Fut, O> ToolHandler<Ctx> for FnToolHandler<Ctx, F>
where
    Ctx: Send + Sync + 'static,
    F: for<'c> Fn(CompleteValue, &'c Ctx) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, ToolError>> + Send + 'static,
    O: Into<ToolOutput> + Send + 'static,
{
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn execute<'a>(
        &'a self,
        arguments: CompleteValue,
        ctx: &'a Ctx,
    ) -> Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send + 'a>> {
        let fut = (self.handler)(arguments, ctx);
        Box::pin(async move { fut.await.map(Into::into) })
    }
}

/// A handler backed by an async closure with no context.
pub struct NoCtxToolHandler<F> {
    spec: ToolSpec,
    handler: F,
}

impl<F> fmt::Debug for NoCtxToolHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoCtxToolHandler")
            .field("name", &self.spec.name)
            .finish_non_exhaustive()
    }
}

impl<F, Fut, O> ToolHandler<()> for NoCtxToolHandler<F>
where
    F: Fn(CompleteValue) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, ToolError>> + Send + 'static,
    O: Into<ToolOutput> + Send + 'static,
{
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn execute<'a>(
        &'a self,
        arguments: CompleteValue,
        _ctx: &'a (),
    ) -> Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send + 'a>> {
        let fut = (self.handler)(arguments);
        Box::pin(async move { fut.await.map(Into::into) })
    }
}

/// Wraps an async closure as a context-free tool.
///
/// ```rust
/// use llm_typed::schema::{Record, TypeDescriptor};
/// use llm_typed::tool::{ToolSpec, ToolError, tool_fn};
///
/// let add = tool_fn(
///     ToolSpec::new(
///         "add",
///         "Add two numbers",
///         Record::new("AddArgs")
///             .field("a", TypeDescriptor::number())
///             .field("b", TypeDescriptor::number()),
///     ),
///     |args| async move {
///         let a = args.as_value()["a"].as_f64().unwrap_or_default();
///         let b = args.as_value()["b"].as_f64().unwrap_or_default();
///         Ok::<_, ToolError>(format!("{}", a + b))
///     },
/// );
/// ```
pub fn tool_fn<F, Fut, O>(spec: ToolSpec, handler: F) -> NoCtxToolHandler<F>
where
    F: Fn(CompleteValue) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, ToolError>> + Send + 'static,
    O: Into<ToolOutput> + Send + 'static,
{
    NoCtxToolHandler { spec, handler }
}

/// Wraps an async closure that also receives the dispatch context.
///
/// The returned future must be `'static`: clone what you need from the
/// context before the `async` block.
pub fn tool_fn_with_ctx<Ctx, F, Fut, O>(spec: ToolSpec, handler: F) -> FnToolHandler<Ctx, F>
where
    Ctx: Send + Sync + 'static,
    F: for<'c> Fn(CompleteValue, &'c Ctx) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, ToolError>> + Send + 'static,
    O: Into<ToolOutput> + Send + 'static,
{
    FnToolHandler {
        spec,
        handler,
        _ctx: PhantomData,
    }
}
