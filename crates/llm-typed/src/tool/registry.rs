//! Tool registry.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use super::handler::{ToolError, ToolHandler};
use crate::chat::ToolResult;
use crate::decode::CompleteValue;
use crate::error::LlmError;
use crate::provider::ToolDefinition;
use crate::schema::{CompileOptions, CompiledSchema, SchemaCache};

/// The tools a model may call, indexed by name in registration order.
///
/// Generic over a context type `Ctx` passed to every handler.
pub struct ToolRegistry<Ctx = ()>
where
    Ctx: Send + Sync + 'static,
{
    handlers: IndexMap<String, Arc<dyn ToolHandler<Ctx>>>,
}

impl<Ctx: Send + Sync + 'static> Default for ToolRegistry<Ctx> {
    fn default() -> Self {
        Self {
            handlers: IndexMap::new(),
        }
    }
}

impl<Ctx: Send + Sync + 'static> Clone for ToolRegistry<Ctx> {
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
        }
    }
}

impl<Ctx: Send + Sync + 'static> fmt::Debug for ToolRegistry<Ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<Ctx: Send + Sync + 'static> ToolRegistry<Ctx> {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, replacing any with the same name.
    pub fn register(&mut self, handler: impl ToolHandler<Ctx> + 'static) -> &mut Self {
        self.register_shared(Arc::new(handler))
    }

    /// Registers a shared handler, replacing any with the same name.
    pub fn register_shared(&mut self, handler: Arc<dyn ToolHandler<Ctx>>) -> &mut Self {
        let name = handler.spec().name.clone();
        self.handlers.insert(name, handler);
        self
    }

    /// The handler for `name`.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolHandler<Ctx>>> {
        self.handlers.get(name)
    }

    /// Returns `true` if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns `true` if no tool is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// A registry without the named tools.
    #[must_use]
    pub fn without<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Self {
        let exclude: HashSet<&str> = names.into_iter().collect();
        self.filtered(|name| !exclude.contains(name))
    }

    /// A registry with only the named tools.
    #[must_use]
    pub fn only<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Self {
        let include: HashSet<&str> = names.into_iter().collect();
        self.filtered(|name| include.contains(name))
    }

    fn filtered(&self, keep: impl Fn(&str) -> bool) -> Self {
        Self {
            handlers: self
                .handlers
                .iter()
                .filter(|(name, _)| keep(name))
                .map(|(name, handler)| (name.clone(), Arc::clone(handler)))
                .collect(),
        }
    }

    /// Compiles every tool's argument type, in registration order.
    ///
    /// # Errors
    ///
    /// [`LlmError::UnsupportedType`] naming the first tool whose argument
    /// type cannot be represented.
    pub fn compile(
        &self,
        options: CompileOptions,
    ) -> Result<Vec<(String, Arc<CompiledSchema>)>, LlmError> {
        self.handlers
            .iter()
            .map(|(name, handler)| {
                let spec = handler.spec();
                SchemaCache::global()
                    .get_or_compile(&spec.arguments, &spec.registry, options)
                    .map(|schema| (name.clone(), schema))
                    .map_err(|e| match e {
                        LlmError::UnsupportedType { message } => LlmError::UnsupportedType {
                            message: format!("arguments of tool `{name}`: {message}"),
                        },
                        other => other,
                    })
            })
            .collect()
    }

    /// Definitions to advertise to the model.
    ///
    /// # Errors
    ///
    /// As [`compile`](Self::compile).
    pub fn definitions(&self, options: CompileOptions) -> Result<Vec<ToolDefinition>, LlmError> {
        let compiled = self.compile(options)?;
        Ok(compiled
            .into_iter()
            .map(|(name, schema)| {
                let spec = self.handlers[&name].spec();
                ToolDefinition {
                    description: spec.description.clone(),
                    parameters: schema.spec().schema.clone(),
                    strict: schema.spec().strict_compatible,
                    name,
                }
            })
            .collect())
    }

    /// Runs `name` with already-validated arguments.
    ///
    /// Always returns a result: an unknown tool or an execution error is
    /// reported with `is_error` set.
    pub async fn execute(
        &self,
        name: &str,
        call_id: &str,
        arguments: CompleteValue,
        ctx: &Ctx,
    ) -> ToolResult {
        let outcome = match self.handlers.get(name) {
            Some(handler) => handler.execute(arguments, ctx).await,
            None => Err(ToolError::new(format!("Unknown tool: {name}"))),
        };
        match outcome {
            Ok(output) => ToolResult {
                tool_call_id: call_id.to_owned(),
                content: output.content,
                is_error: false,
            },
            Err(e) => {
                debug!(tool = name, call_id, error = %e, "tool execution failed");
                ToolResult {
                    tool_call_id: call_id.to_owned(),
                    content: e.message,
                    is_error: true,
                }
            }
        }
    }
}
